pub mod flag_models;
pub mod hash;
pub mod overrides;
pub mod registry;
pub mod resolver;

pub use registry::{Flag, FlagDefinition};
pub use resolver::{FlagEvaluation, FlagEvaluationReason, FlagResolver, RolloutContext};
