pub mod resume_reconciler;

pub use resume_reconciler::{LifecyclePhase, ResumeReconciler, ResumeTarget};
