pub mod client;
pub mod config;
pub mod entitlements;
pub mod errors;
pub mod flags;
pub mod freshness;
pub mod lifecycle;
pub mod metrics;
pub mod session;
pub mod transport;

// Public so integration tests under tests/ can drive the controllers with scripted collaborators.
pub mod test_utils;
