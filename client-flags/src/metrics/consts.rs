// Refresh lifecycle
pub const REFRESH_OUTCOME_COUNTER: &str = "client_flags_refresh_outcome_total";
pub const REFRESH_SUPERSEDED_COUNTER: &str = "client_flags_refresh_superseded_total";
pub const HYDRATION_SOURCE_COUNTER: &str = "client_flags_hydration_source_total";
pub const CACHE_WRITE_ERRORS_COUNTER: &str = "client_flags_cache_write_errors_total";

// Resolution
pub const UNKNOWN_FLAG_COUNTER: &str = "client_flags_unknown_flag_total";
pub const ROLLOUT_MISSING_STABLE_ID_COUNTER: &str = "client_flags_rollout_missing_stable_id_total";
pub const DEV_OVERRIDE_REJECTED_COUNTER: &str = "client_flags_dev_override_rejected_total";

// Lifecycle
pub const RESUME_REFRESH_TRIGGERED_COUNTER: &str = "client_flags_resume_refresh_triggered_total";
