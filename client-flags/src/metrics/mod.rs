pub mod consts;

/// Bumps a counter through the `metrics` facade. A no-op unless the host installed a recorder.
pub fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
    let labels = labels.to_vec();
    metrics::counter!(name, &labels).increment(value);
}
