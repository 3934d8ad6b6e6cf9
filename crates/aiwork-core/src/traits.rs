/// Where executors report timings.
///
/// Injected at construction so tests can swap in a recording or no-op sink.
pub trait MetricsSink: Send + Sync + 'static {
    /// Record one observation with its tags.
    fn record(&self, name: &str, value: f64, tags: &[(&str, &str)]);
}
