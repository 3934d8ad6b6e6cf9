use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use aiwork_core::traits::MetricsSink;

/// Name under which executors report per-task wall time.
pub const TASK_DURATION_METRIC: &str = "task_duration_seconds";

/// One recorded observation.
#[derive(Debug, Clone, Serialize)]
pub struct MetricEntry {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
}

/// In-memory metrics collector.
#[derive(Default)]
pub struct MetricsRegistry {
    entries: Mutex<Vec<MetricEntry>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, oldest first.
    pub fn summary(&self) -> Vec<MetricEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Entries with the given name whose tags include all of `tags`.
    pub fn matching(&self, name: &str, tags: &[(&str, &str)]) -> Vec<MetricEntry> {
        self.summary()
            .into_iter()
            .filter(|e| e.name == name)
            .filter(|e| {
                tags.iter()
                    .all(|(k, v)| e.tags.get(*k).is_some_and(|tv| tv == v))
            })
            .collect()
    }
}

impl MetricsSink for MetricsRegistry {
    fn record(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        let entry = MetricEntry {
            timestamp: Utc::now(),
            name: name.to_string(),
            value,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// Sink that drops every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
}
