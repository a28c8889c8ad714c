//! Recording metrics sink.

use std::sync::Mutex;

use bridge_core::{MetricKind, Metrics};

use crate::lock;

/// One recorded `observe` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub kind: MetricKind,
    pub labels: Vec<(String, String)>,
}

impl Observation {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Remembers every observation.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    observations: Mutex<Vec<Observation>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observations(&self) -> Vec<Observation> {
        lock(&self.observations).clone()
    }

    /// Number of observations of `kind`.
    pub fn count(&self, kind: MetricKind) -> usize {
        lock(&self.observations)
            .iter()
            .filter(|o| o.kind == kind)
            .count()
    }

    /// Number of observations of `kind` with `label = value`.
    pub fn count_with(&self, kind: MetricKind, label: &str, value: &str) -> usize {
        lock(&self.observations)
            .iter()
            .filter(|o| o.kind == kind && o.label(label) == Some(value))
            .count()
    }
}

impl Metrics for RecordingMetrics {
    fn observe(&self, kind: MetricKind, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        lock(&self.observations).push(Observation { kind, labels });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let metrics = RecordingMetrics::new();
        metrics.observe(MetricKind::ChangeEvent, &[("discarded_reason", "duplicated_post")]);
        metrics.observe(MetricKind::ChangeEvent, &[("discarded_reason", "")]);
        metrics.observe(MetricKind::Dropped, &[]);

        assert_eq!(metrics.count(MetricKind::ChangeEvent), 2);
        assert_eq!(
            metrics.count_with(MetricKind::ChangeEvent, "discarded_reason", "duplicated_post"),
            1
        );
        assert_eq!(metrics.observations()[2].kind, MetricKind::Dropped);
    }
}
