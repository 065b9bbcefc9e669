//! Operation metrics.
//!
//! The service reports every mutation (and `list`) to a [`MetricsRecorder`]
//! with the action name, its wall time and the number of rows affected.
//! Action names: `grant`, `deny`, `revoke`, `bulk_grant`, `bulk_revoke`,
//! `delete`, `clear`, `list`, `set_parent`, `set_inheriting`, `set_owner`,
//! `insert_entry`, `delete_entry`, `ensure`, `delete_class`, `policy_sync`.

use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

/// Sink for operation metrics. Implementations must be cheap and must not
/// fail; the service calls them on success and failure paths alike.
pub trait MetricsRecorder: Send + Sync {
    fn record(&self, action: &str, elapsed: Duration, affected: u64);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {
    fn record(&self, _action: &str, _elapsed: Duration, _affected: u64) {}
}

/// Emits each sample as a DEBUG event on target `aclgraph::metrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsRecorder;

impl MetricsRecorder for TracingMetricsRecorder {
    fn record(&self, action: &str, elapsed: Duration, affected: u64) {
        debug!(
            target: "aclgraph::metrics",
            action,
            elapsed_us = elapsed.as_micros() as u64,
            affected,
            "acl operation"
        );
    }
}

/// One recorded sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub action: String,
    pub elapsed: Duration,
    pub affected: u64,
}

/// Keeps samples in memory. Useful for tests and diagnostics.
#[derive(Debug, Default)]
pub struct InMemoryMetricsRecorder {
    samples: Mutex<Vec<MetricSample>>,
}

impl InMemoryMetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every sample so far.
    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples
            .lock()
            .map(|samples| samples.clone())
            .unwrap_or_default()
    }

    /// Samples recorded for `action`.
    pub fn for_action(&self, action: &str) -> Vec<MetricSample> {
        self.samples()
            .into_iter()
            .filter(|s| s.action == action)
            .collect()
    }
}

impl MetricsRecorder for InMemoryMetricsRecorder {
    fn record(&self, action: &str, elapsed: Duration, affected: u64) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.push(MetricSample {
                action: action.to_owned(),
                elapsed,
                affected,
            });
        }
    }
}
