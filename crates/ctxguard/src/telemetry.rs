//! Fire-and-forget compaction telemetry.
//!
//! Sinks are called synchronously from inside a compaction pass and must
//! never fail or block it. Anything that can go wrong in a sink is the
//! sink's problem to swallow.

use chrono::Utc;
use tracing::info;

/// Which compaction strategy produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondenseKind {
    Structural,
    Summarized,
}

impl std::fmt::Display for CondenseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CondenseKind::Structural => write!(f, "structural"),
            CondenseKind::Summarized => write!(f, "summarized"),
        }
    }
}

/// Receives compaction events.
pub trait TelemetrySink: Send + Sync {
    /// A sliding-window truncation removed messages from `task_id`'s history.
    fn record_truncation(&self, task_id: &str);

    /// A condensation pass completed for `task_id`.
    fn record_condensation(&self, task_id: &str, kind: CondenseKind, is_automatic: bool) {
        let _ = (task_id, kind, is_automatic);
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for std::sync::Arc<T> {
    fn record_truncation(&self, task_id: &str) {
        (**self).record_truncation(task_id);
    }

    fn record_condensation(&self, task_id: &str, kind: CondenseKind, is_automatic: bool) {
        (**self).record_condensation(task_id, kind, is_automatic);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_truncation(&self, _task_id: &str) {}
}

/// Emits each event as a structured `tracing` record under the
/// `ctxguard::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record_truncation(&self, task_id: &str) {
        info!(
            target: "ctxguard::telemetry",
            event = "conversation_truncated",
            task_id,
            at = %Utc::now().to_rfc3339(),
            "conversation truncated"
        );
    }

    fn record_condensation(&self, task_id: &str, kind: CondenseKind, is_automatic: bool) {
        info!(
            target: "ctxguard::telemetry",
            event = "context_condensed",
            task_id,
            kind = %kind,
            is_automatic,
            at = %Utc::now().to_rfc3339(),
            "context condensed"
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records events for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingTelemetry {
        pub truncations: Mutex<Vec<String>>,
        pub condensations: Mutex<Vec<(String, CondenseKind, bool)>>,
    }

    impl TelemetrySink for RecordingTelemetry {
        fn record_truncation(&self, task_id: &str) {
            self.truncations.lock().unwrap().push(task_id.to_string());
        }

        fn record_condensation(&self, task_id: &str, kind: CondenseKind, is_automatic: bool) {
            self.condensations
                .lock()
                .unwrap()
                .push((task_id.to_string(), kind, is_automatic));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingTelemetry;
    use super::*;
    use std::sync::Arc;

    #[test]
    fn arc_forwards_events() {
        let inner = Arc::new(RecordingTelemetry::default());
        let sink: Arc<dyn TelemetrySink> = inner.clone();
        sink.record_truncation("t1");
        sink.record_condensation("t1", CondenseKind::Structural, true);

        assert_eq!(*inner.truncations.lock().unwrap(), vec!["t1".to_string()]);
        assert_eq!(
            inner.condensations.lock().unwrap()[0],
            ("t1".to_string(), CondenseKind::Structural, true)
        );
    }

    #[test]
    fn noop_ignores_condensation() {
        NoopTelemetry.record_condensation("t", CondenseKind::Summarized, false);
        NoopTelemetry.record_truncation("t");
    }

    #[test]
    fn kind_display() {
        assert_eq!(CondenseKind::Structural.to_string(), "structural");
        assert_eq!(CondenseKind::Summarized.to_string(), "summarized");
    }
}
