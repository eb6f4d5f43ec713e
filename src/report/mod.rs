//! Error tracking sink.
//!
//! Reports integration anomalies that need a human to look at them. Reporting
//! must never fail or block the caller.

use tracing::error;

/// Fire-and-forget anomaly reporting.
pub trait ErrorSink: Send + Sync {
    fn report(&self, message: &str);
}

/// Emits reports as `error` events on the `error_report` target, where a log
/// shipper can forward them to the error tracker.
#[derive(Debug, Clone, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, message: &str) {
        error!(target: "error_report", report = %message, "Reported anomaly");
    }
}
