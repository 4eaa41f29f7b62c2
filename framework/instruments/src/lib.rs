mod aggregate;
mod check;
mod outcome;
mod report;
mod reporter;
mod threshold;

use std::time::{Duration, Instant};

pub use aggregate::{Metric, MetricKind, RunMetrics};
pub use check::{AsOperation, Checks};
pub use outcome::RequestOutcome;
pub use report::print_summary;
pub use reporter::{IterationEnd, LiveCounters, Reporter};
pub use threshold::{Aggregation, Comparison, Threshold, ThresholdError};

/// Started timing of a single request.
///
/// Create this immediately before sending the request, and call [OperationRecord::finish] once
/// the full response has been received.
pub struct OperationRecord {
    operation_id: String,
    started: Instant,
}

impl OperationRecord {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            started: Instant::now(),
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Stop the timer. Use a status code of `0` when no response was received.
    pub fn finish(self, status_code: u16) -> CompletedOperation {
        let duration = self.started.elapsed();
        log::trace!(
            "Operation {} took {}ms with status {}",
            self.operation_id,
            duration.as_millis(),
            status_code,
        );

        CompletedOperation {
            operation_id: self.operation_id,
            status_code,
            duration,
        }
    }
}

/// A request that has been timed but not yet checked.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedOperation {
    pub operation_id: String,
    /// HTTP status, or `0` if the request failed before a response was received.
    pub status_code: u16,
    pub duration: Duration,
}

impl CompletedOperation {
    pub fn is_transport_failure(&self) -> bool {
        self.status_code == 0
    }
}
