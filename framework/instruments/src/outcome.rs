use std::collections::BTreeSet;
use std::time::Duration;

/// The recorded result of one request, including the checks that were evaluated against it.
///
/// Outcomes are immutable once built. They are appended to the [crate::Reporter] outcome log and
/// aggregated when the run finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    operation_id: String,
    vu_id: usize,
    status_code: u16,
    duration: Duration,
    checks_passed: BTreeSet<String>,
    checks_failed: BTreeSet<String>,
}

impl RequestOutcome {
    pub fn new(
        operation_id: String,
        vu_id: usize,
        status_code: u16,
        duration: Duration,
        checks_passed: BTreeSet<String>,
        checks_failed: BTreeSet<String>,
    ) -> Self {
        Self {
            operation_id,
            vu_id,
            status_code,
            duration,
            checks_passed,
            checks_failed,
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn vu_id(&self) -> usize {
        self.vu_id
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_nanos() as f64 / 1_000_000.0
    }

    pub fn checks_passed(&self) -> &BTreeSet<String> {
        &self.checks_passed
    }

    pub fn checks_failed(&self) -> &BTreeSet<String> {
        &self.checks_failed
    }

    /// A request counts as failed if any check against it failed, or if no response was received.
    pub fn is_failed(&self) -> bool {
        !self.checks_failed.is_empty() || self.status_code == 0
    }
}
