use crate::{CompletedOperation, Reporter, RequestOutcome};
use std::collections::BTreeSet;

/// Anything that carries a timed operation can be checked and recorded.
pub trait AsOperation {
    fn operation(&self) -> &CompletedOperation;

    /// Why the operation failed below the HTTP layer, if it did.
    fn transport_error(&self) -> Option<&str> {
        None
    }
}

impl AsOperation for CompletedOperation {
    fn operation(&self) -> &CompletedOperation {
        self
    }
}

/// Evaluates named checks against a response and records the result as a [RequestOutcome].
///
/// Checks never short circuit. Every check is evaluated and a failing check does not stop the
/// caller from carrying on with the iteration.
///
/// ```ignore
/// let passed = Checks::new(&response)
///     .check("info status is 200", |r| r.status() == 200)
///     .record(&reporter, vu_id);
/// ```
pub struct Checks<'a, T: AsOperation> {
    subject: &'a T,
    passed: BTreeSet<String>,
    failed: BTreeSet<String>,
}

impl<'a, T: AsOperation> Checks<'a, T> {
    pub fn new(subject: &'a T) -> Self {
        Self {
            subject,
            passed: BTreeSet::new(),
            failed: BTreeSet::new(),
        }
    }

    pub fn check(mut self, name: &str, predicate: impl FnOnce(&T) -> bool) -> Self {
        if predicate(self.subject) {
            self.passed.insert(name.to_string());
        } else {
            let operation = self.subject.operation();
            match self.subject.transport_error() {
                Some(error) => log::debug!(
                    "Check [{}] failed for {} with status {}: {}",
                    name,
                    operation.operation_id,
                    operation.status_code,
                    error
                ),
                None => log::debug!(
                    "Check [{}] failed for {} with status {}",
                    name,
                    operation.operation_id,
                    operation.status_code
                ),
            }
            self.failed.insert(name.to_string());
        }
        self
    }

    pub fn all_passed(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn into_outcome(self, vu_id: usize) -> RequestOutcome {
        let operation = self.subject.operation();
        RequestOutcome::new(
            operation.operation_id.clone(),
            vu_id,
            operation.status_code,
            operation.duration,
            self.passed,
            self.failed,
        )
    }

    /// Append the outcome to the reporter. Returns true if every check passed.
    pub fn record(self, reporter: &Reporter, vu_id: usize) -> bool {
        let all_passed = self.all_passed();
        reporter.add_outcome(self.into_outcome(vu_id));
        all_passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn operation(status_code: u16) -> CompletedOperation {
        CompletedOperation {
            operation_id: "info".to_string(),
            status_code,
            duration: Duration::from_millis(12),
        }
    }

    #[test]
    fn every_check_is_evaluated() {
        let op = operation(500);
        let mut evaluated = 0;

        let outcome = Checks::new(&op)
            .check("status is 200", |r| {
                evaluated += 1;
                r.status_code == 200
            })
            .check("status is not 404", |r| r.status_code != 404)
            .into_outcome(3);

        assert_eq!(1, evaluated);
        assert!(outcome.checks_failed().contains("status is 200"));
        assert!(outcome.checks_passed().contains("status is not 404"));
        assert_eq!(3, outcome.vu_id());
        assert!(outcome.is_failed());
    }

    #[test]
    fn record_appends_to_reporter() {
        let reporter = Reporter::new();
        let op = operation(200);

        let passed = Checks::new(&op)
            .check("status is 200", |r| r.status_code == 200)
            .record(&reporter, 1);

        assert!(passed);
        assert_eq!(1, reporter.live_counters().requests);
    }

    #[test]
    fn transport_failure_without_checks_is_failed() {
        let op = operation(0);
        let outcome = Checks::new(&op).into_outcome(1);

        assert!(outcome.checks_failed().is_empty());
        assert!(outcome.is_failed());
    }

    #[test]
    fn operations_have_no_transport_error_by_default() {
        let op = operation(0);
        assert_eq!(None, op.transport_error());
    }
}
