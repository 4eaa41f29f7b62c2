/// Return this error from an iteration to skip the remaining steps of that iteration.
///
/// The virtual user that ran the iteration stays in the pool and will be given the next scheduled
/// start as normal. The runner counts the iteration as aborted rather than failed, so use this for
/// deliberate early exits, for example when a login step did not produce a session.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct IterationAbortError {
    msg: String,
}

impl IterationAbortError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl Default for IterationAbortError {
    fn default() -> Self {
        Self {
            msg: "Iteration aborted".to_string(),
        }
    }
}
