use serde::{Deserialize, Serialize};

/// A monotonically increasing count, with its average rate over the run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CounterSummary {
    pub count: u64,
    /// Count per second of elapsed run time.
    pub rate: f64,
}

/// A metric made of boolean samples.
///
/// `rate` is the fraction of samples that matched. What "matched" means is metric specific, for
/// `http_req_failed` a match is a failed request while for `checks` it is a passing check.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RateSummary {
    pub matched: u64,
    pub total: u64,
    pub rate: f64,
}

/// Distribution of a set of samples, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TrendSummary {
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
}

/// Pass and fail counts for one named check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

/// Per-operation breakdown of the requests made during the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationSummary {
    pub operation_id: String,
    pub total: u64,
    pub failed: u64,
    pub duration: TrendSummary,
}

/// Aggregated metrics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    pub http_reqs: CounterSummary,
    pub http_req_failed: RateSummary,
    pub http_req_duration: TrendSummary,
    pub checks: RateSummary,
    pub iterations: CounterSummary,
    pub iteration_duration: TrendSummary,
    /// Scheduled starts that could not be run because every virtual user was busy and the pool
    /// was already at its maximum size.
    pub dropped_iterations: CounterSummary,
    pub interrupted_iterations: CounterSummary,
    pub failed_iterations: CounterSummary,
    pub aborted_iterations: CounterSummary,
    /// The number of virtual users that were initialised during the run.
    pub vus_max: usize,
    /// The highest number of iterations that were in flight at the same time.
    pub peak_in_flight: usize,
    pub check_results: Vec<CheckSummary>,
    pub operations: Vec<OperationSummary>,
}

/// The outcome of evaluating one threshold predicate at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub predicate: String,
    /// The aggregated value the predicate was evaluated against.
    pub observed: f64,
    pub passed: bool,
}
