use crate::threshold::Aggregation;
use crate::RequestOutcome;
use shop_tunnel_summary_model::{
    CheckSummary, CounterSummary, MetricsSummary, OperationSummary, RateSummary, TrendSummary,
};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// The built-in metrics that thresholds can be set on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    HttpReqs,
    HttpReqFailed,
    HttpReqDuration,
    Checks,
    Iterations,
    IterationDuration,
    DroppedIterations,
    InterruptedIterations,
    FailedIterations,
    AbortedIterations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::HttpReqs,
        Metric::HttpReqFailed,
        Metric::HttpReqDuration,
        Metric::Checks,
        Metric::Iterations,
        Metric::IterationDuration,
        Metric::DroppedIterations,
        Metric::InterruptedIterations,
        Metric::FailedIterations,
        Metric::AbortedIterations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::HttpReqs => "http_reqs",
            Metric::HttpReqFailed => "http_req_failed",
            Metric::HttpReqDuration => "http_req_duration",
            Metric::Checks => "checks",
            Metric::Iterations => "iterations",
            Metric::IterationDuration => "iteration_duration",
            Metric::DroppedIterations => "dropped_iterations",
            Metric::InterruptedIterations => "interrupted_iterations",
            Metric::FailedIterations => "failed_iterations",
            Metric::AbortedIterations => "aborted_iterations",
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::HttpReqFailed | Metric::Checks => MetricKind::Rate,
            Metric::HttpReqDuration | Metric::IterationDuration => MetricKind::Trend,
            _ => MetricKind::Counter,
        }
    }
}

impl Display for Metric {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Sorted samples, in milliseconds.
#[derive(Debug, Clone, Default)]
struct Trend {
    samples: Vec<f64>,
}

impl Trend {
    fn new(mut samples: Vec<f64>) -> Self {
        samples.sort_by(f64::total_cmp);
        Self { samples }
    }

    fn avg(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    fn min(&self) -> f64 {
        self.samples.first().copied().unwrap_or_default()
    }

    fn max(&self) -> f64 {
        self.samples.last().copied().unwrap_or_default()
    }

    /// Linear interpolation between the closest ranks, so the median of an even number of
    /// samples is the mean of the two middle samples.
    fn percentile(&self, p: f64) -> f64 {
        match self.samples.len() {
            0 => 0.0,
            1 => self.samples[0],
            n => {
                let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
                let lower = rank.floor() as usize;
                let upper = rank.ceil() as usize;
                let weight = rank - lower as f64;
                self.samples[lower] + (self.samples[upper] - self.samples[lower]) * weight
            }
        }
    }

    fn summary(&self) -> TrendSummary {
        TrendSummary {
            avg: self.avg(),
            min: self.min(),
            med: self.percentile(50.0),
            max: self.max(),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
        }
    }

    fn value(&self, aggregation: &Aggregation) -> Option<f64> {
        match aggregation {
            Aggregation::Avg => Some(self.avg()),
            Aggregation::Min => Some(self.min()),
            Aggregation::Med => Some(self.percentile(50.0)),
            Aggregation::Max => Some(self.max()),
            Aggregation::Percentile(p) => Some(self.percentile(*p)),
            Aggregation::Rate | Aggregation::Count => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Rate {
    matched: u64,
    total: u64,
}

impl Rate {
    fn add(&mut self, matched: bool) {
        self.total += 1;
        if matched {
            self.matched += 1;
        }
    }

    fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }

    fn summary(&self) -> RateSummary {
        RateSummary {
            matched: self.matched,
            total: self.total,
            rate: self.rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IterationCounts {
    pub completed: u64,
    pub aborted: u64,
    pub interrupted: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct OperationSamples {
    failed: u64,
    durations: Vec<f64>,
}

/// Everything recorded during a run, aggregated and ready to be summarised or checked against
/// thresholds.
#[derive(Debug)]
pub struct RunMetrics {
    elapsed: Duration,
    http_req_duration: Trend,
    http_req_failed: Rate,
    checks: Rate,
    check_results: BTreeMap<String, (u64, u64)>,
    operations: BTreeMap<String, (u64, Trend)>,
    iteration_duration: Trend,
    iterations: IterationCounts,
    vus_max: usize,
    peak_in_flight: usize,
}

impl RunMetrics {
    pub(crate) fn aggregate(
        elapsed: Duration,
        outcomes: Vec<RequestOutcome>,
        iteration_durations: Vec<Duration>,
        iterations: IterationCounts,
        vus_max: usize,
        peak_in_flight: usize,
    ) -> Self {
        let mut http_req_failed = Rate::default();
        let mut checks = Rate::default();
        let mut check_results = BTreeMap::<String, (u64, u64)>::new();
        let mut operations = BTreeMap::<String, OperationSamples>::new();
        let mut durations = Vec::with_capacity(outcomes.len());

        for outcome in &outcomes {
            let failed = outcome.is_failed();
            http_req_failed.add(failed);
            durations.push(outcome.duration_ms());

            for name in outcome.checks_passed() {
                checks.add(true);
                check_results.entry(name.clone()).or_default().0 += 1;
            }
            for name in outcome.checks_failed() {
                checks.add(false);
                check_results.entry(name.clone()).or_default().1 += 1;
            }

            let operation = operations
                .entry(outcome.operation_id().to_string())
                .or_default();
            operation.durations.push(outcome.duration_ms());
            if failed {
                operation.failed += 1;
            }
        }

        Self {
            elapsed,
            http_req_duration: Trend::new(durations),
            http_req_failed,
            checks,
            check_results,
            operations: operations
                .into_iter()
                .map(|(id, samples)| (id, (samples.failed, Trend::new(samples.durations))))
                .collect(),
            iteration_duration: Trend::new(
                iteration_durations
                    .into_iter()
                    .map(|d| d.as_nanos() as f64 / 1_000_000.0)
                    .collect(),
            ),
            iterations,
            vus_max,
            peak_in_flight,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    fn counter(&self, count: u64) -> CounterSummary {
        let elapsed = self.elapsed.as_secs_f64();
        CounterSummary {
            count,
            rate: if elapsed > 0.0 {
                count as f64 / elapsed
            } else {
                0.0
            },
        }
    }

    fn count(&self, metric: Metric) -> u64 {
        let i = &self.iterations;
        match metric {
            Metric::HttpReqs => self.http_req_failed.total,
            Metric::Iterations => i.completed + i.aborted + i.failed,
            Metric::DroppedIterations => i.dropped,
            Metric::InterruptedIterations => i.interrupted,
            Metric::FailedIterations => i.failed,
            Metric::AbortedIterations => i.aborted,
            Metric::HttpReqFailed => self.http_req_failed.matched,
            Metric::Checks => self.checks.matched,
            Metric::HttpReqDuration => self.http_req_duration.samples.len() as u64,
            Metric::IterationDuration => self.iteration_duration.samples.len() as u64,
        }
    }

    /// The value of an aggregation over a metric, or `None` if that aggregation does not apply
    /// to the kind of metric.
    pub fn value(&self, metric: Metric, aggregation: &Aggregation) -> Option<f64> {
        match metric.kind() {
            MetricKind::Trend => {
                let trend = match metric {
                    Metric::HttpReqDuration => &self.http_req_duration,
                    _ => &self.iteration_duration,
                };
                trend.value(aggregation)
            }
            MetricKind::Rate => {
                let rate = match metric {
                    Metric::HttpReqFailed => &self.http_req_failed,
                    _ => &self.checks,
                };
                match aggregation {
                    Aggregation::Rate => Some(rate.rate()),
                    _ => None,
                }
            }
            MetricKind::Counter => {
                let counter = self.counter(self.count(metric));
                match aggregation {
                    Aggregation::Count => Some(counter.count as f64),
                    Aggregation::Rate => Some(counter.rate),
                    _ => None,
                }
            }
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            http_reqs: self.counter(self.count(Metric::HttpReqs)),
            http_req_failed: self.http_req_failed.summary(),
            http_req_duration: self.http_req_duration.summary(),
            checks: self.checks.summary(),
            iterations: self.counter(self.count(Metric::Iterations)),
            iteration_duration: self.iteration_duration.summary(),
            dropped_iterations: self.counter(self.count(Metric::DroppedIterations)),
            interrupted_iterations: self.counter(self.count(Metric::InterruptedIterations)),
            failed_iterations: self.counter(self.count(Metric::FailedIterations)),
            aborted_iterations: self.counter(self.count(Metric::AbortedIterations)),
            vus_max: self.vus_max,
            peak_in_flight: self.peak_in_flight,
            check_results: self
                .check_results
                .iter()
                .map(|(name, (passes, fails))| CheckSummary {
                    name: name.clone(),
                    passes: *passes,
                    fails: *fails,
                })
                .collect(),
            operations: self
                .operations
                .iter()
                .map(|(operation_id, (failed, trend))| OperationSummary {
                    operation_id: operation_id.clone(),
                    total: trend.samples.len() as u64,
                    failed: *failed,
                    duration: trend.summary(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn outcome(operation_id: &str, status_code: u16, millis: u64) -> RequestOutcome {
        let check = format!("{operation_id} status is 200");
        let (passed, failed) = if status_code == 200 {
            (BTreeSet::from([check]), BTreeSet::new())
        } else {
            (BTreeSet::new(), BTreeSet::from([check]))
        };
        RequestOutcome::new(
            operation_id.to_string(),
            1,
            status_code,
            Duration::from_millis(millis),
            passed,
            failed,
        )
    }

    fn metrics(outcomes: Vec<RequestOutcome>) -> RunMetrics {
        RunMetrics::aggregate(
            Duration::from_secs(2),
            outcomes,
            vec![Duration::from_millis(40), Duration::from_millis(60)],
            IterationCounts {
                completed: 2,
                dropped: 4,
                ..Default::default()
            },
            3,
            2,
        )
    }

    #[test]
    fn median_of_even_sample_is_mean_of_middle_values() {
        let trend = Trend::new(vec![40.0, 10.0, 30.0, 20.0]);
        assert_eq!(25.0, trend.percentile(50.0));
        assert_eq!(10.0, trend.min());
        assert_eq!(40.0, trend.max());
        assert_eq!(25.0, trend.avg());
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let trend = Trend::new((1..=11).map(|v| v as f64).collect());
        assert_eq!(6.0, trend.percentile(50.0));
        assert_eq!(10.0, trend.percentile(90.0));
        assert!((trend.percentile(95.0) - 10.5).abs() < 1e-9);
    }

    #[test]
    fn empty_trend_reports_zero() {
        let summary = Trend::default().summary();
        assert_eq!(TrendSummary::default(), summary);
    }

    #[test]
    fn failed_rate_counts_requests_with_failed_checks() {
        let metrics = metrics(vec![
            outcome("auth", 200, 10),
            outcome("info", 200, 20),
            outcome("sendCoin", 500, 30),
            outcome("buy", 200, 40),
        ]);

        let summary = metrics.summary();
        assert_eq!(4, summary.http_reqs.count);
        assert_eq!(2.0, summary.http_reqs.rate);
        assert_eq!(1, summary.http_req_failed.matched);
        assert_eq!(0.25, summary.http_req_failed.rate);
        assert_eq!(0.75, summary.checks.rate);
        assert_eq!(25.0, summary.http_req_duration.med);
        assert_eq!(
            Some(0.25),
            metrics.value(Metric::HttpReqFailed, &Aggregation::Rate)
        );
        assert_eq!(None, metrics.value(Metric::HttpReqFailed, &Aggregation::Med));
    }

    #[test]
    fn summary_breaks_down_checks_and_operations() {
        let summary = metrics(vec![
            outcome("sendCoin", 200, 10),
            outcome("sendCoin", 500, 30),
        ])
        .summary();

        assert_eq!(
            vec![CheckSummary {
                name: "sendCoin status is 200".to_string(),
                passes: 1,
                fails: 1,
            }],
            summary.check_results
        );
        assert_eq!(1, summary.operations.len());
        assert_eq!(2, summary.operations[0].total);
        assert_eq!(1, summary.operations[0].failed);
        assert_eq!(20.0, summary.operations[0].duration.avg);
    }

    #[test]
    fn counters_include_iteration_outcomes() {
        let metrics = metrics(vec![]);
        let summary = metrics.summary();

        assert_eq!(2, summary.iterations.count);
        assert_eq!(4, summary.dropped_iterations.count);
        assert_eq!(2.0, summary.dropped_iterations.rate);
        assert_eq!(50.0, summary.iteration_duration.med);
        assert_eq!(3, summary.vus_max);
        assert_eq!(0.0, summary.http_req_failed.rate);
        assert_eq!(
            Some(4.0),
            metrics.value(Metric::DroppedIterations, &Aggregation::Count)
        );
    }

    #[test]
    fn metric_names_round_trip() {
        for metric in Metric::ALL {
            assert_eq!(Ok(metric), metric.as_str().parse::<Metric>());
        }
        assert!("http_req_waiting".parse::<Metric>().is_err());
    }
}
