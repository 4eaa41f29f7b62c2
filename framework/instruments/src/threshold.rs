use crate::aggregate::{Metric, MetricKind, RunMetrics};
use shop_tunnel_summary_model::ThresholdResult;
use std::fmt::{Display, Formatter};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ThresholdError {
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),
    #[error("invalid threshold `{predicate}`: {reason}")]
    InvalidPredicate { predicate: String, reason: String },
    #[error("`{aggregation}` can't be used on the {kind} metric `{metric}`")]
    UnsupportedAggregation {
        metric: String,
        kind: &'static str,
        aggregation: String,
    },
}

/// How a metric's samples are reduced to a single value before comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    Avg,
    Min,
    Med,
    Max,
    /// `p(N)`, with N between 0 and 100
    Percentile(f64),
}

impl Aggregation {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "rate" => Some(Aggregation::Rate),
            "count" => Some(Aggregation::Count),
            "avg" => Some(Aggregation::Avg),
            "min" => Some(Aggregation::Min),
            "med" => Some(Aggregation::Med),
            "max" => Some(Aggregation::Max),
            _ => {
                let p = s.strip_prefix("p(")?.strip_suffix(')')?.trim();
                let p = p.parse::<f64>().ok()?;
                (0.0..=100.0).contains(&p).then_some(Aggregation::Percentile(p))
            }
        }
    }

    fn applies_to(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Aggregation::Count | Aggregation::Rate),
            MetricKind::Rate => matches!(self, Aggregation::Rate),
            MetricKind::Trend => !matches!(self, Aggregation::Count | Aggregation::Rate),
        }
    }
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    /// Parse the operator at the start of `s`, returning it along with the rest of the input.
    fn split(s: &str) -> Option<(Self, &str)> {
        const OPERATORS: [(&str, Comparison); 6] = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ];

        OPERATORS
            .iter()
            .find_map(|(op, cmp)| s.strip_prefix(op).map(|rest| (*cmp, rest)))
    }

    fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => observed == bound,
            Comparison::Ne => observed != bound,
        }
    }
}

/// A pass/fail condition on an aggregated metric, such as `http_req_duration: med<50`.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    metric: Metric,
    predicate: String,
    aggregation: Aggregation,
    comparison: Comparison,
    bound: f64,
}

impl Threshold {
    pub fn parse(metric: &str, predicate: &str) -> Result<Self, ThresholdError> {
        let metric = metric
            .trim()
            .parse::<Metric>()
            .map_err(ThresholdError::UnknownMetric)?;

        let invalid = |reason: &str| ThresholdError::InvalidPredicate {
            predicate: predicate.to_string(),
            reason: reason.to_string(),
        };

        let operator_at = predicate
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| invalid("missing comparison operator"))?;
        let (aggregation, rest) = predicate.split_at(operator_at);

        let aggregation = aggregation.trim();
        let aggregation = Aggregation::parse(aggregation)
            .ok_or_else(|| invalid(&format!("unknown aggregation `{aggregation}`")))?;

        let (comparison, bound) =
            Comparison::split(rest).ok_or_else(|| invalid("unknown comparison operator"))?;
        let bound = bound
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid("the value to compare against is not a number"))?;

        if !aggregation.applies_to(metric.kind()) {
            return Err(ThresholdError::UnsupportedAggregation {
                metric: metric.to_string(),
                kind: match metric.kind() {
                    MetricKind::Counter => "counter",
                    MetricKind::Rate => "rate",
                    MetricKind::Trend => "trend",
                },
                aggregation: aggregation.to_string(),
            });
        }

        Ok(Self {
            metric,
            predicate: predicate.trim().to_string(),
            aggregation,
            comparison,
            bound,
        })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn evaluate(&self, metrics: &RunMetrics) -> ThresholdResult {
        // Parsing guarantees the aggregation applies to the metric
        let observed = metrics
            .value(self.metric, &self.aggregation)
            .unwrap_or_default();
        let passed = self.comparison.holds(observed, self.bound);

        log::debug!(
            "Threshold {}: {} observed {}, passed: {}",
            self.metric,
            self.predicate,
            observed,
            passed
        );

        ThresholdResult {
            metric: self.metric.to_string(),
            predicate: self.predicate.clone(),
            observed,
            passed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reporter, RequestOutcome};
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[test]
    fn parse_reference_thresholds() {
        let failed = Threshold::parse("http_req_failed", "rate<0.0001").unwrap();
        assert_eq!(Metric::HttpReqFailed, failed.metric());
        assert_eq!(Aggregation::Rate, failed.aggregation);
        assert_eq!(Comparison::Lt, failed.comparison);
        assert_eq!(0.0001, failed.bound);

        let duration = Threshold::parse("http_req_duration", "med<50").unwrap();
        assert_eq!(Aggregation::Med, duration.aggregation);
        assert_eq!(50.0, duration.bound);
    }

    #[test]
    fn parse_allows_whitespace_and_percentiles() {
        let threshold = Threshold::parse("http_req_duration", " p(99.9) <= 250 ").unwrap();
        assert_eq!(Aggregation::Percentile(99.9), threshold.aggregation);
        assert_eq!(Comparison::Le, threshold.comparison);
        assert_eq!("p(99.9) <= 250", threshold.predicate());
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            Err(ThresholdError::UnknownMetric("http_req_waiting".to_string())),
            Threshold::parse("http_req_waiting", "avg<10")
        );
        assert!(matches!(
            Threshold::parse("http_req_duration", "avg 10"),
            Err(ThresholdError::InvalidPredicate { .. })
        ));
        assert!(matches!(
            Threshold::parse("http_req_duration", "p(101)<10"),
            Err(ThresholdError::InvalidPredicate { .. })
        ));
        assert!(matches!(
            Threshold::parse("http_req_duration", "avg<ten"),
            Err(ThresholdError::InvalidPredicate { .. })
        ));
        assert!(matches!(
            Threshold::parse("http_req_failed", "med<10"),
            Err(ThresholdError::UnsupportedAggregation { .. })
        ));
        assert!(matches!(
            Threshold::parse("dropped_iterations", "p(95)<1"),
            Err(ThresholdError::UnsupportedAggregation { .. })
        ));
    }

    fn run_with_failures(total: usize, failures: usize) -> crate::RunMetrics {
        let reporter = Reporter::new();
        for i in 0..total {
            let check = BTreeSet::from(["send status is 200".to_string()]);
            let (passed, failed, status) = if i < failures {
                (BTreeSet::new(), check, 500)
            } else {
                (check, BTreeSet::new(), 200)
            };
            reporter.add_outcome(RequestOutcome::new(
                "sendCoin".to_string(),
                1,
                status,
                Duration::from_millis(20),
                passed,
                failed,
            ));
        }
        reporter.finalize(Duration::from_secs(1))
    }

    #[test]
    fn clean_run_passes_reference_thresholds() {
        let metrics = run_with_failures(400, 0);

        let failed = Threshold::parse("http_req_failed", "rate<0.0001")
            .unwrap()
            .evaluate(&metrics);
        let duration = Threshold::parse("http_req_duration", "med<50")
            .unwrap()
            .evaluate(&metrics);

        assert!(failed.passed);
        assert_eq!(0.0, failed.observed);
        assert!(duration.passed);
        assert_eq!(20.0, duration.observed);
    }

    #[test]
    fn one_percent_of_one_step_failing_crosses_error_threshold() {
        // 1% of sendCoin calls failing is a quarter of a percent of all requests
        let metrics = run_with_failures(400, 1);

        let result = Threshold::parse("http_req_failed", "rate<0.0001")
            .unwrap()
            .evaluate(&metrics);

        assert!(!result.passed);
        assert_eq!(0.0025, result.observed);
    }
}
