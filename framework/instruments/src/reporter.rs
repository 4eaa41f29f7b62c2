use crate::aggregate::RunMetrics;
use crate::RequestOutcome;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// How an iteration came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationEnd {
    /// The iteration ran every step.
    Completed,
    /// The iteration chose to skip its remaining steps.
    Aborted,
    /// The iteration was cut off by the runner shutting down.
    Interrupted,
    /// The iteration returned an unexpected error.
    Failed,
}

/// Point in time view of the run, for progress display and monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveCounters {
    pub requests: u64,
    pub iterations: u64,
    pub dropped_iterations: u64,
    pub in_flight: usize,
    pub vus: usize,
}

/// Collects everything that happens during a run.
///
/// There is one reporter per run, shared by every virtual user. Request outcomes go into an append
/// only log which is serialised by a mutex, so concurrent appends are never lost or interleaved.
/// Everything else is a plain atomic counter.
#[derive(Debug, Default)]
pub struct Reporter {
    outcomes: Mutex<Vec<RequestOutcome>>,
    iteration_durations: Mutex<Vec<Duration>>,
    requests: AtomicU64,
    completed_iterations: AtomicU64,
    aborted_iterations: AtomicU64,
    interrupted_iterations: AtomicU64,
    failed_iterations: AtomicU64,
    dropped_iterations: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    vus: AtomicUsize,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_outcome(&self, outcome: RequestOutcome) {
        self.outcomes.lock().push(outcome);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_dropped_iteration(&self) {
        self.dropped_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn vu_initialised(&self) {
        self.vus.fetch_add(1, Ordering::Relaxed);
    }

    pub fn iteration_started(&self) {
        let in_flight = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(in_flight, Ordering::AcqRel);
    }

    pub fn iteration_finished(&self, end: IterationEnd, duration: Duration) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        let counter = match end {
            IterationEnd::Completed => &self.completed_iterations,
            IterationEnd::Aborted => &self.aborted_iterations,
            IterationEnd::Interrupted => &self.interrupted_iterations,
            IterationEnd::Failed => &self.failed_iterations,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        // An interrupted iteration didn't get to run for as long as it wanted to
        if end != IterationEnd::Interrupted {
            self.iteration_durations.lock().push(duration);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    pub fn dropped_iterations(&self) -> u64 {
        self.dropped_iterations.load(Ordering::Relaxed)
    }

    pub fn live_counters(&self) -> LiveCounters {
        LiveCounters {
            requests: self.requests.load(Ordering::Relaxed),
            iterations: self.completed_iterations.load(Ordering::Relaxed)
                + self.aborted_iterations.load(Ordering::Relaxed)
                + self.failed_iterations.load(Ordering::Relaxed),
            dropped_iterations: self.dropped_iterations(),
            in_flight: self.in_flight(),
            vus: self.vus.load(Ordering::Relaxed),
        }
    }

    /// Drain the outcome log and aggregate everything that was recorded.
    ///
    /// Should be called once, after every virtual user has stopped.
    pub fn finalize(&self, elapsed: Duration) -> RunMetrics {
        let outcomes = std::mem::take(&mut *self.outcomes.lock());
        let iteration_durations = std::mem::take(&mut *self.iteration_durations.lock());

        log::debug!(
            "Aggregating {} request outcomes and {} iterations",
            outcomes.len(),
            iteration_durations.len()
        );

        RunMetrics::aggregate(
            elapsed,
            outcomes,
            iteration_durations,
            crate::aggregate::IterationCounts {
                completed: self.completed_iterations.load(Ordering::Relaxed),
                aborted: self.aborted_iterations.load(Ordering::Relaxed),
                interrupted: self.interrupted_iterations.load(Ordering::Relaxed),
                failed: self.failed_iterations.load(Ordering::Relaxed),
                dropped: self.dropped_iterations(),
            },
            self.vus.load(Ordering::Relaxed),
            self.peak_in_flight(),
        )
    }
}
