use std::time::Duration;

use shop_tunnel_core::prelude::ShutdownListener;

use crate::config::ScenarioConfig;
use crate::context::UserValuesConstraint;
use crate::pool::{Dispatch, VuPool};

/// Start times for a constant-arrival-rate run.
///
/// Start `k` is due at `k * time_unit / arrival_rate` after the run starts, for every `k` that
/// falls inside the sustain duration. Each offset is computed from the start of the run rather
/// than from the previous start, so rounding doesn't accumulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArrivalSchedule {
    arrival_rate: u32,
    time_unit: Duration,
    sustain_duration: Duration,
}

impl ArrivalSchedule {
    pub(crate) fn new(config: &ScenarioConfig) -> Self {
        Self {
            arrival_rate: config.arrival_rate,
            time_unit: config.time_unit,
            sustain_duration: config.sustain_duration,
        }
    }

    /// The number of starts in the schedule.
    pub(crate) fn total(&self) -> u64 {
        (self.arrival_rate as u128 * self.sustain_duration.as_nanos() / self.time_unit.as_nanos())
            as u64
    }

    pub(crate) fn offset(&self, index: u64) -> Duration {
        let nanos = index as u128 * self.time_unit.as_nanos() / self.arrival_rate as u128;
        Duration::from_nanos(nanos as u64)
    }

    pub(crate) fn sustain_duration(&self) -> Duration {
        self.sustain_duration
    }
}

/// Hand each scheduled start to the pool when it falls due.
///
/// Returns the number of starts that were handed to the pool, which is less than
/// [ArrivalSchedule::total] if `stop` was raised early. Once every start is dispatched this keeps
/// waiting until the sustain duration is over so that the run lasts as long as it was configured
/// to.
pub(crate) async fn drive<RV: UserValuesConstraint, V: UserValuesConstraint>(
    schedule: ArrivalSchedule,
    pool: &VuPool<RV, V>,
    mut stop: ShutdownListener,
) -> u64 {
    let started = tokio::time::Instant::now();
    let total = schedule.total();

    log::debug!(
        "Scheduling {} iterations over {:?}",
        total,
        schedule.sustain_duration()
    );

    for index in 0..total {
        let due = started + schedule.offset(index);

        tokio::select! {
            biased;

            _ = stop.wait_for_shutdown() => {
                log::info!("Scheduler stopped early after {index} of {total} iterations");
                return index;
            }
            _ = tokio::time::sleep_until(due) => {}
        }

        pool.dispatch(Dispatch {
            index,
            scheduled_at: due.into_std(),
        });
    }

    tokio::select! {
        biased;

        _ = stop.wait_for_shutdown() => {}
        _ = tokio::time::sleep_until(started + schedule.sustain_duration()) => {}
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(arrival_rate: u32, time_unit: Duration, sustain_duration: Duration) -> ArrivalSchedule {
        ArrivalSchedule::new(&ScenarioConfig {
            arrival_rate,
            time_unit,
            sustain_duration,
            ..Default::default()
        })
    }

    #[test]
    fn total_is_rate_times_duration() {
        let s = schedule(250, Duration::from_secs(1), Duration::from_secs(100));
        assert_eq!(25_000, s.total());

        let s = schedule(30, Duration::from_secs(60), Duration::from_secs(90));
        assert_eq!(45, s.total());
    }

    #[test]
    fn partial_time_units_round_down() {
        let s = schedule(3, Duration::from_secs(1), Duration::from_millis(1500));
        assert_eq!(4, s.total());
    }

    #[test]
    fn starts_are_evenly_spaced() {
        let s = schedule(250, Duration::from_secs(1), Duration::from_secs(100));
        assert_eq!(Duration::ZERO, s.offset(0));
        assert_eq!(Duration::from_millis(4), s.offset(1));
        assert_eq!(Duration::from_secs(1), s.offset(250));
        assert_eq!(Duration::from_millis(99_996), s.offset(s.total() - 1));
    }

    #[test]
    fn offsets_do_not_drift() {
        // 1/3s does not divide evenly into nanoseconds
        let s = schedule(3, Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(Duration::from_secs(20), s.offset(60));
        assert_eq!(Duration::from_nanos(333_333_333), s.offset(1));
    }
}
