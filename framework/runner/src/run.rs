use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use shop_tunnel_core::prelude::ShutdownHandle;
use shop_tunnel_instruments::{print_summary, Reporter};
use shop_tunnel_summary_model::{append_run_summary, export_run_summary, RunSummary};

use crate::monitor::start_monitor;
use crate::pool::{VuHooks, VuPool};
use crate::progress::start_progress;
use crate::schedule::{drive, ArrivalSchedule};
use crate::{
    context::{RunnerContext, UserValuesConstraint},
    definition::ScenarioDefinitionBuilder,
    executor::Executor,
    shutdown::start_shutdown_listener,
};

/// Environment variables with this prefix are recorded in the run summary.
const ENV_PREFIX: &str = "SHOP_TUNNEL_";

/// Run a scenario and return its summary.
///
/// An error is only returned if the scenario could not be run, for example because the
/// configuration is invalid or the global setup hook failed. Thresholds that do not hold are
/// reported through [RunSummary::passed].
pub fn run<RV: UserValuesConstraint, V: UserValuesConstraint>(
    definition: ScenarioDefinitionBuilder<RV, V>,
) -> anyhow::Result<RunSummary> {
    let definition = definition.build()?;
    let config = definition.config;

    log::info!("Running scenario: {}", definition.name);
    log::info!(
        "Starting {} iterations every {:?} for {:?}, with {} pre-allocated and up to {} virtual users",
        config.arrival_rate,
        config.time_unit,
        config.sustain_duration,
        config.preallocated_workers,
        config.max_workers
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    // Raised to stop scheduling, by Ctrl-C, the end of the run or a hook
    let stop_handle = start_shutdown_listener(&runtime);
    // Raised to cut short in-flight iterations once the graceful stop period is over
    let abort_handle = ShutdownHandle::default();

    let executor = Arc::new(Executor::new(runtime, abort_handle.clone()));
    let reporter = Arc::new(Reporter::default());
    let run_id = definition
        .run_id
        .clone()
        .unwrap_or_else(|| nanoid::nanoid!());

    let mut runner_context = RunnerContext::new(
        executor.clone(),
        reporter.clone(),
        stop_handle.clone(),
        definition.connection_string.clone(),
        run_id.clone(),
        definition.runner_values,
    );

    let mut summary = RunSummary::new(
        run_id,
        definition.name.clone(),
        definition.connection_string.clone(),
        chrono::Utc::now().timestamp(),
        config.summary(),
        definition.threshold_config.clone(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    for (key, value) in std::env::vars().filter(|(key, _)| key.starts_with(ENV_PREFIX)) {
        summary.add_env(key, value);
    }

    if let Some(setup_fn) = definition.setup_fn {
        setup_fn(&mut runner_context)?;
    }

    let runner_context = Arc::new(runner_context);

    let pool = VuPool::new(
        runner_context.clone(),
        VuHooks {
            setup: definition.setup_vu_fn,
            iteration: definition.iteration_fn,
            teardown: definition.teardown_vu_fn,
        },
        config.max_workers,
        abort_handle,
    );

    let ready = pool.preallocate(config.preallocated_workers);
    if ready < config.preallocated_workers {
        log::warn!(
            "Only {} of {} pre-allocated virtual users are ready, the rest failed their setup",
            ready,
            config.preallocated_workers
        );
    }

    let schedule = ArrivalSchedule::new(&config);
    if !definition.no_progress {
        start_progress(
            schedule.sustain_duration(),
            reporter.clone(),
            stop_handle.new_listener(),
        )
        .context("Failed to start the progress bar")?;
    }

    // Report high resource usage or a starved pool, either of which would make the results
    // misleading.
    start_monitor(reporter.clone(), stop_handle.new_listener())
        .context("Failed to start the resource monitor")?;

    let started = Instant::now();
    let dispatched = executor.block_on(drive(schedule, &pool, stop_handle.new_listener()));
    stop_handle.shutdown();

    log::info!(
        "Dispatched {} of {} scheduled iterations, waiting up to {:?} for {} in-flight iterations to finish",
        dispatched,
        schedule.total(),
        config.graceful_stop,
        reporter.in_flight()
    );
    pool.close(config.graceful_stop);
    let elapsed = started.elapsed();

    if let Some(teardown_fn) = definition.teardown_fn {
        // Don't fail the run if the teardown fails. Reporting should still happen.
        if let Err(e) = teardown_fn(runner_context.clone()) {
            log::error!("Teardown failed: {:?}", e);
        }
    }

    let metrics = reporter.finalize(elapsed);
    let threshold_results = definition
        .thresholds
        .iter()
        .map(|threshold| threshold.evaluate(&metrics))
        .collect::<Vec<_>>();
    let metrics_summary = metrics.summary();

    print_summary(&metrics_summary, &threshold_results);

    summary.set_elapsed_ms(elapsed.as_millis() as u64);
    summary.set_metrics(metrics_summary);
    summary.set_threshold_results(threshold_results);

    if let Some(path) = &definition.summary_export {
        export_run_summary(&summary, path)
            .with_context(|| format!("Failed to export the summary to {}", path.display()))?;
        log::info!("Summary exported to {}", path.display());
    }

    if let Some(path) = &definition.run_summary_path {
        append_run_summary(&summary, path).with_context(|| {
            format!("Failed to append the run summary to {}", path.display())
        })?;
    }

    if summary.passed {
        log::info!("PASS: all thresholds held for run {}", summary.run_id);
    } else {
        for failed in summary.failed_thresholds() {
            log::error!(
                "Threshold {}: {} failed, observed {}",
                failed.metric,
                failed.predicate,
                failed.observed
            );
        }
        log::error!("FAIL: thresholds did not hold for run {}", summary.run_id);
    }

    Ok(summary)
}
