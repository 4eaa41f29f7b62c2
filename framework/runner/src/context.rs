use std::{fmt::Debug, sync::Arc};

use shop_tunnel_core::prelude::{ShutdownHandle, ShutdownListener};
use shop_tunnel_instruments::Reporter;

use crate::executor::Executor;

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

/// State shared by the whole run. Every virtual user has read access to it.
#[derive(Debug)]
pub struct RunnerContext<RV: UserValuesConstraint> {
    executor: Arc<Executor>,
    reporter: Arc<Reporter>,
    stop_handle: ShutdownHandle,
    connection_string: String,
    run_id: String,
    value: RV,
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(
        executor: Arc<Executor>,
        reporter: Arc<Reporter>,
        stop_handle: ShutdownHandle,
        connection_string: String,
        run_id: String,
        value: RV,
    ) -> Self {
        Self {
            executor,
            reporter,
            stop_handle,
            connection_string,
            run_id,
            value,
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// The base URL of the service under test
    pub fn get_connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stop scheduling new iterations, as if the run duration had elapsed.
    ///
    /// Iterations that are already running are allowed to finish.
    pub fn force_stop_scenario(&self) {
        log::info!("Scenario stop requested");
        self.stop_handle.shutdown();
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    pub fn get(&self) -> &RV {
        &self.value
    }
}

/// The context of one virtual user. It lives for as long as the virtual user does, across all of
/// the iterations that it runs.
pub struct VuContext<RV: UserValuesConstraint, V: UserValuesConstraint> {
    vu_id: usize,
    iteration: u64,
    runner_context: Arc<RunnerContext<RV>>,
    abort_listener: ShutdownListener,
    value: V,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> VuContext<RV, V> {
    pub(crate) fn new(
        vu_id: usize,
        runner_context: Arc<RunnerContext<RV>>,
        abort_listener: ShutdownListener,
    ) -> Self {
        Self {
            vu_id,
            iteration: 0,
            runner_context,
            abort_listener,
            value: Default::default(),
        }
    }

    /// The id of this virtual user. Ids start at 1 and are unique within a run.
    pub fn vu_id(&self) -> usize {
        self.vu_id
    }

    /// How many iterations this virtual user has started before the current one.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub(crate) fn next_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    /// Raised when in-flight work must be cut short because the graceful stop period has
    /// expired.
    pub fn abort_listener(&mut self) -> &mut ShutdownListener {
        &mut self.abort_listener
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn get(&self) -> &V {
        &self.value
    }
}
