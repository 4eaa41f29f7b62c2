use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use parking_lot::Mutex;
use shop_tunnel_core::prelude::{IterationAbortError, ShutdownHandle, ShutdownListener, ShutdownSignalError};
use shop_tunnel_instruments::{IterationEnd, Reporter};

use crate::context::{RunnerContext, UserValuesConstraint, VuContext};
use crate::definition::VuHookMut;

/// One scheduled start, handed to a virtual user to run.
#[derive(Debug)]
pub(crate) struct Dispatch {
    pub(crate) index: u64,
    pub(crate) scheduled_at: Instant,
}

pub(crate) struct VuHooks<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) setup: Option<VuHookMut<RV, V>>,
    pub(crate) iteration: VuHookMut<RV, V>,
    pub(crate) teardown: Option<VuHookMut<RV, V>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> Clone for VuHooks<RV, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> Copy for VuHooks<RV, V> {}

struct Slots {
    /// Indexed by `vu_id - 1`
    senders: Vec<Sender<Dispatch>>,
    closed: bool,
}

/// The pool of virtual users.
///
/// Every virtual user is a thread that runs one iteration at a time. Idle virtual users park
/// their id on the idle stack and wait on their own channel, so handing out work never blocks.
///
/// Only the scheduler calls [VuPool::dispatch], so checking the pool size and then growing it
/// can't race with another dispatch.
pub(crate) struct VuPool<RV: UserValuesConstraint, V: UserValuesConstraint> {
    runner_context: Arc<RunnerContext<RV>>,
    hooks: VuHooks<RV, V>,
    max_vus: usize,
    abort_handle: ShutdownHandle,
    idle: Arc<Mutex<Vec<usize>>>,
    slots: Mutex<Slots>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> VuPool<RV, V> {
    pub(crate) fn new(
        runner_context: Arc<RunnerContext<RV>>,
        hooks: VuHooks<RV, V>,
        max_vus: usize,
        abort_handle: ShutdownHandle,
    ) -> Self {
        Self {
            runner_context,
            hooks,
            max_vus,
            abort_handle,
            idle: Arc::new(Mutex::new(Vec::new())),
            slots: Mutex::new(Slots {
                senders: Vec::new(),
                closed: false,
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    fn reporter(&self) -> &Arc<Reporter> {
        self.runner_context.reporter()
    }

    /// Initialise `count` virtual users and wait for their setup hooks to finish.
    ///
    /// Returns the number of virtual users that are ready to run iterations.
    pub(crate) fn preallocate(&self, count: usize) -> usize {
        let (ready_tx, ready_rx) = mpsc::channel();

        let mut spawned = 0;
        for _ in 0..count {
            match self.spawn_vu(None, Some(ready_tx.clone())) {
                Ok(()) => spawned += 1,
                Err(e) => {
                    log::error!("Failed to pre-allocate virtual users: {:?}", e);
                    break;
                }
            }
        }
        drop(ready_tx);

        let ready = ready_rx.iter().take(spawned).filter(|ok| *ok).count();
        log::info!("Pre-allocated {ready} of {count} virtual users");

        ready
    }

    /// Hand a scheduled start to an idle virtual user, growing the pool if every virtual user is
    /// busy. The start is dropped if the pool is already at its maximum size.
    pub(crate) fn dispatch(&self, mut dispatch: Dispatch) {
        loop {
            let Some(vu_id) = self.idle.lock().pop() else {
                break;
            };

            let slots = self.slots.lock();
            if slots.closed {
                return;
            }
            match slots.senders[vu_id - 1].send(dispatch) {
                Ok(()) => return,
                Err(mpsc::SendError(returned)) => {
                    log::warn!("vu-{vu_id} has stopped, trying another virtual user");
                    dispatch = returned;
                }
            }
        }

        let can_grow = {
            let slots = self.slots.lock();
            !slots.closed && slots.senders.len() < self.max_vus
        };

        if can_grow {
            let index = dispatch.index;
            if let Err(e) = self.spawn_vu(Some(dispatch), None) {
                log::error!("Failed to add a virtual user for iteration {index}: {:?}", e);
                self.reporter().add_dropped_iteration();
            }
        } else {
            log::trace!(
                "Dropping iteration {}, all {} virtual users are busy",
                dispatch.index,
                self.max_vus
            );
            self.reporter().add_dropped_iteration();
        }
    }

    fn spawn_vu(&self, initial: Option<Dispatch>, ready: Option<Sender<bool>>) -> anyhow::Result<()> {
        let mut slots = self.slots.lock();
        if slots.closed {
            anyhow::bail!("The virtual user pool is closed");
        }

        let vu_id = slots.senders.len() + 1;
        let (tx, rx) = mpsc::channel();
        let worker = VuWorker {
            vu_id,
            runner_context: self.runner_context.clone(),
            hooks: self.hooks,
            idle: self.idle.clone(),
            abort_listener: self.abort_handle.new_listener(),
        };

        let handle = std::thread::Builder::new()
            .name(format!("vu-{vu_id}"))
            .spawn(move || worker.run(rx, initial, ready))
            .with_context(|| format!("Failed to spawn thread for vu-{vu_id}"))?;

        slots.senders.push(tx);
        drop(slots);

        log::debug!("Started vu-{vu_id}");
        self.threads.lock().push(handle);

        Ok(())
    }

    /// Stop handing out work and wait for the virtual users to finish.
    ///
    /// Virtual users finish the iterations they already have and then run their teardown hook.
    /// If they are still running after `graceful_stop`, the abort signal is raised which cancels
    /// any work they are waiting on through [crate::executor::Executor::execute_in_place].
    pub(crate) fn close(&self, graceful_stop: Duration) {
        {
            let mut slots = self.slots.lock();
            slots.closed = true;
            // Dropping the senders lets each virtual user drain its channel and then exit
            slots.senders.clear();
        }

        let threads = std::mem::take(&mut *self.threads.lock());
        log::debug!("Draining {} virtual users", threads.len());

        let deadline = Instant::now() + graceful_stop;
        while threads.iter().any(|t| !t.is_finished()) {
            if Instant::now() >= deadline {
                log::warn!(
                    "Graceful stop of {:?} expired with {} iterations still running, interrupting them",
                    graceful_stop,
                    self.reporter().in_flight()
                );
                self.abort_handle.shutdown();
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        for handle in threads {
            if let Err(e) = handle.join() {
                log::error!("Error joining thread for virtual user: {:?}", e);
            }
        }
    }
}

struct VuWorker<RV: UserValuesConstraint, V: UserValuesConstraint> {
    vu_id: usize,
    runner_context: Arc<RunnerContext<RV>>,
    hooks: VuHooks<RV, V>,
    idle: Arc<Mutex<Vec<usize>>>,
    abort_listener: ShutdownListener,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> VuWorker<RV, V> {
    fn run(self, rx: Receiver<Dispatch>, initial: Option<Dispatch>, ready: Option<Sender<bool>>) {
        let VuWorker {
            vu_id,
            runner_context,
            hooks,
            idle,
            abort_listener,
        } = self;

        let reporter = runner_context.reporter().clone();
        let mut context = VuContext::<RV, V>::new(vu_id, runner_context, abort_listener);
        reporter.vu_initialised();

        if let Some(setup_vu_fn) = hooks.setup {
            if let Err(e) = setup_vu_fn(&mut context) {
                log::error!("Setup failed for vu-{}: {:?}", vu_id, e);
                if let Some(ready) = ready {
                    let _ = ready.send(false);
                }
                if initial.is_some() {
                    reporter.add_dropped_iteration();
                }
                return;
            }
        }

        if let Some(ready) = ready {
            let _ = ready.send(true);
        }

        if let Some(dispatch) = initial {
            run_iteration(&mut context, hooks.iteration, &reporter, dispatch);
        }
        idle.lock().push(vu_id);

        while let Ok(dispatch) = rx.recv() {
            run_iteration(&mut context, hooks.iteration, &reporter, dispatch);
            idle.lock().push(vu_id);
        }

        log::debug!(
            "Stopping vu-{} after {} iterations",
            vu_id,
            context.iteration()
        );

        if let Some(teardown_vu_fn) = hooks.teardown {
            if let Err(e) = teardown_vu_fn(&mut context) {
                log::error!("Teardown failed for vu-{}: {:?}", vu_id, e);
            }
        }
    }
}

fn run_iteration<RV: UserValuesConstraint, V: UserValuesConstraint>(
    context: &mut VuContext<RV, V>,
    iteration_fn: VuHookMut<RV, V>,
    reporter: &Reporter,
    dispatch: Dispatch,
) {
    log::trace!(
        "vu-{} starting iteration {}, {:?} after it was due",
        context.vu_id(),
        dispatch.index,
        dispatch.scheduled_at.elapsed()
    );

    reporter.iteration_started();
    let started = Instant::now();

    let end = match iteration_fn(context) {
        Ok(()) => IterationEnd::Completed,
        Err(e) if e.chain().any(|c| c.is::<ShutdownSignalError>()) => IterationEnd::Interrupted,
        Err(e) if e.chain().any(|c| c.is::<IterationAbortError>()) => {
            log::debug!("vu-{} aborted its iteration: {}", context.vu_id(), e);
            IterationEnd::Aborted
        }
        Err(e) => {
            log::error!("Iteration failed for vu-{}: {:?}", context.vu_id(), e);
            IterationEnd::Failed
        }
    };

    reporter.iteration_finished(end, started.elapsed());
    context.next_iteration();
}
