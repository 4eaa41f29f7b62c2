use std::future::Future;

use shop_tunnel_core::prelude::{ShutdownHandle, ShutdownSignalError};

#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
    abort_handle: ShutdownHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, abort_handle: ShutdownHandle) -> Self {
        Self {
            runtime,
            abort_handle,
        }
    }

    /// Run async code in place, blocking until it completes.
    ///
    /// Only the calling virtual user is blocked. Other virtual users keep running their own
    /// requests on the shared runtime.
    ///
    /// The future is cancelled if the runner has to interrupt in-flight iterations once the
    /// graceful stop period is over, in which case a [ShutdownSignalError] is returned. Submitting a
    /// future which does not support cancelling may prevent the runner from shutting down.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let mut abort_listener = self.abort_handle.new_listener();
        self.runtime.block_on(async move {
            tokio::select! {
                biased;

                _ = abort_listener.wait_for_shutdown() => {
                    Err(anyhow::anyhow!(ShutdownSignalError::default()))
                },
                result = fut => result,
            }
        })
    }

    /// Drive a runner-internal future to completion, without cancellation.
    pub(crate) fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}
