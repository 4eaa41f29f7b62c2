use shop_tunnel_core::prelude::ShutdownHandle;
use tokio::signal;

/// Stop scheduling new iterations when the user presses Ctrl-C.
pub(crate) fn start_shutdown_listener(runtime: &tokio::runtime::Runtime) -> ShutdownHandle {
    let handle = ShutdownHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            log::warn!("Unable to listen for Ctrl-C, the run can only stop on its own: {e:?}");
            return;
        }
        println!("Received shutdown signal, draining in-flight iterations...");
        listener_handle.shutdown();
    });

    handle
}
