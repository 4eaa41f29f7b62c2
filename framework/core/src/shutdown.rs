use tokio::sync::watch::{Receiver, Sender};

/// Raises a one-way shutdown signal that any number of listeners can observe.
///
/// The signal is level triggered. A listener created after [ShutdownHandle::shutdown] has been
/// called still sees the signal, so late starting virtual users can't miss it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<bool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::watch::channel(false).0,
        }
    }

    pub fn shutdown(&self) {
        let was_shutdown = self.sender.send_replace(true);
        if !was_shutdown {
            log::trace!("Shutdown signal raised");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn new_listener(&self) -> ShutdownListener {
        ShutdownListener::new(self.sender.subscribe())
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownListener {
    receiver: Receiver<bool>,
}

impl ShutdownListener {
    pub(crate) fn new(receiver: Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// Point in time check if the shutdown signal has been raised. If this returns true then work
    /// should be stopped so that the scenario can shut down.
    pub fn should_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the shutdown signal to be raised. It is safe to race this with another future so
    /// that the shutdown signal can be used to cancel other work in progress.
    ///
    /// If every [ShutdownHandle] has been dropped then nothing can raise the signal any more and
    /// this returns immediately.
    pub async fn wait_for_shutdown(&mut self) {
        if self.receiver.wait_for(|shutdown| *shutdown).await.is_err() {
            log::trace!("Shutdown handle dropped while waiting for shutdown");
        }
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ShutdownSignalError {
    msg: String,
}

impl Default for ShutdownSignalError {
    fn default() -> Self {
        Self {
            msg: "Execution cancelled by shutdown signal".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn late_listener_sees_shutdown() {
        let handle = ShutdownHandle::new();
        let early = handle.new_listener();
        assert!(!early.should_shutdown());

        handle.shutdown();
        let late = handle.new_listener();

        assert!(early.should_shutdown());
        assert!(late.should_shutdown());
        assert!(handle.is_shutdown());
    }

    #[test]
    fn repeated_shutdown_is_harmless() {
        let handle = ShutdownHandle::new();
        handle.shutdown();
        handle.shutdown();
        assert!(handle.new_listener().should_shutdown());
    }

    #[tokio::test]
    async fn wait_for_shutdown_resolves_after_signal() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();

        let trigger = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.shutdown();
        });

        tokio::time::timeout(Duration::from_secs(5), listener.wait_for_shutdown())
            .await
            .expect("Shutdown was not observed");
    }

    #[tokio::test]
    async fn wait_for_shutdown_returns_when_handle_dropped() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        drop(handle);

        tokio::time::timeout(Duration::from_secs(5), listener.wait_for_shutdown())
            .await
            .expect("Listener should not wait on a dropped handle");
    }
}
