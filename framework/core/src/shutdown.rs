use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{Receiver, Sender};

/// Broadcasts a single shutdown signal to every listener created from it.
///
/// The signal is latched, so a listener created after [ShutdownHandle::shutdown] has been called
/// still observes the shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown(&self) {
        self.triggered.store(true, Ordering::SeqCst);

        if let Err(e) = self.sender.send(()) {
            // Will fail if nobody is listening for a shutdown signal, in which case the log message
            // can be ignored.
            log::debug!("Failed to send shutdown signal: {e:?}");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe(), self.triggered.clone())
    }
}

#[derive(Debug)]
pub struct DelegatedShutdownListener {
    receiver: Receiver<()>,
    triggered: Arc<AtomicBool>,
}

impl Clone for DelegatedShutdownListener {
    fn clone(&self) -> Self {
        Self::new(self.receiver.resubscribe(), self.triggered.clone())
    }
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: Receiver<()>, triggered: Arc<AtomicBool>) -> Self {
        Self {
            receiver,
            triggered,
        }
    }

    /// Point in time check if the shutdown signal has been received. If this returns true then work
    /// should be stopped so that the run can shut down.
    pub fn should_shutdown(&mut self) -> bool {
        if self.triggered.load(Ordering::SeqCst) {
            return true;
        }

        match self.receiver.try_recv() {
            Ok(_) => true,
            Err(TryRecvError::Closed) => true,
            // If the receiver is empty or lagged then we should not shutdown.
            Err(_) => false,
        }
    }

    /// Wait for the shutdown signal to be received.
    ///
    /// It is safe to race this with another future so that the shutdown signal can be used to
    /// cancel other work in progress.
    pub async fn wait_for_shutdown(&mut self) {
        if self.triggered.load(Ordering::SeqCst) {
            return;
        }

        loop {
            match self.receiver.recv().await {
                Ok(_) | Err(RecvError::Closed) => return,
                Err(RecvError::Lagged(_)) => {
                    if self.triggered.load(Ordering::SeqCst) {
                        return;
                    }
                }
            }
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
    fn listener_sees_shutdown() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        assert!(!listener.should_shutdown());

        handle.shutdown();
        assert!(listener.should_shutdown());
    }

    #[test]
    fn late_listener_sees_latched_shutdown() {
        let handle = ShutdownHandle::new();
        handle.shutdown();

        let mut listener = handle.new_listener();
        assert!(listener.should_shutdown());
        assert!(handle.is_shutdown());
    }

    #[tokio::test]
    async fn wait_for_shutdown_wakes_all_clones() {
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();

        let waiters = (0..3)
            .map(|_| {
                let mut listener = listener.clone();
                tokio::spawn(async move { listener.wait_for_shutdown().await })
            })
            .collect::<Vec<_>>();

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should finish after shutdown")
                .unwrap();
        }
    }
}
