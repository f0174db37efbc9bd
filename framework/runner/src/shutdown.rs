use gale_core::prelude::ShutdownHandle;
use std::time::Duration;
use tokio::signal;

pub(crate) fn start_shutdown_listener(runtime: &tokio::runtime::Runtime) -> ShutdownHandle {
    let handle = ShutdownHandle::new();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            log::warn!("Failed to listen for Ctrl-C, the run can only be stopped by its timeouts: {e}");
            return;
        }
        println!("Received shutdown signal, shutting down...");
        listener_handle.shutdown();
    });

    handle
}

/// Trigger a shutdown once `timeout` has elapsed, unless the run finishes first.
pub(crate) fn start_hard_timeout(
    runtime: &tokio::runtime::Handle,
    shutdown_handle: ShutdownHandle,
    timeout: Duration,
) {
    let mut listener = shutdown_handle.new_listener();
    runtime.spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                log::warn!("Hard timeout of {:?} reached, interrupting the run", timeout);
                shutdown_handle.shutdown();
            }
            _ = listener.wait_for_shutdown() => {}
        }
    });
}
