use std::time::SystemTime;

use gale_core::prelude::{DelegatedShutdownListener, ShutdownSignalError, VuBailError};
use gale_instruments::{IterationOutcome, IterationRecord, SampleTags};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::context::{UserValuesConstraint, VuContext};
use crate::definition::EntryFn;

/// Why a virtual user stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VuExit {
    /// The population target dropped below the VU's slot, or it ran all of its iterations
    Retired,
    /// The entry function returned a [VuBailError]
    Bailed,
    /// An in-flight iteration was cancelled
    Interrupted,
}

/// Everything a virtual user needs to decide whether to keep iterating.
pub(crate) struct VuControl {
    pub slot: usize,
    /// Stop after this many iterations
    pub iterations: Option<u64>,
    /// The number of slots that should be running
    pub target: watch::Receiver<usize>,
    /// Set once in-flight iterations should be cancelled
    pub abort: watch::Receiver<bool>,
    pub shutdown_listener: DelegatedShutdownListener,
}

/// Run iterations of `entry` until told to stop.
///
/// The population target is only checked between iterations, so a VU that is asked to retire
/// always finishes the iteration it is in. Only an abort or a shutdown cancels an iteration.
pub(crate) async fn run_vu<RV: UserValuesConstraint, V: UserValuesConstraint>(
    mut ctx: VuContext<RV, V>,
    entry: EntryFn<RV, V>,
    mut control: VuControl,
) -> VuExit {
    let reporter = ctx.runner_context().reporter();
    let mut iteration = 0u64;

    loop {
        if control.shutdown_listener.should_shutdown() || *control.abort.borrow() {
            return VuExit::Interrupted;
        }

        if control.slot >= *control.target.borrow() {
            log::debug!("Retiring vu {}", ctx.vu_id());
            return VuExit::Retired;
        }

        if control.iterations.is_some_and(|max| iteration >= max) {
            log::debug!("Vu {} has run all of its iterations", ctx.vu_id());
            return VuExit::Retired;
        }

        ctx.begin_iteration(iteration);
        iteration += 1;

        let started = Instant::now();
        let result = tokio::select! {
            result = entry(&mut ctx) => Some(result),
            Ok(_) = control.abort.wait_for(|abort| *abort) => None,
            _ = control.shutdown_listener.wait_for_shutdown() => None,
        };

        let (outcome, exit) = match result {
            Some(Ok(())) => (IterationOutcome::Completed, None),
            Some(Err(e)) if e.is::<VuBailError>() => {
                log::info!("Vu {} bailed: {}", ctx.vu_id(), e);
                (IterationOutcome::Failed, Some(VuExit::Bailed))
            }
            Some(Err(e)) if e.is::<ShutdownSignalError>() => {
                (IterationOutcome::Interrupted, Some(VuExit::Interrupted))
            }
            Some(Err(e)) => {
                log::error!(
                    "Iteration {} of vu {} in scenario {} failed: {:?}",
                    iteration - 1,
                    ctx.vu_id(),
                    ctx.scenario_name(),
                    e
                );
                (IterationOutcome::Failed, None)
            }
            None => {
                log::debug!("Interrupted vu {}", ctx.vu_id());
                (IterationOutcome::Interrupted, Some(VuExit::Interrupted))
            }
        };

        reporter.add_iteration(IterationRecord {
            duration: started.elapsed(),
            outcome,
            timestamp: SystemTime::now(),
            tags: SampleTags::new(ctx.scenario_name(), ctx.vu_id()),
        });

        if let Some(exit) = exit {
            return exit;
        }
    }
}
