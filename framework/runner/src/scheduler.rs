use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use gale_core::prelude::ShutdownHandle;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{ExecutorConfig, ScenarioConfig};
use crate::context::{RunnerContext, UserValuesConstraint, VuContext};
use crate::definition::EntryFn;
use crate::ramp::ramping_target;
use crate::vu::{run_vu, VuControl, VuExit};

/// How often a scenario controller recomputes its population target.
pub(crate) const RAMP_TICK: Duration = Duration::from_millis(100);

/// One scenario from the run descriptor, ready to be scheduled.
pub(crate) struct ScenarioTask<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub name: Arc<str>,
    pub config: ScenarioConfig,
    pub entry: EntryFn<RV, V>,
    pub runner_context: Arc<RunnerContext<RV>>,
    pub shutdown_handle: ShutdownHandle,
    /// Shared by every scenario so that VU IDs are unique across the run
    pub vu_ids: Arc<AtomicU64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScenarioStats {
    pub peak_vus: u64,
    pub vus_started: u64,
    pub vus_bailed: u64,
}

enum Slot {
    /// Free to start a VU in when the target covers it
    Empty,
    Running(JoinHandle<VuExit>),
    /// The VU in this slot is done for the rest of the scenario
    Stopped,
}

/// The virtual users of one scenario, indexed by slot.
struct Population<'a, RV: UserValuesConstraint, V: UserValuesConstraint> {
    task: &'a ScenarioTask<RV, V>,
    slots: Vec<Slot>,
    /// Start a new VU in the slot of one that retired. Off for iteration bounded executors.
    respawn_retired: bool,
    iterations: Option<u64>,
    target: watch::Sender<usize>,
    abort: watch::Sender<bool>,
    stats: ScenarioStats,
}

impl<'a, RV: UserValuesConstraint, V: UserValuesConstraint> Population<'a, RV, V> {
    fn new(task: &'a ScenarioTask<RV, V>) -> Self {
        let (respawn_retired, iterations) = match &task.config.executor {
            ExecutorConfig::PerVuIterations { iterations, .. } => (false, Some(*iterations)),
            _ => (true, None),
        };

        Self {
            task,
            slots: Vec::new(),
            respawn_retired,
            iterations,
            target: watch::Sender::new(0),
            abort: watch::Sender::new(false),
            stats: ScenarioStats::default(),
        }
    }

    /// Publish a new target, then start VUs in any free slot below it.
    ///
    /// VUs in slots at or above the target are not stopped here. They see the new target when
    /// their current iteration ends and retire themselves.
    fn set_target(&mut self, target: usize) {
        self.target.send_replace(target);
        self.reap();

        if self.slots.len() < target {
            self.slots.resize_with(target, || Slot::Empty);
        }

        for slot in 0..target {
            if matches!(self.slots[slot], Slot::Empty) {
                let handle = self.spawn_vu(slot);
                self.slots[slot] = Slot::Running(handle);
            }
        }

        let active = self
            .slots
            .iter()
            .filter(|s| matches!(s, Slot::Running(_)))
            .count() as u64;
        self.stats.peak_vus = self.stats.peak_vus.max(active);
    }

    fn spawn_vu(&mut self, slot: usize) -> JoinHandle<VuExit> {
        let vu_id = self.task.vu_ids.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Starting vu {} in slot {} of scenario {}",
            vu_id,
            slot,
            self.task.name
        );
        self.stats.vus_started += 1;

        let ctx = VuContext::new(
            self.task.runner_context.clone(),
            self.task.name.clone(),
            vu_id,
            self.task.shutdown_handle.new_listener(),
        );
        let control = VuControl {
            slot,
            iterations: self.iterations,
            target: self.target.subscribe(),
            abort: self.abort.subscribe(),
            shutdown_listener: self.task.shutdown_handle.new_listener(),
        };

        tokio::spawn(run_vu(ctx, self.task.entry, control))
    }

    /// Collect the VUs that have finished and free their slots where allowed.
    fn reap(&mut self) {
        for slot in self.slots.iter_mut() {
            let Slot::Running(handle) = slot else {
                continue;
            };

            if !handle.is_finished() {
                continue;
            }

            if let Some(result) = handle.now_or_never() {
                let exit = record_exit(&mut self.stats, &self.task.name, result);
                *slot = if exit == Some(VuExit::Retired) && self.respawn_retired {
                    Slot::Empty
                } else {
                    Slot::Stopped
                };
            }
        }
    }

    /// True once every VU has stopped for good.
    fn is_exhausted(&self) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(|s| matches!(s, Slot::Stopped))
    }

    /// Ask every VU to stop after its current iteration and wait for them. If `graceful_stop` is
    /// set, iterations still running after it elapses are cancelled.
    async fn drain(mut self, graceful_stop: Option<Duration>) -> ScenarioStats {
        self.target.send_replace(0);

        let mut pending = self
            .slots
            .drain(..)
            .filter_map(|slot| match slot {
                Slot::Running(handle) => Some(handle),
                _ => None,
            })
            .collect::<FuturesUnordered<_>>();

        let name = self.task.name.clone();
        match graceful_stop {
            Some(graceful_stop) => {
                let drained = tokio::time::timeout(
                    graceful_stop,
                    join_pending(&mut pending, &mut self.stats, &name),
                )
                .await;

                if drained.is_err() {
                    log::warn!(
                        "Scenario {} still has {} running iterations after the graceful stop of {:?}, interrupting them",
                        name,
                        pending.len(),
                        graceful_stop
                    );
                    self.abort.send_replace(true);
                    join_pending(&mut pending, &mut self.stats, &name).await;
                }
            }
            None => join_pending(&mut pending, &mut self.stats, &name).await,
        }

        self.stats
    }
}

async fn join_pending(
    pending: &mut FuturesUnordered<JoinHandle<VuExit>>,
    stats: &mut ScenarioStats,
    scenario: &str,
) {
    while let Some(result) = pending.next().await {
        record_exit(stats, scenario, result);
    }
}

fn record_exit(
    stats: &mut ScenarioStats,
    scenario: &str,
    result: Result<VuExit, JoinError>,
) -> Option<VuExit> {
    match result {
        Ok(exit) => {
            if exit == VuExit::Bailed {
                stats.vus_bailed += 1;
            }
            Some(exit)
        }
        Err(e) => {
            log::error!("A vu in scenario {} panicked: {:?}", scenario, e);
            None
        }
    }
}

/// Control the population of one scenario from its start time until it ends, then drain it.
pub(crate) async fn run_scenario<RV: UserValuesConstraint, V: UserValuesConstraint>(
    task: ScenarioTask<RV, V>,
) -> ScenarioStats {
    let mut shutdown_listener = task.shutdown_handle.new_listener();

    if !task.config.start_time.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(task.config.start_time) => {}
            _ = shutdown_listener.wait_for_shutdown() => {
                log::info!("Scenario {} was not started before shutdown", task.name);
                return ScenarioStats::default();
            }
        }
    }

    log::info!(
        "Starting scenario {} with executor {}",
        task.name,
        task.config.executor.name()
    );

    let started = Instant::now();
    let mut population = Population::new(&task);
    let mut tick = tokio::time::interval(RAMP_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown_listener.wait_for_shutdown() => {
                log::info!("Scenario {} interrupted by shutdown", task.name);
                break;
            }
        }

        let elapsed = started.elapsed();
        if task.config.max_duration.is_some_and(|max| elapsed >= max) {
            log::info!("Scenario {} reached its max duration", task.name);
            break;
        }

        let target = match &task.config.executor {
            ExecutorConfig::RampingVus { start_vus, stages } => {
                ramping_target(*start_vus, stages, elapsed)
            }
            ExecutorConfig::ConstantVus { vus, duration } => (elapsed < *duration).then_some(*vus),
            ExecutorConfig::PerVuIterations { vus, .. } => Some(*vus),
        };

        match target {
            Some(target) => population.set_target(target as usize),
            None => break,
        }

        if !matches!(task.config.executor, ExecutorConfig::RampingVus { .. })
            && population.is_exhausted()
        {
            break;
        }
    }

    let stats = population.drain(task.config.graceful_stop).await;

    log::info!(
        "Scenario {} finished after {:?}, peak of {} vus",
        task.name,
        started.elapsed(),
        stats.peak_vus
    );
    if stats.vus_bailed > 0 {
        log::info!("{} vus bailed in scenario {}", stats.vus_bailed, task.name);
    }

    stats
}
