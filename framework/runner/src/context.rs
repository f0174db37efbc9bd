use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use gale_core::prelude::{DelegatedShutdownListener, ShutdownHandle};
use gale_instruments::{Assertion, Reporter, SampleTags};
use tokio::time::Instant;

use crate::executor::Executor;

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

/// The context shared by every virtual user in a run.
///
/// It is mutable during the setup hook, after which it is shared read-only.
#[derive(Debug)]
pub struct RunnerContext<RV: UserValuesConstraint> {
    executor: Arc<Executor>,
    reporter: Arc<Reporter>,
    shutdown_handle: ShutdownHandle,
    api_url: Option<String>,
    run_id: String,
    value: RV,
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(
        executor: Arc<Executor>,
        reporter: Arc<Reporter>,
        shutdown_handle: ShutdownHandle,
        api_url: Option<String>,
        run_id: String,
    ) -> Self {
        Self {
            executor,
            reporter,
            shutdown_handle,
            api_url,
            run_id,
            value: Default::default(),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn reporter(&self) -> Arc<Reporter> {
        self.reporter.clone()
    }

    /// The base URL of the API under test, if one was configured.
    pub fn api_url(&self) -> Option<&str> {
        self.api_url.as_deref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Interrupt the whole run, as if the user had pressed Ctrl-C.
    pub fn force_stop_scenario(&self) {
        self.shutdown_handle.shutdown();
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    pub fn get(&self) -> &RV {
        &self.value
    }
}

/// How often to retry and how long to keep trying in [VuContext::poll_until].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// The context of a single virtual user, passed to its entry function on every iteration.
pub struct VuContext<RV: UserValuesConstraint, V: UserValuesConstraint> {
    runner_context: Arc<RunnerContext<RV>>,
    scenario_name: Arc<str>,
    vu_id: u64,
    iteration: u64,
    group_path: Vec<String>,
    shutdown_listener: DelegatedShutdownListener,
    value: V,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> VuContext<RV, V> {
    pub(crate) fn new(
        runner_context: Arc<RunnerContext<RV>>,
        scenario_name: Arc<str>,
        vu_id: u64,
        shutdown_listener: DelegatedShutdownListener,
    ) -> Self {
        Self {
            runner_context,
            scenario_name,
            vu_id,
            iteration: 0,
            group_path: Vec::new(),
            shutdown_listener,
            value: Default::default(),
        }
    }

    pub(crate) fn begin_iteration(&mut self, iteration: u64) {
        self.iteration = iteration;
        self.group_path.clear();
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    /// A run-unique ID for this virtual user, starting from 1.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// The zero based index of the current iteration of this virtual user.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn scenario_name(&self) -> &str {
        &self.scenario_name
    }

    /// The current group path, `::` separated, or empty outside of any group.
    pub fn group_path(&self) -> String {
        self.group_path.join("::")
    }

    /// The tags attached to anything recorded from this context right now.
    pub fn tags(&self) -> SampleTags {
        SampleTags {
            scenario: self.scenario_name.to_string(),
            group: self.group_path(),
            vu_id: self.vu_id,
        }
    }

    pub fn shutdown_listener(&mut self) -> &mut DelegatedShutdownListener {
        &mut self.shutdown_listener
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn get(&self) -> &V {
        &self.value
    }

    /// Pause this virtual user. Other virtual users keep running.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Run `f` with `label` added to the group path, so that requests and checks made inside it are
    /// attributed to the group. Returns whatever `f` returns.
    pub async fn group<T>(
        &mut self,
        label: &str,
        f: impl for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, T>,
    ) -> T {
        self.group_path.push(label.to_string());
        let out = f(self).await;
        self.group_path.pop();
        out
    }

    /// Evaluate named assertions against `value`, recording one check result per assertion.
    ///
    /// Returns true only if every assertion passed. Never fails the iteration.
    pub fn check<T: ?Sized>(&self, value: &T, assertions: &[Assertion<'_, T>]) -> bool {
        gale_instruments::check(
            &self.runner_context.reporter,
            &self.tags(),
            value,
            assertions,
        )
    }

    /// Call `f` every `policy.interval` until it produces a value, giving up with `None` once
    /// `policy.timeout` has elapsed. `f` is always called at least once.
    pub async fn poll_until<T, F, Fut>(&self, policy: PollPolicy, mut f: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let deadline = Instant::now() + policy.timeout;

        loop {
            if let Some(value) = f().await {
                return Some(value);
            }

            let now = Instant::now();
            if now >= deadline {
                log::debug!(
                    "Gave up polling for vu {} after {:?}",
                    self.vu_id,
                    policy.timeout
                );
                return None;
            }

            tokio::time::sleep(policy.interval.min(deadline - now)).await;
        }
    }
}
