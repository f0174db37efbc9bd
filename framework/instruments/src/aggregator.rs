use crate::sample::{CheckResult, IterationOutcome, IterationRecord, RequestSample};
use crate::threshold::{BuiltinMetric, TagFilter};
use crate::trend::Trend;
use gale_summary_model::{CheckSummary, MetricsSummary, RateSummary};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// The built-in metrics for one set of records, updated as records arrive.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub http_reqs: u64,
    pub http_reqs_failed: u64,
    pub http_req_duration: Trend,
    pub checks_total: u64,
    pub checks_passed: u64,
    /// Iterations that ran to the end of the entry function, whether it returned an error or not
    pub iterations: u64,
    pub iteration_duration: Trend,
}

impl Metrics {
    fn add_request(&mut self, sample: &RequestSample) {
        self.http_reqs += 1;
        if sample.failed {
            self.http_reqs_failed += 1;
        }
        self.http_req_duration.record(sample.duration);
    }

    fn add_check(&mut self, check: &CheckResult) {
        self.checks_total += 1;
        if check.passed {
            self.checks_passed += 1;
        }
    }

    fn add_iteration(&mut self, iteration: &IterationRecord) {
        if iteration.outcome == IterationOutcome::Interrupted {
            return;
        }
        self.iterations += 1;
        self.iteration_duration.record(iteration.duration);
    }

    pub fn http_req_failed(&self) -> RateSummary {
        RateSummary::new(self.http_reqs_failed, self.http_reqs)
    }

    pub fn checks_rate(&self) -> RateSummary {
        RateSummary::new(self.checks_passed, self.checks_total)
    }

    pub fn metric(&self, metric: BuiltinMetric) -> MetricValue<'_> {
        match metric {
            BuiltinMetric::HttpReqs => MetricValue::Counter(self.http_reqs),
            BuiltinMetric::HttpReqFailed => MetricValue::Rate(self.http_req_failed()),
            BuiltinMetric::HttpReqDuration => MetricValue::Trend(&self.http_req_duration),
            BuiltinMetric::Checks => MetricValue::Rate(self.checks_rate()),
            BuiltinMetric::Iterations => MetricValue::Counter(self.iterations),
            BuiltinMetric::IterationDuration => MetricValue::Trend(&self.iteration_duration),
        }
    }

    pub fn summarize(&self) -> MetricsSummary {
        MetricsSummary {
            http_reqs: self.http_reqs,
            http_req_failed: self.http_req_failed(),
            http_req_duration: self.http_req_duration.summary(),
            checks: self.checks_rate(),
            iterations: self.iterations,
            iteration_duration: self.iteration_duration.summary(),
        }
    }
}

/// The aggregated value of one built-in metric.
#[derive(Debug, Clone)]
pub enum MetricValue<'a> {
    Counter(u64),
    Rate(RateSummary),
    Trend(&'a Trend),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationCounts {
    pub completed: u64,
    pub failed: u64,
    pub interrupted: u64,
}

impl IterationCounts {
    fn add(&mut self, outcome: IterationOutcome) {
        match outcome {
            IterationOutcome::Completed => self.completed += 1,
            IterationOutcome::Failed => self.failed += 1,
            IterationOutcome::Interrupted => self.interrupted += 1,
        }
    }
}

#[derive(Debug)]
struct ScopedMetrics {
    filter: TagFilter,
    metrics: Mutex<Metrics>,
}

/// Aggregates shared by every virtual user in a run.
///
/// Records are folded into running totals as they arrive and are not kept. Metrics restricted
/// to a tag, as used by tagged thresholds, are only available for the filters the store was
/// created with.
#[derive(Debug, Default)]
pub struct MetricsStore {
    totals: Mutex<Metrics>,
    scoped: Vec<ScopedMetrics>,
    scenarios: Mutex<HashMap<String, IterationCounts>>,
    /// Pass and fail counts keyed by group then check name
    checks: Mutex<BTreeMap<(String, String), (u64, u64)>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that also keeps separate metrics for the records matching each of `filters`.
    pub fn with_filters(filters: impl IntoIterator<Item = TagFilter>) -> Self {
        let mut scoped: Vec<ScopedMetrics> = Vec::new();
        for filter in filters {
            if scoped.iter().all(|s| s.filter != filter) {
                scoped.push(ScopedMetrics {
                    filter,
                    metrics: Mutex::new(Metrics::default()),
                });
            }
        }

        Self {
            scoped,
            ..Default::default()
        }
    }

    pub fn push_request(&self, sample: &RequestSample) {
        self.totals.lock().add_request(sample);
        for scope in self.scoped.iter().filter(|s| s.filter.matches_request(sample)) {
            scope.metrics.lock().add_request(sample);
        }
    }

    pub fn push_check(&self, check: &CheckResult) {
        self.totals.lock().add_check(check);
        for scope in self.scoped.iter().filter(|s| s.filter.matches_check(check)) {
            scope.metrics.lock().add_check(check);
        }

        let mut checks = self.checks.lock();
        let counts = checks
            .entry((check.tags.group.clone(), check.name.clone()))
            .or_insert((0, 0));
        if check.passed {
            counts.0 += 1;
        } else {
            counts.1 += 1;
        }
    }

    pub fn push_iteration(&self, iteration: &IterationRecord) {
        self.totals.lock().add_iteration(iteration);
        for scope in self
            .scoped
            .iter()
            .filter(|s| s.filter.matches_iteration(iteration))
        {
            scope.metrics.lock().add_iteration(iteration);
        }

        self.scenarios
            .lock()
            .entry(iteration.tags.scenario.clone())
            .or_default()
            .add(iteration.outcome);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            totals: self.totals.lock().clone(),
            scoped: self
                .scoped
                .iter()
                .map(|s| (s.filter.clone(), s.metrics.lock().clone()))
                .collect(),
            scenarios: self.scenarios.lock().clone(),
            checks: self
                .checks
                .lock()
                .iter()
                .map(|((group, name), (passes, fails))| CheckSummary {
                    name: name.clone(),
                    group: group.clone(),
                    passes: *passes,
                    fails: *fails,
                })
                .collect(),
        }
    }
}

/// A point in time copy of the aggregates in a [MetricsStore].
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub totals: Metrics,
    pub scoped: Vec<(TagFilter, Metrics)>,
    pub scenarios: HashMap<String, IterationCounts>,
    /// Pass/fail counts per check, ordered by group and then check name
    pub checks: Vec<CheckSummary>,
}

impl MetricsSnapshot {
    /// The metrics for the records matching `filter`, if the store was tracking it.
    pub fn scoped(&self, filter: &TagFilter) -> Option<&Metrics> {
        self.scoped
            .iter()
            .find(|(f, _)| f == filter)
            .map(|(_, metrics)| metrics)
    }

    pub fn iterations_of(&self, scenario: &str) -> IterationCounts {
        self.scenarios.get(scenario).copied().unwrap_or_default()
    }

    pub fn summarize(&self) -> MetricsSummary {
        self.totals.summarize()
    }
}
