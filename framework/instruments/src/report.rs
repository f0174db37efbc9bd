mod in_memory_reporter;
mod influx_file_reporter;

use crate::aggregator::{MetricsSnapshot, MetricsStore};
use crate::sample::{CheckResult, IterationRecord, RequestSample};
use crate::threshold::TagFilter;
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;

pub use in_memory_reporter::InMemoryReporter;
pub use influx_file_reporter::InfluxFileReportCollector;

/// A sink for the records produced during a run.
///
/// Collectors see every record as it is produced. They are not responsible for threshold
/// evaluation, which always runs against the [Reporter]'s own store.
pub trait ReportCollector: Send {
    fn add_request(&mut self, sample: &RequestSample);

    fn add_check(&mut self, _check: &CheckResult) {}

    fn add_iteration(&mut self, _iteration: &IterationRecord) {}

    /// Called once at the end of the run, after every virtual user has stopped.
    fn finalize(&mut self);
}

/// The shared metrics aggregator for a run.
///
/// Records are folded into an in-process [MetricsStore], used for the run summary and threshold
/// evaluation, and forwarded to any configured [ReportCollector]s.
pub struct Reporter {
    store: MetricsStore,
    /// `None` when no collector is configured so that recording never takes this lock
    collectors: Option<Mutex<Vec<Box<dyn ReportCollector>>>>,
}

impl Debug for Reporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field(
                "collectors",
                &self.collectors.as_ref().map_or(0, |c| c.lock().len()),
            )
            .finish()
    }
}

impl Reporter {
    pub fn new(collectors: Vec<Box<dyn ReportCollector>>) -> Self {
        Self::with_store(MetricsStore::new(), collectors)
    }

    /// A reporter whose store also keeps the metrics for each tag in `filters`.
    pub fn with_filters(
        filters: impl IntoIterator<Item = TagFilter>,
        collectors: Vec<Box<dyn ReportCollector>>,
    ) -> Self {
        Self::with_store(MetricsStore::with_filters(filters), collectors)
    }

    fn with_store(store: MetricsStore, collectors: Vec<Box<dyn ReportCollector>>) -> Self {
        Self {
            store,
            collectors: (!collectors.is_empty()).then(|| Mutex::new(collectors)),
        }
    }

    fn for_each_collector(&self, mut f: impl FnMut(&mut Box<dyn ReportCollector>)) {
        if let Some(collectors) = &self.collectors {
            collectors.lock().iter_mut().for_each(&mut f);
        }
    }

    pub fn add_request(&self, sample: RequestSample) {
        self.for_each_collector(|c| c.add_request(&sample));
        self.store.push_request(&sample);
    }

    pub fn add_check(&self, check: CheckResult) {
        self.for_each_collector(|c| c.add_check(&check));
        self.store.push_check(&check);
    }

    pub fn add_iteration(&self, iteration: IterationRecord) {
        self.for_each_collector(|c| c.add_iteration(&iteration));
        self.store.push_iteration(&iteration);
    }

    pub fn has_collectors(&self) -> bool {
        self.collectors.is_some()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.store.snapshot()
    }

    pub fn finalize(&self) {
        self.for_each_collector(|c| c.finalize());
    }
}

/// Chooses the collectors a [Reporter] forwards records to.
#[derive(Debug, Default)]
pub struct ReportConfig {
    run_id: String,
    run_name: String,
    in_memory: bool,
    influx_file_dir: Option<PathBuf>,
    filters: Vec<TagFilter>,
}

impl ReportConfig {
    pub fn new(run_id: impl Into<String>, run_name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            run_name: run_name.into(),
            ..Default::default()
        }
    }

    /// Print a table of request timings at the end of the run.
    pub fn enable_in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    /// Write every record to a file in `dir`, in InfluxDB line protocol.
    pub fn enable_influx_file(mut self, dir: PathBuf) -> Self {
        self.influx_file_dir = Some(dir);
        self
    }

    /// Keep separate metrics for the records matching each of `filters`, as tagged thresholds
    /// need.
    pub fn track(mut self, filters: impl IntoIterator<Item = TagFilter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Build the [Reporter]. File writers are spawned onto `runtime`.
    pub fn init(self, runtime: &tokio::runtime::Handle) -> Reporter {
        let mut collectors: Vec<Box<dyn ReportCollector>> = Vec::new();

        if self.in_memory {
            collectors.push(Box::new(InMemoryReporter::new()));
        }

        if let Some(dir) = self.influx_file_dir {
            collectors.push(Box::new(InfluxFileReportCollector::new(
                runtime,
                dir,
                self.run_id,
                self.run_name,
            )));
        }

        Reporter::with_filters(self.filters, collectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleTags;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    #[derive(Default)]
    struct CountingCollector {
        requests: Arc<AtomicUsize>,
        finalized: Arc<AtomicUsize>,
    }

    impl ReportCollector for CountingCollector {
        fn add_request(&mut self, _sample: &RequestSample) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }

        fn finalize(&mut self) {
            self.finalized.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn records_reach_store_and_collectors() {
        let collector = CountingCollector::default();
        let requests = collector.requests.clone();
        let finalized = collector.finalized.clone();
        let reporter = Reporter::new(vec![Box::new(collector)]);

        for _ in 0..3 {
            reporter.add_request(RequestSample {
                method: "GET".to_string(),
                url: "http://localhost/".to_string(),
                name: "/".to_string(),
                status: 200,
                duration: Duration::from_millis(5),
                timestamp: SystemTime::now(),
                failed: false,
                error: None,
                tags: SampleTags::new("s", 1),
            });
        }
        reporter.finalize();

        assert_eq!(3, requests.load(Ordering::SeqCst));
        assert_eq!(1, finalized.load(Ordering::SeqCst));
        assert_eq!(3, reporter.snapshot().totals.http_reqs);
    }

    #[test]
    fn reporter_without_collectors_still_aggregates() {
        let reporter = Reporter::new(Vec::new());
        assert!(!reporter.has_collectors());

        reporter.add_iteration(IterationRecord {
            duration: Duration::from_millis(5),
            outcome: crate::IterationOutcome::Completed,
            timestamp: SystemTime::now(),
            tags: SampleTags::new("s", 1),
        });
        reporter.finalize();

        assert_eq!(1, reporter.snapshot().totals.iterations);
    }

    #[test]
    fn tracked_filters_reach_the_store() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let reporter = ReportConfig::new("run", "test")
            .track([TagFilter::Scenario("s".to_string())])
            .init(runtime.handle());
        assert!(!reporter.has_collectors());

        reporter.add_check(CheckResult {
            name: "is ok".to_string(),
            passed: true,
            timestamp: SystemTime::now(),
            tags: SampleTags::new("s", 1),
        });

        let snapshot = reporter.snapshot();
        let scoped = snapshot
            .scoped(&TagFilter::Scenario("s".to_string()))
            .unwrap();
        assert_eq!(1, scoped.checks_passed);
    }
}
