mod operations_table;

use crate::report::in_memory_reporter::operations_table::RequestRow;
use crate::report::ReportCollector;
use crate::sample::RequestSample;
use crate::trend::Trend;
use std::collections::BTreeMap;
use tabled::settings::Style;
use tabled::Table;

#[derive(Debug, Default)]
struct RequestStats {
    requests: usize,
    failed: usize,
    timings: Trend,
}

/// A very basic reporter that is useful while developing scenarios. It prints a table of request
/// timings, grouped by method and request name, at the end of the run.
#[derive(Debug, Default)]
pub struct InMemoryReporter {
    requests: BTreeMap<(String, String), RequestStats>,
}

impl InMemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn rows(&self) -> Vec<RequestRow> {
        self.requests
            .iter()
            .map(|((method, name), stats)| RequestRow {
                method: method.clone(),
                name: name.clone(),
                requests: stats.requests,
                failed: stats.failed,
                avg_ms: stats.timings.avg(),
                min_ms: stats.timings.min(),
                max_ms: stats.timings.max(),
                p95_ms: stats.timings.percentile(95.0),
            })
            .collect()
    }

    fn print_summary_of_requests(&self) {
        println!("\nSummary of requests");

        let mut table = Table::new(self.rows());
        table.with(Style::modern());

        println!("{table}");
    }
}

impl ReportCollector for InMemoryReporter {
    fn add_request(&mut self, sample: &RequestSample) {
        let stats = self
            .requests
            .entry((sample.method.clone(), sample.name.clone()))
            .or_default();
        stats.requests += 1;
        if sample.failed {
            stats.failed += 1;
        }
        stats.timings.record(sample.duration);
    }

    fn finalize(&mut self) {
        self.print_summary_of_requests();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleTags;
    use crate::trend::assert_close;
    use std::time::{Duration, SystemTime};

    fn sample(method: &str, name: &str, millis: u64, failed: bool) -> RequestSample {
        RequestSample {
            method: method.to_string(),
            url: format!("http://localhost{name}"),
            name: name.to_string(),
            status: if failed { 500 } else { 200 },
            duration: Duration::from_millis(millis),
            timestamp: SystemTime::now(),
            failed,
            error: None,
            tags: SampleTags::new("s", 1),
        }
    }

    #[test]
    fn rows_are_grouped_by_method_and_name() {
        let mut reporter = InMemoryReporter::new();
        reporter.add_request(&sample("POST", "/items", 10, false));
        reporter.add_request(&sample("POST", "/items", 30, true));
        reporter.add_request(&sample("GET", "/items/{id}/status", 5, false));

        let rows = reporter.rows();
        assert_eq!(2, rows.len());

        let get = &rows[0];
        assert_eq!("GET", get.method);
        assert_eq!(1, get.requests);

        let post = &rows[1];
        assert_eq!("/items", post.name);
        assert_eq!(2, post.requests);
        assert_eq!(1, post.failed);
        assert_close(20.0, post.avg_ms);
        assert_close(10.0, post.min_ms);
        assert_close(30.0, post.max_ms);
    }
}
