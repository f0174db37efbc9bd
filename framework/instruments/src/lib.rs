mod aggregator;
mod check;
mod report;
mod sample;
mod threshold;
mod trend;

pub use aggregator::{IterationCounts, MetricValue, Metrics, MetricsSnapshot, MetricsStore};
pub use check::{check, Assertion};
pub use report::{
    InMemoryReporter, InfluxFileReportCollector, ReportCollector, ReportConfig, Reporter,
};
pub use sample::{CheckResult, IterationOutcome, IterationRecord, RequestSample, SampleTags};
pub use threshold::{
    Aggregation, BuiltinMetric, Comparison, MetricKey, TagFilter, Threshold, ThresholdExpr,
    ThresholdParseError,
};
pub use trend::Trend;
