use crate::aggregator::{MetricValue, Metrics, MetricsSnapshot};
use crate::sample::{CheckResult, IterationRecord, RequestSample};
use gale_summary_model::ThresholdSummary;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdParseError {
    #[error("empty threshold expression")]
    Empty,
    #[error("missing comparison operator in `{0}`")]
    MissingOperator(String),
    #[error("unknown aggregation `{0}`")]
    UnknownAggregation(String),
    #[error("invalid percentile in `{0}`, expected a value between 0 and 100")]
    InvalidPercentile(String),
    #[error("invalid threshold value `{0}`")]
    InvalidValue(String),
    #[error("invalid metric key `{0}`, expected `name` or `name{{tag:value}}`")]
    InvalidMetricKey(String),
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),
    #[error("unknown tag `{0}`, expected one of `scenario`, `group` or `name`")]
    UnknownTag(String),
    #[error("aggregation `{aggregation}` is not supported by the {kind} metric `{metric}`")]
    UnsupportedAggregation {
        metric: String,
        kind: &'static str,
        aggregation: String,
    },
}

/// The metrics every run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinMetric {
    HttpReqs,
    HttpReqFailed,
    HttpReqDuration,
    Checks,
    Iterations,
    IterationDuration,
}

impl BuiltinMetric {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinMetric::HttpReqs => "http_reqs",
            BuiltinMetric::HttpReqFailed => "http_req_failed",
            BuiltinMetric::HttpReqDuration => "http_req_duration",
            BuiltinMetric::Checks => "checks",
            BuiltinMetric::Iterations => "iterations",
            BuiltinMetric::IterationDuration => "iteration_duration",
        }
    }

    fn kind(self) -> &'static str {
        match self {
            BuiltinMetric::HttpReqs | BuiltinMetric::Iterations => "counter",
            BuiltinMetric::HttpReqFailed | BuiltinMetric::Checks => "rate",
            BuiltinMetric::HttpReqDuration | BuiltinMetric::IterationDuration => "trend",
        }
    }

    fn supports(self, aggregation: Aggregation) -> bool {
        match self.kind() {
            "counter" => matches!(aggregation, Aggregation::Count),
            "rate" => matches!(aggregation, Aggregation::Rate),
            _ => !matches!(aggregation, Aggregation::Rate),
        }
    }
}

impl FromStr for BuiltinMetric {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http_reqs" => Ok(BuiltinMetric::HttpReqs),
            "http_req_failed" => Ok(BuiltinMetric::HttpReqFailed),
            "http_req_duration" => Ok(BuiltinMetric::HttpReqDuration),
            "checks" => Ok(BuiltinMetric::Checks),
            "iterations" => Ok(BuiltinMetric::Iterations),
            "iteration_duration" => Ok(BuiltinMetric::IterationDuration),
            other => Err(ThresholdParseError::UnknownMetric(other.to_string())),
        }
    }
}

/// Restricts a metric to the records carrying a tag value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    Scenario(String),
    Group(String),
    /// The request name for request metrics, the check name for `checks`
    Name(String),
}

impl TagFilter {
    pub(crate) fn matches_request(&self, sample: &RequestSample) -> bool {
        match self {
            TagFilter::Scenario(s) => sample.tags.scenario == *s,
            TagFilter::Group(g) => sample.tags.group == *g,
            TagFilter::Name(n) => sample.name == *n,
        }
    }

    pub(crate) fn matches_check(&self, check: &CheckResult) -> bool {
        match self {
            TagFilter::Scenario(s) => check.tags.scenario == *s,
            TagFilter::Group(g) => check.tags.group == *g,
            TagFilter::Name(n) => check.name == *n,
        }
    }

    pub(crate) fn matches_iteration(&self, iteration: &IterationRecord) -> bool {
        match self {
            TagFilter::Scenario(s) => iteration.tags.scenario == *s,
            // Iterations span groups and have no name.
            TagFilter::Group(_) | TagFilter::Name(_) => false,
        }
    }
}

/// A metric name with an optional tag filter, e.g. `http_req_duration{scenario:update_prices}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricKey {
    pub metric: BuiltinMetric,
    pub filter: Option<TagFilter>,
}

impl FromStr for MetricKey {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some((name, rest)) = s.split_once('{') else {
            return Ok(MetricKey {
                metric: s.parse()?,
                filter: None,
            });
        };

        let tag = rest
            .strip_suffix('}')
            .ok_or_else(|| ThresholdParseError::InvalidMetricKey(s.to_string()))?;
        let (key, value) = tag
            .split_once(':')
            .ok_or_else(|| ThresholdParseError::InvalidMetricKey(s.to_string()))?;
        let value = value.trim().to_string();

        let filter = match key.trim() {
            "scenario" => TagFilter::Scenario(value),
            "group" => TagFilter::Group(value),
            "name" => TagFilter::Name(value),
            other => return Err(ThresholdParseError::UnknownTag(other.to_string())),
        };

        Ok(MetricKey {
            metric: name.trim().parse()?,
            filter: Some(filter),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Rate => write!(f, "rate"),
            Aggregation::Count => write!(f, "count"),
            Aggregation::Avg => write!(f, "avg"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
            Aggregation::Med => write!(f, "med"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

impl FromStr for Aggregation {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rate" => Ok(Aggregation::Rate),
            "count" => Ok(Aggregation::Count),
            "avg" => Ok(Aggregation::Avg),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "med" => Ok(Aggregation::Med),
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| ThresholdParseError::UnknownAggregation(s.to_string()))?;
                let p = inner
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| ThresholdParseError::InvalidPercentile(s.to_string()))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(ThresholdParseError::InvalidPercentile(s.to_string()));
                }
                Ok(Aggregation::Percentile(p))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    // Two character operators first so that `<=` is not read as `<`.
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn holds(self, observed: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => observed < limit,
            Comparison::Le => observed <= limit,
            Comparison::Gt => observed > limit,
            Comparison::Ge => observed >= limit,
            Comparison::Eq => observed == limit,
            Comparison::Ne => observed != limit,
        }
    }
}

/// A parsed expression such as `rate<0.01` or `p(95)<1500`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub value: f64,
    source: String,
}

impl ThresholdExpr {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl FromStr for ThresholdExpr {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = s.trim();
        if source.is_empty() {
            return Err(ThresholdParseError::Empty);
        }

        let (position, operator, comparison) = Comparison::OPERATORS
            .iter()
            .filter_map(|(op, cmp)| source.find(op).map(|pos| (pos, *op, *cmp)))
            // Leftmost match wins, with ties going to the longer operator listed first.
            .min_by_key(|(pos, _, _)| *pos)
            .ok_or_else(|| ThresholdParseError::MissingOperator(source.to_string()))?;

        let aggregation = source[..position].trim().parse()?;
        let raw_value = source[position + operator.len()..].trim();
        let value = raw_value
            .parse::<f64>()
            .map_err(|_| ThresholdParseError::InvalidValue(raw_value.to_string()))?;

        Ok(ThresholdExpr {
            aggregation,
            comparison,
            value,
            source: source.to_string(),
        })
    }
}

/// A pass/fail condition over one aggregated metric, evaluated at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    key_source: String,
    pub key: MetricKey,
    pub expr: ThresholdExpr,
}

impl Threshold {
    pub fn parse(metric_key: &str, expression: &str) -> Result<Self, ThresholdParseError> {
        let key: MetricKey = metric_key.parse()?;
        let expr: ThresholdExpr = expression.parse()?;

        if !key.metric.supports(expr.aggregation) {
            return Err(ThresholdParseError::UnsupportedAggregation {
                metric: key.metric.name().to_string(),
                kind: key.metric.kind(),
                aggregation: expr.aggregation.to_string(),
            });
        }

        Ok(Self {
            key_source: metric_key.trim().to_string(),
            key,
            expr,
        })
    }

    /// The aggregated value of this threshold's metric in `snapshot`.
    ///
    /// A tagged threshold reads the metrics kept for its filter, which the store only has when it
    /// was built with [Threshold::filters] of this threshold. Otherwise nothing matched.
    pub fn observe(&self, snapshot: &MetricsSnapshot) -> f64 {
        let untracked = Metrics::default();
        let metrics = match &self.key.filter {
            Some(filter) => snapshot.scoped(filter).unwrap_or_else(|| {
                log::warn!("No metrics were kept for {}", self.key_source);
                &untracked
            }),
            None => &snapshot.totals,
        };

        match (metrics.metric(self.key.metric), self.expr.aggregation) {
            (MetricValue::Counter(count), _) => count as f64,
            (MetricValue::Rate(rate), _) => rate.rate,
            (MetricValue::Trend(trend), Aggregation::Count) => trend.count() as f64,
            (MetricValue::Trend(trend), Aggregation::Avg) => trend.avg(),
            (MetricValue::Trend(trend), Aggregation::Min) => trend.min(),
            (MetricValue::Trend(trend), Aggregation::Max) => trend.max(),
            (MetricValue::Trend(trend), Aggregation::Med) => trend.med(),
            (MetricValue::Trend(trend), Aggregation::Percentile(p)) => trend.percentile(p),
            // Rejected by `Threshold::parse`
            (MetricValue::Trend(_), Aggregation::Rate) => 0.0,
        }
    }

    /// The tag filters a [MetricsStore](crate::MetricsStore) must track to evaluate `thresholds`.
    pub fn filters<'a>(thresholds: impl IntoIterator<Item = &'a Threshold>) -> Vec<TagFilter> {
        thresholds
            .into_iter()
            .filter_map(|t| t.key.filter.clone())
            .collect()
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdSummary {
        let observed = self.observe(snapshot);

        ThresholdSummary {
            metric: self.key_source.clone(),
            expression: self.expr.source().to_string(),
            observed,
            passed: self.expr.comparison.holds(observed, self.expr.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsStore;
    use crate::sample::{RequestSample, SampleTags};
    use std::time::{Duration, SystemTime};

    fn request(scenario: &str, duration_ms: u64, failed: bool) -> RequestSample {
        RequestSample {
            method: "GET".to_string(),
            url: "http://localhost/items".to_string(),
            name: "/items".to_string(),
            status: if failed { 500 } else { 200 },
            duration: Duration::from_millis(duration_ms),
            timestamp: SystemTime::now(),
            failed,
            error: None,
            tags: SampleTags::new(scenario, 1),
        }
    }

    fn snapshot_of(thresholds: &[&Threshold], requests: &[RequestSample]) -> MetricsSnapshot {
        let store = MetricsStore::with_filters(Threshold::filters(thresholds.iter().copied()));
        for request in requests {
            store.push_request(request);
        }
        store.snapshot()
    }

    fn snapshot_with_failures(failed: usize, total: usize) -> MetricsSnapshot {
        let requests = (0..total)
            .map(|i| request("s", 10, i < failed))
            .collect::<Vec<_>>();
        snapshot_of(&[], &requests)
    }

    #[test]
    fn parse_rate_expression() {
        let expr: ThresholdExpr = "rate<0.01".parse().unwrap();
        assert_eq!(Aggregation::Rate, expr.aggregation);
        assert_eq!(Comparison::Lt, expr.comparison);
        assert_eq!(0.01, expr.value);
    }

    #[test]
    fn parse_percentile_expression() {
        let expr: ThresholdExpr = " p(95) <= 1500 ".parse().unwrap();
        assert_eq!(Aggregation::Percentile(95.0), expr.aggregation);
        assert_eq!(Comparison::Le, expr.comparison);
        assert_eq!(1500.0, expr.value);
        assert_eq!("p(95) <= 1500", expr.source());

        let expr: ThresholdExpr = "p(99.9)!=0".parse().unwrap();
        assert_eq!(Aggregation::Percentile(99.9), expr.aggregation);
        assert_eq!(Comparison::Ne, expr.comparison);
    }

    #[test]
    fn reject_bad_expressions() {
        assert_eq!(Err(ThresholdParseError::Empty), "".parse::<ThresholdExpr>());
        assert!(matches!(
            "rate 0.01".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::MissingOperator(_))
        ));
        assert!(matches!(
            "mean<3".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::UnknownAggregation(_))
        ));
        assert!(matches!(
            "p(101)<3".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::InvalidPercentile(_))
        ));
        assert!(matches!(
            "avg<fast".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::InvalidValue(_))
        ));
    }

    #[test]
    fn reject_aggregation_the_metric_does_not_support() {
        assert!(matches!(
            Threshold::parse("http_req_failed", "p(95)<1"),
            Err(ThresholdParseError::UnsupportedAggregation { .. })
        ));
        assert!(matches!(
            Threshold::parse("http_req_duration", "rate<1"),
            Err(ThresholdParseError::UnsupportedAggregation { .. })
        ));
        assert!(matches!(
            Threshold::parse("bogus", "rate<1"),
            Err(ThresholdParseError::UnknownMetric(_))
        ));
    }

    #[test]
    fn parse_tagged_metric_key() {
        let key: MetricKey = "http_req_duration{scenario:update_prices}".parse().unwrap();
        assert_eq!(BuiltinMetric::HttpReqDuration, key.metric);
        assert_eq!(
            Some(TagFilter::Scenario("update_prices".to_string())),
            key.filter
        );

        assert!(matches!(
            "checks{colour:red}".parse::<MetricKey>(),
            Err(ThresholdParseError::UnknownTag(_))
        ));
        assert!(matches!(
            "checks{name".parse::<MetricKey>(),
            Err(ThresholdParseError::InvalidMetricKey(_))
        ));
    }

    #[test]
    fn failure_rate_threshold_one_in_two_hundred_passes() {
        let threshold = Threshold::parse("http_req_failed", "rate<0.01").unwrap();
        let result = threshold.evaluate(&snapshot_with_failures(1, 200));
        assert!(result.passed);
        assert_eq!(0.005, result.observed);
    }

    #[test]
    fn failure_rate_threshold_one_in_fifty_fails() {
        let threshold = Threshold::parse("http_req_failed", "rate<0.01").unwrap();
        let result = threshold.evaluate(&snapshot_with_failures(1, 50));
        assert!(!result.passed);
        assert_eq!(0.02, result.observed);
    }

    #[test]
    fn failure_rate_threshold_with_no_requests_passes() {
        let threshold = Threshold::parse("http_req_failed", "rate<0.01").unwrap();
        assert!(threshold.evaluate(&MetricsSnapshot::default()).passed);
    }

    #[test]
    fn duration_percentile_threshold() {
        let threshold = Threshold::parse("http_req_duration", "p(95)<1500").unwrap();

        let fast = (1..=100)
            .map(|i| request("s", i * 10, false))
            .collect::<Vec<_>>();
        assert!(threshold.evaluate(&snapshot_of(&[], &fast)).passed);

        let slow = (1..=100)
            .map(|i| request("s", i * 20, false))
            .collect::<Vec<_>>();
        let result = threshold.evaluate(&snapshot_of(&[], &slow));
        assert!(!result.passed);
        assert!(result.observed > 1500.0);
    }

    #[test]
    fn tagged_threshold_only_sees_its_scenario() {
        let fast = Threshold::parse("http_req_failed{scenario:fast}", "rate==0").unwrap();
        let slow = Threshold::parse("http_req_duration{scenario:slow}", "max<1000").unwrap();
        let snapshot = snapshot_of(
            &[&fast, &slow],
            &[
                request("fast", 10, false),
                request("fast", 10, false),
                request("slow", 5000, true),
            ],
        );

        assert!(fast.evaluate(&snapshot).passed);

        let result = slow.evaluate(&snapshot);
        assert!(!result.passed);
        assert_eq!("http_req_duration{scenario:slow}", result.metric);
    }

    #[test]
    fn untracked_filter_sees_nothing() {
        let threshold = Threshold::parse("http_reqs{scenario:s}", "count>0").unwrap();
        let snapshot = snapshot_of(&[], &[request("s", 10, false)]);

        let result = threshold.evaluate(&snapshot);
        assert_eq!(0.0, result.observed);
        assert!(!result.passed);
    }
}
