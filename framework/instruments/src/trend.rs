use gale_summary_model::TrendSummary;
use hdrhistogram::Histogram;
use std::time::Duration;

/// Precision of every timing histogram, values are kept to within 0.1%.
const SIGNIFICANT_FIGURES: u8 = 3;

/// A distribution of timings, recorded in microseconds and reported in milliseconds.
///
/// Backed by an auto-resizing [Histogram] so memory use depends on the spread of the values, not
/// on how many were recorded.
#[derive(Debug, Clone)]
pub struct Trend {
    histogram: Histogram<u64>,
}

impl Default for Trend {
    fn default() -> Self {
        let mut histogram =
            Histogram::<u64>::new(SIGNIFICANT_FIGURES).expect("3 sigfigs is always valid");
        histogram.auto(true);

        Self { histogram }
    }
}

impl Trend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_durations(durations: impl IntoIterator<Item = Duration>) -> Self {
        let mut trend = Self::new();
        for duration in durations {
            trend.record(duration);
        }
        trend
    }

    pub fn record(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.histogram.saturating_record(micros);
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    pub fn avg(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.histogram.mean() / 1000.0
    }

    pub fn min(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        to_millis(self.histogram.min())
    }

    pub fn max(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        to_millis(self.histogram.max())
    }

    pub fn med(&self) -> f64 {
        self.percentile(50.0)
    }

    /// The value at percentile `p`, clamped to `0..=100`. An empty trend yields 0.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        to_millis(self.histogram.value_at_quantile(p.clamp(0.0, 100.0) / 100.0))
    }

    pub fn summary(&self) -> TrendSummary {
        TrendSummary {
            count: self.count(),
            avg: self.avg(),
            min: self.min(),
            med: self.med(),
            max: self.max(),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
        }
    }
}

fn to_millis(micros: u64) -> f64 {
    micros as f64 / 1000.0
}

#[cfg(test)]
pub(crate) fn assert_close(expected: f64, actual: f64) {
    assert!(
        (expected - actual).abs() <= expected.abs() * 0.01,
        "expected {expected} within 1%, got {actual}"
    );
}
