use std::ops::RangeInclusive;

/// The statuses that count as a successful response when none are set on [RequestParams].
pub const DEFAULT_EXPECTED_STATUSES: RangeInclusive<u16> = 200..=399;

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    /// The name requests are aggregated under. Set this to a template such as
    /// `/items/{id}/status` for URLs that embed IDs. Defaults to the full URL.
    pub name: Option<String>,
    pub headers: Vec<(String, String)>,
    expected_statuses: Vec<RangeInclusive<u16>>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Count `status` as a successful response. Replaces the default of `200..=399` the first
    /// time it is called.
    pub fn expect_status(self, status: u16) -> Self {
        self.expect_statuses(status..=status)
    }

    pub fn expect_statuses(mut self, statuses: RangeInclusive<u16>) -> Self {
        self.expected_statuses.push(statuses);
        self
    }

    /// Whether a response with `status` should count towards `http_req_failed`.
    ///
    /// Status 0 means no response was received and is always a failure.
    pub fn is_failure(&self, status: u16) -> bool {
        if status == 0 {
            return true;
        }

        if self.expected_statuses.is_empty() {
            !DEFAULT_EXPECTED_STATUSES.contains(&status)
        } else {
            !self.expected_statuses.iter().any(|r| r.contains(&status))
        }
    }
}
