use std::time::{Duration, SystemTime};

/// Attribution attached to every record a virtual user produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleTags {
    pub scenario: String,
    /// The group path, `::` separated. Empty outside of any group.
    pub group: String,
    pub vu_id: u64,
}

impl SampleTags {
    pub fn new(scenario: impl Into<String>, vu_id: u64) -> Self {
        Self {
            scenario: scenario.into(),
            group: String::new(),
            vu_id,
        }
    }
}

/// One HTTP request made by a virtual user.
#[derive(Debug, Clone)]
pub struct RequestSample {
    pub method: String,
    pub url: String,
    /// Name used to aggregate requests. Defaults to the URL, but scenarios should set a
    /// template such as `/items/{id}/status` for URLs that embed IDs.
    pub name: String,
    /// The response status, or 0 if no response was received
    pub status: u16,
    pub duration: Duration,
    pub timestamp: SystemTime,
    /// Whether this request counts towards `http_req_failed`
    pub failed: bool,
    pub error: Option<String>,
    pub tags: SampleTags,
}

/// The outcome of one named assertion.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub timestamp: SystemTime,
    pub tags: SampleTags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    /// The entry function returned an error
    Failed,
    /// The iteration was cancelled before it could finish
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub duration: Duration,
    pub outcome: IterationOutcome,
    pub timestamp: SystemTime,
    pub tags: SampleTags,
}
