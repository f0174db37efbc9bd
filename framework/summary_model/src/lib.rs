use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the run definition, usually the scenario binary's package name
    pub run_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The wall-clock time the run took, in milliseconds
    pub elapsed_ms: u64,
    /// The longest planned runtime across all scenarios, in seconds
    ///
    /// Not set if any scenario is bounded by iterations only.
    pub planned_duration: Option<u64>,
    /// Per-scenario outcome, keyed by scenario name
    pub scenarios: BTreeMap<String, ScenarioSummary>,
    /// The built-in metrics aggregated over every virtual user
    pub metrics: MetricsSummary,
    /// One entry per distinct check name and group
    pub checks: Vec<CheckSummary>,
    /// One entry per configured threshold expression
    pub thresholds: Vec<ThresholdSummary>,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the runner is aware of or
    /// that are included by the scenario itself.
    pub env: HashMap<String, String>,
    /// The version of Gale that was used for this run
    pub gale_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSummary {
    /// The executor kind, as written in the run descriptor
    pub executor: String,
    /// The name of the entry function the scenario ran
    pub exec: String,
    /// The largest population the scenario reached
    pub peak_vus: u64,
    /// How many virtual users were started over the lifetime of the scenario
    pub vus_started: u64,
    pub iterations_completed: u64,
    pub iterations_failed: u64,
    /// Iterations cancelled by a graceful stop timeout, a hard timeout or an interrupt
    pub iterations_interrupted: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    pub http_reqs: u64,
    pub http_req_failed: RateSummary,
    pub http_req_duration: TrendSummary,
    pub checks: RateSummary,
    pub iterations: u64,
    pub iteration_duration: TrendSummary,
}

/// A rate metric. `matches` counts the events the rate is about, so for `http_req_failed` it is
/// the number of failed requests and for `checks` the number of passed checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RateSummary {
    pub matches: u64,
    pub total: u64,
    pub rate: f64,
}

impl RateSummary {
    pub fn new(matches: u64, total: u64) -> Self {
        let rate = if total == 0 {
            0.0
        } else {
            matches as f64 / total as f64
        };

        Self {
            matches,
            total,
            rate,
        }
    }
}

/// Distribution of a timing metric, all values in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrendSummary {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckSummary {
    pub name: String,
    /// The group path the check was made in, empty at the top level
    pub group: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdSummary {
    pub metric: String,
    pub expression: String,
    /// The aggregated value the expression was evaluated against
    pub observed: f64,
    pub passed: bool,
}

impl RunSummary {
    /// Create a new run summary
    pub fn new(
        run_id: String,
        run_name: String,
        started_at: i64,
        planned_duration: Option<u64>,
        gale_version: String,
    ) -> Self {
        Self {
            run_id,
            run_name,
            started_at,
            elapsed_ms: 0,
            planned_duration,
            scenarios: BTreeMap::new(),
            metrics: MetricsSummary::default(),
            checks: Vec::new(),
            thresholds: Vec::new(),
            env: HashMap::with_capacity(0),
            gale_version,
        }
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// True when every configured threshold passed, including when none were configured.
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    /// The thresholds that did not pass
    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdSummary> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used for the run.
    /// It uses the
    ///     - Run name
    ///     - Planned duration
    ///     - Scenario names, executors and entry functions
    ///     - Threshold expressions
    ///     - Selected environment variables
    ///     - Gale version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.run_name.as_bytes());
        if let Some(planned_duration) = self.planned_duration {
            Digest::update(&mut hasher, planned_duration.to_le_bytes());
        }
        // BTreeMap iterates in key order already
        for (name, scenario) in &self.scenarios {
            Digest::update(&mut hasher, name.as_bytes());
            Digest::update(&mut hasher, scenario.executor.as_bytes());
            Digest::update(&mut hasher, scenario.exec.as_bytes());
        }
        self.thresholds
            .iter()
            .sorted_by(|a, b| (&a.metric, &a.expression).cmp(&(&b.metric, &b.expression)))
            .for_each(|t| {
                Digest::update(&mut hasher, t.metric.as_bytes());
                Digest::update(&mut hasher, t.expression.as_bytes());
            });
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.gale_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: PathBuf) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: PathBuf) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}
