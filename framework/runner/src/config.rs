use anyhow::Context;
use gale_instruments::Threshold;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// The scenarios to run and the thresholds to evaluate once they have finished.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunDescriptor {
    pub scenarios: BTreeMap<String, ScenarioConfig>,
    /// Threshold expressions keyed by metric, for example `http_req_duration: ["p(95)<1500"]`
    /// or `http_req_failed{scenario:error_conditions}: "rate<0.5"`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprs>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ThresholdExprs {
    One(String),
    Many(Vec<String>),
}

impl ThresholdExprs {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            ThresholdExprs::One(expr) => std::slice::from_ref(expr).iter(),
            ThresholdExprs::Many(exprs) => exprs.iter(),
        }
        .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioConfig {
    #[serde(flatten)]
    pub executor: ExecutorConfig,
    /// The name of the entry function registered on the scenario definition
    pub exec: String,
    /// Delay from the start of the run before this scenario starts
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub start_time: Duration,
    /// How long to wait for in-flight iterations once the scenario ends. Iterations still running
    /// after this are cancelled. Waits indefinitely if not set.
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub graceful_stop: Option<Duration>,
    /// An upper bound on how long the scenario may run, mainly for `per-vu-iterations`
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub max_duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "executor", rename_all = "kebab-case")]
pub enum ExecutorConfig {
    /// Ramp the number of virtual users through a list of stages
    #[serde(alias = "ramping_vus")]
    RampingVus {
        #[serde(default)]
        start_vus: u64,
        stages: Vec<Stage>,
    },
    /// A fixed number of virtual users iterating for a fixed time
    #[serde(alias = "constant_vus")]
    ConstantVus {
        vus: u64,
        #[serde(deserialize_with = "deserialize_duration")]
        duration: Duration,
    },
    /// A fixed number of virtual users, each running a fixed number of iterations
    #[serde(alias = "per_vu_iterations")]
    PerVuIterations { vus: u64, iterations: u64 },
}

impl ExecutorConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutorConfig::RampingVus { .. } => "ramping-vus",
            ExecutorConfig::ConstantVus { .. } => "constant-vus",
            ExecutorConfig::PerVuIterations { .. } => "per-vu-iterations",
        }
    }

    /// The most virtual users this executor will ever run at once.
    pub fn max_vus(&self) -> u64 {
        match self {
            ExecutorConfig::RampingVus { start_vus, stages } => stages
                .iter()
                .map(|s| s.target)
                .max()
                .unwrap_or_default()
                .max(*start_vus),
            ExecutorConfig::ConstantVus { vus, .. } => *vus,
            ExecutorConfig::PerVuIterations { vus, .. } => *vus,
        }
    }
}

/// Move linearly from the previous target to `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Stage {
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    pub target: u64,
}

impl ScenarioConfig {
    /// How long the scenario is planned to run for, not counting its start time or any graceful
    /// stop. `None` for scenarios that are only bounded by iterations.
    pub fn planned_duration(&self) -> Option<Duration> {
        let executor_duration = match &self.executor {
            ExecutorConfig::RampingVus { stages, .. } => {
                Some(stages.iter().map(|s| s.duration).sum())
            }
            ExecutorConfig::ConstantVus { duration, .. } => Some(*duration),
            ExecutorConfig::PerVuIterations { .. } => None,
        };

        match (executor_duration, self.max_duration) {
            (Some(d), Some(max)) => Some(d.min(max)),
            (d, max) => d.or(max),
        }
    }
}

impl RunDescriptor {
    pub fn from_yaml_str(input: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(input).context("Invalid YAML run descriptor")
    }

    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        toml::from_str(input).context("Invalid TOML run descriptor")
    }

    /// Load a descriptor from `path`, choosing the format by file extension.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read run descriptor {}", path.display()))?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
        .with_context(|| format!("Failed to load run descriptor {}", path.display()))
    }

    /// Check that every scenario can be scheduled with the registered entry functions and parse
    /// the threshold expressions.
    pub fn validate<'a>(
        &self,
        known_exec: impl IntoIterator<Item = &'a str> + Clone,
    ) -> anyhow::Result<Vec<Threshold>> {
        if self.scenarios.is_empty() {
            anyhow::bail!("The run descriptor must define at least one scenario");
        }

        for (name, scenario) in &self.scenarios {
            if !known_exec.clone().into_iter().any(|e| e == scenario.exec) {
                anyhow::bail!(
                    "Scenario [{}] uses exec [{}] which is not a registered entry function. Known entry functions: {:?}",
                    name,
                    scenario.exec,
                    known_exec.clone().into_iter().collect::<Vec<_>>()
                );
            }

            match &scenario.executor {
                ExecutorConfig::RampingVus { stages, .. } => {
                    if stages.is_empty() {
                        anyhow::bail!("Scenario [{}] must define at least one stage", name);
                    }
                }
                ExecutorConfig::ConstantVus { vus, duration } => {
                    if *vus == 0 {
                        anyhow::bail!("Scenario [{}] must have at least one VU", name);
                    }
                    if duration.is_zero() {
                        anyhow::bail!("Scenario [{}] must have a non-zero duration", name);
                    }
                }
                ExecutorConfig::PerVuIterations { vus, iterations } => {
                    if *vus == 0 {
                        anyhow::bail!("Scenario [{}] must have at least one VU", name);
                    }
                    if *iterations == 0 {
                        anyhow::bail!("Scenario [{}] must run at least one iteration", name);
                    }
                }
            }
        }

        let mut thresholds = Vec::new();
        for (metric, exprs) in &self.thresholds {
            for expr in exprs.iter() {
                thresholds.push(
                    Threshold::parse(metric, expr)
                        .with_context(|| format!("Invalid threshold for [{metric}]"))?,
                );
            }
        }

        Ok(thresholds)
    }

    /// The time from the start of the run until the last scenario is planned to end.
    ///
    /// `None` if any scenario is bounded by iterations only.
    pub fn planned_duration(&self) -> Option<Duration> {
        self.scenarios
            .values()
            .map(|s| s.planned_duration().map(|d| s.start_time + d))
            .try_fold(Duration::ZERO, |acc, d| d.map(|d| acc.max(d)))
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(HumanDurationVisitor)
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(HumanDurationVisitor).map(Some)
}

/// Accepts `30s`, `1m30s` and friends, or a bare number of seconds.
struct HumanDurationVisitor;

impl serde::de::Visitor<'_> for HumanDurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a duration such as `30s` or `1m30s`, or a number of seconds")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        humantime::parse_duration(v.trim()).map_err(E::custom)
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::custom("duration must not be negative"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const YAML: &str = r#"
scenarios:
  full_trade_lifecycle:
    executor: ramping-vus
    exec: full_trade_lifecycle
    start_vus: 0
    stages:
      - duration: 30s
        target: 20
      - duration: 1m
        target: 20
      - duration: 10s
        target: 0
  update_prices:
    executor: constant-vus
    exec: update_prices
    vus: 5
    duration: 1m30s
    start_time: 30s
  error_conditions:
    executor: per-vu-iterations
    exec: error_conditions
    vus: 3
    iterations: 5
    start_time: 40s
    graceful_stop: 10s
thresholds:
  http_req_failed: rate<0.01
  http_req_duration:
    - p(95)<1500
"#;

    const EXEC: [&str; 3] = ["full_trade_lifecycle", "update_prices", "error_conditions"];

    #[test]
    fn parse_yaml_descriptor() {
        let descriptor = RunDescriptor::from_yaml_str(YAML).unwrap();

        assert_eq!(3, descriptor.scenarios.len());
        assert_eq!(
            ExecutorConfig::RampingVus {
                start_vus: 0,
                stages: vec![
                    Stage {
                        duration: Duration::from_secs(30),
                        target: 20
                    },
                    Stage {
                        duration: Duration::from_secs(60),
                        target: 20
                    },
                    Stage {
                        duration: Duration::from_secs(10),
                        target: 0
                    },
                ],
            },
            descriptor.scenarios["full_trade_lifecycle"].executor
        );

        let update_prices = &descriptor.scenarios["update_prices"];
        assert_eq!(Duration::from_secs(30), update_prices.start_time);
        assert_eq!(
            ExecutorConfig::ConstantVus {
                vus: 5,
                duration: Duration::from_secs(90)
            },
            update_prices.executor
        );

        let error_conditions = &descriptor.scenarios["error_conditions"];
        assert_eq!(Some(Duration::from_secs(10)), error_conditions.graceful_stop);
        assert_eq!(None, error_conditions.max_duration);

        let thresholds = descriptor.validate(EXEC).unwrap();
        assert_eq!(2, thresholds.len());
    }

    #[test]
    fn parse_toml_descriptor() {
        let descriptor = RunDescriptor::from_toml_str(
            r#"
[scenarios.smoke]
executor = "per_vu_iterations"
exec = "full_trade_lifecycle"
vus = 1
iterations = 1
max_duration = 30

[thresholds]
checks = ["rate>0.99"]
"#,
        )
        .unwrap();

        let smoke = &descriptor.scenarios["smoke"];
        assert_eq!(
            ExecutorConfig::PerVuIterations {
                vus: 1,
                iterations: 1
            },
            smoke.executor
        );
        assert_eq!(Some(Duration::from_secs(30)), smoke.max_duration);
        assert_eq!(Some(Duration::from_secs(30)), descriptor.planned_duration());
        assert_eq!(1, descriptor.validate(EXEC).unwrap().len());
    }

    #[test]
    fn planned_duration_is_latest_scenario_end() {
        let descriptor = RunDescriptor::from_yaml_str(YAML).unwrap();
        // error_conditions has no time bound
        assert_eq!(None, descriptor.planned_duration());

        let mut descriptor = descriptor;
        descriptor.scenarios.remove("error_conditions");
        // update_prices starts at 30s and runs for 90s
        assert_eq!(Some(Duration::from_secs(120)), descriptor.planned_duration());
    }

    #[test]
    fn reject_unknown_exec() {
        let descriptor = RunDescriptor::from_yaml_str(YAML).unwrap();
        let err = descriptor
            .validate(["full_trade_lifecycle", "update_prices"])
            .unwrap_err();
        assert!(err.to_string().contains("error_conditions"));
    }

    #[test]
    fn reject_empty_stages() {
        let descriptor = RunDescriptor::from_yaml_str(
            r#"
scenarios:
  ramp:
    executor: ramping-vus
    exec: full_trade_lifecycle
    stages: []
"#,
        )
        .unwrap();
        assert!(descriptor.validate(EXEC).is_err());
    }

    #[test]
    fn reject_zero_vus() {
        let descriptor = RunDescriptor::from_yaml_str(
            r#"
scenarios:
  constant:
    executor: constant-vus
    exec: update_prices
    vus: 0
    duration: 10s
"#,
        )
        .unwrap();
        assert!(descriptor.validate(EXEC).is_err());
    }

    #[test]
    fn reject_no_scenarios() {
        let descriptor = RunDescriptor::from_yaml_str("scenarios: {}").unwrap();
        assert!(descriptor.validate(EXEC).is_err());
    }

    #[test]
    fn reject_bad_threshold() {
        let descriptor = RunDescriptor::from_yaml_str(
            r#"
scenarios:
  smoke:
    executor: per-vu-iterations
    exec: full_trade_lifecycle
    vus: 1
    iterations: 1
thresholds:
  http_req_duration: "rate<0.1"
"#,
        )
        .unwrap();
        let err = descriptor.validate(EXEC).unwrap_err();
        assert!(format!("{err:#}").contains("http_req_duration"));
    }

    #[test]
    fn reject_unknown_executor() {
        assert!(RunDescriptor::from_yaml_str(
            r#"
scenarios:
  smoke:
    executor: shared-iterations
    exec: full_trade_lifecycle
    vus: 1
    iterations: 1
"#,
        )
        .is_err());
    }

    #[test]
    fn load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, YAML).unwrap();

        let descriptor = RunDescriptor::load(&path).unwrap();
        assert_eq!(3, descriptor.scenarios.len());

        assert!(RunDescriptor::load(&dir.path().join("missing.yaml")).is_err());
    }
}
