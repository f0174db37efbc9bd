use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct GaleScenarioCli {
    /// The base URL of the API under test, for example `http://localhost:8080`.
    ///
    /// If this is not set then entry functions will return immediately without making requests.
    #[clap(short, long, env = "API_URL")]
    pub api_url: Option<String>,

    /// Load the run descriptor from a YAML or TOML file instead of using the scenario's built-in
    /// default. The format is chosen by the file extension, `.toml` or otherwise YAML.
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// Where to send metrics in addition to the run summary.
    #[clap(long, value_enum, default_value_t = ReporterOpt::InMemory)]
    pub reporter: ReporterOpt,

    /// Override the generated run id. Useful when several generators are part of one test.
    #[clap(long)]
    pub run_id: Option<String>,

    /// Stop the run after this long, cancelling any iterations that are still running.
    /// Accepts human readable durations such as `10m` or `1h30m`.
    #[clap(long, value_parser = humantime::parse_duration)]
    pub hard_timeout: Option<Duration>,

    /// The number of Tokio worker threads that virtual users are multiplexed onto.
    /// Defaults to the number of CPU cores.
    #[clap(long)]
    pub worker_threads: Option<usize>,

    /// Append the run summary to this file as a JSON line.
    #[clap(long)]
    pub summary_path: Option<PathBuf>,

    /// The directory that the `influx-file` reporter writes to.
    #[clap(long, default_value = "metrics")]
    pub metrics_dir: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReporterOpt {
    /// Only build the run summary
    Noop,
    /// Also print a table of request timings at the end of the run
    #[default]
    InMemory,
    /// Also write every record to a file in InfluxDB line protocol
    InfluxFile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_command_line() {
        let cli = GaleScenarioCli::try_parse_from([
            "trade_lifecycle",
            "--api-url",
            "http://localhost:8080",
            "--reporter",
            "influx-file",
            "--hard-timeout",
            "1m30s",
            "--worker-threads",
            "4",
            "--no-progress",
        ])
        .unwrap();

        assert_eq!(Some("http://localhost:8080".to_string()), cli.api_url);
        assert_eq!(ReporterOpt::InfluxFile, cli.reporter);
        assert_eq!(Some(Duration::from_secs(90)), cli.hard_timeout);
        assert_eq!(Some(4), cli.worker_threads);
        assert!(cli.no_progress);
        assert_eq!(PathBuf::from("metrics"), cli.metrics_dir);
    }

    #[test]
    fn reject_bad_hard_timeout() {
        assert!(GaleScenarioCli::try_parse_from(["trade_lifecycle", "--hard-timeout", "soon"]).is_err());
    }
}
