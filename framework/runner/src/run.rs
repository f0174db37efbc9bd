use std::fmt::Write;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use gale_instruments::{ReportConfig, Threshold};
use gale_summary_model::{append_run_summary, RunSummary, ScenarioSummary};

use crate::cli::ReporterOpt;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::scheduler::{run_scenario, ScenarioTask};
use crate::shutdown::{start_hard_timeout, start_shutdown_listener};
use crate::{
    context::{RunnerContext, UserValuesConstraint},
    definition::ScenarioDefinitionBuilder,
    executor::Executor,
};

/// Exit status for a run in which at least one threshold failed.
pub const THRESHOLDS_FAILED_EXIT_CODE: i32 = 99;

/// The result of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
}

impl RunOutcome {
    /// 0 if every threshold passed, [THRESHOLDS_FAILED_EXIT_CODE] otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.summary.thresholds_passed() {
            0
        } else {
            THRESHOLDS_FAILED_EXIT_CODE
        }
    }
}

pub fn run<RV: UserValuesConstraint, V: UserValuesConstraint>(
    definition: ScenarioDefinitionBuilder<RV, V>,
) -> anyhow::Result<RunOutcome> {
    let definition = definition.build()?;

    log::info!("Running scenario: {}", definition.name);

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(worker_threads) = definition.cli.worker_threads {
        runtime_builder.worker_threads(worker_threads.max(1));
    }
    let runtime = runtime_builder
        .build()
        .context("Failed to create Tokio runtime")?;

    let shutdown_handle = start_shutdown_listener(&runtime);

    let run_id = definition
        .cli
        .run_id
        .clone()
        .unwrap_or_else(|| nanoid::nanoid!());
    log::info!("Run id: {}", run_id);

    let mut report_config = ReportConfig::new(run_id.clone(), definition.name.clone());
    match definition.cli.reporter {
        ReporterOpt::Noop => {}
        ReporterOpt::InMemory => report_config = report_config.enable_in_memory(),
        ReporterOpt::InfluxFile => {
            report_config = report_config.enable_influx_file(definition.cli.metrics_dir.clone())
        }
    }
    let reporter = Arc::new(
        report_config
            .track(Threshold::filters(&definition.thresholds))
            .init(runtime.handle()),
    );

    let executor = Arc::new(Executor::new(runtime, shutdown_handle.clone()));
    let mut runner_context = RunnerContext::new(
        executor.clone(),
        reporter.clone(),
        shutdown_handle.clone(),
        definition.cli.api_url.clone(),
        run_id.clone(),
    );

    if let Some(setup_fn) = &definition.setup_fn {
        setup_fn(&mut runner_context)?;
    }

    let planned_duration = definition.descriptor.planned_duration();

    if let Some(hard_timeout) = definition.cli.hard_timeout {
        start_hard_timeout(executor.handle(), shutdown_handle.clone(), hard_timeout);
    }

    if let Some(planned_duration) = planned_duration {
        if !definition.cli.no_progress {
            start_progress(planned_duration, shutdown_handle.new_listener())?;
        }
    }

    // Ready to start spawning virtual users so start the resource monitor to report high usage by
    // the generator, which would inflate the measured timings.
    start_monitor(shutdown_handle.new_listener())?;

    let started_at = chrono::Utc::now().timestamp();
    let run_started = Instant::now();
    let runner_context = Arc::new(runner_context);
    let vu_ids = Arc::new(AtomicU64::new(1));

    let mut tasks = Vec::with_capacity(definition.descriptor.scenarios.len());
    for (name, config) in &definition.descriptor.scenarios {
        // Checked when the definition was built
        let Some(entry) = definition.entry_fns.get(&config.exec).copied() else {
            anyhow::bail!("No entry function named [{}]", config.exec);
        };

        tasks.push(ScenarioTask {
            name: Arc::from(name.as_str()),
            config: config.clone(),
            entry,
            runner_context: runner_context.clone(),
            shutdown_handle: shutdown_handle.clone(),
            vu_ids: vu_ids.clone(),
        });
    }

    let scenario_stats = executor.block_on(async move {
        let handles = tasks
            .into_iter()
            .map(|task| {
                let name = task.name.to_string();
                (name, tokio::spawn(run_scenario(task)))
            })
            .collect::<Vec<_>>();

        let mut stats = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(s) => stats.push((name, s)),
                Err(e) => {
                    log::error!("Scenario {} controller failed: {:?}", name, e);
                    stats.push((name, Default::default()));
                }
            }
        }
        stats
    });

    let elapsed = run_started.elapsed();
    log::info!("All scenarios finished after {:?}", elapsed);

    // Stops the progress bar and the monitor
    shutdown_handle.shutdown();

    if let Some(teardown_fn) = definition.teardown_fn {
        // Don't crash the runner if the teardown fails. We still want the reporting and runner
        // shutdown to happen cleanly. The hook is documented as 'best effort'
        if let Err(e) = teardown_fn(runner_context.clone()) {
            log::error!("Teardown failed: {:?}", e);
        }
    }

    reporter.finalize();

    let snapshot = reporter.snapshot();
    let mut summary = RunSummary::new(
        run_id,
        definition.name.clone(),
        started_at,
        planned_duration.map(|d| d.as_secs()),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    summary.elapsed_ms = elapsed.as_millis() as u64;

    for (name, stats) in scenario_stats {
        let Some(config) = definition.descriptor.scenarios.get(&name) else {
            continue;
        };
        let iterations = snapshot.iterations_of(&name);

        summary.scenarios.insert(
            name.clone(),
            ScenarioSummary {
                executor: config.executor.name().to_string(),
                exec: config.exec.clone(),
                peak_vus: stats.peak_vus,
                vus_started: stats.vus_started,
                iterations_completed: iterations.completed,
                iterations_failed: iterations.failed,
                iterations_interrupted: iterations.interrupted,
            },
        );
    }

    summary.metrics = snapshot.summarize();
    summary.checks = snapshot.checks.clone();
    summary.thresholds = definition
        .thresholds
        .iter()
        .map(|t| t.evaluate(&snapshot))
        .collect();

    if let Some(api_url) = &definition.cli.api_url {
        summary.add_env("API_URL".to_string(), api_url.clone());
    }

    print_summary(&summary);

    if let Some(summary_path) = &definition.cli.summary_path {
        append_run_summary(&summary, summary_path.clone())
            .with_context(|| format!("Failed to write run summary to {}", summary_path.display()))?;
    }

    Ok(RunOutcome { summary })
}

fn print_summary(summary: &RunSummary) {
    print!("{}", render_summary(summary));
}

fn render_summary(summary: &RunSummary) -> String {
    let metrics = &summary.metrics;
    let mut out = String::new();

    // Writing to a String can't fail
    let _ = writeln!(
        out,
        "\nRun {} finished in {} ms",
        summary.run_id, summary.elapsed_ms
    );
    // Runs with the same fingerprint used the same configuration and can be compared
    let _ = writeln!(out, "  fingerprint: {}", summary.fingerprint());
    let _ = writeln!(
        out,
        "  http_reqs: {}, failed: {:.2}%, p(95): {:.2} ms",
        metrics.http_reqs,
        metrics.http_req_failed.rate * 100.0,
        metrics.http_req_duration.p95
    );
    let _ = writeln!(
        out,
        "  iterations: {}, checks passed: {}/{}",
        metrics.iterations, metrics.checks.matches, metrics.checks.total
    );

    for check in summary.checks.iter().filter(|c| c.fails > 0) {
        let _ = writeln!(
            out,
            "  check failed {} times: [{}] {}",
            check.fails, check.group, check.name
        );
    }

    for threshold in &summary.thresholds {
        let _ = writeln!(
            out,
            "  {} {}: {} {}",
            if threshold.passed { "✓" } else { "✗" },
            threshold.metric,
            threshold.expression,
            threshold.observed
        );
    }

    out
}
