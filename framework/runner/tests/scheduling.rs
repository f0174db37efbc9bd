use gale_runner::prelude::*;
use gale_summary_model::load_summary_runs;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default, Debug)]
struct RunnerContextValue {}

impl UserValuesConstraint for RunnerContextValue {}

#[derive(Default, Debug)]
struct VuContextValue {}

impl UserValuesConstraint for VuContextValue {}

type Ctx = VuContext<RunnerContextValue, VuContextValue>;
type Builder = ScenarioDefinitionBuilder<RunnerContextValue, VuContextValue>;

fn sample_cli_cfg() -> GaleScenarioCli {
    GaleScenarioCli {
        api_url: None,
        config: None,
        no_progress: true,
        reporter: ReporterOpt::Noop,
        run_id: None,
        hard_timeout: None,
        worker_threads: Some(4),
        summary_path: None,
        metrics_dir: "metrics".into(),
    }
}

fn descriptor(yaml: &str) -> RunDescriptor {
    RunDescriptor::from_yaml_str(yaml).unwrap()
}

#[test]
fn per_vu_iterations_runs_every_vu_exactly_k_times() {
    static INVOCATIONS: AtomicU64 = AtomicU64::new(0);

    fn count(_ctx: &mut Ctx) -> BoxFuture<'_, HookResult> {
        async move {
            INVOCATIONS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    let scenario = Builder::new("per_vu_iterations", sample_cli_cfg())
        .with_default_descriptor(descriptor(
            r#"
scenarios:
  counted:
    executor: per-vu-iterations
    exec: count
    vus: 3
    iterations: 4
"#,
        ))
        .use_named_behaviour("count", count);

    let outcome = run(scenario).unwrap();

    assert_eq!(12, INVOCATIONS.load(Ordering::SeqCst));
    let summary = &outcome.summary.scenarios["counted"];
    assert_eq!(12, summary.iterations_completed);
    assert_eq!(3, summary.vus_started);
    assert_eq!(3, summary.peak_vus);
}

#[test]
fn every_check_is_recorded() {
    fn one_check(ctx: &mut Ctx) -> BoxFuture<'_, HookResult> {
        async move {
            let vu_id = ctx.vu_id();
            ctx.check(&vu_id, &[("has a vu id", &|id: &u64| *id > 0)]);
            Ok(())
        }
        .boxed()
    }

    let scenario = Builder::new("every_check_is_recorded", sample_cli_cfg())
        .with_default_descriptor(descriptor(
            r#"
scenarios:
  checks:
    executor: per-vu-iterations
    exec: one_check
    vus: 25
    iterations: 1
"#,
        ))
        .use_named_behaviour("one_check", one_check);

    let outcome = run(scenario).unwrap();

    assert_eq!(25, outcome.summary.metrics.checks.total);
    assert_eq!(25, outcome.summary.metrics.checks.matches);
    assert_eq!(1, outcome.summary.checks.len());
    assert_eq!(25, outcome.summary.checks[0].passes);
}

#[test]
fn ramping_population_never_exceeds_target() {
    static ACTIVE: AtomicUsize = AtomicUsize::new(0);
    static MAX_ACTIVE: AtomicUsize = AtomicUsize::new(0);

    fn busy(ctx: &mut Ctx) -> BoxFuture<'_, HookResult> {
        async move {
            let active = ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
            MAX_ACTIVE.fetch_max(active, Ordering::SeqCst);
            ctx.sleep(Duration::from_millis(20)).await;
            ACTIVE.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    let scenario = Builder::new("ramping_population", sample_cli_cfg())
        .with_default_descriptor(descriptor(
            r#"
scenarios:
  ramp:
    executor: ramping-vus
    exec: busy
    stages:
      - duration: 500ms
        target: 4
      - duration: 300ms
        target: 4
      - duration: 500ms
        target: 0
"#,
        ))
        .use_named_behaviour("busy", busy);

    let outcome = run(scenario).unwrap();

    let max_active = MAX_ACTIVE.load(Ordering::SeqCst);
    assert!(max_active <= 4, "{max_active} VUs were active at once");
    assert!(max_active > 0);

    let summary = &outcome.summary.scenarios["ramp"];
    assert!(summary.peak_vus <= 4);
    assert!(summary.iterations_completed > 0);
    assert_eq!(0, summary.iterations_interrupted);
}

#[test]
fn graceful_stop_interrupts_long_iterations() {
    fn stuck(ctx: &mut Ctx) -> BoxFuture<'_, HookResult> {
        async move {
            ctx.sleep(Duration::from_secs(30)).await;
            Ok(())
        }
        .boxed()
    }

    let scenario = Builder::new("graceful_stop", sample_cli_cfg())
        .with_default_descriptor(descriptor(
            r#"
scenarios:
  stuck:
    executor: constant-vus
    exec: stuck
    vus: 2
    duration: 200ms
    graceful_stop: 100ms
"#,
        ))
        .use_named_behaviour("stuck", stuck);

    let outcome = run(scenario).unwrap();

    let summary = &outcome.summary.scenarios["stuck"];
    assert_eq!(2, summary.iterations_interrupted);
    assert_eq!(0, summary.iterations_completed);
    // Interrupted iterations don't count towards `iterations`
    assert_eq!(0, outcome.summary.metrics.iterations);
    assert!(outcome.summary.elapsed_ms < 10_000);
}

#[test]
fn hard_timeout_stops_the_run() {
    fn slow(ctx: &mut Ctx) -> BoxFuture<'_, HookResult> {
        async move {
            ctx.sleep(Duration::from_millis(50)).await;
            Ok(())
        }
        .boxed()
    }

    let mut cli = sample_cli_cfg();
    cli.hard_timeout = Some(Duration::from_millis(300));

    let scenario = Builder::new("hard_timeout", cli)
        .with_default_descriptor(descriptor(
            r#"
scenarios:
  long:
    executor: constant-vus
    exec: slow
    vus: 2
    duration: 10m
  later:
    executor: per-vu-iterations
    exec: slow
    vus: 1
    iterations: 1
    start_time: 10m
"#,
        ))
        .use_named_behaviour("slow", slow);

    let outcome = run(scenario).unwrap();

    assert!(outcome.summary.elapsed_ms < 10_000);
    assert!(outcome.summary.scenarios["long"].iterations_completed > 0);
    assert_eq!(0, outcome.summary.scenarios["later"].vus_started);
}

#[test]
fn start_time_delays_scenario() {
    fn noop(_ctx: &mut Ctx) -> BoxFuture<'_, HookResult> {
        async move { Ok(()) }.boxed()
    }

    let scenario = Builder::new("start_time", sample_cli_cfg())
        .with_default_descriptor(descriptor(
            r#"
scenarios:
  delayed:
    executor: per-vu-iterations
    exec: noop
    vus: 1
    iterations: 1
    start_time: 300ms
"#,
        ))
        .use_named_behaviour("noop", noop);

    let outcome = run(scenario).unwrap();

    assert!(outcome.summary.elapsed_ms >= 300);
    assert_eq!(1, outcome.summary.scenarios["delayed"].iterations_completed);
}

#[test]
fn failed_threshold_sets_exit_code() {
    fn failing_check(ctx: &mut Ctx) -> BoxFuture<'_, HookResult> {
        async move {
            ctx.check(&500u16, &[("status is 200", &|s: &u16| *s == 200)]);
            Ok(())
        }
        .boxed()
    }

    let scenario = Builder::new("failed_threshold", sample_cli_cfg())
        .with_default_descriptor(descriptor(
            r#"
scenarios:
  checks:
    executor: per-vu-iterations
    exec: failing_check
    vus: 1
    iterations: 2
thresholds:
  checks: rate>0.99
  iterations: count==2
"#,
        ))
        .use_named_behaviour("failing_check", failing_check);

    let outcome = run(scenario).unwrap();

    assert_eq!(THRESHOLDS_FAILED_EXIT_CODE, outcome.exit_code());
    let failed = outcome.summary.failed_thresholds().collect::<Vec<_>>();
    assert_eq!(1, failed.len());
    assert_eq!("checks", failed[0].metric);
}

#[test]
fn passing_thresholds_exit_cleanly_and_summary_is_appended() {
    fn noop(_ctx: &mut Ctx) -> BoxFuture<'_, HookResult> {
        async move { Ok(()) }.boxed()
    }

    let dir = tempfile::tempdir().unwrap();
    let summary_path = dir.path().join("summaries.jsonl");

    let mut cli = sample_cli_cfg();
    cli.summary_path = Some(summary_path.clone());
    cli.run_id = Some("fixed-run-id".to_string());

    let scenario = Builder::new("summary_appended", cli)
        .with_default_descriptor(descriptor(
            r#"
scenarios:
  once:
    executor: per-vu-iterations
    exec: noop
    vus: 1
    iterations: 1
thresholds:
  http_req_failed: rate<0.01
"#,
        ))
        .use_named_behaviour("noop", noop);

    let outcome = run(scenario).unwrap();
    assert_eq!(0, outcome.exit_code());

    let runs = load_summary_runs(summary_path).unwrap();
    assert_eq!(1, runs.len());
    assert_eq!("fixed-run-id", runs[0].run_id);
    assert_eq!(outcome.summary, runs[0]);
}
