//! Tests for scenario execution.

use super::*;
use crate::registry::{RegistryBuilder, StepArgs};
use anyhow::bail;
use rstest::{fixture, rstest};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Toy {
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Debug, Default)]
struct Counter(u32);

fn registry() -> Arc<StepRegistry<Toy>> {
    let mut builder = RegistryBuilder::<Toy>::new();
    builder
        .step("^it passes$", |world: Arc<Toy>, ctx, _| async move {
            world.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ctx)
        })
        .expect("register passes")
        .step("^it fails with \"([^\"]*)\"$", |_, _, args: StepArgs| async move {
            bail!("{}", args.string(0)?)
        })
        .expect("register fails")
        .step("^it panics$", |_, _, _| async move {
            panic!("boom")
        })
        .expect("register panics")
        .step("^it sleeps (\\d+) seconds$", |_, ctx, args: StepArgs| async move {
            let secs: u64 = args.parse(0)?;
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok(ctx)
        })
        .expect("register sleeps")
        .step("^it counts$", |_, ctx: StepContext, _| async move {
            let (ctx, state) = ctx.ensure_state::<Counter>();
            state.lock().await.0 += 1;
            Ok(ctx)
        })
        .expect("register counts")
        .step("^it saw (\\d+) counts?$", |_, ctx: StepContext, args: StepArgs| async move {
            let expected: u32 = args.parse(0)?;
            let seen = ctx.state::<Counter>().lock().await.0;
            anyhow::ensure!(seen == expected, "saw {seen}, expected {expected}");
            Ok(ctx)
        })
        .expect("register saw")
        .step("^it overlaps$", |world: Arc<Toy>, ctx, _| async move {
            let now = world.running.fetch_add(1, Ordering::SeqCst) + 1;
            world.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            world.running.fetch_sub(1, Ordering::SeqCst);
            Ok(ctx)
        })
        .expect("register overlaps")
        .step("^it pass", |_, ctx, _| async move { Ok(ctx) })
        .expect("register clash");
    Arc::new(builder.build())
}

fn scenario(name: &str, tags: &[&str], steps: &[&str]) -> PlannedScenario {
    PlannedScenario {
        feature: "Toy".to_owned(),
        name: name.to_owned(),
        path: PathBuf::from("features/toy.feature"),
        line: 3,
        tags: tags.iter().map(|t| (*t).to_owned()).collect(),
        steps: steps
            .iter()
            .enumerate()
            .map(|(i, text)| PlannedStep {
                keyword: "Given".to_owned(),
                text: (*text).to_owned(),
                table: None,
                doc_string: None,
                line: 4 + i,
            })
            .collect(),
    }
}

#[derive(Debug, Default)]
struct Recording {
    started: Mutex<Option<usize>>,
    names: Mutex<Vec<String>>,
    summaries: AtomicUsize,
}

impl ScenarioReporter for Recording {
    fn report_run_started(&self, total: usize) {
        *self.started.lock().expect("lock") = Some(total);
    }

    fn report_scenario(&self, report: &ScenarioReport) {
        self.names.lock().expect("lock").push(report.name.clone());
    }

    fn report_summary(&self, _summary: &RunSummary) {
        self.summaries.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Hooks {
    fail_before: bool,
    fail_after: bool,
    timeout: Option<Duration>,
    after_calls: Mutex<Vec<ScenarioOutcome>>,
}

#[async_trait]
impl ScenarioHooks<Toy> for Hooks {
    async fn before_scenario(
        &self,
        _world: &Arc<Toy>,
        _scenario: &PlannedScenario,
        ctx: StepContext,
    ) -> anyhow::Result<StepContext> {
        if self.fail_before {
            bail!("no identity service");
        }
        let (ctx, _) = ctx.ensure_state::<Counter>();
        Ok(match self.timeout {
            Some(limit) => ctx.with_timeout(limit),
            None => ctx,
        })
    }

    async fn after_scenario(
        &self,
        _world: &Arc<Toy>,
        _scenario: &PlannedScenario,
        _ctx: &StepContext,
        outcome: ScenarioOutcome,
    ) -> anyhow::Result<()> {
        self.after_calls.lock().expect("lock").push(outcome);
        if self.fail_after {
            bail!("cleanup failed");
        }
        Ok(())
    }
}

struct Harness {
    world: Arc<Toy>,
    hooks: Arc<Hooks>,
    reporter: Arc<Recording>,
}

impl Harness {
    fn executor(&self, options: ExecutorOptions) -> Executor<Toy> {
        Executor::new(
            registry(),
            Arc::clone(&self.world),
            Arc::clone(&self.hooks) as Arc<dyn ScenarioHooks<Toy>>,
            Arc::clone(&self.reporter) as Arc<dyn ScenarioReporter>,
            options,
        )
    }
}

fn harness_with(hooks: Hooks) -> Harness {
    Harness {
        world: Arc::new(Toy::default()),
        hooks: Arc::new(hooks),
        reporter: Arc::new(Recording::default()),
    }
}

#[fixture]
fn harness() -> Harness {
    harness_with(Hooks::default())
}

fn statuses(report: &ScenarioReport) -> Vec<&StepStatus> {
    report.steps.iter().map(|step| &step.status).collect()
}

#[rstest]
#[tokio::test]
async fn passing_scenario_threads_state_between_steps(harness: Harness) {
    let report = harness
        .executor(ExecutorOptions::default())
        .run_scenario(scenario("count", &[], &["it counts", "it counts", "it saw 2 counts"]))
        .await;
    assert_eq!(report.outcome, ScenarioOutcome::Passed, "{report:?}");
    assert_eq!(report.location, "features/toy.feature:3");
}

#[rstest]
#[tokio::test]
async fn failure_skips_remaining_steps(harness: Harness) {
    let report = harness
        .executor(ExecutorOptions::default())
        .run_scenario(scenario(
            "fail",
            &[],
            &["it counts", "it fails with \"bad token\"", "it counts"],
        ))
        .await;
    assert_eq!(report.outcome, ScenarioOutcome::Failed);
    assert_eq!(
        statuses(&report),
        [
            &StepStatus::Passed,
            &StepStatus::Failed {
                message: "bad token".to_owned()
            },
            &StepStatus::Skipped,
        ]
    );
    assert_eq!(
        report.steps.get(1).and_then(|s| s.pattern.as_deref()),
        Some("^it fails with \"([^\"]*)\"$")
    );
    assert_eq!(
        *harness.hooks.after_calls.lock().expect("lock"),
        [ScenarioOutcome::Failed]
    );
}

#[rstest]
#[case(false, ScenarioOutcome::Undefined)]
#[case(true, ScenarioOutcome::Failed)]
#[tokio::test]
async fn undefined_steps_depend_on_strictness(
    harness: Harness,
    #[case] strict: bool,
    #[case] expected: ScenarioOutcome,
) {
    let report = harness
        .executor(ExecutorOptions {
            concurrency: 1,
            strict,
        })
        .run_scenario(scenario("undefined", &[], &["nobody knows this", "it counts"]))
        .await;
    assert_eq!(report.outcome, expected);
    assert_eq!(
        statuses(&report),
        [&StepStatus::Undefined, &StepStatus::Skipped]
    );
}

#[rstest]
#[tokio::test]
async fn ambiguous_lines_fail_without_running(harness: Harness) {
    let report = harness
        .executor(ExecutorOptions::default())
        .run_scenario(scenario("clash", &[], &["it passes"]))
        .await;
    assert_eq!(report.outcome, ScenarioOutcome::Failed);
    let message = report.failure().expect("failure recorded");
    assert!(message.contains("matches 2 patterns"), "{message}");
    assert_eq!(harness.world.calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn panics_become_failures(harness: Harness) {
    let report = harness
        .executor(ExecutorOptions::default())
        .run_scenario(scenario("panic", &[], &["it panics"]))
        .await;
    assert_eq!(report.failure(), Some("step panicked: boom"));
    assert_eq!(harness.hooks.after_calls.lock().expect("lock").len(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn steps_are_cut_off_at_the_scenario_deadline() {
    let harness = harness_with(Hooks {
        timeout: Some(Duration::from_secs(20)),
        ..Hooks::default()
    });
    let report = harness
        .executor(ExecutorOptions::default())
        .run_scenario(scenario("slow", &[], &["it sleeps 30 seconds", "it counts"]))
        .await;
    assert_eq!(report.outcome, ScenarioOutcome::Failed);
    let message = report.failure().expect("failure recorded");
    assert!(message.starts_with("step timed out"), "{message}");
    assert_eq!(report.steps.get(1).map(|s| &s.status), Some(&StepStatus::Skipped));
}

#[rstest]
#[tokio::test]
async fn before_hook_failure_skips_every_step() {
    let harness = harness_with(Hooks {
        fail_before: true,
        ..Hooks::default()
    });
    let report = harness
        .executor(ExecutorOptions::default())
        .run_scenario(scenario("hook", &[], &["it passes", "it counts"]))
        .await;
    assert_eq!(report.outcome, ScenarioOutcome::Failed);
    assert_eq!(
        report.hook_error.as_deref(),
        Some("before scenario: no identity service")
    );
    assert!(report.steps.iter().all(|s| s.status == StepStatus::Skipped));
    assert_eq!(harness.world.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.hooks.after_calls.lock().expect("lock").len(), 1);
}

#[rstest]
#[tokio::test]
async fn after_hook_failure_fails_a_passing_scenario() {
    let harness = harness_with(Hooks {
        fail_after: true,
        ..Hooks::default()
    });
    let report = harness
        .executor(ExecutorOptions::default())
        .run_scenario(scenario("cleanup", &[], &["it counts"]))
        .await;
    assert_eq!(report.outcome, ScenarioOutcome::Failed);
    assert_eq!(report.hook_error.as_deref(), Some("after scenario: cleanup failed"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_keeps_input_order_and_reports_everything(harness: Harness) {
    let scenarios = vec![
        scenario("first", &[], &["it sleeps 0 seconds", "it counts"]),
        scenario("second", &[], &["it fails with \"x\""]),
        scenario("third", &[], &["it counts"]),
    ];
    let summary = harness
        .executor(ExecutorOptions {
            concurrency: 3,
            strict: false,
        })
        .run(scenarios)
        .await;
    let names: Vec<&str> = summary.scenarios.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["first", "second", "third"]);
    assert_eq!((summary.passed, summary.failed), (2, 1));
    assert_eq!(*harness.reporter.started.lock().expect("lock"), Some(3));
    assert_eq!(harness.reporter.names.lock().expect("lock").len(), 3);
    assert_eq!(harness.reporter.summaries.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exclusive_scenarios_never_overlap(harness: Harness) {
    let scenarios = (0..4)
        .map(|i| scenario(&format!("race {i}"), &["exclusive-lessons"], &["it overlaps"]))
        .collect();
    let summary = harness
        .executor(ExecutorOptions {
            concurrency: 4,
            strict: false,
        })
        .run(scenarios)
        .await;
    assert_eq!(summary.passed, 4);
    assert_eq!(harness.world.peak.load(Ordering::SeqCst), 1);
}
