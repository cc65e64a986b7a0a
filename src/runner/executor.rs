//! Running planned scenarios against a step registry.

use super::exclusive::{ExclusiveGroups, group_from_tags};
use super::report::{RunSummary, ScenarioOutcome, ScenarioReport, StepReport, StepStatus};
use crate::context::StepContext;
use crate::features::{PlannedScenario, PlannedStep};
use crate::registry::{RegistryError, StepRegistry};
use crate::status::ScenarioReporter;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt, stream};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Hooks run around every scenario.
#[async_trait]
pub trait ScenarioHooks<W: Send + Sync + 'static>: Send + Sync {
    /// Prepare the context a scenario starts with.
    ///
    /// An error fails the scenario without running any step.
    async fn before_scenario(
        &self,
        _world: &Arc<W>,
        _scenario: &PlannedScenario,
        ctx: StepContext,
    ) -> anyhow::Result<StepContext> {
        Ok(ctx)
    }

    /// Release whatever the scenario acquired. Runs after every scenario,
    /// including failed ones.
    async fn after_scenario(
        &self,
        _world: &Arc<W>,
        _scenario: &PlannedScenario,
        _ctx: &StepContext,
        _outcome: ScenarioOutcome,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Exclusive group the scenario must hold while it runs.
    fn exclusive_group(&self, scenario: &PlannedScenario) -> Option<String> {
        group_from_tags(scenario)
    }
}

/// Hooks that do nothing beyond the defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<W: Send + Sync + 'static> ScenarioHooks<W> for NoHooks {}

/// Executor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Scenarios run at once.
    pub concurrency: usize,
    /// Undefined steps fail the scenario.
    pub strict: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            strict: false,
        }
    }
}

/// Runs scenarios against one registry and world.
pub struct Executor<W> {
    registry: Arc<StepRegistry<W>>,
    world: Arc<W>,
    hooks: Arc<dyn ScenarioHooks<W>>,
    reporter: Arc<dyn ScenarioReporter>,
    groups: ExclusiveGroups,
    options: ExecutorOptions,
}

impl<W: Send + Sync + 'static> Executor<W> {
    /// Assemble an executor.
    #[must_use]
    pub fn new(
        registry: Arc<StepRegistry<W>>,
        world: Arc<W>,
        hooks: Arc<dyn ScenarioHooks<W>>,
        reporter: Arc<dyn ScenarioReporter>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            registry,
            world,
            hooks,
            reporter,
            groups: ExclusiveGroups::new(),
            options,
        }
    }

    /// Run every scenario, at most `concurrency` at a time.
    ///
    /// Reports come back in input order whatever the completion order.
    pub async fn run(&self, scenarios: Vec<PlannedScenario>) -> RunSummary {
        let started = Instant::now();
        self.reporter.report_run_started(scenarios.len());
        let reports: Vec<ScenarioReport> = stream::iter(scenarios)
            .map(|scenario| self.run_scenario(scenario))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;
        let summary = RunSummary::from_reports(reports, started.elapsed());
        self.reporter.report_summary(&summary);
        summary
    }

    /// Run one scenario through its hooks and steps.
    pub async fn run_scenario(&self, scenario: PlannedScenario) -> ScenarioReport {
        let span = tracing::info_span!(
            "scenario",
            scenario = %scenario.name,
            location = %scenario.location()
        );
        self.run_scenario_in_span(scenario).instrument(span).await
    }

    async fn run_scenario_in_span(&self, scenario: PlannedScenario) -> ScenarioReport {
        let _guard = match self.hooks.exclusive_group(&scenario) {
            Some(group) => Some(self.groups.acquire(&group).await),
            None => None,
        };
        let started = Instant::now();
        tracing::debug!("scenario started");

        let (ctx, hook_error) = match self
            .hooks
            .before_scenario(&self.world, &scenario, StepContext::new())
            .await
        {
            Ok(ctx) => (ctx, None),
            Err(err) => (StepContext::new(), Some(format!("before scenario: {err:#}"))),
        };

        let (steps, ctx) = if hook_error.is_some() {
            (scenario.steps.iter().map(skipped).collect(), ctx)
        } else {
            self.run_steps(&scenario, ctx).await
        };

        let mut report = ScenarioReport {
            feature: scenario.feature.clone(),
            name: scenario.name.clone(),
            location: scenario.location(),
            outcome: outcome_of(hook_error.as_deref(), &steps, self.options.strict),
            steps,
            hook_error,
            elapsed: Duration::ZERO,
        };
        if let Err(err) = self
            .hooks
            .after_scenario(&self.world, &scenario, &ctx, report.outcome)
            .await
        {
            tracing::warn!(error = %format!("{err:#}"), "after scenario hook failed");
            if report.hook_error.is_none() {
                report.hook_error = Some(format!("after scenario: {err:#}"));
            }
            report.outcome = ScenarioOutcome::Failed;
        }
        report.elapsed = started.elapsed();
        tracing::debug!(outcome = ?report.outcome, "scenario finished");
        self.reporter.report_scenario(&report);
        report
    }

    async fn run_steps(
        &self,
        scenario: &PlannedScenario,
        mut ctx: StepContext,
    ) -> (Vec<StepReport>, StepContext) {
        let mut reports = Vec::with_capacity(scenario.steps.len());
        let mut halted = false;
        for step in &scenario.steps {
            if halted {
                reports.push(skipped(step));
                continue;
            }
            let (report, next) = self.run_step(step, ctx.clone()).await;
            if let Some(next_ctx) = next {
                ctx = next_ctx;
            }
            halted = report.status != StepStatus::Passed;
            reports.push(report);
        }
        (reports, ctx)
    }

    async fn run_step(
        &self,
        step: &PlannedStep,
        ctx: StepContext,
    ) -> (StepReport, Option<StepContext>) {
        let mut report = StepReport {
            keyword: step.keyword.clone(),
            text: step.text.clone(),
            pattern: None,
            status: StepStatus::Passed,
        };
        let found = match self.registry.find(&step.text) {
            Ok(found) => found,
            Err(RegistryError::Undefined { .. }) => {
                tracing::warn!(step = %step.text, "undefined step");
                report.status = StepStatus::Undefined;
                return (report, None);
            }
            Err(err) => {
                report.status = StepStatus::Failed {
                    message: err.to_string(),
                };
                return (report, None);
            }
        };
        report.pattern = Some(found.definition.pattern().to_owned());
        if ctx.is_expired() {
            report.status = StepStatus::Failed {
                message: "scenario deadline exceeded before the step started".to_owned(),
            };
            return (report, None);
        }
        let args = found
            .args()
            .with_table(step.table.clone())
            .with_doc_string(step.doc_string.clone());
        let remaining = ctx.remaining();
        let invocation =
            AssertUnwindSafe(found.definition.invoke(Arc::clone(&self.world), ctx, args))
                .catch_unwind();
        let outcome = match remaining {
            Some(limit) => tokio::time::timeout(limit, invocation)
                .await
                .unwrap_or_else(|_| Ok(Err(anyhow::anyhow!("step timed out after {limit:?}")))),
            None => invocation.await,
        };
        match outcome {
            Ok(Ok(next)) => {
                tracing::debug!(step = %step.text, pattern = %found.definition.pattern(), "step passed");
                (report, Some(next))
            }
            Ok(Err(err)) => {
                let message = format!("{err:#}");
                tracing::debug!(step = %step.text, error = %message, "step failed");
                report.status = StepStatus::Failed { message };
                (report, None)
            }
            Err(payload) => {
                report.status = StepStatus::Failed {
                    message: format!("step panicked: {}", panic_message(payload.as_ref())),
                };
                (report, None)
            }
        }
    }
}

fn skipped(step: &PlannedStep) -> StepReport {
    StepReport {
        keyword: step.keyword.clone(),
        text: step.text.clone(),
        pattern: None,
        status: StepStatus::Skipped,
    }
}

fn outcome_of(hook_error: Option<&str>, steps: &[StepReport], strict: bool) -> ScenarioOutcome {
    let failed = steps
        .iter()
        .any(|step| matches!(step.status, StepStatus::Failed { .. }));
    let undefined = steps.iter().any(|step| step.status == StepStatus::Undefined);
    if hook_error.is_some() || failed || (strict && undefined) {
        ScenarioOutcome::Failed
    } else if undefined {
        ScenarioOutcome::Undefined
    } else {
        ScenarioOutcome::Passed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
