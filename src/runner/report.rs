//! Outcome records produced by the executor.

use std::time::Duration;

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// Handler returned successfully.
    Passed,
    /// Handler failed, panicked, timed out or matched several patterns.
    Failed {
        /// Error chain rendered as text.
        message: String,
    },
    /// No pattern matched the step.
    Undefined,
    /// Not run because an earlier step did not pass.
    Skipped,
}

/// Report for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Gherkin keyword.
    pub keyword: String,
    /// Step text.
    pub text: String,
    /// Pattern that matched, when one did.
    pub pattern: Option<String>,
    /// Outcome.
    pub status: StepStatus,
}

/// Overall result of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioOutcome {
    /// Every step passed.
    Passed,
    /// A hook or step failed.
    Failed,
    /// A step was undefined and nothing failed.
    Undefined,
}

/// Report for one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Feature name.
    pub feature: String,
    /// Scenario name.
    pub name: String,
    /// `path:line` of the scenario.
    pub location: String,
    /// Per-step results, in order.
    pub steps: Vec<StepReport>,
    /// Failure raised by a hook rather than a step.
    pub hook_error: Option<String>,
    /// Overall outcome.
    pub outcome: ScenarioOutcome,
    /// Wall time spent in the scenario.
    pub elapsed: Duration,
}

impl ScenarioReport {
    /// First failure message, from a hook or a step.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.hook_error.as_deref().or_else(|| {
            self.steps.iter().find_map(|step| match &step.status {
                StepStatus::Failed { message } => Some(message.as_str()),
                _ => None,
            })
        })
    }
}

/// Totals for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Scenarios that passed.
    pub passed: usize,
    /// Scenarios that failed.
    pub failed: usize,
    /// Scenarios with undefined steps.
    pub undefined: usize,
    /// Steps skipped after a failure.
    pub skipped_steps: usize,
    /// Wall time for the run.
    pub elapsed: Duration,
    /// Every scenario report, in feature order.
    pub scenarios: Vec<ScenarioReport>,
}

impl RunSummary {
    /// Tally `reports`.
    #[must_use]
    pub fn from_reports(scenarios: Vec<ScenarioReport>, elapsed: Duration) -> Self {
        let count = |wanted| scenarios.iter().filter(|s| s.outcome == wanted).count();
        Self {
            passed: count(ScenarioOutcome::Passed),
            failed: count(ScenarioOutcome::Failed),
            undefined: count(ScenarioOutcome::Undefined),
            skipped_steps: scenarios
                .iter()
                .flat_map(|s| &s.steps)
                .filter(|step| step.status == StepStatus::Skipped)
                .count(),
            elapsed,
            scenarios,
        }
    }

    /// Scenarios run.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.passed + self.failed + self.undefined
    }

    /// Scenarios counted as not passing; undefined ones count under `strict`.
    #[must_use]
    pub const fn not_passing(&self, strict: bool) -> usize {
        if strict {
            self.failed + self.undefined
        } else {
            self.failed
        }
    }
}
