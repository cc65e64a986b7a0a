//! Scenario progress reporting for accessible and standard output modes.
//!
//! This module provides a [`ScenarioReporter`] trait plus concrete reporters
//! for accessibility-first textual output, a quiet mode and standard terminal
//! progress output backed by `indicatif`.

use crate::runner::{RunSummary, ScenarioOutcome, ScenarioReport, StepStatus};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

/// Report scenario progress to the user.
pub trait ScenarioReporter: Send + Sync {
    /// Announce how many scenarios are about to run.
    fn report_run_started(&self, total: usize);

    /// Emit the result of one finished scenario.
    fn report_scenario(&self, report: &ScenarioReport);

    /// Emit the run totals.
    fn report_summary(&self, summary: &RunSummary);
}

const fn outcome_label(outcome: ScenarioOutcome) -> &'static str {
    match outcome {
        ScenarioOutcome::Passed => "passed",
        ScenarioOutcome::Failed => "failed",
        ScenarioOutcome::Undefined => "undefined",
    }
}

/// Labelled lines describing one scenario.
///
/// Passing scenarios get a single line; others list every step, with the
/// matched pattern and error for the failing one.
#[must_use]
pub fn scenario_lines(report: &ScenarioReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Scenario {}: {} ({})",
        outcome_label(report.outcome),
        report.name,
        report.location
    )];
    if report.outcome == ScenarioOutcome::Passed {
        return lines;
    }
    if let Some(error) = &report.hook_error {
        lines.push(format!("  Hook failed: {error}"));
    }
    for step in &report.steps {
        let label = match &step.status {
            StepStatus::Passed => "passed",
            StepStatus::Failed { .. } => "failed",
            StepStatus::Undefined => "undefined",
            StepStatus::Skipped => "skipped",
        };
        lines.push(format!("  Step {label}: {} {}", step.keyword, step.text));
        if let StepStatus::Failed { message } = &step.status {
            if let Some(pattern) = &step.pattern {
                lines.push(format!("    pattern: {pattern}"));
            }
            lines.push(format!("    error: {message}"));
        }
    }
    lines
}

/// One-line run summary.
#[must_use]
pub fn summary_line(summary: &RunSummary) -> String {
    format!(
        "{} scenario(s): {} passed, {} failed, {} undefined; {} step(s) skipped in {:.2}s",
        summary.total(),
        summary.passed,
        summary.failed,
        summary.undefined,
        summary.skipped_steps,
        summary.elapsed.as_secs_f64()
    )
}

fn write_lines<I: IntoIterator<Item = String>>(lines: I) {
    let mut stderr = io::stderr().lock();
    for line in lines {
        // Reporting failures must not abort the run.
        drop(writeln!(stderr, "{line}"));
    }
}

/// Accessible reporter: writes static, labelled lines to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessibleReporter;

impl ScenarioReporter for AccessibleReporter {
    fn report_run_started(&self, total: usize) {
        write_lines([format!("Running {total} scenario(s)")]);
    }

    fn report_scenario(&self, report: &ScenarioReport) {
        write_lines(scenario_lines(report));
    }

    fn report_summary(&self, summary: &RunSummary) {
        write_lines([summary_line(summary)]);
    }
}

/// Quiet reporter: only the scenarios that did not pass and the summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentReporter;

impl ScenarioReporter for SilentReporter {
    fn report_run_started(&self, _total: usize) {}

    fn report_scenario(&self, _report: &ScenarioReport) {}

    fn report_summary(&self, summary: &RunSummary) {
        write_lines(
            summary
                .scenarios
                .iter()
                .filter(|report| report.outcome != ScenarioOutcome::Passed)
                .flat_map(scenario_lines)
                .chain([summary_line(summary)]),
        );
    }
}

/// Standard reporter backed by an `indicatif` progress bar.
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl IndicatifReporter {
    /// Construct a reporter; the bar appears when the run starts.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioReporter for IndicatifReporter {
    fn report_run_started(&self, total: usize) {
        let bar = ProgressBar::with_draw_target(
            Some(u64::try_from(total).unwrap_or(u64::MAX)),
            ProgressDrawTarget::stderr_with_hz(12),
        );
        let style = ProgressStyle::with_template("{bar:30} {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        *self.bar.lock().unwrap_or_else(PoisonError::into_inner) = Some(bar);
    }

    fn report_scenario(&self, report: &ScenarioReport) {
        let guard = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(bar) = guard.as_ref() else {
            return;
        };
        if report.outcome != ScenarioOutcome::Passed {
            let lines = scenario_lines(report);
            if bar.is_hidden() {
                write_lines(lines);
            } else {
                for line in lines {
                    bar.println(line);
                }
            }
        }
        bar.set_message(report.name.clone());
        bar.inc(1);
    }

    fn report_summary(&self, summary: &RunSummary) {
        if let Some(bar) = self
            .bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            bar.finish_and_clear();
        }
        write_lines([summary_line(summary)]);
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
