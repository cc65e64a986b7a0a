//! Command dispatch: listing steps, linting features and running a suite.
//!
//! This module keeps `main` minimal by providing a single entry point. `run`
//! owns the async runtime; `steps` and `lint` never start one and never
//! touch the network.

mod error;
mod exclusive;
mod executor;
mod report;

pub use error::RunnerError;
pub use exclusive::{EXCLUSIVE_TAG_PREFIX, ExclusiveGroups, SERIAL_TAG, group_from_tags};
pub use executor::{Executor, ExecutorOptions, NoHooks, ScenarioHooks};
pub use report::{RunSummary, ScenarioOutcome, ScenarioReport, StepReport, StepStatus};

use crate::cli::{Cli, Commands};
use crate::config::{ConfigSources, SuiteConfig};
use crate::features::{self, PlannedScenario, TagExpression};
use crate::output_mode::{self, OutputMode};
use crate::registry::{RegistryError, StepRegistry};
use crate::status::{AccessibleReporter, IndicatifReporter, ScenarioReporter, SilentReporter};
use crate::suites::{self, Suite, SuiteHooks, World};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::Arc;

/// Build the [`ScenarioReporter`] for the resolved output mode and progress
/// preference.
fn make_reporter(mode: OutputMode, progress_enabled: bool) -> Arc<dyn ScenarioReporter> {
    match (mode, progress_enabled) {
        (OutputMode::Accessible, _) => Arc::new(AccessibleReporter),
        (OutputMode::Standard, true) => Arc::new(IndicatifReporter::new()),
        (OutputMode::Standard, false) => Arc::new(SilentReporter),
    }
}

/// Execute the parsed [`Cli`] command.
///
/// # Errors
///
/// Returns an error if the service is unknown, features or configuration
/// cannot be loaded, linting finds problems, or any scenario does not pass.
pub fn run(cli: &Cli) -> Result<()> {
    let suite = suites::find(&cli.service)?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Steps => {
            let registry = suite.registry()?;
            list_steps(&registry, &mut io::stdout().lock())
        }
        Commands::Lint => lint(cli, suite, &mut io::stdout().lock()),
        Commands::Run => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("start async runtime")?;
            runtime.block_on(run_suite(cli, suite))
        }
    }
}

/// Write every registered pattern, one per line.
///
/// # Errors
///
/// Fails when `out` cannot be written.
pub fn list_steps<W>(registry: &StepRegistry<W>, out: &mut dyn Write) -> Result<()> {
    for pattern in registry.patterns() {
        writeln!(out, "{pattern}").context("write step pattern")?;
    }
    Ok(())
}

/// Parse the selected features and report every step line no pattern or
/// several patterns match, as `path:line: message`.
///
/// # Errors
///
/// Returns [`RunnerError::LintFailed`] when problems were found, or the
/// loading failure.
pub fn lint(cli: &Cli, suite: &Suite, out: &mut dyn Write) -> Result<()> {
    let registry = suite.registry()?;
    let scenarios = load_scenarios(cli)?;
    let problems = step_problems(&registry, &scenarios, |_| true);
    for (location, err) in &problems {
        writeln!(out, "{location}: {err}").context("write lint report")?;
    }
    tracing::info!(
        scenarios = scenarios.len(),
        problems = problems.len(),
        "lint finished"
    );
    if problems.is_empty() {
        Ok(())
    } else {
        Err(RunnerError::LintFailed {
            count: problems.len(),
        }
        .into())
    }
}

/// Resolve each distinct step line once and keep the failures `keep`
/// accepts, labelled with the first location the line appears at.
pub fn step_problems<W>(
    registry: &StepRegistry<W>,
    scenarios: &[PlannedScenario],
    keep: impl Fn(&RegistryError) -> bool,
) -> Vec<(String, RegistryError)> {
    let mut seen = HashSet::new();
    scenarios
        .iter()
        .flat_map(|scenario| {
            scenario
                .steps
                .iter()
                .map(move |step| (scenario, step))
        })
        .filter(|&(_, step)| seen.insert(step.text.as_str()))
        .filter_map(|(scenario, step)| {
            let err = registry.find(&step.text).err()?;
            keep(&err).then(|| (format!("{}:{}", scenario.path.display(), step.line), err))
        })
        .collect()
}

fn load_scenarios(cli: &Cli) -> Result<Vec<PlannedScenario>> {
    let filter = cli
        .tags
        .as_deref()
        .map(str::parse::<TagExpression>)
        .transpose()?
        .unwrap_or_default();
    let roots = cli.feature_roots();
    let scenarios = features::load(&roots, &filter)?;
    tracing::debug!(roots = ?roots, filter = %filter, scenarios = scenarios.len(), "scenarios selected");
    Ok(scenarios)
}

/// Configuration files named on the command line.
#[must_use]
pub fn config_sources(cli: &Cli) -> ConfigSources {
    ConfigSources {
        common: cli.common_config.clone(),
        service: cli.config.clone(),
        secrets: cli.secrets.clone(),
    }
}

/// Apply command-line values that take precedence over the loaded files.
pub fn apply_overrides(config: &mut SuiteConfig, cli: &Cli) {
    if let Some(addr) = &cli.firebase_addr {
        config.identity.firebase_addr.clone_from(addr);
    }
    if let Some(addr) = &cli.shamir_addr {
        config
            .services
            .insert(config.identity.exchange_service.clone(), addr.clone());
    }
    if let Some(applicant) = &cli.applicant_id {
        config.identity.applicant.clone_from(applicant);
    }
    if let Some(concurrency) = cli.concurrency {
        config.scenario.concurrency = concurrency;
    }
}

/// Map a finished run to the command's result.
///
/// # Errors
///
/// Returns [`RunnerError::ScenariosFailed`] when any scenario did not pass.
pub const fn verdict(summary: &RunSummary, strict: bool) -> Result<(), RunnerError> {
    let failed = summary.not_passing(strict);
    if failed == 0 {
        Ok(())
    } else {
        Err(RunnerError::ScenariosFailed {
            failed,
            total: summary.total(),
        })
    }
}

async fn run_suite(cli: &Cli, suite: &Suite) -> Result<()> {
    let mut config = SuiteConfig::load(&config_sources(cli))?;
    apply_overrides(&mut config, cli);
    let scenarios = load_scenarios(cli)?;
    if scenarios.is_empty() {
        return Err(RunnerError::NoScenarios.into());
    }

    let registry = suite.registry()?;
    let ambiguous = step_problems(&registry, &scenarios, |err| {
        matches!(err, RegistryError::Ambiguous { .. })
    });
    if !ambiguous.is_empty() {
        for (location, err) in &ambiguous {
            tracing::error!(%location, error = %err, "ambiguous step");
        }
        return Err(RunnerError::AmbiguousSteps {
            count: ambiguous.len(),
        }
        .into());
    }

    let options = ExecutorOptions {
        concurrency: config.scenario.concurrency,
        strict: cli.strict,
    };
    tracing::info!(
        service = suite.name(),
        suite = suite.description(),
        scenarios = scenarios.len(),
        concurrency = options.concurrency,
        "starting run"
    );
    let world = Arc::new(World::boot(config).await.context("prepare suite resources")?);
    let reporter = make_reporter(
        output_mode::resolve(cli.accessible),
        cli.progress.unwrap_or(true),
    );
    let executor = Executor::new(
        registry,
        Arc::clone(&world),
        Arc::new(SuiteHooks),
        reporter,
        options,
    );
    let summary = tokio::select! {
        summary = executor.run(scenarios) => Some(summary),
        () = interrupted() => None,
    };
    world.shutdown().await;
    let summary = summary.ok_or(RunnerError::Interrupted)?;
    verdict(&summary, cli.strict)?;
    Ok(())
}

/// Resolve on Ctrl-C; never resolves when the signal cannot be watched.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot watch for interrupts");
        std::future::pending::<()>().await;
    }
    tracing::warn!("interrupted; stopping the run");
}
