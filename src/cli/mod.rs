//! Command line interface definition using clap.
//!
//! This module defines the [`Cli`] structure and its subcommands, and merges
//! configuration files and `CAMPUS_BDD_*` environment variables beneath the
//! values given on the command line.

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use ortho_config::declarative::LayerComposition;
use ortho_config::figment::{Figment, providers::Env};
use ortho_config::uncased::Uncased;
use ortho_config::{
    ConfigDiscovery, MergeComposer, OrthoConfig, OrthoMergeExt, OrthoResult, sanitize_value,
};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

mod parsing;

use parsing::{parse_concurrency, parse_tags};

/// Maximum number of concurrent scenarios accepted by the CLI.
pub const MAX_CONCURRENCY: usize = 64;
const CONFIG_ENV_VAR: &str = "CAMPUS_BDD_CONFIG_PATH";
const ENV_PREFIX: &str = "CAMPUS_BDD_";
const DEFAULT_SERVICE: &str = "bob";

/// Acceptance test runner for the campus platform services.
#[derive(Debug, Parser, Serialize, Deserialize, OrthoConfig)]
#[command(author, version, about, long_about = None)]
#[ortho_config(prefix = "CAMPUS_BDD")]
pub struct Cli {
    /// Service whose suite should run.
    #[arg(short, long, value_name = "NAME", default_value = DEFAULT_SERVICE)]
    #[ortho_config(default = default_service())]
    pub service: String,

    /// Directory or file containing `.feature` files; may be repeated.
    ///
    /// Defaults to `features/<service>`.
    #[arg(short, long = "features", value_name = "PATH")]
    #[ortho_config(merge_strategy = "append")]
    pub features: Vec<PathBuf>,

    /// Tag expression selecting scenarios, such as `@smoke,~@slow`.
    #[arg(short, long, value_name = "EXPR", value_parser = parse_tags)]
    pub tags: Option<String>,

    /// Number of scenarios to run at once.
    ///
    /// Values must be between 1 and 64.
    #[arg(short = 'j', long, value_name = "N", value_parser = parse_concurrency)]
    pub concurrency: Option<usize>,

    /// Configuration shared by every service.
    #[arg(long, value_name = "FILE")]
    pub common_config: Option<PathBuf>,

    /// Service-specific configuration.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Credentials layered over the other configuration files.
    #[arg(long, value_name = "FILE")]
    pub secrets: Option<PathBuf>,

    /// Address of the fake identity provider used to mint tokens.
    #[arg(long, value_name = "HOST:PORT")]
    pub firebase_addr: Option<String>,

    /// Address of the token exchange service.
    #[arg(long, value_name = "HOST:PORT")]
    pub shamir_addr: Option<String>,

    /// Applicant identifier sent with token exchange requests.
    #[arg(long, value_name = "ID")]
    pub applicant_id: Option<String>,

    /// Treat undefined steps as failures.
    #[arg(long)]
    #[ortho_config(default = false)]
    pub strict: bool,

    /// Enable verbose diagnostic logging.
    #[arg(short, long)]
    #[ortho_config(default = false)]
    pub verbose: bool,

    /// Force accessible output mode on or off (overrides auto-detection).
    #[arg(long)]
    pub accessible: Option<bool>,

    /// Force the progress bar on or off in standard mode.
    #[arg(long)]
    pub progress: Option<bool>,

    /// Optional subcommand to execute; defaults to `run` when omitted.
    ///
    /// `OrthoConfig` merging ignores this field; CLI parsing supplies it.
    #[serde(skip)]
    #[command(subcommand)]
    #[ortho_config(skip_cli)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Apply the default command if none was specified.
    #[must_use]
    pub fn with_default_command(mut self) -> Self {
        if self.command.is_none() {
            self.command = Some(Commands::Run);
        }
        self
    }

    /// Feature roots to load: the explicit list, or `features/<service>`.
    #[must_use]
    pub fn feature_roots(&self) -> Vec<PathBuf> {
        if self.features.is_empty() {
            vec![PathBuf::from("features").join(&self.service)]
        } else {
            self.features.clone()
        }
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            service: default_service(),
            features: Vec::new(),
            tags: None,
            concurrency: None,
            common_config: None,
            config: None,
            secrets: None,
            firebase_addr: None,
            shamir_addr: None,
            applicant_id: None,
            strict: false,
            verbose: false,
            accessible: None,
            progress: None,
            command: None,
        }
        .with_default_command()
    }
}

/// Available top-level commands.
#[derive(Debug, Subcommand, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Commands {
    /// Run the selected suite against live services.
    Run,

    /// List every step pattern the selected suite registers.
    Steps,

    /// Check feature files for undefined and ambiguous steps offline.
    Lint,
}

fn default_service() -> String {
    DEFAULT_SERVICE.to_owned()
}

/// Parse CLI arguments.
///
/// Returns both the parsed CLI struct and the `ArgMatches` required for
/// configuration merging.
///
/// # Errors
///
/// Returns a `clap::Error` when parsing fails.
pub fn parse_from<I, T>(iter: I) -> Result<(Cli, ArgMatches), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut command = Cli::command();
    let matches = command.try_get_matches_from_mut(iter)?;
    // Clone matches before from_arg_matches_mut consumes the values.
    let matches_for_merge = matches.clone();
    let mut matches_for_parse = matches;
    let cli = Cli::from_arg_matches_mut(&mut matches_for_parse)
        .map_err(|clap_err| clap_err.with_cmd(&command))?;
    Ok((cli, matches_for_merge))
}

/// Return the prefixed environment provider for CLI configuration.
fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX)
}

fn config_discovery() -> ConfigDiscovery {
    ConfigDiscovery::builder("campus-bdd")
        .env_var(CONFIG_ENV_VAR)
        .build()
}

/// Return `true` when no CLI overrides were supplied.
///
/// The merge pipeline treats an empty JSON object as "no overrides".
fn is_empty_value(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::Object(map) if map.is_empty())
}

fn cli_overrides_from_matches(cli: &Cli, matches: &ArgMatches) -> OrthoResult<serde_json::Value> {
    let value = sanitize_value(cli)?;
    let serde_json::Value::Object(mut map) = value else {
        return Err(Arc::new(ortho_config::OrthoError::Validation {
            key: String::from("cli"),
            message: format!("expected parsed CLI values to serialize to an object, got {value:?}"),
        }));
    };

    map.remove("command");
    for field in [
        "service",
        "features",
        "strict",
        "verbose",
        "accessible",
        "progress",
    ] {
        if matches.value_source(field) != Some(ValueSource::CommandLine) {
            map.remove(field);
        }
    }

    Ok(serde_json::Value::Object(map))
}

/// Merge configuration layers over the parsed CLI values.
///
/// # Errors
///
/// Returns an [`ortho_config::OrthoError`] if layer composition or merging
/// fails.
pub fn merge_with_config(cli: &Cli, matches: &ArgMatches) -> OrthoResult<Cli> {
    let command = cli.command;
    let mut errors = Vec::new();
    let mut composer = MergeComposer::with_capacity(4);

    match sanitize_value(&Cli::default()) {
        Ok(value) => composer.push_defaults(value),
        Err(err) => errors.push(err),
    }

    let mut file_layers = config_discovery().compose_layers();
    errors.append(&mut file_layers.required_errors);
    if file_layers.value.is_empty() {
        errors.append(&mut file_layers.optional_errors);
    }
    for layer in file_layers.value {
        composer.push_layer(layer);
    }

    let env_provider = env_provider()
        .map(|key| Uncased::new(key.as_str().to_ascii_uppercase()))
        .split("__");
    match Figment::from(env_provider)
        .extract::<serde_json::Value>()
        .into_ortho_merge()
    {
        Ok(value) => composer.push_environment(value),
        Err(err) => errors.push(err),
    }

    match cli_overrides_from_matches(cli, matches) {
        Ok(value) if !is_empty_value(&value) => composer.push_cli(value),
        Ok(_) => {}
        Err(err) => errors.push(err),
    }

    let composition = LayerComposition::new(composer.layers(), errors);
    let mut merged = composition.into_merge_result(Cli::merge_from_layers)?;
    merged.command = command;
    Ok(merged)
}
