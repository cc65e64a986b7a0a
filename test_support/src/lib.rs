//! Shared helpers for the harness's own tests.
//!
//! Covers the pieces several test binaries need: serialising environment
//! changes, writing throwaway feature trees, running the built binary and a
//! one-shot fake identity provider.

pub mod env_lock;
pub mod env_var_guard;
pub mod feature_dir;
pub mod identity_server;

pub use feature_dir::FeatureDir;
pub use identity_server::{IdentityServer, spawn_identity_server};

use anyhow::{Context, Result};
use assert_cmd::Command;
use std::path::Path;

/// Captured output from a `campus-bdd` invocation.
#[derive(Debug)]
pub struct CampusRun {
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
    /// Whether the command exited successfully.
    pub success: bool,
}

/// Run `campus-bdd` in `current_dir` with the supplied args.
///
/// Configuration discovery and `CAMPUS_BDD_*` overrides from the host are
/// cleared so a developer's setup cannot leak into the run.
///
/// # Errors
///
/// Returns an error when the binary cannot be located or the process cannot
/// be spawned.
pub fn run_campus_bdd_in(current_dir: &Path, args: &[&str]) -> Result<CampusRun> {
    let mut cmd = Command::cargo_bin("campus-bdd").context("locate campus-bdd binary")?;
    let output = cmd
        .current_dir(current_dir)
        .env_remove("CAMPUS_BDD_CONFIG_PATH")
        .env_remove("CAMPUS_BDD_SERVICE")
        .env_remove("CAMPUS_BDD_FEATURES")
        .env("NO_COLOR", "1")
        .env("HOME", current_dir)
        .env("XDG_CONFIG_HOME", current_dir)
        .args(args)
        .output()
        .context("run campus-bdd command")?;
    Ok(CampusRun {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
    })
}
