//! End-to-end tests for the `campus-bdd` binary.
//!
//! Every case stays offline: `steps` and `lint` never dial a service, and the
//! `run` cases fail before any connection is attempted.

use anyhow::{Context, Result, ensure};
use assert_cmd::Command;
use predicates::prelude::*;
use rstest::rstest;
use test_support::{FeatureDir, run_campus_bdd_in};

const DEFINED: &str = "\
Feature: Versions
  Scenario: a teacher reads client versions
    Given \"teacher\" signin system
    When user gets client version
    Then returns \"OK\" status code
    And must return client version from config
";

const UNDEFINED: &str = "\
Feature: Versions
  Scenario: a teacher reads client versions
    Given \"teacher\" signin system
    When user does something nobody wrote
";

fn stderr_text(raw: &str) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(raw)).into_owned()
}

#[test]
fn steps_lists_common_and_service_patterns() -> Result<()> {
    let mut cmd = Command::cargo_bin("campus-bdd").context("locate campus-bdd binary")?;
    cmd.env("NO_COLOR", "1")
        .args(["--service", "mastermgmt", "steps"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"^"([^"]*)" signin system$"#))
        .stdout(predicate::str::contains(
            r"^a list of locations are existed in DB$",
        ))
        .stdout(predicate::str::contains("client version").not());
    Ok(())
}

#[rstest]
#[case::bob("bob", "^(?:a user get|user gets) client version$")]
#[case::usermgmt("usermgmt", r#"^"([^"]*)" create new student account$"#)]
#[case::virtualclassroom("virtualclassroom", "^the learner prepare to publish$")]
fn each_service_lists_its_own_steps(#[case] service: &str, #[case] pattern: &str) -> Result<()> {
    let dir = FeatureDir::new();
    let run = run_campus_bdd_in(dir.path(), &["--service", service, "steps"])?;
    ensure!(run.success, "steps should succeed: {}", run.stderr);
    ensure!(
        run.stdout.lines().any(|line| line == pattern),
        "expected {pattern} in:\n{}",
        run.stdout
    );
    Ok(())
}

#[test]
fn unknown_service_is_rejected_with_the_known_names() -> Result<()> {
    let dir = FeatureDir::new();
    let run = run_campus_bdd_in(dir.path(), &["--service", "payments", "steps"])?;
    ensure!(!run.success, "unknown service should fail");
    let stderr = stderr_text(&run.stderr);
    ensure!(
        stderr.contains("unknown service 'payments'"),
        "stderr should name the service: {stderr}"
    );
    Ok(())
}

#[test]
fn lint_passes_when_every_step_is_defined() -> Result<()> {
    let dir = FeatureDir::new().with("bob/versions.feature", DEFINED);
    let run = run_campus_bdd_in(dir.path(), &["lint"])?;
    ensure!(run.success, "lint should pass: {}", run.stderr);
    ensure!(run.stdout.is_empty(), "nothing to report, got {}", run.stdout);
    Ok(())
}

#[test]
fn lint_reports_undefined_steps_with_their_location() -> Result<()> {
    let dir = FeatureDir::new().with("bob/versions.feature", UNDEFINED);
    let run = run_campus_bdd_in(dir.path(), &["lint"])?;
    ensure!(!run.success, "lint should fail");
    ensure!(
        run.stdout
            .contains("versions.feature:4: no step pattern matches \"user does something nobody wrote\""),
        "stdout should point at the step: {}",
        run.stdout
    );
    let stderr = stderr_text(&run.stderr);
    ensure!(
        stderr.contains("lint found 1 problem(s)"),
        "stderr should summarise: {stderr}"
    );
    Ok(())
}

#[test]
fn lint_honours_the_tag_filter() -> Result<()> {
    let dir = FeatureDir::new()
        .with("bob/versions.feature", DEFINED)
        .with("bob/wip.feature", &format!("@wip\n{UNDEFINED}"));
    let features = dir.arg();
    let run = run_campus_bdd_in(
        dir.path(),
        &["--features", &features, "--tags", "~@wip", "lint"],
    )?;
    ensure!(run.success, "filtered lint should pass: {}", run.stdout);
    Ok(())
}

#[rstest]
#[case::zero("0")]
#[case::too_many("65")]
fn concurrency_outside_the_range_is_rejected(#[case] value: &str) -> Result<()> {
    let mut cmd = Command::cargo_bin("campus-bdd").context("locate campus-bdd binary")?;
    cmd.args(["--concurrency", value, "steps"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency must be between 1 and 64"));
    Ok(())
}

#[test]
fn malformed_tag_expression_is_rejected() -> Result<()> {
    let mut cmd = Command::cargo_bin("campus-bdd").context("locate campus-bdd binary")?;
    cmd.args(["--tags", "@a && ", "steps"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid tag expression"));
    Ok(())
}

#[test]
fn run_fails_when_no_scenario_is_selected() -> Result<()> {
    let dir = FeatureDir::new().with("bob/versions.feature", DEFINED);
    let run = run_campus_bdd_in(dir.path(), &["--tags", "@nothing-has-this", "run"])?;
    ensure!(!run.success, "an empty selection should fail");
    let stderr = stderr_text(&run.stderr);
    ensure!(
        stderr.contains("no scenarios matched"),
        "stderr should explain: {stderr}"
    );
    Ok(())
}

#[rstest]
#[case("bob")]
#[case("mastermgmt")]
#[case("usermgmt")]
#[case("virtualclassroom")]
fn shipped_features_only_use_registered_steps(#[case] service: &str) -> Result<()> {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    let run = run_campus_bdd_in(root, &["--service", service, "lint"])?;
    ensure!(
        run.success,
        "features/{service} should lint cleanly:\n{}{}",
        run.stdout,
        stderr_text(&run.stderr)
    );
    Ok(())
}

#[test]
fn missing_feature_directory_is_reported() -> Result<()> {
    let dir = FeatureDir::new();
    let run = run_campus_bdd_in(dir.path(), &["--service", "virtualclassroom", "lint"])?;
    ensure!(!run.success, "a missing directory should fail");
    let stderr = stderr_text(&run.stderr);
    ensure!(
        stderr.contains("features/virtualclassroom"),
        "stderr should name the directory: {stderr}"
    );
    Ok(())
}
