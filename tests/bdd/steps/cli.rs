//! Steps driving the `campus-bdd` binary against a scratch feature tree.

use crate::bdd::fixtures::TestWorld;
use anyhow::{Context, Result, ensure};
use rstest_bdd::Slot;
use rstest_bdd_macros::{given, then, when};
use test_support::{FeatureDir, run_campus_bdd_in};

fn clean(text: &str) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(text)).into_owned()
}

fn assert_slot_contains(slot: &Slot<String>, fragment: &str, label: &str) -> Result<()> {
    let text = slot.get().with_context(|| format!("{label} should be captured"))?;
    ensure!(
        text.contains(fragment),
        "{label} should contain '{fragment}', got:\n{text}"
    );
    Ok(())
}

#[given("an empty feature tree")]
fn empty_feature_tree(world: &TestWorld) -> Result<()> {
    *world.features.borrow_mut() = Some(FeatureDir::new());
    Ok(())
}

#[given("the feature file {path:string}:")]
fn feature_file(world: &TestWorld, path: &str, docstring: String) -> Result<()> {
    // Doc strings arrive with the newline that follows the opening quotes.
    let contents = docstring.strip_prefix('\n').unwrap_or(&docstring);
    let mut features = world.features.borrow_mut();
    features
        .get_or_insert_with(FeatureDir::new)
        .write(path, contents);
    Ok(())
}

#[when("campus-bdd is run with {args:string}")]
fn run_with(world: &TestWorld, args: &str) -> Result<()> {
    let features = world.features.borrow();
    let dir = features
        .as_ref()
        .context("no feature tree has been prepared")?;
    let args: Vec<&str> = args.split_whitespace().collect();
    let run = run_campus_bdd_in(dir.path(), &args)?;
    world.run_status.set(run.success);
    world.command_stdout.set(clean(&run.stdout));
    world.command_stderr.set(clean(&run.stderr));
    Ok(())
}

#[then("the command succeeds")]
fn command_succeeds(world: &TestWorld) -> Result<()> {
    let status = world.run_status.get().context("the command has not run")?;
    ensure!(
        status,
        "expected success, stderr:\n{}",
        world.command_stderr.get().unwrap_or_default()
    );
    Ok(())
}

#[then("the command fails")]
fn command_fails(world: &TestWorld) -> Result<()> {
    let status = world.run_status.get().context("the command has not run")?;
    ensure!(!status, "expected failure");
    Ok(())
}

#[then("stdout contains {fragment:string}")]
fn stdout_contains(world: &TestWorld, fragment: &str) -> Result<()> {
    assert_slot_contains(&world.command_stdout, fragment, "stdout")
}

#[then("stderr contains {fragment:string}")]
fn stderr_contains(world: &TestWorld, fragment: &str) -> Result<()> {
    assert_slot_contains(&world.command_stderr, fragment, "stderr")
}

#[then("stdout is empty")]
fn stdout_is_empty(world: &TestWorld) -> Result<()> {
    let stdout = world.command_stdout.get().unwrap_or_default();
    ensure!(stdout.is_empty(), "expected no output, got:\n{stdout}");
    Ok(())
}
