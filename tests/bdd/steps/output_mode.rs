//! Steps for output-mode detection.
//!
//! The environment is simulated in [`TestWorld`] so scenarios never mutate
//! the real process environment.

use crate::bdd::fixtures::TestWorld;
use anyhow::{Result, anyhow, ensure};
use campus_bdd::output_mode::{self, OutputMode};
use rstest_bdd_macros::{given, then, when};

fn simulated_env(world: &TestWorld) -> impl Fn(&str) -> Option<String> + '_ {
    move |key| match key {
        "NO_COLOR" => world.simulated_no_color.get(),
        "TERM" => world.simulated_term.get(),
        _ => None,
    }
}

#[given("the simulated TERM is {value:string}")]
fn simulated_term(world: &TestWorld, value: &str) -> Result<()> {
    world.simulated_term.set(value.to_owned());
    Ok(())
}

#[given("the simulated NO_COLOR is {value:string}")]
fn simulated_no_color(world: &TestWorld, value: &str) -> Result<()> {
    world.simulated_no_color.set(value.to_owned());
    Ok(())
}

#[when("the output mode is resolved with no explicit setting")]
fn resolve_without_flag(world: &TestWorld) -> Result<()> {
    let mode = output_mode::resolve_with(None, simulated_env(world));
    world.output_mode.set(format!("{mode:?}"));
    Ok(())
}

#[when("the output mode is resolved with accessible set to false")]
fn resolve_forced_off(world: &TestWorld) -> Result<()> {
    let mode = output_mode::resolve_with(Some(false), simulated_env(world));
    world.output_mode.set(format!("{mode:?}"));
    Ok(())
}

fn verify(world: &TestWorld, expected: OutputMode) -> Result<()> {
    let actual = world
        .output_mode
        .get()
        .ok_or_else(|| anyhow!("output mode has not been resolved"))?;
    let expected = format!("{expected:?}");
    ensure!(actual == expected, "expected output mode {expected}, got {actual}");
    Ok(())
}

#[then("the output mode is accessible")]
fn mode_is_accessible(world: &TestWorld) -> Result<()> {
    verify(world, OutputMode::Accessible)
}

#[then("the output mode is standard")]
fn mode_is_standard(world: &TestWorld) -> Result<()> {
    verify(world, OutputMode::Standard)
}
