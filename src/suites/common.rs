//! Steps every suite shares: signing in, status codes, random values, pauses
//! and event subscriptions.

use super::World;
use crate::auth::AccountKind;
use crate::bus::RawWaiter;
use crate::context::{SharedState, StepContext};
use crate::ids;
use crate::registry::{RegistryBuilder, RegistryError, StepArgs};
use crate::rpc::code_name;
use crate::state::ScenarioState;
use anyhow::{Context as _, Result, bail, ensure};
use std::sync::Arc;
use std::time::Duration;

/// Messages a waiter keeps before evicting the oldest.
pub const WAITER_CAPACITY: usize = 64;

/// Register the shared steps.
///
/// # Errors
///
/// Propagates pattern registration failures.
pub fn register(steps: &mut RegistryBuilder<World>) -> Result<(), RegistryError> {
    steps
        .step(r#"^"([^"]*)" signin system$"#, signin_system)?
        .step(
            r#"^(?:returns|receives) "([^"]*)" status code$"#,
            returns_status_code,
        )?
        .step(r"^a random number$", a_random_number)?
        .step(r"^a random number in range (\d+)$", a_random_number_in_range)?
        .step(r#"^waiting for "([^"]*)"$"#, waiting_for)?
        .step(
            r#"^listening for messages on subject "([^"]*)"$"#,
            listening_on_subject,
        )?;
    Ok(())
}

async fn signin_system(world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    sign_in_as(&world, ctx, args.parse(0)?).await
}

/// Sign in as a fresh account of `kind` and make it the caller of later
/// requests.
///
/// # Errors
///
/// Fails when the account cannot be seeded or its token minted.
pub async fn sign_in_as(world: &World, ctx: StepContext, kind: AccountKind) -> Result<StepContext> {
    let signed = world.sign_in(kind).await?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let mut state = state.lock().await;
    state.auth_token = Some(signed.token);
    state.current_user_group = signed.group.map(|group| group.as_str().to_owned());
    state.current_user_id = Some(signed.user_id);
    Ok(ctx)
}

async fn returns_status_code(
    _world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let expected = args.string(0)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let state = state.lock().await;
    ensure!(state.has_outcome(), "no call has been made yet");
    let (actual, message) = state
        .response_err()
        .map_or(("OK", ""), |status| (code_name(status.code()), status.message()));
    ensure!(
        actual == expected,
        "expected status {expected} but got {actual}: {message}"
    );
    Ok(ctx)
}

async fn a_random_number(_world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    state.lock().await.random = Some(ids::random_number());
    Ok(ctx)
}

async fn a_random_number_in_range(
    _world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let upper: u32 = args.parse(0)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    state.lock().await.random = Some(ids::random_below(upper).to_string());
    Ok(ctx)
}

async fn waiting_for(_world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    let wanted = parse_wait(&args.string(0)?)?;
    let pause = ctx.bounded(wanted);
    ensure!(
        pause == wanted,
        "waiting {wanted:?} would overrun the scenario deadline"
    );
    tokio::time::sleep(pause).await;
    Ok(ctx)
}

async fn listening_on_subject(
    world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let subject = args.string(0)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    listen_on(&world, &state, &subject).await?;
    Ok(ctx)
}

/// Arm a waiter for `subject` so a later wait sees messages published from
/// now on.
///
/// # Errors
///
/// Fails when the bus refuses the subscription.
pub async fn listen_on(world: &World, state: &SharedState<ScenarioState>, subject: &str) -> Result<()> {
    let waiter = RawWaiter::raw(world.connections().bus(), subject, WAITER_CAPACITY)
        .await
        .with_context(|| format!("listen on {subject}"))?;
    state.lock().await.arm_waiter(waiter);
    Ok(())
}

/// Parse a wait such as `500ms`, `2s`, `1m` or a bare number of seconds.
///
/// # Errors
///
/// Fails on an unknown unit or a malformed number.
pub fn parse_wait(text: &str) -> Result<Duration> {
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let amount: u64 = digits
        .parse()
        .with_context(|| format!("'{text}' does not start with a number"))?;
    Ok(match unit.trim() {
        "ms" => Duration::from_millis(amount),
        "" | "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        other => bail!("unknown unit '{other}' in '{text}'"),
    })
}

/// Resolve an optional per-step `within "<wait>"` capture.
///
/// # Errors
///
/// Fails when the capture is present but malformed.
pub fn wait_override(args: &StepArgs, index: usize) -> Result<Option<Duration>> {
    args.optional(index).map(parse_wait).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("500ms", Duration::from_millis(500))]
    #[case("2s", Duration::from_secs(2))]
    #[case(" 3 ", Duration::from_secs(3))]
    #[case("1m", Duration::from_secs(60))]
    fn waits_parse(#[case] text: &str, #[case] expected: Duration) {
        assert_eq!(parse_wait(text).expect("valid wait"), expected);
    }

    #[rstest]
    #[case("soon")]
    #[case("5h")]
    #[case("")]
    fn malformed_waits_are_rejected(#[case] text: &str) {
        assert!(parse_wait(text).is_err());
    }

    #[test]
    fn missing_override_falls_back() {
        let args = StepArgs::new(vec![Some("x".to_owned()), None]);
        assert_eq!(wait_override(&args, 1).expect("no override"), None);
        let args = StepArgs::new(vec![Some("x".to_owned()), Some("250ms".to_owned())]);
        assert_eq!(
            wait_override(&args, 1).expect("override"),
            Some(Duration::from_millis(250))
        );
    }
}
