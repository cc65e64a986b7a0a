//! Virtual classroom steps: stream publishing admission and its races.
//!
//! A lesson keeps a counter of learners currently publishing a stream. The
//! service admits a learner while the counter is below the configured cap,
//! reports `prepared before` for a learner already admitted and refuses the
//! rest. Race steps fire several requests at once and record every outcome
//! so later steps can count them.

use super::{PRIMARY_DATABASE, World, call, send};
use crate::auth::{NewUser, UserGroup};
use crate::context::{SharedState, StepContext};
use crate::ids;
use crate::registry::{RegistryBuilder, RegistryError, StepArgs};
use crate::rpc::code_name;
use crate::rpc::messages::{
    PREPARE_TO_PUBLISH, PrepareToPublishRequest, PrepareToPublishResponse, PrepareToPublishStatus,
    UNPUBLISH, UnpublishRequest, UnpublishResponse, UnpublishStatus,
};
use crate::state::ScenarioState;
use anyhow::{Context as _, Result, bail, ensure};
use futures::future::join_all;
use itertools::Itertools;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tonic::Code;

/// Learners created by `some valid learners in database`.
pub const DEFAULT_LEARNERS: usize = 3;

/// Length of a seeded lesson.
const LESSON_LENGTH: Duration = Duration::from_secs(60 * 60);

/// Register the virtual classroom steps.
///
/// # Errors
///
/// Propagates pattern registration failures.
pub fn register(steps: &mut RegistryBuilder<World>) -> Result<(), RegistryError> {
    steps
        .step(r"^a valid lesson in database$", a_valid_lesson)?
        .step(r"^some valid learners in database$", some_valid_learners)?
        .step(r#"^"(\d+)" valid learners in database$"#, counted_valid_learners)?
        .step(
            r#"^a "([^"]*)" number of stream of the lesson$"#,
            a_number_of_streams,
        )?
        .step(r"^the learner prepare to publish$", the_learner_prepares)?
        .step(r#"^returns the response "([^"]*)"$"#, returns_prepare_response)?
        .step(
            r"^the number of stream of the lesson have to (increasing|unchanged)$",
            stream_counter_moved,
        )?
        .step(r"^the learner unpublish$", the_learner_unpublishes)?
        .step(
            r#"^unpublish returns the response "([^"]*)"$"#,
            returns_unpublish_response,
        )?
        .step(
            r"^two learners prepare to publish in concurrently$",
            two_learners_race,
        )?
        .step(
            r"^the learner prepare to publish twice in concurrently$",
            one_learner_races_twice,
        )?
        .step(
            r"^(\d+) learners prepare to publish concurrently$",
            many_learners_race,
        )?
        .step(
            r#"^(\d+) of the race requests returned "([^"]*)"$"#,
            race_requests_returned,
        )?
        .step(
            r#"^returns "([^"]*)" status for both requests$"#,
            every_race_request_returned,
        )?
        .step(
            r"^the lesson's learner counter have to increasing two$",
            counter_increased_by_two,
        )?
        .step(
            r"^the lesson's learner counter have to maximum$",
            counter_at_maximum,
        )?;
    Ok(())
}

/// Parse a publish status as written in a feature.
///
/// Accepts the wire name (`PREPARE_TO_PUBLISH_STATUS_PREPARED_BEFORE`) or its
/// short form (`prepared before`), ignoring case.
///
/// # Errors
///
/// Fails for any other text.
pub fn parse_prepare_status(text: &str) -> Result<PrepareToPublishStatus> {
    let key = normalise_status(text);
    let short = key
        .strip_prefix("PREPARE_TO_PUBLISH_STATUS_")
        .or_else(|| key.strip_prefix("PREPARE_PUBLISH_STATUS_"))
        .unwrap_or(key.as_str());
    match short {
        "NONE" => Ok(PrepareToPublishStatus::None),
        "PREPARED_BEFORE" => Ok(PrepareToPublishStatus::PreparedBefore),
        "MAX_LIMIT" | "REACHED_MAX_UPSTREAM_LIMIT" => {
            Ok(PrepareToPublishStatus::ReachedMaxUpstreamLimit)
        }
        _ => bail!("unknown publish status '{text}'"),
    }
}

/// Parse an unpublish status as written in a feature.
///
/// # Errors
///
/// Fails for anything but `none` or `unpublished before` and their wire
/// names.
pub fn parse_unpublish_status(text: &str) -> Result<UnpublishStatus> {
    let key = normalise_status(text);
    let short = key
        .strip_prefix("UNPUBLISH_STATUS_")
        .unwrap_or(key.as_str())
        .trim_start_matches("UNPUBLISHED_");
    match short {
        "NONE" => Ok(UnpublishStatus::None),
        "BEFORE" => Ok(UnpublishStatus::UnpublishedBefore),
        _ => bail!("unknown unpublish status '{text}'"),
    }
}

fn normalise_status(text: &str) -> String {
    text.trim()
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|part| !part.is_empty())
        .join("_")
        .to_uppercase()
}

/// Wire name of a publish status.
#[must_use]
pub const fn prepare_status_name(status: PrepareToPublishStatus) -> &'static str {
    match status {
        PrepareToPublishStatus::None => "PREPARE_TO_PUBLISH_STATUS_NONE",
        PrepareToPublishStatus::PreparedBefore => "PREPARE_TO_PUBLISH_STATUS_PREPARED_BEFORE",
        PrepareToPublishStatus::ReachedMaxUpstreamLimit => {
            "PREPARE_TO_PUBLISH_STATUS_REACHED_MAX_UPSTREAM_LIMIT"
        }
    }
}

/// Outcome of one request in a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceOutcome {
    /// The service answered with a publish status.
    Answered(PrepareToPublishStatus),
    /// The call failed with a gRPC code.
    Failed(Code),
}

impl RaceOutcome {
    fn from_result(outcome: &Result<PrepareToPublishResponse, tonic::Status>) -> Self {
        match outcome {
            Ok(response) => Self::Answered(response.status()),
            Err(status) => Self::Failed(status.code()),
        }
    }

    /// Whether the outcome is what `expected` names: a publish status or a
    /// gRPC code name.
    #[must_use]
    pub fn matches(self, expected: &str) -> bool {
        match self {
            Self::Answered(status) => parse_prepare_status(expected).is_ok_and(|want| want == status),
            Self::Failed(code) => code_name(code).eq_ignore_ascii_case(expected.trim()),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Answered(status) => prepare_status_name(status),
            Self::Failed(code) => code_name(code),
        }
    }
}

/// Outcomes of the last race, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RaceOutcomes(Vec<RaceOutcome>);

/// Stream counter read just before the last publish request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CounterBefore(Option<i32>);

/// Count the outcomes that match `expected`.
#[must_use]
pub fn count_matching(outcomes: &[RaceOutcome], expected: &str) -> usize {
    outcomes.iter().filter(|outcome| outcome.matches(expected)).count()
}

fn describe(outcomes: &[RaceOutcome]) -> String {
    outcomes.iter().map(|outcome| outcome.label()).join(", ")
}

async fn a_valid_lesson(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let (teacher_id, resource_path) = {
        let state = state.lock().await;
        (
            state.current_user_id.clone().unwrap_or_default(),
            state
                .resource_path
                .clone()
                .unwrap_or_else(|| world.config().identity.resource_path.clone()),
        )
    };
    let lesson_id = ids::new_id();
    let now = OffsetDateTime::now_utc();
    sqlx::query(
        "INSERT INTO lessons (lesson_id, name, teacher_id, start_time, end_time, \
         stream_learner_counter, learner_ids, resource_path, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, 0, '{}', $6, $4, $4)",
    )
    .bind(&lesson_id)
    .bind(format!("lesson {}", ids::random_suffix()))
    .bind(&teacher_id)
    .bind(now)
    .bind(now + LESSON_LENGTH)
    .bind(&resource_path)
    .execute(world.database(PRIMARY_DATABASE)?)
    .await
    .context("insert lesson")?;
    tracing::debug!(%lesson_id, "lesson seeded");

    let learners = state.lock().await.learner_ids.clone();
    if !learners.is_empty() {
        enrol(&world, &lesson_id, &learners).await?;
    }
    state.lock().await.current_lesson_id = Some(lesson_id);
    Ok(ctx)
}

async fn some_valid_learners(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    seed_learners(&world, ctx, DEFAULT_LEARNERS).await
}

async fn counted_valid_learners(world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    let count: usize = args.parse(0)?;
    ensure!(count > 0, "at least one learner is needed");
    seed_learners(&world, ctx, count).await
}

async fn seed_learners(world: &World, ctx: StepContext, count: usize) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let config = &world.config().identity;
    let store = world.accounts()?;
    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        let learner = NewUser::generated(UserGroup::Student, config.school_id, &config.resource_path);
        store.insert_user(&learner).await?;
        created.push(learner.user_id);
    }
    let lesson_id = state.lock().await.current_lesson_id.clone();
    if let Some(lesson_id) = lesson_id {
        enrol(world, &lesson_id, &created).await?;
    }
    state.lock().await.learner_ids.extend(created);
    Ok(ctx)
}

async fn enrol(world: &World, lesson_id: &str, learners: &[String]) -> Result<()> {
    sqlx::query(
        "UPDATE lessons SET learner_ids = array_cat(learner_ids, $2), updated_at = now() \
         WHERE lesson_id = $1",
    )
    .bind(lesson_id)
    .bind(learners)
    .execute(world.database(PRIMARY_DATABASE)?)
    .await
    .with_context(|| format!("enrol {} learner(s) in lesson {lesson_id}", learners.len()))?;
    Ok(())
}

async fn a_number_of_streams(world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    let count = stream_count(&args.string(0)?, world.config().lessons.max_streaming_learners)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let lesson_id = current_lesson(&state).await?;
    sqlx::query("UPDATE lessons SET stream_learner_counter = $2 WHERE lesson_id = $1")
        .bind(&lesson_id)
        .bind(i32::try_from(count).context("stream count out of range")?)
        .execute(world.database(PRIMARY_DATABASE)?)
        .await
        .context("set lesson stream counter")?;
    Ok(ctx)
}

/// Resolve a stream count written as a number, `max` or `max-<n>`.
///
/// # Errors
///
/// Fails on malformed text or a count outside `0..=max`.
pub fn stream_count(raw: &str, max: u32) -> Result<u32> {
    let text = raw.trim().to_ascii_lowercase();
    let count = match text.strip_prefix("max") {
        Some("") => max,
        Some(rest) => {
            let below: u32 = rest
                .trim()
                .strip_prefix('-')
                .with_context(|| format!("'{raw}' should read max-<n>"))?
                .trim()
                .parse()
                .with_context(|| format!("'{raw}' should read max-<n>"))?;
            max.checked_sub(below)
                .with_context(|| format!("'{raw}' is below zero for a cap of {max}"))?
        }
        None => text
            .parse()
            .with_context(|| format!("'{raw}' is neither a number nor \"max\""))?,
    };
    ensure!(count <= max, "{count} streams exceed the cap of {max}");
    Ok(count)
}

async fn current_lesson(state: &SharedState<ScenarioState>) -> Result<String> {
    state
        .lock()
        .await
        .current_lesson_id
        .clone()
        .context("no lesson was seeded in this scenario")
}

async fn learners(state: &SharedState<ScenarioState>, count: usize) -> Result<Vec<String>> {
    let learners = state.lock().await.learner_ids.clone();
    ensure!(
        learners.len() >= count,
        "{count} learner(s) needed but only {} were seeded",
        learners.len()
    );
    Ok(learners.into_iter().take(count).collect())
}

async fn first_learner(state: &SharedState<ScenarioState>) -> Result<String> {
    state
        .lock()
        .await
        .learner_ids
        .first()
        .cloned()
        .context("no learner was seeded in this scenario")
}

async fn stream_counter(world: &World, lesson_id: &str) -> Result<i32> {
    let (counter,): (i32,) =
        sqlx::query_as("SELECT stream_learner_counter FROM lessons WHERE lesson_id = $1")
            .bind(lesson_id)
            .fetch_one(world.database(PRIMARY_DATABASE)?)
            .await
            .with_context(|| format!("read stream counter of lesson {lesson_id}"))?;
    Ok(counter)
}

async fn snapshot_counter(world: &World, state: &SharedState<ScenarioState>, lesson_id: &str) -> Result<()> {
    let before = stream_counter(world, lesson_id).await?;
    state
        .lock()
        .await
        .with_extension(|slot: &mut CounterBefore| *slot = CounterBefore(Some(before)));
    Ok(())
}

async fn the_learner_prepares(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let lesson_id = current_lesson(&state).await?;
    let learner_id = first_learner(&state).await?;
    snapshot_counter(&world, &state, &lesson_id).await?;
    call::<_, PrepareToPublishResponse>(
        &world,
        &ctx,
        &state,
        PREPARE_TO_PUBLISH,
        PrepareToPublishRequest {
            lesson_id,
            learner_id,
        },
    )
    .await?;
    Ok(ctx)
}

async fn returns_prepare_response(
    _world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let expected = parse_prepare_status(&args.string(0)?)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let actual = state.lock().await.response::<PrepareToPublishResponse>()?.status();
    ensure!(
        actual == expected,
        "expected {} but got {}",
        prepare_status_name(expected),
        prepare_status_name(actual)
    );
    Ok(ctx)
}

async fn stream_counter_moved(world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    let moved = i32::from(args.string(0)? == "increasing");
    counter_moved_by(&world, ctx, moved).await
}

async fn counter_increased_by_two(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    counter_moved_by(&world, ctx, 2).await
}

/// Compare the counter with the snapshot taken before the last publish
/// request or race.
async fn counter_moved_by(world: &World, ctx: StepContext, moved: i32) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let lesson_id = current_lesson(&state).await?;
    let before = state
        .lock()
        .await
        .peek_extension::<CounterBefore>()
        .and_then(|snapshot| snapshot.0)
        .context("no publish request was made in this scenario")?;
    let after = stream_counter(world, &lesson_id).await?;
    let wanted = before + moved;
    ensure!(
        after == wanted,
        "stream counter was {before} before the request and is {after} now; expected {wanted}"
    );
    Ok(ctx)
}

async fn the_learner_unpublishes(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let lesson_id = current_lesson(&state).await?;
    let learner_id = first_learner(&state).await?;
    call::<_, UnpublishResponse>(
        &world,
        &ctx,
        &state,
        UNPUBLISH,
        UnpublishRequest {
            lesson_id,
            learner_id,
        },
    )
    .await?;
    Ok(ctx)
}

async fn returns_unpublish_response(
    _world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let expected = parse_unpublish_status(&args.string(0)?)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let actual = state.lock().await.response::<UnpublishResponse>()?.status();
    ensure!(actual == expected, "expected {expected:?} but got {actual:?}");
    Ok(ctx)
}

/// Send one publish request per entry of `learner_ids` at once and keep
/// every outcome.
async fn race(world: &World, ctx: StepContext, learner_ids: Vec<String>) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let lesson_id = current_lesson(&state).await?;
    snapshot_counter(world, &state, &lesson_id).await?;
    tracing::debug!(requests = learner_ids.len(), %lesson_id, "racing publish requests");
    let requests = learner_ids.into_iter().map(|learner_id| {
        send::<_, PrepareToPublishResponse>(
            world,
            &ctx,
            &state,
            PREPARE_TO_PUBLISH,
            PrepareToPublishRequest {
                lesson_id: lesson_id.clone(),
                learner_id,
            },
        )
    });
    let mut outcomes = Vec::new();
    for outcome in join_all(requests).await {
        outcomes.push(RaceOutcome::from_result(&outcome?));
    }
    tracing::debug!(outcomes = %describe(&outcomes), "race finished");
    state
        .lock()
        .await
        .with_extension(|slot: &mut RaceOutcomes| *slot = RaceOutcomes(outcomes));
    Ok(ctx)
}

async fn two_learners_race(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let learner_ids = learners(&state, 2).await?;
    race(&world, ctx, learner_ids).await
}

async fn one_learner_races_twice(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let learner_id = first_learner(&state).await?;
    race(&world, ctx, vec![learner_id.clone(), learner_id]).await
}

async fn many_learners_race(world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    let count: usize = args.parse(0)?;
    ensure!(count > 0, "a race needs at least one request");
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let learner_ids = learners(&state, count).await?;
    race(&world, ctx, learner_ids).await
}

async fn race_outcomes(state: &SharedState<ScenarioState>) -> Result<Vec<RaceOutcome>> {
    state
        .lock()
        .await
        .peek_extension::<RaceOutcomes>()
        .map(|outcomes| outcomes.0.clone())
        .context("no race was run in this scenario")
}

async fn race_requests_returned(
    _world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let wanted: usize = args.parse(0)?;
    let expected = args.string(1)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let outcomes = race_outcomes(&state).await?;
    let found = count_matching(&outcomes, &expected);
    ensure!(
        found == wanted,
        "{found} of {} request(s) returned {expected}, expected {wanted}: {}",
        outcomes.len(),
        describe(&outcomes)
    );
    Ok(ctx)
}

async fn every_race_request_returned(
    _world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let expected = args.string(0)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let outcomes = race_outcomes(&state).await?;
    ensure!(
        count_matching(&outcomes, &expected) == outcomes.len(),
        "not every request returned {expected}: {}",
        describe(&outcomes)
    );
    Ok(ctx)
}

async fn counter_at_maximum(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let lesson_id = current_lesson(&state).await?;
    let counter = stream_counter(&world, &lesson_id).await?;
    let max = world.config().lessons.max_streaming_learners;
    ensure!(
        i64::from(counter) == i64::from(max),
        "stream counter is {counter}, expected the cap of {max}"
    );
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("none", PrepareToPublishStatus::None)]
    #[case("prepared before", PrepareToPublishStatus::PreparedBefore)]
    #[case("Max Limit", PrepareToPublishStatus::ReachedMaxUpstreamLimit)]
    #[case("PREPARE_PUBLISH_STATUS_PREPARED_BEFORE", PrepareToPublishStatus::PreparedBefore)]
    #[case(
        "PREPARE_TO_PUBLISH_STATUS_REACHED_MAX_UPSTREAM_LIMIT",
        PrepareToPublishStatus::ReachedMaxUpstreamLimit
    )]
    fn publish_statuses_parse(#[case] text: &str, #[case] expected: PrepareToPublishStatus) {
        assert_eq!(parse_prepare_status(text).expect("status"), expected);
    }

    #[rstest]
    #[case("none", UnpublishStatus::None)]
    #[case("unpublished before", UnpublishStatus::UnpublishedBefore)]
    #[case("UNPUBLISH_STATUS_UNPUBLISHED_NONE", UnpublishStatus::None)]
    #[case("UNPUBLISH_STATUS_UNPUBLISHED_BEFORE", UnpublishStatus::UnpublishedBefore)]
    fn unpublish_statuses_parse(#[case] text: &str, #[case] expected: UnpublishStatus) {
        assert_eq!(parse_unpublish_status(text).expect("status"), expected);
    }

    #[rstest]
    #[case("0", 0)]
    #[case(" 4 ", 4)]
    #[case("max", 13)]
    #[case("MAX", 13)]
    #[case("max-1", 12)]
    #[case("max - 13", 0)]
    fn stream_counts_resolve_against_the_cap(#[case] raw: &str, #[case] expected: u32) {
        assert_eq!(stream_count(raw, 13).expect("count"), expected);
    }

    #[rstest]
    #[case("14")]
    #[case("max-14")]
    #[case("max+1")]
    #[case("many")]
    fn stream_counts_outside_the_cap_are_rejected(#[case] raw: &str) {
        assert!(stream_count(raw, 13).is_err(), "{raw} should be rejected");
    }

    #[test]
    fn unknown_statuses_are_rejected() {
        assert!(parse_prepare_status("published").is_err());
        assert!(parse_unpublish_status("prepared before").is_err());
    }

    #[test]
    fn race_outcomes_are_counted_by_status_or_code() {
        let outcomes = [
            RaceOutcome::Answered(PrepareToPublishStatus::None),
            RaceOutcome::Answered(PrepareToPublishStatus::ReachedMaxUpstreamLimit),
            RaceOutcome::Answered(PrepareToPublishStatus::ReachedMaxUpstreamLimit),
            RaceOutcome::Failed(Code::Unavailable),
        ];
        assert_eq!(count_matching(&outcomes, "none"), 1);
        assert_eq!(count_matching(&outcomes, "max limit"), 2);
        assert_eq!(count_matching(&outcomes, "Unavailable"), 1);
        assert_eq!(count_matching(&outcomes, "prepared before"), 0);
    }

    #[test]
    fn outcomes_map_from_call_results() {
        let admitted = Ok(PrepareToPublishResponse {
            status: i32::from(PrepareToPublishStatus::PreparedBefore),
        });
        let refused = Err(tonic::Status::resource_exhausted("full"));
        assert_eq!(
            RaceOutcome::from_result(&admitted),
            RaceOutcome::Answered(PrepareToPublishStatus::PreparedBefore)
        );
        assert_eq!(
            RaceOutcome::from_result(&refused),
            RaceOutcome::Failed(Code::ResourceExhausted)
        );
        assert_eq!(
            describe(&[RaceOutcome::from_result(&admitted), RaceOutcome::from_result(&refused)]),
            "PREPARE_TO_PUBLISH_STATUS_PREPARED_BEFORE, ResourceExhausted"
        );
    }
}
