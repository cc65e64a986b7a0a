//! Core service steps: client versions, chunked uploads and lesson events.

use super::{World, await_event, call, common};
use crate::bus::decode_message;
use crate::context::StepContext;
use crate::registry::{RegistryBuilder, RegistryError, StepArgs};
use crate::rpc::messages::{
    EventLesson, LessonEventKind, RETRIEVE_CLIENT_VERSION, RetrieveClientVersionRequest,
    RetrieveClientVersionResponse, STREAMING_UPLOAD, StreamingUploadRequest,
    StreamingUploadResponse,
};
use crate::rpc::{self, outgoing};
use crate::state::ScenarioState;
use anyhow::{Context as _, Result, bail, ensure};
use itertools::Itertools;
use semver::Version;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Package and minimum version pairs the core service must advertise.
pub const EXPECTED_CLIENT_VERSIONS: [(&str, &str); 3] = [
    ("com.manabie.student_manabie_app", "1.1.0"),
    ("com.manabie.liz", "1.1.0"),
    ("com.manabie.learnermobile", "1.1.0"),
];

/// Largest payload carried by one upload message.
pub const UPLOAD_CHUNK: usize = 64 * 1024;

/// Register the core service steps.
///
/// # Errors
///
/// Propagates pattern registration failures.
pub fn register(steps: &mut RegistryBuilder<World>) -> Result<(), RegistryError> {
    steps
        .step(
            r"^(?:a user get|user gets) client version$",
            user_gets_client_version,
        )?
        .step(
            r"^(?:bob must returns|must return) client version from config$",
            must_return_client_version,
        )?
        .step(
            r#"^user uploads a "([^"]*)" file of (\d+) bytes$"#,
            user_uploads_file,
        )?
        .step(
            r#"^the uploaded file url ends with "([^"]*)"$"#,
            uploaded_url_ends_with,
        )?
        .step(
            r#"^Bob must push msg "([^"]*)" subject "([^"]*)" to nats(?: within "([^"]*)")?$"#,
            bob_must_push_msg,
        )?;
    Ok(())
}

async fn user_gets_client_version(
    world: Arc<World>,
    ctx: StepContext,
    _args: StepArgs,
) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    call::<_, RetrieveClientVersionResponse>(
        &world,
        &ctx,
        &state,
        RETRIEVE_CLIENT_VERSION,
        RetrieveClientVersionRequest {},
    )
    .await?;
    Ok(ctx)
}

async fn must_return_client_version(
    _world: Arc<World>,
    ctx: StepContext,
    _args: StepArgs,
) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let state = state.lock().await;
    let response = state.response::<RetrieveClientVersionResponse>()?;
    check_client_versions(&response.joined_versions)?;
    Ok(ctx)
}

/// Compare a comma-separated `package:version` list with
/// [`EXPECTED_CLIENT_VERSIONS`].
///
/// # Errors
///
/// Fails on a malformed entry, a version that is not semver, or any missing
/// or extra pair.
pub fn check_client_versions(joined: &str) -> Result<()> {
    let mut actual = BTreeSet::new();
    for entry in joined.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (package, version) = entry
            .split_once(':')
            .with_context(|| format!("client version entry '{entry}' has no ':'"))?;
        Version::parse(version.trim())
            .with_context(|| format!("client version '{version}' for {package} is not semver"))?;
        actual.insert((package.trim().to_owned(), version.trim().to_owned()));
    }
    let expected: BTreeSet<(String, String)> = EXPECTED_CLIENT_VERSIONS
        .iter()
        .map(|(package, version)| ((*package).to_owned(), (*version).to_owned()))
        .collect();
    let render = |set: Vec<&(String, String)>| set.iter().map(|(p, v)| format!("{p}:{v}")).join(", ");
    let missing = render(expected.difference(&actual).collect());
    let extra = render(actual.difference(&expected).collect());
    ensure!(
        missing.is_empty() && extra.is_empty(),
        "client versions differ; missing [{missing}], unexpected [{extra}]"
    );
    Ok(())
}

async fn user_uploads_file(
    world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let extension = args.string(0)?;
    let size: usize = args.parse(1)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let chunks = upload_messages(&extension, size);
    let channel = world.connections().channel(STREAMING_UPLOAD.service)?;
    let token = {
        let mut state = state.lock().await;
        state.record_request(chunks.first().cloned().unwrap_or_default());
        state.auth_token.clone()
    };
    let timeout = ctx.bounded(world.config().scenario.timeout());
    let outcome = match outgoing(futures::stream::iter(chunks), token.as_deref(), timeout) {
        Ok(request) => {
            rpc::client_streaming::<_, StreamingUploadRequest, StreamingUploadResponse>(
                channel,
                STREAMING_UPLOAD,
                request,
            )
            .await
        }
        Err(status) => Err(status),
    };
    state.lock().await.record_outcome(outcome);
    Ok(ctx)
}

/// Split a zero-filled file of `size` bytes into upload messages.
///
/// The first message announces the size and extension; every message carries
/// at most [`UPLOAD_CHUNK`] bytes.
#[must_use]
pub fn upload_messages(extension: &str, size: usize) -> Vec<StreamingUploadRequest> {
    let header = StreamingUploadRequest {
        size: i64::try_from(size).unwrap_or(i64::MAX),
        extension: extension.trim_start_matches('.').to_owned(),
        payload: Vec::new(),
    };
    let mut remaining = size;
    let mut messages = vec![header];
    while remaining > 0 {
        let len = remaining.min(UPLOAD_CHUNK);
        messages.push(StreamingUploadRequest {
            payload: vec![0; len],
            ..StreamingUploadRequest::default()
        });
        remaining -= len;
    }
    messages
}

async fn uploaded_url_ends_with(
    _world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let suffix = args.string(0)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let state = state.lock().await;
    let url = &state.response::<StreamingUploadResponse>()?.url;
    ensure!(url.ends_with(&suffix), "upload url {url} does not end with {suffix}");
    Ok(ctx)
}

async fn bob_must_push_msg(
    world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let msg = args.string(0)?;
    let subject = args.string(1)?;
    let within = common::wait_override(&args, 2)?;
    let Some(kind) = lesson_kind(&msg) else {
        bail!("unknown lesson event '{msg}'");
    };
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let lesson_id = state.lock().await.current_lesson_id.clone();
    await_event(&world, &ctx, &state, &subject, within, |message| {
        decode_message::<EventLesson>(message).is_some_and(|event| {
            event.kind == i32::from(kind)
                && lesson_id.as_ref().is_none_or(|id| {
                    event.lessons.iter().any(|lesson| lesson.lesson_id == *id)
                })
        })
    })
    .await
    .with_context(|| format!("waiting for {msg} on {subject}"))?;
    Ok(ctx)
}

fn lesson_kind(msg: &str) -> Option<LessonEventKind> {
    match msg.trim() {
        "CreateLesson" => Some(LessonEventKind::CreateLesson),
        "UpdateLesson" => Some(LessonEventKind::UpdateLesson),
        "DeleteLesson" => Some(LessonEventKind::DeleteLesson),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn exact_versions_pass() {
        check_client_versions(
            "com.manabie.student_manabie_app:1.1.0,com.manabie.liz:1.1.0,com.manabie.learnermobile:1.1.0",
        )
        .expect("matching versions");
    }

    #[rstest]
    #[case("com.manabie.liz:1.1.0,com.manabie.learnermobile:1.1.0", "missing [com.manabie.student_manabie_app:1.1.0]")]
    #[case(
        "com.manabie.student_manabie_app:1.1.0,com.manabie.liz:1.1.0,com.manabie.learnermobile:1.1.0,com.manabie.extra:2.0.0",
        "unexpected [com.manabie.extra:2.0.0]"
    )]
    #[case("com.manabie.liz", "has no ':'")]
    #[case("com.manabie.liz:latest", "is not semver")]
    fn mismatches_are_described(#[case] joined: &str, #[case] fragment: &str) {
        let err = check_client_versions(joined).expect_err("mismatch");
        assert!(format!("{err:#}").contains(fragment), "{err:#}");
    }

    #[test]
    fn uploads_are_chunked_after_a_header() {
        let messages = upload_messages(".png", UPLOAD_CHUNK + 10);
        let sizes: Vec<usize> = messages.iter().map(|m| m.payload.len()).collect();
        assert_eq!(sizes, [0, UPLOAD_CHUNK, 10]);
        assert_eq!(messages.first().map(|m| m.extension.as_str()), Some("png"));
    }

    #[rstest]
    #[case("CreateLesson", Some(LessonEventKind::CreateLesson))]
    #[case(" DeleteLesson ", Some(LessonEventKind::DeleteLesson))]
    #[case("JoinLesson", None)]
    fn lesson_events_are_named_as_in_features(
        #[case] msg: &str,
        #[case] expected: Option<LessonEventKind>,
    ) {
        assert_eq!(lesson_kind(msg), expected);
    }
}
