//! Tests for scenario state bookkeeping.

use super::*;
use crate::bus::{EventBus, MemoryBus};
use bytes::Bytes;
use rstest::{fixture, rstest};
use std::time::Duration;
use tonic::Code;

#[fixture]
fn state() -> ScenarioState {
    ScenarioState::default()
}

#[rstest]
fn response_is_downcast_to_the_recorded_type(mut state: ScenarioState) {
    state.record_request("ping".to_owned());
    state.record_outcome(Ok::<_, Status>(42_u32));
    assert_eq!(state.response::<u32>().ok(), Some(&42));
    assert_eq!(state.request::<String>().map(String::as_str).ok(), Some("ping"));
    assert!(state.request_sent_at.is_some());
}

#[rstest]
fn wrong_type_names_the_expected_type(mut state: ScenarioState) {
    state.record_outcome(Ok::<_, Status>(42_u32));
    let err = state.response::<String>().expect_err("type mismatch");
    assert!(err.to_string().contains("String"), "{err}");
}

#[rstest]
fn failed_call_is_captured_not_raised(mut state: ScenarioState) {
    state.record_outcome(Err::<u32, _>(Status::permission_denied("nope")));
    assert_eq!(state.response_err().map(Status::code), Some(Code::PermissionDenied));
    let err = state.response::<u32>().expect_err("call failed");
    assert!(err.to_string().contains("PermissionDenied"), "{err}");
}

#[rstest]
fn new_request_clears_the_previous_outcome(mut state: ScenarioState) {
    state.record_outcome(Err::<u32, _>(Status::internal("boom")));
    state.record_request(1_u8);
    assert!(!state.has_outcome());
}

#[derive(Debug, Default, PartialEq)]
struct Scratch {
    hits: u32,
}

#[rstest]
fn extensions_persist_between_calls(mut state: ScenarioState) {
    state.with_extension(|scratch: &mut Scratch| scratch.hits += 1);
    let hits = state.with_extension(|scratch: &mut Scratch| {
        scratch.hits += 1;
        scratch.hits
    });
    assert_eq!(hits, 2);
    assert_eq!(state.peek_extension::<Scratch>(), Some(&Scratch { hits: 2 }));
}

#[rstest]
fn missing_waiter_is_an_error(mut state: ScenarioState) {
    let err = state.take_waiter("Lesson.Created").expect_err("nothing armed");
    assert!(err.to_string().contains("Lesson.Created"));
}

#[rstest]
#[tokio::test]
async fn armed_waiters_are_collected_by_subject(mut state: ScenarioState) {
    let bus = MemoryBus::new();
    let waiter = RawWaiter::raw(&bus, "Lesson.Created", 4).await.expect("arm");
    state.arm_waiter(waiter);
    bus.publish("Lesson.Created", Bytes::from_static(b"x"))
        .await
        .expect("publish");
    let mut armed = state.take_waiter("Lesson.Created").expect("armed");
    let message = armed.wait(Duration::from_secs(1)).await.expect("delivered");
    assert_eq!(message.payload, Bytes::from_static(b"x"));
}

#[rstest]
#[tokio::test]
async fn take_subscriptions_empties_the_state(mut state: ScenarioState) {
    let bus = MemoryBus::new();
    state.arm_waiter(RawWaiter::raw(&bus, "a.b", 1).await.expect("arm"));
    let (subscriptions, waiters) = state.take_subscriptions();
    assert!(subscriptions.is_empty());
    assert_eq!(waiters.len(), 1);
    assert!(state.take_subscriptions().1.is_empty());
}
