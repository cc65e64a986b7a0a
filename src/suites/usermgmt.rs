//! User management steps: creating students and parents.
//!
//! A create step arms its own waiter on [`USER_CREATED_SUBJECT`] before the
//! request goes out, so the success assertion can wait for the creation
//! event without a separate listening step.

use super::common::{listen_on, sign_in_as};
use super::{World, await_event, call};
use crate::auth::{AccountKind, NewUser, UserGroup};
use crate::bus::{BusMessage, decode_message};
use crate::context::StepContext;
use crate::ids;
use crate::registry::{RegistryBuilder, RegistryError, StepArgs};
use crate::rpc::messages::{
    CREATE_PARENTS_AND_ASSIGN_TO_STUDENT, CREATE_STUDENT, CreateParentsAndAssignToStudentRequest,
    CreateParentsAndAssignToStudentResponse, CreateStudentRequest, CreateStudentResponse,
    CreatedUser, EvtUser, FamilyRelationship, Gender, NewParentProfile, NewStudentProfile,
    StudentEnrollmentStatus, evt_user,
};
use crate::state::ScenarioState;
use anyhow::{Context as _, Result, bail, ensure};
use std::sync::Arc;

/// Subject the service publishes user creation events on.
pub const USER_CREATED_SUBJECT: &str = "User.Created";

const COUNTRY: &str = "COUNTRY_VN";

#[derive(Debug, Default)]
struct StudentDraft(Option<CreateStudentRequest>);

#[derive(Debug, Default)]
struct ParentDraft(Option<CreateParentsAndAssignToStudentRequest>);

/// Register the user management steps.
///
/// # Errors
///
/// Propagates pattern registration failures.
pub fn register(steps: &mut RegistryBuilder<World>) -> Result<(), RegistryError> {
    steps
        .step(r"^only student info$", only_student_info)?
        .step(r#"^student data missing "([^"]*)"$"#, student_data_missing)?
        .step(
            r#"^"([^"]*)" create new student account$"#,
            create_new_student_account,
        )?
        .step(
            r"^new student account created success with student info$",
            student_account_created,
        )?
        .step(r#"^"([^"]*)" cannot create that account$"#, cannot_create_account)?
        .step(r"^new parents data$", new_parents_data)?
        .step(
            r#"^parent data has empty or invalid "([^"]*)"$"#,
            parent_data_invalid,
        )?
        .step(r#"^"([^"]*)" create new parents$"#, create_new_parents)?
        .step(r"^new parents were created successfully$", parents_created)?;
    Ok(())
}

/// A complete student creation request with generated, unique values.
#[must_use]
pub fn student_request(school_id: i32) -> CreateStudentRequest {
    let id = ids::new_id();
    CreateStudentRequest {
        school_id,
        student_profile: Some(NewStudentProfile {
            email: format!("{id}@example.com"),
            password: format!("password-{id}"),
            name: format!("user-{id}"),
            country_code: COUNTRY.to_owned(),
            enrollment_status: StudentEnrollmentStatus::Enrolled.into(),
            phone_number: format!("phone-number-{id}"),
            student_external_id: format!("student-external-id-{id}"),
            student_note: format!("some random student note {id}"),
            grade: 5,
            gender: Gender::Male.into(),
            location_ids: Vec::new(),
        }),
    }
}

/// Clear `field` of a student profile, as named in feature files.
///
/// # Errors
///
/// Fails for a field the step does not know.
pub fn blank_student_field(profile: &mut NewStudentProfile, field: &str) -> Result<()> {
    match field.trim() {
        "username" | "email" => profile.email.clear(),
        "password" => profile.password.clear(),
        "name" => profile.name.clear(),
        "enrollmentStatus" => profile.enrollment_status = StudentEnrollmentStatus::None.into(),
        "studentExternalId" => profile.student_external_id.clear(),
        "studentNote" => profile.student_note.clear(),
        "gender" => profile.gender = Gender::None.into(),
        "location_ids" => profile.location_ids.clear(),
        other => bail!("unknown student field '{other}'"),
    }
    Ok(())
}

/// Check a created student against the request that created it.
///
/// # Errors
///
/// Fails when the student is missing or its stored values differ.
pub fn check_created_student<'a>(
    request: &CreateStudentRequest,
    response: &'a CreateStudentResponse,
) -> Result<&'a CreatedUser> {
    let profile = request
        .student_profile
        .as_ref()
        .context("the request carried no student profile")?;
    let student = response
        .student
        .as_ref()
        .context("the response carried no student")?;
    ensure!(!student.user_id.is_empty(), "the created student has no id");
    ensure!(
        student.name == profile.name && student.email == profile.email,
        "created student {} <{}> differs from the requested {} <{}>",
        student.name,
        student.email,
        profile.name,
        profile.email
    );
    ensure!(
        response.enrollment_status == profile.enrollment_status,
        "enrolment status {:?} differs from the requested {:?}",
        response.enrollment_status(),
        profile.enrollment_status()
    );
    Ok(student)
}

/// A request creating one parent for `student_id`.
#[must_use]
pub fn parents_request(school_id: i32, student_id: &str) -> CreateParentsAndAssignToStudentRequest {
    let id = ids::new_id();
    CreateParentsAndAssignToStudentRequest {
        school_id,
        student_id: student_id.to_owned(),
        parent_profiles: vec![NewParentProfile {
            name: format!("user-{id}"),
            country_code: COUNTRY.to_owned(),
            phone_number: format!("phone-number-{id}"),
            email: format!("{id}@example.com"),
            relationship: FamilyRelationship::Father.into(),
            password: format!("password-{id}"),
        }],
    }
}

/// Spoil `field` of a parent request, as named in feature files.
///
/// # Errors
///
/// Fails for a field the step does not know.
pub fn blank_parent_field(
    request: &mut CreateParentsAndAssignToStudentRequest,
    field: &str,
) -> Result<()> {
    let each = |request: &mut CreateParentsAndAssignToStudentRequest,
                spoil: fn(&mut NewParentProfile)| {
        request.parent_profiles.iter_mut().for_each(spoil);
    };
    match field.trim() {
        "studentID empty" => request.student_id.clear(),
        "studentID not exist" => request.student_id = ids::new_id(),
        "empty email" | "username" => each(request, |parent| parent.email.clear()),
        "password" => each(request, |parent| parent.password.clear()),
        "name" => each(request, |parent| parent.name.clear()),
        "relationship" => each(request, |parent| parent.relationship = i32::MAX),
        other => bail!("unknown parent field '{other}'"),
    }
    Ok(())
}

/// Check created parents against the request that created them.
///
/// # Errors
///
/// Fails when the student, the number of parents or any name differs.
pub fn check_created_parents(
    request: &CreateParentsAndAssignToStudentRequest,
    response: &CreateParentsAndAssignToStudentResponse,
) -> Result<()> {
    ensure!(
        response.student_id == request.student_id,
        "parents were linked to student {}, not {}",
        response.student_id,
        request.student_id
    );
    ensure!(
        response.parent_profiles.len() == request.parent_profiles.len(),
        "{} parent(s) created for {} requested",
        response.parent_profiles.len(),
        request.parent_profiles.len()
    );
    for (created, wanted) in response.parent_profiles.iter().zip(&request.parent_profiles) {
        ensure!(!created.user_id.is_empty(), "parent {} has no id", wanted.name);
        ensure!(
            created.name == wanted.name && created.email == wanted.email,
            "created parent {} <{}> differs from the requested {} <{}>",
            created.name,
            created.email,
            wanted.name,
            wanted.email
        );
    }
    Ok(())
}

fn school_id(world: &World) -> Result<i32> {
    let school_id = world.config().identity.school_id;
    i32::try_from(school_id).with_context(|| format!("school id {school_id} does not fit the request"))
}

fn announces_student(message: &BusMessage, name: &str) -> bool {
    matches!(
        decode_message::<EvtUser>(message).and_then(|event| event.message),
        Some(evt_user::Message::CreateStudent(created)) if created.student_name == name
    )
}

fn announces_parent_of(message: &BusMessage, student_id: &str) -> bool {
    matches!(
        decode_message::<EvtUser>(message).and_then(|event| event.message),
        Some(evt_user::Message::CreateParent(created)) if created.student_id == student_id
    )
}

async fn only_student_info(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let request = student_request(school_id(&world)?);
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    state
        .lock()
        .await
        .with_extension(|draft: &mut StudentDraft| draft.0 = Some(request));
    Ok(ctx)
}

async fn student_data_missing(world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    let mut request = student_request(school_id(&world)?);
    if let Some(profile) = request.student_profile.as_mut() {
        blank_student_field(profile, &args.string(0)?)?;
    }
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    state
        .lock()
        .await
        .with_extension(|draft: &mut StudentDraft| draft.0 = Some(request));
    Ok(ctx)
}

async fn create_new_student_account(
    world: Arc<World>,
    ctx: StepContext,
    args: StepArgs,
) -> Result<StepContext> {
    let kind: AccountKind = args.parse(0)?;
    let ctx = sign_in_as(&world, ctx, kind).await?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let request = state
        .lock()
        .await
        .with_extension(|draft: &mut StudentDraft| draft.0.clone())
        .context("no student data was prepared in this scenario")?;
    listen_on(&world, &state, USER_CREATED_SUBJECT).await?;
    call::<_, CreateStudentResponse>(&world, &ctx, &state, CREATE_STUDENT, request).await?;
    Ok(ctx)
}

async fn student_account_created(
    world: Arc<World>,
    ctx: StepContext,
    _args: StepArgs,
) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let student = {
        let state = state.lock().await;
        let request = state.request::<CreateStudentRequest>()?;
        let response = state.response::<CreateStudentResponse>()?;
        check_created_student(request, response)?.clone()
    };
    await_event(&world, &ctx, &state, USER_CREATED_SUBJECT, None, |message| {
        announces_student(message, &student.name)
    })
    .await
    .with_context(|| format!("waiting for the creation event of student {}", student.user_id))?;
    Ok(ctx)
}

async fn cannot_create_account(_world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    let account = args.string(0)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let state = state.lock().await;
    ensure!(state.has_outcome(), "no create request was sent");
    ensure!(
        state.response_err().is_some(),
        "expected the request by {account} to fail but it succeeded"
    );
    Ok(ctx)
}

async fn new_parents_data(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let request = parents_for_new_student(&world).await?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    state
        .lock()
        .await
        .with_extension(|draft: &mut ParentDraft| draft.0 = Some(request));
    Ok(ctx)
}

async fn parent_data_invalid(world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    let mut request = parents_for_new_student(&world).await?;
    blank_parent_field(&mut request, &args.string(0)?)?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    state
        .lock()
        .await
        .with_extension(|draft: &mut ParentDraft| draft.0 = Some(request));
    Ok(ctx)
}

/// Seed a student row and draft one parent for it.
async fn parents_for_new_student(world: &World) -> Result<CreateParentsAndAssignToStudentRequest> {
    let identity = &world.config().identity;
    let student = NewUser::generated(UserGroup::Student, identity.school_id, &identity.resource_path);
    world.accounts()?.insert_user(&student).await?;
    tracing::debug!(student = %student.user_id, "seeded student for parent creation");
    Ok(parents_request(school_id(world)?, &student.user_id))
}

async fn create_new_parents(world: Arc<World>, ctx: StepContext, args: StepArgs) -> Result<StepContext> {
    let kind: AccountKind = args.parse(0)?;
    let ctx = sign_in_as(&world, ctx, kind).await?;
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let request = state
        .lock()
        .await
        .with_extension(|draft: &mut ParentDraft| draft.0.clone())
        .context("no parent data was prepared in this scenario")?;
    listen_on(&world, &state, USER_CREATED_SUBJECT).await?;
    call::<_, CreateParentsAndAssignToStudentResponse>(
        &world,
        &ctx,
        &state,
        CREATE_PARENTS_AND_ASSIGN_TO_STUDENT,
        request,
    )
    .await?;
    Ok(ctx)
}

async fn parents_created(world: Arc<World>, ctx: StepContext, _args: StepArgs) -> Result<StepContext> {
    let (ctx, state) = ctx.ensure_state::<ScenarioState>();
    let student_id = {
        let state = state.lock().await;
        let request = state.request::<CreateParentsAndAssignToStudentRequest>()?;
        let response = state.response::<CreateParentsAndAssignToStudentResponse>()?;
        check_created_parents(request, response)?;
        response.student_id.clone()
    };
    await_event(&world, &ctx, &state, USER_CREATED_SUBJECT, None, |message| {
        announces_parent_of(message, &student_id)
    })
    .await
    .with_context(|| format!("waiting for a parent creation event for student {student_id}"))?;
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use prost::Message;
    use rstest::rstest;

    fn created(request: &CreateStudentRequest) -> CreateStudentResponse {
        let profile = request.student_profile.clone().expect("profile");
        CreateStudentResponse {
            student: Some(CreatedUser {
                user_id: "student-1".to_owned(),
                name: profile.name,
                email: profile.email,
            }),
            enrollment_status: profile.enrollment_status,
        }
    }

    fn event(message: evt_user::Message) -> BusMessage {
        BusMessage {
            subject: USER_CREATED_SUBJECT.to_owned(),
            payload: Bytes::from(
                EvtUser {
                    message: Some(message),
                }
                .encode_to_vec(),
            ),
        }
    }

    #[test]
    fn generated_students_do_not_collide() {
        let first = student_request(1);
        let second = student_request(1);
        assert_ne!(first.student_profile, second.student_profile);
        let profile = first.student_profile.expect("profile");
        assert_eq!(profile.enrollment_status(), StudentEnrollmentStatus::Enrolled);
        assert!(profile.email.ends_with("@example.com"));
    }

    #[rstest]
    #[case("username", |p: &NewStudentProfile| p.email.is_empty())]
    #[case("password", |p: &NewStudentProfile| p.password.is_empty())]
    #[case("name", |p: &NewStudentProfile| p.name.is_empty())]
    #[case("enrollmentStatus", |p: &NewStudentProfile| p.enrollment_status == 0)]
    #[case("gender", |p: &NewStudentProfile| p.gender == 0)]
    fn student_fields_can_be_blanked(#[case] field: &str, #[case] blanked: fn(&NewStudentProfile) -> bool) {
        let mut profile = student_request(1).student_profile.expect("profile");
        blank_student_field(&mut profile, field).expect("known field");
        assert!(blanked(&profile), "{field} should be blank");
    }

    #[test]
    fn unknown_student_fields_are_rejected() {
        let mut profile = student_request(1).student_profile.expect("profile");
        assert!(blank_student_field(&mut profile, "shoe size").is_err());
    }

    #[test]
    fn matching_student_passes() {
        let request = student_request(1);
        let response = created(&request);
        let student = check_created_student(&request, &response).expect("matches");
        assert_eq!(student.user_id, "student-1");
    }

    #[test]
    fn renamed_student_fails() {
        let request = student_request(1);
        let mut response = created(&request);
        if let Some(student) = response.student.as_mut() {
            student.name = "someone else".to_owned();
        }
        let err = check_created_student(&request, &response).expect_err("renamed");
        assert!(err.to_string().contains("someone else"), "{err}");
    }

    #[rstest]
    #[case("studentID empty")]
    #[case("studentID not exist")]
    fn parent_requests_can_point_at_a_bad_student(#[case] field: &str) {
        let mut request = parents_request(1, "student-1");
        blank_parent_field(&mut request, field).expect("known field");
        assert_ne!(request.student_id, "student-1");
    }

    #[rstest]
    #[case("empty email")]
    #[case("password")]
    #[case("name")]
    #[case("relationship")]
    fn parent_profiles_can_be_spoiled(#[case] field: &str) {
        let original = parents_request(1, "student-1");
        let mut request = original.clone();
        blank_parent_field(&mut request, field).expect("known field");
        assert_eq!(request.student_id, original.student_id);
        assert_ne!(request.parent_profiles, original.parent_profiles);
    }

    #[test]
    fn missing_parents_fail_the_check() {
        let request = parents_request(1, "student-1");
        let response = CreateParentsAndAssignToStudentResponse {
            student_id: "student-1".to_owned(),
            parent_profiles: Vec::new(),
        };
        let err = check_created_parents(&request, &response).expect_err("none created");
        assert!(err.to_string().contains("0 parent(s) created for 1 requested"), "{err}");
    }

    #[test]
    fn events_are_matched_by_variant_and_key() {
        let student = event(evt_user::Message::CreateStudent(evt_user::CreateStudent {
            student_id: "student-1".to_owned(),
            student_name: "user-1".to_owned(),
        }));
        let parent = event(evt_user::Message::CreateParent(evt_user::CreateParent {
            student_id: "student-1".to_owned(),
            parent_id: "parent-1".to_owned(),
            student_name: "user-1".to_owned(),
        }));
        assert!(announces_student(&student, "user-1"));
        assert!(!announces_student(&student, "user-2"));
        assert!(!announces_student(&parent, "user-1"));
        assert!(announces_parent_of(&parent, "student-1"));
        assert!(!announces_parent_of(&student, "student-1"));
    }
}
