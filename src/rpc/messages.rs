//! Protobuf messages and method paths used by the suites.
//!
//! Only the fields the steps read or write are declared; prost skips unknown
//! fields on decode.

use super::Method;

/// Token exchange on the identity service.
pub const EXCHANGE_TOKEN: Method =
    Method::new("shamir", "/manabie.shamir.TokenReaderService/ExchangeToken");
/// Client version lookup on the core service.
pub const RETRIEVE_CLIENT_VERSION: Method = Method::new(
    "bob",
    "/bob.v1.VersionControlReaderService/RetrieveClientVersion",
);
/// Chunked upload on the core service.
pub const STREAMING_UPLOAD: Method = Method::new("bob", "/bob.v1.UploadService/StreamingUpload");
/// Lowest-level location listing on the master data service.
pub const RETRIEVE_LOWEST_LEVEL_LOCATIONS: Method = Method::new(
    "mastermgmt",
    "/mastermgmt.v1.MasterDataReaderService/RetrieveLowestLevelLocations",
);
/// Location import on the master data service.
pub const IMPORT_LOCATION: Method = Method::new(
    "mastermgmt",
    "/mastermgmt.v1.MasterDataCourseService/ImportLocation",
);
/// Publish admission on the virtual classroom service.
pub const PREPARE_TO_PUBLISH: Method = Method::new(
    "virtualclassroom",
    "/virtualclassroom.v1.VirtualClassroomModifierService/PrepareToPublish",
);
/// Publish release on the virtual classroom service.
pub const UNPUBLISH: Method = Method::new(
    "virtualclassroom",
    "/virtualclassroom.v1.VirtualClassroomModifierService/Unpublish",
);
/// Student creation on the user management service.
pub const CREATE_STUDENT: Method = Method::new(
    "usermgmt",
    "/usermgmt.v2.UserModifierService/CreateStudent",
);
/// Parent creation on the user management service.
pub const CREATE_PARENTS_AND_ASSIGN_TO_STUDENT: Method = Method::new(
    "usermgmt",
    "/usermgmt.v2.UserModifierService/CreateParentsAndAssignToStudent",
);

/// Identity carried by an exchanged token.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TokenInfo {
    /// Applicant (project) id.
    #[prost(string, tag = "1")]
    pub applicant: String,
    /// User the token is for.
    #[prost(string, tag = "2")]
    pub user_id: String,
    /// Default organisation.
    #[prost(int64, tag = "3")]
    pub default_role_school_id: i64,
}

/// Exchange an identity-provider token for a service token.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ExchangeTokenRequest {
    /// Identity of the new token.
    #[prost(message, optional, tag = "1")]
    pub new_token_info: Option<TokenInfo>,
    /// Token minted by the identity provider.
    #[prost(string, tag = "2")]
    pub original_token: String,
}

/// Exchanged token.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ExchangeTokenResponse {
    /// Service token.
    #[prost(string, tag = "1")]
    pub new_token: String,
}

/// Client version lookup.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RetrieveClientVersionRequest {}

/// Supported client versions.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RetrieveClientVersionResponse {
    /// Comma-separated `package:version` pairs.
    #[prost(string, tag = "1")]
    pub joined_versions: String,
}

/// One chunk of an upload stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamingUploadRequest {
    /// Declared total size, sent on the first chunk only.
    #[prost(int64, tag = "1")]
    pub size: i64,
    /// File extension, sent on the first chunk only.
    #[prost(string, tag = "2")]
    pub extension: String,
    /// Payload bytes of this chunk.
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

/// Location of a finished upload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamingUploadResponse {
    /// Public URL of the stored object.
    #[prost(string, tag = "1")]
    pub url: String,
}

/// Pagination window.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Paging {
    /// Maximum rows returned.
    #[prost(uint32, tag = "1")]
    pub limit: u32,
    /// Rows skipped.
    #[prost(int64, tag = "2")]
    pub offset: i64,
}

/// Leaf-location listing filtered by name.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RetrieveLowestLevelLocationsRequest {
    /// Case-insensitive name filter; empty matches everything.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Pagination window.
    #[prost(message, optional, tag = "2")]
    pub paging: Option<Paging>,
    /// Restrict to these ids when non-empty.
    #[prost(string, repeated, tag = "3")]
    pub location_ids: Vec<String>,
}

/// One listed location.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct LocationEntry {
    /// Location id.
    #[prost(string, tag = "1")]
    pub location_id: String,
    /// Display name.
    #[prost(string, tag = "2")]
    pub name: String,
}

/// Listed leaf locations.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RetrieveLowestLevelLocationsResponse {
    /// Matching leaf locations.
    #[prost(message, repeated, tag = "1")]
    pub locations: Vec<LocationEntry>,
}

/// CSV import of locations.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ImportLocationRequest {
    /// CSV payload with a header row.
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

/// Import outcome.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ImportLocationResponse {
    /// Rows rejected by the service.
    #[prost(message, repeated, tag = "1")]
    pub errors: Vec<ImportError>,
}

/// A rejected import row.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ImportError {
    /// One-based row number.
    #[prost(int32, tag = "1")]
    pub row_number: i32,
    /// Rejection reason.
    #[prost(string, tag = "2")]
    pub error: String,
}

/// Ask to start publishing a learner's stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PrepareToPublishRequest {
    /// Live lesson.
    #[prost(string, tag = "1")]
    pub lesson_id: String,
    /// Learner asking to publish.
    #[prost(string, tag = "2")]
    pub learner_id: String,
}

/// Admission outcome of a publish request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PrepareToPublishStatus {
    /// Admitted now.
    None = 0,
    /// Already admitted earlier.
    PreparedBefore = 1,
    /// Stream slots are exhausted.
    ReachedMaxUpstreamLimit = 2,
}

/// Publish admission result.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PrepareToPublishResponse {
    /// Admission outcome.
    #[prost(enumeration = "PrepareToPublishStatus", tag = "1")]
    pub status: i32,
}

/// Ask to stop publishing a learner's stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UnpublishRequest {
    /// Live lesson.
    #[prost(string, tag = "1")]
    pub lesson_id: String,
    /// Learner releasing the slot.
    #[prost(string, tag = "2")]
    pub learner_id: String,
}

/// Outcome of an unpublish request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum UnpublishStatus {
    /// Released now.
    None = 0,
    /// Was not publishing.
    UnpublishedBefore = 1,
}

/// Unpublish result.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UnpublishResponse {
    /// Release outcome.
    #[prost(enumeration = "UnpublishStatus", tag = "1")]
    pub status: i32,
}

/// Event published when a location is created or changed.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EventUpsertLocation {
    /// Changed locations.
    #[prost(message, repeated, tag = "1")]
    pub locations: Vec<EventLocation>,
}

/// Location carried by [`EventUpsertLocation`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct EventLocation {
    /// Location id.
    #[prost(string, tag = "1")]
    pub location_id: String,
    /// Display name.
    #[prost(string, tag = "2")]
    pub name: String,
    /// Location type id.
    #[prost(string, tag = "3")]
    pub location_type: String,
    /// Parent id; empty for the root.
    #[prost(string, tag = "4")]
    pub parent_location_id: String,
}

/// Event published when a location type is created or changed.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EventUpsertLocationType {
    /// Changed location types.
    #[prost(message, repeated, tag = "1")]
    pub location_types: Vec<EventLocationType>,
}

/// Location type carried by [`EventUpsertLocationType`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct EventLocationType {
    /// Location type id.
    #[prost(string, tag = "1")]
    pub location_type_id: String,
    /// Internal name.
    #[prost(string, tag = "2")]
    pub name: String,
}

/// Lesson lifecycle event.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EventLesson {
    /// Affected lessons.
    #[prost(message, repeated, tag = "1")]
    pub lessons: Vec<EventLessonEntry>,
    /// Kind of change.
    #[prost(enumeration = "LessonEventKind", tag = "2")]
    pub kind: i32,
}

/// Lesson carried by [`EventLesson`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct EventLessonEntry {
    /// Lesson id.
    #[prost(string, tag = "1")]
    pub lesson_id: String,
    /// Lesson name.
    #[prost(string, tag = "2")]
    pub name: String,
    /// Assigned learners.
    #[prost(string, repeated, tag = "3")]
    pub learner_ids: Vec<String>,
}

/// Kind of lesson change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum LessonEventKind {
    /// Unspecified.
    Unspecified = 0,
    /// Lesson created.
    CreateLesson = 1,
    /// Lesson updated.
    UpdateLesson = 2,
    /// Lesson deleted.
    DeleteLesson = 3,
}

/// Enrolment state of a student.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StudentEnrollmentStatus {
    /// Not set.
    None = 0,
    /// Prospective student.
    Potential = 1,
    /// Currently enrolled.
    Enrolled = 2,
    /// Left the school.
    Withdrawn = 3,
    /// Finished.
    Graduated = 4,
    /// On leave of absence.
    Loa = 5,
}

/// Recorded gender.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Gender {
    /// Not set.
    None = 0,
    /// Male.
    Male = 1,
    /// Female.
    Female = 2,
}

/// How a parent relates to the student.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum FamilyRelationship {
    /// Not set.
    None = 0,
    /// Father.
    Father = 1,
    /// Mother.
    Mother = 2,
}

/// Profile sent to create a student.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NewStudentProfile {
    /// Login e-mail.
    #[prost(string, tag = "1")]
    pub email: String,
    /// Initial password.
    #[prost(string, tag = "2")]
    pub password: String,
    /// Full name.
    #[prost(string, tag = "3")]
    pub name: String,
    /// ISO country, as the platform's country code.
    #[prost(string, tag = "4")]
    pub country_code: String,
    /// Enrolment state.
    #[prost(enumeration = "StudentEnrollmentStatus", tag = "5")]
    pub enrollment_status: i32,
    /// Contact number.
    #[prost(string, tag = "6")]
    pub phone_number: String,
    /// Id in the partner's own system.
    #[prost(string, tag = "7")]
    pub student_external_id: String,
    /// Free-form note.
    #[prost(string, tag = "8")]
    pub student_note: String,
    /// School grade.
    #[prost(int32, tag = "9")]
    pub grade: i32,
    /// Recorded gender.
    #[prost(enumeration = "Gender", tag = "10")]
    pub gender: i32,
    /// Locations the student attends.
    #[prost(string, repeated, tag = "11")]
    pub location_ids: Vec<String>,
}

/// Create one student.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateStudentRequest {
    /// Organisation the student joins.
    #[prost(int32, tag = "1")]
    pub school_id: i32,
    /// Profile to create.
    #[prost(message, optional, tag = "2")]
    pub student_profile: Option<NewStudentProfile>,
}

/// User as stored by the user management service.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct CreatedUser {
    /// Assigned user id.
    #[prost(string, tag = "1")]
    pub user_id: String,
    /// Stored name.
    #[prost(string, tag = "2")]
    pub name: String,
    /// Stored e-mail.
    #[prost(string, tag = "3")]
    pub email: String,
}

/// Created student.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateStudentResponse {
    /// Stored student.
    #[prost(message, optional, tag = "1")]
    pub student: Option<CreatedUser>,
    /// Stored enrolment state.
    #[prost(enumeration = "StudentEnrollmentStatus", tag = "2")]
    pub enrollment_status: i32,
}

/// Profile sent to create a parent.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NewParentProfile {
    /// Full name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// ISO country, as the platform's country code.
    #[prost(string, tag = "2")]
    pub country_code: String,
    /// Contact number.
    #[prost(string, tag = "3")]
    pub phone_number: String,
    /// Login e-mail.
    #[prost(string, tag = "4")]
    pub email: String,
    /// Relation to the student.
    #[prost(enumeration = "FamilyRelationship", tag = "5")]
    pub relationship: i32,
    /// Initial password.
    #[prost(string, tag = "6")]
    pub password: String,
}

/// Create parents and link them to an existing student.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateParentsAndAssignToStudentRequest {
    /// Organisation of the student.
    #[prost(int32, tag = "1")]
    pub school_id: i32,
    /// Student the parents belong to.
    #[prost(string, tag = "2")]
    pub student_id: String,
    /// Parents to create.
    #[prost(message, repeated, tag = "3")]
    pub parent_profiles: Vec<NewParentProfile>,
}

/// Created parents.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateParentsAndAssignToStudentResponse {
    /// Student the parents were linked to.
    #[prost(string, tag = "1")]
    pub student_id: String,
    /// Stored parents, in request order.
    #[prost(message, repeated, tag = "2")]
    pub parent_profiles: Vec<CreatedUser>,
}

/// User lifecycle event published after a create.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EvtUser {
    /// What happened.
    #[prost(oneof = "evt_user::Message", tags = "1, 2")]
    pub message: Option<evt_user::Message>,
}

/// Variants of [`EvtUser`].
pub mod evt_user {
    /// A student was created.
    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct CreateStudent {
        /// New student id.
        #[prost(string, tag = "1")]
        pub student_id: String,
        /// New student name.
        #[prost(string, tag = "2")]
        pub student_name: String,
    }

    /// A parent was created for a student.
    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct CreateParent {
        /// Student the parent belongs to.
        #[prost(string, tag = "1")]
        pub student_id: String,
        /// New parent id.
        #[prost(string, tag = "2")]
        pub parent_id: String,
        /// Name of the student.
        #[prost(string, tag = "3")]
        pub student_name: String,
    }

    /// Event payload.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Message {
        /// Student created.
        #[prost(message, tag = "1")]
        CreateStudent(CreateStudent),
        /// Parent created.
        #[prost(message, tag = "2")]
        CreateParent(CreateParent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn unknown_enum_values_fall_back_to_default() {
        let response = PrepareToPublishResponse { status: 42 };
        assert_eq!(response.status(), PrepareToPublishStatus::None);
    }

    #[test]
    fn lesson_event_decodes_from_wire_bytes() {
        let event = EventLesson {
            lessons: vec![EventLessonEntry {
                lesson_id: "lesson-1".to_owned(),
                name: "Algebra".to_owned(),
                learner_ids: vec!["s1".to_owned()],
            }],
            kind: LessonEventKind::CreateLesson.into(),
        };
        let decoded = EventLesson::decode(event.encode_to_vec().as_slice()).expect("decode");
        assert_eq!(decoded.kind(), LessonEventKind::CreateLesson);
        assert_eq!(decoded.lessons.first().map(|l| l.lesson_id.as_str()), Some("lesson-1"));
    }

    #[test]
    fn user_event_keeps_its_variant() {
        let event = EvtUser {
            message: Some(evt_user::Message::CreateParent(evt_user::CreateParent {
                student_id: "s1".to_owned(),
                parent_id: "p1".to_owned(),
                student_name: "Ann".to_owned(),
            })),
        };
        let decoded = EvtUser::decode(event.encode_to_vec().as_slice()).expect("decode");
        assert_eq!(decoded, event);
    }
}
