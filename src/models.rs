use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of account roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Tutor,
    Student,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }

    pub fn is_tutor(self) -> bool {
        self == Role::Tutor
    }

    pub fn is_student(self) -> bool {
        self == Role::Student
    }
}

/// Lifecycle of an item request or a registration request.
///
/// PENDING is the only non-terminal state; APPROVED and REJECTED are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// Direction of a points ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Award,
    Redeem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

/// GLOBAL events are admin-created and visible to everyone; GROUP events
/// belong to the tutor who created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventScope {
    Global,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    InPerson,
    Online,
}

/// Per-participant state. REGISTERED moves to ATTENDED or ABSENT exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Registered,
    Attended,
    Absent,
}

/// A platform account.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The ID of the user.
    pub id: String,
    /// The unique login name.
    pub username: String,
    /// The unique email address.
    pub email: String,
    /// Argon2 PHC hash; never serialized.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// The account role.
    pub role: Role,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// The assigned tutor; set for students only.
    pub tutor_id: Option<String>,
    /// Cached point balance; the ledger is authoritative.
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

/// The subset of a user that is safe to embed in other payloads.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A tutor's classroom record, created explicitly when the tutor is.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub tutor_id: String,
    pub created_at: DateTime<Utc>,
}

/// A reward item in a tutor's store.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoreItem {
    /// The ID of the item.
    pub id: String,
    /// The tutor who owns the store.
    pub tutor_id: String,
    pub name: String,
    pub description: String,
    /// Point cost; always positive.
    pub points_required: i64,
    /// Remaining stock; never negative.
    pub available_quantity: i64,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A student's redemption request against a store item.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ItemRequest {
    /// The ID of the request.
    pub id: String,
    pub student_id: String,
    /// The student's tutor, denormalized at submission time.
    pub tutor_id: String,
    pub item_id: String,
    pub status: RequestStatus,
    /// Snapshot of the item's cost when the request was submitted.
    pub points_spent: i64,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable points ledger row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointsTransaction {
    pub id: String,
    pub student_id: String,
    /// The tutor (or admin) the change is attributed to.
    pub tutor_id: String,
    /// Magnitude of the change; always positive.
    pub points: i64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// The ID of the event.
    pub id: String,
    pub title: String,
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub location: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Maximum number of REGISTERED participants.
    pub capacity: i64,
    /// Points awarded for attendance.
    pub points: i64,
    pub status: EventStatus,
    pub scope: EventScope,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventParticipant {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    pub status: ParticipantStatus,
    pub registered_at: DateTime<Utc>,
}

/// A self-service signup awaiting admin review.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub requested_role: Role,
    pub status: RequestStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
