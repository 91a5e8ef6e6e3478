use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::authz;
use crate::error::{ApiError, ApiErrorWithMeta, E_VALIDATION, WithMetaExt};
use crate::models::{Event, EventParticipant, EventStatus, EventType, ParticipantStatus};
use crate::responses::{ApiOk, RequestMeta};
use crate::roster;

pub async fn list_events(
    State(st): State<AppState>,
    _user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<Event>>, ApiErrorWithMeta> {
    let events = sqlx::query_as::<_, Event>("SELECT * FROM events ORDER BY start_at ASC")
        .fetch_all(&st.pool)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::ok("events fetched", events, meta))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub title: String,
    pub description: String,
    pub start_date_time: DateTime<Utc>,
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<EventType>,
    #[serde(default)]
    pub capacity: Option<i64>,
    #[serde(default)]
    pub points: Option<i64>,
}

/// The creator's role fixes the scope: admins create GLOBAL events, tutors
/// GROUP events, students none.
pub async fn create_event(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateEventRequest>,
) -> Result<ApiOk<Event>, ApiErrorWithMeta> {
    let Some(scope) = authz::event_scope_for(&user) else {
        return Err(
            ApiError::Forbidden("Only admin or tutor can create events".into()).with_meta(meta),
        );
    };
    if req.title.is_empty() || req.description.is_empty() {
        return Err(
            ApiError::BadRequest("Title, description, and start date are required".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }

    let capacity = req.capacity.unwrap_or(20);
    if capacity <= 0 {
        return Err(ApiError::BadRequest("Capacity must be greater than 0".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO events
           (id, title, description, start_at, end_at, location, kind, capacity, points,
            status, scope, created_by, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(req.title.trim())
    .bind(req.description.trim())
    .bind(req.start_date_time)
    .bind(req.end_date_time.unwrap_or(req.start_date_time))
    .bind(req.location.as_deref().unwrap_or("Online"))
    .bind(req.kind.unwrap_or(EventType::InPerson))
    .bind(capacity)
    .bind(req.points.unwrap_or(0))
    .bind(EventStatus::Upcoming)
    .bind(scope)
    .bind(&user.sub)
    .bind(Utc::now())
    .execute(&st.pool)
    .await
    .err_meta(&meta)?;

    let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = ?")
        .bind(&id)
        .fetch_one(&st.pool)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::created("Event created successfully", event, meta))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: Event,
    pub enrolled_students: i64,
}

pub async fn get_event(
    State(st): State<AppState>,
    _user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
) -> Result<ApiOk<EventDetail>, ApiErrorWithMeta> {
    let event = fetch_event(&st, &id)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Event not found".into()).with_meta(meta.clone()))?;

    let enrolled_students = roster::enrolled_count(&st.pool, &event.id)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::ok(
        "event fetched",
        EventDetail {
            event,
            enrolled_students,
        },
        meta,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventRequest {
    pub title: String,
    pub description: String,
    pub start_date_time: DateTime<Utc>,
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<EventType>,
    #[serde(default)]
    pub capacity: Option<i64>,
    #[serde(default)]
    pub points: Option<i64>,
    #[serde(default)]
    pub status: Option<EventStatus>,
}

pub async fn update_event(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEventRequest>,
) -> Result<ApiOk<Event>, ApiErrorWithMeta> {
    let event = fetch_event(&st, &id)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Event not found".into()).with_meta(meta.clone()))?;

    authz::manage_event(&user, &event)
        .require()
        .err_meta(&meta)?;

    if req.title.is_empty() || req.description.is_empty() {
        return Err(
            ApiError::BadRequest("Title, description, and start date are required".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }
    let capacity = req.capacity.unwrap_or(20);
    if capacity <= 0 {
        return Err(ApiError::BadRequest("Capacity must be greater than 0".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    sqlx::query(
        r#"UPDATE events SET title = ?, description = ?, start_at = ?, end_at = ?,
           location = ?, kind = ?, capacity = ?, points = ?, status = ? WHERE id = ?"#,
    )
    .bind(req.title.trim())
    .bind(req.description.trim())
    .bind(req.start_date_time)
    .bind(req.end_date_time.unwrap_or(req.start_date_time))
    .bind(req.location.as_deref().unwrap_or("Online"))
    .bind(req.kind.unwrap_or(event.kind))
    .bind(capacity)
    .bind(req.points.unwrap_or(event.points))
    .bind(req.status.unwrap_or(event.status))
    .bind(&event.id)
    .execute(&st.pool)
    .await
    .err_meta(&meta)?;

    let updated = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = ?")
        .bind(&event.id)
        .fetch_one(&st.pool)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::ok("Event updated successfully", updated, meta))
}

pub async fn delete_event(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
) -> Result<ApiOk<()>, ApiErrorWithMeta> {
    let event = fetch_event(&st, &id)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Event not found".into()).with_meta(meta.clone()))?;

    authz::manage_event(&user, &event)
        .require()
        .err_meta(&meta)?;

    sqlx::query("DELETE FROM events WHERE id = ?")
        .bind(&event.id)
        .execute(&st.pool)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::ok("Event deleted successfully", (), meta))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub participant: EventParticipant,
    pub enrolled_students: i64,
}

pub async fn join_event(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
) -> Result<ApiOk<JoinResponse>, ApiErrorWithMeta> {
    let outcome = roster::join_event(&st.pool, &id, &user.sub)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::created(
        "Successfully joined the event",
        JoinResponse {
            participant: outcome.participant,
            enrolled_students: outcome.enrolled,
        },
        meta,
    ))
}

/// A roster row joined with the participant's public identity.
#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: ParticipantStatus,
    pub registered_at: DateTime<Utc>,
}

pub async fn list_participants(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
) -> Result<ApiOk<Vec<ParticipantView>>, ApiErrorWithMeta> {
    let event = fetch_event(&st, &id)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Event not found".into()).with_meta(meta.clone()))?;

    let is_participant = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM event_participants WHERE event_id = ? AND user_id = ?",
    )
    .bind(&event.id)
    .bind(&user.sub)
    .fetch_one(&st.pool)
    .await
    .err_meta(&meta)?
        > 0;

    authz::view_roster(&user, &event, is_participant)
        .require()
        .err_meta(&meta)?;

    let participants = sqlx::query_as::<_, ParticipantView>(
        r#"SELECT u.id, u.username, u.first_name, u.last_name, p.status, p.registered_at
           FROM event_participants p JOIN users u ON u.id = p.user_id
           WHERE p.event_id = ?
           ORDER BY p.registered_at DESC"#,
    )
    .bind(&event.id)
    .fetch_all(&st.pool)
    .await
    .err_meta(&meta)?;

    Ok(ApiOk::ok("participants fetched", participants, meta))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantRequest {
    pub user_id: String,
}

pub async fn add_participant(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<ApiOk<JoinResponse>, ApiErrorWithMeta> {
    if req.user_id.is_empty() {
        return Err(ApiError::BadRequest("User ID is required".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let event = fetch_event(&st, &id)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Event not found".into()).with_meta(meta.clone()))?;

    authz::manage_roster(&user, &event)
        .require()
        .err_meta(&meta)?;

    let outcome = roster::add_participant(&st.pool, &event, &req.user_id)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::created(
        "Participant added successfully",
        JoinResponse {
            participant: outcome.participant,
            enrolled_students: outcome.enrolled,
        },
        meta,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAttendanceRequest {
    pub user_id: String,
    pub status: ParticipantStatus,
}

/// Marks attendance; REGISTERED is not a valid target, and settled
/// participants cannot be re-marked.
pub async fn set_attendance(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
    Json(req): Json<SetAttendanceRequest>,
) -> Result<ApiOk<EventParticipant>, ApiErrorWithMeta> {
    if req.user_id.is_empty() || req.status == ParticipantStatus::Registered {
        return Err(
            ApiError::BadRequest("Valid user ID and status are required".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }

    let event = fetch_event(&st, &id)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Event not found".into()).with_meta(meta.clone()))?;

    authz::manage_roster(&user, &event)
        .require()
        .err_meta(&meta)?;

    let participant = roster::set_attendance(&st.pool, &event.id, &req.user_id, req.status)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::ok(
        "Participant status updated successfully",
        participant,
        meta,
    ))
}

async fn fetch_event(st: &AppState, id: &str) -> Result<Option<Event>, sqlx::Error> {
    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = ?")
        .bind(id)
        .fetch_optional(&st.pool)
        .await
}
