//! Event participation: joining, owner-managed additions, and attendance.
//!
//! The capacity check is atomic with the membership insert (a conditional
//! `INSERT ... SELECT ... WHERE count < capacity` backed by a
//! UNIQUE(event_id, user_id) constraint), so two joins racing for the last
//! seat cannot overrun capacity.

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{Event, EventParticipant, EventStatus, ParticipantStatus};

#[derive(Debug)]
pub struct JoinOutcome {
    pub participant: EventParticipant,
    /// REGISTERED headcount after the insert.
    pub enrolled: i64,
}

/// Self-service join while the event is UPCOMING and under capacity.
pub async fn join_event(
    pool: &SqlitePool,
    event_id: &str,
    user_id: &str,
) -> Result<JoinOutcome, ApiError> {
    let mut tx = pool.begin().await?;

    let event = fetch_event(&mut tx, event_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Event not found".into()))?;
    if event.status != EventStatus::Upcoming {
        return Err(ApiError::BadRequest(
            "You can only join upcoming events".into(),
        ));
    }

    let outcome = insert_registered(&mut tx, &event, user_id).await?;
    tx.commit().await?;
    Ok(outcome)
}

/// Owner-side addition; same capacity and duplicate rules as joining, but
/// not limited to UPCOMING events.
pub async fn add_participant(
    pool: &SqlitePool,
    event: &Event,
    user_id: &str,
) -> Result<JoinOutcome, ApiError> {
    let mut tx = pool.begin().await?;
    let outcome = insert_registered(&mut tx, event, user_id).await?;
    tx.commit().await?;
    Ok(outcome)
}

/// Marks a REGISTERED participant ATTENDED or ABSENT. Both are terminal:
/// re-marking a settled participant is a conflict.
pub async fn set_attendance(
    pool: &SqlitePool,
    event_id: &str,
    user_id: &str,
    status: ParticipantStatus,
) -> Result<EventParticipant, ApiError> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"UPDATE event_participants SET status = ?
           WHERE event_id = ? AND user_id = ? AND status = ?"#,
    )
    .bind(status)
    .bind(event_id)
    .bind(user_id)
    .bind(ParticipantStatus::Registered)
    .execute(tx.as_mut())
    .await?;

    if updated.rows_affected() == 0 {
        // Distinguish an unknown participant from one already settled.
        return match fetch_participant(&mut tx, event_id, user_id).await? {
            None => Err(ApiError::NotFound("Participant not found".into())),
            Some(_) => Err(ApiError::Conflict(
                "Participant attendance has already been recorded".into(),
            )),
        };
    }

    let participant = fetch_participant(&mut tx, event_id, user_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("participant vanished mid-update")))?;
    tx.commit().await?;
    Ok(participant)
}

pub async fn enrolled_count(pool: &SqlitePool, event_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM event_participants WHERE event_id = ? AND status = 'REGISTERED'"#,
    )
    .bind(event_id)
    .fetch_one(pool)
    .await
}

async fn insert_registered(
    tx: &mut Transaction<'_, Sqlite>,
    event: &Event,
    user_id: &str,
) -> Result<JoinOutcome, ApiError> {
    if fetch_participant(tx, &event.id, user_id).await?.is_some() {
        return Err(ApiError::Conflict(
            "You have already joined this event".into(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let res = sqlx::query(
        r#"INSERT INTO event_participants (id, event_id, user_id, status, registered_at)
           SELECT ?, ?, ?, ?, ?
           WHERE (SELECT COUNT(*) FROM event_participants
                  WHERE event_id = ? AND status = ?) < ?"#,
    )
    .bind(&id)
    .bind(&event.id)
    .bind(user_id)
    .bind(ParticipantStatus::Registered)
    .bind(Utc::now())
    .bind(&event.id)
    .bind(ParticipantStatus::Registered)
    .bind(event.capacity)
    .execute(tx.as_mut())
    .await;

    let res = match res {
        // A racing join can slip in between the existence check and the
        // insert; the unique constraint turns that into a conflict.
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            return Err(ApiError::Conflict(
                "You have already joined this event".into(),
            ));
        }
        other => other?,
    };
    if res.rows_affected() == 0 {
        return Err(ApiError::BadRequest(
            "Event has reached maximum capacity".into(),
        ));
    }

    let participant = fetch_participant(tx, &event.id, user_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("participant vanished after insert")))?;
    let enrolled = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM event_participants WHERE event_id = ? AND status = 'REGISTERED'"#,
    )
    .bind(&event.id)
    .fetch_one(tx.as_mut())
    .await?;

    Ok(JoinOutcome {
        participant,
        enrolled,
    })
}

async fn fetch_event(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<Option<Event>, sqlx::Error> {
    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.as_mut())
        .await
}

async fn fetch_participant(
    tx: &mut Transaction<'_, Sqlite>,
    event_id: &str,
    user_id: &str,
) -> Result<Option<EventParticipant>, sqlx::Error> {
    sqlx::query_as::<_, EventParticipant>(
        "SELECT * FROM event_participants WHERE event_id = ? AND user_id = ?",
    )
    .bind(event_id)
    .bind(user_id)
    .fetch_optional(tx.as_mut())
    .await
}
