//! The points workflows: redemption request submission and approval, and
//! direct balance adjustments.
//!
//! Every operation here runs its read-check-write sequence inside a single
//! transaction, and every write that depends on a check is a guarded
//! conditional statement verified through `rows_affected()`. That makes the
//! checks atomic with the writes under any interleaving: two processors
//! racing on the same request both reach the `status = 'PENDING'` guard, but
//! only one row flip can succeed.
//!
//! The ledger is the source of truth for balances. `users.points` is a cache
//! and is only ever written in the same transaction as a ledger append, so
//! the two cannot drift.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::auth::Claims;
use crate::authz;
use crate::error::ApiError;
use crate::models::{ItemRequest, RequestStatus, StoreItem, TransactionKind, User};

/// Balance adjustment modes for [`adjust_points`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointsAction {
    Add,
    Subtract,
    Set,
}

impl PointsAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(PointsAction::Add),
            "subtract" => Some(PointsAction::Subtract),
            "set" => Some(PointsAction::Set),
            _ => None,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            PointsAction::Add => "added",
            PointsAction::Subtract => "subtracted",
            PointsAction::Set => "set",
        }
    }
}

/// Submits a redemption request (actor: student).
///
/// Stock and balance are preconditions here and re-validated at approval
/// time; the price is snapshotted into `points_spent` so later item edits do
/// not affect this request.
pub async fn submit_request(
    pool: &SqlitePool,
    student_id: &str,
    item_id: &str,
    note: Option<String>,
) -> Result<ItemRequest, ApiError> {
    let mut tx = pool.begin().await?;

    let student = fetch_user(&mut tx, student_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Student not found".into()))?;
    let tutor_id = student
        .tutor_id
        .clone()
        .ok_or_else(|| ApiError::BadRequest("Student does not have an assigned tutor".into()))?;

    let item = fetch_item(&mut tx, item_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Item not found".into()))?;
    if item.available_quantity <= 0 {
        return Err(ApiError::BadRequest("Item is out of stock".into()));
    }
    if student.points < item.points_required {
        return Err(ApiError::BadRequest(
            "Not enough points to request this item".into(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO item_requests
           (id, student_id, tutor_id, item_id, status, points_spent, note, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&student.id)
    .bind(&tutor_id)
    .bind(&item.id)
    .bind(RequestStatus::Pending)
    .bind(item.points_required)
    .bind(note.unwrap_or_default())
    .bind(now)
    .bind(now)
    .execute(tx.as_mut())
    .await?;

    let request = fetch_request(&mut tx, &id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("request vanished after insert")))?;
    tx.commit().await?;
    Ok(request)
}

/// Settles a PENDING request (actor: owning tutor or admin).
///
/// On approval the ledger append, inventory decrement, and balance decrement
/// all commit together or not at all. Stock and balance are re-checked here
/// because both may have moved since submission.
pub async fn process_request(
    pool: &SqlitePool,
    actor: &Claims,
    request_id: &str,
    target: RequestStatus,
    note: Option<String>,
) -> Result<ItemRequest, ApiError> {
    let mut tx = pool.begin().await?;

    let request = fetch_request(&mut tx, request_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Request not found".into()))?;

    authz::process_request(actor, &request).require()?;

    if request.status != RequestStatus::Pending {
        return Err(ApiError::Conflict(
            "Request has already been processed".into(),
        ));
    }

    let now = Utc::now();
    // Flip the status first. The PENDING guard is what closes the race
    // between two concurrent processors: only one row flip succeeds.
    let flipped = sqlx::query(
        r#"UPDATE item_requests SET status = ?, note = ?, updated_at = ?
           WHERE id = ? AND status = ?"#,
    )
    .bind(target)
    .bind(note.unwrap_or_else(|| request.note.clone()))
    .bind(now)
    .bind(&request.id)
    .bind(RequestStatus::Pending)
    .execute(tx.as_mut())
    .await?;
    if flipped.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "Request has already been processed".into(),
        ));
    }

    if target == RequestStatus::Approved {
        let item = fetch_item(&mut tx, &request.item_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Item not found".into()))?;

        let stocked = sqlx::query(
            r#"UPDATE store_items SET available_quantity = available_quantity - 1
               WHERE id = ? AND available_quantity > 0"#,
        )
        .bind(&item.id)
        .execute(tx.as_mut())
        .await?;
        if stocked.rows_affected() == 0 {
            return Err(ApiError::BadRequest("Item is out of stock".into()));
        }

        let charged = sqlx::query(
            r#"UPDATE users SET points = points - ? WHERE id = ? AND points >= ?"#,
        )
        .bind(request.points_spent)
        .bind(&request.student_id)
        .bind(request.points_spent)
        .execute(tx.as_mut())
        .await?;
        if charged.rows_affected() == 0 {
            return Err(ApiError::BadRequest(
                "Student no longer has enough points".into(),
            ));
        }

        insert_transaction(
            &mut tx,
            &request.student_id,
            &request.tutor_id,
            request.points_spent,
            TransactionKind::Redeem,
            &format!("Redeemed for item: {}", item.name),
        )
        .await?;
    }

    let updated = fetch_request(&mut tx, &request.id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("request vanished mid-transaction")))?;
    tx.commit().await?;
    Ok(updated)
}

/// Adds, subtracts, or sets a student's balance (actor: tutor or admin).
///
/// Subtraction floors at zero. The ledger row is sized to the delta the
/// balance actually moved, so the ledger stays consistent with the cache;
/// a zero delta appends nothing.
pub async fn adjust_points(
    pool: &SqlitePool,
    actor: &Claims,
    user_id: &str,
    amount: i64,
    action: PointsAction,
) -> Result<User, ApiError> {
    let mut tx = pool.begin().await?;

    let user = fetch_user(&mut tx, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    authz::adjust_points(actor, &user).require()?;

    let old = user.points;
    let new = match action {
        PointsAction::Add => old + amount,
        PointsAction::Subtract => (old - amount).max(0),
        PointsAction::Set => amount,
    };
    let delta = (new - old).abs();
    let kind = if new >= old {
        TransactionKind::Award
    } else {
        TransactionKind::Redeem
    };

    if delta > 0 {
        insert_transaction(
            &mut tx,
            &user.id,
            &actor.sub,
            delta,
            kind,
            &format!("Points {} by {}", action.verb(), actor.username),
        )
        .await?;
    }

    sqlx::query("UPDATE users SET points = ? WHERE id = ?")
        .bind(new)
        .bind(&user.id)
        .execute(tx.as_mut())
        .await?;

    let updated = fetch_user(&mut tx, &user.id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("user vanished mid-transaction")))?;
    tx.commit().await?;
    Ok(updated)
}

/// Sum of AWARD entries: the "total earned" figure rankings are built on.
pub async fn total_earned(pool: &SqlitePool, student_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"SELECT COALESCE(SUM(points), 0) FROM points_transactions
           WHERE student_id = ? AND kind = 'AWARD'"#,
    )
    .bind(student_id)
    .fetch_one(pool)
    .await
}

/// Recomputes the balance from the ledger alone (awards minus redemptions).
/// For any user whose balance only ever moved through this module, this
/// equals `users.points`.
pub async fn ledger_balance(pool: &SqlitePool, student_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"SELECT COALESCE(SUM(CASE kind WHEN 'AWARD' THEN points ELSE -points END), 0)
           FROM points_transactions WHERE student_id = ?"#,
    )
    .bind(student_id)
    .fetch_one(pool)
    .await
}

async fn fetch_user(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.as_mut())
        .await
}

async fn fetch_item(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<Option<StoreItem>, sqlx::Error> {
    sqlx::query_as::<_, StoreItem>("SELECT * FROM store_items WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.as_mut())
        .await
}

async fn fetch_request(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<Option<ItemRequest>, sqlx::Error> {
    sqlx::query_as::<_, ItemRequest>("SELECT * FROM item_requests WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.as_mut())
        .await
}

async fn insert_transaction(
    tx: &mut Transaction<'_, Sqlite>,
    student_id: &str,
    tutor_id: &str,
    points: i64,
    kind: TransactionKind,
    reason: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO points_transactions (id, student_id, tutor_id, points, kind, reason, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(student_id)
    .bind(tutor_id)
    .bind(points)
    .bind(kind)
    .bind(reason)
    .bind(Utc::now())
    .execute(tx.as_mut())
    .await?;
    Ok(())
}
