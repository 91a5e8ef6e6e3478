use axum::{Extension, extract::State};
use serde::Serialize;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::classroom;
use crate::error::{ApiError, ApiErrorWithMeta, WithMetaExt};
use crate::models::{Classroom, UserSummary};
use crate::points;
use crate::responses::{ApiOk, RequestMeta};

#[derive(sqlx::FromRow)]
struct LeaderboardRow {
    id: String,
    username: String,
    first_name: Option<String>,
    last_name: Option<String>,
    current_points: i64,
    total_earned: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub current_points: i64,
    pub total_earned_points: i64,
    pub rank: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRank {
    pub rank: usize,
    pub current_points: i64,
    pub total_earned_points: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub leaderboard: Vec<LeaderboardEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_rank: Option<UserRank>,
    pub total: usize,
}

/// Rankings come from the ledger ("total earned" = sum of AWARD rows), not
/// from the cached balance, so redemptions do not push students down.
pub async fn leaderboard(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<LeaderboardResponse>, ApiErrorWithMeta> {
    let rows = sqlx::query_as::<_, LeaderboardRow>(
        r#"SELECT u.id, u.username, u.first_name, u.last_name, u.points AS current_points,
                  COALESCE((SELECT SUM(t.points) FROM points_transactions t
                            WHERE t.student_id = u.id AND t.kind = 'AWARD'), 0) AS total_earned
           FROM users u
           WHERE u.role = 'STUDENT'
           ORDER BY total_earned DESC, u.points DESC, u.username ASC"#,
    )
    .fetch_all(&st.pool)
    .await
    .err_meta(&meta)?;

    let total = rows.len();
    let entries: Vec<LeaderboardEntry> = rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| LeaderboardEntry {
            id: row.id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            current_points: row.current_points,
            total_earned_points: row.total_earned,
            rank: idx + 1,
        })
        .collect();

    let user_rank = user
        .role
        .is_student()
        .then(|| {
            entries.iter().find(|e| e.id == user.sub).map(|e| UserRank {
                rank: e.rank,
                current_points: e.current_points,
                total_earned_points: e.total_earned_points,
            })
        })
        .flatten();

    let leaderboard = entries.into_iter().take(25).collect();

    Ok(ApiOk::ok(
        "leaderboard fetched",
        LeaderboardResponse {
            leaderboard,
            user_rank,
            total,
        },
        meta,
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub points: i64,
    pub total_earned_points: i64,
    pub events_joined: i64,
    pub pending_requests: i64,
    pub approved_requests: i64,
}

pub async fn student_stats(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<StudentStats>, ApiErrorWithMeta> {
    if !user.role.is_student() {
        return Err(ApiError::Forbidden("Students only".into()).with_meta(meta));
    }

    let points = sqlx::query_scalar::<_, i64>("SELECT points FROM users WHERE id = ?")
        .bind(&user.sub)
        .fetch_optional(&st.pool)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Student not found".into()).with_meta(meta.clone()))?;

    let total_earned_points = points::total_earned(&st.pool, &user.sub)
        .await
        .err_meta(&meta)?;

    let events_joined = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM event_participants WHERE user_id = ?",
    )
    .bind(&user.sub)
    .fetch_one(&st.pool)
    .await
    .err_meta(&meta)?;

    let pending_requests = count_requests(&st, &user.sub, "PENDING").await.err_meta(&meta)?;
    let approved_requests = count_requests(&st, &user.sub, "APPROVED").await.err_meta(&meta)?;

    Ok(ApiOk::ok(
        "student stats fetched",
        StudentStats {
            points,
            total_earned_points,
            events_joined,
            pending_requests,
            approved_requests,
        },
        meta,
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomView {
    #[serde(flatten)]
    pub classroom: Classroom,
    pub tutor: UserSummary,
    pub classmates: i64,
}

pub async fn student_classroom(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<ClassroomView>, ApiErrorWithMeta> {
    if !user.role.is_student() {
        return Err(ApiError::Forbidden("Students only".into()).with_meta(meta));
    }
    let Some(tutor_id) = user.tutor_id.clone() else {
        return Err(ApiError::BadRequest("No tutor assigned".into()).with_meta(meta));
    };

    let tutor = sqlx::query_as::<_, UserSummary>(
        "SELECT id, username, first_name, last_name FROM users WHERE id = ?",
    )
    .bind(&tutor_id)
    .fetch_optional(&st.pool)
    .await
    .err_meta(&meta)?
    .ok_or_else(|| ApiError::NotFound("Tutor not found".into()).with_meta(meta.clone()))?;

    let room = classroom::for_tutor(&st.pool, &tutor_id)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Classroom not found".into()).with_meta(meta.clone()))?;

    let classmates = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE tutor_id = ? AND id != ?",
    )
    .bind(&tutor_id)
    .bind(&user.sub)
    .fetch_one(&st.pool)
    .await
    .err_meta(&meta)?;

    Ok(ApiOk::ok(
        "classroom fetched",
        ClassroomView {
            classroom: room,
            tutor,
            classmates,
        },
        meta,
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorProfile {
    pub student_count: i64,
    pub event_count: i64,
    pub completed_events: i64,
    pub total_points_awarded: i64,
}

pub async fn tutor_profile(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<TutorProfile>, ApiErrorWithMeta> {
    if !user.role.is_tutor() {
        return Err(ApiError::Forbidden("Tutors only".into()).with_meta(meta));
    }

    let student_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE tutor_id = ?")
            .bind(&user.sub)
            .fetch_one(&st.pool)
            .await
            .err_meta(&meta)?;

    let event_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events WHERE created_by = ?")
            .bind(&user.sub)
            .fetch_one(&st.pool)
            .await
            .err_meta(&meta)?;

    let completed_events = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM events WHERE created_by = ? AND status = 'COMPLETED'",
    )
    .bind(&user.sub)
    .fetch_one(&st.pool)
    .await
    .err_meta(&meta)?;

    let total_points_awarded = sqlx::query_scalar::<_, i64>(
        r#"SELECT COALESCE(SUM(points), 0) FROM points_transactions
           WHERE tutor_id = ? AND kind = 'AWARD'"#,
    )
    .bind(&user.sub)
    .fetch_one(&st.pool)
    .await
    .err_meta(&meta)?;

    Ok(ApiOk::ok(
        "tutor profile fetched",
        TutorProfile {
            student_count,
            event_count,
            completed_events,
            total_points_awarded,
        },
        meta,
    ))
}

async fn count_requests(st: &AppState, student_id: &str, status: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM item_requests WHERE student_id = ? AND status = ?",
    )
    .bind(student_id)
    .bind(status)
    .fetch_one(&st.pool)
    .await
}
