use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::{self, AuthUser};
use crate::authz;
use crate::classroom;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_DUPLICATE, E_VALIDATION, WithMetaExt,
};
use crate::models::{Role, User, UserSummary};
use crate::points::{self, PointsAction};
use crate::responses::{ApiOk, Pagination, RequestMeta};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub tutor_id: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

/// Admin sees everyone (optionally filtered); tutors see their students.
pub async fn list_users(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Query(query): Query<ListUsersQuery>,
) -> Result<ApiOk<Vec<User>>, ApiErrorWithMeta> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);

    let (role_filter, tutor_filter) = match user.role {
        Role::Admin => (query.role, query.tutor_id.clone()),
        Role::Tutor => (Some(Role::Student), Some(user.sub.clone())),
        Role::Student => {
            return Err(
                ApiError::Forbidden("Only admin or tutor can list users".into()).with_meta(meta),
            );
        }
    };

    let total = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM users
           WHERE (? IS NULL OR role = ?) AND (? IS NULL OR tutor_id = ?)"#,
    )
    .bind(role_filter)
    .bind(role_filter)
    .bind(&tutor_filter)
    .bind(&tutor_filter)
    .fetch_one(&st.pool)
    .await
    .err_meta(&meta)?;

    let users = sqlx::query_as::<_, User>(
        r#"SELECT * FROM users
           WHERE (? IS NULL OR role = ?) AND (? IS NULL OR tutor_id = ?)
           ORDER BY created_at DESC
           LIMIT ? OFFSET ?"#,
    )
    .bind(role_filter)
    .bind(role_filter)
    .bind(&tutor_filter)
    .bind(&tutor_filter)
    .bind(per_page as i64)
    .bind(((page - 1) * per_page) as i64)
    .fetch_all(&st.pool)
    .await
    .err_meta(&meta)?;

    Ok(ApiOk::paginated(
        "users fetched",
        users,
        Pagination::new(page, per_page, total as u64),
        meta,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub tutor_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Admin-only account creation. Tutors get their classroom in the same
/// transaction; students must arrive with a tutor assignment.
pub async fn create_user(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateUserRequest>,
) -> Result<ApiOk<User>, ApiErrorWithMeta> {
    if !user.role.is_admin() {
        return Err(ApiError::Forbidden("Only admin can create users".into()).with_meta(meta));
    }
    if req.username.is_empty() || req.email.is_empty() || req.password.is_empty() {
        return Err(
            ApiError::BadRequest("Username, email, password, and role are required".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }
    if req.role.is_student() && req.tutor_id.is_none() {
        return Err(ApiError::BadRequest("Tutor ID is required for students".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let tutor_id = match (&req.role, &req.tutor_id) {
        (Role::Student, Some(tutor_id)) => {
            validate_tutor(&st, tutor_id).await.err_meta(&meta)?;
            Some(tutor_id.clone())
        }
        _ => None,
    };

    let taken = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE username = ? OR email = ?",
    )
    .bind(req.username.trim())
    .bind(req.email.trim().to_lowercase())
    .fetch_one(&st.pool)
    .await
    .err_meta(&meta)?;
    if taken > 0 {
        return Err(ApiError::Conflict("Username or email already exists".into())
            .with_meta(meta)
            .with_code(E_DUPLICATE));
    }

    let password_hash = auth::hash_password(&req.password).err_meta(&meta)?;
    let created = insert_user(&st, &req, tutor_id.as_deref(), &password_hash)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::created("User created successfully", created, meta))
}

async fn insert_user(
    st: &AppState,
    req: &CreateUserRequest,
    tutor_id: Option<&str>,
    password_hash: &str,
) -> Result<User, ApiError> {
    let mut tx = st.pool.begin().await?;

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO users
           (id, username, email, password_hash, role, first_name, last_name, tutor_id, points, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)"#,
    )
    .bind(&id)
    .bind(req.username.trim())
    .bind(req.email.trim().to_lowercase())
    .bind(password_hash)
    .bind(req.role)
    .bind(req.first_name.as_deref().map(str::trim))
    .bind(req.last_name.as_deref().map(str::trim))
    .bind(tutor_id)
    .bind(Utc::now())
    .execute(tx.as_mut())
    .await?;

    let created = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(tx.as_mut())
        .await?;

    if created.role.is_tutor() {
        classroom::ensure_classroom_for_tutor(&mut tx, &created).await?;
    }

    tx.commit().await?;
    Ok(created)
}

async fn validate_tutor(st: &AppState, tutor_id: &str) -> Result<(), ApiError> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE id = ? AND role = 'TUTOR'",
    )
    .bind(tutor_id)
    .fetch_one(&st.pool)
    .await?;
    if found == 0 {
        return Err(ApiError::BadRequest("Invalid tutor ID".into()));
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tutor: Option<UserSummary>,
}

pub async fn get_user(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
) -> Result<ApiOk<UserDetail>, ApiErrorWithMeta> {
    let target = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_optional(&st.pool)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()).with_meta(meta.clone()))?;

    authz::view_user(&user, &target).require().err_meta(&meta)?;

    let tutor = match &target.tutor_id {
        Some(tutor_id) => sqlx::query_as::<_, UserSummary>(
            "SELECT id, username, first_name, last_name FROM users WHERE id = ?",
        )
        .bind(tutor_id)
        .fetch_optional(&st.pool)
        .await
        .err_meta(&meta)?,
        None => None,
    };

    Ok(ApiOk::ok(
        "user fetched",
        UserDetail {
            user: target,
            tutor,
        },
        meta,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub tutor_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Admin-only profile update; promotion to TUTOR runs the classroom step.
pub async fn update_user(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<ApiOk<User>, ApiErrorWithMeta> {
    if !user.role.is_admin() {
        return Err(ApiError::Forbidden("Only admin can update users".into()).with_meta(meta));
    }

    let target = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_optional(&st.pool)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()).with_meta(meta.clone()))?;

    let username = req.username.unwrap_or_else(|| target.username.clone());
    let email = req.email.unwrap_or_else(|| target.email.clone());
    if username != target.username || email != target.email {
        let taken = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE (username = ? OR email = ?) AND id != ?",
        )
        .bind(&username)
        .bind(&email)
        .bind(&target.id)
        .fetch_one(&st.pool)
        .await
        .err_meta(&meta)?;
        if taken > 0 {
            return Err(ApiError::Conflict("Username or email already exists".into())
                .with_meta(meta)
                .with_code(E_DUPLICATE));
        }
    }

    let role = req.role.unwrap_or(target.role);
    let tutor_id = match role {
        Role::Student => {
            let tutor_id = req.tutor_id.or_else(|| target.tutor_id.clone());
            match &tutor_id {
                Some(tid) => validate_tutor(&st, tid).await.err_meta(&meta)?,
                None => {
                    return Err(ApiError::BadRequest("Tutor ID is required for students".into())
                        .with_meta(meta)
                        .with_code(E_VALIDATION));
                }
            }
            tutor_id
        }
        // Only students carry a tutor assignment.
        _ => None,
    };

    let mut tx = st.pool.begin().await.err_meta(&meta)?;
    sqlx::query(
        r#"UPDATE users SET username = ?, email = ?, role = ?, tutor_id = ?,
           first_name = ?, last_name = ? WHERE id = ?"#,
    )
    .bind(&username)
    .bind(&email)
    .bind(role)
    .bind(&tutor_id)
    .bind(req.first_name.as_deref().or(target.first_name.as_deref()))
    .bind(req.last_name.as_deref().or(target.last_name.as_deref()))
    .bind(&target.id)
    .execute(tx.as_mut())
    .await
    .err_meta(&meta)?;

    let updated = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&target.id)
        .fetch_one(tx.as_mut())
        .await
        .err_meta(&meta)?;

    if updated.role.is_tutor() {
        classroom::ensure_classroom_for_tutor(&mut tx, &updated)
            .await
            .err_meta(&meta)?;
    }
    tx.commit().await.err_meta(&meta)?;

    Ok(ApiOk::ok("User updated successfully", updated, meta))
}

pub async fn delete_user(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
) -> Result<ApiOk<()>, ApiErrorWithMeta> {
    if !user.role.is_admin() {
        return Err(ApiError::Forbidden("Only admin can delete users".into()).with_meta(meta));
    }
    if user.sub == id {
        return Err(ApiError::BadRequest("You cannot delete your own account".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&st.pool)
        .await
        .err_meta(&meta)?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound("User not found".into()).with_meta(meta));
    }

    Ok(ApiOk::ok("User deleted successfully", (), meta))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub password: String,
}

pub async fn change_password(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<ApiOk<()>, ApiErrorWithMeta> {
    if !user.role.is_admin() && user.sub != id {
        return Err(
            ApiError::Forbidden("You can only change your own password".into()).with_meta(meta),
        );
    }
    if req.password.len() < 6 {
        return Err(
            ApiError::BadRequest("Password must be at least 6 characters".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }

    let password_hash = auth::hash_password(&req.password).err_meta(&meta)?;
    let updated = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(&id)
        .execute(&st.pool)
        .await
        .err_meta(&meta)?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("User not found".into()).with_meta(meta));
    }

    Ok(ApiOk::ok("Password updated successfully", (), meta))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRoleRequest {
    pub user_id: String,
    pub role: Role,
}

pub async fn change_role(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<ApiOk<User>, ApiErrorWithMeta> {
    if !user.role.is_admin() {
        return Err(ApiError::Forbidden("Only admin can change roles".into()).with_meta(meta));
    }

    let mut tx = st.pool.begin().await.err_meta(&meta)?;
    let updated = sqlx::query(
        // A promoted student stops being anyone's student.
        "UPDATE users SET role = ?, tutor_id = CASE WHEN ? = 'STUDENT' THEN tutor_id ELSE NULL END WHERE id = ?",
    )
    .bind(req.role)
    .bind(req.role)
    .bind(&req.user_id)
    .execute(tx.as_mut())
    .await
    .err_meta(&meta)?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("User not found".into()).with_meta(meta));
    }

    let target = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&req.user_id)
        .fetch_one(tx.as_mut())
        .await
        .err_meta(&meta)?;

    if target.role.is_tutor() {
        classroom::ensure_classroom_for_tutor(&mut tx, &target)
            .await
            .err_meta(&meta)?;
    }
    tx.commit().await.err_meta(&meta)?;

    Ok(ApiOk::ok("Role updated successfully", target, meta))
}

#[derive(Deserialize)]
pub struct UpdatePointsRequest {
    pub points: i64,
    pub action: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePointsResponse {
    pub id: String,
    pub username: String,
    pub points: i64,
}

pub async fn update_points(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
    Json(req): Json<UpdatePointsRequest>,
) -> Result<ApiOk<UpdatePointsResponse>, ApiErrorWithMeta> {
    if user.role.is_student() {
        return Err(
            ApiError::Forbidden("Only admin or tutor can modify points".into()).with_meta(meta),
        );
    }
    if req.points < 0 {
        return Err(
            ApiError::BadRequest("Points must be a valid non-negative number".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    }
    let Some(action) = PointsAction::parse(&req.action) else {
        return Err(
            ApiError::BadRequest("Action must be one of: add, subtract, set".into())
                .with_meta(meta)
                .with_code(E_VALIDATION),
        );
    };

    let updated = points::adjust_points(&st.pool, &user, &id, req.points, action)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::ok(
        "Points updated successfully",
        UpdatePointsResponse {
            id: updated.id,
            username: updated.username,
            points: updated.points,
        },
        meta,
    ))
}
