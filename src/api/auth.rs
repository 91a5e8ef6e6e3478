use axum::{Extension, Json, extract::State};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::{self, AuthUser};
use crate::classroom;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_CREDENTIALS, E_DUPLICATE, E_VALIDATION, WithMetaExt,
};
use crate::models::{RegistrationRequest, RequestStatus, Role, User, UserSummary};
use crate::responses::{ApiOk, RequestMeta};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: User,
    /// The student's tutor, when one is assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tutor: Option<UserSummary>,
}

pub async fn login(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, ApiOk<LoginResponse>), ApiErrorWithMeta> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("Username and password are required".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(&req.username)
        .fetch_optional(&st.pool)
        .await
        .err_meta(&meta)?;

    let Some(user) = user else {
        return Err(ApiError::Unauthorized.with_meta(meta).with_code(E_CREDENTIALS));
    };
    if !auth::verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::Unauthorized.with_meta(meta).with_code(E_CREDENTIALS));
    }

    let tutor = match &user.tutor_id {
        Some(tutor_id) => sqlx::query_as::<_, UserSummary>(
            "SELECT id, username, first_name, last_name FROM users WHERE id = ?",
        )
        .bind(tutor_id)
        .fetch_optional(&st.pool)
        .await
        .err_meta(&meta)?,
        None => None,
    };

    let token = auth::sign_token(&user, &st.config.jwt_secret, st.config.token_ttl_minutes)
        .err_meta(&meta)?;
    let jar = jar.add(auth::session_cookie(token));

    Ok((
        jar,
        ApiOk::ok("Login successful", LoginResponse { user, tutor }, meta),
    ))
}

pub async fn logout(
    Extension(meta): Extension<RequestMeta>,
    jar: CookieJar,
) -> (CookieJar, ApiOk<()>) {
    let jar = jar.remove(auth::clear_session_cookie());
    (jar, ApiOk::ok("Logged out", (), meta))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub requested_role: Option<Role>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub request_id: String,
}

/// Files a registration request for admin review; no account is created yet.
pub async fn register(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<RegisterRequest>,
) -> Result<ApiOk<RegisterResponse>, ApiErrorWithMeta> {
    if req.username.is_empty()
        || req.email.is_empty()
        || req.password.is_empty()
        || req.first_name.is_empty()
        || req.last_name.is_empty()
    {
        return Err(ApiError::BadRequest("All fields are required".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let taken = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE username = ? OR email = ?",
    )
    .bind(&req.username)
    .bind(&req.email)
    .fetch_one(&st.pool)
    .await
    .err_meta(&meta)?;
    if taken > 0 {
        return Err(
            ApiError::Conflict("An account with similar information already exists".into())
                .with_meta(meta)
                .with_code(E_DUPLICATE),
        );
    }

    let pending = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM registration_requests
         WHERE (username = ? OR email = ?) AND status = 'PENDING'",
    )
    .bind(&req.username)
    .bind(&req.email)
    .fetch_one(&st.pool)
    .await
    .err_meta(&meta)?;
    if pending > 0 {
        return Err(ApiError::Conflict(
            "A registration request with similar information is already pending".into(),
        )
        .with_meta(meta)
        .with_code(E_DUPLICATE));
    }

    let password_hash = auth::hash_password(&req.password).err_meta(&meta)?;
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO registration_requests
           (id, username, email, password_hash, first_name, last_name, requested_role, status, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&req.username)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&req.first_name)
    .bind(&req.last_name)
    .bind(req.requested_role.unwrap_or(Role::Student))
    .bind(RequestStatus::Pending)
    .bind(Utc::now())
    .execute(&st.pool)
    .await
    .err_meta(&meta)?;

    Ok(ApiOk::created(
        "Registration request submitted successfully. An administrator will review your request.",
        RegisterResponse { request_id: id },
        meta,
    ))
}

pub async fn list_registration_requests(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<RegistrationRequest>>, ApiErrorWithMeta> {
    if !user.role.is_admin() {
        return Err(
            ApiError::Forbidden("Only admin can review registration requests".into())
                .with_meta(meta),
        );
    }

    let requests = sqlx::query_as::<_, RegistrationRequest>(
        "SELECT * FROM registration_requests ORDER BY created_at DESC",
    )
    .fetch_all(&st.pool)
    .await
    .err_meta(&meta)?;

    Ok(ApiOk::ok("registration requests fetched", requests, meta))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationAction {
    Approve,
    Reject,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRegistrationRequest {
    pub request_id: String,
    pub action: RegistrationAction,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRegistrationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Approves (materializing the user) or rejects a pending registration.
pub async fn process_registration_request(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<ProcessRegistrationRequest>,
) -> Result<ApiOk<ProcessRegistrationResponse>, ApiErrorWithMeta> {
    if !user.role.is_admin() {
        return Err(
            ApiError::Forbidden("Only admin can review registration requests".into())
                .with_meta(meta),
        );
    }
    if req.action == RegistrationAction::Reject
        && req.rejection_reason.as_deref().unwrap_or("").is_empty()
    {
        return Err(ApiError::BadRequest("Rejection reason is required".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let registration = sqlx::query_as::<_, RegistrationRequest>(
        "SELECT * FROM registration_requests WHERE id = ?",
    )
    .bind(&req.request_id)
    .fetch_optional(&st.pool)
    .await
    .err_meta(&meta)?
    .ok_or_else(|| {
        ApiError::NotFound("Registration request not found".into()).with_meta(meta.clone())
    })?;

    if registration.status != RequestStatus::Pending {
        return Err(
            ApiError::Conflict("Registration request has already been processed".into())
                .with_meta(meta),
        );
    }

    match req.action {
        RegistrationAction::Approve => {
            let created = approve_registration(&st, &registration)
                .await
                .err_meta(&meta)?;
            Ok(ApiOk::ok(
                "Registration request approved successfully",
                ProcessRegistrationResponse {
                    user: Some(created),
                },
                meta,
            ))
        }
        RegistrationAction::Reject => {
            sqlx::query(
                "UPDATE registration_requests SET status = ?, rejection_reason = ? WHERE id = ?",
            )
            .bind(RequestStatus::Rejected)
            .bind(req.rejection_reason.as_deref().unwrap_or(""))
            .bind(&registration.id)
            .execute(&st.pool)
            .await
            .err_meta(&meta)?;
            Ok(ApiOk::ok(
                "Registration request rejected successfully",
                ProcessRegistrationResponse { user: None },
                meta,
            ))
        }
    }
}

async fn approve_registration(
    st: &AppState,
    registration: &RegistrationRequest,
) -> Result<User, ApiError> {
    let mut tx = st.pool.begin().await?;

    // The name may have been taken since the request was filed.
    let taken = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE username = ? OR email = ?",
    )
    .bind(&registration.username)
    .bind(&registration.email)
    .fetch_one(tx.as_mut())
    .await?;
    if taken > 0 {
        return Err(ApiError::Conflict(
            "Username or email already exists".into(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO users
           (id, username, email, password_hash, role, first_name, last_name, points, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)"#,
    )
    .bind(&id)
    .bind(&registration.username)
    .bind(&registration.email)
    .bind(&registration.password_hash)
    .bind(registration.requested_role)
    .bind(&registration.first_name)
    .bind(&registration.last_name)
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

    sqlx::query("UPDATE registration_requests SET status = ? WHERE id = ?")
        .bind(RequestStatus::Approved)
        .bind(&registration.id)
        .execute(tx.as_mut())
        .await?;

    tx.commit().await?;
    Ok(created)
}
