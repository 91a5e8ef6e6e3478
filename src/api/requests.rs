use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::authz;
use crate::error::{ApiError, ApiErrorWithMeta, E_VALIDATION, WithMetaExt};
use crate::models::{ItemRequest, RequestStatus, Role, StoreItem, UserSummary};
use crate::points;
use crate::responses::{ApiOk, RequestMeta};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequestBody {
    pub item_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Student submits a redemption request; price is snapshotted at this point.
pub async fn submit_request(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Json(body): Json<SubmitRequestBody>,
) -> Result<ApiOk<ItemRequest>, ApiErrorWithMeta> {
    if !user.role.is_student() {
        return Err(
            ApiError::Forbidden("Only students can request items".into()).with_meta(meta),
        );
    }
    if body.item_id.is_empty() {
        return Err(ApiError::BadRequest("Item ID is required".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let request = points::submit_request(&st.pool, &user.sub, &body.item_id, body.note)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::created(
        "Item request submitted successfully",
        request,
        meta,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequestsQuery {
    #[serde(default)]
    pub status: Option<RequestStatus>,
}

/// Admin sees all requests, tutors the ones routed to them, students their own.
pub async fn list_requests(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<ApiOk<Vec<ItemRequest>>, ApiErrorWithMeta> {
    let (tutor_filter, student_filter) = match user.role {
        Role::Admin => (None, None),
        Role::Tutor => (Some(user.sub.clone()), None),
        Role::Student => (None, Some(user.sub.clone())),
    };

    let requests = sqlx::query_as::<_, ItemRequest>(
        r#"SELECT * FROM item_requests
           WHERE (? IS NULL OR status = ?)
             AND (? IS NULL OR tutor_id = ?)
             AND (? IS NULL OR student_id = ?)
           ORDER BY created_at DESC"#,
    )
    .bind(query.status)
    .bind(query.status)
    .bind(&tutor_filter)
    .bind(&tutor_filter)
    .bind(&student_filter)
    .bind(&student_filter)
    .fetch_all(&st.pool)
    .await
    .err_meta(&meta)?;

    Ok(ApiOk::ok("requests fetched", requests, meta))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: ItemRequest,
    pub student: Option<UserSummary>,
    pub tutor: Option<UserSummary>,
    pub item: Option<StoreItem>,
}

pub async fn get_request(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
) -> Result<ApiOk<RequestDetail>, ApiErrorWithMeta> {
    let request = sqlx::query_as::<_, ItemRequest>("SELECT * FROM item_requests WHERE id = ?")
        .bind(&id)
        .fetch_optional(&st.pool)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Request not found".into()).with_meta(meta.clone()))?;

    authz::view_request(&user, &request)
        .require()
        .err_meta(&meta)?;

    let student = fetch_summary(&st, &request.student_id).await.err_meta(&meta)?;
    let tutor = fetch_summary(&st, &request.tutor_id).await.err_meta(&meta)?;
    let item = sqlx::query_as::<_, StoreItem>("SELECT * FROM store_items WHERE id = ?")
        .bind(&request.item_id)
        .fetch_optional(&st.pool)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::ok(
        "request fetched",
        RequestDetail {
            request,
            student,
            tutor,
            item,
        },
        meta,
    ))
}

#[derive(Deserialize)]
pub struct ProcessRequestBody {
    pub status: RequestStatus,
    #[serde(default)]
    pub note: Option<String>,
}

/// Approves or rejects a PENDING request. Approval atomically re-checks
/// stock and balance; see `points::process_request`.
pub async fn process_request(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
    Json(body): Json<ProcessRequestBody>,
) -> Result<ApiOk<ItemRequest>, ApiErrorWithMeta> {
    if user.role.is_student() {
        return Err(
            ApiError::Forbidden("Only admin or tutor can update requests".into()).with_meta(meta),
        );
    }
    if body.status == RequestStatus::Pending {
        return Err(ApiError::BadRequest("Cannot set status back to pending".into())
            .with_meta(meta)
            .with_code(E_VALIDATION));
    }

    let updated = points::process_request(&st.pool, &user, &id, body.status, body.note)
        .await
        .err_meta(&meta)?;

    let message = match updated.status {
        RequestStatus::Approved => "Request approved successfully",
        _ => "Request rejected successfully",
    };
    Ok(ApiOk::ok(message, updated, meta))
}

async fn fetch_summary(st: &AppState, id: &str) -> Result<Option<UserSummary>, sqlx::Error> {
    sqlx::query_as::<_, UserSummary>(
        "SELECT id, username, first_name, last_name FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&st.pool)
    .await
}
