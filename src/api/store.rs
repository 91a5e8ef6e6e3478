use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::authz;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_DUPLICATE, E_VALIDATION, WithMetaExt,
};
use crate::models::{Role, StoreItem};
use crate::responses::{ApiOk, RequestMeta};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemsQuery {
    #[serde(default)]
    pub tutor_id: Option<String>,
}

/// Students see their tutor's store, tutors their own, admin everything
/// (optionally narrowed to one tutor).
pub async fn list_items(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Query(query): Query<ListItemsQuery>,
) -> Result<ApiOk<Vec<StoreItem>>, ApiErrorWithMeta> {
    let tutor_filter = match user.role {
        Role::Admin => query.tutor_id.clone(),
        Role::Tutor => Some(user.sub.clone()),
        Role::Student => match &user.tutor_id {
            Some(tutor_id) => Some(tutor_id.clone()),
            None => {
                return Err(ApiError::BadRequest("No tutor assigned".into())
                    .with_meta(meta)
                    .with_code(E_VALIDATION));
            }
        },
    };

    let items = sqlx::query_as::<_, StoreItem>(
        r#"SELECT * FROM store_items
           WHERE (? IS NULL OR tutor_id = ?)
           ORDER BY created_at DESC"#,
    )
    .bind(&tutor_filter)
    .bind(&tutor_filter)
    .fetch_all(&st.pool)
    .await
    .err_meta(&meta)?;

    Ok(ApiOk::ok("store items fetched", items, meta))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemRequest {
    pub name: String,
    pub description: String,
    pub points_required: i64,
    pub available_quantity: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Admin only: the tutor whose store receives the item.
    #[serde(default)]
    pub tutor_id: Option<String>,
}

pub async fn create_item(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateItemRequest>,
) -> Result<ApiOk<StoreItem>, ApiErrorWithMeta> {
    if user.role.is_student() {
        return Err(
            ApiError::Forbidden("Only admin or tutor can create store items".into())
                .with_meta(meta),
        );
    }
    validate_item_fields(&req.name, &req.description, req.points_required, req.available_quantity)
        .err_meta(&meta)?;

    let owner = match user.role {
        Role::Admin => {
            let Some(tutor_id) = req.tutor_id.clone() else {
                return Err(ApiError::BadRequest("Tutor ID is required".into())
                    .with_meta(meta)
                    .with_code(E_VALIDATION));
            };
            let found = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM users WHERE id = ? AND role = 'TUTOR'",
            )
            .bind(&tutor_id)
            .fetch_one(&st.pool)
            .await
            .err_meta(&meta)?;
            if found == 0 {
                return Err(ApiError::BadRequest("Invalid tutor ID".into())
                    .with_meta(meta)
                    .with_code(E_VALIDATION));
            }
            tutor_id
        }
        _ => user.sub.clone(),
    };

    let id = Uuid::new_v4().to_string();
    let res = sqlx::query(
        r#"INSERT INTO store_items
           (id, tutor_id, name, description, points_required, available_quantity, image_url, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&owner)
    .bind(&req.name)
    .bind(&req.description)
    .bind(req.points_required)
    .bind(req.available_quantity)
    .bind(&req.image_url)
    .bind(Utc::now())
    .execute(&st.pool)
    .await;

    if let Err(sqlx::Error::Database(db_err)) = &res {
        if db_err.is_unique_violation() {
            return Err(ApiError::Conflict(
                "An item with this name already exists in this tutor's store".into(),
            )
            .with_meta(meta)
            .with_code(E_DUPLICATE));
        }
    }
    res.err_meta(&meta)?;

    let item = sqlx::query_as::<_, StoreItem>("SELECT * FROM store_items WHERE id = ?")
        .bind(&id)
        .fetch_one(&st.pool)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::created("Store item created successfully", item, meta))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemRequest {
    pub name: String,
    pub description: String,
    pub points_required: i64,
    pub available_quantity: i64,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Price edits only affect future requests: `points_spent` on existing
/// requests is a snapshot.
pub async fn update_item(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<ApiOk<StoreItem>, ApiErrorWithMeta> {
    let item = sqlx::query_as::<_, StoreItem>("SELECT * FROM store_items WHERE id = ?")
        .bind(&id)
        .fetch_optional(&st.pool)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Item not found".into()).with_meta(meta.clone()))?;

    authz::manage_store_item(&user, &item)
        .require()
        .err_meta(&meta)?;
    validate_item_fields(&req.name, &req.description, req.points_required, req.available_quantity)
        .err_meta(&meta)?;

    sqlx::query(
        r#"UPDATE store_items SET name = ?, description = ?, points_required = ?,
           available_quantity = ?, image_url = ? WHERE id = ?"#,
    )
    .bind(&req.name)
    .bind(&req.description)
    .bind(req.points_required)
    .bind(req.available_quantity)
    .bind(&req.image_url)
    .bind(&item.id)
    .execute(&st.pool)
    .await
    .err_meta(&meta)?;

    let updated = sqlx::query_as::<_, StoreItem>("SELECT * FROM store_items WHERE id = ?")
        .bind(&item.id)
        .fetch_one(&st.pool)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::ok("Store item updated successfully", updated, meta))
}

pub async fn delete_item(
    State(st): State<AppState>,
    user: AuthUser,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
) -> Result<ApiOk<()>, ApiErrorWithMeta> {
    let item = sqlx::query_as::<_, StoreItem>("SELECT * FROM store_items WHERE id = ?")
        .bind(&id)
        .fetch_optional(&st.pool)
        .await
        .err_meta(&meta)?
        .ok_or_else(|| ApiError::NotFound("Item not found".into()).with_meta(meta.clone()))?;

    authz::manage_store_item(&user, &item)
        .require()
        .err_meta(&meta)?;

    sqlx::query("DELETE FROM store_items WHERE id = ?")
        .bind(&item.id)
        .execute(&st.pool)
        .await
        .err_meta(&meta)?;

    Ok(ApiOk::ok("Store item deleted successfully", (), meta))
}

fn validate_item_fields(
    name: &str,
    description: &str,
    points_required: i64,
    available_quantity: i64,
) -> Result<(), ApiError> {
    if name.is_empty() || description.is_empty() {
        return Err(ApiError::BadRequest(
            "Name and description are required".into(),
        ));
    }
    if points_required <= 0 {
        return Err(ApiError::BadRequest(
            "Points required must be greater than 0".into(),
        ));
    }
    if available_quantity < 0 {
        return Err(ApiError::BadRequest(
            "Available quantity cannot be negative".into(),
        ));
    }
    Ok(())
}
