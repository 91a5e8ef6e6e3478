use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::responses::RequestMeta;

pub const E_VALIDATION: &str = "VALIDATION";
pub const E_CREDENTIALS: &str = "BAD_CREDENTIALS";
pub const E_DUPLICATE: &str = "DUPLICATE";
pub const E_DB_FAILURE: &str = "DB_FAILURE";

/// The error taxonomy every handler speaks: Unauthorized (no/invalid
/// session), Forbidden (wrong role or ownership), NotFound, Conflict
/// (duplicate / already processed), BadRequest (validation and failed
/// preconditions), Internal (everything unclassified).
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }

    fn status_and_message(self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

/// Attaches request meta to any error convertible into [`ApiError`], so
/// handlers can end a fallible call with `.err_meta(&meta)?`.
pub trait WithMetaExt<T> {
    fn err_meta(self, meta: &RequestMeta) -> Result<T, ApiErrorWithMeta>;
}

impl<T, E: Into<ApiError>> WithMetaExt<T> for Result<T, E> {
    fn err_meta(self, meta: &RequestMeta) -> Result<T, ApiErrorWithMeta> {
        self.map_err(|e| {
            let error: ApiError = e.into();
            error.with_meta(meta.clone())
        })
    }
}

// Extractor rejections carry no request meta; everything else goes through
// ApiErrorWithMeta.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();
        (status, Json(json!({ "error": error_message }))).into_response()
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = self.error.status_and_message();

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
