//! JSON envelope helpers shared by every handler.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use xgrid_cluster::ErrorKind;
use xgrid_core::ApiEnvelope;

pub(crate) fn ok<T: Serialize>(data: T) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope::ok(data))
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (status, Json(ApiEnvelope::<()>::err(msg))).into_response()
}

/// HTTP status for a control-plane failure class.
pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
