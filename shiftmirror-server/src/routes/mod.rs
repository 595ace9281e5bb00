pub mod calendars;
pub mod feeds;
pub mod scheduler;
pub mod sync_runs;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use shiftmirror_core::MirrorError;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(feeds::router())
        .merge(calendars::router())
        .merge(sync_runs::router())
        .merge(scheduler::router())
}

/// Standard API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

/// Convert errors to HTTP responses. Core errors keep their kind and status.
pub struct AppError(anyhow::Error);

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError(MirrorError::NotFound(what.into()).into())
    }
}

fn status_for(err: &MirrorError) -> StatusCode {
    match err {
        MirrorError::NotFound(_) => StatusCode::NOT_FOUND,
        MirrorError::InvalidUrl(_) | MirrorError::Validation(_) => StatusCode::BAD_REQUEST,
        MirrorError::ParseError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        MirrorError::FetchFailed(_) => StatusCode::BAD_GATEWAY,
        MirrorError::FetchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match self.0.downcast_ref::<MirrorError>() {
            Some(err) => (status_for(err), err.kind()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, kind, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: self.0.to_string(),
            kind,
        });
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
