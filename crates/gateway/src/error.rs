//! Gateway error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

/// Non-standard "client closed request".
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("conversation {0} already has an active run")]
    Conflict(String),

    #[error("no active run for conversation {0}")]
    NoActiveRun(String),

    /// Cancelled before the first event was produced.
    #[error("client closed request")]
    ClientClosed,

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NoActiveRun(_) => StatusCode::NOT_FOUND,
            Self::ClientClosed => {
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            // Nobody is listening; the body stays empty.
            Self::ClientClosed => status.into_response(),
            other => (
                status,
                Json(ErrorResponse {
                    error: other.to_string(),
                }),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_closed_maps_to_499() {
        assert_eq!(GatewayError::ClientClosed.status().as_u16(), 499);
    }

    #[test]
    fn statuses_by_variant() {
        assert_eq!(
            GatewayError::Conflict("c".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::NoActiveRun("c".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
