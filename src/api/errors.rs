//! API errors
//!
//! Every failure leaves as `{request_id, error: {code, message}}` so clients
//! can correlate it with server logs.

use crate::errors::{LobbyError, SurvivalError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Forbidden(String),
    Unauthorized(String),
    InternalError(String),
}

impl ApiErrorKind {
    fn status(&self) -> StatusCode {
        match self {
            ApiErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ApiErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiErrorKind::Conflict(_) => StatusCode::CONFLICT,
            ApiErrorKind::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiErrorKind::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiErrorKind::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiErrorKind::NotFound(_) => "NOT_FOUND",
            ApiErrorKind::BadRequest(_) => "BAD_REQUEST",
            ApiErrorKind::Conflict(_) => "CONFLICT",
            ApiErrorKind::Forbidden(_) => "FORBIDDEN",
            ApiErrorKind::Unauthorized(_) => "UNAUTHORIZED",
            ApiErrorKind::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    fn into_message(self) -> String {
        match self {
            ApiErrorKind::NotFound(m)
            | ApiErrorKind::BadRequest(m)
            | ApiErrorKind::Conflict(m)
            | ApiErrorKind::Forbidden(m)
            | ApiErrorKind::Unauthorized(m)
            | ApiErrorKind::InternalError(m) => m,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiErrorKind::NotFound(m)
            | ApiErrorKind::BadRequest(m)
            | ApiErrorKind::Conflict(m)
            | ApiErrorKind::Forbidden(m)
            | ApiErrorKind::Unauthorized(m)
            | ApiErrorKind::InternalError(m) => m,
        }
    }
}

impl ApiError {
    pub fn not_found(request_id: String, message: String) -> Self {
        Self { kind: ApiErrorKind::NotFound(message), request_id }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self { kind: ApiErrorKind::BadRequest(message), request_id }
    }

    pub fn unauthorized(request_id: String, message: String) -> Self {
        Self { kind: ApiErrorKind::Unauthorized(message), request_id }
    }

    pub fn internal_error(request_id: String, message: String) -> Self {
        Self { kind: ApiErrorKind::InternalError(message), request_id }
    }

    /// 409 for state conflicts, 403 for permission, 404 for unknown
    /// matches, 400 for empty starts and bad pool settings
    pub fn from_lobby(request_id: String, error: LobbyError) -> Self {
        let message = error.to_string();
        let kind = match error {
            LobbyError::AlreadyActive(_) | LobbyError::AlreadyStarted | LobbyError::Full(_) => {
                ApiErrorKind::Conflict(message)
            }
            LobbyError::Unauthorized(_) => ApiErrorKind::Forbidden(message),
            LobbyError::NoActiveMatch(_) | LobbyError::StaleHandle(_) => ApiErrorKind::NotFound(message),
            LobbyError::Empty | LobbyError::InvalidPool(_) => ApiErrorKind::BadRequest(message),
        };
        Self { kind, request_id }
    }

    pub fn from_survival(request_id: String, error: SurvivalError) -> Self {
        match error {
            SurvivalError::Lobby(e) => Self::from_lobby(request_id, e),
            other => Self::internal_error(request_id, other.to_string()),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.request_id, self.kind.code(), self.kind.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let code = self.kind.code();
        if status.is_server_error() {
            tracing::error!(request_id = %self.request_id, "Internal error: {}", self.kind.message());
        }

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: code.to_string(),
                message: self.kind.into_message(),
            },
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lobby_error_status_mapping() {
        let cases = [
            (LobbyError::AlreadyActive("a".into()), StatusCode::CONFLICT),
            (LobbyError::AlreadyStarted, StatusCode::CONFLICT),
            (LobbyError::Unauthorized("u".into()), StatusCode::FORBIDDEN),
            (LobbyError::NoActiveMatch("a".into()), StatusCode::NOT_FOUND),
            (LobbyError::StaleHandle("m".into()), StatusCode::NOT_FOUND),
            (LobbyError::Empty, StatusCode::BAD_REQUEST),
            (LobbyError::Full(2), StatusCode::CONFLICT),
            (LobbyError::InvalidPool("increment".into()), StatusCode::BAD_REQUEST),
        ];
        for (error, status) in cases {
            let response = ApiError::from_lobby("req".into(), error).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn test_display_includes_request_id_and_code() {
        let error = ApiError::not_found("req-1".into(), "no arena".into());
        assert_eq!(error.to_string(), "[req-1] NOT_FOUND: no arena");
    }
}
