use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use storyfill_core::error::RoomError;

/// Every failure that reaches a client is one of these kinds; the
/// `IntoResponse` impl below is the single formatter, so error shapes stay
/// uniform across the whole surface.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Auth(String),
    NotFound(String),
    StateConflict(String),
    Locked(String),
    Full(String),
    Expired(String),
    RateLimited {
        detail: String,
        retry_after: Option<u64>,
    },
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) | Self::Locked(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StateConflict(_) | Self::Full(_) => StatusCode::CONFLICT,
            Self::Expired(_) => StatusCode::GONE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Auth(_) => "AUTH",
            Self::NotFound(_) => "NOT_FOUND",
            Self::StateConflict(_) => "STATE_CONFLICT",
            Self::Locked(_) => "ROOM_LOCKED",
            Self::Full(_) => "ROOM_FULL",
            Self::Expired(_) => "EXPIRED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(m)
            | Self::Auth(m)
            | Self::NotFound(m)
            | Self::StateConflict(m)
            | Self::Locked(m)
            | Self::Full(m)
            | Self::Expired(m)
            | Self::Internal(m) => write!(f, "{m}"),
            Self::RateLimited { detail, .. } => write!(f, "{detail}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            // Internal details never leak; they are logged with a request id.
            Self::Internal(m) => {
                let request_id = uuid::Uuid::new_v4();
                tracing::error!(%request_id, error = %m, "Internal server error");
                "Something went wrong on our side. Please try again.".to_string()
            },
            other => other.to_string(),
        };
        let body = Json(serde_json::json!({ "detail": detail, "code": self.code() }));
        let mut response = (status, body).into_response();
        if let Self::RateLimited {
            retry_after: Some(secs),
            ..
        } = self
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

impl From<RoomError> for ApiError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::RoomFull { .. } => Self::Full(err.to_string()),
            RoomError::PlayerNotFound | RoomError::PromptNotFound => {
                Self::NotFound(err.to_string())
            },
            RoomError::InvalidTransition { .. }
            | RoomError::SubmissionConflict
            | RoomError::NotEnoughPlayers { .. }
            | RoomError::NotRevealed
            | RoomError::NotReadyToReveal => Self::StateConflict(err.to_string()),
            RoomError::TemplateRequired => Self::Validation(err.to_string()),
        }
    }
}
