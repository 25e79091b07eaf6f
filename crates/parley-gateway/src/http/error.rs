use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use parley_chat::ChatError;

/// Wire-facing wrapper that maps the service taxonomy onto HTTP statuses.
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound { .. } => StatusCode::NOT_FOUND,
            ChatError::Forbidden => StatusCode::FORBIDDEN,
            ChatError::Conflict { .. } => StatusCode::CONFLICT,
            ChatError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
