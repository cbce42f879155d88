//! Error taxonomy for the support-messaging core.
//!
//! Every operation resolves to exactly one of these variants at its
//! boundary. Storage failures abort the operation before any live push;
//! live-push failures are logged and swallowed, never surfaced here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Empty or missing required input. Client error, never retried.
    #[error("{0}")]
    Validation(String),

    /// Requester lacks rights to the conversation or admin action.
    /// No write is performed.
    #[error("you do not have access to this conversation")]
    Unauthorized,

    /// Referenced conversation or message does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Durable read/write failure. The operation is aborted outright;
    /// retry is a caller concern.
    #[error("storage failure: {0}")]
    Storage(#[source] anyhow::Error),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Unauthorized => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Storage(err)
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if let ChatError::Storage(ref source) = self {
            tracing::error!("support storage failure: {source:#}");
        }
        let status = self.status();
        // Storage details stay in the log; clients get a generic message.
        let message = match self {
            ChatError::Storage(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_wire_contract() {
        assert_eq!(
            ChatError::Validation("message text must not be empty".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ChatError::Unauthorized.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ChatError::NotFound("conversation").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ChatError::Storage(anyhow::anyhow!("disk full")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_names_the_entity() {
        assert_eq!(
            ChatError::NotFound("conversation").to_string(),
            "conversation not found"
        );
    }
}
