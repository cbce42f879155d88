//! REST API handlers for the support desk.
//!
//! Every `/api/*` route requires a bearer token; the token is resolved
//! to a [`Requester`] once here and threaded through the coordinator.
//! A missing or unknown token is 401; a known identity denied by policy
//! is 403 from the coordinator.

use super::AppState;
use crate::identity::Requester;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

// ── Bearer token auth extractor ─────────────────────────────────

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
}

/// Resolve the bearer token to a verified identity, or a 401 response.
fn require_identity(state: &AppState, headers: &HeaderMap) -> Result<Requester, Response> {
    let token = extract_bearer_token(headers).unwrap_or("");
    state.verifier.verify(token).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "message": "Unauthorized — send Authorization: Bearer <token>"
            })),
        )
            .into_response()
    })
}

// ── Request bodies ──────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SendMessageBody {
    pub text: String,
}

#[derive(Deserialize, Default)]
pub struct ResolveBody {
    pub resolved: Option<bool>,
}

// ── Customer surface ────────────────────────────────────────────

/// GET /api/support/conversation — the caller's own thread, created on
/// first contact.
pub async fn handle_my_conversation(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let requester = match require_identity(&state, &headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.coordinator.conversation_for_customer(&requester) {
        Ok(conversation) => {
            Json(json!({ "success": true, "conversation": conversation })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /api/support/conversation/messages — the caller's own thread plus
/// its full message log.
pub async fn handle_my_messages(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let requester = match require_identity(&state, &headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.coordinator.own_conversation_with_messages(&requester) {
        Ok((conversation, messages)) => Json(json!({
            "success": true,
            "conversation": conversation,
            "messages": messages,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/support/message — customer send into their own thread.
pub async fn handle_customer_send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> Response {
    let requester = match require_identity(&state, &headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state
        .coordinator
        .send_customer_message(&requester, &body.text)
    {
        Ok((message, conversation)) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": message,
                "conversation": conversation,
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

// ── Admin / shared surface ──────────────────────────────────────

/// GET /api/support/conversations — admin overview, most recent first.
pub async fn handle_list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let requester = match require_identity(&state, &headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.coordinator.list_conversations(&requester) {
        Ok(conversations) => {
            Json(json!({ "success": true, "conversations": conversations })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /api/support/conversations/{id}/messages — policy-checked read.
pub async fn handle_conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let requester = match require_identity(&state, &headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.coordinator.conversation_with_messages(&requester, &id) {
        Ok((conversation, messages)) => Json(json!({
            "success": true,
            "conversation": conversation,
            "messages": messages,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/support/conversations/{id}/message — send into a specific
/// thread (admin replies, or a customer addressing their own thread).
pub async fn handle_send_to_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> Response {
    let requester = match require_identity(&state, &headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.coordinator.send_message(&requester, &id, &body.text) {
        Ok((message, conversation)) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": message,
                "conversation": conversation,
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/support/conversations/{id}/read — admin acknowledgement.
pub async fn handle_mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let requester = match require_identity(&state, &headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.coordinator.mark_as_read(&requester, &id) {
        Ok(conversation) => {
            Json(json!({ "success": true, "conversation": conversation })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /api/support/conversations/{id}/resolve — toggle resolution.
/// Body is optional; `{"resolved": false}` reopens.
pub async fn handle_resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<ResolveBody>>,
) -> Response {
    let requester = match require_identity(&state, &headers) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let resolved = body
        .map(|Json(b)| b.resolved.unwrap_or(true))
        .unwrap_or(true);
    match state.coordinator.set_resolved(&requester, &id, resolved) {
        Ok(conversation) => {
            Json(json!({ "success": true, "conversation": conversation })).into_response()
        }
        Err(e) => e.into_response(),
    }
}
