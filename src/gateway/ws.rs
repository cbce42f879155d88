//! WebSocket live transport handler.
//!
//! Protocol:
//! ```text
//! Client -> Server: {"event":"authenticate","token":"<token>"}
//! Server -> Client: {"event":"authenticated","customerId":"cust-1"}
//! Client -> Server: {"event":"join-admin","token":"<token>"}
//! Server -> Client: {"event":"admin-joined"}
//! Server -> Client: {"event":"auth-failed","message":"..."}
//! Server -> Client: {"event":"new-message", ...}        (to customer rooms)
//! Server -> Client: {"event":"new-user-message", ...}   (to the admin pool)
//! ```
//!
//! The upgrade itself is unauthenticated; credentials travel in-band so
//! browser clients need no header tricks. A connection that never
//! authenticates sits in the registry receiving nothing.

use super::AppState;
use crate::presence::{ClientCommand, OutboundEvent};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::unbounded_channel;

/// GET /ws/support — WebSocket upgrade for the live transport
pub async fn handle_ws_support(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = unbounded_channel::<OutboundEvent>();
    let connection = state.router.register(tx.clone());

    // Everything outbound funnels through the registered channel, so
    // acks and room fan-out share one ordered writer.
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(frame) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };

        let command: ClientCommand = match serde_json::from_str(&text) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(connection = %connection, error = %e, "ignoring bad frame");
                continue;
            }
        };

        match command {
            ClientCommand::Authenticate { token } => {
                match state.router.authenticate(connection, &token) {
                    Ok(customer_id) => {
                        let _ = tx.send(OutboundEvent::Authenticated { customer_id });
                    }
                    Err(failure) => {
                        let _ = tx.send(OutboundEvent::AuthFailed {
                            message: failure.to_string(),
                        });
                    }
                }
            }
            ClientCommand::JoinAdmin { token } => {
                match state.router.join_admin_pool(connection, &token) {
                    Ok(()) => {
                        let _ = tx.send(OutboundEvent::AdminJoined);
                    }
                    Err(failure) => {
                        let _ = tx.send(OutboundEvent::AuthFailed {
                            message: failure.to_string(),
                        });
                    }
                }
            }
        }
    }

    state.router.disconnect(connection);
    drop(tx);
    let _ = send_task.await;
}
