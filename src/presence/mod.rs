//! Presence registry and room router for the live transport.
//!
//! Keeps an explicit bidirectional index (connection → identity binding,
//! room → connection set) behind one lock, instead of leaning on the
//! transport library's bookkeeping. Each connection is addressed through
//! an in-process sender handle, so rooms and fan-out are testable without
//! a live socket.
//!
//! Presence is ephemeral: joins, leaves, and drops never touch durable
//! state. Emitting into an empty room is a silent no-op, not an error;
//! the store is the source of truth and live push is a latency
//! optimization only.

use crate::identity::{Requester, TokenVerifier};
use crate::store::{Conversation, Message};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Commands a client may send over the live transport.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Bind this connection to a customer identity and join their room.
    /// Admin credentials are rejected here; operators use `join-admin`.
    Authenticate { token: String },
    /// Join the shared admin pool room (requires admin privilege).
    JoinAdmin { token: String },
}

/// Events pushed to connections over the live transport.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    /// Ack for a successful `authenticate`.
    Authenticated { customer_id: String },
    /// Ack for a successful `join-admin`.
    AdminJoined,
    /// Failure ack, delivered only to the requesting connection.
    AuthFailed { message: String },
    /// Admin-authored message, delivered to the owning customer's room.
    NewMessage {
        message: Message,
        conversation: Conversation,
    },
    /// Customer-authored message, delivered to the admin pool.
    NewUserMessage {
        message: Message,
        conversation: Conversation,
    },
}

/// Socket-authentication failures. Surfaced only as an ack to the
/// requesting connection; the connection stays registered and may retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("invalid or expired credential")]
    InvalidCredential,
    #[error("invalid or expired credential")]
    NotAdmin,
    #[error("admin credentials must use join-admin")]
    AdminCredential,
    #[error("connection is not registered")]
    UnknownConnection,
}

struct ConnectionEntry {
    sender: UnboundedSender<OutboundEvent>,
    identity: Option<Requester>,
}

#[derive(Default)]
struct RouterState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    customer_rooms: HashMap<String, HashSet<ConnectionId>>,
    admin_room: HashSet<ConnectionId>,
}

/// Live-connection registry and room-addressed fan-out.
pub struct RoomRouter {
    verifier: Arc<dyn TokenVerifier>,
    state: Mutex<RouterState>,
}

impl RoomRouter {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier,
            state: Mutex::new(RouterState::default()),
        }
    }

    /// Register a fresh, unauthenticated connection.
    pub fn register(&self, sender: UnboundedSender<OutboundEvent>) -> ConnectionId {
        let id = Uuid::new_v4();
        let mut state = self.state.lock();
        state.connections.insert(
            id,
            ConnectionEntry {
                sender,
                identity: None,
            },
        );
        id
    }

    /// Verify the credential, bind the connection to the customer
    /// identity, and join their per-customer room. Admin credentials are
    /// rejected on this path; the pool is entered via `join_admin_pool`.
    pub fn authenticate(
        &self,
        connection: ConnectionId,
        token: &str,
    ) -> Result<String, AuthFailure> {
        let identity = self
            .verifier
            .verify(token)
            .ok_or(AuthFailure::InvalidCredential)?;
        let Requester::Customer(customer_id) = identity else {
            return Err(AuthFailure::AdminCredential);
        };

        let mut state = self.state.lock();
        let entry = state
            .connections
            .get_mut(&connection)
            .ok_or(AuthFailure::UnknownConnection)?;
        entry.identity = Some(Requester::Customer(customer_id.clone()));

        state
            .customer_rooms
            .entry(customer_id.clone())
            .or_default()
            .insert(connection);
        Ok(customer_id)
    }

    /// Verify the credential carries admin privilege and join the shared
    /// admin room. Rejection is reported only to the requesting
    /// connection; nothing leaks to customer-facing channels.
    pub fn join_admin_pool(
        &self,
        connection: ConnectionId,
        token: &str,
    ) -> Result<(), AuthFailure> {
        let identity = self
            .verifier
            .verify(token)
            .ok_or(AuthFailure::InvalidCredential)?;
        if !identity.is_admin() {
            return Err(AuthFailure::NotAdmin);
        }

        let mut state = self.state.lock();
        let entry = state
            .connections
            .get_mut(&connection)
            .ok_or(AuthFailure::UnknownConnection)?;
        entry.identity = Some(Requester::Admin);
        state.admin_room.insert(connection);
        Ok(())
    }

    /// Deliver to every connection in the customer's room. Returns the
    /// number of connections the event was handed to; zero when the
    /// customer has no live connection, which is expected and common.
    pub fn emit_to_customer(&self, customer_id: &str, event: &OutboundEvent) -> usize {
        let state = self.state.lock();
        let Some(room) = state.customer_rooms.get(customer_id) else {
            return 0;
        };
        let mut delivered = 0;
        for connection in room {
            if let Some(entry) = state.connections.get(connection) {
                if entry.sender.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Deliver to every connection in the admin room; no-op when empty.
    pub fn emit_to_admin_pool(&self, event: &OutboundEvent) -> usize {
        let state = self.state.lock();
        let mut delivered = 0;
        for connection in &state.admin_room {
            if let Some(entry) = state.connections.get(connection) {
                if entry.sender.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Drop a connection from the registry and every room it joined.
    /// Presence is ephemeral; nothing durable changes here.
    pub fn disconnect(&self, connection: ConnectionId) {
        let mut state = self.state.lock();
        state.connections.remove(&connection);
        state.admin_room.remove(&connection);
        state.customer_rooms.retain(|_, room| {
            room.remove(&connection);
            !room.is_empty()
        });
    }

    /// Live connections currently in the customer's room.
    pub fn customer_room_size(&self, customer_id: &str) -> usize {
        self.state
            .lock()
            .customer_rooms
            .get(customer_id)
            .map_or(0, HashSet::len)
    }

    /// Live connections currently in the admin pool.
    pub fn admin_room_size(&self) -> usize {
        self.state.lock().admin_room.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticTokenVerifier;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn router() -> RoomRouter {
        let verifier = StaticTokenVerifier::new(
            &["admin-secret".to_string()],
            vec![("cust-1-token".to_string(), "cust-1".to_string())],
        );
        RoomRouter::new(Arc::new(verifier))
    }

    fn connect(router: &RoomRouter) -> (ConnectionId, UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = unbounded_channel();
        (router.register(tx), rx)
    }

    fn sample_event() -> OutboundEvent {
        OutboundEvent::AdminJoined
    }

    #[test]
    fn authenticate_joins_customer_room() {
        let router = router();
        let (conn, _rx) = connect(&router);

        let customer_id = router.authenticate(conn, "cust-1-token").unwrap();
        assert_eq!(customer_id, "cust-1");
        assert_eq!(router.customer_room_size("cust-1"), 1);
        assert_eq!(router.admin_room_size(), 0);
    }

    #[test]
    fn admin_credential_is_rejected_on_customer_authenticate() {
        let router = router();
        let (conn, _rx) = connect(&router);

        let err = router.authenticate(conn, "admin-secret").unwrap_err();
        assert_eq!(err, AuthFailure::AdminCredential);
        assert_eq!(router.admin_room_size(), 0);

        // The pool is still reachable through the proper event.
        router.join_admin_pool(conn, "admin-secret").unwrap();
        assert_eq!(router.admin_room_size(), 1);
    }

    #[test]
    fn bad_credential_leaves_connection_unauthenticated_and_retryable() {
        let router = router();
        let (conn, _rx) = connect(&router);

        let err = router.authenticate(conn, "wrong").unwrap_err();
        assert_eq!(err, AuthFailure::InvalidCredential);
        assert_eq!(router.customer_room_size("cust-1"), 0);

        // Retry with the right token still works.
        router.authenticate(conn, "cust-1-token").unwrap();
        assert_eq!(router.customer_room_size("cust-1"), 1);
    }

    #[test]
    fn join_admin_requires_admin_privilege() {
        let router = router();
        let (conn, _rx) = connect(&router);

        let err = router.join_admin_pool(conn, "cust-1-token").unwrap_err();
        assert_eq!(err, AuthFailure::NotAdmin);
        assert_eq!(router.admin_room_size(), 0);

        router.join_admin_pool(conn, "admin-secret").unwrap();
        assert_eq!(router.admin_room_size(), 1);
    }

    #[test]
    fn emit_to_absent_customer_is_a_silent_noop() {
        let router = router();
        assert_eq!(router.emit_to_customer("cust-1", &sample_event()), 0);
        assert_eq!(router.emit_to_admin_pool(&sample_event()), 0);
    }

    #[test]
    fn emit_reaches_every_connection_in_the_room() {
        let router = router();
        let (conn_a, mut rx_a) = connect(&router);
        let (conn_b, mut rx_b) = connect(&router);
        router.authenticate(conn_a, "cust-1-token").unwrap();
        router.authenticate(conn_b, "cust-1-token").unwrap();

        let delivered = router.emit_to_customer("cust-1", &sample_event());
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn admin_pool_does_not_receive_customer_room_traffic() {
        let router = router();
        let (customer_conn, mut customer_rx) = connect(&router);
        let (admin_conn, mut admin_rx) = connect(&router);
        router.authenticate(customer_conn, "cust-1-token").unwrap();
        router.join_admin_pool(admin_conn, "admin-secret").unwrap();

        router.emit_to_customer("cust-1", &sample_event());
        assert!(customer_rx.try_recv().is_ok());
        assert!(admin_rx.try_recv().is_err());

        router.emit_to_admin_pool(&sample_event());
        assert!(admin_rx.try_recv().is_ok());
        assert!(customer_rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_removes_all_memberships() {
        let router = router();
        let (conn, _rx) = connect(&router);
        router.authenticate(conn, "cust-1-token").unwrap();
        router.join_admin_pool(conn, "admin-secret").unwrap();

        router.disconnect(conn);
        assert_eq!(router.customer_room_size("cust-1"), 0);
        assert_eq!(router.admin_room_size(), 0);
        assert_eq!(router.emit_to_admin_pool(&sample_event()), 0);
    }

    #[test]
    fn client_commands_parse_from_wire_names() {
        let auth: ClientCommand =
            serde_json::from_str(r#"{"event":"authenticate","token":"t"}"#).unwrap();
        assert_eq!(
            auth,
            ClientCommand::Authenticate {
                token: "t".to_string()
            }
        );

        let join: ClientCommand =
            serde_json::from_str(r#"{"event":"join-admin","token":"t"}"#).unwrap();
        assert_eq!(
            join,
            ClientCommand::JoinAdmin {
                token: "t".to_string()
            }
        );
    }

    #[test]
    fn outbound_events_serialize_with_wire_names() {
        let ack = serde_json::to_value(OutboundEvent::Authenticated {
            customer_id: "cust-1".into(),
        })
        .unwrap();
        assert_eq!(ack["event"], "authenticated");
        assert_eq!(ack["customerId"], "cust-1");

        let joined = serde_json::to_value(OutboundEvent::AdminJoined).unwrap();
        assert_eq!(joined["event"], "admin-joined");
    }
}
