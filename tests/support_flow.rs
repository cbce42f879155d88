//! End-to-end integration tests for the support messaging flow.
//!
//! These drive the public API — token verification, room router,
//! delivery coordinator, SQLite store — the way the gateway handlers do,
//! without binding a socket. They complement the unit tests inside each
//! module by exercising the whole stack against a real database file.

use shopdesk::delivery::{ConversationState, DeliveryCoordinator};
use shopdesk::identity::{Requester, StaticTokenVerifier, TokenVerifier, ADMIN_SENDER};
use shopdesk::presence::{ConnectionId, OutboundEvent, RoomRouter};
use shopdesk::store::SupportStore;
use shopdesk::ChatError;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

struct Desk {
    _tmp: TempDir,
    verifier: Arc<StaticTokenVerifier>,
    router: Arc<RoomRouter>,
    coordinator: DeliveryCoordinator,
}

fn desk() -> Desk {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(SupportStore::new(tmp.path()));
    let verifier = Arc::new(StaticTokenVerifier::new(
        &["admin-secret".to_string()],
        vec![
            ("cust-1-token".to_string(), "cust-1".to_string()),
            ("cust-2-token".to_string(), "cust-2".to_string()),
        ],
    ));
    let router = Arc::new(RoomRouter::new(verifier.clone() as Arc<dyn TokenVerifier>));
    let coordinator = DeliveryCoordinator::new(store, Arc::clone(&router));
    Desk {
        _tmp: tmp,
        verifier,
        router,
        coordinator,
    }
}

fn connect(desk: &Desk) -> (ConnectionId, UnboundedReceiver<OutboundEvent>) {
    let (tx, rx) = unbounded_channel();
    (desk.router.register(tx), rx)
}

fn requester(desk: &Desk, token: &str) -> Requester {
    desk.verifier.verify(token).expect("token must resolve")
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn one_conversation_per_customer_across_repeated_contact() {
    let desk = desk();
    let cust = requester(&desk, "cust-1-token");

    let first = desk.coordinator.conversation_for_customer(&cust).unwrap();
    let second = desk.coordinator.conversation_for_customer(&cust).unwrap();
    assert_eq!(first.id, second.id);

    let (_, via_send) = desk
        .coordinator
        .send_customer_message(&cust, "still me")
        .unwrap();
    assert_eq!(via_send.id, first.id);

    let all = desk
        .coordinator
        .list_conversations(&Requester::Admin)
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn unread_count_grows_only_with_customer_messages_and_resets_on_read() {
    let desk = desk();
    let cust = requester(&desk, "cust-1-token");
    let admin = requester(&desk, "admin-secret");

    let (_, conversation) = desk
        .coordinator
        .send_customer_message(&cust, "order missing")
        .unwrap();
    let (_, conversation) = desk
        .coordinator
        .send_message(&cust, &conversation.id, "any update?")
        .unwrap();
    assert_eq!(conversation.unread_count, 2);

    // Admin replies never move the counter.
    let (_, conversation) = desk
        .coordinator
        .send_message(&admin, &conversation.id, "checking now")
        .unwrap();
    assert_eq!(conversation.unread_count, 2);

    let conversation = desk
        .coordinator
        .mark_as_read(&admin, &conversation.id)
        .unwrap();
    assert_eq!(conversation.unread_count, 0);

    // Every customer-authored message is now flagged read; the admin
    // reply never carries the flag.
    let (_, messages) = desk
        .coordinator
        .conversation_with_messages(&admin, &conversation.id)
        .unwrap();
    for message in &messages {
        if message.from_customer() {
            assert!(message.read_by_admin);
        } else {
            assert!(!message.read_by_admin);
        }
    }
}

#[test]
fn messages_come_back_in_send_order() {
    let desk = desk();
    let cust = requester(&desk, "cust-1-token");
    let admin = requester(&desk, "admin-secret");

    let (_, conversation) = desk
        .coordinator
        .send_customer_message(&cust, "one")
        .unwrap();
    desk.coordinator
        .send_message(&admin, &conversation.id, "two")
        .unwrap();
    desk.coordinator
        .send_message(&cust, &conversation.id, "three")
        .unwrap();

    let (_, messages) = desk
        .coordinator
        .conversation_with_messages(&admin, &conversation.id)
        .unwrap();
    let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["one", "two", "three"]);
}

#[test]
fn resolved_thread_reopens_on_customer_message() {
    let desk = desk();
    let cust = requester(&desk, "cust-1-token");
    let admin = requester(&desk, "admin-secret");

    let (_, conversation) = desk
        .coordinator
        .send_customer_message(&cust, "broken widget")
        .unwrap();
    desk.coordinator
        .mark_as_read(&admin, &conversation.id)
        .unwrap();
    let conversation = desk
        .coordinator
        .set_resolved(&admin, &conversation.id, true)
        .unwrap();
    assert_eq!(ConversationState::of(&conversation), ConversationState::Resolved);

    // An admin follow-up does not reopen.
    let (_, conversation) = desk
        .coordinator
        .send_message(&admin, &conversation.id, "glad it's sorted")
        .unwrap();
    assert!(conversation.is_resolved);

    // The customer coming back does.
    let (_, conversation) = desk
        .coordinator
        .send_customer_message(&cust, "actually it broke again")
        .unwrap();
    assert!(!conversation.is_resolved);
    assert_eq!(ConversationState::of(&conversation), ConversationState::OpenUnread);
}

// ─────────────────────────────────────────────────────────────────────────────
// Live fan-out
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn fan_out_is_directional_and_exactly_once() {
    let desk = desk();
    let cust = requester(&desk, "cust-1-token");
    let admin = requester(&desk, "admin-secret");

    let (cust_conn, mut cust_rx) = connect(&desk);
    desk.router.authenticate(cust_conn, "cust-1-token").unwrap();
    let (admin_conn, mut admin_rx) = connect(&desk);
    desk.router.join_admin_pool(admin_conn, "admin-secret").unwrap();

    let (sent, conversation) = desk
        .coordinator
        .send_customer_message(&cust, "hello")
        .unwrap();
    match admin_rx.try_recv().unwrap() {
        OutboundEvent::NewUserMessage { message, .. } => assert_eq!(message.id, sent.id),
        other => panic!("expected new-user-message, got {other:?}"),
    }
    assert!(admin_rx.try_recv().is_err());
    assert!(cust_rx.try_recv().is_err());

    let (sent, _) = desk
        .coordinator
        .send_message(&admin, &conversation.id, "hi")
        .unwrap();
    match cust_rx.try_recv().unwrap() {
        OutboundEvent::NewMessage { message, .. } => {
            assert_eq!(message.id, sent.id);
            assert_eq!(message.sender, ADMIN_SENDER);
        }
        other => panic!("expected new-message, got {other:?}"),
    }
    assert!(cust_rx.try_recv().is_err());
    assert!(admin_rx.try_recv().is_err());
}

#[test]
fn other_customers_never_see_foreign_traffic() {
    let desk = desk();
    let admin = requester(&desk, "admin-secret");
    let cust1 = requester(&desk, "cust-1-token");

    let conversation = desk.coordinator.conversation_for_customer(&cust1).unwrap();

    let (conn2, mut rx2) = connect(&desk);
    desk.router.authenticate(conn2, "cust-2-token").unwrap();

    desk.coordinator
        .send_message(&admin, &conversation.id, "for cust-1 only")
        .unwrap();
    assert!(rx2.try_recv().is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation and policy
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn blank_text_is_rejected_with_no_side_effects() {
    let desk = desk();
    let cust = requester(&desk, "cust-1-token");

    let err = desk
        .coordinator
        .send_customer_message(&cust, " \n\t ")
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert_eq!(err.status().as_u16(), 400);

    // No thread was created for the rejected send.
    assert!(desk
        .coordinator
        .list_conversations(&Requester::Admin)
        .unwrap()
        .is_empty());

    // A later valid send starts clean.
    let (_, conversation) = desk
        .coordinator
        .send_customer_message(&cust, "real message")
        .unwrap();
    let (conversation, messages) = desk
        .coordinator
        .conversation_with_messages(&Requester::Admin, &conversation.id)
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(conversation.unread_count, 1);
}

#[test]
fn customers_cannot_touch_each_others_threads() {
    let desk = desk();
    let cust1 = requester(&desk, "cust-1-token");
    let cust2 = requester(&desk, "cust-2-token");

    let (_, conversation) = desk
        .coordinator
        .send_customer_message(&cust1, "private matter")
        .unwrap();

    assert!(matches!(
        desk.coordinator
            .conversation_with_messages(&cust2, &conversation.id),
        Err(ChatError::Unauthorized)
    ));
    assert!(matches!(
        desk.coordinator
            .send_message(&cust2, &conversation.id, "intruding"),
        Err(ChatError::Unauthorized)
    ));

    let (_, messages) = desk
        .coordinator
        .conversation_with_messages(&Requester::Admin, &conversation.id)
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, "cust-1");
}

// ─────────────────────────────────────────────────────────────────────────────
// Worked example: first contact through resolution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn cust_1_support_session_end_to_end() {
    let desk = desk();
    let cust = requester(&desk, "cust-1-token");
    let admin = requester(&desk, "admin-secret");

    // cust-1 opens the widget; a thread appears with no messages.
    let conversation = desk.coordinator.conversation_for_customer(&cust).unwrap();
    assert_eq!(conversation.customer_id, "cust-1");
    assert_eq!(ConversationState::of(&conversation), ConversationState::OpenRead);

    // "Where is my order?" lands; an admin watching the pool sees it.
    let (admin_conn, mut admin_rx) = connect(&desk);
    desk.router.join_admin_pool(admin_conn, "admin-secret").unwrap();

    let (_, conversation) = desk
        .coordinator
        .send_customer_message(&cust, "Where is my order?")
        .unwrap();
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(conversation.last_message.as_deref(), Some("Where is my order?"));
    assert!(matches!(
        admin_rx.try_recv().unwrap(),
        OutboundEvent::NewUserMessage { .. }
    ));

    // The admin opens the thread and acknowledges it.
    let conversation = desk
        .coordinator
        .mark_as_read(&admin, &conversation.id)
        .unwrap();
    assert_eq!(conversation.unread_count, 0);

    // The reply reaches cust-1's live widget.
    let (cust_conn, mut cust_rx) = connect(&desk);
    desk.router.authenticate(cust_conn, "cust-1-token").unwrap();

    let (_, conversation) = desk
        .coordinator
        .send_message(&admin, &conversation.id, "It ships tomorrow.")
        .unwrap();
    assert!(matches!(
        cust_rx.try_recv().unwrap(),
        OutboundEvent::NewMessage { .. }
    ));
    assert_eq!(conversation.last_message.as_deref(), Some("It ships tomorrow."));

    // Resolution closes the session.
    let conversation = desk
        .coordinator
        .set_resolved(&admin, &conversation.id, true)
        .unwrap();
    assert_eq!(ConversationState::of(&conversation), ConversationState::Resolved);

    let (_, messages) = desk
        .coordinator
        .conversation_with_messages(&cust, &conversation.id)
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, "cust-1");
    assert_eq!(messages[1].sender, ADMIN_SENDER);
}
