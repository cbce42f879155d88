//! Delivery coordinator: orchestrates message sends, read receipts, and
//! resolution transitions across the store and the room router.
//!
//! The router is injected at construction, never looked up from ambient
//! state, so the coordinator is testable with an in-process router and a
//! throwaway database. The durable write is authoritative: storage
//! failures abort before any live push, and live-push shortfalls are
//! logged, never surfaced to the sender.

use crate::error::ChatError;
use crate::identity::Requester;
use crate::policy;
use crate::presence::{OutboundEvent, RoomRouter};
use crate::store::{Conversation, Message, SupportStore};
use std::sync::Arc;

/// Derived conversation state.
///
/// Transitions: a customer message always moves to `OpenUnread` (and
/// reopens a resolved thread); admin mark-read moves to `OpenRead`;
/// resolve toggles `Resolved` from any state and is re-enterable, not
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    OpenUnread,
    OpenRead,
    Resolved,
}

impl ConversationState {
    pub fn of(conversation: &Conversation) -> Self {
        if conversation.is_resolved {
            ConversationState::Resolved
        } else if conversation.unread_count > 0 {
            ConversationState::OpenUnread
        } else {
            ConversationState::OpenRead
        }
    }
}

pub struct DeliveryCoordinator {
    store: Arc<SupportStore>,
    router: Arc<RoomRouter>,
}

impl DeliveryCoordinator {
    pub fn new(store: Arc<SupportStore>, router: Arc<RoomRouter>) -> Self {
        Self { store, router }
    }

    /// Send a message into a conversation.
    ///
    /// The conversation is created on the fly when absent and the
    /// requester is the owning customer; an admin cannot message a
    /// conversation that does not exist. The message role derives from
    /// the verified requester, never from client input. Exactly one live
    /// event fires per committed send: admin-authored messages go to the
    /// customer's room, customer-authored messages to the admin pool.
    pub fn send_message(
        &self,
        requester: &Requester,
        conversation_id: &str,
        text: &str,
    ) -> Result<(Message, Conversation), ChatError> {
        let trimmed = validate_text(text)?;

        let conversation = match self.store.conversation_by_id(conversation_id)? {
            Some(conversation) => conversation,
            None => match requester {
                Requester::Customer(customer_id) => {
                    self.store.get_or_create_conversation(customer_id)?
                }
                Requester::Admin => return Err(ChatError::NotFound("conversation")),
            },
        };
        policy::check_access(&conversation, requester)?;

        let (message, conversation) =
            self.store
                .append_message(&conversation.id, requester.sender_identity(), trimmed)?;

        self.fan_out(requester, &message, &conversation);
        Ok((message, conversation))
    }

    /// Customer convenience: send into their own conversation, creating
    /// it on first contact. Validation runs before the thread is
    /// created, so a rejected first message leaves nothing behind.
    pub fn send_customer_message(
        &self,
        requester: &Requester,
        text: &str,
    ) -> Result<(Message, Conversation), ChatError> {
        validate_text(text)?;
        let customer_id = requester.customer_id().ok_or(ChatError::Unauthorized)?;
        let conversation = self.store.get_or_create_conversation(customer_id)?;
        self.send_message(requester, &conversation.id, text)
    }

    /// Customer get-or-create of their own conversation. Admins never
    /// create conversations; there would be no customer to notify.
    pub fn conversation_for_customer(
        &self,
        requester: &Requester,
    ) -> Result<Conversation, ChatError> {
        let customer_id = requester.customer_id().ok_or(ChatError::Unauthorized)?;
        self.store.get_or_create_conversation(customer_id)
    }

    /// Policy-checked read of a conversation and its full message log.
    pub fn conversation_with_messages(
        &self,
        requester: &Requester,
        conversation_id: &str,
    ) -> Result<(Conversation, Vec<Message>), ChatError> {
        let conversation = self
            .store
            .conversation_by_id(conversation_id)?
            .ok_or(ChatError::NotFound("conversation"))?;
        policy::check_access(&conversation, requester)?;
        let messages = self.store.messages_for_conversation(&conversation.id)?;
        Ok((conversation, messages))
    }

    /// A customer's own thread plus messages, created lazily on first
    /// access.
    pub fn own_conversation_with_messages(
        &self,
        requester: &Requester,
    ) -> Result<(Conversation, Vec<Message>), ChatError> {
        let conversation = self.conversation_for_customer(requester)?;
        let messages = self.store.messages_for_conversation(&conversation.id)?;
        Ok((conversation, messages))
    }

    /// Admin overview of all conversations, most recent activity first.
    pub fn list_conversations(&self, requester: &Requester) -> Result<Vec<Conversation>, ChatError> {
        require_admin(requester)?;
        self.store.list_conversations()
    }

    /// Admin acknowledgement: reset the unread counter and flag every
    /// customer-authored message as read. No live event is required; the
    /// admin UI refreshes by polling.
    pub fn mark_as_read(
        &self,
        requester: &Requester,
        conversation_id: &str,
    ) -> Result<Conversation, ChatError> {
        require_admin(requester)?;
        self.store.mark_read(conversation_id)
    }

    /// Admin resolution toggle. Pure state transition, no message side
    /// effect; a later customer message reopens the thread regardless.
    pub fn set_resolved(
        &self,
        requester: &Requester,
        conversation_id: &str,
        resolved: bool,
    ) -> Result<Conversation, ChatError> {
        require_admin(requester)?;
        self.store.set_resolved(conversation_id, resolved)
    }

    fn fan_out(&self, requester: &Requester, message: &Message, conversation: &Conversation) {
        match requester {
            Requester::Admin => {
                let delivered = self.router.emit_to_customer(
                    &conversation.customer_id,
                    &OutboundEvent::NewMessage {
                        message: message.clone(),
                        conversation: conversation.clone(),
                    },
                );
                tracing::debug!(
                    customer_id = %conversation.customer_id,
                    delivered,
                    "admin message fan-out"
                );
            }
            Requester::Customer(_) => {
                let delivered = self.router.emit_to_admin_pool(&OutboundEvent::NewUserMessage {
                    message: message.clone(),
                    conversation: conversation.clone(),
                });
                tracing::debug!(
                    conversation_id = %conversation.id,
                    delivered,
                    "customer message fan-out"
                );
            }
        }
    }
}

fn validate_text(text: &str) -> Result<&str, ChatError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ChatError::Validation(
            "message text must not be empty".into(),
        ));
    }
    Ok(trimmed)
}

fn require_admin(requester: &Requester) -> Result<(), ChatError> {
    if requester.is_admin() {
        Ok(())
    } else {
        Err(ChatError::Unauthorized)
    }
}
