//! Access policy: who may read or write which conversation.

use crate::error::ChatError;
use crate::identity::Requester;
use crate::store::Conversation;

/// A customer may access only their own conversation; an admin may
/// access any conversation. Denial performs no writes.
pub fn can_access(conversation: &Conversation, requester: &Requester) -> bool {
    match requester {
        Requester::Admin => true,
        Requester::Customer(id) => conversation.customer_id == *id,
    }
}

/// Policy check as an error, for use with `?` at operation boundaries.
pub fn check_access(conversation: &Conversation, requester: &Requester) -> Result<(), ChatError> {
    if can_access(conversation, requester) {
        Ok(())
    } else {
        Err(ChatError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conversation_for(customer_id: &str) -> Conversation {
        Conversation {
            id: "conv-1".into(),
            customer_id: customer_id.into(),
            last_message: None,
            last_message_at: Utc::now(),
            unread_count: 0,
            is_resolved: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn owner_and_admin_allowed_stranger_denied() {
        let conversation = conversation_for("cust-1");

        assert!(can_access(
            &conversation,
            &Requester::Customer("cust-1".into())
        ));
        assert!(can_access(&conversation, &Requester::Admin));
        assert!(!can_access(
            &conversation,
            &Requester::Customer("cust-2".into())
        ));
    }

    #[test]
    fn check_access_surfaces_unauthorized() {
        let conversation = conversation_for("cust-1");
        let err = check_access(&conversation, &Requester::Customer("cust-2".into()))
            .expect_err("stranger must be denied");
        assert!(matches!(err, ChatError::Unauthorized));
    }
}
