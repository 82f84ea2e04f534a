//! Messaging endpoints (`core_message_*`).
//!
//! The service only consumes these through the client; there is no bot
//! surface in this workspace. Conversation types follow the server's
//! numbering (1 = individual, 2 = group, 3 = self).

use chrono::{DateTime, Utc};

use crate::client::MoodleClient;
use crate::error::{MoodleError, Result};
use crate::model::UserId;
use crate::params::{ParamValue, Params};
use crate::wire;

/// One outgoing instant message.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub to_user_id: UserId,
    pub text: String,
}

impl MoodleClient {
    /// List the conversations of `user_id`, most recent first.
    pub async fn conversations(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<wire::ConversationsResponse> {
        let params = Params::new()
            .with("userid", user_id)
            .with("limitnum", limit);
        self.call_as("core_message_get_conversations", params).await
    }

    /// Fetch messages of one conversation as seen by `user_id`.
    pub async fn conversation_messages(
        &self,
        user_id: UserId,
        conversation_id: i64,
        newest_first: bool,
    ) -> Result<wire::ConversationMessagesResponse> {
        let params = Params::new()
            .with("currentuserid", user_id)
            .with("convid", conversation_id)
            .with("newest", newest_first);
        self.call_as("core_message_get_conversation_messages", params)
            .await
    }

    /// Number of conversations with unread messages for `user_id`.
    pub async fn unread_conversations_count(&self, user_id: UserId) -> Result<i64> {
        let params = Params::new().with("useridto", user_id);
        let value = self
            .call("core_message_get_unread_conversations_count", params)
            .await?;
        value.as_i64().ok_or_else(|| MoodleError::Protocol {
            url: "core_message_get_unread_conversations_count".to_string(),
            message: format!("expected an integer, got {value}"),
        })
    }

    /// Mark one message as read.
    pub async fn mark_message_read(
        &self,
        message_id: i64,
        read_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let params = Params::new()
            .with("messageid", message_id)
            .with("timeread", read_at.map_or(ParamValue::Int(0), ParamValue::Time));
        self.call("core_message_mark_message_read", params).await?;
        Ok(())
    }

    /// Mark one notification as read.
    pub async fn mark_notification_read(&self, notification_id: i64) -> Result<()> {
        let params = Params::new().with("notificationid", notification_id);
        self.call("core_message_mark_notification_read", params)
            .await?;
        Ok(())
    }

    /// Mark every message of a conversation as read for `user_id`.
    pub async fn mark_conversation_read(
        &self,
        user_id: UserId,
        conversation_id: i64,
    ) -> Result<()> {
        let params = Params::new()
            .with("userid", user_id)
            .with("conversationid", conversation_id);
        self.call("core_message_mark_all_conversation_messages_as_read", params)
            .await?;
        Ok(())
    }

    /// Send instant messages; per-message failures come back in the result
    /// entries rather than as an error.
    pub async fn send_instant_messages(
        &self,
        messages: &[OutgoingMessage],
    ) -> Result<wire::SentMessages> {
        let entries = messages
            .iter()
            .map(|m| {
                ParamValue::Map(vec![
                    ("touserid".to_string(), m.to_user_id.into()),
                    ("text".to_string(), m.text.clone().into()),
                ])
            })
            .collect();
        let params = Params::new().with("messages", ParamValue::Seq(entries));
        self.call_as("core_message_send_instant_messages", params)
            .await
    }
}
