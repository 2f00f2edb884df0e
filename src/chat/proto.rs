use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::realtime::{ChannelEvent, CloseReason, Lifecycle, RoutedEvent, TransportError};
use crate::wire::lenient_string;

/// Commands the private chat socket forwards as notices; every other
/// `command` frame is ignored.
const NOTICE_COMMANDS: [&str; 2] = ["chatUnreadCountRefresh", "newIdleChatMessage"];

/// One private message, from the socket or from history.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatData {
    #[serde(rename = "oId", deserialize_with = "lenient_string")]
    pub oid: String,
    #[serde(rename = "toId", deserialize_with = "lenient_string")]
    pub to_id: String,
    #[serde(rename = "fromId", deserialize_with = "lenient_string")]
    pub from_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub time: String,
    #[serde(deserialize_with = "lenient_string")]
    pub preview: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user_session: String,
    #[serde(rename = "senderAvatar", deserialize_with = "lenient_string")]
    pub sender_avatar: String,
    #[serde(rename = "senderUserName", deserialize_with = "lenient_string")]
    pub sender_user_name: String,
    #[serde(rename = "receiverAvatar", deserialize_with = "lenient_string")]
    pub receiver_avatar: String,
    #[serde(rename = "receiverUserName", deserialize_with = "lenient_string")]
    pub receiver_user_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub markdown: String,
    #[serde(deserialize_with = "lenient_string")]
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatNotice {
    #[serde(deserialize_with = "lenient_string")]
    pub command: String,
    #[serde(rename = "userId", deserialize_with = "lenient_string")]
    pub user_id: String,
    pub preview: Option<String>,
    #[serde(rename = "senderAvatar")]
    pub sender_avatar: Option<String>,
    #[serde(rename = "senderUserName")]
    pub sender_user_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatEventKind {
    Open,
    Close,
    Error,
    Data,
    Notice,
    Revoke,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Open,
    Close(CloseReason),
    Error(TransportError),
    Data(ChatData),
    Notice(ChatNotice),
    /// Id of a message the sender took back.
    Revoke(String),
    Unknown(Value),
}

impl ChatEvent {
    /// Classifies one inbound frame. `None` means the frame is ignored.
    pub fn from_text(text: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(frame) => Self::from_value(frame),
            Err(err) => {
                debug!(event = "chat_frame_not_json", error = %err);
                Some(Self::Unknown(Value::String(text.to_string())))
            }
        }
    }

    pub fn from_value(frame: Value) -> Option<Self> {
        if !frame.is_object() {
            return Some(Self::Unknown(frame));
        }

        let command = frame
            .get("command")
            .filter(|command| !command.is_null())
            .map(|command| command.as_str().unwrap_or_default().to_string());
        let is_notice = command
            .as_deref()
            .is_some_and(|command| NOTICE_COMMANDS.contains(&command));
        let is_revoke = frame.get("type").and_then(Value::as_str) == Some("revoke");

        if let Some(command) = command {
            if !is_notice || is_revoke {
                debug!(event = "chat_command_ignored", command = %command);
                return None;
            }
        }

        let decoded = if is_revoke {
            Ok(Self::Revoke(revoked_id(frame.get("data"))))
        } else if is_notice {
            ChatNotice::deserialize(&frame).map(Self::Notice)
        } else {
            ChatData::deserialize(&frame).map(Self::Data)
        };
        Some(decoded.unwrap_or_else(|err| {
            debug!(event = "chat_frame_undecodable", error = %err);
            Self::Unknown(frame)
        }))
    }
}

fn revoked_id(data: Option<&Value>) -> String {
    match data {
        Some(Value::String(oid)) => oid.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl RoutedEvent for ChatEvent {
    type Kind = ChatEventKind;

    fn kind(&self) -> ChatEventKind {
        match self {
            Self::Open => ChatEventKind::Open,
            Self::Close(_) => ChatEventKind::Close,
            Self::Error(_) => ChatEventKind::Error,
            Self::Data(_) => ChatEventKind::Data,
            Self::Notice(_) => ChatEventKind::Notice,
            Self::Revoke(_) => ChatEventKind::Revoke,
            Self::Unknown(_) => ChatEventKind::Unknown,
        }
    }
}

impl ChannelEvent for ChatEvent {
    fn lifecycle(lifecycle: Lifecycle) -> Self {
        match lifecycle {
            Lifecycle::Open => Self::Open,
            Lifecycle::Error(error) => Self::Error(error),
            Lifecycle::Close(reason) => Self::Close(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ChatData, ChatEvent, ChatNotice};

    #[test]
    fn revoke_frames_unwrap_the_message_id() {
        assert_eq!(
            ChatEvent::from_value(json!({"type": "revoke", "data": "1700000000000"})),
            Some(ChatEvent::Revoke("1700000000000".to_string()))
        );
    }

    #[test]
    fn null_fields_keep_the_frame_as_data() {
        let event = ChatEvent::from_value(json!({
            "oId": "3",
            "senderUserName": "alice",
            "senderAvatar": null,
            "preview": null,
            "content": "hey"
        }));
        match event {
            Some(ChatEvent::Data(data)) => {
                assert_eq!(data.sender_user_name, "alice");
                assert_eq!(data.sender_avatar, "");
                assert_eq!(data.preview, "");
                assert_eq!(data.content, "hey");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn ordinary_frames_are_chat_data() {
        let event = ChatEvent::from_value(json!({
            "oId": 17,
            "fromId": "1",
            "toId": "2",
            "senderUserName": "alice",
            "receiverUserName": "bob",
            "content": "<p>hi</p>",
            "markdown": "hi",
            "user_session": "1_2"
        }));
        assert_eq!(
            event,
            Some(ChatEvent::Data(ChatData {
                oid: "17".to_string(),
                from_id: "1".to_string(),
                to_id: "2".to_string(),
                sender_user_name: "alice".to_string(),
                receiver_user_name: "bob".to_string(),
                content: "<p>hi</p>".to_string(),
                markdown: "hi".to_string(),
                user_session: "1_2".to_string(),
                ..ChatData::default()
            }))
        );
    }

    #[test]
    fn notice_commands_become_notices() {
        let event = ChatEvent::from_value(json!({
            "command": "newIdleChatMessage",
            "userId": 3,
            "preview": "hey",
            "senderUserName": "carol"
        }));
        assert_eq!(
            event,
            Some(ChatEvent::Notice(ChatNotice {
                command: "newIdleChatMessage".to_string(),
                user_id: "3".to_string(),
                preview: Some("hey".to_string()),
                sender_avatar: None,
                sender_user_name: Some("carol".to_string()),
            }))
        );
    }

    #[test]
    fn other_commands_are_dropped() {
        assert_eq!(
            ChatEvent::from_value(json!({"command": "refreshNotification", "userId": "1"})),
            None
        );
        assert_eq!(
            ChatEvent::from_value(json!({"command": "warnBroadcast", "type": "revoke"})),
            None
        );
    }

    #[test]
    fn non_object_frames_are_unknown() {
        assert_eq!(
            ChatEvent::from_text("pong"),
            Some(ChatEvent::Unknown(json!("pong")))
        );
        assert_eq!(
            ChatEvent::from_text("[1,2]"),
            Some(ChatEvent::Unknown(json!([1, 2])))
        );
    }
}
