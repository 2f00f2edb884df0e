use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::realtime::{ChannelEvent, CloseReason, Lifecycle, RoutedEvent, TransportError};
use crate::wire::{lenient_bool, lenient_i64, lenient_string};

/// Breezemoon post announced by a `bz-update` frame.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Breezemoon {
    #[serde(rename = "oId", deserialize_with = "lenient_string")]
    pub oid: String,
    #[serde(rename = "authorName", deserialize_with = "lenient_string")]
    pub author_name: String,
    #[serde(rename = "authorThumbnail", deserialize_with = "lenient_string")]
    pub author_thumbnail: String,
    #[serde(deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(deserialize_with = "lenient_string")]
    pub city: String,
    #[serde(rename = "timeAgo", deserialize_with = "lenient_string")]
    pub time_ago: String,
    #[serde(rename = "createAt", deserialize_with = "lenient_string")]
    pub create_at: String,
    #[serde(rename = "updatedAt", deserialize_with = "lenient_string")]
    pub updated_at: String,
}

/// Payload shared by the plain notice commands. Which fields are set depends
/// on the command.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct NoticeMessage {
    #[serde(deserialize_with = "lenient_string")]
    pub command: String,
    #[serde(rename = "userId", deserialize_with = "lenient_string")]
    pub user_id: String,
    pub preview: Option<String>,
    #[serde(rename = "senderAvatar")]
    pub sender_avatar: Option<String>,
    #[serde(rename = "senderUserName")]
    pub sender_user_name: Option<String>,
    pub count: Option<i64>,
    #[serde(rename = "warnBroadcastText")]
    pub warn_broadcast_text: Option<String>,
    pub who: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeEventKind {
    Open,
    Close,
    Error,
    BzUpdate,
    RefreshNotification,
    ChatUnreadCountRefresh,
    NewIdleChatMessage,
    WarnBroadcast,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NoticeEvent {
    Open,
    Close(CloseReason),
    Error(TransportError),
    BzUpdate(Breezemoon),
    RefreshNotification(NoticeMessage),
    ChatUnreadCountRefresh(NoticeMessage),
    NewIdleChatMessage(NoticeMessage),
    WarnBroadcast(NoticeMessage),
    /// Command this client has no typed form for, or one that failed to decode.
    Other {
        command: String,
        data: Value,
    },
}

impl NoticeEvent {
    /// Decodes one frame keyed on its `command` field. Frames without a
    /// command are ignored.
    pub fn from_text(text: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(frame) => Self::from_value(frame),
            Err(err) => {
                debug!(event = "notice_frame_not_json", error = %err);
                None
            }
        }
    }

    pub fn from_value(frame: Value) -> Option<Self> {
        let Some(command) = frame
            .get("command")
            .and_then(Value::as_str)
            .filter(|command| !command.is_empty())
            .map(str::to_string)
        else {
            debug!(event = "notice_frame_without_command");
            return None;
        };

        let decoded = match command.as_str() {
            "bz-update" => {
                let bz = frame.get("bz").cloned().unwrap_or(Value::Null);
                Breezemoon::deserialize(&bz).map(Self::BzUpdate)
            }
            "refreshNotification" => {
                NoticeMessage::deserialize(&frame).map(Self::RefreshNotification)
            }
            "chatUnreadCountRefresh" => {
                NoticeMessage::deserialize(&frame).map(Self::ChatUnreadCountRefresh)
            }
            "newIdleChatMessage" => {
                NoticeMessage::deserialize(&frame).map(Self::NewIdleChatMessage)
            }
            "warnBroadcast" => NoticeMessage::deserialize(&frame).map(Self::WarnBroadcast),
            _ => {
                return Some(Self::Other {
                    command,
                    data: frame,
                })
            }
        };
        Some(decoded.unwrap_or_else(|err| {
            debug!(event = "notice_frame_undecodable", command = %command, error = %err);
            Self::Other {
                command,
                data: frame,
            }
        }))
    }
}

impl RoutedEvent for NoticeEvent {
    type Kind = NoticeEventKind;

    fn kind(&self) -> NoticeEventKind {
        match self {
            Self::Open => NoticeEventKind::Open,
            Self::Close(_) => NoticeEventKind::Close,
            Self::Error(_) => NoticeEventKind::Error,
            Self::BzUpdate(_) => NoticeEventKind::BzUpdate,
            Self::RefreshNotification(_) => NoticeEventKind::RefreshNotification,
            Self::ChatUnreadCountRefresh(_) => NoticeEventKind::ChatUnreadCountRefresh,
            Self::NewIdleChatMessage(_) => NoticeEventKind::NewIdleChatMessage,
            Self::WarnBroadcast(_) => NoticeEventKind::WarnBroadcast,
            Self::Other { .. } => NoticeEventKind::Other,
        }
    }
}

impl ChannelEvent for NoticeEvent {
    fn lifecycle(lifecycle: Lifecycle) -> Self {
        match lifecycle {
            Lifecycle::Open => Self::Open,
            Lifecycle::Error(error) => Self::Error(error),
            Lifecycle::Close(reason) => Self::Close(reason),
        }
    }
}

/// Notification category used by the list and mark-read calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    Point,
    Commented,
    Reply,
    At,
    Following,
    Broadcast,
    SysAnnounce,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Commented => "commented",
            Self::Reply => "reply",
            Self::At => "at",
            Self::Following => "following",
            Self::Broadcast => "broadcast",
            Self::SysAnnounce => "sys-announce",
        }
    }
}

/// Unread counters.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct NoticeCount {
    /// Whether the user enabled web notifications.
    #[serde(rename = "userNotifyStatus", deserialize_with = "lenient_bool")]
    pub user_notify_status: bool,
    #[serde(rename = "unreadNotificationCnt", deserialize_with = "lenient_i64")]
    pub unread: i64,
    #[serde(rename = "unreadReplyNotificationCnt", deserialize_with = "lenient_i64")]
    pub reply: i64,
    #[serde(rename = "unreadPointNotificationCnt", deserialize_with = "lenient_i64")]
    pub point: i64,
    #[serde(rename = "unreadAtNotificationCnt", deserialize_with = "lenient_i64")]
    pub at: i64,
    #[serde(rename = "unreadBroadcastNotificationCnt", deserialize_with = "lenient_i64")]
    pub broadcast: i64,
    #[serde(
        rename = "unreadSysAnnounceNotificationCnt",
        deserialize_with = "lenient_i64"
    )]
    pub sys_announce: i64,
    #[serde(
        rename = "unreadNewFollowerNotificationCnt",
        deserialize_with = "lenient_i64"
    )]
    pub new_follower: i64,
    #[serde(rename = "unreadFollowingNotificationCnt", deserialize_with = "lenient_i64")]
    pub following: i64,
    #[serde(rename = "unreadCommentedNotificationCnt", deserialize_with = "lenient_i64")]
    pub commented: i64,
}

/// One entry of a notification list.
///
/// Categories carry different extra fields; the common ones are typed and the
/// rest are kept in `extra`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NoticeItem {
    #[serde(rename = "oId", deserialize_with = "lenient_string")]
    pub oid: String,
    #[serde(rename = "dataType", deserialize_with = "lenient_i64")]
    pub data_type: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(rename = "hasRead", deserialize_with = "lenient_bool")]
    pub has_read: bool,
    #[serde(rename = "createTime", deserialize_with = "lenient_string")]
    pub create_time: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NoticeItem {
    pub(crate) fn normalize(mut self) -> Self {
        if self.description.is_empty() && !self.content.is_empty() {
            self.description = self.content.clone();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Breezemoon, NoticeCount, NoticeEvent, NoticeItem};

    #[test]
    fn bz_update_is_flattened_out_of_the_bz_object() {
        let event = NoticeEvent::from_value(json!({
            "command": "bz-update",
            "bz": {
                "oId": 1700000000000_i64,
                "authorName": "alice",
                "content": "<p>moon</p>",
                "city": "Hangzhou"
            }
        }));
        assert_eq!(
            event,
            Some(NoticeEvent::BzUpdate(Breezemoon {
                oid: "1700000000000".to_string(),
                author_name: "alice".to_string(),
                content: "<p>moon</p>".to_string(),
                city: "Hangzhou".to_string(),
                ..Breezemoon::default()
            }))
        );
    }

    #[test]
    fn bz_update_with_null_fields_is_still_a_bz_update() {
        let event = NoticeEvent::from_value(json!({
            "command": "bz-update",
            "bz": {"oId": "5", "authorName": "alice", "city": null, "timeAgo": null}
        }));
        match event {
            Some(NoticeEvent::BzUpdate(bz)) => {
                assert_eq!(bz.oid, "5");
                assert_eq!(bz.author_name, "alice");
                assert_eq!(bz.city, "");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn plain_commands_map_to_their_own_events() {
        match NoticeEvent::from_value(json!({
            "command": "warnBroadcast",
            "userId": "1",
            "warnBroadcastText": "maintenance",
            "who": "admin"
        })) {
            Some(NoticeEvent::WarnBroadcast(message)) => {
                assert_eq!(message.warn_broadcast_text.as_deref(), Some("maintenance"));
                assert_eq!(message.who.as_deref(), Some("admin"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        match NoticeEvent::from_value(json!({"command": "chatUnreadCountRefresh", "count": 3})) {
            Some(NoticeEvent::ChatUnreadCountRefresh(message)) => {
                assert_eq!(message.count, Some(3));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_commands_are_kept_as_other() {
        let frame = json!({"command": "newFeature", "x": 1});
        assert_eq!(
            NoticeEvent::from_value(frame.clone()),
            Some(NoticeEvent::Other {
                command: "newFeature".to_string(),
                data: frame,
            })
        );
    }

    #[test]
    fn frames_without_command_are_ignored() {
        assert_eq!(NoticeEvent::from_value(json!({"type": "msg"})), None);
        assert_eq!(NoticeEvent::from_text("-hb-"), None);
    }

    #[test]
    fn notify_status_is_normalized_to_a_flag() {
        let count: NoticeCount = serde_json::from_value(json!({
            "code": 0,
            "userNotifyStatus": 1,
            "unreadNotificationCnt": 4,
            "unreadAtNotificationCnt": "2"
        }))
        .expect("count");
        assert!(count.user_notify_status);
        assert_eq!(count.unread, 4);
        assert_eq!(count.at, 2);
    }

    #[test]
    fn description_falls_back_to_content() {
        let item: NoticeItem = serde_json::from_value(json!({
            "oId": "1",
            "content": "you were mentioned",
            "userName": "bob"
        }))
        .expect("item");
        let item = item.normalize();
        assert_eq!(item.description, "you were mentioned");
        assert_eq!(item.extra.get("userName"), Some(&json!("bob")));
    }
}
