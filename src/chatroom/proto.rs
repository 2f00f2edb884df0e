use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::config::Via;
use crate::realtime::{ChannelEvent, CloseReason, Lifecycle, RoutedEvent, TransportError};
use crate::wire::{lenient_f64, lenient_i64, lenient_string, nested_string_list, null_as_default};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct OnlineUser {
    #[serde(rename = "homePage", deserialize_with = "lenient_string")]
    pub home_page: String,
    #[serde(rename = "userAvatarURL", deserialize_with = "lenient_string")]
    pub user_avatar_url: String,
    #[serde(rename = "userName", deserialize_with = "lenient_string")]
    pub user_name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BarragerMsg {
    #[serde(rename = "userName", deserialize_with = "lenient_string")]
    pub user_name: String,
    #[serde(rename = "userNickname", deserialize_with = "lenient_string")]
    pub user_nickname: String,
    #[serde(rename = "barragerContent", deserialize_with = "lenient_string")]
    pub barrager_content: String,
    #[serde(rename = "barragerColor", deserialize_with = "lenient_string")]
    pub barrager_color: String,
    #[serde(rename = "userAvatarURL", deserialize_with = "lenient_string")]
    pub user_avatar_url: String,
    #[serde(rename = "userAvatarURL20", deserialize_with = "lenient_string")]
    pub user_avatar_url_20: String,
    #[serde(rename = "userAvatarURL48", deserialize_with = "lenient_string")]
    pub user_avatar_url_48: String,
    #[serde(rename = "userAvatarURL210", deserialize_with = "lenient_string")]
    pub user_avatar_url_210: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RedPacketStatus {
    #[serde(rename = "oId", deserialize_with = "lenient_string")]
    pub oid: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub count: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub got: i64,
    #[serde(rename = "whoGive")]
    pub who_give: Value,
    #[serde(rename = "whoGot")]
    pub who_got: Value,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RedPacketKind {
    #[default]
    Random,
    Average,
    Specify,
    Heartbeat,
    RockPaperScissors,
    #[serde(other)]
    Other,
}

/// Rock-paper-scissors gesture, encoded as `0`/`1`/`2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Rock,
    Scissors,
    Paper,
}

impl Gesture {
    pub fn code(self) -> u8 {
        match self {
            Self::Rock => 0,
            Self::Scissors => 1,
            Self::Paper => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Rock),
            1 => Some(Self::Scissors),
            2 => Some(Self::Paper),
            _ => None,
        }
    }
}

impl Serialize for Gesture {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Gesture {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = lenient_i64(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown gesture {code}")))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RedPacketGot {
    #[serde(rename = "userId", deserialize_with = "lenient_string")]
    pub user_id: String,
    #[serde(rename = "userName", deserialize_with = "lenient_string")]
    pub user_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub avatar: String,
    #[serde(rename = "userMoney", deserialize_with = "lenient_i64")]
    pub user_money: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub time: String,
}

/// Red packet card carried in a chat message's `content`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RedPacketCard {
    #[serde(rename = "msgType", deserialize_with = "lenient_string")]
    pub msg_type: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub count: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub got: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub money: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub msg: String,
    #[serde(rename = "senderId", deserialize_with = "lenient_string")]
    pub sender_id: String,
    #[serde(rename = "type")]
    pub kind: RedPacketKind,
    #[serde(deserialize_with = "nested_string_list")]
    pub recivers: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub who: Vec<RedPacketGot>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MusicCard {
    #[serde(rename = "msgType", deserialize_with = "lenient_string")]
    pub msg_type: String,
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(deserialize_with = "lenient_string")]
    pub source: String,
    #[serde(rename = "coverURL", deserialize_with = "lenient_string")]
    pub cover_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub from: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WeatherDay {
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub code: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub min: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub max: f64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WeatherCard {
    #[serde(rename = "msgType", deserialize_with = "lenient_string")]
    pub msg_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub city: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub data: Vec<WeatherDay>,
}

/// Body of a chat message. Rich cards arrive JSON-encoded inside `content`.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    RedPacket(RedPacketCard),
    Music(MusicCard),
    Weather(WeatherCard),
}

impl MessageContent {
    /// Decodes a wire `content` value.
    ///
    /// Only a JSON object whose `msgType` is a known card becomes a card; any
    /// other content, including malformed JSON, stays as the original text.
    pub fn decode(raw: &Value) -> Self {
        let text = match raw {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };

        let parsed = match raw {
            Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
                Ok(parsed) => parsed,
                Err(_) => return Self::Text(text),
            },
            Value::Object(_) => raw.clone(),
            _ => return Self::Text(text),
        };

        let msg_type = parsed
            .get("msgType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let card = match msg_type {
            "redPacket" => RedPacketCard::deserialize(&parsed).map(Self::RedPacket),
            "music" => MusicCard::deserialize(&parsed).map(Self::Music),
            "weather" => WeatherCard::deserialize(&parsed).map(Self::Weather),
            _ => return Self::Text(text),
        };
        card.unwrap_or_else(|err| {
            debug!(event = "chatroom_card_undecodable", msg_type, error = %err);
            Self::Text(text)
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// Chat room message, identical whether it came from a live frame or from
/// paginated history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRoomMessage {
    pub oid: String,
    pub user_oid: String,
    pub time: String,
    pub user_name: String,
    pub user_nickname: String,
    pub user_avatar_url: String,
    pub content: MessageContent,
    pub md: String,
    pub client: String,
    pub via: Option<Via>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireMessage {
    #[serde(rename = "oId", deserialize_with = "lenient_string")]
    oid: String,
    #[serde(rename = "userOId", deserialize_with = "lenient_string")]
    user_oid: String,
    #[serde(deserialize_with = "lenient_string")]
    time: String,
    #[serde(rename = "userName", deserialize_with = "lenient_string")]
    user_name: String,
    #[serde(rename = "userNickname", deserialize_with = "lenient_string")]
    user_nickname: String,
    #[serde(rename = "userAvatarURL", deserialize_with = "lenient_string")]
    user_avatar_url: String,
    content: Value,
    md: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    client: String,
}

impl ChatRoomMessage {
    /// Decodes one message object from a live `msg` frame or a history page.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        WireMessage::deserialize(value).map(Self::from_wire)
    }

    fn from_wire(wire: WireMessage) -> Self {
        let md = wire.md.unwrap_or_else(|| match &wire.content {
            Value::String(text) => text.clone(),
            _ => String::new(),
        });
        Self {
            via: Via::parse(&wire.client),
            content: MessageContent::decode(&wire.content),
            oid: wire.oid,
            user_oid: wire.user_oid,
            time: wire.time,
            user_name: wire.user_name,
            user_nickname: wire.user_nickname,
            user_avatar_url: wire.user_avatar_url,
            md,
            client: wire.client,
        }
    }

    /// The event kind this message is delivered under.
    pub fn kind(&self) -> ChatRoomEventKind {
        match self.content {
            MessageContent::Text(_) => ChatRoomEventKind::Msg,
            MessageContent::RedPacket(_) => ChatRoomEventKind::RedPacket,
            MessageContent::Music(_) => ChatRoomEventKind::Music,
            MessageContent::Weather(_) => ChatRoomEventKind::Weather,
        }
    }

    pub fn into_event(self) -> ChatRoomEvent {
        match self.content {
            MessageContent::Text(_) => ChatRoomEvent::Msg(self),
            MessageContent::RedPacket(_) => ChatRoomEvent::RedPacket(self),
            MessageContent::Music(_) => ChatRoomEvent::Music(self),
            MessageContent::Weather(_) => ChatRoomEvent::Weather(self),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum RoomFrame {
    Online {
        #[serde(default)]
        users: Option<Vec<OnlineUser>>,
        #[serde(default)]
        discussing: Option<String>,
    },
    DiscussChanged {
        #[serde(rename = "newDiscuss", default)]
        new_discuss: Option<String>,
    },
    Revoke {
        #[serde(rename = "oId", deserialize_with = "lenient_string")]
        oid: String,
    },
    Barrager(BarragerMsg),
    Msg(Value),
    RedPacketStatus(RedPacketStatus),
    CustomMessage {
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatRoomEventKind {
    Open,
    Close,
    Error,
    Online,
    Discuss,
    Revoke,
    Barrager,
    Msg,
    RedPacket,
    Music,
    Weather,
    RedPacketStatus,
    Custom,
    Unknown,
    /// Receives every decoded frame in addition to its own kind.
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatRoomEvent {
    Open,
    Close(CloseReason),
    Error(TransportError),
    Online {
        users: Vec<OnlineUser>,
        discussing: String,
    },
    Discuss(String),
    Revoke(String),
    Barrager(BarragerMsg),
    Msg(ChatRoomMessage),
    RedPacket(ChatRoomMessage),
    Music(ChatRoomMessage),
    Weather(ChatRoomMessage),
    RedPacketStatus(RedPacketStatus),
    Custom(String),
    /// Frame with an unrecognized `type`, or one that failed to decode.
    Unknown {
        kind: String,
        frame: Value,
    },
}

impl ChatRoomEvent {
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(frame) => Self::from_value(frame),
            Err(err) => {
                debug!(event = "chatroom_frame_not_json", error = %err);
                Self::Unknown {
                    kind: String::new(),
                    frame: Value::String(text.to_string()),
                }
            }
        }
    }

    pub fn from_value(frame: Value) -> Self {
        match RoomFrame::deserialize(&frame).and_then(Self::from_frame) {
            Ok(event) => event,
            Err(err) => {
                let kind = frame
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                debug!(event = "chatroom_frame_undecodable", kind = %kind, error = %err);
                Self::Unknown { kind, frame }
            }
        }
    }

    fn from_frame(frame: RoomFrame) -> Result<Self, serde_json::Error> {
        Ok(match frame {
            RoomFrame::Online { users, discussing } => Self::Online {
                users: users.unwrap_or_default(),
                discussing: discussing.unwrap_or_default(),
            },
            RoomFrame::DiscussChanged { new_discuss } => {
                Self::Discuss(new_discuss.unwrap_or_default())
            }
            RoomFrame::Revoke { oid } => Self::Revoke(oid),
            RoomFrame::Barrager(barrager) => Self::Barrager(barrager),
            RoomFrame::Msg(message) => ChatRoomMessage::from_value(&message)?.into_event(),
            RoomFrame::RedPacketStatus(status) => Self::RedPacketStatus(status),
            RoomFrame::CustomMessage { message } => Self::Custom(message.unwrap_or_default()),
        })
    }

    /// The chat message carried by this event, if any.
    pub fn message(&self) -> Option<&ChatRoomMessage> {
        match self {
            Self::Msg(message)
            | Self::RedPacket(message)
            | Self::Music(message)
            | Self::Weather(message) => Some(message),
            _ => None,
        }
    }
}

impl RoutedEvent for ChatRoomEvent {
    type Kind = ChatRoomEventKind;

    fn kind(&self) -> ChatRoomEventKind {
        match self {
            Self::Open => ChatRoomEventKind::Open,
            Self::Close(_) => ChatRoomEventKind::Close,
            Self::Error(_) => ChatRoomEventKind::Error,
            Self::Online { .. } => ChatRoomEventKind::Online,
            Self::Discuss(_) => ChatRoomEventKind::Discuss,
            Self::Revoke(_) => ChatRoomEventKind::Revoke,
            Self::Barrager(_) => ChatRoomEventKind::Barrager,
            Self::Msg(_) => ChatRoomEventKind::Msg,
            Self::RedPacket(_) => ChatRoomEventKind::RedPacket,
            Self::Music(_) => ChatRoomEventKind::Music,
            Self::Weather(_) => ChatRoomEventKind::Weather,
            Self::RedPacketStatus(_) => ChatRoomEventKind::RedPacketStatus,
            Self::Custom(_) => ChatRoomEventKind::Custom,
            Self::Unknown { .. } => ChatRoomEventKind::Unknown,
        }
    }
}

impl ChannelEvent for ChatRoomEvent {
    fn lifecycle(lifecycle: Lifecycle) -> Self {
        match lifecycle {
            Lifecycle::Open => Self::Open,
            Lifecycle::Error(error) => Self::Error(error),
            Lifecycle::Close(reason) => Self::Close(reason),
        }
    }

    fn catch_all_kind() -> Option<ChatRoomEventKind> {
        Some(ChatRoomEventKind::All)
    }
}

/// Outgoing red packet, sent as `[redpacket]<json>[/redpacket]`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RedPacket {
    #[serde(rename = "type")]
    pub kind: RedPacketKind,
    pub money: i64,
    pub count: i64,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recivers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gesture: Option<Gesture>,
}

impl Default for RedPacket {
    fn default() -> Self {
        Self {
            kind: RedPacketKind::Random,
            money: 32,
            count: 1,
            msg: "摸鱼者，事竟成".to_string(),
            recivers: None,
            gesture: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RedPacketBase {
    #[serde(deserialize_with = "lenient_i64")]
    pub count: i64,
    pub gesture: Option<Gesture>,
    #[serde(deserialize_with = "lenient_i64")]
    pub got: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub msg: String,
    #[serde(rename = "userName", deserialize_with = "lenient_string")]
    pub user_name: String,
    #[serde(rename = "userAvatarURL", deserialize_with = "lenient_string")]
    pub user_avatar_url: String,
}

/// Result of opening a red packet.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RedPacketInfo {
    pub info: RedPacketBase,
    #[serde(deserialize_with = "nested_string_list")]
    pub recivers: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub who: Vec<RedPacketGot>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MuteItem {
    #[serde(deserialize_with = "lenient_i64")]
    pub time: i64,
    #[serde(rename = "userAvatarURL", deserialize_with = "lenient_string")]
    pub user_avatar_url: String,
    #[serde(rename = "userName", deserialize_with = "lenient_string")]
    pub user_name: String,
    #[serde(rename = "userNickname", deserialize_with = "lenient_string")]
    pub user_nickname: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatRoomNode {
    #[serde(deserialize_with = "lenient_string")]
    pub node: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub online: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    pub recommend: ChatRoomNode,
    pub available: Vec<ChatRoomNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrageCost {
    pub cost: i64,
    pub unit: String,
}

impl BarrageCost {
    /// Parses strings such as `"5积分"`; anything else yields the default price.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let split = raw
            .char_indices()
            .find(|(_, ch)| !(ch.is_ascii_digit() || *ch == '-'))
            .map(|(index, _)| index)
            .unwrap_or(raw.len());
        let (number, unit) = raw.split_at(split);
        match number.parse::<i64>() {
            Ok(cost) if !unit.is_empty() => Self {
                cost,
                unit: unit.to_string(),
            },
            _ => Self::default(),
        }
    }
}

impl Default for BarrageCost {
    fn default() -> Self {
        Self {
            cost: 20,
            unit: "积分".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentType {
    #[default]
    Html,
    Text,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryMode {
    #[default]
    Context,
    After,
}

impl QueryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::After => "after",
        }
    }
}

/// Parameters for fetching messages around a given message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub oid: String,
    pub mode: QueryMode,
    pub size: u32,
    pub content_type: ContentType,
}

impl MessageQuery {
    pub fn new(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            mode: QueryMode::Context,
            size: 25,
            content_type: ContentType::Html,
        }
    }

    pub fn with_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }
}
