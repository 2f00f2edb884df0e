//! Chat room channel.
//!
//! The live socket only receives; everything the user says goes over REST and
//! comes back as a broadcast frame. [`ChatRoom`] bundles the shared channel
//! with those REST calls and the cached online list and topic.

mod proto;

use std::ops::Deref;
use std::sync::{PoisonError, RwLock};

use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::config::{ClientConfig, RealtimeDefaults, Via};
use crate::realtime::{
    Channel, ChannelError, ChannelKind, Heartbeat, SocketHandle, SocketOptions,
};
use crate::retry::ReconnectPolicy;

pub use proto::{
    BarrageCost, BarragerMsg, ChatRoomEvent, ChatRoomEventKind, ChatRoomMessage, ChatRoomNode,
    ContentType, Gesture, MessageContent, MessageQuery, MusicCard, MuteItem, NodeInfo,
    OnlineUser, QueryMode, RedPacket, RedPacketBase, RedPacketCard, RedPacketGot, RedPacketInfo,
    RedPacketKind, RedPacketStatus, WeatherCard, WeatherDay,
};

#[derive(Debug, Default)]
struct RoomState {
    onlines: Vec<OnlineUser>,
    discusse: String,
}

/// Chat room endpoint and decode rules.
#[derive(Debug, Default)]
pub struct ChatRoomKind {
    state: RwLock<RoomState>,
}

impl ChatRoomKind {
    fn record(&self, event: &ChatRoomEvent) {
        if let ChatRoomEvent::Online { users, discussing } = event {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.onlines = users.clone();
            state.discusse = discussing.clone();
        }
    }
}

impl ChannelKind for ChatRoomKind {
    type Event = ChatRoomEvent;

    const NAME: &'static str = "chatroom";

    fn path(&self) -> &'static str {
        "chat-room-channel"
    }

    fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            reconnect: ReconnectPolicy::chat_room(),
            heartbeat: Some(Heartbeat {
                period: RealtimeDefaults::HEARTBEAT_PERIOD,
                frame: RealtimeDefaults::HEARTBEAT_FRAME.to_string(),
            }),
        }
    }

    fn decode(&self, text: &str) -> Option<ChatRoomEvent> {
        let event = ChatRoomEvent::from_text(text);
        self.record(&event);
        Some(event)
    }
}

/// The process-wide chat room.
///
/// Dereferences to the underlying [`Channel`] for subscriptions and
/// connection control.
pub struct ChatRoom {
    channel: Channel<ChatRoomKind>,
    api: ApiClient,
    via: RwLock<Via>,
}

impl ChatRoom {
    pub fn new(config: ClientConfig, api: ApiClient) -> Self {
        let via = config.via().clone();
        Self {
            channel: Channel::new(ChatRoomKind::default(), config),
            api,
            via: RwLock::new(via),
        }
    }

    /// Latest online users; empty until the first `online` frame.
    pub fn onlines(&self) -> Vec<OnlineUser> {
        self.channel
            .kind()
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .onlines
            .clone()
    }

    /// Current topic; empty until the first `online` frame.
    pub fn discusse(&self) -> String {
        self.channel
            .kind()
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .discusse
            .clone()
    }

    pub fn via(&self) -> Via {
        self.via
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets the client identity reported with [`ChatRoom::send`].
    pub fn set_via(&self, client: impl Into<String>, version: impl Into<String>) {
        *self.via.write().unwrap_or_else(PoisonError::into_inner) = Via::new(client, version);
    }

    /// Posts a chat message. It arrives back as a `msg` frame.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), ApiError> {
        self.send_via(content, None).await
    }

    /// Like [`ChatRoom::send`], reporting `via` for this message only.
    pub async fn send_via(
        &self,
        content: impl Into<String>,
        via: Option<&Via>,
    ) -> Result<(), ApiError> {
        let via = via.cloned().unwrap_or_else(|| self.via());
        let body = json!({
            "content": content.into(),
            "client": via.to_string(),
            "apiKey": self.api_key(),
        });
        self.api
            .call_checked(ApiRequest::post("chat-room/send", body))
            .await?;
        Ok(())
    }

    pub async fn set_discusse(&self, topic: &str) -> Result<(), ApiError> {
        self.send(format!("[setdiscuss]{topic}[/setdiscuss]")).await
    }

    /// Sends a barrage; `color` defaults to `#ffffff`.
    pub async fn barrage(&self, content: &str, color: Option<&str>) -> Result<(), ApiError> {
        let barrage = json!({
            "color": color.unwrap_or("#ffffff"),
            "content": content,
        });
        let body = json!({
            "content": format!("[barrager]{barrage}[/barrager]"),
            "apiKey": self.api_key(),
        });
        self.api
            .call_checked(ApiRequest::post("chat-room/send", body))
            .await?;
        Ok(())
    }

    pub async fn barrage_cost(&self) -> Result<BarrageCost, ApiError> {
        let request = ApiRequest::get("chat-room/barrager/get").query("apiKey", self.api_key());
        let value = self.api.call_checked(request).await?;
        Ok(value
            .get("data")
            .and_then(Value::as_str)
            .map(BarrageCost::parse)
            .unwrap_or_default())
    }

    /// Revokes a message. Members may revoke one of their own messages within
    /// a day; moderators may revoke any.
    pub async fn revoke(&self, oid: &str) -> Result<(), ApiError> {
        let request = ApiRequest::delete(
            format!("chat-room/revoke/{oid}"),
            json!({ "apiKey": self.api_key() }),
        );
        self.api.call_checked(request).await?;
        Ok(())
    }

    /// One page of history, newest first.
    pub async fn history(
        &self,
        page: u32,
        content_type: ContentType,
    ) -> Result<Vec<ChatRoomMessage>, ApiError> {
        let request = ApiRequest::get("chat-room/more")
            .query("page", page)
            .query("type", content_type.as_str())
            .query("apiKey", self.api_key());
        self.fetch_messages(request).await
    }

    /// Messages around (or after) a given message.
    pub async fn get(&self, query: &MessageQuery) -> Result<Vec<ChatRoomMessage>, ApiError> {
        let request = ApiRequest::get("chat-room/getMessage")
            .query("oId", &query.oid)
            .query("mode", query.mode.as_str())
            .query("size", query.size)
            .query("type", query.content_type.as_str())
            .query("apiKey", self.api_key());
        self.fetch_messages(request).await
    }

    /// Members currently muted.
    pub async fn mutes(&self) -> Result<Vec<MuteItem>, ApiError> {
        self.api
            .call_data(ApiRequest::get("chat-room/si-guo-list"))
            .await
    }

    /// Source text of a message with HTML comments removed.
    pub async fn raw(&self, oid: &str) -> Result<String, ApiError> {
        let value = self
            .api
            .call_checked(ApiRequest::get(format!("cr/raw/{oid}")))
            .await?;
        let text = match value {
            Value::String(text) => text,
            other => other.to_string(),
        };
        Ok(strip_html_comments(&text))
    }

    /// Recommended chat room node plus every available one.
    pub async fn node(&self) -> Result<NodeInfo, ApiError> {
        let request = ApiRequest::get("chat-room/node/get").query("apiKey", self.api_key());
        let mut value = self.api.call_checked(request).await?;

        let available: Vec<ChatRoomNode> = match value.get_mut("avaliable").map(Value::take) {
            Some(Value::Null) | None => Vec::new(),
            Some(list) => serde_json::from_value(list)?,
        };
        let node = value
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let name = value
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let online = available
            .iter()
            .find(|candidate| candidate.node == node)
            .map(|candidate| candidate.online)
            .unwrap_or_default();

        Ok(NodeInfo {
            recommend: ChatRoomNode { node, name, online },
            available,
        })
    }

    /// Connects to the recommended node, falling back to the default endpoint
    /// when node discovery fails.
    pub async fn connect_recommended_node(&self) -> Result<SocketHandle, ChannelError> {
        match self.node().await {
            Ok(info) if !info.recommend.node.is_empty() => {
                debug!(event = "chatroom_node_selected", name = %info.recommend.name);
                self.channel.connect_to(info.recommend.node)
            }
            Ok(_) => {
                debug!(event = "chatroom_node_missing");
                self.channel.reset_endpoint();
                self.channel.connect(true)
            }
            Err(err) => {
                debug!(event = "chatroom_node_lookup_failed", error = %err);
                self.channel.reset_endpoint();
                self.channel.connect(true)
            }
        }
    }

    pub async fn open_red_packet(
        &self,
        oid: &str,
        gesture: Option<Gesture>,
    ) -> Result<RedPacketInfo, ApiError> {
        let body = json!({
            "oId": oid,
            "gesture": gesture,
            "apiKey": self.api_key(),
        });
        let value = self
            .api
            .call_checked(ApiRequest::post("chat-room/red-packet/open", body))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn send_red_packet(&self, packet: &RedPacket) -> Result<(), ApiError> {
        let packet = serde_json::to_string(packet)?;
        self.send(format!("[redpacket]{packet}[/redpacket]")).await
    }

    async fn fetch_messages(&self, request: ApiRequest) -> Result<Vec<ChatRoomMessage>, ApiError> {
        let mut value = self.api.call_checked(request).await?;
        let items = match value.get_mut("data").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => return Ok(Vec::new()),
        };
        Ok(items
            .iter()
            .filter_map(|item| match ChatRoomMessage::from_value(item) {
                Ok(message) => Some(message),
                Err(err) => {
                    debug!(event = "chatroom_history_item_skipped", error = %err);
                    None
                }
            })
            .collect())
    }

    fn api_key(&self) -> String {
        self.channel
            .token()
            .map(|token| token.expose_secret().clone())
            .unwrap_or_default()
    }
}

impl Deref for ChatRoom {
    type Target = Channel<ChatRoomKind>;

    fn deref(&self) -> &Self::Target {
        &self.channel
    }
}

impl std::fmt::Debug for ChatRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRoom")
            .field("channel", &self.channel)
            .field("via", &self.via())
            .finish_non_exhaustive()
    }
}

fn strip_html_comments(raw: &str) -> String {
    let mut stripped = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("<!--") {
        let Some(end) = rest[start + 4..].find("-->") else {
            break;
        };
        stripped.push_str(&rest[..start]);
        rest = &rest[start + 4 + end + 3..];
    }
    stripped.push_str(rest);
    stripped
}
