//! Private chat: one channel per peer, held in a [`ChatRegistry`].
//!
//! A peer channel with an empty peer name addresses the all-conversations
//! endpoint (`user-channel`) instead of one conversation (`chat-channel`).

mod proto;

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::config::{ClientConfig, RealtimeDefaults};
use crate::realtime::{Channel, ChannelError, ChannelKind, Heartbeat, SocketOptions};
use crate::retry::ReconnectPolicy;

pub use proto::{ChatData, ChatEvent, ChatEventKind, ChatNotice};

/// Endpoint and decode rules for one private conversation.
#[derive(Debug)]
pub struct PeerKind {
    peer: String,
}

impl ChannelKind for PeerKind {
    type Event = ChatEvent;

    const NAME: &'static str = "chat";

    fn path(&self) -> &'static str {
        if self.peer.is_empty() {
            "user-channel"
        } else {
            "chat-channel"
        }
    }

    fn peer(&self) -> Option<&str> {
        Some(self.peer.as_str()).filter(|peer| !peer.is_empty())
    }

    fn socket_options(&self) -> SocketOptions {
        // Only the shared all-conversations socket is kept alive.
        let heartbeat = self.peer.is_empty().then(|| Heartbeat {
            period: RealtimeDefaults::HEARTBEAT_PERIOD,
            frame: RealtimeDefaults::HEARTBEAT_FRAME.to_string(),
        });
        SocketOptions {
            reconnect: ReconnectPolicy::user_channel(),
            heartbeat,
        }
    }

    fn decode(&self, text: &str) -> Option<ChatEvent> {
        ChatEvent::from_text(text)
    }
}

/// Channel for one peer. Dereferences to the underlying [`Channel`].
pub struct PeerChannel {
    channel: Channel<PeerKind>,
    api: ApiClient,
}

impl PeerChannel {
    pub fn new(peer: impl Into<String>, config: ClientConfig, api: ApiClient) -> Self {
        let kind = PeerKind { peer: peer.into() };
        Self {
            channel: Channel::new(kind, config),
            api,
        }
    }

    /// Peer name; empty for the all-conversations channel.
    pub fn peer(&self) -> &str {
        &self.channel.kind().peer
    }

    /// Sends a raw text message to the peer, connecting first if needed.
    ///
    /// The all-conversations endpoint accepts no writes, so sending there only
    /// connects.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        let socket = self.channel.connect(false)?;
        if self.peer().is_empty() {
            debug!(event = "chat_send_without_peer");
            return Ok(());
        }
        socket.send_text(text).map_err(|_| ChannelError::Closed)
    }

    /// One page of history with the peer.
    ///
    /// With `auto_read`, the conversation is marked as read in the background
    /// once the page arrives. The page never waits on, or fails because of,
    /// that call.
    pub async fn get(
        &self,
        page: u32,
        size: u32,
        auto_read: bool,
    ) -> Result<Vec<ChatData>, ChannelError> {
        if self.peer().is_empty() {
            return Ok(Vec::new());
        }
        let request = ApiRequest::get("chat/get-message")
            .query("apiKey", self.api_key())
            .query("toUser", self.peer())
            .query("page", page)
            .query("pageSize", size);
        let value = self.api.call_checked(request).await?;
        let messages = data_list(value)?;

        if auto_read {
            let api = self.api.clone();
            let api_key = self.api_key();
            let peer = self.peer().to_string();
            tokio::spawn(async move {
                if let Err(err) = mark_read(&api, &api_key, &peer).await {
                    warn!(event = "chat_mark_read_failed", peer = %peer, error = %err);
                }
            });
        }
        Ok(messages)
    }

    /// Marks every message from the peer as read.
    pub async fn mark_read(&self) -> Result<(), ChannelError> {
        if self.peer().is_empty() {
            return Err(ChannelError::MissingPeer);
        }
        mark_read(&self.api, &self.api_key(), self.peer()).await?;
        Ok(())
    }

    fn api_key(&self) -> String {
        expose(self.channel.token())
    }
}

impl Deref for PeerChannel {
    type Target = Channel<PeerKind>;

    fn deref(&self) -> &Self::Target {
        &self.channel
    }
}

impl std::fmt::Debug for PeerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerChannel")
            .field("peer", &self.peer())
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

async fn mark_read(api: &ApiClient, api_key: &str, peer: &str) -> Result<(), ApiError> {
    let request = ApiRequest::get("chat/mark-as-read")
        .query("apiKey", api_key)
        .query("fromUser", peer);
    api.call_checked(request).await?;
    Ok(())
}

/// Peer name to [`PeerChannel`] map plus the account-wide chat calls.
pub struct ChatRegistry {
    config: RwLock<ClientConfig>,
    api: ApiClient,
    channels: Mutex<HashMap<String, Arc<PeerChannel>>>,
}

impl ChatRegistry {
    pub fn new(config: ClientConfig, api: ApiClient) -> Self {
        Self {
            config: RwLock::new(config),
            api,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the channel for `peer`, creating it on first use.
    ///
    /// Creation has no side effects; the channel connects on its first
    /// subscription or send. Pass `""` for the all-conversations channel.
    pub fn channel(&self, peer: &str) -> Arc<PeerChannel> {
        let mut channels = self.lock_channels();
        let channel = channels.entry(peer.to_string()).or_insert_with(|| {
            let config = self
                .config
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            Arc::new(PeerChannel::new(peer, config, self.api.clone()))
        });
        Arc::clone(channel)
    }

    /// Peers with an open entry in the registry.
    pub fn peers(&self) -> Vec<String> {
        self.lock_channels().keys().cloned().collect()
    }

    /// Closes and evicts `peer`, or every channel when `None`.
    pub fn close(&self, peer: Option<&str>) {
        let evicted: Vec<Arc<PeerChannel>> = {
            let mut channels = self.lock_channels();
            match peer {
                Some(peer) => channels.remove(peer).into_iter().collect(),
                None => channels.drain().map(|(_, channel)| channel).collect(),
            }
        };
        for channel in evicted {
            channel.close();
        }
    }

    /// Swaps the API key for every channel; channels holding a socket
    /// reconnect with it.
    pub fn set_token(&self, token: Option<SecretString>) -> Result<(), ChannelError> {
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_token(token.clone());
        let channels: Vec<Arc<PeerChannel>> = self.lock_channels().values().cloned().collect();
        for channel in channels {
            channel.set_token(token.clone())?;
        }
        Ok(())
    }

    /// Latest message of every conversation.
    pub async fn list(&self) -> Result<Vec<ChatData>, ApiError> {
        let request = ApiRequest::get("chat/get-list").query("apiKey", self.api_key());
        data_list(self.api.call_checked(request).await?)
    }

    /// Unread private messages.
    pub async fn unread(&self) -> Result<Vec<ChatData>, ApiError> {
        let request = ApiRequest::get("chat/has-unread").query("apiKey", self.api_key());
        data_list(self.api.call_checked(request).await?)
    }

    /// Revokes a private message and returns the server's result code.
    pub async fn revoke(&self, oid: &str) -> Result<i64, ApiError> {
        let request = ApiRequest::get("chat/revoke")
            .query("apiKey", self.api_key())
            .query("oId", oid);
        let value = self.api.call_checked(request).await?;
        Ok(value
            .get("result")
            .and_then(Value::as_i64)
            .unwrap_or_default())
    }

    fn api_key(&self) -> String {
        let token = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token()
            .cloned();
        expose(token)
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashMap<String, Arc<PeerChannel>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ChatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRegistry")
            .field("peers", &self.peers())
            .finish_non_exhaustive()
    }
}

fn expose(token: Option<SecretString>) -> String {
    token
        .map(|token| token.expose_secret().clone())
        .unwrap_or_default()
}

fn data_list(mut value: Value) -> Result<Vec<ChatData>, ApiError> {
    match value.get_mut("data").map(Value::take) {
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(data) => Ok(serde_json::from_value(data)?),
    }
}
