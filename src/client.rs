//! Top-level client owning the configuration and every realtime channel.

use secrecy::SecretString;

use crate::api::{ApiClient, ApiError};
use crate::chat::ChatRegistry;
use crate::chatroom::ChatRoom;
use crate::config::ClientConfig;
use crate::notice::NoticeChannel;
use crate::realtime::ChannelError;

/// Entry point: one chat room, one notice channel, and the private chat
/// registry, all sharing one [`ClientConfig`].
///
/// Nothing connects until a channel gets its first subscriber or send.
#[derive(Debug)]
pub struct FishPi {
    config: ClientConfig,
    chatroom: ChatRoom,
    notice: NoticeChannel,
    chat: ChatRegistry,
}

impl FishPi {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let transport = config.api_transport().map_err(ApiError::Transport)?;
        let api = ApiClient::new(transport);
        Ok(Self {
            chatroom: ChatRoom::new(config.clone(), api.clone()),
            notice: NoticeChannel::new(config.clone(), api.clone()),
            chat: ChatRegistry::new(config.clone(), api),
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn chatroom(&self) -> &ChatRoom {
        &self.chatroom
    }

    pub fn notice(&self) -> &NoticeChannel {
        &self.notice
    }

    pub fn chat(&self) -> &ChatRegistry {
        &self.chat
    }

    /// Swaps the API key everywhere. Channels that hold a socket reconnect
    /// with the new key; idle ones pick it up on their first connect.
    pub fn set_token(&mut self, token: Option<SecretString>) -> Result<(), ChannelError> {
        self.config.set_token(token.clone());
        self.chatroom.set_token(token.clone())?;
        self.notice.set_token(token.clone())?;
        self.chat.set_token(token)
    }

    /// Closes the chat room, the notice channel, and every private chat.
    pub fn close(&self) {
        self.chatroom.close();
        self.notice.close();
        self.chat.close(None);
    }
}
