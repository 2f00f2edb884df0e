//! System notification channel.
//!
//! Frames on this channel are keyed on `command`, not `type`.

mod proto;

use std::ops::Deref;

use secrecy::ExposeSecret;
use serde_json::Value;

use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::config::ClientConfig;
use crate::realtime::{Channel, ChannelKind, SocketOptions};
use crate::retry::ReconnectPolicy;

pub use proto::{
    Breezemoon, NoticeCount, NoticeEvent, NoticeEventKind, NoticeItem, NoticeKind, NoticeMessage,
};

#[derive(Debug, Default)]
pub struct NoticeChannelKind;

impl ChannelKind for NoticeChannelKind {
    type Event = NoticeEvent;

    const NAME: &'static str = "notice";

    fn path(&self) -> &'static str {
        "user-channel"
    }

    fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            reconnect: ReconnectPolicy::user_channel(),
            heartbeat: None,
        }
    }

    fn decode(&self, text: &str) -> Option<NoticeEvent> {
        NoticeEvent::from_text(text)
    }
}

/// The process-wide notification channel. Dereferences to the underlying
/// [`Channel`].
pub struct NoticeChannel {
    channel: Channel<NoticeChannelKind>,
    api: ApiClient,
}

impl NoticeChannel {
    pub fn new(config: ClientConfig, api: ApiClient) -> Self {
        Self {
            channel: Channel::new(NoticeChannelKind, config),
            api,
        }
    }

    pub async fn count(&self) -> Result<NoticeCount, ApiError> {
        let request = ApiRequest::get("notifications/unread/count").query("apiKey", self.api_key());
        let value = self.api.call_checked(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn list(&self, kind: NoticeKind) -> Result<Vec<NoticeItem>, ApiError> {
        let request = ApiRequest::get("api/getNotifications")
            .query("apiKey", self.api_key())
            .query("type", kind.as_str());
        let mut value = self.api.call_checked(request).await?;
        let items: Vec<NoticeItem> = match value.get_mut("data").map(Value::take) {
            Some(Value::Null) | None => Vec::new(),
            Some(data) => serde_json::from_value(data)?,
        };
        Ok(items.into_iter().map(NoticeItem::normalize).collect())
    }

    /// Marks every notification of `kind` as read.
    pub async fn make_read(&self, kind: NoticeKind) -> Result<(), ApiError> {
        let request = ApiRequest::get(format!("notifications/make-read/{}", kind.as_str()))
            .query("apiKey", self.api_key());
        self.api.call_checked(request).await?;
        Ok(())
    }

    pub async fn read_all(&self) -> Result<(), ApiError> {
        let request = ApiRequest::get("notifications/all-read").query("apiKey", self.api_key());
        self.api.call_checked(request).await?;
        Ok(())
    }

    fn api_key(&self) -> String {
        self.channel
            .token()
            .map(|token| token.expose_secret().clone())
            .unwrap_or_default()
    }
}

impl Deref for NoticeChannel {
    type Target = Channel<NoticeChannelKind>;

    fn deref(&self) -> &Self::Target {
        &self.channel
    }
}

impl std::fmt::Debug for NoticeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoticeChannel")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::{NoticeChannel, NoticeEvent, NoticeEventKind, NoticeKind};
    use crate::api::{ApiClient, ApiError};
    use crate::realtime::channel::testing::{collector, fixture, settle, Fixture};

    fn notice(fixture: &Fixture) -> NoticeChannel {
        NoticeChannel::new(
            fixture.config.clone(),
            ApiClient::new(Arc::new(fixture.api.clone())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn bz_updates_reach_subscribers_flattened() {
        let mut fixture = fixture();
        let notice = notice(&fixture);
        let (updates, on_update) = collector::<NoticeEvent>();
        notice.on(NoticeEventKind::BzUpdate, on_update);

        let link = fixture.links.recv().await.expect("link");
        assert_eq!(link.url, "wss://fishpi.test/user-channel?apiKey=k1");
        link.push(r#"{"command":"bz-update","bz":{"oId":"9","authorName":"alice","content":"hi"}}"#);
        link.push(r#"{"command":"refreshNotification","userId":"1"}"#);
        settle().await;

        let updates = updates.lock().expect("updates");
        assert_eq!(updates.len(), 1);
        match &updates[0] {
            NoticeEvent::BzUpdate(bz) => {
                assert_eq!(bz.oid, "9");
                assert_eq!(bz.author_name, "alice");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn notice_channel_sends_no_heartbeat() {
        let mut fixture = fixture();
        let notice = notice(&fixture);
        notice.on(NoticeEventKind::WarnBroadcast, |_| {});

        let mut link = fixture.links.recv().await.expect("link");
        settle().await;
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(link.try_next_sent(), None);
    }

    #[tokio::test]
    async fn count_reads_the_envelope() {
        let fixture = fixture();
        let notice = notice(&fixture);
        fixture.api.reply(
            "notifications/unread/count",
            json!({"code": 0, "userNotifyStatus": 0, "unreadNotificationCnt": 7}),
        );

        let count = notice.count().await.expect("count");
        assert!(!count.user_notify_status);
        assert_eq!(count.unread, 7);
        assert_eq!(fixture.api.requests()[0].query_value("apiKey"), Some("k1"));
    }

    #[tokio::test]
    async fn list_requests_the_category() {
        let fixture = fixture();
        let notice = notice(&fixture);
        fixture.api.reply(
            "api/getNotifications",
            json!({"code": 0, "data": [{"oId": "1", "content": "ping", "hasRead": false}]}),
        );

        let items = notice.list(NoticeKind::SysAnnounce).await.expect("list");
        assert_eq!(items[0].description, "ping");
        assert_eq!(
            fixture.api.requests()[0].query_value("type"),
            Some("sys-announce")
        );
    }

    #[tokio::test]
    async fn mark_read_calls_hit_their_paths() {
        let fixture = fixture();
        let notice = notice(&fixture);
        fixture
            .api
            .reply("notifications/make-read/at", json!({"code": 0}));
        fixture
            .api
            .reply("notifications/all-read", json!({"code": -1, "msg": "denied"}));

        notice.make_read(NoticeKind::At).await.expect("make read");
        assert!(matches!(
            notice.read_all().await,
            Err(ApiError::Rejected { code: -1, .. })
        ));
    }

    #[tokio::test]
    async fn transport_failures_surface_unchanged() {
        let fixture = fixture();
        let notice = notice(&fixture);
        fixture.api.fail(
            "notifications/unread/count",
            ApiError::Parse("unexpected body".to_string()),
        );

        assert!(matches!(notice.count().await, Err(ApiError::Parse(_))));
    }
}
