//! Channel base shared by the chat room, private chat, and notice channels.
//!
//! A [`Channel`] pairs one lazily created [`SocketHandle`] with a private
//! [`EventRouter`]. The concrete channel flavor is a [`ChannelKind`]: it names
//! the endpoint, picks the reconnect and heartbeat behavior, and decodes
//! inbound frames into its own event type.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;

use crate::api::ApiError;
use crate::config::{take_token_param, with_token_param, ClientConfig};
use crate::realtime::router::{EventRouter, ListenerId, RoutedEvent};
use crate::realtime::socket::{
    CloseReason, SocketHandle, SocketListener, SocketOptions, SocketState,
};
use crate::realtime::transport::TransportError;

/// Connection lifecycle notification, common to every channel flavor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Lifecycle {
    Open,
    Error(TransportError),
    Close(CloseReason),
}

/// Event type emitted by a channel.
pub trait ChannelEvent: RoutedEvent + Sized {
    fn lifecycle(lifecycle: Lifecycle) -> Self;

    /// Kind that additionally receives every decoded (non-lifecycle) event.
    fn catch_all_kind() -> Option<Self::Kind> {
        None
    }
}

/// Endpoint shape and decode rules of one channel flavor.
pub trait ChannelKind: Send + Sync + 'static {
    type Event: ChannelEvent;

    /// Short name used in logs.
    const NAME: &'static str;

    /// Socket path under the configured domain.
    fn path(&self) -> &'static str;

    /// Peer identity appended as `toUser`, if any.
    fn peer(&self) -> Option<&str> {
        None
    }

    fn socket_options(&self) -> SocketOptions;

    /// Decodes one inbound text frame. `None` drops the frame.
    fn decode(&self, text: &str) -> Option<Self::Event>;
}

/// Failures surfaced by channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("socket closed before the operation completed")]
    Closed,

    #[error("operation requires a peer; this is the all-conversations channel")]
    MissingPeer,

    #[error("invalid socket endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<url::ParseError> for ChannelError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

/// Explicit socket URL set by [`Channel::connect_to`], stored without its key.
#[derive(Clone, Debug)]
struct EndpointOverride {
    url: String,
    /// Key given in the URL itself; dropped on the next token change.
    pinned_token: Option<String>,
}

/// The attached socket plus the flag that silences its listener.
struct Attached {
    socket: SocketHandle,
    retired: Arc<AtomicBool>,
}

/// One logical channel multiplexed over at most one socket.
pub struct Channel<K: ChannelKind> {
    kind: Arc<K>,
    config: ClientConfig,
    token: RwLock<Option<SecretString>>,
    endpoint_override: RwLock<Option<EndpointOverride>>,
    router: Arc<EventRouter<K::Event>>,
    socket: Mutex<Option<Attached>>,
}

impl<K: ChannelKind> Channel<K> {
    /// Creates a disconnected channel. Nothing is dialed until the first
    /// subscription or send.
    pub fn new(kind: K, config: ClientConfig) -> Self {
        let token = config.token().cloned();
        Self {
            kind: Arc::new(kind),
            config,
            token: RwLock::new(token),
            endpoint_override: RwLock::new(None),
            router: Arc::new(EventRouter::new()),
            socket: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Subscribes `handler` to `kind` and connects if not already open.
    pub fn on<F>(&self, kind: <K::Event as RoutedEvent>::Kind, handler: F) -> ListenerId
    where
        F: Fn(&K::Event) + Send + Sync + 'static,
    {
        let id = self.router.on(kind, Arc::new(handler));
        self.ensure_connected();
        id
    }

    /// Like [`Channel::on`], but the handler runs at most once.
    pub fn once<F>(&self, kind: <K::Event as RoutedEvent>::Kind, handler: F) -> ListenerId
    where
        F: Fn(&K::Event) + Send + Sync + 'static,
    {
        let id = self.router.once(kind, Arc::new(handler));
        self.ensure_connected();
        id
    }

    pub fn add_listener<F>(&self, kind: <K::Event as RoutedEvent>::Kind, handler: F) -> ListenerId
    where
        F: Fn(&K::Event) + Send + Sync + 'static,
    {
        self.on(kind, handler)
    }

    pub fn off(&self, kind: <K::Event as RoutedEvent>::Kind, id: ListenerId) -> bool {
        self.router.off(kind, id)
    }

    pub fn remove_listener(&self, kind: <K::Event as RoutedEvent>::Kind, id: ListenerId) -> bool {
        self.off(kind, id)
    }

    pub fn off_kind(&self, kind: <K::Event as RoutedEvent>::Kind) -> usize {
        self.router.off_kind(kind)
    }

    pub fn clear_listeners(&self) {
        self.router.clear();
    }

    pub fn state(&self) -> SocketState {
        self.lock_socket()
            .as_ref()
            .map(|attached| attached.socket.state())
            .unwrap_or(SocketState::Closed)
    }

    /// True while a live (not terminated) socket is attached.
    pub fn has_socket(&self) -> bool {
        self.lock_socket()
            .as_ref()
            .is_some_and(|attached| !attached.socket.is_terminated())
    }

    pub fn token(&self) -> Option<SecretString> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the attached socket, creating one if there is none.
    ///
    /// With `reload`, any current socket is closed (emitting one `Close`) and
    /// replaced. A socket that terminated after exhausting its retries is
    /// always replaced.
    pub fn connect(&self, reload: bool) -> Result<SocketHandle, ChannelError> {
        let url = self.endpoint_url()?;
        let (previous, socket, pending) = {
            let mut slot = self.lock_socket();
            if let Some(current) = slot.as_ref() {
                if !reload && !current.socket.is_terminated() {
                    return Ok(current.socket.clone());
                }
            }

            let retired = Arc::new(AtomicBool::new(false));
            let listener: Arc<dyn SocketListener> = Arc::new(ChannelListener {
                kind: Arc::clone(&self.kind),
                router: Arc::clone(&self.router),
                retired: Arc::clone(&retired),
            });
            let (socket, pending) = SocketHandle::new(
                url,
                self.config.connector(),
                self.kind.socket_options(),
                listener,
            );
            let previous = slot.replace(Attached {
                socket: socket.clone(),
                retired,
            });
            (previous, socket, pending)
        };

        debug!(event = "channel_connect", channel = K::NAME, reload);
        if let Some(previous) = previous {
            self.retire(previous);
        }
        pending.start();
        Ok(socket)
    }

    /// Re-dials the current socket and resolves on its next open.
    ///
    /// Without a live socket this behaves like `connect(false)` followed by
    /// waiting for the open.
    pub async fn reconnect(&self) -> Result<(), ChannelError> {
        let current = self
            .lock_socket()
            .as_ref()
            .filter(|attached| !attached.socket.is_terminated())
            .map(|attached| attached.socket.clone());
        match current {
            Some(socket) => socket.reconnect().await.map_err(|_| ChannelError::Closed),
            None => self
                .connect(false)?
                .wait_open()
                .await
                .map_err(|_| ChannelError::Closed),
        }
    }

    /// Closes the socket. Idempotent; emits `Close` at most once.
    ///
    /// No handler is invoked for this socket once `close` returns, except one
    /// that was already running on another thread.
    pub fn close(&self) {
        let previous = self.lock_socket().take();
        if let Some(previous) = previous {
            self.retire(previous);
        }
    }

    /// Swaps the API key. An attached socket is torn down and re-dialed with
    /// the new key; a channel without a socket stays disconnected.
    ///
    /// The new key also replaces one given in a [`Channel::connect_to`] URL.
    pub fn set_token(&self, token: Option<SecretString>) -> Result<(), ChannelError> {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
        if let Some(endpoint) = self
            .endpoint_override
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            endpoint.pinned_token = None;
        }
        if self.lock_socket().is_some() {
            self.connect(true)?;
        }
        Ok(())
    }

    /// Points the channel at an explicit socket URL and reconnects to it.
    ///
    /// A key already in the URL is used until the next token change; otherwise
    /// the channel's key is appended.
    pub fn connect_to(&self, url: impl Into<String>) -> Result<SocketHandle, ChannelError> {
        let (url, pinned_token) = take_token_param(&url.into())?;
        *self
            .endpoint_override
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(EndpointOverride { url, pinned_token });
        self.connect(true)
    }

    /// Drops an endpoint set by [`Channel::connect_to`]. Takes effect on the
    /// next connect.
    pub fn reset_endpoint(&self) {
        self.endpoint_override
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Queues a raw text frame, connecting first if needed.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        self.connect(false)?
            .send_text(text)
            .map_err(|_| ChannelError::Closed)
    }

    /// The socket URL the next connect would dial.
    pub fn endpoint_url(&self) -> Result<String, ChannelError> {
        let token = self.token();
        let endpoint_override = self
            .endpoint_override
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let url = match endpoint_override {
            Some(endpoint) => {
                let current = token.as_ref().map(|token| token.expose_secret().as_str());
                with_token_param(&endpoint.url, endpoint.pinned_token.as_deref().or(current))?
            }
            None => self
                .config
                .socket_url(self.kind.path(), token.as_ref(), self.kind.peer())?,
        };
        Ok(url)
    }

    fn ensure_connected(&self) {
        if self.state() == SocketState::Open {
            return;
        }
        if let Err(err) = self.connect(false) {
            debug!(event = "channel_lazy_connect_failed", channel = K::NAME, error = %err);
        }
    }

    fn retire(&self, attached: Attached) {
        attached.retired.store(true, Ordering::SeqCst);
        if attached.socket.stop() {
            debug!(event = "channel_socket_closed", channel = K::NAME);
            self.router
                .emit(&K::Event::lifecycle(Lifecycle::Close(CloseReason::Requested)));
        }
    }

    fn lock_socket(&self) -> MutexGuard<'_, Option<Attached>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: ChannelKind> Drop for Channel<K> {
    fn drop(&mut self) {
        if let Some(attached) = self.lock_socket().take() {
            attached.retired.store(true, Ordering::SeqCst);
            attached.socket.stop();
        }
    }
}

impl<K: ChannelKind> fmt::Debug for Channel<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("kind", &K::NAME)
            .field("state", &self.state())
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

struct ChannelListener<K: ChannelKind> {
    kind: Arc<K>,
    router: Arc<EventRouter<K::Event>>,
    retired: Arc<AtomicBool>,
}

impl<K: ChannelKind> ChannelListener<K> {
    fn emit(&self, event: &K::Event) {
        if !self.retired.load(Ordering::SeqCst) {
            self.router.emit(event);
        }
    }
}

impl<K: ChannelKind> SocketListener for ChannelListener<K> {
    fn on_open(&self) {
        self.emit(&K::Event::lifecycle(Lifecycle::Open));
    }

    fn on_text(&self, text: String) {
        let Some(event) = self.kind.decode(&text) else {
            return;
        };
        self.emit(&event);
        if let Some(all) = K::Event::catch_all_kind() {
            // Re-checked: a close may land between the two emissions.
            if !self.retired.load(Ordering::SeqCst) {
                self.router.emit_as(all, &event);
            }
        }
    }

    fn on_error(&self, error: TransportError) {
        self.emit(&K::Event::lifecycle(Lifecycle::Error(error)));
    }

    fn on_close(&self, reason: CloseReason) {
        self.emit(&K::Event::lifecycle(Lifecycle::Close(reason)));
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use secrecy::SecretString;

    use super::testing::{collector, fixture, settle};
    use super::{Channel, ChannelEvent, ChannelKind, ChannelListener, Lifecycle};
    use crate::realtime::router::RoutedEvent;
    use crate::realtime::socket::{CloseReason, SocketListener, SocketOptions, SocketState};
    use crate::retry::ReconnectPolicy;

    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    enum EchoKind {
        Open,
        Close,
        Error,
        Text,
        All,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum EchoEvent {
        Lifecycle(Lifecycle),
        Text(String),
    }

    impl RoutedEvent for EchoEvent {
        type Kind = EchoKind;

        fn kind(&self) -> EchoKind {
            match self {
                Self::Lifecycle(Lifecycle::Open) => EchoKind::Open,
                Self::Lifecycle(Lifecycle::Close(_)) => EchoKind::Close,
                Self::Lifecycle(Lifecycle::Error(_)) => EchoKind::Error,
                Self::Text(_) => EchoKind::Text,
            }
        }
    }

    impl ChannelEvent for EchoEvent {
        fn lifecycle(lifecycle: Lifecycle) -> Self {
            Self::Lifecycle(lifecycle)
        }

        fn catch_all_kind() -> Option<EchoKind> {
            Some(EchoKind::All)
        }
    }

    struct Echo;

    impl ChannelKind for Echo {
        type Event = EchoEvent;

        const NAME: &'static str = "echo";

        fn path(&self) -> &'static str {
            "echo-channel"
        }

        fn socket_options(&self) -> SocketOptions {
            SocketOptions {
                reconnect: ReconnectPolicy {
                    min_delay: Duration::from_secs(1),
                    max_delay: Duration::from_secs(2),
                    growth_factor: 1.0,
                    max_retries: 2,
                    connection_timeout: Duration::from_secs(10),
                },
                heartbeat: None,
            }
        }

        fn decode(&self, text: &str) -> Option<EchoEvent> {
            (text != "drop").then(|| EchoEvent::Text(text.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn construction_does_not_connect() {
        let fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());
        settle().await;
        assert_eq!(fixture.connector.attempts(), 0);
        assert_eq!(channel.state(), SocketState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_subscriptions_dial_once() {
        let fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());

        channel.on(EchoKind::Text, |_| {});
        channel.on(EchoKind::Open, |_| {});
        channel.once(EchoKind::Close, |_| {});
        settle().await;

        assert_eq!(fixture.connector.attempts(), 1);
        assert_eq!(
            fixture.connector.urls(),
            vec!["wss://fishpi.test/echo-channel?apiKey=k1".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn decoded_frames_reach_kind_and_catch_all_listeners() {
        let mut fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());
        let (texts, on_text) = collector::<EchoEvent>();
        let (all, on_all) = collector::<EchoEvent>();
        channel.on(EchoKind::Text, on_text);
        channel.on(EchoKind::All, on_all);

        let link = fixture.links.recv().await.expect("link");
        link.push("hello");
        link.push("drop");
        settle().await;

        let expected = vec![EchoEvent::Text("hello".to_string())];
        assert_eq!(*texts.lock().expect("texts"), expected);
        assert_eq!(*all.lock().expect("all"), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn close_twice_emits_one_close() {
        let mut fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());
        let (closes, on_close) = collector::<EchoEvent>();
        channel.on(EchoKind::Close, on_close);
        let _link = fixture.links.recv().await.expect("link");
        settle().await;

        channel.close();
        channel.close();
        settle().await;

        assert_eq!(
            *closes.lock().expect("closes"),
            vec![EchoEvent::Lifecycle(Lifecycle::Close(CloseReason::Requested))]
        );
        assert_eq!(channel.state(), SocketState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn set_token_cycles_an_attached_socket() {
        let mut fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());
        let (events, on_event) = collector::<EchoEvent>();
        for kind in [EchoKind::Open, EchoKind::Close] {
            channel.on(kind, on_event.clone());
        }
        let _first = fixture.links.recv().await.expect("first link");
        settle().await;

        channel
            .set_token(Some(SecretString::new("k2".to_string())))
            .expect("set token");
        let second = fixture.links.recv().await.expect("second link");
        settle().await;

        assert_eq!(second.url, "wss://fishpi.test/echo-channel?apiKey=k2");
        assert_eq!(
            *events.lock().expect("events"),
            vec![
                EchoEvent::Lifecycle(Lifecycle::Open),
                EchoEvent::Lifecycle(Lifecycle::Close(CloseReason::Requested)),
                EchoEvent::Lifecycle(Lifecycle::Open),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn set_token_without_socket_stays_disconnected() {
        let fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());
        channel
            .set_token(Some(SecretString::new("k2".to_string())))
            .expect("set token");
        settle().await;
        assert_eq!(fixture.connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_socket_is_replaced_on_next_subscription() {
        let fixture = fixture();
        fixture.connector.refuse_next(3);
        let channel = Channel::new(Echo, fixture.config.clone());
        let (closes, on_close) = collector::<EchoEvent>();
        channel.on(EchoKind::Close, on_close);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fixture.connector.attempts(), 3);
        assert_eq!(
            *closes.lock().expect("closes"),
            vec![EchoEvent::Lifecycle(Lifecycle::Close(
                CloseReason::RetriesExhausted
            ))]
        );
        assert!(!channel.has_socket());

        channel.on(EchoKind::Text, |_| {});
        settle().await;
        assert_eq!(fixture.connector.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_without_socket_connects_and_waits_for_open() {
        let fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());
        channel.reconnect().await.expect("reconnect");
        assert_eq!(channel.state(), SocketState::Open);
        assert_eq!(fixture.connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_to_keeps_an_explicit_token() {
        let mut fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());
        channel
            .connect_to("wss://node1.fishpi.test/echo-channel?apiKey=node")
            .expect("connect");
        let link = fixture.links.recv().await.expect("link");
        assert_eq!(link.url, "wss://node1.fishpi.test/echo-channel?apiKey=node");
    }

    #[tokio::test(start_paused = true)]
    async fn token_change_replaces_a_key_given_in_the_url() {
        let mut fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());
        channel
            .connect_to("wss://node1.fishpi.test/echo-channel?apiKey=k1&region=cn")
            .expect("connect");
        let _first = fixture.links.recv().await.expect("first link");

        channel
            .set_token(Some(SecretString::new("k2".to_string())))
            .expect("set token");
        let second = fixture.links.recv().await.expect("second link");
        assert_eq!(
            second.url,
            "wss://node1.fishpi.test/echo-channel?region=cn&apiKey=k2"
        );

        channel.reset_endpoint();
        channel.connect(true).expect("connect");
        let third = fixture.links.recv().await.expect("third link");
        assert_eq!(third.url, "wss://fishpi.test/echo-channel?apiKey=k2");
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_ignores_frames_already_in_flight() {
        let fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());
        let (seen, on_event) = collector::<EchoEvent>();
        for kind in [EchoKind::Open, EchoKind::Text, EchoKind::All, EchoKind::Close] {
            channel.on(kind, on_event.clone());
        }
        settle().await;

        let retired = Arc::new(AtomicBool::new(false));
        let listener = ChannelListener {
            kind: Arc::new(Echo),
            router: Arc::clone(&channel.router),
            retired: Arc::clone(&retired),
        };
        listener.on_text("before".to_string());
        retired.store(true, Ordering::SeqCst);
        listener.on_text("after".to_string());
        listener.on_close(CloseReason::Remote);

        let texts: Vec<EchoEvent> = seen
            .lock()
            .expect("seen")
            .iter()
            .filter(|event| matches!(event, EchoEvent::Text(_)))
            .cloned()
            .collect();
        assert_eq!(
            texts,
            vec![
                EchoEvent::Text("before".to_string()),
                EchoEvent::Text("before".to_string()),
            ]
        );
        assert!(!seen
            .lock()
            .expect("seen")
            .contains(&EchoEvent::Lifecycle(Lifecycle::Close(CloseReason::Remote))));
    }

    #[tokio::test(start_paused = true)]
    async fn send_text_connects_and_writes_after_open() {
        let mut fixture = fixture();
        let channel = Channel::new(Echo, fixture.config.clone());
        channel.send_text("hi").expect("send");
        let mut link = fixture.links.recv().await.expect("link");
        assert_eq!(link.next_sent().await.as_deref(), Some("hi"));
    }
}
