//! Physical websocket connections.
//!
//! A [`Connector`] dials a URL and yields a [`Connection`]: a text sink for
//! outbound frames and a text stream for inbound frames. The end of the inbound
//! stream means the remote side closed. [`WsConnector`] is the
//! `tokio-tungstenite` implementation; the socket state machine only ever sees
//! the trait.

use std::pin::Pin;

use futures_util::future::{self, BoxFuture};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
/// Inbound half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One open duplex connection.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Dials websocket URLs.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, TransportError>>;
}

/// Transport-level failures. Always retryable by the socket's backoff.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection attempt timed out")]
    Timeout,

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("invalid socket url: {0}")]
    InvalidUrl(String),

    #[error("connection closed")]
    Closed,
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            WsError::Url(err) => Self::InvalidUrl(err.to_string()),
            other => Self::WebSocket(other.to_string()),
        }
    }
}

/// `tokio-tungstenite` connector.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let url = url.to_string();
        Box::pin(async move {
            let (socket, _) = connect_async(url.as_str()).await?;
            let (write, read) = socket.split();

            let sink = write
                .sink_map_err(TransportError::from)
                .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text))));
            let stream = read.filter_map(|item| future::ready(inbound_text(item)));

            Ok(Connection::new(Box::pin(sink), Box::pin(stream)))
        })
    }
}

/// Maps one tungstenite read to an inbound frame; control frames are skipped.
fn inbound_text(item: Result<Message, WsError>) -> Option<Result<String, TransportError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_)) => None,
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => None,
        Err(err) => Some(Err(err.into())),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connector for driving the socket state machine in tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use futures_util::future::BoxFuture;
    use futures_util::{sink, stream};
    use tokio::sync::mpsc;

    use super::{Connection, Connector, TransportError};

    /// Test side of one accepted connection.
    pub(crate) struct MockLink {
        pub(crate) url: String,
        inbound: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
        outbound: mpsc::UnboundedReceiver<String>,
    }

    impl MockLink {
        /// Delivers an inbound text frame.
        pub(crate) fn push(&self, text: &str) {
            if let Some(inbound) = self.inbound.as_ref() {
                let _ = inbound.send(Ok(text.to_string()));
            }
        }

        /// Delivers an inbound transport error.
        pub(crate) fn fail(&self, error: TransportError) {
            if let Some(inbound) = self.inbound.as_ref() {
                let _ = inbound.send(Err(error));
            }
        }

        /// Ends the inbound stream, which the socket sees as a remote close.
        pub(crate) fn hang_up(&mut self) {
            self.inbound = None;
        }

        /// Waits for the next outbound frame; `None` once the client dropped it.
        pub(crate) async fn next_sent(&mut self) -> Option<String> {
            self.outbound.recv().await
        }

        /// Returns an outbound frame if one is already queued.
        pub(crate) fn try_next_sent(&mut self) -> Option<String> {
            self.outbound.try_recv().ok()
        }
    }

    /// Records every dial and hands accepted links to the test.
    #[derive(Clone)]
    pub(crate) struct MockConnector {
        attempts: Arc<AtomicUsize>,
        refusals: Arc<AtomicUsize>,
        urls: Arc<Mutex<Vec<String>>>,
        links: mpsc::UnboundedSender<MockLink>,
    }

    impl MockConnector {
        pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<MockLink>) {
            let (links, accepted) = mpsc::unbounded_channel();
            (
                Self {
                    attempts: Arc::new(AtomicUsize::new(0)),
                    refusals: Arc::new(AtomicUsize::new(0)),
                    urls: Arc::new(Mutex::new(Vec::new())),
                    links,
                },
                accepted,
            )
        }

        /// Refuses the next `count` dials.
        pub(crate) fn refuse_next(&self, count: usize) {
            self.refusals.store(count, Ordering::SeqCst);
        }

        pub(crate) fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        pub(crate) fn urls(&self) -> Vec<String> {
            self.urls.lock().expect("mock connector lock").clone()
        }
    }

    impl Connector for MockConnector {
        fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, TransportError>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.urls
                .lock()
                .expect("mock connector lock")
                .push(url.to_string());

            let refused = self
                .refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if refused {
                return Box::pin(async {
                    Err(TransportError::WebSocket("connection refused".to_string()))
                });
            }

            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
            let _ = self.links.send(MockLink {
                url: url.to_string(),
                inbound: Some(inbound_tx),
                outbound: outbound_rx,
            });

            let stream = stream::unfold(inbound_rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            let sink = sink::unfold(outbound_tx, |tx, frame: String| async move {
                tx.send(frame).map_err(|_| TransportError::Closed)?;
                Ok::<_, TransportError>(tx)
            });

            Box::pin(async move { Ok(Connection::new(Box::pin(sink), Box::pin(stream))) })
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    use super::{inbound_text, TransportError};

    #[test]
    fn text_and_utf8_binary_frames_are_delivered() {
        assert_eq!(
            inbound_text(Ok(Message::Text("hi".to_string()))),
            Some(Ok("hi".to_string()))
        );
        assert_eq!(
            inbound_text(Ok(Message::Binary(b"{}".to_vec()))),
            Some(Ok("{}".to_string()))
        );
        assert_eq!(inbound_text(Ok(Message::Binary(vec![0xff, 0xfe]))), None);
    }

    #[test]
    fn control_frames_and_clean_close_are_skipped() {
        assert_eq!(inbound_text(Ok(Message::Ping(Vec::new()))), None);
        assert_eq!(inbound_text(Ok(Message::Close(None))), None);
        assert_eq!(inbound_text(Err(WsError::ConnectionClosed)), None);
    }

    #[test]
    fn transport_errors_are_classified() {
        assert_eq!(TransportError::from(WsError::AlreadyClosed), TransportError::Closed);
        assert!(matches!(
            inbound_text(Err(WsError::Utf8)),
            Some(Err(TransportError::WebSocket(_)))
        ));
    }
}
