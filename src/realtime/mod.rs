//! Realtime channel plumbing.
//!
//! - [`transport`]: physical websocket connections behind a [`Connector`].
//! - [`socket`]: the connect / heartbeat / backoff state machine.
//! - [`router`]: typed pub/sub keyed by event kind.
//! - [`channel`]: the generic channel combining the three.

pub mod channel;
pub mod router;
pub mod socket;
pub mod transport;

pub use channel::{Channel, ChannelError, ChannelEvent, ChannelKind, Lifecycle};
pub use router::{EventRouter, Handler, ListenerId, RoutedEvent};
pub use socket::{CloseReason, Heartbeat, SocketHandle, SocketOptions, SocketState};
pub use transport::{Connection, Connector, TransportError, WsConnector};
