//! Transport socket state machine.
//!
//! Each [`SocketHandle`] owns a background worker task that dials the socket
//! URL, forwards inbound text to a [`SocketListener`], keeps the connection
//! alive with an optional heartbeat frame, and re-dials with bounded backoff
//! when the connection drops. Outbound frames sent while the socket is not
//! open are queued and flushed on the next open.
//!
//! Lifecycle notifications are delivered from the worker task:
//! `on_open` always precedes any `on_text` for that connection, and nothing is
//! delivered once [`SocketHandle::stop`] has been called.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::realtime::transport::{Connection, Connector, TransportError};
use crate::retry::{with_timeout, ReconnectPolicy};

/// Connection state of one socket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SocketState {
    Closed,
    Connecting,
    Open,
}

/// Why a socket reported a close.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseReason {
    /// The owning channel closed or replaced the socket.
    Requested,
    /// The remote side ended the connection; a reconnect follows.
    Remote,
    /// The reconnect budget ran out; the socket will not dial again.
    RetriesExhausted,
}

/// Receives lifecycle and inbound frames from a socket worker.
pub trait SocketListener: Send + Sync + 'static {
    fn on_open(&self);
    fn on_text(&self, text: String);
    fn on_error(&self, error: TransportError);
    fn on_close(&self, reason: CloseReason);
}

/// Periodic keep-alive frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Heartbeat {
    pub period: Duration,
    pub frame: String,
}

/// Per-socket behavior.
#[derive(Clone, Debug)]
pub struct SocketOptions {
    pub reconnect: ReconnectPolicy,
    pub heartbeat: Option<Heartbeat>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct SocketStatus {
    state: SocketState,
    opens: u64,
    terminated: bool,
}

#[derive(Debug)]
enum SocketCommand {
    Send(String),
    Reconnect,
    Shutdown,
}

/// Handle to a running socket worker. Cloning shares the same worker.
#[derive(Clone, Debug)]
pub struct SocketHandle {
    url: String,
    commands: mpsc::UnboundedSender<SocketCommand>,
    status: watch::Receiver<SocketStatus>,
    stopped: Arc<AtomicBool>,
}

/// A socket whose worker has not been started yet.
///
/// Frames queued on the handle before [`PendingSocket::start`] are flushed on
/// the first open.
pub struct PendingSocket {
    worker: SocketWorker,
    commands: mpsc::UnboundedReceiver<SocketCommand>,
}

impl PendingSocket {
    /// Spawns the worker on the current Tokio runtime.
    ///
    /// Outside a runtime the socket terminates immediately.
    pub fn start(self) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(self.worker.run(self.commands));
            }
            Err(_) => {
                debug!(event = "socket_spawn_skipped", url = %redact(&self.worker.url));
                self.worker.stopped.store(true, Ordering::SeqCst);
                self.worker.finish();
            }
        }
    }
}

impl SocketHandle {
    /// Spawns a worker for `url` on the current Tokio runtime.
    pub fn spawn(
        url: String,
        connector: Arc<dyn Connector>,
        options: SocketOptions,
        listener: Arc<dyn SocketListener>,
    ) -> Self {
        let (handle, pending) = Self::new(url, connector, options, listener);
        pending.start();
        handle
    }

    /// Builds a handle and its not-yet-running worker.
    pub fn new(
        url: String,
        connector: Arc<dyn Connector>,
        options: SocketOptions,
        listener: Arc<dyn SocketListener>,
    ) -> (Self, PendingSocket) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SocketStatus {
            state: SocketState::Connecting,
            opens: 0,
            terminated: false,
        });
        let stopped = Arc::new(AtomicBool::new(false));

        let worker = SocketWorker {
            url: url.clone(),
            connector,
            options,
            listener,
            status: status_tx,
            stopped: Arc::clone(&stopped),
        };

        let handle = Self {
            url,
            commands: commands_tx,
            status: status_rx,
            stopped,
        };
        let pending = PendingSocket {
            worker,
            commands: commands_rx,
        };
        (handle, pending)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> SocketState {
        self.status.borrow().state
    }

    /// True once the worker stopped for good (closed or retries exhausted).
    pub fn is_terminated(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.status.borrow().terminated
    }

    /// Stops the worker and suppresses any further notifications.
    ///
    /// Returns `true` only for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.commands.send(SocketCommand::Shutdown);
        !self.status.borrow().terminated
    }

    /// Queues a text frame; it is written now if open, or on the next open.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        if self.is_terminated() {
            return Err(TransportError::Closed);
        }
        self.commands
            .send(SocketCommand::Send(text.into()))
            .map_err(|_| TransportError::Closed)
    }

    /// Drops the current connection, re-dials the same URL, and resolves on
    /// the next open.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        let mut status = self.status.clone();
        let opens = status.borrow_and_update().opens;
        if self.is_terminated() {
            return Err(TransportError::Closed);
        }
        self.commands
            .send(SocketCommand::Reconnect)
            .map_err(|_| TransportError::Closed)?;
        wait_for(&mut status, |status| status.opens > opens).await
    }

    /// Resolves once the socket is open.
    pub async fn wait_open(&self) -> Result<(), TransportError> {
        let mut status = self.status.clone();
        wait_for(&mut status, |status| status.state == SocketState::Open).await
    }
}

async fn wait_for(
    status: &mut watch::Receiver<SocketStatus>,
    mut ready: impl FnMut(&SocketStatus) -> bool,
) -> Result<(), TransportError> {
    loop {
        {
            let current = status.borrow_and_update();
            if ready(&current) {
                return Ok(());
            }
            if current.terminated {
                return Err(TransportError::Closed);
            }
        }
        if status.changed().await.is_err() {
            return Err(TransportError::Closed);
        }
    }
}

enum SessionOutcome {
    /// Connection lost; back off and dial again.
    Retry,
    /// Reconnect requested; dial again immediately.
    ReconnectNow,
    Shutdown,
}

enum RetryWait {
    Elapsed,
    Reconnect,
    Shutdown,
}

struct SocketWorker {
    url: String,
    connector: Arc<dyn Connector>,
    options: SocketOptions,
    listener: Arc<dyn SocketListener>,
    status: watch::Sender<SocketStatus>,
    stopped: Arc<AtomicBool>,
}

impl SocketWorker {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<SocketCommand>) {
        let mut pending = VecDeque::new();
        let mut failures = 0usize;
        let policy = self.options.reconnect.clone();

        loop {
            if self.is_stopped() {
                break;
            }

            self.set_state(SocketState::Connecting);
            debug!(event = "socket_connect_attempt", url = %redact(&self.url), failures);

            let connected =
                with_timeout(policy.connection_timeout, self.connector.connect(&self.url)).await;
            let outcome = match connected {
                Ok(Ok(mut connection)) => {
                    failures = 0;
                    if self.is_stopped() {
                        let _ = connection.sink.close().await;
                        break;
                    }
                    self.mark_open();
                    self.run_session(connection, &mut commands, &mut pending)
                        .await
                }
                Ok(Err(error)) => {
                    self.report_error(error);
                    SessionOutcome::Retry
                }
                Err(_) => {
                    self.report_error(TransportError::Timeout);
                    SessionOutcome::Retry
                }
            };

            match outcome {
                SessionOutcome::Shutdown => break,
                SessionOutcome::ReconnectNow => {
                    failures = 0;
                    continue;
                }
                SessionOutcome::Retry => {}
            }

            self.set_state(SocketState::Closed);
            failures += 1;
            if policy.is_exhausted(failures) {
                debug!(
                    event = "socket_retries_exhausted",
                    url = %redact(&self.url),
                    failures,
                    max_retries = policy.max_retries
                );
                if !self.stopped.swap(true, Ordering::SeqCst) {
                    self.status.send_modify(|status| status.terminated = true);
                    self.listener.on_close(CloseReason::RetriesExhausted);
                }
                break;
            }

            let delay = policy.delay_for_attempt(failures);
            debug!(
                event = "socket_reconnect_scheduled",
                url = %redact(&self.url),
                failures,
                delay_ms = delay.as_millis() as u64
            );
            match wait_for_retry(delay, &mut commands, &mut pending).await {
                RetryWait::Elapsed => {}
                RetryWait::Reconnect => failures = 0,
                RetryWait::Shutdown => break,
            }
        }

        self.finish();
    }

    async fn run_session(
        &self,
        connection: Connection,
        commands: &mut mpsc::UnboundedReceiver<SocketCommand>,
        pending: &mut VecDeque<String>,
    ) -> SessionOutcome {
        let Connection {
            mut sink,
            mut stream,
        } = connection;

        while let Some(frame) = pending.pop_front() {
            if let Err(error) = sink.send(frame.clone()).await {
                pending.push_front(frame);
                self.report_error(error);
                return SessionOutcome::Retry;
            }
        }

        let mut heartbeat = self.options.heartbeat.as_ref().map(|heartbeat| {
            let mut ticks = interval_at(Instant::now() + heartbeat.period, heartbeat.period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            (ticks, heartbeat.frame.clone())
        });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SocketCommand::Send(frame)) => {
                        if let Err(error) = sink.send(frame.clone()).await {
                            pending.push_front(frame);
                            self.report_error(error);
                            return SessionOutcome::Retry;
                        }
                    }
                    Some(SocketCommand::Reconnect) => {
                        let _ = sink.close().await;
                        self.set_state(SocketState::Closed);
                        self.report_close(CloseReason::Requested);
                        return SessionOutcome::ReconnectNow;
                    }
                    Some(SocketCommand::Shutdown) | None => {
                        let _ = sink.close().await;
                        return SessionOutcome::Shutdown;
                    }
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(text)) => {
                        if self.is_stopped() {
                            continue;
                        }
                        trace!(event = "socket_frame_received", len = text.len());
                        self.listener.on_text(text);
                    }
                    Some(Err(error)) => {
                        self.report_error(error);
                        return SessionOutcome::Retry;
                    }
                    None => {
                        self.report_close(CloseReason::Remote);
                        return SessionOutcome::Retry;
                    }
                },
                _ = next_tick(heartbeat.as_mut().map(|(ticks, _)| ticks)) => {
                    if self.is_stopped() {
                        continue;
                    }
                    if let Some((_, frame)) = heartbeat.as_ref() {
                        trace!(event = "socket_heartbeat", url = %redact(&self.url));
                        if let Err(error) = sink.send(frame.clone()).await {
                            self.report_error(error);
                            return SessionOutcome::Retry;
                        }
                    }
                }
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SocketState) {
        self.status.send_modify(|status| status.state = state);
    }

    fn mark_open(&self) {
        self.status.send_modify(|status| {
            status.state = SocketState::Open;
            status.opens += 1;
        });
        debug!(event = "socket_open", url = %redact(&self.url));
        if !self.is_stopped() {
            self.listener.on_open();
        }
    }

    fn report_error(&self, error: TransportError) {
        debug!(event = "socket_error", url = %redact(&self.url), error = %error);
        if !self.is_stopped() {
            self.listener.on_error(error);
        }
    }

    fn report_close(&self, reason: CloseReason) {
        debug!(event = "socket_close", url = %redact(&self.url), reason = ?reason);
        if !self.is_stopped() {
            self.listener.on_close(reason);
        }
    }

    fn finish(&self) {
        self.status.send_modify(|status| {
            status.state = SocketState::Closed;
            status.terminated = true;
        });
    }
}

async fn next_tick(ticks: Option<&mut Interval>) {
    match ticks {
        Some(ticks) => {
            ticks.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn wait_for_retry(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<SocketCommand>,
    pending: &mut VecDeque<String>,
) -> RetryWait {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return RetryWait::Elapsed,
            command = commands.recv() => match command {
                Some(SocketCommand::Send(frame)) => pending.push_back(frame),
                Some(SocketCommand::Reconnect) => return RetryWait::Reconnect,
                Some(SocketCommand::Shutdown) | None => return RetryWait::Shutdown,
            }
        }
    }
}

/// Strips the query (and with it the API key) from a URL for logging.
pub(crate) fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
