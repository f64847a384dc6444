//! WebSocket client for one ASR streaming session.
//!
//! [`AsrStreamClient`] is bound to one engine and its configuration.  Calling
//! [`connect`](AsrClient::connect) spawns a pump task that opens the socket,
//! sends the `ENGINE_START` handshake and then shuttles frames both ways:
//!
//! ```text
//! AsrSender::send ──▶ outbound queue ──▶ socket        (FIFO)
//! socket ──▶ InboundAction::decode ──▶ ClientEvent ──▶ events channel
//! ```
//!
//! Nothing here reconnects on its own.  After an error the owner tears the
//! session down; a fresh `connect()` is the only way back.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use crate::asr::protocol::{InboundAction, OutboundAction, ProtocolError};
use crate::catalog::EngineSettings;

// ---------------------------------------------------------------------------
// ClientEvent
// ---------------------------------------------------------------------------

/// Everything the client reports to its owner, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Socket open and handshake sent.
    Open,
    /// A decoded inbound frame.
    Message(InboundAction),
    /// The socket closed (either side).
    Closed,
    /// Transport failure; the connection is gone.
    Error(String),
}

// ---------------------------------------------------------------------------
// ConnectionState / AsrSender
// ---------------------------------------------------------------------------

/// Lifecycle of the underlying socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

#[derive(Debug)]
struct Link {
    /// Bumped on every connect/disconnect so a finished pump task cannot
    /// overwrite the state of a newer connection.
    epoch: u64,
    state: ConnectionState,
}

type SharedLink = Arc<Mutex<Link>>;

fn lock(link: &SharedLink) -> std::sync::MutexGuard<'_, Link> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle that queues outbound frames.
///
/// Safe to call from any thread, including the audio callback.  Frames sent
/// while the socket is not open are dropped.
#[derive(Debug, Clone)]
pub struct AsrSender {
    tx: mpsc::UnboundedSender<OutboundAction>,
    link: SharedLink,
}

impl AsrSender {
    /// A closed sender and the queue it feeds.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Mutex::new(Link {
            epoch: 0,
            state: ConnectionState::Closed,
        }));
        (Self { tx, link }, rx)
    }

    /// Queue `action`.  Returns `false` when it was dropped.
    pub fn send(&self, action: OutboundAction) -> bool {
        if self.state() != ConnectionState::Open {
            log::debug!("asr: socket not open, dropping {}", action.name());
            return false;
        }
        self.tx.send(action).is_ok()
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.link).state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Force the connection state.  Used by transports and test doubles.
    pub fn set_state(&self, state: ConnectionState) {
        lock(&self.link).state = state;
    }

    /// Move `Closed → Connecting` and return the new epoch, or `None` when a
    /// connection is already in flight.
    fn begin_connect(&self) -> Option<u64> {
        let mut link = lock(&self.link);
        if link.state != ConnectionState::Closed {
            return None;
        }
        link.epoch += 1;
        link.state = ConnectionState::Connecting;
        Some(link.epoch)
    }

    /// Set `state` only if `epoch` is still the current connection.
    fn set_state_for(&self, epoch: u64, state: ConnectionState) -> bool {
        let mut link = lock(&self.link);
        if link.epoch != epoch {
            return false;
        }
        link.state = state;
        true
    }

    /// Close and invalidate the current epoch.  Returns the previous state.
    fn invalidate(&self) -> ConnectionState {
        let mut link = lock(&self.link);
        link.epoch += 1;
        std::mem::replace(&mut link.state, ConnectionState::Closed)
    }
}

// ---------------------------------------------------------------------------
// AsrClient trait
// ---------------------------------------------------------------------------

/// Connection-level contract of an ASR stream client.
pub trait AsrClient: Send {
    /// Open the socket.  Returns immediately; the outcome arrives as
    /// `ClientEvent::Open` or `ClientEvent::Error`.  No-op while connecting
    /// or open.
    fn connect(&mut self);

    /// Handle for queuing outbound frames from other threads.
    fn sender(&self) -> AsrSender;

    /// Queue one frame; dropped with a debug log when the socket is not open.
    fn send_message(&self, action: OutboundAction) {
        self.sender().send(action);
    }

    fn is_open(&self) -> bool {
        self.sender().is_open()
    }

    /// Close the socket.  Idempotent.
    fn disconnect(&mut self);
}

/// Creates one client per listening session.
pub trait AsrClientFactory: Send + Sync {
    fn create(
        &self,
        engine: &str,
        config: &EngineSettings,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Box<dyn AsrClient>;
}

// ---------------------------------------------------------------------------
// AsrStreamClient
// ---------------------------------------------------------------------------

/// tokio-tungstenite implementation of [`AsrClient`].
pub struct AsrStreamClient {
    url: String,
    engine: String,
    config: EngineSettings,
    ping_interval: Option<Duration>,
    events: mpsc::UnboundedSender<ClientEvent>,
    sender: AsrSender,
    outbound: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<OutboundAction>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl AsrStreamClient {
    pub fn new(
        url: impl Into<String>,
        engine: impl Into<String>,
        config: EngineSettings,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let (sender, outbound) = AsrSender::channel();
        Self {
            url: url.into(),
            engine: engine.into(),
            config,
            ping_interval: None,
            events,
            sender,
            outbound: Arc::new(tokio::sync::Mutex::new(outbound)),
            shutdown: None,
        }
    }

    /// Send a keep-alive `PING` every `interval` while open.
    pub fn with_ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }

}

impl AsrClient for AsrStreamClient {
    fn connect(&mut self) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self.events.send(ClientEvent::Error(format!("no async runtime: {e}")));
                return;
            }
        };

        let Some(epoch) = self.sender.begin_connect() else {
            log::debug!("asr: connect ignored, connection already in flight");
            return;
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown = Some(shutdown_tx);

        log::info!("asr: connecting to {} (engine {})", self.url, self.engine);
        handle.spawn(pump(
            PumpContext {
                url: self.url.clone(),
                start: OutboundAction::engine_start(&self.engine, &self.config),
                ping_interval: self.ping_interval,
                epoch,
                sender: self.sender.clone(),
                outbound: Arc::clone(&self.outbound),
                events: self.events.clone(),
            },
            shutdown_rx,
        ));
    }

    fn sender(&self) -> AsrSender {
        self.sender.clone()
    }

    fn disconnect(&mut self) {
        let previous = self.sender.invalidate();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            log::info!("asr: disconnecting ({previous:?})");
        }
    }
}

impl Drop for AsrStreamClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Builds [`AsrStreamClient`]s pointed at one endpoint.
#[derive(Debug, Clone)]
pub struct AsrStreamClientFactory {
    url: String,
    ping_interval: Option<Duration>,
}

impl AsrStreamClientFactory {
    pub fn new(url: impl Into<String>, ping_interval: Option<Duration>) -> Self {
        Self {
            url: url.into(),
            ping_interval,
        }
    }
}

impl AsrClientFactory for AsrStreamClientFactory {
    fn create(
        &self,
        engine: &str,
        config: &EngineSettings,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Box<dyn AsrClient> {
        Box::new(
            AsrStreamClient::new(self.url.clone(), engine, config.clone(), events)
                .with_ping_interval(self.ping_interval),
        )
    }
}

// ---------------------------------------------------------------------------
// Pump task
// ---------------------------------------------------------------------------

struct PumpContext {
    url: String,
    start: OutboundAction,
    ping_interval: Option<Duration>,
    epoch: u64,
    sender: AsrSender,
    outbound: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<OutboundAction>>>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl PumpContext {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Report the end of this connection unless a newer one replaced it.
    fn finish(&self, error: Option<String>) {
        self.sender.set_state_for(self.epoch, ConnectionState::Closed);
        match error {
            Some(e) => {
                log::warn!("asr: connection error: {e}");
                self.emit(ClientEvent::Error(e));
            }
            None => {
                log::info!("asr: connection closed");
                self.emit(ClientEvent::Closed);
            }
        }
    }
}

async fn pump(ctx: PumpContext, mut shutdown: oneshot::Receiver<()>) {
    let connected = tokio::select! {
        res = tokio_tungstenite::connect_async(ctx.url.as_str()) => res,
        _ = &mut shutdown => {
            log::debug!("asr: disconnected before the socket opened");
            ctx.sender.set_state_for(ctx.epoch, ConnectionState::Closed);
            return;
        }
    };

    let (ws, _response) = match connected {
        Ok(ok) => ok,
        Err(e) => return ctx.finish(Some(e.to_string())),
    };
    let (mut write, mut read) = ws.split();

    if let Err(e) = write.send(Message::Binary(ctx.start.encode())).await {
        return ctx.finish(Some(e.to_string()));
    }
    if !ctx.sender.set_state_for(ctx.epoch, ConnectionState::Open) {
        let _ = write.send(Message::Close(None)).await;
        return;
    }
    ctx.emit(ClientEvent::Open);

    let mut outbound = ctx.outbound.lock().await;
    let mut ping = ctx.ping_interval.map(|period| {
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    let error = loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                // Flush what the owner queued before asking to close (e.g. ENGINE_STOP).
                while let Ok(action) = outbound.try_recv() {
                    if write.send(Message::Binary(action.encode())).await.is_err() {
                        break;
                    }
                }
                let _ = write.send(Message::Close(None)).await;
                break None;
            }

            Some(action) = outbound.recv() => {
                log::trace!("asr: → {}", action.name());
                if let Err(e) = write.send(Message::Binary(action.encode())).await {
                    break Some(e.to_string());
                }
            }

            _ = next_tick(ping.as_mut()) => {
                if let Err(e) = write.send(Message::Binary(OutboundAction::Ping.encode())).await {
                    break Some(e.to_string());
                }
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Binary(frame))) => match InboundAction::decode(&frame) {
                    Ok(InboundAction::Pong) => log::trace!("asr: ← PONG"),
                    Ok(action) => {
                        log::debug!("asr: ← {}", action.name());
                        ctx.emit(ClientEvent::Message(action));
                    }
                    Err(e @ ProtocolError::UnknownAction(_)) => {
                        log::debug!("asr: skipping frame: {e}");
                    }
                    Err(e) => log::warn!("asr: dropping undecodable frame: {e}"),
                },
                Some(Ok(Message::Text(text))) => {
                    log::warn!("asr: ignoring text frame ({} bytes)", text.len());
                }
                Some(Ok(Message::Close(_))) | None => break None,
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
            },
        }
    };

    // Drain anything still queued for this connection so a later connect()
    // starts from an empty queue.
    while outbound.try_recv().is_ok() {}

    ctx.finish(error);
}

async fn next_tick(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
