//! services/client/src/engine/realtime.rs
//!
//! A reconnecting duplex channel for live itinerary updates.
//!
//! The channel owns at most one connection task and at most one pending reconnect
//! timer. Both are cancelled through `CancellationToken`s. Every connection task
//! carries the generation it was started for, so a close reported by a connection
//! that has since been replaced or disconnected is ignored.

use futures::StreamExt;
use personalization_core::{RealtimeConnection, RealtimeConnector};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::protocol::{ClientFrame, ServerEnvelope};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const MESSAGE_BUFFER: usize = 64;

//=========================================================================================
// Public State
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
    /// A reconnect is scheduled.
    Reconnecting,
    /// The reconnect budget is spent; only `reconnect()` recovers.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    pub status: ChannelStatus,
    pub connected: bool,
    pub reconnect_attempt: u32,
    pub last_message: Option<ServerEnvelope>,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            status: ChannelStatus::Disconnected,
            connected: false,
            reconnect_attempt: 0,
            last_message: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub token: String,
    pub base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            base_delay: DEFAULT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// `base_delay * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

//=========================================================================================
// Channel
//=========================================================================================

#[derive(Clone)]
pub struct RealtimeChannel {
    shared: Arc<Shared>,
}

struct Shared {
    config: ChannelConfig,
    connector: Arc<dyn RealtimeConnector>,
    state: watch::Sender<ChannelState>,
    messages: broadcast::Sender<ServerEnvelope>,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    /// Cleared by `disconnect`; a disabled channel never reconnects on its own.
    enabled: bool,
    generation: u64,
    connection: Option<CancellationToken>,
    reconnect_timer: Option<(u64, CancellationToken)>,
    timer_seq: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl RealtimeChannel {
    pub fn new(config: ChannelConfig, connector: Arc<dyn RealtimeConnector>) -> Self {
        let (state, _) = watch::channel(ChannelState::default());
        let (messages, _) = broadcast::channel(MESSAGE_BUFFER);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                state,
                messages,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Receives every well-formed envelope from now on.
    pub fn messages(&self) -> broadcast::Receiver<ServerEnvelope> {
        self.shared.messages.subscribe()
    }

    /// Opens the channel. Does nothing while a connection or reconnect is pending.
    pub fn connect(&self) {
        let mut control = self.shared.control();
        control.enabled = true;
        if control.connection.is_some() || control.reconnect_timer.is_some() {
            debug!("Realtime channel already connecting or connected.");
            return;
        }
        self.shared.start_connection(&mut control);
    }

    /// Resets the reconnect budget and connects immediately.
    pub fn reconnect(&self) {
        info!("Manual realtime reconnect requested.");
        let mut control = self.shared.control();
        control.cancel_pending();
        control.enabled = true;
        self.shared.state.send_modify(|s| s.reconnect_attempt = 0);
        self.shared.start_connection(&mut control);
    }

    /// Cancels any scheduled reconnect and closes the transport. Idempotent.
    pub fn disconnect(&self) {
        let mut control = self.shared.control();
        let was_enabled = control.enabled;
        control.enabled = false;
        control.cancel_pending();
        control.generation += 1;
        drop(control);

        self.shared.state.send_modify(|s| {
            s.status = ChannelStatus::Disconnected;
            s.connected = false;
        });
        if was_enabled {
            info!("Realtime channel disconnected.");
        }
    }

    /// Sends an application frame. Outside `Connected` this is a logged no-op;
    /// nothing is queued for later.
    pub fn send_message(&self, payload: &Value) -> bool {
        let control = self.shared.control();
        let connected = self.shared.state.borrow().status == ChannelStatus::Connected;
        let outbound = match (&control.outbound, connected) {
            (Some(outbound), true) => outbound,
            _ => {
                warn!("Realtime channel not connected, message dropped.");
                return false;
            }
        };
        match serde_json::to_string(payload) {
            Ok(text) => outbound.send(text).is_ok(),
            Err(e) => {
                warn!("Failed to serialize realtime message: {}", e);
                false
            }
        }
    }
}

impl Control {
    fn cancel_pending(&mut self) {
        if let Some((_, timer)) = self.reconnect_timer.take() {
            timer.cancel();
        }
        if let Some(connection) = self.connection.take() {
            connection.cancel();
        }
        self.outbound = None;
    }
}

//=========================================================================================
// Connection Lifecycle
//=========================================================================================

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_connection(self: &Arc<Self>, control: &mut Control) {
        control.generation += 1;
        let generation = control.generation;
        let cancel = CancellationToken::new();
        control.connection = Some(cancel.clone());

        self.state.send_modify(|s| {
            s.status = ChannelStatus::Connecting;
            s.connected = false;
        });

        let shared = self.clone();
        tokio::spawn(async move { shared.run_connection(generation, cancel).await });
    }

    async fn run_connection(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        debug!(generation, url = %self.config.url, "Opening realtime transport.");
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = self.connector.connect(&self.config.url) => opened,
        };
        let RealtimeConnection { mut sink, mut frames } = match opened {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Realtime connection failed: {}", e);
                self.on_closed(generation);
                return;
            }
        };

        let handshake = ClientFrame::Subscribe {
            token: self.config.token.clone(),
        };
        let handshake_sent = match serde_json::to_string(&handshake) {
            Ok(text) => sink.send_text(text).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = handshake_sent {
            warn!("Realtime subscribe handshake failed: {}", e);
            let _ = sink.close().await;
            self.on_closed(generation);
            return;
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        if !self.on_opened(generation, outbound_tx) {
            let _ = sink.close().await;
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return;
                }
                frame = frames.next() => match frame {
                    Some(Ok(text)) => self.on_frame(&text),
                    Some(Err(e)) => {
                        warn!("Realtime transport error: {}", e);
                        break;
                    }
                    None => {
                        info!("Realtime transport closed by server.");
                        break;
                    }
                },
                Some(text) = outbound_rx.recv() => {
                    if let Err(e) = sink.send_text(text).await {
                        warn!("Realtime send failed: {}", e);
                        break;
                    }
                }
            }
        }

        let _ = sink.close().await;
        self.on_closed(generation);
    }

    /// Returns `false` when this connection was superseded while opening.
    fn on_opened(&self, generation: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut control = self.control();
        if control.generation != generation || !control.enabled {
            return false;
        }
        control.outbound = Some(outbound);
        self.state.send_modify(|s| {
            s.status = ChannelStatus::Connected;
            s.connected = true;
            s.reconnect_attempt = 0;
        });
        info!("Realtime channel connected and subscribed.");
        true
    }

    fn on_frame(&self, text: &str) {
        match ServerEnvelope::parse(text) {
            Ok(envelope) => {
                debug!(kind = %envelope.kind, "Realtime message received.");
                self.state
                    .send_modify(|s| s.last_message = Some(envelope.clone()));
                // No receivers is fine.
                let _ = self.messages.send(envelope);
            }
            Err(e) => warn!("Dropping malformed realtime frame: {}", e),
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64) {
        let mut control = self.control();
        if control.generation != generation {
            return;
        }
        control.connection = None;
        control.outbound = None;

        if !control.enabled {
            self.state.send_modify(|s| {
                s.status = ChannelStatus::Disconnected;
                s.connected = false;
            });
            return;
        }
        if control.reconnect_timer.is_some() {
            return;
        }

        let attempt = self.state.borrow().reconnect_attempt;
        if attempt >= self.config.max_reconnect_attempts {
            warn!(attempt, "Realtime reconnect budget exhausted.");
            self.state.send_modify(|s| {
                s.status = ChannelStatus::Exhausted;
                s.connected = false;
            });
            return;
        }

        let delay = self.config.backoff(attempt);
        info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Scheduling realtime reconnect.");
        self.state.send_modify(|s| {
            s.status = ChannelStatus::Reconnecting;
            s.connected = false;
            s.reconnect_attempt = attempt + 1;
        });

        control.timer_seq += 1;
        let timer_id = control.timer_seq;
        let timer = CancellationToken::new();
        control.reconnect_timer = Some((timer_id, timer.clone()));

        let shared = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => shared.on_timer_fired(timer_id),
            }
        });
    }

    fn on_timer_fired(self: &Arc<Self>, timer_id: u64) {
        let mut control = self.control();
        match &control.reconnect_timer {
            Some((id, _)) if *id == timer_id => {}
            _ => return,
        }
        control.reconnect_timer = None;
        if control.enabled {
            self.start_connection(&mut control);
        }
    }
}
