//! Rust client for the alertad neighborhood alert server.
//!
//! ```ignore
//! let client = AlertaClient::connect(AlertaConfig::new(
//!     "ws://localhost:3000", "42", "7",
//! ));
//! let _sub = client.on_new_alarm(|alarm| println!("🚨 {}", alarm.mensaje));
//! ```
//!
//! Internally spawns a background tokio task that owns the WebSocket,
//! re-identifies to the server after every reconnect (the server forgets
//! room bindings on disconnect), and retries a bounded number of times
//! with a fixed delay before giving up for good.
//!
//! Listener registration is idempotent: registering a second handler for
//! the same event replaces the first, so a remounting UI component can
//! never receive the same server event twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// ═══════════════════════════════════════════════════════════════
// Public types
// ═══════════════════════════════════════════════════════════════

/// Client configuration.
#[derive(Debug, Clone)]
pub struct AlertaConfig {
    /// Server endpoint: ws://, wss://, http:// or https://.
    pub server_ep: String,
    /// Identity sent in the `identify` handshake.
    pub user_id: String,
    pub vecindario_id: String,
    /// Reconnection policy: bounded attempts with a fixed delay.
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl AlertaConfig {
    pub fn new(
        server_ep: impl Into<String>,
        user_id: impl Into<String>,
        vecindario_id: impl Into<String>,
    ) -> Self {
        Self {
            server_ep: server_ep.into(),
            user_id: user_id.into(),
            vecindario_id: vecindario_id.into(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Notification payload as delivered by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub mensaje: String,
    pub tipo: String,
    pub emisor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "vecindarioId")]
    pub vecindario_id: JsonValue,
    #[serde(default)]
    pub alarma: Option<AlarmSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlarmSummary {
    pub id: i64,
    pub tipo: String,
    pub descripcion: String,
    #[serde(rename = "fechaHora")]
    pub fecha_hora: DateTime<Utc>,
}

/// Connection lifecycle as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Retries exhausted — the client will not reconnect.
    Disconnected,
}

#[derive(Debug)]
pub enum AlertaError {
    /// Background task gone (shutdown or retries exhausted).
    ChannelClosed,
    Serialize(String),
}

impl std::fmt::Display for AlertaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelClosed => write!(f, "background task stopped"),
            Self::Serialize(e) => write!(f, "serialize error: {e}"),
        }
    }
}

impl std::error::Error for AlertaError {}

// ═══════════════════════════════════════════════════════════════
// Retry policy
// ═══════════════════════════════════════════════════════════════

/// Bounded fixed-delay retry schedule.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), or `None` once the
    /// budget is exhausted.
    fn delay_for(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.attempts).then_some(self.delay)
    }
}

// ═══════════════════════════════════════════════════════════════
// Subscriptions
// ═══════════════════════════════════════════════════════════════

type Handler = Arc<dyn Fn(Notification) + Send + Sync>;

/// At most one handler per event name. Registering replaces any prior
/// handler for the same name; revoking a stale handle is a no-op.
#[derive(Default)]
struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<&'static str, (u64, Handler)>>,
}

impl HandlerRegistry {
    fn register(
        registry: &Arc<Self>,
        event: &'static str,
        handler: Handler,
    ) -> SubscriptionHandle {
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        // Clear any prior registration for this event before re-adding.
        registry.lock().insert(event, (id, handler));
        SubscriptionHandle {
            event,
            id,
            registry: Arc::downgrade(registry),
        }
    }

    fn revoke(&self, event: &'static str, id: u64) {
        let mut handlers = self.lock();
        if handlers.get(event).map(|(held, _)| *held) == Some(id) {
            handlers.remove(event);
        }
    }

    fn deliver(&self, event: &str, payload: Notification) {
        let handler = self.lock().get(event).map(|(_, h)| Arc::clone(h));
        if let Some(handler) = handler {
            handler(payload);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, (u64, Handler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returned by `on_notification` / `on_new_alarm`. Dropping the handle
/// does not unsubscribe; call [`SubscriptionHandle::revoke`].
pub struct SubscriptionHandle {
    event: &'static str,
    id: u64,
    registry: std::sync::Weak<HandlerRegistry>,
}

impl SubscriptionHandle {
    /// Remove the handler, unless a newer registration replaced it.
    pub fn revoke(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.revoke(self.event, self.id);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════

const EVENT_NOTIFICATION: &str = "notification";
const EVENT_NEW_ALARM: &str = "newAlarm";

enum Outbound {
    GenericNotification {
        sala: String,
        mensaje: String,
        tipo: Option<String>,
        emisor: Option<String>,
    },
    Shutdown,
}

pub struct AlertaClient {
    config: AlertaConfig,
    tx: mpsc::Sender<Outbound>,
    status: Arc<AtomicU8>,
    registry: Arc<HandlerRegistry>,
}

impl AlertaClient {
    /// Spawn the background connection task and return immediately. The
    /// `identify` handshake is sent after every (re)connect.
    pub fn connect(config: AlertaConfig) -> Self {
        let status = Arc::new(AtomicU8::new(ConnectionStatus::Connecting as u8));
        let registry = Arc::new(HandlerRegistry::default());
        let (tx, rx) = mpsc::channel::<Outbound>(256);

        let bg_config = config.clone();
        let bg_status = Arc::clone(&status);
        let bg_registry = Arc::clone(&registry);
        tokio::spawn(async move {
            ws_task(bg_config, rx, bg_status, bg_registry).await;
        });

        Self {
            config,
            tx,
            status,
            registry,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match self.status.load(Ordering::Relaxed) {
            x if x == ConnectionStatus::Connected as u8 => ConnectionStatus::Connected,
            x if x == ConnectionStatus::Disconnected as u8 => ConnectionStatus::Disconnected,
            _ => ConnectionStatus::Connecting,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn config(&self) -> &AlertaConfig {
        &self.config
    }

    /// Subscribe to generic notices. Replaces any previous notification
    /// handler — at most one fires per server event.
    pub fn on_notification<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        HandlerRegistry::register(&self.registry, EVENT_NOTIFICATION, Arc::new(handler))
    }

    /// Subscribe to alarm broadcasts. Same replacement semantics.
    pub fn on_new_alarm<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        HandlerRegistry::register(&self.registry, EVENT_NEW_ALARM, Arc::new(handler))
    }

    /// Broadcast a generic notice to a neighborhood room. Fire-and-forget
    /// while disconnected: the frame is dropped, matching the server's
    /// best-effort delivery model.
    pub async fn send_notification(
        &self,
        sala: impl Into<String>,
        mensaje: impl Into<String>,
        tipo: Option<String>,
        emisor: Option<String>,
    ) -> Result<(), AlertaError> {
        self.tx
            .send(Outbound::GenericNotification {
                sala: sala.into(),
                mensaje: mensaje.into(),
                tipo,
                emisor,
            })
            .await
            .map_err(|_| AlertaError::ChannelClosed)
    }

    /// Close the connection and stop the background task.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Outbound::Shutdown).await;
        // Give the background task a moment to close the socket.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ═══════════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum WireOut<'a> {
    #[serde(rename_all = "camelCase")]
    Identify {
        user_id: &'a str,
        vecindario_id: &'a str,
    },
    SendGenericNotification {
        sala: &'a str,
        mensaje: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        tipo: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        emisor: Option<&'a str>,
    },
}

/// Convert a server endpoint to a ws:// URL with the /ws path.
fn normalize_ws_url(ep: &str) -> String {
    let url = ep
        .replace("https://", "wss://")
        .replace("http://", "ws://");
    if !url.contains("/ws") {
        format!("{}/ws", url.trim_end_matches('/'))
    } else {
        url
    }
}

// ═══════════════════════════════════════════════════════════════
// Background WebSocket task
// ═══════════════════════════════════════════════════════════════

async fn ws_task(
    config: AlertaConfig,
    mut rx: mpsc::Receiver<Outbound>,
    status: Arc<AtomicU8>,
    registry: Arc<HandlerRegistry>,
) {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let ws_url = normalize_ws_url(&config.server_ep);
    let policy = RetryPolicy {
        attempts: config.reconnect_attempts,
        delay: config.reconnect_delay,
    };
    let mut attempt: u32 = 0;

    loop {
        // ── Connect ─────────────────────────────────────────
        status.store(ConnectionStatus::Connecting as u8, Ordering::Relaxed);
        let ws_stream = match tokio_tungstenite::connect_async(&ws_url).await {
            Ok((stream, _)) => {
                info!(url = %ws_url, "WebSocket connected");
                attempt = 0;
                stream
            }
            Err(e) => {
                warn!(url = %ws_url, attempt, "WebSocket connect failed: {e}");
                match policy.delay_for(attempt) {
                    Some(delay) => {
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => {
                        warn!("reconnect attempts exhausted, giving up");
                        status.store(ConnectionStatus::Disconnected as u8, Ordering::Relaxed);
                        return;
                    }
                }
            }
        };

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        // ── Identify ────────────────────────────────────────
        // The server forgets bindings across disconnects, so this runs
        // on every connect, not just the first.
        let identify = WireOut::Identify {
            user_id: &config.user_id,
            vecindario_id: &config.vecindario_id,
        };
        let json = match serde_json::to_string(&identify) {
            Ok(j) => j,
            Err(e) => {
                warn!("identify serialize error: {e}");
                status.store(ConnectionStatus::Disconnected as u8, Ordering::Relaxed);
                return;
            }
        };
        if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
            warn!("failed to send identify: {e}");
            match policy.delay_for(attempt) {
                Some(delay) => {
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    continue;
                }
                None => {
                    status.store(ConnectionStatus::Disconnected as u8, Ordering::Relaxed);
                    return;
                }
            }
        }

        status.store(ConnectionStatus::Connected as u8, Ordering::Relaxed);
        debug!(user_id = %config.user_id, vecindario_id = %config.vecindario_id, "identified");

        // ── Message loop ────────────────────────────────────
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(Outbound::GenericNotification { sala, mensaje, tipo, emisor }) => {
                            let wire = WireOut::SendGenericNotification {
                                sala: &sala,
                                mensaje: &mensaje,
                                tipo: tipo.as_deref(),
                                emisor: emisor.as_deref(),
                            };
                            let json = match serde_json::to_string(&wire) {
                                Ok(j) => j,
                                Err(e) => {
                                    warn!("serialize error: {e}");
                                    continue;
                                }
                            };
                            if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                                warn!("send error: {e}");
                                break; // reconnect
                            }
                        }
                        Some(Outbound::Shutdown) | None => {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            status.store(ConnectionStatus::Disconnected as u8, Ordering::Relaxed);
                            return;
                        }
                    }
                }
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            handle_server_frame(&text, &registry);
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("server closed connection");
                            break; // reconnect
                        }
                        Some(Ok(_)) => {} // ping/pong/binary
                        Some(Err(e)) => {
                            warn!("ws recv error: {e}");
                            break; // reconnect
                        }
                        None => {
                            info!("ws stream ended");
                            break; // reconnect
                        }
                    }
                }
            }
        }

        // Connection lost — retry within budget.
        status.store(ConnectionStatus::Connecting as u8, Ordering::Relaxed);
        match policy.delay_for(attempt) {
            Some(delay) => {
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            None => {
                warn!("reconnect attempts exhausted, giving up");
                status.store(ConnectionStatus::Disconnected as u8, Ordering::Relaxed);
                return;
            }
        }
    }
}

/// Route one inbound frame by its `event` tag. Events the client does
/// not handle (`update-clients`, `roomMembers`) are ignored.
fn handle_server_frame(text: &str, registry: &HandlerRegistry) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!("unparsed server frame: {e}");
            return;
        }
    };
    match value.get("event").and_then(|e| e.as_str()) {
        Some(EVENT_NOTIFICATION) => deliver_parsed(EVENT_NOTIFICATION, value, registry),
        Some(EVENT_NEW_ALARM) => deliver_parsed(EVENT_NEW_ALARM, value, registry),
        Some("error") => {
            let code = value["code"].as_str().unwrap_or("unknown");
            let message = value["message"].as_str().unwrap_or("");
            warn!(code, "server error: {message}");
        }
        _ => {}
    }
}

fn deliver_parsed(event: &'static str, value: serde_json::Value, registry: &HandlerRegistry) {
    match serde_json::from_value::<Notification>(value) {
        Ok(payload) => registry.deliver(event, payload),
        Err(e) => debug!("malformed payload: {e}"),
    }
}

// ═══════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════
