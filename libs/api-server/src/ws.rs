use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use record_service::ErrorEntry;
use service_api::{ServiceError, SubscriptionId, TopicSubscriber, TopicSubscription};

use super::AppState;

/// Subprotocol acknowledged on upgrade.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Close frame payload is capped at 125 bytes, two of which are the code.
const MAX_CLOSE_REASON: usize = 123;

/// Close codes sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Server shutdown.
    GoingAway = 1001,
    /// Frame is not a valid protocol message.
    BadRequest = 4400,
    /// `subscribe` before `connection_ack`.
    Unauthorized = 4401,
    InitTimeout = 4408,
    /// `subscribe` with an id that is still active.
    DuplicateSubscriber = 4409,
    TooManyInits = 4429,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        self as u16
    }
}

// ═══════════════════════════════════════════════════════════════
//  Protocol types
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    ConnectionInit {
        #[serde(default)]
        payload: Option<Value>,
    },
    Subscribe {
        id: String,
        payload: Value,
    },
    Complete {
        id: String,
    },
    Ping {
        #[serde(default)]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default)]
        payload: Option<Value>,
    },
}

/// Just enough of a frame to tell which operation a malformed `subscribe`
/// belongs to.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

fn subscribe_id(text: &str) -> Option<String> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;
    (envelope.kind == "subscribe").then_some(envelope.id)
}

fn close_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

/// Payload of `subscribe`: which subscription field to follow.
#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    #[serde(alias = "operationName")]
    field: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    ConnectionAck,
    Next {
        id: &'a str,
        payload: &'a Value,
    },
    Error {
        id: &'a str,
        payload: Vec<ErrorEntry>,
    },
    Complete {
        id: &'a str,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

/// Сообщение из forwarding task → WS writer.
enum Relay {
    Next {
        id: String,
        registration: SubscriptionId,
        payload: Value,
    },
    /// Registry закончил подписку (закрыт или регистрация снята).
    Ended {
        id: String,
        registration: SubscriptionId,
    },
}

// ═══════════════════════════════════════════════════════════════
//  Connection
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Open,
    Closing,
    Closed,
}

enum Flow {
    Continue,
    Close(CloseCode, String),
    /// Peer closed or the socket failed; nothing more can be sent.
    Disconnected,
}

struct ActiveSubscription {
    topic: String,
    registration: SubscriptionId,
    forwarder: JoinHandle<()>,
}

impl ActiveSubscription {
    fn release(self, subscriber: &dyn TopicSubscriber) {
        subscriber.unsubscribe(&self.topic, self.registration);
        self.forwarder.abort();
    }
}

pub(crate) fn accept(upgrade: WebSocketUpgrade, state: AppState) -> Response {
    let conn = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
    upgrade.protocols([SUBPROTOCOL]).on_upgrade(move |socket| {
        Connection::new(socket, state)
            .run()
            .instrument(tracing::debug_span!("ws", conn))
    })
}

struct Connection {
    socket: WebSocket,
    state: AppState,
    phase: Phase,
    /// Client operation id → registration.
    active: HashMap<String, ActiveSubscription>,
}

impl Connection {
    fn new(socket: WebSocket, state: AppState) -> Self {
        Self { socket, state, phase: Phase::Connecting, active: HashMap::new() }
    }

    async fn run(mut self) {
        tracing::debug!("websocket connected");

        let (relay_tx, mut relay_rx) = mpsc::channel::<Relay>(self.state.settings.ws_buffer.max(1));
        let shutdown = self.state.shutdown.clone();
        let init_deadline = tokio::time::sleep(self.state.settings.init_timeout);
        tokio::pin!(init_deadline);

        let exit = loop {
            let flow = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    Flow::Close(CloseCode::GoingAway, "Server shutting down".to_string())
                }

                _ = &mut init_deadline, if self.phase == Phase::Connecting => {
                    Flow::Close(CloseCode::InitTimeout, "Connection initialisation timeout".to_string())
                }

                msg = self.socket.recv() => match msg {
                    Some(Ok(msg)) => self.on_message(msg, &relay_tx).await,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket receive failed");
                        Flow::Disconnected
                    }
                    None => Flow::Disconnected,
                },

                Some(relay) = relay_rx.recv() => self.on_relay(relay).await,
            };

            match flow {
                Flow::Continue => continue,
                exit => break exit,
            }
        };

        self.finish(exit).await;
    }

    async fn on_message(&mut self, msg: Message, relay: &mpsc::Sender<Relay>) -> Flow {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => return Flow::Disconnected,
            Message::Ping(_) | Message::Pong(_) => return Flow::Continue,
            Message::Binary(_) => {
                return self.reject_frame(ServiceError::transport("Binary frames are not supported"));
            }
        };

        let message: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => match subscribe_id(&text) {
                // only this operation fails; the payload check below reports it
                Some(id) => {
                    tracing::debug!(%id, error = %e, "malformed subscribe");
                    ClientMessage::Subscribe { id, payload: Value::Null }
                }
                None => {
                    return self.reject_frame(ServiceError::transport(format!("Invalid message received: {e}")));
                }
            },
        };

        match message {
            ClientMessage::ConnectionInit { payload } => {
                if self.phase != Phase::Connecting {
                    return Flow::Close(CloseCode::TooManyInits, "Too many initialisation requests".to_string());
                }
                tracing::debug!(has_payload = payload.is_some(), "connection initialised");
                self.phase = Phase::Open;
                self.send(&ServerMessage::ConnectionAck).await
            }
            ClientMessage::Subscribe { id, payload } => {
                if self.phase != Phase::Open {
                    return Flow::Close(CloseCode::Unauthorized, "Unauthorized".to_string());
                }
                self.subscribe(id, payload, relay).await
            }
            ClientMessage::Complete { id } => {
                if let Some(sub) = self.active.remove(&id) {
                    tracing::debug!(%id, registration = %sub.registration, "subscription completed by client");
                    sub.release(self.state.subscriber.as_ref());
                }
                Flow::Continue
            }
            ClientMessage::Ping { payload } => self.send(&ServerMessage::Pong { payload }).await,
            ClientMessage::Pong { payload } => {
                tracing::trace!(?payload, "pong");
                Flow::Continue
            }
        }
    }

    async fn subscribe(&mut self, id: String, payload: Value, relay: &mpsc::Sender<Relay>) -> Flow {
        if self.active.contains_key(&id) {
            return Flow::Close(CloseCode::DuplicateSubscriber, format!("Subscriber for {id} already exists"));
        }

        let request: SubscribeRequest = match serde_json::from_value(payload) {
            Ok(r) => r,
            Err(e) => {
                let err = ServiceError::validation(format!("invalid subscribe payload: {e}"));
                return self.send_error(&id, &err).await;
            }
        };

        let Some(field) = self.state.router.subscription(&request.field).cloned() else {
            let err = ServiceError::validation(format!(
                "Cannot query field \"{}\" on type \"Subscription\"",
                request.field
            ));
            return self.send_error(&id, &err).await;
        };

        let settings = self.state.settings;
        let subscription = self.state.subscriber.subscribe(&field.topic, settings.ws_buffer, settings.ws_overflow);
        let registration = subscription.id();
        let forwarder = tokio::spawn(
            forward(subscription, id.clone(), field.name, relay.clone()).in_current_span(),
        );

        tracing::debug!(%id, topic = %field.topic, %registration, "subscription started");
        self.active.insert(id, ActiveSubscription { topic: field.topic, registration, forwarder });
        Flow::Continue
    }

    async fn on_relay(&mut self, relay: Relay) -> Flow {
        match relay {
            Relay::Next { id, registration, payload } => {
                if !self.is_current(&id, registration) {
                    return Flow::Continue;
                }
                self.send(&ServerMessage::Next { id: &id, payload: &payload }).await
            }
            Relay::Ended { id, registration } => {
                if !self.is_current(&id, registration) {
                    return Flow::Continue;
                }
                self.active.remove(&id);
                tracing::debug!(%id, %registration, "subscription ended by registry");
                self.send(&ServerMessage::Complete { id: &id }).await
            }
        }
    }

    /// Events of a completed registration may still sit in the relay
    /// channel; the id could even be reused by a newer registration.
    fn is_current(&self, id: &str, registration: SubscriptionId) -> bool {
        self.active.get(id).is_some_and(|s| s.registration == registration)
    }

    fn reject_frame(&self, err: ServiceError) -> Flow {
        tracing::debug!(kind = %err.kind(), error = %err, "invalid frame");
        Flow::Close(CloseCode::BadRequest, err.message().to_string())
    }

    async fn send_error(&mut self, id: &str, err: &ServiceError) -> Flow {
        tracing::debug!(%id, kind = %err.kind(), error = %err, "subscribe rejected");
        self.send(&ServerMessage::Error { id, payload: vec![ErrorEntry::new(err, None)] }).await
    }

    async fn send(&mut self, message: &ServerMessage<'_>) -> Flow {
        let text = match serde_json::to_string(message) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode server message");
                return Flow::Continue;
            }
        };
        match self.socket.send(Message::Text(text.into())).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                tracing::debug!(error = %e, "websocket send failed");
                Flow::Disconnected
            }
        }
    }

    async fn finish(mut self, exit: Flow) {
        self.phase = Phase::Closing;

        let released = self.active.len();
        for (_, sub) in self.active.drain() {
            sub.release(self.state.subscriber.as_ref());
        }

        if let Flow::Close(code, reason) = exit {
            tracing::debug!(code = code.code(), %reason, "closing websocket");
            let frame = CloseFrame { code: code.code(), reason: close_reason(reason).into() };
            let _ = self.socket.send(Message::Close(Some(frame))).await;
        }

        self.phase = Phase::Closed;
        tracing::debug!(released, phase = ?self.phase, "websocket closed");
    }
}

/// Relay registry events of one registration into the connection.
async fn forward(
    mut subscription: Box<dyn TopicSubscription>,
    id: String,
    field: String,
    relay: mpsc::Sender<Relay>,
) {
    let registration = subscription.id();

    while let Some(event) = subscription.recv().await {
        let mut data = Map::new();
        data.insert(field.clone(), event.value);
        let mut payload = Map::new();
        payload.insert("data".to_string(), Value::Object(data));

        let next = Relay::Next { id: id.clone(), registration, payload: Value::Object(payload) };
        if relay.send(next).await.is_err() {
            return;
        }
    }

    let _ = relay.send(Relay::Ended { id, registration }).await;
}
