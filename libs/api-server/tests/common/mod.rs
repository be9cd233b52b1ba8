#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use api_server::{ApiServerError, AppState, GatewaySettings, SUBPROTOCOL};
use record_service::{OperationRouter, RecordService, SubscriptionField};
use service_api::{Post, RecordStore, TopicPublisher, TopicSubscriber, User};
use store_memory::MemoryStore;
use topic_engine::TopicRegistry;

pub const TOPIC: &str = "POST_ADDED";

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<TopicRegistry>,
    pub router: Arc<OperationRouter>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<Result<(), ApiServerError>>,
}

/// Posts + users router, posts publishing creations to [`TOPIC`].
pub fn build(registry: &Arc<TopicRegistry>) -> Arc<OperationRouter> {
    let publisher: Arc<dyn TopicPublisher> = registry.clone();
    let posts: Arc<dyn RecordStore<Post>> = Arc::new(MemoryStore::<Post>::new());
    let users: Arc<dyn RecordStore<User>> = Arc::new(MemoryStore::<User>::new());

    let router = OperationRouter::new()
        .with_entity(Arc::new(RecordService::new(posts).with_creation_topic(publisher, TOPIC)))
        .with_entity(Arc::new(RecordService::new(users)))
        .with_subscription(SubscriptionField::new::<Post>("postAdded", TOPIC));
    Arc::new(router)
}

pub fn state(
    router: &Arc<OperationRouter>,
    registry: &Arc<TopicRegistry>,
    settings: GatewaySettings,
    shutdown: &CancellationToken,
) -> AppState {
    let subscriber: Arc<dyn TopicSubscriber> = registry.clone();
    AppState::new(router.clone(), subscriber, settings, shutdown.clone())
}

pub async fn spawn(settings: GatewaySettings) -> TestServer {
    let registry = Arc::new(TopicRegistry::new());
    let router = build(&registry);
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api_server::app(state(&router, &registry, settings, &shutdown), "/", "/graphql");
    let handle = tokio::spawn(api_server::serve("test", listener, app, shutdown.clone()));

    TestServer { addr, registry, router, shutdown, handle }
}

impl TestServer {
    pub async fn create_post(&self, title: &str) -> Value {
        self.router
            .execute("createPost", json!({ "title": title, "content": "body" }))
            .await
            .unwrap()
    }

    /// Subscribing is asynchronous on the server side; wait until the
    /// registry sees `n` registrations.
    pub async fn wait_for_subscribers(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.registry.subscriber_count(TOPIC) != n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {n} subscribers, have {}",
                self.registry.subscriber_count(TOPIC)
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Client helpers
// ═══════════════════════════════════════════════════════════════

pub async fn connect(addr: SocketAddr) -> Ws {
    let mut request = format!("ws://{addr}/graphql").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", HeaderValue::from_static(SUBPROTOCOL));
    let (ws, response) = connect_async(request).await.unwrap();
    assert_eq!(response.headers()["sec-websocket-protocol"], SUBPROTOCOL);
    ws
}

pub async fn send(ws: &mut Ws, message: Value) {
    ws.send(Message::Text(message.to_string().into())).await.unwrap();
}

pub async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message");
        match msg {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Wait for the server's close frame and return its code.
pub async fn recv_close(ws: &mut Ws) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return frame.code.into(),
            Some(Ok(Message::Text(_) | Message::Ping(_) | Message::Pong(_))) => continue,
            other => panic!("expected a close frame, got {other:?}"),
        }
    }
}

pub async fn init(ws: &mut Ws) {
    send(ws, json!({ "type": "connection_init" })).await;
    assert_eq!(recv(ws).await, json!({ "type": "connection_ack" }));
}

pub async fn subscribe(ws: &mut Ws, id: &str) {
    send(
        ws,
        json!({ "type": "subscribe", "id": id, "payload": { "operationName": "postAdded" } }),
    )
    .await;
}

/// Next `next` message: `(id, postAdded record)`.
pub async fn recv_next(ws: &mut Ws) -> (String, Value) {
    let msg = recv(ws).await;
    assert_eq!(msg["type"], "next", "unexpected message {msg}");
    let id = msg["id"].as_str().unwrap().to_string();
    (id, msg["payload"]["data"]["postAdded"].clone())
}

/// Round-trip a ping: every message sent before it has been received.
pub async fn ping(ws: &mut Ws) {
    send(ws, json!({ "type": "ping" })).await;
    assert_eq!(recv(ws).await, json!({ "type": "pong" }));
}
