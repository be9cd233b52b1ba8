//! HTTP + WebSocket фронт одной группы сервисов.
//!
//! `POST <base_path>` выполняет запросы/мутации через [`OperationRouter`],
//! `GET <ws_path>` с upgrade поднимает graphql-transport-ws соединение,
//! подписки которого обслуживает [`TopicSubscriber`].

mod http;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use record_service::OperationRouter;
use service_api::{OverflowPolicy, TopicSubscriber};

pub use ws::{CloseCode, SUBPROTOCOL};

// ═══════════════════════════════════════════════════════════════
//  Configuration
// ═══════════════════════════════════════════════════════════════

/// Параметры WebSocket соединений (общие для всех сервисов процесса).
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// Ёмкость канала подписки (Drop) и mux-канала соединения.
    pub ws_buffer: usize,
    pub ws_overflow: OverflowPolicy,
    /// Сколько ждать `connection_init` после upgrade.
    pub init_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            ws_buffer: 256,
            ws_overflow: OverflowPolicy::Unbounded,
            init_timeout: Duration::from_secs(3),
        }
    }
}

/// Где слушает один сервис.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Имя для логов (`users`, `posts`).
    pub name: String,
    pub host: String,
    pub port: u16,
    pub base_path: String,
    pub ws_path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serve {name}: {source}")]
    Serve {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

// ═══════════════════════════════════════════════════════════════
//  State
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AppState {
    router: Arc<OperationRouter>,
    subscriber: Arc<dyn TopicSubscriber>,
    settings: GatewaySettings,
    /// Отмена закрывает все WebSocket соединения кодом 1001.
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        router: Arc<OperationRouter>,
        subscriber: Arc<dyn TopicSubscriber>,
        settings: GatewaySettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self { router, subscriber, settings, shutdown }
    }

    pub fn router(&self) -> &OperationRouter {
        &self.router
    }
}

// ═══════════════════════════════════════════════════════════════
//  Server
// ═══════════════════════════════════════════════════════════════

/// Собрать axum `Router`: оба пути принимают POST (операции) и GET
/// (schema либо WebSocket upgrade). Совпадающие пути регистрируются один раз.
pub fn app(state: AppState, base_path: &str, ws_path: &str) -> Router {
    let endpoint = || get(http::handle_get).post(http::handle_post);

    let mut app = Router::new().route(base_path, endpoint());
    if ws_path != base_path {
        app = app.route(ws_path, endpoint());
    }
    app.with_state(state)
}

/// Обслуживать `app` на уже открытом listener до отмены `shutdown`.
pub async fn serve(
    name: &str,
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), ApiServerError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|source| ApiServerError::Serve { name: name.to_string(), source })
}

/// Поднять сервис на `endpoint` и работать до отмены `shutdown`.
pub async fn run(
    endpoint: Endpoint,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ApiServerError> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ApiServerError::Bind { addr: addr.clone(), source })?;

    tracing::info!(
        service = %endpoint.name,
        %addr,
        base_path = %endpoint.base_path,
        ws_path = %endpoint.ws_path,
        "service listening"
    );

    let app = app(state, &endpoint.base_path, &endpoint.ws_path);
    serve(&endpoint.name, listener, app, shutdown).await?;

    tracing::info!(service = %endpoint.name, "service stopped");
    Ok(())
}
