use std::path::Path;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use api_server::{Endpoint, GatewaySettings};
use service_api::OverflowPolicy;

use crate::error::ServerError;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Parser)]
#[command(name = "crud-server", about = "Users/Posts сервисы с real-time подписками")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить users и posts сервисы
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Адрес, на котором слушают оба сервиса.
    pub host: String,
    /// Размер буфера WS подписок (и mux-канала соединения).
    pub ws_buffer: usize,
    /// Стратегия переполнения WS подписок.
    pub ws_overflow: OverflowPolicy,
    /// Сколько ждать `connection_init` от клиента.
    pub init_timeout_ms: u64,
    /// Сколько ждать остановки сервисов после Ctrl+C.
    pub shutdown_grace_ms: u64,
    pub storage: StorageConfig,
    pub users: ServiceConfig,
    pub posts: PostsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            ws_buffer: 256,
            ws_overflow: OverflowPolicy::Unbounded,
            init_timeout_ms: 3_000,
            shutdown_grace_ms: 5_000,
            storage: StorageConfig::default(),
            users: ServiceConfig::with_port(4001),
            posts: PostsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Файл базы (только для `sqlite`).
    pub path: String,
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: "crud.db".to_string(),
            pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub port: u16,
    pub base_path: String,
    pub ws_path: String,
}

impl ServiceConfig {
    fn with_port(port: u16) -> Self {
        Self {
            port,
            base_path: "/".to_string(),
            ws_path: "/graphql".to_string(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::with_port(4001)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostsConfig {
    pub port: u16,
    pub base_path: String,
    pub ws_path: String,
    /// Topic, в который публикуются созданные посты.
    pub topic: String,
    /// Имя subscription поля (`postAdded` / `postCreated`).
    pub subscription_field: String,
}

impl Default for PostsConfig {
    fn default() -> Self {
        let service = ServiceConfig::with_port(4002);
        Self {
            port: service.port,
            base_path: service.base_path,
            ws_path: service.ws_path,
            topic: "POST_ADDED".to_string(),
            subscription_field: "postAdded".to_string(),
        }
    }
}

impl PostsConfig {
    pub fn service(&self) -> ServiceConfig {
        ServiceConfig {
            port: self.port,
            base_path: self.base_path.clone(),
            ws_path: self.ws_path.clone(),
        }
    }
}

impl ServerConfig {
    /// Прочитать конфиг. Отсутствующий файл по пути по умолчанию = defaults.
    pub fn load(path: &str) -> Result<Self, ServerError> {
        Self::load_in(Path::new(""), path)
    }

    /// Как [`load`](Self::load), относительные пути берутся от `dir`.
    fn load_in(dir: &Path, path: &str) -> Result<Self, ServerError> {
        let file = dir.join(path);
        if path == DEFAULT_CONFIG_PATH && !file.exists() {
            tracing::info!(config = %file.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&file)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| match e {
                ServerError::Config { context, detail } => {
                    ServerError::Config { context, detail: format!("'{path}': {detail}") }
                }
                other => other,
            })
    }

    pub fn parse(content: &str) -> Result<Self, ServerError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::Config { context: "parse", detail: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ServerError> {
        let invalid = |detail: String| ServerError::Config { context: "validate", detail };

        if self.ws_buffer == 0 {
            return Err(invalid("ws_buffer must be at least 1".to_string()));
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.pool_size == 0 {
            return Err(invalid("storage.pool_size must be at least 1".to_string()));
        }
        if self.users.port == self.posts.port {
            return Err(invalid(format!("users and posts share port {}", self.users.port)));
        }
        for (name, svc) in [("users", self.users.clone()), ("posts", self.posts.service())] {
            for path in [&svc.base_path, &svc.ws_path] {
                if !path.starts_with('/') {
                    return Err(invalid(format!("{name}: path '{path}' must start with '/'")));
                }
            }
        }
        if self.posts.topic.is_empty() || self.posts.subscription_field.is_empty() {
            return Err(invalid("posts.topic and posts.subscription_field must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn gateway(&self) -> GatewaySettings {
        GatewaySettings {
            ws_buffer: self.ws_buffer,
            ws_overflow: self.ws_overflow,
            init_timeout: Duration::from_millis(self.init_timeout_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn users_endpoint(&self) -> Endpoint {
        self.endpoint("users", &self.users)
    }

    pub fn posts_endpoint(&self) -> Endpoint {
        self.endpoint("posts", &self.posts.service())
    }

    fn endpoint(&self, name: &str, svc: &ServiceConfig) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            host: self.host.clone(),
            port: svc.port,
            base_path: svc.base_path.clone(),
            ws_path: svc.ws_path.clone(),
        }
    }
}
