use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use api_server::{ApiServerError, AppState};
use record_service::{OperationRouter, RecordService, SubscriptionField};
use service_api::{Post, RecordStore, TopicPublisher, TopicSubscriber, User};
use store_memory::MemoryStore;
use store_sqlite::SqliteDatabase;
use topic_engine::TopicRegistry;

use crate::config::{PostsConfig, ServeArgs, ServerConfig, StorageBackend, StorageConfig};
use crate::error::ServerError;

/// Record stores of both services, sharing one backend.
struct Stores {
    users: Arc<dyn RecordStore<User>>,
    posts: Arc<dyn RecordStore<Post>>,
}

fn open_stores(config: &StorageConfig) -> Result<Stores, ServerError> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::info!(backend = "memory", "storage ready");
            Ok(Stores {
                users: Arc::new(MemoryStore::<User>::new()),
                posts: Arc::new(MemoryStore::<Post>::new()),
            })
        }
        StorageBackend::Sqlite => {
            let db = SqliteDatabase::open(&config.path, config.pool_size)?;
            tracing::info!(backend = "sqlite", path = %config.path, pool_size = config.pool_size, "storage ready");
            Ok(Stores {
                users: Arc::new(db.store::<User>()),
                posts: Arc::new(db.store::<Post>()),
            })
        }
    }
}

fn users_router(store: Arc<dyn RecordStore<User>>) -> OperationRouter {
    OperationRouter::new().with_entity(Arc::new(RecordService::new(store)))
}

/// Posts publish every creation to `config.topic`, which the
/// subscription field follows.
fn posts_router(
    store: Arc<dyn RecordStore<Post>>,
    publisher: Arc<dyn TopicPublisher>,
    config: &PostsConfig,
) -> OperationRouter {
    let service = RecordService::new(store).with_creation_topic(publisher, config.topic.clone());
    OperationRouter::new()
        .with_entity(Arc::new(service))
        .with_subscription(SubscriptionField::new::<Post>(
            config.subscription_field.clone(),
            config.topic.clone(),
        ))
}

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("crud-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    let registry = Arc::new(TopicRegistry::new());
    let publisher: Arc<dyn TopicPublisher> = registry.clone();
    let subscriber: Arc<dyn TopicSubscriber> = registry.clone();

    let stores = open_stores(&config.storage)?;
    let users = Arc::new(users_router(stores.users));
    let posts = Arc::new(posts_router(stores.posts, publisher, &config.posts));
    tracing::info!(
        topic = %config.posts.topic,
        field = %config.posts.subscription_field,
        "posts subscription registered"
    );

    // --- Services (HTTP + WS) ---
    let settings = config.gateway();
    let mut handles: Vec<JoinHandle<Result<(), ApiServerError>>> = Vec::new();
    for (endpoint, router) in [(config.users_endpoint(), users), (config.posts_endpoint(), posts)] {
        let state = AppState::new(router, subscriber.clone(), settings, token.clone());
        let service_token = token.clone();
        handles.push(tokio::spawn(async move {
            let name = endpoint.name.clone();
            let result = api_server::run(endpoint, state, service_token.clone()).await;
            if let Err(e) = &result {
                tracing::error!(service = %name, error = %e, "service failed");
                // one service down takes the process down
                service_token.cancel();
            }
            result
        }));
    }

    tracing::info!("server ready");

    // --- Ожидание Ctrl+C ---
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
        }
        _ = token.cancelled() => {
            tracing::warn!("service stopped, shutting down...");
        }
    }

    // Signal all tasks to stop cooperatively; WS connections close with 1001
    token.cancel();
    registry.close();

    // Drain: wait up to the grace period, then abort what is left
    let deadline = tokio::time::Instant::now() + config.shutdown_grace();
    let mut failure = None;
    for handle in handles {
        let abort = handle.abort_handle();
        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                failure.get_or_insert(e);
            }
            Ok(Err(e)) => tracing::error!(error = %e, "service task failed"),
            Err(_) => {
                tracing::warn!("service did not stop within grace period, aborting");
                abort.abort();
            }
        }
    }

    tracing::info!("shutdown complete");
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn posts_config() -> PostsConfig {
        PostsConfig {
            topic: "POST_CREATED".to_string(),
            subscription_field: "postCreated".to_string(),
            ..PostsConfig::default()
        }
    }

    #[tokio::test]
    async fn posts_router_publishes_creations() {
        let registry = Arc::new(TopicRegistry::new());
        let stores = open_stores(&StorageConfig::default()).unwrap();
        let router = posts_router(stores.posts, registry.clone(), &posts_config());

        assert_eq!(router.subscription("postCreated").unwrap().topic, "POST_CREATED");
        let mut sub = registry.subscribe("POST_CREATED", 8, Default::default());

        let post = router
            .execute("createPost", json!({ "title": "A", "content": "B" }))
            .await
            .unwrap();
        assert_eq!(sub.try_recv().unwrap().value, post);
    }

    #[tokio::test]
    async fn users_router_has_no_subscriptions() {
        let stores = open_stores(&StorageConfig::default()).unwrap();
        let router = users_router(stores.users);
        assert!(router.subscriptions().is_empty());
        assert!(router.operation("createUser").is_some());
        assert!(router.operation("createPost").is_none());
    }

    #[tokio::test]
    async fn sqlite_backend_shares_one_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: dir.path().join("crud.db").to_string_lossy().into_owned(),
            pool_size: 2,
        };
        let stores = open_stores(&config).unwrap();
        let users = users_router(stores.users);

        let created = users
            .execute("createUser", json!({ "name": "ann", "email": "ann@example.com", "age": 30 }))
            .await
            .unwrap();

        let reopened = open_stores(&config).unwrap();
        let fetched = users_router(reopened.users)
            .execute("user", json!({ "id": created["id"] }))
            .await
            .unwrap();
        assert_eq!(fetched, created);
    }
}
