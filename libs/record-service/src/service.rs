use std::sync::Arc;

use tokio::sync::Mutex;

use service_api::{Entity, RecordStore, ServiceError, TopicPublisher};

/// Publishes every newly created record of one entity type.
#[derive(Clone)]
pub struct CreationHook {
    pub publisher: Arc<dyn TopicPublisher>,
    pub topic: String,
}

/// Read/write handler for one entity type.
///
/// Writes go straight to the store. When a creation hook is configured the
/// created record is published to its topic, strictly after the insert
/// succeeded. Updates and deletes are never broadcast.
///
/// Creates with a hook are serialized, so events leave in the order the
/// inserts committed.
pub struct RecordService<E: Entity> {
    store: Arc<dyn RecordStore<E>>,
    on_create: Option<CreationHook>,
    create_order: Mutex<()>,
}

impl<E: Entity> RecordService<E> {
    pub fn new(store: Arc<dyn RecordStore<E>>) -> Self {
        Self { store, on_create: None, create_order: Mutex::new(()) }
    }

    /// Publish created records to `topic`.
    pub fn with_creation_topic(
        mut self,
        publisher: Arc<dyn TopicPublisher>,
        topic: impl Into<String>,
    ) -> Self {
        self.on_create = Some(CreationHook { publisher, topic: topic.into() });
        self
    }

    pub fn creation_topic(&self) -> Option<&str> {
        self.on_create.as_ref().map(|h| h.topic.as_str())
    }

    pub async fn list(&self) -> Result<Vec<E>, ServiceError> {
        self.store.find_many().await
    }

    pub async fn read(&self, id: i64) -> Result<Option<E>, ServiceError> {
        self.store.find_unique(id).await
    }

    pub async fn create(&self, draft: E::Draft) -> Result<E, ServiceError> {
        let Some(hook) = &self.on_create else {
            return self.store.create(draft).await;
        };

        let _order = self.create_order.lock().await;
        let record = self.store.create(draft).await?;
        let payload = serde_json::to_value(&record)
            .map_err(|e| ServiceError::internal(format!("encode {}: {e}", E::TYPE_NAME)))?;
        let delivered = hook.publisher.publish(&hook.topic, payload);
        tracing::debug!(
            entity = E::TYPE_NAME,
            id = record.id(),
            topic = %hook.topic,
            delivered,
            "published creation"
        );

        Ok(record)
    }

    pub async fn update(&self, id: i64, patch: E::Patch) -> Result<E, ServiceError> {
        self.store.update(id, patch).await
    }

    pub async fn delete(&self, id: i64) -> Result<E, ServiceError> {
        self.store.delete(id).await
    }
}
