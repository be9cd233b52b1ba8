use std::collections::BTreeMap;

use tokio::sync::RwLock;

use service_api::{Entity, RecordStore, ServiceError, StoreFuture};

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

struct Table<E> {
    rows: BTreeMap<i64, E>,
    /// Последний выданный id. Id не переиспользуются после delete.
    last_id: i64,
}

/// In-memory таблица одной сущности. Для тестов и запуска без БД:
/// данные живут до остановки процесса.
pub struct MemoryStore<E: Entity> {
    table: RwLock<Table<E>>,
}

impl<E: Entity> MemoryStore<E> {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table { rows: BTreeMap::new(), last_id: 0 }),
        }
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<E: Entity> Default for MemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> RecordStore<E> for MemoryStore<E> {
    fn find_many(&self) -> StoreFuture<'_, Vec<E>> {
        Box::pin(async move {
            let table = self.table.read().await;
            Ok(table.rows.values().cloned().collect())
        })
    }

    fn find_unique(&self, id: i64) -> StoreFuture<'_, Option<E>> {
        Box::pin(async move {
            let table = self.table.read().await;
            Ok(table.rows.get(&id).cloned())
        })
    }

    fn create(&self, draft: E::Draft) -> StoreFuture<'_, E> {
        Box::pin(async move {
            let mut table = self.table.write().await;
            table.last_id += 1;
            let record = E::from_draft(table.last_id, draft);
            table.rows.insert(record.id(), record.clone());
            tracing::trace!(table = E::TABLE, id = record.id(), "inserted");
            Ok(record)
        })
    }

    fn update(&self, id: i64, patch: E::Patch) -> StoreFuture<'_, E> {
        Box::pin(async move {
            let mut table = self.table.write().await;
            let record = table
                .rows
                .get_mut(&id)
                .ok_or_else(|| ServiceError::record_not_found(E::TYPE_NAME, id))?;
            record.apply(patch);
            Ok(record.clone())
        })
    }

    fn delete(&self, id: i64) -> StoreFuture<'_, E> {
        Box::pin(async move {
            let mut table = self.table.write().await;
            table
                .rows
                .remove(&id)
                .ok_or_else(|| ServiceError::record_not_found(E::TYPE_NAME, id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_api::{ErrorKind, Post, PostDraft, PostPatch, User, UserDraft};

    fn draft(title: &str) -> PostDraft {
        PostDraft { title: title.into(), content: format!("{title} body") }
    }

    #[tokio::test]
    async fn create_assigns_increasing_ids() {
        let store = MemoryStore::<Post>::new();
        let a = store.create(draft("a")).await.unwrap();
        let b = store.create(draft("b")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(store.find_many().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let store = MemoryStore::<Post>::new();
        let a = store.create(draft("a")).await.unwrap();
        store.delete(a.id).await.unwrap();
        let b = store.create(draft("b")).await.unwrap();
        assert_eq!(b.id, 2);
        assert!(store.find_unique(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_and_delete_unknown_are_not_found() {
        let store = MemoryStore::<User>::new();
        let err = store.update(42, Default::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = store.delete(42).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn update_is_partial() {
        let store = MemoryStore::<Post>::new();
        let p = store.create(draft("a")).await.unwrap();
        let updated = store
            .update(p.id, PostPatch { content: Some("new".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(updated.title, "a");
        assert_eq!(updated.content, "new");
        assert_eq!(store.find_unique(p.id).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn delete_returns_last_state() {
        let store = MemoryStore::<User>::new();
        let u = store
            .create(UserDraft { name: "ann".into(), email: "ann@example.com".into(), age: 30 })
            .await
            .unwrap();
        assert_eq!(store.delete(u.id).await.unwrap(), u);
        assert!(store.is_empty().await);
    }
}
