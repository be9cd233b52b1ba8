use std::future::Future;
use std::pin::Pin;

use crate::{Entity, ServiceError};

/// Future returned by every `RecordStore` operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Data-access boundary for one entity table.
///
/// Every call is a fresh round trip to the backend: no caching, each
/// operation atomic at single-record granularity.
///
/// Implementations: `MemoryStore` (store-memory), `SqliteStore` (store-sqlite).
pub trait RecordStore<E: Entity>: Send + Sync {
    /// Full table snapshot, ordered by id.
    fn find_many(&self) -> StoreFuture<'_, Vec<E>>;

    /// `Ok(None)` when no record has this id.
    fn find_unique(&self, id: i64) -> StoreFuture<'_, Option<E>>;

    /// Insert a record; the store assigns the id.
    fn create(&self, draft: E::Draft) -> StoreFuture<'_, E>;

    /// Apply a partial update. `NotFound` when the id is absent.
    fn update(&self, id: i64, patch: E::Patch) -> StoreFuture<'_, E>;

    /// Remove a record, returning its last state. `NotFound` when absent.
    fn delete(&self, id: i64) -> StoreFuture<'_, E>;
}
