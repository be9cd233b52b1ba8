//! Shared types and traits of the record services: entities, the record
//! store boundary, the topic publish/subscribe seam and the error type.

mod entity;
mod error;
mod store;
mod topic;
mod types;
mod util;

pub use entity::{Entity, FieldDef, FieldType, Post, PostDraft, PostPatch, User, UserDraft, UserPatch};
pub use error::{ErrorKind, ServiceError};
pub use store::{RecordStore, StoreFuture};
pub use topic::{TopicPublisher, TopicSubscriber, TopicSubscription};
pub use types::{OverflowPolicy, SubscriptionId, TopicEvent};
pub use util::now_ms;
