use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use service_api::{Entity, ServiceError};

use crate::operation::{Operation, OperationKind, entity_operations};
use crate::schema::{FieldSignature, Schema, TypeDef};
use crate::RecordService;

// ═══════════════════════════════════════════════════════════════
//  Request / response envelope
// ═══════════════════════════════════════════════════════════════

/// One requested operation. Accepts GraphQL-over-HTTP spelling
/// (`operationName` / `variables`) as well as `field` / `arguments`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(alias = "operationName")]
    pub field: String,
    #[serde(default, alias = "variables")]
    pub arguments: Value,
    /// Key of the result in `data`; defaults to `field`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Selection {
    pub fn new(field: impl Into<String>, arguments: Value) -> Self {
        Self { field: field.into(), arguments, alias: None }
    }

    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorExtensions {
    pub code: String,
}

/// Entry of the `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    pub extensions: ErrorExtensions,
}

impl ErrorEntry {
    pub fn new(err: &ServiceError, path: Option<&str>) -> Self {
        Self {
            message: err.message().to_string(),
            path: path.map(|p| vec![p.to_string()]).unwrap_or_default(),
            extensions: ErrorExtensions { code: err.kind().code().to_string() },
        }
    }
}

/// Result of a batch: every selection gets a key in `data` (`null` when it
/// failed), failures are listed in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
}

// ═══════════════════════════════════════════════════════════════
//  Subscriptions
// ═══════════════════════════════════════════════════════════════

/// Subscription field bound to a topic, e.g. `postAdded` → `POST_ADDED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionField {
    pub name: String,
    pub topic: String,
    /// Type name of the delivered records.
    pub entity: &'static str,
}

impl SubscriptionField {
    pub fn new<E: Entity>(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self { name: name.into(), topic: topic.into(), entity: E::TYPE_NAME }
    }
}

// ═══════════════════════════════════════════════════════════════
//  OperationRouter
// ═══════════════════════════════════════════════════════════════

/// Dispatch table: operation name → handler, subscription field → topic.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct OperationRouter {
    operations: HashMap<String, Arc<dyn Operation>>,
    /// Registration order, for a stable schema listing.
    order: Vec<String>,
    subscriptions: Vec<SubscriptionField>,
    types: Vec<TypeDef>,
}

impl OperationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, op: Arc<dyn Operation>) {
        let name = op.name().to_string();
        if self.operations.insert(name.clone(), op).is_some() {
            tracing::warn!(operation = %name, "operation registered twice, replacing");
        } else {
            self.order.push(name);
        }
    }

    /// Register list/get/create/update/delete for `E`.
    pub fn register_entity<E: Entity>(&mut self, service: Arc<RecordService<E>>) {
        self.types.push(TypeDef::of::<E>());
        for op in entity_operations(service) {
            self.register(op);
        }
    }

    pub fn register_subscription(&mut self, field: SubscriptionField) {
        self.subscriptions.retain(|f| f.name != field.name);
        self.subscriptions.push(field);
    }

    pub fn with_entity<E: Entity>(mut self, service: Arc<RecordService<E>>) -> Self {
        self.register_entity(service);
        self
    }

    pub fn with_subscription(mut self, field: SubscriptionField) -> Self {
        self.register_subscription(field);
        self
    }

    pub fn operation(&self, name: &str) -> Option<&Arc<dyn Operation>> {
        self.operations.get(name)
    }

    pub fn subscription(&self, name: &str) -> Option<&SubscriptionField> {
        self.subscriptions.iter().find(|f| f.name == name)
    }

    pub fn subscriptions(&self) -> &[SubscriptionField] {
        &self.subscriptions
    }

    /// Run one operation; its error is returned verbatim.
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, ServiceError> {
        let op = self.operations.get(name).ok_or_else(|| {
            ServiceError::validation(format!("Cannot query field \"{name}\": unknown operation"))
        })?;
        op.execute(args).await
    }

    /// Run selections in request order. A failing selection yields `null`
    /// under its key plus an `errors` entry; its siblings still run.
    pub async fn execute_batch(&self, selections: &[Selection]) -> Response {
        let mut response = Response::default();
        for selection in selections {
            let key = selection.response_key().to_string();
            match self.execute(&selection.field, selection.arguments.clone()).await {
                Ok(value) => {
                    response.data.insert(key, value);
                }
                Err(err) => {
                    tracing::debug!(operation = %selection.field, kind = %err.kind(), error = %err, "operation failed");
                    response.errors.push(ErrorEntry::new(&err, Some(&key)));
                    response.data.insert(key, Value::Null);
                }
            }
        }
        response
    }

    pub fn schema(&self) -> Schema {
        let signatures = |kind: OperationKind| -> Vec<FieldSignature> {
            self.order
                .iter()
                .filter_map(|name| self.operations.get(name))
                .filter(|op| op.kind() == kind)
                .map(|op| FieldSignature {
                    name: op.name().to_string(),
                    arguments: op.arguments(),
                    returns: op.returns(),
                })
                .collect()
        };

        Schema {
            types: self.types.clone(),
            queries: signatures(OperationKind::Query),
            mutations: signatures(OperationKind::Mutation),
            subscriptions: self
                .subscriptions
                .iter()
                .map(|f| FieldSignature {
                    name: f.name.clone(),
                    arguments: Vec::new(),
                    returns: format!("{}!", f.entity),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use service_api::{Post, RecordStore, User};
    use store_memory::MemoryStore;

    fn router() -> OperationRouter {
        let posts: Arc<dyn RecordStore<Post>> = Arc::new(MemoryStore::<Post>::new());
        let users: Arc<dyn RecordStore<User>> = Arc::new(MemoryStore::<User>::new());
        OperationRouter::new()
            .with_entity(Arc::new(RecordService::new(posts)))
            .with_entity(Arc::new(RecordService::new(users)))
            .with_subscription(SubscriptionField::new::<Post>("postAdded", "POST_ADDED"))
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let router = router();
        let created = router
            .execute("createUser", json!({ "name": "ann", "email": "ann@example.com", "age": 30 }))
            .await
            .unwrap();
        assert_eq!(created["id"], 1);
        let all = router.execute("users", Value::Null).await.unwrap();
        assert_eq!(all, json!([created]));
    }

    #[tokio::test]
    async fn unknown_operation_is_validation_error() {
        let err = router().execute("dropTables", Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), service_api::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn batch_keeps_successful_siblings() {
        let router = router();
        let response = router
            .execute_batch(&[
                Selection::new("createPost", json!({ "title": "A", "content": "B" })),
                Selection { alias: Some("missing".into()), ..Selection::new("deletePost", json!({ "id": 42 })) },
                Selection::new("posts", Value::Null),
            ])
            .await;

        assert_eq!(response.data["createPost"]["title"], "A");
        assert_eq!(response.data["missing"], Value::Null);
        assert_eq!(response.data["posts"].as_array().unwrap().len(), 1);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].path, vec!["missing".to_string()]);
        assert_eq!(response.errors[0].extensions.code, "NOT_FOUND");
    }

    #[test]
    fn selection_accepts_graphql_spelling() {
        let sel: Selection =
            serde_json::from_value(json!({ "operationName": "post", "variables": { "id": 1 } })).unwrap();
        assert_eq!(sel, Selection::new("post", json!({ "id": 1 })));
        assert_eq!(sel.response_key(), "post");
    }

    #[test]
    fn subscription_lookup() {
        let router = router();
        assert_eq!(router.subscription("postAdded").unwrap().topic, "POST_ADDED");
        assert!(router.subscription("postCreated").is_none());
    }

    #[test]
    fn schema_lists_operations_in_registration_order() {
        let schema = router().schema();
        let queries: Vec<&str> = schema.queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(queries, ["posts", "post", "users", "user"]);
        assert_eq!(schema.mutations.len(), 6);
        assert_eq!(schema.subscriptions[0].returns, "Post!");
    }
}
