use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use service_api::{Entity, ServiceError};

use crate::RecordService;

// ═══════════════════════════════════════════════════════════════
//  Operation contract
// ═══════════════════════════════════════════════════════════════

pub type OperationFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ServiceError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Query,
    Mutation,
}

/// Declared argument of an operation, GraphQL-typed (`Int!`, `String`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArgumentDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl ArgumentDef {
    fn new(name: &str, ty: &str) -> Self {
        Self { name: name.to_string(), ty: ty.to_string() }
    }
}

/// One named query or mutation. The router dispatches to it by `name()`.
pub trait Operation: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> OperationKind;

    fn arguments(&self) -> Vec<ArgumentDef>;

    /// GraphQL return type, e.g. `[Post!]!`.
    fn returns(&self) -> String;

    /// Run the operation with its argument mapping (`null` = no arguments).
    fn execute(&self, args: Value) -> OperationFuture<'_>;
}

// ═══════════════════════════════════════════════════════════════
//  Argument helpers
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct IdArgs {
    id: i64,
}

#[derive(Deserialize)]
struct UpdateArgs<P> {
    id: i64,
    #[serde(flatten)]
    patch: P,
}

fn parse_args<T: DeserializeOwned>(operation: &str, args: Value) -> Result<T, ServiceError> {
    let args = match args {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(args)
        .map_err(|e| ServiceError::validation(format!("{operation}: invalid arguments: {e}")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::internal(format!("encode result: {e}")))
}

fn id_argument() -> ArgumentDef {
    ArgumentDef::new("id", "Int!")
}

fn field_arguments<E: Entity>(required: bool) -> Vec<ArgumentDef> {
    E::FIELDS
        .iter()
        .map(|f| {
            let ty = f.ty.graphql();
            let ty = if required { ty } else { ty.trim_end_matches('!') };
            ArgumentDef::new(f.name, ty)
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════
//  Operations
// ═══════════════════════════════════════════════════════════════

/// `posts` / `users`: full table snapshot.
pub struct ListOp<E: Entity> {
    service: Arc<RecordService<E>>,
}

impl<E: Entity> ListOp<E> {
    pub fn new(service: Arc<RecordService<E>>) -> Self {
        Self { service }
    }
}

impl<E: Entity> Operation for ListOp<E> {
    fn name(&self) -> &str {
        E::PLURAL
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn arguments(&self) -> Vec<ArgumentDef> {
        Vec::new()
    }

    fn returns(&self) -> String {
        format!("[{}!]!", E::TYPE_NAME)
    }

    fn execute(&self, _args: Value) -> OperationFuture<'_> {
        Box::pin(async move { to_value(&self.service.list().await?) })
    }
}

/// `post(id)` / `user(id)`: `null` when absent.
pub struct GetOp<E: Entity> {
    service: Arc<RecordService<E>>,
}

impl<E: Entity> GetOp<E> {
    pub fn new(service: Arc<RecordService<E>>) -> Self {
        Self { service }
    }
}

impl<E: Entity> Operation for GetOp<E> {
    fn name(&self) -> &str {
        E::SINGULAR
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn arguments(&self) -> Vec<ArgumentDef> {
        vec![id_argument()]
    }

    fn returns(&self) -> String {
        E::TYPE_NAME.to_string()
    }

    fn execute(&self, args: Value) -> OperationFuture<'_> {
        Box::pin(async move {
            let IdArgs { id } = parse_args(self.name(), args)?;
            to_value(&self.service.read(id).await?)
        })
    }
}

/// `createPost(...)` / `createUser(...)`.
pub struct CreateOp<E: Entity> {
    service: Arc<RecordService<E>>,
    name: String,
}

impl<E: Entity> CreateOp<E> {
    pub fn new(service: Arc<RecordService<E>>) -> Self {
        Self { service, name: format!("create{}", E::TYPE_NAME) }
    }
}

impl<E: Entity> Operation for CreateOp<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Mutation
    }

    fn arguments(&self) -> Vec<ArgumentDef> {
        field_arguments::<E>(true)
    }

    fn returns(&self) -> String {
        format!("{}!", E::TYPE_NAME)
    }

    fn execute(&self, args: Value) -> OperationFuture<'_> {
        Box::pin(async move {
            let draft: E::Draft = parse_args(&self.name, args)?;
            to_value(&self.service.create(draft).await?)
        })
    }
}

/// `updatePost(id, ...)` / `updateUser(id, ...)`: absent fields unchanged.
pub struct UpdateOp<E: Entity> {
    service: Arc<RecordService<E>>,
    name: String,
}

impl<E: Entity> UpdateOp<E> {
    pub fn new(service: Arc<RecordService<E>>) -> Self {
        Self { service, name: format!("update{}", E::TYPE_NAME) }
    }
}

impl<E: Entity> Operation for UpdateOp<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Mutation
    }

    fn arguments(&self) -> Vec<ArgumentDef> {
        let mut args = vec![id_argument()];
        args.extend(field_arguments::<E>(false));
        args
    }

    fn returns(&self) -> String {
        E::TYPE_NAME.to_string()
    }

    fn execute(&self, args: Value) -> OperationFuture<'_> {
        Box::pin(async move {
            let UpdateArgs::<E::Patch> { id, patch } = parse_args(&self.name, args)?;
            to_value(&self.service.update(id, patch).await?)
        })
    }
}

/// `deletePost(id)` / `deleteUser(id)`: returns the removed record.
pub struct DeleteOp<E: Entity> {
    service: Arc<RecordService<E>>,
    name: String,
}

impl<E: Entity> DeleteOp<E> {
    pub fn new(service: Arc<RecordService<E>>) -> Self {
        Self { service, name: format!("delete{}", E::TYPE_NAME) }
    }
}

impl<E: Entity> Operation for DeleteOp<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Mutation
    }

    fn arguments(&self) -> Vec<ArgumentDef> {
        vec![id_argument()]
    }

    fn returns(&self) -> String {
        E::TYPE_NAME.to_string()
    }

    fn execute(&self, args: Value) -> OperationFuture<'_> {
        Box::pin(async move {
            let IdArgs { id } = parse_args(&self.name, args)?;
            to_value(&self.service.delete(id).await?)
        })
    }
}

/// All five operations of an entity, in schema order.
pub fn entity_operations<E: Entity>(service: Arc<RecordService<E>>) -> Vec<Arc<dyn Operation>> {
    vec![
        Arc::new(ListOp::new(service.clone())),
        Arc::new(GetOp::new(service.clone())),
        Arc::new(CreateOp::new(service.clone())),
        Arc::new(UpdateOp::new(service.clone())),
        Arc::new(DeleteOp::new(service)),
    ]
}
