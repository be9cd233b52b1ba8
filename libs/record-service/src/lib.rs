//! Record handlers and the operation router in front of them.

mod operation;
mod router;
mod schema;
mod service;

pub use operation::{
    ArgumentDef, CreateOp, DeleteOp, GetOp, ListOp, Operation, OperationFuture, OperationKind,
    UpdateOp, entity_operations,
};
pub use router::{ErrorEntry, ErrorExtensions, OperationRouter, Response, Selection, SubscriptionField};
pub use schema::{FieldSignature, Schema, TypeDef};
pub use service::{CreationHook, RecordService};
