//! # Identity Store Connectors
//!
//! Shared record model and store adapter capabilities for identity
//! synchronization.
//!
//! ## Architecture
//!
//! Adapters implement capability traits and the engine only depends on them:
//!
//! - [`Connector`] - Base trait, classifies connection-lost errors
//! - [`ReadOp`] - List pivots, fetch entities, changed-since queries
//! - [`WriteOp`] - Apply a computed [`Change`]
//! - [`StoreAdapter`] - Marker for adapters usable on both sides
//!
//! ## Crate Organization
//!
//! - [`entity`] - `Entity`, `Attribute`, `AttributeValue`, pivots
//! - [`operation`] - `Change`, attribute operations, `Filter`
//! - [`schema`] - Static entity schemas and record mapping
//! - [`memory`] - In-memory / JSON-file store adapter
//! - [`error`] - Error types with connection-lost classification

pub mod entity;
pub mod error;
pub mod memory;
pub mod operation;
pub mod schema;
pub mod traits;

pub use entity::{
    eq_folded, fold_case, Attribute, AttributeValue, Entity, Pivot, PivotAttributes, PivotId,
};
pub use error::{ConnectorError, ConnectorResult};
pub use memory::MemoryStore;
pub use operation::{
    AttributeOperation, Change, Filter, ModificationType, OperationKind, GENERALIZED_TIME_FORMAT,
};
pub use schema::{AttributeDataType, EntitySchema, SchemaAttribute};
pub use traits::{Connector, ReadOp, StoreAdapter, WriteOp};

/// Prelude module for convenient imports.
///
/// ```
/// use idsync_connector::prelude::*;
/// ```
pub mod prelude {
    pub use crate::entity::{Attribute, AttributeValue, Entity, Pivot, PivotAttributes, PivotId};
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::memory::MemoryStore;
    pub use crate::operation::{AttributeOperation, Change, Filter, ModificationType, OperationKind};
    pub use crate::schema::{AttributeDataType, EntitySchema};
    pub use crate::traits::{Connector, ReadOp, StoreAdapter, WriteOp};
}

// Re-export async_trait for adapter implementors
pub use async_trait::async_trait;
