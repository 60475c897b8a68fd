//! Store adapter capability traits
//!
//! A store adapter only implements the capabilities it supports. The engine
//! reads through [`ReadOp`], writes through [`WriteOp`], and asks the base
//! [`Connector`] trait whether an error means the connection is gone.

use async_trait::async_trait;

use crate::entity::{Entity, Pivot};
use crate::error::{ConnectorError, ConnectorResult};
use crate::operation::{Change, Filter};

/// Base trait for all store adapters.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Get the display name for this adapter instance.
    fn display_name(&self) -> &str;

    /// Classify an error raised by this adapter.
    ///
    /// Returning `true` aborts the current pass.
    fn is_connection_lost(&self, error: &ConnectorError) -> bool {
        error.is_connection_lost()
    }
}

/// Capability for reading entries.
#[async_trait]
pub trait ReadOp: Connector {
    /// List all pivots, in the order the store wants them processed.
    async fn list_pivots(&self) -> ConnectorResult<Vec<Pivot>>;

    /// Fetch the entity correlated with a pivot.
    ///
    /// Entities returned by a destination store must carry an identifier.
    async fn fetch(&self, pivot: &Pivot) -> ConnectorResult<Option<Entity>>;

    /// List pivots of entries matching a changed-since filter.
    async fn list_changed_pivots(&self, filter: &Filter) -> ConnectorResult<Vec<Pivot>> {
        let _ = filter;
        Err(ConnectorError::unsupported("list_changed_pivots"))
    }

    /// Whether [`list_changed_pivots`](Self::list_changed_pivots) is implemented.
    fn supports_change_feed(&self) -> bool {
        false
    }
}

/// Capability for applying changes.
#[async_trait]
pub trait WriteOp: Connector {
    /// Apply a change.
    ///
    /// `Ok(false)` and `Err(_)` are both failures for the unit.
    async fn apply(&self, change: &Change) -> ConnectorResult<bool>;
}

/// Marker trait for adapters that can be used on both sides of a task.
pub trait StoreAdapter: ReadOp + WriteOp {}

// Blanket implementation for any type implementing both capabilities
impl<T> StoreAdapter for T where T: ReadOp + WriteOp {}
