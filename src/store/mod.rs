//! Ordered, optimistically-updated projections of persisted collections.
//!
//! This module keeps a client-side copy of announcements and categories in
//! sync with a persistence backend:
//! - Mutations update the projection immediately and persist in the background
//! - Failed single-record writes are undone with an inverse patch
//! - Failed batch reorders are reconciled by refetching from the backend
//! - Reordering a filtered view never disturbs records outside the filter

mod backend;
mod catalog;
mod local;
mod ordered;
mod record;
mod remote;
mod reorder;
pub mod seed;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{Catalog, ItemDraft};
pub use local::LocalBackend;
pub use ordered::{Listing, Pending};
pub use record::{Group, Item, ItemPatch};
pub use remote::RemoteBackend;

/// Errors surfaced by store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
  /// The mutation target is not in the projection.
  #[error("record {0} not found")]
  NotFound(String),

  /// The request was rejected before anything changed.
  #[error("invalid request: {0}")]
  Validation(String),

  /// The backend rejected a write; the projection has been compensated.
  #[error("persistence failed: {0}")]
  Persistence(String),

  /// A group still has announcements filed under it.
  #[error("group {group} is still referenced by {items} announcement(s)")]
  ReferentialIntegrity { group: String, items: usize },

  /// The collection has not finished loading from the backend.
  #[error("collection not loaded yet")]
  NotLoaded,
}
