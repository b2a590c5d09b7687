//! Persistence backend trait.

use async_trait::async_trait;
use color_eyre::Result;

use super::record::Record;

/// Capability interface every persistence backend provides per entity family.
///
/// Implementations may be local-only or remote; the store treats them the
/// same and never asks which one it talks to.
#[async_trait]
pub trait Backend<T: Record>: Send + Sync {
  /// All records of the family, sorted by persisted order.
  async fn list_ordered(&self) -> Result<Vec<T>>;

  /// Persist a new record.
  async fn insert(&self, record: &T) -> Result<()>;

  /// Apply a sparse update to the record with the given id.
  async fn update(&self, id: &str, patch: &T::Patch) -> Result<()>;

  /// Remove the record with the given id.
  async fn delete(&self, id: &str) -> Result<()>;

  /// Insert or replace every record in one call.
  ///
  /// Records are always complete, since some backends need every non-null
  /// column present on upsert.
  async fn batch_upsert(&self, records: &[T]) -> Result<()>;
}
