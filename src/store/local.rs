//! Durable local backend on SQLite.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

use super::backend::Backend;
use super::record::{Patch, Record};

/// Key-addressed local store.
///
/// Every entity family lives in the same table, keyed by (family, id), with
/// the record serialized as JSON next to its position.
pub struct LocalBackend {
  conn: Mutex<Connection>,
}

impl LocalBackend {
  pub fn new(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
    }
  }

  fn write<T: Record>(conn: &Connection, record: &T) -> Result<()> {
    let data =
      serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize {}: {}", T::family(), e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO records (family, id, position, data, updated_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![T::family(), record.id(), record.order(), data],
      )
      .map_err(|e| eyre!("Failed to store {} {}: {}", T::family(), record.id(), e))?;

    Ok(())
  }
}

#[async_trait]
impl<T: Record> Backend<T> for LocalBackend {
  async fn list_ordered(&self) -> Result<Vec<T>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT data FROM records WHERE family = ? ORDER BY position, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<Vec<u8>> = stmt
      .query_map(params![T::family()], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query {} records: {}", T::family(), e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read {} records: {}", T::family(), e))?;

    rows
      .iter()
      .map(|data| {
        serde_json::from_slice(data)
          .map_err(|e| eyre!("Failed to deserialize {}: {}", T::family(), e))
      })
      .collect()
  }

  async fn insert(&self, record: &T) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let exists: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM records WHERE family = ? AND id = ?",
        params![T::family(), record.id()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to check for {} {}: {}", T::family(), record.id(), e))?;
    if exists.is_some() {
      return Err(eyre!("{} {} already exists", T::family(), record.id()));
    }

    Self::write(&conn, record)
  }

  async fn update(&self, id: &str, patch: &T::Patch) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data: Vec<u8> = conn
      .query_row(
        "SELECT data FROM records WHERE family = ? AND id = ?",
        params![T::family(), id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} {}: {}", T::family(), id, e))?
      .ok_or_else(|| eyre!("{} {} does not exist", T::family(), id))?;

    let mut record: T = serde_json::from_slice(&data)
      .map_err(|e| eyre!("Failed to deserialize {}: {}", T::family(), e))?;
    patch.apply(&mut record);

    Self::write(&conn, &record)
  }

  async fn delete(&self, id: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM records WHERE family = ? AND id = ?",
        params![T::family(), id],
      )
      .map_err(|e| eyre!("Failed to delete {} {}: {}", T::family(), id, e))?;

    Ok(())
  }

  async fn batch_upsert(&self, records: &[T]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for record in records {
      Self::write(&tx, record)?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::store::record::{Group, GroupPatch, Item, ItemPatch};

  fn backend() -> LocalBackend {
    LocalBackend::new(Database::open_in_memory().unwrap().into_connection())
  }

  fn item(id: &str, order: i64) -> Item {
    Item {
      id: id.to_string(),
      title: format!("Announcement {}", id),
      content: vec!["Please proceed to Gate 12.".to_string()],
      group_id: "boarding".to_string(),
      active: true,
      order,
    }
  }

  #[tokio::test]
  async fn test_insert_and_list_in_order() {
    let backend = backend();
    backend.insert(&item("b", 1)).await.unwrap();
    backend.insert(&item("a", 0)).await.unwrap();

    let items: Vec<Item> = backend.list_ordered().await.unwrap();
    assert_eq!(items, vec![item("a", 0), item("b", 1)]);
  }

  #[tokio::test]
  async fn test_families_are_separate() {
    let backend = backend();
    backend.insert(&item("boarding", 0)).await.unwrap();
    Backend::<Group>::insert(&backend, &Group::from_label("Boarding", 0))
      .await
      .unwrap();

    let items: Vec<Item> = backend.list_ordered().await.unwrap();
    let groups: Vec<Group> = backend.list_ordered().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(groups, vec![Group::from_label("Boarding", 0)]);
  }

  #[tokio::test]
  async fn test_duplicate_insert_rejected() {
    let backend = backend();
    backend.insert(&item("a", 0)).await.unwrap();
    assert!(backend.insert(&item("a", 1)).await.is_err());
  }

  #[tokio::test]
  async fn test_update_applies_patch() {
    let backend = backend();
    backend.insert(&item("a", 0)).await.unwrap();

    let patch = ItemPatch {
      active: Some(false),
      content: Some(vec!["<strong>Gate closed</strong>".to_string()]),
      ..Default::default()
    };
    Backend::<Item>::update(&backend, "a", &patch).await.unwrap();

    let items: Vec<Item> = backend.list_ordered().await.unwrap();
    assert!(!items[0].active);
    assert_eq!(items[0].content, vec!["<strong>Gate closed</strong>"]);
    assert_eq!(items[0].title, "Announcement a");
  }

  #[tokio::test]
  async fn test_update_missing_record_fails() {
    let backend = backend();
    let result = Backend::<Group>::update(&backend, "nope", &GroupPatch::label("x")).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_delete() {
    let backend = backend();
    backend.insert(&item("a", 0)).await.unwrap();
    backend.insert(&item("b", 1)).await.unwrap();
    Backend::<Item>::delete(&backend, "a").await.unwrap();

    let items: Vec<Item> = backend.list_ordered().await.unwrap();
    assert_eq!(items, vec![item("b", 1)]);
  }

  #[tokio::test]
  async fn test_batch_upsert_rewrites_positions() {
    let backend = backend();
    backend.insert(&item("a", 0)).await.unwrap();
    backend.insert(&item("b", 1)).await.unwrap();

    backend
      .batch_upsert(&[item("b", 0), item("a", 1), item("c", 2)])
      .await
      .unwrap();

    let items: Vec<Item> = backend.list_ordered().await.unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
  }
}
