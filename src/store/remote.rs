//! Hosted relational backend speaking the PostgREST dialect.
//!
//! Rows use snake_case columns, so records and patches are mapped to and
//! from table rows here rather than relying on the wire shape.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::backend::Backend;
use super::record::{Group, GroupPatch, Item, ItemPatch, Record};

/// Mapping between a record family and its table.
pub trait RemoteRow: Record {
  fn table() -> &'static str;
  fn to_row(&self) -> Value;
  fn from_row(row: Value) -> Result<Self>;
  fn patch_row(patch: &Self::Patch) -> Value;
}

#[derive(Debug, Deserialize)]
struct ItemRow {
  id: String,
  title: String,
  content: Vec<String>,
  category_id: String,
  active: bool,
  #[serde(default)]
  order: i64,
}

impl RemoteRow for Item {
  fn table() -> &'static str {
    "announcements"
  }

  fn to_row(&self) -> Value {
    json!({
      "id": self.id,
      "title": self.title,
      "content": self.content,
      "category_id": self.group_id,
      "active": self.active,
      "order": self.order,
    })
  }

  fn from_row(row: Value) -> Result<Self> {
    let row: ItemRow =
      serde_json::from_value(row).map_err(|e| eyre!("Failed to parse announcement row: {}", e))?;
    Ok(Item {
      id: row.id,
      title: row.title,
      content: row.content,
      group_id: row.category_id,
      active: row.active,
      order: row.order,
    })
  }

  fn patch_row(patch: &ItemPatch) -> Value {
    let mut row = serde_json::Map::new();
    if let Some(title) = &patch.title {
      row.insert("title".into(), json!(title));
    }
    if let Some(content) = &patch.content {
      row.insert("content".into(), json!(content));
    }
    if let Some(group_id) = &patch.group_id {
      row.insert("category_id".into(), json!(group_id));
    }
    if let Some(active) = patch.active {
      row.insert("active".into(), json!(active));
    }
    Value::Object(row)
  }
}

impl RemoteRow for Group {
  fn table() -> &'static str {
    "categories"
  }

  fn to_row(&self) -> Value {
    json!({ "id": self.id, "label": self.label, "order": self.order })
  }

  fn from_row(row: Value) -> Result<Self> {
    serde_json::from_value(row).map_err(|e| eyre!("Failed to parse category row: {}", e))
  }

  fn patch_row(patch: &GroupPatch) -> Value {
    serde_json::to_value(patch).unwrap_or_else(|_| json!({}))
  }
}

/// Client for a hosted database exposing tables over REST.
#[derive(Clone)]
pub struct RemoteBackend {
  client: Client,
  base_url: String,
  api_key: String,
}

impl RemoteBackend {
  pub fn new(base_url: &str, api_key: String, timeout: Option<Duration>) -> Result<Self> {
    let mut builder = Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
      api_key,
    })
  }

  fn table_url<T: RemoteRow>(&self) -> String {
    format!("{}/rest/v1/{}", self.base_url, T::table())
  }

  fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
    request
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
  }

  async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
    let response = self
      .authorized(request)
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", what, e))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(eyre!("Failed to {}: {} {}", what, status, body))
  }
}

fn id_filter(id: &str) -> [(&'static str, String); 1] {
  [("id", format!("eq.{}", id))]
}

#[async_trait]
impl<T: RemoteRow> Backend<T> for RemoteBackend {
  async fn list_ordered(&self) -> Result<Vec<T>> {
    let request = self
      .client
      .get(self.table_url::<T>())
      .query(&[("select", "*"), ("order", "order.asc")]);
    let response = self.send(request, &format!("list {}", T::table())).await?;

    let rows: Vec<Value> = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse {} rows: {}", T::table(), e))?;
    rows.into_iter().map(T::from_row).collect()
  }

  async fn insert(&self, record: &T) -> Result<()> {
    let request = self
      .client
      .post(self.table_url::<T>())
      .json(&[record.to_row()]);
    self
      .send(request, &format!("insert into {}", T::table()))
      .await?;
    Ok(())
  }

  async fn update(&self, id: &str, patch: &T::Patch) -> Result<()> {
    let request = self
      .client
      .patch(self.table_url::<T>())
      .query(&id_filter(id))
      .json(&T::patch_row(patch));
    self
      .send(request, &format!("update {} {}", T::table(), id))
      .await?;
    Ok(())
  }

  async fn delete(&self, id: &str) -> Result<()> {
    let request = self
      .client
      .delete(self.table_url::<T>())
      .query(&id_filter(id));
    self
      .send(request, &format!("delete {} {}", T::table(), id))
      .await?;
    Ok(())
  }

  async fn batch_upsert(&self, records: &[T]) -> Result<()> {
    let rows: Vec<Value> = records.iter().map(RemoteRow::to_row).collect();
    let request = self
      .client
      .post(self.table_url::<T>())
      .header("Prefer", "resolution=merge-duplicates")
      .json(&rows);
    self
      .send(request, &format!("upsert into {}", T::table()))
      .await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_item_row_mapping() {
    let item = Item {
      id: "delay-1".to_string(),
      title: "Departure delay".to_string(),
      content: vec!["New departure time is 18:40.".to_string()],
      group_id: "delay".to_string(),
      active: true,
      order: 2,
    };

    let row = item.to_row();
    assert_eq!(row["category_id"], "delay");
    assert!(row.get("groupId").is_none());
    assert_eq!(Item::from_row(row).unwrap(), item);
  }

  #[test]
  fn test_item_row_without_order() {
    let row = json!({
      "id": "board-1",
      "title": "Initial boarding call",
      "content": ["Welcome aboard."],
      "category_id": "boarding",
      "active": false,
    });
    let item = Item::from_row(row).unwrap();
    assert_eq!(item.order, 0);
    assert!(!item.active);
  }

  #[test]
  fn test_patch_rows_are_sparse() {
    let patch = ItemPatch {
      group_id: Some("arrival".to_string()),
      ..Default::default()
    };
    assert_eq!(Item::patch_row(&patch), json!({ "category_id": "arrival" }));
    assert_eq!(
      Group::patch_row(&GroupPatch::label("Arrivals")),
      json!({ "label": "Arrivals" })
    );
  }

  #[test]
  fn test_table_url() {
    let backend = RemoteBackend::new("https://example.supabase.co/", "key".to_string(), None).unwrap();
    assert_eq!(
      backend.table_url::<Group>(),
      "https://example.supabase.co/rest/v1/categories"
    );
  }
}
