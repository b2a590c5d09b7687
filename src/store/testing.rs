//! In-memory backend with failure injection for store tests.

use std::sync::Mutex;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use super::backend::Backend;
use super::record::{Patch, Record};

/// A backend call, as recorded by `MemoryBackend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  List,
  Insert(String),
  /// Record id followed by the JSON-encoded patch
  Update(String),
  Delete(String),
  BatchUpsert(usize),
}

type FailurePredicate = Box<dyn Fn(&Call) -> bool + Send + Sync>;

pub struct MemoryBackend<T> {
  records: Mutex<Vec<T>>,
  calls: Mutex<Vec<Call>>,
  fail: Mutex<Option<FailurePredicate>>,
}

impl<T: Record> MemoryBackend<T> {
  pub fn with_records(records: Vec<T>) -> Self {
    Self {
      records: Mutex::new(records),
      calls: Mutex::new(Vec::new()),
      fail: Mutex::new(None),
    }
  }

  /// Reject every call matching `predicate` until cleared.
  pub fn fail_if(&self, predicate: impl Fn(&Call) -> bool + Send + Sync + 'static) {
    *self.fail.lock().unwrap() = Some(Box::new(predicate));
  }

  pub fn clear_failures(&self) {
    *self.fail.lock().unwrap() = None;
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  /// Persisted records in persisted order.
  pub fn snapshot(&self) -> Vec<T> {
    let mut records = self.records.lock().unwrap().clone();
    records.sort_by_key(|r| r.order());
    records
  }

  fn record(&self, call: Call) -> Result<()> {
    let rejected = self
      .fail
      .lock()
      .unwrap()
      .as_ref()
      .is_some_and(|predicate| predicate(&call));
    self.calls.lock().unwrap().push(call.clone());

    if rejected {
      Err(eyre!("simulated backend failure on {:?}", call))
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl<T: Record> Backend<T> for MemoryBackend<T> {
  async fn list_ordered(&self) -> Result<Vec<T>> {
    self.record(Call::List)?;
    Ok(self.snapshot())
  }

  async fn insert(&self, record: &T) -> Result<()> {
    self.record(Call::Insert(record.id().to_string()))?;
    self.records.lock().unwrap().push(record.clone());
    Ok(())
  }

  async fn update(&self, id: &str, patch: &T::Patch) -> Result<()> {
    let encoded = serde_json::to_string(patch)?;
    self.record(Call::Update(format!("{} {}", id, encoded)))?;

    let mut records = self.records.lock().unwrap();
    let record = records
      .iter_mut()
      .find(|r| r.id() == id)
      .ok_or_else(|| eyre!("no row with id {}", id))?;
    patch.apply(record);
    Ok(())
  }

  async fn delete(&self, id: &str) -> Result<()> {
    self.record(Call::Delete(id.to_string()))?;
    self.records.lock().unwrap().retain(|r| r.id() != id);
    Ok(())
  }

  async fn batch_upsert(&self, records: &[T]) -> Result<()> {
    self.record(Call::BatchUpsert(records.len()))?;

    let mut stored = self.records.lock().unwrap();
    for record in records {
      match stored.iter_mut().find(|r| r.id() == record.id()) {
        Some(existing) => *existing = record.clone(),
        None => stored.push(record.clone()),
      }
    }
    Ok(())
  }
}
