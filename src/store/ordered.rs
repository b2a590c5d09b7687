//! Optimistic ordered store over a persistence backend.
//!
//! Every mutation follows the same two-phase protocol:
//! 1. Commit the change to the in-memory projection and return at once
//! 2. Persist on a background task
//! 3. When the task reports back (see `poll` / `settle`), either resolve the
//!    caller's `Pending` handle or compensate: single-record writes are
//!    undone in place, batch reorders are reconciled by a full refetch
//!
//! Results travel back over a channel, so the projection is only ever
//! touched by the store's own methods on the owning task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::Backend;
use super::record::{Patch, Record};
use super::reorder;
use super::StoreError;

/// What `list()` can report.
#[derive(Debug, PartialEq)]
pub enum Listing<'a, T> {
  /// The first load (or a refetch) is still in flight.
  Loading,
  /// The current projection in persisted order.
  Loaded(&'a [T]),
  /// The last load failed; call `reload()` to try again.
  Failed(&'a str),
}

enum LoadState<T> {
  Idle,
  Loading,
  Loaded(Vec<T>),
  Failed(String),
}

/// How to undo an optimistic mutation whose write failed.
enum Compensation<T: Record> {
  /// Drop a record that was optimistically created.
  Discard { id: String },
  /// Undo an optimistic patch.
  Revert {
    id: String,
    patch: T::Patch,
    inverse: T::Patch,
  },
  /// Put back an optimistically deleted record.
  Restore { record: T, index: usize },
  /// Throw the projection away and reload it from the backend.
  Refetch,
}

struct PendingWrite<T: Record> {
  op: &'static str,
  compensation: Compensation<T>,
  notify: oneshot::Sender<Result<(), StoreError>>,
}

enum Completion<T> {
  Loaded {
    generation: u64,
    result: Result<Vec<T>, String>,
  },
  Written {
    ticket: u64,
    result: Result<(), String>,
  },
}

/// Handle to a mutation whose write is still in flight.
///
/// The optimistic change is already visible through `list()`; the handle
/// resolves once the store has reconciled the backend's answer.
#[derive(Debug)]
pub struct Pending {
  rx: oneshot::Receiver<Result<(), StoreError>>,
}

impl Pending {
  fn resolved() -> Self {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(Ok(()));
    Self { rx }
  }

  /// Wait for the write to be acknowledged or compensated.
  pub async fn outcome(self) -> Result<(), StoreError> {
    self.rx.await.unwrap_or_else(|_| {
      Err(StoreError::Persistence(
        "store dropped before the write was reconciled".to_string(),
      ))
    })
  }
}

/// In-memory projection of one persisted, ordered collection.
///
/// Each write runs on its own task, so two writes to the same record may
/// reach the backend in either order. Embedders that issue many writes per
/// record should settle between them.
pub struct OrderedStore<T: Record> {
  backend: Arc<dyn Backend<T>>,
  state: LoadState<T>,
  /// Bumped on every load so late results from a superseded load are ignored
  load_generation: u64,
  next_ticket: u64,
  writes: HashMap<u64, PendingWrite<T>>,
  /// Ticket of the newest update to each (record id, field)
  field_writes: HashMap<(String, &'static str), u64>,
  tx: mpsc::UnboundedSender<Completion<T>>,
  rx: mpsc::UnboundedReceiver<Completion<T>>,
}

impl<T: Record> OrderedStore<T> {
  pub fn new(backend: Arc<dyn Backend<T>>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      backend,
      state: LoadState::Idle,
      load_generation: 0,
      next_ticket: 0,
      writes: HashMap::new(),
      field_writes: HashMap::new(),
      tx,
      rx,
    }
  }

  /// Current projection, in persisted order.
  ///
  /// The first call starts loading from the backend and reports `Loading`
  /// until the result has been picked up by `poll()` or `settle()`.
  pub fn list(&mut self) -> Listing<'_, T> {
    if matches!(self.state, LoadState::Idle) {
      self.start_load();
    }

    match &self.state {
      LoadState::Idle | LoadState::Loading => Listing::Loading,
      LoadState::Loaded(records) => Listing::Loaded(records.as_slice()),
      LoadState::Failed(message) => Listing::Failed(message),
    }
  }

  /// The projection if it has been loaded, without triggering a load.
  pub fn records(&self) -> Option<&[T]> {
    match &self.state {
      LoadState::Loaded(records) => Some(records.as_slice()),
      _ => None,
    }
  }

  pub fn get(&self, id: &str) -> Option<&T> {
    self.records()?.iter().find(|record| record.id() == id)
  }

  pub fn is_loaded(&self) -> bool {
    matches!(self.state, LoadState::Loaded(_))
  }

  /// Number of writes that have not been reconciled yet.
  pub fn pending_writes(&self) -> usize {
    self.writes.len()
  }

  /// Discard the projection and load it again from the backend.
  pub fn reload(&mut self) {
    self.start_load();
  }

  /// Append a new record at the end of the collection.
  pub fn create(&mut self, mut record: T) -> Result<Pending, StoreError> {
    let records = self.loaded_mut()?;
    if records.iter().any(|r| r.id() == record.id()) {
      return Err(StoreError::Validation(format!(
        "{} {} already exists",
        T::family(),
        record.id()
      )));
    }

    record.set_order(next_order(records.as_slice()));
    records.push(record.clone());

    let id = record.id().to_string();
    let backend = Arc::clone(&self.backend);
    let ticket = self.take_ticket();
    Ok(self.spawn_write(
      ticket,
      "insert",
      Compensation::Discard { id },
      async move { backend.insert(&record).await },
    ))
  }

  /// Apply a sparse update to an existing record.
  pub fn update(&mut self, id: &str, patch: T::Patch) -> Result<Pending, StoreError> {
    let record = self
      .loaded_mut()?
      .iter_mut()
      .find(|r| r.id() == id)
      .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    let inverse = patch.inverse(record);
    patch.apply(record);

    let ticket = self.take_ticket();
    for field in patch.fields() {
      self.field_writes.insert((id.to_string(), field), ticket);
    }

    let backend = Arc::clone(&self.backend);
    let write_id = id.to_string();
    let write_patch = patch.clone();
    Ok(self.spawn_write(
      ticket,
      "update",
      Compensation::Revert {
        id: id.to_string(),
        patch,
        inverse,
      },
      async move { backend.update(&write_id, &write_patch).await },
    ))
  }

  /// Remove a record.
  ///
  /// Cross-collection rules (such as a group still being referenced) are
  /// the caller's responsibility.
  pub fn delete(&mut self, id: &str) -> Result<Pending, StoreError> {
    let records = self.loaded_mut()?;
    let index = records
      .iter()
      .position(|r| r.id() == id)
      .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    let record = records.remove(index);

    let backend = Arc::clone(&self.backend);
    let write_id = id.to_string();
    let ticket = self.take_ticket();
    Ok(self.spawn_write(
      ticket,
      "delete",
      Compensation::Restore { record, index },
      async move { backend.delete(&write_id).await },
    ))
  }

  /// Reorder some or all records.
  ///
  /// `sequence` may name only a subset (for example the records visible in
  /// a filtered view). The named records are rearranged among the slots they
  /// already occupy; every other record stays where it is.
  pub fn reorder(&mut self, sequence: &[String]) -> Result<Pending, StoreError> {
    let records = self.loaded_mut()?;
    let merged = reorder::merge_subset(records.as_slice(), sequence)?;
    Ok(self.commit_sequence(merged))
  }

  /// Move `dragged` next to `target`, both located in the full collection.
  pub fn move_to(&mut self, dragged: &str, target: &str) -> Result<Pending, StoreError> {
    let records = self.loaded_mut()?;
    let moved = reorder::move_adjacent(records.as_slice(), dragged, target)?;
    Ok(self.commit_sequence(moved))
  }

  /// Reconcile finished background operations without blocking.
  ///
  /// Returns `true` if anything was reconciled. Call this from the event
  /// loop tick.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(completion) = self.rx.try_recv() {
      self.reconcile(completion);
      changed = true;
    }
    changed
  }

  /// Wait until no load or write is outstanding.
  pub async fn settle(&mut self) {
    while self.is_busy() {
      match self.rx.recv().await {
        Some(completion) => self.reconcile(completion),
        None => break,
      }
    }
  }

  fn is_busy(&self) -> bool {
    !self.writes.is_empty() || matches!(self.state, LoadState::Loading)
  }

  fn loaded_mut(&mut self) -> Result<&mut Vec<T>, StoreError> {
    match &mut self.state {
      LoadState::Loaded(records) => Ok(records),
      _ => Err(StoreError::NotLoaded),
    }
  }

  fn commit_sequence(&mut self, mut sequence: Vec<T>) -> Pending {
    let LoadState::Loaded(records) = &mut self.state else {
      return Pending::resolved();
    };

    if reorder::same_sequence(records.as_slice(), &sequence) {
      debug!(family = T::family(), "reorder leaves sequence unchanged");
      return Pending::resolved();
    }

    reorder::renumber(&mut sequence);
    *records = sequence.clone();

    let backend = Arc::clone(&self.backend);
    let ticket = self.take_ticket();
    self.spawn_write(ticket, "batch upsert", Compensation::Refetch, async move {
      backend.batch_upsert(&sequence).await
    })
  }

  fn start_load(&mut self) {
    self.load_generation += 1;
    self.state = LoadState::Loading;

    let generation = self.load_generation;
    let backend = Arc::clone(&self.backend);
    let tx = self.tx.clone();
    debug!(family = T::family(), generation, "loading collection");

    tokio::spawn(async move {
      let result = backend.list_ordered().await.map_err(|e| format!("{:#}", e));
      // Ignore send errors - the store may have been dropped
      let _ = tx.send(Completion::Loaded { generation, result });
    });
  }

  fn take_ticket(&mut self) -> u64 {
    let ticket = self.next_ticket;
    self.next_ticket += 1;
    ticket
  }

  fn spawn_write<F>(
    &mut self,
    ticket: u64,
    op: &'static str,
    compensation: Compensation<T>,
    write: F,
  ) -> Pending
  where
    F: Future<Output = color_eyre::Result<()>> + Send + 'static,
  {
    let (notify, rx) = oneshot::channel();
    self.writes.insert(
      ticket,
      PendingWrite {
        op,
        compensation,
        notify,
      },
    );

    let tx = self.tx.clone();
    tokio::spawn(async move {
      let result = write.await.map_err(|e| format!("{:#}", e));
      let _ = tx.send(Completion::Written { ticket, result });
    });

    Pending { rx }
  }

  fn reconcile(&mut self, completion: Completion<T>) {
    match completion {
      Completion::Loaded { generation, result } => {
        if generation != self.load_generation {
          debug!(family = T::family(), generation, "ignoring superseded load");
          return;
        }
        match result {
          Ok(mut records) => {
            records.sort_by_key(|r| r.order());
            info!(family = T::family(), count = records.len(), "collection loaded");
            self.state = LoadState::Loaded(records);
          }
          Err(message) => {
            error!(family = T::family(), %message, "failed to load collection");
            self.state = LoadState::Failed(message);
          }
        }
      }
      Completion::Written { ticket, result } => {
        let Some(write) = self.writes.remove(&ticket) else {
          return;
        };

        // Fields no later update has written since this one
        let owned: Vec<&'static str> = self
          .field_writes
          .iter()
          .filter(|(_, newest)| **newest == ticket)
          .map(|((_, field), _)| *field)
          .collect();
        self.field_writes.retain(|_, newest| *newest != ticket);

        let outcome = match result {
          Ok(()) => Ok(()),
          Err(message) => {
            warn!(family = T::family(), op = write.op, %message, "write failed, compensating");
            self.compensate(write.compensation, &owned);
            Err(StoreError::Persistence(message))
          }
        };
        // The caller may have dropped its handle
        let _ = write.notify.send(outcome);
      }
    }
  }

  fn compensate(&mut self, compensation: Compensation<T>, owned: &[&'static str]) {
    if let Compensation::Refetch = compensation {
      self.start_load();
      return;
    }

    // A refetch already in flight will replace the projection anyway
    let LoadState::Loaded(records) = &mut self.state else {
      return;
    };

    match compensation {
      Compensation::Discard { id } => records.retain(|r| r.id() != id),
      Compensation::Revert { id, patch, inverse } => {
        let keep = |field: &str| owned.iter().any(|owner| *owner == field);
        if let Some(record) = records.iter_mut().find(|r| r.id() == id) {
          patch.retain(&keep).revert(&inverse.retain(&keep), record);
        }
      }
      Compensation::Restore { record, index } => {
        if !records.iter().any(|r| r.id() == record.id()) {
          let index = index.min(records.len());
          records.insert(index, record);
        }
      }
      Compensation::Refetch => {}
    }
  }
}

/// Position for a record appended to the end.
///
/// This is the collection length, unless gaps left by deletions would make
/// it collide with an existing position.
fn next_order<T: Record>(records: &[T]) -> i64 {
  let after_last = records.iter().map(|r| r.order() + 1).max().unwrap_or(0);
  (records.len() as i64).max(after_last)
}
