//! Announcements and their categories, kept consistent with each other.
//!
//! The generic store knows nothing about relations between families. The
//! catalog enforces them before any optimistic mutation happens:
//! - Every announcement is filed under an existing category
//! - A category with announcements cannot be deleted
//! - Category ids are slugs derived once from the label

use std::sync::Arc;

use tracing::info;

use super::backend::Backend;
use super::ordered::{OrderedStore, Pending};
use super::record::{Group, GroupPatch, Item, ItemPatch};
use super::StoreError;

/// Fields needed to create an announcement.
#[derive(Debug, Clone)]
pub struct ItemDraft {
  pub title: String,
  pub group_id: String,
  pub content: Vec<String>,
  pub active: bool,
}

pub struct Catalog {
  groups: OrderedStore<Group>,
  items: OrderedStore<Item>,
}

impl Catalog {
  pub fn new(groups: Arc<dyn Backend<Group>>, items: Arc<dyn Backend<Item>>) -> Self {
    Self {
      groups: OrderedStore::new(groups),
      items: OrderedStore::new(items),
    }
  }

  pub fn groups(&mut self) -> &mut OrderedStore<Group> {
    &mut self.groups
  }

  pub fn items(&mut self) -> &mut OrderedStore<Item> {
    &mut self.items
  }

  /// Start loading both collections (no-op once loaded).
  pub fn load(&mut self) {
    self.groups.list();
    self.items.list();
  }

  /// Reconcile finished background work in both collections.
  pub fn poll(&mut self) -> bool {
    let groups = self.groups.poll();
    let items = self.items.poll();
    groups || items
  }

  /// Wait until both collections are idle.
  pub async fn settle(&mut self) {
    self.groups.settle().await;
    self.items.settle().await;
  }

  /// Categories in tab order.
  pub fn tabs(&self) -> Result<Vec<&Group>, StoreError> {
    let mut groups: Vec<&Group> = self
      .groups
      .records()
      .ok_or(StoreError::NotLoaded)?
      .iter()
      .collect();
    groups.sort_by_key(|g| g.order);
    Ok(groups)
  }

  /// Every announcement filed under `group_id`, in persisted order.
  pub fn items_in_group(&self, group_id: &str) -> Result<Vec<&Item>, StoreError> {
    Ok(
      self
        .items
        .records()
        .ok_or(StoreError::NotLoaded)?
        .iter()
        .filter(|item| item.group_id == group_id)
        .collect(),
    )
  }

  /// What the viewer shows on a tab: active announcements of the group.
  pub fn visible_items(&self, group_id: &str) -> Result<Vec<&Item>, StoreError> {
    let mut items = self.items_in_group(group_id)?;
    items.retain(|item| item.active);
    Ok(items)
  }

  /// Create a category from its label. Returns the new group's id.
  pub fn add_group(&mut self, label: &str) -> Result<(String, Pending), StoreError> {
    let label = label.trim();
    if label.is_empty() {
      return Err(StoreError::Validation("category label is empty".to_string()));
    }

    let group = Group::from_label(label, 0);
    if group.id.is_empty() {
      return Err(StoreError::Validation(format!(
        "category label {:?} does not produce a usable id",
        label
      )));
    }
    if self.groups.get(&group.id).is_some() {
      return Err(StoreError::Validation(format!(
        "category {} already exists",
        group.id
      )));
    }

    let id = group.id.clone();
    let pending = self.groups.create(group)?;
    info!(group = %id, "category added");
    Ok((id, pending))
  }

  /// Change a category's label. The id stays the same.
  pub fn rename_group(&mut self, id: &str, label: &str) -> Result<Pending, StoreError> {
    let label = label.trim();
    if label.is_empty() {
      return Err(StoreError::Validation("category label is empty".to_string()));
    }
    self.groups.update(id, GroupPatch::label(label))
  }

  /// Delete a category that no announcement references.
  pub fn delete_group(&mut self, id: &str) -> Result<Pending, StoreError> {
    if !self.groups.is_loaded() {
      return Err(StoreError::NotLoaded);
    }
    if self.groups.get(id).is_none() {
      return Err(StoreError::NotFound(id.to_string()));
    }

    let referencing = self.items_in_group(id)?.len();
    if referencing > 0 {
      return Err(StoreError::ReferentialIntegrity {
        group: id.to_string(),
        items: referencing,
      });
    }

    self.groups.delete(id)
  }

  pub fn reorder_groups(&mut self, sequence: &[String]) -> Result<Pending, StoreError> {
    self.groups.reorder(sequence)
  }

  /// Create an announcement at the end of the collection. Returns its id.
  pub fn add_item(&mut self, draft: ItemDraft) -> Result<(String, Pending), StoreError> {
    if draft.title.trim().is_empty() {
      return Err(StoreError::Validation("announcement title is empty".to_string()));
    }
    self.require_group(&draft.group_id)?;

    let mut item = Item::new(draft.title, draft.group_id, draft.content);
    item.active = draft.active;

    let id = item.id.clone();
    let pending = self.items.create(item)?;
    info!(item = %id, "announcement added");
    Ok((id, pending))
  }

  pub fn update_item(&mut self, id: &str, patch: ItemPatch) -> Result<Pending, StoreError> {
    if patch.is_empty() {
      return Err(StoreError::Validation("nothing to update".to_string()));
    }
    if let Some(title) = &patch.title {
      if title.trim().is_empty() {
        return Err(StoreError::Validation("announcement title is empty".to_string()));
      }
    }
    if let Some(group_id) = &patch.group_id {
      self.require_group(group_id)?;
    }
    self.items.update(id, patch)
  }

  pub fn delete_item(&mut self, id: &str) -> Result<Pending, StoreError> {
    self.items.delete(id)
  }

  /// Reorder the announcements of one category, as shown in its filtered view.
  ///
  /// Every id must belong to the category; announcements of other categories
  /// keep their positions.
  pub fn reorder_group_items(
    &mut self,
    group_id: &str,
    sequence: &[String],
  ) -> Result<Pending, StoreError> {
    self.require_group(group_id)?;
    for id in sequence {
      let item = self
        .items
        .get(id)
        .ok_or_else(|| StoreError::NotFound(id.clone()))?;
      if item.group_id != group_id {
        return Err(StoreError::Validation(format!(
          "announcement {} is not in category {}",
          id, group_id
        )));
      }
    }
    self.items.reorder(sequence)
  }

  /// Reorder announcements across the whole collection.
  pub fn reorder_items(&mut self, sequence: &[String]) -> Result<Pending, StoreError> {
    self.items.reorder(sequence)
  }

  /// Drag `dragged` onto `target` in a filtered view.
  pub fn move_item(&mut self, dragged: &str, target: &str) -> Result<Pending, StoreError> {
    self.items.move_to(dragged, target)
  }

  fn require_group(&self, group_id: &str) -> Result<(), StoreError> {
    if !self.groups.is_loaded() {
      return Err(StoreError::NotLoaded);
    }
    if self.groups.get(group_id).is_none() {
      return Err(StoreError::Validation(format!(
        "category {} does not exist",
        group_id
      )));
    }
    Ok(())
  }
}
