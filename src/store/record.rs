//! Record types held by the ordered store.
//!
//! Two entity families share the same machinery: announcements (`Item`) and
//! the categories they are filed under (`Group`). Both carry a stable id and
//! an `order` that decides their display sequence.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

/// A record that can live in an `OrderedStore`.
pub trait Record:
  Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
  /// Partial update accepted by `OrderedStore::update`.
  type Patch: Patch<Self>;

  /// Stable unique identifier.
  fn id(&self) -> &str;

  /// Persisted position.
  fn order(&self) -> i64;

  fn set_order(&mut self, order: i64);

  /// Entity family name, used as the storage namespace (e.g. "item", "group").
  fn family() -> &'static str;
}

/// A sparse update to a record.
///
/// Patches know how to capture their own inverse so a failed write can be
/// undone without touching fields another mutation has changed since.
pub trait Patch<T>: Clone + Debug + Send + Sync + Serialize + 'static {
  /// Write every field present in the patch onto `record`.
  fn apply(&self, record: &mut T);

  /// Build the patch that restores the current values of the fields this
  /// patch touches.
  fn inverse(&self, record: &T) -> Self;

  /// Undo this patch: each touched field is reset to the value in `inverse`,
  /// but only if it still holds the value this patch wrote.
  fn revert(&self, inverse: &Self, record: &mut T);

  /// Names of the fields this patch writes.
  fn fields(&self) -> Vec<&'static str>;

  /// A copy of this patch restricted to the fields `keep` accepts.
  fn retain(&self, keep: &dyn Fn(&str) -> bool) -> Self;
}

/// A category used to tab and filter announcements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
  pub id: String,
  pub label: String,
  pub order: i64,
}

impl Group {
  /// Create a group whose id is derived from its label.
  pub fn from_label(label: &str, order: i64) -> Self {
    Self {
      id: slugify(label),
      label: label.to_string(),
      order,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
}

impl GroupPatch {
  pub fn label(label: impl Into<String>) -> Self {
    Self {
      label: Some(label.into()),
    }
  }
}

impl Patch<Group> for GroupPatch {
  fn apply(&self, record: &mut Group) {
    if let Some(label) = &self.label {
      record.label = label.clone();
    }
  }

  fn inverse(&self, record: &Group) -> Self {
    Self {
      label: self.label.as_ref().map(|_| record.label.clone()),
    }
  }

  fn revert(&self, inverse: &Self, record: &mut Group) {
    revert_field(&self.label, &inverse.label, &mut record.label);
  }

  fn fields(&self) -> Vec<&'static str> {
    self.label.as_ref().map(|_| "label").into_iter().collect()
  }

  fn retain(&self, keep: &dyn Fn(&str) -> bool) -> Self {
    Self {
      label: self.label.clone().filter(|_| keep("label")),
    }
  }
}

impl Record for Group {
  type Patch = GroupPatch;

  fn id(&self) -> &str {
    &self.id
  }

  fn order(&self) -> i64 {
    self.order
  }

  fn set_order(&mut self, order: i64) {
    self.order = order;
  }

  fn family() -> &'static str {
    "group"
  }
}

/// A single announcement.
///
/// `content` is a list of opaque fragments, either plain text or markup
/// produced by the editor; it is stored and returned verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
  pub id: String,
  pub title: String,
  pub content: Vec<String>,
  pub group_id: String,
  pub active: bool,
  #[serde(default)]
  pub order: i64,
}

impl Item {
  /// Create a new active announcement with a freshly generated id.
  pub fn new(title: impl Into<String>, group_id: impl Into<String>, content: Vec<String>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      title: title.into(),
      content,
      group_id: group_id.into(),
      active: true,
      order: 0,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub content: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub group_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub active: Option<bool>,
}

impl ItemPatch {
  pub fn is_empty(&self) -> bool {
    self.title.is_none() && self.content.is_none() && self.group_id.is_none() && self.active.is_none()
  }
}

impl Patch<Item> for ItemPatch {
  fn apply(&self, record: &mut Item) {
    if let Some(title) = &self.title {
      record.title = title.clone();
    }
    if let Some(content) = &self.content {
      record.content = content.clone();
    }
    if let Some(group_id) = &self.group_id {
      record.group_id = group_id.clone();
    }
    if let Some(active) = self.active {
      record.active = active;
    }
  }

  fn inverse(&self, record: &Item) -> Self {
    Self {
      title: self.title.as_ref().map(|_| record.title.clone()),
      content: self.content.as_ref().map(|_| record.content.clone()),
      group_id: self.group_id.as_ref().map(|_| record.group_id.clone()),
      active: self.active.map(|_| record.active),
    }
  }

  fn revert(&self, inverse: &Self, record: &mut Item) {
    revert_field(&self.title, &inverse.title, &mut record.title);
    revert_field(&self.content, &inverse.content, &mut record.content);
    revert_field(&self.group_id, &inverse.group_id, &mut record.group_id);
    revert_field(&self.active, &inverse.active, &mut record.active);
  }

  fn fields(&self) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if self.title.is_some() {
      fields.push("title");
    }
    if self.content.is_some() {
      fields.push("content");
    }
    if self.group_id.is_some() {
      fields.push("group_id");
    }
    if self.active.is_some() {
      fields.push("active");
    }
    fields
  }

  fn retain(&self, keep: &dyn Fn(&str) -> bool) -> Self {
    Self {
      title: self.title.clone().filter(|_| keep("title")),
      content: self.content.clone().filter(|_| keep("content")),
      group_id: self.group_id.clone().filter(|_| keep("group_id")),
      active: self.active.filter(|_| keep("active")),
    }
  }
}

impl Record for Item {
  type Patch = ItemPatch;

  fn id(&self) -> &str {
    &self.id
  }

  fn order(&self) -> i64 {
    self.order
  }

  fn set_order(&mut self, order: i64) {
    self.order = order;
  }

  fn family() -> &'static str {
    "item"
  }
}

fn revert_field<V: Clone + PartialEq>(written: &Option<V>, previous: &Option<V>, field: &mut V) {
  if let (Some(written), Some(previous)) = (written, previous) {
    if field == written {
      *field = previous.clone();
    }
  }
}

/// Derive a group id from its label.
///
/// Lowercases, drops anything that is not an ASCII word character, whitespace
/// or `-`, collapses runs of whitespace, `_` and `-` into a single `-`, and
/// strips leading and trailing dashes.
pub fn slugify(label: &str) -> String {
  let mut slug = String::with_capacity(label.len());
  let mut pending_dash = false;

  for c in label.trim().to_lowercase().chars() {
    if c.is_ascii_alphanumeric() {
      if pending_dash && !slug.is_empty() {
        slug.push('-');
      }
      pending_dash = false;
      slug.push(c);
    } else if c.is_whitespace() || c == '_' || c == '-' {
      pending_dash = true;
    }
    // Everything else is dropped without breaking the current word
  }

  slug
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(title: &str) -> Item {
    Item {
      id: "a".to_string(),
      title: title.to_string(),
      content: vec!["<p>Gate 12</p>".to_string()],
      group_id: "boarding".to_string(),
      active: true,
      order: 0,
    }
  }

  #[test]
  fn test_slugify() {
    assert_eq!(slugify("Boarding"), "boarding");
    assert_eq!(slugify("  Gate  Changes "), "gate-changes");
    assert_eq!(slugify("Lost & Found"), "lost-found");
    assert_eq!(slugify("snake_case--mixed"), "snake-case-mixed");
    assert_eq!(slugify("--Delays!--"), "delays");
    assert_eq!(slugify("!!!"), "");
  }

  #[test]
  fn test_item_wire_shape() {
    let json = serde_json::to_value(item("Final call")).unwrap();
    assert_eq!(json["groupId"], "boarding");
    assert_eq!(json["content"][0], "<p>Gate 12</p>");
    assert!(json.get("group_id").is_none());
  }

  #[test]
  fn test_patch_revert_restores_untouched_fields() {
    let mut record = item("Initial boarding call");
    let patch = ItemPatch {
      title: Some("Final boarding call".to_string()),
      active: Some(false),
      ..Default::default()
    };
    let inverse = patch.inverse(&record);
    patch.apply(&mut record);
    assert_eq!(record.title, "Final boarding call");
    assert!(!record.active);

    patch.revert(&inverse, &mut record);
    assert_eq!(record, item("Initial boarding call"));
  }

  #[test]
  fn test_patch_revert_keeps_later_write() {
    let mut record = item("Initial boarding call");
    let first = ItemPatch {
      title: Some("Boarding soon".to_string()),
      ..Default::default()
    };
    let inverse = first.inverse(&record);
    first.apply(&mut record);

    // A later edit lands before the first write fails
    record.title = "Boarding now".to_string();

    first.revert(&inverse, &mut record);
    assert_eq!(record.title, "Boarding now");
  }

  #[test]
  fn test_patch_serializes_sparse() {
    let json = serde_json::to_value(GroupPatch::label("Delays")).unwrap();
    assert_eq!(json, serde_json::json!({ "label": "Delays" }));
    assert_eq!(serde_json::to_value(GroupPatch::default()).unwrap(), serde_json::json!({}));
  }

  #[test]
  fn test_patch_fields_and_retain() {
    let patch = ItemPatch {
      title: Some("Gate 14".to_string()),
      active: Some(false),
      ..Default::default()
    };
    assert_eq!(patch.fields(), vec!["title", "active"]);

    let only_active = patch.retain(&|field: &str| field == "active");
    assert_eq!(only_active.fields(), vec!["active"]);
    assert!(only_active.title.is_none());
    assert!(patch.retain(&|_: &str| false).is_empty());
  }
}
