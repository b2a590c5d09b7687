//! Sequence reconciliation for reordering.
//!
//! The editor often shows a filtered view of a collection (one group's
//! announcements) and the user reorders within that view. Positions in the
//! view are not positions in the full collection, so every function here
//! works against the full sequence and only ever permutes it.

use std::collections::{HashMap, HashSet};

use super::record::Record;
use super::StoreError;

/// Merge a reordered subsequence back into the full collection.
///
/// The records named in `sequence` keep the set of slots they occupy in
/// `full` and are written back into those slots in their new order. Records
/// not in `sequence` stay exactly where they are.
///
/// Fails with `NotFound` for an unknown id and `Validation` for a duplicate.
pub fn merge_subset<T: Record>(full: &[T], sequence: &[String]) -> Result<Vec<T>, StoreError> {
  let positions: HashMap<&str, usize> = full
    .iter()
    .enumerate()
    .map(|(index, record)| (record.id(), index))
    .collect();

  let mut seen = HashSet::new();
  let mut slots = Vec::with_capacity(sequence.len());
  for id in sequence {
    let index = *positions
      .get(id.as_str())
      .ok_or_else(|| StoreError::NotFound(id.clone()))?;
    if !seen.insert(id.as_str()) {
      return Err(StoreError::Validation(format!(
        "record {} appears more than once in the new order",
        id
      )));
    }
    slots.push(index);
  }
  slots.sort_unstable();

  let mut merged = full.to_vec();
  for (slot, id) in slots.into_iter().zip(sequence) {
    merged[slot] = full[positions[id.as_str()]].clone();
  }

  Ok(merged)
}

/// Move `dragged` next to `target` within the full collection.
///
/// The dragged record is spliced out of its position and inserted at the
/// target's index, which leaves it after the target when moving down and
/// before the target when moving up.
pub fn move_adjacent<T: Record>(full: &[T], dragged: &str, target: &str) -> Result<Vec<T>, StoreError> {
  let from = index_of(full, dragged)?;
  let to = index_of(full, target)?;

  let mut moved = full.to_vec();
  let record = moved.remove(from);
  moved.insert(to, record);

  Ok(moved)
}

/// Assign every record its index as persisted order.
pub fn renumber<T: Record>(records: &mut [T]) {
  for (index, record) in records.iter_mut().enumerate() {
    record.set_order(index as i64);
  }
}

/// Whether two sequences list the same ids in the same order.
pub fn same_sequence<T: Record>(a: &[T], b: &[T]) -> bool {
  a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id() == y.id())
}

fn index_of<T: Record>(records: &[T], id: &str) -> Result<usize, StoreError> {
  records
    .iter()
    .position(|record| record.id() == id)
    .ok_or_else(|| StoreError::NotFound(id.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::record::Item;

  fn item(id: &str, group: &str, order: i64) -> Item {
    Item {
      id: id.to_string(),
      title: format!("Announcement {}", id),
      content: vec![format!("Body of {}", id)],
      group_id: group.to_string(),
      active: true,
      order,
    }
  }

  fn ids(records: &[Item]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
  }

  fn seq(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
  }

  fn scenario() -> Vec<Item> {
    vec![
      item("A", "boarding", 0),
      item("B", "delay", 1),
      item("C", "boarding", 2),
    ]
  }

  #[test]
  fn test_filtered_reorder_keeps_outsiders_in_place() {
    let full = scenario();
    let merged = merge_subset(&full, &seq(&["C", "A"])).unwrap();
    assert_eq!(ids(&merged), vec!["C", "B", "A"]);
  }

  #[test]
  fn test_full_reorder() {
    let full = scenario();
    let merged = merge_subset(&full, &seq(&["B", "C", "A"])).unwrap();
    assert_eq!(ids(&merged), vec!["B", "C", "A"]);
  }

  #[test]
  fn test_identical_order_is_unchanged() {
    let full = scenario();
    let merged = merge_subset(&full, &seq(&["A", "B", "C"])).unwrap();
    assert_eq!(merged, full);

    let merged = merge_subset(&full, &seq(&["A", "C"])).unwrap();
    assert_eq!(merged, full);
  }

  #[test]
  fn test_subset_reorder_is_a_permutation() {
    let full: Vec<Item> = (0..12)
      .map(|i| item(&format!("r{}", i), if i % 3 == 0 { "boarding" } else { "delay" }, i))
      .collect();
    let subset = seq(&["r9", "r0", "r6", "r3"]);

    let merged = merge_subset(&full, &subset).unwrap();

    let mut before: Vec<&str> = ids(&full);
    let mut after: Vec<&str> = ids(&merged);
    before.sort();
    after.sort();
    assert_eq!(before, after);

    // Non-members keep their absolute positions
    for (index, record) in full.iter().enumerate() {
      if record.group_id == "delay" {
        assert_eq!(merged[index].id, record.id);
      }
    }
  }

  #[test]
  fn test_unknown_and_duplicate_ids_rejected() {
    let full = scenario();
    assert!(matches!(
      merge_subset(&full, &seq(&["C", "Z"])),
      Err(StoreError::NotFound(id)) if id == "Z"
    ));
    assert!(matches!(
      merge_subset(&full, &seq(&["C", "C"])),
      Err(StoreError::Validation(_))
    ));
  }

  #[test]
  fn test_move_up_lands_before_target() {
    let full = scenario();
    let moved = move_adjacent(&full, "C", "A").unwrap();
    assert_eq!(ids(&moved), vec!["C", "A", "B"]);
  }

  #[test]
  fn test_move_down_lands_after_target() {
    let full = vec![
      item("A", "boarding", 0),
      item("B", "delay", 1),
      item("C", "boarding", 2),
      item("D", "delay", 3),
    ];
    // Filtered view of "boarding" is [A, C]; dragging A onto C
    let moved = move_adjacent(&full, "A", "C").unwrap();
    assert_eq!(ids(&moved), vec!["B", "C", "A", "D"]);
  }

  #[test]
  fn test_move_onto_itself_is_noop() {
    let full = scenario();
    let moved = move_adjacent(&full, "B", "B").unwrap();
    assert!(same_sequence(&moved, &full));
  }

  #[test]
  fn test_renumber() {
    let mut records = vec![item("x", "g", 7), item("y", "g", 3)];
    renumber(&mut records);
    assert_eq!(records[0].order, 0);
    assert_eq!(records[1].order, 1);
  }
}
