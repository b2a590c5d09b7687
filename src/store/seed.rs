//! Stock categories and announcements for a fresh installation.

use super::record::{Group, Item};

/// Categories shipped with a fresh installation, in tab order.
pub fn groups() -> Vec<Group> {
  [
    ("boarding", "Boarding"),
    ("delay", "Delays"),
    ("arrival", "Arrivals"),
    ("safety", "Safety"),
  ]
  .into_iter()
  .enumerate()
  .map(|(order, (id, label))| Group {
    id: id.to_string(),
    label: label.to_string(),
    order: order as i64,
  })
  .collect()
}

/// Announcements shipped with a fresh installation, in display order.
pub fn items() -> Vec<Item> {
  let stock: [(&str, &str, &str, &[&str]); 5] = [
    (
      "board-1",
      "boarding",
      "Initial boarding call",
      &[
        "Welcome aboard. We are now inviting passengers in Group 1 and Group 2 to begin boarding.",
        "Please have your boarding pass and identification ready.",
        "All other passengers may remain seated until their group is called.",
      ],
    ),
    (
      "board-2",
      "boarding",
      "Final boarding call",
      &[
        "This is the final boarding call for Flight AZ102 to São Paulo.",
        "All remaining passengers should proceed immediately to Gate 12.",
        "The aircraft door will close in five minutes.",
      ],
    ),
    (
      "delay-1",
      "delay",
      "Departure delay",
      &[
        "We regret to inform you that Flight AZ102 is delayed due to operational reasons.",
        "The new estimated departure time is 18:40.",
        "Thank you for your patience while we prepare the aircraft.",
      ],
    ),
    (
      "arrival-1",
      "arrival",
      "Arrival gate update",
      &[
        "Flight AZ215 has arrived and is taxiing to Gate 8.",
        "Please allow arriving passengers to exit first before approaching the gate area.",
      ],
    ),
    (
      "safety-1",
      "safety",
      "Safety reminder",
      &[
        "For your safety, please keep the gate area clear of unattended baggage.",
        "Report any suspicious items to airport security immediately.",
      ],
    ),
  ];

  stock
    .into_iter()
    .enumerate()
    .map(|(order, (id, group_id, title, content))| Item {
      id: id.to_string(),
      title: title.to_string(),
      content: content.iter().map(|s| s.to_string()).collect(),
      group_id: group_id.to_string(),
      active: true,
      order: order as i64,
    })
    .collect()
}
