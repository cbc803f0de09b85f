//! The notification event record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::NotificationId;

/// Delivery urgency of a notification.
///
/// Labels that do not name a known priority deserialize (and parse) to
/// [`Priority::Unrecognized`] instead of failing, so a producer can never make
/// ingress reject an event on this field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    #[serde(other)]
    Unrecognized,
}

impl Priority {
    /// Parse a priority label, case-insensitively.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "LOW" => Priority::Low,
            "MEDIUM" => Priority::Medium,
            "HIGH" => Priority::High,
            _ => Priority::Unrecognized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Unrecognized => "UNRECOGNIZED",
        }
    }
}

impl core::fmt::Display for Priority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a notification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    /// Accepted, delivery round still open.
    #[default]
    Pending,
    /// Every routed channel delivered.
    Sent,
    /// At least one routed channel gave up.
    Failed,
}

impl NotificationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NotificationStatus::Sent | NotificationStatus::Failed)
    }
}

/// A single notification request.
///
/// - `id` is `None` until ingress stamps it (or the producer supplies one)
/// - `status` is owned by the engine; producers' values are reset on ingress
/// - snapshots in the history log are plain clones of this record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Option<NotificationId>,
    pub source: String,
    pub message: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: NotificationStatus,
}

impl NotificationEvent {
    /// Create an unidentified, pending event timestamped now.
    pub fn new(source: impl Into<String>, message: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: None,
            source: source.into(),
            message: message.into(),
            priority,
            timestamp: Utc::now(),
            status: NotificationStatus::Pending,
        }
    }

    /// Supply an identifier up front (ingress will keep it).
    pub fn with_id(mut self, id: impl Into<NotificationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = at;
        self
    }

    /// Assign a fresh identifier if none (or a blank one) is set; returns the
    /// effective id.
    pub fn ensure_id(&mut self) -> NotificationId {
        match &self.id {
            Some(id) if !id.is_blank() => id.clone(),
            _ => {
                let id = NotificationId::new();
                self.id = Some(id.clone());
                id
            }
        }
    }

    /// Return a copy carrying `status`.
    pub fn with_status(&self, status: NotificationStatus) -> Self {
        let mut copy = self.clone();
        copy.status = status;
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ensure_id_assigns_once() {
        let mut event = NotificationEvent::new("test", "hello", Priority::Low);
        assert!(event.id.is_none());

        let first = event.ensure_id();
        let second = event.ensure_id();
        assert_eq!(first, second);
        assert_eq!(event.id.as_ref(), Some(&first));
    }

    #[test]
    fn ensure_id_keeps_supplied_id() {
        let mut event = NotificationEvent::new("test", "hello", Priority::High).with_id("caller-7");
        assert_eq!(event.ensure_id(), NotificationId::from("caller-7"));
    }

    #[test]
    fn ensure_id_replaces_blank_ids() {
        let mut a = NotificationEvent::new("test", "a", Priority::Low).with_id("");
        let mut b = NotificationEvent::new("test", "b", Priority::Low).with_id("   ");

        let (id_a, id_b) = (a.ensure_id(), b.ensure_id());
        assert_ne!(id_a, id_b);
        assert!(!id_a.is_blank());
        assert_eq!(a.id, Some(id_a.clone()));
        assert_eq!(a.ensure_id(), id_a);
    }

    #[test]
    fn unknown_priority_label_deserializes_to_unrecognized() {
        let json = serde_json::json!({
            "id": null,
            "source": "billing",
            "message": "invoice overdue",
            "priority": "URGENT",
            "timestamp": "2024-01-01T00:00:00Z"
        });

        let event: NotificationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.priority, Priority::Unrecognized);
        assert_eq!(event.status, NotificationStatus::Pending);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!NotificationStatus::Pending.is_terminal());
        assert!(NotificationStatus::Sent.is_terminal());
        assert!(NotificationStatus::Failed.is_terminal());
    }

    proptest! {
        /// Property: every known label parses regardless of case or padding;
        /// anything else is unrecognized rather than an error.
        #[test]
        fn priority_parse_is_total(label in "[ a-zA-Z]{0,8}") {
            let parsed = Priority::parse(&label);
            let normalized = label.trim().to_ascii_uppercase();
            let expected = match normalized.as_str() {
                "LOW" => Priority::Low,
                "MEDIUM" => Priority::Medium,
                "HIGH" => Priority::High,
                _ => Priority::Unrecognized,
            };
            prop_assert_eq!(parsed, expected);
        }

        #[test]
        fn known_labels_parse_in_any_case(idx in 0usize..3, upper in any::<bool>()) {
            let known = [Priority::Low, Priority::Medium, Priority::High][idx];
            let label = if upper {
                known.as_str().to_string()
            } else {
                known.as_str().to_ascii_lowercase()
            };
            prop_assert_eq!(Priority::parse(&label), known);
        }
    }
}
