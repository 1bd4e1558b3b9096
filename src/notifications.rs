//! Latest unread notifications, refreshed by its own poller.

use std::sync::{PoisonError, RwLock};

use compact_str::CompactString;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::processor::record_id;

pub const PREVIEW_LEN: usize = 5;
pub const EXCERPT_CHARS: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub notification_id: CompactString,
    pub title: String,
    pub message: String,
}

impl TryFrom<&Value> for Notification {
    type Error = Error;

    fn try_from(raw: &Value) -> Result<Self> {
        let notification_id = raw
            .get("notification_id")
            .and_then(record_id)
            .ok_or_else(|| Error::MalformedRecord("notification without id".to_string()))?;
        let title = raw
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedRecord(format!("notification {notification_id}: missing title")))?;
        let message = raw.get("message").and_then(Value::as_str).unwrap_or_default();

        Ok(Self {
            notification_id,
            title: title.to_string(),
            message: message.to_string(),
        })
    }
}

/// Short form for list widgets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NotificationPreview {
    pub notification_id: CompactString,
    pub title: String,
    pub excerpt: String,
}

impl From<&Notification> for NotificationPreview {
    fn from(n: &Notification) -> Self {
        let mut excerpt: String = n.message.chars().take(EXCERPT_CHARS).collect();
        if n.message.chars().count() > EXCERPT_CHARS {
            excerpt.push_str("...");
        }
        Self {
            notification_id: n.notification_id.clone(),
            title: n.title.clone(),
            excerpt,
        }
    }
}

#[derive(Debug, Default)]
pub struct NotificationFeed {
    latest: RwLock<Vec<Notification>>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held list with the well-formed records of `records`.
    pub fn apply(&self, records: &[Value]) {
        let parsed: Vec<Notification> = records
            .iter()
            .filter_map(|raw| {
                Notification::try_from(raw)
                    .inspect_err(|e| tracing::warn!(code = e.code(), "skipping notification: {e}"))
                    .ok()
            })
            .collect();

        tracing::debug!(count = parsed.len(), "notifications refreshed");
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = parsed;
    }

    pub fn count(&self) -> usize {
        self.latest.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.latest.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The first few notifications with their messages shortened.
    pub fn preview(&self) -> Vec<NotificationPreview> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .take(PREVIEW_LEN)
            .map(NotificationPreview::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn records(value: Value) -> Vec<Value> {
        value.as_array().cloned().unwrap()
    }

    #[test]
    fn apply_replaces_the_list_and_skips_bad_records() {
        let feed = NotificationFeed::new();
        feed.apply(&records(json!([
            {"notification_id": 1, "title": "Route change", "message": "Bus 3 now stops at the library."},
            {"title": "no id"},
            {"notification_id": "2", "message": "no title"},
            {"notification_id": "a9", "title": "Delay"},
        ])));

        assert_eq!(feed.count(), 2);
        let all = feed.all();
        assert_eq!(all[0].notification_id, "1");
        assert_eq!(all[1].message, "");

        feed.apply(&[]);
        assert_eq!(feed.count(), 0);
    }

    #[test]
    fn preview_takes_five_and_truncates() {
        let feed = NotificationFeed::new();
        let long = "x".repeat(80);
        let list: Vec<Value> = (0..7)
            .map(|i| json!({"notification_id": i, "title": format!("n{i}"), "message": long}))
            .collect();
        feed.apply(&list);

        let preview = feed.preview();
        assert_eq!(preview.len(), 5);
        assert_eq!(preview[0].excerpt, format!("{}...", "x".repeat(50)));
    }

    #[test]
    fn short_messages_are_not_marked_truncated() {
        let n = Notification {
            notification_id: "1".into(),
            title: "Hi".to_string(),
            message: "Bus 1 is running late".to_string(),
        };
        assert_eq!(NotificationPreview::from(&n).excerpt, "Bus 1 is running late");
    }
}
