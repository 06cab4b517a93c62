//! Activity log
//!
//! Forensic, user-facing trail of what every context did. Stored in the shared
//! store, uploaded with the recording, and exported next to local artifacts.

use super::{keys, SharedStore};
use crate::utils::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub time_act: DateTime<Utc>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

#[derive(Clone)]
pub struct ActivityLog {
    store: SharedStore,
}

impl ActivityLog {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Append an entry. Logging must never break the caller, so a failed
    /// write only produces a warning.
    pub fn record(&self, action: &str, details: Value) {
        let entry = ActivityEntry {
            time_act: Utc::now(),
            action: action.to_string(),
            details,
        };

        let result = self.store.update_raw(keys::ACTIVITY_LOG, |current| {
            let mut entries = match current {
                Some(raw) => salvage(raw),
                None => Vec::new(),
            };
            entries.push(entry);
            Ok((Some(serde_json::to_value(entries)?), ()))
        });

        if let Err(e) = result {
            tracing::warn!("Failed to append activity '{}': {}", action, e);
        }
    }

    pub fn action(&self, action: &str) {
        self.record(action, Value::Null);
    }

    /// Record an error occurrence before it is translated into a state change
    pub fn error(&self, action: &str, error: &AppError) {
        self.record(action, serde_json::json!({ "error": error.to_string() }));
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.store
            .get::<Vec<ActivityEntry>>(keys::ACTIVITY_LOG)
            .unwrap_or_default()
    }

    pub fn clear(&self) -> AppResult<()> {
        self.store.remove(keys::ACTIVITY_LOG)
    }

    /// Drop entries older than `window` relative to `now`. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>, window: chrono::Duration) -> AppResult<usize> {
        self.store
            .update::<Vec<ActivityEntry>, _, _>(keys::ACTIVITY_LOG, |current| {
                let entries = current.unwrap_or_default();
                let before = entries.len();
                let kept: Vec<ActivityEntry> = entries
                    .into_iter()
                    .filter(|e| now - e.time_act <= window)
                    .collect();
                let removed = before - kept.len();
                if kept.is_empty() {
                    (None, removed)
                } else {
                    (Some(kept), removed)
                }
            })
    }

    pub fn to_pretty_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(&self.entries())?)
    }
}

/// Parse a stored log. Anything unreadable is kept as a single wrapped entry.
fn salvage(raw: Value) -> Vec<ActivityEntry> {
    match serde_json::from_value::<Vec<ActivityEntry>>(raw.clone()) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Stored activity log is malformed, wrapping it: {}", e);
            vec![ActivityEntry {
                time_act: Utc::now(),
                action: "Invalid logs".to_string(),
                details: serde_json::json!({ "error": "Invalid logs", "raw_data": raw }),
            }]
        }
    }
}
