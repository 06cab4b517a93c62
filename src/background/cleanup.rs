//! Deferred cleanup alarm
//!
//! Backstop that deletes every registered temporary file if a session is
//! never uploaded. The due time is persisted so a restarted coordinator can
//! re-arm it for the remaining time.

use crate::recorder::writer::ArtifactStore;
use crate::store::{keys, ActivityLog, SharedStore, TempFileRegistry};
use crate::utils::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct CleanupAlarm {
    store: SharedStore,
    artifacts: ArtifactStore,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupAlarm {
    pub fn new(store: SharedStore, artifacts: ArtifactStore) -> Self {
        Self {
            store,
            artifacts,
            task: Mutex::new(None),
        }
    }

    /// Arm (or re-arm) the alarm to fire after `delay`
    pub fn arm(&self, delay: Duration) -> AppResult<DateTime<Utc>> {
        let offset = chrono::Duration::from_std(delay)
            .map_err(|e| AppError::Config(format!("cleanup delay out of range: {}", e)))?;
        let due = Utc::now()
            .checked_add_signed(offset)
            .ok_or_else(|| AppError::Config(format!("cleanup delay out of range: {:?}", delay)))?;
        self.store.set(keys::CLEANUP_DUE_AT, &due)?;
        self.schedule(delay);

        tracing::info!("Deferred cleanup armed for {}", due);
        Ok(due)
    }

    /// Cancel the alarm. Disarming an idle alarm is a no-op.
    pub fn disarm(&self) -> AppResult<()> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::info!("Deferred cleanup disarmed");
        }
        self.store.remove(keys::CLEANUP_DUE_AT)
    }

    /// Re-arm from the persisted due time. Overdue alarms fire right away.
    pub fn restore(&self) -> bool {
        let Some(due) = self.store.get::<DateTime<Utc>>(keys::CLEANUP_DUE_AT) else {
            return false;
        };
        let remaining = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tracing::info!("Restoring deferred cleanup due at {}", due);
        self.schedule(remaining);
        true
    }

    pub fn is_armed(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    fn schedule(&self, delay: Duration) {
        let store = self.store.clone();
        let artifacts = self.artifacts.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(&store, &artifacts).await;
        });

        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }
}

impl Drop for CleanupAlarm {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn fire(store: &SharedStore, artifacts: &ArtifactStore) {
    let registry = TempFileRegistry::new(store.clone());
    let activity = ActivityLog::new(store.clone());

    match registry.purge(artifacts).await {
        Ok(removed) => {
            activity.record(
                "Deferred cleanup",
                serde_json::json!({ "removed": removed }),
            );
            if !registry.is_empty() {
                tracing::warn!("Deferred cleanup left {} file(s) registered", registry.list().len());
            }
            if let Err(e) = store.remove(keys::CLEANUP_DUE_AT) {
                tracing::warn!("Failed to clear cleanup due time: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("Deferred cleanup failed: {}", e);
            activity.error("Deferred cleanup fails", &e);
        }
    }
}
