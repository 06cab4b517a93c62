//! Upload pipeline
//!
//! Assembles the registered artifacts, the stored metadata and the activity
//! log into one request. Success clears the registry, disarms the deferred
//! cleanup and clears the log. Failure leaves all of them untouched so a
//! retry sends exactly the same artifacts.

pub mod api;

pub use api::{SessionApi, UploadFile, UploadRequest};

use crate::bus::Message;
use crate::context::Services;
use crate::recorder::metadata::{format_timestamp, ArtifactKind, FileNames, SessionMetadata};
use crate::store::keys;
use crate::utils::error::{AppError, AppResult};
use chrono::Utc;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub session_id: String,
    pub files: Vec<String>,
    /// Copy of the activity log left in the downloads directory
    pub exported_log: Option<PathBuf>,
    pub response: serde_json::Value,
}

pub struct UploadPipeline<'a> {
    services: &'a Services,
    api: &'a SessionApi,
}

impl<'a> UploadPipeline<'a> {
    pub fn new(services: &'a Services, api: &'a SessionApi) -> Self {
        Self { services, api }
    }

    /// Names to send: the registry, narrowed to the current session when known
    pub fn pending_files(&self) -> Vec<String> {
        let mut files = self.services.registry().list();
        if let Some(names) = self.services.store.get::<FileNames>(keys::FILE_NAMES) {
            files.retain(|f| names.all().contains(&f.as_str()));
        }
        files
    }

    pub async fn run(&self, metadata: SessionMetadata) -> AppResult<UploadReceipt> {
        let activity = self.services.activity();

        let session_id: String = self
            .services
            .store
            .get(keys::SESSION_ID)
            .ok_or_else(|| AppError::SessionPrecondition("no session id".to_string()))?;

        let files = self.pending_files();
        if files.is_empty() {
            return Err(AppError::SessionPrecondition(
                "no recordings registered for upload".to_string(),
            ));
        }

        activity.record(
            "Prepare upload payload",
            serde_json::json!({ "sessionId": session_id, "fileNames": files }),
        );

        let upload_files = files
            .iter()
            .map(|name| UploadFile {
                kind: ArtifactKind::classify(name),
                file_name: name.clone(),
                path: self.services.artifacts.path_of(name),
            })
            .collect();

        let logs = if activity.entries().is_empty() {
            None
        } else {
            Some(activity.to_pretty_json()?)
        };

        let exported_log = match &logs {
            Some(logs) => {
                let name = format!(
                    "extension_logs_{}_{}.json",
                    session_id,
                    format_timestamp(Utc::now())
                );
                export_text(self.services, &name, logs).await
            }
            None => None,
        };

        activity.record(
            "Send upload request",
            serde_json::json!({ "sessionId": session_id }),
        );

        let response = self
            .api
            .upload_video(UploadRequest {
                session_id: session_id.clone(),
                files: upload_files,
                metadata,
                logs,
            })
            .await
            .map_err(|e| {
                activity.error("Upload video fails", &e);
                e
            })?;

        tracing::info!("Upload of session {} accepted", session_id);

        // the server already has the session; cleanup failures are only logged
        if let Err(e) = self.services.registry().purge(&self.services.artifacts).await {
            tracing::warn!("Failed to purge uploaded files: {}", e);
        }
        self.services.bus.send(Message::CancelCleanup);
        if let Err(e) = activity.clear() {
            tracing::warn!("Failed to clear activity log after upload: {}", e);
        }

        Ok(UploadReceipt {
            session_id,
            files,
            exported_log,
            response,
        })
    }
}

/// Write the activity log to the downloads directory as `extension_logs_<ts>.json`.
/// Returns `None` when the log is empty or the write failed.
pub async fn export_activity_log(services: &Services) -> Option<PathBuf> {
    let activity = services.activity();
    if activity.entries().is_empty() {
        return None;
    }
    let logs = match activity.to_pretty_json() {
        Ok(logs) => logs,
        Err(e) => {
            tracing::warn!("Failed to serialize activity log: {}", e);
            return None;
        }
    };
    let name = format!("extension_logs_{}.json", format_timestamp(Utc::now()));
    export_text(services, &name, &logs).await
}

async fn export_text(services: &Services, name: &str, contents: &str) -> Option<PathBuf> {
    let dir = &services.config.storage.downloads_dir;
    let path = dir.join(name);
    let result = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, contents).await
    }
    .await;

    match result {
        Ok(()) => {
            tracing::info!("Exported {:?}", path);
            Some(path)
        }
        Err(e) => {
            tracing::warn!("Failed to export {}: {}", name, e);
            None
        }
    }
}
