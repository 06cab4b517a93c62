//! Shared services
//!
//! Everything the three contexts share: configuration, the persistent store,
//! the durable artifact area, the message bus and the optional server client.

use crate::bus::MessageBus;
use crate::config::Config;
use crate::recorder::writer::ArtifactStore;
use crate::store::{ActivityLog, SharedStore, TempFileRegistry};
use crate::upload::api::SessionApi;
use crate::utils::error::AppResult;
use std::sync::Arc;

/// Subdirectory of the data root holding artifacts
pub const ARTIFACTS_DIR: &str = "recordings";

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub store: SharedStore,
    pub artifacts: ArtifactStore,
    pub bus: MessageBus,
    /// `None` in offline mode
    pub api: Option<SessionApi>,
}

impl Services {
    /// Open the store under the configured data directory and build the server client
    pub fn open(config: Config) -> AppResult<Self> {
        let data_dir = config.storage.data_dir.clone();
        std::fs::create_dir_all(&data_dir)?;

        let store = SharedStore::in_dir(&data_dir)?;
        let artifacts = ArtifactStore::new(data_dir.join(ARTIFACTS_DIR));
        let api = SessionApi::from_config(&config.server)?;

        tracing::info!(
            "Services ready (data: {:?}, server: {})",
            data_dir,
            api.as_ref().map(|a| a.base_url()).unwrap_or("offline")
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            artifacts,
            bus: MessageBus::new(),
            api,
        })
    }

    pub fn registry(&self) -> TempFileRegistry {
        TempFileRegistry::new(self.store.clone())
    }

    pub fn activity(&self) -> ActivityLog {
        ActivityLog::new(self.store.clone())
    }

    pub fn is_online(&self) -> bool {
        self.api.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_offline() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");

        let services = Services::open(config).unwrap();
        assert!(!services.is_online());
        assert_eq!(services.artifacts.root(), dir.path().join("data").join(ARTIFACTS_DIR));
        assert!(services.store.path().starts_with(dir.path()));
    }
}
