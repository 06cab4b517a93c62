//! Capture surface
//!
//! The context that actually records. It listens for relayed intents, feeds
//! them to its [`SessionOrchestrator`], and reacts to device loss and the
//! duration limit in the same loop. On exit it finalizes any running
//! recording, resets the shared button state and announces its closure.

use crate::background::SurfaceLauncher;
use crate::bus::{next_envelope, Envelope, Message, Reply, SurfaceId};
use crate::capture::DeviceProvider;
use crate::context::Services;
use crate::recorder::orchestrator::SessionOrchestrator;
use crate::recorder::state::SessionState;
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

pub struct CaptureSurface {
    id: SurfaceId,
    orchestrator: SessionOrchestrator,
    inbox: broadcast::Receiver<Envelope>,
    close_rx: oneshot::Receiver<()>,
}

impl CaptureSurface {
    /// Subscribes immediately, so relays sent right after construction arrive
    pub fn new(
        id: SurfaceId,
        services: Services,
        provider: Arc<dyn DeviceProvider>,
        close_rx: oneshot::Receiver<()>,
    ) -> Self {
        let inbox = services.bus.subscribe();
        Self {
            id,
            orchestrator: SessionOrchestrator::new(services, provider),
            inbox,
            close_rx,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub async fn run(mut self) {
        let bus = self.orchestrator.services().bus.clone();
        bus.send(Message::SurfaceLoaded { surface: self.id });
        tracing::info!("Capture surface {} loaded", self.id);

        loop {
            tokio::select! {
                _ = &mut self.close_rx => break,
                envelope = next_envelope(&mut self.inbox) => match envelope {
                    Some(envelope) => self.dispatch(envelope).await,
                    None => break,
                },
                interrupt = self.orchestrator.next_interrupt() => {
                    if let Err(e) = self.orchestrator.handle_interrupt(interrupt).await {
                        tracing::error!("Failed to handle {:?}: {}", interrupt, e);
                    }
                }
            }
        }

        self.unload().await;
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        let result: Option<AppResult<()>> = match &envelope.message {
            Message::GetPermissionsMedia => Some(self.orchestrator.acquire_permissions().await),
            Message::StartRecording { form_data } => {
                Some(self.orchestrator.start_record(form_data).await)
            }
            Message::StopRecording => {
                // a stop for a recording that is not running is ignored
                if self.orchestrator.is_recording() {
                    Some(self.orchestrator.stop_record().await.map(|_| ()))
                } else {
                    None
                }
            }
            Message::UploadVideoMedia => Some(self.orchestrator.upload().await.map(|_| ())),
            _ => None,
        };

        match result {
            Some(Ok(())) => {
                envelope.respond(Reply::ok());
            }
            Some(Err(e)) => {
                tracing::warn!("{:?} failed: {}", envelope.message, e);
                envelope.respond(Reply::err(e));
            }
            None => {}
        }
    }

    async fn unload(&mut self) {
        self.orchestrator.shutdown().await;
        self.orchestrator.publish(SessionState::NeedPermissions);
        self.orchestrator
            .services()
            .bus
            .send(Message::SurfaceClosed { surface: self.id });
        tracing::info!("Capture surface {} closed", self.id);
    }
}

struct OpenSurface {
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Runs capture surfaces as tasks in this process
pub struct InProcessSurfaces {
    services: Services,
    provider: Arc<dyn DeviceProvider>,
    open: Mutex<HashMap<SurfaceId, OpenSurface>>,
}

impl InProcessSurfaces {
    pub fn new(services: Services, provider: Arc<dyn DeviceProvider>) -> Self {
        Self {
            services,
            provider,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Surfaces whose task is still running
    pub fn open_surfaces(&self) -> Vec<SurfaceId> {
        self.open
            .lock()
            .iter()
            .filter(|(_, s)| !s.task.is_finished())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Close every surface and wait for each to finish unloading
    pub async fn close_all(&self) {
        let surfaces: Vec<OpenSurface> = self.open.lock().drain().map(|(_, s)| s).collect();
        for mut surface in surfaces {
            if let Some(tx) = surface.close_tx.take() {
                let _ = tx.send(());
            }
            if let Err(e) = surface.task.await {
                tracing::warn!("Capture surface task failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl SurfaceLauncher for InProcessSurfaces {
    async fn open(&self) -> AppResult<SurfaceId> {
        let id = SurfaceId::new();
        let (close_tx, close_rx) = oneshot::channel();
        let surface = CaptureSurface::new(id, self.services.clone(), self.provider.clone(), close_rx);
        let task = tokio::spawn(surface.run());

        self.open.lock().insert(
            id,
            OpenSurface {
                close_tx: Some(close_tx),
                task,
            },
        );
        Ok(id)
    }

    async fn focus(&self, id: SurfaceId) -> AppResult<()> {
        if self.is_open(id) {
            tracing::info!("Focusing capture surface {}", id);
            Ok(())
        } else {
            Err(AppError::Bus(format!("capture surface {} is not open", id)))
        }
    }

    async fn close(&self, id: SurfaceId) -> AppResult<()> {
        let surface = self.open.lock().remove(&id);
        if let Some(mut surface) = surface {
            if let Some(tx) = surface.close_tx.take() {
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    fn is_open(&self, id: SurfaceId) -> bool {
        self.open
            .lock()
            .get(&id)
            .map(|s| !s.task.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticDevices;
    use crate::capture::StreamKind;
    use crate::config::Config;
    use crate::recorder::metadata::FormData;
    use crate::store::keys;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn services(dir: &TempDir) -> Services {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");
        config.storage.downloads_dir = dir.path().join("downloads");
        config.storage.min_free_bytes = 0;
        config.recording.chunk_interval_ms = 10;
        Services::open(config).unwrap()
    }

    async fn wait_for_state(rx: &mut broadcast::Receiver<Envelope>, state: SessionState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let envelope = next_envelope(rx).await.unwrap();
                if envelope.message == (Message::UpdateButtonStates { state }) {
                    return;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_surface_drives_orchestrator() {
        let dir = tempdir().unwrap();
        let services = services(&dir);
        let provider = Arc::new(SyntheticDevices::new().with_payload(8));
        let surfaces = InProcessSurfaces::new(services.clone(), provider.clone());
        let mut rx = services.bus.subscribe();

        let id = surfaces.open().await.unwrap();
        assert!(surfaces.is_open(id));

        let reply = services
            .bus
            .request(Message::GetPermissionsMedia, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(reply.success);
        wait_for_state(&mut rx, SessionState::ReadyToRecord).await;

        services.bus.send(Message::StartRecording {
            form_data: FormData::default(),
        });
        wait_for_state(&mut rx, SessionState::Recording).await;

        provider.revoke(StreamKind::Screen);
        wait_for_state(&mut rx, SessionState::NeedPermissions).await;

        assert_eq!(
            services.store.get::<SessionState>(keys::BUTTON_STATE),
            Some(SessionState::NeedPermissions)
        );
        assert!(services.registry().is_empty());
        surfaces.close_all().await;
    }

    #[tokio::test]
    async fn test_close_finalizes_and_announces() {
        let dir = tempdir().unwrap();
        let services = services(&dir);
        let provider = Arc::new(SyntheticDevices::new().with_payload(8));
        let surfaces = InProcessSurfaces::new(services.clone(), provider);
        let mut rx = services.bus.subscribe();

        let id = surfaces.open().await.unwrap();
        services.bus.send(Message::GetPermissionsMedia);
        wait_for_state(&mut rx, SessionState::ReadyToRecord).await;
        services.bus.send(Message::StartRecording {
            form_data: FormData::default(),
        });
        wait_for_state(&mut rx, SessionState::Recording).await;

        surfaces.close_all().await;

        assert!(!surfaces.is_open(id));
        let mut closed = false;
        while let Ok(envelope) = rx.try_recv() {
            if envelope.message == (Message::SurfaceClosed { surface: id }) {
                closed = true;
            }
        }
        assert!(closed);
        assert_eq!(
            services.store.get::<SessionState>(keys::BUTTON_STATE),
            Some(SessionState::NeedPermissions)
        );
        let names: crate::recorder::metadata::FileNames = services.store.get(keys::FILE_NAMES).unwrap();
        assert!(dir.path().join("downloads").join(&names.camera).exists());
    }
}
