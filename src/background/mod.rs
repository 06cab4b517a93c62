//! Background coordinator
//!
//! Long-lived context that relays control-panel intents to the capture
//! surface, keeps at most one capture surface alive, and owns the deferred
//! cleanup alarm.

pub mod cleanup;
pub mod surfaces;

pub use cleanup::CleanupAlarm;
pub use surfaces::{Admission, SurfaceLauncher, SurfaceRegistry};

use crate::bus::{next_envelope, Envelope, Message, Reply, SurfaceId};
use crate::context::Services;
use crate::utils::error::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub struct BackgroundCoordinator {
    services: Services,
    launcher: Arc<dyn SurfaceLauncher>,
    surfaces: SurfaceRegistry,
    alarm: CleanupAlarm,
    inbox: broadcast::Receiver<Envelope>,
}

impl BackgroundCoordinator {
    /// Subscribes immediately, so nothing sent after construction is missed
    pub fn new(services: Services, launcher: Arc<dyn SurfaceLauncher>) -> Self {
        let inbox = services.bus.subscribe();
        let alarm = CleanupAlarm::new(services.store.clone(), services.artifacts.clone());
        Self {
            services,
            launcher,
            surfaces: SurfaceRegistry::new(),
            alarm,
            inbox,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Background coordinator started");
        self.alarm.restore();

        while let Some(envelope) = next_envelope(&mut self.inbox).await {
            self.dispatch(envelope).await;
        }
        tracing::info!("Background coordinator stopped");
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        let bus = self.services.bus.clone();
        let activity = self.services.activity();

        match &envelope.message {
            Message::StartRecord { form_data } => {
                activity.action("Relay start record");
                if self.ensure_surface(&envelope).await {
                    bus.send(Message::StartRecording {
                        form_data: form_data.clone(),
                    });
                }
            }
            Message::StopRecord => {
                activity.action("Relay stop record");
                bus.send(Message::StopRecording);
            }
            Message::GetPermissions => {
                activity.action("Relay get permissions");
                if self.ensure_surface(&envelope).await {
                    bus.send(Message::GetPermissionsMedia);
                }
            }
            Message::UploadVideo => {
                activity.action("Relay upload video");
                if self.ensure_surface(&envelope).await {
                    bus.send(Message::UploadVideoMedia);
                }
            }
            Message::ScheduleCleanup { delay_minutes } => {
                let armed = Duration::try_from_secs_f64(delay_minutes.max(0.0) * 60.0)
                    .map_err(|e| {
                        AppError::Config(format!("invalid cleanup delay {} minutes: {}", delay_minutes, e))
                    })
                    .and_then(|delay| self.alarm.arm(delay));
                let reply = match armed {
                    Ok(_) => Reply::ok(),
                    Err(e) => {
                        tracing::error!("Failed to arm deferred cleanup: {}", e);
                        Reply::err(e)
                    }
                };
                envelope.respond(reply);
            }
            Message::CancelCleanup => {
                if let Err(e) = self.alarm.disarm() {
                    tracing::warn!("Failed to disarm deferred cleanup: {}", e);
                }
            }
            Message::ClearLogs => {
                let reply = match activity.clear() {
                    Ok(()) => Reply::ok(),
                    Err(e) => Reply::err(e),
                };
                envelope.respond(reply);
            }
            Message::SurfaceLoaded { surface } => self.on_surface_loaded(*surface).await,
            Message::SurfaceClosed { surface } => {
                if self.surfaces.release(*surface) {
                    tracing::info!("Capture surface {} closed", surface);
                }
            }
            _ => {}
        }
    }

    /// Make sure a capture surface is listening. Returns false (after
    /// replying to the requester and notifying the user) when none could be opened.
    async fn ensure_surface(&mut self, envelope: &Envelope) -> bool {
        match self.surface().await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to open capture surface: {}", e);
                self.services.activity().error("Open capture surface fails", &e);
                self.services
                    .bus
                    .send(Message::notice("Could not open the recording surface", vec![e.to_string()]));
                envelope.respond(Reply::err(e));
                false
            }
        }
    }

    async fn surface(&mut self) -> AppResult<SurfaceId> {
        if let Some(id) = self.surfaces.active() {
            if self.launcher.is_open(id) {
                return Ok(id);
            }
            self.surfaces.release(id);
        }

        let id = self.launcher.open().await?;
        self.surfaces.admit(id);
        tracing::info!("Opened capture surface {}", id);
        Ok(id)
    }

    async fn on_surface_loaded(&mut self, surface: SurfaceId) {
        match self.surfaces.admit(surface) {
            Admission::Accepted | Admission::AlreadyKnown => {}
            Admission::Duplicate { original } => {
                if !self.launcher.is_open(original) {
                    self.surfaces.release(original);
                    self.surfaces.admit(surface);
                    return;
                }

                tracing::warn!("Closing duplicate capture surface {}", surface);
                self.services
                    .activity()
                    .record("Close duplicate surface", serde_json::json!({ "surface": surface }));
                if let Err(e) = self.launcher.close(surface).await {
                    tracing::warn!("Failed to close duplicate surface: {}", e);
                }
                if let Err(e) = self.launcher.focus(original).await {
                    tracing::warn!("Failed to focus capture surface: {}", e);
                }
            }
        }
    }
}
