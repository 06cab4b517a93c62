//! Recording session orchestrator
//!
//! Owns the session state machine. Acquires devices, starts the screen and
//! camera recorders together, enforces the free-space check and the maximum
//! duration, and turns device loss into exactly one teardown per session.
//! Every error that reaches this boundary is logged, appended to the activity
//! log and converted into a state change plus a user notice.

use super::channel::{Recorder, RecorderOutcome};
use super::metadata::{
    generate_session_id, Artifact, ArtifactKind, FileNames, FormData, SessionSummary, StopReason,
};
use super::state::SessionState;
use crate::bus::Message;
use crate::capture::{DeviceManager, DeviceProvider, Resolution, StreamKind};
use crate::context::Services;
use crate::store::{keys, ActivityLog, TempFileRegistry};
use crate::upload::{export_activity_log, UploadPipeline, UploadReceipt};
use crate::utils::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::future::pending;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

const CLEANUP_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Something the orchestrator must react to without being asked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    DeviceLost(StreamKind),
    /// Maximum recording duration reached
    Deadline,
}

/// Result of reporting a device loss
#[derive(Debug, Clone)]
pub enum LossOutcome {
    /// Not the first loss of this session
    Ignored,
    /// Nothing was being recorded: streams released, nothing kept
    TornDown,
    /// Recording stopped and its artifacts saved locally
    Preserved(SessionSummary),
}

struct Lane {
    recorder: Recorder,
    resolution: Option<Resolution>,
}

struct ActiveSession {
    session_id: String,
    started_at: DateTime<Utc>,
    deadline: Instant,
    names: FileNames,
    screen: Lane,
    camera: Lane,
}

pub struct SessionOrchestrator {
    services: Services,
    registry: TempFileRegistry,
    activity: ActivityLog,
    devices: DeviceManager,
    state: SessionState,
    /// First stream lost in the current acquisition; set at most once
    loss_latch: OnceLock<StreamKind>,
    active: Option<ActiveSession>,
    last_summary: Option<SessionSummary>,
}

impl SessionOrchestrator {
    pub fn new(services: Services, provider: Arc<dyn DeviceProvider>) -> Self {
        Self {
            registry: services.registry(),
            activity: services.activity(),
            devices: DeviceManager::new(provider),
            services,
            state: SessionState::NeedPermissions,
            loss_latch: OnceLock::new(),
            active: None,
            last_summary: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session_id.as_str())
    }

    pub fn last_summary(&self) -> Option<&SessionSummary> {
        self.last_summary.as_ref()
    }

    /// Record `state`, persist it and tell the control panel.
    /// Without a server, `readyToUpload` is published as `needPermissions`.
    pub fn publish(&mut self, state: SessionState) {
        let state = match state {
            SessionState::ReadyToUpload if !self.services.is_online() => SessionState::NeedPermissions,
            other => other,
        };

        if self.state != state {
            tracing::info!("Session state {} -> {}", self.state, state);
        }
        self.state = state;

        if let Err(e) = self.services.store.set(keys::BUTTON_STATE, &state) {
            tracing::warn!("Failed to persist button state: {}", e);
        }
        self.services.bus.send(Message::UpdateButtonStates { state });
    }

    fn notify(&self, title: &str, lines: Vec<String>) {
        self.services.bus.send(Message::notice(title, lines));
    }

    fn fail(&self, action: &str, error: &AppError) {
        tracing::error!("{}: {}", action, error);
        self.activity.error(action, error);
    }

    /// Acquire screen, microphone and camera
    pub async fn acquire_permissions(&mut self) -> AppResult<()> {
        if self.active.is_some() {
            return Err(AppError::InvalidTransition {
                state: self.state,
                action: "request permissions",
            });
        }

        self.activity.action("Get media devices");
        self.loss_latch = OnceLock::new();

        match self.devices.acquire().await {
            Ok(_) => {
                self.activity.action("Get media devices success");
                self.publish(SessionState::ReadyToRecord);
                self.notify(
                    "Ready to record",
                    vec![
                        "Permissions granted. You can start recording now.".to_string(),
                        "Do not stop sharing or close the recording surface while recording.".to_string(),
                        "If a permission is lost the recording stops and must be started again.".to_string(),
                    ],
                );
                Ok(())
            }
            Err(e) => {
                self.fail("Get media devices failed", &e);
                self.publish(SessionState::NeedPermissions);
                self.notify("Permissions required", vec![e.to_string()]);
                Err(e)
            }
        }
    }

    /// Start both recorders for a validated form
    pub async fn start_record(&mut self, form: &FormData) -> AppResult<()> {
        if self.state != SessionState::ReadyToRecord || self.active.is_some() {
            return Err(AppError::InvalidTransition {
                state: self.state,
                action: "start recording",
            });
        }

        // Refusals below leave the state untouched
        self.check_free_space().inspect_err(|e| {
            self.fail("Start recording refused", e);
            self.notify("Not enough disk space", vec![e.to_string()]);
        })?;

        if !self.devices.is_bound() {
            let kind = self
                .devices
                .devices()
                .and_then(|d| d.first_ended())
                .unwrap_or(StreamKind::Screen);
            let e = AppError::PermissionDenied {
                kind,
                reason: "capture stream not available".to_string(),
            };
            self.fail("Start recording refused", &e);
            return Err(e);
        }

        match self.begin(form).await {
            Ok(()) => {
                self.activity.action("Start recording succeeds");
                self.publish(SessionState::Recording);
                self.notify(
                    "Recording",
                    vec![
                        "Screen, microphone and camera recording has started.".to_string(),
                        "Use the stop button in the control panel to finish.".to_string(),
                    ],
                );
                Ok(())
            }
            Err(e) => {
                self.fail("Start recording fails", &e);
                self.devices.release();
                self.publish(SessionState::NeedPermissions);
                self.notify("Could not start recording", vec![e.to_string()]);
                Err(e)
            }
        }
    }

    fn check_free_space(&self) -> AppResult<()> {
        let required = self.services.config.storage.min_free_bytes;
        let available = self.services.artifacts.available_space().unwrap_or_else(|| {
            tracing::warn!("Free space could not be determined, assuming none");
            0
        });

        if available < required {
            return Err(AppError::InsufficientStorage {
                available,
                required,
            });
        }
        tracing::debug!("{} bytes free, {} required", available, required);
        Ok(())
    }

    async fn begin(&mut self, form: &FormData) -> AppResult<()> {
        let config = self.services.config.clone();
        let started_at = Utc::now();
        self.services.store.set(keys::LAST_RECORD_TIME, &started_at)?;

        let session_id = match &self.services.api {
            Some(api) => api.start_session(form).await?,
            None => {
                let id = generate_session_id(started_at);
                self.activity
                    .record("Generate session ID locally", json!({ "sessionId": id }));
                id
            }
        };
        self.services.store.set(keys::SESSION_ID, &session_id)?;

        let names = FileNames::new(&config.recording.file_prefix, started_at);
        for name in names.all() {
            self.registry.add(name)?;
        }
        self.services.store.set(keys::FILE_NAMES, &names)?;

        let devices = match self.devices.devices() {
            Some(devices) if devices.first_ended().is_none() => devices.clone(),
            Some(devices) => {
                let kind = devices.first_ended().unwrap_or(StreamKind::Screen);
                self.discard(&names).await;
                return Err(AppError::DeviceLost(kind));
            }
            None => {
                self.discard(&names).await;
                return Err(AppError::DeviceLost(StreamKind::Screen));
            }
        };

        let writers = async {
            let screen = self.services.artifacts.create_writer(&names.screen).await?;
            let camera = self.services.artifacts.create_writer(&names.camera).await?;
            AppResult::Ok((screen, camera))
        }
        .await;
        let (screen_writer, camera_writer) = match writers {
            Ok(writers) => writers,
            Err(e) => {
                self.discard(&names).await;
                return Err(e);
            }
        };

        let interval = config.recording.chunk_interval();
        let mut screen = Lane {
            recorder: Recorder::new(
                ArtifactKind::Screen,
                config.recording.screen_mime.clone(),
                vec![devices.screen.clone(), devices.microphone.clone()],
                interval,
            ),
            resolution: devices.screen.resolution(),
        };
        let mut camera = Lane {
            recorder: Recorder::new(
                ArtifactKind::Camera,
                config.recording.camera_mime.clone(),
                vec![devices.camera.clone()],
                interval,
            ),
            resolution: devices.camera.resolution(),
        };

        screen.recorder.start(screen_writer)?;
        camera.recorder.start(camera_writer)?;

        self.active = Some(ActiveSession {
            session_id: session_id.clone(),
            started_at,
            deadline: Instant::now() + config.recording.max_duration(),
            names,
            screen,
            camera,
        });

        self.schedule_cleanup(config.recording.cleanup_delay_minutes);

        tracing::info!("Recording session {} started", session_id);
        Ok(())
    }

    /// Ask the background coordinator to arm the deferred cleanup
    fn schedule_cleanup(&self, delay_minutes: f64) {
        let bus = self.services.bus.clone();
        tokio::spawn(async move {
            match bus
                .request(Message::ScheduleCleanup { delay_minutes }, CLEANUP_ACK_TIMEOUT)
                .await
            {
                Ok(reply) if reply.success => {
                    tracing::debug!("Deferred cleanup scheduled in {} minutes", delay_minutes)
                }
                Ok(reply) => tracing::warn!("Deferred cleanup refused: {:?}", reply.error),
                Err(e) => tracing::warn!("Deferred cleanup not confirmed: {}", e),
            }
        });
    }

    /// Delete and unregister artifacts that never received data
    async fn discard(&self, names: &FileNames) {
        for name in names.all() {
            if let Err(e) = self.services.artifacts.remove(name).await {
                tracing::warn!("Failed to delete {}: {}", name, e);
                continue;
            }
            if let Err(e) = self.registry.remove(name) {
                tracing::warn!("Failed to unregister {}: {}", name, e);
            }
        }
    }

    /// Stop on user request
    pub async fn stop_record(&mut self) -> AppResult<SessionSummary> {
        if self.state != SessionState::Recording || self.active.is_none() {
            return Err(AppError::InvalidTransition {
                state: self.state,
                action: "stop recording",
            });
        }
        self.activity.action("Stop recording");
        self.finish(StopReason::Manual).await
    }

    /// Report that a capture stream ended. Only the first report of an
    /// acquisition has any effect.
    pub async fn handle_device_loss(&mut self, kind: StreamKind) -> AppResult<LossOutcome> {
        if self.loss_latch.set(kind).is_err() {
            tracing::debug!("Ignoring loss of {}: session already handling a loss", kind);
            return Ok(LossOutcome::Ignored);
        }

        let error = AppError::DeviceLost(kind);
        self.fail("Capture stream lost", &error);

        // an active session always has both recorders started
        if self.active.is_some() {
            let summary = self.finish(StopReason::DeviceLost(kind)).await?;
            Ok(LossOutcome::Preserved(summary))
        } else {
            self.tear_down(&error);
            Ok(LossOutcome::TornDown)
        }
    }

    fn tear_down(&mut self, error: &AppError) {
        self.devices.release();
        self.publish(SessionState::NeedPermissions);
        self.notify(
            "Access lost",
            vec![
                error.to_string(),
                "Request permissions again to continue.".to_string(),
            ],
        );
    }

    /// Wait for the next event the orchestrator must handle on its own
    pub async fn next_interrupt(&mut self) -> Interrupt {
        let deadline = self.active.as_ref().map(|a| a.deadline);
        tokio::select! {
            kind = self.devices.next_loss() => Interrupt::DeviceLost(kind),
            _ = sleep_until_opt(deadline) => Interrupt::Deadline,
        }
    }

    pub async fn handle_interrupt(&mut self, interrupt: Interrupt) -> AppResult<Option<SessionSummary>> {
        match interrupt {
            Interrupt::DeviceLost(kind) => match self.handle_device_loss(kind).await? {
                LossOutcome::Preserved(summary) => Ok(Some(summary)),
                _ => Ok(None),
            },
            Interrupt::Deadline => {
                if self.active.is_none() {
                    return Ok(None);
                }
                tracing::warn!("Maximum recording duration reached");
                self.activity.action("Forced stop: maximum duration reached");
                self.finish(StopReason::Timeout).await.map(Some)
            }
        }
    }

    /// Stop both recorders, wait for both artifacts, save them and only then
    /// transition.
    async fn finish(&mut self, reason: StopReason) -> AppResult<SessionSummary> {
        let Some(mut active) = self.active.take() else {
            return Err(AppError::InvalidTransition {
                state: self.state,
                action: "finalize recording",
            });
        };

        let (screen_outcome, camera_outcome) =
            tokio::join!(active.screen.recorder.stop(), active.camera.recorder.stop());
        let ended_at = Utc::now();

        let mut lane_errors = Vec::new();
        let screen = self
            .finalize_lane(&active, &active.screen, &screen_outcome, &mut lane_errors)
            .await;
        let camera = self
            .finalize_lane(&active, &active.camera, &camera_outcome, &mut lane_errors)
            .await;

        let summary = SessionSummary {
            session_id: active.session_id.clone(),
            started_at: active.started_at,
            ended_at,
            reason,
            screen,
            camera,
            lane_errors,
        };

        if let Err(e) = self
            .services
            .store
            .set(keys::SESSION_METADATA, &summary.metadata())
        {
            self.fail("Save metadata fails", &e);
        }

        let downloads = self.services.config.storage.downloads_dir.clone();
        for artifact in summary.artifacts() {
            if let Err(e) = self
                .services
                .artifacts
                .export(&artifact.file_name, &downloads)
                .await
            {
                self.fail("Save recording locally fails", &e);
            }
        }

        self.devices.release();
        self.activity.record(
            "Recording finalized",
            json!({
                "sessionId": summary.session_id,
                "reason": reason,
                "duration": summary.duration(),
                "laneErrors": summary.lane_errors,
            }),
        );
        tracing::info!(
            "Session {} finalized ({:?}, {})",
            summary.session_id,
            reason,
            summary.duration()
        );

        let clean = !reason.is_forced() && summary.lane_errors.is_empty();
        if !self.services.is_online() {
            // offline, every stop hands off locally, forced or not
            self.hand_off_locally().await;
            self.publish(SessionState::NeedPermissions);
        } else if clean {
            self.publish(SessionState::ReadyToUpload);
        } else {
            self.publish(SessionState::NeedPermissions);
        }

        let title = match reason {
            StopReason::Manual => "Recording finished".to_string(),
            StopReason::DeviceLost(kind) => format!("Recording interrupted: {} access lost", kind),
            StopReason::Timeout => "Recording stopped: maximum duration reached".to_string(),
            StopReason::SurfaceClosed => "Recording stopped: recording surface closed".to_string(),
        };
        self.notify(&title, summary.lines());

        self.last_summary = Some(summary.clone());
        Ok(summary)
    }

    async fn finalize_lane(
        &self,
        active: &ActiveSession,
        lane: &Lane,
        outcome: &RecorderOutcome,
        lane_errors: &mut Vec<String>,
    ) -> Artifact {
        let kind = lane.recorder.kind();
        let file_name = active.names.get(kind).to_string();

        if let Some(error) = &outcome.error {
            lane_errors.push(format!("{}: {}", kind, error));
        }

        let size_bytes = match self.services.artifacts.size_of(&file_name).await {
            Ok(size) => size,
            Err(e) => {
                lane_errors.push(format!("{}: {}", kind, e));
                outcome.bytes
            }
        };

        Artifact {
            kind,
            file_name,
            mime_type: lane.recorder.mime_type().to_string(),
            resolution: lane.resolution,
            size_bytes,
        }
    }

    /// Offline completion: artifacts are already in downloads, so the
    /// temporary copies, the pending cleanup and the log go away.
    async fn hand_off_locally(&self) {
        export_activity_log(&self.services).await;

        if let Err(e) = self.registry.purge(&self.services.artifacts).await {
            self.fail("Delete temp files fails", &e);
        }
        self.services.bus.send(Message::CancelCleanup);

        if let Err(e) = self.activity.clear() {
            tracing::warn!("Failed to clear activity log: {}", e);
        }
    }

    /// Send the current session to the server
    pub async fn upload(&mut self) -> AppResult<UploadReceipt> {
        if self.active.is_some() {
            return Err(AppError::InvalidTransition {
                state: self.state,
                action: "upload",
            });
        }

        let Some(api) = self.services.api.clone() else {
            let e = AppError::SessionPrecondition("no server configured".to_string());
            self.fail("Upload video fails", &e);
            self.publish(SessionState::NeedPermissions);
            return Err(e);
        };

        self.activity.action("Start uploading");
        self.services.bus.send(Message::DisableButtons);

        let metadata = self
            .services
            .store
            .get(keys::SESSION_METADATA)
            .unwrap_or_default();
        let result = UploadPipeline::new(&self.services, &api).run(metadata).await;

        match result {
            Ok(receipt) => {
                self.activity.record(
                    "Upload video succeeds",
                    json!({ "sessionId": receipt.session_id }),
                );
                self.publish(SessionState::NeedPermissions);
                self.notify(
                    "Recording sent",
                    vec!["The recording was uploaded to the server.".to_string()],
                );
                Ok(receipt)
            }
            Err(e @ AppError::SessionPrecondition(_)) => {
                self.fail("Upload video fails", &e);
                self.publish(SessionState::NeedPermissions);
                self.notify("Nothing to upload", vec![e.to_string()]);
                Err(e)
            }
            Err(e) => {
                self.fail("Upload video fails", &e);
                self.publish(SessionState::FailedUpload);
                self.notify(
                    "Upload failed",
                    vec![
                        e.to_string(),
                        "The recording is kept locally. Try uploading again.".to_string(),
                    ],
                );
                Err(e)
            }
        }
    }

    /// Surface is going away: finalize any running recording and let go of
    /// every device.
    pub async fn shutdown(&mut self) {
        if self.active.is_some() {
            if let Err(e) = self.finish(StopReason::SurfaceClosed).await {
                self.fail("Finalize on close fails", &e);
            }
        }
        self.devices.release();
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::next_envelope;
    use crate::capture::synthetic::SyntheticDevices;
    use crate::config::Config;
    use crate::recorder::metadata::SessionMetadata;
    use tempfile::{tempdir, TempDir};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");
        config.storage.downloads_dir = dir.path().join("downloads");
        config.storage.min_free_bytes = 0;
        config.recording.chunk_interval_ms = 10;
        config
    }

    fn orchestrator(config: Config) -> (SessionOrchestrator, Arc<SyntheticDevices>) {
        let provider = Arc::new(SyntheticDevices::new().with_payload(4));
        let services = Services::open(config).unwrap();
        (SessionOrchestrator::new(services, provider.clone()), provider)
    }

    fn form() -> FormData {
        FormData {
            group: "G-1".into(),
            name: "Anna".into(),
            surname: "Ivanova".into(),
            patronymic: String::new(),
            link: "https://meet.example/room".into(),
        }
    }

    async fn recording(orchestrator: &mut SessionOrchestrator) {
        orchestrator.acquire_permissions().await.unwrap();
        orchestrator.start_record(&form()).await.unwrap();
        assert_eq!(orchestrator.state(), SessionState::Recording);
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    async fn mock_server(upload_status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/start_session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "srv-1" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload_video"))
            .respond_with(ResponseTemplate::new(upload_status).set_body_json(serde_json::json!({ "status": "ok" })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_permissions_lead_to_ready_to_record() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _) = orchestrator(config(&dir));
        let mut bus = orchestrator.services().bus.subscribe();

        orchestrator.acquire_permissions().await.unwrap();

        assert_eq!(orchestrator.state(), SessionState::ReadyToRecord);
        assert_eq!(
            orchestrator.services().store.get::<SessionState>(keys::BUTTON_STATE),
            Some(SessionState::ReadyToRecord)
        );
        let envelope = next_envelope(&mut bus).await.unwrap();
        assert_eq!(
            envelope.message,
            Message::UpdateButtonStates {
                state: SessionState::ReadyToRecord
            }
        );
    }

    #[tokio::test]
    async fn test_denied_permission_stays_in_need_permissions() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, provider) = orchestrator(config(&dir));
        provider.deny(StreamKind::Microphone);

        let err = orchestrator.acquire_permissions().await.unwrap_err();

        assert!(matches!(err, AppError::PermissionDenied { kind: StreamKind::Microphone, .. }));
        assert_eq!(orchestrator.state(), SessionState::NeedPermissions);
        assert!(orchestrator
            .services()
            .activity()
            .entries()
            .iter()
            .any(|e| e.action == "Get media devices failed"));
    }

    #[tokio::test]
    async fn test_start_refused_without_space_opens_nothing() {
        let dir = tempdir().unwrap();
        let mut config = config(&dir);
        config.storage.min_free_bytes = u64::MAX;
        let (mut orchestrator, _) = orchestrator(config);

        orchestrator.acquire_permissions().await.unwrap();
        let err = orchestrator.start_record(&form()).await.unwrap_err();

        assert!(matches!(err, AppError::InsufficientStorage { .. }));
        assert_eq!(orchestrator.state(), SessionState::ReadyToRecord);
        assert!(orchestrator.services().registry().is_empty());
        assert!(!orchestrator.services().artifacts.root().exists());
    }

    #[tokio::test]
    async fn test_start_requires_ready_to_record() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _) = orchestrator(config(&dir));

        let err = orchestrator.start_record(&form()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_names_registered_before_recording() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _) = orchestrator(config(&dir));

        orchestrator.acquire_permissions().await.unwrap();
        orchestrator.start_record(&form()).await.unwrap();

        let names: FileNames = orchestrator.services().store.get(keys::FILE_NAMES).unwrap();
        let registered = orchestrator.services().registry().list();
        assert_eq!(registered, vec![names.screen.clone(), names.camera.clone()]);
        assert!(names.screen.starts_with("proctoring_screen_"));
        assert_eq!(orchestrator.session_id().map(str::len), Some(24));

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_stop_offline_saves_and_cleans() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _) = orchestrator(config(&dir));
        recording(&mut orchestrator).await;

        let summary = orchestrator.stop_record().await.unwrap();

        assert_eq!(summary.reason, StopReason::Manual);
        assert!(summary.screen.size_bytes > 0);
        assert!(summary.camera.size_bytes > 0);
        assert_eq!(orchestrator.state(), SessionState::NeedPermissions);

        let downloads = dir.path().join("downloads");
        assert!(downloads.join(&summary.screen.file_name).exists());
        assert!(downloads.join(&summary.camera.file_name).exists());
        assert!(orchestrator.services().registry().is_empty());
        assert!(!orchestrator
            .services()
            .artifacts
            .path_of(&summary.screen.file_name)
            .exists());
        assert!(orchestrator.services().activity().entries().is_empty());
    }

    #[tokio::test]
    async fn test_camera_loss_preserves_artifacts_and_skips_upload() {
        let dir = tempdir().unwrap();
        let server = mock_server(200).await;
        let mut config = config(&dir);
        config.server.base_url = Some(server.uri());
        let (mut orchestrator, provider) = orchestrator(config);
        recording(&mut orchestrator).await;

        provider.revoke(StreamKind::Camera);
        let interrupt = tokio::time::timeout(Duration::from_secs(1), orchestrator.next_interrupt())
            .await
            .unwrap();
        assert_eq!(interrupt, Interrupt::DeviceLost(StreamKind::Camera));

        let summary = orchestrator.handle_interrupt(interrupt).await.unwrap().unwrap();

        assert_eq!(summary.reason, StopReason::DeviceLost(StreamKind::Camera));
        assert_eq!(orchestrator.state(), SessionState::NeedPermissions);
        let downloads = dir.path().join("downloads");
        assert!(downloads.join(&summary.screen.file_name).exists());
        assert!(downloads.join(&summary.camera.file_name).exists());
        assert_eq!(orchestrator.services().registry().list().len(), 2);

        let uploads = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == "/upload_video")
            .count();
        assert_eq!(uploads, 0);
    }

    #[tokio::test]
    async fn test_offline_loss_still_exports_log_and_purges() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, provider) = orchestrator(config(&dir));
        recording(&mut orchestrator).await;

        provider.revoke(StreamKind::Camera);
        let interrupt = tokio::time::timeout(Duration::from_secs(1), orchestrator.next_interrupt())
            .await
            .unwrap();
        let summary = orchestrator.handle_interrupt(interrupt).await.unwrap().unwrap();

        assert_eq!(summary.reason, StopReason::DeviceLost(StreamKind::Camera));
        assert_eq!(orchestrator.state(), SessionState::NeedPermissions);
        let exported: Vec<String> = std::fs::read_dir(dir.path().join("downloads"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(exported.contains(&summary.screen.file_name));
        assert!(exported.contains(&summary.camera.file_name));
        assert!(exported.iter().any(|n| n.starts_with("extension_logs_")));
        assert!(orchestrator.services().registry().is_empty());
        assert!(orchestrator.services().activity().entries().is_empty());
    }

    #[tokio::test]
    async fn test_only_first_loss_tears_down() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _) = orchestrator(config(&dir));
        recording(&mut orchestrator).await;

        let first = orchestrator.handle_device_loss(StreamKind::Screen).await.unwrap();
        let second = orchestrator.handle_device_loss(StreamKind::Camera).await.unwrap();
        let third = orchestrator.handle_device_loss(StreamKind::Screen).await.unwrap();

        assert!(matches!(first, LossOutcome::Preserved(_)));
        assert!(matches!(second, LossOutcome::Ignored));
        assert!(matches!(third, LossOutcome::Ignored));
    }

    #[tokio::test]
    async fn test_loss_before_recording_tears_down() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, provider) = orchestrator(config(&dir));
        orchestrator.acquire_permissions().await.unwrap();

        provider.revoke(StreamKind::Microphone);
        let interrupt = orchestrator.next_interrupt().await;
        let summary = orchestrator.handle_interrupt(interrupt).await.unwrap();

        assert!(summary.is_none());
        assert_eq!(orchestrator.state(), SessionState::NeedPermissions);
        assert!(provider.stream(StreamKind::Screen).unwrap().is_ended());
        assert!(orchestrator.services().registry().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_forces_abnormal_stop() {
        let dir = tempdir().unwrap();
        let server = mock_server(200).await;
        let mut config = config(&dir);
        config.server.base_url = Some(server.uri());
        config.recording.max_duration_secs = 0;
        let (mut orchestrator, _) = orchestrator(config);

        orchestrator.acquire_permissions().await.unwrap();
        orchestrator.start_record(&form()).await.unwrap();

        let interrupt = tokio::time::timeout(Duration::from_secs(1), orchestrator.next_interrupt())
            .await
            .unwrap();
        assert_eq!(interrupt, Interrupt::Deadline);

        let summary = orchestrator.handle_interrupt(interrupt).await.unwrap().unwrap();
        assert_eq!(summary.reason, StopReason::Timeout);
        assert_eq!(orchestrator.state(), SessionState::NeedPermissions);
        assert_eq!(orchestrator.services().registry().list().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_then_upload_success() {
        let dir = tempdir().unwrap();
        let server = mock_server(200).await;
        let mut config = config(&dir);
        config.server.base_url = Some(server.uri());
        let (mut orchestrator, _) = orchestrator(config);
        recording(&mut orchestrator).await;

        orchestrator.stop_record().await.unwrap();
        assert_eq!(orchestrator.state(), SessionState::ReadyToUpload);
        assert_eq!(orchestrator.services().store.get::<String>(keys::SESSION_ID).as_deref(), Some("srv-1"));
        let metadata: SessionMetadata = orchestrator.services().store.get(keys::SESSION_METADATA).unwrap();
        assert!(!metadata.screen.session_client_size.is_empty());

        let receipt = orchestrator.upload().await.unwrap();
        assert_eq!(receipt.session_id, "srv-1");
        assert_eq!(orchestrator.state(), SessionState::NeedPermissions);
        assert!(orchestrator.services().registry().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_then_retry_reuses_artifacts() {
        let dir = tempdir().unwrap();
        let server = mock_server(500).await;
        let mut config = config(&dir);
        config.server.base_url = Some(server.uri());
        let (mut orchestrator, _) = orchestrator(config);
        recording(&mut orchestrator).await;
        let summary = orchestrator.stop_record().await.unwrap();

        let err = orchestrator.upload().await.unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
        assert_eq!(orchestrator.state(), SessionState::FailedUpload);
        let registered = orchestrator.services().registry().list();
        assert_eq!(registered, vec![summary.screen.file_name.clone(), summary.camera.file_name.clone()]);

        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/upload_video"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = orchestrator.upload().await.unwrap();
        assert_eq!(receipt.files, registered);
        assert_eq!(orchestrator.state(), SessionState::NeedPermissions);
    }

    #[tokio::test]
    async fn test_upload_while_recording_is_rejected() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _) = orchestrator(config(&dir));
        recording(&mut orchestrator).await;

        let err = orchestrator.upload().await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(orchestrator.state(), SessionState::Recording);

        orchestrator.shutdown().await;
        assert!(!orchestrator.is_recording());
    }
}
