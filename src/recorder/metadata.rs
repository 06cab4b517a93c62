//! Session data model
//!
//! Artifacts, per-stream metadata (uploaded verbatim as JSON), and the
//! summary shown to the user after a recording stops.

use crate::capture::traits::{Resolution, StreamKind};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity details entered in the control panel. Validation happens there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormData {
    pub group: String,
    pub name: String,
    pub surname: String,
    pub patronymic: String,
    pub link: String,
}

/// The two artifacts a session produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Screen video muxed with microphone audio
    Screen,
    Camera,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Screen => "screen",
            ArtifactKind::Camera => "camera",
        }
    }

    /// Classify a file name by substring: anything not naming the screen is camera
    pub fn classify(file_name: &str) -> Self {
        if file_name.contains(ArtifactKind::Screen.as_str()) {
            ArtifactKind::Screen
        } else {
            ArtifactKind::Camera
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact names of the current session, persisted under `fileNames`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNames {
    pub screen: String,
    pub camera: String,
}

impl FileNames {
    pub fn new(prefix: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            screen: artifact_file_name(prefix, ArtifactKind::Screen, started_at),
            camera: artifact_file_name(prefix, ArtifactKind::Camera, started_at),
        }
    }

    pub fn get(&self, kind: ArtifactKind) -> &str {
        match kind {
            ArtifactKind::Screen => &self.screen,
            ArtifactKind::Camera => &self.camera,
        }
    }

    pub fn all(&self) -> [&str; 2] {
        [&self.screen, &self.camera]
    }
}

/// A finalized artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub file_name: String,
    pub mime_type: String,
    pub resolution: Option<Resolution>,
    /// Read back from durable storage after close
    pub size_bytes: u64,
}

/// Per-stream metadata sent with the upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub session_client_start: String,
    pub session_client_end: String,
    pub session_client_duration: String,
    pub session_client_mime: String,
    pub session_client_resolution: String,
    /// Megabytes, three decimals
    pub session_client_size: String,
}

impl StreamMetadata {
    pub fn new(started_at: DateTime<Utc>, ended_at: DateTime<Utc>, artifact: &Artifact) -> Self {
        Self {
            session_client_start: format_timestamp(started_at),
            session_client_end: format_timestamp(ended_at),
            session_client_duration: format_duration(started_at, ended_at),
            session_client_mime: artifact.mime_type.clone(),
            session_client_resolution: artifact
                .resolution
                .map(|r| r.to_string())
                .unwrap_or_default(),
            session_client_size: format!("{:.3}", artifact.size_bytes as f64 / 1_000_000.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub screen: StreamMetadata,
    pub camera: StreamMetadata,
}

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "stream", rename_all = "camelCase")]
pub enum StopReason {
    Manual,
    DeviceLost(StreamKind),
    Timeout,
    SurfaceClosed,
}

impl StopReason {
    /// Forced stops preserve data locally but never lead to an upload
    pub fn is_forced(&self) -> bool {
        !matches!(self, StopReason::Manual)
    }
}

/// What the user is told after a recording stops
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub reason: StopReason,
    pub screen: Artifact,
    pub camera: Artifact,
    /// Failures of individual lanes; data of the other lane is unaffected
    pub lane_errors: Vec<String>,
}

impl SessionSummary {
    pub fn duration(&self) -> String {
        format_duration(self.started_at, self.ended_at)
    }

    pub fn artifacts(&self) -> [&Artifact; 2] {
        [&self.screen, &self.camera]
    }

    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            screen: StreamMetadata::new(self.started_at, self.ended_at, &self.screen),
            camera: StreamMetadata::new(self.started_at, self.ended_at, &self.camera),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("Recording started: {}", format_human(self.started_at)),
            format!("Recording ended: {}", format_human(self.ended_at)),
            format!("Duration: {}", self.duration()),
            "Screen and camera recordings were saved to the downloads folder.".to_string(),
            format!(
                "Screen recording: {} ({:.1} MB)",
                self.screen.file_name,
                self.screen.size_bytes as f64 / 1024.0 / 1024.0
            ),
            format!(
                "Camera recording: {} ({:.1} MB)",
                self.camera.file_name,
                self.camera.size_bytes as f64 / 1024.0 / 1024.0
            ),
        ]
    }
}

/// `<prefix>_<kind>_<YYYY-MM-DDTHH:MM:SS>.mp4` in local time
pub fn artifact_file_name(prefix: &str, kind: ArtifactKind, started_at: DateTime<Utc>) -> String {
    format!("{}_{}_{}.mp4", prefix, kind, format_timestamp(started_at))
}

/// ISO-8601-like local timestamp without offset
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// `HH:MM:SS, DD.MM.YYYY` in local time
pub fn format_human(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S, %d.%m.%Y").to_string()
}

/// Whole-second distance between two instants as `HH:MM:SS`
pub fn format_duration(a: DateTime<Utc>, b: DateTime<Utc>) -> String {
    let total = (b.timestamp() - a.timestamp()).unsigned_abs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Locally generated session id: 4 bytes of big-endian Unix seconds followed
/// by 8 random bytes, as 24 lowercase hex characters.
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&(now.timestamp() as u32).to_be_bytes());
    bytes[4..].copy_from_slice(&Uuid::new_v4().as_bytes()[8..]);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_classify_by_substring() {
        assert_eq!(
            ArtifactKind::classify("proctoring_screen_2024-01-01T10:00:00.mp4"),
            ArtifactKind::Screen
        );
        assert_eq!(
            ArtifactKind::classify("proctoring_camera_2024-01-01T10:00:00.mp4"),
            ArtifactKind::Camera
        );
    }

    #[test]
    fn test_file_names_share_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 8, 9, 10).unwrap();
        let names = FileNames::new("proctoring", at);
        let stamp = format_timestamp(at);

        assert_eq!(names.screen, format!("proctoring_screen_{stamp}.mp4"));
        assert_eq!(names.camera, format!("proctoring_camera_{stamp}.mp4"));
        assert_eq!(stamp.len(), "2024-03-05T08:09:10".len());
    }

    #[test]
    fn test_format_duration() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let end = start + chrono::Duration::seconds(3 * 3600 + 25 * 60 + 7);
        assert_eq!(format_duration(start, end), "03:25:07");
        assert_eq!(format_duration(end, start), "03:25:07");
    }

    #[test]
    fn test_stream_metadata_fields() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let end = start + chrono::Duration::seconds(90);
        let artifact = Artifact {
            kind: ArtifactKind::Camera,
            file_name: "c.mp4".into(),
            mime_type: "video/mp4".into(),
            resolution: Some(Resolution { width: 320, height: 240 }),
            size_bytes: 1_234_567,
        };

        let metadata = StreamMetadata::new(start, end, &artifact);
        assert_eq!(metadata.session_client_duration, "00:01:30");
        assert_eq!(metadata.session_client_size, "1.235");
        assert_eq!(metadata.session_client_resolution, "320×240");

        let json = serde_json::to_value(&metadata).unwrap();
        assert!(json.get("session_client_mime").is_some());
    }

    #[test]
    fn test_session_id_is_timestamp_prefixed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let id = generate_session_id(now);

        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(&id[..8], format!("{:08x}", now.timestamp() as u32));
        assert_ne!(id, generate_session_id(now));
    }

    #[test]
    fn test_stop_reason_forced() {
        assert!(!StopReason::Manual.is_forced());
        assert!(StopReason::Timeout.is_forced());
        assert!(StopReason::DeviceLost(StreamKind::Screen).is_forced());
    }
}
