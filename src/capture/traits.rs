//! Capture trait definitions
//!
//! Platform-agnostic types for capture sources. Device access itself is an
//! external collaborator behind [`DeviceProvider`].

use super::stream::CaptureStream;
use crate::utils::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three device inputs a session captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Screen,
    Microphone,
    Camera,
}

impl StreamKind {
    /// Acquisition order: screen first, then microphone, then camera
    pub const ALL: [StreamKind; 3] = [StreamKind::Screen, StreamKind::Microphone, StreamKind::Camera];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Screen => "screen",
            StreamKind::Microphone => "microphone",
            StreamKind::Camera => "camera",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

/// Ideal capture parameters handed to the device collaborator.
///
/// These are hints; the hardware decides what it actually delivers and the
/// stream reports the negotiated resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    pub ideal: Option<Resolution>,
    pub max_frame_rate: Option<u32>,
    pub audio: bool,
}

impl CaptureConstraints {
    pub fn for_kind(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Screen => Self {
                ideal: Some(Resolution { width: 1920, height: 1080 }),
                max_frame_rate: Some(20),
                audio: false,
            },
            StreamKind::Microphone => Self {
                ideal: None,
                max_frame_rate: None,
                audio: true,
            },
            StreamKind::Camera => Self {
                ideal: Some(Resolution { width: 320, height: 240 }),
                max_frame_rate: Some(17),
                audio: false,
            },
        }
    }
}

/// Encoded media produced by a device.
///
/// Encoding happens on the device side; the recorder only collects whatever
/// bytes accumulated since the previous drain.
pub trait MediaSource: Send + Sync {
    /// Take all encoded bytes produced since the previous call
    fn drain(&self) -> Vec<u8>;
}

/// Access to physical or virtual capture devices.
///
/// A refused device yields [`crate::utils::error::AppError::PermissionDenied`].
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    async fn request(&self, kind: StreamKind, constraints: &CaptureConstraints) -> AppResult<CaptureStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_display() {
        let resolution = Resolution { width: 1920, height: 1080 };
        assert_eq!(resolution.to_string(), "1920×1080");
    }

    #[test]
    fn test_stream_kind_serde() {
        assert_eq!(serde_json::to_string(&StreamKind::Microphone).unwrap(), "\"microphone\"");
        assert_eq!(StreamKind::ALL[0], StreamKind::Screen);
    }
}
