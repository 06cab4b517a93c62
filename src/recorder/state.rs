//! Recording state management
//!
//! Defines the session state machine, the control-panel button table derived
//! from it, and the recorder lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shared session state, persisted under `bState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Capture streams must be (re)acquired
    #[default]
    NeedPermissions,
    /// All streams held, waiting for a start intent
    ReadyToRecord,
    /// Both recorders running
    Recording,
    /// Both artifacts finalized and registered, waiting for upload
    ReadyToUpload,
    /// Last upload attempt failed; artifacts retained for retry
    FailedUpload,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::NeedPermissions => "needPermissions",
            SessionState::ReadyToRecord => "readyToRecord",
            SessionState::Recording => "recording",
            SessionState::ReadyToUpload => "readyToUpload",
            SessionState::FailedUpload => "failedUpload",
        }
    }

    /// Control-panel buttons for this state
    pub fn buttons(&self) -> ButtonStates {
        use ButtonMode::{Active, Inactive};
        let (permissions, start, stop, upload) = match self {
            SessionState::NeedPermissions => (Active, Inactive, Inactive, Inactive),
            SessionState::ReadyToRecord => (Inactive, Active, Inactive, Inactive),
            SessionState::Recording => (Inactive, Inactive, Active, Inactive),
            SessionState::ReadyToUpload => (Inactive, Inactive, Inactive, Active),
            SessionState::FailedUpload => (Active, Inactive, Inactive, Active),
        };
        ButtonStates {
            permissions,
            start,
            stop,
            upload,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ButtonMode {
    Inactive,
    Active,
    InProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonStates {
    pub permissions: ButtonMode,
    pub start: ButtonMode,
    pub stop: ButtonMode,
    pub upload: ButtonMode,
}

/// Lifecycle of a single recorder. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    #[default]
    Inactive,
    Recording,
    Stopped,
}
