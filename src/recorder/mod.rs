//! Recording system module
//!
//! This module implements the dual-lane session recorder:
//! - Recorder turning capture streams into chunked artifacts
//! - ChunkWriter and ArtifactStore for durable output
//! - SessionOrchestrator owning the session state machine

pub mod channel;
pub mod metadata;
pub mod orchestrator;
pub mod state;
pub mod writer;

pub use channel::{Recorder, RecorderOutcome};
pub use metadata::{Artifact, ArtifactKind, FileNames, FormData, SessionMetadata, SessionSummary, StopReason};
pub use orchestrator::{Interrupt, LossOutcome, SessionOrchestrator};
pub use state::{ButtonMode, ButtonStates, RecorderState, SessionState};
pub use writer::{ArtifactStore, ChunkWriter};
