//! Message bus
//!
//! Broadcast channel connecting the control panel, the background coordinator
//! and the capture surface. Every context sees every message and ignores the
//! ones it does not handle. A sender may attach a reply slot; the first
//! context to respond wins.

use crate::recorder::metadata::FormData;
use crate::recorder::state::SessionState;
use crate::utils::error::{AppError, AppResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

const BUS_CAPACITY: usize = 256;

/// Identity of one capture surface instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub Uuid);

impl SurfaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SurfaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    // Panel -> background
    StartRecord { form_data: FormData },
    StopRecord,
    GetPermissions,
    UploadVideo,

    // Background -> surface
    StartRecording { form_data: FormData },
    StopRecording,
    GetPermissionsMedia,
    UploadVideoMedia,

    // Surface -> background
    ScheduleCleanup { delay_minutes: f64 },
    CancelCleanup,
    ClearLogs,
    SurfaceLoaded { surface: SurfaceId },
    SurfaceClosed { surface: SurfaceId },

    // Surface -> panel
    DisableButtons,
    UpdateButtonStates { state: SessionState },
    Notice { title: String, lines: Vec<String> },
}

impl Message {
    pub fn notice(title: impl Into<String>, lines: Vec<String>) -> Self {
        Message::Notice {
            title: title.into(),
            lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn err(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// One-shot reply channel shared by every receiver of a message
#[derive(Clone)]
pub struct ReplySlot(Arc<Mutex<Option<oneshot::Sender<Reply>>>>);

impl ReplySlot {
    /// Returns false if someone already responded or the requester gave up
    pub fn respond(&self, reply: Reply) -> bool {
        match self.0.lock().take() {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for ReplySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplySlot")
            .field("pending", &self.0.lock().is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub message: Message,
    pub reply: Option<ReplySlot>,
}

impl Envelope {
    pub fn respond(&self, reply: Reply) -> bool {
        self.reply.as_ref().map(|r| r.respond(reply)).unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<Envelope>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Fire and forget. Having no listener is not an error.
    pub fn send(&self, message: Message) {
        tracing::trace!("bus <- {:?}", message);
        let _ = self.tx.send(Envelope {
            message,
            reply: None,
        });
    }

    /// Send and wait for the first reply
    pub async fn request(&self, message: Message, timeout: Duration) -> AppResult<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            message,
            reply: Some(ReplySlot(Arc::new(Mutex::new(Some(reply_tx))))),
        };

        self.tx
            .send(envelope)
            .map_err(|_| AppError::Bus("no listeners".to_string()))?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(AppError::Bus("request dropped without a reply".to_string())),
            Err(_) => Err(AppError::Bus("request timed out".to_string())),
        }
    }
}

/// Next envelope from `rx`, skipping over lag. `None` once the bus is gone.
pub async fn next_envelope(rx: &mut broadcast::Receiver<Envelope>) -> Option<Envelope> {
    loop {
        match rx.recv().await {
            Ok(envelope) => return Some(envelope),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Bus receiver lagged, skipped {} messages", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
