//! Device acquisition manager
//!
//! Requests and exclusively holds the screen, microphone and camera streams,
//! and reports stream loss to whoever polls [`DeviceManager::next_loss`].
//! Information only flows outward: the manager never calls the orchestrator.

use super::stream::CaptureStream;
use super::traits::{CaptureConstraints, DeviceProvider, StreamKind};
use crate::utils::error::{AppError, AppResult};
use std::future::pending;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One acquired stream per device
#[derive(Debug, Clone)]
pub struct DeviceSet {
    pub screen: CaptureStream,
    pub microphone: CaptureStream,
    pub camera: CaptureStream,
}

impl DeviceSet {
    pub fn get(&self, kind: StreamKind) -> &CaptureStream {
        match kind {
            StreamKind::Screen => &self.screen,
            StreamKind::Microphone => &self.microphone,
            StreamKind::Camera => &self.camera,
        }
    }

    pub fn streams(&self) -> [&CaptureStream; 3] {
        [&self.screen, &self.microphone, &self.camera]
    }

    /// First stream that has already ended, if any
    pub fn first_ended(&self) -> Option<StreamKind> {
        self.streams().iter().find(|s| s.is_ended()).map(|s| s.kind())
    }
}

pub struct DeviceManager {
    provider: Arc<dyn DeviceProvider>,
    devices: Option<DeviceSet>,
    watchers: Vec<JoinHandle<()>>,
    loss_rx: Option<mpsc::UnboundedReceiver<StreamKind>>,
}

impl DeviceManager {
    pub fn new(provider: Arc<dyn DeviceProvider>) -> Self {
        Self {
            provider,
            devices: None,
            watchers: Vec::new(),
            loss_rx: None,
        }
    }

    pub fn devices(&self) -> Option<&DeviceSet> {
        self.devices.as_ref()
    }

    /// All three streams are held and none has ended
    pub fn is_bound(&self) -> bool {
        self.devices
            .as_ref()
            .map(|d| d.first_ended().is_none())
            .unwrap_or(false)
    }

    /// Acquire all three streams and wire their loss notifications.
    ///
    /// A refused screen fails immediately. A refused microphone or camera
    /// releases everything already acquired and reports the first refusal.
    /// Any other acquisition error also releases and propagates.
    pub async fn acquire(&mut self) -> AppResult<&DeviceSet> {
        self.release();

        let screen = self.request(StreamKind::Screen).await?;
        tracing::info!("Screen access granted ({:?})", screen.resolution());

        let mut acquired = vec![screen.clone()];
        let mut denied: Option<AppError> = None;
        let mut microphone = None;
        let mut camera = None;

        for kind in [StreamKind::Microphone, StreamKind::Camera] {
            match self.request(kind).await {
                Ok(stream) => {
                    tracing::info!("{} access granted", kind);
                    acquired.push(stream.clone());
                    match kind {
                        StreamKind::Microphone => microphone = Some(stream),
                        _ => camera = Some(stream),
                    }
                }
                Err(e @ AppError::PermissionDenied { .. }) => {
                    tracing::warn!("{}", e);
                    denied.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!("Failed to acquire {}: {}", kind, e);
                    end_all(&acquired);
                    return Err(e);
                }
            }
        }

        let (microphone, camera) = match (denied, microphone, camera) {
            (None, Some(microphone), Some(camera)) => (microphone, camera),
            (Some(e), _, _) => {
                end_all(&acquired);
                return Err(e);
            }
            _ => {
                end_all(&acquired);
                return Err(AppError::PermissionDenied {
                    kind: StreamKind::Camera,
                    reason: "device unavailable".to_string(),
                });
            }
        };

        let set = DeviceSet {
            screen,
            microphone,
            camera,
        };
        self.wire_loss(&set);
        Ok(self.devices.insert(set))
    }

    async fn request(&self, kind: StreamKind) -> AppResult<CaptureStream> {
        let stream = self
            .provider
            .request(kind, &CaptureConstraints::for_kind(kind))
            .await?;
        if stream.is_ended() {
            return Err(AppError::DeviceLost(kind));
        }
        Ok(stream)
    }

    fn wire_loss(&mut self, set: &DeviceSet) {
        let (tx, rx) = mpsc::unbounded_channel();
        for stream in set.streams() {
            let stream = stream.clone();
            let tx = tx.clone();
            self.watchers.push(tokio::spawn(async move {
                stream.ended().await;
                let _ = tx.send(stream.kind());
            }));
        }
        self.loss_rx = Some(rx);
    }

    /// Next stream-loss notification. Pending forever while nothing is held.
    pub async fn next_loss(&mut self) -> StreamKind {
        match self.loss_rx.as_mut() {
            Some(rx) => match rx.recv().await {
                Some(kind) => kind,
                None => pending().await,
            },
            None => pending().await,
        }
    }

    /// Stop every held stream. Releasing does not count as a loss: watchers are
    /// detached before the streams are ended.
    pub fn release(&mut self) {
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
        self.loss_rx = None;

        if let Some(set) = self.devices.take() {
            end_all(&set.streams());
            tracing::info!("Released capture streams");
        }
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.release();
    }
}

fn end_all<S: std::borrow::Borrow<CaptureStream>>(streams: &[S]) {
    for stream in streams {
        stream.borrow().end();
    }
}
