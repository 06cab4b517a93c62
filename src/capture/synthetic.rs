//! In-memory capture devices
//!
//! Drives sessions without hardware: headless runs, demos and tests. Each
//! issued stream is backed by a [`SyntheticSource`] whose buffer can be fed
//! by hand, and which can also emit a fixed payload on every drain.

use super::stream::CaptureStream;
use super::traits::{CaptureConstraints, DeviceProvider, MediaSource, Resolution, StreamKind};
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Media source backed by a byte buffer
#[derive(Default)]
pub struct SyntheticSource {
    pending: Mutex<Vec<u8>>,
    per_drain: Vec<u8>,
}

impl SyntheticSource {
    /// A source that yields `payload` on every drain, after any pushed bytes
    pub fn repeating(payload: Vec<u8>) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            per_drain: payload,
        }
    }

    pub fn push(&self, bytes: &[u8]) {
        self.pending.lock().extend_from_slice(bytes);
    }
}

impl MediaSource for SyntheticSource {
    fn drain(&self) -> Vec<u8> {
        let mut chunk = std::mem::take(&mut *self.pending.lock());
        chunk.extend_from_slice(&self.per_drain);
        chunk
    }
}

#[derive(Clone)]
struct Issued {
    stream: CaptureStream,
    source: Arc<SyntheticSource>,
}

/// Device provider handing out synthetic streams
#[derive(Default)]
pub struct SyntheticDevices {
    denied: Mutex<HashSet<StreamKind>>,
    payloads: Mutex<HashMap<StreamKind, Vec<u8>>>,
    issued: Mutex<HashMap<StreamKind, Issued>>,
    requests: Mutex<Vec<StreamKind>>,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stream issued from now on yields `bytes` of filler per drain
    pub fn with_payload(self, bytes: usize) -> Self {
        {
            let mut payloads = self.payloads.lock();
            for kind in StreamKind::ALL {
                payloads.insert(kind, vec![kind.as_str().as_bytes()[0]; bytes]);
            }
        }
        self
    }

    /// Refuse access to `kind` until [`Self::allow`] is called
    pub fn deny(&self, kind: StreamKind) {
        self.denied.lock().insert(kind);
    }

    pub fn allow(&self, kind: StreamKind) {
        self.denied.lock().remove(&kind);
    }

    /// Most recently issued stream of `kind`
    pub fn stream(&self, kind: StreamKind) -> Option<CaptureStream> {
        self.issued.lock().get(&kind).map(|i| i.stream.clone())
    }

    /// Source behind the most recently issued stream of `kind`
    pub fn source(&self, kind: StreamKind) -> Option<Arc<SyntheticSource>> {
        self.issued.lock().get(&kind).map(|i| i.source.clone())
    }

    /// Simulate the user revoking access to `kind`
    pub fn revoke(&self, kind: StreamKind) -> bool {
        self.stream(kind).map(|s| s.end()).unwrap_or(false)
    }

    /// Every request made so far, in order
    pub fn requests(&self) -> Vec<StreamKind> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DeviceProvider for SyntheticDevices {
    async fn request(&self, kind: StreamKind, constraints: &CaptureConstraints) -> AppResult<CaptureStream> {
        self.requests.lock().push(kind);

        if self.denied.lock().contains(&kind) {
            return Err(AppError::PermissionDenied {
                kind,
                reason: "NotAllowedError".to_string(),
            });
        }

        let payload = self.payloads.lock().get(&kind).cloned().unwrap_or_default();
        let source = Arc::new(SyntheticSource::repeating(payload));
        let resolution: Option<Resolution> = constraints.ideal;
        let stream = CaptureStream::new(kind, format!("synthetic {kind}"), resolution, source.clone());

        self.issued.lock().insert(
            kind,
            Issued {
                stream: stream.clone(),
                source,
            },
        );
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_drains_pushed_then_payload() {
        let source = SyntheticSource::repeating(vec![9, 9]);
        source.push(&[1, 2, 3]);
        assert_eq!(source.drain(), vec![1, 2, 3, 9, 9]);
        assert_eq!(source.drain(), vec![9, 9]);
    }

    #[tokio::test]
    async fn test_denied_device() {
        let devices = SyntheticDevices::new();
        devices.deny(StreamKind::Camera);

        let err = devices
            .request(StreamKind::Camera, &CaptureConstraints::for_kind(StreamKind::Camera))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied { kind: StreamKind::Camera, .. }));

        devices.allow(StreamKind::Camera);
        let stream = devices
            .request(StreamKind::Camera, &CaptureConstraints::for_kind(StreamKind::Camera))
            .await
            .unwrap();
        assert_eq!(stream.resolution(), Some(Resolution { width: 320, height: 240 }));
        assert!(devices.revoke(StreamKind::Camera));
        assert!(stream.is_ended());
    }
}
