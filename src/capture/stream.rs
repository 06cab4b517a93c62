//! Live capture stream handle

use super::traits::{MediaSource, Resolution, StreamKind};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// A live source of samples from one device.
///
/// Once ended (revoked by the user, track terminated, or released) a stream
/// never resumes; a new one must be requested. Clones share the same handle.
#[derive(Clone)]
pub struct CaptureStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: Uuid,
    kind: StreamKind,
    label: String,
    resolution: Option<Resolution>,
    source: Arc<dyn MediaSource>,
    ended: watch::Sender<bool>,
}

impl CaptureStream {
    pub fn new(
        kind: StreamKind,
        label: impl Into<String>,
        resolution: Option<Resolution>,
        source: Arc<dyn MediaSource>,
    ) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(StreamInner {
                id: Uuid::new_v4(),
                kind,
                label: label.into(),
                resolution,
                source,
                ended,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn kind(&self) -> StreamKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.inner.resolution
    }

    /// Encoded bytes accumulated since the last drain
    pub fn drain(&self) -> Vec<u8> {
        self.inner.source.drain()
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Terminate the stream. Returns `true` only for the call that ended it.
    pub fn end(&self) -> bool {
        let ended = self.inner.ended.send_if_modified(|ended| {
            if *ended {
                false
            } else {
                *ended = true;
                true
            }
        });
        if ended {
            tracing::debug!("{} stream '{}' ended", self.kind(), self.label());
        }
        ended
    }

    /// Resolves once the stream has ended
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        loop {
            let ended = *rx.borrow_and_update();
            if ended {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureStream")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("resolution", &self.inner.resolution)
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticSource;
    use std::time::Duration;

    fn stream() -> CaptureStream {
        CaptureStream::new(
            StreamKind::Camera,
            "test camera",
            Some(Resolution { width: 320, height: 240 }),
            Arc::new(SyntheticSource::default()),
        )
    }

    #[tokio::test]
    async fn test_end_is_irreversible_and_single_fire() {
        let stream = stream();
        assert!(!stream.is_ended());
        assert!(stream.end());
        assert!(!stream.end());
        assert!(stream.is_ended());

        tokio::time::timeout(Duration::from_secs(1), stream.ended())
            .await
            .expect("ended() resolves for an already-ended stream");
    }

    #[tokio::test]
    async fn test_ended_wakes_waiters() {
        let stream = stream();
        let waiter = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.ended().await })
        };

        tokio::task::yield_now().await;
        stream.end();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
    }
}
