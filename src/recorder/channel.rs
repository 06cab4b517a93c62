//! Recording channel
//!
//! A [`Recorder`] turns one or more capture streams into a single artifact.
//! Every timeslice it drains its sources and appends the combined chunk to
//! the artifact writer. When stopped it delivers one last chunk, closes the
//! writer and only then reports completion.

use super::metadata::ArtifactKind;
use super::state::RecorderState;
use super::writer::ChunkWriter;
use crate::capture::CaptureStream;
use crate::utils::error::{AppError, AppResult};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// What a recorder produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderOutcome {
    pub chunks: u64,
    pub bytes: u64,
    /// First write or close failure; chunks delivered before it are kept
    pub error: Option<String>,
    /// Stopped because one of its sources ended rather than on request
    pub ended_by_sources: bool,
}

pub struct Recorder {
    kind: ArtifactKind,
    mime_type: String,
    sources: Vec<CaptureStream>,
    timeslice: Duration,
    state_tx: Option<watch::Sender<RecorderState>>,
    state_rx: watch::Receiver<RecorderState>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<RecorderOutcome>>,
    outcome: Option<RecorderOutcome>,
}

impl Recorder {
    pub fn new(
        kind: ArtifactKind,
        mime_type: impl Into<String>,
        sources: Vec<CaptureStream>,
        timeslice: Duration,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(RecorderState::Inactive);
        let (stop_tx, _) = watch::channel(false);
        Self {
            kind,
            mime_type: mime_type.into(),
            sources,
            timeslice,
            state_tx: Some(state_tx),
            state_rx,
            stop_tx,
            task: None,
            outcome: None,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn state(&self) -> RecorderState {
        *self.state_rx.borrow()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    /// Start emitting chunks into `writer`. Only valid once, from `Inactive`.
    pub fn start(&mut self, writer: ChunkWriter) -> AppResult<()> {
        let state_tx = self
            .state_tx
            .take()
            .ok_or_else(|| AppError::ClosedResource(format!("{} recorder", self.kind)))?;

        state_tx.send_replace(RecorderState::Recording);
        let sources = self.sources.clone();
        let timeslice = self.timeslice;
        let stop_rx = self.stop_tx.subscribe();
        let kind = self.kind;

        tracing::info!("{} recorder started ({})", kind, self.mime_type);
        self.task = Some(tokio::spawn(async move {
            let outcome = record(sources, writer, timeslice, stop_rx).await;
            state_tx.send_replace(RecorderState::Stopped);
            tracing::info!(
                "{} recorder stopped: {} chunks, {} bytes",
                kind,
                outcome.chunks,
                outcome.bytes
            );
            outcome
        }));
        Ok(())
    }

    /// Stop and wait until the final chunk is written and the writer closed.
    /// Calling again returns the same outcome.
    pub async fn stop(&mut self) -> RecorderOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        self.stop_tx.send_replace(true);
        let outcome = match self.task.take() {
            Some(task) => match task.await {
                Ok(outcome) => outcome,
                Err(e) => RecorderOutcome {
                    error: Some(format!("recorder task failed: {}", e)),
                    ..Default::default()
                },
            },
            None => {
                // never started
                if let Some(state_tx) = self.state_tx.take() {
                    state_tx.send_replace(RecorderState::Stopped);
                }
                RecorderOutcome::default()
            }
        };

        self.outcome = Some(outcome.clone());
        outcome
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn record(
    sources: Vec<CaptureStream>,
    mut writer: ChunkWriter,
    timeslice: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> RecorderOutcome {
    let mut ticker = interval_at(Instant::now() + timeslice, timeslice);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut ended = JoinSet::new();
    for source in &sources {
        let source = source.clone();
        ended.spawn(async move { source.ended().await });
    }

    let mut error: Option<AppError> = None;
    let mut ended_by_sources = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = flush(&sources, &mut writer).await {
                    error = Some(e);
                    break;
                }
            }
            _ = stop_rx.changed() => break,
            Some(_) = ended.join_next() => {
                // keep recording while any source is still live
                if ended.is_empty() {
                    ended_by_sources = true;
                    break;
                }
            }
        }
    }

    if error.is_none() {
        if let Err(e) = flush(&sources, &mut writer).await {
            error = Some(e);
        }
    }
    if let Err(e) = writer.close().await {
        error.get_or_insert(e);
    }
    if let Some(e) = &error {
        tracing::error!("Writing {} failed: {}", writer.name(), e);
    }

    RecorderOutcome {
        chunks: writer.chunks(),
        bytes: writer.bytes_written(),
        error: error.map(|e| e.to_string()),
        ended_by_sources,
    }
}

/// Append one chunk combining every source. Empty chunks are skipped.
async fn flush(sources: &[CaptureStream], writer: &mut ChunkWriter) -> AppResult<()> {
    let mut chunk = Vec::new();
    for source in sources {
        chunk.extend(source.drain());
    }
    if chunk.is_empty() {
        return Ok(());
    }
    writer.append(&chunk).await
}
