//! Proctor Recorder - multi-stream proctoring session recorder.
//!
//! This is the main library crate. It wires the three cooperating contexts
//! (background coordinator, control panel and capture surface) around a
//! shared store and message bus.

pub mod background;
pub mod bus;
pub mod capture;
pub mod config;
pub mod context;
pub mod panel;
pub mod recorder;
pub mod store;
pub mod surface;
pub mod upload;
pub mod utils;

use anyhow::Context;
use background::BackgroundCoordinator;
use capture::DeviceProvider;
use config::Config;
use context::Services;
use panel::ControlPanel;
use std::sync::Arc;
use surface::InProcessSurfaces;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proctor_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// A running recorder: background coordinator plus in-process capture surfaces
pub struct RecorderApp {
    pub services: Services,
    pub surfaces: Arc<InProcessSurfaces>,
    background: JoinHandle<()>,
}

impl RecorderApp {
    /// A control panel attached to this app. Panels are cheap and may come and go.
    pub fn panel(&self) -> ControlPanel {
        ControlPanel::new(self.services.clone())
    }

    /// Close every capture surface (finalizing any recording) and stop the coordinator
    pub async fn shutdown(self) {
        self.surfaces.close_all().await;
        self.background.abort();
        tracing::info!("Proctor Recorder stopped");
    }
}

/// Start the recorder. Must be called from within a Tokio runtime.
pub fn launch(config: Config, provider: Arc<dyn DeviceProvider>) -> anyhow::Result<RecorderApp> {
    tracing::info!("Starting Proctor Recorder v{}", env!("CARGO_PKG_VERSION"));

    let services = Services::open(config).context("failed to open recorder services")?;
    let surfaces = Arc::new(InProcessSurfaces::new(services.clone(), provider));
    let coordinator = BackgroundCoordinator::new(services.clone(), surfaces.clone());
    let background = tokio::spawn(coordinator.run());

    Ok(RecorderApp {
        services,
        surfaces,
        background,
    })
}
