//! Control panel
//!
//! Transient UI context. It only emits intents and renders what the shared
//! store and the bus tell it; it never holds session state of its own.

use crate::bus::{next_envelope, Envelope, Message};
use crate::context::Services;
use crate::recorder::metadata::FormData;
use crate::recorder::state::{ButtonMode, ButtonStates, SessionState};
use crate::store::keys;
use crate::utils::error::AppResult;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Something the panel should render
#[derive(Debug, Clone, PartialEq)]
pub enum PanelUpdate {
    Buttons(SessionState),
    /// Every button disabled while a long operation runs
    Busy,
    Notice { title: String, lines: Vec<String> },
}

impl PanelUpdate {
    pub fn buttons(&self) -> Option<ButtonStates> {
        match self {
            PanelUpdate::Buttons(state) => Some(state.buttons()),
            PanelUpdate::Busy => Some(ButtonStates {
                permissions: ButtonMode::Inactive,
                start: ButtonMode::Inactive,
                stop: ButtonMode::Inactive,
                upload: ButtonMode::InProgress,
            }),
            PanelUpdate::Notice { .. } => None,
        }
    }
}

pub struct ControlPanel {
    services: Services,
    inbox: broadcast::Receiver<Envelope>,
}

impl ControlPanel {
    pub fn new(services: Services) -> Self {
        let inbox = services.bus.subscribe();
        Self { services, inbox }
    }

    /// Called each time the panel is shown. Prunes the activity log when no
    /// recording happened within the retention window.
    pub fn open(&self) -> AppResult<usize> {
        let activity = self.services.activity();
        activity.action("Popup opened");

        let now = Utc::now();
        let retention = self.services.config.logging.retention();
        let last_record: Option<DateTime<Utc>> = self.services.store.get(keys::LAST_RECORD_TIME);

        let stale = last_record.map(|t| now - t > retention).unwrap_or(true);
        if !stale {
            return Ok(0);
        }

        let pruned = activity.prune(now, retention)?;
        if pruned > 0 {
            tracing::info!("Pruned {} old activity entries", pruned);
        }
        Ok(pruned)
    }

    /// Persisted state; missing means permissions are needed
    pub fn button_state(&self) -> SessionState {
        self.services.store.get(keys::BUTTON_STATE).unwrap_or_default()
    }

    pub fn buttons(&self) -> ButtonStates {
        self.button_state().buttons()
    }

    /// Form values from the last submitted start
    pub fn saved_form(&self) -> Option<FormData> {
        self.services.store.get(keys::FORM_VALUES)
    }

    pub fn request_permissions(&self) {
        self.services.activity().action("Click get permissions");
        self.services.bus.send(Message::GetPermissions);
    }

    pub fn start_record(&self, form: FormData) -> AppResult<()> {
        self.services.store.set(keys::FORM_VALUES, &form)?;
        self.services.activity().action("Click start record");
        self.services.bus.send(Message::StartRecord { form_data: form });
        Ok(())
    }

    pub fn stop_record(&self) {
        self.services.activity().action("Click stop record");
        self.services.bus.send(Message::StopRecord);
    }

    pub fn upload(&self) -> AppResult<()> {
        self.services.activity().action("Click upload");
        if !self.services.store.contains(keys::FILE_NAMES) {
            tracing::warn!("Upload requested with no recorded session");
            self.services
                .store
                .set(keys::BUTTON_STATE, &SessionState::NeedPermissions)?;
        }
        self.services.bus.send(Message::UploadVideo);
        Ok(())
    }

    /// Next thing to render. `None` once the bus is gone.
    pub async fn next_update(&mut self) -> Option<PanelUpdate> {
        loop {
            let envelope = next_envelope(&mut self.inbox).await?;
            match envelope.message {
                Message::UpdateButtonStates { state } => return Some(PanelUpdate::Buttons(state)),
                Message::DisableButtons => return Some(PanelUpdate::Busy),
                Message::Notice { title, lines } => return Some(PanelUpdate::Notice { title, lines }),
                _ => {}
            }
        }
    }
}
