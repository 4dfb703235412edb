//! Presentation state for the floating support widget
//!
//! Derives what the frontend shows (mic button, status label, panel) from the
//! authoritative session state plus the purely-visual bits the session does
//! not care about: whether the panel is open and which screen is current.

use serde::Serialize;

use crate::state_machine::State;

/// Session state as the frontend sees it.
/// Uses tagged union format: { "status": "idle" } or
/// { "status": "error", "message": "..." }
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum VoiceStatus {
    Idle,
    Connecting,
    /// Session is live and the user's microphone is streaming
    Listening,
    /// Assistant audio is queued or audible
    Speaking,
    Error { message: String },
}

/// Convert internal State to the frontend status
pub fn voice_status(state: &State) -> VoiceStatus {
    match state {
        State::Idle => VoiceStatus::Idle,
        State::Connecting { .. } => VoiceStatus::Connecting,
        State::Active { speaking: false, .. } => VoiceStatus::Listening,
        State::Active { speaking: true, .. } => VoiceStatus::Speaking,
        State::Failed { message } => VoiceStatus::Error {
            message: message.clone(),
        },
    }
}

/// Everything the frontend needs to render the widget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetView {
    pub panel_open: bool,
    pub screen: String,
    pub voice: VoiceStatus,
}

/// Visual state of the widget: panel toggle and current screen.
#[derive(Debug, Clone)]
pub struct Widget {
    panel_open: bool,
    screen: String,
}

impl Widget {
    pub fn new(screen: impl Into<String>) -> Self {
        Self {
            panel_open: false,
            screen: screen.into(),
        }
    }

    pub fn panel_open(&self) -> bool {
        self.panel_open
    }

    pub fn screen(&self) -> &str {
        &self.screen
    }

    /// Toggle the panel; returns the new open state.
    ///
    /// Closing the panel does not stop a running session by itself; the
    /// caller decides whether to also request a stop.
    pub fn toggle_panel(&mut self) -> bool {
        self.panel_open = !self.panel_open;
        self.panel_open
    }

    /// Record a navigation. Affects only future sessions and chat context.
    pub fn set_screen(&mut self, screen: impl Into<String>) {
        self.screen = screen.into();
    }

    pub fn view(&self, state: &State) -> WidgetView {
        WidgetView {
            panel_open: self.panel_open,
            screen: self.screen.clone(),
            voice: voice_status(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn status_maps_speaking_flag() {
        let id = Uuid::new_v4();
        assert_eq!(
            voice_status(&State::Active {
                session_id: id,
                speaking: false
            }),
            VoiceStatus::Listening
        );
        assert_eq!(
            voice_status(&State::Active {
                session_id: id,
                speaking: true
            }),
            VoiceStatus::Speaking
        );
    }

    #[test]
    fn status_serializes_as_tagged_union() {
        let json = serde_json::to_string(&VoiceStatus::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("\"message\":\"boom\""));

        let json = serde_json::to_string(&VoiceStatus::Idle).unwrap();
        assert_eq!(json, r#"{"status":"idle"}"#);
    }

    #[test]
    fn toggle_panel_flips_and_reports() {
        let mut widget = Widget::new("dashboard");
        assert!(!widget.panel_open());
        assert!(widget.toggle_panel());
        assert!(!widget.toggle_panel());
    }

    #[test]
    fn view_combines_visual_and_session_state() {
        let mut widget = Widget::new("dashboard");
        widget.toggle_panel();
        widget.set_screen("orders");

        let view = widget.view(&State::Idle);
        assert!(view.panel_open);
        assert_eq!(view.screen, "orders");
        assert_eq!(view.voice, VoiceStatus::Idle);
    }
}
