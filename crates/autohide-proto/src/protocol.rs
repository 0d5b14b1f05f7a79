use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Most recent verse transition seen while monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastEvent {
    pub verse_visible: bool,
    pub at: DateTime<Local>,
}

impl LastEvent {
    /// Short label for a status line, e.g. `"21:04:13 verse on screen"`.
    pub fn label(&self) -> String {
        let what = if self.verse_visible {
            "verse on screen"
        } else {
            "normal"
        };
        format!("{} {}", self.at.format("%H:%M:%S"), what)
    }
}

/// Everything a dock-style frontend shows about the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockStatus {
    pub active: bool,
    /// `None` until the first poll of the session has completed.
    pub connected: Option<bool>,
    pub last_event: Option<LastEvent>,
    pub monitored_layers: Vec<String>,
}

impl DockStatus {
    /// Forget per-session details; called when monitoring stops.
    pub fn reset_session(&mut self) {
        self.active = false;
        self.connected = None;
        self.last_event = None;
    }
}

/// Error body returned by the control API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}
