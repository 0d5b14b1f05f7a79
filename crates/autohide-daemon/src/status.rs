use std::sync::atomic::{AtomicBool, Ordering};

use autohide_core::StatusObserver;
use autohide_proto::protocol::{DockStatus, LastEvent};
use chrono::{DateTime, Local};
use tokio::sync::watch;
use tracing::info;

/// Dock-style status fed by the orchestrator and read by the HTTP API.
pub struct StatusBoard {
    tx: watch::Sender<DockStatus>,
    notifications: AtomicBool,
}

impl StatusBoard {
    pub fn new(monitored_layers: Vec<String>, notifications: bool) -> Self {
        let (tx, _) = watch::channel(DockStatus {
            monitored_layers,
            ..DockStatus::default()
        });
        Self {
            tx,
            notifications: AtomicBool::new(notifications),
        }
    }

    pub fn current(&self) -> DockStatus {
        self.tx.borrow().clone()
    }

    pub fn set_monitored_layers(&self, layers: Vec<String>) {
        self.tx.send_modify(|status| status.monitored_layers = layers);
    }

    pub fn set_notifications(&self, enabled: bool) {
        self.notifications.store(enabled, Ordering::Relaxed);
    }

    fn notify(&self, message: &str) {
        if self.notifications.load(Ordering::Relaxed) {
            info!(target: "autohide::notify", "{}", message);
        }
    }
}

impl StatusObserver for StatusBoard {
    fn on_last_event(&self, visible: bool, at: DateTime<Local>) {
        let event = LastEvent {
            verse_visible: visible,
            at,
        };
        self.notify(&format!("Last: {}", event.label()));
        self.tx.send_modify(|status| status.last_event = Some(event));
    }

    fn on_connection_status(&self, connected: bool) {
        self.notify(if connected {
            "Holyrics: connected"
        } else {
            "Holyrics: no connection"
        });
        self.tx
            .send_modify(|status| status.connected = Some(connected));
    }

    fn on_active_changed(&self, active: bool) {
        self.notify(if active {
            "Monitoring active"
        } else {
            "Monitoring off"
        });
        self.tx.send_modify(|status| {
            if active {
                status.active = true;
            } else {
                status.reset_session();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_session_and_resets_on_deactivation() {
        let board = StatusBoard::new(vec!["Camera".into()], false);

        board.on_active_changed(true);
        board.on_connection_status(true);
        board.on_last_event(true, Local::now());

        let status = board.current();
        assert!(status.active);
        assert_eq!(status.connected, Some(true));
        assert_eq!(status.last_event.map(|e| e.verse_visible), Some(true));

        board.on_active_changed(false);
        let status = board.current();
        assert!(!status.active);
        assert_eq!(status.connected, None);
        assert_eq!(status.last_event, None);
        assert_eq!(status.monitored_layers, vec!["Camera"]);
    }

    #[test]
    fn layer_list_updates() {
        let board = StatusBoard::new(Vec::new(), true);
        board.set_monitored_layers(vec!["Logo".into()]);
        assert_eq!(board.current().monitored_layers, vec!["Logo"]);
    }
}
