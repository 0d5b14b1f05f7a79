/// Orchestrator: single owner of the activation state machine.
///
/// Poll events and frontend commands both funnel into one loop (`run`), so
/// activation state, the poller, and the visibility controller are only ever
/// touched from that task. Events stamped with a session other than the
/// running one are dropped: nothing a stopped poll produced can act on layers.
use std::sync::Arc;
use std::time::Duration;

use autohide_proto::config::MonitorConfig;
use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::backend::LayerBackend;
use crate::poller::{ConnectionState, PollError, PollEvent, PollEventKind, PollingClient};
use crate::visibility::{ActionHandle, VisibilityController, VisibilitySnapshot};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no layers configured to hide")]
    NoLayersConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveState {
    Inactive,
    Active,
}

/// Notifications for whatever frontend shows the engine's status.
pub trait StatusObserver: Send + Sync {
    fn on_last_event(&self, visible: bool, at: DateTime<Local>);
    fn on_connection_status(&self, connected: bool);
    fn on_active_changed(&self, _active: bool) {}
}

/// Observer that only writes to the log.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl StatusObserver for TracingObserver {
    fn on_last_event(&self, visible: bool, at: DateTime<Local>) {
        info!(
            "{} {}",
            at.format("%H:%M:%S"),
            if visible { "verse on screen" } else { "normal" }
        );
    }

    fn on_connection_status(&self, connected: bool) {
        info!("presentation host connected: {}", connected);
    }
}

/// Inputs from the frontend.
#[derive(Debug)]
pub enum Command {
    Activate {
        reply: oneshot::Sender<Result<(), ConfigurationError>>,
    },
    Deactivate {
        restore: bool,
    },
    Reconfigure(MonitorConfig),
    Shutdown,
}

enum Input {
    Command(Option<Command>),
    Poll(PollEvent),
}

pub struct Orchestrator {
    config: MonitorConfig,
    poller: PollingClient,
    events: mpsc::Receiver<PollEvent>,
    visibility: VisibilityController,
    observer: Arc<dyn StatusObserver>,
    state: ActiveState,
    session: Option<u64>,
    /// Last verse signal reported in the current activation.
    last_visible: Option<bool>,
}

impl Orchestrator {
    pub fn new(
        config: MonitorConfig,
        backend: Arc<dyn LayerBackend>,
        observer: Arc<dyn StatusObserver>,
    ) -> Result<Self, PollError> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let poller = PollingClient::new(event_tx)?;
        let visibility =
            VisibilityController::new(backend, Duration::from_millis(config.action_delay_ms));
        Ok(Self::from_parts(config, poller, event_rx, visibility, observer))
    }

    /// Assemble from parts built elsewhere. `events` must be the receiving end
    /// of the channel `poller` was created with.
    pub fn from_parts(
        config: MonitorConfig,
        poller: PollingClient,
        events: mpsc::Receiver<PollEvent>,
        visibility: VisibilityController,
        observer: Arc<dyn StatusObserver>,
    ) -> Self {
        let config = config.normalized();
        let mut orchestrator = Self {
            config: config.clone(),
            poller,
            events,
            visibility,
            observer,
            state: ActiveState::Inactive,
            session: None,
            last_visible: None,
        };
        orchestrator.apply_live_settings(&config);
        orchestrator
    }

    pub fn state(&self) -> ActiveState {
        self.state
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.poller.state()
    }

    pub fn snapshot(&self) -> VisibilitySnapshot {
        self.visibility.snapshot()
    }

    pub fn session(&self) -> Option<u64> {
        self.session
    }

    pub fn activate(&mut self) -> Result<(), ConfigurationError> {
        if self.config.monitored_layers.is_empty() {
            warn!("Activation refused: no layers configured");
            return Err(ConfigurationError::NoLayersConfigured);
        }
        if self.state == ActiveState::Active {
            return Ok(());
        }

        self.state = ActiveState::Active;
        self.last_visible = None;
        self.session = Some(
            self.poller
                .start(&self.config.endpoint, self.poll_interval()),
        );
        info!(
            "Monitoring activated for {} layer(s)",
            self.config.monitored_layers.len()
        );
        self.observer.on_active_changed(true);
        Ok(())
    }

    /// Stop monitoring. With `restore`, schedule a restore of the last snapshot.
    pub fn deactivate(&mut self, restore: bool) -> Option<ActionHandle> {
        if self.state == ActiveState::Inactive {
            return None;
        }

        self.poller.stop();
        self.session = None;
        self.last_visible = None;
        self.state = ActiveState::Inactive;
        info!("Monitoring deactivated (restore: {})", restore);
        self.observer.on_active_changed(false);

        restore.then(|| self.visibility.restore_previous())
    }

    /// React to one poll event. Returns the visibility action it scheduled, if any.
    pub fn handle_event(&mut self, event: PollEvent) -> Option<ActionHandle> {
        if self.session != Some(event.session) {
            debug!("dropping event from stale session {}", event.session);
            return None;
        }

        match event.kind {
            PollEventKind::VerseChanged { visible, at } => {
                self.last_visible = Some(visible);
                let action = if visible {
                    self.visibility.hide(&self.config.monitored_layers)
                } else if self.config.restore_previous_state {
                    self.visibility.restore_previous()
                } else {
                    self.visibility.show_all(&self.config.monitored_layers)
                };
                self.observer.on_last_event(visible, at);
                Some(action)
            }
            PollEventKind::DeactivationRequested => {
                // Hide first so the hidden state outlives the deactivation.
                let action = self.visibility.hide(&self.config.monitored_layers);
                self.deactivate(false);
                info!("Music on screen: layers hidden and monitoring stopped");
                Some(action)
            }
            PollEventKind::ServiceReachable(connected) => {
                self.observer.on_connection_status(connected);
                None
            }
        }
    }

    /// Swap in new settings. A running session is restarted with them; the
    /// visibility snapshot and the last reported signal carry over.
    pub fn reconfigure(&mut self, config: MonitorConfig) {
        let config = config.normalized();
        self.apply_live_settings(&config);
        self.config = config;

        if self.state == ActiveState::Active {
            info!("Restarting monitoring with new settings");
            self.session = Some(self.poller.resume(
                &self.config.endpoint,
                self.poll_interval(),
                self.last_visible,
            ));
        }
    }

    /// Drive the engine until `Shutdown` or until every command sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Orchestrator: starting event loop");

        loop {
            let input = tokio::select! {
                cmd = commands.recv() => Input::Command(cmd),
                Some(event) = self.events.recv() => Input::Poll(event),
            };

            match input {
                Input::Command(Some(cmd)) => {
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                Input::Command(None) => {
                    info!("Orchestrator: command channel closed");
                    break;
                }
                Input::Poll(event) => {
                    self.handle_event(event);
                }
            }
        }

        if let Some(restore) = self.deactivate(true) {
            restore.wait().await;
        }
    }

    /// Returns false once the loop should stop.
    fn handle_command(&mut self, cmd: Command) -> bool {
        debug!("Orchestrator: command {:?}", cmd);
        match cmd {
            Command::Activate { reply } => {
                let result = self.activate();
                let _ = reply.send(result);
            }
            Command::Deactivate { restore } => {
                self.deactivate(restore);
            }
            Command::Reconfigure(config) => self.reconfigure(config),
            Command::Shutdown => {
                info!("Orchestrator: shutting down");
                return false;
            }
        }
        true
    }

    fn apply_live_settings(&mut self, config: &MonitorConfig) {
        self.visibility
            .set_action_delay(Duration::from_millis(config.action_delay_ms));
        self.visibility
            .set_cancel_superseded(config.cancel_superseded_actions);
        self.poller.set_disable_on_music(config.disable_on_music);
        self.poller
            .set_poll_interval(Duration::from_millis(config.poll_interval_ms));
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }
}
