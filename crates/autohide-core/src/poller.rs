//! Polling client for the presentation host's live view.
//!
//! One tokio task per session: tick, fetch `/view/text.json`, classify, and
//! push edge-triggered [`PollEvent`]s into the orchestrator's channel. The task
//! awaits each request before taking the next tick, so there is never more than
//! one request in flight; ticks missed meanwhile are skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use autohide_proto::config::MIN_POLL_INTERVAL_MS;
use tracing::{debug, info, warn};

use crate::classifier::{classify_or_other, Classification};

pub const VIEW_PATH: &str = "/view/text.json";
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);
const USER_AGENT: &str = concat!("autohide/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum PollError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("presentation host returned status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connected,
    /// The loop ended on its own: nobody is listening for its events.
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEventKind {
    VerseChanged { visible: bool, at: DateTime<Local> },
    DeactivationRequested,
    ServiceReachable(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollEvent {
    /// Which `start` produced this event.
    pub session: u64,
    pub kind: PollEventKind,
}

/// What one classified poll should emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Emissions {
    pub verse_changed: Option<bool>,
    pub deactivation_requested: bool,
}

/// Edge detection over successive polls, kept apart from the network loop.
#[derive(Debug, Default)]
pub struct SignalTracker {
    last_signal: Option<bool>,
    reachable: Option<bool>,
}

impl SignalTracker {
    /// Continue from a known signal instead of the unset initial state.
    pub fn with_last_signal(last_signal: Option<bool>) -> Self {
        Self {
            last_signal,
            reachable: None,
        }
    }

    pub fn observe(&mut self, classification: Classification, disable_on_music: bool) -> Emissions {
        let visible = classification.hides_layers();
        let verse_changed = (self.last_signal != Some(visible)).then(|| {
            self.last_signal = Some(visible);
            visible
        });
        Emissions {
            verse_changed,
            deactivation_requested: classification.requests_deactivation(disable_on_music),
        }
    }

    /// `Some(now)` when reachability differs from the previous poll.
    pub fn observe_reachability(&mut self, reachable: bool) -> Option<bool> {
        if self.reachable == Some(reachable) {
            return None;
        }
        self.reachable = Some(reachable);
        Some(reachable)
    }

    pub fn last_signal(&self) -> Option<bool> {
        self.last_signal
    }
}

pub fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

struct Session {
    id: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct PollingClient {
    http: reqwest::Client,
    events: mpsc::Sender<PollEvent>,
    interval: watch::Sender<Duration>,
    disable_on_music: Arc<AtomicBool>,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Option<Session>,
    next_session: u64,
}

impl PollingClient {
    pub fn new(events: mpsc::Sender<PollEvent>) -> Result<Self, PollError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let (interval, _) = watch::channel(Duration::from_millis(1000));
        let (state, _) = watch::channel(ConnectionState::Idle);

        Ok(Self {
            http,
            events,
            interval,
            disable_on_music: Arc::new(AtomicBool::new(false)),
            state: Arc::new(state),
            session: None,
            next_session: 1,
        })
    }

    /// Begin polling `endpoint`. The first request goes out immediately.
    /// Returns the id stamped on every event of this session.
    pub fn start(&mut self, endpoint: &str, interval: Duration) -> u64 {
        self.resume(endpoint, interval, None)
    }

    /// Like [`start`](Self::start), but the new session compares its first
    /// poll against `last_signal`, so restarting with new settings does not
    /// replay a transition that was already reported.
    pub fn resume(&mut self, endpoint: &str, interval: Duration, last_signal: Option<bool>) -> u64 {
        self.stop();
        let interval = clamp_interval(interval);
        self.interval.send_replace(interval);

        let id = self.next_session;
        self.next_session += 1;

        let url = format!("{}{}", normalize_endpoint(endpoint), VIEW_PATH);
        info!("Polling {} every {:?}", url, interval);

        let token = CancellationToken::new();
        let poll = PollLoop {
            session: id,
            url,
            http: self.http.clone(),
            events: self.events.clone(),
            interval: self.interval.subscribe(),
            disable_on_music: Arc::clone(&self.disable_on_music),
            state: Arc::clone(&self.state),
            token: token.clone(),
            initial_signal: last_signal,
        };

        self.state.send_replace(ConnectionState::Connected);
        let task = tokio::spawn(poll.run());
        self.session = Some(Session { id, token, task });
        id
    }

    /// Stop polling. A response still in flight is discarded.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.token.cancel();
            session.task.abort();
            info!("Stopped polling (session {})", session.id);
        }
        self.state.send_replace(ConnectionState::Idle);
    }

    /// Takes effect on the running session by rearming its timer.
    pub fn set_poll_interval(&self, interval: Duration) {
        let interval = clamp_interval(interval);
        self.interval.send_if_modified(|current| {
            if *current == interval {
                return false;
            }
            *current = interval;
            true
        });
    }

    pub fn poll_interval(&self) -> Duration {
        *self.interval.borrow()
    }

    pub fn set_disable_on_music(&self, disable: bool) {
        self.disable_on_music.store(disable, Ordering::Relaxed);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Id of the running session, if any.
    pub fn session(&self) -> Option<u64> {
        self.session
            .as_ref()
            .filter(|s| !s.task.is_finished())
            .map(|s| s.id)
    }
}

impl Drop for PollingClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.token.cancel();
            session.task.abort();
        }
    }
}

struct PollLoop {
    session: u64,
    url: String,
    http: reqwest::Client,
    events: mpsc::Sender<PollEvent>,
    interval: watch::Receiver<Duration>,
    disable_on_music: Arc<AtomicBool>,
    state: Arc<watch::Sender<ConnectionState>>,
    token: CancellationToken,
    initial_signal: Option<bool>,
}

impl PollLoop {
    async fn run(mut self) {
        let mut ticker = ticker_for(*self.interval.borrow_and_update(), true);
        let mut tracker = SignalTracker::with_last_signal(self.initial_signal);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                changed = self.interval.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = *self.interval.borrow_and_update();
                    debug!("poll interval now {:?}", period);
                    ticker = ticker_for(period, false);
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                result = fetch_view(&self.http, &self.url) => result,
            };

            if !self.handle_result(result, &mut tracker).await {
                if !self.token.is_cancelled() {
                    warn!("Event receiver gone, polling session {} ends", self.session);
                    self.state.send_replace(ConnectionState::Disconnected);
                }
                break;
            }
        }
        debug!("poll loop {} exited", self.session);
    }

    /// Returns false once events can no longer be delivered.
    async fn handle_result(
        &self,
        result: Result<Vec<u8>, PollError>,
        tracker: &mut SignalTracker,
    ) -> bool {
        let body = match result {
            Ok(body) => body,
            Err(e) => {
                if tracker.observe_reachability(false).is_some() {
                    warn!("Presentation host unreachable at {}: {}", self.url, e);
                    return self.emit(PollEventKind::ServiceReachable(false)).await;
                }
                debug!("poll failed again: {}", e);
                return true;
            }
        };

        if tracker.observe_reachability(true).is_some() {
            info!("Presentation host reachable at {}", self.url);
            if !self.emit(PollEventKind::ServiceReachable(true)).await {
                return false;
            }
        }

        let classification = classify_or_other(&body);
        let emissions =
            tracker.observe(classification, self.disable_on_music.load(Ordering::Relaxed));

        if let Some(visible) = emissions.verse_changed {
            info!(
                "Verse {} ({})",
                if visible { "on screen" } else { "off screen" },
                classification.label()
            );
            let at = Local::now();
            if !self.emit(PollEventKind::VerseChanged { visible, at }).await {
                return false;
            }
        }

        if emissions.deactivation_requested {
            info!("Music on screen, requesting deactivation");
            if !self.emit(PollEventKind::DeactivationRequested).await {
                return false;
            }
        }
        true
    }

    async fn emit(&self, kind: PollEventKind) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let event = PollEvent {
            session: self.session,
            kind,
        };
        self.events.send(event).await.is_ok()
    }
}

/// Raise `interval` to the polling floor.
fn clamp_interval(interval: Duration) -> Duration {
    let floor = Duration::from_millis(MIN_POLL_INTERVAL_MS);
    if interval < floor {
        warn!("poll interval {:?} below minimum, using {:?}", interval, floor);
        return floor;
    }
    interval
}

fn ticker_for(period: Duration, immediate: bool) -> Interval {
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn fetch_view(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, PollError> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PollError::Status(status));
    }
    Ok(response.bytes().await?.to_vec())
}
