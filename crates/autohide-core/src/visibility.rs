//! Delayed hide/restore of monitored layers.
//!
//! `hide` records which layers were visible at the moment it was asked, and
//! `restore_previous` only brings those back. Every action waits for the
//! configured debounce delay, then re-reads the host before writing, so an
//! operator toggling a layer in between is never overridden blindly.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::{ContextId, LayerBackend, LayerName};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub layer: LayerName,
    pub was_visible: bool,
}

/// Visibility captured by the most recent `hide`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilitySnapshot {
    pub context: Option<ContextId>,
    pub entries: Vec<SnapshotEntry>,
}

impl VisibilitySnapshot {
    fn capture(backend: &dyn LayerBackend, layers: &[LayerName]) -> Self {
        let Some(context) = backend.current_context() else {
            return Self::default();
        };
        let entries = layers
            .iter()
            .filter_map(|layer| {
                backend
                    .is_visible(&context, layer)
                    .map(|was_visible| SnapshotEntry {
                        layer: layer.clone(),
                        was_visible,
                    })
            })
            .collect();
        Self {
            context: Some(context),
            entries,
        }
    }

    pub fn was_visible(&self, layer: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|e| e.layer == layer)
            .map(|e| e.was_visible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind {
    Hide,
    Restore,
    ShowAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Ran against the current context; `changed` layers actually flipped.
    Applied { changed: usize },
    /// No active context when the delay elapsed.
    NoContext,
    /// Cancelled before the delay elapsed.
    Cancelled,
}

/// Handle to one delayed visibility action.
#[derive(Debug)]
pub struct ActionHandle {
    token: CancellationToken,
    task: JoinHandle<ActionOutcome>,
}

impl ActionHandle {
    /// Prevent the action from running if its delay has not elapsed yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> ActionOutcome {
        self.task.await.unwrap_or(ActionOutcome::Cancelled)
    }
}

pub struct VisibilityController {
    backend: Arc<dyn LayerBackend>,
    snapshot: Arc<Mutex<VisibilitySnapshot>>,
    delay: Duration,
    cancel_superseded: bool,
    pending: Vec<(CancellationToken, AbortHandle)>,
}

impl VisibilityController {
    pub fn new(backend: Arc<dyn LayerBackend>, delay: Duration) -> Self {
        Self {
            backend,
            snapshot: Arc::new(Mutex::new(VisibilitySnapshot::default())),
            delay,
            cancel_superseded: false,
            pending: Vec::new(),
        }
    }

    /// When enabled, scheduling an action cancels every action still waiting
    /// on its delay, so only the latest decision reaches the host.
    pub fn set_cancel_superseded(&mut self, enabled: bool) {
        self.cancel_superseded = enabled;
    }

    /// Applies to actions scheduled from now on.
    pub fn set_action_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    pub fn action_delay(&self) -> Duration {
        self.delay
    }

    pub fn snapshot(&self) -> VisibilitySnapshot {
        lock(&self.snapshot).clone()
    }

    /// Snapshot `layers` now, hide the visible ones after the delay.
    pub fn hide(&mut self, layers: &[LayerName]) -> ActionHandle {
        let snapshot = VisibilitySnapshot::capture(self.backend.as_ref(), layers);
        debug!(
            "snapshot of {} layer(s) in {:?}",
            snapshot.entries.len(),
            snapshot.context
        );
        *lock(&self.snapshot) = snapshot;

        let layers = layers.to_vec();
        self.schedule(ActionKind::Hide, move |backend, context| {
            let mut changed = 0;
            for layer in &layers {
                if backend.is_visible(context, layer) == Some(true)
                    && backend.set_visible(context, layer, false)
                {
                    changed += 1;
                }
            }
            if changed > 0 {
                info!("Hid {} layer(s) in {}", changed, context);
            }
            changed
        })
    }

    /// After the delay, show again what the latest snapshot saw visible.
    pub fn restore_previous(&mut self) -> ActionHandle {
        let snapshot = Arc::clone(&self.snapshot);
        self.schedule(ActionKind::Restore, move |backend, context| {
            let entries = lock(&snapshot).entries.clone();
            let mut changed = 0;
            for entry in entries.iter().filter(|e| e.was_visible) {
                if backend.is_visible(context, &entry.layer) == Some(false)
                    && backend.set_visible(context, &entry.layer, true)
                {
                    changed += 1;
                }
            }
            if changed > 0 {
                info!("Restored {} layer(s) in {}", changed, context);
            }
            changed
        })
    }

    /// After the delay, show every named layer regardless of the snapshot.
    pub fn show_all(&mut self, layers: &[LayerName]) -> ActionHandle {
        let layers = layers.to_vec();
        self.schedule(ActionKind::ShowAll, move |backend, context| {
            let mut changed = 0;
            for layer in &layers {
                if backend.is_visible(context, layer) == Some(false)
                    && backend.set_visible(context, layer, true)
                {
                    changed += 1;
                }
            }
            if changed > 0 {
                info!("Showed {} layer(s) in {}", changed, context);
            }
            changed
        })
    }

    /// Cancel every action still waiting on its delay.
    pub fn cancel_pending(&mut self) {
        for (token, _) in self.pending.drain(..) {
            token.cancel();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .iter()
            .filter(|(_, abort)| !abort.is_finished())
            .count()
    }

    fn schedule<F>(&mut self, kind: ActionKind, apply: F) -> ActionHandle
    where
        F: FnOnce(&dyn LayerBackend, &str) -> usize + Send + 'static,
    {
        if self.cancel_superseded {
            self.cancel_pending();
        } else {
            self.pending.retain(|(_, abort)| !abort.is_finished());
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let backend = Arc::clone(&self.backend);
        let delay = self.delay;

        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    debug!("{:?} cancelled before firing", kind);
                    return ActionOutcome::Cancelled;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(context) = backend.current_context() else {
                debug!("{:?} skipped: no active context", kind);
                return ActionOutcome::NoContext;
            };
            let changed = apply(backend.as_ref(), &context);
            ActionOutcome::Applied { changed }
        });

        self.pending.push((token.clone(), task.abort_handle()));
        ActionHandle { token, task }
    }
}

fn lock(snapshot: &Mutex<VisibilitySnapshot>) -> MutexGuard<'_, VisibilitySnapshot> {
    snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryScene;

    fn names(layers: &[&str]) -> Vec<LayerName> {
        layers.iter().map(|s| s.to_string()).collect()
    }

    fn setup(layers: &[(&str, bool)]) -> (Arc<MemoryScene>, VisibilityController) {
        let scene = Arc::new(MemoryScene::with_scene(
            "Main",
            layers.iter().map(|(n, v)| (*n, *v)),
        ));
        let controller = VisibilityController::new(scene.clone(), Duration::from_millis(150));
        (scene, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn hide_then_restore_respects_snapshot() {
        let (scene, mut controller) = setup(&[("A", true), ("B", false)]);

        let outcome = controller.hide(&names(&["A", "B"])).wait().await;
        assert_eq!(outcome, ActionOutcome::Applied { changed: 1 });
        assert_eq!(scene.visible("A"), Some(false));
        assert_eq!(scene.visible("B"), Some(false));

        let outcome = controller.restore_previous().wait().await;
        assert_eq!(outcome, ActionOutcome::Applied { changed: 1 });
        assert_eq!(scene.visible("A"), Some(true));
        assert_eq!(scene.visible("B"), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn second_restore_is_a_no_op() {
        let (scene, mut controller) = setup(&[("A", true), ("B", true)]);

        controller.hide(&names(&["A", "B"])).wait().await;
        let first = controller.restore_previous().wait().await;
        let second = controller.restore_previous().wait().await;

        assert_eq!(first, ActionOutcome::Applied { changed: 2 });
        assert_eq!(second, ActionOutcome::Applied { changed: 0 });
        assert_eq!(scene.visible("A"), Some(true));
        assert_eq!(controller.snapshot().entries.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn actions_wait_for_the_delay() {
        let (scene, mut controller) = setup(&[("A", true)]);

        let handle = controller.hide(&names(&["A"]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scene.visible("A"), Some(true));
        assert!(!handle.is_finished());

        handle.wait().await;
        assert_eq!(scene.visible("A"), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn show_all_ignores_snapshot() {
        let (scene, mut controller) = setup(&[("A", true), ("B", false)]);

        controller.hide(&names(&["A", "B"])).wait().await;
        let outcome = controller.show_all(&names(&["A", "B"])).wait().await;

        assert_eq!(outcome, ActionOutcome::Applied { changed: 2 });
        assert_eq!(scene.visible("A"), Some(true));
        assert_eq!(scene.visible("B"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_layers_are_skipped() {
        let (scene, mut controller) = setup(&[("A", true)]);

        let outcome = controller.hide(&names(&["Ghost", "A"])).wait().await;
        assert_eq!(outcome, ActionOutcome::Applied { changed: 1 });
        assert_eq!(controller.snapshot().was_visible("Ghost"), None);
        assert_eq!(controller.snapshot().was_visible("A"), Some(true));

        let outcome = controller.show_all(&names(&["Ghost"])).wait().await;
        assert_eq!(outcome, ActionOutcome::Applied { changed: 0 });
        assert_eq!(scene.list_layers("Main"), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn context_vanishing_before_fire_is_silent() {
        let (scene, mut controller) = setup(&[("A", true)]);

        let handle = controller.hide(&names(&["A"]));
        scene.set_current(None);
        assert_eq!(handle.wait().await, ActionOutcome::NoContext);

        scene.set_current(Some("Main"));
        assert_eq!(scene.visible("A"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn hide_without_context_takes_empty_snapshot() {
        let (scene, mut controller) = setup(&[("A", true)]);
        controller.hide(&names(&["A"])).wait().await;
        assert_eq!(controller.snapshot().entries.len(), 1);

        scene.set_current(None);
        controller.hide(&names(&["A"])).wait().await;
        assert_eq!(controller.snapshot(), VisibilitySnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn operator_changes_between_hide_and_restore_are_kept() {
        let (scene, mut controller) = setup(&[("A", true), ("B", false)]);

        controller.hide(&names(&["A", "B"])).wait().await;
        // Operator turns B on during the verse.
        assert!(scene.set_visible("Main", "B", true));

        controller.restore_previous().wait().await;
        assert_eq!(scene.visible("A"), Some(true));
        assert_eq!(scene.visible("B"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_change_only_affects_later_actions() {
        let (scene, mut controller) = setup(&[("A", true)]);
        controller.set_action_delay(Duration::from_millis(100));

        let hide = controller.hide(&names(&["A"]));
        controller.set_action_delay(Duration::from_millis(300));
        let restore = controller.restore_previous();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(hide.is_finished());
        assert!(!restore.is_finished());
        assert_eq!(scene.visible("A"), Some(false));

        assert_eq!(restore.wait().await, ActionOutcome::Applied { changed: 1 });
        assert_eq!(scene.visible("A"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_actions_are_cancelled_when_enabled() {
        let (scene, mut controller) = setup(&[("A", true)]);
        controller.set_cancel_superseded(true);

        let hide = controller.hide(&names(&["A"]));
        let restore = controller.restore_previous();

        assert_eq!(hide.wait().await, ActionOutcome::Cancelled);
        assert_eq!(restore.wait().await, ActionOutcome::Applied { changed: 0 });
        assert_eq!(scene.visible("A"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_actions_run_independently_by_default() {
        let (_scene, mut controller) = setup(&[("A", true)]);

        let first = controller.hide(&names(&["A"]));
        let second = controller.show_all(&names(&["A"]));
        assert_eq!(controller.pending_count(), 2);

        assert_ne!(first.wait().await, ActionOutcome::Cancelled);
        assert_ne!(second.wait().await, ActionOutcome::Cancelled);
        assert_eq!(controller.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cancel() {
        let (scene, mut controller) = setup(&[("A", true)]);

        let handle = controller.hide(&names(&["A"]));
        handle.cancel();
        assert_eq!(handle.wait().await, ActionOutcome::Cancelled);
        assert_eq!(scene.visible("A"), Some(true));

        let handle = controller.hide(&names(&["A"]));
        controller.cancel_pending();
        assert_eq!(handle.wait().await, ActionOutcome::Cancelled);
        assert_eq!(scene.visible("A"), Some(true));
    }
}
