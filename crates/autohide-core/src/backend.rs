//! Host seam for reading and toggling layer visibility.
//!
//! The engine never owns the host's scene graph: every mutation goes through a
//! [`LayerBackend`], and every mutation is preceded by a fresh read so that
//! changes made by the operator in the meantime are respected.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

pub type LayerName = String;
pub type ContextId = String;

/// Synchronous, cheap view of the host's active composition.
pub trait LayerBackend: Send + Sync + 'static {
    /// The active context (scene), if any.
    fn current_context(&self) -> Option<ContextId>;

    /// Layers in `context`, in host order. Empty when the context is unknown.
    fn list_layers(&self, context: &str) -> Vec<LayerName>;

    /// `None` when `layer` is not part of `context`.
    fn is_visible(&self, context: &str, layer: &str) -> Option<bool>;

    /// Returns false when `layer` is not part of `context`.
    fn set_visible(&self, context: &str, layer: &str, visible: bool) -> bool;
}

#[derive(Debug, Default)]
struct SceneGraph {
    current: Option<ContextId>,
    scenes: BTreeMap<ContextId, Vec<(LayerName, bool)>>,
}

/// In-process scene graph. Stands in for a real host in the daemon and tests.
#[derive(Debug, Default)]
pub struct MemoryScene {
    graph: Mutex<SceneGraph>,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single scene holding `layers`, made current.
    pub fn with_scene<I, S>(context: &str, layers: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<LayerName>,
    {
        let scene = Self::new();
        scene.insert_scene(context, layers);
        scene.set_current(Some(context));
        scene
    }

    /// Add or replace a scene.
    pub fn insert_scene<I, S>(&self, context: &str, layers: I)
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<LayerName>,
    {
        let layers = layers.into_iter().map(|(n, v)| (n.into(), v)).collect();
        self.lock().scenes.insert(context.to_string(), layers);
    }

    /// Append `layer` to `context` unless it is already there. Returns true if added.
    pub fn add_layer(&self, context: &str, layer: &str, visible: bool) -> bool {
        let mut graph = self.lock();
        let layers = graph.scenes.entry(context.to_string()).or_default();
        if layers.iter().any(|(n, _)| n == layer) {
            return false;
        }
        layers.push((layer.to_string(), visible));
        true
    }

    pub fn set_current(&self, context: Option<&str>) {
        self.lock().current = context.map(str::to_string);
    }

    /// Visibility of `layer` in the current context.
    pub fn visible(&self, layer: &str) -> Option<bool> {
        let context = self.current_context()?;
        self.is_visible(&context, layer)
    }

    fn lock(&self) -> MutexGuard<'_, SceneGraph> {
        // A panic while holding the lock cannot leave the graph half-written.
        self.graph.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LayerBackend for MemoryScene {
    fn current_context(&self) -> Option<ContextId> {
        let graph = self.lock();
        graph
            .current
            .clone()
            .filter(|c| graph.scenes.contains_key(c))
    }

    fn list_layers(&self, context: &str) -> Vec<LayerName> {
        self.lock()
            .scenes
            .get(context)
            .map(|layers| layers.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    fn is_visible(&self, context: &str, layer: &str) -> Option<bool> {
        self.lock()
            .scenes
            .get(context)?
            .iter()
            .find(|(n, _)| n == layer)
            .map(|(_, v)| *v)
    }

    fn set_visible(&self, context: &str, layer: &str, visible: bool) -> bool {
        let mut graph = self.lock();
        let Some(slot) = graph
            .scenes
            .get_mut(context)
            .and_then(|layers| layers.iter_mut().find(|(n, _)| n == layer))
        else {
            return false;
        };
        slot.1 = visible;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_scene_basics() {
        let scene = MemoryScene::with_scene("Main", [("Camera", true), ("Logo", false)]);
        assert_eq!(scene.current_context().as_deref(), Some("Main"));
        assert_eq!(scene.list_layers("Main"), vec!["Camera", "Logo"]);
        assert_eq!(scene.is_visible("Main", "Camera"), Some(true));
        assert_eq!(scene.is_visible("Main", "Ghost"), None);

        assert!(scene.set_visible("Main", "Logo", true));
        assert_eq!(scene.visible("Logo"), Some(true));
        assert!(!scene.set_visible("Main", "Ghost", true));
        assert!(!scene.set_visible("Other", "Logo", true));
    }

    #[test]
    fn add_layer_appends_once() {
        let scene = MemoryScene::with_scene("Main", [("Camera", true)]);
        assert!(scene.add_layer("Main", "Logo", false));
        assert!(!scene.add_layer("Main", "Camera", false));
        assert_eq!(scene.list_layers("Main"), vec!["Camera", "Logo"]);
        assert_eq!(scene.visible("Camera"), Some(true));
    }

    #[test]
    fn unknown_or_cleared_context() {
        let scene = MemoryScene::with_scene("Main", [("Camera", true)]);
        scene.set_current(Some("Gone"));
        assert_eq!(scene.current_context(), None);
        assert!(scene.list_layers("Gone").is_empty());

        scene.set_current(None);
        assert_eq!(scene.visible("Camera"), None);
    }
}
