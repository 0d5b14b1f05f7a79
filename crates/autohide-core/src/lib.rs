//! Verse-aware auto-hide engine.
//!
//! Polls a Holyrics-style presentation host, works out whether a scripture
//! verse (or song lyrics) is on screen, and hides a set of host layers while it
//! is, restoring exactly what was visible before once it is gone.

pub mod backend;
pub mod classifier;
pub mod orchestrator;
pub mod poller;
pub mod visibility;

pub use backend::{LayerBackend, MemoryScene};
pub use classifier::{classify, Classification, ParseError};
pub use orchestrator::{
    ActiveState, Command, ConfigurationError, Orchestrator, StatusObserver, TracingObserver,
};
pub use poller::{ConnectionState, PollError, PollEvent, PollEventKind, PollingClient};
pub use visibility::{ActionHandle, ActionOutcome, VisibilityController, VisibilitySnapshot};
