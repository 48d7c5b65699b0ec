//! Signature placement and session persistence
//!
//! Turns pointer drops on a rendered PDF into durable page-space placements,
//! replays them into the document engine after every load, gates edits by
//! signee role and drives the export, sign and reload cycle.
//!
//! The document engine and the remote signing service are traits
//! ([`DocumentEngine`], [`SigningService`]); [`engine::memory::InMemoryEngine`]
//! is an in-process engine for tests and the simulator.

pub mod config;
pub mod coords;
pub mod drag;
pub mod engine;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod signing;
pub mod storage;
pub mod store;

pub use config::PlacementConfig;
pub use coords::{pointer_rect_for, to_page_rect};
pub use drag::DragPayload;
pub use engine::{DocumentEngine, DropEvent, EngineEvent, EngineHandle, LoadOptions};
pub use error::{
    ConfigError, EngineError, PlacementError, RosterError, SigningError, SigningServiceError,
    StoreError, TransformError,
};
pub use reconciler::{LoadState, Reconciler, ReplayReport};
pub use registry::{field_capabilities, visibility_rules, SigneeRegistry, VisibilityRules};
pub use session::SessionSnapshot;
pub use signing::{SigningOrchestrator, SigningRequest, SigningService};
pub use storage::{MemorySessionStorage, SessionStorage};
pub use store::PlacementStore;
