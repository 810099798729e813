//! Sync cycle orchestration: triggers, breaker, observable state

mod breaker;
mod coordinator;
mod state;
mod trigger;


pub use breaker::CycleBreaker;
pub use coordinator::{CycleSummary, SyncCoordinator, SyncOutcome};
pub use state::{ListenerId, StateEvent, StateListener, StatusBoard, SyncState};
pub use trigger::{Capabilities, TriggerKind};
