//! Observable sync state

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Lifecycle of the sync coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Synced,
    Failed,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// `Synced` and `Failed` are shown briefly, then fall back to `Idle`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Synced | Self::Failed)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivered to every listener on each transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateEvent {
    pub state: SyncState,
    /// Transition time (Unix ms)
    pub timestamp: i64,
    /// Rendered cycle error, only for `Failed`
    pub error: Option<String>,
}

/// Handle returned by [`StatusBoard::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type StateListener = Arc<dyn Fn(&StateEvent) + Send + Sync>;

#[derive(Default)]
struct Board {
    state: SyncState,
    last_event: Option<StateEvent>,
    /// Bumped on every transition so stale idle timers can tell they lost the race
    generation: u64,
    next_listener: u64,
    listeners: Vec<(ListenerId, StateListener)>,
}

/// Current state plus the listeners observing it.
///
/// Listeners run outside the lock, so a callback may read the state again.
#[derive(Default)]
pub struct StatusBoard {
    inner: Mutex<Board>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Board> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SyncState {
        self.lock().state
    }

    pub fn last_event(&self) -> Option<StateEvent> {
        self.lock().last_event.clone()
    }

    pub fn subscribe(&self, listener: StateListener) -> ListenerId {
        let mut board = self.lock();
        board.next_listener += 1;
        let id = ListenerId(board.next_listener);
        board.listeners.push((id, listener));
        id
    }

    /// Returns false when the listener was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut board = self.lock();
        let before = board.listeners.len();
        board.listeners.retain(|(listener_id, _)| *listener_id != id);
        board.listeners.len() != before
    }

    /// Move to `state` and notify listeners; returns the transition generation.
    pub fn transition(&self, state: SyncState, timestamp: i64, error: Option<String>) -> u64 {
        let event = StateEvent {
            state,
            timestamp,
            error,
        };
        let (generation, listeners) = {
            let mut board = self.lock();
            board.state = state;
            board.generation += 1;
            board.last_event = Some(event.clone());
            let listeners: Vec<StateListener> = board
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (board.generation, listeners)
        };

        tracing::debug!(state = %state, generation, "Sync state changed");
        for listener in listeners {
            listener(&event);
        }
        generation
    }

    /// Return to `Idle` unless another transition happened since `generation`.
    pub fn settle_to_idle(&self, generation: u64, timestamp: i64) -> bool {
        {
            let board = self.lock();
            if board.generation != generation || !board.state.is_terminal() {
                return false;
            }
        }
        self.transition(SyncState::Idle, timestamp, None);
        true
    }
}
