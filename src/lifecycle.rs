//! Receiver lifecycle state and observable counters.
use std::sync::{
    Arc,
    atomic::{AtomicU8, AtomicU64, Ordering},
};

/// Receiver wide lifecycle phase
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiverState {
    Initializing = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl ReceiverState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Allowed transitions. Nothing leads back to Running once stopping began.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Running)
                | (Self::Initializing, Self::Stopping)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::Stopped
    }
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: AtomicU8,
    processed_messages: AtomicU64,
    applied_actions: AtomicU64,
}

/// Read only view of the control plane, safe to share with any thread.
#[derive(Debug, Clone)]
pub struct Status {
    inner: Arc<Inner>,
}

impl Status {
    pub fn state(&self) -> ReceiverState {
        ReceiverState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Total number of control messages processed
    pub fn processed_messages(&self) -> u64 {
        self.inner.processed_messages.load(Ordering::Acquire)
    }

    /// Total number of actions successfully applied
    pub fn applied_actions(&self) -> u64 {
        self.inner.applied_actions.load(Ordering::Acquire)
    }
}

/// Write side of [Status]. Exactly one exists, owned by the control plane.
#[derive(Debug)]
pub(crate) struct StatusWriter {
    inner: Arc<Inner>,
    state: ReceiverState,
}

impl StatusWriter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(ReceiverState::Initializing as u8),
                processed_messages: AtomicU64::new(0),
                applied_actions: AtomicU64::new(0),
            }),
            state: ReceiverState::Initializing,
        }
    }

    pub fn status(&self) -> Status {
        Status {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Applies a transition, when allowed. Returns false otherwise,
    /// in which case the current state is left untouched.
    pub fn transition(&mut self, next: ReceiverState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            self.inner.state.store(next as u8, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn message_processed(&self) {
        self.inner.processed_messages.fetch_add(1, Ordering::AcqRel);
    }

    pub fn action_applied(&self) {
        self.inner.applied_actions.fetch_add(1, Ordering::AcqRel);
    }
}
