//! Conversation lifecycle state.

use parking_lot::Mutex;
use tracing::debug;

/// Per-call conversation state.
///
/// `Finished` is absorbing: once entered, no transition leaves it. The only
/// way out of a finished conversation is hangup (optionally via transfer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Idle; the player may speak greeting or commit output.
    WaitForUser,
    /// A speculative `start` was sent for partial speech; may be rolled back.
    SpeculativeGenerate,
    /// A `commit` is in flight; no further rollback is allowed.
    CommitGenerate,
    /// Terminal. The backend or a timeout ended the conversation.
    Finished,
}

/// Monotone state cell: transitions out of `Finished` are ignored.
pub struct StateCell {
    state: Mutex<ConversationState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConversationState::WaitForUser),
        }
    }

    pub fn get(&self) -> ConversationState {
        *self.state.lock()
    }

    /// Apply a transition unless the conversation is already finished.
    pub fn set(&self, next: ConversationState) {
        let mut state = self.state.lock();
        if *state == ConversationState::Finished {
            return;
        }
        if *state != next {
            debug!(from = ?*state, to = ?next, "Conversation state change");
        }
        *state = next;
    }

    pub fn is_finished(&self) -> bool {
        self.get() == ConversationState::Finished
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
