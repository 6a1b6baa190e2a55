//! Per-attempt trade state tracking.

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::TradeState;

/// State of one execution attempt plus the path it took
#[derive(Debug, Clone)]
pub struct TradeLifecycle {
    attempt_id: Uuid,
    state: TradeState,
    history: Vec<TradeState>,
}

impl TradeLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            state: TradeState::Unsigned,
            history: vec![TradeState::Unsigned],
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn state(&self) -> TradeState {
        self.state
    }

    pub fn history(&self) -> &[TradeState] {
        &self.history
    }

    /// Move to `next` if the edge exists. Illegal edges are logged and ignored.
    pub fn advance(&mut self, next: TradeState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                attempt_id = %self.attempt_id,
                from = %self.state,
                to = %next,
                "Ignoring illegal trade state transition"
            );
            return false;
        }
        info!(attempt_id = %self.attempt_id, from = %self.state, to = %next, "Trade state transition");
        self.state = next;
        self.history.push(next);
        true
    }

    /// Terminal failure from whichever non-terminal state we are in
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.advance(TradeState::Failed);
        }
    }
}

impl Default for TradeLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
