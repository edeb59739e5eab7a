//! Per-delivery state machine.
//!
//! ```text
//! RECEIVED -> DECODING -> PERMANENT_FAIL
//!                      -> VALIDATED -> PROCESSING -> TRANSIENT_FAIL
//!                                                 -> PERSISTED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::AckDecision;

/// State of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Pushed by the broker, nothing inspected yet.
    Received,
    /// Parsing the message body.
    Decoding,
    /// Body is well formed and carries every required field.
    Validated,
    /// Delay, redaction and upsert in progress.
    Processing,
    /// Record is durably stored.
    Persisted,
    /// Malformed message; retrying cannot help.
    PermanentFail,
    /// Store failure; a redelivery may succeed.
    TransientFail,
}

impl DeliveryState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: DeliveryState) -> bool {
        use DeliveryState::*;

        matches!(
            (self, target),
            (Received, Decoding)
                | (Decoding, Validated)
                | (Decoding, PermanentFail)
                | (Validated, Processing)
                | (Processing, Persisted)
                | (Processing, TransientFail)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Persisted | Self::PermanentFail | Self::TransientFail
        )
    }

    /// How the broker should be answered once this attempt has ended.
    /// `None` while still in flight.
    pub fn ack_decision(&self) -> Option<AckDecision> {
        if !self.is_terminal() {
            return None;
        }
        match self {
            Self::TransientFail => Some(AckDecision::Nack),
            _ => Some(AckDecision::Ack),
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Decoding => "decoding",
            Self::Validated => "validated",
            Self::Processing => "processing",
            Self::Persisted => "persisted",
            Self::PermanentFail => "permanent_fail",
            Self::TransientFail => "transient_fail",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: DeliveryState,
    pub to: DeliveryState,
    pub timestamp: DateTime<Utc>,
}

/// Tracks one delivery attempt through the state machine.
#[derive(Debug, Clone)]
pub struct DeliveryTracker {
    message_id: String,
    state: DeliveryState,
    transitions: Vec<StateTransition>,
}

impl DeliveryTracker {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            state: DeliveryState::Received,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Transition to a new state.
    pub fn transition_to(&mut self, new_state: DeliveryState) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.state, new_state
            ));
        }

        debug!(
            message_id = %self.message_id,
            from = %self.state,
            to = %new_state,
            "Delivery state change"
        );
        self.transitions.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Utc::now(),
        });
        self.state = new_state;
        Ok(())
    }

    /// Like [`transition_to`](Self::transition_to), but an illegal move is
    /// only logged. The worker's control flow is what enforces ordering.
    pub fn advance(&mut self, new_state: DeliveryState) {
        if let Err(e) = self.transition_to(new_state) {
            warn!(message_id = %self.message_id, "{e}");
        }
    }
}
