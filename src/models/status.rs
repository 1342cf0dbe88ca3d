use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// Lifecycle of a consumer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    Connecting,
    Bound,
    Consuming,
    Processing,
    Acked,
    ProcessingFailed,
    Stopped,
}

/// What a consumer does with a delivery after handling it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryDecision {
    Ack,
    Requeue { attempts: u32 },
    DeadLetter { attempts: u32, reason: String },
}

impl Display for ConsumerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            ConsumerState::Connecting => write!(f, "connecting"),
            ConsumerState::Bound => write!(f, "bound"),
            ConsumerState::Consuming => write!(f, "consuming"),
            ConsumerState::Processing => write!(f, "processing"),
            ConsumerState::Acked => write!(f, "acked"),
            ConsumerState::ProcessingFailed => write!(f, "processing_failed"),
            ConsumerState::Stopped => write!(f, "stopped"),
        }
    }
}
