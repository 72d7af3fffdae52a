use serde::{Deserialize, Serialize};
use std::fmt;

/// Reliability state of an outbound message under reception awareness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityState {
    /// Sent at least once, retries remain
    #[default]
    Received,
    /// Last attempt failed with a retryable result
    ToBeRetried,
    /// Acknowledged or accepted by the receiving MSH
    Delivered,
    /// Retry budget exhausted or fatal failure
    DeadLettered,
    /// Answered with an ebMS error by the receiving MSH
    Rejected,
}

impl ReliabilityState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::DeadLettered | Self::Rejected)
    }

    /// Check if another send attempt may be made from this state
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Received | Self::ToBeRetried)
    }
}

impl fmt::Display for ReliabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::ToBeRetried => write!(f, "to_be_retried"),
            Self::Delivered => write!(f, "delivered"),
            Self::DeadLettered => write!(f, "dead_lettered"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for ReliabilityState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "to_be_retried" => Ok(Self::ToBeRetried),
            "delivered" => Ok(Self::Delivered),
            "dead_lettered" => Ok(Self::DeadLettered),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid reliability state: {s}")),
        }
    }
}
