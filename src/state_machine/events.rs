use serde::{Deserialize, Serialize};

/// Outcome of one delivery attempt as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendResult {
    Success,
    RetryableFail,
    FatalFail,
}

impl SendResult {
    /// Classify an HTTP status code: 2xx succeeds, 408/429/5xx may be retried,
    /// every other code is fatal
    pub fn from_status_code(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            408 | 429 | 500..=599 => Self::RetryableFail,
            _ => Self::FatalFail,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Events that can trigger reliability state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ReceptionEvent {
    /// A send attempt finished
    Sent(SendResult),
    /// The record is due but its retry budget is used up
    RetriesExhausted,
    /// A correlated receipt arrived
    ResponseReceived,
    /// A correlated ebMS error arrived
    ErrorReceived,
}

impl ReceptionEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Sent(SendResult::Success) => "sent_success",
            Self::Sent(SendResult::RetryableFail) => "sent_retryable_fail",
            Self::Sent(SendResult::FatalFail) => "sent_fatal_fail",
            Self::RetriesExhausted => "retries_exhausted",
            Self::ResponseReceived => "response_received",
            Self::ErrorReceived => "error_received",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_classification() {
        assert_eq!(SendResult::from_status_code(200), SendResult::Success);
        assert_eq!(SendResult::from_status_code(202), SendResult::Success);
        assert_eq!(SendResult::from_status_code(503), SendResult::RetryableFail);
        assert_eq!(SendResult::from_status_code(429), SendResult::RetryableFail);
        assert_eq!(SendResult::from_status_code(408), SendResult::RetryableFail);
        assert_eq!(SendResult::from_status_code(400), SendResult::FatalFail);
        assert_eq!(SendResult::from_status_code(404), SendResult::FatalFail);
    }
}
