//! # Reception Awareness Transitions
//!
//! Pure transition function for the reliable-send bookkeeping. The retry
//! engine loads a record, applies one [`ReceptionEvent`], and persists the
//! record together with the operation and status the transition prescribes
//! for the out message.
//!
//! | from                   | event                         | to           | count | operation     | status    |
//! |------------------------|-------------------------------|--------------|-------|---------------|-----------|
//! | Received / ToBeRetried | Sent(Success)                 | Delivered    | =     | Delivered     | Delivered |
//! | Received / ToBeRetried | Sent(RetryableFail), budget   | ToBeRetried  | +1    | ToBeRetried   | Received  |
//! | Received / ToBeRetried | Sent(RetryableFail), no budget| DeadLettered | =     | DeadLettered  | Exception |
//! | Received / ToBeRetried | Sent(FatalFail)               | DeadLettered | =     | DeadLettered  | Exception |
//! | Received / ToBeRetried | RetriesExhausted              | DeadLettered | =     | DeadLettered  | Exception |
//! | Received / ToBeRetried | ResponseReceived              | Delivered    | =     | Delivered     | Delivered |
//! | Received / ToBeRetried | ErrorReceived                 | Rejected     | =     | NotApplicable | Nack      |

use super::events::{ReceptionEvent, SendResult};
use super::states::ReliabilityState;
use crate::error::{As4Error, Result};
use crate::models::records::{MessageStatus, Operation, ReceptionAwareness};
use chrono::{DateTime, Utc};

/// Result of applying an event to a reception awareness record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ReliabilityState,
    pub to: ReliabilityState,
    /// Operation to store on the out message
    pub operation: Operation,
    /// Status to store on the out message
    pub status: MessageStatus,
    /// Whether the retry counter was incremented
    pub retry_scheduled: bool,
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

/// Determine the target state for `event` without touching the record
pub fn determine_transition(
    record: &ReceptionAwareness,
    event: ReceptionEvent,
) -> Result<Transition> {
    let from = record.state;
    if record.is_completed || from.is_terminal() {
        return Err(invalid(from, event));
    }

    let budget_left = record.current_retry_count < record.total_retry_count;

    let (to, operation, status, retry_scheduled) = match event {
        ReceptionEvent::Sent(SendResult::Success) | ReceptionEvent::ResponseReceived => (
            ReliabilityState::Delivered,
            Operation::Delivered,
            MessageStatus::Delivered,
            false,
        ),
        ReceptionEvent::Sent(SendResult::RetryableFail) if budget_left => (
            ReliabilityState::ToBeRetried,
            Operation::ToBeRetried,
            MessageStatus::Received,
            true,
        ),
        ReceptionEvent::Sent(SendResult::RetryableFail)
        | ReceptionEvent::Sent(SendResult::FatalFail) => dead_lettered(),
        ReceptionEvent::RetriesExhausted if !budget_left => dead_lettered(),
        ReceptionEvent::RetriesExhausted => return Err(invalid(from, event)),
        ReceptionEvent::ErrorReceived => (
            ReliabilityState::Rejected,
            Operation::NotApplicable,
            MessageStatus::Nack,
            false,
        ),
    };

    Ok(Transition {
        from,
        to,
        operation,
        status,
        retry_scheduled,
    })
}

fn dead_lettered() -> (ReliabilityState, Operation, MessageStatus, bool) {
    (
        ReliabilityState::DeadLettered,
        Operation::DeadLettered,
        MessageStatus::Exception,
        false,
    )
}

fn invalid(from: ReliabilityState, event: ReceptionEvent) -> As4Error {
    As4Error::InvalidTransition {
        from: from.to_string(),
        event: event.event_type().to_string(),
    }
}

impl ReceptionAwareness {
    /// Apply `event` at `now`, mutating the record in place
    pub fn apply(&mut self, event: ReceptionEvent, now: DateTime<Utc>) -> Result<Transition> {
        let transition = determine_transition(self, event)?;

        if transition.retry_scheduled {
            self.current_retry_count += 1;
            self.last_send_time = Some(now);
        }
        self.state = transition.to;
        if transition.is_terminal() {
            self.is_completed = true;
        }
        self.release_lease();

        Ok(transition)
    }

    pub fn apply_send_result(
        &mut self,
        result: SendResult,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        self.apply(ReceptionEvent::Sent(result), now)
    }

    /// Finalize a due record whose retry budget is used up
    pub fn dead_letter_exhausted(&mut self, now: DateTime<Utc>) -> Result<Transition> {
        self.apply(ReceptionEvent::RetriesExhausted, now)
    }

    /// Complete the record because a correlated receipt
    /// ([`ReceptionEvent::ResponseReceived`]) or error
    /// ([`ReceptionEvent::ErrorReceived`]) arrived.
    ///
    /// Returns `None` when the record was already completed or `event` is
    /// not a correlated response.
    pub fn complete_out_of_band(
        &mut self,
        event: ReceptionEvent,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        if self.is_completed
            || !matches!(
                event,
                ReceptionEvent::ResponseReceived | ReceptionEvent::ErrorReceived
            )
        {
            return None;
        }
        self.apply(event, now).ok()
    }
}
