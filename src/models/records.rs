//! # Persisted Records
//!
//! Rows owned by the message store: received and sent messages, the
//! exceptions raised while handling them, and the reception awareness
//! bookkeeping for reliable sends.

use crate::error::{As4Error, Result};
use crate::state_machine::ReliabilityState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What should happen next with a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    NotApplicable,
    ToBeSent,
    Sending,
    Sent,
    ToBeRetried,
    ToBeDelivered,
    Delivering,
    Delivered,
    ToBeNotified,
    Notified,
    DeadLettered,
}

impl Operation {
    /// In-progress operation used to lease rows that are picked up for `self`
    pub fn in_progress(&self) -> Option<Operation> {
        match self {
            Self::ToBeSent | Self::ToBeRetried => Some(Self::Sending),
            Self::ToBeDelivered => Some(Self::Delivering),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotApplicable => "not_applicable",
            Self::ToBeSent => "to_be_sent",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::ToBeRetried => "to_be_retried",
            Self::ToBeDelivered => "to_be_delivered",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::ToBeNotified => "to_be_notified",
            Self::Notified => "notified",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_applicable" => Ok(Self::NotApplicable),
            "to_be_sent" => Ok(Self::ToBeSent),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "to_be_retried" => Ok(Self::ToBeRetried),
            "to_be_delivered" => Ok(Self::ToBeDelivered),
            "delivering" => Ok(Self::Delivering),
            "delivered" => Ok(Self::Delivered),
            "to_be_notified" => Ok(Self::ToBeNotified),
            "notified" => Ok(Self::Notified),
            "dead_lettered" => Ok(Self::DeadLettered),
            _ => Err(format!("Invalid operation: {s}")),
        }
    }
}

/// Protocol status of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Created,
    Received,
    Sent,
    Ack,
    Nack,
    Delivered,
    Exception,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Received => "received",
            Self::Sent => "sent",
            Self::Ack => "ack",
            Self::Nack => "nack",
            Self::Delivered => "delivered",
            Self::Exception => "exception",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "received" => Ok(Self::Received),
            "sent" => Ok(Self::Sent),
            "ack" => Ok(Self::Ack),
            "nack" => Ok(Self::Nack),
            "delivered" => Ok(Self::Delivered),
            "exception" => Ok(Self::Exception),
            _ => Err(format!("Invalid message status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    UserMessage,
    Receipt,
    Error,
    PullRequest,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::Receipt => "receipt",
            Self::Error => "error",
            Self::PullRequest => "pull_request",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user_message" => Ok(Self::UserMessage),
            "receipt" => Ok(Self::Receipt),
            "error" => Ok(Self::Error),
            "pull_request" => Ok(Self::PullRequest),
            _ => Err(format!("Invalid message kind: {s}")),
        }
    }
}

/// Inbound message unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMessage {
    pub ebms_message_id: String,
    pub ref_to_ebms_message_id: Option<String>,
    pub kind: MessageKind,
    pub pmode_id: Option<String>,
    pub content_type: String,
    pub content: Vec<u8>,
    pub operation: Operation,
    pub status: MessageStatus,
    pub inserted_at: DateTime<Utc>,
}

/// Outbound message unit together with the serialized message to (re)send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutMessage {
    pub ebms_message_id: String,
    pub ref_to_ebms_message_id: Option<String>,
    pub kind: MessageKind,
    pub pmode_id: Option<String>,
    pub url: Option<String>,
    pub content_type: String,
    pub content: Vec<u8>,
    pub operation: Operation,
    pub status: MessageStatus,
    pub inserted_at: DateTime<Utc>,
}

/// Failure while handling an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InException {
    pub ebms_ref_to_message_id: Option<String>,
    pub pmode_id: Option<String>,
    pub exception: String,
    pub message_body: Option<Vec<u8>>,
    pub operation: Operation,
    pub inserted_at: DateTime<Utc>,
}

/// Failure while handling an outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutException {
    pub ebms_ref_to_message_id: Option<String>,
    pub pmode_id: Option<String>,
    pub exception: String,
    pub message_body: Option<Vec<u8>>,
    pub operation: Operation,
    pub inserted_at: DateTime<Utc>,
}

/// Selector for bulk out-message updates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutMessageFilter {
    pub ebms_message_ids: Option<Vec<String>>,
    pub operation: Option<Operation>,
}

impl OutMessageFilter {
    pub fn by_id(ebms_message_id: impl Into<String>) -> Self {
        Self {
            ebms_message_ids: Some(vec![ebms_message_id.into()]),
            operation: None,
        }
    }

    pub fn by_operation(operation: Operation) -> Self {
        Self {
            ebms_message_ids: None,
            operation: Some(operation),
        }
    }

    pub fn matches(&self, message: &OutMessage) -> bool {
        let id_matches = self
            .ebms_message_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| *id == message.ebms_message_id));
        let operation_matches = self.operation.map_or(true, |op| op == message.operation);
        id_matches && operation_matches
    }
}

/// Column changes applied to stored messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageUpdate {
    pub operation: Option<Operation>,
    pub status: Option<MessageStatus>,
}

impl MessageUpdate {
    pub fn new(operation: Operation, status: MessageStatus) -> Self {
        Self {
            operation: Some(operation),
            status: Some(status),
        }
    }

    pub fn operation(operation: Operation) -> Self {
        Self {
            operation: Some(operation),
            status: None,
        }
    }

    pub fn status(status: MessageStatus) -> Self {
        Self {
            operation: None,
            status: Some(status),
        }
    }

    pub fn apply_to_out(&self, message: &mut OutMessage) {
        if let Some(operation) = self.operation {
            message.operation = operation;
        }
        if let Some(status) = self.status {
            message.status = status;
        }
    }

    pub fn apply_to_in(&self, message: &mut InMessage) {
        if let Some(operation) = self.operation {
            message.operation = operation;
        }
        if let Some(status) = self.status {
            message.status = status;
        }
    }
}

/// Lease marker preventing two pollers from working the same record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    #[default]
    Pending,
    Busy,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Busy => "busy",
        }
    }
}

impl std::str::FromStr for LeaseStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "busy" => Ok(Self::Busy),
            _ => Err(format!("Invalid lease status: {s}")),
        }
    }
}

/// Reliable delivery bookkeeping for one outbound message.
///
/// Records are never deleted; terminal records are marked completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceptionAwareness {
    pub internal_message_id: String,
    pub ref_to_ebms_message_id: String,
    pub current_retry_count: u32,
    pub total_retry_count: u32,
    pub retry_interval: String,
    pub last_send_time: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub state: ReliabilityState,
    pub lease: LeaseStatus,
    /// When the current Busy lease was taken
    #[serde(default)]
    pub leased_at: Option<DateTime<Utc>>,
}

impl ReceptionAwareness {
    /// Record for a message that was just handed to the transport
    pub fn new(
        internal_message_id: impl Into<String>,
        ref_to_ebms_message_id: impl Into<String>,
        total_retry_count: u32,
        retry_interval: impl Into<String>,
        last_send_time: DateTime<Utc>,
    ) -> Self {
        Self {
            internal_message_id: internal_message_id.into(),
            ref_to_ebms_message_id: ref_to_ebms_message_id.into(),
            current_retry_count: 0,
            total_retry_count,
            retry_interval: retry_interval.into(),
            last_send_time: Some(last_send_time),
            is_completed: false,
            state: ReliabilityState::Received,
            lease: LeaseStatus::Pending,
            leased_at: None,
        }
    }

    pub fn retry_interval(&self) -> Result<Duration> {
        parse_retry_interval(&self.retry_interval)
    }

    /// Earliest moment the next attempt may be made
    pub fn next_attempt_at(&self) -> Result<Option<DateTime<Utc>>> {
        let interval = self.retry_interval()?;
        Ok(self.last_send_time.map(|sent| sent + interval))
    }

    /// Eligible for another attempt at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> Result<bool> {
        if self.is_completed {
            return Ok(false);
        }
        Ok(self.next_attempt_at()?.map_or(true, |at| at <= now))
    }

    pub fn retries_exhausted(&self) -> bool {
        self.current_retry_count >= self.total_retry_count
    }

    /// A Busy lease older than `timeout`. Its holder is presumed dead; a
    /// Busy lease without a timestamp counts as expired.
    pub fn lease_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.lease == LeaseStatus::Busy && self.leased_at.map_or(true, |at| at + timeout <= now)
    }

    /// Free to be leased at `now`: pending, or busy past `timeout`
    pub fn is_leasable(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        !self.is_completed
            && (self.lease == LeaseStatus::Pending || self.lease_expired(now, timeout))
    }

    pub fn take_lease(&mut self, now: DateTime<Utc>) {
        self.lease = LeaseStatus::Busy;
        self.leased_at = Some(now);
    }

    pub fn release_lease(&mut self) {
        self.lease = LeaseStatus::Pending;
        self.leased_at = None;
    }
}

/// Parse a retry interval: `hh:mm:ss`, `d.hh:mm:ss` or a plain number of seconds
pub fn parse_retry_interval(value: &str) -> Result<Duration> {
    let invalid = || As4Error::InvalidRetryInterval(value.to_string());
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        return if seconds >= 0 {
            Ok(Duration::seconds(seconds))
        } else {
            Err(invalid())
        };
    }

    let (days, clock) = match trimmed.split_once('.') {
        Some((days, rest)) if rest.contains(':') => {
            (days.parse::<i64>().map_err(|_| invalid())?, rest)
        }
        _ => (0, trimmed),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }
    let hours = parts[0].parse::<i64>().map_err(|_| invalid())?;
    let minutes = parts[1].parse::<i64>().map_err(|_| invalid())?;
    let seconds = parts[2].parse::<f64>().map_err(|_| invalid())?;

    if days < 0 || !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    if !(0.0..60.0).contains(&seconds) {
        return Err(invalid());
    }

    let millis = (seconds * 1000.0).round() as i64;
    Ok(Duration::days(days)
        + Duration::hours(hours)
        + Duration::minutes(minutes)
        + Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_interval_formats() {
        assert_eq!(parse_retry_interval("00:00:30").unwrap(), Duration::seconds(30));
        assert_eq!(parse_retry_interval("01:02:03").unwrap(), Duration::seconds(3723));
        assert_eq!(
            parse_retry_interval("1.00:00:00").unwrap(),
            Duration::days(1)
        );
        assert_eq!(parse_retry_interval("45").unwrap(), Duration::seconds(45));
        assert_eq!(
            parse_retry_interval("00:00:01.5").unwrap(),
            Duration::milliseconds(1500)
        );
    }

    #[test]
    fn test_parse_retry_interval_rejects_garbage() {
        for value in ["", "abc", "00:61:00", "25:00:00", "-5", "1:2"] {
            assert!(
                parse_retry_interval(value).is_err(),
                "'{value}' should be rejected"
            );
        }
    }

    #[test]
    fn test_reception_awareness_due_calculation() {
        let sent = Utc::now() - Duration::seconds(90);
        let record = ReceptionAwareness::new("internal-1", "out-1", 3, "00:01:00", sent);

        assert!(record.is_due(Utc::now()).unwrap());
        assert!(!record.is_due(sent + Duration::seconds(30)).unwrap());
        assert!(!record.retries_exhausted());

        let completed = ReceptionAwareness {
            is_completed: true,
            ..record
        };
        assert!(!completed.is_due(Utc::now()).unwrap());
    }

    #[test]
    fn test_busy_lease_expires_after_timeout() {
        let now = Utc::now();
        let timeout = Duration::minutes(10);
        let mut record = ReceptionAwareness::new("internal-1", "out-1", 3, "0", now);
        assert!(record.is_leasable(now, timeout));

        record.take_lease(now);
        assert!(!record.is_leasable(now + Duration::minutes(9), timeout));
        assert!(record.lease_expired(now + Duration::minutes(10), timeout));
        assert!(record.is_leasable(now + Duration::minutes(11), timeout));

        record.leased_at = None;
        assert!(record.lease_expired(now, timeout));

        record.release_lease();
        assert_eq!(record.lease, LeaseStatus::Pending);
        assert!(!record.lease_expired(now + Duration::days(1), timeout));
    }

    #[test]
    fn test_out_message_filter() {
        let message = OutMessage {
            ebms_message_id: "out-1".to_string(),
            ref_to_ebms_message_id: None,
            kind: MessageKind::UserMessage,
            pmode_id: None,
            url: None,
            content_type: "application/json".to_string(),
            content: vec![],
            operation: Operation::ToBeSent,
            status: MessageStatus::Created,
            inserted_at: Utc::now(),
        };

        assert!(OutMessageFilter::by_id("out-1").matches(&message));
        assert!(!OutMessageFilter::by_id("out-2").matches(&message));
        assert!(OutMessageFilter::by_operation(Operation::ToBeSent).matches(&message));
        assert!(!OutMessageFilter::by_operation(Operation::Sent).matches(&message));
        assert_eq!(Operation::ToBeSent.in_progress(), Some(Operation::Sending));
        assert_eq!("dead_lettered".parse::<Operation>(), Ok(Operation::DeadLettered));
    }
}
