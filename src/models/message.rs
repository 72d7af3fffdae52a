//! # AS4 Message Model
//!
//! Canonical in-memory representation of an AS4 message: the ebMS message
//! units (user messages and signal messages), the MIME attachments and the
//! state of the WS-Security header.
//!
//! The XML envelope itself is an external concern; an [`As4Codec`]
//! implementation turns wire bytes into this model and back.
//!
//! [`As4Codec`]: crate::transformers::As4Codec

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a party, optionally qualified by a type URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyId {
    pub id: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub party_type: Option<String>,
}

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            party_type: None,
        }
    }

    pub fn with_type(id: impl Into<String>, party_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            party_type: Some(party_type.into()),
        }
    }
}

/// Sending or receiving party of a user message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub party_ids: Vec<PartyId>,
}

impl Party {
    pub fn new(role: impl Into<String>, party_ids: Vec<PartyId>) -> Self {
        Self {
            role: role.into(),
            party_ids,
        }
    }

    /// A party without role and without identifiers carries no information
    pub fn is_empty(&self) -> bool {
        self.role.trim().is_empty() && self.party_ids.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub value: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

impl Service {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            service_type: None,
        }
    }
}

/// Agreement under which a message is exchanged.
///
/// Two references are equal when value, type and PMode id all match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementReference {
    pub value: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub agreement_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmode_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement_reference: Option<AgreementReference>,
    #[serde(default)]
    pub service: Service,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub conversation_id: String,
}

/// Reference from the user message header to a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperty {
    pub name: String,
    pub value: String,
}

/// Business message unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_to_message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_mpc")]
    pub mpc: String,
    #[serde(default)]
    pub sender: Party,
    #[serde(default)]
    pub receiver: Party,
    #[serde(default)]
    pub collaboration_info: CollaborationInfo,
    #[serde(default)]
    pub payload_info: Vec<PartInfo>,
    #[serde(default)]
    pub message_properties: Vec<MessageProperty>,
}

/// Default message partition channel defined by ebMS3
pub const DEFAULT_MPC: &str =
    "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/defaultMPC";

fn default_mpc() -> String {
    DEFAULT_MPC.to_string()
}

impl UserMessage {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            ref_to_message_id: None,
            timestamp: Utc::now(),
            mpc: default_mpc(),
            sender: Party::default(),
            receiver: Party::default(),
            collaboration_info: CollaborationInfo::default(),
            payload_info: Vec::new(),
            message_properties: Vec::new(),
        }
    }
}

/// ebMS error codes used by the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "EBMS:0001")]
    ValueNotRecognized,
    #[serde(rename = "EBMS:0003")]
    ValueInconsistent,
    #[serde(rename = "EBMS:0004")]
    Other,
    #[serde(rename = "EBMS:0006")]
    EmptyMessagePartitionChannel,
    #[serde(rename = "EBMS:0010")]
    ProcessingModeMismatch,
    #[serde(rename = "EBMS:0101")]
    FailedAuthentication,
    #[serde(rename = "EBMS:0102")]
    FailedDecryption,
    #[serde(rename = "EBMS:0202")]
    DeliveryFailure,
    #[serde(rename = "EBMS:0301")]
    MissingReceipt,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValueNotRecognized => "EBMS:0001",
            Self::ValueInconsistent => "EBMS:0003",
            Self::Other => "EBMS:0004",
            Self::EmptyMessagePartitionChannel => "EBMS:0006",
            Self::ProcessingModeMismatch => "EBMS:0010",
            Self::FailedAuthentication => "EBMS:0101",
            Self::FailedDecryption => "EBMS:0102",
            Self::DeliveryFailure => "EBMS:0202",
            Self::MissingReceipt => "EBMS:0301",
        }
    }

    pub fn short_description(&self) -> &'static str {
        match self {
            Self::ValueNotRecognized => "ValueNotRecognized",
            Self::ValueInconsistent => "ValueInconsistent",
            Self::Other => "Other",
            Self::EmptyMessagePartitionChannel => "EmptyMessagePartitionChannel",
            Self::ProcessingModeMismatch => "ProcessingModeMismatch",
            Self::FailedAuthentication => "FailedAuthentication",
            Self::FailedDecryption => "FailedDecryption",
            Self::DeliveryFailure => "DeliveryFailure",
            Self::MissingReceipt => "MissingReceipt",
        }
    }

    /// EBMS:0006 is reported with severity warning, everything else is a failure
    pub fn severity(&self) -> Severity {
        match self {
            Self::EmptyMessagePartitionChannel => Severity::Warning,
            _ => Severity::Failure,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.short_description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub severity: Severity,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: String,
    pub ref_to_message_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSignal {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_to_message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub errors: Vec<ErrorDetail>,
}

impl ErrorSignal {
    /// An error signal consisting only of an EBMS:0006 warning
    pub fn is_empty_mpc_warning(&self) -> bool {
        !self.errors.is_empty()
            && self
                .errors
                .iter()
                .all(|e| e.code == ErrorCode::EmptyMessagePartitionChannel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub mpc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalMessage {
    Receipt(Receipt),
    Error(ErrorSignal),
    PullRequest(PullRequest),
}

impl SignalMessage {
    pub fn message_id(&self) -> &str {
        match self {
            Self::Receipt(r) => &r.message_id,
            Self::Error(e) => &e.message_id,
            Self::PullRequest(p) => &p.message_id,
        }
    }

    pub fn ref_to_message_id(&self) -> Option<&str> {
        match self {
            Self::Receipt(r) => Some(&r.ref_to_message_id),
            Self::Error(e) => e.ref_to_message_id.as_deref(),
            Self::PullRequest(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum MessageUnit {
    User(UserMessage),
    Signal(SignalMessage),
}

impl MessageUnit {
    pub fn message_id(&self) -> &str {
        match self {
            Self::User(u) => &u.message_id,
            Self::Signal(s) => s.message_id(),
        }
    }

    pub fn ref_to_message_id(&self) -> Option<&str> {
        match self {
            Self::User(u) => u.ref_to_message_id.as_deref(),
            Self::Signal(s) => s.ref_to_message_id(),
        }
    }
}

/// MIME part carried next to the SOAP envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub content_type: String,
    #[serde(with = "crate::utils::serde::base64_bytes")]
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(id: impl Into<String>, content_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            content_type: content_type.into(),
            content,
        }
    }

    /// `cid:` reference used by signature references and part infos
    pub fn cid(&self) -> String {
        format!("cid:{}", self.id)
    }
}

/// Digest reference inside a signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureReference {
    pub uri: String,
    pub digest_algorithm: String,
    pub digest_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub algorithm: String,
    pub references: Vec<SignatureReference>,
    pub signature_value: String,
}

/// Processing state of the WS-Security header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    #[serde(default)]
    pub is_encrypted: bool,
}

impl SecurityHeader {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// Canonical AS4 message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct As4Message {
    #[serde(default)]
    pub message_units: Vec<MessageUnit>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub security_header: SecurityHeader,
}

impl As4Message {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn for_user_message(user_message: UserMessage) -> Self {
        Self {
            message_units: vec![MessageUnit::User(user_message)],
            ..Self::default()
        }
    }

    pub fn for_signal(signal: SignalMessage) -> Self {
        Self {
            message_units: vec![MessageUnit::Signal(signal)],
            ..Self::default()
        }
    }

    pub fn primary_message_unit(&self) -> Option<&MessageUnit> {
        self.message_units.first()
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &UserMessage> {
        self.message_units.iter().filter_map(|unit| match unit {
            MessageUnit::User(u) => Some(u),
            MessageUnit::Signal(_) => None,
        })
    }

    pub fn signal_messages(&self) -> impl Iterator<Item = &SignalMessage> {
        self.message_units.iter().filter_map(|unit| match unit {
            MessageUnit::Signal(s) => Some(s),
            MessageUnit::User(_) => None,
        })
    }

    pub fn primary_user_message(&self) -> Option<&UserMessage> {
        self.user_messages().next()
    }

    pub fn primary_signal_message(&self) -> Option<&SignalMessage> {
        self.signal_messages().next()
    }

    pub fn primary_message_id(&self) -> Option<&str> {
        self.primary_message_unit().map(MessageUnit::message_id)
    }

    pub fn primary_ref_to_message_id(&self) -> Option<&str> {
        self.primary_message_unit()
            .and_then(MessageUnit::ref_to_message_id)
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.message_units
            .iter()
            .map(|u| u.message_id().to_string())
            .collect()
    }

    pub fn is_user_message(&self) -> bool {
        matches!(self.primary_message_unit(), Some(MessageUnit::User(_)))
    }

    pub fn is_signal_message(&self) -> bool {
        matches!(self.primary_message_unit(), Some(MessageUnit::Signal(_)))
    }

    pub fn is_pull_request(&self) -> bool {
        matches!(
            self.primary_message_unit(),
            Some(MessageUnit::Signal(SignalMessage::PullRequest(_)))
        )
    }

    pub fn is_signed(&self) -> bool {
        self.security_header.is_signed()
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_identity_follows_first_unit() {
        let mut user = UserMessage::new("user-1");
        user.ref_to_message_id = Some("earlier-1".to_string());
        let mut message = As4Message::for_user_message(user);
        message
            .message_units
            .push(MessageUnit::Signal(SignalMessage::Receipt(Receipt {
                message_id: "receipt-1".to_string(),
                ref_to_message_id: "user-0".to_string(),
                timestamp: Utc::now(),
            })));

        assert_eq!(message.primary_message_id(), Some("user-1"));
        assert_eq!(message.primary_ref_to_message_id(), Some("earlier-1"));
        assert_eq!(message.message_ids(), vec!["user-1", "receipt-1"]);
        assert!(message.is_user_message());
        assert_eq!(message.signal_messages().count(), 1);
    }

    #[test]
    fn test_empty_mpc_warning_detection() {
        let warning = ErrorSignal {
            message_id: "err-1".to_string(),
            ref_to_message_id: None,
            timestamp: Utc::now(),
            errors: vec![ErrorDetail {
                code: ErrorCode::EmptyMessagePartitionChannel,
                severity: ErrorCode::EmptyMessagePartitionChannel.severity(),
                detail: String::new(),
            }],
        };
        assert!(warning.is_empty_mpc_warning());
        assert_eq!(warning.errors[0].severity, Severity::Warning);

        let failure = ErrorSignal {
            errors: vec![],
            ..warning
        };
        assert!(!failure.is_empty_mpc_warning());
    }

    #[test]
    fn test_error_code_serde_uses_ebms_codes() {
        let json = serde_json::to_string(&ErrorCode::ProcessingModeMismatch).unwrap();
        assert_eq!(json, "\"EBMS:0010\"");
        assert_eq!(ErrorCode::ProcessingModeMismatch.code(), "EBMS:0010");
    }

    #[test]
    fn test_empty_party_detection() {
        assert!(Party::default().is_empty());
        assert!(!Party::new("", vec![PartyId::new("org:holodeck")]).is_empty());
        assert!(!Party::new("Sender", vec![]).is_empty());
    }
}
