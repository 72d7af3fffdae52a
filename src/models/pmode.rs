//! # Processing Modes
//!
//! Sending and receiving PMode configuration entities. PModes are read-only
//! during processing; a [`PModeStore`](crate::pmode::PModeStore) owns them.

use crate::models::message::{CollaborationInfo, Party};
use serde::{Deserialize, Serialize};

/// Parties declared by a PMode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_party: Option<Party>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_party: Option<Party>,
}

impl PartyInfo {
    pub fn new(from_party: Party, to_party: Party) -> Self {
        Self {
            from_party: Some(from_party),
            to_party: Some(to_party),
        }
    }

    /// Neither side declares a role or a party id
    pub fn is_empty(&self) -> bool {
        let from_empty = self.from_party.as_ref().map_or(true, Party::is_empty);
        let to_empty = self.to_party.as_ref().map_or(true, Party::is_empty);
        from_empty && to_empty
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePackaging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_info: Option<PartyInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaboration_info: Option<CollaborationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyHandling {
    /// Answer received user messages with a receipt
    pub send_receipt: bool,
}

impl Default for ReplyHandling {
    fn default() -> Self {
        Self { send_receipt: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveSecurity {
    /// Reject unsigned messages and verify attachment digests
    pub verify_signature: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    pub is_enabled: bool,
}

/// Inbound acceptance policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivingPMode {
    pub id: String,
    #[serde(default)]
    pub message_packaging: MessagePackaging,
    #[serde(default)]
    pub reply_handling: ReplyHandling,
    #[serde(default)]
    pub security: ReceiveSecurity,
    #[serde(default)]
    pub delivery: Delivery,
}

impl ReceivingPMode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message_packaging: MessagePackaging::default(),
            reply_handling: ReplyHandling::default(),
            security: ReceiveSecurity::default(),
            delivery: Delivery::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushConfiguration {
    pub url: String,
}

/// Reliability settings of a sending PMode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceptionAwarenessSettings {
    pub is_enabled: bool,
    pub retry_count: u32,
    /// Duration string, `hh:mm:ss` or `d.hh:mm:ss`
    pub retry_interval: String,
}

impl Default for ReceptionAwarenessSettings {
    fn default() -> Self {
        Self {
            is_enabled: false,
            retry_count: 5,
            retry_interval: "00:01:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSettings {
    pub is_enabled: bool,
    pub algorithm: String,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            is_enabled: false,
            algorithm: "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256".to_string(),
        }
    }
}

/// Outbound packaging and routing policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendingPMode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_configuration: Option<PushConfiguration>,
    #[serde(default)]
    pub reception_awareness: ReceptionAwarenessSettings,
    #[serde(default)]
    pub signing: SigningSettings,
    #[serde(default)]
    pub message_packaging: MessagePackaging,
}

impl SendingPMode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            push_configuration: None,
            reception_awareness: ReceptionAwarenessSettings::default(),
            signing: SigningSettings::default(),
            message_packaging: MessagePackaging::default(),
        }
    }
}
