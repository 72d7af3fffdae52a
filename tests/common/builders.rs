//! Test data builders for messages, PModes and stored records

use as4_core::models::{
    AgreementReference, As4Message, CollaborationInfo, MessageKind, MessageOrigin,
    MessagePackaging, MessageStatus, Operation, OutMessage, Party, PartyId, PartyInfo,
    ReceivedMessage, ReceivingPMode, SendingPMode, Service, UserMessage,
};
use as4_core::transformers::{As4Codec, JsonAs4Codec};
use chrono::Utc;

pub const SENDER_ROLE: &str = "Sender";
pub const RECEIVER_ROLE: &str = "Receiver";

/// Builder for user messages with the collaboration fields matching looks at
pub struct UserMessageBuilder {
    message: UserMessage,
}

impl UserMessageBuilder {
    pub fn new(message_id: &str) -> Self {
        Self {
            message: UserMessage::new(message_id),
        }
    }

    pub fn from_party(mut self, role: &str, ids: &[&str]) -> Self {
        self.message.sender = party(role, ids);
        self
    }

    pub fn to_party(mut self, role: &str, ids: &[&str]) -> Self {
        self.message.receiver = party(role, ids);
        self
    }

    pub fn service_action(mut self, service: &str, action: &str) -> Self {
        self.message.collaboration_info.service = Service::new(service);
        self.message.collaboration_info.action = action.to_string();
        self
    }

    pub fn agreement(mut self, value: &str) -> Self {
        self.message.collaboration_info.agreement_reference = Some(AgreementReference {
            value: value.to_string(),
            agreement_type: None,
            pmode_id: None,
        });
        self
    }

    pub fn build(self) -> UserMessage {
        self.message
    }

    pub fn into_message(self) -> As4Message {
        As4Message::for_user_message(self.message)
    }
}

/// Builder for receiving PModes
pub struct ReceivingPModeBuilder {
    pmode: ReceivingPMode,
}

impl ReceivingPModeBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            pmode: ReceivingPMode::new(id),
        }
    }

    pub fn parties(mut self, from: (&str, &[&str]), to: (&str, &[&str])) -> Self {
        self.pmode.message_packaging.party_info =
            Some(PartyInfo::new(party(from.0, from.1), party(to.0, to.1)));
        self
    }

    pub fn service_action(mut self, service: &str, action: &str) -> Self {
        let collaboration = self.collaboration();
        collaboration.service = Service::new(service);
        collaboration.action = action.to_string();
        self
    }

    pub fn agreement(mut self, value: &str) -> Self {
        self.collaboration().agreement_reference = Some(AgreementReference {
            value: value.to_string(),
            agreement_type: None,
            pmode_id: None,
        });
        self
    }

    pub fn send_receipt(mut self, send_receipt: bool) -> Self {
        self.pmode.reply_handling.send_receipt = send_receipt;
        self
    }

    pub fn deliver(mut self) -> Self {
        self.pmode.delivery.is_enabled = true;
        self
    }

    pub fn build(self) -> ReceivingPMode {
        self.pmode
    }

    fn collaboration(&mut self) -> &mut CollaborationInfo {
        self.pmode
            .message_packaging
            .collaboration_info
            .get_or_insert_with(CollaborationInfo::default)
    }
}

pub fn party(role: &str, ids: &[&str]) -> Party {
    Party::new(role, ids.iter().map(|id| PartyId::new(*id)).collect())
}

/// PMode that matches [`invoice_message`] on every criterion
pub fn invoice_receiving_pmode(id: &str) -> ReceivingPMode {
    ReceivingPModeBuilder::new(id)
        .parties(
            (SENDER_ROLE, &["org:partner"]),
            (RECEIVER_ROLE, &["org:holodeck"]),
        )
        .service_action("urn:services:invoicing", "StoreInvoice")
        .agreement("urn:agreements:invoicing")
        .build()
}

pub fn invoice_message(message_id: &str) -> UserMessage {
    UserMessageBuilder::new(message_id)
        .from_party(SENDER_ROLE, &["org:partner"])
        .to_party(RECEIVER_ROLE, &["org:holodeck"])
        .service_action("urn:services:invoicing", "StoreInvoice")
        .agreement("urn:agreements:invoicing")
        .build()
}

pub fn sending_pmode(id: &str, url: &str) -> SendingPMode {
    let mut pmode = SendingPMode::new(id);
    pmode.push_configuration = Some(as4_core::models::PushConfiguration {
        url: url.to_string(),
    });
    pmode.message_packaging = MessagePackaging::default();
    pmode
}

/// Message as a remote MSH would push it to us
pub fn pushed(message: &As4Message) -> ReceivedMessage {
    ReceivedMessage::new(
        JsonAs4Codec.encode(message).expect("encodable message"),
        JsonAs4Codec.content_type(),
    )
    .with_origin(MessageOrigin::Transport {
        remote_address: Some("10.0.0.7".to_string()),
    })
}

/// Stored user message queued for sending
pub fn queued_out_message(message_id: &str, pmode_id: &str) -> OutMessage {
    let message = As4Message::for_user_message(invoice_message(message_id));
    OutMessage {
        ebms_message_id: message_id.to_string(),
        ref_to_ebms_message_id: None,
        kind: MessageKind::UserMessage,
        pmode_id: Some(pmode_id.to_string()),
        url: Some("https://partner.example.com/msh".to_string()),
        content_type: JsonAs4Codec.content_type().to_string(),
        content: JsonAs4Codec.encode(&message).expect("encodable message"),
        operation: Operation::ToBeSent,
        status: MessageStatus::Created,
        inserted_at: Utc::now(),
    }
}
