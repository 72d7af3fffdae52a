//! # Messaging Context
//!
//! Mutable carrier for one message's processing lifecycle. A transformer
//! creates it from a [`ReceivedMessage`], each pipeline step receives it by
//! value and hands back the (possibly changed) context inside its
//! [`StepResult`](crate::pipeline::StepResult).

use crate::error::As4Error;
use crate::models::message::{As4Message, ErrorCode};
use crate::models::pmode::{ReceivingPMode, SendingPMode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing direction of the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Receive,
    Send,
    Submit,
    Deliver,
    Notify,
    Forward,
    PullReceive,
    #[default]
    Unknown,
}

impl ProcessingMode {
    /// Inbound modes persist failures as in-exceptions, the rest as out-exceptions
    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::Receive | Self::PullReceive | Self::Deliver)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Receive => "receive",
            Self::Send => "send",
            Self::Submit => "submit",
            Self::Deliver => "deliver",
            Self::Notify => "notify",
            Self::Forward => "forward",
            Self::PullReceive => "pull_receive",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Where a received message came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Pushed to us over the transport
    Transport { remote_address: Option<String> },
    /// Picked up from the message store
    Datastore {
        ebms_message_id: String,
        pmode_id: Option<String>,
    },
    /// Pull request to be issued on an MPC
    Pull {
        mpc: String,
        pmode_id: Option<String>,
    },
}

/// Raw bytes plus content type, as handed over by a receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub content: Vec<u8>,
    pub content_type: String,
    pub origin: MessageOrigin,
}

impl ReceivedMessage {
    pub fn new(content: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            content,
            content_type: content_type.into(),
            origin: MessageOrigin::Transport {
                remote_address: None,
            },
        }
    }

    pub fn with_origin(mut self, origin: MessageOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// ebMS-level failure recorded by a step before the error pipeline runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub code: ErrorCode,
    pub description: String,
}

impl ErrorResult {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessagingContext {
    as4_message: Option<As4Message>,
    received_message: Option<ReceivedMessage>,
    pub sending_pmode: Option<SendingPMode>,
    pub receiving_pmode: Option<ReceivingPMode>,
    pub mode: ProcessingMode,
    pub error_result: Option<ErrorResult>,
    /// Exception captured by the exception handling chain
    pub exception: Option<As4Error>,
}

impl MessagingContext {
    /// Context for a deserialized message
    pub fn from_message(message: As4Message, mode: ProcessingMode) -> Self {
        Self::build(Some(message), None, mode)
    }

    /// Context for a raw message that has not (or could not) be deserialized
    pub fn from_received(received: ReceivedMessage, mode: ProcessingMode) -> Self {
        Self::build(None, Some(received), mode)
    }

    /// Context carrying both the raw and the deserialized representation
    pub fn from_parts(message: As4Message, received: ReceivedMessage, mode: ProcessingMode) -> Self {
        Self::build(Some(message), Some(received), mode)
    }

    /// Context describing a failure for which neither the raw nor the parsed
    /// message is available anymore
    pub fn from_exception(error: As4Error, mode: ProcessingMode) -> Self {
        let mut context = Self::build(None, None, mode);
        context.exception = Some(error);
        context
    }

    fn build(
        as4_message: Option<As4Message>,
        received_message: Option<ReceivedMessage>,
        mode: ProcessingMode,
    ) -> Self {
        Self {
            as4_message,
            received_message,
            sending_pmode: None,
            receiving_pmode: None,
            mode,
            error_result: None,
            exception: None,
        }
    }

    pub fn as4_message(&self) -> Option<&As4Message> {
        self.as4_message.as_ref()
    }

    pub fn as4_message_mut(&mut self) -> Option<&mut As4Message> {
        self.as4_message.as_mut()
    }

    pub fn received_message(&self) -> Option<&ReceivedMessage> {
        self.received_message.as_ref()
    }

    /// Replace the message this context represents (user message -> receipt)
    pub fn replace_message(&mut self, message: As4Message) {
        self.as4_message = Some(message);
    }

    pub fn with_sending_pmode(mut self, pmode: SendingPMode) -> Self {
        self.sending_pmode = Some(pmode);
        self
    }

    pub fn with_receiving_pmode(mut self, pmode: ReceivingPMode) -> Self {
        self.receiving_pmode = Some(pmode);
        self
    }

    pub fn with_exception(mut self, error: As4Error) -> Self {
        self.exception = Some(error);
        self
    }

    pub fn with_error_result(mut self, error: ErrorResult) -> Self {
        self.error_result = Some(error);
        self
    }

    /// ebMS id of the message currently represented by the context
    pub fn ebms_message_id(&self) -> Option<&str> {
        self.as4_message
            .as_ref()
            .and_then(As4Message::primary_message_id)
    }

    /// Sending PMode id carried by the origin of an outbound message
    pub fn origin_pmode_id(&self) -> Option<&str> {
        match self.received_message.as_ref().map(|r| &r.origin) {
            Some(MessageOrigin::Datastore { pmode_id, .. })
            | Some(MessageOrigin::Pull { pmode_id, .. }) => pmode_id.as_deref(),
            _ => None,
        }
    }

    /// Message id known from the transport origin when the body is not parsed
    pub fn origin_message_id(&self) -> Option<&str> {
        match self.received_message.as_ref().map(|r| &r.origin) {
            Some(MessageOrigin::Datastore {
                ebms_message_id, ..
            }) => Some(ebms_message_id.as_str()),
            _ => None,
        }
    }

    /// Best effort identity for logging and exception records
    pub fn best_message_id(&self) -> Option<&str> {
        self.ebms_message_id().or_else(|| self.origin_message_id())
    }
}
