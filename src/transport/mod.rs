//! # Transport Boundary
//!
//! HTTP plumbing is an external collaborator. The core hands an
//! [`OutboundMessage`] to a [`MessageSender`] and only looks at the
//! classified [`SendResult`] and, for two-way exchanges, the response body.

use crate::models::{OutMessage, ReceivedMessage};
use crate::state_machine::SendResult;
use async_trait::async_trait;

/// Serialized message ready to be pushed to a remote MSH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub ebms_message_id: String,
    pub url: Option<String>,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl From<&OutMessage> for OutboundMessage {
    fn from(message: &OutMessage) -> Self {
        Self {
            ebms_message_id: message.ebms_message_id.clone(),
            url: message.url.clone(),
            content_type: message.content_type.clone(),
            content: message.content.clone(),
        }
    }
}

/// Classified result plus the synchronous response, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub result: SendResult,
    pub response: Option<ReceivedMessage>,
}

impl SendOutcome {
    pub fn new(result: SendResult) -> Self {
        Self {
            result,
            response: None,
        }
    }

    pub fn with_response(mut self, response: ReceivedMessage) -> Self {
        self.response = Some(response);
        self
    }
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Push the message and hand back whatever the remote MSH answered.
    ///
    /// Transport failures are classified into the result, never returned as errors.
    async fn send_and_receive(&self, message: &OutboundMessage) -> SendOutcome;

    async fn send(&self, message: &OutboundMessage) -> SendResult {
        self.send_and_receive(message).await.result
    }
}
