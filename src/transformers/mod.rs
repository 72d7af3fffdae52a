//! # Transformers
//!
//! Input boundary of an agent: turn a [`ReceivedMessage`] into a
//! [`MessagingContext`]. The wire format is delegated to an [`As4Codec`];
//! the crate ships a JSON codec, an XML/SOAP codec is an external concern.

use crate::error::{As4Error, Result};
use crate::models::{As4Message, MessageOrigin, MessagingContext, ProcessingMode, ReceivedMessage};
use crate::pmode::PModeStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Opaque (de)serializer between wire bytes and the canonical message model
pub trait As4Codec: Send + Sync {
    fn content_type(&self) -> &str;

    fn decode(&self, content: &[u8], content_type: &str) -> Result<As4Message>;

    fn encode(&self, message: &As4Message) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAs4Codec;

impl As4Codec for JsonAs4Codec {
    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn decode(&self, content: &[u8], content_type: &str) -> Result<As4Message> {
        let media_type = content_type.split(';').next().unwrap_or_default().trim();
        if !media_type.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
            return Err(As4Error::Transformation(format!(
                "unsupported content type '{content_type}'"
            )));
        }
        serde_json::from_slice(content)
            .map_err(|e| As4Error::Transformation(format!("malformed AS4 message: {e}")))
    }

    fn encode(&self, message: &As4Message) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }
}

#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, received: ReceivedMessage) -> Result<MessagingContext>;
}

/// Transformer for messages pushed to us by a remote MSH
pub struct ReceiveMessageTransformer {
    codec: Arc<dyn As4Codec>,
}

impl ReceiveMessageTransformer {
    pub fn new(codec: Arc<dyn As4Codec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl Transformer for ReceiveMessageTransformer {
    async fn transform(&self, received: ReceivedMessage) -> Result<MessagingContext> {
        if received.content.is_empty() {
            return Err(As4Error::Transformation(
                "received message has no content".to_string(),
            ));
        }

        let message = self.codec.decode(&received.content, &received.content_type)?;
        if message.message_units.is_empty() {
            return Err(As4Error::Transformation(
                "received message carries no message units".to_string(),
            ));
        }

        debug!(
            message_id = message.primary_message_id(),
            units = message.message_units.len(),
            "Transformed received message"
        );
        Ok(MessagingContext::from_parts(
            message,
            received,
            ProcessingMode::Receive,
        ))
    }
}

/// Transformer for messages we send: stored out messages and pull requests.
///
/// Resolves the sending PMode named by the origin of the message.
pub struct OutboundMessageTransformer {
    codec: Arc<dyn As4Codec>,
    pmode_store: Arc<dyn PModeStore>,
}

impl OutboundMessageTransformer {
    pub fn new(codec: Arc<dyn As4Codec>, pmode_store: Arc<dyn PModeStore>) -> Self {
        Self { codec, pmode_store }
    }
}

#[async_trait]
impl Transformer for OutboundMessageTransformer {
    async fn transform(&self, received: ReceivedMessage) -> Result<MessagingContext> {
        let pmode_id = match &received.origin {
            MessageOrigin::Datastore { pmode_id, .. } | MessageOrigin::Pull { pmode_id, .. } => {
                pmode_id.clone()
            }
            MessageOrigin::Transport { .. } => {
                return Err(As4Error::Transformation(
                    "outbound transformer only accepts stored messages and pull requests"
                        .to_string(),
                ))
            }
        };

        let message = self.codec.decode(&received.content, &received.content_type)?;
        let mut context = MessagingContext::from_parts(message, received, ProcessingMode::Send);

        if let Some(pmode_id) = pmode_id {
            let pmode = self.pmode_store.get_sending_pmode(&pmode_id).await?;
            context = context.with_sending_pmode(pmode);
        }
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SendingPMode, UserMessage};
    use crate::pmode::InMemoryPModeStore;

    fn encoded_user_message(id: &str) -> Vec<u8> {
        JsonAs4Codec
            .encode(&As4Message::for_user_message(UserMessage::new(id)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_receive_transformer_decodes_message() {
        let transformer = ReceiveMessageTransformer::new(Arc::new(JsonAs4Codec));
        let context = transformer
            .transform(ReceivedMessage::new(
                encoded_user_message("user-1"),
                "application/json; charset=utf-8",
            ))
            .await
            .unwrap();

        assert_eq!(context.ebms_message_id(), Some("user-1"));
        assert_eq!(context.mode, ProcessingMode::Receive);
        assert!(context.received_message().is_some());
    }

    #[tokio::test]
    async fn test_receive_transformer_rejects_garbage() {
        let transformer = ReceiveMessageTransformer::new(Arc::new(JsonAs4Codec));

        let err = transformer
            .transform(ReceivedMessage::new(b"<soap/>".to_vec(), "application/soap+xml"))
            .await
            .unwrap_err();
        assert!(matches!(err, As4Error::Transformation(_)));

        let err = transformer
            .transform(ReceivedMessage::new(Vec::new(), JSON_CONTENT_TYPE))
            .await
            .unwrap_err();
        assert!(matches!(err, As4Error::Transformation(_)));
    }

    #[tokio::test]
    async fn test_outbound_transformer_resolves_sending_pmode() {
        let store = InMemoryPModeStore::new();
        store.add_sending_pmode(SendingPMode::new("send-invoices"));
        let transformer = OutboundMessageTransformer::new(Arc::new(JsonAs4Codec), Arc::new(store));

        let received = ReceivedMessage::new(encoded_user_message("out-1"), JSON_CONTENT_TYPE)
            .with_origin(MessageOrigin::Datastore {
                ebms_message_id: "out-1".to_string(),
                pmode_id: Some("send-invoices".to_string()),
            });
        let context = transformer.transform(received).await.unwrap();

        assert_eq!(context.mode, ProcessingMode::Send);
        assert_eq!(
            context.sending_pmode.as_ref().map(|p| p.id.as_str()),
            Some("send-invoices")
        );
    }

    #[tokio::test]
    async fn test_outbound_transformer_fails_for_unknown_pmode() {
        let transformer = OutboundMessageTransformer::new(
            Arc::new(JsonAs4Codec),
            Arc::new(InMemoryPModeStore::new()),
        );
        let received = ReceivedMessage::new(encoded_user_message("out-1"), JSON_CONTENT_TYPE)
            .with_origin(MessageOrigin::Datastore {
                ebms_message_id: "out-1".to_string(),
                pmode_id: Some("missing".to_string()),
            });

        let err = transformer.transform(received).await.unwrap_err();
        assert!(matches!(err, As4Error::PModeNotFound(_)));
    }
}
