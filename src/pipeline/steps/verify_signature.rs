//! Signature verification for PModes that demand signed messages.

use super::VERIFY_SIGNATURE;
use crate::error::{As4Error, Result};
use crate::models::{ErrorCode, ErrorResult, MessagingContext};
use crate::pipeline::step::{Step, StepResult};
use crate::security::{verify_message, MessageSigner};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct VerifySignatureStep {
    signer: Option<Arc<dyn MessageSigner>>,
}

impl VerifySignatureStep {
    pub fn new(signer: Option<Arc<dyn MessageSigner>>) -> Self {
        Self { signer }
    }

    fn reject(context: MessagingContext, reason: String) -> StepResult {
        warn!(message_id = context.ebms_message_id(), reason = %reason, "Signature verification failed");
        let context =
            context.with_error_result(ErrorResult::new(ErrorCode::FailedAuthentication, reason.clone()));
        StepResult::failed(context).with_journal_entry(reason)
    }
}

#[async_trait]
impl Step for VerifySignatureStep {
    fn name(&self) -> &str {
        VERIFY_SIGNATURE
    }

    async fn execute(&self, context: MessagingContext) -> Result<StepResult> {
        let required = context
            .receiving_pmode
            .as_ref()
            .is_some_and(|p| p.security.verify_signature);
        if !required {
            return Ok(StepResult::success(context));
        }

        let message = context
            .as4_message()
            .ok_or_else(|| As4Error::step_execution(VERIFY_SIGNATURE, "context has no AS4 message"))?;
        if !message.is_signed() {
            return Ok(Self::reject(context, "Message is not signed".to_string()));
        }

        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| As4Error::Security("no message signer configured".to_string()))?;

        match verify_message(message, signer.as_ref()) {
            Ok(()) => Ok(StepResult::success(context).with_journal_entry("Signature verified")),
            Err(As4Error::Security(reason)) => Ok(Self::reject(context, reason)),
            Err(other) => Err(other),
        }
    }
}
