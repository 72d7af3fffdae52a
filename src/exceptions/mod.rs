//! # Exception Handling Chain
//!
//! What an agent does when a message cannot be transformed or a step returns
//! an error instead of a result. Handlers record the failure and hand back a
//! context describing it. Agents always wrap their handler in
//! [`SafeExceptionHandler`], which guarantees the receive callback itself
//! never fails, even if the handler errors or panics.

use crate::error::{As4Error, Result};
use crate::logging::log_error;
use crate::models::{
    InException, MessageStatus, MessageUpdate, MessagingContext, Operation, OutException,
    OutMessageFilter, ProcessingMode, ReceivedMessage,
};
use crate::persistence::MessageRepository;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    /// The received message could not be turned into a context
    async fn handle_transformation_exception(
        &self,
        error: As4Error,
        received: ReceivedMessage,
    ) -> Result<MessagingContext>;

    /// A step of the normal pipeline returned an error
    async fn handle_execution_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext>;

    /// A step of the error pipeline returned an error
    async fn handle_error_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext>;
}

/// Logs the failure and records it on the context
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExceptionHandler;

#[async_trait]
impl ExceptionHandler for LogExceptionHandler {
    async fn handle_transformation_exception(
        &self,
        error: As4Error,
        received: ReceivedMessage,
    ) -> Result<MessagingContext> {
        log_error("exception_handler", "transform", &error.to_string(), None);
        Ok(MessagingContext::from_received(received, ProcessingMode::Unknown).with_exception(error))
    }

    async fn handle_execution_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext> {
        log_error(
            "exception_handler",
            "execute_steps",
            &error.to_string(),
            context.best_message_id(),
        );
        Ok(context.with_exception(error))
    }

    async fn handle_error_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext> {
        log_error(
            "exception_handler",
            "execute_error_pipeline",
            &error.to_string(),
            context.best_message_id(),
        );
        Ok(context.with_exception(error))
    }
}

/// Records failures on received messages as in-exceptions
pub struct InboundExceptionHandler {
    repository: Arc<dyn MessageRepository>,
}

impl InboundExceptionHandler {
    pub fn new(repository: Arc<dyn MessageRepository>) -> Self {
        Self { repository }
    }

    async fn record(&self, error: &As4Error, context: &MessagingContext) -> Result<()> {
        let ebms_id = context.best_message_id().map(str::to_string);

        self.repository
            .insert_in_exception(InException {
                ebms_ref_to_message_id: ebms_id.clone(),
                pmode_id: context.receiving_pmode.as_ref().map(|p| p.id.clone()),
                exception: error.to_string(),
                message_body: context.received_message().map(|r| r.content.clone()),
                operation: Operation::NotApplicable,
                inserted_at: Utc::now(),
            })
            .await?;

        if let Some(id) = ebms_id {
            let update = MessageUpdate::new(Operation::NotApplicable, MessageStatus::Exception);
            if !self.repository.update_in_message(&id, &update).await? {
                warn!(message_id = %id, "Failed message was never stored as in message");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExceptionHandler for InboundExceptionHandler {
    async fn handle_transformation_exception(
        &self,
        error: As4Error,
        received: ReceivedMessage,
    ) -> Result<MessagingContext> {
        self.repository
            .insert_in_exception(InException {
                ebms_ref_to_message_id: None,
                pmode_id: None,
                exception: error.to_string(),
                message_body: Some(received.content.clone()),
                operation: Operation::NotApplicable,
                inserted_at: Utc::now(),
            })
            .await?;
        Ok(MessagingContext::from_received(received, ProcessingMode::Receive).with_exception(error))
    }

    async fn handle_execution_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext> {
        self.record(&error, &context).await?;
        Ok(context.with_exception(error))
    }

    async fn handle_error_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext> {
        self.record(&error, &context).await?;
        Ok(context.with_exception(error))
    }
}

/// Records failures on messages we send as out-exceptions and dead-letters them
pub struct OutboundExceptionHandler {
    repository: Arc<dyn MessageRepository>,
}

impl OutboundExceptionHandler {
    pub fn new(repository: Arc<dyn MessageRepository>) -> Self {
        Self { repository }
    }

    async fn record(
        &self,
        error: &As4Error,
        ebms_id: Option<String>,
        pmode_id: Option<String>,
        body: Option<Vec<u8>>,
    ) -> Result<()> {
        self.repository
            .insert_out_exception(OutException {
                ebms_ref_to_message_id: ebms_id.clone(),
                pmode_id,
                exception: error.to_string(),
                message_body: body,
                operation: Operation::NotApplicable,
                inserted_at: Utc::now(),
            })
            .await?;

        if let Some(id) = ebms_id {
            let update = MessageUpdate::new(Operation::DeadLettered, MessageStatus::Exception);
            self.repository
                .update_out_messages_where(&OutMessageFilter::by_id(id), &update)
                .await?;
        }
        Ok(())
    }

    async fn record_context(&self, error: &As4Error, context: &MessagingContext) -> Result<()> {
        let pmode_id = context
            .sending_pmode
            .as_ref()
            .map(|p| p.id.clone())
            .or_else(|| context.origin_pmode_id().map(str::to_string));
        self.record(
            error,
            context.best_message_id().map(str::to_string),
            pmode_id,
            context.received_message().map(|r| r.content.clone()),
        )
        .await
    }
}

#[async_trait]
impl ExceptionHandler for OutboundExceptionHandler {
    async fn handle_transformation_exception(
        &self,
        error: As4Error,
        received: ReceivedMessage,
    ) -> Result<MessagingContext> {
        let context = MessagingContext::from_received(received, ProcessingMode::Send);
        self.record_context(&error, &context).await?;
        Ok(context.with_exception(error))
    }

    async fn handle_execution_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext> {
        self.record_context(&error, &context).await?;
        Ok(context.with_exception(error))
    }

    async fn handle_error_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext> {
        self.record_context(&error, &context).await?;
        Ok(context.with_exception(error))
    }
}

/// Decorator that never lets a failure of the inner handler escape.
///
/// The inner handler runs exactly once. If it errors or panics, the result
/// is a context carrying the original error.
pub struct SafeExceptionHandler {
    inner: Arc<dyn ExceptionHandler>,
}

impl SafeExceptionHandler {
    pub fn new(inner: Arc<dyn ExceptionHandler>) -> Self {
        Self { inner }
    }

    async fn guard<F>(
        operation: &'static str,
        original: As4Error,
        fallback: MessagingContext,
        handled: F,
    ) -> MessagingContext
    where
        F: std::future::Future<Output = Result<MessagingContext>> + Send,
    {
        match AssertUnwindSafe(handled).catch_unwind().await {
            Ok(Ok(context)) => context,
            Ok(Err(handler_error)) => {
                error!(
                    operation = operation,
                    error = %handler_error,
                    original_error = %original,
                    "Exception handler failed"
                );
                fallback.with_exception(original)
            }
            Err(_) => {
                error!(
                    operation = operation,
                    original_error = %original,
                    "Exception handler panicked"
                );
                fallback.with_exception(original)
            }
        }
    }

    pub async fn handle_transformation_exception(
        &self,
        error: As4Error,
        received: ReceivedMessage,
    ) -> MessagingContext {
        let fallback = MessagingContext::from_received(received.clone(), ProcessingMode::Unknown);
        let handled = self
            .inner
            .handle_transformation_exception(error.clone(), received);
        Self::guard("handle_transformation_exception", error, fallback, handled).await
    }

    pub async fn handle_execution_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> MessagingContext {
        let fallback = context.clone();
        let handled = self.inner.handle_execution_exception(error.clone(), context);
        Self::guard("handle_execution_exception", error, fallback, handled).await
    }

    pub async fn handle_error_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> MessagingContext {
        let fallback = context.clone();
        let handled = self.inner.handle_error_exception(error.clone(), context);
        Self::guard("handle_error_exception", error, fallback, handled).await
    }
}

#[async_trait]
impl ExceptionHandler for SafeExceptionHandler {
    async fn handle_transformation_exception(
        &self,
        error: As4Error,
        received: ReceivedMessage,
    ) -> Result<MessagingContext> {
        Ok(SafeExceptionHandler::handle_transformation_exception(self, error, received).await)
    }

    async fn handle_execution_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext> {
        Ok(SafeExceptionHandler::handle_execution_exception(self, error, context).await)
    }

    async fn handle_error_exception(
        &self,
        error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext> {
        Ok(SafeExceptionHandler::handle_error_exception(self, error, context).await)
    }
}
