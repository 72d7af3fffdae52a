//! # Agent
//!
//! Binds one receiver to one transformer, one step executor and one
//! exception handler. Every message the receiver delivers goes through
//! transform, execute and (on error) the matching exception handler
//! operation. The receive callback never fails: the handler is always
//! wrapped in a [`SafeExceptionHandler`].

use crate::exceptions::{ExceptionHandler, SafeExceptionHandler};
use crate::models::{MessagingContext, ReceivedMessage};
use crate::pipeline::{PipelineError, StepExecutor};
use crate::receivers::{message_callback, MessageCallback, Receiver};
use crate::transformers::Transformer;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct AgentCore {
    name: String,
    transformer: Arc<dyn Transformer>,
    executor: StepExecutor,
    exception_handler: SafeExceptionHandler,
}

impl AgentCore {
    async fn process(&self, received: ReceivedMessage) -> MessagingContext {
        let context = match self.transformer.transform(received.clone()).await {
            Ok(context) => context,
            Err(error) => {
                warn!(agent = %self.name, error = %error, "Transformation failed");
                return self
                    .exception_handler
                    .handle_transformation_exception(error, received)
                    .await;
            }
        };

        match self.executor.execute_steps(context).await {
            Ok(result) => {
                debug!(
                    agent = %self.name,
                    message_id = result.context.ebms_message_id(),
                    outcome = ?result.outcome,
                    "Message processed"
                );
                result.context
            }
            Err(error @ PipelineError::Normal { .. }) => {
                warn!(agent = %self.name, error = %error, "Normal pipeline failed");
                let (source, context) = error.into_parts();
                self.exception_handler
                    .handle_execution_exception(source, context)
                    .await
            }
            Err(error @ PipelineError::Error { .. }) => {
                warn!(agent = %self.name, error = %error, "Error pipeline failed");
                let (source, context) = error.into_parts();
                self.exception_handler
                    .handle_error_exception(source, context)
                    .await
            }
        }
    }
}

pub struct Agent {
    receiver: Arc<dyn Receiver>,
    core: Arc<AgentCore>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.core.name)
            .field("receiver", &self.receiver.name())
            .field("executor", &self.core.executor)
            .finish()
    }
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        receiver: Arc<dyn Receiver>,
        transformer: Arc<dyn Transformer>,
        executor: StepExecutor,
        exception_handler: Arc<dyn ExceptionHandler>,
    ) -> Self {
        Self {
            receiver,
            core: Arc::new(AgentCore {
                name: name.into(),
                transformer,
                executor,
                exception_handler: SafeExceptionHandler::new(exception_handler),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Callback handed to the receiver
    pub fn callback(&self) -> MessageCallback {
        let core = Arc::clone(&self.core);
        message_callback(move |received| {
            let core = Arc::clone(&core);
            async move { core.process(received).await }
        })
    }

    /// Run one received message through the agent
    pub async fn process(&self, received: ReceivedMessage) -> MessagingContext {
        self.core.process(received).await
    }

    /// Spawn the receiver loop. The task ends when `cancellation` fires or
    /// [`stop`](Self::stop) is called.
    pub fn start(&self, cancellation: CancellationToken) -> JoinHandle<()> {
        let receiver = Arc::clone(&self.receiver);
        let callback = self.callback();
        let name = self.core.name.clone();

        info!(agent = %name, receiver = receiver.name(), "Starting agent");
        tokio::spawn(async move {
            receiver.start_receiving(callback, cancellation).await;
            info!(agent = %name, "Agent stopped");
        })
    }

    pub fn stop(&self) {
        self.receiver.stop_receiving();
    }
}
