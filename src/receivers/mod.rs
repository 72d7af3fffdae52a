//! # Receivers
//!
//! Where an agent's messages come from. A [`Receiver`] hands raw messages to
//! the agent's callback until it is cancelled. Polling receivers implement
//! [`PollingTemplate`] and get the loop, concurrency and shutdown handling of
//! [`start_polling`] through [`PollingReceiver`].

pub mod datastore;
pub mod interval;
pub mod polling;
pub mod pull;

// Re-export main types for convenient access
pub use datastore::DatastoreReceiver;
pub use interval::IntervalRequest;
pub use polling::{start_polling, PollingTemplate};
pub use pull::{PullMpc, PullRequestReceiver};

use crate::models::{MessagingContext, ReceivedMessage};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Agent entry point for one received message. It never fails; the
/// returned context describes the outcome, failures included.
pub type MessageCallback =
    Arc<dyn Fn(ReceivedMessage) -> BoxFuture<'static, MessagingContext> + Send + Sync>;

/// Wrap an async closure into a [`MessageCallback`]
pub fn message_callback<F, Fut>(handler: F) -> MessageCallback
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessagingContext> + Send + 'static,
{
    Arc::new(move |received| handler(received).boxed())
}

#[async_trait]
pub trait Receiver: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver messages to `callback` until `cancellation` fires or
    /// [`stop_receiving`](Self::stop_receiving) is called
    async fn start_receiving(&self, callback: MessageCallback, cancellation: CancellationToken);

    fn stop_receiving(&self);
}

/// [`Receiver`] running a [`PollingTemplate`]
pub struct PollingReceiver<P> {
    template: Arc<P>,
    running: Mutex<Option<CancellationToken>>,
}

impl<P> PollingReceiver<P>
where
    P: PollingTemplate<Callback = MessageCallback>,
{
    pub fn new(template: Arc<P>) -> Self {
        Self {
            template,
            running: Mutex::new(None),
        }
    }

    pub fn template(&self) -> &Arc<P> {
        &self.template
    }
}

#[async_trait]
impl<P> Receiver for PollingReceiver<P>
where
    P: PollingTemplate<Callback = MessageCallback>,
{
    fn name(&self) -> &str {
        self.template.name()
    }

    async fn start_receiving(&self, callback: MessageCallback, cancellation: CancellationToken) {
        let token = cancellation.child_token();
        *self.running.lock() = Some(token.clone());
        start_polling(Arc::clone(&self.template), callback, token).await;
    }

    fn stop_receiving(&self) {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
        }
    }
}
