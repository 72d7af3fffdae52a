//! # Polling Receiver Template
//!
//! Shared loop for every receiver that pulls work from somewhere instead of
//! being pushed to: fetch a batch, process each item on its own task, wait
//! for the whole batch, repeat. An empty batch makes the loop sleep for the
//! polling interval.
//!
//! Cancellation is observed between batches and while sleeping. A fetch that
//! has started always runs to completion, since it may already have leased
//! records; when cancellation arrived meanwhile the batch is not processed.
//! A batch that is already running completes first. Afterwards the template
//! gets one chance to put back whatever it leased but did not process.

use crate::error::{As4Error, Result};
use crate::logging::log_error;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[async_trait]
pub trait PollingTemplate: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;
    type Callback: Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Sleep after an empty batch
    fn polling_interval(&self) -> Duration;

    /// Upper bound on items processed at the same time, `None` for unbounded
    fn max_concurrency(&self) -> Option<usize> {
        None
    }

    async fn get_messages_to_poll(&self) -> Result<Vec<Self::Item>>;

    async fn message_received(&self, item: Self::Item, callback: Self::Callback) -> Result<()>;

    /// Called once for every item whose processing failed or panicked
    async fn handle_message_exception(&self, item: &Self::Item, error: &As4Error);

    /// Put back items that were taken but not processed
    async fn release_pending_items(&self) -> Result<()>;
}

/// Run the polling loop of `template` until `cancellation` fires
pub async fn start_polling<P: PollingTemplate>(
    template: Arc<P>,
    callback: P::Callback,
    cancellation: CancellationToken,
) {
    info!(receiver = template.name(), "Polling started");
    let semaphore = template
        .max_concurrency()
        .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

    loop {
        if cancellation.is_cancelled() {
            break;
        }

        // never dropped halfway: the fetch may lease before it returns
        let batch = template.get_messages_to_poll().await;
        if cancellation.is_cancelled() {
            debug!(
                receiver = template.name(),
                "Cancelled during fetch, batch left for release"
            );
            break;
        }

        let items = match batch {
            Ok(items) => items,
            Err(e) => {
                log_error(template.name(), "get_messages_to_poll", &e.to_string(), None);
                Vec::new()
            }
        };

        if items.is_empty() {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tokio::time::sleep(template.polling_interval()) => {}
            }
            continue;
        }

        debug!(receiver = template.name(), items = items.len(), "Processing batch");
        process_batch(&template, &callback, items, semaphore.as_ref()).await;
    }

    if let Err(e) = template.release_pending_items().await {
        log_error(template.name(), "release_pending_items", &e.to_string(), None);
    }
    info!(receiver = template.name(), "Polling stopped");
}

async fn process_batch<P: PollingTemplate>(
    template: &Arc<P>,
    callback: &P::Callback,
    items: Vec<P::Item>,
    semaphore: Option<&Arc<Semaphore>>,
) {
    let mut tasks = JoinSet::new();

    for item in items {
        let template = Arc::clone(template);
        let callback = callback.clone();
        let semaphore = semaphore.cloned();

        tasks.spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };

            let outcome = AssertUnwindSafe(template.message_received(item.clone(), callback))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(panic) => Some(As4Error::Internal(format!(
                    "message handler panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };

            if let Some(e) = failure {
                log_error(template.name(), "message_received", &e.to_string(), None);
                template.handle_message_exception(&item, &e).await;
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(receiver = template.name(), error = %e, "Polling task aborted");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
