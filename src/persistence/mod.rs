//! # Persistence Boundary
//!
//! Repository traits over the message store. The store is the single source
//! of truth for message and reception awareness records; every mutation is
//! an explicit load, mutate, save cycle or an atomic update-where.
//!
//! Two implementations ship with the crate: [`InMemoryDatastore`] for tests
//! and embedded use, and `PgDatastore` (feature `postgres`).
//!
//! Leases carry the time they were taken. A lease older than the store's
//! lease timeout is treated as abandoned by a crashed poller and can be
//! taken again, so the timeout must exceed the longest send attempt.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryDatastore;
#[cfg(feature = "postgres")]
pub use postgres::PgDatastore;

use crate::error::Result;
use crate::models::{
    InException, InMessage, MessageUpdate, Operation, OutException, OutMessage, OutMessageFilter,
    ReceptionAwareness,
};
use crate::state_machine::ReceptionEvent;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Age after which a Busy lease may be reclaimed
pub const DEFAULT_LEASE_TIMEOUT_SECS: i64 = 600;

pub fn default_lease_timeout() -> Duration {
    Duration::seconds(DEFAULT_LEASE_TIMEOUT_SECS)
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert_in_message(&self, message: InMessage) -> Result<()>;

    async fn get_in_message(&self, ebms_message_id: &str) -> Result<Option<InMessage>>;

    /// Returns `false` when no in message with that id exists
    async fn update_in_message(&self, ebms_message_id: &str, update: &MessageUpdate)
        -> Result<bool>;

    async fn insert_out_message(&self, message: OutMessage) -> Result<()>;

    async fn get_out_message(&self, ebms_message_id: &str) -> Result<Option<OutMessage>>;

    /// Atomically apply `update` to every out message matching `filter`,
    /// returning the number of affected rows
    async fn update_out_messages_where(
        &self,
        filter: &OutMessageFilter,
        update: &MessageUpdate,
    ) -> Result<u64>;

    /// Store the bytes and endpoint of an out message as they were put on
    /// the wire, so a later resend is identical. Returns `false` when no out
    /// message with that id exists.
    async fn update_out_message_payload(
        &self,
        ebms_message_id: &str,
        url: Option<&str>,
        content_type: &str,
        content: &[u8],
    ) -> Result<bool>;

    /// Pick up to `limit` out messages in `operation` and switch them to the
    /// matching in-progress operation in the same atomic step. Messages left
    /// in progress by an expired lease taken from `operation` are picked too.
    async fn lease_out_messages(&self, operation: Operation, limit: usize)
        -> Result<Vec<OutMessage>>;

    async fn insert_in_exception(&self, exception: InException) -> Result<()>;

    async fn insert_out_exception(&self, exception: OutException) -> Result<()>;

    async fn get_in_exceptions(&self, ebms_ref_to_message_id: &str) -> Result<Vec<InException>>;

    async fn get_out_exceptions(&self, ebms_ref_to_message_id: &str)
        -> Result<Vec<OutException>>;
}

#[async_trait]
pub trait ReceptionAwarenessRepository: Send + Sync {
    async fn insert_reception_awareness(&self, record: ReceptionAwareness) -> Result<()>;

    async fn get_reception_awareness(
        &self,
        internal_message_id: &str,
    ) -> Result<Option<ReceptionAwareness>>;

    /// Open record tracking the given outbound ebMS message
    async fn find_for_ebms_message(
        &self,
        ref_to_ebms_message_id: &str,
    ) -> Result<Option<ReceptionAwareness>>;

    /// Store a mutated record. Completed records are never reopened: the save
    /// is skipped (and `false` returned) when the stored record is completed.
    async fn save_reception_awareness(&self, record: &ReceptionAwareness) -> Result<bool>;

    /// Lease up to `limit` open records that are due at `now` (Pending -> Busy).
    /// Busy records whose lease expired are leased again.
    async fn lease_due_reception_awareness(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReceptionAwareness>>;

    /// Put leased records back (Busy -> Pending)
    async fn release_reception_awareness(&self, internal_message_ids: &[String]) -> Result<u64>;

    /// Complete the open record for `ref_to_ebms_message_id` because a
    /// correlated receipt or error arrived (`event` says which). Returns the
    /// completed record.
    async fn complete_for_ebms_message(
        &self,
        ref_to_ebms_message_id: &str,
        event: ReceptionEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<ReceptionAwareness>>;
}
