//! # PMode Store
//!
//! Configuration boundary providing sending PModes by id and the receiving
//! PModes used for matching. Receiving PModes are enumerated in declaration
//! order, which decides ties during matching.

pub mod store;

pub use store::{FilePModeStore, InMemoryPModeStore};

use crate::error::Result;
use crate::models::{ReceivingPMode, SendingPMode};
use async_trait::async_trait;

#[async_trait]
pub trait PModeStore: Send + Sync {
    /// Fails with `PModeNotFound` for unknown ids
    async fn get_sending_pmode(&self, id: &str) -> Result<SendingPMode>;

    /// All receiving PModes, in declaration order
    async fn receiving_pmodes(&self) -> Result<Vec<ReceivingPMode>>;
}
