//! Record store: persisted deployment state per agent

pub mod firestore;
pub mod memory;
mod value;

use async_trait::async_trait;

use crate::errors::DeployerError;
use crate::models::{DeploymentRecord, RecordUpdate};

pub use firestore::FirestoreRecordStore;
pub use memory::MemoryRecordStore;

/// Storage of deployment records, keyed by agent ID.
///
/// Records are created by agent registration elsewhere; implementations must
/// never create a record from an update.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a record
    async fn get(&self, agent_id: &str) -> Result<Option<DeploymentRecord>, DeployerError>;

    /// Apply a partial update to an existing record
    async fn update(&self, agent_id: &str, update: RecordUpdate) -> Result<(), DeployerError>;

    /// Apply a partial update only if the record is still at `expected_revision`.
    ///
    /// Returns `false` when the record changed since it was read.
    async fn update_if_revision(
        &self,
        agent_id: &str,
        expected_revision: &str,
        update: RecordUpdate,
    ) -> Result<bool, DeployerError>;
}
