//! In-memory record store

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::errors::DeployerError;
use crate::models::{DeploymentRecord, DeploymentStatus, FieldTimestamp, RecordUpdate};
use crate::store::RecordStore;

/// Record store held in process memory, for local runs and tests
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, DeploymentRecord>>,
    next_revision: AtomicU64,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_revision(&self) -> String {
        (self.next_revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Register a record, as agent registration would
    pub async fn insert(&self, mut record: DeploymentRecord) {
        record.revision = self.bump_revision();
        let mut records = self.records.write().await;
        records.insert(record.agent_id.clone(), record);
    }

    /// Current state of a record, without counting as a read
    pub async fn snapshot(&self, agent_id: &str) -> Option<DeploymentRecord> {
        self.records.read().await.get(agent_id).cloned()
    }

    /// Number of `get` calls served
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn apply(&self, record: &mut DeploymentRecord, update: RecordUpdate) {
        let resolve = |ts: FieldTimestamp| match ts {
            FieldTimestamp::ServerTimestamp => Utc::now(),
            FieldTimestamp::Value(value) => value,
        };

        record.status = update.status;
        if let Some(ts) = update.deployment_started {
            record.deployment_started = Some(resolve(ts));
        }
        if let Some(ts) = update.deployment_completed {
            record.deployment_completed = Some(resolve(ts));
        }
        if let Some(name) = update.kubernetes_deployment {
            record.kubernetes_deployment = Some(name);
        }
        if let Some(error) = update.error {
            record.error = Some(error);
        } else if update.status == DeploymentStatus::Deployed {
            record.error = None;
        }
        record.revision = self.bump_revision();
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, agent_id: &str) -> Result<Option<DeploymentRecord>, DeployerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.read().await.get(agent_id).cloned())
    }

    async fn update(&self, agent_id: &str, update: RecordUpdate) -> Result<(), DeployerError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(agent_id)
            .ok_or_else(|| DeployerError::NotFound(format!("agent {}", agent_id)))?;
        self.apply(record, update);
        Ok(())
    }

    async fn update_if_revision(
        &self,
        agent_id: &str,
        expected_revision: &str,
        update: RecordUpdate,
    ) -> Result<bool, DeployerError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(agent_id)
            .ok_or_else(|| DeployerError::NotFound(format!("agent {}", agent_id)))?;
        if record.revision != expected_revision {
            return Ok(false);
        }
        self.apply(record, update);
        Ok(true)
    }
}
