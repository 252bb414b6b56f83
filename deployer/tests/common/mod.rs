//! Test doubles for the orchestrator's collaborators

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use agent_deployer::build::ImageBuilder;
use agent_deployer::config::Settings;
use agent_deployer::deploy::{Orchestrator, OrchestratorOptions};
use agent_deployer::errors::DeployerError;
use agent_deployer::models::{
    BuildHandle, BuildResult, BuildSpec, BuildStatus, DeploymentDescriptor, DeploymentRecord,
    DeploymentStatus, RecordUpdate, RolloutStatus,
};
use agent_deployer::store::{MemoryRecordStore, RecordStore};
use agent_deployer::target::OrchestrationTarget;

pub const PROJECT: &str = "proj";
pub const OWNER: &str = "user-1";

pub fn settings() -> Settings {
    Settings {
        project_id: PROJECT.to_string(),
        ..Settings::default()
    }
}

fn unavailable(service: &'static str) -> DeployerError {
    DeployerError::Api {
        service,
        status: 503,
        reason: Some("UNAVAILABLE".to_string()),
        message: "service unavailable".to_string(),
    }
}

// ================================ RECORD STORE =================================== //

/// Memory store with injectable failures
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryRecordStore,

    /// Writes moving a record into this status fail
    fail_status: Mutex<Option<DeploymentStatus>>,

    /// Every write fails
    fail_all_writes: AtomicBool,

    /// The next read is followed by a write from a competing invocation
    race_next_read: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_agent(agent_id: &str, owner: &str) -> Arc<Self> {
        let store = Arc::new(Self::new());
        store.inner.insert(DeploymentRecord::new(agent_id, owner)).await;
        store
    }

    pub async fn insert(&self, record: DeploymentRecord) {
        self.inner.insert(record).await;
    }

    pub async fn snapshot(&self, agent_id: &str) -> Option<DeploymentRecord> {
        self.inner.snapshot(agent_id).await
    }

    pub fn fail_writes_to(&self, status: DeploymentStatus) {
        *self.fail_status.lock().unwrap() = Some(status);
    }

    pub fn fail_all_writes(&self) {
        self.fail_all_writes.store(true, Ordering::SeqCst);
    }

    pub fn race_next_read(&self) {
        self.race_next_read.store(true, Ordering::SeqCst);
    }

    fn check_write(&self, update: &RecordUpdate) -> Result<(), DeployerError> {
        if self.fail_all_writes.load(Ordering::SeqCst)
            || *self.fail_status.lock().unwrap() == Some(update.status)
        {
            return Err(unavailable("Firestore"));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get(&self, agent_id: &str) -> Result<Option<DeploymentRecord>, DeployerError> {
        let record = self.inner.get(agent_id).await?;
        if self.race_next_read.swap(false, Ordering::SeqCst) {
            self.inner.update(agent_id, RecordUpdate::deploying()).await?;
        }
        Ok(record)
    }

    async fn update(&self, agent_id: &str, update: RecordUpdate) -> Result<(), DeployerError> {
        self.check_write(&update)?;
        self.inner.update(agent_id, update).await
    }

    async fn update_if_revision(
        &self,
        agent_id: &str,
        expected_revision: &str,
        update: RecordUpdate,
    ) -> Result<bool, DeployerError> {
        self.check_write(&update)?;
        self.inner
            .update_if_revision(agent_id, expected_revision, update)
            .await
    }
}

// ================================ IMAGE BUILDER =================================== //

/// Builder replaying scripted statuses; the last status repeats forever
pub struct FakeBuilder {
    statuses: Mutex<VecDeque<BuildStatus>>,
    pub submitted: Mutex<Vec<BuildSpec>>,
    pub cancels: AtomicUsize,
    fail_submit: AtomicBool,
}

impl FakeBuilder {
    pub fn new(statuses: Vec<BuildStatus>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into()),
            submitted: Mutex::new(vec![]),
            cancels: AtomicUsize::new(0),
            fail_submit: AtomicBool::new(false),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(vec![
            BuildStatus::Queued,
            BuildStatus::Working,
            BuildStatus::Success,
        ])
    }

    pub fn fail_submit(&self) {
        self.fail_submit.store(true, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn images(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .flat_map(|spec| spec.images.clone())
            .collect()
    }
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn submit(&self, spec: &BuildSpec) -> Result<BuildHandle, DeployerError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(unavailable("Cloud Build"));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(spec.clone());
        Ok(BuildHandle {
            id: format!("build-{}", submitted.len()),
            log_url: None,
        })
    }

    async fn status(&self, handle: &BuildHandle) -> Result<BuildResult, DeployerError> {
        let status = {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.pop_front().unwrap()
            } else {
                statuses.front().cloned().unwrap()
            }
        };
        Ok(BuildResult {
            id: handle.id.clone(),
            status,
            status_detail: None,
            log_url: None,
        })
    }

    async fn cancel(&self, _handle: &BuildHandle) -> Result<(), DeployerError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================= ORCHESTRATION TARGET =============================== //

/// Target recording applied descriptors
pub struct FakeTarget {
    pub applied: Mutex<Vec<DeploymentDescriptor>>,
    rollout: Mutex<Option<RolloutStatus>>,
    fail_apply: AtomicBool,
    supports_rollout: bool,
}

impl FakeTarget {
    pub fn new() -> Arc<Self> {
        Self::with_rollout_support(true)
    }

    pub fn with_rollout_support(supports_rollout: bool) -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(vec![]),
            rollout: Mutex::new(None),
            fail_apply: AtomicBool::new(false),
            supports_rollout,
        })
    }

    pub fn fail_apply(&self) {
        self.fail_apply.store(true, Ordering::SeqCst);
    }

    pub fn set_rollout(&self, status: RolloutStatus) {
        *self.rollout.lock().unwrap() = Some(status);
    }

    pub fn applied_names(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }
}

#[async_trait]
impl OrchestrationTarget for FakeTarget {
    async fn apply(&self, descriptor: &DeploymentDescriptor) -> Result<(), DeployerError> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(DeployerError::Api {
                service: "Kubernetes",
                status: 422,
                reason: Some("Invalid".to_string()),
                message: "admission webhook denied the request".to_string(),
            });
        }
        self.applied.lock().unwrap().push(descriptor.clone());
        Ok(())
    }

    async fn rollout_status(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<RolloutStatus>, DeployerError> {
        Ok(self.rollout.lock().unwrap().clone())
    }

    fn supports_rollout_status(&self) -> bool {
        self.supports_rollout
    }
}

// ================================== HARNESS ====================================== //

pub fn orchestrator(
    settings: &Settings,
    store: Arc<FlakyStore>,
    builder: Arc<FakeBuilder>,
    target: Arc<FakeTarget>,
) -> Orchestrator {
    Orchestrator::new(
        store,
        builder,
        target,
        OrchestratorOptions::from_settings(settings),
    )
}
