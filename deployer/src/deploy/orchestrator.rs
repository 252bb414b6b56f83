//! Deployment orchestration
//!
//! Drives one agent from uploaded source to a running workload:
//!
//! 1. check the caller owns the agent record
//! 2. mark the record `deploying` (compare-and-swap on the revision read)
//! 3. build the image and wait for a terminal build status
//! 4. apply the workload descriptor, optionally waiting for the rollout
//! 5. mark the record `deployed`
//!
//! Any failure after step 2 is recorded as `deployment_failed` on a
//! best-effort basis and surfaced as an `internal` error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::authn::CallerIdentity;
use crate::build::{await_completion, image_build_spec, require_success, ImageBuilder, WaitOptions};
use crate::config::settings::{BuildSettings, Settings, WorkloadSettings};
use crate::deploy::descriptor::agent_descriptor;
use crate::deploy::fsm::{check_finish, check_start, DeploymentEvent, DeploymentFsm, StartMode};
use crate::deploy::naming::{deployment_name, image_name, validate_agent_id};
use crate::errors::{CallableError, DeployerError, ErrorKind};
use crate::models::{DeploymentRecord, RecordUpdate};
use crate::store::RecordStore;
use crate::target::{wait_for_rollout, OrchestrationTarget, RolloutOptions};
use crate::utils::generate_invocation_id;

/// When a deployment counts as `deployed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessMode {
    /// The cluster accepted the descriptor
    #[default]
    Accepted,

    /// The workload's rollout completed
    Healthy,
}

/// What to do when a deploy is requested while one is in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Fail the new request with `failed-precondition`
    #[default]
    Reject,

    /// Start the new attempt anyway
    Supersede,
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub project_id: String,
    pub build: BuildSettings,
    pub namespace: String,
    pub workload: WorkloadSettings,
    pub build_wait: WaitOptions,
    pub readiness: ReadinessMode,
    pub rollout: RolloutOptions,
    pub concurrency: ConcurrencyPolicy,

    /// Age after which an in-flight attempt may be taken over
    pub stale_after: Duration,
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            project_id: settings.project_id.clone(),
            build: settings.build.clone(),
            namespace: settings.cluster.namespace.clone(),
            workload: settings.workload.clone(),
            build_wait: WaitOptions::from(&settings.build),
            readiness: settings.readiness.mode,
            rollout: RolloutOptions::from(&settings.readiness),
            concurrency: settings.concurrency.policy,
            stale_after: settings.stale_after(),
        }
    }
}

/// Result of a successful deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub success: bool,
    pub agent_id: String,
    pub deployment_name: String,
}

/// Deploys agents using injected store, builder and target
pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    builder: Arc<dyn ImageBuilder>,
    target: Arc<dyn OrchestrationTarget>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        builder: Arc<dyn ImageBuilder>,
        target: Arc<dyn OrchestrationTarget>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            builder,
            target,
            options,
        }
    }

    /// Build and deploy `agent_id` on behalf of `caller`
    pub async fn deploy(
        &self,
        caller: Option<&CallerIdentity>,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeployOutcome, CallableError> {
        let span = info_span!(
            "deploy",
            invocation_id = %generate_invocation_id(),
            agent_id = %agent_id,
            build_id = tracing::field::Empty,
        );
        self.deploy_impl(caller, agent_id, cancel)
            .instrument(span)
            .await
    }

    async fn deploy_impl(
        &self,
        caller: Option<&CallerIdentity>,
        agent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeployOutcome, CallableError> {
        let Some(caller) = caller else {
            return Err(CallableError::unauthenticated("User must be logged in"));
        };

        // 1. Ownership
        let record = match self.store.get(agent_id).await {
            Ok(Some(record)) if record.is_owned_by(&caller.uid) => record,
            Ok(_) => {
                warn!("Agent {} not found or not owned by caller", agent_id);
                return Err(CallableError::permission_denied(
                    "Agent not found or not owned by user",
                ));
            }
            Err(e) => {
                error!("Failed to read agent {}: {}", agent_id, e);
                return Err(CallableError::deployment_failed(&e));
            }
        };
        // An owned record whose id cannot name a workload is a data problem
        if let Err(e) = validate_agent_id(agent_id) {
            error!("Agent {} cannot be deployed: {}", agent_id, e);
            return Err(CallableError::deployment_failed(&e));
        }

        // 2. Mark deploying
        let mut fsm = self.start(&record).await?;
        info!("Deployment of agent {} started", agent_id);

        // 3-5. Build, apply, mark deployed
        let name = deployment_name(&self.options.build.image_prefix, agent_id);
        let result = match self.build_and_apply(&record, &name, cancel).await {
            Ok(()) => self
                .store
                .update(agent_id, RecordUpdate::deployed(&name))
                .await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                check_finish(&mut fsm, Ok(()))?;
                info!("Agent {} deployed as {}", agent_id, name);
                Ok(DeployOutcome {
                    success: true,
                    agent_id: agent_id.to_string(),
                    deployment_name: name,
                })
            }
            Err(e) => {
                error!("Deployment of agent {} failed: {}", agent_id, e);
                self.record_failure(agent_id, &mut fsm, &e).await;
                Err(CallableError::deployment_failed(&e))
            }
        }
    }

    /// Move the record into `deploying`, guarding against concurrent attempts
    async fn start(&self, record: &DeploymentRecord) -> Result<DeploymentFsm, CallableError> {
        let mode = check_start(
            record,
            self.options.concurrency,
            self.options.stale_after,
            Utc::now(),
        )?;
        match mode {
            StartMode::Fresh => {}
            StartMode::Stale => warn!(
                "Taking over stale deployment of agent {} started at {:?}",
                record.agent_id, record.deployment_started
            ),
            StartMode::Superseded => warn!(
                "Superseding in-flight deployment of agent {}",
                record.agent_id
            ),
        }

        let mut fsm = DeploymentFsm::new(record.status);
        fsm.process(DeploymentEvent::Deploy(mode))?;

        let swapped = self
            .store
            .update_if_revision(&record.agent_id, &record.revision, RecordUpdate::deploying())
            .await
            .map_err(|e| {
                error!("Failed to mark agent {} deploying: {}", record.agent_id, e);
                CallableError::deployment_failed(&e)
            })?;
        if !swapped {
            warn!("Agent {} changed while starting deployment", record.agent_id);
            return Err(CallableError::new(
                ErrorKind::FailedPrecondition,
                format!(
                    "Agent {} was modified concurrently, retry the deployment",
                    record.agent_id
                ),
            ));
        }
        Ok(fsm)
    }

    async fn build_and_apply(
        &self,
        record: &DeploymentRecord,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployerError> {
        let opts = &self.options;
        let agent_id = record.agent_id.as_str();

        // Build
        let spec = image_build_spec(&opts.build, &opts.project_id, &record.owner_id, agent_id);
        let handle = self.builder.submit(&spec).await?;
        Span::current().record("build_id", handle.id.as_str());
        info!("Waiting for build {} of agent {}", handle.id, agent_id);

        let result =
            await_completion(self.builder.as_ref(), &handle, &opts.build_wait, cancel).await?;
        require_success(result)?;

        // Apply
        let image = image_name(
            &opts.build.registry_host,
            &opts.project_id,
            &opts.build.image_prefix,
            agent_id,
        );
        let descriptor = agent_descriptor(&opts.workload, &opts.namespace, name, &image, agent_id);
        descriptor.validate()?;
        self.target.apply(&descriptor).await?;

        // Readiness
        if opts.readiness == ReadinessMode::Healthy {
            if self.target.supports_rollout_status() {
                wait_for_rollout(
                    self.target.as_ref(),
                    &opts.namespace,
                    name,
                    &opts.rollout,
                    cancel,
                )
                .await?;
            } else {
                warn!("Target cannot report rollout status; treating accepted as deployed");
            }
        }
        Ok(())
    }

    async fn record_failure(&self, agent_id: &str, fsm: &mut DeploymentFsm, err: &DeployerError) {
        if let Err(e) = check_finish(fsm, Err(err)) {
            error!("{}", e);
        }
        if let Err(e) = self
            .store
            .update(agent_id, RecordUpdate::failed(err.to_string()))
            .await
        {
            error!("Failed to record failure of agent {}: {}", agent_id, e);
        }
    }
}
