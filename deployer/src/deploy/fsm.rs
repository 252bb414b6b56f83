//! Finite State Machine for a deployment attempt

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::deploy::orchestrator::ConcurrencyPolicy;
use crate::errors::DeployerError;
use crate::models::{DeploymentRecord, DeploymentStatus};

/// How an attempt enters `deploying`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// The record was idle
    Fresh,

    /// The previous attempt stopped reporting and is taken over
    Stale,

    /// The previous attempt is still running and is superseded
    Superseded,
}

/// Deployment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Start an attempt
    Deploy(StartMode),

    /// The attempt completed
    DeploySuccess,

    /// The attempt failed
    DeployFailed(String),
}

/// Status machine of one record across one attempt
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    status: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Start from the status read from the store
    pub fn new(status: DeploymentStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), DeployerError> {
        let new_status = match (self.status, &event) {
            (
                DeploymentStatus::Created
                | DeploymentStatus::Deployed
                | DeploymentStatus::DeploymentFailed,
                DeploymentEvent::Deploy(StartMode::Fresh),
            ) => {
                self.error = None;
                DeploymentStatus::Deploying
            }
            (
                DeploymentStatus::Deploying,
                DeploymentEvent::Deploy(StartMode::Stale | StartMode::Superseded),
            ) => {
                self.error = None;
                DeploymentStatus::Deploying
            }

            (DeploymentStatus::Deploying, DeploymentEvent::DeploySuccess) => {
                DeploymentStatus::Deployed
            }
            (DeploymentStatus::Deploying, DeploymentEvent::DeployFailed(err)) => {
                self.error = Some(err.clone());
                DeploymentStatus::DeploymentFailed
            }

            (status, event) => {
                return Err(DeployerError::Internal(format!(
                    "Invalid transition: {} -> {:?}",
                    status, event
                )));
            }
        };

        self.status = new_status;
        Ok(())
    }
}

/// Decide whether a new attempt may start on `record`.
///
/// A `deploying` record blocks new attempts under [`ConcurrencyPolicy::Reject`]
/// unless its attempt started more than `stale_after` ago.
pub fn check_start(
    record: &DeploymentRecord,
    policy: ConcurrencyPolicy,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<StartMode, DeployerError> {
    if record.status != DeploymentStatus::Deploying {
        return Ok(StartMode::Fresh);
    }

    let stale = match record.deployment_started {
        Some(started) => now
            .signed_duration_since(started)
            .to_std()
            .map(|age| age > stale_after)
            .unwrap_or(false),
        None => true,
    };
    if stale {
        return Ok(StartMode::Stale);
    }

    match policy {
        ConcurrencyPolicy::Supersede => Ok(StartMode::Superseded),
        ConcurrencyPolicy::Reject => Err(DeployerError::AlreadyDeploying(record.agent_id.clone())),
    }
}

/// Status an attempt ends in
pub fn check_finish(
    fsm: &mut DeploymentFsm,
    outcome: Result<(), &DeployerError>,
) -> Result<DeploymentStatus, DeployerError> {
    let event = match outcome {
        Ok(()) => DeploymentEvent::DeploySuccess,
        Err(e) => DeploymentEvent::DeployFailed(e.to_string()),
    };
    fsm.process(event)?;
    Ok(fsm.status())
}

