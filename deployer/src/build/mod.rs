//! Image builds: submission, polling and cancellation

pub mod cloud_build;
pub mod spec;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::settings::BuildSettings;
use crate::errors::DeployerError;
use crate::models::{BuildHandle, BuildResult, BuildSpec};
use crate::utils::{calc_exp_backoff, CooldownOptions};

pub use cloud_build::CloudBuildClient;
pub use spec::image_build_spec;

/// A service that runs build jobs
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Submit a job and return as soon as it is accepted
    async fn submit(&self, spec: &BuildSpec) -> Result<BuildHandle, DeployerError>;

    /// Current state of a submitted job
    async fn status(&self, handle: &BuildHandle) -> Result<BuildResult, DeployerError>;

    /// Ask the service to stop a job
    async fn cancel(&self, handle: &BuildHandle) -> Result<(), DeployerError>;
}

/// How long and how often to poll a build
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// First delay between polls
    pub poll_interval: Duration,

    /// Upper bound of the backoff between polls
    pub max_poll_interval: Duration,

    /// Overall wait budget
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(1200),
        }
    }
}

impl From<&BuildSettings> for WaitOptions {
    fn from(settings: &BuildSettings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            max_poll_interval: Duration::from_secs(settings.max_poll_interval_secs),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// Wait until a build reaches a terminal status.
///
/// Returns the terminal result whatever its outcome. When the wait times out
/// or `cancel` fires, a cancel request is sent for the build first.
pub async fn await_completion(
    builder: &dyn ImageBuilder,
    handle: &BuildHandle,
    options: &WaitOptions,
    cancel: &CancellationToken,
) -> Result<BuildResult, DeployerError> {
    let deadline = Instant::now() + options.timeout;

    tokio::select! {
        result = poll_until_terminal(builder, handle, options) => result,
        _ = tokio::time::sleep_until(deadline) => {
            warn!("Build {} still running after {:?}", handle.id, options.timeout);
            cancel_quietly(builder, handle).await;
            Err(DeployerError::Timeout(format!(
                "build {} did not finish within {}s",
                handle.id,
                options.timeout.as_secs()
            )))
        }
        _ = cancel.cancelled() => {
            info!("Cancelling build {}", handle.id);
            cancel_quietly(builder, handle).await;
            Err(DeployerError::Cancelled(format!("build {}", handle.id)))
        }
    }
}

/// Turn a terminal result into an error unless it succeeded
pub fn require_success(result: BuildResult) -> Result<BuildResult, DeployerError> {
    if result.status.is_success() {
        Ok(result)
    } else {
        Err(DeployerError::BuildFailure {
            build_id: result.id,
            status: result.status.to_string(),
        })
    }
}

async fn poll_until_terminal(
    builder: &dyn ImageBuilder,
    handle: &BuildHandle,
    options: &WaitOptions,
) -> Result<BuildResult, DeployerError> {
    let backoff = CooldownOptions {
        base_delay: options.poll_interval,
        max_delay: options.max_poll_interval.max(options.poll_interval),
        multiplier: 1.5,
    };
    let mut attempt = 0;

    loop {
        match builder.status(handle).await {
            Ok(result) if result.status.is_terminal() => {
                info!("Build {} finished with {}", handle.id, result.status);
                return Ok(result);
            }
            Ok(result) => {
                debug!("Build {} is {}", handle.id, result.status);
            }
            Err(e) if e.is_transient() => {
                warn!("Failed to poll build {}: {}", handle.id, e);
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(calc_exp_backoff(&backoff, attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}

async fn cancel_quietly(builder: &dyn ImageBuilder, handle: &BuildHandle) {
    if let Err(e) = builder.cancel(handle).await {
        warn!("Failed to cancel build {}: {}", handle.id, e);
    }
}
