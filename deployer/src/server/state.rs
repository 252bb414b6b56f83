//! Server state

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::authn::JwtVerifier;
use crate::deploy::orchestrator::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub verifier: Arc<JwtVerifier>,

    /// Cancelled when the server shuts down
    pub cancel: CancellationToken,

    /// Deployments started by requests
    pub tasks: TaskTracker,
}

impl ServerState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        verifier: Arc<JwtVerifier>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            verifier,
            cancel,
            tasks: TaskTracker::new(),
        }
    }
}
