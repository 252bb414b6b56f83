//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::authn::{AccessTokenProvider, JwtVerifier, MetadataTokenProvider, StaticTokenProvider};
use crate::build::{CloudBuildClient, ImageBuilder, WaitOptions};
use crate::config::Settings;
use crate::deploy::{Orchestrator, OrchestratorOptions};
use crate::errors::DeployerError;
use crate::http::ApiClient;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::store::{FirestoreRecordStore, RecordStore};
use crate::target::{
    ApplyMode, BuildJobTarget, ClusterResolver, KubernetesTarget, OrchestrationTarget,
};

/// Run the deployer until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployerError> {
    info!("Initializing agent deployer...");

    let cancel = CancellationToken::new();
    let mut shutdown_manager = ShutdownManager::new(cancel.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, cancel.clone(), &mut shutdown_manager).await {
        error!("Failed to start deployer: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    cancel: CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DeployerError> {
    let settings = &options.settings;
    let orchestrator = Arc::new(init_orchestrator(settings, cancel.clone())?);

    let secret = settings.auth.jwt_secret.as_ref().ok_or_else(|| {
        DeployerError::ConfigError("token signing secret is not set".to_string())
    })?;
    let verifier = Arc::new(JwtVerifier::new(
        secret,
        settings.auth.issuer.as_deref(),
        settings.auth.audience.as_deref(),
    ));

    info!("Initializing HTTP server...");
    let state = Arc::new(ServerState::new(orchestrator, verifier, cancel.clone()));
    shutdown_manager.with_tasks(state.tasks.clone());

    let server_handle = serve(&options.server, state, cancel.cancelled_owned()).await?;
    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

fn init_token_provider(settings: &Settings) -> Result<Arc<dyn AccessTokenProvider>, DeployerError> {
    match &settings.gcp.access_token {
        Some(token) => {
            info!("Using the configured access token for cloud APIs");
            Ok(Arc::new(StaticTokenProvider::new(token.clone())))
        }
        None => {
            info!("Using the metadata server for cloud API tokens");
            Ok(Arc::new(MetadataTokenProvider::new(
                &settings.gcp.metadata_base_url,
            )?))
        }
    }
}

/// Wire the store, builder and target into an orchestrator
pub fn init_orchestrator(
    settings: &Settings,
    cancel: CancellationToken,
) -> Result<Orchestrator, DeployerError> {
    let tokens = init_token_provider(settings)?;

    let firestore = ApiClient::new("Firestore", &settings.gcp.firestore_base_url, tokens.clone())?;
    let store: Arc<dyn RecordStore> = Arc::new(FirestoreRecordStore::new(
        firestore,
        &settings.project_id,
        &settings.records.database,
        &settings.records.collection,
    ));

    let cloud_build =
        ApiClient::new("Cloud Build", &settings.gcp.cloud_build_base_url, tokens.clone())?;
    let builder: Arc<dyn ImageBuilder> =
        Arc::new(CloudBuildClient::new(cloud_build, &settings.project_id));

    let target: Arc<dyn OrchestrationTarget> = match settings.cluster.apply_mode {
        ApplyMode::Direct => {
            let container = ApiClient::new("GKE", &settings.gcp.container_base_url, tokens.clone())?;
            let resolver =
                ClusterResolver::from_settings(&settings.cluster, &settings.project_id, container)?;
            Arc::new(KubernetesTarget::new(
                resolver,
                tokens,
                &settings.cluster.field_manager,
            ))
        }
        ApplyMode::BuildJob => Arc::new(BuildJobTarget::new(
            builder.clone(),
            &settings.cluster,
            WaitOptions::from(&settings.build),
            cancel,
        )),
    };
    info!(
        "Workloads are applied to {}/{} ({:?})",
        settings.cluster.name, settings.cluster.namespace, settings.cluster.apply_mode
    );

    Ok(Orchestrator::new(
        store,
        builder,
        target,
        OrchestratorOptions::from_settings(settings),
    ))
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    cancel: CancellationToken,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), DeployerError>>>,
    tasks: Option<TaskTracker>,
}

impl ShutdownManager {
    pub fn new(cancel: CancellationToken, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            cancel,
            lifecycle_options,
            server_handle: None,
            tasks: None,
        }
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), DeployerError>>,
    ) -> Result<(), DeployerError> {
        if self.server_handle.is_some() {
            return Err(DeployerError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub fn with_tasks(&mut self, tasks: TaskTracker) {
        self.tasks = Some(tasks);
    }

    pub async fn shutdown(&mut self) -> Result<(), DeployerError> {
        // Stops the server and every in-flight deployment
        self.cancel.cancel();

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}",
                    self.lifecycle_options.max_shutdown_delay
                );
                Err(DeployerError::ShutdownError(format!(
                    "timed out after {:?}",
                    self.lifecycle_options.max_shutdown_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployerError> {
        info!("Shutting down agent deployer...");

        // 1. In-flight deployments record their failure
        if let Some(tasks) = self.tasks.take() {
            tasks.close();
            tasks.wait().await;
        }

        // 2. Server
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| DeployerError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
