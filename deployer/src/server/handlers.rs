//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use callable_api::{
    CallableErrorBody, CallableErrorResponse, CallableRequest, CallableResponse, DeployRequest,
    DeployResponse, HealthResponse, VersionResponse,
};
use tracing::{debug, error};

use crate::errors::{CallableError, ErrorKind};
use crate::server::state::ServerState;
use crate::utils::version_info;

impl IntoResponse for CallableError {
    fn into_response(self) -> Response {
        let body = CallableErrorResponse {
            error: CallableErrorBody {
                status: self.kind.canonical_status().to_string(),
                message: self.message,
            },
        };
        (self.kind.http_status(), Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "agent-deployer".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Deploy handler for the callable protocol
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallableResponse<DeployResponse>>, CallableError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let caller = state
        .verifier
        .caller_from_header(authorization)
        .map_err(CallableError::from)?;

    let request: CallableRequest<DeployRequest> = serde_json::from_slice(&body).map_err(|e| {
        debug!("Rejected deploy request body: {}", e);
        CallableError::invalid_argument("Request must be {\"data\": {\"agentId\": string}}")
    })?;

    // Run detached so a disconnecting caller does not abort the deployment
    let orchestrator = state.orchestrator.clone();
    let cancel = state.cancel.child_token();
    let agent_id = request.data.agent_id;
    let task = state.tasks.spawn(async move {
        orchestrator
            .deploy(caller.as_ref(), &agent_id, &cancel)
            .await
    });

    let outcome = task.await.map_err(|e| {
        error!("Deployment task failed: {}", e);
        CallableError::new(ErrorKind::Internal, "Deployment failed: task aborted")
    })??;

    Ok(Json(CallableResponse {
        result: DeployResponse {
            success: outcome.success,
            agent_id: outcome.agent_id,
            deployment_name: outcome.deployment_name,
        },
    }))
}
