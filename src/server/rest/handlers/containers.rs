use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;

use crate::orchestrator::OrchestratorError;
use crate::server::rest::error::{ApiError, ApiResult};
use crate::server::rest::middleware::AuthContext;
use crate::shared::models::{AppState, ContainerRecord, ContainerStatus};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LaunchResponse {
    pub container_id: String,
    /// `<uuid>.<base-domain>`
    pub subdomain: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContainerResponse {
    pub id: String,
    pub exercise_id: String,
    pub subject_id: String,
    pub subdomain: String,
    pub url: String,
    pub status: ContainerStatus,
    pub created_at: String,
    pub last_activity: String,
}

impl ContainerResponse {
    fn from_record(record: ContainerRecord, state: &AppState) -> Self {
        Self {
            url: format!("http://{}", state.config.sandbox_host(&record.subdomain)),
            id: record.id,
            exercise_id: record.exercise_id,
            subject_id: record.subject_id,
            subdomain: record.subdomain,
            status: record.status,
            created_at: record.created_at.to_rfc3339(),
            last_activity: record.last_activity.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContainerListResponse {
    pub containers: Vec<ContainerResponse>,
}

/// Launch a sandbox for the calling subject.
pub async fn launch_container(
    State(state): State<Arc<AppState>>,
    Path(exercise_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<LaunchResponse>> {
    let launched = state
        .orchestrator
        .clone()
        .launch(&auth.subject, &exercise_id)
        .await?;

    Ok(Json(LaunchResponse {
        container_id: launched.container_id,
        subdomain: state.config.sandbox_host(&launched.subdomain),
    }))
}

/// The calling subject's running containers.
pub async fn list_containers(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ContainerListResponse>> {
    let containers = ContainerRecord::list_running_by_subject(&state.db, &auth.subject)
        .await?
        .into_iter()
        .map(|record| ContainerResponse::from_record(record, &state))
        .collect();

    Ok(Json(ContainerListResponse { containers }))
}

/// Owner-initiated stop.
pub async fn stop_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    state.orchestrator.stop_owned(&auth.subject, &id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Completion callback, called from inside the sandbox; unauthenticated.
pub async fn complete_container(
    State(state): State<Arc<AppState>>,
    Path(subdomain): Path<String>,
    payload: Option<Json<serde_json::Value>>,
) -> ApiResult<Json<serde_json::Value>> {
    let payload = payload.map(|Json(v)| v).unwrap_or_default();

    match state.orchestrator.complete(&subdomain, payload).await {
        Ok(()) => Ok(Json(serde_json::json!({ "success": true }))),
        Err(OrchestratorError::NotFound) => {
            Err(ApiError::NotFound("Container not found".to_string()))
        }
        Err(e) => {
            warn!(subdomain = %subdomain, "Completion callback failed: {}", e);
            Err(ApiError::Internal(anyhow::anyhow!(e)))
        }
    }
}

/// Admin list of all running containers.
pub async fn admin_list_containers(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ContainerListResponse>> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    let containers = ContainerRecord::list_running(&state.db)
        .await?
        .into_iter()
        .map(|record| ContainerResponse::from_record(record, &state))
        .collect();

    Ok(Json(ContainerListResponse { containers }))
}

/// Admin force-stop of any container.
pub async fn admin_stop_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    state.orchestrator.stop_any(&id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
