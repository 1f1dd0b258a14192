use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::server::rest::error::{ApiError, ApiResult};
use crate::server::rest::middleware::AuthContext;
use crate::shared::models::{AppState, Event};

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    pub limit: Option<i64>,
    pub before_id: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
    pub id: i64,
    pub kind: String,
    pub subject_id: Option<String>,
    pub target_id: Option<String>,
    pub attributes: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventListResponse {
    pub events: Vec<EventResponse>,
}

/// Admin read of the orchestration journal, newest first.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListEventsQuery>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<EventListResponse>> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    let events = Event::list(&state.db, query.limit.unwrap_or(100), query.before_id)
        .await?
        .into_iter()
        .map(|event| EventResponse {
            id: event.id,
            kind: event.kind,
            subject_id: event.subject_id,
            target_id: event.target_id,
            attributes: serde_json::from_str(&event.attributes)
                .unwrap_or(serde_json::Value::Null),
            created_at: event.created_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(EventListResponse { events }))
}
