use axum::{
    extract::{Extension, Multipart, Path, State},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::builder::BuiltImage;
use crate::server::rest::error::{ApiError, ApiResult};
use crate::server::rest::middleware::AuthContext;
use crate::shared::models::{AppState, Exercise, ExerciseLevel, ExerciseProgress};

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub image: BuiltImage,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExerciseSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub level: ExerciseLevel,
    pub metadata: serde_json::Value,
    /// not_started, in_progress or completed for the calling subject
    pub status: String,
    pub attempts: i64,
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExerciseListResponse {
    pub exercises: Vec<ExerciseSummary>,
}

/// Admin upload of an exercise bundle; builds the image and records the
/// catalog entry.
pub async fn upload_exercise(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    let uploads_dir = state.config.work_dir.join("uploads");
    tokio::fs::create_dir_all(&uploads_dir)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Cannot create upload dir: {e}")))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some("exercise") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("Upload is missing a filename".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?;

        let upload_path = uploads_dir.join(format!("{}-{}", Uuid::new_v4(), filename));
        tokio::fs::write(&upload_path, &bytes)
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("Cannot store upload: {e}")))?;

        let (_, image) = state
            .builder
            .build_from_archive(&upload_path, &auth.subject)
            .await?;

        return Ok(Json(UploadResponse { image }));
    }

    Err(ApiError::BadRequest(
        "Multipart field 'exercise' is required".to_string(),
    ))
}

/// Catalog listing with per-subject progress folded in.
pub async fn list_exercises(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ExerciseListResponse>> {
    let exercises = Exercise::find_all(&state.db).await?;
    let progress: HashMap<String, ExerciseProgress> =
        ExerciseProgress::list_for_subject(&state.db, &auth.subject)
            .await?
            .into_iter()
            .map(|p| (p.exercise_id.clone(), p))
            .collect();

    let exercises = exercises
        .into_iter()
        .map(|exercise| {
            let (status, attempts) = match progress.get(&exercise.id) {
                Some(p) => (p.status.as_str().to_string(), p.attempts),
                None => ("not_started".to_string(), 0),
            };
            ExerciseSummary {
                metadata: exercise.metadata_value(),
                id: exercise.id,
                name: exercise.name,
                version: exercise.version,
                description: exercise.description,
                level: exercise.level,
                status,
                attempts,
                created_at: exercise.created_at.to_rfc3339(),
            }
        })
        .collect();

    Ok(Json(ExerciseListResponse { exercises }))
}

/// Admin delete of a catalog entry and its image.
pub async fn delete_exercise(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    let exercise = Exercise::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Exercise not found".to_string()))?;

    state.builder.delete_exercise(&exercise, &auth.subject).await?;

    Ok(Json(serde_json::json!({ "success": true })))
}
