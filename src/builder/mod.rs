use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::docker::{RuntimeClient, RuntimeError};
use crate::orchestrator::EventJournal;
use crate::shared::models::{EventKind, Exercise, ExerciseLevel, NewExercise};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid exercise bundle: {0}")]
    InvalidBundle(String),
    #[error("image build failed: {0}")]
    BuildFailed(String),
    #[error("container runtime unavailable: {0}")]
    Runtime(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Validated contents of a bundle's `metadata.json`. Unknown keys survive in
/// `raw` and are stored verbatim.
#[derive(Debug, Clone)]
pub struct BundleMetadata {
    pub title: String,
    pub version: String,
    pub description: String,
    pub level: ExerciseLevel,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct BuiltImage {
    pub name: String,
    pub version: String,
    pub tag: String,
}

/// Lowercase the title and collapse whitespace runs into single dashes.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

pub fn image_tag_for(title: &str, version: &str) -> String {
    format!("training/{}:{}", slugify(title), version)
}

/// Parse and validate `metadata.json`. Only the four required fields are
/// interpreted; everything else is carried along untouched.
pub fn parse_metadata(raw: &str) -> Result<BundleMetadata, BuildError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| BuildError::InvalidBundle(format!("metadata.json is not valid JSON: {e}")))?;

    let object = value
        .as_object()
        .ok_or_else(|| BuildError::InvalidBundle("metadata.json must be a JSON object".into()))?;

    let title = object
        .get("title")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| BuildError::InvalidBundle("metadata.json requires a non-empty 'title'".into()))?
        .to_string();

    let description = object
        .get("description")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BuildError::InvalidBundle("metadata.json requires 'description'".into()))?
        .to_string();

    let level_raw = object
        .get("level")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BuildError::InvalidBundle("metadata.json requires 'level'".into()))?;
    let level = ExerciseLevel::parse(level_raw).ok_or_else(|| {
        BuildError::InvalidBundle(format!(
            "invalid level '{level_raw}': expected beginner, intermediate or advanced"
        ))
    })?;

    let version = match object.get("version") {
        None => "latest".to_string(),
        Some(v) => v
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BuildError::InvalidBundle("'version' must be a string".into()))?,
    };

    if let Some(goals) = object.get("goals") {
        let entries = goals
            .as_array()
            .ok_or_else(|| BuildError::InvalidBundle("'goals' must be an array".into()))?;
        for (i, goal) in entries.iter().enumerate() {
            let goal = goal.as_object().ok_or_else(|| {
                BuildError::InvalidBundle(format!("goal #{i} must be an object"))
            })?;
            if !goal.contains_key("id") || !goal.contains_key("description") {
                return Err(BuildError::InvalidBundle(format!(
                    "goal #{i} requires 'id' and 'description'"
                )));
            }
        }
    }

    Ok(BundleMetadata {
        title,
        version,
        description,
        level,
        raw: value,
    })
}

/// Staging directory that cleans itself up on every exit path.
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    fn create(root: &Path) -> std::io::Result<Self> {
        let path = root.join(format!("stage-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("Failed to remove staging directory {:?}: {}", self.path, e);
        }
    }
}

/// Extract a bundle archive into `dest`. Entries escaping the destination
/// fail the whole bundle.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(), BuildError> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if name.ends_with(".zip") {
        extract_zip(archive, dest)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let file = std::fs::File::open(archive)?;
        extract_tar(flate2::read::GzDecoder::new(file), dest)
    } else if name.ends_with(".tar") {
        let file = std::fs::File::open(archive)?;
        extract_tar(file, dest)
    } else {
        Err(BuildError::InvalidBundle(format!(
            "unsupported archive type: {name:?} (expected .zip, .tar, .tar.gz or .tgz)"
        )))
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), BuildError> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| BuildError::InvalidBundle(format!("unreadable zip archive: {e}")))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| BuildError::InvalidBundle(format!("corrupt zip entry: {e}")))?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            BuildError::InvalidBundle(format!("zip entry escapes the archive root: {}", entry.name()))
        })?;
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&target)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }
    Ok(())
}

fn extract_tar<R: std::io::Read>(reader: R, dest: &Path) -> Result<(), BuildError> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| BuildError::InvalidBundle(format!("unreadable tar archive: {e}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| BuildError::InvalidBundle(format!("corrupt tar entry: {e}")))?;
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| BuildError::InvalidBundle(format!("cannot unpack tar entry: {e}")))?;
        if !unpacked {
            return Err(BuildError::InvalidBundle(
                "tar entry escapes the archive root".into(),
            ));
        }
    }
    Ok(())
}

/// Gzipped tar of the staging root, handed to the runtime as build context.
fn build_context(root: &Path) -> Result<Vec<u8>, BuildError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", root)?;
    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Builds catalog images from uploaded bundles.
pub struct ImageBuilder {
    db: SqlitePool,
    runtime: Arc<RuntimeClient>,
    journal: EventJournal,
    work_dir: PathBuf,
}

impl ImageBuilder {
    pub fn new(
        db: SqlitePool,
        runtime: Arc<RuntimeClient>,
        journal: EventJournal,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            runtime,
            journal,
            work_dir,
        }
    }

    /// Build an exercise image from an uploaded archive and record it in the
    /// catalog. The upload and all staging files are removed on every exit
    /// path.
    pub async fn build_from_archive(
        &self,
        archive: &Path,
        built_by: &str,
    ) -> Result<(Exercise, BuiltImage), BuildError> {
        let result = self.build_inner(archive, built_by).await;
        if let Err(e) = tokio::fs::remove_file(archive).await {
            warn!("Failed to remove upload {:?}: {}", archive, e);
        }
        result
    }

    async fn build_inner(
        &self,
        archive: &Path,
        built_by: &str,
    ) -> Result<(Exercise, BuiltImage), BuildError> {
        let staging = StagingDir::create(&self.work_dir)?;

        let archive_path = archive.to_path_buf();
        let stage_path = staging.path().to_path_buf();
        tokio::task::spawn_blocking(move || extract_archive(&archive_path, &stage_path))
            .await
            .map_err(|e| BuildError::Io(std::io::Error::other(e)))??;

        if !staging.path().join("Dockerfile").is_file() {
            return Err(BuildError::InvalidBundle(
                "bundle must contain a Dockerfile at the archive root".into(),
            ));
        }
        let metadata_path = staging.path().join("metadata.json");
        if !metadata_path.is_file() {
            return Err(BuildError::InvalidBundle(
                "bundle must contain metadata.json at the archive root".into(),
            ));
        }

        let metadata = parse_metadata(&tokio::fs::read_to_string(&metadata_path).await?)?;
        let tag = image_tag_for(&metadata.title, &metadata.version);

        let stage_path = staging.path().to_path_buf();
        let context = tokio::task::spawn_blocking(move || build_context(&stage_path))
            .await
            .map_err(|e| BuildError::Io(std::io::Error::other(e)))??;

        self.runtime
            .build_image(&tag, context)
            .await
            .map_err(|e| match e {
                RuntimeError::Build(msg) => BuildError::BuildFailed(msg),
                RuntimeError::Unavailable(msg) => BuildError::Runtime(msg),
                other => BuildError::BuildFailed(other.to_string()),
            })?;

        let exercise = Exercise::upsert(
            &self.db,
            NewExercise {
                name: metadata.title.clone(),
                version: metadata.version.clone(),
                description: metadata.description.clone(),
                level: metadata.level,
                image_tag: tag.clone(),
                metadata: metadata.raw.to_string(),
            },
        )
        .await?;

        self.journal.record(
            EventKind::ImageBuilt,
            Some(built_by.to_string()),
            Some(exercise.id.clone()),
            serde_json::json!({
                "tag": tag,
                "name": metadata.title,
                "version": metadata.version,
            }),
        );

        info!("Built exercise image {} ({})", exercise.name, tag);

        Ok((
            exercise,
            BuiltImage {
                name: metadata.title,
                version: metadata.version,
                tag,
            },
        ))
    }

    /// Remove an exercise from the catalog along with its image.
    pub async fn delete_exercise(
        &self,
        exercise: &Exercise,
        deleted_by: &str,
    ) -> Result<(), BuildError> {
        if let Err(e) = self.runtime.remove_image(&exercise.image_tag).await {
            warn!("Failed to remove image {}: {}", exercise.image_tag, e);
        }
        Exercise::delete(&self.db, &exercise.id).await?;

        self.journal.record(
            EventKind::ImageDeleted,
            Some(deleted_by.to_string()),
            Some(exercise.id.clone()),
            serde_json::json!({ "tag": exercise.image_tag }),
        );
        Ok(())
    }
}
