//! Artifact storage
//!
//! Recordings, isolated stems and serialized feature sequences are referred
//! to by opaque string references. The filesystem store keeps them under the
//! service root folder (`recordings/`, `stems/`, `features/`); absolute paths
//! are accepted as references so callers can point at files they own.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::models::FeatureSequence;

pub const RECORDINGS_DIR: &str = "recordings";
pub const STEMS_DIR: &str = "stems";
pub const FEATURES_DIR: &str = "features";

/// Resolves and stores pipeline artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Local path of an artifact reference
    fn resolve(&self, reference: &str) -> Result<PathBuf, AnalysisError>;

    /// Empty scratch directory for a job (created, previous content removed)
    async fn work_dir(&self, namespace: &str, job_id: Uuid) -> Result<PathBuf, AnalysisError>;

    /// Copy `source` into `namespace/name`, returning its reference
    async fn store_file(&self, namespace: &str, name: &str, source: &Path) -> Result<String, AnalysisError>;

    /// Serialize a feature sequence for a reference
    async fn write_features(&self, reference_id: Uuid, features: &FeatureSequence) -> Result<String, AnalysisError>;

    async fn read_features(&self, reference: &str) -> Result<FeatureSequence, AnalysisError>;
}

/// Artifact store rooted in a local directory
#[derive(Debug, Clone)]
pub struct FilesystemArtifactStore {
    root: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the namespace directories
    pub async fn ensure_layout(&self) -> Result<(), AnalysisError> {
        for dir in [RECORDINGS_DIR, STEMS_DIR, FEATURES_DIR] {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    fn relative_reference(namespace: &str, name: &str) -> Result<String, AnalysisError> {
        let reference = format!("{}/{}", namespace, name);
        check_relative(Path::new(&reference))?;
        Ok(reference)
    }
}

fn check_relative(path: &Path) -> Result<(), AnalysisError> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(AnalysisError::Pipeline(format!(
            "Artifact reference escapes the store: {}",
            path.display()
        )));
    }
    Ok(())
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    fn resolve(&self, reference: &str) -> Result<PathBuf, AnalysisError> {
        if reference.trim().is_empty() {
            return Err(AnalysisError::Pipeline("Empty artifact reference".to_string()));
        }

        let path = Path::new(reference);
        if path.is_absolute() {
            if path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(AnalysisError::Pipeline(format!(
                    "Artifact reference escapes the store: {}",
                    reference
                )));
            }
            return Ok(path.to_path_buf());
        }

        check_relative(path)?;
        Ok(self.root.join(path))
    }

    async fn work_dir(&self, namespace: &str, job_id: Uuid) -> Result<PathBuf, AnalysisError> {
        let reference = Self::relative_reference(namespace, &format!("{}.work", job_id))?;
        let dir = self.root.join(reference);
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn store_file(&self, namespace: &str, name: &str, source: &Path) -> Result<String, AnalysisError> {
        let reference = Self::relative_reference(namespace, name)?;
        let destination = self.root.join(&reference);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if destination != source {
            tokio::fs::copy(source, &destination).await?;
        }
        Ok(reference)
    }

    async fn write_features(&self, reference_id: Uuid, features: &FeatureSequence) -> Result<String, AnalysisError> {
        let reference = Self::relative_reference(FEATURES_DIR, &format!("{}.json", reference_id))?;
        let destination = self.root.join(&reference);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec(features)
            .map_err(|e| AnalysisError::Pipeline(format!("Failed to serialize features: {}", e)))?;

        let tmp_path = destination.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &destination).await?;
        Ok(reference)
    }

    async fn read_features(&self, reference: &str) -> Result<FeatureSequence, AnalysisError> {
        let path = self.resolve(reference)?;
        let bytes = tokio::fs::read(&path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AnalysisError::Pipeline(format!("Corrupt feature artifact {}: {}", reference, e)))
    }
}
