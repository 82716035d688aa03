//! Result persistence
//!
//! One JSON document per completed analysis, named by a v4 UUID.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::analyze::AnalysisResult;

/// Errors from the result store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no stored result with id {0}")]
    NotFound(String),

    #[error("invalid result id {0:?}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A persisted analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub result: AnalysisResult,
}

/// Persistence collaborator for finished results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store a result and return its id.
    async fn persist(&self, result: &AnalysisResult) -> Result<String, StoreError>;

    async fn load(&self, id: &str) -> Result<StoredResult, StoreError>;
}

/// Directory of `<id>.json` files
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        // Only canonical UUIDs become file names, so ids cannot escape the directory.
        let uuid = Uuid::parse_str(id).map_err(|_| StoreError::InvalidId(id.to_string()))?;
        Ok(self.dir.join(format!("{}.json", uuid.hyphenated())))
    }
}

#[async_trait]
impl ResultStore for FileStore {
    async fn persist(&self, result: &AnalysisResult) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let record = StoredResult {
            id: id.clone(),
            created_at: Utc::now(),
            result: result.clone(),
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&id)?;
        let json = serde_json::to_vec_pretty(&record)?;
        tokio::fs::write(&path, json).await?;

        tracing::info!(id = %id, kind = result.kind(), "Result saved to {}", path.display());
        Ok(id)
    }

    async fn load(&self, id: &str) -> Result<StoredResult, StoreError> {
        let path = self.path_for(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{AudioAnalysis, Frame, FrameAnalysis, VideoAnalysisResult};

    fn video_result() -> AnalysisResult {
        let frames: Vec<Frame> = (1..=3)
            .map(|index| Frame {
                index,
                path: PathBuf::from(format!("clip-frames/frame-{index}.jpg")),
                timestamp: index as f64 * 7.5,
            })
            .collect();
        let frame_analyses = frames
            .iter()
            .map(|f| FrameAnalysis::succeeded(f.clone(), format!("frame {} looks calm", f.index)))
            .collect();

        AnalysisResult::Video(VideoAnalysisResult {
            video_path: PathBuf::from("clip.mp4"),
            audio_track: None,
            transcript: None,
            audio_analysis: AudioAnalysis::Unavailable {
                reason: "ffmpeg exited with code 1".to_string(),
            },
            frames,
            frame_analyses,
            overall_analysis: "Consistent demeanor.".to_string(),
        })
    }

    #[tokio::test]
    async fn persisted_results_reload_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("results"));
        let result = video_result();

        let id = store.persist(&result).await.unwrap();
        assert!(dir.path().join("results").join(format!("{id}.json")).exists());

        let stored = store.load(&id).await.unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.result, result);
        let AnalysisResult::Video(video) = stored.result else {
            panic!("expected video result");
        };
        let indices: Vec<_> = video.frame_analyses.iter().map(|a| a.frame.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let err = store.load(&Uuid::new_v4().to_string()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn path_like_ids_are_rejected() {
        let store = FileStore::new("/tmp/veracity-results");
        let err = store.load("../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidId(_)));
    }
}
