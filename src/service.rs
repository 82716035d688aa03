//! Submission handling
//!
//! Validates one text, image or video submission, runs the matching analysis
//! and hands successful results to the [`ResultStore`]. Failed runs are never
//! persisted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::analyze::{
    AnalysisError, AnalysisResult, ContentAnalyzer, ContentKind, ContentPayload, Stage,
    VideoAnalysisRequest, VideoPipeline,
};
use crate::store::{ResultStore, StoreError};

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "webm"];

/// One piece of content to analyze
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Text(String),
    Image(PathBuf),
    Video {
        path: PathBuf,
        /// `None` uses the pipeline's configured frame count
        frame_count: Option<usize>,
    },
}

impl Submission {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Image(_) => "image",
            Self::Video { .. } => "video",
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("could not save result: {0}")]
    Store(#[from] StoreError),
}

/// A persisted analysis
#[derive(Debug, Clone)]
pub struct Submitted {
    pub id: String,
    pub result: AnalysisResult,
}

/// Reject submissions that cannot be analyzed before any work starts.
pub async fn validate(submission: &Submission) -> Result<(), AnalysisError> {
    match submission {
        Submission::Text(content) => {
            if content.trim().is_empty() {
                return Err(AnalysisError::InvalidInput(
                    "no text content provided".to_string(),
                ));
            }
            Ok(())
        }
        Submission::Image(path) => validate_upload(path, IMAGE_EXTENSIONS).await,
        Submission::Video { path, .. } => validate_upload(path, VIDEO_EXTENSIONS).await,
    }
}

async fn validate_upload(path: &Path, extensions: &[&str]) -> Result<(), AnalysisError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !extensions.contains(&extension.as_str()) {
        return Err(AnalysisError::InvalidInput(format!(
            "unsupported file type {:?} (expected one of: {})",
            path.display().to_string(),
            extensions.join(", ")
        )));
    }

    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        AnalysisError::InvalidInput(format!("cannot read {}: {e}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(AnalysisError::InvalidInput(format!(
            "{} is not a file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(AnalysisError::InvalidInput(format!(
            "{} is empty",
            path.display()
        )));
    }
    if meta.len() > MAX_UPLOAD_BYTES {
        return Err(AnalysisError::InvalidInput(format!(
            "{} is {} bytes, the limit is {MAX_UPLOAD_BYTES}",
            path.display(),
            meta.len()
        )));
    }
    Ok(())
}

/// Entry point for analysis requests
pub struct AnalysisService {
    analyzer: Arc<dyn ContentAnalyzer>,
    pipeline: VideoPipeline,
    store: Arc<dyn ResultStore>,
}

impl AnalysisService {
    #[must_use]
    pub fn new(
        analyzer: Arc<dyn ContentAnalyzer>,
        pipeline: VideoPipeline,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            analyzer,
            pipeline,
            store,
        }
    }

    /// Validate and analyze without persisting.
    pub async fn analyze(&self, submission: &Submission) -> Result<AnalysisResult, AnalysisError> {
        validate(submission).await?;
        tracing::info!(kind = submission.kind(), "Analyzing submission");

        match submission {
            Submission::Text(content) => {
                let analysis = self
                    .single(ContentPayload::Text(content.clone()), ContentKind::Text)
                    .await?;
                Ok(AnalysisResult::Text {
                    content: content.clone(),
                    analysis,
                })
            }
            Submission::Image(path) => {
                let payload = ContentPayload::image_from_path(path).await?;
                let analysis = self.single(payload, ContentKind::Image).await?;
                Ok(AnalysisResult::Image {
                    image_path: path.clone(),
                    analysis,
                })
            }
            Submission::Video { path, frame_count } => {
                let request = VideoAnalysisRequest::new(path.clone()).with_frame_count(
                    frame_count.unwrap_or_else(|| self.pipeline.default_frame_count()),
                );
                Ok(AnalysisResult::Video(self.pipeline.run(&request).await?))
            }
        }
    }

    /// Analyze and persist. Only a completed result reaches the store.
    pub async fn submit(&self, submission: &Submission) -> Result<Submitted, ServiceError> {
        let result = self.analyze(submission).await?;
        let id = self.store.persist(&result).await?;
        Ok(Submitted { id, result })
    }

    async fn single(
        &self,
        payload: ContentPayload,
        kind: ContentKind,
    ) -> Result<String, AnalysisError> {
        self.analyzer
            .analyze(&payload, kind)
            .await
            .map_err(|source| AnalysisError::RemoteServiceFailure {
                stage: Stage::ContentAnalysis,
                source,
            })
    }
}
