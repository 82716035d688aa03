//! Concurrent per-frame analysis
//!
//! One task per frame, joined with `join_all` over the task handles in frame
//! order. The join is the only synchronization point: each task owns its own
//! request and result, and slot `i` of the output always belongs to frame `i`
//! no matter which task finishes first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;

use super::{ContentAnalyzer, ContentKind, ContentPayload, Frame, FrameAnalysis, RemoteError};

/// Prefix of the note stored in a failed frame's slot.
pub const FRAME_ERROR_PREFIX: &str = "Error analyzing this frame: ";

/// Drives one [`ContentAnalyzer`] call per frame
pub struct FrameAnalysisFanOut {
    analyzer: Arc<dyn ContentAnalyzer>,
    frame_timeout: Duration,
    limiter: Option<Arc<Semaphore>>,
}

impl FrameAnalysisFanOut {
    #[must_use]
    pub fn new(analyzer: Arc<dyn ContentAnalyzer>, frame_timeout: Duration) -> Self {
        Self {
            analyzer,
            frame_timeout,
            limiter: None,
        }
    }

    /// Bound the number of frames analyzed at once. `0` is treated as `1`.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    /// Analyze every frame concurrently.
    ///
    /// Always returns exactly one [`FrameAnalysis`] per input frame, in input
    /// order. A failure, timeout or panic in one task only marks that slot as
    /// failed; it never cancels or delays the others.
    pub async fn analyze_all(&self, frames: &[Frame]) -> Vec<FrameAnalysis> {
        let started = Instant::now();

        let handles: Vec<_> = frames
            .iter()
            .cloned()
            .map(|frame| {
                tokio::spawn(analyze_frame(
                    Arc::clone(&self.analyzer),
                    frame,
                    self.frame_timeout,
                    self.limiter.clone(),
                ))
            })
            .collect();

        let joined = join_all(handles).await;

        let analyses: Vec<FrameAnalysis> = frames
            .iter()
            .zip(joined)
            .map(|(frame, outcome)| {
                outcome.unwrap_or_else(|join_error| {
                    tracing::error!(frame = frame.index, "Frame analysis task aborted: {join_error}");
                    FrameAnalysis::failed(
                        frame.clone(),
                        format!("{FRAME_ERROR_PREFIX}analysis task aborted"),
                    )
                })
            })
            .collect();

        let failed = analyses.iter().filter(|a| a.failed).count();
        tracing::info!(
            frames = frames.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "All frames analyzed"
        );

        analyses
    }
}

async fn analyze_frame(
    analyzer: Arc<dyn ContentAnalyzer>,
    frame: Frame,
    timeout: Duration,
    limiter: Option<Arc<Semaphore>>,
) -> FrameAnalysis {
    // Queueing for a permit does not count against the frame's deadline.
    let _permit = match limiter {
        Some(semaphore) => semaphore.acquire_owned().await.ok(),
        None => None,
    };

    tracing::debug!(frame = frame.index, "Starting frame analysis");

    match tokio::time::timeout(timeout, request_analysis(analyzer.as_ref(), &frame)).await {
        Ok(Ok(text)) => {
            tracing::debug!(frame = frame.index, "Frame analysis completed");
            FrameAnalysis::succeeded(frame, text)
        }
        Ok(Err(e)) => {
            tracing::warn!(frame = frame.index, "Frame analysis failed: {e}");
            FrameAnalysis::failed(frame, format!("{FRAME_ERROR_PREFIX}{e}"))
        }
        Err(_) => {
            tracing::warn!(frame = frame.index, "Frame analysis timed out");
            FrameAnalysis::failed(
                frame,
                format!(
                    "{FRAME_ERROR_PREFIX}timed out after {}s",
                    timeout.as_secs_f64()
                ),
            )
        }
    }
}

async fn request_analysis(
    analyzer: &dyn ContentAnalyzer,
    frame: &Frame,
) -> Result<String, RemoteError> {
    let payload = ContentPayload::image_from_path(&frame.path).await?;
    analyzer.analyze(&payload, ContentKind::VideoFrame).await
}
