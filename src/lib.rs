//! `veracity` - deception analysis for text, images and video
//!
//! # Features
//!
//! - **Video pipeline**: audio transcription and evenly sampled frames, analyzed
//!   concurrently and merged into one overall assessment
//! - **Failure isolation**: a failed frame or a silent video degrades the result
//!   instead of aborting it
//! - **Pluggable collaborators**: process runner, inference service and
//!   speech-to-text are traits, so runs can be driven entirely by mocks
//! - **Persistence**: results stored as JSON documents keyed by UUID
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use veracity::analyze::{ContentAnalyzer, OpenAiAnalyzer, VideoPipeline, WhisperApi};
//! use veracity::{Config, TokioProcessRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let analyzer: Arc<dyn ContentAnalyzer> =
//!         Arc::new(OpenAiAnalyzer::new(config.inference_config())?);
//!     let pipeline = VideoPipeline::new(
//!         &config.pipeline_config(),
//!         Arc::new(TokioProcessRunner::new()),
//!         analyzer,
//!         Arc::new(WhisperApi::new(config.whisper_config())?),
//!     );
//!
//!     let result = pipeline.run_video_pipeline("interview.mp4".as_ref(), 7).await?;
//!     println!("{}", result.overall_analysis);
//!     Ok(())
//! }
//! ```

pub mod analyze;
pub mod config;
pub mod process;
pub mod service;
pub mod store;

pub use analyze::{
    AnalysisError, AnalysisResult, PipelineConfig, VideoAnalysisRequest, VideoAnalysisResult,
    VideoPipeline,
};
pub use config::Config;
pub use process::{ProcessRunner, TokioProcessRunner};
pub use service::{AnalysisService, Submission};
pub use store::{FileStore, ResultStore, StoredResult};

/// Version of veracity
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
