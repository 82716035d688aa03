//! Multimodal deception analysis pipeline
//!
//! Turns a video file into a single assessment:
//! - Audio demux and speech-to-text transcription
//! - Evenly spaced frame sampling via ffprobe/ffmpeg
//! - Concurrent per-frame analysis with per-frame failure isolation
//! - Synthesis of audio and frame analyses into one overall narrative

pub mod content;
pub mod extract;
pub mod fanout;
pub mod pipeline;
pub mod report;
pub mod synthesize;
pub mod transcribe;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::process::{resolve_tool, ProcessError};

pub use content::{ContentAnalyzer, ContentKind, ContentPayload, InferenceConfig, OpenAiAnalyzer};
pub use extract::{sample_timestamps, AudioExtractor, FrameSampler};
pub use fanout::FrameAnalysisFanOut;
pub use pipeline::{PipelineState, VideoPipeline};
pub use report::{extract_confidence, AnalysisReport, Confidence, ReportFormat};
pub use synthesize::Synthesizer;
pub use transcribe::{SpeechToText, Transcriber, WhisperApi, WhisperConfig};

/// Frames sampled per video unless the caller asks otherwise.
pub const DEFAULT_FRAME_COUNT: usize = 7;

/// Audio analysis text used when the transcript is empty.
pub const NO_TRANSCRIPT_PLACEHOLDER: &str = "No audio transcript available for analysis.";

/// Pipeline stage, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AudioExtraction,
    Transcription,
    AudioAnalysis,
    FrameSampling,
    FrameAnalysis,
    Synthesis,
    ContentAnalysis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AudioExtraction => "audio extraction",
            Self::Transcription => "transcription",
            Self::AudioAnalysis => "audio analysis",
            Self::FrameSampling => "frame sampling",
            Self::FrameAnalysis => "frame analysis",
            Self::Synthesis => "synthesis",
            Self::ContentAnalysis => "content analysis",
        };
        f.write_str(name)
    }
}

/// Failures of a remote inference or transcription endpoint
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Whether a retry has a reasonable chance of succeeding.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Pipeline errors surfaced at the orchestrator boundary
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("{stage} failed: {source}")]
    ToolFailure {
        stage: Stage,
        #[source]
        source: ProcessError,
    },

    #[error("{stage} failed: unexpected tool output: {message}")]
    ToolOutput { stage: Stage, message: String },

    #[error("{stage} failed: {source}")]
    RemoteServiceFailure {
        stage: Stage,
        #[source]
        source: RemoteError,
    },

    #[error("data invariant violated: {0}")]
    DataInvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Format error: {0}")]
    Format(#[from] std::fmt::Error),
}

impl AnalysisError {
    /// Stage the failure is attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::ToolFailure { stage, .. }
            | Self::ToolOutput { stage, .. }
            | Self::RemoteServiceFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// True for external tool failures (non-zero exit, timeout, unusable output).
    #[must_use]
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, Self::ToolFailure { .. } | Self::ToolOutput { .. })
    }

    /// True for inference/transcription endpoint failures.
    #[must_use]
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, Self::RemoteServiceFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// One video submitted for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoAnalysisRequest {
    pub video_path: PathBuf,
    pub frame_count: usize,
}

impl VideoAnalysisRequest {
    pub fn new(video_path: impl Into<PathBuf>) -> Self {
        Self {
            video_path: video_path.into(),
            frame_count: DEFAULT_FRAME_COUNT,
        }
    }

    #[must_use]
    pub fn with_frame_count(mut self, frame_count: usize) -> Self {
        self.frame_count = frame_count;
        self
    }
}

/// A still image dumped from the video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// 1-based position in timestamp order
    pub index: usize,
    /// Path to the dumped image
    pub path: PathBuf,
    /// Offset into the video in seconds
    pub timestamp: f64,
}

/// Analysis of one frame. Exactly one exists per sampled [`Frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub frame: Frame,
    pub analysis: String,
    #[serde(default)]
    pub failed: bool,
}

impl FrameAnalysis {
    #[must_use]
    pub fn succeeded(frame: Frame, analysis: String) -> Self {
        Self {
            frame,
            analysis,
            failed: false,
        }
    }

    #[must_use]
    pub fn failed(frame: Frame, note: String) -> Self {
        Self {
            frame,
            analysis: note,
            failed: true,
        }
    }
}

/// Audio demuxed from a video. `present == false` is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub source_video: PathBuf,
    pub audio_path: PathBuf,
    pub present: bool,
}

impl AudioTrack {
    #[must_use]
    pub fn present(source_video: &Path, audio_path: PathBuf) -> Self {
        Self {
            source_video: source_video.to_path_buf(),
            audio_path,
            present: true,
        }
    }

    #[must_use]
    pub fn absent(source_video: &Path, audio_path: PathBuf) -> Self {
        Self {
            source_video: source_video.to_path_buf(),
            audio_path,
            present: false,
        }
    }
}

/// Speech-to-text output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub empty: bool,
}

impl Transcript {
    #[must_use]
    pub fn new(text: String) -> Self {
        let empty = text.trim().is_empty();
        Self { text, empty }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            empty: true,
        }
    }
}

/// Outcome of the audio sub-chain as seen by synthesis and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AudioAnalysis {
    /// The transcript was analyzed.
    Analyzed { text: String },
    /// No speech: silent video or empty transcript.
    NoTranscript,
    /// The audio chain degraded; `reason` says why.
    Unavailable { reason: String },
}

impl AudioAnalysis {
    /// Human-readable text: the analysis itself or an explicit placeholder.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Analyzed { text } => text.clone(),
            Self::NoTranscript => NO_TRANSCRIPT_PLACEHOLDER.to_string(),
            Self::Unavailable { reason } => format!("No audio available: {reason}"),
        }
    }

    #[must_use]
    pub fn analyzed_text(&self) -> Option<&str> {
        match self {
            Self::Analyzed { text } => Some(text),
            _ => None,
        }
    }
}

/// Terminal aggregate of one video pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalysisResult {
    pub video_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_track: Option<AudioTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Transcript>,
    pub audio_analysis: AudioAnalysis,
    pub frames: Vec<Frame>,
    /// Same length and order as `frames`
    pub frame_analyses: Vec<FrameAnalysis>,
    pub overall_analysis: String,
}

impl VideoAnalysisResult {
    pub fn failed_frames(&self) -> impl Iterator<Item = &FrameAnalysis> {
        self.frame_analyses.iter().filter(|a| a.failed)
    }
}

/// Result of any submission, tagged by content class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnalysisResult {
    Text {
        content: String,
        analysis: String,
    },
    Image {
        image_path: PathBuf,
        analysis: String,
    },
    Video(VideoAnalysisResult),
}

impl AnalysisResult {
    /// The headline analysis: the overall narrative for videos.
    #[must_use]
    pub fn summary(&self) -> &str {
        match self {
            Self::Text { analysis, .. } | Self::Image { analysis, .. } => analysis,
            Self::Video(video) => &video.overall_analysis,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Video(_) => "video",
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frames sampled when the request does not say otherwise
    pub frame_count: usize,
    /// ffmpeg binary
    pub ffmpeg: String,
    /// ffprobe binary
    pub ffprobe: String,
    /// Deadline for short tool calls (probes, single-frame dumps)
    pub tool_timeout: Duration,
    /// Deadline for tool calls that scale with video length (audio demux)
    pub video_timeout: Duration,
    /// Deadline for one frame's remote analysis
    pub frame_timeout: Duration,
    /// Upper bound on concurrent frame analyses (`None` = one task per frame)
    pub max_concurrent_frames: Option<usize>,
    /// Frame analyses embedded verbatim in the synthesis request
    pub synthesis_frame_limit: usize,
    /// Where extracted audio and frames go (`None` = next to the video)
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            ffmpeg: resolve_tool(None, "ffmpeg"),
            ffprobe: resolve_tool(None, "ffprobe"),
            tool_timeout: Duration::from_secs(60),
            video_timeout: Duration::from_secs(600),
            frame_timeout: Duration::from_secs(120),
            max_concurrent_frames: None,
            synthesis_frame_limit: synthesize::DEFAULT_FRAME_LIMIT,
            work_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: usize) -> Frame {
        Frame {
            index,
            path: PathBuf::from(format!("/tmp/clip-frames/frame-{index}.jpg")),
            timestamp: index as f64 * 7.5,
        }
    }

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.frame_count, 7);
        assert_eq!(config.synthesis_frame_limit, 3);
        assert!(config.max_concurrent_frames.is_none());
        assert!(config.tool_timeout < config.video_timeout);
    }

    #[test]
    fn request_defaults_to_seven_frames() {
        let request = VideoAnalysisRequest::new("/uploads/clip.mp4");
        assert_eq!(request.frame_count, DEFAULT_FRAME_COUNT);
        assert_eq!(request.with_frame_count(3).frame_count, 3);
    }

    #[test]
    fn whitespace_transcript_is_empty() {
        assert!(Transcript::new("  \n ".to_string()).empty);
        assert!(!Transcript::new("I was home all night".to_string()).empty);
    }

    #[test]
    fn audio_placeholders_are_never_blank() {
        assert_eq!(AudioAnalysis::NoTranscript.text(), NO_TRANSCRIPT_PLACEHOLDER);
        let degraded = AudioAnalysis::Unavailable {
            reason: "ffmpeg exited with code 1".to_string(),
        };
        assert!(degraded.text().starts_with("No audio available"));
        assert!(degraded.analyzed_text().is_none());
    }

    #[test]
    fn transient_remote_errors() {
        let throttled = RemoteError::Status {
            status: 429,
            body: String::new(),
        };
        let bad_request = RemoteError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(throttled.is_transient());
        assert!(!bad_request.is_transient());
        assert!(RemoteError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn error_reports_its_stage() {
        let err = AnalysisError::RemoteServiceFailure {
            stage: Stage::Transcription,
            source: RemoteError::Timeout(Duration::from_secs(600)),
        };
        assert_eq!(err.stage(), Some(Stage::Transcription));
        assert!(err.is_remote_failure());
        assert!(err.to_string().starts_with("transcription failed"));
    }

    #[test]
    fn test_result_serialization() {
        let result = AnalysisResult::Video(VideoAnalysisResult {
            video_path: PathBuf::from("/uploads/clip.mp4"),
            audio_track: None,
            transcript: Some(Transcript::empty()),
            audio_analysis: AudioAnalysis::NoTranscript,
            frames: vec![frame(1)],
            frame_analyses: vec![FrameAnalysis::failed(
                frame(1),
                "Error analyzing this frame: quota".to_string(),
            )],
            overall_analysis: "Mostly consistent demeanor".to_string(),
        });

        let json = serde_json::to_string_pretty(&result).unwrap();
        assert!(json.contains("\"type\": \"video\""));
        assert!(json.contains("\"status\": \"no_transcript\""));
        assert!(json.contains("\"failed\": true"));

        let back: AnalysisResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.summary(), "Mostly consistent demeanor");
    }
}
