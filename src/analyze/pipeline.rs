//! Video pipeline orchestration
//!
//! ```text
//! Start ──┬─ audio:  extract → transcribe → analyze transcript ─┐
//!         └─ frames: sample  → fan-out analyze ─────────────────┴─ AwaitBoth → Synthesize → Done
//! ```
//!
//! The two chains share no data and run concurrently on the same task. The
//! join waits for both to reach a terminal state before any failure is
//! reported, so a fatal error in one chain never cancels the other mid-call.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::process::ProcessRunner;

use super::{
    AnalysisError, AudioAnalysis, AudioExtractor, AudioTrack, ContentAnalyzer, ContentKind,
    ContentPayload, Frame, FrameAnalysis, FrameAnalysisFanOut, FrameSampler, PipelineConfig,
    Result, SpeechToText, Stage, Synthesizer, Transcriber, Transcript, VideoAnalysisRequest,
    VideoAnalysisResult,
};

/// Orchestrator states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    AwaitBoth,
    Synthesize,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::AwaitBoth => "await-both",
            Self::Synthesize => "synthesize",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

fn enter(state: PipelineState, video: &Path) {
    tracing::info!(state = %state, video = %video.display(), "Pipeline state");
}

/// Terminal state of the audio chain
struct AudioOutcome {
    track: Option<AudioTrack>,
    transcript: Option<Transcript>,
    analysis: AudioAnalysis,
}

impl AudioOutcome {
    fn unavailable(reason: String) -> Self {
        Self {
            track: None,
            transcript: None,
            analysis: AudioAnalysis::Unavailable { reason },
        }
    }
}

/// Runs one video through extraction, analysis and synthesis.
///
/// Every collaborator is injected, so a pipeline can be built around mock
/// process runners and analyzers in tests.
pub struct VideoPipeline {
    extractor: AudioExtractor,
    transcriber: Transcriber,
    sampler: FrameSampler,
    fanout: FrameAnalysisFanOut,
    synthesizer: Synthesizer,
    analyzer: Arc<dyn ContentAnalyzer>,
    default_frame_count: usize,
}

impl VideoPipeline {
    #[must_use]
    pub fn new(
        config: &PipelineConfig,
        runner: Arc<dyn ProcessRunner>,
        analyzer: Arc<dyn ContentAnalyzer>,
        speech: Arc<dyn SpeechToText>,
    ) -> Self {
        let mut fanout = FrameAnalysisFanOut::new(Arc::clone(&analyzer), config.frame_timeout);
        if let Some(max) = config.max_concurrent_frames {
            fanout = fanout.with_max_concurrency(max);
        }

        Self {
            extractor: AudioExtractor::new(Arc::clone(&runner), config),
            transcriber: Transcriber::new(speech),
            sampler: FrameSampler::new(runner, config),
            fanout,
            synthesizer: Synthesizer::new(Arc::clone(&analyzer))
                .with_frame_limit(config.synthesis_frame_limit),
            analyzer,
            default_frame_count: config.frame_count,
        }
    }

    #[must_use]
    pub fn default_frame_count(&self) -> usize {
        self.default_frame_count
    }

    /// Analyze `video_path` with `frame_count` sampled frames.
    pub async fn run_video_pipeline(
        &self,
        video_path: &Path,
        frame_count: usize,
    ) -> Result<VideoAnalysisResult> {
        self.run(&VideoAnalysisRequest::new(video_path).with_frame_count(frame_count))
            .await
    }

    /// Run the full pipeline for one request.
    ///
    /// Returns a complete result, possibly with degraded sub-fields, or the
    /// single fatal error that stopped the run. Nothing is persisted here.
    pub async fn run(&self, request: &VideoAnalysisRequest) -> Result<VideoAnalysisResult> {
        let started = Instant::now();
        let video = request.video_path.as_path();

        enter(PipelineState::Start, video);
        let meta = tokio::fs::metadata(video).await.map_err(|e| {
            AnalysisError::InvalidInput(format!("cannot read video {}: {e}", video.display()))
        })?;
        if !meta.is_file() {
            return Err(AnalysisError::InvalidInput(format!(
                "{} is not a file",
                video.display()
            )));
        }

        enter(PipelineState::AwaitBoth, video);
        let (audio, frames) = tokio::join!(
            self.audio_chain(video),
            self.frame_chain(video, request.frame_count)
        );

        // Frames are the core of a video result; report their failure first.
        let (frames, frame_analyses) = frames?;
        let audio = audio?;
        check_alignment(&frames, &frame_analyses)?;

        enter(PipelineState::Synthesize, video);
        let overall_analysis = self
            .synthesizer
            .synthesize(&audio.analysis, &frame_analyses)
            .await;

        enter(PipelineState::Done, video);
        tracing::info!(
            frames = frames.len(),
            failed_frames = frame_analyses.iter().filter(|a| a.failed).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Video analysis complete"
        );

        Ok(VideoAnalysisResult {
            video_path: request.video_path.clone(),
            audio_track: audio.track,
            transcript: audio.transcript,
            audio_analysis: audio.analysis,
            frames,
            frame_analyses,
            overall_analysis,
        })
    }

    /// Extract → transcribe → analyze.
    ///
    /// Extraction failures and transcript analysis failures degrade to an
    /// explicit marker. A transcription failure is returned as fatal.
    async fn audio_chain(&self, video: &Path) -> Result<AudioOutcome> {
        let track = match self.extractor.extract(video).await {
            Ok(track) => track,
            Err(e) => {
                tracing::warn!(stage = %Stage::AudioExtraction, "Continuing without audio: {e}");
                return Ok(AudioOutcome::unavailable(e.to_string()));
            }
        };

        let transcript = self.transcriber.transcribe(&track).await?;

        let analysis = if transcript.empty {
            AudioAnalysis::NoTranscript
        } else {
            match self
                .analyzer
                .analyze(&ContentPayload::Text(transcript.text.clone()), ContentKind::Text)
                .await
            {
                Ok(text) => AudioAnalysis::Analyzed { text },
                Err(e) => {
                    tracing::warn!(stage = %Stage::AudioAnalysis, "Transcript analysis failed: {e}");
                    AudioAnalysis::Unavailable {
                        reason: format!("{} failed: {e}", Stage::AudioAnalysis),
                    }
                }
            }
        };

        Ok(AudioOutcome {
            track: Some(track),
            transcript: Some(transcript),
            analysis,
        })
    }

    /// Sample → fan-out. Sampling failures are fatal.
    async fn frame_chain(
        &self,
        video: &Path,
        frame_count: usize,
    ) -> Result<(Vec<Frame>, Vec<FrameAnalysis>)> {
        let frames = self.sampler.sample(video, frame_count).await?;
        let analyses = self.fanout.analyze_all(&frames).await;
        Ok((frames, analyses))
    }
}

/// Frames and analyses must zip 1:1 by index.
fn check_alignment(frames: &[Frame], analyses: &[FrameAnalysis]) -> Result<()> {
    if frames.len() != analyses.len() {
        return Err(AnalysisError::DataInvariantViolation(format!(
            "{} frames but {} frame analyses",
            frames.len(),
            analyses.len()
        )));
    }

    for (position, (frame, analysis)) in frames.iter().zip(analyses).enumerate() {
        if analysis.frame.index != frame.index {
            return Err(AnalysisError::DataInvariantViolation(format!(
                "slot {position} holds frame {} instead of frame {}",
                analysis.frame.index, frame.index
            )));
        }
    }

    Ok(())
}
