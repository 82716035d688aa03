//! Overall narrative synthesis
//!
//! Merges the audio analysis and the frame analyses into one request for the
//! inference service. Synthesis never fails the pipeline: a remote error
//! degrades to the audio analysis, or to a fixed apology when there is none.

use std::fmt::Write as FmtWrite;
use std::sync::Arc;

use super::{AudioAnalysis, ContentAnalyzer, ContentKind, ContentPayload, FrameAnalysis};

/// Frame analyses embedded verbatim in the synthesis request.
pub const DEFAULT_FRAME_LIMIT: usize = 3;

/// Overall analysis used when synthesis fails and no audio analysis exists.
pub const OVERALL_FALLBACK: &str = "Error generating overall analysis. Please see individual \
frame analyses and audio analysis.";

/// Heading placed above the audio analysis when it stands in for the summary.
pub const AUDIO_FALLBACK_HEADING: &str =
    "Overall analysis unavailable; the audio analysis is shown as the summary.";

/// Combines modality analyses into one overall assessment
pub struct Synthesizer {
    analyzer: Arc<dyn ContentAnalyzer>,
    frame_limit: usize,
}

impl Synthesizer {
    #[must_use]
    pub fn new(analyzer: Arc<dyn ContentAnalyzer>) -> Self {
        Self {
            analyzer,
            frame_limit: DEFAULT_FRAME_LIMIT,
        }
    }

    #[must_use]
    pub fn with_frame_limit(mut self, frame_limit: usize) -> Self {
        self.frame_limit = frame_limit;
        self
    }

    /// Build the synthesis prompt.
    ///
    /// Only the first `frame_limit` frame analyses are embedded; the rest are
    /// counted in a note so the request size stays bounded.
    pub fn build_prompt(
        &self,
        audio: &AudioAnalysis,
        analyses: &[FrameAnalysis],
    ) -> Result<String, std::fmt::Error> {
        let mut prompt = String::from(
            "Based on the following analyses of video frames and audio content, provide a \
             comprehensive assessment of potential deception or truthfulness:\n\n",
        );

        writeln!(prompt, "AUDIO ANALYSIS:\n{}\n", audio.text())?;

        writeln!(prompt, "FRAME ANALYSES:")?;
        if analyses.is_empty() {
            writeln!(prompt, "No frames were analyzed.\n")?;
        }
        for entry in analyses.iter().take(self.frame_limit) {
            let body = if entry.failed {
                "Analysis unavailable for this frame."
            } else {
                entry.analysis.as_str()
            };
            writeln!(
                prompt,
                "Frame {} ({:.1}s):\n{body}\n",
                entry.frame.index, entry.frame.timestamp
            )?;
        }

        let omitted = analyses.len().saturating_sub(self.frame_limit);
        if omitted > 0 {
            writeln!(
                prompt,
                "({omitted} further frame analyses omitted to keep the request small.)\n"
            )?;
        }

        prompt.push_str(
            "Please provide a comprehensive analysis that integrates both the visual cues \
             from the frames and the linguistic patterns from the audio. Focus on consistency \
             between verbal and non-verbal communication, and highlight any potential \
             indicators of deception or truthfulness.",
        );

        Ok(prompt)
    }

    /// Produce the overall analysis. Always returns non-empty text.
    pub async fn synthesize(&self, audio: &AudioAnalysis, analyses: &[FrameAnalysis]) -> String {
        let prompt = match self.build_prompt(audio, analyses) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!("Could not build synthesis prompt: {e}");
                return fallback(audio);
            }
        };

        match self
            .analyzer
            .analyze(&ContentPayload::Text(prompt), ContentKind::Synthesis)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!("Synthesis returned empty text, using fallback");
                fallback(audio)
            }
            Err(e) => {
                tracing::warn!("Synthesis failed, using fallback: {e}");
                fallback(audio)
            }
        }
    }
}

/// Degraded overall analysis.
#[must_use]
pub fn fallback(audio: &AudioAnalysis) -> String {
    match audio.analyzed_text() {
        Some(text) if !text.trim().is_empty() => format!("{AUDIO_FALLBACK_HEADING}\n\n{text}"),
        _ => OVERALL_FALLBACK.to_string(),
    }
}
