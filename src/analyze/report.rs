//! Analysis report generation
//!
//! Generates human-readable reports from analysis results.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use std::path::Path;

use super::{AnalysisResult, FrameAnalysis, Result, VideoAnalysisResult};

/// Report output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// JSON (default, machine-readable)
    #[default]
    Json,
    /// Markdown (human-readable)
    Markdown,
}

/// Confidence percentage range stated in analysis prose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confidence {
    pub low: u8,
    pub high: u8,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.low == self.high {
            write!(f, "{}%", self.low)
        } else {
            write!(f, "{}-{}%", self.low, self.high)
        }
    }
}

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3})\s*%?\s*(?:-|–|to)\s*(\d{1,3})\s*%").expect("valid range regex")
});

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3})\s*%").expect("valid percent regex"));

/// Parse a confidence figure ("70-80%", "65 to 75 %", "90%") out of free text.
///
/// `None` means the text states no usable figure; callers should show the
/// confidence as unknown.
#[must_use]
pub fn extract_confidence(text: &str) -> Option<Confidence> {
    let percent = |s: &str| s.parse::<u8>().ok().filter(|v| *v <= 100);

    if let Some(caps) = RANGE_RE.captures(text) {
        if let (Some(a), Some(b)) = (percent(&caps[1]), percent(&caps[2])) {
            return Some(Confidence {
                low: a.min(b),
                high: a.max(b),
            });
        }
    }

    PERCENT_RE
        .captures_iter(text)
        .find_map(|caps| percent(&caps[1]))
        .map(|value| Confidence {
            low: value,
            high: value,
        })
}

/// Analysis report generator
pub struct AnalysisReport;

impl AnalysisReport {
    /// Generate report in specified format
    pub fn generate(result: &AnalysisResult, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Json => Ok(serde_json::to_string_pretty(result)?),
            ReportFormat::Markdown => Self::to_markdown(result),
        }
    }

    /// Save report to file
    pub fn save(result: &AnalysisResult, format: ReportFormat, path: &Path) -> Result<()> {
        let content = Self::generate(result, format)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn to_markdown(result: &AnalysisResult) -> Result<String> {
        let mut md = String::new();

        match result {
            AnalysisResult::Text { content, analysis } => {
                writeln!(md, "# Text Analysis Report\n")?;
                writeln!(md, "## Submitted Text\n")?;
                for line in content.lines() {
                    writeln!(md, "> {line}")?;
                }
                writeln!(md)?;
                Self::write_assessment(&mut md, analysis)?;
            }
            AnalysisResult::Image {
                image_path,
                analysis,
            } => {
                writeln!(md, "# Image Analysis Report\n")?;
                writeln!(md, "- **Image**: `{}`\n", image_path.display())?;
                Self::write_assessment(&mut md, analysis)?;
            }
            AnalysisResult::Video(video) => Self::video_markdown(&mut md, video)?,
        }

        Ok(md)
    }

    fn video_markdown(md: &mut String, video: &VideoAnalysisResult) -> Result<()> {
        writeln!(md, "# Video Analysis Report\n")?;

        writeln!(md, "## Summary\n")?;
        writeln!(md, "- **Video**: `{}`", video.video_path.display())?;
        writeln!(md, "- **Frames Analyzed**: {}", video.frames.len())?;
        let failed = video.failed_frames().count();
        if failed > 0 {
            writeln!(md, "- **Frames Unavailable**: {failed}")?;
        }
        let audio = match &video.audio_track {
            Some(track) if track.present => "present",
            Some(_) => "none",
            None => "unavailable",
        };
        writeln!(md, "- **Audio Track**: {audio}\n")?;

        Self::write_assessment(md, &video.overall_analysis)?;

        writeln!(md, "## Audio Analysis\n")?;
        writeln!(md, "{}\n", video.audio_analysis.text())?;

        if let Some(transcript) = video.transcript.as_ref().filter(|t| !t.empty) {
            writeln!(md, "### Transcript\n")?;
            for line in transcript.text.lines() {
                writeln!(md, "> {line}")?;
            }
            writeln!(md)?;
        }

        writeln!(md, "## Frame Analyses\n")?;
        if video.frame_analyses.is_empty() {
            writeln!(md, "No frames were sampled.\n")?;
        }
        for entry in &video.frame_analyses {
            Self::write_frame(md, entry)?;
        }

        Ok(())
    }

    fn write_assessment(md: &mut String, analysis: &str) -> Result<()> {
        writeln!(md, "## Assessment\n")?;
        match extract_confidence(analysis) {
            Some(confidence) => writeln!(md, "- **Stated Confidence**: {confidence}\n")?,
            None => writeln!(md, "- **Stated Confidence**: unknown\n")?,
        }
        writeln!(md, "{analysis}\n")?;
        Ok(())
    }

    fn write_frame(md: &mut String, entry: &FrameAnalysis) -> Result<()> {
        let frame = &entry.frame;
        writeln!(
            md,
            "### Frame {} ({:.1}s)\n\n![frame {}]({})\n",
            frame.index,
            frame.timestamp,
            frame.index,
            frame.path.display()
        )?;
        if entry.failed {
            writeln!(md, "_Analysis unavailable: {}_\n", entry.analysis)?;
        } else {
            writeln!(md, "{}\n", entry.analysis)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{AudioAnalysis, AudioTrack, Frame, Transcript};
    use std::path::PathBuf;

    fn frame(index: usize) -> Frame {
        Frame {
            index,
            path: PathBuf::from(format!("/uploads/clip-frames/frame-{index}.jpg")),
            timestamp: index as f64 * 7.5,
        }
    }

    fn sample_video() -> AnalysisResult {
        AnalysisResult::Video(VideoAnalysisResult {
            video_path: PathBuf::from("/uploads/clip.mp4"),
            audio_track: Some(AudioTrack::present(
                std::path::Path::new("/uploads/clip.mp4"),
                PathBuf::from("/uploads/clip-audio.mp3"),
            )),
            transcript: Some(Transcript::new("I was at home all night.".to_string())),
            audio_analysis: AudioAnalysis::Analyzed {
                text: "Short, hedged answers.".to_string(),
            },
            frames: vec![frame(1), frame(2)],
            frame_analyses: vec![
                FrameAnalysis::succeeded(frame(1), "Relaxed posture.".to_string()),
                FrameAnalysis::failed(
                    frame(2),
                    "Error analyzing this frame: timed out after 120s".to_string(),
                ),
            ],
            overall_analysis: "Likely truthful, confidence 70-80%.".to_string(),
        })
    }

    #[test]
    fn test_json_generation() {
        let json = AnalysisReport::generate(&sample_video(), ReportFormat::Json).unwrap();
        assert!(json.contains("\"type\": \"video\""));
        assert!(json.contains("Relaxed posture."));
    }

    #[test]
    fn test_markdown_generation() {
        let md = AnalysisReport::generate(&sample_video(), ReportFormat::Markdown).unwrap();

        assert!(md.contains("# Video Analysis Report"));
        assert!(md.contains("- **Stated Confidence**: 70-80%"));
        assert!(md.contains("> I was at home all night."));
        assert!(md.contains("### Frame 1 (7.5s)"));
        assert!(md.contains("_Analysis unavailable: Error analyzing this frame"));
        assert!(md.contains("- **Frames Unavailable**: 1"));
        // frame sections keep index order
        assert!(md.find("### Frame 1").unwrap() < md.find("### Frame 2").unwrap());
    }

    #[test]
    fn text_report_quotes_submission() {
        let result = AnalysisResult::Text {
            content: "I never saw him.".to_string(),
            analysis: "Defensive phrasing.".to_string(),
        };
        let md = AnalysisReport::generate(&result, ReportFormat::Markdown).unwrap();
        assert!(md.contains("# Text Analysis Report"));
        assert!(md.contains("> I never saw him."));
        assert!(md.contains("- **Stated Confidence**: unknown"));
    }

    #[test]
    fn test_save_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        AnalysisReport::save(&sample_video(), ReportFormat::Markdown, &path).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().starts_with("# Video"));
    }

    #[test]
    fn confidence_ranges_and_single_values() {
        assert_eq!(
            extract_confidence("confidence of 70-80%"),
            Some(Confidence { low: 70, high: 80 })
        );
        assert_eq!(
            extract_confidence("between 75 % to 65 %"),
            Some(Confidence { low: 65, high: 75 })
        );
        assert_eq!(
            extract_confidence("about 90% likely"),
            Some(Confidence { low: 90, high: 90 })
        );
        assert_eq!(Confidence { low: 60, high: 70 }.to_string(), "60-70%");
    }

    #[test]
    fn no_confidence_is_unknown() {
        assert_eq!(extract_confidence("No figures stated."), None);
        assert_eq!(extract_confidence("a 250% increase"), None);
        assert_eq!(extract_confidence(""), None);
    }
}
