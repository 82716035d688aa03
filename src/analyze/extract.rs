//! Frame and audio extraction via ffmpeg
//!
//! Frames are sampled at evenly spaced timestamps rather than by scene
//! detection, so the frame count and index order are fixed up front.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::process::ProcessRunner;

use super::{AnalysisError, AudioTrack, Frame, PipelineConfig, Result, Stage};

/// Compute `count` timestamps strictly inside `(0, duration)`.
///
/// The interval divides by `count + 1` so neither the first nor the last
/// sample sits on the clip boundary, where fades and black frames live.
#[must_use]
pub fn sample_timestamps(duration: f64, count: usize) -> Vec<f64> {
    let interval = duration / (count as f64 + 1.0);
    (1..=count).map(|i| interval * i as f64).collect()
}

/// Directory for derived files: explicit work dir, else next to the video.
fn output_dir(video_path: &Path, work_dir: Option<&Path>) -> PathBuf {
    match work_dir {
        Some(dir) => dir.to_path_buf(),
        None => video_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
    }
}

fn video_stem(video_path: &Path) -> String {
    video_path
        .file_stem()
        .map_or_else(|| "video".to_string(), |s| s.to_string_lossy().to_string())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Probe total duration in seconds with ffprobe.
async fn probe_duration(
    runner: &dyn ProcessRunner,
    ffprobe: &str,
    video_path: &Path,
    timeout: Duration,
) -> Result<f64> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        path_arg(video_path),
    ];

    let output = runner
        .run(ffprobe, &args, timeout)
        .await
        .map_err(|source| AnalysisError::ToolFailure {
            stage: Stage::FrameSampling,
            source,
        })?;

    let raw = output.stdout.trim();
    let duration: f64 = raw.parse().map_err(|_| AnalysisError::ToolOutput {
        stage: Stage::FrameSampling,
        message: format!("unparseable duration {raw:?}"),
    })?;

    if !duration.is_finite() || duration <= 0.0 {
        return Err(AnalysisError::ToolOutput {
            stage: Stage::FrameSampling,
            message: format!("video has no measurable duration ({duration})"),
        });
    }

    Ok(duration)
}

/// Remove a previous run's output so it can't pass as this run's.
async fn remove_stale(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

async fn non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

/// Demuxes the audio track of a video into a sibling MP3
pub struct AudioExtractor {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: String,
    ffprobe: String,
    probe_timeout: Duration,
    demux_timeout: Duration,
    work_dir: Option<PathBuf>,
}

impl AudioExtractor {
    #[must_use]
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &PipelineConfig) -> Self {
        Self {
            runner,
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
            probe_timeout: config.tool_timeout,
            demux_timeout: config.video_timeout,
            work_dir: config.work_dir.clone(),
        }
    }

    /// Where the audio for `video_path` is written. Re-runs overwrite it.
    #[must_use]
    pub fn audio_path_for(&self, video_path: &Path) -> PathBuf {
        output_dir(video_path, self.work_dir.as_deref())
            .join(format!("{}-audio.mp3", video_stem(video_path)))
    }

    /// Extract the audio track.
    ///
    /// A video without an audio stream yields `AudioTrack { present: false }`.
    /// Tool failures are stage errors.
    pub async fn extract(&self, video_path: &Path) -> Result<AudioTrack> {
        let audio_path = self.audio_path_for(video_path);

        if !self.has_audio_stream(video_path).await? {
            tracing::info!("No audio stream in {}", video_path.display());
            return Ok(AudioTrack::absent(video_path, audio_path));
        }

        if let Some(parent) = audio_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        remove_stale(&audio_path).await?;

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            path_arg(video_path),
            "-q:a".to_string(),
            "0".to_string(),
            "-map".to_string(),
            "a".to_string(),
            path_arg(&audio_path),
        ];

        self.runner
            .run(&self.ffmpeg, &args, self.demux_timeout)
            .await
            .map_err(|source| AnalysisError::ToolFailure {
                stage: Stage::AudioExtraction,
                source,
            })?;

        if !non_empty_file(&audio_path).await {
            tracing::warn!(
                "Audio extraction produced no file at {}",
                audio_path.display()
            );
            return Ok(AudioTrack::absent(video_path, audio_path));
        }

        tracing::info!("Audio extracted to {}", audio_path.display());
        Ok(AudioTrack::present(video_path, audio_path))
    }

    /// Ask ffprobe whether the container has at least one audio stream.
    async fn has_audio_stream(&self, video_path: &Path) -> Result<bool> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "a".to_string(),
            "-show_entries".to_string(),
            "stream=index".to_string(),
            "-of".to_string(),
            "csv=p=0".to_string(),
            path_arg(video_path),
        ];

        let output = self
            .runner
            .run(&self.ffprobe, &args, self.probe_timeout)
            .await
            .map_err(|source| AnalysisError::ToolFailure {
                stage: Stage::AudioExtraction,
                source,
            })?;

        Ok(!output.stdout.trim().is_empty())
    }
}

/// Samples evenly spaced still frames from a video
pub struct FrameSampler {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: String,
    ffprobe: String,
    tool_timeout: Duration,
    work_dir: Option<PathBuf>,
}

impl FrameSampler {
    #[must_use]
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &PipelineConfig) -> Self {
        Self {
            runner,
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
            tool_timeout: config.tool_timeout,
            work_dir: config.work_dir.clone(),
        }
    }

    /// Directory holding `frame-1.jpg` … `frame-N.jpg` for `video_path`.
    #[must_use]
    pub fn frames_dir_for(&self, video_path: &Path) -> PathBuf {
        output_dir(video_path, self.work_dir.as_deref())
            .join(format!("{}-frames", video_stem(video_path)))
    }

    /// Dump `frame_count` frames in timestamp order.
    ///
    /// Any single failed dump fails the whole stage: downstream code relies
    /// on indices 1..=N all being present.
    pub async fn sample(&self, video_path: &Path, frame_count: usize) -> Result<Vec<Frame>> {
        if frame_count == 0 {
            return Ok(Vec::new());
        }

        let duration = probe_duration(
            self.runner.as_ref(),
            &self.ffprobe,
            video_path,
            self.tool_timeout,
        )
        .await?;
        tracing::info!(duration, frame_count, "Sampling frames");

        let frames_dir = self.frames_dir_for(video_path);
        tokio::fs::create_dir_all(&frames_dir).await?;

        let mut frames = Vec::with_capacity(frame_count);
        for (i, timestamp) in sample_timestamps(duration, frame_count).into_iter().enumerate() {
            let index = i + 1;
            let path = frames_dir.join(format!("frame-{index}.jpg"));
            self.dump_frame(video_path, timestamp, &path).await?;
            tracing::debug!(frame = index, timestamp, "Frame extracted");
            frames.push(Frame {
                index,
                path,
                timestamp,
            });
        }

        Ok(frames)
    }

    /// Extract a single frame at a specific timestamp
    async fn dump_frame(&self, video_path: &Path, timestamp: f64, output_path: &Path) -> Result<()> {
        remove_stale(output_path).await?;

        let args = vec![
            "-y".to_string(),
            "-ss".to_string(),
            format!("{timestamp:.3}"),
            "-i".to_string(),
            path_arg(video_path),
            "-frames:v".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            "2".to_string(), // High quality JPEG
            path_arg(output_path),
        ];

        self.runner
            .run(&self.ffmpeg, &args, self.tool_timeout)
            .await
            .map_err(|source| AnalysisError::ToolFailure {
                stage: Stage::FrameSampling,
                source,
            })?;

        if !non_empty_file(output_path).await {
            return Err(AnalysisError::ToolOutput {
                stage: Stage::FrameSampling,
                message: format!("no frame written at {timestamp:.3}s"),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessError, ProcessOutput};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers probes from canned output and writes a file for every ffmpeg call.
    struct ScriptedRunner {
        duration: String,
        audio_streams: String,
        fail_ffmpeg: bool,
        /// ffmpeg exits 0 without writing its output
        write_nothing: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(duration: &str, audio_streams: &str) -> Self {
            Self {
                duration: duration.to_string(),
                audio_streams: audio_streams.to_string(),
                fail_ffmpeg: false,
                write_nothing: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            _timeout: Duration,
        ) -> std::result::Result<ProcessOutput, ProcessError> {
            self.calls.lock().unwrap().push(args.to_vec());
            if program == "ffprobe" {
                let stdout = if args.iter().any(|a| a == "-select_streams") {
                    self.audio_streams.clone()
                } else {
                    self.duration.clone()
                };
                return Ok(ProcessOutput {
                    stdout,
                    stderr: String::new(),
                });
            }
            if self.fail_ffmpeg {
                return Err(ProcessError::Exited {
                    program: program.to_string(),
                    exit_code: 1,
                    stderr: "Invalid data found when processing input".to_string(),
                });
            }
            if !self.write_nothing {
                let out = args.last().unwrap();
                std::fs::write(out, b"jpeg").unwrap();
            }
            Ok(ProcessOutput::default())
        }
    }

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            work_dir: Some(dir.to_path_buf()),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn timestamps_avoid_clip_edges() {
        assert_eq!(sample_timestamps(30.0, 3), vec![7.5, 15.0, 22.5]);

        let ts = sample_timestamps(12.4, 7);
        assert_eq!(ts.len(), 7);
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
        assert!(ts.iter().all(|t| *t > 0.0 && *t < 12.4));
        assert!(sample_timestamps(10.0, 0).is_empty());
    }

    #[test]
    fn derived_paths_sit_next_to_video() {
        let runner: Arc<dyn ProcessRunner> = Arc::new(ScriptedRunner::new("1", ""));
        let config = PipelineConfig {
            work_dir: None,
            ..PipelineConfig::default()
        };
        let extractor = AudioExtractor::new(Arc::clone(&runner), &config);
        let sampler = FrameSampler::new(runner, &config);
        let video = Path::new("/uploads/abc123.mp4");

        assert_eq!(
            extractor.audio_path_for(video),
            PathBuf::from("/uploads/abc123-audio.mp3")
        );
        assert_eq!(
            sampler.frames_dir_for(video),
            PathBuf::from("/uploads/abc123-frames")
        );
    }

    #[tokio::test]
    async fn samples_numbered_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new("30.0\n", ""));
        let sampler = FrameSampler::new(runner.clone(), &config(dir.path()));

        let frames = sampler
            .sample(&dir.path().join("clip.mp4"), 3)
            .await
            .unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames.iter().map(|f| f.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(frames[1].timestamp, 15.0);
        assert!(frames[2].path.ends_with("clip-frames/frame-3.jpg"));

        // one probe + one dump per frame
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert!(calls[1].contains(&"7.500".to_string()));
    }

    #[tokio::test]
    async fn unparseable_duration_is_a_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new("N/A", ""));
        let sampler = FrameSampler::new(runner, &config(dir.path()));

        let err = sampler
            .sample(&dir.path().join("clip.mp4"), 3)
            .await
            .unwrap_err();
        assert!(err.is_tool_failure());
        assert_eq!(err.stage(), Some(Stage::FrameSampling));
    }

    #[tokio::test]
    async fn failed_dump_fails_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ScriptedRunner::new("20", "");
        runner.fail_ffmpeg = true;
        let sampler = FrameSampler::new(Arc::new(runner), &config(dir.path()));

        let err = sampler
            .sample(&dir.path().join("clip.mp4"), 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::ToolFailure {
                stage: Stage::FrameSampling,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn silent_video_has_absent_track() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new("30", ""));
        let extractor = AudioExtractor::new(runner.clone(), &config(dir.path()));

        let track = extractor
            .extract(&dir.path().join("silent.mp4"))
            .await
            .unwrap();
        assert!(!track.present);
        // only the stream probe ran
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audio_is_demuxed_when_stream_exists() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new("30", "1\n"));
        let extractor = AudioExtractor::new(runner, &config(dir.path()));

        let track = extractor
            .extract(&dir.path().join("talk.mp4"))
            .await
            .unwrap();
        assert!(track.present);
        assert!(track.audio_path.ends_with("talk-audio.mp3"));
    }

    #[tokio::test]
    async fn leftover_frames_are_not_taken_as_new_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ScriptedRunner::new("30", "");
        runner.write_nothing = true;
        let sampler = FrameSampler::new(Arc::new(runner), &config(dir.path()));

        // clip.mov shares clip-frames/ with an earlier clip.mp4 upload
        let frames_dir = dir.path().join("clip-frames");
        std::fs::create_dir_all(&frames_dir).unwrap();
        for i in 1..=3 {
            std::fs::write(frames_dir.join(format!("frame-{i}.jpg")), b"OLD VIDEO").unwrap();
        }

        let err = sampler
            .sample(&dir.path().join("clip.mov"), 3)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::ToolOutput {
                stage: Stage::FrameSampling,
                ..
            }
        ));
        assert!(!frames_dir.join("frame-1.jpg").exists());
    }

    #[tokio::test]
    async fn leftover_audio_is_not_taken_as_new_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ScriptedRunner::new("30", "1\n");
        runner.write_nothing = true;
        let extractor = AudioExtractor::new(Arc::new(runner), &config(dir.path()));
        std::fs::write(dir.path().join("talk-audio.mp3"), b"OLD AUDIO").unwrap();

        let track = extractor
            .extract(&dir.path().join("talk.mp4"))
            .await
            .unwrap();
        assert!(!track.present);
        assert!(!dir.path().join("talk-audio.mp3").exists());
    }
}
