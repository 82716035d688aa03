use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use veracity::analyze::{
    AnalysisReport, AnalysisResult, ContentAnalyzer, OpenAiAnalyzer, ReportFormat, VideoPipeline,
    WhisperApi,
};
use veracity::config::{config_path, API_KEY_ENV};
use veracity::{AnalysisService, Config, FileStore, Submission, TokioProcessRunner};

/// Where and how the report goes
pub struct OutputOptions {
    pub format: ReportFormat,
    pub output: Option<PathBuf>,
    pub save: bool,
}

/// `-` means stdin.
pub fn read_text_arg(content: String) -> Result<String> {
    if content != "-" {
        return Ok(content);
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read text from stdin")?;
    Ok(buf)
}

fn build_service(config: &Config) -> Result<AnalysisService> {
    let analyzer: Arc<dyn ContentAnalyzer> =
        Arc::new(OpenAiAnalyzer::new(config.inference_config())?);
    let speech = Arc::new(WhisperApi::new(config.whisper_config())?);
    let pipeline = VideoPipeline::new(
        &config.pipeline_config(),
        Arc::new(TokioProcessRunner::new()),
        Arc::clone(&analyzer),
        speech,
    );
    let store = Arc::new(FileStore::new(config.results_dir()));
    Ok(AnalysisService::new(analyzer, pipeline, store))
}

pub async fn cmd_analyze(
    config: &Config,
    submission: Submission,
    options: OutputOptions,
) -> Result<()> {
    if config.inference.api_key.is_none() {
        bail!(
            "no API key configured: set {API_KEY_ENV} or [inference] api_key in {}",
            config_path().display()
        );
    }

    match &submission {
        Submission::Text(content) => {
            eprintln!("📝 Analyzing text ({} chars)", content.chars().count());
        }
        Submission::Image(path) => eprintln!("🖼️  Analyzing image: {}", path.display()),
        Submission::Video { path, frame_count } => {
            eprintln!("🎬 Analyzing video: {}", path.display());
            let frames = frame_count.unwrap_or(config.pipeline.frame_count);
            eprintln!("   Frames: {frames}");
            if let Some(max) = config.pipeline.max_concurrent_frames {
                eprintln!("   Concurrency: {max} frames at a time");
            }
        }
    }

    let service = build_service(config)?;

    let start = std::time::Instant::now();
    let (id, result) = if options.save {
        let submitted = service.submit(&submission).await?;
        (Some(submitted.id), submitted.result)
    } else {
        (None, service.analyze(&submission).await?)
    };
    let elapsed = start.elapsed();

    eprintln!("\n✅ Analysis complete in {:.1}s", elapsed.as_secs_f64());

    if let AnalysisResult::Video(video) = &result {
        let failed = video.failed_frames().count();
        eprintln!(
            "   Frames: {} analyzed, {failed} unavailable",
            video.frame_analyses.len() - failed
        );
        match video.transcript.as_ref() {
            Some(t) if !t.empty => eprintln!("   Transcript: {} chars", t.text.chars().count()),
            _ => eprintln!("   Transcript: none"),
        }
    }

    emit(&result, options.format, options.output)?;

    if let Some(id) = id {
        eprintln!("💾 Saved as {id}");
    }

    Ok(())
}

/// Print or write the report.
pub fn emit(result: &AnalysisResult, format: ReportFormat, output: Option<PathBuf>) -> Result<()> {
    let report = AnalysisReport::generate(result, format)?;

    if let Some(path) = output {
        std::fs::write(&path, &report)
            .with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("📄 Saved to: {}", path.display());
    } else {
        println!("{report}");
    }

    Ok(())
}
