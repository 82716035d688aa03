//! Configuration loaded from `~/.config/veracity/config.toml`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analyze::{
    synthesize, InferenceConfig, PipelineConfig, WhisperConfig, DEFAULT_FRAME_COUNT,
};
use crate::process::resolve_tool;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Upper bound for `[inference] max_retries`.
const MAX_RETRIES: u32 = 10;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable overriding the API base URL.
pub const API_BASE_ENV: &str = "VERACITY_API_BASE";

/// `[inference]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSection {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub synthesis_max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_API_BASE.to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 1000,
            synthesis_max_tokens: 1500,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// `[transcription]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSection {
    pub model: String,
    pub language: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TranscriptionSection {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            language: Some("en".to_string()),
            timeout_secs: 600,
        }
    }
}

/// `[media]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSection {
    /// Unset: looked up on `PATH`
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub tool_timeout_secs: u64,
    pub video_timeout_secs: u64,
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            ffmpeg: None,
            ffprobe: None,
            tool_timeout_secs: 60,
            video_timeout_secs: 600,
        }
    }
}

/// `[pipeline]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub frame_count: usize,
    pub frame_timeout_secs: u64,
    pub max_concurrent_frames: Option<usize>,
    pub synthesis_frame_limit: usize,
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            frame_timeout_secs: 120,
            max_concurrent_frames: None,
            synthesis_frame_limit: synthesize::DEFAULT_FRAME_LIMIT,
            work_dir: None,
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub results_dir: Option<PathBuf>,
}

/// Whole configuration file. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inference: InferenceSection,
    pub transcription: TranscriptionSection,
    pub media: MediaSection,
    pub pipeline: PipelineSection,
    pub storage: StorageSection,
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; an explicitly named file must
    /// exist. Environment overrides are applied last.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }

    /// Parse TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or out-of-range values.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.pipeline.max_concurrent_frames == Some(0) {
            anyhow::bail!("pipeline.max_concurrent_frames must be at least 1");
        }
        let timeouts = [
            ("pipeline.frame_timeout_secs", self.pipeline.frame_timeout_secs),
            ("media.tool_timeout_secs", self.media.tool_timeout_secs),
            ("media.video_timeout_secs", self.media.video_timeout_secs),
            ("transcription.timeout_secs", self.transcription.timeout_secs),
            ("inference.timeout_secs", self.inference.timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            anyhow::bail!("{name} must be at least one second");
        }
        if self.inference.max_retries > MAX_RETRIES {
            anyhow::bail!("inference.max_retries must be at most {MAX_RETRIES}");
        }
        Ok(())
    }

    /// Apply `OPENAI_API_KEY` and `VERACITY_API_BASE`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.inference.api_key = Some(key);
        }
        if let Some(base) = lookup(API_BASE_ENV).filter(|b| !b.trim().is_empty()) {
            self.inference.base_url = base;
        }
    }

    fn api_base(&self) -> String {
        self.inference.base_url.trim_end_matches('/').to_string()
    }

    #[must_use]
    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            base_url: self.api_base(),
            api_key: self.inference.api_key.clone(),
            model: self.inference.model.clone(),
            max_tokens: self.inference.max_tokens,
            synthesis_max_tokens: self.inference.synthesis_max_tokens,
            timeout: Duration::from_secs(self.inference.timeout_secs),
            max_retries: self.inference.max_retries,
        }
    }

    #[must_use]
    pub fn whisper_config(&self) -> WhisperConfig {
        WhisperConfig {
            base_url: self.api_base(),
            api_key: self.inference.api_key.clone(),
            model: self.transcription.model.clone(),
            language: self.transcription.language.clone(),
            timeout: Duration::from_secs(self.transcription.timeout_secs),
        }
    }

    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            frame_count: self.pipeline.frame_count,
            ffmpeg: resolve_tool(self.media.ffmpeg.as_ref(), "ffmpeg"),
            ffprobe: resolve_tool(self.media.ffprobe.as_ref(), "ffprobe"),
            tool_timeout: Duration::from_secs(self.media.tool_timeout_secs),
            video_timeout: Duration::from_secs(self.media.video_timeout_secs),
            frame_timeout: Duration::from_secs(self.pipeline.frame_timeout_secs),
            max_concurrent_frames: self.pipeline.max_concurrent_frames,
            synthesis_frame_limit: self.pipeline.synthesis_frame_limit,
            work_dir: self.pipeline.work_dir.clone(),
        }
    }

    #[must_use]
    pub fn results_dir(&self) -> PathBuf {
        self.storage.results_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("veracity")
                .join("results")
        })
    }

    /// Copy safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.inference.api_key.is_some() {
            copy.inference.api_key = Some("********".to_string());
        }
        copy
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match toml::to_string_pretty(&self.redacted()) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}

/// Return the path to the default config file.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("veracity")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.pipeline.frame_count, 7);
        assert_eq!(config.inference.model, "gpt-4o");
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[inference]
model = "gpt-4o-mini"
base_url = "http://localhost:8080/v1/"

[pipeline]
frame_count = 5
max_concurrent_frames = 2

[media]
ffmpeg = "/opt/ffmpeg/bin/ffmpeg"
"#;
        let config = Config::parse(toml_str).unwrap();
        assert_eq!(config.inference.model, "gpt-4o-mini");
        assert_eq!(config.inference.max_tokens, 1000);
        assert_eq!(config.transcription.model, "whisper-1");

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.frame_count, 5);
        assert_eq!(pipeline.max_concurrent_frames, Some(2));
        assert_eq!(pipeline.ffmpeg, "/opt/ffmpeg/bin/ffmpeg");

        assert_eq!(config.inference_config().base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = Config::parse("[pipeline]\nmax_concurrent_frames = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_concurrent_frames"));
    }

    #[test]
    fn rejects_zero_timeouts() {
        for (section, key) in [
            ("pipeline", "frame_timeout_secs"),
            ("media", "tool_timeout_secs"),
            ("media", "video_timeout_secs"),
            ("transcription", "timeout_secs"),
            ("inference", "timeout_secs"),
        ] {
            let err = Config::parse(&format!("[{section}]\n{key} = 0\n")).unwrap_err();
            assert!(
                err.to_string().contains(&format!("{section}.{key}")),
                "{section}.{key}: {err}"
            );
        }
    }

    #[test]
    fn bounds_max_retries() {
        assert!(Config::parse("[inference]\nmax_retries = 10\n").is_ok());
        let err = Config::parse("[inference]\nmax_retries = 40\n").unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(Config::parse("[pipeline\nframe_count = ").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut config = Config::parse("[inference]\napi_key = \"from-file\"\n").unwrap();
        config.apply_env(|name| match name {
            API_KEY_ENV => Some("from-env".to_string()),
            API_BASE_ENV => Some("https://proxy.internal/v1".to_string()),
            _ => None,
        });
        assert_eq!(config.inference.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.whisper_config().base_url, "https://proxy.internal/v1");
        assert_eq!(config.whisper_config().api_key.as_deref(), Some("from-env"));
    }

    #[test]
    fn display_redacts_api_key() {
        let config = Config::parse("[inference]\napi_key = \"sk-secret\"\n").unwrap();
        let shown = config.to_string();
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("********"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(missing.as_path())).is_err());
    }

    #[test]
    fn results_dir_override() {
        let config = Config::parse("[storage]\nresults_dir = \"/srv/results\"\n").unwrap();
        assert_eq!(config.results_dir(), PathBuf::from("/srv/results"));
    }
}
