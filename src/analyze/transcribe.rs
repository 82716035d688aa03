//! Audio transcription via a Whisper-compatible HTTP endpoint

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{AnalysisError, AudioTrack, RemoteError, Result, Stage, Transcript};

/// Speech-to-text backend
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Upload one audio file and return its transcript text.
    async fn transcribe_audio(&self, audio_path: &Path) -> std::result::Result<String, RemoteError>;
}

/// Whisper endpoint settings
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Language hint (ISO 639-1)
    pub language: Option<String>,
    /// Large uploads take minutes
    pub timeout: Duration,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            language: Some("en".to_string()),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI `audio/transcriptions` client
pub struct WhisperApi {
    client: reqwest::Client,
    config: WhisperConfig,
}

impl WhisperApi {
    pub fn new(config: WhisperConfig) -> std::result::Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SpeechToText for WhisperApi {
    async fn transcribe_audio(&self, audio_path: &Path) -> std::result::Result<String, RemoteError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| RemoteError::NotConfigured("transcription API key is not set".to_string()))?;

        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map_or_else(|| "audio.mp3".to_string(), |n| n.to_string_lossy().to_string());
        tracing::info!(bytes = bytes.len(), "Uploading {file_name} for transcription");

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone());
        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.config.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteError::Timeout(self.config.timeout)
                } else {
                    RemoteError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        Ok(parsed.text)
    }
}

/// Turns an [`AudioTrack`] into a [`Transcript`]
pub struct Transcriber {
    backend: Arc<dyn SpeechToText>,
}

impl Transcriber {
    #[must_use]
    pub fn new(backend: Arc<dyn SpeechToText>) -> Self {
        Self { backend }
    }

    /// Transcribe the track.
    ///
    /// An absent track short-circuits to an empty transcript without any
    /// remote call. Remote failures are fatal for this stage.
    pub async fn transcribe(&self, track: &AudioTrack) -> Result<Transcript> {
        if !track.present {
            return Ok(Transcript::empty());
        }

        let text = self
            .backend
            .transcribe_audio(&track.audio_path)
            .await
            .map_err(|source| AnalysisError::RemoteServiceFailure {
                stage: Stage::Transcription,
                source,
            })?;

        let transcript = Transcript::new(text);
        tracing::info!(
            chars = transcript.text.len(),
            empty = transcript.empty,
            "Transcription complete"
        );

        if !transcript.empty {
            write_sidecar(&track.audio_path, &transcript.text).await;
        }

        Ok(transcript)
    }
}

/// Keep a plain-text copy next to the audio. Best effort.
async fn write_sidecar(audio_path: &Path, text: &str) {
    let stem = audio_path
        .file_stem()
        .map_or_else(|| "audio".to_string(), |s| s.to_string_lossy().to_string());
    let sidecar = audio_path.with_file_name(format!("{stem}-transcript.txt"));

    if let Err(e) = tokio::fs::write(&sidecar, text).await {
        tracing::warn!("Could not write transcript to {}: {e}", sidecar.display());
    } else {
        tracing::debug!("Transcript saved to {}", sidecar.display());
    }
}
