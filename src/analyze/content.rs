//! Single-item content analysis
//!
//! [`ContentAnalyzer`] is the only contract the pipeline has with the
//! inference service: one payload in, one analysis string out, or a
//! [`RemoteError`]. [`OpenAiAnalyzer`] implements it against an
//! OpenAI-compatible chat completions endpoint.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::RemoteError;

/// What a payload is, which selects the prompt used for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Free text or an audio transcript
    Text,
    /// A single uploaded image
    Image,
    /// One still sampled from a video
    VideoFrame,
    /// The combined audio + frame prompt built by the synthesizer
    Synthesis,
}

impl ContentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::VideoFrame => "video-frame",
            Self::Synthesis => "synthesis",
        }
    }

    fn expects_image(self) -> bool {
        matches!(self, Self::Image | Self::VideoFrame)
    }
}

/// Payload handed to the analyzer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPayload {
    Text(String),
    /// `data:<mime>;base64,...`
    ImageDataUri(String),
}

impl ContentPayload {
    /// Read an image file into a data URI payload.
    pub async fn image_from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::ImageDataUri(image_data_uri(&bytes, mime_for(path))))
    }
}

/// Encode image bytes as a data URI.
#[must_use]
pub fn image_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Analyzes one text or image payload.
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        payload: &ContentPayload,
        kind: ContentKind,
    ) -> Result<String, RemoteError>;
}

const TEXT_SYSTEM_PROMPT: &str =
    "You are an expert in detecting deception and analyzing truthfulness in various media.";

const IMAGE_SYSTEM_PROMPT: &str = "First describe the person in the picture: the \
characteristics of their facial expressions, body language and behavior. Then assess \
possible signs of deception or truthfulness from those visual cues. Keep the analysis \
qualitative and point out possible bias rather than giving absolute judgments.";

const IMAGE_USER_PROMPT: &str = "Based on the image provided, analyze facial expressions, \
body language, and other visual cues to assess possible signs of deception or \
truthfulness. Consider overall demeanor, eye contact, posture, and any visible emotional \
expressions.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are an expert in detecting deception by \
analyzing both visual and verbal cues. Provide a comprehensive analysis that integrates \
multiple sources of information.";

/// Used when the service answers with an empty completion.
pub const EMPTY_COMPLETION: &str = "No analysis available";

fn text_user_prompt(content: &str) -> String {
    format!(
        "Analyze the following text for truthfulness and potential deception:\n\n{content}\n\n\
         Provide a detailed analysis of the language patterns, potential inconsistencies, \
         and indicators of truthfulness or deception."
    )
}

/// Inference endpoint settings
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Base URL of an OpenAI-compatible API, without trailing slash
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    /// Larger budget for the overall synthesis
    pub synthesis_max_tokens: u32,
    /// Per-request deadline
    pub timeout: Duration,
    /// Extra attempts for transient failures
    pub max_retries: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            max_tokens: 1000,
            synthesis_max_tokens: 1500,
            timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

/// Chat-completions backed [`ContentAnalyzer`]
pub struct OpenAiAnalyzer {
    client: reqwest::Client,
    config: InferenceConfig,
}

impl OpenAiAnalyzer {
    pub fn new(config: InferenceConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Build the request body for one payload.
    pub(crate) fn request_body(
        &self,
        payload: &ContentPayload,
        kind: ContentKind,
    ) -> Result<serde_json::Value, RemoteError> {
        let (system, user, max_tokens) = match (kind, payload) {
            (ContentKind::Text, ContentPayload::Text(content)) => (
                TEXT_SYSTEM_PROMPT,
                serde_json::json!(text_user_prompt(content)),
                self.config.max_tokens,
            ),
            (ContentKind::Synthesis, ContentPayload::Text(prompt)) => (
                SYNTHESIS_SYSTEM_PROMPT,
                serde_json::json!(prompt),
                self.config.synthesis_max_tokens,
            ),
            (ContentKind::Image | ContentKind::VideoFrame, ContentPayload::ImageDataUri(uri)) => (
                IMAGE_SYSTEM_PROMPT,
                serde_json::json!([
                    { "type": "text", "text": IMAGE_USER_PROMPT },
                    { "type": "image_url", "image_url": { "url": uri } }
                ]),
                self.config.max_tokens,
            ),
            (kind, _) => {
                let expected = if kind.expects_image() { "image" } else { "text" };
                return Err(RemoteError::InvalidPayload(format!(
                    "{} content needs a {expected} payload",
                    kind.as_str()
                )));
            }
        };

        Ok(serde_json::json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        }))
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<String, RemoteError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| RemoteError::NotConfigured("inference API key is not set".to_string()))?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(api_key)
            .json(body)
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

        let api_response: serde_json::Value = response.json().await?;
        completion_text(&api_response)
    }
}

/// Longest wait between two retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Backoff before retry `attempt` (1-based): 250ms, 1s, 4s, ... capped.
fn retry_delay(attempt: u32) -> Duration {
    let factor = 4_u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(250_u64.saturating_mul(factor)).min(MAX_RETRY_DELAY)
}

/// Pull the first choice's message out of a chat completion.
fn completion_text(response: &serde_json::Value) -> Result<String, RemoteError> {
    let choice = response["choices"]
        .get(0)
        .ok_or_else(|| RemoteError::Malformed("response has no choices".to_string()))?;

    let text = choice["message"]["content"].as_str().unwrap_or_default().trim();
    if text.is_empty() {
        Ok(EMPTY_COMPLETION.to_string())
    } else {
        Ok(text.to_string())
    }
}

#[async_trait]
impl ContentAnalyzer for OpenAiAnalyzer {
    async fn analyze(
        &self,
        payload: &ContentPayload,
        kind: ContentKind,
    ) -> Result<String, RemoteError> {
        let body = self.request_body(payload, kind)?;
        tracing::debug!(kind = kind.as_str(), "Calling inference API");

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = retry_delay(attempt);
                    tracing::warn!(
                        kind = kind.as_str(),
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Transient inference failure, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
