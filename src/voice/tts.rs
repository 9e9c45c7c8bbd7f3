//! Text-to-speech (TTS) requests

use async_trait::async_trait;
use serde::Serialize;

use super::VoiceIdentity;
use crate::{Error, Result};

/// OpenAI speech endpoint
const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Body of a synthesis request, as the Opera backend expects it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: VoiceIdentity,
    pub speed: f32,
}

/// Converts text into encoded audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `request`, returning the audio bytes
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the service is unreachable or answers with a
    /// non-success status
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;
}

/// TTS provider backend
#[derive(Clone, Debug)]
enum TtsProvider {
    /// Opera backend speech endpoint
    Backend { url: String },
    /// OpenAI speech API, called directly
    OpenAI { api_key: String, model: String },
}

/// Synthesizes speech over HTTP
pub struct HttpSynthesizer {
    client: reqwest::Client,
    provider: TtsProvider,
}

impl HttpSynthesizer {
    /// Synthesize through the Opera backend at `url`
    #[must_use]
    pub fn backend(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider: TtsProvider::Backend { url: url.into() },
        }
    }

    /// Synthesize directly against `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn openai(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            provider: TtsProvider::OpenAI { api_key, model },
        })
    }

    /// Synthesize through the Opera backend
    async fn synthesize_backend(&self, url: &str, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let response = self.client.post(url).json(request).send().await.map_err(|e| {
            tracing::error!(error = %e, url, "synthesis request failed");
            Error::Transport(e.to_string())
        })?;

        read_audio(response, "backend").await
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(
        &self,
        api_key: &str,
        model: &str,
        request: &SynthesisRequest,
    ) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct OpenAiRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: VoiceIdentity,
            speed: f32,
        }

        let body = OpenAiRequest {
            model,
            input: &request.text,
            voice: request.voice,
            speed: request.speed,
        };

        let response = self
            .client
            .post(OPENAI_SPEECH_URL)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "OpenAI TTS request failed");
                Error::Transport(e.to_string())
            })?;

        read_audio(response, "OpenAI").await
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        tracing::debug!(
            chars = request.text.chars().count(),
            voice = %request.voice,
            speed = request.speed,
            "synthesizing speech"
        );

        match &self.provider {
            TtsProvider::Backend { url } => self.synthesize_backend(url, request).await,
            TtsProvider::OpenAI { api_key, model } => {
                self.synthesize_openai(api_key, model, request).await
            }
        }
    }
}

/// Check status and content type, then collect the audio body
async fn read_audio(response: reqwest::Response, provider: &str) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, provider, "TTS error");
        return Err(Error::Transport(format!("{provider} TTS error {status}: {body}")));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(content_type) = content_type.as_deref().filter(|ct| !is_audio_content_type(ct)) {
        return Err(Error::Transport(format!(
            "{provider} TTS returned non-audio content type {content_type}"
        )));
    }

    let audio = response.bytes().await?;
    tracing::debug!(bytes = audio.len(), content_type = ?content_type, "received synthesized audio");
    Ok(audio.to_vec())
}

fn is_audio_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.starts_with("audio/") || essence == "application/octet-stream"
}
