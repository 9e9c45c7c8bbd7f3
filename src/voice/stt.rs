//! Speech-to-text (STT) requests

use crate::{Error, Result};

/// OpenAI transcription endpoint
pub const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Response from an OpenAI-compatible transcription API
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Transcribes WAV audio through an OpenAI-compatible endpoint
pub struct Transcriber {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl Transcriber {
    /// Create a transcriber for `url`
    ///
    /// # Errors
    ///
    /// Returns error if the hosted `OpenAI` endpoint is used without a key
    pub fn new(url: String, model: String, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key.filter(|k| !k.is_empty());
        if url == OPENAI_TRANSCRIPTION_URL && api_key.is_none() {
            return Err(Error::Config(
                "OpenAI API key required for transcription".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            model,
        })
    }

    /// Transcribe audio to text
    ///
    /// # Arguments
    ///
    /// * `audio` - WAV audio bytes
    /// * `language` - BCP 47 tag; only the primary subtag is sent
    ///
    /// # Errors
    ///
    /// Returns `Transport` if transcription fails
    pub async fn transcribe(&self, audio: Vec<u8>, language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transport(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", language_code(language).to_string());

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "transcription request failed");
            Error::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Transport(format!(
                "transcription API error {status}: {body}"
            )));
        }

        let result: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            Error::Transport(e.to_string())
        })?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

/// Primary language subtag of a BCP 47 tag ("en-US" → "en")
fn language_code(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}
