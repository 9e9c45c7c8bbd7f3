//! Configuration management for the Opera voice controller
//!
//! Settings are layered env > toml > default. They only seed the
//! controller at startup; runtime `set_config` changes are never written
//! back.

pub mod file;

use std::time::Duration;

use crate::voice::{
    HttpSynthesizer, OPENAI_TRANSCRIPTION_URL, RecognitionOptions, Transcriber, VoiceConfig,
    VoiceIdentity,
};
use crate::{Error, Result};

use file::VoiceConfigFile;

/// Default Opera backend URL
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default speech endpoint path on the backend
pub const DEFAULT_SPEAK_PATH: &str = "/voice/speak";

/// Opera voice configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Opera backend location
    pub backend: BackendConfig,

    /// Speech synthesis provider
    pub synthesis: SynthesisConfig,

    /// Speech recognition settings
    pub recognition: RecognitionConfig,

    /// Initial voice preferences
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Opera backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL (from `OPERA_API_URL` env)
    pub url: String,

    /// Speech endpoint path
    pub speak_path: String,
}

impl BackendConfig {
    /// Full URL of the speech endpoint
    #[must_use]
    pub fn speak_url(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            self.speak_path.trim_start_matches('/')
        )
    }
}

/// Which service turns text into audio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SynthesisProvider {
    /// Opera backend speech endpoint
    #[default]
    Backend,
    /// `OpenAI` speech API, called directly
    OpenAI,
}

impl std::str::FromStr for SynthesisProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "backend" | "opera" => Ok(Self::Backend),
            "openai" => Ok(Self::OpenAI),
            other => Err(Error::Config(format!("unknown synthesis provider: {other}"))),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub provider: SynthesisProvider,

    /// TTS model for direct `OpenAI` synthesis (e.g. "tts-1")
    pub model: String,
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// BCP 47 language tag
    pub language: String,

    /// Transcription endpoint
    pub url: String,

    /// STT model (e.g. "whisper-1")
    pub model: String,

    /// Report partial transcripts while speech continues
    pub interim_results: bool,

    /// End a session after this long without speech
    pub silence_timeout: Duration,
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for Whisper and TTS)
    pub openai: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("openai", &self.openai.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting has an invalid value
    pub fn load() -> Result<Self> {
        // Load optional TOML config file (env > toml > default)
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a setting has an invalid value
    pub fn from_sources(fc: VoiceConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Backend (env > toml > default)
        let backend = BackendConfig {
            url: env("OPERA_API_URL")
                .or(fc.backend.url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            speak_path: env("OPERA_SPEAK_PATH")
                .or(fc.backend.speak_path)
                .unwrap_or_else(|| DEFAULT_SPEAK_PATH.to_string()),
        };

        // Synthesis provider (env > toml > default)
        let synthesis = SynthesisConfig {
            provider: env("OPERA_TTS_PROVIDER")
                .or(fc.synthesis.provider)
                .map(|s| s.parse::<SynthesisProvider>())
                .transpose()?
                .unwrap_or_default(),
            model: env("OPERA_TTS_MODEL")
                .or(fc.synthesis.model)
                .unwrap_or_else(|| "tts-1".to_string()),
        };

        // Recognition (env > toml > default)
        let defaults = RecognitionOptions::default();
        let recognition = RecognitionConfig {
            language: env("OPERA_STT_LANGUAGE")
                .or(fc.recognition.language)
                .unwrap_or(defaults.language),
            url: env("OPERA_STT_URL")
                .or(fc.recognition.url)
                .unwrap_or_else(|| OPENAI_TRANSCRIPTION_URL.to_string()),
            model: env("OPERA_STT_MODEL")
                .or(fc.recognition.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            interim_results: fc
                .recognition
                .interim_results
                .unwrap_or(defaults.interim_results),
            silence_timeout: fc
                .recognition
                .silence_timeout_secs
                .map_or(defaults.silence_timeout, Duration::from_secs),
        };

        // Initial voice preferences (env > toml > default)
        let default_voice = VoiceConfig::default();
        let voice = VoiceConfig {
            enabled: fc.voice.enabled.unwrap_or(default_voice.enabled),
            voice: env("OPERA_VOICE")
                .or(fc.voice.voice)
                .map(|v| v.parse::<VoiceIdentity>())
                .transpose()?
                .unwrap_or(default_voice.voice),
            speed: env("OPERA_VOICE_SPEED")
                .map(|s| {
                    s.trim()
                        .parse::<f32>()
                        .map_err(|e| Error::Config(format!("invalid OPERA_VOICE_SPEED: {e}")))
                })
                .transpose()?
                .or(fc.voice.speed)
                .unwrap_or(default_voice.speed),
            auto_speak: fc.voice.auto_speak.unwrap_or(default_voice.auto_speak),
            suppress_capture_during_playback: fc
                .voice
                .suppress_capture_during_playback
                .unwrap_or(default_voice.suppress_capture_during_playback),
        };

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .filter(|k| !k.is_empty()),
        };

        Ok(Self {
            backend,
            synthesis,
            recognition,
            voice,
            api_keys,
        })
    }

    /// Options recognizer sessions are started with
    #[must_use]
    pub fn recognition_options(&self) -> RecognitionOptions {
        RecognitionOptions {
            language: self.recognition.language.clone(),
            continuous: true,
            interim_results: self.recognition.interim_results,
            silence_timeout: self.recognition.silence_timeout,
        }
    }

    /// Build the configured synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if `OpenAI` synthesis is selected without an API key
    pub fn synthesizer(&self) -> Result<HttpSynthesizer> {
        match self.synthesis.provider {
            SynthesisProvider::Backend => Ok(HttpSynthesizer::backend(self.backend.speak_url())),
            SynthesisProvider::OpenAI => HttpSynthesizer::openai(
                self.api_keys.openai.clone().unwrap_or_default(),
                self.synthesis.model.clone(),
            ),
        }
    }

    /// Build the transcriber used by the microphone recognizer
    ///
    /// # Errors
    ///
    /// Returns error if the hosted `OpenAI` endpoint is used without a key
    pub fn transcriber(&self) -> Result<Transcriber> {
        Transcriber::new(
            self.recognition.url.clone(),
            self.recognition.model.clone(),
            self.api_keys.openai.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_with(env: &[(&str, &str)], toml: &str) -> Result<Config> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let fc = file::parse_config_file(toml)?;
        Config::from_sources(fc, |key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[], "").unwrap();

        assert_eq!(config.backend.url, DEFAULT_API_URL);
        assert_eq!(config.backend.speak_url(), "http://localhost:8000/voice/speak");
        assert_eq!(config.synthesis.provider, SynthesisProvider::Backend);
        assert_eq!(config.synthesis.model, "tts-1");
        assert_eq!(config.recognition.language, "en-US");
        assert_eq!(config.recognition.url, OPENAI_TRANSCRIPTION_URL);
        assert_eq!(config.recognition.model, "whisper-1");
        assert!(config.recognition.interim_results);
        assert_eq!(config.recognition.silence_timeout, Duration::from_secs(8));
        assert_eq!(config.voice, VoiceConfig::default());
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let config = config_with(
            &[("OPERA_API_URL", "http://env:1"), ("OPERA_VOICE", "Echo")],
            r#"
            [backend]
            url = "http://file:2"
            speak_path = "/tts"

            [voice]
            voice = "nova"
            auto_speak = true
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.speak_url(), "http://env:1/tts");
        assert_eq!(config.voice.voice, VoiceIdentity::Echo);
        assert!(config.voice.auto_speak);
    }

    #[test]
    fn test_recognition_options() {
        let config = config_with(
            &[("OPERA_STT_LANGUAGE", "fr-FR")],
            "[recognition]\ninterim_results = false\nsilence_timeout_secs = 3",
        )
        .unwrap();

        let options = config.recognition_options();
        assert_eq!(options.language, "fr-FR");
        assert!(options.continuous);
        assert!(!options.interim_results);
        assert_eq!(options.silence_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            config_with(&[("OPERA_VOICE_SPEED", "fast")], ""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config_with(&[("OPERA_TTS_PROVIDER", "polly")], ""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config_with(&[], "[voice]\nvoice = \"robot\""),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_openai_synthesis_needs_key() {
        let config = config_with(&[("OPERA_TTS_PROVIDER", "openai")], "").unwrap();
        assert!(config.synthesizer().is_err());

        let config = config_with(
            &[("OPERA_TTS_PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-test")],
            "",
        )
        .unwrap();
        assert!(config.synthesizer().is_ok());
    }

    #[test]
    fn test_transcriber_needs_key_for_hosted_endpoint() {
        let config = config_with(&[], "").unwrap();
        assert!(config.transcriber().is_err());

        let config = config_with(&[("OPERA_STT_URL", "http://localhost:9000/stt")], "").unwrap();
        assert!(config.transcriber().is_ok());
    }

    #[test]
    fn test_api_key_debug_redacted() {
        let keys = ApiKeys {
            openai: Some("sk-secret".to_string()),
        };
        assert!(!format!("{keys:?}").contains("sk-secret"));
    }
}
