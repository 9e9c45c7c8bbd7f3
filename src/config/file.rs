//! TOML configuration file loading
//!
//! Supports `~/.config/opera/voice.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceConfigFile {
    /// Opera backend location
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Speech synthesis provider
    #[serde(default)]
    pub synthesis: SynthesisFileConfig,

    /// Speech recognition
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Initial voice preferences
    #[serde(default)]
    pub voice: VoicePrefsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Opera backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL (e.g. "http://localhost:8000")
    pub url: Option<String>,

    /// Path of the speech endpoint under the base URL
    pub speak_path: Option<String>,
}

/// Synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SynthesisFileConfig {
    /// "backend" or "openai"
    pub provider: Option<String>,

    /// TTS model for direct `OpenAI` synthesis (e.g. "tts-1")
    pub model: Option<String>,
}

/// Recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// BCP 47 language tag
    pub language: Option<String>,

    /// Transcription endpoint
    pub url: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub model: Option<String>,

    pub interim_results: Option<bool>,

    pub silence_timeout_secs: Option<u64>,
}

/// Voice preferences applied at startup
#[derive(Debug, Default, Deserialize)]
pub struct VoicePrefsFileConfig {
    pub enabled: Option<bool>,

    /// Voice identifier (e.g. "nova")
    pub voice: Option<String>,

    pub speed: Option<f32>,

    pub auto_speak: Option<bool>,

    pub suppress_capture_during_playback: Option<bool>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid TOML for this schema
pub fn parse_config_file(content: &str) -> Result<VoiceConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceConfigFile {
    let Some(path) = config_file_path() else {
        return VoiceConfigFile::default();
    };

    if !path.exists() {
        return VoiceConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/opera/voice.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("opera").join("voice.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_parse_partial_file() {
        let fc = parse_config_file(
            r#"
            [backend]
            url = "http://opera.local:9000"

            [voice]
            voice = "nova"
            speed = 1.25
            "#,
        )
        .unwrap();

        assert_eq!(fc.backend.url.as_deref(), Some("http://opera.local:9000"));
        assert!(fc.backend.speak_path.is_none());
        assert_eq!(fc.voice.voice.as_deref(), Some("nova"));
        assert_eq!(fc.voice.speed, Some(1.25));
        assert!(fc.recognition.language.is_none());
        assert!(fc.api_keys.openai.is_none());
    }

    #[test]
    fn test_parse_empty_file() {
        let fc = parse_config_file("").unwrap();
        assert!(fc.synthesis.provider.is_none());
    }

    #[test]
    fn test_parse_invalid_file() {
        let result = parse_config_file("[recognition]\nsilence_timeout_secs = \"soon\"");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_config_file_path() {
        if let Some(path) = config_file_path() {
            assert!(path.ends_with("opera/voice.toml"));
        }
    }
}
