//! Continuous speech recognition capability

use std::time::Duration;

use tokio::sync::mpsc;

use crate::Result;

/// Recognition language used when none is configured
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// How a recognizer should be configured for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOptions {
    /// BCP 47 language tag
    pub language: String,

    /// Keep recognizing across utterances instead of stopping after one
    pub continuous: bool,

    /// Report partial results while an utterance is still in progress
    pub interim_results: bool,

    /// End the session after this long without speech
    pub silence_timeout: Duration,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            continuous: true,
            interim_results: true,
            silence_timeout: Duration::from_secs(8),
        }
    }
}

/// Something a recognizer reports during a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Most recently recognized segment, interim or final
    Transcript(String),
    /// Recognizer failed; the session is over
    Error(String),
    /// Recognizer ended on its own (silence timeout, device closed)
    End,
}

/// A platform speech recognizer that streams transcripts
///
/// Implementations must tolerate `stop` being called when no session is
/// running. Events that race a `stop` are discarded by the session.
pub trait ContinuousRecognizer: Send {
    /// Begin a session, reporting through `events`
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer cannot be started
    fn start(
        &mut self,
        options: &RecognitionOptions,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<()>;

    /// Request termination of the current session
    fn stop(&mut self);
}

/// Outcome of probing the platform for speech recognition
pub enum RecognizerCapability {
    /// A recognizer is present
    Available(Box<dyn ContinuousRecognizer>),
    /// No recognizer; capture is permanently disabled
    Unavailable(String),
}

impl RecognizerCapability {
    /// Wrap a concrete recognizer
    #[must_use]
    pub fn available(recognizer: impl ContinuousRecognizer + 'static) -> Self {
        Self::Available(Box::new(recognizer))
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl std::fmt::Debug for RecognizerCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(_) => f.write_str("Available"),
            Self::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}
