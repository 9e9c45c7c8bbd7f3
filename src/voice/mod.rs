//! Voice interaction
//!
//! Continuous speech capture, speech synthesis with playback, and the
//! shared voice configuration. Platform access sits behind
//! [`ContinuousRecognizer`], [`SpeechSynthesizer`] and [`AudioOutput`] so
//! the lifecycle logic runs the same against real devices and fakes.

mod capture;
mod config;
mod controller;
mod events;
mod microphone;
mod playback;
mod recognizer;
mod segmenter;
mod stt;
mod synthesis;
mod tts;

pub use capture::{CaptureState, SpeechCaptureSession, TranscriptCallback};
pub use config::{
    MAX_SPEED, MIN_SPEED, VoiceConfig, VoiceConfigPatch, VoiceConfigStore, VoiceIdentity,
    clamp_speed,
};
pub use controller::VoiceInteractionController;
pub use events::{VoiceEvent, VoiceStatus};
pub use microphone::{MicrophoneRecognizer, SAMPLE_RATE, samples_to_wav};
pub use playback::{
    AudioOutput, PLAYBACK_SAMPLE_RATE, PlaybackCompletion, PlaybackHandle, PlaybackSignal,
    SpeakerOutput, playback_channel,
};
pub use recognizer::{
    ContinuousRecognizer, DEFAULT_LANGUAGE, RecognitionEvent, RecognitionOptions,
    RecognizerCapability,
};
pub use segmenter::{MAX_UTTERANCE_SAMPLES, Segment, SegmenterState, UtteranceSegmenter};
pub use stt::{OPENAI_TRANSCRIPTION_URL, Transcriber};
pub use synthesis::{PlaybackState, ReleaseHook, SkipReason, SpeakOutcome, SpeechSynthesisController};
pub use tts::{HttpSynthesizer, SpeechSynthesizer, SynthesisRequest};
