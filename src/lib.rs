//! Opera Voice - voice interaction controller for the Opera assistant
//!
//! This library provides:
//! - Continuous speech capture with transcript callbacks
//! - Speech synthesis through the Opera backend, with interruptible playback
//! - A shared voice configuration store with snapshot semantics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              VoiceInteractionController              │
//! │   config store  │  capture session  │  synthesis     │
//! └────────┬─────────────────┬──────────────────┬───────┘
//!          │                 │                  │
//! ┌────────▼───────┐ ┌───────▼────────┐ ┌───────▼───────┐
//! │ VoiceConfig    │ │ Continuous     │ │ Speech        │
//! │ snapshots      │ │ Recognizer     │ │ Synthesizer + │
//! │                │ │ (mic + STT)    │ │ AudioOutput   │
//! └────────────────┘ └────────────────┘ └───────────────┘
//! ```

pub mod config;
pub mod error;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use voice::{
    SpeakOutcome, VoiceConfig, VoiceConfigPatch, VoiceEvent, VoiceIdentity,
    VoiceInteractionController, VoiceStatus,
};
