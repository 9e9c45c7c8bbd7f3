//! Public voice interaction surface
//!
//! Composes the config store, the capture session and the synthesis
//! controller. Listening and speaking are independent axes unless
//! `suppress_capture_during_playback` is set, in which case `speak`
//! suspends an active capture session and resumes it with the same
//! callback once the playback resource is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use super::capture::{SpeechCaptureSession, TranscriptCallback};
use super::events::{EVENT_CAPACITY, VoiceEvent, VoiceStatus, emit};
use super::playback::AudioOutput;
use super::recognizer::{RecognitionOptions, RecognizerCapability};
use super::synthesis::{ReleaseHook, SkipReason, SpeakOutcome, SpeechSynthesisController};
use super::tts::SpeechSynthesizer;
use super::{VoiceConfig, VoiceConfigPatch, VoiceConfigStore};
use crate::Result;

/// Voice controller used by UI components
pub struct VoiceInteractionController {
    config: VoiceConfigStore,
    capture: Arc<SpeechCaptureSession>,
    synthesis: SpeechSynthesisController,
    events: broadcast::Sender<VoiceEvent>,
    /// Capture callback parked while a suppressing `speak` plays
    suspended: Arc<Mutex<Option<SuspendedCapture>>>,
    next_token: AtomicU64,
}

/// A capture session paused for playback, owned by the newest hook's token
struct SuspendedCapture {
    token: u64,
    callback: TranscriptCallback,
}

impl VoiceInteractionController {
    /// Build a controller from its collaborators
    ///
    /// `recognizer` is the result of the platform capability probe; an
    /// unavailable recognizer disables capture for the controller's lifetime.
    #[must_use]
    pub fn new(
        config: VoiceConfigStore,
        recognizer: RecognizerCapability,
        recognition: RecognitionOptions,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            capture: Arc::new(SpeechCaptureSession::initialize(
                recognizer,
                recognition,
                events.clone(),
            )),
            synthesis: SpeechSynthesisController::new(synthesizer, output, events.clone()),
            config,
            events,
            suspended: Arc::new(Mutex::new(None)),
            next_token: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.capture.is_listening()
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.synthesis.is_speaking()
    }

    #[must_use]
    pub fn status(&self) -> VoiceStatus {
        VoiceStatus {
            listening: self.is_listening(),
            speaking: self.is_speaking(),
        }
    }

    /// Whether the platform offered a speech recognizer
    #[must_use]
    pub fn has_capture_capability(&self) -> bool {
        self.capture.is_available()
    }

    /// Current configuration snapshot
    #[must_use]
    pub fn config(&self) -> Arc<VoiceConfig> {
        self.config.snapshot()
    }

    /// Merge `patch` into the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if the patch is rejected
    pub fn set_config(&self, patch: &VoiceConfigPatch) -> Result<Arc<VoiceConfig>> {
        let next = self.config.set_config(patch)?;
        emit(&self.events, VoiceEvent::ConfigChanged(Arc::clone(&next)));
        Ok(next)
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    /// Start continuous capture, invoking `on_transcript` per segment
    ///
    /// # Errors
    ///
    /// Returns `CapabilityUnavailable` if there is no recognizer, or the
    /// recognizer's error if it fails to start
    pub fn start_listening<F>(&self, on_transcript: F) -> Result<()>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.cancel_pending_resume();
        self.capture.start(Arc::new(on_transcript))
    }

    /// Stop capture; always leaves `is_listening` false
    pub fn stop_listening(&self) {
        self.cancel_pending_resume();
        self.capture.stop();
    }

    /// Speak `text` with the current configuration
    ///
    /// # Errors
    ///
    /// Returns `Transport` or `Playback` on failure of this request
    pub async fn speak(&self, text: &str) -> Result<SpeakOutcome> {
        let config = self.config.snapshot();

        // Skipped calls leave capture and any pending resume untouched
        if let Some(reason) = SpeechSynthesisController::skip_reason(text, &config) {
            tracing::debug!(?reason, "speak skipped");
            return Ok(SpeakOutcome::Skipped(reason));
        }

        let on_release = if config.suppress_capture_during_playback {
            self.suspend_capture()
        } else {
            None
        };

        self.synthesis
            .speak_with_release(text, &config, on_release)
            .await
    }

    /// Speak an assistant reply if auto-speak is on
    ///
    /// # Errors
    ///
    /// Same as [`speak`](Self::speak)
    pub async fn speak_reply(&self, text: &str) -> Result<SpeakOutcome> {
        if !self.config.snapshot().auto_speak {
            return Ok(SpeakOutcome::Skipped(SkipReason::AutoSpeakOff));
        }
        self.speak(text).await
    }

    /// Halt playback or abandon an in-flight request
    pub fn stop_speaking(&self) {
        self.synthesis.stop();
    }

    /// Suspend capture and build the hook that resumes it
    ///
    /// If capture is already parked by an earlier playback, the newest
    /// hook takes over the resume so releasing the older playback does
    /// not reopen the microphone.
    fn suspend_capture(&self) -> Option<ReleaseHook> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let mut slot = lock_slot(&self.suspended);

        if let Some(callback) = self.capture.suspend() {
            *slot = Some(SuspendedCapture { token, callback });
            tracing::debug!(token, "capture suspended for playback");
        } else if let Some(parked) = slot.as_mut() {
            parked.token = token;
        } else {
            return None;
        }
        drop(slot);

        Some(resume_hook(
            Arc::clone(&self.capture),
            Arc::clone(&self.suspended),
            token,
        ))
    }

    fn cancel_pending_resume(&self) {
        if lock_slot(&self.suspended).take().is_some() {
            tracing::debug!("pending capture resume cancelled");
        }
    }
}

impl Drop for VoiceInteractionController {
    fn drop(&mut self) {
        self.cancel_pending_resume();
        self.synthesis.stop();
        self.capture.stop();
    }
}

impl std::fmt::Debug for VoiceInteractionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceInteractionController")
            .field("status", &self.status())
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}

fn resume_hook(
    capture: Arc<SpeechCaptureSession>,
    suspended: Arc<Mutex<Option<SuspendedCapture>>>,
    token: u64,
) -> ReleaseHook {
    Box::new(move || {
        let parked = {
            let mut slot = lock_slot(&suspended);
            if slot.as_ref().is_some_and(|s| s.token == token) {
                slot.take()
            } else {
                None
            }
        };

        if let Some(parked) = parked {
            match capture.start(parked.callback) {
                Ok(()) => tracing::debug!(token, "capture resumed after playback"),
                Err(e) => tracing::warn!(error = %e, "failed to resume capture after playback"),
            }
        }
    })
}

fn lock_slot(
    slot: &Mutex<Option<SuspendedCapture>>,
) -> MutexGuard<'_, Option<SuspendedCapture>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
