//! Speech capture session over a continuous recognizer

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::events::{VoiceEvent, emit};
use super::recognizer::{
    ContinuousRecognizer, RecognitionEvent, RecognitionOptions, RecognizerCapability,
};
use crate::{Error, Result};

/// Receives each recognized segment
pub type TranscriptCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No recognition capability; capture is disabled for good
    Uninitialized,
    /// Ready to start
    Idle,
    /// Recognizer running, transcripts flowing
    Listening,
    /// Last session ended with a recognizer error
    Errored,
}

struct CaptureInner {
    state: CaptureState,
    recognizer: Option<Box<dyn ContinuousRecognizer>>,
    /// Bumped on every start and stop; events tagged with an older value are dropped
    generation: u64,
    callback: Option<TranscriptCallback>,
    pump: Option<JoinHandle<()>>,
}

/// Turns a recognizer into a stream of transcript callbacks
pub struct SpeechCaptureSession {
    inner: Arc<Mutex<CaptureInner>>,
    options: RecognitionOptions,
    events: broadcast::Sender<VoiceEvent>,
}

impl SpeechCaptureSession {
    /// Create a session from a capability probe
    ///
    /// An unavailable capability leaves the session `Uninitialized`
    #[must_use]
    pub fn initialize(
        capability: RecognizerCapability,
        options: RecognitionOptions,
        events: broadcast::Sender<VoiceEvent>,
    ) -> Self {
        let (state, recognizer) = match capability {
            RecognizerCapability::Available(recognizer) => {
                tracing::debug!(language = %options.language, "speech capture initialized");
                (CaptureState::Idle, Some(recognizer))
            }
            RecognizerCapability::Unavailable(reason) => {
                tracing::warn!(reason, "speech recognition unavailable, capture disabled");
                (CaptureState::Uninitialized, None)
            }
        };

        Self {
            inner: Arc::new(Mutex::new(CaptureInner {
                state,
                recognizer,
                generation: 0,
                callback: None,
                pump: None,
            })),
            options,
            events,
        }
    }

    #[must_use]
    pub fn state(&self) -> CaptureState {
        lock(&self.inner).state
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state() == CaptureState::Listening
    }

    /// Whether a recognizer was found at initialization
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state() != CaptureState::Uninitialized
    }

    /// Options the recognizer is started with
    #[must_use]
    pub const fn options(&self) -> &RecognitionOptions {
        &self.options
    }

    /// Start listening, delivering segments to `on_transcript`
    ///
    /// No-op if already listening.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityUnavailable` when no recognizer exists, or the
    /// recognizer's own error if it fails to start
    pub fn start(&self, on_transcript: TranscriptCallback) -> Result<()> {
        let mut inner = lock(&self.inner);

        match inner.state {
            CaptureState::Uninitialized => {
                return Err(Error::CapabilityUnavailable(
                    "no speech recognizer on this platform".to_string(),
                ));
            }
            CaptureState::Listening => {
                tracing::debug!("already listening");
                return Ok(());
            }
            CaptureState::Idle | CaptureState::Errored => {}
        }

        let runtime = Handle::try_current()
            .map_err(|e| Error::Audio(format!("capture requires an async runtime: {e}")))?;

        inner.generation += 1;
        let generation = inner.generation;
        let (tx, rx) = mpsc::unbounded_channel();

        let Some(recognizer) = inner.recognizer.as_mut() else {
            return Err(Error::CapabilityUnavailable("recognizer missing".to_string()));
        };
        if let Err(e) = recognizer.start(&self.options, tx) {
            tracing::error!(error = %e, "failed to start speech recognition");
            inner.state = CaptureState::Errored;
            return Err(e);
        }

        inner.callback = Some(Arc::clone(&on_transcript));
        inner.state = CaptureState::Listening;
        let pump = runtime.spawn(pump_events(
            Arc::clone(&self.inner),
            self.events.clone(),
            generation,
            rx,
            on_transcript,
        ));
        if let Some(stale) = inner.pump.replace(pump) {
            stale.abort();
        }
        emit(&self.events, VoiceEvent::Listening(true));
        drop(inner);

        tracing::info!(generation, language = %self.options.language, "listening started");
        Ok(())
    }

    /// Stop listening; returns immediately without waiting for the recognizer
    pub fn stop(&self) {
        if self.halt().is_some() {
            tracing::info!("listening stopped");
        }
    }

    /// Stop an active session and hand back its callback for a later resume
    pub fn suspend(&self) -> Option<TranscriptCallback> {
        let callback = self.halt();
        if callback.is_some() {
            tracing::debug!("listening suspended");
        }
        callback
    }

    fn halt(&self) -> Option<TranscriptCallback> {
        let mut inner = lock(&self.inner);
        if inner.state != CaptureState::Listening {
            return None;
        }

        inner.generation += 1;
        if let Some(recognizer) = inner.recognizer.as_mut() {
            recognizer.stop();
        }
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        inner.state = CaptureState::Idle;
        emit(&self.events, VoiceEvent::Listening(false));
        inner.callback.take()
    }
}

impl Drop for SpeechCaptureSession {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Forward recognizer events for one session until it ends
async fn pump_events(
    inner: Arc<Mutex<CaptureInner>>,
    events: broadcast::Sender<VoiceEvent>,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<RecognitionEvent>,
    on_transcript: TranscriptCallback,
) {
    while let Some(event) = rx.recv().await {
        match event {
            RecognitionEvent::Transcript(text) => {
                if lock(&inner).generation != generation {
                    return;
                }
                tracing::trace!(transcript = %text, "transcript segment");
                on_transcript(text);
            }
            RecognitionEvent::Error(message) => {
                tracing::warn!(error = %message, "speech recognition error");
                end_session(&inner, &events, generation, CaptureState::Errored);
                return;
            }
            RecognitionEvent::End => {
                tracing::debug!(generation, "recognizer ended session");
                end_session(&inner, &events, generation, CaptureState::Idle);
                return;
            }
        }
    }

    end_session(&inner, &events, generation, CaptureState::Idle);
}

/// Apply an implicit termination if it still belongs to the live session
fn end_session(
    inner: &Mutex<CaptureInner>,
    events: &broadcast::Sender<VoiceEvent>,
    generation: u64,
    next: CaptureState,
) {
    let mut inner = lock(inner);
    if inner.generation != generation || inner.state != CaptureState::Listening {
        return;
    }

    if let Some(recognizer) = inner.recognizer.as_mut() {
        recognizer.stop();
    }
    inner.state = next;
    inner.callback = None;
    inner.pump = None;
    emit(events, VoiceEvent::Listening(false));
}

fn lock(inner: &Mutex<CaptureInner>) -> MutexGuard<'_, CaptureInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
