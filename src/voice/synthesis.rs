//! Speech synthesis and playback lifecycle
//!
//! At most one [`PlaybackResource`] exists at a time. Every request and
//! resource carries a generation number; results and completions that
//! arrive for an older generation are discarded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use super::events::{VoiceEvent, emit};
use super::playback::{AudioOutput, PlaybackCompletion, PlaybackHandle};
use super::tts::{SpeechSynthesizer, SynthesisRequest};
use super::VoiceConfig;
use crate::Result;

/// Runs once when a playback resource is released
pub type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Where the synthesis side currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    /// Waiting on the synthesis endpoint
    Requesting,
    /// Audio handed to the output
    Playing,
}

impl PlaybackState {
    /// Requesting and playing both count as speaking
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Requesting | Self::Playing)
    }
}

/// Why a speak call did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    VoiceDisabled,
    EmptyText,
    AutoSpeakOff,
}

/// Result of a successful speak call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Audio is playing
    Started,
    /// Nothing was requested
    Skipped(SkipReason),
    /// A stop or newer speak arrived while this request was in flight
    Superseded,
}

/// One requested or playing piece of synthesized audio
struct PlaybackResource {
    generation: u64,
    state: PlaybackState,
    source_bytes: usize,
    handle: Option<PlaybackHandle>,
    on_release: Option<ReleaseHook>,
}

impl PlaybackResource {
    fn requesting(generation: u64, on_release: Option<ReleaseHook>) -> Self {
        Self {
            generation,
            state: PlaybackState::Requesting,
            source_bytes: 0,
            handle: None,
            on_release,
        }
    }
}

impl Drop for PlaybackResource {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.halt();
        }
        tracing::trace!(
            generation = self.generation,
            state = ?self.state,
            bytes = self.source_bytes,
            "playback resource released"
        );
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

struct SynthesisInner {
    generation: u64,
    resource: Option<PlaybackResource>,
}

/// Turns text into audible playback through a remote synthesizer
pub struct SpeechSynthesisController {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    inner: Arc<Mutex<SynthesisInner>>,
    events: broadcast::Sender<VoiceEvent>,
}

impl SpeechSynthesisController {
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        events: broadcast::Sender<VoiceEvent>,
    ) -> Self {
        Self {
            synthesizer,
            output,
            inner: Arc::new(Mutex::new(SynthesisInner {
                generation: 0,
                resource: None,
            })),
            events,
        }
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        lock(&self.inner)
            .resource
            .as_ref()
            .map_or(PlaybackState::Idle, |r| r.state)
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.state().is_active()
    }

    /// Why `speak` would return without issuing a request, if it would
    #[must_use]
    pub fn skip_reason(text: &str, config: &VoiceConfig) -> Option<SkipReason> {
        if !config.enabled {
            Some(SkipReason::VoiceDisabled)
        } else if text.trim().is_empty() {
            Some(SkipReason::EmptyText)
        } else {
            None
        }
    }

    /// Synthesize `text` with the voice and speed from `config` and play it
    ///
    /// # Errors
    ///
    /// Returns `Transport` or `Playback` if the current request fails; state
    /// is reset to idle first
    pub async fn speak(&self, text: &str, config: &VoiceConfig) -> Result<SpeakOutcome> {
        self.speak_with_release(text, config, None).await
    }

    /// Like [`speak`](Self::speak), running `on_release` once the resulting
    /// playback is released, or immediately if nothing is requested
    ///
    /// # Errors
    ///
    /// Same as [`speak`](Self::speak)
    pub async fn speak_with_release(
        &self,
        text: &str,
        config: &VoiceConfig,
        on_release: Option<ReleaseHook>,
    ) -> Result<SpeakOutcome> {
        if let Some(reason) = Self::skip_reason(text, config) {
            tracing::debug!(?reason, "speak skipped");
            if let Some(hook) = on_release {
                hook();
            }
            return Ok(SpeakOutcome::Skipped(reason));
        }

        self.stop();

        let (generation, replaced) = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            let generation = inner.generation;
            let replaced = install(
                &mut inner,
                &self.events,
                PlaybackResource::requesting(generation, on_release),
            );
            (generation, replaced)
        };
        drop(replaced);

        let request = SynthesisRequest {
            text: text.to_string(),
            voice: config.voice,
            speed: config.speed,
        };
        tracing::info!(generation, voice = %request.voice, speed = request.speed, "requesting speech");

        let audio = match self.synthesizer.synthesize(&request).await {
            Ok(audio) => audio,
            Err(e) => return self.fail(generation, e),
        };

        if !self.is_current(generation) {
            tracing::debug!(generation, "discarding synthesis result for superseded request");
            return Ok(SpeakOutcome::Superseded);
        }

        let source_bytes = audio.len();
        let mut handle = match self.output.play(audio) {
            Ok(handle) => handle,
            Err(e) => return self.fail(generation, e),
        };
        let completion = handle.take_completion();
        let mut handle = Some(handle);

        {
            let mut inner = lock(&self.inner);
            if let Some(resource) = inner
                .resource
                .as_mut()
                .filter(|r| r.generation == generation)
            {
                resource.state = PlaybackState::Playing;
                resource.source_bytes = source_bytes;
                resource.handle = handle.take();
            }
        }

        if handle.is_some() {
            // Dropping the unclaimed handle halts the output
            drop(handle);
            tracing::debug!(generation, "stopped before playback began");
            return Ok(SpeakOutcome::Superseded);
        }

        match completion {
            Some(completion) => {
                tokio::spawn(watch_completion(
                    Arc::clone(&self.inner),
                    self.events.clone(),
                    generation,
                    completion,
                ));
            }
            None => {
                drop(release_if_current(&self.inner, &self.events, generation));
            }
        }

        tracing::info!(generation, bytes = source_bytes, "playback started");
        Ok(SpeakOutcome::Started)
    }

    /// Halt playback or abandon the in-flight request; no-op when idle
    pub fn stop(&self) {
        let released = {
            let mut inner = lock(&self.inner);
            if inner.resource.is_none() {
                return;
            }
            inner.generation += 1;
            take(&mut inner, &self.events)
        };

        if let Some(resource) = released {
            tracing::info!(generation = resource.generation, state = ?resource.state, "speech stopped");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.inner)
            .resource
            .as_ref()
            .is_some_and(|r| r.generation == generation)
    }

    /// Reset after a failure of request `generation`
    fn fail(&self, generation: u64, error: crate::Error) -> Result<SpeakOutcome> {
        match release_if_current(&self.inner, &self.events, generation) {
            Some(resource) => {
                drop(resource);
                tracing::error!(generation, error = %error, "speech failed");
                Err(error)
            }
            None => {
                tracing::debug!(generation, error = %error, "ignoring failure of superseded request");
                Ok(SpeakOutcome::Superseded)
            }
        }
    }
}

impl Drop for SpeechSynthesisController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait for natural completion of playback `generation` and release it
async fn watch_completion(
    inner: Arc<Mutex<SynthesisInner>>,
    events: broadcast::Sender<VoiceEvent>,
    generation: u64,
    completion: PlaybackCompletion,
) {
    let result = completion.wait().await;

    match (release_if_current(&inner, &events, generation), result) {
        (Some(_), Ok(())) => tracing::debug!(generation, "playback finished"),
        (Some(_), Err(e)) => tracing::error!(generation, error = %e, "playback failed"),
        (None, _) => tracing::trace!(generation, "ignoring completion of superseded playback"),
    }
}

/// Take the resource out if it still belongs to `generation`
///
/// The caller drops the returned resource outside the lock so release
/// hooks never run while it is held.
fn release_if_current(
    inner: &Mutex<SynthesisInner>,
    events: &broadcast::Sender<VoiceEvent>,
    generation: u64,
) -> Option<PlaybackResource> {
    let mut inner = lock(inner);
    if inner.resource.as_ref().is_some_and(|r| r.generation == generation) {
        take(&mut inner, events)
    } else {
        None
    }
}

fn install(
    inner: &mut SynthesisInner,
    events: &broadcast::Sender<VoiceEvent>,
    resource: PlaybackResource,
) -> Option<PlaybackResource> {
    let replaced = inner.resource.replace(resource);
    if replaced.is_none() {
        emit(events, VoiceEvent::Speaking(true));
    }
    replaced
}

fn take(
    inner: &mut SynthesisInner,
    events: &broadcast::Sender<VoiceEvent>,
) -> Option<PlaybackResource> {
    let resource = inner.resource.take();
    if resource.is_some() {
        emit(events, VoiceEvent::Speaking(false));
    }
    resource
}

fn lock(inner: &Mutex<SynthesisInner>) -> MutexGuard<'_, SynthesisInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
