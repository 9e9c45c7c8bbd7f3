//! Shared test utilities
//!
//! In-memory stand-ins for the recognizer, the synthesis service and the
//! audio output so controller behavior can be driven without hardware or
//! network access.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};

use opera_voice::voice::{
    AudioOutput, ContinuousRecognizer, PlaybackHandle, PlaybackSignal, RecognitionEvent,
    RecognitionOptions, RecognizerCapability, SpeechSynthesizer, SynthesisRequest,
    VoiceConfigStore, VoiceEvent, VoiceInteractionController, playback_channel,
};
use opera_voice::{Error, Result, VoiceConfig};

/// How long tests wait for asynchronous effects
pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct RecognizerState {
    sessions: Vec<mpsc::UnboundedSender<RecognitionEvent>>,
    live: Option<usize>,
    options: Option<RecognitionOptions>,
    starts: usize,
    stops: usize,
    fail_next_start: bool,
}

/// Recognizer whose sessions are driven by the test
pub struct FakeRecognizer {
    state: Arc<Mutex<RecognizerState>>,
}

/// Test-side view of a [`FakeRecognizer`]
#[derive(Clone)]
pub struct RecognizerProbe {
    state: Arc<Mutex<RecognizerState>>,
}

impl FakeRecognizer {
    #[must_use]
    pub fn new() -> (Self, RecognizerProbe) {
        let state = Arc::new(Mutex::new(RecognizerState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            RecognizerProbe { state },
        )
    }
}

impl ContinuousRecognizer for FakeRecognizer {
    fn start(
        &mut self,
        options: &RecognitionOptions,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.starts += 1;
        if state.fail_next_start {
            state.fail_next_start = false;
            return Err(Error::Audio("microphone busy".to_string()));
        }
        state.sessions.push(events);
        state.live = Some(state.sessions.len() - 1);
        state.options = Some(options.clone());
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        state.live = None;
    }
}

impl RecognizerProbe {
    /// Send an event on the live session; false if none is live
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        let state = self.state.lock().unwrap();
        state
            .live
            .and_then(|i| state.sessions.get(i))
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Send an event on session `index`, live or not
    pub fn emit_on(&self, index: usize, event: RecognitionEvent) {
        let state = self.state.lock().unwrap();
        let _ = state.sessions[index].send(event);
    }

    #[must_use]
    pub fn live_sessions(&self) -> usize {
        usize::from(self.state.lock().unwrap().live.is_some())
    }

    #[must_use]
    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    #[must_use]
    pub fn last_options(&self) -> Option<RecognitionOptions> {
        self.state.lock().unwrap().options.clone()
    }

    pub fn fail_next_start(&self) {
        self.state.lock().unwrap().fail_next_start = true;
    }
}

/// Synthesizer that records requests and can hold them open
#[derive(Default)]
pub struct FakeSynthesizer {
    requests: Mutex<Vec<SynthesisRequest>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<Result<Vec<u8>>>>>,
    fail: Mutex<Option<String>>,
}

/// Releases a held synthesis request
pub struct SynthesisGate(oneshot::Sender<Result<Vec<u8>>>);

impl SynthesisGate {
    pub fn succeed(self) {
        let _ = self.0.send(Ok(b"held audio".to_vec()));
    }

    pub fn fail(self, message: &str) {
        let _ = self.0.send(Err(Error::Transport(message.to_string())));
    }
}

impl FakeSynthesizer {
    /// Hold the next request for `text` until the gate is released
    pub fn hold(&self, text: &str) -> SynthesisGate {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(text.to_string(), rx);
        SynthesisGate(tx)
    }

    /// Fail every request not held by a gate
    pub fn fail_with(&self, message: &str) {
        *self.fail.lock().unwrap() = Some(message.to_string());
    }

    #[must_use]
    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until `count` requests have arrived
    pub async fn wait_for_requests(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.requests.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("synthesis request never arrived");
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(request.clone());

        let gate = self.gates.lock().unwrap().remove(&request.text);
        if let Some(gate) = gate {
            return gate
                .await
                .unwrap_or_else(|_| Err(Error::Transport("gate dropped".to_string())));
        }

        let fail = self.fail.lock().unwrap().clone();
        match fail {
            Some(message) => Err(Error::Transport(message)),
            None => Ok(format!("audio:{}", request.text).into_bytes()),
        }
    }
}

/// Output that keeps playback open until the test finishes it
#[derive(Default)]
pub struct FakeOutput {
    played: Mutex<Vec<Vec<u8>>>,
    signals: Mutex<Vec<Option<PlaybackSignal>>>,
    reject: Mutex<bool>,
}

impl FakeOutput {
    /// Reject every later `play`
    pub fn reject_playback(&self) {
        *self.reject.lock().unwrap() = true;
    }

    #[must_use]
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }

    /// Whether the owner halted playback `index` before it finished
    #[must_use]
    pub fn is_halted(&self, index: usize) -> bool {
        self.signals.lock().unwrap()[index]
            .as_ref()
            .is_some_and(PlaybackSignal::is_halted)
    }

    /// Complete playback `index` naturally
    pub fn finish(&self, index: usize) {
        let signal = self.signals.lock().unwrap()[index].take();
        if let Some(signal) = signal {
            signal.finish(Ok(()));
        }
    }
}

impl AudioOutput for FakeOutput {
    fn play(&self, audio: Vec<u8>) -> Result<PlaybackHandle> {
        if *self.reject.lock().unwrap() {
            return Err(Error::Playback("device rejected audio".to_string()));
        }

        let (handle, signal) = playback_channel();
        self.played.lock().unwrap().push(audio);
        self.signals.lock().unwrap().push(Some(signal));
        Ok(handle)
    }
}

/// A controller wired to fakes
pub struct Harness {
    pub controller: VoiceInteractionController,
    pub recognizer: RecognizerProbe,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub output: Arc<FakeOutput>,
}

impl Harness {
    /// Controller with a recognizer and voice enabled
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(VoiceConfig {
            enabled: true,
            ..VoiceConfig::default()
        })
    }

    #[must_use]
    pub fn with_config(config: VoiceConfig) -> Self {
        let (recognizer, probe) = FakeRecognizer::new();
        Self::build(config, RecognizerCapability::available(recognizer), probe)
    }

    /// Controller on a platform without speech recognition
    #[must_use]
    pub fn without_recognizer() -> Self {
        let (_, probe) = FakeRecognizer::new();
        Self::build(
            VoiceConfig {
                enabled: true,
                ..VoiceConfig::default()
            },
            RecognizerCapability::Unavailable("no recognizer in tests".to_string()),
            probe,
        )
    }

    fn build(config: VoiceConfig, capability: RecognizerCapability, probe: RecognizerProbe) -> Self {
        let synthesizer = Arc::new(FakeSynthesizer::default());
        let output = Arc::new(FakeOutput::default());
        let controller = VoiceInteractionController::new(
            VoiceConfigStore::new(config).unwrap(),
            capability,
            RecognitionOptions::default(),
            Arc::clone(&synthesizer) as Arc<dyn SpeechSynthesizer>,
            Arc::clone(&output) as Arc<dyn AudioOutput>,
        );

        Self {
            controller,
            recognizer: probe,
            synthesizer,
            output,
        }
    }
}

/// Start listening with a callback that forwards transcripts to a channel
pub fn listen(controller: &VoiceInteractionController) -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    controller.start_listening(move |text| {
        let _ = tx.send(text);
    })?;
    Ok(rx)
}

/// Wait for the next transcript
pub async fn next_transcript(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
    tokio::time::timeout(WAIT, rx.recv()).await.ok().flatten()
}

/// Wait for the next event matching `pred`
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<VoiceEvent>,
    pred: impl Fn(&VoiceEvent) -> bool,
) -> VoiceEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(e) => panic!("event stream failed: {e}"),
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

/// Collect every event already published
pub fn drain_events(events: &mut broadcast::Receiver<VoiceEvent>) -> Vec<VoiceEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

/// Let spawned tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Wait until `cond` holds
pub async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
