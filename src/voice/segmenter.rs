//! Utterance segmentation
//!
//! Splits a microphone stream into utterances with a local energy gate so
//! only speech is sent for transcription.

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to keep (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Speech accumulated between interim results (in samples)
const INTERIM_SAMPLES: usize = 32000; // 2 seconds

/// Longest utterance sent for transcription (in samples)
pub const MAX_UTTERANCE_SAMPLES: usize = 480_000; // 30 seconds

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Inside an utterance
    Speaking,
}

/// Something worth transcribing, or the end of the stream
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Utterance so far; speech is still going
    Interim(Vec<f32>),
    /// Complete utterance followed by silence
    Final(Vec<f32>),
    /// No speech for the configured timeout
    Timeout,
}

/// Energy-based utterance detector
pub struct UtteranceSegmenter {
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
    idle_counter: usize,
    since_interim: usize,
    interim_results: bool,
    timeout_samples: usize,
}

impl UtteranceSegmenter {
    /// Create a segmenter
    ///
    /// `timeout_samples` of uninterrupted silence outside an utterance ends
    /// the stream
    #[must_use]
    pub const fn new(interim_results: bool, timeout_samples: usize) -> Self {
        Self {
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
            idle_counter: 0,
            since_interim: 0,
            interim_results,
            timeout_samples,
        }
    }

    /// Feed captured samples
    pub fn push(&mut self, samples: &[f32]) -> Option<Segment> {
        if samples.is_empty() {
            return None;
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    self.idle_counter = 0;
                    self.since_interim = samples.len();
                    tracing::trace!(energy, "speech detected");
                    return None;
                }

                self.idle_counter += samples.len();
                if self.idle_counter > self.timeout_samples {
                    tracing::debug!(samples = self.idle_counter, "silence timeout");
                    self.idle_counter = 0;
                    return Some(Segment::Timeout);
                }
                None
            }
            SegmenterState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);
                self.since_interim += samples.len();

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > SILENCE_SAMPLES {
                    if self.speech_buffer.len() > MIN_SPEECH_SAMPLES + self.silence_counter {
                        tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
                        let utterance = std::mem::take(&mut self.speech_buffer);
                        self.reset();
                        return Some(Segment::Final(utterance));
                    }

                    tracing::trace!("too short for speech, discarding");
                    self.reset();
                    return None;
                }

                if self.speech_buffer.len() >= MAX_UTTERANCE_SAMPLES {
                    tracing::debug!(samples = self.speech_buffer.len(), "utterance length limit reached");
                    let utterance = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    return Some(Segment::Final(utterance));
                }

                if self.interim_results && self.since_interim >= INTERIM_SAMPLES {
                    self.since_interim = 0;
                    return Some(Segment::Interim(self.speech_buffer.clone()));
                }

                None
            }
        }
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
        self.idle_counter = 0;
        self.since_interim = 0;
    }

    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Audio accumulated for the current utterance
    #[must_use]
    pub fn speech_buffer(&self) -> &[f32] {
        &self.speech_buffer
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
