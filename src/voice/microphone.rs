//! Microphone-backed continuous recognizer
//!
//! Audio is captured from the default input device, split into utterances
//! locally, and each utterance is sent to a transcription endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::recognizer::{
    ContinuousRecognizer, RecognitionEvent, RecognitionOptions, RecognizerCapability,
};
use super::segmenter::{Segment, UtteranceSegmenter};
use super::stt::Transcriber;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How often the capture buffer is drained
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Live input stream from the default microphone
///
/// Samples accumulate in a shared buffer until drained. The stream stops
/// when this value is dropped.
struct MicrophoneStream {
    pending: Arc<Mutex<Vec<f32>>>,
    _stream: Stream,
}

impl MicrophoneStream {
    /// Open the default input device as a 16 kHz mono stream and start it
    fn open() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let rate = SampleRate(SAMPLE_RATE);
        let config: StreamConfig = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| c.channels() == 1 && (c.min_sample_rate()..=c.max_sample_rate()).contains(&rate))
            .ok_or_else(|| Error::Audio("input device has no 16 kHz mono mode".to_string()))?
            .with_sample_rate(rate)
            .config();

        let pending = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pending);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(data);
                },
                |err| tracing::error!(error = %err, "microphone stream error"),
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "microphone opened"
        );

        Ok(Self {
            pending,
            _stream: stream,
        })
    }

    /// Take everything captured since the last drain
    fn drain(&self) -> Vec<f32> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Encode mono samples as 16-bit PCM WAV for transcription uploads
///
/// # Errors
///
/// Returns `Audio` if encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let wav_error = |e: hound::Error| Error::Audio(format!("WAV encoding failed: {e}"));
    let format = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut out = std::io::Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut out, format).map_err(wav_error)?;
    for &sample in samples {
        writer.write_sample(to_pcm16(sample)).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;

    Ok(out.into_inner())
}

/// Scale a [-1.0, 1.0] sample to `i16`, saturating outside that range
#[allow(clippy::cast_possible_truncation)]
fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

/// One running capture thread
struct RecognizerThread {
    stop: Arc<AtomicBool>,
}

/// Recognizer over the default microphone and a remote transcriber
pub struct MicrophoneRecognizer {
    transcriber: Arc<Transcriber>,
    session: Option<RecognizerThread>,
}

impl MicrophoneRecognizer {
    /// Probe for an input device; without one, or without a transcriber,
    /// recognition is unavailable
    #[must_use]
    pub fn probe(transcriber: Option<Transcriber>) -> RecognizerCapability {
        let Some(transcriber) = transcriber else {
            return RecognizerCapability::Unavailable(
                "no transcription endpoint configured".to_string(),
            );
        };

        if cpal::default_host().default_input_device().is_none() {
            return RecognizerCapability::Unavailable("no input device available".to_string());
        }

        RecognizerCapability::available(Self {
            transcriber: Arc::new(transcriber),
            session: None,
        })
    }
}

impl ContinuousRecognizer for MicrophoneRecognizer {
    fn start(
        &mut self,
        options: &RecognitionOptions,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<()> {
        self.stop();

        let runtime = Handle::try_current()
            .map_err(|e| Error::Audio(format!("recognizer requires an async runtime: {e}")))?;
        let stop = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            transcriber: Arc::clone(&self.transcriber),
            runtime,
            options: options.clone(),
            events,
            stop: Arc::clone(&stop),
        };

        // cpal streams are not Send; the device is opened on the capture
        // thread and a failure to open it ends the session with an error
        std::thread::Builder::new()
            .name("opera-capture".to_string())
            .spawn(move || match MicrophoneStream::open() {
                Ok(microphone) => worker.run(&microphone),
                Err(e) => {
                    tracing::error!(error = %e, "failed to open microphone");
                    worker.report(RecognitionEvent::Error(e.to_string()));
                }
            })
            .map_err(|e| Error::Audio(format!("failed to spawn capture thread: {e}")))?;

        self.session = Some(RecognizerThread { stop });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop.store(true, Ordering::Release);
        }
    }
}

impl Drop for MicrophoneRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved onto the capture thread
struct Worker {
    transcriber: Arc<Transcriber>,
    runtime: Handle,
    options: RecognitionOptions,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(self, microphone: &MicrophoneStream) {
        let timeout_samples =
            usize::try_from(self.options.silence_timeout.as_millis() * u128::from(SAMPLE_RATE) / 1000)
                .unwrap_or(usize::MAX);
        let mut segmenter = UtteranceSegmenter::new(self.options.interim_results, timeout_samples);

        tracing::debug!(language = %self.options.language, "recognition thread running");

        while !self.stopped() {
            std::thread::sleep(POLL_INTERVAL);

            let event = match segmenter.push(&microphone.drain()) {
                None => continue,
                Some(Segment::Timeout) => Some(RecognitionEvent::End),
                Some(Segment::Interim(audio)) => self.transcribe(&audio).err(),
                Some(Segment::Final(audio)) => match self.transcribe(&audio) {
                    Ok(()) if !self.options.continuous => Some(RecognitionEvent::End),
                    Ok(()) => None,
                    Err(event) => Some(event),
                },
            };

            if let Some(event) = event {
                self.report(event);
                break;
            }
        }

        tracing::debug!("recognition thread finished");
    }

    /// Send the event that ends this session, unless it was stopped
    fn report(&self, event: RecognitionEvent) {
        if !self.stopped() {
            let _ = self.events.send(event);
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.events.is_closed()
    }

    /// Transcribe one segment and forward it; `Err` carries the event that
    /// ends the session
    fn transcribe(&self, audio: &[f32]) -> std::result::Result<(), RecognitionEvent> {
        let wav = samples_to_wav(audio, SAMPLE_RATE)
            .map_err(|e| RecognitionEvent::Error(e.to_string()))?;

        let text = self
            .runtime
            .block_on(self.transcriber.transcribe(wav, &self.options.language))
            .map_err(|e| RecognitionEvent::Error(e.to_string()))?;

        let text = text.trim();
        if !text.is_empty() && !self.stopped() {
            let _ = self
                .events
                .send(RecognitionEvent::Transcript(text.to_string()));
        }
        Ok(())
    }
}
