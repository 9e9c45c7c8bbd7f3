//! Playback handles and speaker output

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Poll interval while waiting for the output stream to drain
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Plays encoded audio somewhere audible
pub trait AudioOutput: Send + Sync {
    /// Begin playing `audio`, returning once playback has started
    ///
    /// # Errors
    ///
    /// Returns `Playback` if the audio cannot be decoded or played
    fn play(&self, audio: Vec<u8>) -> Result<PlaybackHandle>;
}

/// Create a connected handle/signal pair for one playback
///
/// The handle goes to whoever owns the playback; the signal goes to the
/// code driving the device.
#[must_use]
pub fn playback_channel() -> (PlaybackHandle, PlaybackSignal) {
    let halted = Arc::new(AtomicBool::new(false));
    let (tx, rx) = oneshot::channel();

    (
        PlaybackHandle {
            halted: Arc::clone(&halted),
            done: Some(rx),
        },
        PlaybackSignal { halted, done: tx },
    )
}

/// Owner side of an active playback
///
/// Dropping the handle halts playback.
#[derive(Debug)]
pub struct PlaybackHandle {
    halted: Arc<AtomicBool>,
    done: Option<oneshot::Receiver<Result<()>>>,
}

impl PlaybackHandle {
    /// Ask the device side to stop as soon as possible
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Detach the completion future; `None` if already taken
    pub fn take_completion(&mut self) -> Option<PlaybackCompletion> {
        self.done.take().map(PlaybackCompletion)
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Resolves when the device side finishes or gives up
#[derive(Debug)]
pub struct PlaybackCompletion(oneshot::Receiver<Result<()>>);

impl PlaybackCompletion {
    /// Wait for playback to end
    ///
    /// # Errors
    ///
    /// Returns `Playback` if the device failed mid-stream or went away
    /// without reporting
    pub async fn wait(self) -> Result<()> {
        self.0
            .await
            .unwrap_or_else(|_| Err(Error::Playback("playback ended without completion".to_string())))
    }
}

/// Device side of an active playback
#[derive(Debug)]
pub struct PlaybackSignal {
    halted: Arc<AtomicBool>,
    done: oneshot::Sender<Result<()>>,
}

impl PlaybackSignal {
    /// Whether the owner asked playback to stop
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Report how playback ended
    pub fn finish(self, result: Result<()>) {
        let _ = self.done.send(result);
    }
}

/// Plays MP3 audio on the default output device
pub struct SpeakerOutput {
    config: StreamConfig,
}

impl SpeakerOutput {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "speaker output initialized"
        );

        Ok(Self { config })
    }
}

impl AudioOutput for SpeakerOutput {
    fn play(&self, audio: Vec<u8>) -> Result<PlaybackHandle> {
        // Reject undecodable audio up front; the full decode runs off the
        // async caller on the playback thread
        check_mp3(&audio)?;

        let (handle, signal) = playback_channel();
        let config = self.config.clone();

        std::thread::Builder::new()
            .name("opera-playback".to_string())
            .spawn(move || {
                let result = decode_mp3(&audio)
                    .and_then(|(samples, rate)| resample(samples, rate, PLAYBACK_SAMPLE_RATE))
                    .and_then(|samples| play_samples(&config, &samples, &signal));
                if let Err(e) = &result {
                    tracing::error!(error = %e, "speaker playback failed");
                }
                signal.finish(result);
            })
            .map_err(|e| Error::Playback(format!("failed to spawn playback thread: {e}")))?;

        Ok(handle)
    }
}

/// Drive one output stream until the samples drain or the owner halts
fn play_samples(config: &StreamConfig, samples: &[f32], signal: &PlaybackSignal) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device".to_string()))?;

    let channels = config.channels as usize;
    let samples: Arc<[f32]> = Arc::from(samples);
    let position = Arc::new(AtomicUsize::new(0));

    let stream_samples = Arc::clone(&samples);
    let stream_position = Arc::clone(&position);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = stream_position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = stream_samples.get(pos).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if pos < stream_samples.len() {
                        pos += 1;
                    }
                }
                stream_position.store(pos, Ordering::Relaxed);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

    while position.load(Ordering::Relaxed) < samples.len() {
        if signal.is_halted() {
            tracing::debug!("playback halted");
            return Ok(());
        }
        if Instant::now() > deadline {
            tracing::warn!("playback did not drain before deadline");
            break;
        }
        std::thread::sleep(DRAIN_POLL);
    }

    drop(stream);
    tracing::debug!(samples = samples.len(), "playback complete");
    Ok(())
}

/// Verify that `mp3_data` starts with at least one decodable frame
fn check_mp3(mp3_data: &[u8]) -> Result<()> {
    match minimp3::Decoder::new(Cursor::new(mp3_data)).next_frame() {
        Ok(_) => Ok(()),
        Err(minimp3::Error::Eof) => Err(Error::Playback(
            "synthesized audio contained no frames".to_string(),
        )),
        Err(e) => Err(Error::Playback(format!("MP3 decode error: {e}"))),
    }
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(PLAYBACK_SAMPLE_RATE);
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Convert mono samples between sample rates
fn resample(samples: Vec<f32>, from: u32, to: u32) -> Result<Vec<f32>> {
    const CHUNK: usize = 1024;

    if from == to {
        return Ok(samples);
    }

    let ratio = f64::from(to) / f64::from(from);
    let mut resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, CHUNK, 1)
        .map_err(|e| Error::Playback(format!("resampler init failed: {e}")))?;

    let mut output = Vec::with_capacity(samples.len() + CHUNK);
    let mut rest = samples.as_slice();

    while rest.len() >= resampler.input_frames_next() {
        let (chunk, tail) = rest.split_at(resampler.input_frames_next());
        let frames = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Playback(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&frames[0]);
        rest = tail;
    }

    if !rest.is_empty() {
        let frames = resampler
            .process_partial(Some(&[rest]), None)
            .map_err(|e| Error::Playback(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&frames[0]);
    }

    tracing::trace!(from, to, frames = output.len(), "resampled playback audio");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_completes_handle() {
        let (mut handle, signal) = playback_channel();
        let completion = handle.take_completion().unwrap();

        assert!(!signal.is_halted());
        signal.finish(Ok(()));

        assert!(completion.wait().await.is_ok());
        assert!(handle.take_completion().is_none());
    }

    #[test]
    fn test_dropping_handle_halts() {
        let (handle, signal) = playback_channel();
        drop(handle);
        assert!(signal.is_halted());
    }

    #[tokio::test]
    async fn test_dropped_signal_is_failure() {
        let (mut handle, signal) = playback_channel();
        let completion = handle.take_completion().unwrap();
        drop(signal);

        assert!(matches!(completion.wait().await, Err(Error::Playback(_))));
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(samples.clone(), 24000, 24000).unwrap(), samples);
    }

    #[test]
    fn test_resample_changes_length() {
        let samples = vec![0.0; 48000];
        let out = resample(samples, 48000, 24000).unwrap();
        // Roughly half, allowing for filter delay at the edges
        assert!(out.len() > 22000 && out.len() < 26000, "got {}", out.len());
    }

    #[test]
    fn test_check_rejects_non_mp3() {
        assert!(matches!(check_mp3(b"definitely not an mp3"), Err(Error::Playback(_))));
        assert!(matches!(check_mp3(&[]), Err(Error::Playback(_))));
    }

    #[test]
    fn test_decode_garbage_yields_no_samples() {
        let (samples, _) = decode_mp3(b"definitely not an mp3").unwrap_or_default();
        assert!(samples.is_empty());
    }
}
