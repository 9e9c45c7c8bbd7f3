use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use opera_voice::voice::{
    MicrophoneRecognizer, RecognizerCapability, SpeakOutcome, SpeakerOutput, VoiceConfigPatch,
    VoiceConfigStore, VoiceEvent, VoiceIdentity, VoiceInteractionController,
};
use opera_voice::Config;
use opera_voice::config::SynthesisProvider;

/// Opera voice - speak and listen through the Opera voice controller
#[derive(Parser)]
#[command(name = "opera-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synthesize text and play it
    Speak {
        /// Text to speak
        text: String,
        /// Voice to use (alloy, echo, fable, onyx, nova, shimmer)
        #[arg(long)]
        voice: Option<VoiceIdentity>,
        /// Speaking rate multiplier (0.5 to 2.0)
        #[arg(long)]
        speed: Option<f32>,
    },
    /// Print transcripts from the microphone
    Listen {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Report which voice capabilities this machine has
    Probe,
    /// List available voices
    Voices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,opera_voice=info",
        1 => "info,opera_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Speak { text, voice, speed } => speak(&text, voice, speed).await,
        Command::Listen { duration } => listen(duration).await,
        Command::Probe => probe(),
        Command::Voices => {
            list_voices();
            Ok(())
        }
    }
}

/// Probe the microphone and transcriber
fn recognizer(config: &Config) -> RecognizerCapability {
    let transcriber = config
        .transcriber()
        .inspect_err(|e| tracing::warn!(error = %e, "transcription not configured"))
        .ok();
    MicrophoneRecognizer::probe(transcriber)
}

/// Build a controller from configuration and the local audio devices
fn build_controller(config: &Config) -> anyhow::Result<VoiceInteractionController> {
    let store = VoiceConfigStore::new(config.voice.clone())?;
    let synthesizer = Arc::new(config.synthesizer()?);
    let output = Arc::new(SpeakerOutput::new()?);

    Ok(VoiceInteractionController::new(
        store,
        recognizer(config),
        config.recognition_options(),
        synthesizer,
        output,
    ))
}

async fn speak(text: &str, voice: Option<VoiceIdentity>, speed: Option<f32>) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let controller = build_controller(&config)?;

    let mut patch = VoiceConfigPatch::default().enabled(true);
    if let Some(voice) = voice {
        patch = patch.voice(voice);
    }
    if let Some(speed) = speed {
        patch = patch.speed(speed);
    }
    controller.set_config(&patch)?;

    let mut events = controller.subscribe();
    match controller.speak(text).await? {
        SpeakOutcome::Started => {}
        other => {
            println!("Nothing spoken: {other:?}");
            return Ok(());
        }
    }

    // Wait for playback to finish or Ctrl+C
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(VoiceEvent::Speaking(false)) | Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    if !controller.is_speaking() {
                        break;
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                controller.stop_speaking();
                break;
            }
        }
    }

    Ok(())
}

async fn listen(duration: Option<u64>) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let controller = build_controller(&config)?;
    if !controller.has_capture_capability() {
        anyhow::bail!("speech recognition is not available on this machine (see `opera-voice probe`)");
    }

    let mut events = controller.subscribe();
    controller.start_listening(|transcript| println!("> {transcript}"))?;
    println!("Listening ({}). Press Ctrl+C to stop.", config.recognition.language);

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(VoiceEvent::Listening(false)) | Err(RecvError::Closed) => {
                    println!("Recognition ended.");
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            },
            () = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.stop_listening();
    Ok(())
}

fn probe() -> anyhow::Result<()> {
    let config = Config::load()?;

    match recognizer(&config) {
        RecognizerCapability::Available(_) => println!("speech recognition: available"),
        RecognizerCapability::Unavailable(reason) => {
            println!("speech recognition: unavailable ({reason})");
        }
    }

    match SpeakerOutput::new() {
        Ok(_) => println!("audio output:       available"),
        Err(e) => println!("audio output:       unavailable ({e})"),
    }

    match config.synthesizer() {
        Ok(_) => match config.synthesis.provider {
            SynthesisProvider::Backend => {
                println!("speech synthesis:   backend ({})", config.backend.speak_url());
            }
            SynthesisProvider::OpenAI => {
                println!("speech synthesis:   openai ({})", config.synthesis.model);
            }
        },
        Err(e) => println!("speech synthesis:   unavailable ({e})"),
    }

    Ok(())
}

fn list_voices() {
    for voice in VoiceIdentity::ALL {
        println!("{:<8} {}", voice.as_str(), voice.character());
    }
}
