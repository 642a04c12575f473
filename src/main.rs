use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use narrator::audio::{PlaybackQueue, SpeakerSink};
use narrator::stream::IngestOutcome;
use narrator::{
    AudioAsset, AudioOutput, ChatTransport, ChatUpdate, Config, Document, PresentationEvent,
    Runtime, SpeechSynthesizer,
};

/// Grace period for pipelines to release the speaker on exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Narrator - narrated presentations and voice chat over a speech service
#[derive(Parser)]
#[command(name = "narrator", version, about)]
struct Cli {
    /// Speech service base URL
    #[arg(long, env = "NARRATOR_BASE_URL")]
    base_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Discard audio instead of playing it (for machines without audio hardware)
    #[arg(long, env = "NARRATOR_HEADLESS")]
    headless: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Narrate a presentation document
    Present {
        /// Document JSON file
        document: PathBuf,
        /// Node to start from
        #[arg(long, default_value = "0")]
        start_at: usize,
        /// Nodes synthesized ahead of playback
        #[arg(long)]
        lookahead: Option<usize>,
    },
    /// Send a recorded utterance and play the reply
    Chat {
        /// Recorded utterance (WAV)
        recording: PathBuf,
        /// Buffer the reply and poll it instead of reading chunks
        #[arg(long)]
        polled: bool,
        /// Start a new conversation session
        #[arg(long)]
        session: Option<String>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the speech synthesis service.")]
        text: String,
    },
    /// Check speech service health
    Health,
    /// List available voices
    Voices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,narrator=info",
        1 => "info,narrator=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(base_url) = cli.base_url {
        config.service.base_url = base_url.trim_end_matches('/').to_string();
    }
    let output = if cli.headless {
        AudioOutput::Silent
    } else {
        AudioOutput::Speaker
    };

    match cli.command {
        Command::Present {
            document,
            start_at,
            lookahead,
        } => {
            if let Some(lookahead) = lookahead {
                config.presentation.lookahead = lookahead;
            }
            present(config, output, &document, start_at).await
        }
        Command::Chat {
            recording,
            polled,
            session,
        } => {
            let transport = if polled {
                ChatTransport::Polled
            } else {
                ChatTransport::Streamed
            };
            chat(config, output, &recording, transport, session).await
        }
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(config, output, &text).await,
        Command::Health => {
            let runtime = Runtime::create(config, AudioOutput::Silent)?;
            let status = runtime.synthesizer().health().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Voices => {
            let runtime = Runtime::create(config, AudioOutput::Silent)?;
            let voices = runtime.synthesizer().voices().await?;
            println!("{}", serde_json::to_string_pretty(&voices)?);
            Ok(())
        }
    }
}

/// Narrate a document until it completes or Ctrl-C
async fn present(
    config: Config,
    output: AudioOutput,
    path: &std::path::Path,
    start_at: usize,
) -> anyhow::Result<()> {
    let nodes = Document::load(path).await?.into_nodes()?;
    let runtime = Runtime::create(config, output)?;

    tracing::info!(
        nodes = nodes.len(),
        lookahead = runtime.config().presentation.lookahead,
        "starting presentation"
    );

    let handle = runtime.present(nodes);
    let mut events = handle.subscribe();
    handle.start_at(start_at)?;

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping presentation");
                handle.stop()?;
            }
            event = events.recv() => match event {
                Ok(PresentationEvent::NodeChanged { index, text, image }) => {
                    println!("\n[{}] {text}", index + 1);
                    if let Some(image) = image {
                        println!("    image: {image}");
                    }
                }
                Ok(PresentationEvent::NodeAudioTimedOut { index }) => {
                    println!("    (no narration for node {})", index + 1);
                }
                Ok(PresentationEvent::Started { nodes }) => {
                    println!("Presenting {nodes} nodes");
                }
                Ok(PresentationEvent::Completed) => break Ok(()),
                Ok(PresentationEvent::Stopped) => break Ok(()),
                Ok(PresentationEvent::Error(message)) => {
                    break Err(anyhow::anyhow!("presentation failed: {message}"));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "presentation events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
        }
    };

    handle.shutdown().await;
    runtime.shutdown(SHUTDOWN_GRACE).await;
    result
}

/// Send one recorded utterance and print the reply as it streams in
async fn chat(
    config: Config,
    output: AudioOutput,
    path: &std::path::Path,
    transport: ChatTransport,
    session: Option<String>,
) -> anyhow::Result<()> {
    let wav = tokio::fs::read(path).await?;
    narrator::audio::wav::decode(&wav)
        .map_err(|e| anyhow::anyhow!("{} is not a usable recording: {e}", path.display()))?;

    let runtime = Runtime::create(config, output)?;
    if let Some(session) = session {
        runtime.chat_client().set_session_id(session);
    }

    let (session, mut updates) = runtime.chat(wav, transport).await?;
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                tracing::info!("interrupted, stopping voice chat");
                session.stop();
                interrupted = true;
            }
            update = updates.recv() => match update {
                Some(ChatUpdate::Text(text)) => println!("{text}"),
                Some(ChatUpdate::Audio { segment, duration }) => {
                    tracing::debug!(segment, duration_ms = duration.as_millis(), "reply audio");
                }
                Some(ChatUpdate::Error(message)) => eprintln!("error: {message}"),
                Some(ChatUpdate::Completed { elapsed, .. }) => {
                    if let Some(elapsed) = elapsed {
                        println!("(reply took {:.1}s)", elapsed.as_secs_f64());
                    }
                }
                None => break,
            },
        }
    }

    let outcome = session.wait().await?;
    println!("session: {}", runtime.chat_client().session_id());
    runtime.shutdown(SHUTDOWN_GRACE).await;

    match outcome {
        IngestOutcome::Failed => Err(anyhow::anyhow!("voice chat stream failed")),
        IngestOutcome::Finished | IngestOutcome::Stopped => Ok(()),
    }
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let mut queue = PlaybackQueue::new(SpeakerSink::new()?);
    queue.enqueue(AudioAsset {
        node_index: 0,
        samples: samples.into(),
        sample_rate,
        channels: 1,
    });
    queue.play_to_end().await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Synthesize one phrase and play it
async fn test_tts(config: Config, output: AudioOutput, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let runtime = Runtime::create(config, output)?;
    let request_id = uuid::Uuid::new_v4().to_string();

    println!("Synthesizing speech...");
    let synthesized = runtime
        .synthesizer()
        .synthesize(text, &runtime.config().speech, &request_id)
        .await?;
    println!(
        "Got {} bytes of {:?} audio",
        synthesized.audio.len(),
        synthesized.format
    );

    let asset = AudioAsset::from_wav(0, synthesized.decode()?);
    println!("Playing {:.1}s of audio...", asset.duration().as_secs_f64());

    let mut queue = PlaybackQueue::new(runtime.device().lease().await);
    queue.enqueue(asset);
    queue.play_to_end().await;
    drop(queue);

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    runtime.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}
