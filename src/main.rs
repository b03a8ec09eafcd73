use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiosk_voice::audio::{AudioCaptureEncoder, AudioSource, ClipSource, rms};
use kiosk_voice::companion::{CompanionClient, MockCompanion, MockOptions};
use kiosk_voice::recognition::{
    EventPayload, ModelStore, StandardBackends, TranscriptKind, TranscriptTracker,
};
use kiosk_voice::synthesis::{CommandSpeech, RemoteSpeech, SpeechBackend};
use kiosk_voice::{
    CapabilityProbe, Config, PollPolicy, Probe, ProximityReadController, SpeechInputOrchestrator,
    SpeechOutputDispatcher,
};

/// Kiosk Voice - Speech and card reader I/O for kiosk assistants
#[derive(Parser)]
#[command(name = "kiosk-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Companion device base URL (overrides configuration)
    #[arg(long, global = true)]
    companion_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show which capabilities are available
    Probe,
    /// Transcribe speech from the microphone or a WAV file
    Listen {
        /// WAV file to use instead of the microphone
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Stop after this many final transcripts
        #[arg(short, long)]
        turns: Option<u32>,
    },
    /// Speak text
    Speak {
        /// Text to speak
        text: String,
    },
    /// Wait for a card on the reader
    ReadCard {
        /// Seconds to wait for a card
        #[arg(short, long)]
        timeout: Option<u32>,
    },
    /// Show the card read in the last few seconds
    LastCard,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Run a mock companion device
    MockCompanion {
        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,
        /// Card identifier the mock reader reports
        #[arg(long)]
        idm: Option<String>,
        /// Delay before the mock card appears
        #[arg(long, default_value = "3000")]
        card_delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let rust_log = std::env::var("RUST_LOG").ok();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` when set, otherwise the level picked by `-v`
fn log_filter(verbose: u8, rust_log: Option<&str>) -> EnvFilter {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return filter,
            Err(e) => eprintln!("ignoring invalid RUST_LOG: {e}"),
        }
    }

    EnvFilter::new(match verbose {
        0 => "info,kiosk_voice=info",
        1 => "info,kiosk_voice=debug",
        2 => "debug",
        _ => "trace",
    })
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load();
    if let Some(url) = cli.companion_url {
        config.companion.url = url;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Probe => probe(&config).await,
        Command::Listen { input, turns } => listen(&config, input.as_deref(), turns).await,
        Command::Speak { text } => speak(&config, &text).await,
        Command::ReadCard { timeout } => {
            read_card(&config, timeout.unwrap_or(config.proximity.default_timeout_secs)).await
        }
        Command::LastCard => last_card(&config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::MockCompanion {
            port,
            idm,
            card_delay_ms,
        } => {
            let mut options = MockOptions {
                card_delay: Duration::from_millis(card_delay_ms),
                ..MockOptions::default()
            };
            if let Some(idm) = idm {
                options.idm = idm;
            }
            MockCompanion::new(options).run(port).await?;
            Ok(())
        }
    }
}

/// Print the capability snapshot as JSON
async fn probe(config: &Config) -> anyhow::Result<()> {
    let snapshot = CapabilityProbe::from_config(config)?.probe().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Stream transcripts until interrupted, the source ends, or enough turns
async fn listen(config: &Config, input: Option<&Path>, turns: Option<u32>) -> anyhow::Result<()> {
    let companion = CompanionClient::new(&config.companion)?;
    let probe = Arc::new(CapabilityProbe::from_config(config)?);
    let backends = Arc::new(StandardBackends::from_config(
        config,
        Some(companion),
        ModelStore::default(),
    ));
    let audio: Box<dyn AudioSource> = match input {
        Some(path) => Box::new(ClipSource::from_wav(path)?.realtime(true)),
        None => Box::new(AudioCaptureEncoder::new(config.recognition.capture)),
    };

    let mut orchestrator = SpeechInputOrchestrator::new(probe, backends, audio);
    orchestrator.initialize().await?;
    if let Some(demotion) = orchestrator.demotion() {
        println!("{} unavailable ({}), using {}", demotion.from, demotion.reason, demotion.to);
    }
    orchestrator.start().await?;
    if let Some(engine) = orchestrator.current_engine() {
        println!("Listening with {engine} recognition (Ctrl+C to stop)");
    }
    println!("---");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut tracker = TranscriptTracker::new();
    let mut finals = 0;
    let mut stdout = std::io::stdout();

    loop {
        let event = tokio::select! {
            event = orchestrator.next_event() => event,
            _ = &mut ctrl_c => None,
        };
        let Some(event) = event else { break };

        match event.payload {
            EventPayload::Transcript(transcript) => {
                if !tracker.accept(event.session, &transcript) {
                    continue;
                }
                match transcript.kind {
                    TranscriptKind::Partial => {
                        print!("\r\x1b[K{}", transcript.text);
                        stdout.flush()?;
                    }
                    TranscriptKind::Final => {
                        println!("\r\x1b[K{}", transcript.text);
                        finals += 1;
                        if turns.is_some_and(|t| finals >= t) {
                            break;
                        }
                    }
                }
            }
            EventPayload::Ended => break,
            EventPayload::Failed(e) => {
                println!();
                return Err(e.into());
            }
        }
    }

    orchestrator.stop().await;
    println!();
    Ok(())
}

/// Speak one request and report which engine took it
async fn speak(config: &Config, text: &str) -> anyhow::Result<()> {
    let companion = CompanionClient::new(&config.companion)?;
    let local = CommandSpeech::detect(&config.synthesis.local_commands, config.synthesis.voice.clone())
        .map(|speech| Arc::new(speech) as Arc<dyn SpeechBackend>);
    if local.is_none() {
        tracing::warn!("no local synthesizer found");
    }

    let dispatcher = SpeechOutputDispatcher::new(
        Some(Arc::new(RemoteSpeech::new(companion.clone()))),
        local,
    );
    dispatcher
        .initialize(&CapabilityProbe::new(Some(companion)))
        .await;

    match dispatcher.speak(text).await? {
        Some(engine) => {
            println!("Spoken via {engine}");
            dispatcher.wait().await;
        }
        None => println!("Nothing to speak"),
    }
    Ok(())
}

/// Wait for a card and print its IDm
async fn read_card(config: &Config, timeout: u32) -> anyhow::Result<()> {
    let companion = CompanionClient::new(&config.companion)?;
    let controller =
        ProximityReadController::new(Arc::new(companion), PollPolicy::from(&config.proximity));

    println!("Touch a card to the reader ({timeout}s)...");

    tokio::select! {
        result = controller.read(timeout) => {
            let idm = result?;
            println!("IDm: {idm}");
        }
        _ = tokio::signal::ctrl_c() => {
            controller.cancel();
            println!("Cancelled");
        }
    }
    Ok(())
}

/// Print the card read within the companion's freshness window
async fn last_card(config: &Config) -> anyhow::Result<()> {
    let companion = CompanionClient::new(&config.companion)?;
    match companion.latest_card().await? {
        Some(idm) => println!("IDm: {idm}"),
        None => println!("No card read recently"),
    }
    Ok(())
}

/// Test microphone input with a per-chunk level meter
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCaptureEncoder::new(config.recognition.capture);
    let mut chunks = capture.start().await?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);

    while let Ok(Some(chunk)) = tokio::time::timeout_at(deadline, chunks.next()).await {
        let level = rms(&chunk.samples);
        let peak = chunk
            .samples
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or_default();

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (level * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:4}] RMS: {:.4} | Peak: {:5} | [{}]",
            chunk.seq, level, peak, meter
        );
    }

    let dropped = chunks.dropped();
    capture.stop();

    println!("\n---");
    if dropped > 0 {
        println!("{dropped} chunks were dropped because the consumer fell behind");
    }
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(log_filter(0, None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(2, None).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(log_filter(5, None).max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn test_rust_log_overrides_verbosity() {
        assert_eq!(
            log_filter(0, Some("warn")).max_level_hint(),
            Some(LevelFilter::WARN)
        );
        assert_eq!(
            log_filter(0, Some("kiosk_voice=trace")).max_level_hint(),
            Some(LevelFilter::TRACE)
        );
    }

    #[test]
    fn test_blank_rust_log_is_ignored() {
        assert_eq!(log_filter(1, Some("  ")).max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
