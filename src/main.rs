use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use companion_voice::api::ApiServer;
use companion_voice::audio::{self, DEFAULT_SLICE_MS};
use companion_voice::tts::{cache_file_stem, build_backend};
use companion_voice::{
    AudioPayloadBuilder, Config, ConversationContext, EchoAgent, ManagerConfig, Transport,
    run_turn,
};

/// Companion - speaking chat companion backend
#[derive(Parser)]
#[command(name = "companion", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "COMPANION_PORT")]
    port: Option<u16>,

    /// Stream audio fragments when the engine supports it
    #[arg(long)]
    stream: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the WebSocket server (default)
    Serve,
    /// Synthesize one utterance and report its volume envelope
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
        /// Keep the audio at this path instead of deleting it
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Run one echo turn and print the frames a client would receive
    Say {
        /// Text the echo agent repeats back
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,companion_voice=info",
        1 => "info,companion_voice=debug",
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
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.tts.stream |= cli.stream;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::TestTts { text, out } => test_tts(&config, &text, out).await,
        Command::Say { text } => say(&config, &text).await,
    }
}

fn context(config: &Config) -> anyhow::Result<ConversationContext> {
    Ok(ConversationContext {
        agent: Arc::new(EchoAgent),
        backend: build_backend(&config.tts)?,
        builder: Arc::new(AudioPayloadBuilder::default()),
        character: config.character.clone(),
        manager: ManagerConfig {
            stream: config.tts.stream,
        },
    })
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        provider = ?config.tts.provider,
        stream = config.tts.stream,
        "starting companion backend"
    );

    let server = ApiServer::new(context(&config)?, config.server.host.clone(), config.server.port);
    let handle = server.spawn();

    tokio::select! {
        result = handle => result??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
async fn test_tts(config: &Config, text: &str, out: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let backend = build_backend(&config.tts)?;
    println!("Synthesizing speech with {}...", backend.name());
    let artifact = backend.synthesize(text, &cache_file_stem()).await?;

    let report = audio::decode_file(artifact.path()).and_then(|decoded| {
        let volumes = audio::volume_envelope(&decoded.samples, decoded.sample_rate, DEFAULT_SLICE_MS)?;
        Ok((decoded, volumes))
    });

    let kept = match &out {
        Some(dest) => std::fs::copy(artifact.path(), dest).map(|_| ()),
        None => Ok(()),
    };
    backend.release(&artifact);

    let (decoded, volumes) = report?;
    kept?;

    println!(
        "Got {} samples at {} Hz ({:.2}s)",
        decoded.samples.len(),
        decoded.sample_rate,
        decoded.samples.len() as f64 / f64::from(decoded.sample_rate)
    );
    println!("Volume envelope: {} slices of {DEFAULT_SLICE_MS}ms", volumes.len());
    if let Some(dest) = out {
        println!("Saved audio to {}", dest.display());
    }

    Ok(())
}

/// Prints frames with audio bodies elided
struct PrintTransport;

#[async_trait]
impl Transport for PrintTransport {
    async fn send(&self, message: String) -> companion_voice::Result<()> {
        let mut frame: serde_json::Value = serde_json::from_str(&message)?;
        if let Some(audio) = frame.get_mut("audio") {
            if let Some(len) = audio.as_str().map(str::len) {
                *audio = serde_json::Value::String(format!("<{len} base64 chars>"));
            }
        }
        if let Some(volumes) = frame.get_mut("volumes") {
            if let Some(len) = volumes.as_array().map(Vec::len) {
                *volumes = serde_json::Value::String(format!("<{len} slices>"));
            }
        }
        println!("{frame}");
        Ok(())
    }
}

async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let ctx = context(config)?;
    let cancel = CancellationToken::new();
    let reply = run_turn(&ctx, Arc::new(PrintTransport), text, &cancel).await?;
    tracing::info!(reply = %reply, "turn complete");
    Ok(())
}
