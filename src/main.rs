use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::sync::{Notify, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

use voice_bridge::{
    AudioFrame, BridgeConfig, BridgeError, ChannelMediaSource, ConnectionState, ConversationTurn,
    MediaFeed, SynthesizedSpeech, VoiceBridge, VoiceBridgeBuilder,
};

/// One 20ms Opus frame of silence.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Voice Bridge - realtime voice conversations over a text chat backend
#[derive(Parser, Debug)]
#[command(name = "voice-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `run`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hold a voice session until Ctrl-C
    Run,

    /// Connect and speak the given text
    Say {
        /// Text for the hosted model to speak
        text: String,
    },

    /// Send one typed message through the chat backend
    Chat {
        /// Message to send
        text: String,
    },

    /// Load and validate configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Must be installed before the first TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        info!("Loading configuration from {}", config_path.display());
        BridgeConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        BridgeConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let command = cli.command.unwrap_or(Commands::Run);
    if let Commands::CheckConfig = command {
        println!("{config:#?}");
        return Ok(());
    }

    let media = Arc::new(ChannelMediaSource::new());
    let bridge = VoiceBridgeBuilder::new(config)
        .media(media.clone())
        .build()
        .map_err(|e| anyhow!(e.to_string()))?;
    install_printers(&bridge);

    match command {
        Commands::Run => {
            let pump = tokio::spawn(pump_silence(media.feed()));
            connect_and_wait(&bridge).await?;
            info!("Session live, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            bridge.disconnect().await;
            pump.abort();
        }
        Commands::Say { text } => {
            let spoken = Arc::new(Notify::new());
            let notify = spoken.clone();
            bridge.on_speech_synthesized(Arc::new(move |speech: SynthesizedSpeech| {
                let notify = notify.clone();
                Box::pin(async move {
                    info!(response_id = ?speech.response_id, "Spoken: {}", speech.transcript);
                    notify.notify_one();
                })
            }));

            let pump = tokio::spawn(pump_silence(media.feed()));
            connect_and_wait(&bridge).await?;
            bridge.send_text(&text).await.map_err(|e| anyhow!(e.to_string()))?;

            let wait = bridge.config().backend_timeout;
            tokio::select! {
                _ = spoken.notified() => {}
                _ = tokio::time::sleep(wait) => info!("No spoken transcript after {:?}", wait),
                _ = tokio::signal::ctrl_c() => {}
            }
            bridge.disconnect().await;
            pump.abort();
        }
        Commands::Chat { text } => {
            let reply = bridge
                .submit_text_turn(&text)
                .await
                .map_err(|e| anyhow!(e.to_string()))?;
            println!("{}", reply.content);
        }
        Commands::CheckConfig => {}
    }

    Ok(())
}

fn install_printers(bridge: &VoiceBridge) {
    bridge.on_state_change(Arc::new(|state: ConnectionState| {
        Box::pin(async move {
            println!("-- {state}");
        })
    }));
    bridge.on_error(Arc::new(|error: BridgeError| {
        Box::pin(async move {
            eprintln!("!! {} ({})", error, error.kind());
        })
    }));
    bridge.on_turn(Arc::new(|turn: ConversationTurn| {
        Box::pin(async move {
            println!("[{}/{}] {}", turn.role, turn.origin, turn.content);
        })
    }));
    bridge.on_speech_synthesized(Arc::new(|speech: SynthesizedSpeech| {
        Box::pin(async move {
            info!(response_id = ?speech.response_id, "Spoken: {}", speech.transcript);
        })
    }));
}

/// Connect, then wait until the control channel is open or the attempt ends.
async fn connect_and_wait(bridge: &VoiceBridge) -> anyhow::Result<()> {
    let mut states: watch::Receiver<ConnectionState> = bridge.subscribe_state();
    bridge.connect().await.map_err(|e| anyhow!(e.to_string()))?;

    let state = *states
        .wait_for(|s| !matches!(s, ConnectionState::Connecting))
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    match state {
        ConnectionState::Connected => Ok(()),
        other => Err(anyhow!("session ended before connecting: {other}")),
    }
}

/// Keep the outbound track fed until the task is aborted.
async fn pump_silence(feed: MediaFeed) {
    let mut ticker = tokio::time::interval(FRAME_DURATION);
    loop {
        ticker.tick().await;
        // Frames are dropped while no track is live or the track is muted
        feed.push(AudioFrame::new(OPUS_SILENCE.to_vec(), FRAME_DURATION));
    }
}
