use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use parley_gateway::backends::{OpenAiChat, OpenAiRecognizer, OpenAiSpeech, RecognizerMode};
use parley_gateway::{AppState, Backends, Config};

/// Parley - voice conversation gateway for always-listening devices
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(long, env = "PARLEY_PORT")]
    port: Option<u16>,

    /// API key for the OpenAI-compatible backend
    #[arg(long, env = "PARLEY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,parley_gateway=info",
        1 => "info,parley_gateway=debug",
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
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.listen_port = port;
    }
    tracing::info!(
        port = config.listen_port,
        recognizer_mode = %config.backends.recognizer_mode,
        "starting parley gateway"
    );

    let api_key = cli.api_key.unwrap_or_default();
    let mode = RecognizerMode::parse(&config.backends.recognizer_mode)?;
    let backends = Backends {
        recognizer: Arc::new(OpenAiRecognizer::new(
            api_key.clone(),
            config.backends.base_url.clone(),
            config.backends.stt_model.clone(),
            mode,
        )?),
        llm: Arc::new(OpenAiChat::new(
            api_key.clone(),
            config.backends.base_url.clone(),
            config.backends.chat_model.clone(),
        )?),
        tts: Arc::new(OpenAiSpeech::new(
            api_key,
            config.backends.base_url.clone(),
            config.backends.tts_model.clone(),
            config.speech.voice.clone(),
        )?),
    };

    let state = Arc::new(AppState::new(Arc::new(config), backends));
    parley_gateway::gateway::serve(state).await?;
    Ok(())
}
