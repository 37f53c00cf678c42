mod authorize;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use songreq_core::catalog::CatalogClient;
use songreq_core::chat::{self, ChatConnection};
use songreq_core::command::CommandParser;
use songreq_core::config::Config;
use songreq_core::live::LiveGuard;
use songreq_core::pipeline::Pipeline;
use songreq_core::token::{Provider, TokenBroker};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Queues songs requested in Twitch chat on the streamer's Spotify player.
#[derive(Parser)]
#[command(name = "songreq", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Join chat and serve song requests (default).
    Run,

    /// Log in to a provider once and print the tokens it issues.
    Authorize {
        #[arg(value_enum)]
        provider: ProviderArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    /// Spotify
    Music,
    /// Twitch
    Chat,
}

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Music => Provider::MusicService,
            ProviderArg::Chat => Provider::ChatService,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let log_path = init_logging()?;
    info!("Log file: {:?}", log_path);
    if !dotenv_loaded {
        info!("No .env file found, relying on environment variables");
    }

    let config = Config::load().context("loading configuration")?;
    info!("Config loaded from: {:?}", Config::config_path());

    let http = songreq_core::http_client().context("building HTTP client")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, http).await,
        Command::Authorize { provider } => authorize::run(&config, http, provider.into()).await,
    }
}

/// File log plus stderr, filtered by `RUST_LOG`.
fn init_logging() -> anyhow::Result<PathBuf> {
    let data_dir = songreq_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {:?}", data_dir))?;
    let log_path = songreq_core::platform::log_path();

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {:?}", log_path))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,songreq_daemon=debug,songreq_core=debug")
            }),
        )
        .init();

    Ok(log_path)
}

async fn run(config: Config, http: reqwest::Client) -> anyhow::Result<()> {
    config.validate()?;

    let broker = Arc::new(TokenBroker::new(http.clone(), &config));
    let chat_token = broker
        .get_token(Provider::ChatService)
        .await
        .context("refreshing the Twitch access token")?;

    let ChatConnection {
        handle,
        events,
        session,
    } = chat::connect(&config.chat, &chat_token)
        .await
        .context("connecting to Twitch chat")?;

    let pipeline = Arc::new(Pipeline::new(
        CommandParser::new(config.chat.command_prefix.clone()),
        broker,
        LiveGuard::new(
            http.clone(),
            config.twitch.api_base.clone(),
            config.twitch.client_id.clone(),
        ),
        CatalogClient::new(http, config.spotify.api_base.clone()),
        handle,
        config.chat.channel.clone(),
    ));

    info!("Serving song requests in #{}", config.chat.channel);
    tokio::select! {
        _ = pipeline.run(events) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            return Ok(());
        }
    }

    warn!("Chat session ended");
    session
        .await
        .context("chat session task failed")?
        .context("chat session ended")?;
    Ok(())
}
