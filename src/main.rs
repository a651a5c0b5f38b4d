use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use stock_news_analyst::chat;
use stock_news_analyst::client::{CompletionBackend, DeepSeekClient};
use stock_news_analyst::config::{AppConfig, ConfigArgs};
use stock_news_analyst::constants;
use stock_news_analyst::logging::{self, GenerationLog, LogStatus};
use stock_news_analyst::session::Session;
use stock_news_analyst::web_server::{self, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the chat UI over HTTP.
    Serve {
        #[arg(long, env = "ANALYST_PORT", default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
    },
    /// Analyze news in an interactive terminal session.
    Chat,
}

async fn run(cli: Cli) -> Result<()> {
    let config = Arc::new(AppConfig::from_env(cli.config).context("Failed to load configuration")?);
    info!(model = %config.model, base_url = %config.base_url, "Configuration loaded");

    let backend: Arc<dyn CompletionBackend> = Arc::new(DeepSeekClient::new(&config.base_url, &config.api_key));

    match cli.command {
        Commands::Serve { port } => {
            let state = AppState::new(backend, config);
            let mut web_server_handle = tokio::spawn(web_server::start_web_server(port, state));

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, shutting down...");
                    web_server_handle.abort();
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(Ok(())) => info!("Web server task completed unexpectedly."),
                        Ok(Err(e)) => return Err(e),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }
            info!("Shutdown complete.");
        }
        Commands::Chat => {
            let session = Session::new(backend, config);
            chat::run_terminal_chat(session).await.context("Chat session failed")?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for DEEPSEEK_API_KEY)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_dir = cli
        .config
        .log_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(constants::LOG_DIR.as_str()));
    let _log_guard = logging::init_tracing(&log_dir).context("Failed to initialize logging")?;

    let model = cli.config.model.clone().unwrap_or_else(|| constants::DEEPSEEK_MODEL.clone());
    info!("Starting with command: {:?}", cli.command);

    if let Err(e) = run(cli).await {
        GenerationLog::new(
            "app_startup",
            "应用启动",
            &format!("{:#}", e),
            "",
            &model,
            Duration::ZERO,
            LogStatus::CriticalError,
        )
        .emit();
        error!("Application error: {:#}", e);
        return Err(e);
    }

    Ok(())
}
