use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use wardline_llm::ollama::{self, OllamaProvider};
use wardline_llm::provider::ChatProvider;
use wardline_server::ServerConfig;
use wardline_store::Database;

/// Streaming hospital-assistant relay server.
#[derive(Parser, Debug)]
#[command(name = "wardline", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// SQLite database path. Defaults to ~/.wardline/wardline.db.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Base URL of the generation backend.
    #[arg(long, default_value = ollama::DEFAULT_HOST)]
    backend_host: String,

    /// Model identifier to request from the backend.
    #[arg(long, default_value = ollama::DEFAULT_MODEL)]
    model: String,

    /// Upper bound in seconds on one whole generation call.
    #[arg(long, default_value_t = 120)]
    call_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("starting wardline server");

    let db_path = cli.db.unwrap_or_else(|| dirs_home().join(".wardline").join("wardline.db"));
    let db = Database::open(&db_path).expect("failed to open database");

    let provider: Arc<dyn ChatProvider> = Arc::new(
        OllamaProvider::new(cli.backend_host.as_str(), cli.model.as_str(), Duration::from_secs(10))
            .expect("failed to build backend client"),
    );
    tracing::info!(host = %cli.backend_host, model = %cli.model, "generation backend configured");

    let config = ServerConfig {
        port: cli.port,
        call_timeout_secs: cli.call_timeout_secs,
        ..ServerConfig::default()
    };
    let handle = wardline_server::start(config, db, provider)
        .await
        .expect("failed to start server");

    tracing::info!(port = handle.port, "wardline ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
