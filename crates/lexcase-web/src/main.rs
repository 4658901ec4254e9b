mod auth;
mod error;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lexcase_core::config::{LexcaseConfig, LlmConfig};
use lexcase_core::embedding::EmbeddingService;
use lexcase_core::llm::LlmService;
use lexcase_core::storage::{self, SqliteStorage};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "lexcase_web=info,lexcase_core=info";

pub struct AppState {
    pub storage: SqliteStorage,
    pub embedding: EmbeddingService,
    /// Drives the agent consultation. `None` when no chat provider resolves.
    pub llm: Option<LlmService>,
    /// Summarizes uploads. `None` leaves new documents unenriched.
    pub summarizer: Option<LlmService>,
    pub config: LexcaseConfig,
}

#[derive(Parser, Debug)]
#[command(name = "lexcase-web", version, about = "Lexcase JSON API server")]
struct Args {
    /// Directory whose `.lexcase/` config files are merged over the global one.
    #[arg(long)]
    project_dir: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path.
    #[arg(long)]
    db: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> LexcaseConfig {
    let mut config = LexcaseConfig::load(args.project_dir.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LexcaseConfig::default_config()
    });

    if let Some(host) = &args.host {
        config.web.host = host.clone();
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }
    if let Some(db) = &args.db {
        config.storage.path = Some(db.clone());
    }
    config
}

fn chat_service(purpose: &str, config: &LlmConfig) -> Option<LlmService> {
    match LlmService::from_config(config) {
        Ok(service) => Some(service),
        Err(e) => {
            tracing::warn!(purpose, provider = %config.provider, error = %e, "LLM unavailable");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = load_config(&args);
    let storage = storage::open_from_config(&config).context("failed to open database")?;
    let embedding =
        EmbeddingService::from_config(&config.embedding).context("invalid embedding config")?;
    let llm = chat_service("chat", &config.llm);
    let summarizer = chat_service("summary", &config.summary_llm());

    let addr = format!("{}:{}", config.web.host, config.web.port);
    let state = Arc::new(AppState {
        storage,
        embedding,
        llm,
        summarizer,
        config,
    });

    let app = routes::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("lexcase-web listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
