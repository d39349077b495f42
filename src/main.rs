use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use taskhub::ai::AiClient;
use taskhub::config::DaemonConfig;
use taskhub::rest;
use taskhub::sync::{self, auth, event::EventBroadcaster};
use taskhub::tasks::storage::{SqliteTaskRepository, SqliteUserRepository, Storage};
use taskhub::AppContext;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "taskhubd",
    about = "TaskHub — shared task list sync daemon",
    version
)]
struct Args {
    /// JSON-RPC WebSocket sync server port
    #[arg(long, env = "TASKHUB_PORT")]
    port: Option<u16>,

    /// Data directory for config, secrets, and the SQLite database
    #[arg(long, env = "TASKHUB_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TASKHUB_LOG")]
    log: Option<String>,

    /// Bind address for both servers (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "TASKHUB_BIND")]
    bind_address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = DaemonConfig::new(args.port, args.data_dir, args.log, args.bind_address);

    // Init once — must happen before any tracing calls.
    setup_logging(&config.log, &config.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "taskhubd starting");
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        rest_port = config.rest_port,
        "config loaded"
    );

    // No configured secret means "generate one and keep it in the data dir".
    // An explicit empty string stays empty and disables authentication.
    if config.jwt_secret.is_none() {
        config.jwt_secret = Some(auth::get_or_create_secret(&config.data_dir)?);
    }
    if config.jwt_secret.as_deref() == Some("") {
        warn!("authentication is disabled — every sync command will be rejected");
    }
    let config = Arc::new(config);

    let storage = Storage::new(&config.data_dir).await?;

    let ctx = Arc::new(AppContext {
        tasks: Arc::new(SqliteTaskRepository::new(storage.pool())),
        users: Arc::new(SqliteUserRepository::new(storage.pool())),
        broadcaster: Arc::new(EventBroadcaster::new()),
        ai: Arc::new(AiClient::new(&config)),
        config,
        started_at: std::time::Instant::now(),
    });

    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = rest::start_rest_server(ctx).await {
                warn!(err = %e, "REST server stopped");
            }
        });
    }

    sync::run(ctx).await
}

/// Initialize the tracing subscriber.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators).
fn setup_logging(log_level: &str, log_format: &str) {
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
    }
}
