mod sidecar;

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    clap::Parser,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter},
};

use {
    rijan_crypto::MasterKey,
    rijan_fanout::{DispatchConfig, EventPipeline},
    rijan_gateway::AppState,
    rijan_lifecycle::{DeviceEngine, EngineConfig},
    rijan_outbox::{OutboxService, RateLimiter, SenderConfig, SenderWorker},
    rijan_protocol::ProtocolClient,
    rijan_sessionfs::SessionFs,
    rijan_store::Store,
};

#[derive(Parser)]
#[command(name = "rijan-wa", about = "Multi-tenant WhatsApp gateway", version)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Address to bind to.
    #[arg(long, env = "BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, env = "JSON_LOGS", default_value_t = false)]
    json_logs: bool,

    /// 64-hex SHA-256 reference of the master password. Mandatory.
    #[arg(long, env = "MASTER_KEY")]
    master_key: String,

    /// SQLite database file.
    #[arg(long, env = "DATABASE_PATH", default_value = "./data/rijan.db")]
    database_path: PathBuf,

    /// Root of the per-device credential directories.
    #[arg(long, env = "SESSIONS_DIR", default_value = "./data/sessions")]
    sessions_dir: PathBuf,

    /// Address of the protocol bridge process.
    #[arg(long, env = "SIDECAR_ADDR", default_value = "127.0.0.1:3010")]
    sidecar_addr: String,

    /// Multiplier applied to the per-device message-rate windows.
    #[arg(long, env = "RATE_LIMIT_MAX", default_value_t = 1)]
    rate_limit_scale: u32,

    /// Accepted for compatibility; the window is fixed at 60 seconds.
    #[arg(long, env = "RATE_LIMIT_WINDOW")]
    rate_limit_window: Option<u64>,

    /// Identity of this process in the device-lock table.
    #[arg(long, env = "INSTANCE_ID")]
    instance_id: Option<String>,

    /// Runtime environment; `development` exposes internal error detail.
    #[arg(long, env = "NODE_ENV", default_value = "production")]
    run_env: String,

    /// Timezone applied to log timestamps.
    #[arg(long, env = "TIMEZONE")]
    timezone: Option<String>,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(false).with_ansi(true))
            .init();
    }
}

/// First signal drains gracefully; a second one aborts on the spot.
async fn shutdown_signal(cancel: CancellationToken) {
    wait_for_signal().await;
    info!("shutdown signal received, draining");
    cancel.cancel();
    tokio::spawn(async {
        wait_for_signal().await;
        warn!("second signal, aborting immediately");
        std::process::exit(1);
    });
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(tz) = &cli.timezone {
        std::env::set_var("TZ", tz);
    }
    init_telemetry(&cli);
    if let Some(window) = cli.rate_limit_window {
        if window != 60 {
            warn!(window, "RATE_LIMIT_WINDOW is fixed at 60s; value ignored");
        }
    }

    // A bad master reference is a refuse-to-boot error, not a warning.
    let master = MasterKey::from_hex(cli.master_key.trim())
        .context("MASTER_KEY must be a 64-hex-character SHA-256 reference")?;

    if let Some(parent) = cli.database_path.parent() {
        std::fs::create_dir_all(parent).context("cannot create database directory")?;
    }
    std::fs::create_dir_all(&cli.sessions_dir).context("cannot create sessions directory")?;

    let store = Store::open(&cli.database_path)
        .await
        .with_context(|| format!("cannot open database at {}", cli.database_path.display()))?;
    info!(path = %cli.database_path.display(), "database ready");

    let metrics = match rijan_metrics::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("metrics recorder unavailable: {e}");
            None
        }
    };

    let instance_id = cli
        .instance_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(instance_id, "instance identity");

    let cancel = CancellationToken::new();

    let pipeline = EventPipeline::spawn(store.clone(), DispatchConfig::default(), cancel.clone());
    let fanout_heartbeat = pipeline.heartbeat();

    let client: Arc<dyn ProtocolClient> =
        Arc::new(sidecar::SidecarClient::new(cli.sidecar_addr.clone()));
    let engine = DeviceEngine::new(
        store.clone(),
        SessionFs::new(cli.sessions_dir.clone()),
        client,
        pipeline.clone() as Arc<dyn rijan_fanout::EventSink>,
        EngineConfig::new(instance_id),
    );

    let sender = SenderWorker::new(
        store.clone(),
        Arc::clone(&engine) as Arc<dyn rijan_outbox::Dispatcher>,
        SenderConfig::default(),
    );
    let sender_heartbeat = sender.heartbeat();
    tokio::spawn(sender.run(cancel.clone()));

    // Resurrect devices in the background; the API comes up immediately.
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = engine.recover_on_boot().await {
                warn!("boot recovery failed: {e}");
            }
        });
    }

    let state = AppState::new(
        store.clone(),
        Arc::clone(&engine),
        OutboxService::new(store.clone()),
        pipeline,
        RateLimiter::with_scale(cli.rate_limit_scale),
        master,
        metrics,
        sender_heartbeat,
        fanout_heartbeat,
        cli.run_env.clone(),
    );

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            shutdown_signal(cancel).await;
        }
    };
    rijan_gateway::serve(listener, state, shutdown)
        .await
        .context("server error")?;

    // Drain: workers are cancelled, devices stopped, locks released.
    cancel.cancel();
    engine.shutdown().await;
    store.close().await;
    info!("shutdown complete");
    Ok(())
}
