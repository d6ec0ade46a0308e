//! Fanout server and CLI
//!
//! Run with: `fanout` (same as `fanout serve`)
//!
//! # Configuration
//!
//! Loaded from `--config <PATH>`, otherwise from the first of
//! `~/.config/fanout/config.toml`, `/etc/fanout/config.toml`, `./config.toml`.
//! `FANOUT_*` environment variables override file values, and `RUST_LOG`
//! overrides the configured log level.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fanout::api::{self, dto::HealthResponse, AppState};
use fanout::bridge::{BridgeMonitor, EventBridge, KafkaConnector};
use fanout::config::{generate_default_config, Config, LoadReport, LoggingConfig};
use fanout::push::{
    ApnsGateway, FcmConfig, FcmGateway, HttpRecipientDirectory, NotificationDispatcher, Notifier,
    Platform, PushRouter, ServiceAccountKey, WorkerPool,
};
use fanout::routing::Address;
use fanout::websocket::{Hub, JwtAuthorizer};

#[derive(Parser)]
#[command(name = "fanout")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time WebSocket fan-out and push notification service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default)
    Serve,

    /// Print a default config file
    InitConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode a broker routing key, e.g. `group:<uuid>`
    DecodeKey {
        key: String,
    },

    /// Show health of a running server
    Status {
        /// Server base URL
        #[arg(long, default_value = "http://localhost:8090")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let (config, report) = match &cli.config {
                Some(path) => (Config::load_with_env(path)?, LoadReport::from_file(path)),
                None => Config::load_default(),
            };
            init_tracing(&config.logging);
            report.log();
            run_server(config).await
        }
        Commands::InitConfig { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Wrote default config to {}", path.display());
                }
                None => print!("{}", content),
            }
            Ok(())
        }
        Commands::DecodeKey { key } => {
            let address: Address = key.parse().context("invalid routing key")?;
            println!("mode:   {}", address.mode());
            match address {
                Address::Unicast(id) | Address::Multicast(id) => println!("target: {}", id),
                Address::Broadcast => println!("target: all connections"),
            }
            Ok(())
        }
        Commands::Status { url } => print_status(&url).await,
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("fanout={},tower_http=info", logging.level))
    });
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Fanout v{}", env!("CARGO_PKG_VERSION"));

    let hub = Arc::new(Hub::new(config.hub_config()));

    if config.auth.jwt_secret.is_empty() {
        tracing::warn!("auth.jwt_secret is empty; connection tokens are signed with an empty key");
    }
    let authorizer = Arc::new(JwtAuthorizer::new(&config.auth.jwt_secret));

    let monitor = BridgeMonitor::new();
    let api_config = config.api_config();
    let mut state = AppState::new(Arc::clone(&hub), authorizer, monitor.clone(), api_config.clone());

    // Push triggers need both a gateway and a recipient directory
    let pool = match (build_push_router(&config)?, &config.directory.base_url) {
        (Some(router), Some(base_url)) => {
            let directory = HttpRecipientDirectory::new(base_url.as_str(), config.directory_timeout())?;
            let pool = Arc::new(WorkerPool::start(Arc::new(router), config.pool_config()));
            state = state.with_notifier(Arc::new(Notifier::new(Arc::new(directory), Arc::clone(&pool))));
            tracing::info!(directory = %base_url, "Push notifications enabled");
            Some(pool)
        }
        (Some(_), None) => {
            tracing::warn!("Push gateway configured without directory.base_url; push disabled");
            None
        }
        (None, _) => {
            tracing::info!("No push gateway configured; push disabled");
            None
        }
    };

    let settings = config.kafka_settings();
    tracing::info!(brokers = %settings.brokers, topic = %settings.topic, "Configured event bridge");
    let bridge = EventBridge::new(KafkaConnector::new(settings), Arc::clone(&hub), config.retry_policy())
        .with_monitor(monitor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        api::shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    // A fatal bridge error takes the server down with it
    let bridge_tx = shutdown_tx.clone();
    let bridge_rx = shutdown_rx.clone();
    let bridge_task = tokio::spawn(async move {
        let result = bridge.run(bridge_rx).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Event bridge failed, shutting down");
            let _ = bridge_tx.send(true);
        }
        result
    });

    let served = api::serve(state, &api_config, shutdown_rx).await;
    let _ = shutdown_tx.send(true);

    let bridged = bridge_task.await.context("event bridge task panicked")?;

    if let Some(pool) = pool {
        pool.shutdown().await;
    }

    served?;
    bridged?;

    tracing::info!("Fanout shutdown complete");
    Ok(())
}

fn build_push_router(config: &Config) -> anyhow::Result<Option<PushRouter>> {
    let timeout = config.push_timeout();
    let concurrency = config.push.max_concurrency;
    let mut router = PushRouter::new();

    if let Some(fcm) = &config.push.fcm {
        let credentials = ServiceAccountKey::from_file(&fcm.service_account_path)?;
        let project_id = fcm
            .project_id
            .clone()
            .or_else(|| credentials.project_id.clone())
            .context("push.fcm.project_id is not set and the service account has none")?;

        let gateway = FcmGateway::new(FcmConfig {
            project_id,
            credentials,
            request_timeout: timeout,
        })?;
        router = router.with_dispatcher(
            Platform::Android,
            NotificationDispatcher::new(Arc::new(gateway), timeout, concurrency),
        );
        tracing::info!("FCM gateway enabled");
    }

    if let Some(apns) = config.apns_config() {
        let production = apns.production;
        let gateway = ApnsGateway::new(apns)?;
        router = router.with_dispatcher(
            Platform::Ios,
            NotificationDispatcher::new(Arc::new(gateway), timeout, concurrency),
        );
        tracing::info!(production, "APNs gateway enabled");
    }

    let enabled = router.supports(Platform::Android) || router.supports(Platform::Ios);
    Ok(enabled.then_some(router))
}

async fn print_status(url: &str) -> anyhow::Result<()> {
    let endpoint = format!("{}/health", url.trim_end_matches('/'));
    let response = reqwest::get(&endpoint)
        .await
        .with_context(|| format!("cannot reach {}", endpoint))?;

    if !response.status().is_success() {
        anyhow::bail!("{} returned {}", endpoint, response.status());
    }

    let health: HealthResponse = response.json().await?;

    println!("Fanout v{}", health.version);
    println!("  Status:      {}", health.status);
    println!("  Uptime:      {}s", health.uptime_seconds);
    println!("  Connections: {}", health.connections);
    println!(
        "  Bridge:      {} (received {}, dispatched {}, decode errors {}, consume errors {})",
        health.bridge.state,
        health.bridge.received,
        health.bridge.dispatched,
        health.bridge.decode_errors,
        health.bridge.consume_errors,
    );
    match health.push {
        Some(push) => println!(
            "  Push:        {} workers, {} submitted, {} completed, {} delivered, {} failed",
            push.workers, push.submitted, push.completed, push.delivered, push.failed,
        ),
        None => println!("  Push:        disabled"),
    }
    Ok(())
}
