//! `baitline` binary: serve the gateway or run a one-shot inactivity sweep.

mod config;

use anyhow::Context;
use baitline_builtins::{KeywordClassifier, RegexExtractor, ScriptedResponder};
use baitline_core::{Clock, SystemClock};
use baitline_engine::{
    CallbackDispatcher, Collaborators, InactivityMonitor, ManagerConfig, PendingDispatches,
    SaturationPolicy, SessionManager,
};
use baitline_gateway::{AuthConfig, GatewayServer, RateLimiter};
use baitline_session::{
    CallbackLog, FileCallbackLog, FileSessionStore, MemoryCallbackLog, MemorySessionStore,
    SessionCache, SessionStore, StoreClaims, TtlCache,
};
use clap::{Parser, Subcommand};
use config::{BaitlineConfig, StoreBackend};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "baitline", about = "Baitline — scam honeypot session service")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "baitline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway and the inactivity monitor
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Finalize idle scam sessions once and exit
    Sweep,
}

/// Everything the commands share.
struct Services {
    clock: Arc<dyn Clock>,
    manager: Arc<SessionManager>,
    monitor: Arc<InactivityMonitor>,
    pending: PendingDispatches,
}

type Backend = (Arc<dyn SessionStore>, Arc<dyn CallbackLog>);

async fn open_store(config: &BaitlineConfig) -> anyhow::Result<Backend> {
    let dir = &config.store.data_dir;
    let (store, log): Backend = match config.store.backend {
        StoreBackend::Memory => {
            let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
            let log: Arc<dyn CallbackLog> = Arc::new(MemoryCallbackLog::new());
            (store, log)
        }
        StoreBackend::File => {
            let store: Arc<dyn SessionStore> =
                Arc::new(FileSessionStore::new(dir.join("sessions")).await?);
            let log: Arc<dyn CallbackLog> =
                Arc::new(FileCallbackLog::new(dir.join("callbacks")).await?);
            (store, log)
        }
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => {
            tokio::fs::create_dir_all(dir).await?;
            let sqlite = baitline_session::SqliteSessionStore::open(dir.join("baitline.db"))?;
            let log: Arc<dyn CallbackLog> = Arc::new(sqlite.callback_log());
            let store: Arc<dyn SessionStore> = Arc::new(sqlite);
            (store, log)
        }
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite => anyhow::bail!("built without the sqlite feature"),
    };
    Ok((store, log))
}

async fn build_services(config: &BaitlineConfig) -> anyhow::Result<Services> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (store, log) = open_store(config).await?;
    info!(
        backend = ?config.store.backend,
        data_dir = %config.store.data_dir.display(),
        "Session store ready"
    );

    let cache_ttl = Duration::from_secs(config.cache.ttl_secs);
    let cache: Option<Arc<SessionCache>> = config.cache.enabled.then(|| {
        Arc::new(TtlCache::new(config.cache.capacity, cache_ttl, clock.clone()))
    });

    let claims = Arc::new(StoreClaims::new(store.clone(), clock.clone()));
    let mut dispatcher =
        CallbackDispatcher::new(config.callback.clone(), claims, store.clone(), log, clock.clone())?;
    if let Some(cache) = &cache {
        dispatcher = dispatcher.with_cache(cache.clone());
    }
    let dispatcher = Arc::new(dispatcher);

    let collaborators = Collaborators {
        classifier: Arc::new(KeywordClassifier::new()),
        responder: Arc::new(ScriptedResponder::default()),
        extractor: Arc::new(RegexExtractor::new(config.intelligence.per_category_cap)),
    };
    let manager_config = ManagerConfig {
        collaborator_timeout: Duration::from_secs(config.collaborators.timeout_secs),
        per_category_cap: config.intelligence.per_category_cap,
        cache_ttl,
    };

    let pending = PendingDispatches::new();
    let mut manager = SessionManager::new(
        store.clone(),
        collaborators,
        SaturationPolicy::new(config.saturation.clone()),
        dispatcher.clone(),
        clock.clone(),
        manager_config,
    )
    .with_pending(pending.clone());
    if let Some(cache) = cache {
        manager = manager.with_cache(cache);
    }

    let monitor = Arc::new(InactivityMonitor::new(
        store,
        dispatcher,
        clock.clone(),
        config.monitor.clone(),
    ));

    Ok(Services {
        clock,
        manager: Arc::new(manager),
        monitor,
        pending,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = BaitlineConfig::load(&cli.config).await?;
    config.apply_env();
    config.validate(true)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let addr = tokio::net::lookup_host((host.as_str(), port))
                .await?
                .next()
                .with_context(|| format!("Cannot resolve {host}:{port}"))?;

            let services = build_services(&config).await?;

            let rate_limiter = Arc::new(RateLimiter::per_minute(
                config.security.rate_limit_per_minute,
                services.clock.clone(),
            ));
            let auth_config = AuthConfig::new(config.security.api_keys.clone());
            if auth_config.is_enabled() {
                info!(keys = config.security.api_keys.len(), "API key auth enabled");
            }

            let monitor = services.monitor.clone().start();
            let app = GatewayServer::build_with_middleware(
                services.manager.clone(),
                Some(rate_limiter),
                auth_config,
            );

            info!(host = %host, port, "Starting Baitline gateway");
            let served = GatewayServer::serve(app, addr, shutdown_signal()).await;

            monitor.shutdown().await;
            services.pending.drain().await;
            info!("Baitline stopped");
            served?;
        }
        Commands::Sweep => {
            let services = build_services(&config).await?;
            let report = services.monitor.sweep().await?;
            services.pending.drain().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
