//! Permafrost coordinator daemon.

mod config;
mod devnet;
mod http;

use anyhow::{Context, Result};
use clap::Parser;
use config::AppConfig;
use devnet::{DevColdStore, DevHotClient};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use permafrost_deals::DealWatcher;
use permafrost_metadata::{MetadataStore, SqliteStore};
use permafrost_scheduler::{Coordinator, Scheduler};
use permafrost_tiers::{HotStorage, NoopNotifier};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Permafrost - a two-tier content-addressed storage coordinator
#[derive(Parser, Debug)]
#[command(name = "permafrostd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PERMAFROST_CONFIG",
        default_value = "config/permafrostd.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "permafrostd=info,permafrost_scheduler=info,permafrost_deals=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("PERMAFROST_").split("__"))
        .extract()
        .context("loading configuration")?;
    tracing::info!(config = %args.config, "starting permafrostd");

    let sqlite = Arc::new(
        SqliteStore::new(&config.db_path)
            .await
            .context("opening metadata store")?,
    );
    let store: Arc<dyn MetadataStore> = sqlite.clone();

    // Development tiers; production deployments embed the coordinator
    // crates and inject real hot/cold clients.
    let hot_client = Arc::new(DevHotClient::default());
    let (cold, update_source) = DevColdStore::new(Duration::from_secs(2));

    let hot = Arc::new(
        HotStorage::new(hot_client, sqlite.clone())
            .await
            .context("building hot storage")?,
    );
    let watcher = Arc::new(DealWatcher::new(Arc::new(update_source)));

    let registry = prometheus::Registry::new();
    permafrost_deals::metrics::register_metrics(&registry);

    let scheduler = Scheduler::start(
        config.scheduler.clone(),
        store.clone(),
        hot.clone(),
        Arc::new(cold),
        watcher,
        Arc::new(NoopNotifier),
    )
    .await
    .context("starting scheduler")?;
    let _coordinator = Coordinator::new(scheduler.clone(), store.clone(), hot);

    let router = http::router(store, registry);
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(bind = %config.bind, "serving health and metrics");

    tokio::select! {
        res = axum::serve(listener, router) => {
            res.context("serving http")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    scheduler.close().await;
    Ok(())
}
