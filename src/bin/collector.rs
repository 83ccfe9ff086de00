use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use telemetry_porter::{
    collector::{CollectorPorter, Porter, install_panic_logger, shutdown_channel},
    config::read_config_file,
    runner::{build_porters, open_broker, open_store},
    util,
};
use tokio::spawn;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults to $PORTER_CONFIG or ./porter.json)
    #[arg(short)]
    file: Option<String>,

    /// Number of replicas of every porter to run in this process
    #[arg(long)]
    replicas: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init(level: &str) {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::INFO);
    let filter = filter::Targets::new().with_targets(vec![
        ("telemetry_porter", level),
        ("tower_http", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(&args.log_level);
    install_panic_logger();
    trace!("started with args: {args:?}");

    let path = args.file.clone().unwrap_or_else(util::get_config_path);
    let config = read_config_file(&path).with_context(|| format!("failed to load {path}"))?;
    let replicas = args.replicas.or_else(util::get_replicas).unwrap_or(1);

    let (trigger, shutdown) = shutdown_channel();

    let store = open_store(&config.store).await?;
    let broker = open_broker(&config.broker)?;
    let porters = build_porters(&config, replicas, store, broker, shutdown.clone()).await?;
    info!(
        "running {} porters ({} replicas each)",
        porters.len(),
        replicas.max(1)
    );

    #[cfg(feature = "api")]
    if let Some(api) = &config.api {
        use telemetry_porter::api::{ApiConfig, ApiState, spawn_api_server};

        let mut api_config = ApiConfig::from(api);
        if let Some(token) = util::get_api_token() {
            api_config.auth_token = Some(token);
        }
        let state = ApiState::new(
            porters
                .iter()
                .map(|porter| porter.clone() as Arc<dyn Porter>)
                .collect(),
        );
        spawn_api_server(api_config, state, shutdown.clone()).await?;
    }

    spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received ctrl-c, shutting down"),
            Err(e) => error!("failed to listen for ctrl-c, shutting down: {e}"),
        }
        trigger.trigger();
    });

    run_porters(porters).await;

    Ok(())
}

async fn run_porters(porters: Vec<Arc<CollectorPorter>>) {
    let handles: Vec<_> = porters
        .into_iter()
        .map(|porter| spawn(async move { (porter.name().to_string(), porter.run().await) }))
        .collect();

    for handle in handles {
        match handle.await {
            Ok((_, Ok(()))) => {}
            Ok((name, Err(e))) => error!("porter '{name}' failed: {e:#}"),
            Err(e) => warn!("porter task ended abnormally: {e}"),
        }
    }
}
