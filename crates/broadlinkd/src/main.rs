use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use broadlinkd::Config;
use broadlinkd::Engine;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(version, about = "Broadlink sensor daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "broadlinkd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    tracing::info!("broadlinkd starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    let engine = Arc::new(Engine::new());

    let runner = engine.clone();
    let engine_task = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            tracing::error!("Engine stopped with error: {}", e);
        }
    });

    engine.register_integrations_from_config(&config);

    let api_shutdown = match &config.api {
        Some(api) => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let listen = api.listen.clone();
            let port = api.port;
            let engine = engine.clone();
            tokio::spawn(async move {
                if let Err(e) = broadlinkd::api::serve(listen, port, engine, rx).await {
                    tracing::error!("HTTP API server failed: {}", e);
                }
            });
            Some(tx)
        }
        None => None,
    };

    let poll_task = config.system.scan_interval().map(|period| {
        tracing::info!("Polling entities every {:?}", period);
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately and setup already fetched
            interval.tick().await;
            loop {
                interval.tick().await;
                engine.request_update_all();
            }
        })
    });

    tracing::info!("Press Ctrl+C to exit");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    if let Some(poll_task) = poll_task {
        poll_task.abort();
    }
    if let Some(tx) = api_shutdown {
        let _ = tx.send(());
    }

    engine.shutdown().await;
    engine_task.abort();

    tracing::info!("broadlinkd shutdown complete");

    Ok(())
}
