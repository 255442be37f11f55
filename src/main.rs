// main.rs
#[macro_use]
extern crate log;

use std::error::Error;
use std::process;

use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

use log_shipper::collector::watcher::{PlatformWatcher, Watcher};
use log_shipper::collector::Collector;
use log_shipper::config::{Args, Config};
use log_shipper::parser::Parser;
use log_shipper::pipeline::Pipeline;
use log_shipper::shipper::elasticsearch::Elasticsearch;
use log_shipper::shipper::Shipper;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(error) = run(Args::from_args()).await {
        error!("{}", error);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = Config::from_args(args)?;
    debug!("{:?}", config);

    let collector = Collector::initialize(&config.file, PlatformWatcher::new()?)?;
    let parser = Parser::new(config.extractor(), config.drop_policy);

    let index = Elasticsearch::connect(
        config.addresses.clone(),
        config.credentials.clone(),
        config.index.as_str(),
        config.request_timeout,
    )?;
    let shipper = Shipper::connect(index, config.retry_policy).await?;

    info!(
        "Shipping {} to index {:?} ({} address(es))",
        collector.path().display(),
        config.index,
        config.addresses.len()
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    Pipeline::new(collector, parser, shipper)
        .with_queue_capacity(config.queue_capacity)
        .run(shutdown)
        .await?;

    Ok(())
}

/// Cancel `shutdown` on SIGINT, or on SIGTERM where there is one.
async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(error) => {
                warn!("Failed to listen for SIGTERM: {}", error);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for interrupts: {}", error);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => info!("Interrupted, shutting down"),
        _ = terminate => info!("Terminated, shutting down"),
    }

    shutdown.cancel();
}
