use anyhow::{anyhow, Result};
use hermitdns::clock::{SharedClock, SystemClock};
use hermitdns::config::{Config, SharedConfig, StorageDriver};
use hermitdns::error::Error;
use hermitdns::kv::{DynKvStore, DynRecordLookup, FileStore, TreeStore};
use hermitdns::records::{Lifecycle, RecordStore, Sweeper};
use hermitdns::resolver::Resolver;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let mut first_args = std::env::args().take(2);
    let (program_name, config_file) = (
        first_args.next().unwrap_or("hermitdns".to_string()),
        first_args.next(),
    );

    let config = config_init(&program_name, config_file)?;
    let clock: SharedClock = Arc::new(SystemClock);
    let (kv_store, record_lookup) = store_from_config(&config, &clock).await?;

    let records = Arc::new(RecordStore::new(
        kv_store,
        clock.clone(),
        config.backend_timeout,
    ));
    let lifecycle = Arc::new(Lifecycle::new(records, config.clone(), clock.clone()));
    let resolver = Arc::new(Resolver::new(config.clone(), record_lookup));

    tracing::info!("DNS listening on UDP {}", &config.dns_udp_bind_addr);
    tracing::info!("DNS listening on TCP {}", &config.dns_tcp_bind_addr);
    let dns_server = hermitdns::dns::server::new(config.clone(), resolver).await?;
    let dns_handle = tokio::spawn(dns_server.block_until_done());

    tracing::info!("API listening on {}", &config.api_bind_addr);
    let api_server = hermitdns::api::server::new(config.clone(), lifecycle.clone());
    let api_handle = tokio::spawn(api_server);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tracing::info!("sweeping expired records every {:?}", config.sweep_interval);
    let sweeper = Sweeper::new(lifecycle, clock, config.sweep_interval, shutdown_rx);
    let sweeper_handle = tokio::spawn(sweeper.run());

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
        },
        Ok(dns_res) = dns_handle => {
            if let Err(err) = dns_res {
                return Err(Error::DNSError(err).into())
            }
        }
        Ok(api_res) = api_handle => {
            if let Err(err) = api_res {
                return Err(err.into())
            }
        }
    }

    // Let the sweeper finish its tick before the process exits.
    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;
    tracing::info!("goodbye");
    Ok(())
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hermitdns=info".into()),
        )
        .init();
}

fn config_init(program_name: &str, config_file: Option<String>) -> Result<SharedConfig> {
    match config_file {
        None => Err(anyhow!("usage: {program_name} /path/to/config.json")),
        Some(config_file) => {
            let config = Config::try_from_file(&config_file)?;
            tracing::debug!("loaded config from {config_file}");
            Ok(Arc::new(config))
        }
    }
}

async fn store_from_config(
    config: &SharedConfig,
    clock: &SharedClock,
) -> Result<(DynKvStore, DynRecordLookup), Error> {
    match config.storage.driver {
        StorageDriver::KeyValue => {
            let dsn = config.storage.dsn.clone().ok_or_else(|| {
                Error::InvalidArgument("the keyvalue driver requires a dsn".to_string())
            })?;
            tracing::debug!("using file-backed record store: {dsn}");
            let store = Arc::new(FileStore::open(&dsn, &config.path_prefix).await?);
            Ok((store.clone(), store))
        }
        StorageDriver::Memory => {
            tracing::debug!("using in-memory record store");
            let store = Arc::new(TreeStore::new(
                &config.path_prefix,
                config.lease_duration,
                clock.clone(),
            ));
            Ok((store.clone(), store))
        }
    }
}
