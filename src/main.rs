//! swcache - offline-capable caching proxy.
//!
//! CLI entry point that dispatches to subcommands.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use swcache::cache::LifecycleError;
use swcache::config::{Config, ConfigError, StoreBackend};
use swcache::network::{FetchError, HttpFetcher};
use swcache::server::{Server, ServerError};
use swcache::store::{DiskStore, MemoryStore, PartitionStore, StoreError};
use swcache::worker::{Worker, WorkerSettings};

const DEFAULT_CONFIG: &str = "swcache.toml";

/// Offline-capable HTTP response cache
#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Configuration file path (defaults to ./swcache.toml when present)
    #[arg(short, long, global = true, env = "SWCACHE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install and activate the current generation, then run the proxy
    Serve,

    /// Populate the static partition from the manifest
    Install,

    /// Delete partitions left over from older generations
    Activate,

    /// List stored partition names
    Partitions,

    /// Deliver a background sync event
    Sync {
        /// Sync registration tag
        tag: String,
    },

    /// Deliver a push event
    Push {
        /// Message payload
        payload: Option<String>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Network(#[from] FetchError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins when set.
    let default_filter = match cli.verbose {
        0 => "swcache=warn",
        1 => "swcache=info",
        _ => "swcache=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref()).await?;
    let store = open_store(&config).await?;

    if let Commands::Partitions = cli.command {
        for name in store.list_names().await? {
            println!("{name}");
        }
        return Ok(());
    }

    let fetcher = Arc::new(HttpFetcher::new(config.network.connect_timeout())?);
    let settings = WorkerSettings::from_config(&config)?;
    let scheme = settings.origin.scheme().to_owned();
    let worker = Worker::new(store, fetcher, settings);

    match cli.command {
        Commands::Install => {
            let outcome = worker.install().await?;
            println!(
                "{}: stored {} resources",
                outcome.population.partition,
                outcome.population.stored.len()
            );
        }
        Commands::Activate => {
            let outcome = worker.activate().await?;
            for name in &outcome.collection.deleted {
                println!("deleted {name}");
            }
            for (name, e) in &outcome.collection.failed {
                eprintln!("failed to delete {name}: {e}");
            }
        }
        Commands::Serve => {
            // A failed install only means a colder cache.
            if let Err(e) = worker.install().await {
                warn!(error = %e, "serving without a warmed cache");
            }
            worker.activate().await?;

            let server = Server::bind(&config.server.listen)
                .await?
                .with_scheme(&scheme);
            info!(address = %server.local_addr(), origin = %config.origin, "proxy ready");
            server
                .run(move |request| {
                    let worker = worker.clone();
                    async move { worker.dispatch(request).await }
                })
                .await?;
        }
        Commands::Sync { tag } => worker.on_sync(&tag),
        Commands::Push { payload } => worker.on_push(payload.as_deref().map(str::as_bytes)),
        Commands::Partitions => {}
    }
    Ok(())
}

async fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(path) = path {
        return Config::load(path).await;
    }
    let local = Path::new(DEFAULT_CONFIG);
    if tokio::fs::try_exists(local).await.unwrap_or(false) {
        debug!("Found local config: {}", local.display());
        return Config::load(local).await;
    }
    debug!("No config file, using defaults");
    let config = Config::default();
    config.validate()?;
    Ok(config)
}

async fn open_store(config: &Config) -> Result<Arc<dyn PartitionStore>, StoreError> {
    Ok(match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Disk => {
            debug!(path = %config.store.path.display(), "opening disk store");
            Arc::new(DiskStore::open_at(&config.store.path).await?)
        }
    })
}
