mod cache;
mod config;
mod host;
mod http;
mod logging;
mod worker;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use cache::SqliteStorage;
use config::Config;
use host::Host;
use http::{HttpNetwork, Method, Network, OfflineNetwork, Request};
use worker::ServiceWorker;

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Offline caching worker for the kintai app")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./swcache.yaml or $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin the app is served from
  #[arg(short, long)]
  origin: Option<String>,

  /// Cache database file
  #[arg(long)]
  database: Option<PathBuf>,

  /// Also write logs to a daily-rotated file in this directory
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate the configured deployment
  Update,
  /// Send requests through the configured deployment, installing it first
  /// unless offline
  Fetch {
    /// Paths or absolute URLs to request
    #[arg(required = true)]
    paths: Vec<String>,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Treat the network as unreachable and resume the installed deployment
    #[arg(long)]
    offline: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_dir.as_deref());

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(database) = args.database {
    config.database = Some(database);
  }
  config.validate()?;

  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);

  match args.command {
    Command::Update => {
      let network = HttpNetwork::new(config.network.timeout())?;
      update(&config, storage, Arc::new(network)).await?;
    }
    Command::Fetch {
      paths,
      method,
      offline,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      if offline {
        fetch(&config, storage, Arc::new(OfflineNetwork), &paths, method, true).await?;
      } else {
        let network = HttpNetwork::new(config.network.timeout())?;
        fetch(&config, storage, Arc::new(network), &paths, method, false).await?;
      }
    }
  }

  Ok(())
}

/// Register the configured generation with a fresh host.
async fn register<N: Network + 'static>(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<N>,
) -> Result<Host<SqliteStorage, N>> {
  let worker = ServiceWorker::new(
    config.origin_url()?,
    config.cache.clone(),
    storage,
    Arc::clone(&network),
  );

  let host = Host::new(network);
  let id = host.register(worker).await?;
  info!(
    worker = id,
    dynamic_store = %config.cache.dynamic_version,
    static_store = %config.cache.static_version,
    "Deployment registered"
  );

  Ok(host)
}

async fn update<N: Network + 'static>(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<N>,
) -> Result<()> {
  let host = register(config, storage, network).await?;
  let state = host
    .active()
    .and_then(|id| host.state(id))
    .ok_or_else(|| eyre!("No active worker after update"))?;

  println!(
    "{} / {}: {:?}",
    config.cache.dynamic_version, config.cache.static_version, state
  );
  Ok(())
}

/// Start a host for `fetch`.
///
/// A generation installed by an earlier run is resumed first, so a failed
/// install (origin unreachable) still leaves it serving requests. With
/// `install` false no install is attempted.
async fn start<N: Network + 'static>(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<N>,
  install: bool,
) -> Result<Host<SqliteStorage, N>> {
  let origin = config.origin_url()?;
  let worker = || {
    ServiceWorker::new(
      origin.clone(),
      config.cache.clone(),
      Arc::clone(&storage),
      Arc::clone(&network),
    )
  };

  let host = Host::new(Arc::clone(&network));
  if worker().is_installed()? {
    host.restore(worker())?;
  }

  if install {
    match host.register(worker()).await {
      Ok(id) => info!(worker = id, "Deployment registered"),
      Err(e) if host.active().is_some() => {
        warn!(error = %e, "Update failed, serving the installed deployment")
      }
      Err(e) => return Err(e),
    }
  } else if host.active().is_none() {
    return Err(eyre!(
      "{} is not installed; run `swcache update` while online first",
      config.cache.dynamic_version
    ));
  }

  Ok(host)
}

async fn fetch<N: Network + 'static>(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<N>,
  paths: &[String],
  method: Method,
  offline: bool,
) -> Result<()> {
  let origin = config.origin_url()?;
  let host = start(config, storage, network, !offline).await?;
  let client = host.open_client()?;

  for path in paths {
    let url = origin
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))?;
    let request = Request::new(method.clone(), url);

    match host.fetch(client, request).await {
      Ok(served) => println!(
        "{} {} {} {:?} {} {} bytes",
        method,
        path,
        served.response.status,
        served.source,
        served.response.header("content-type").unwrap_or("-"),
        served.response.body.len()
      ),
      Err(e) => println!("{} {} failed: {}", method, path, e),
    }
  }

  host.close_client(client).await?;
  host.drain_background().await
}
