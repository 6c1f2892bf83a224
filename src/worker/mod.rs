//! The interception worker: lifecycle handlers and request dispatch.
//!
//! The host drives three entry points:
//! - [`ServiceWorker::on_install`] warms the dynamic store with the precache
//!   manifest (all-or-nothing) and asks to skip the waiting phase
//! - [`ServiceWorker::on_activate`] deletes every store not named by a current
//!   version tag and claims all open clients
//! - [`ServiceWorker::on_fetch`] classifies a request and hands it to a
//!   caching strategy

mod classify;
mod event;
mod strategy;

pub use classify::{classify, RequestClass};
pub use event::{
  ExtendableEvent, FetchEvent, FetchOutcome, HostEffects, ResponseSource, Served,
};

use color_eyre::{eyre::eyre, Result};
use futures::future;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::CacheConfig;
use crate::http::{Network, Request};

/// One deployed generation of the worker.
///
/// Configuration is fixed at construction; a new deployment is a new worker
/// with new version tags. Storage and network are shared with the host.
pub struct ServiceWorker<S: CacheStorage, N: Network> {
  origin: Url,
  config: Arc<CacheConfig>,
  storage: Arc<S>,
  network: Arc<N>,
}

impl<S: CacheStorage + 'static, N: Network + 'static> ServiceWorker<S, N> {
  pub fn new(origin: Url, config: CacheConfig, storage: Arc<S>, network: Arc<N>) -> Self {
    Self {
      origin,
      config: Arc::new(config),
      storage,
      network,
    }
  }

  /// Resolve a configured path against the origin.
  fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  /// Install: precache the manifest, then skip waiting.
  pub fn on_install(&self, event: &mut ExtendableEvent, host: Arc<dyn HostEffects>) {
    let worker = self.clone();
    event.wait_until(async move {
      worker.precache().await?;
      host.skip_waiting();
      Ok(())
    });
  }

  /// Fetch every manifest path and store them in one transaction.
  ///
  /// A network error or non-success status on any path fails the whole
  /// warm-up before anything is written.
  async fn precache(&self) -> Result<()> {
    let store = &self.config.dynamic_version;
    self.storage.open(store)?;

    let requests = self
      .config
      .precache
      .iter()
      .map(|path| self.resolve(path).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    let entries = future::try_join_all(requests.into_iter().map(|request| {
      let network = Arc::clone(&self.network);
      async move {
        let response = network
          .fetch(&request)
          .await
          .map_err(|e| e.wrap_err(format!("Failed to precache {}", request.url)))?;
        if !response.is_success() {
          return Err(eyre!(
            "Failed to precache {}: status {}",
            request.url,
            response.status
          ));
        }
        Ok((request, response))
      }
    }))
    .await?;

    self.storage.put_all(store, &entries)?;
    info!(store = %store, entries = entries.len(), "Precached manifest");

    Ok(())
  }

  /// Whether this generation's install completed in an earlier session:
  /// the dynamic store holds the app shell.
  pub fn is_installed(&self) -> Result<bool> {
    let shell = Request::get(self.resolve(&self.config.app_shell)?);
    Ok(
      self
        .storage
        .match_request(&self.config.dynamic_version, &shell)?
        .is_some(),
    )
  }

  /// Activate: drop obsolete generations, then claim clients.
  pub fn on_activate(&self, event: &mut ExtendableEvent, host: Arc<dyn HostEffects>) {
    let worker = self.clone();
    event.wait_until(async move {
      let deleted = worker.delete_obsolete_stores()?;
      debug!(deleted, "Obsolete cache stores removed");
      host.claim_clients().await
    });
  }

  /// Delete every store whose name is not a current version tag.
  fn delete_obsolete_stores(&self) -> Result<usize> {
    let mut deleted = 0;

    for name in self.storage.keys()? {
      if self.config.is_current(&name) {
        continue;
      }
      if self.storage.delete(&name)? {
        info!(store = %name, "Deleted obsolete cache store");
        deleted += 1;
      }
    }

    Ok(deleted)
  }

  /// Handle an intercepted request.
  ///
  /// An `Err` means no strategy could produce a response; the host then uses
  /// its default handling.
  pub async fn on_fetch(&self, event: &mut FetchEvent) -> Result<FetchOutcome> {
    let class = classify(&event.request, &self.config);
    debug!(method = %event.request.method, url = %event.request.url, ?class, "Intercepted request");

    let served = match class {
      RequestClass::Passthrough => return Ok(FetchOutcome::Passthrough),
      RequestClass::StaticAsset => self.stale_while_revalidate(event).await?,
      RequestClass::Dynamic => self.network_first(event).await?,
    };

    Ok(FetchOutcome::Respond(served))
  }
}

impl<S: CacheStorage, N: Network> Clone for ServiceWorker<S, N> {
  fn clone(&self) -> Self {
    Self {
      origin: self.origin.clone(),
      config: Arc::clone(&self.config),
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
    }
  }
}
