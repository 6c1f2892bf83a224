//! Stale-while-revalidate strategy for static assets.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::CacheStorage;
use crate::http::{Network, Request, Response};
use crate::worker::{FetchEvent, ResponseSource, Served, ServiceWorker};

type PendingFetch = JoinHandle<Result<Response>>;

impl<S: CacheStorage + 'static, N: Network + 'static> ServiceWorker<S, N> {
  /// Serve the cached copy immediately and refresh it in the background.
  ///
  /// The network request starts before the store lookup. On a hit the cached
  /// response is returned without waiting for it; the refresh overwrites the
  /// entry on success and is dropped silently on failure. On a miss the
  /// network result is awaited, and if the network is unreachable an offline
  /// placeholder is returned.
  pub(in crate::worker) async fn stale_while_revalidate(
    &self,
    event: &mut FetchEvent,
  ) -> Result<Served> {
    let store = self.config.static_version.clone();
    self.storage.open(&store)?;

    let network = Arc::clone(&self.network);
    let request = event.request.clone();
    let pending: PendingFetch = tokio::spawn(async move { network.fetch(&request).await });

    if let Some(cached) = self.storage.match_request(&store, &event.request)? {
      debug!(url = %event.request.url, cached_at = %cached.cached_at, "Static cache hit");

      let storage = Arc::clone(&self.storage);
      let request = event.request.clone();
      event.wait_until(async move { revalidate(storage, store, request, pending).await });

      return Ok(Served::new(cached.response, ResponseSource::Cache));
    }

    match join(pending).await {
      Ok(response) => {
        if response.is_success() {
          self.store_in_background(event, &store, response.clone());
        }
        Ok(Served::new(response, ResponseSource::Network))
      }
      Err(e) => {
        debug!(url = %event.request.url, error = %e, "Static asset unavailable offline");
        Ok(Served::new(
          Response::offline_placeholder(),
          ResponseSource::Placeholder,
        ))
      }
    }
  }
}

async fn join(pending: PendingFetch) -> Result<Response> {
  pending
    .await
    .map_err(|e| eyre!("Network task failed: {}", e))?
}

/// Background half: overwrite the entry with a fresh success response.
/// Network failures are swallowed; the caller already has the cached copy.
async fn revalidate<S: CacheStorage>(
  storage: Arc<S>,
  store: String,
  request: Request,
  pending: PendingFetch,
) -> Result<()> {
  match join(pending).await {
    Ok(response) if response.is_success() => {
      storage.put(&store, &request, &response)?;
      debug!(url = %request.url, "Revalidated static asset");
    }
    Ok(response) => {
      debug!(url = %request.url, status = response.status, "Revalidation skipped");
    }
    Err(e) => {
      debug!(url = %request.url, error = %e, "Revalidation failed");
    }
  }
  Ok(())
}
