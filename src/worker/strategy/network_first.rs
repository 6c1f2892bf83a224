//! Network-first strategy for documents and API payloads.

use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::cache::CacheStorage;
use crate::http::{Network, Request};
use crate::worker::{FetchEvent, ResponseSource, Served, ServiceWorker};

impl<S: CacheStorage + 'static, N: Network + 'static> ServiceWorker<S, N> {
  /// Serve from the network whenever it answers.
  ///
  /// 1. Network response: returned as-is; a success is also copied into the
  ///    dynamic store
  /// 2. Network failure: the cached entry for the request
  /// 3. No entry: the cached app shell, so unknown routes still render offline
  /// 4. No app shell either: error, and the host falls back to default handling
  pub(in crate::worker) async fn network_first(&self, event: &mut FetchEvent) -> Result<Served> {
    let store = self.config.dynamic_version.clone();

    let error = match self.network.fetch(&event.request).await {
      Ok(response) => {
        if response.is_success() {
          self.store_in_background(event, &store, response.clone());
        } else {
          debug!(url = %event.request.url, status = response.status, "Not caching error response");
        }
        return Ok(Served::new(response, ResponseSource::Network));
      }
      Err(e) => e,
    };

    debug!(url = %event.request.url, error = %error, "Network failed, falling back to cache");

    if let Some(cached) = self.storage.match_request(&store, &event.request)? {
      return Ok(Served::new(cached.response, ResponseSource::Cache));
    }

    let shell = Request::get(self.resolve(&self.config.app_shell)?);
    if let Some(cached) = self.storage.match_request(&store, &shell)? {
      debug!(url = %event.request.url, "Serving app shell");
      return Ok(Served::new(cached.response, ResponseSource::AppShell));
    }

    Err(eyre!(
      "Offline with no cached response for {}: {}",
      event.request.url,
      error
    ))
  }
}
