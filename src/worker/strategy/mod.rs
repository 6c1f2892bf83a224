//! Caching strategies applied to intercepted GET requests.

mod network_first;
mod stale_while_revalidate;

use std::sync::Arc;

use super::{FetchEvent, ServiceWorker};
use crate::cache::CacheStorage;
use crate::http::{Network, Response};

impl<S: CacheStorage + 'static, N: Network + 'static> ServiceWorker<S, N> {
  /// Write `response` for the event's request once the response has been
  /// handed back. A failed write fails the background task only.
  fn store_in_background(&self, event: &mut FetchEvent, store: &str, response: Response) {
    let storage = Arc::clone(&self.storage);
    let store = store.to_string();
    let request = event.request.clone();

    event.wait_until(async move { storage.put(&store, &request, &response) });
  }
}
