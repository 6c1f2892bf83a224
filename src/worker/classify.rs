//! Request classification: which strategy, if any, handles a request.

use crate::config::CacheConfig;
use crate::http::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Left to the host's default handling; never read from or written to cache
  Passthrough,
  /// Stale-while-revalidate against the static store
  StaticAsset,
  /// Network-first against the dynamic store
  Dynamic,
}

pub fn classify(request: &Request, config: &CacheConfig) -> RequestClass {
  // Mutating requests must never touch a cache store
  if !request.is_get() {
    return RequestClass::Passthrough;
  }

  // Extension and data URLs cannot be stored
  if !matches!(request.url.scheme(), "http" | "https") {
    return RequestClass::Passthrough;
  }

  if config.is_static_path(request.url.path()) {
    RequestClass::StaticAsset
  } else {
    RequestClass::Dynamic
  }
}
