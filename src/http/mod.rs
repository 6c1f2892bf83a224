//! Request and response types shared by the network and cache boundaries.

mod network;

pub use network::{HttpNetwork, Network, OfflineNetwork};
pub use reqwest::Method;

use reqwest::StatusCode;
use url::Url;

/// An intercepted request. Identity for caching is method + URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }
}

/// A response as returned by the network or stored in a cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    let status_text = StatusCode::from_u16(status)
      .ok()
      .and_then(|s| s.canonical_reason())
      .unwrap_or_default()
      .to_string();

    Self {
      status,
      status_text,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// 2xx status. Only these are written to a cache store.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Returned for a static asset that is neither cached nor reachable.
  pub fn offline_placeholder() -> Self {
    Self::new(503, "Offline").with_header("Content-Type", "text/plain; charset=utf-8")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_success_range() {
    assert!(Response::new(200, "").is_success());
    assert!(Response::new(204, "").is_success());
    assert!(!Response::new(304, "").is_success());
    assert!(!Response::new(404, "").is_success());
    assert!(!Response::new(500, "").is_success());
  }

  #[test]
  fn test_status_text_from_status() {
    assert_eq!(Response::new(404, "").status_text, "Not Found");
    assert_eq!(Response::new(599, "").status_text, "");
  }

  #[test]
  fn test_header_lookup_ignores_case() {
    let response = Response::new(200, "").with_header("Content-Type", "text/html");
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_offline_placeholder() {
    let response = Response::offline_placeholder();
    assert_eq!(response.status, 503);
    assert!(!response.is_success());
    assert_eq!(response.body, b"Offline");
  }

  #[test]
  fn test_only_get_is_get() {
    let url = Url::parse("http://app.test/index.html").unwrap();
    assert!(Request::get(url.clone()).is_get());
    assert!(!Request::new(Method::POST, url).is_get());
  }
}
