//! Request identity used as the primary key inside a cache store.

use sha2::{Digest, Sha256};
use url::Url;

use crate::http::Request;

/// Stable, fixed-length key for a request: SHA256 of `"{METHOD} {url}"`.
///
/// The fragment never reaches the server, so two requests differing only in
/// fragment share an entry. The query string is part of the identity.
pub fn request_key(request: &Request) -> String {
  let input = format!("{} {}", request.method, normalize_url(&request.url));

  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// URL as stored alongside the entry.
pub fn normalize_url(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Method;

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_key_is_hex_sha256() {
    let key = request_key(&get("http://app.test/index.html"));
    assert_eq!(key.len(), 64);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_fragment_ignored() {
    assert_eq!(
      request_key(&get("http://app.test/index.html#calendar")),
      request_key(&get("http://app.test/index.html"))
    );
  }

  #[test]
  fn test_query_and_method_distinguish() {
    let plain = request_key(&get("http://app.test/api/data"));
    assert_ne!(plain, request_key(&get("http://app.test/api/data?month=2026-02")));

    let head = Request::new(Method::HEAD, Url::parse("http://app.test/api/data").unwrap());
    assert_ne!(plain, request_key(&head));
  }
}
