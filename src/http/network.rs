//! Network boundary: outbound request/response exchange.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use super::{Request, Response};

/// Outbound network access.
///
/// An `Err` means the request never produced a response (offline, DNS,
/// connection reset). HTTP error statuses are returned as `Ok` responses and
/// callers decide with [`Response::is_success`].
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  /// Create a client. Without a timeout the client's own defaults apply.
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {} {}: {}", request.method, request.url, e))?;

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

/// Network that is never reachable. Used for `--offline` runs.
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    Err(eyre!("Network unavailable: {} {}", request.method, request.url))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;
  use url::Url;

  /// Serve one canned HTTP/1.1 reply on a local port.
  async fn serve_once(reply: &'static [u8]) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = [0u8; 4096];
      let _ = socket.read(&mut buf).await;
      socket.write_all(reply).await.unwrap();
      socket.shutdown().await.ok();
    });
    Url::parse(&format!("http://{}/index.html", addr)).unwrap()
  }

  #[tokio::test]
  async fn test_http_network_maps_response() {
    let url = serve_once(
      b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nX-Build: 42\r\nContent-Length: 7\r\nConnection: close\r\n\r\nmissing",
    )
    .await;
    let network = HttpNetwork::new(Some(Duration::from_secs(5))).unwrap();

    let response = network.fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "Not Found");
    assert!(!response.is_success());
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.header("x-build"), Some("42"));
    assert_eq!(response.body, b"missing");
  }

  #[tokio::test]
  async fn test_http_network_unreachable_is_error() {
    let addr = {
      let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
      listener.local_addr().unwrap()
    };
    let url = Url::parse(&format!("http://{}/index.html", addr)).unwrap();
    let network = HttpNetwork::new(Some(Duration::from_secs(5))).unwrap();

    let err = network.fetch(&Request::get(url)).await.unwrap_err();
    assert!(err.to_string().contains("Failed to fetch GET"));
  }

  #[tokio::test]
  async fn test_offline_network_always_fails() {
    let request = Request::get(Url::parse("http://app.test/index.html").unwrap());
    let err = OfflineNetwork.fetch(&request).await.unwrap_err();
    assert!(err.to_string().contains("/index.html"));
  }
}
