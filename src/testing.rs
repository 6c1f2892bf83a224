//! Test doubles for the network and host boundaries.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::config::CacheConfig;
use crate::http::{Network, Request, Response};
use crate::worker::HostEffects;

pub fn origin() -> Url {
  Url::parse("http://app.test/").unwrap()
}

pub fn get(path: &str) -> Request {
  Request::get(origin().join(path).unwrap())
}

/// Small manifest with short tags, one generation per test.
pub fn test_config() -> CacheConfig {
  versioned_config("v1")
}

pub fn versioned_config(version: &str) -> CacheConfig {
  CacheConfig {
    dynamic_version: format!("dynamic-{}", version),
    static_version: format!("static-{}", version),
    app_shell: "/index.html".to_string(),
    precache: vec!["/index.html".to_string(), "/manifest.json".to_string()],
    ..Default::default()
  }
}

#[derive(Clone)]
enum Route {
  Respond(Response),
  Fail,
}

/// Scripted network keyed by URL path. Unrouted paths answer 404.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Route>>,
  offline: AtomicBool,
  delay: Option<Duration>,
  calls: AtomicUsize,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn respond(&self, path: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(path.to_string(), Route::Respond(response));
  }

  /// Requests for `path` fail as if the connection dropped.
  pub fn fail(&self, path: &str) {
    self.routes.lock().unwrap().insert(path.to_string(), Route::Fail);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("offline: {}", request.url));
    }

    let route = self.routes.lock().unwrap().get(request.url.path()).cloned();
    match route {
      Some(Route::Respond(response)) => Ok(response),
      Some(Route::Fail) => Err(eyre!("connection reset: {}", request.url)),
      None => Ok(Response::new(404, "Not Found")),
    }
  }
}

/// Records which effects a worker invoked.
#[derive(Default)]
pub struct RecordingHost {
  skipped: AtomicBool,
  claimed: AtomicBool,
}

impl RecordingHost {
  pub fn skipped_waiting(&self) -> bool {
    self.skipped.load(Ordering::SeqCst)
  }

  pub fn claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl HostEffects for RecordingHost {
  fn skip_waiting(&self) {
    self.skipped.store(true, Ordering::SeqCst);
  }

  async fn claim_clients(&self) -> Result<()> {
    self.claimed.store(true, Ordering::SeqCst);
    Ok(())
  }
}
