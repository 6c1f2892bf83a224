//! Events delivered by the host and the effects the worker may ask of it.

use async_trait::async_trait;
use color_eyre::Result;
use futures::future::{self, BoxFuture};
use std::future::Future;

use crate::http::{Request, Response};

/// Work the host must finish before it considers an event handled.
pub type LifetimeExtension = BoxFuture<'static, Result<()>>;

/// An event whose lifetime the worker can extend past the handler's return.
///
/// Install and activate are not complete until every future passed to
/// [`ExtendableEvent::wait_until`] has resolved; a failing future fails the
/// phase.
#[derive(Default)]
pub struct ExtendableEvent {
  extensions: Vec<LifetimeExtension>,
}

impl ExtendableEvent {
  pub fn new() -> Self {
    Self::default()
  }

  /// Keep the event alive until `future` resolves.
  pub fn wait_until<F>(&mut self, future: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    self.extensions.push(Box::pin(future));
  }

  pub fn pending(&self) -> usize {
    self.extensions.len()
  }

  /// Await every extension, failing with the first error.
  pub async fn settle(self) -> Result<()> {
    future::try_join_all(self.extensions).await?;
    Ok(())
  }

  pub fn into_extensions(self) -> Vec<LifetimeExtension> {
    self.extensions
  }
}

/// An intercepted request. Background work (cache writes, revalidation) is
/// attached with [`FetchEvent::wait_until`] and runs after the response has
/// been handed back.
pub struct FetchEvent {
  pub request: Request,
  lifetime: ExtendableEvent,
}

impl FetchEvent {
  pub fn new(request: Request) -> Self {
    Self {
      request,
      lifetime: ExtendableEvent::new(),
    }
  }

  pub fn wait_until<F>(&mut self, future: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    self.lifetime.wait_until(future);
  }

  pub fn into_extensions(self) -> Vec<LifetimeExtension> {
    self.lifetime.into_extensions()
  }

  /// Await the background work attached to this event.
  #[cfg(test)]
  pub async fn settle(self) -> Result<()> {
    self.lifetime.settle().await
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Entry from a cache store
  Cache,
  /// Cached root document standing in for an unreachable route
  AppShell,
  /// Synthetic offline response
  Placeholder,
}

/// A response together with its origin.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  pub fn new(response: Response, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// What the worker decided to do with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not intercepted; the host performs its default network handling
  Passthrough,
  Respond(Served),
}

/// Effects the host exposes to a worker.
#[async_trait]
pub trait HostEffects: Send + Sync {
  /// Become active as soon as installation finishes, without waiting for
  /// clients of the previous worker to close.
  fn skip_waiting(&self);

  /// Take control of every open client.
  async fn claim_clients(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn test_settle_runs_every_extension() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut event = ExtendableEvent::new();

    for _ in 0..3 {
      let counter = counter.clone();
      event.wait_until(async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
    }
    assert_eq!(event.pending(), 3);

    event.settle().await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_settle_fails_if_any_extension_fails() {
    let mut event = ExtendableEvent::new();
    event.wait_until(async { Ok(()) });
    event.wait_until(async { Err(eyre!("precache failed")) });

    let err = event.settle().await.unwrap_err();
    assert_eq!(err.to_string(), "precache failed");
  }

  #[tokio::test]
  async fn test_empty_event_settles() {
    assert!(ExtendableEvent::new().settle().await.is_ok());
  }
}
