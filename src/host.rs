//! Host runtime that drives workers through their lifecycle.
//!
//! ## Lifecycle
//! 1. **Installing**: `register` runs the install handler and waits for every
//!    lifetime extension. Failure makes the worker redundant and leaves the
//!    previous worker in charge.
//! 2. **Installed**: the worker waits while clients are still controlled by
//!    the previous worker, unless it asked to skip waiting.
//! 3. **Activating**: the activate handler runs; the previous worker becomes
//!    redundant and its clients move to the new one.
//! 4. **Activated**: only now are fetches from controlled clients intercepted.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::http::{Network, Request};
use crate::worker::{
  ExtendableEvent, FetchEvent, FetchOutcome, HostEffects, ResponseSource, Served, ServiceWorker,
};

pub type WorkerId = u64;
pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Installed,
  Activating,
  Activated,
  Redundant,
}

/// Registration bookkeeping shared with worker scopes.
#[derive(Default)]
struct Registration {
  next_worker_id: WorkerId,
  next_client_id: ClientId,
  states: HashMap<WorkerId, WorkerState>,
  waiting: Option<WorkerId>,
  active: Option<WorkerId>,
  skip_waiting: HashSet<WorkerId>,
  /// Open clients and the worker controlling each, if any
  clients: BTreeMap<ClientId, Option<WorkerId>>,
}

impl Registration {
  fn set_state(&mut self, worker: WorkerId, state: WorkerState) {
    debug!(worker, ?state, "Worker state changed");
    self.states.insert(worker, state);
  }

  fn controls_any_client(&self, worker: WorkerId) -> bool {
    self.clients.values().any(|c| *c == Some(worker))
  }
}

fn lock(registration: &Mutex<Registration>) -> Result<std::sync::MutexGuard<'_, Registration>> {
  registration
    .lock()
    .map_err(|e| eyre!("Lock poisoned: {}", e))
}

/// Effects handle given to one worker's lifecycle handlers.
struct WorkerScope {
  worker: WorkerId,
  registration: Arc<Mutex<Registration>>,
}

#[async_trait]
impl HostEffects for WorkerScope {
  fn skip_waiting(&self) {
    if let Ok(mut reg) = self.registration.lock() {
      reg.skip_waiting.insert(self.worker);
    }
  }

  async fn claim_clients(&self) -> Result<()> {
    let mut reg = lock(&self.registration)?;

    if reg.active != Some(self.worker) {
      return Err(eyre!("Worker {} is not active and cannot claim clients", self.worker));
    }

    let worker = self.worker;
    for controller in reg.clients.values_mut() {
      *controller = Some(worker);
    }
    info!(worker, clients = reg.clients.len(), "Claimed clients");

    Ok(())
  }
}

/// Simulated host for one registration scope.
///
/// Storage and network are shared by every worker generation; the network
/// also serves requests the worker does not handle.
pub struct Host<S: CacheStorage, N: Network> {
  registration: Arc<Mutex<Registration>>,
  workers: Mutex<HashMap<WorkerId, ServiceWorker<S, N>>>,
  network: Arc<N>,
  background: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: CacheStorage + 'static, N: Network + 'static> Host<S, N> {
  pub fn new(network: Arc<N>) -> Self {
    Self {
      registration: Arc::new(Mutex::new(Registration::default())),
      workers: Mutex::new(HashMap::new()),
      network,
      background: Mutex::new(Vec::new()),
    }
  }

  fn scope(&self, worker: WorkerId) -> Arc<dyn HostEffects> {
    Arc::new(WorkerScope {
      worker,
      registration: Arc::clone(&self.registration),
    })
  }

  fn worker(&self, id: WorkerId) -> Result<Option<ServiceWorker<S, N>>> {
    let workers = self
      .workers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(workers.get(&id).cloned())
  }

  /// Install a new worker generation and activate it when allowed.
  ///
  /// Returns the worker's id, or the install error. A failed install never
  /// disturbs the active worker.
  pub async fn register(&self, worker: ServiceWorker<S, N>) -> Result<WorkerId> {
    let id = {
      let mut reg = lock(&self.registration)?;
      let id = reg.next_worker_id;
      reg.next_worker_id += 1;
      reg.set_state(id, WorkerState::Installing);
      id
    };

    info!(worker = id, "Installing worker");
    let mut event = ExtendableEvent::new();
    worker.on_install(&mut event, self.scope(id));
    debug!(worker = id, extensions = event.pending(), "Waiting for install to settle");

    if let Err(e) = event.settle().await {
      lock(&self.registration)?.set_state(id, WorkerState::Redundant);
      warn!(worker = id, error = %e, "Install failed, keeping previous worker");
      return Err(e.wrap_err(format!("Install of worker {} failed", id)));
    }

    self
      .workers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .insert(id, worker);

    let replaced = {
      let mut reg = lock(&self.registration)?;
      reg.set_state(id, WorkerState::Installed);
      let replaced = reg.waiting.replace(id);
      if let Some(previous) = replaced {
        reg.set_state(previous, WorkerState::Redundant);
      }
      replaced
    };
    if let Some(previous) = replaced {
      self
        .workers
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?
        .remove(&previous);
    }

    self.activate_waiting().await?;
    Ok(id)
  }

  /// Activate the waiting worker unless the active one still has clients
  /// and the waiting one did not ask to skip waiting.
  async fn activate_waiting(&self) -> Result<()> {
    let (id, previous) = {
      let mut reg = lock(&self.registration)?;
      let Some(id) = reg.waiting else {
        return Ok(());
      };

      let blocked = reg
        .active
        .map(|active| reg.controls_any_client(active))
        .unwrap_or(false);
      if blocked && !reg.skip_waiting.contains(&id) {
        info!(worker = id, "Worker installed, waiting for clients to close");
        return Ok(());
      }

      reg.waiting = None;
      let previous = reg.active.replace(id);
      if let Some(previous) = previous {
        reg.set_state(previous, WorkerState::Redundant);
        for controller in reg.clients.values_mut() {
          if *controller == Some(previous) {
            *controller = Some(id);
          }
        }
      }
      reg.set_state(id, WorkerState::Activating);
      (id, previous)
    };

    if let Some(previous) = previous {
      self
        .workers
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?
        .remove(&previous);
    }

    let worker = self
      .worker(id)?
      .ok_or_else(|| eyre!("Worker {} is not registered", id))?;

    info!(worker = id, "Activating worker");
    let mut event = ExtendableEvent::new();
    worker.on_activate(&mut event, self.scope(id));
    let result = event.settle().await;

    // An activation failure does not roll back; the worker is active regardless
    lock(&self.registration)?.set_state(id, WorkerState::Activated);
    match result {
      Ok(()) => {
        info!(worker = id, "Worker activated");
        Ok(())
      }
      Err(e) => {
        warn!(worker = id, error = %e, "Activate handler failed");
        Err(e.wrap_err(format!("Activation of worker {} failed", id)))
      }
    }
  }

  /// Resume a worker that activated in an earlier session.
  ///
  /// Cache stores persist across restarts, so the worker is active again
  /// without running install or activate.
  pub fn restore(&self, worker: ServiceWorker<S, N>) -> Result<WorkerId> {
    let id = {
      let mut reg = lock(&self.registration)?;
      if reg.active.is_some() {
        return Err(eyre!("Host already has an active worker"));
      }
      let id = reg.next_worker_id;
      reg.next_worker_id += 1;
      reg.set_state(id, WorkerState::Activated);
      reg.active = Some(id);
      id
    };

    self
      .workers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .insert(id, worker);
    info!(worker = id, "Restored active worker");

    Ok(id)
  }

  /// Open a client (a page load). It is controlled by the active worker, if
  /// there is one.
  pub fn open_client(&self) -> Result<ClientId> {
    let mut reg = lock(&self.registration)?;
    let id = reg.next_client_id;
    reg.next_client_id += 1;

    let controller = reg
      .active
      .filter(|w| reg.states.get(w) == Some(&WorkerState::Activated));
    reg.clients.insert(id, controller);
    debug!(client = id, ?controller, "Client opened");

    Ok(id)
  }

  /// Close a client; a waiting worker may activate as a result.
  pub async fn close_client(&self, client: ClientId) -> Result<()> {
    lock(&self.registration)?
      .clients
      .remove(&client)
      .ok_or_else(|| eyre!("Unknown client {}", client))?;
    debug!(client, "Client closed");

    self.activate_waiting().await
  }

  pub fn state(&self, worker: WorkerId) -> Option<WorkerState> {
    lock(&self.registration)
      .ok()
      .and_then(|reg| reg.states.get(&worker).copied())
  }

  pub fn active(&self) -> Option<WorkerId> {
    lock(&self.registration).ok().and_then(|reg| reg.active)
  }

  #[cfg(test)]
  pub fn waiting(&self) -> Option<WorkerId> {
    lock(&self.registration).ok().and_then(|reg| reg.waiting)
  }

  #[cfg(test)]
  pub fn controller(&self, client: ClientId) -> Option<WorkerId> {
    lock(&self.registration)
      .ok()
      .and_then(|reg| reg.clients.get(&client).copied().flatten())
  }

  /// Issue a request from a client.
  ///
  /// Requests from uncontrolled clients, requests the worker passes through,
  /// and requests the worker fails to answer all get default handling: a
  /// plain network fetch.
  pub async fn fetch(&self, client: ClientId, request: Request) -> Result<Served> {
    let controller = {
      let reg = lock(&self.registration)?;
      let controller = *reg
        .clients
        .get(&client)
        .ok_or_else(|| eyre!("Unknown client {}", client))?;
      controller.filter(|w| reg.states.get(w) == Some(&WorkerState::Activated))
    };

    let worker = match controller {
      Some(id) => self.worker(id)?,
      None => None,
    };
    let Some(worker) = worker else {
      return self.default_fetch(&request).await;
    };

    let mut event = FetchEvent::new(request.clone());
    let outcome = worker.on_fetch(&mut event).await;
    self.spawn_background(event)?;

    match outcome {
      Ok(FetchOutcome::Respond(served)) => Ok(served),
      Ok(FetchOutcome::Passthrough) => self.default_fetch(&request).await,
      Err(e) => {
        warn!(url = %request.url, error = %e, "Worker could not respond, using default handling");
        self.default_fetch(&request).await
      }
    }
  }

  async fn default_fetch(&self, request: &Request) -> Result<Served> {
    let response = self.network.fetch(request).await?;
    Ok(Served::new(response, ResponseSource::Network))
  }

  /// Run a fetch event's lifetime extensions as detached tasks. Failures are
  /// logged and never reach the client.
  fn spawn_background(&self, event: FetchEvent) -> Result<()> {
    let mut background = self
      .background
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    background.retain(|handle| !handle.is_finished());

    for extension in event.into_extensions() {
      background.push(tokio::spawn(async move {
        if let Err(e) = extension.await {
          warn!(error = %e, "Background task failed");
        }
      }));
    }

    Ok(())
  }

  /// Wait for every background task spawned so far.
  pub async fn drain_background(&self) -> Result<()> {
    loop {
      let handles = std::mem::take(
        &mut *self
          .background
          .lock()
          .map_err(|e| eyre!("Lock poisoned: {}", e))?,
      );
      if handles.is_empty() {
        return Ok(());
      }
      for handle in handles {
        handle
          .await
          .map_err(|e| eyre!("Background task panicked: {}", e))?;
      }
    }
  }
}
