//! Request interceptor that keeps the app shell usable without a network.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::traits::{
  CacheStorage, Intercepted, Network, Request, RequestMode, Response, ResponseSource,
};

/// Lifecycle of one cache generation's interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Created, nothing cached yet
  Parsed,
  /// Precache manifest stored, waiting to activate
  Installed,
  /// Older generations evicted, intercepting requests
  Activated,
  /// Installation failed; previous generations stay in charge
  Redundant,
}

/// Network-first interceptor with a versioned fallback cache.
///
/// 1. Try the network; cache a copy of every `200` in the background
/// 2. On network failure, serve the cached response for the request
/// 3. Navigations with no cached copy get the cached root document
/// 4. Anything else gets a synthesized `503` offline response
pub struct CacheInterceptor<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  generation: String,
  origin: Url,
  precache: Vec<String>,
  state: Lifecycle,
  /// Background cache writes not yet awaited
  writes: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: CacheStorage + 'static, N: Network> CacheInterceptor<S, N> {
  /// Create an interceptor for a new generation.
  ///
  /// `precache` lists paths resolved against `origin`.
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    origin: Url,
    generation: impl Into<String>,
    precache: Vec<String>,
  ) -> Self {
    Self {
      storage,
      network,
      generation: generation.into(),
      origin,
      precache,
      state: Lifecycle::Parsed,
      writes: Mutex::new(Vec::new()),
    }
  }

  /// Take over a generation installed by an earlier run.
  pub fn resume(storage: Arc<S>, network: Arc<N>, origin: Url, generation: &str) -> Result<Self> {
    if !storage.keys()?.iter().any(|key| key == generation) {
      return Err(eyre!("Cache generation {} has never been installed", generation));
    }

    let mut interceptor = Self::new(storage, network, origin, generation, Vec::new());
    interceptor.state = Lifecycle::Activated;
    info!(generation, "resumed cache generation");
    Ok(interceptor)
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn state(&self) -> Lifecycle {
    self.state
  }

  /// Precache the shell resources into this generation.
  ///
  /// Every entry must be fetched with status `200`. If any fails nothing is
  /// written and the interceptor becomes redundant; older generations are
  /// left untouched.
  pub async fn install(&mut self) -> Result<()> {
    info!(generation = %self.generation, resources = self.precache.len(), "installing cache generation");

    let installed = match self.fetch_manifest().await {
      Ok(entries) => self.store_manifest(&entries),
      Err(e) => Err(e),
    };

    match installed {
      Ok(()) => {
        self.state = Lifecycle::Installed;
        Ok(())
      }
      Err(e) => {
        warn!(generation = %self.generation, error = %e, "cache installation failed");
        self.state = Lifecycle::Redundant;
        Err(e)
      }
    }
  }

  /// Write the fetched manifest into this generation.
  ///
  /// A generation created here is removed again if any write fails, so a
  /// partial shell is never left behind for a later run to resume.
  fn store_manifest(&self, entries: &[(Request, Response)]) -> Result<()> {
    let existed = self.storage.keys()?.iter().any(|key| key == &self.generation);

    let stored = self.storage.open(&self.generation).and_then(|()| {
      entries
        .iter()
        .try_for_each(|(request, response)| self.storage.put(&self.generation, request, response))
    });

    if stored.is_err() && !existed {
      if let Err(e) = self.storage.delete(&self.generation) {
        warn!(generation = %self.generation, error = %e, "failed to discard partial cache generation");
      }
    }
    stored
  }

  /// Evict every other generation and start intercepting.
  ///
  /// Returns the names of the evicted generations.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    if self.state != Lifecycle::Installed {
      return Err(eyre!(
        "Cannot activate cache generation {} in state {:?}",
        self.generation,
        self.state
      ));
    }

    let mut evicted = Vec::new();
    for key in self.storage.keys()? {
      if key != self.generation && self.storage.delete(&key)? {
        evicted.push(key);
      }
    }

    self.state = Lifecycle::Activated;
    info!(generation = %self.generation, evicted = ?evicted, "cache generation activated");
    Ok(evicted)
  }

  /// Serve one request.
  ///
  /// Only `GET` requests are intercepted, and only once activated; anything
  /// else goes straight to the network and network errors propagate.
  pub async fn handle(&self, request: &Request) -> Result<Intercepted> {
    if self.state != Lifecycle::Activated || !request.is_get() {
      let response = self.network.fetch(request).await?;
      return Ok(Intercepted {
        response,
        source: ResponseSource::Passthrough,
      });
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.status == 200 {
          self.store_in_background(request.clone(), response.clone());
        }
        debug!(url = %request.url, status = response.status, "served from network");
        Ok(Intercepted {
          response,
          source: ResponseSource::Network,
        })
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, falling back to cache");
        Ok(self.fallback(request))
      }
    }
  }

  /// Wait for background cache writes to finish.
  pub async fn flush(&self) {
    let handles: Vec<JoinHandle<()>> = match self.writes.lock() {
      Ok(mut writes) => writes.drain(..).collect(),
      Err(_) => return,
    };

    for handle in handles {
      if let Err(e) = handle.await {
        warn!(error = %e, "cache write task failed");
      }
    }
  }

  async fn fetch_manifest(&self) -> Result<Vec<(Request, Response)>> {
    let requests = self
      .precache
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(Request::get)
          .map_err(|e| eyre!("Invalid precache entry {}: {}", path, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let responses = futures::future::try_join_all(requests.iter().map(|request| async move {
      let response = self
        .network
        .fetch(request)
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;
      if response.status != 200 {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          request.url,
          response.status
        ));
      }
      Ok(response)
    }))
    .await?;

    Ok(requests.into_iter().zip(responses).collect())
  }

  fn fallback(&self, request: &Request) -> Intercepted {
    if let Some(response) = self.lookup(request) {
      return Intercepted {
        response,
        source: ResponseSource::Cache,
      };
    }

    if request.mode == RequestMode::Navigate {
      if let Ok(root) = self.origin.join("/") {
        if let Some(response) = self.lookup(&Request::get(root)) {
          return Intercepted {
            response,
            source: ResponseSource::Shell,
          };
        }
      }
    }

    Intercepted {
      response: Response::offline(),
      source: ResponseSource::Offline,
    }
  }

  fn lookup(&self, request: &Request) -> Option<Response> {
    match self.storage.match_request(request) {
      Ok(found) => found,
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn store_in_background(&self, request: Request, response: Response) {
    let storage = Arc::clone(&self.storage);
    let generation = self.generation.clone();

    let handle = tokio::task::spawn_blocking(move || {
      if let Err(e) = storage.put(&generation, &request, &response) {
        warn!(url = %request.url, error = %e, "failed to cache response");
      }
    });

    if let Ok(mut writes) = self.writes.lock() {
      writes.retain(|h| !h.is_finished());
      writes.push(handle);
    }
  }
}
