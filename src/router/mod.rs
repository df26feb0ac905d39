//! Offline cache router.
//!
//! Every intercepted request is classified and answered network-first, with
//! the cache stores and finally a synthesized response as fallbacks. The
//! router never returns an error to its caller: network failures trigger the
//! fallbacks and cache failures count as misses.
//!
//! Lifecycle: [`CacheRouter::install`] seeds the shell store,
//! [`CacheRouter::activate`] prunes stale stores and warms the API store, then
//! [`CacheRouter::handle`] serves requests.

mod classify;
mod fallback;
mod lifecycle;
mod strategy;

use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::cache::{CacheStorage, CachedResponse, Served};
use crate::config::RouterConfig;
use crate::fetch::Fetcher;
use crate::http::{Request, Response};

pub use classify::{classify, Route};
pub use lifecycle::{ActivationReport, Phase, WarmUp};

pub struct CacheRouter<F: Fetcher, S: CacheStorage> {
  config: RouterConfig,
  fetcher: F,
  storage: Arc<S>,
  phase: Mutex<Phase>,
}

impl<F: Fetcher, S: CacheStorage> CacheRouter<F, S> {
  /// Create a router for a freshly registered version.
  pub fn new(config: RouterConfig, fetcher: F, storage: Arc<S>) -> Self {
    Self {
      config,
      fetcher,
      storage,
      phase: Mutex::new(Phase::Installing),
    }
  }

  pub fn config(&self) -> &RouterConfig {
    &self.config
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn phase(&self) -> Phase {
    *self.phase.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_phase(&self, phase: Phase) {
    *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
  }

  /// Answer one request. Always produces a response.
  pub async fn handle(&self, request: &Request) -> Response {
    self.serve(request).await.response
  }

  /// Answer one request and report where the response came from.
  pub async fn serve(&self, request: &Request) -> Served {
    let route = classify(request, &self.config.endpoint_path);
    let served = match route {
      Route::Navigation => self.navigation(request).await,
      Route::EndpointWrite => self.endpoint_write(request).await,
      Route::EndpointRead => self.endpoint_read(request).await,
      Route::GenericRead => self.generic_read(request).await,
      Route::Passthrough => self.passthrough(request).await,
    };

    debug!(
      method = %request.method,
      url = %request.url,
      route = ?route,
      status = served.response.status,
      source = served.source.as_str(),
      "served"
    );
    served
  }

  /// Store lookup where a storage failure counts as a miss.
  fn lookup(&self, store: &str, key: &str) -> Option<CachedResponse> {
    self
      .storage
      .get(store, key)
      .unwrap_or_else(|e| {
        warn!(store, key, error = %e, "cache lookup failed");
        None
      })
  }

  /// Lookup across all stores where a storage failure counts as a miss.
  fn lookup_any(&self, key: &str) -> Option<CachedResponse> {
    self.storage.match_any(key).unwrap_or_else(|e| {
      warn!(key, error = %e, "cache lookup failed");
      None
    })
  }

  /// Current shell store first, so a leftover store that failed to prune
  /// never shadows it.
  fn lookup_shell(&self, key: &str) -> Option<CachedResponse> {
    self
      .lookup(&self.config.shell_store, key)
      .or_else(|| self.lookup_any(key))
  }

  /// Best-effort write of a response copy.
  fn store_copy(&self, store: &str, key: &str, response: &Response) {
    if let Err(e) = self.storage.put(store, key, response) {
      warn!(store, key, error = %e, "failed to cache response");
    }
  }
}
