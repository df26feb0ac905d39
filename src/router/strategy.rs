//! Per-route strategies. All of them are network-first.

use tracing::{debug, info, warn};

use super::fallback;
use super::CacheRouter;
use crate::cache::{CacheStorage, Served};
use crate::fetch::Fetcher;
use crate::http::{Method, Request};

impl<F: Fetcher, S: CacheStorage> CacheRouter<F, S> {
  /// Live response as is, else the cached shell document, else the offline page.
  pub(super) async fn navigation(&self, request: &Request) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => Served::network(response),
      Err(e) => {
        info!(url = %request.url, error = %e, "navigation offline, serving shell");
        match self.lookup_shell(self.config.shell_document.as_str()) {
          Some(cached) => Served::cache(cached),
          None => Served::fallback(fallback::offline_shell()),
        }
      }
    }
  }

  /// Never cached. A write that cannot reach the server gets a JSON 503.
  pub(super) async fn endpoint_write(&self, request: &Request) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => Served::network(response),
      Err(e) => {
        info!(url = %request.url, error = %e, "write offline");
        Served::fallback(fallback::offline_write(&self.config.offline_notice))
      }
    }
  }

  /// 200 responses refresh the API store; offline reads get the last stored
  /// copy, however old, or an empty array.
  pub(super) async fn endpoint_read(&self, request: &Request) -> Served {
    let store = self.config.api_store.as_str();
    if let Err(e) = self.storage.open(store) {
      warn!(store, error = %e, "failed to open cache");
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.status == 200 && request.method == Method::Get {
          self.store_copy(store, request.cache_key(), &response);
        }
        Served::network(response)
      }
      Err(e) => {
        info!(url = %request.url, error = %e, "endpoint read offline");
        match self.lookup(store, request.cache_key()) {
          Some(cached) => Served::cache(cached),
          None => Served::fallback(fallback::empty_list()),
        }
      }
    }
  }

  /// 200 responses are added to the shell store; offline reads try the shell
  /// store, then every other store.
  pub(super) async fn generic_read(&self, request: &Request) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.status == 200 && request.method == Method::Get {
          self.store_copy(&self.config.shell_store, request.cache_key(), &response);
        }
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "read offline");
        match self.lookup_shell(request.cache_key()) {
          Some(cached) => Served::cache(cached),
          None => Served::fallback(fallback::unavailable()),
        }
      }
    }
  }

  pub(super) async fn passthrough(&self, request: &Request) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => Served::network(response),
      Err(e) => {
        debug!(method = %request.method, url = %request.url, error = %e, "request offline");
        Served::fallback(fallback::service_unavailable())
      }
    }
  }
}
