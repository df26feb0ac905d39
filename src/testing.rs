//! Test doubles for the network and the cache stores.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::cache::{CacheStorage, CachedResponse, MemoryStorage};
use crate::fetch::Fetcher;
use crate::http::{Request, Response};

#[derive(Default)]
struct FakeNetwork {
  offline: bool,
  routes: HashMap<String, Response>,
  unreachable: HashSet<String>,
  calls: Vec<String>,
}

/// Scripted network. Clones share state, so a test can keep a handle after
/// moving one into the router. Unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct FakeFetcher {
  state: Arc<Mutex<FakeNetwork>>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(self, url: &str, response: Response) -> Self {
    self.set_route(url, response);
    self
  }

  pub fn set_route(&self, url: &str, response: Response) {
    self
      .state
      .lock()
      .unwrap()
      .routes
      .insert(url.to_string(), response);
  }

  /// Make a single URL fail at the network level.
  pub fn unreachable(self, url: &str) -> Self {
    self
      .state
      .lock()
      .unwrap()
      .unreachable
      .insert(url.to_string());
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.state.lock().unwrap().offline = offline;
  }

  /// `METHOD url` of every fetch attempted so far.
  pub fn calls(&self) -> Vec<String> {
    self.state.lock().unwrap().calls.clone()
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut state = self.state.lock().unwrap();
    let url = request.url.as_str();
    state.calls.push(format!("{} {}", request.method, url));

    if state.offline || state.unreachable.contains(url) {
      return Err(eyre!("Failed to fetch {}: network unreachable", url));
    }

    Ok(
      state
        .routes
        .get(url)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "text/plain", "Not Found")),
    )
  }
}

/// Memory storage whose reads, writes or deletes can be made to fail.
#[derive(Default)]
pub struct FailingStorage {
  inner: MemoryStorage,
  fail_writes: bool,
  fail_reads: bool,
  fail_deletes: HashSet<String>,
}

impl FailingStorage {
  pub fn failing_writes() -> Self {
    Self {
      fail_writes: true,
      ..Self::default()
    }
  }

  pub fn failing_reads() -> Self {
    Self {
      fail_reads: true,
      ..Self::default()
    }
  }

  pub fn failing_delete(name: &str) -> Self {
    Self {
      fail_deletes: HashSet::from([name.to_string()]),
      ..Self::default()
    }
  }

  pub fn inner(&self) -> &MemoryStorage {
    &self.inner
  }
}

impl CacheStorage for FailingStorage {
  fn open(&self, name: &str) -> Result<()> {
    self.inner.open(name)
  }

  fn names(&self) -> Result<Vec<String>> {
    self.inner.names()
  }

  fn delete(&self, name: &str) -> Result<bool> {
    if self.fail_deletes.contains(name) {
      return Err(eyre!("Failed to delete cache {}: storage error", name));
    }
    self.inner.delete(name)
  }

  fn get(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
    if self.fail_reads {
      return Err(eyre!("Failed to read {} from cache {}: storage error", key, name));
    }
    self.inner.get(name, key)
  }

  fn put(&self, name: &str, key: &str, response: &Response) -> Result<()> {
    if self.fail_writes {
      return Err(eyre!("Failed to store {} in cache {}: quota exceeded", key, name));
    }
    self.inner.put(name, key, response)
  }

  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()> {
    if self.fail_writes {
      return Err(eyre!("Failed to store entries in cache {}: quota exceeded", name));
    }
    self.inner.put_all(name, entries)
  }

  fn keys(&self, name: &str) -> Result<Vec<String>> {
    self.inner.keys(name)
  }
}
