//! In-memory cache storage, for ephemeral runs.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;

use super::storage::CacheStorage;
use super::traits::CachedResponse;
use crate::http::Response;

#[derive(Default)]
struct Store {
  /// Entries in insertion order; overwrites keep their original slot
  entries: Vec<(String, CachedResponse)>,
}

impl Store {
  fn upsert(&mut self, key: &str, response: &Response) {
    let cached = CachedResponse {
      response: response.clone(),
      cached_at: Utc::now(),
    };
    match self.entries.iter_mut().find(|(k, _)| k == key) {
      Some((_, existing)) => *existing = cached,
      None => self.entries.push((key.to_string(), cached)),
    }
  }
}

/// Storage that keeps every store in process memory.
#[derive(Default)]
pub struct MemoryStorage {
  /// Stores in creation order
  stores: Mutex<Vec<(String, Store)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_stores<T>(&self, f: impl FnOnce(&mut Vec<(String, Store)>) -> T) -> Result<T> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut stores))
  }
}

fn store_mut<'a>(stores: &'a mut Vec<(String, Store)>, name: &str) -> &'a mut Store {
  let idx = match stores.iter().position(|(n, _)| n == name) {
    Some(idx) => idx,
    None => {
      stores.push((name.to_string(), Store::default()));
      stores.len() - 1
    }
  };
  &mut stores[idx].1
}

impl CacheStorage for MemoryStorage {
  fn open(&self, name: &str) -> Result<()> {
    self.with_stores(|stores| {
      store_mut(stores, name);
    })
  }

  fn names(&self) -> Result<Vec<String>> {
    self.with_stores(|stores| stores.iter().map(|(n, _)| n.clone()).collect())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    self.with_stores(|stores| {
      let before = stores.len();
      stores.retain(|(n, _)| n != name);
      stores.len() != before
    })
  }

  fn get(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
    self.with_stores(|stores| {
      stores
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, store)| store.entries.iter().find(|(k, _)| k == key))
        .map(|(_, cached)| cached.clone())
    })
  }

  fn put(&self, name: &str, key: &str, response: &Response) -> Result<()> {
    self.with_stores(|stores| store_mut(stores, name).upsert(key, response))
  }

  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()> {
    // Holding the lock for the whole batch makes it atomic
    self.with_stores(|stores| {
      let store = store_mut(stores, name);
      for (key, response) in entries {
        store.upsert(key, response);
      }
    })
  }

  fn keys(&self, name: &str) -> Result<Vec<String>> {
    self.with_stores(|stores| {
      stores
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, store)| store.entries.iter().map(|(k, _)| k.clone()).collect())
        .unwrap_or_default()
    })
  }
}
