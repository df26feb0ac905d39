//! Install and activate phases.

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::CacheRouter;
use crate::cache::CacheStorage;
use crate::config::RouterConfig;
use crate::fetch::Fetcher;
use crate::http::Request;

/// Lifecycle phase of a router. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Registered, shell not seeded yet
  Installing,
  /// Shell seeded, waiting to take over
  Installed,
  /// Serving traffic
  Active,
  /// Install failed; this version must never activate
  Redundant,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Phase::Installing => "installing",
      Phase::Installed => "installed",
      Phase::Active => "active",
      Phase::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

/// Outcome of the proactive endpoint fetch done during activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmUp {
  /// Fresh endpoint response stored in the API store
  Cached,
  /// Endpoint answered with a non-success status
  Skipped { status: u16 },
  /// Network or storage error
  Failed,
}

/// What activation did. Activation itself never fails.
#[derive(Debug, Clone)]
pub struct ActivationReport {
  /// Stale stores removed
  pub deleted: Vec<String>,
  /// Stale stores that could not be removed
  pub failed: Vec<String>,
  pub warm_up: WarmUp,
}

impl<F: Fetcher, S: CacheStorage> CacheRouter<F, S> {
  /// Create a router over persistent storage. A version whose shell store
  /// already holds every static asset starts out installed.
  pub fn restore(config: RouterConfig, fetcher: F, storage: Arc<S>) -> Self {
    let router = Self::new(config, fetcher, storage);
    if router.shell_is_seeded() {
      router.set_phase(Phase::Installed);
    }
    router
  }

  fn shell_is_seeded(&self) -> bool {
    match self.storage.keys(&self.config.shell_store) {
      Ok(keys) => self
        .config
        .static_assets
        .iter()
        .all(|url| keys.iter().any(|k| k == url.as_str())),
      Err(e) => {
        warn!(store = %self.config.shell_store, error = %e, "failed to read cache keys");
        false
      }
    }
  }

  /// Install if needed, then activate. Used by every entry point that serves.
  pub async fn ensure_active(&self) -> Result<ActivationReport> {
    if self.phase() == Phase::Installing {
      self.install().await?;
    }
    self.activate().await
  }

  /// Seed the shell store with every static asset, all or nothing.
  ///
  /// Any asset that fails to fetch or answers with a non-success status
  /// aborts the install before anything is written, and the router becomes
  /// [`Phase::Redundant`]. Returns the number of cached assets.
  pub async fn install(&self) -> Result<usize> {
    let phase = self.phase();
    if phase != Phase::Installing {
      return Err(eyre!("Cannot install a worker that is already {}", phase));
    }

    info!(store = %self.config.shell_store, assets = self.config.static_assets.len(), "installing");
    match self.seed_shell().await {
      Ok(count) => {
        self.set_phase(Phase::Installed);
        info!(store = %self.config.shell_store, count, "cached static assets");
        Ok(count)
      }
      Err(e) => {
        self.set_phase(Phase::Redundant);
        error!(store = %self.config.shell_store, error = %e, "install failed");
        Err(e)
      }
    }
  }

  async fn seed_shell(&self) -> Result<usize> {
    let store = self.config.shell_store.as_str();
    self.storage.open(store)?;

    let fetches = self.config.static_assets.iter().map(|url| async move {
      let response = self.fetcher.fetch(&Request::get(url.clone())).await?;
      if !response.is_success() {
        return Err(eyre!("Asset {} returned status {}", url, response.status));
      }
      Ok::<_, color_eyre::Report>((url.to_string(), response))
    });
    let entries = try_join_all(fetches).await?;

    self.storage.put_all(store, &entries)?;
    Ok(entries.len())
  }

  /// Prune stores from other versions and warm the API store.
  ///
  /// Allowed once installed; running it again with the same configuration
  /// leaves the same store set. Individual failures are logged and reported
  /// but never abort activation.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let phase = self.phase();
    if !matches!(phase, Phase::Installed | Phase::Active) {
      return Err(eyre!("Cannot activate a worker that is {}", phase));
    }

    info!("activating");
    let ((deleted, failed), warm_up) = futures::join!(self.prune_stale_stores(), self.warm_up());
    self.set_phase(Phase::Active);

    Ok(ActivationReport {
      deleted,
      failed,
      warm_up,
    })
  }

  async fn prune_stale_stores(&self) -> (Vec<String>, Vec<String>) {
    let names = match self.storage.names() {
      Ok(names) => names,
      Err(e) => {
        error!(error = %e, "failed to list caches");
        return (Vec::new(), Vec::new());
      }
    };

    let stale = names
      .into_iter()
      .filter(|name| *name != self.config.shell_store && *name != self.config.api_store);

    let attempts = stale.map(|name| async move {
      info!(store = %name, "removing old cache");
      match self.storage.delete(&name) {
        Ok(_) => Ok(name),
        Err(e) => {
          warn!(store = %name, error = %e, "failed to remove old cache");
          Err(name)
        }
      }
    });

    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    for outcome in join_all(attempts).await {
      match outcome {
        Ok(name) => deleted.push(name),
        Err(name) => failed.push(name),
      }
    }
    (deleted, failed)
  }

  async fn warm_up(&self) -> WarmUp {
    let store = self.config.api_store.as_str();
    let url = &self.config.endpoint_url;
    if let Err(e) = self.storage.open(store) {
      warn!(store, error = %e, "failed to open cache");
    }

    info!(url = %url, "proactively caching API data");
    match self.fetcher.fetch(&Request::get(url.clone())).await {
      Ok(response) if response.is_success() => {
        match self.storage.put(store, url.as_str(), &response) {
          Ok(()) => WarmUp::Cached,
          Err(e) => {
            warn!(store, error = %e, "failed to cache API data");
            WarmUp::Failed
          }
        }
      }
      Ok(response) => {
        warn!(url = %url, status = response.status, "failed to proactively cache API data");
        WarmUp::Skipped {
          status: response.status,
        }
      }
      Err(e) => {
        warn!(url = %url, error = %e, "error proactively caching API data");
        WarmUp::Failed
      }
    }
  }
}
