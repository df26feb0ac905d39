//! Core types shared by the cache stores and the router.

use chrono::{DateTime, Utc};

use crate::http::Response;

/// A response read back from a cache store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written. Informational only; entries never expire.
  pub cached_at: DateTime<Utc>,
}

/// A response handed back by the router, with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the entry was stored, for cache hits
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  pub fn fallback(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Fallback,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live response from the network
  Network,
  /// Network unavailable, served a (possibly stale) cached copy
  Cache,
  /// Network unavailable and nothing cached, served a synthesized response
  Fallback,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseSource::Network => "network",
      ResponseSource::Cache => "cache",
      ResponseSource::Fallback => "fallback",
    }
  }
}
