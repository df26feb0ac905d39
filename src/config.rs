use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_OFFLINE_NOTICE: &str = "You are currently offline. Please try submitting your feedback again when you have an internet connection.";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Upstream origin the app is served from (the worker scope)
  pub origin: String,
  /// Version tag embedded in both store names
  pub version: String,
  pub shell_prefix: String,
  pub api_prefix: String,
  /// Paths cached at install time, relative to `origin`
  pub static_assets: Vec<String>,
  /// Resource endpoint for listing and creating submissions
  pub endpoint_path: String,
  /// Document served to offline navigations
  pub shell_document: String,
  pub offline_notice: String,
  /// Address the local proxy listens on
  pub listen: SocketAddr,
  /// SQLite database path (default: $XDG_DATA_HOME/feedback-cache/cache.db)
  pub database: Option<PathBuf>,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is not set
  pub level: String,
  /// Write logs to a daily-rolling file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      version: "v1".to_string(),
      shell_prefix: "my-pwa-cache".to_string(),
      api_prefix: "api-cache".to_string(),
      static_assets: [
        "/",
        "/index.html",
        "/static/js/bundle.js",
        "/static/js/main.chunk.js",
        "/static/js/0.chunk.js",
        "/static/css/main.css",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      endpoint_path: "/submissions".to_string(),
      shell_document: "/index.html".to_string(),
      offline_notice: DEFAULT_OFFLINE_NOTICE.to_string(),
      listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
      database: None,
      log: LogConfig::default(),
    }
  }
}

/// Immutable settings handed to the router at construction.
#[derive(Debug, Clone)]
pub struct RouterConfig {
  pub origin: Url,
  pub shell_store: String,
  pub api_store: String,
  /// Absolute URLs of the shell assets
  pub static_assets: Vec<Url>,
  pub endpoint_path: String,
  /// Canonical URL of the resource endpoint, used for warm-up
  pub endpoint_url: Url,
  /// Absolute URL of the offline shell document
  pub shell_document: Url,
  pub offline_notice: String,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./feedback-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/feedback-cache/config.yaml
  /// 4. Built-in defaults
  ///
  /// FEEDBACK_CACHE_ORIGIN overrides `origin` in every case.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(origin) = std::env::var("FEEDBACK_CACHE_ORIGIN") {
      config.origin = origin;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("feedback-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("feedback-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  pub fn shell_store(&self) -> String {
    format!("{}-{}", self.shell_prefix, self.version)
  }

  pub fn api_store(&self) -> String {
    format!("{}-{}", self.api_prefix, self.version)
  }

  /// Resolve every path against the origin.
  pub fn router_config(&self) -> Result<RouterConfig> {
    let origin = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| eyre!("Invalid path {} for origin {}: {}", path, origin, e))
    };

    let static_assets = self
      .static_assets
      .iter()
      .map(|p| resolve(p))
      .collect::<Result<Vec<_>>>()?;

    Ok(RouterConfig {
      endpoint_url: resolve(&self.endpoint_path)?,
      shell_document: resolve(&self.shell_document)?,
      static_assets,
      shell_store: self.shell_store(),
      api_store: self.api_store(),
      endpoint_path: self.endpoint_path.clone(),
      offline_notice: self.offline_notice.clone(),
      origin,
    })
  }
}
