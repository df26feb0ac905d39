mod cache;
mod config;
mod fetch;
mod http;
mod logging;
mod proxy;
mod router;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use cache::{CacheStorage, MemoryStorage, SqliteStorage};
use config::Config;
use fetch::HttpFetcher;
use http::{Method, Request};
use router::{ActivationReport, CacheRouter};

#[derive(Parser, Debug)]
#[command(name = "feedback-cache")]
#[command(about = "Offline-first caching proxy for the feedback app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/feedback-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache version tag, overrides the configured one
  #[arg(long)]
  version_tag: Option<String>,

  /// Keep stores in memory instead of the SQLite database
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed the shell store for the current version
  Install,
  /// Prune stores of other versions and warm the API store
  Activate,
  /// Install and activate if needed, then run the intercepting proxy
  Serve,
  /// Send one request through the router and print the result
  Fetch {
    /// Path relative to the origin, e.g. /submissions
    path: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// List cache stores and their entry counts
  Stores,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override version if specified on command line
  let config = if let Some(version) = args.version_tag.clone() {
    Config { version, ..config }
  } else {
    config
  };

  let _log_guard = logging::init(&config.log)?;

  if args.ephemeral {
    run(config, args.command, Arc::new(MemoryStorage::new())).await
  } else {
    let storage = SqliteStorage::open(config.database.as_deref())?;
    run(config, args.command, Arc::new(storage)).await
  }
}

async fn run<S: CacheStorage + 'static>(
  config: Config,
  command: Command,
  storage: Arc<S>,
) -> Result<()> {
  let router = CacheRouter::restore(config.router_config()?, HttpFetcher::new()?, storage);

  match command {
    Command::Install => {
      let count = router.install().await?;
      println!("cached {} assets in {}", count, router.config().shell_store);
    }
    Command::Activate => {
      let report = router.activate().await?;
      print_report(&report);
    }
    Command::Serve => {
      let report = router.ensure_active().await?;
      print_report(&report);
      proxy::serve(Arc::new(router), config.listen).await?;
    }
    Command::Fetch {
      path,
      method,
      navigate,
      data,
    } => {
      router.ensure_active().await?;

      let method: Method = method.parse()?;
      let url = http::origin_url(&router.config().origin, &path);
      let mut request = if navigate {
        Request::navigate(url)
      } else {
        Request::new(method, url)
      };
      if let Some(data) = data {
        request = request
          .with_header("content-type", "application/json")
          .with_body(data);
      }

      let served = router.serve(&request).await;
      match served.cached_at {
        Some(cached_at) => println!(
          "{} ({}, stored {})",
          served.response.status,
          served.source.as_str(),
          cached_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("{} ({})", served.response.status, served.source.as_str()),
      }
      for (name, value) in &served.response.headers {
        println!("{}: {}", name, value);
      }
      println!();
      println!("{}", served.response.text());
    }
    Command::Stores => {
      let current = [
        router.config().shell_store.as_str(),
        router.config().api_store.as_str(),
      ];
      for name in router.storage().names()? {
        let entries = router.storage().keys(&name)?.len();
        let marker = if current.contains(&name.as_str()) {
          "current"
        } else {
          "stale"
        };
        println!("{:<24} {:>5} entries  {}", name, entries, marker);
      }
    }
  }

  Ok(())
}

fn print_report(report: &ActivationReport) {
  for name in &report.deleted {
    println!("removed old cache {}", name);
  }
  for name in &report.failed {
    println!("could not remove old cache {}", name);
  }
  println!("warm-up: {:?}", report.warm_up);
}
