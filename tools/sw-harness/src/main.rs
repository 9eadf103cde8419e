//! Harness that drives the Turnos worker against a running panel.
//!
//! Network traffic is real; caches, notifications and windows live in memory
//! for the duration of one command.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-fetch the offline set from the panel at the configured scope
//! turnos-sw-harness install
//!
//! # Fetch a page through the worker
//! turnos-sw-harness fetch /mobile --navigate
//!
//! # Show the notification a push payload would produce
//! turnos-sw-harness push '{"title": "Nuevo turno", "url": "/mobile"}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use turnos_common::{init_logging, LogConfig, LogFormat};
use turnos_sw::{
    CacheProvider, Capabilities, EventOutcome, FetchEvent, FetchOutcome, HttpFetcher,
    LifecycleEvent, MemoryCacheStorage, MemoryClients, MemoryNotifications, PushEvent, Request,
    ServiceWorker, WorkerConfig, WorkerEvent,
};

#[derive(Parser)]
#[command(name = "turnos-sw-harness")]
#[command(about = "Drive the Turnos admin service worker from the command line")]
struct Cli {
    /// JSON config file; defaults apply to missing fields
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the worker version (cache name)
    Version,

    /// Install against the live scope and list the pre-fetched URLs
    Install,

    /// Install, activate, then fetch a path through the worker
    Fetch {
        /// Path or URL, resolved against the scope
        path: String,
        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
    },

    /// Build and print the notification for a push payload
    Push {
        /// Raw payload text; omitted means a push without data
        payload: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_verbosity(cli.verbose);
    if cli.json_logs {
        log_config = log_config.with_format(LogFormat::Json);
    }
    init_logging(log_config)?;

    let config = match cli.config {
        Some(ref path) => WorkerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => WorkerConfig::default(),
    };

    match cli.command {
        Commands::Version => println!("{}", config.cache_name),
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
        Commands::Install => install(config).await?,
        Commands::Fetch { path, navigate } => fetch(config, &path, navigate).await?,
        Commands::Push { payload } => push(config, payload).await?,
    }

    Ok(())
}

struct Harness {
    worker: ServiceWorker,
    caches: Arc<MemoryCacheStorage>,
}

impl Harness {
    fn new(config: WorkerConfig) -> Result<Self> {
        let caches = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(HttpFetcher::new(&config.scope)?);
        let caps = Capabilities::new(
            caches.clone(),
            network,
            Arc::new(MemoryNotifications::new()),
            Arc::new(MemoryClients::new()),
        );

        let (worker, events) = ServiceWorker::new(config, caps)?;
        tokio::spawn(log_lifecycle(events));
        Ok(Self { worker, caches })
    }
}

async fn log_lifecycle(mut events: mpsc::UnboundedReceiver<LifecycleEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::StateChange { version, state } => {
                info!(version = %version, state = %state, "Lifecycle");
            }
            LifecycleEvent::SkipWaiting { version } => {
                info!(version = %version, "Skip waiting requested");
            }
        }
    }
}

async fn install(config: WorkerConfig) -> Result<()> {
    let harness = Harness::new(config)?;
    harness.worker.dispatch(WorkerEvent::Install).await?;

    let urls = harness.caches.urls(harness.worker.version()).await?;
    println!("Installed {} ({} entries):", harness.worker.version(), urls.len());
    for url in urls {
        println!("  {url}");
    }
    Ok(())
}

async fn fetch(config: WorkerConfig, path: &str, navigate: bool) -> Result<()> {
    let url = config.resolve(path)?;
    let harness = Harness::new(config)?;
    harness.worker.start().await.context("starting worker")?;

    let request = if navigate {
        Request::navigate(url)
    } else {
        Request::get(url)
    };

    let outcome = harness
        .worker
        .dispatch(WorkerEvent::Fetch(FetchEvent::new(request)))
        .await?;
    let EventOutcome::Fetch(outcome) = outcome else {
        bail!("fetch produced an unexpected outcome");
    };

    match outcome {
        FetchOutcome::NotIntercepted => println!("Not intercepted"),
        FetchOutcome::NetworkError => bail!("network error"),
        FetchOutcome::Respond {
            mut response,
            source,
        } => {
            println!("Status: {}", response.status);
            println!("Source: {source:?}");
            if let Some(content_type) = response.content_type() {
                println!("Content-Type: {content_type}");
            }
            let body = response.bytes()?;
            println!();
            println!("{}", String::from_utf8_lossy(&body));
        }
    }
    Ok(())
}

async fn push(config: WorkerConfig, payload: Option<String>) -> Result<()> {
    let harness = Harness::new(config)?;
    let event = match payload {
        Some(text) => PushEvent::with_data(text),
        None => PushEvent::empty(),
    };

    let outcome = harness.worker.dispatch(WorkerEvent::Push(event)).await?;
    let EventOutcome::Push(descriptor) = outcome else {
        bail!("push produced an unexpected outcome");
    };
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}
