//! # Turnos Service Worker
//!
//! Offline caching and push notifications for the Turnos admin panel,
//! written against abstract host capabilities so it can run under any
//! service worker host (or none, in tests).
//!
//! ## Features
//!
//! - **Lifecycle**: install (pre-fetch), activate (stale cache cleanup, claim)
//! - **Cache API**: versioned buckets keyed by request identity
//! - **Fetch Interception**: cache first, selective write-through, offline fallbacks
//! - **Push**: notification descriptors built from optional payloads
//! - **Clients API**: focus or open a window on notification click
//! - **Messages**: `SKIP_WAITING` and `GET_VERSION` control commands
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker::dispatch(WorkerEvent)
//!     │
//!     ├── install / activate ──► CacheProvider, ClientsHost
//!     ├── fetch ───────────────► CacheProvider, NetworkFetcher
//!     ├── push ────────────────► NotificationService
//!     ├── notificationclick ───► NotificationService, ClientsHost
//!     └── message ─────────────► ReplyPort
//! ```

use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod fetch;
pub mod lifecycle;
pub mod message;
pub mod net;
pub mod notification;
pub mod request;
pub mod worker;

pub use cache::{CacheEntry, CacheKey, CacheProvider, MemoryCacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, ClientsHost, MemoryClients};
pub use config::{CachePolicy, WorkerConfig};
pub use fetch::{FetchEvent, FetchOutcome};
pub use lifecycle::{Lifecycle, LifecycleEvent, WorkerState};
pub use message::{ControlMessage, MessageEvent, MessageOutcome, ReplyPort};
pub use net::{HttpFetcher, MemoryNetwork, NetworkFetcher};
pub use notification::{
    MemoryNotifications, NotificationAction, NotificationClickEvent, NotificationData,
    NotificationDefaults, NotificationDescriptor, NotificationService, PushEvent, PushPayload,
};
pub use request::{Request, RequestDestination, RequestMode, Response, ResponseType};
pub use worker::{
    ActivateReport, Capabilities, ClickOutcome, EventKind, EventOutcome, ServiceWorker,
    WorkerEvent,
};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed fetching {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Response body already used")]
    BodyUsed,

    #[error("State error: {0}")]
    State(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl ServiceWorkerError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            ServiceWorkerError::InstallFailed { .. } => "install",
            ServiceWorkerError::Network(_) => "network",
            ServiceWorkerError::Cache(_) => "cache",
            ServiceWorkerError::Config(_) => "config",
            ServiceWorkerError::BodyUsed => "body_used",
            ServiceWorkerError::State(_) => "state",
            ServiceWorkerError::Client(_) => "client",
            ServiceWorkerError::Notification(_) => "notification",
            ServiceWorkerError::Io(_) => "io",
            ServiceWorkerError::Json(_) => "json",
            ServiceWorkerError::Url(_) => "url",
        }
    }
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
