//! Worker configuration.
//!
//! Set once at deploy time and shared immutably (`Arc<WorkerConfig>`)
//! by every handler.

use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::notification::NotificationDefaults;
use crate::{Result, ServiceWorkerError};

/// Which network responses are written through to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CachePolicy {
    /// Store same-origin 200 responses whose URL contains one of the paths.
    Selective { cacheable_paths: Vec<String> },
    /// Never store network responses; only the pre-fetch list is cached.
    PassThrough,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::Selective {
            cacheable_paths: vec![
                "/api/".to_string(),
                "/mobile".to_string(),
                "/static/".to_string(),
            ],
        }
    }
}

impl CachePolicy {
    /// Whether a response to this URL may be stored.
    pub fn allows(&self, url: &Url) -> bool {
        match self {
            CachePolicy::Selective { cacheable_paths } => {
                cacheable_paths.iter().any(|p| url.as_str().contains(p.as_str()))
            }
            CachePolicy::PassThrough => false,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Current cache bucket name; doubles as the worker version.
    pub cache_name: String,

    /// Registration scope. Relative URLs resolve against it and its origin
    /// decides which windows belong to the panel.
    pub scope: Url,

    /// Page served to navigations while offline.
    pub offline_url: String,

    /// URLs fetched and cached during install.
    pub precache_urls: Vec<String>,

    /// Write-through policy for network responses.
    pub cache_policy: CachePolicy,

    /// Requests whose URL contains this get the offline JSON fallback.
    pub api_path: String,

    /// Error message in the offline JSON fallback.
    pub offline_error: String,

    /// Push notification defaults.
    pub notifications: NotificationDefaults,
}

/// Panel served locally on its default port.
pub const DEFAULT_SCOPE: &str = "http://localhost:9000/";

fn default_scope() -> Url {
    static SCOPE: OnceLock<Url> = OnceLock::new();
    SCOPE
        // Literal absolute URL; covered by test_default_scope_parses.
        .get_or_init(|| Url::parse(DEFAULT_SCOPE).expect("DEFAULT_SCOPE is an absolute URL"))
        .clone()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: "turnos-admin-v2.0".to_string(),
            scope: default_scope(),
            offline_url: "/mobile".to_string(),
            precache_urls: vec![
                "/mobile".to_string(),
                "/manifest.json".to_string(),
                "/static/icon-192.png".to_string(),
                "/static/icon-512.png".to_string(),
                "/api/turnos_semana".to_string(),
            ],
            cache_policy: CachePolicy::default(),
            api_path: "/api/".to_string(),
            offline_error: "Sin conexión".to_string(),
            notifications: NotificationDefaults::default(),
        }
    }
}

impl WorkerConfig {
    /// Parse and validate a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ServiceWorkerError::config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = cache_name.into();
        self
    }

    pub fn with_scope(mut self, scope: Url) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::config("cache_name must not be empty"));
        }
        if !matches!(self.scope.scheme(), "http" | "https") {
            return Err(ServiceWorkerError::config(format!(
                "scope must be an http(s) URL, got {}",
                self.scope
            )));
        }
        if self.api_path.is_empty() {
            return Err(ServiceWorkerError::config("api_path must not be empty"));
        }
        self.resolve(&self.offline_url)?;
        self.precache_requests()?;
        Ok(())
    }

    /// Resolve a possibly relative URL against the scope.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        self.scope.join(url).map_err(|e| {
            ServiceWorkerError::config(format!("cannot resolve '{url}' against {}: {e}", self.scope))
        })
    }

    /// Absolute pre-fetch URLs in order, without duplicates, always
    /// including the offline page.
    pub fn precache_requests(&self) -> Result<Vec<Url>> {
        let mut urls: Vec<Url> = Vec::with_capacity(self.precache_urls.len() + 1);
        let offline = std::iter::once(&self.offline_url);
        for raw in self.precache_urls.iter().chain(offline) {
            let url = self.resolve(raw)?;
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        Ok(urls)
    }

    /// Absolute URL of the offline page.
    pub fn offline_page(&self) -> Result<Url> {
        self.resolve(&self.offline_url)
    }

    /// Whether a URL belongs to the panel's origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.scope.origin()
    }

    pub fn is_api(&self, url: &Url) -> bool {
        url.as_str().contains(self.api_path.as_str())
    }

    /// Body of the synthesized response for API requests made offline.
    pub fn offline_api_body(&self) -> serde_json::Value {
        json!({
            "success": false,
            "error": self.offline_error,
            "offline": true,
        })
    }
}
