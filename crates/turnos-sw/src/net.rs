//! Network access for the fetch handler and install pre-fetching.

use std::sync::Mutex;

use async_trait::async_trait;
use hashbrown::HashMap;
use http::StatusCode;
use tracing::{debug, trace};
use url::{Origin, Url};

use crate::request::{Request, Response, ResponseType};
use crate::{Result, ServiceWorkerError};

/// Host capability that performs network requests.
///
/// `Err` means the request never produced a response (offline, DNS, TLS,
/// connection reset). HTTP error statuses are successful fetches.
#[async_trait]
pub trait NetworkFetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

// ==================== HTTP ====================

/// Fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    origin: Origin,
}

impl HttpFetcher {
    /// Create a fetcher that labels responses from `scope`'s origin as basic.
    pub fn new(scope: &Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("turnos-sw/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceWorkerError::network(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client, scope))
    }

    pub fn with_client(client: reqwest::Client, scope: &Url) -> Self {
        Self {
            client,
            origin: scope.origin(),
        }
    }

    fn response_type(&self, url: &Url) -> ResponseType {
        if url.origin() == self.origin {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl NetworkFetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        trace!(method = %request.method, url = %request.url, "Network fetch");

        let reply = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| ServiceWorkerError::network(e.to_string()))?;

        let status = reply.status();
        let headers = reply.headers().clone();
        let final_url = reply.url().clone();
        let body = reply
            .bytes()
            .await
            .map_err(|e| ServiceWorkerError::network(e.to_string()))?;

        debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "Network response");

        let mut response = Response::new(status, body)
            .with_type(self.response_type(&final_url))
            .with_url(final_url);
        response.headers = headers;
        Ok(response)
    }
}

// ==================== In-memory ====================

#[derive(Debug, Clone)]
struct Route {
    status: StatusCode,
    body: Vec<u8>,
    content_type: Option<&'static str>,
    response_type: ResponseType,
}

#[derive(Debug, Default)]
struct NetworkState {
    routes: HashMap<String, Route>,
    offline: bool,
    requests: Vec<String>,
}

/// Fetcher serving a fixed route table, with an offline switch.
///
/// Unknown URLs answer 404; while offline every fetch fails.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    state: Mutex<NetworkState>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut NetworkState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    fn add_route(&self, url: &str, route: Route) {
        self.with_state(|s| s.routes.insert(url.to_string(), route));
    }

    /// Serve `body` with status 200 at `url`.
    pub fn route(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.add_route(
            url,
            Route {
                status: StatusCode::OK,
                body: body.into(),
                content_type: None,
                response_type: ResponseType::Basic,
            },
        );
    }

    /// Serve JSON with status 200 at `url`.
    pub fn route_json(&self, url: &str, value: &serde_json::Value) {
        self.add_route(
            url,
            Route {
                status: StatusCode::OK,
                body: value.to_string().into_bytes(),
                content_type: Some("application/json"),
                response_type: ResponseType::Basic,
            },
        );
    }

    /// Serve an empty body with the given status at `url`.
    pub fn route_status(&self, url: &str, status: StatusCode) {
        self.add_route(
            url,
            Route {
                status,
                body: Vec::new(),
                content_type: None,
                response_type: ResponseType::Basic,
            },
        );
    }

    /// Serve `body` at `url` as a cross-origin response.
    pub fn route_cross_origin(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.add_route(
            url,
            Route {
                status: StatusCode::OK,
                body: body.into(),
                content_type: None,
                response_type: ResponseType::Cors,
            },
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.with_state(|s| s.offline = offline);
    }

    /// URLs fetched so far, in order, including failed attempts.
    pub fn requests(&self) -> Vec<String> {
        self.with_state(|s| s.requests.clone())
    }

    pub fn request_count(&self) -> usize {
        self.with_state(|s| s.requests.len())
    }
}

#[async_trait]
impl NetworkFetcher for MemoryNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let url = request.url.as_str().to_string();
        let (offline, route) = self.with_state(|s| {
            s.requests.push(url.clone());
            (s.offline, s.routes.get(&url).cloned())
        });

        if offline {
            return Err(ServiceWorkerError::network(format!("offline: {url}")));
        }

        let response = match route {
            Some(route) => {
                let mut response = Response::new(route.status, route.body)
                    .with_type(route.response_type)
                    .with_url(request.url.clone());
                if let Some(content_type) = route.content_type {
                    response = response.with_header(
                        http::header::CONTENT_TYPE,
                        http::HeaderValue::from_static(content_type),
                    );
                }
                response
            }
            None => Response::new(StatusCode::NOT_FOUND, Vec::new()).with_url(request.url.clone()),
        };
        Ok(response)
    }
}
