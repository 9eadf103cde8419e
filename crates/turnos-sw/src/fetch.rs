//! Fetch interception: cache first, network second, offline fallbacks last.

use http::{Method, StatusCode};
use tracing::{debug, warn};

use crate::request::{Request, Response, ResponseType};
use crate::worker::ServiceWorker;
use crate::Result;

/// A fetch event.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self { request }
    }
}

/// Where a produced response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// Cached offline page served to a failed navigation.
    OfflinePage,
    /// Synthesized 503 for a failed API request.
    OfflineApi,
}

/// Result of the fetch handler.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The worker did not intercept; the host performs the request itself.
    NotIntercepted,
    Respond {
        response: Response,
        source: ResponseSource,
    },
    /// The worker intercepted but produced nothing; the page sees a network error.
    NetworkError,
}

impl FetchOutcome {
    pub fn response(self) -> Option<Response> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Respond { source, .. } => Some(*source),
            _ => None,
        }
    }
}

impl ServiceWorker {
    pub(crate) async fn handle_fetch(&self, event: FetchEvent) -> Result<FetchOutcome> {
        let request = event.request;

        if request.method != Method::GET {
            return Ok(FetchOutcome::NotIntercepted);
        }
        if !self.is_active().await {
            debug!(url = %request.url, "Worker not active, not intercepting");
            return Ok(FetchOutcome::NotIntercepted);
        }

        let cache_name = &self.config.cache_name;
        match self.caps.caches.match_request(cache_name, &request).await {
            Ok(Some(response)) => {
                debug!(url = %request.url, "Serving from cache");
                return Ok(FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Cache,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed, trying network"),
        }

        match self.caps.network.fetch(&request).await {
            Ok(response) => {
                self.write_through(&request, &response).await;
                Ok(FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network fetch failed");
                self.offline_fallback(&request).await
            }
        }
    }

    /// Store a duplicate of a cacheable response. Failures only cost the cache entry.
    async fn write_through(&self, request: &Request, response: &Response) {
        let cacheable = response.status == StatusCode::OK
            && response.response_type == ResponseType::Basic
            && self.config.cache_policy.allows(&request.url);
        if !cacheable {
            return;
        }

        let copy = match response.try_clone() {
            Ok(copy) => copy,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cannot duplicate response for cache");
                return;
            }
        };

        if let Err(e) = self.caps.caches.put(&self.config.cache_name, request, copy).await {
            warn!(url = %request.url, error = %e, "Write-through failed");
        }
    }

    async fn offline_fallback(&self, request: &Request) -> Result<FetchOutcome> {
        if request.is_navigation() {
            let offline = Request::get(self.config.offline_page()?);
            return match self.caps.caches.match_request(&self.config.cache_name, &offline).await {
                Ok(Some(response)) => Ok(FetchOutcome::Respond {
                    response,
                    source: ResponseSource::OfflinePage,
                }),
                Ok(None) => {
                    warn!(url = %request.url, "Offline page not cached");
                    Ok(FetchOutcome::NetworkError)
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Offline page lookup failed");
                    Ok(FetchOutcome::NetworkError)
                }
            };
        }

        if self.config.is_api(&request.url) {
            let response = Response::json(
                StatusCode::SERVICE_UNAVAILABLE,
                &self.config.offline_api_body(),
            )?;
            return Ok(FetchOutcome::Respond {
                response,
                source: ResponseSource::OfflineApi,
            });
        }

        Ok(FetchOutcome::NetworkError)
    }
}
