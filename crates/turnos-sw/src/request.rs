//! Request and response values exchanged between the worker and its host.
//!
//! Response bodies are single-read: once [`Response::bytes`] (or one of its
//! wrappers) has consumed a body, [`Response::try_clone`] refuses to
//! duplicate it. Anything that wants to both store and return a response
//! must duplicate it first.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Request mode, as seen by the fetch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Page navigation.
    Navigate,
    #[default]
    SameOrigin,
    NoCors,
    Cors,
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDestination {
    /// Sub-resource fetches and API calls.
    #[default]
    Empty,
    Document,
    Image,
    Manifest,
    Script,
    Style,
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub destination: RequestDestination,
}

impl Request {
    /// A plain GET sub-resource request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::SameOrigin,
            destination: RequestDestination::Empty,
        }
    }

    /// A top-level page navigation.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: RequestDestination::Document,
            ..Self::get(url)
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Page loads count as navigations whether flagged by mode or destination.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate || self.destination == RequestDestination::Document
    }
}

/// Response type, following the fetch standard's filtered response kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin, fully readable.
    #[default]
    Basic,
    Cors,
    Opaque,
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
            ResponseType::Error => "error",
        }
    }
}

/// A response with a single-read body.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    /// Final URL, when the response came from the network or the cache.
    pub url: Option<Url>,
    body: Bytes,
    body_used: bool,
}

impl Response {
    /// Create a same-origin response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            url: None,
            body: body.into(),
            body_used: false,
        }
    }

    /// Create a JSON response with the matching content type.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(status, body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json")))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Check if response is success (2xx).
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn body_used(&self) -> bool {
        self.body_used
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Duplicate the response, body included. Fails once the body was read.
    pub fn try_clone(&self) -> Result<Self> {
        if self.body_used {
            return Err(ServiceWorkerError::BodyUsed);
        }
        Ok(Self {
            status: self.status,
            headers: self.headers.clone(),
            response_type: self.response_type,
            url: self.url.clone(),
            body: self.body.clone(),
            body_used: false,
        })
    }

    /// Consume the body.
    pub fn bytes(&mut self) -> Result<Bytes> {
        if self.body_used {
            return Err(ServiceWorkerError::BodyUsed);
        }
        self.body_used = true;
        Ok(std::mem::take(&mut self.body))
    }

    /// Consume the body as UTF-8 text.
    pub fn text(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ServiceWorkerError::network(format!("invalid UTF-8 body: {e}")))
    }

    /// Consume the body as JSON.
    pub fn json_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.bytes()?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
