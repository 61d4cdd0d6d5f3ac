//! HTTP fetch seam

use async_trait::async_trait;
use thiserror::Error;

/// HTTP method subset used by the resilience layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMethod {
    Head,
    Get,
}

/// Cache behaviour requested for a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Bypass every cache (`cache: "no-store"`)
    NoStore,
}

/// Outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Absolute URL, or a path resolved by the fetcher against its document base
    pub url: String,
    pub method: FetchMethod,
    pub cache: CacheMode,
}

impl FetchRequest {
    pub fn head(url: impl Into<String>) -> Self {
        Self { url: url.into(), method: FetchMethod::Head, cache: CacheMode::Default }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self { url: url.into(), method: FetchMethod::Get, cache: CacheMode::Default }
    }

    /// Disable caching for this request
    pub fn no_store(mut self) -> Self {
        self.cache = CacheMode::NoStore;
        self
    }
}

/// Completed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// Raw `Content-Type` header value, if any
    pub content_type: Option<String>,
    /// Response body (empty for HEAD)
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Media type without parameters, lower-cased (`text/html; charset=utf-8` → `text/html`)
    pub fn mime_type(&self) -> Option<String> {
        self.content_type.as_deref().and_then(|value| {
            let essence = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            (!essence.is_empty()).then_some(essence)
        })
    }
}

/// Transport-level fetch failure (no response was received)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Platform fetch
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}
