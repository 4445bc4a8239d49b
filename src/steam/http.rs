//! HTTP transport for Steam endpoints.
//!
//! Every Steam call goes through the `HttpGet` trait so the retry and
//! sentinel logic in the fetchers can be exercised without a network.
//! `ReqwestHttp` is the production implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::types::FetchError;

/// Browser-like user agent; the community endpoints reject obvious bots.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const COMMUNITY_REFERER: &str = "https://steamcommunity.com/";
pub const MARKET_REFERER: &str = "https://steamcommunity.com/market/";

/// One outbound GET.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub timeout: Duration,
    pub referer: &'static str,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            timeout,
            referer: COMMUNITY_REFERER,
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn referer(mut self, referer: &'static str) -> Self {
        self.referer = referer;
        self
    }

    /// Value of a query parameter, if set.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and raw body of a completed request. Bodies are kept as text
/// because several endpoints answer with empty or non-JSON bodies that
/// callers must distinguish.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, body: body.into() }
    }

    pub fn status(status: u16) -> Self {
        Self { status, body: String::new() }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Abstraction over the HTTP client. Only transport failures are errors;
/// any HTTP status is a successful `HttpResponse`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError>;
}

/// `reqwest`-backed transport with Steam-friendly default headers.
pub struct ReqwestHttp {
    http: Client,
}

impl ReqwestHttp {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json,text/plain,*/*"),
        );
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client for Steam")?;

        Ok(Self { http })
    }
}

#[async_trait]
impl HttpGet for ReqwestHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        debug!(url = %request.url, timeout_secs = request.timeout.as_secs(), "Steam GET");

        let resp = self
            .http
            .get(&request.url)
            .query(&request.query)
            .timeout(request.timeout)
            .header(header::REFERER, request.referer)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                endpoint: request.url.clone(),
                message: e.without_url().to_string(),
            })?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| FetchError::Network {
            endpoint: request.url.clone(),
            message: e.without_url().to_string(),
        })?;

        Ok(HttpResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
