//! External fetch provider implementations
//!
//! This module talks to the outside world on behalf of the tier ladder:
//! - Building HTTP clients with a proper user agent string
//! - Translating tier parameters into rendering-API query parameters
//! - Plain direct fetches for local runs and tests
//! - Classifying transport failures

use crate::fetch::tier::{Egress, Tier, TierParams};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// One request issued to a provider
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Target page or document
    pub url: Url,

    /// Tier the parameters were taken from
    pub tier: Tier,

    pub params: TierParams,

    /// Country/region hint for egress selection
    pub country_code: Option<String>,

    /// Upper bound for the whole request
    pub timeout: Duration,
}

/// Raw provider answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Transport-level failures, distinct from HTTP status answers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Uniform request/response interface over a rendering/proxy service
#[async_trait]
pub trait FetchProvider: Send + Sync {
    /// Issues one request; non-2xx answers are returned as responses, not errors
    async fn fetch(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use escalade::fetch::build_http_client;
///
/// let client = build_http_client("escalade/0.1 (+https://example.test/bot)").unwrap();
/// ```
pub fn build_http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Provider backed by a rendering/proxy HTTP API
///
/// The target URL and tier parameters travel as query parameters:
/// `api_key`, `url`, `render_js`, `premium_proxy`, `stealth_proxy`,
/// `country_code`, `block_resources`, `block_ads`, `wait`, `timeout`.
pub struct ApiFetchProvider {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl ApiFetchProvider {
    pub fn new(client: Client, endpoint: Url, api_key: impl Into<String>) -> Self {
        Self {
            client,
            endpoint,
            api_key: api_key.into(),
        }
    }

    /// Query parameters for one request
    fn query(&self, request: &ProviderRequest) -> Vec<(&'static str, String)> {
        let params = &request.params;
        let mut query = vec![
            ("api_key", self.api_key.clone()),
            ("url", request.url.to_string()),
            ("render_js", params.render_js.to_string()),
            ("block_resources", params.block_resources.to_string()),
            ("block_ads", params.block_ads.to_string()),
            ("timeout", request.timeout.as_millis().to_string()),
        ];

        match params.egress {
            Egress::Standard => {}
            Egress::Premium => query.push(("premium_proxy", "true".to_string())),
            Egress::Stealth => query.push(("stealth_proxy", "true".to_string())),
        }

        if let Some(country) = &request.country_code {
            if params.egress != Egress::Standard {
                query.push(("country_code", country.clone()));
            }
        }

        if params.render_js && params.wait_ms > 0 {
            query.push(("wait", params.wait_ms.to_string()));
        }

        query
    }
}

#[async_trait]
impl FetchProvider for ApiFetchProvider {
    async fn fetch(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        tracing::trace!("Provider request at tier {}: {}", request.tier, request.url);

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&self.query(request))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify_error)?;

        read_response(response).await
    }
}

/// Provider that fetches targets directly, ignoring tier parameters
///
/// Useful for local runs against sites that need no rendering and for tests
/// against mock servers.
pub struct DirectFetchProvider {
    client: Client,
}

impl DirectFetchProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FetchProvider for DirectFetchProvider {
    async fn fetch(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .client
            .get(request.url.clone())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify_error)?;

        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<ProviderResponse, ProviderError> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let body = response.bytes().await.map_err(classify_error)?;

    Ok(ProviderResponse {
        status,
        content_type,
        body: body.to_vec(),
    })
}

/// Maps a reqwest failure onto the provider error taxonomy
fn classify_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if e.is_connect() {
        ProviderError::Connect(e.to_string())
    } else {
        ProviderError::Other(e.to_string())
    }
}
