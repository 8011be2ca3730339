//! The network seam.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::{NetError, Request, RequestMode, Response, ResponseType};

/// Anything that can turn a [`Request`] into a [`Response`].
///
/// `Err` means the request never produced a response (offline, DNS failure,
/// timeout). HTTP error statuses are returned as `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Origin the application shell is served from. Responses from any other
    /// origin are `cors` or `opaque`.
    pub origin: Url,
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout.
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            user_agent: format!("Loanshell/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

fn default_origin() -> Url {
    Url::parse("http://localhost:3000/").expect("default origin is a valid URL")
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Fetcher backed by reqwest.
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: FetcherConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        debug!(origin = %config.origin, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    fn response_type(&self, request: &Request, final_url: &Url) -> ResponseType {
        if final_url.origin() == self.config.origin.origin() {
            ResponseType::Basic
        } else if request.mode == RequestMode::Cors {
            ResponseType::Cors
        } else {
            ResponseType::Opaque
        }
    }

    fn map_error(&self, error: reqwest::Error) -> NetError {
        if error.is_timeout() {
            NetError::Timeout(self.config.timeout)
        } else if error.is_connect() {
            NetError::Unreachable(error.to_string())
        } else {
            NetError::Http(error)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        let kind = self.response_type(request, &url);

        trace!(
            url = %url,
            status = %status,
            kind = kind.as_str(),
            body_len = body.len(),
            "Response received"
        );

        Ok(Response::new(url, status, body)
            .with_headers(headers)
            .with_type(kind))
    }
}
