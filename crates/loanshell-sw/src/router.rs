//! Request router: network-first for data, cache-first for the shell.

use std::sync::Arc;

use http::{Method, StatusCode};
use loanshell_net::{Fetcher, Request, Response, ResponseType};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::key::RequestKey;
use crate::registry::{GenerationHandle, Registry};

/// How a request is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestClass {
    /// Application shell asset: cache-first.
    Shell,
    /// Loan data: network-first.
    Data,
}

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Cache,
    Network,
    /// The cached offline document, served for a failed navigation.
    OfflineFallback,
}

/// A response plus how it was obtained.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub response: Response,
    pub source: ResponseSource,
    pub class: RequestClass,
    /// Whether a copy was written to the registry.
    pub stored: bool,
}

/// Answers intercepted requests from the registry and the network.
pub struct Router {
    config: Arc<WorkerConfig>,
    registry: Arc<dyn Registry>,
    fetcher: Arc<dyn Fetcher>,
}

impl Router {
    pub fn new(
        config: Arc<WorkerConfig>,
        registry: Arc<dyn Registry>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            registry,
            fetcher,
        }
    }

    /// Classify a URL against the configured data patterns.
    pub fn classify(&self, url: &Url) -> RequestClass {
        if self.config.data_patterns.iter().any(|p| p.matches(url)) {
            RequestClass::Data
        } else {
            RequestClass::Shell
        }
    }

    /// Produce a response for `request`.
    pub async fn route(&self, request: &Request) -> WorkerResult<RoutedResponse> {
        match self.classify(&request.url) {
            RequestClass::Data => self.network_first(request).await,
            RequestClass::Shell => self.cache_first(request).await,
        }
    }

    /// Send `request` to the network without reading or writing any
    /// generation. Used while the worker does not control clients.
    pub async fn passthrough(&self, request: &Request) -> WorkerResult<RoutedResponse> {
        let class = self.classify(&request.url);
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                debug!(url = %request.url, "Not controlling; passed through to network");
                Ok(RoutedResponse {
                    response,
                    source: ResponseSource::Network,
                    class,
                    stored: false,
                })
            }
            Err(source) => Err(WorkerError::NetworkUnavailable {
                url: request.url.to_string(),
                source,
            }),
        }
    }

    async fn network_first(&self, request: &Request) -> WorkerResult<RoutedResponse> {
        let generation = GenerationHandle::new(&self.config.data_generation());
        let key = RequestKey::url_only(&request.url);

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                debug!(
                    url = %request.url,
                    status = response.status().as_u16(),
                    "Data request served from network"
                );
                let stored = self.store(&generation, key, &response).await;
                Ok(RoutedResponse {
                    response,
                    source: ResponseSource::Network,
                    class: RequestClass::Data,
                    stored,
                })
            }
            Err(source) => match self.registry.get(&generation, &key).await? {
                Some(response) => {
                    warn!(url = %request.url, error = %source, "Network failed; serving cached data");
                    Ok(RoutedResponse {
                        response,
                        source: ResponseSource::Cache,
                        class: RequestClass::Data,
                        stored: false,
                    })
                }
                None => {
                    warn!(url = %request.url, error = %source, "Network failed with no cached data");
                    Err(WorkerError::NetworkUnavailable {
                        url: request.url.to_string(),
                        source,
                    })
                }
            },
        }
    }

    async fn cache_first(&self, request: &Request) -> WorkerResult<RoutedResponse> {
        let generation = GenerationHandle::new(&self.config.shell_generation());
        let key = RequestKey::for_request(
            request,
            &self.config.origin,
            &self.config.query_insensitive_paths,
        );

        if let Some(response) = self.registry.get(&generation, &key).await? {
            debug!(url = %request.url, "Served from cache");
            return Ok(RoutedResponse {
                response,
                source: ResponseSource::Cache,
                class: RequestClass::Shell,
                stored: false,
            });
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                let stored = if is_cacheable(request, &response) {
                    self.store(&generation, key, &response).await
                } else {
                    debug!(
                        url = %request.url,
                        status = response.status().as_u16(),
                        kind = response.kind().as_str(),
                        "Response not cacheable"
                    );
                    false
                };
                Ok(RoutedResponse {
                    response,
                    source: ResponseSource::Network,
                    class: RequestClass::Shell,
                    stored,
                })
            }
            Err(source) => {
                if request.is_navigation() {
                    if let Some(response) = self.offline_fallback(&generation).await? {
                        warn!(url = %request.url, error = %source, "Offline; serving fallback document");
                        return Ok(RoutedResponse {
                            response,
                            source: ResponseSource::OfflineFallback,
                            class: RequestClass::Shell,
                            stored: false,
                        });
                    }
                }
                warn!(url = %request.url, error = %source, "Network failed on cache miss");
                Err(WorkerError::NetworkUnavailable {
                    url: request.url.to_string(),
                    source,
                })
            }
        }
    }

    async fn offline_fallback(
        &self,
        generation: &GenerationHandle,
    ) -> WorkerResult<Option<Response>> {
        let url = self.config.resolve(&self.config.offline_fallback)?;
        let key = RequestKey::for_request(
            &Request::get(url),
            &self.config.origin,
            &self.config.query_insensitive_paths,
        );
        self.registry.get(generation, &key).await
    }

    /// Write-through that never fails the request.
    async fn store(&self, generation: &GenerationHandle, key: RequestKey, response: &Response) -> bool {
        match self.registry.put(generation, key, response.clone()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(generation = %generation.name(), error = %e, "Failed to store response");
                false
            }
        }
    }
}

fn is_cacheable(request: &Request, response: &Response) -> bool {
    request.method == Method::GET
        && response.status() == StatusCode::OK
        && response.kind() == ResponseType::Basic
}
