//! # Loanshell Net
//!
//! Request/response model and network access for the Loanshell offline worker.
//!
//! ## Design Goals
//!
//! 1. **Host-neutral model**: `Request` and `Response` carry only what the cache
//!    lifecycle needs (method, URL, mode, destination, status, headers, body, type)
//! 2. **One seam for the network**: everything goes through the [`Fetcher`] trait,
//!    so the worker core can run against reqwest or an in-memory script
//! 3. **Request classification**: [`UrlPattern`] decides which URLs are data-class

use std::time::Duration;

use thiserror::Error;

pub mod fetch;
pub mod pattern;
pub mod request;
pub mod response;

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

pub use fetch::{Fetcher, FetcherConfig, HttpFetcher};
pub use pattern::{PatternKind, UrlPattern};
pub use request::{Request, RequestDestination, RequestId, RequestMode};
pub use response::{Response, ResponseType};

#[cfg(any(test, feature = "test-util"))]
pub use scripted::ScriptedFetcher;

pub use url::Url;

/// Errors that can occur while talking to the network.
///
/// A non-2xx status is not an error: it resolves to a [`Response`] like any other.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
