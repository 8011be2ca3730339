//! Cache keys.

use std::fmt;

use http::Method;
use loanshell_net::Request;
use url::Url;

/// Normalized request identity used by every registry lookup and write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    /// Key for an intercepted request. The fragment is always dropped; the
    /// query is dropped for same-origin paths listed in `query_insensitive`.
    pub fn for_request(request: &Request, origin: &Url, query_insensitive: &[String]) -> Self {
        Self {
            method: request.method.as_str().to_string(),
            url: normalize(&request.url, origin, query_insensitive),
        }
    }

    /// GET key for a bare URL. Data-class entries use this so repeated calls
    /// to one URL overwrite each other whatever their method.
    pub fn url_only(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: Method::GET.as_str().to_string(),
            url: url.into(),
        }
    }

    /// Rebuild a key read back from storage.
    pub fn from_stored(method: String, url: String) -> Self {
        Self { method, url }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

fn normalize(url: &Url, origin: &Url, query_insensitive: &[String]) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    if url.origin() == origin.origin() && query_insensitive.iter().any(|p| p == url.path()) {
        url.set_query(None);
    }
    url.into()
}
