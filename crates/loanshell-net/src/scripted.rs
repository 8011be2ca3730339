//! In-memory fetcher with scripted replies, for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;

use crate::{Fetcher, NetError, Request, Response, ResponseType};

#[derive(Debug, Clone)]
enum Reply {
    Respond {
        status: StatusCode,
        body: Bytes,
        kind: ResponseType,
    },
    Fail,
}

/// A [`Fetcher`] that answers from a table keyed by absolute URL and counts
/// every call. URLs without a scripted reply fail like an unreachable host.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with a basic response.
    pub fn respond(&self, url: &str, status: u16, body: &str) {
        self.respond_with_type(url, status, body, ResponseType::Basic);
    }

    /// Answer `url` with a response of the given type.
    pub fn respond_with_type(&self, url: &str, status: u16, body: &str, kind: ResponseType) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.set(
            url,
            Reply::Respond {
                status,
                body: Bytes::copy_from_slice(body.as_bytes()),
                kind,
            },
        );
    }

    /// Make `url` fail at the network layer.
    pub fn fail(&self, url: &str) {
        self.set(url, Reply::Fail);
    }

    /// Make every scripted URL fail, as if the device went offline.
    pub fn go_offline(&self) {
        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        for reply in replies.values_mut() {
            *reply = Reply::Fail;
        }
    }

    /// Total number of fetches issued.
    pub fn calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Number of fetches issued for one URL.
    pub fn calls_for(&self, url: &str) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(url).copied().unwrap_or(0)
    }

    fn set(&self, url: &str, reply: Reply) {
        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        replies.insert(url.to_string(), reply);
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let url = request.url.as_str().to_string();
        self.total.fetch_add(1, Ordering::SeqCst);
        {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            *calls.entry(url.clone()).or_insert(0) += 1;
        }

        let reply = {
            let replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
            replies.get(&url).cloned()
        };

        match reply {
            Some(Reply::Respond { status, body, kind }) => {
                Ok(Response::new(request.url.clone(), status, body).with_type(kind))
            }
            Some(Reply::Fail) | None => Err(NetError::Unreachable(url)),
        }
    }
}
