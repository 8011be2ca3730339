//! Host adapter: turns JSON-line events into worker events and worker
//! outcomes back into JSON.

use http::Method;
use loanshell_net::{Request, RequestDestination, RequestMode};
use loanshell_sw::{
    Client, EventOutcome, NotificationId, ReplyPort, ServiceWorker, WorkerError, WorkerEvent,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// One line of host input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Install,
    Activate,
    Fetch {
        url: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        mode: RequestMode,
        #[serde(default)]
        destination: RequestDestination,
    },
    Message {
        data: Value,
        /// Attach a reply port and report what came back on it.
        #[serde(default)]
        reply: bool,
    },
    Push {
        #[serde(default)]
        payload: Option<String>,
    },
    NotificationClick {
        notification: u64,
        #[serde(default)]
        action: Option<String>,
    },
    NotificationClose {
        notification: u64,
    },
    Sync {
        tag: String,
    },
    Online,
    Offline,
    /// A page was opened by the user.
    OpenWindow {
        url: String,
    },
    Status,
}

/// Owns the worker and answers host events.
pub struct Host {
    worker: ServiceWorker,
}

impl Host {
    pub fn new(worker: ServiceWorker) -> Self {
        Self { worker }
    }

    /// Parse and handle one input line.
    pub async fn handle_line(&self, line: &str) -> Value {
        match serde_json::from_str::<HostEvent>(line) {
            Ok(event) => self.handle(event).await,
            Err(e) => json!({ "ok": false, "error": format!("invalid event: {}", e) }),
        }
    }

    pub async fn handle(&self, event: HostEvent) -> Value {
        match event {
            HostEvent::Message { data, reply } => self.message(data, reply).await,
            HostEvent::Online => self.online().await,
            HostEvent::OpenWindow { url } => self.open_window(&url).await,
            HostEvent::Status => self.status().await,
            other => match self.to_worker_event(other) {
                Ok(event) => report(self.worker.dispatch(event).await),
                Err(e) => failure(&e),
            },
        }
    }

    fn to_worker_event(&self, event: HostEvent) -> Result<WorkerEvent, WorkerError> {
        let event = match event {
            HostEvent::Install => WorkerEvent::Install,
            HostEvent::Activate => WorkerEvent::Activate,
            HostEvent::Fetch {
                url,
                method,
                mode,
                destination,
            } => {
                let url = self.worker.config().resolve(&url)?;
                let mut request = Request::get(url).mode(mode).destination(destination);
                if let Some(method) = method {
                    let method = method.parse::<Method>().map_err(|_| {
                        WorkerError::config(format!("invalid HTTP method '{}'", method))
                    })?;
                    request = request.method(method);
                }
                WorkerEvent::Fetch(request)
            }
            HostEvent::Push { payload } => WorkerEvent::Push(payload),
            HostEvent::NotificationClick {
                notification,
                action,
            } => WorkerEvent::NotificationClick {
                notification: NotificationId::new(notification),
                action,
            },
            HostEvent::NotificationClose { notification } => WorkerEvent::NotificationClose {
                notification: NotificationId::new(notification),
            },
            HostEvent::Sync { tag } => WorkerEvent::Sync(tag),
            HostEvent::Offline => WorkerEvent::Offline,
            HostEvent::Message { .. }
            | HostEvent::Online
            | HostEvent::OpenWindow { .. }
            | HostEvent::Status => {
                return Err(WorkerError::config("event is handled by the host"))
            }
        };
        Ok(event)
    }

    async fn message(&self, data: Value, reply: bool) -> Value {
        let (port, mut replies) = ReplyPort::channel();
        let ports = if reply { vec![port] } else { Vec::new() };

        let mut output = report(self.worker.dispatch(WorkerEvent::Message { data, ports }).await);
        if reply {
            let mut received = Vec::new();
            while let Ok(value) = replies.try_recv() {
                received.push(value);
            }
            output["replies"] = Value::Array(received);
        }
        output
    }

    /// The host is also the sync scheduler: a registration made on
    /// reconnect fires straight away.
    async fn online(&self) -> Value {
        let registered = self.worker.dispatch(WorkerEvent::Online).await;
        let tag = match &registered {
            Ok(EventOutcome::SyncRegistered { tag, .. }) => Some(tag.clone()),
            _ => None,
        };
        let mut output = report(registered);

        if let Some(tag) = tag {
            debug!(tag = %tag, "Running registered sync");
            output["sync"] = report(self.worker.dispatch(WorkerEvent::Sync(tag)).await);
        }
        output
    }

    async fn open_window(&self, url: &str) -> Value {
        let url = match self.worker.config().resolve(url) {
            Ok(url) => url,
            Err(e) => return failure(&e),
        };
        let id = self.worker.clients().write().await.add(Client::window(url));
        json!({ "ok": true, "outcome": "window_opened", "client": id })
    }

    async fn status(&self) -> Value {
        let generations = match self.worker.registry().list_generation_names().await {
            Ok(names) => names,
            Err(e) => return failure(&e),
        };
        let clients = self.worker.clients().read().await;
        json!({
            "ok": true,
            "outcome": "status",
            "state": self.worker.state(),
            "in_flight": self.worker.in_flight(),
            "generations": generations,
            "pending_syncs": self.worker.notifier().pending_syncs().await,
            "clients": clients.match_all(true),
        })
    }
}

fn report(result: Result<EventOutcome, WorkerError>) -> Value {
    match result {
        Ok(outcome) => describe(&outcome),
        Err(e) => failure(&e),
    }
}

fn failure(error: &WorkerError) -> Value {
    json!({
        "ok": false,
        "error": error.to_string(),
        "retryable": error.is_retryable(),
    })
}

/// JSON description of an outcome.
pub fn describe(outcome: &EventOutcome) -> Value {
    match outcome {
        EventOutcome::Installed(report) => {
            json!({ "ok": true, "outcome": "installed", "report": report })
        }
        EventOutcome::Activated(report) => {
            json!({ "ok": true, "outcome": "activated", "report": report })
        }
        EventOutcome::Responded(routed) => json!({
            "ok": true,
            "outcome": "responded",
            "source": routed.source,
            "class": routed.class,
            "stored": routed.stored,
            "url": routed.response.url().as_str(),
            "status": routed.response.status().as_u16(),
            "type": routed.response.kind().as_str(),
            "body": routed.response.text(),
        }),
        EventOutcome::Message(result) => {
            json!({ "ok": true, "outcome": "message", "result": result })
        }
        EventOutcome::Notified(notification) => {
            json!({ "ok": true, "outcome": "notified", "notification": notification })
        }
        EventOutcome::Clicked(click) => {
            json!({ "ok": true, "outcome": "clicked", "click": click })
        }
        EventOutcome::Closed(notification) => {
            json!({ "ok": true, "outcome": "closed", "notification": notification.id })
        }
        EventOutcome::Synced(sync) => json!({ "ok": true, "outcome": "synced", "result": sync }),
        EventOutcome::SyncRegistered { tag, newly } => json!({
            "ok": true,
            "outcome": "sync_registered",
            "tag": tag,
            "newly": newly,
        }),
        EventOutcome::WentOffline => json!({ "ok": true, "outcome": "offline" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loanshell_net::ScriptedFetcher;
    use loanshell_sw::{MemoryRegistry, WorkerConfig};
    use std::sync::Arc;

    fn host(fetcher: Arc<ScriptedFetcher>) -> Host {
        let config = WorkerConfig {
            precache: vec!["/".to_string(), "/index.html".to_string()],
            ..Default::default()
        };
        let worker =
            ServiceWorker::new(config, Arc::new(MemoryRegistry::new()), fetcher).unwrap();
        Host::new(worker)
    }

    fn scripted() -> Arc<ScriptedFetcher> {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond("http://localhost:3000/", 200, "A");
        fetcher.respond("http://localhost:3000/index.html", 200, "B");
        fetcher
    }

    #[test]
    fn test_parse_fetch_event() {
        let event: HostEvent = serde_json::from_str(
            r#"{"event":"fetch","url":"/","mode":"navigate","destination":"document"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            HostEvent::Fetch {
                url: "/".to_string(),
                method: None,
                mode: RequestMode::Navigate,
                destination: RequestDestination::Document,
            }
        );
    }

    #[tokio::test]
    async fn test_install_then_fetch_from_cache() {
        let host = host(scripted());

        let installed = host.handle_line(r#"{"event":"install"}"#).await;
        assert_eq!(installed["outcome"], "installed");

        let fetched = host
            .handle_line(r#"{"event":"fetch","url":"/index.html"}"#)
            .await;
        assert_eq!(fetched["source"], "cache");
        assert_eq!(fetched["body"], "B");
    }

    #[tokio::test]
    async fn test_get_version_reply_is_reported() {
        let host = host(scripted());
        host.handle_line(r#"{"event":"install"}"#).await;

        let output = host
            .handle_line(r#"{"event":"message","data":{"type":"GET_VERSION"},"reply":true}"#)
            .await;
        assert_eq!(
            output["replies"],
            json!([{ "version": "family-loan-tracker-v1.0.0" }])
        );
    }

    #[tokio::test]
    async fn test_online_runs_sync() {
        let host = host(scripted());
        let output = host.handle_line(r#"{"event":"online"}"#).await;
        assert_eq!(output["outcome"], "sync_registered");
        assert_eq!(output["sync"]["result"]["sync"], "completed");
    }

    #[tokio::test]
    async fn test_push_then_close() {
        let host = host(scripted());
        let pushed = host.handle_line(r#"{"event":"push","payload":"Loan due"}"#).await;
        let id = pushed["notification"]["id"].as_u64().unwrap();

        let line = format!(r#"{{"event":"notification_close","notification":{}}}"#, id);
        let closed = host.handle_line(&line).await;
        assert_eq!(closed["outcome"], "closed");
        assert_eq!(closed["notification"], id);

        let again = host.handle_line(&line).await;
        assert_eq!(again["ok"], false);
    }

    #[tokio::test]
    async fn test_bad_input_reports_error() {
        let host = host(scripted());
        let output = host.handle_line("not json").await;
        assert_eq!(output["ok"], false);

        let output = host
            .handle_line(r#"{"event":"fetch","url":"/api/loans"}"#)
            .await;
        assert_eq!(output["ok"], false);
        assert_eq!(output["retryable"], true);
    }
}
