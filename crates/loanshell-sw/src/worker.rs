//! Event dispatcher.
//!
//! The host delivers every event as a [`WorkerEvent`] and drives the future
//! returned by [`ServiceWorker::dispatch`] to completion. Each dispatch holds a
//! [`KeepAlive`] guard, so [`ServiceWorker::is_idle`] tells the host when the
//! worker may be terminated.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use loanshell_net::{Fetcher, Request};
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::control::{ControlChannel, MessageOutcome, ReplyPort};
use crate::error::WorkerResult;
use crate::lifecycle::{ActivationReport, InstallReport, LifecycleController, LifecycleState};
use crate::notifier::{ClickOutcome, Notification, NotificationId, Notifier, SyncOutcome, SyncTask};
use crate::registry::Registry;
use crate::router::{RoutedResponse, Router};

/// Events delivered by the host.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message {
        data: Value,
        ports: Vec<ReplyPort>,
    },
    Push(Option<String>),
    NotificationClick {
        notification: NotificationId,
        action: Option<String>,
    },
    NotificationClose {
        notification: NotificationId,
    },
    Sync(String),
    Online,
    Offline,
}

impl WorkerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch(_) => "fetch",
            Self::Message { .. } => "message",
            Self::Push(_) => "push",
            Self::NotificationClick { .. } => "notificationclick",
            Self::NotificationClose { .. } => "notificationclose",
            Self::Sync(_) => "sync",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// What handling an event did.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivationReport),
    Responded(RoutedResponse),
    Message(MessageOutcome),
    Notified(Notification),
    Clicked(ClickOutcome),
    Closed(Notification),
    Synced(SyncOutcome),
    SyncRegistered { tag: String, newly: bool },
    WentOffline,
}

/// Guard counting an event in flight.
#[derive(Debug)]
pub struct KeepAlive {
    in_flight: Arc<AtomicUsize>,
}

impl KeepAlive {
    fn new(in_flight: &Arc<AtomicUsize>) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            in_flight: in_flight.clone(),
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The offline worker for one deployed version.
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    registry: Arc<dyn Registry>,
    clients: Arc<RwLock<Clients>>,
    lifecycle: Arc<LifecycleController>,
    router: Router,
    notifier: Notifier,
    control: ControlChannel,
    in_flight: Arc<AtomicUsize>,
}

impl ServiceWorker {
    /// Build a worker. The configuration is validated here and read-only
    /// afterwards.
    pub fn new(
        config: WorkerConfig,
        registry: Arc<dyn Registry>,
        fetcher: Arc<dyn Fetcher>,
    ) -> WorkerResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let clients = Arc::new(RwLock::new(Clients::new()));

        let lifecycle = Arc::new(LifecycleController::new(
            config.clone(),
            registry.clone(),
            fetcher.clone(),
            clients.clone(),
        ));
        let router = Router::new(config.clone(), registry.clone(), fetcher);
        let notifier = Notifier::new(config.clone(), clients.clone());
        let control = ControlChannel::new(config.clone(), lifecycle.clone());

        info!(
            shell = %config.shell_generation(),
            data = %config.data_generation(),
            "Worker created"
        );

        Ok(Self {
            config,
            registry,
            clients,
            lifecycle,
            router,
            notifier,
            control,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Replace the background sync task.
    pub fn with_sync_task(mut self, task: Arc<dyn SyncTask>) -> Self {
        self.notifier = self.notifier.with_sync_task(task);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn clients(&self) -> &Arc<RwLock<Clients>> {
        &self.clients
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Hold the worker alive outside of a dispatch.
    pub fn keep_alive(&self) -> KeepAlive {
        KeepAlive::new(&self.in_flight)
    }

    /// Events currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Take control from a complete stored generation without reinstalling.
    /// Returns false when an install is still required.
    pub async fn resume(&self) -> WorkerResult<bool> {
        self.lifecycle.resume().await
    }

    /// Whether the host may terminate the worker.
    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    /// Handle one event.
    pub async fn dispatch(&self, event: WorkerEvent) -> WorkerResult<EventOutcome> {
        let _guard = self.keep_alive();
        debug!(event = event.name(), "Dispatching event");

        match event {
            WorkerEvent::Install => self.lifecycle.install().await.map(EventOutcome::Installed),
            WorkerEvent::Activate => self.lifecycle.activate().await.map(EventOutcome::Activated),
            WorkerEvent::Fetch(request) => {
                let routed = if self.lifecycle.is_controlling() {
                    self.router.route(&request).await
                } else {
                    self.router.passthrough(&request).await
                };
                routed.map(EventOutcome::Responded)
            }
            WorkerEvent::Message { data, ports } => self
                .control
                .handle(&data, &ports)
                .await
                .map(EventOutcome::Message),
            WorkerEvent::Push(payload) => Ok(EventOutcome::Notified(
                self.notifier.push(payload.as_deref()).await,
            )),
            WorkerEvent::NotificationClick {
                notification,
                action,
            } => self
                .notifier
                .click(notification, action.as_deref())
                .await
                .map(EventOutcome::Clicked),
            WorkerEvent::NotificationClose { notification } => self
                .notifier
                .close(notification)
                .await
                .map(EventOutcome::Closed),
            WorkerEvent::Sync(tag) => self.notifier.sync(&tag).await.map(EventOutcome::Synced),
            WorkerEvent::Online => {
                let tag = self.config.sync_tag.clone();
                info!(tag = %tag, "Back online; registering background sync");
                let newly = self.notifier.register_sync(&tag).await;
                Ok(EventOutcome::SyncRegistered { tag, newly })
            }
            WorkerEvent::Offline => {
                info!("Gone offline; serving from cache");
                Ok(EventOutcome::WentOffline)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use loanshell_net::ScriptedFetcher;

    fn worker() -> ServiceWorker {
        let config = WorkerConfig {
            precache: vec!["/".to_string()],
            ..Default::default()
        };
        ServiceWorker::new(
            config,
            Arc::new(MemoryRegistry::new()),
            Arc::new(ScriptedFetcher::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = WorkerConfig {
            version: String::new(),
            ..Default::default()
        };
        let result = ServiceWorker::new(
            config,
            Arc::new(MemoryRegistry::new()),
            Arc::new(ScriptedFetcher::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_keep_alive_tracks_in_flight() {
        let worker = worker();
        assert!(worker.is_idle());
        {
            let _guard = worker.keep_alive();
            assert_eq!(worker.in_flight(), 1);
            assert!(!worker.is_idle());
        }
        assert!(worker.is_idle());

        worker.dispatch(WorkerEvent::Offline).await.unwrap();
        assert!(worker.is_idle());
    }

    #[tokio::test]
    async fn test_fetch_before_control_goes_to_network() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond("http://localhost:3000/", 200, "A");
        fetcher.respond("http://localhost:3000/app.js", 200, "js");
        let registry = Arc::new(MemoryRegistry::new());
        let config = WorkerConfig {
            precache: vec!["/".to_string()],
            ..Default::default()
        };
        let worker = ServiceWorker::new(config, registry.clone(), fetcher.clone()).unwrap();
        let request = Request::get(url::Url::parse("http://localhost:3000/app.js").unwrap());

        let outcome = worker.dispatch(WorkerEvent::Fetch(request.clone())).await.unwrap();
        let EventOutcome::Responded(routed) = outcome else {
            panic!("expected a response");
        };
        assert!(!routed.stored);
        assert!(registry.list_generation_names().await.unwrap().is_empty());

        worker.dispatch(WorkerEvent::Install).await.unwrap();
        worker.dispatch(WorkerEvent::Activate).await.unwrap();
        let outcome = worker.dispatch(WorkerEvent::Fetch(request)).await.unwrap();
        let EventOutcome::Responded(routed) = outcome else {
            panic!("expected a response");
        };
        assert!(routed.stored);
        assert_eq!(fetcher.calls_for("http://localhost:3000/app.js"), 2);
    }

    #[tokio::test]
    async fn test_notification_close_event() {
        let worker = worker();
        let EventOutcome::Notified(shown) = worker.dispatch(WorkerEvent::Push(None)).await.unwrap()
        else {
            panic!("expected a notification");
        };

        let outcome = worker
            .dispatch(WorkerEvent::NotificationClose {
                notification: shown.id,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Closed(ref n) if n.id == shown.id));
        assert!(worker.notifier().shown().await.is_empty());
    }

    #[tokio::test]
    async fn test_online_registers_sync_once() {
        let worker = worker();

        let outcome = worker.dispatch(WorkerEvent::Online).await.unwrap();
        assert!(matches!(
            outcome,
            EventOutcome::SyncRegistered { ref tag, newly: true } if tag == "loan-data-sync"
        ));

        let outcome = worker.dispatch(WorkerEvent::Online).await.unwrap();
        assert!(matches!(outcome, EventOutcome::SyncRegistered { newly: false, .. }));

        worker
            .dispatch(WorkerEvent::Sync("loan-data-sync".to_string()))
            .await
            .unwrap();
        assert!(worker.notifier().pending_syncs().await.is_empty());
    }
}
