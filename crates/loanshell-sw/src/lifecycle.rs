//! Lifecycle controller.
//!
//! ```text
//! Installing ──install ok──► Waiting ──activate / skip_waiting──► Activating ──► Active
//!     │
//!     └──install fails──► Failed
//! ```
//!
//! Install is three steps: fetch every precache entry, then store them all in
//! the shell generation, then report. Nothing is written until every fetch
//! has succeeded, so a failed install never publishes a partial generation.
//! Transitions are serialized: activation cannot start until an install in
//! progress has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use loanshell_net::{Fetcher, Request, RequestMode, Response};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::generation::{CacheRole, GenerationName};
use crate::key::RequestKey;
use crate::registry::{GenerationHandle, Registry};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Registered, install not yet complete.
    #[default]
    Installing,
    /// Installed, waiting to take over.
    Waiting,
    /// Evicting stale generations and claiming clients.
    Activating,
    /// Controlling clients.
    Active,
    /// Install aborted; the previous generation stays in charge.
    Failed,
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Shell generation that was populated.
    pub generation: String,
    /// Number of precache entries stored.
    pub entries: usize,
    /// Present when the install went straight on to activation.
    pub activation: Option<ActivationReport>,
}

/// Result of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    /// Generations deleted, in name order.
    pub deleted: Vec<String>,
    /// Clients whose controller changed.
    pub claimed: usize,
    /// The worker was already active; nothing was done.
    pub already_active: bool,
}

/// Drives install and activation for one deployed version.
pub struct LifecycleController {
    config: Arc<WorkerConfig>,
    registry: Arc<dyn Registry>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<RwLock<Clients>>,
    state_tx: watch::Sender<LifecycleState>,
    transition: Mutex<()>,
    skip_waiting: AtomicBool,
}

impl LifecycleController {
    /// Create a controller in the `Installing` state.
    pub fn new(
        config: Arc<WorkerConfig>,
        registry: Arc<dyn Registry>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<RwLock<Clients>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Installing);
        Self {
            config,
            registry,
            fetcher,
            clients,
            state_tx,
            transition: Mutex::new(()),
            skip_waiting: AtomicBool::new(false),
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Lifecycle transition");
        }
    }

    /// Populate the shell generation from the precache list.
    pub async fn install(&self) -> WorkerResult<InstallReport> {
        let _transition = self.transition.lock().await;

        let state = self.state();
        if matches!(state, LifecycleState::Activating | LifecycleState::Active) {
            return Err(WorkerError::InvalidState {
                action: "install",
                state,
            });
        }
        self.set_state(LifecycleState::Installing);

        let generation = self.config.shell_generation();
        info!(
            generation = %generation,
            entries = self.config.precache.len(),
            "Installing shell generation"
        );

        let fetched = match self.fetch_manifest().await {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail_install(&generation, e)),
        };

        let entries = fetched.len();
        if let Err(e) = self.store_all(&generation, fetched).await {
            return Err(self.fail_install(&generation, e));
        }

        self.set_state(LifecycleState::Waiting);
        info!(generation = %generation, entries, "Shell generation installed");

        let activation = if self.config.skip_waiting_on_install
            || self.skip_waiting.load(Ordering::SeqCst)
        {
            Some(self.activate_locked().await?)
        } else {
            None
        };

        Ok(InstallReport {
            generation,
            entries,
            activation,
        })
    }

    fn fail_install(&self, generation: &str, e: WorkerError) -> WorkerError {
        error!(
            generation = %generation,
            error = %e,
            "Install failed; previous generation stays active"
        );
        self.set_state(LifecycleState::Failed);
        e
    }

    async fn fetch_manifest(&self) -> WorkerResult<Vec<(RequestKey, Response)>> {
        let requests = self
            .config
            .precache
            .iter()
            .map(|entry| self.config.resolve(entry).map(|url| self.manifest_request(url)))
            .collect::<WorkerResult<Vec<_>>>()?;

        try_join_all(requests.iter().map(|request| self.fetch_entry(request))).await
    }

    fn manifest_request(&self, url: Url) -> Request {
        let mode = if url.origin() == self.config.origin.origin() {
            RequestMode::SameOrigin
        } else {
            RequestMode::Cors
        };
        Request::get(url).mode(mode)
    }

    async fn fetch_entry(&self, request: &Request) -> WorkerResult<(RequestKey, Response)> {
        let url = request.url.to_string();
        let response = self.fetcher.fetch(request).await.map_err(|e| {
            WorkerError::InstallFetchFailure {
                url: url.clone(),
                reason: e.to_string(),
            }
        })?;

        if !response.ok() {
            return Err(WorkerError::InstallFetchFailure {
                url,
                reason: format!("status {}", response.status()),
            });
        }

        debug!(url = %url, "Fetched precache entry");
        let key = RequestKey::for_request(
            request,
            &self.config.origin,
            &self.config.query_insensitive_paths,
        );
        Ok((key, response))
    }

    async fn store_all(
        &self,
        generation: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> WorkerResult<()> {
        let handle = self.registry.open(generation).await?;
        for (key, response) in entries {
            self.registry.put(&handle, key, response).await?;
        }
        Ok(())
    }

    /// Evict stale generations and claim clients.
    pub async fn activate(&self) -> WorkerResult<ActivationReport> {
        let _transition = self.transition.lock().await;
        self.activate_locked().await
    }

    /// Request activation without waiting for clients to close. Takes effect
    /// immediately from `Waiting`, or at the end of an install in progress.
    pub async fn skip_waiting(&self) -> WorkerResult<Option<ActivationReport>> {
        self.skip_waiting.store(true, Ordering::SeqCst);

        let _transition = self.transition.lock().await;
        match self.state() {
            LifecycleState::Waiting => self.activate_locked().await.map(Some),
            _ => Ok(None),
        }
    }

    /// Whether fetches should be answered from this worker's generations.
    /// Requests arriving mid-activation may use either generation.
    pub fn is_controlling(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::Active | LifecycleState::Activating
        )
    }

    /// Take over directly when a durable registry already holds a complete
    /// shell generation for this version, as after a host restart. Returns
    /// false, leaving the state untouched, when an install is still needed.
    pub async fn resume(&self) -> WorkerResult<bool> {
        let _transition = self.transition.lock().await;

        let state = self.state();
        if state != LifecycleState::Installing {
            return Ok(state == LifecycleState::Active);
        }

        let generation = self.config.shell_generation();
        if !self.registry.contains(&generation).await? {
            return Ok(false);
        }

        let handle = GenerationHandle::new(&generation);
        for entry in &self.config.precache {
            let request = self.manifest_request(self.config.resolve(entry)?);
            let key = RequestKey::for_request(
                &request,
                &self.config.origin,
                &self.config.query_insensitive_paths,
            );
            if self.registry.get(&handle, &key).await?.is_none() {
                warn!(generation = %generation, missing = %key, "Stored generation incomplete; install required");
                return Ok(false);
            }
        }

        let claimed = self.clients.write().await.claim(&generation);
        self.set_state(LifecycleState::Active);
        info!(generation = %generation, claimed, "Resumed from stored generation");
        Ok(true)
    }

    async fn activate_locked(&self) -> WorkerResult<ActivationReport> {
        match self.state() {
            LifecycleState::Waiting => {}
            LifecycleState::Active => {
                return Ok(ActivationReport {
                    already_active: true,
                    ..Default::default()
                })
            }
            state => {
                return Err(WorkerError::InvalidState {
                    action: "activate",
                    state,
                })
            }
        }

        self.set_state(LifecycleState::Activating);
        match self.evict_and_claim().await {
            Ok(report) => {
                self.set_state(LifecycleState::Active);
                info!(
                    generation = %self.config.shell_generation(),
                    deleted = report.deleted.len(),
                    claimed = report.claimed,
                    "Activated"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Activation failed; staying in waiting");
                self.set_state(LifecycleState::Waiting);
                Err(e)
            }
        }
    }

    async fn evict_and_claim(&self) -> WorkerResult<ActivationReport> {
        let shell = self.config.shell_generation();
        let data = self.config.data_generation();

        let mut deleted = Vec::new();
        for name in self.registry.list_generation_names().await? {
            if name == shell || name == data {
                continue;
            }
            self.log_eviction(&name);
            if self.registry.delete_generation(&name).await? {
                deleted.push(name);
            }
        }

        let claimed = self.clients.write().await.claim(&shell);

        Ok(ActivationReport {
            deleted,
            claimed,
            already_active: false,
        })
    }

    fn log_eviction(&self, name: &str) {
        let role = GenerationName::parse(name).and_then(|parsed| {
            let role = if parsed.prefix == self.config.shell_cache_prefix {
                CacheRole::Shell
            } else if parsed.prefix == self.config.data_cache_prefix {
                CacheRole::Data
            } else {
                return None;
            };
            Some((role, parsed.version))
        });

        match role {
            Some((role, version)) => {
                info!(generation = %name, role = %role, version = %version, "Removing old cache")
            }
            None => info!(generation = %name, "Removing unrecognized cache"),
        }
    }
}
