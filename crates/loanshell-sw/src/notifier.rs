//! Background notifier: push notifications, notification clicks and
//! deferred sync. Nothing here touches the cache path.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};
use url::Url;

use crate::clients::{Clients, WindowAction};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Notifications kept on screen at once; pushing past this drops the oldest.
pub const MAX_SHOWN: usize = 32;

/// Identifier of a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NotificationId(u64);

impl NotificationId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Button offered on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// Payload attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    pub date_of_arrival: DateTime<Utc>,
    pub primary_key: u32,
}

/// A rendered system notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// Work performed when a deferred sync fires.
#[async_trait]
pub trait SyncTask: Send + Sync {
    async fn run(&self, tag: &str) -> anyhow::Result<()>;
}

/// Placeholder sync task: there is no remote store to reconcile with yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSync;

#[async_trait]
impl SyncTask for NoopSync {
    async fn run(&self, tag: &str) -> anyhow::Result<()> {
        info!(tag = %tag, "Syncing loan data");
        Ok(())
    }
}

/// Result of a notification click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClickOutcome {
    pub closed: NotificationId,
    pub url: Url,
    pub window: WindowAction,
}

/// Result of a sync event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "sync", rename_all = "lowercase")]
pub enum SyncOutcome {
    Completed { tag: String },
    Ignored { tag: String },
}

/// Shows notifications and runs deferred syncs.
pub struct Notifier {
    config: Arc<WorkerConfig>,
    clients: Arc<RwLock<Clients>>,
    sync_task: Arc<dyn SyncTask>,
    shown: Mutex<BTreeMap<NotificationId, Notification>>,
    pending: Mutex<BTreeSet<String>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new(config: Arc<WorkerConfig>, clients: Arc<RwLock<Clients>>) -> Self {
        Self {
            config,
            clients,
            sync_task: Arc::new(NoopSync),
            shown: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(BTreeSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replace the sync task.
    pub fn with_sync_task(mut self, task: Arc<dyn SyncTask>) -> Self {
        self.sync_task = task;
        self
    }

    /// Render a notification for a push message.
    pub async fn push(&self, payload: Option<&str>) -> Notification {
        let settings = &self.config.notifications;
        let notification = Notification {
            id: NotificationId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            title: settings.title.clone(),
            body: payload
                .map(str::to_string)
                .unwrap_or_else(|| settings.default_body.clone()),
            icon: settings.icon.clone(),
            badge: settings.badge.clone(),
            vibrate: settings.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: Utc::now(),
                primary_key: 1,
            },
            actions: settings
                .actions
                .iter()
                .map(|a| NotificationAction {
                    action: a.action.clone(),
                    title: a.title.clone(),
                    icon: a.icon.clone(),
                })
                .collect(),
        };

        info!(id = notification.id.raw(), body = %notification.body, "Showing notification");
        let mut shown = self.shown.lock().await;
        shown.insert(notification.id, notification.clone());
        while shown.len() > MAX_SHOWN {
            if let Some((oldest, _)) = shown.pop_first() {
                debug!(id = oldest.raw(), "Dropping oldest notification");
            }
        }
        notification
    }

    /// The user dismissed the notification without clicking it.
    pub async fn close(&self, id: NotificationId) -> WorkerResult<Notification> {
        let closed = self
            .shown
            .lock()
            .await
            .remove(&id)
            .ok_or(WorkerError::NotificationNotFound(id.raw()))?;
        debug!(id = id.raw(), "Notification dismissed");
        Ok(closed)
    }

    /// Notifications currently displayed.
    pub async fn shown(&self) -> Vec<Notification> {
        self.shown.lock().await.values().cloned().collect()
    }

    /// Close the notification, then focus or open the window for `action`.
    pub async fn click(
        &self,
        id: NotificationId,
        action: Option<&str>,
    ) -> WorkerResult<ClickOutcome> {
        self.shown
            .lock()
            .await
            .remove(&id)
            .ok_or(WorkerError::NotificationNotFound(id.raw()))?;

        let url = self.config.resolve(self.click_target(action))?;
        let controller = self.config.shell_generation();
        let window = self
            .clients
            .write()
            .await
            .open_or_focus(&url, Some(&controller));

        info!(id = id.raw(), action = action.unwrap_or(""), url = %url, "Notification clicked");
        Ok(ClickOutcome {
            closed: id,
            url,
            window,
        })
    }

    fn click_target(&self, action: Option<&str>) -> &str {
        let settings = &self.config.notifications;
        action
            .and_then(|name| settings.actions.iter().find(|a| a.action == name))
            .map(|a| a.url.as_str())
            .unwrap_or(settings.default_url.as_str())
    }

    /// Queue a deferred sync. Returns false if the tag was already pending.
    pub async fn register_sync(&self, tag: &str) -> bool {
        let added = self.pending.lock().await.insert(tag.to_string());
        if added {
            debug!(tag = %tag, "Background sync registered");
        }
        added
    }

    /// Tags waiting for a sync event.
    pub async fn pending_syncs(&self) -> Vec<String> {
        self.pending.lock().await.iter().cloned().collect()
    }

    /// Handle a sync event. A failure leaves the tag pending for the host to
    /// retry.
    pub async fn sync(&self, tag: &str) -> WorkerResult<SyncOutcome> {
        if tag != self.config.sync_tag {
            debug!(tag = %tag, "Ignoring unknown sync tag");
            return Ok(SyncOutcome::Ignored {
                tag: tag.to_string(),
            });
        }

        match self.sync_task.run(tag).await {
            Ok(()) => {
                self.pending.lock().await.remove(tag);
                Ok(SyncOutcome::Completed {
                    tag: tag.to_string(),
                })
            }
            Err(e) => {
                error!(tag = %tag, error = %e, "Background sync failed");
                self.pending.lock().await.insert(tag.to_string());
                Err(WorkerError::BackgroundSyncFailure {
                    tag: tag.to_string(),
                    reason: format!("{:#}", e),
                })
            }
        }
    }
}
