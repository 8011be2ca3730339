//! Control channel between application pages and the worker.
//!
//! Messages are JSON objects tagged by `type`:
//!
//! | type           | effect                                 | reply                  |
//! |----------------|----------------------------------------|------------------------|
//! | `SKIP_WAITING` | activate without waiting for clients   | none                   |
//! | `GET_VERSION`  | none                                   | `{"version": "<name>"}` |
//!
//! Anything else is ignored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::lifecycle::{ActivationReport, LifecycleController};

/// A decoded control message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    GetVersion,
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Decode a message. Payloads without a string `type` decode as `Unknown`.
    pub fn parse(data: &Value) -> Self {
        Self::deserialize(data).unwrap_or(Self::Unknown)
    }
}

/// Sending half of a page's message channel.
#[derive(Debug, Clone)]
pub struct ReplyPort {
    tx: mpsc::UnboundedSender<Value>,
}

impl ReplyPort {
    /// Create a port and the receiver the page listens on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Post a reply. Returns false if the page has gone away.
    pub fn post(&self, value: Value) -> bool {
        self.tx.send(value).is_ok()
    }
}

/// Reply to `GET_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
}

/// What a control message did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum MessageOutcome {
    SkipWaiting {
        activation: Option<ActivationReport>,
    },
    Version {
        version: String,
        delivered: bool,
    },
    Ignored,
}

/// Dispatches control messages to the lifecycle controller.
pub struct ControlChannel {
    config: Arc<WorkerConfig>,
    lifecycle: Arc<LifecycleController>,
}

impl ControlChannel {
    pub fn new(config: Arc<WorkerConfig>, lifecycle: Arc<LifecycleController>) -> Self {
        Self { config, lifecycle }
    }

    pub async fn handle(&self, data: &Value, ports: &[ReplyPort]) -> WorkerResult<MessageOutcome> {
        match ControlMessage::parse(data) {
            ControlMessage::SkipWaiting => {
                debug!("Skip waiting requested");
                let activation = self.lifecycle.skip_waiting().await?;
                Ok(MessageOutcome::SkipWaiting { activation })
            }
            ControlMessage::GetVersion => {
                let version = self.config.shell_generation();
                let reply = serde_json::to_value(VersionReply {
                    version: version.clone(),
                })?;
                let delivered = match ports.first() {
                    Some(port) => port.post(reply),
                    None => {
                        warn!("GET_VERSION without a reply port; reply dropped");
                        false
                    }
                };
                Ok(MessageOutcome::Version { version, delivered })
            }
            ControlMessage::Unknown => {
                debug!(data = %data, "Ignoring unknown control message");
                Ok(MessageOutcome::Ignored)
            }
        }
    }
}
