//! # Loanshell Worker
//!
//! Offline cache manager for the Family Loan Tracker web application.
//!
//! ## Features
//!
//! - **Lifecycle**: install, waiting, activate, with skip-waiting
//! - **Cache generations**: versioned shell and data namespaces, evicted whole
//! - **Routing**: cache-first for the shell, network-first for loan data
//! - **Notifications**: push rendering, click handling, background sync
//! - **Control channel**: `SKIP_WAITING` and `GET_VERSION` messages
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker (dispatch)
//!     ├── LifecycleController ── Registry ── Fetcher
//!     ├── Router ─────────────── Registry ── Fetcher
//!     ├── Notifier ───────────── Clients
//!     └── ControlChannel ─────── LifecycleController
//! ```

pub mod clients;
pub mod config;
pub mod control;
pub mod error;
pub mod generation;
pub mod key;
pub mod lifecycle;
pub mod notifier;
pub mod registry;
pub mod router;
pub mod worker;

pub use clients::{Client, ClientId, ClientType, Clients, WindowAction};
pub use config::{ActionConfig, NetworkConfig, NotificationConfig, WorkerConfig};
pub use control::{ControlMessage, MessageOutcome, ReplyPort, VersionReply};
pub use error::{WorkerError, WorkerResult};
pub use generation::{generation_name, CacheRole, GenerationName};
pub use key::RequestKey;
pub use lifecycle::{ActivationReport, InstallReport, LifecycleController, LifecycleState};
pub use notifier::{
    ClickOutcome, NoopSync, Notification, NotificationId, Notifier, SyncOutcome, SyncTask,
};
pub use registry::{GenerationHandle, MemoryRegistry, Registry, SqliteRegistry};
pub use router::{RequestClass, ResponseSource, RoutedResponse, Router};
pub use worker::{EventOutcome, KeepAlive, ServiceWorker, WorkerEvent};
