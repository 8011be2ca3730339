//! Cache registry: named generations of request→response entries.
//!
//! ```text
//! Registry
//!     ├── family-loan-tracker-v1.0.0   (shell)
//!     │       └── RequestKey → Response
//!     └── family-loan-data-v1.0.0      (data)
//!             └── RequestKey → Response
//! ```
//!
//! Generations are disjoint namespaces. There is no per-entry expiry: the
//! only eviction is deleting a whole generation.

use std::collections::BTreeSet;

use async_trait::async_trait;
use loanshell_net::Response;

use crate::error::WorkerResult;
use crate::key::RequestKey;

mod memory;
mod sqlite;

pub use memory::MemoryRegistry;
pub use sqlite::SqliteRegistry;

/// Handle to an opened generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationHandle {
    name: String,
}

impl GenerationHandle {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Storage for cache generations.
///
/// Writes are last-write-wins. Writing through a handle whose generation has
/// been deleted recreates it.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Open a generation, creating it if absent.
    async fn open(&self, name: &str) -> WorkerResult<GenerationHandle>;

    /// Whether a generation exists, without creating it.
    async fn contains(&self, name: &str) -> WorkerResult<bool>;

    /// Look up an entry by exact key.
    async fn get(
        &self,
        handle: &GenerationHandle,
        key: &RequestKey,
    ) -> WorkerResult<Option<Response>>;

    /// Store an entry, replacing any previous one under the same key.
    async fn put(
        &self,
        handle: &GenerationHandle,
        key: RequestKey,
        response: Response,
    ) -> WorkerResult<()>;

    /// All keys in a generation.
    async fn keys(&self, handle: &GenerationHandle) -> WorkerResult<Vec<RequestKey>>;

    /// Delete a whole generation. Returns whether it existed.
    async fn delete_generation(&self, name: &str) -> WorkerResult<bool>;

    /// Names of every generation.
    async fn list_generation_names(&self) -> WorkerResult<BTreeSet<String>>;
}
