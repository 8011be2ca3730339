//! Worker configuration
//!
//! Injected once at worker startup and read-only afterwards. The version tag
//! decides the names of the current shell and data generations.

use std::path::Path;
use std::time::Duration;

use loanshell_net::{FetcherConfig, UrlPattern};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{WorkerError, WorkerResult};
use crate::generation::{generation_name, parse_version_tag};

/// Offline worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the application shell is served from
    pub origin: Url,

    /// Version tag of this deployment, e.g. `v1.0.0`
    pub version: String,

    /// Prefix of shell generation names
    pub shell_cache_prefix: String,

    /// Prefix of data generation names
    pub data_cache_prefix: String,

    /// URLs the shell generation must hold after install, in order
    pub precache: Vec<String>,

    /// URLs matching any of these are data-class requests
    pub data_patterns: Vec<UrlPattern>,

    /// Same-origin paths whose query string is ignored in cache keys
    pub query_insensitive_paths: Vec<String>,

    /// Document served to navigations when both cache and network miss
    pub offline_fallback: String,

    /// Activate right after a successful install
    pub skip_waiting_on_install: bool,

    /// Tag of the deferred loan data sync
    pub sync_tag: String,

    /// Push notification settings
    pub notifications: NotificationConfig,

    /// HTTP settings for the host fetcher
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notification title
    pub title: String,

    /// Body used when a push carries no payload
    pub default_body: String,

    pub icon: String,

    pub badge: String,

    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,

    /// Actions offered on each notification
    pub actions: Vec<ActionConfig>,

    /// Window opened for a click without a known action
    pub default_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Action identifier reported on click
    pub action: String,

    /// Button label
    pub title: String,

    pub icon: String,

    /// Window opened when this action is clicked
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// User agent string, defaults to `Loanshell/<version>`
    pub user_agent: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum redirects followed
    pub max_redirects: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:3000/").expect("default origin is a valid URL"),
            version: "v1.0.0".to_string(),
            shell_cache_prefix: "family-loan-tracker".to_string(),
            data_cache_prefix: "family-loan-data".to_string(),
            precache: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "https://cdn.tailwindcss.com/3.4.0".to_string(),
                "https://unpkg.com/react@18/umd/react.production.min.js".to_string(),
                "https://unpkg.com/react-dom@18/umd/react-dom.production.min.js".to_string(),
            ],
            data_patterns: vec![UrlPattern::contains("/api/"), UrlPattern::contains("supabase")],
            query_insensitive_paths: vec!["/".to_string(), "/index.html".to_string()],
            offline_fallback: "/".to_string(),
            skip_waiting_on_install: true,
            sync_tag: "loan-data-sync".to_string(),
            notifications: NotificationConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Family Loan Tracker".to_string(),
            default_body: "Payment reminder".to_string(),
            icon: "/icons/icon-192.png".to_string(),
            badge: "/icons/icon-72.png".to_string(),
            vibrate: vec![100, 50, 100],
            actions: vec![
                ActionConfig {
                    action: "view".to_string(),
                    title: "View Loans".to_string(),
                    icon: "/icons/icon-192.png".to_string(),
                    url: "/".to_string(),
                },
                ActionConfig {
                    action: "make-payment".to_string(),
                    title: "Make Payment".to_string(),
                    icon: "/icons/icon-192.png".to_string(),
                    url: "/?action=payment".to_string(),
                },
            ],
            default_url: "/".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: 30,
            max_redirects: 10,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> WorkerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            WorkerError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> WorkerResult<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).map_err(|e| {
            WorkerError::config(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Check the invariants the worker relies on.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.version.is_empty() || self.version.contains(char::is_whitespace) {
            return Err(WorkerError::config(format!(
                "version tag '{}' must be non-empty without whitespace",
                self.version
            )));
        }
        if parse_version_tag(&self.version).is_none() {
            return Err(WorkerError::config(format!(
                "version tag '{}' is not a semantic version",
                self.version
            )));
        }
        if self.shell_generation() == self.data_generation() {
            return Err(WorkerError::config(
                "shell and data generations must have different names",
            ));
        }
        for entry in &self.precache {
            self.resolve(entry)?;
        }
        let fallback = self.resolve(&self.offline_fallback)?;
        let listed = self
            .precache
            .iter()
            .filter_map(|entry| self.resolve(entry).ok())
            .any(|url| url == fallback);
        if !listed {
            return Err(WorkerError::config(format!(
                "offline fallback '{}' is not in the precache list",
                self.offline_fallback
            )));
        }
        Ok(())
    }

    /// Name of the current shell generation.
    pub fn shell_generation(&self) -> String {
        generation_name(&self.shell_cache_prefix, &self.version)
    }

    /// Name of the current data generation.
    pub fn data_generation(&self) -> String {
        generation_name(&self.data_cache_prefix, &self.version)
    }

    /// Resolve a manifest entry or path against the origin.
    pub fn resolve(&self, entry: &str) -> WorkerResult<Url> {
        self.origin
            .join(entry)
            .map_err(|e| WorkerError::config(format!("Invalid URL '{}': {}", entry, e)))
    }

    /// Settings for the host's HTTP fetcher.
    pub fn fetcher_config(&self) -> FetcherConfig {
        let defaults = FetcherConfig::default();
        FetcherConfig {
            origin: self.origin.clone(),
            user_agent: self
                .network
                .user_agent
                .clone()
                .unwrap_or(defaults.user_agent),
            timeout: Duration::from_secs(self.network.timeout_secs),
            max_redirects: self.network.max_redirects,
        }
    }
}
