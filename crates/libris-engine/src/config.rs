//! # Library Configuration
//!
//! Configuration management for the lifecycle engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     LIBRIS_DB_PATH=/var/lib/libris/libris.db                           │
//! │     LIBRIS_REDONATION_POLICY=reopen                                    │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/libris/libris.toml (Linux)                               │
//! │     ~/Library/Application Support/org.libris.libris/libris.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     ./libris.db, 5 attempts, refuse re-donation                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # libris.toml
//! [database]
//! path = "/var/lib/libris/libris.db"
//! max_connections = 8
//! busy_timeout_ms = 5000
//!
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 10
//! max_backoff_ms = 500
//!
//! [lending]
//! max_active_loans_per_user = 0   # 0 = unlimited
//!
//! [inventory]
//! redonation_policy = "refuse"    # refuse | reopen
//!
//! [certificates]
//! base_url = "https://library.example.org/certificates"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use libris_db::DbConfig;

use crate::error::ConfigError;

// =============================================================================
// Redonation Policy
// =============================================================================

/// What happens when someone donates an ISBN that was rejected before.
///
/// ```text
/// REFUSE (Default)                     REOPEN
/// ────────────────                     ──────
/// donate(rejected isbn)                donate(rejected isbn)
///      │                                    │
///      ▼                                    ▼
/// InvalidState                         status = pending, approval cleared
/// "cannot accept donations"            new copies counted as pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedonationPolicy {
    /// Rejection is final for the ISBN.
    #[default]
    Refuse,

    /// A new donation sends the book back to review.
    Reopen,
}

impl std::fmt::Display for RedonationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedonationPolicy::Refuse => write!(f, "refuse"),
            RedonationPolicy::Reopen => write!(f, "reopen"),
        }
    }
}

impl std::str::FromStr for RedonationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "refuse" => Ok(RedonationPolicy::Refuse),
            "reopen" => Ok(RedonationPolicy::Reopen),
            other => Err(ConfigError::Invalid(format!(
                "Unknown redonation policy: '{}'. Valid options: refuse, reopen",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Catalog store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits on a locked database (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("libris.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Retry budget for version conflicts and busy stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    10
}
fn default_max_backoff() -> u64 {
    500
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

/// Borrowing limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LendingSettings {
    /// Active loans one user may hold at once. 0 means unlimited.
    #[serde(default)]
    pub max_active_loans_per_user: u32,
}

/// Donation intake settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySettings {
    #[serde(default)]
    pub redonation_policy: RedonationPolicy,
}

/// Certificate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSettings {
    /// Prefix for certificate references: `<base_url>/<certificate id>.pdf`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    "certificates".to_string()
}

impl Default for CertificateSettings {
    fn default() -> Self {
        CertificateSettings {
            base_url: default_base_url(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub lending: LendingSettings,

    #[serde(default)]
    pub inventory: InventorySettings,

    #[serde(default)]
    pub certificates: CertificateSettings,
}

impl LibraryConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (libris.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading library config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load library config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML document (no environment overrides).
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// An in-memory configuration for tests and demos.
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.database.path = PathBuf::from(":memory:");
        config.database.max_connections = 1;
        config
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }

        if self.certificates.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "certificates.base_url must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup (the process environment in
    /// production, a map in tests).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("LIBRIS_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(max) = lookup("LIBRIS_DB_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Ignoring invalid LIBRIS_DB_MAX_CONNECTIONS"),
            }
        }

        if let Some(attempts) = lookup("LIBRIS_RETRY_MAX_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => self.retry.max_attempts = n,
                Err(_) => warn!(value = %attempts, "Ignoring invalid LIBRIS_RETRY_MAX_ATTEMPTS"),
            }
        }

        if let Some(policy) = lookup("LIBRIS_REDONATION_POLICY") {
            match policy.parse() {
                Ok(parsed) => {
                    debug!(policy = %policy, "Overriding redonation policy from environment");
                    self.inventory.redonation_policy = parsed;
                }
                Err(e) => warn!("{}", e),
            }
        }

        if let Some(url) = lookup("LIBRIS_CERTIFICATE_BASE_URL") {
            self.certificates.base_url = url;
        }

        if let Some(max) = lookup("LIBRIS_MAX_ACTIVE_LOANS") {
            match max.parse::<u32>() {
                Ok(n) => self.lending.max_active_loans_per_user = n,
                Err(_) => warn!(value = %max, "Ignoring invalid LIBRIS_MAX_ACTIVE_LOANS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "libris", "libris")
            .map(|dirs| dirs.config_dir().join("libris.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Catalog store settings in the form `libris-db` expects.
    pub fn db_config(&self) -> DbConfig {
        let busy = Duration::from_millis(self.database.busy_timeout_ms);
        let base = if self.database.path.as_os_str() == ":memory:" {
            DbConfig::in_memory()
        } else {
            DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
        };
        base.busy_timeout(busy)
    }
}
