//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DEPOT_DEVICE_ID=abc-123                                            │
//! │     DEPOT_MAX_ATTEMPTS=5                                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/depot-pos/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.depot.pos/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated device_id, 5s/30s backoff, 3 attempts               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [database]
//! path = "/var/lib/depot/depot.db"
//! max_connections = 5
//!
//! [drain]
//! tick_interval_ms = 10000
//! request_timeout_ms = 10000
//! base_delay_ms = 5000
//! max_delay_ms = 30000
//! max_attempts = 3
//! jitter = 0.0
//!
//! [connectivity]
//! probe_enabled = true
//! probe_interval_secs = 30
//! start_online = false
//!
//! [outbox]
//! retention_days = 7
//! compaction_interval_secs = 3600
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use depot_db::DbConfig;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1", "Back Office").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Where the record store lives and how the pool is sized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Defaults to `depot.db` in the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    /// Resolves the database file path.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            directories::ProjectDirs::from("com", "depot", "pos")
                .map(|dirs| dirs.data_dir().join("depot.db"))
        })
    }

    /// Builds the pool configuration for [`depot_db::Database::new`].
    pub fn db_config(&self) -> SyncResult<DbConfig> {
        let path = self
            .resolved_path()
            .ok_or_else(|| SyncError::InvalidConfig("No database path available".into()))?;
        Ok(DbConfig::new(path).max_connections(self.max_connections))
    }
}

// =============================================================================
// Drain Settings
// =============================================================================

/// Drain worker timing and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainSettings {
    /// Periodic drain tick while online (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Upper bound on a single remote call (milliseconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Delay after the first failed attempt (milliseconds).
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Cap on any single retry delay (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Attempts before a retryable failure is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Randomization factor in `[0, 1]`; 0 disables jitter.
    #[serde(default)]
    pub jitter: f64,
}

fn default_tick_interval() -> u64 {
    10_000
}
fn default_request_timeout() -> u64 {
    10_000
}
fn default_base_delay() -> u64 {
    5_000
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for DrainSettings {
    fn default() -> Self {
        DrainSettings {
            tick_interval_ms: default_tick_interval(),
            request_timeout_ms: default_request_timeout(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
            jitter: 0.0,
        }
    }
}

impl DrainSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// =============================================================================
// Connectivity Settings
// =============================================================================

/// Health probe behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    /// Run the periodic health probe against the remote.
    #[serde(default = "default_true")]
    pub probe_enabled: bool,

    /// Interval between health probes (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Initial state before the first probe or environment report.
    #[serde(default)]
    pub start_online: bool,
}

fn default_true() -> bool {
    true
}

fn default_probe_interval() -> u64 {
    30
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            probe_enabled: true,
            probe_interval_secs: default_probe_interval(),
            start_online: false,
        }
    }
}

impl ConnectivitySettings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

// =============================================================================
// Outbox Settings
// =============================================================================

/// Retention of delivered tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxSettings {
    /// Succeeded tasks older than this are compacted away.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Minimum time between compaction runs (seconds).
    #[serde(default = "default_compaction_interval")]
    pub compaction_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    7
}

fn default_compaction_interval() -> u64 {
    3600
}

impl Default for OutboxSettings {
    fn default() -> Self {
        OutboxSettings {
            retention_days: default_retention_days(),
            compaction_interval_secs: default_compaction_interval(),
        }
    }
}

impl OutboxSettings {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs)
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub drain: DrainSettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    pub outbox: OutboxSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
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
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        let drain = &self.drain;
        if drain.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if drain.base_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "base_delay_ms must be greater than 0".into(),
            ));
        }
        if drain.max_delay_ms < drain.base_delay_ms {
            return Err(SyncError::InvalidConfig(format!(
                "max_delay_ms ({}) must not be less than base_delay_ms ({})",
                drain.max_delay_ms, drain.base_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&drain.jitter) {
            return Err(SyncError::InvalidConfig(format!(
                "jitter must be between 0.0 and 1.0, got {}",
                drain.jitter
            )));
        }
        if drain.request_timeout_ms == 0 || drain.tick_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_ms and tick_interval_ms must be greater than 0".into(),
            ));
        }

        if self.connectivity.probe_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe_interval_secs must be greater than 0".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|var| std::env::var(var).ok());
    }

    /// Applies `DEPOT_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("DEPOT_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(name) = lookup("DEPOT_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Some(path) = lookup("DEPOT_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        let drain = &mut self.drain;
        override_parsed(&lookup, "DEPOT_TICK_INTERVAL_MS", &mut drain.tick_interval_ms);
        override_parsed(&lookup, "DEPOT_REQUEST_TIMEOUT_MS", &mut drain.request_timeout_ms);
        override_parsed(&lookup, "DEPOT_BASE_DELAY_MS", &mut drain.base_delay_ms);
        override_parsed(&lookup, "DEPOT_MAX_DELAY_MS", &mut drain.max_delay_ms);
        override_parsed(&lookup, "DEPOT_MAX_ATTEMPTS", &mut drain.max_attempts);
        override_parsed(&lookup, "DEPOT_JITTER", &mut drain.jitter);

        let connectivity = &mut self.connectivity;
        override_parsed(&lookup, "DEPOT_PROBE_ENABLED", &mut connectivity.probe_enabled);
        override_parsed(
            &lookup,
            "DEPOT_PROBE_INTERVAL_SECS",
            &mut connectivity.probe_interval_secs,
        );
        override_parsed(&lookup, "DEPOT_START_ONLINE", &mut connectivity.start_online);

        let outbox = &mut self.outbox;
        override_parsed(&lookup, "DEPOT_RETENTION_DAYS", &mut outbox.retention_days);
        override_parsed(
            &lookup,
            "DEPOT_COMPACTION_INTERVAL_SECS",
            &mut outbox.compaction_interval_secs,
        );
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "depot", "pos").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("sync.toml")
        })
    }

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(var) {
        match raw.parse::<T>() {
            Ok(value) => {
                debug!(var, value = %raw, "Overriding setting from environment");
                *target = value;
            }
            Err(_) => warn!(var, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}
