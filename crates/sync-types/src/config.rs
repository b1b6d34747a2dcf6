//! Configuration loading for offer-sync.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/offer-sync/config.toml and
//! environment variables use the `OFFER_SYNC_` prefix with `__` between
//! nested keys (e.g. `OFFER_SYNC_DISPATCHER__POOL_SIZE=8`).

use config::{Config, Environment, File};
use directories::ProjectDirs;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

use crate::error::SyncError;

const APP_NAME: &str = "offer-sync";

/// Which backend holds queues, sets, snapshots and in-flight tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Embedded RocksDB, owned by a single daemon process (default).
    /// Other `offer-sync` commands cannot open it while the daemon runs.
    #[default]
    Rocksdb,
    /// PostgreSQL tables, shared between processes
    Postgres,
}

/// How the dispatcher starts provider workers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// Tokio task inside the daemon process (default)
    #[default]
    Task,
    /// Child `offer-sync worker` process
    Process,
}

/// Queue store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStoreSettings {
    #[serde(default)]
    pub backend: QueueBackend,

    /// RocksDB directory (rocksdb backend)
    #[serde(default = "default_queue_store_path")]
    pub path: String,

    /// Connection string (postgres backend)
    #[serde(default)]
    pub database_url: Option<String>,
}

fn default_queue_store_path() -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join("queue-store"))
        .unwrap_or_else(|| PathBuf::from("./queue-store"))
        .to_string_lossy()
        .to_string()
}

impl Default for QueueStoreSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            path: default_queue_store_path(),
            database_url: None,
        }
    }
}

/// Catalog database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default = "default_catalog_url")]
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_catalog_url() -> String {
    "postgres://localhost/catalog".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            database_url: default_catalog_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Search index service configuration.
///
/// The API key is never written back out; set it through
/// `OFFER_SYNC_SEARCH_INDEX__API_KEY` rather than the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchIndexSettings {
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub application_id: String,

    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub api_key: SecretString,

    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries inside a single call before the failure is surfaced
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_search_base_url() -> String {
    "http://localhost:7700".to_string()
}

fn default_index_name() -> String {
    "offers".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl Default for SearchIndexSettings {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            application_id: String::new(),
            api_key: empty_secret(),
            index_name: default_index_name(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Batch and window sizes for the drivers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingSettings {
    #[serde(default = "default_main_chunk_size")]
    pub main_chunk_size: usize,

    #[serde(default = "default_large_chunk_size")]
    pub venue_chunk_size: usize,

    #[serde(default = "default_large_chunk_size")]
    pub venue_provider_chunk_size: usize,

    #[serde(default = "default_large_chunk_size")]
    pub expired_chunk_size: usize,

    #[serde(default = "default_large_chunk_size")]
    pub full_resync_page_size: usize,

    /// Start of the expiration window, in days before now
    #[serde(default = "default_window_start_days")]
    pub expiration_window_start_days: i64,

    /// End of the expiration window, in days before now
    #[serde(default = "default_window_end_days")]
    pub expiration_window_end_days: i64,
}

fn default_main_chunk_size() -> usize {
    1000
}

fn default_large_chunk_size() -> usize {
    10_000
}

fn default_window_start_days() -> i64 {
    2
}

fn default_window_end_days() -> i64 {
    1
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            main_chunk_size: default_main_chunk_size(),
            venue_chunk_size: default_large_chunk_size(),
            venue_provider_chunk_size: default_large_chunk_size(),
            expired_chunk_size: default_large_chunk_size(),
            full_resync_page_size: default_large_chunk_size(),
            expiration_window_start_days: default_window_start_days(),
            expiration_window_end_days: default_window_end_days(),
        }
    }
}

/// Provider worker admission control
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Maximum concurrently running provider workers
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Sleep between admission checks when the pool is full
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    #[serde(default)]
    pub runner: RunnerKind,
}

fn default_pool_size() -> usize {
    5
}

fn default_backoff_secs() -> u64 {
    60
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            backoff_secs: default_backoff_secs(),
            runner: RunnerKind::default(),
        }
    }
}

/// Cron expressions (6 fields, with seconds). `None` disables a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_event_drain_cron")]
    pub event_drain: Option<String>,

    #[serde(default = "default_venue_resync_cron")]
    pub venue_resync: Option<String>,

    #[serde(default = "default_dispatch_cron")]
    pub dispatch: Option<String>,

    #[serde(default = "default_expiration_sweep_cron")]
    pub expiration_sweep: Option<String>,

    #[serde(default = "default_error_retry_cron")]
    pub error_retry: Option<String>,

    /// Full rebuilds are expensive and off unless configured
    #[serde(default)]
    pub full_resync: Option<String>,

    /// IANA timezone the expressions are evaluated in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Maximum random delay added before each run
    #[serde(default)]
    pub jitter_secs: u64,
}

fn default_event_drain_cron() -> Option<String> {
    Some("0 * * * * *".to_string())
}

fn default_venue_resync_cron() -> Option<String> {
    Some("0 */10 * * * *".to_string())
}

fn default_dispatch_cron() -> Option<String> {
    Some("0 */10 * * * *".to_string())
}

fn default_expiration_sweep_cron() -> Option<String> {
    Some("0 0 2 * * *".to_string())
}

fn default_error_retry_cron() -> Option<String> {
    Some("0 */10 * * * *".to_string())
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            event_drain: default_event_drain_cron(),
            venue_resync: default_venue_resync_cron(),
            dispatch: default_dispatch_cron(),
            expiration_sweep: default_expiration_sweep_cron(),
            error_retry: default_error_retry_cron(),
            full_resync: None,
            timezone: default_timezone(),
            jitter_secs: 0,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub queue_store: QueueStoreSettings,

    #[serde(default)]
    pub catalog: CatalogSettings,

    #[serde(default)]
    pub search_index: SearchIndexSettings,

    #[serde(default)]
    pub indexing: IndexingSettings,

    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue_store: QueueStoreSettings::default(),
            catalog: CatalogSettings::default(),
            search_index: SearchIndexSettings::default(),
            indexing: IndexingSettings::default(),
            dispatcher: DispatcherSettings::default(),
            schedule: ScheduleSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered configuration.
    ///
    /// Precedence (lowest to highest):
    /// 1. Built-in defaults
    /// 2. ~/.config/offer-sync/config.toml
    /// 3. The file given with `--config`
    /// 4. Environment variables (OFFER_SYNC_*)
    ///
    /// CLI flags are applied by the caller on the returned value.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SyncError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("OFFER_SYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        let sizes = [
            ("indexing.main_chunk_size", self.indexing.main_chunk_size),
            ("indexing.venue_chunk_size", self.indexing.venue_chunk_size),
            (
                "indexing.venue_provider_chunk_size",
                self.indexing.venue_provider_chunk_size,
            ),
            ("indexing.expired_chunk_size", self.indexing.expired_chunk_size),
            (
                "indexing.full_resync_page_size",
                self.indexing.full_resync_page_size,
            ),
            ("dispatcher.pool_size", self.dispatcher.pool_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(SyncError::Config(format!("{name} must be > 0")));
            }
        }

        if self.indexing.expiration_window_start_days <= self.indexing.expiration_window_end_days {
            return Err(SyncError::Config(format!(
                "expiration window start ({} days ago) must be before its end ({} days ago)",
                self.indexing.expiration_window_start_days,
                self.indexing.expiration_window_end_days
            )));
        }

        match self.queue_store.backend {
            QueueBackend::Postgres if self.queue_store.database_url.is_none() => {
                return Err(SyncError::Config(
                    "queue_store.database_url is required for the postgres backend".to_string(),
                ));
            }
            QueueBackend::Rocksdb if self.dispatcher.runner == RunnerKind::Process => {
                return Err(SyncError::Config(
                    "dispatcher.runner = process requires queue_store.backend = postgres"
                        .to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Expand ~ in the queue store path to the home directory
    pub fn expanded_queue_store_path(&self) -> PathBuf {
        if let Some(rest) = self.queue_store.path.strip_prefix("~/") {
            if let Some(base) = directories::BaseDirs::new() {
                return base.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.queue_store.path)
    }

    /// Directory for the PID file and other runtime state
    pub fn runtime_dir() -> PathBuf {
        ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.data_local_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
