//! `baitline.toml` loading, environment overrides and validation.

use baitline_core::{BaitlineError, BaitlineResult, DEFAULT_PER_CATEGORY_CAP};
use baitline_engine::{CallbackConfig, MonitorConfig, SaturationThresholds};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Overrides `[security] api_keys` with a single key.
pub const ENV_API_KEY: &str = "BAITLINE_API_KEY";
/// Overrides `[callback] url`.
pub const ENV_CALLBACK_URL: &str = "BAITLINE_CALLBACK_URL";

#[derive(Debug, Default, Deserialize)]
pub struct BaitlineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub saturation: SaturationThresholds,
    #[serde(default)]
    pub intelligence: IntelligenceConfig,
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which durable store backs the sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IntelligenceConfig {
    #[serde(default = "default_per_category_cap")]
    pub per_category_cap: usize,
}

impl Default for IntelligenceConfig {
    fn default() -> Self {
        Self {
            per_category_cap: default_per_category_cap(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CollaboratorConfig {
    /// Budget for each classifier, responder and extractor call.
    #[serde(default = "default_collaborator_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_collaborator_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_keys: vec![],
            rate_limit_per_minute: default_rate_limit_per_minute(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_true() -> bool {
    true
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_per_category_cap() -> usize {
    DEFAULT_PER_CATEGORY_CAP
}
fn default_collaborator_timeout_secs() -> u64 {
    30
}
fn default_rate_limit_per_minute() -> u32 {
    100
}

impl BaitlineConfig {
    /// Parse a config document.
    pub fn from_toml_str(raw: &str) -> BaitlineResult<Self> {
        toml::from_str(raw).map_err(|e| BaitlineError::Config(e.to_string()))
    }

    /// Read `path`; a missing file means all defaults.
    pub async fn load(path: &Path) -> BaitlineResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(BaitlineError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))),
        }
    }

    /// Apply `BAITLINE_*` overrides looked up through `var`.
    pub fn apply_env_with(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var(ENV_API_KEY).filter(|k| !k.is_empty()) {
            self.security.api_keys = vec![key];
        }
        if let Some(url) = var(ENV_CALLBACK_URL).filter(|u| !u.is_empty()) {
            self.callback.url = url;
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|k| std::env::var(k).ok());
    }

    /// Reject settings the service cannot run with.
    ///
    /// `delivering` is set for commands that send final results.
    pub fn validate(&self, delivering: bool) -> BaitlineResult<()> {
        let invalid = |msg: String| Err(BaitlineError::Config(msg));

        if delivering {
            let url = self.callback.url.trim();
            if url.is_empty() {
                return invalid(format!(
                    "[callback] url is required (or set {ENV_CALLBACK_URL})"
                ));
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return invalid(format!("[callback] url must be http(s), got '{url}'"));
            }
        }
        if self.callback.timeout_secs == 0 {
            return invalid("[callback] timeout_secs must be positive".into());
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return invalid("[cache] capacity must be positive".into());
        }
        if self.monitor.interval_secs == 0 || self.monitor.batch_limit == 0 {
            return invalid("[monitor] interval_secs and batch_limit must be positive".into());
        }
        if self.saturation.max_messages == 0 {
            return invalid("[saturation] max_messages must be positive".into());
        }
        if self.intelligence.per_category_cap == 0 {
            return invalid("[intelligence] per_category_cap must be positive".into());
        }
        if self.collaborators.timeout_secs == 0 {
            return invalid("[collaborators] timeout_secs must be positive".into());
        }
        if self.store.backend == StoreBackend::Sqlite && !cfg!(feature = "sqlite") {
            return invalid("[store] backend 'sqlite' needs the sqlite feature".into());
        }
        Ok(())
    }
}
