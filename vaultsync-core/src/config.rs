//! Application configuration: `~/.vaultsync/config.yaml`.
//!
//! Every section has serde defaults, so a minimal file only needs the source
//! credentials and the vault path. Secrets may instead come from the
//! environment (see [`AppConfig::apply_env_overrides`]).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::document::FilePolicy;
use crate::error::ConfigError;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "VAULTSYNC_CONFIG";
pub const API_TOKEN_ENV: &str = "VAULTSYNC_API_TOKEN";
pub const DATABASE_ID_ENV: &str = "VAULTSYNC_DATABASE_ID";
pub const VAULT_PATH_ENV: &str = "VAULTSYNC_VAULT_PATH";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub api_token: String,
    pub database_id: String,
    pub base_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
    pub page_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            database_id: String::new(),
            base_url: "https://api.notion.com/v1".to_string(),
            api_version: "2022-06-28".to_string(),
            timeout_secs: 30,
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub vault_path: PathBuf,
    /// Optional folder inside the vault that receives synced documents.
    pub subfolder: Option<String>,
}

impl DestinationConfig {
    /// Directory documents are written to.
    pub fn sync_path(&self) -> PathBuf {
        match self.subfolder.as_deref().map(str::trim) {
            Some(sub) if !sub.is_empty() => self.vault_path.join(sub),
            _ => self.vault_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 3.0,
            burst: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// What the converter does with block types it cannot render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedPolicy {
    /// Drop the block silently (still counted in statistics).
    Skip,
    /// Emit an HTML comment naming the block type.
    #[default]
    Placeholder,
    /// Drop the block and add a conversion warning.
    Warning,
}

/// How links to pages known to the vault are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalLinkMode {
    /// `[[Note]]` / `[[Note|label]]`
    #[default]
    Obsidian,
    /// `[label](Note.md)`
    Markdown,
    /// Keep the upstream URL.
    NotionUrl,
}

/// How links to pages outside the vault are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokenLinkMode {
    /// `~~label~~ (broken link)`
    #[default]
    Placeholder,
    /// The label followed by an HTML comment with the reason.
    Comment,
    TextOnly,
    OriginalUrl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tera pattern for filenames; `title`, `id` and `date` are in scope.
    pub file_naming: String,
    /// Directory of `.tera` files overriding the embedded page template.
    pub template_dir: Option<PathBuf>,
    pub include_properties: bool,
    pub overwrite_existing: bool,
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Pre-flight aborts when more duplicate-name conflicts than this are
    /// projected.
    pub max_conflicts: usize,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub cache_path: Option<PathBuf>,
    pub cache_max_age_days: i64,
    pub backup_retention: usize,
    pub unsupported_blocks: UnsupportedPolicy,
    pub internal_links: InternalLinkMode,
    pub broken_links: BrokenLinkMode,
    pub max_file_size_mb: f64,
    pub max_line_length: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            file_naming: "{{ title }}".to_string(),
            template_dir: None,
            include_properties: true,
            overwrite_existing: true,
            batch_size: 10,
            max_concurrency: 5,
            max_conflicts: 5,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            cache_path: None,
            cache_max_age_days: 30,
            backup_retention: 3,
            unsupported_blocks: UnsupportedPolicy::default(),
            internal_links: InternalLinkMode::default(),
            broken_links: BrokenLinkMode::default(),
            max_file_size_mb: 10.0,
            max_line_length: 1000,
        }
    }
}

impl SyncConfig {
    pub fn file_policy(&self) -> FilePolicy {
        FilePolicy {
            max_file_size_bytes: (self.max_file_size_mb * 1024.0 * 1024.0) as u64,
            max_line_length: self.max_line_length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// `~/.vaultsync` rooted at `home`.
pub fn base_dir_at(home: &Path) -> PathBuf {
    home.join(".vaultsync")
}

/// `~/.vaultsync/config.yaml` rooted at `home`.
pub fn config_path_at(home: &Path) -> PathBuf {
    base_dir_at(home).join("config.yaml")
}

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

impl AppConfig {
    /// Load and parse the YAML config at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `~/.vaultsync/config.yaml` rooted at `home`.
    pub fn load_at(home: &Path) -> Result<Self, ConfigError> {
        Self::load_from(&config_path_at(home))
    }

    /// Resolve the config file: explicit path, then `$VAULTSYNC_CONFIG`, then
    /// the default under the home directory. Environment overrides are applied
    /// and the result is validated.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::resolve_path(explicit)?)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Which file [`resolve`](Self::resolve) reads.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        Ok(match explicit {
            Some(p) => p.to_path_buf(),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) => PathBuf::from(p),
                None => config_path_at(&home()?),
            },
        })
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Save atomically: `.yaml.tmp` sibling then rename.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ConfigError::Io { path, source }
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io(dir))?;
        }
        let yaml = self.to_yaml()?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml).map_err(io(&tmp))?;
        std::fs::rename(&tmp, path).map_err(io(path))?;
        Ok(())
    }

    /// Overlay secrets and paths from the environment. `lookup` is injected so
    /// tests do not mutate process state.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = non_empty(API_TOKEN_ENV) {
            self.source.api_token = token;
        }
        if let Some(id) = non_empty(DATABASE_ID_ENV) {
            self.source.database_id = id;
        }
        if let Some(path) = non_empty(VAULT_PATH_ENV) {
            self.destination.vault_path = PathBuf::from(path);
        }
    }

    /// Collect every problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.source.api_token.trim().is_empty() {
            errors.push(format!(
                "source.api_token is required (or set {API_TOKEN_ENV})"
            ));
        }
        if !is_valid_database_id(&self.source.database_id) {
            errors.push(format!(
                "source.database_id must be 32 hex characters, got '{}'",
                self.source.database_id
            ));
        }
        if self.source.page_size == 0 || self.source.page_size > 100 {
            errors.push("source.page_size must be between 1 and 100".to_string());
        }
        if self.destination.vault_path.as_os_str().is_empty() {
            errors.push("destination.vault_path is required".to_string());
        }

        let sync = &self.sync;
        if sync.file_naming.trim().is_empty() {
            errors.push("sync.file_naming must not be empty".to_string());
        }
        if sync.batch_size == 0 {
            errors.push("sync.batch_size must be positive".to_string());
        }
        if sync.max_concurrency == 0 {
            errors.push("sync.max_concurrency must be positive".to_string());
        }
        let rate = sync.rate_limit.requests_per_second;
        if rate.is_nan() || rate <= 0.0 {
            errors.push("sync.rate_limit.requests_per_second must be positive".to_string());
        }
        if sync.rate_limit.burst == 0 {
            errors.push("sync.rate_limit.burst must be at least 1".to_string());
        }
        if sync.retry.max_attempts == 0 {
            errors.push("sync.retry.max_attempts must be at least 1".to_string());
        }
        if sync.cache_max_age_days <= 0 {
            errors.push("sync.cache_max_age_days must be positive".to_string());
        }
        if !(sync.max_file_size_mb > 0.0 && sync.max_file_size_mb <= 100.0) {
            errors.push("sync.max_file_size_mb must be in (0, 100]".to_string());
        }
        if !(100..=10_000).contains(&sync.max_line_length) {
            errors.push("sync.max_line_length must be between 100 and 10000".to_string());
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            errors.push(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { errors })
        }
    }

    /// Default cache location for this database, rooted at `home`.
    pub fn cache_path_at(&self, home: &Path) -> PathBuf {
        self.sync.cache_path.clone().unwrap_or_else(|| {
            base_dir_at(home)
                .join("cache")
                .join(format!("{}.json", normalized_database_id(&self.source.database_id)))
        })
    }
}

/// Upstream ids are 32 hex digits, optionally hyphenated as a UUID.
pub fn is_valid_database_id(id: &str) -> bool {
    let compact = normalized_database_id(id);
    compact.len() == 32 && compact.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn normalized_database_id(id: &str) -> String {
    id.trim().replace('-', "").to_ascii_lowercase()
}
