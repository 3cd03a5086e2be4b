//! Runtime configuration.
//!
//! # Responsibility
//! - Define the TOML config shape with defaults for every section.
//! - Resolve platform directories for data, logs and the shared exchange dir.
//! - Apply `BLOCKSYNC_*` environment overrides on top of the file.

use directories::{BaseDirs, ProjectDirs};
use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.toml";
const SHARED_DIR_NAME: &str = "blocksync-exchange";

pub const ENV_DATA_DIR: &str = "BLOCKSYNC_DATA_DIR";
pub const ENV_SHARED_DIR: &str = "BLOCKSYNC_SHARED_DIR";
pub const ENV_LOG_LEVEL: &str = "BLOCKSYNC_LOG_LEVEL";
pub const ENV_REMOTE_DIR: &str = "BLOCKSYNC_REMOTE_DIR";

/// Smallest timer period handed to `tokio::time::interval`.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, message: String },
    Render(String),
    Write { path: PathBuf, source: std::io::Error },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => write!(f, "failed to read {}: {source}", path.display()),
            Self::Parse { path, message } => {
                write!(f, "failed to parse {}: {message}", path.display())
            }
            Self::Render(message) => write!(f, "failed to render config: {message}"),
            Self::Write { path, source } => {
                write!(f, "failed to write {}: {source}", path.display())
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => Some(source),
            Self::Parse { .. } | Self::Render(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub exchange: ExchangeConfig,
    pub logging: LoggingConfig,
    pub remote: RemoteConfig,
    pub relay: RelayConfig,
    pub importer: ImporterConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the SQLite database. Platform data dir when unset.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Directory shared with the external process.
    pub shared_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteBackend {
    #[default]
    None,
    LocalDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub backend: RemoteBackend,
    pub path: Option<PathBuf>,
    pub watch_interval_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::None,
            path: None,
            watch_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub max_retries: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ms: 250,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    pub poll_interval_ms: u64,
    pub read_attempts: u32,
    pub read_backoff_ms: u64,
    pub notice_repeat_limit: u32,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            read_attempts: 3,
            read_backoff_ms: 100,
            notice_repeat_limit: 3,
        }
    }
}

impl ImporterConfig {
    /// Poll period, never shorter than [`MIN_INTERVAL`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms).max(MIN_INTERVAL)
    }
}

impl RemoteConfig {
    /// Watch period, never shorter than [`MIN_INTERVAL`].
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms).max(MIN_INTERVAL)
    }
}

impl Config {
    /// Resolved database directory.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().to_path_buf()))
            .unwrap_or_else(|| PathBuf::from(".blocksync"))
    }

    /// Resolved shared exchange directory (`$HOME/.config/blocksync-exchange`).
    pub fn shared_dir(&self) -> PathBuf {
        self.exchange
            .shared_dir
            .clone()
            .or_else(|| {
                BaseDirs::new().map(|dirs| dirs.home_dir().join(".config").join(SHARED_DIR_NAME))
            })
            .unwrap_or_else(|| PathBuf::from(SHARED_DIR_NAME))
    }

    /// Resolved log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.logging
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("logs"))
    }

    pub fn log_level(&self) -> &str {
        self.logging
            .level
            .as_deref()
            .unwrap_or_else(|| crate::logging::default_log_level())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "blocksync", "blocksync")
}

/// Platform config file location.
pub fn config_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// Reads one config file. Missing file yields `Ok(None)`.
pub fn load_file(path: &Path) -> ConfigResult<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

/// Loads `path` (or the platform default) and applies env overrides.
pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let mut config = load_file(&path)?.unwrap_or_default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Like [`load`], but logs and falls back to defaults on failure.
pub fn load_or_default(path: Option<&Path>) -> Config {
    match load(path) {
        Ok(config) => config,
        Err(err) => {
            warn!("event=config_load module=config status=error error={err}");
            let mut config = Config::default();
            apply_env_overrides(&mut config, |key| std::env::var(key).ok());
            config
        }
    }
}

pub fn write_config(path: &Path, config: &Config) -> ConfigResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let contents =
        toml::to_string_pretty(config).map_err(|err| ConfigError::Render(err.to_string()))?;
    std::fs::write(path, contents).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Applies `BLOCKSYNC_*` overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(value) = non_empty(ENV_DATA_DIR) {
        config.storage.data_dir = Some(PathBuf::from(value));
    }
    if let Some(value) = non_empty(ENV_SHARED_DIR) {
        config.exchange.shared_dir = Some(PathBuf::from(value));
    }
    if let Some(value) = non_empty(ENV_LOG_LEVEL) {
        config.logging.level = Some(value);
    }
    if let Some(value) = non_empty(ENV_REMOTE_DIR) {
        config.remote.backend = RemoteBackend::LocalDir;
        config.remote.path = Some(PathBuf::from(value));
    }
}
