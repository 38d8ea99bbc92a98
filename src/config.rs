use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use couchmigrate_core::{redact, Timeouts};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Per-request timeout overrides, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub probe: Option<u64>,
    pub metadata: Option<u64>,
    pub delete: Option<u64>,
    pub document: Option<u64>,
    pub bulk: Option<u64>,
    pub script_backup: Option<u64>,
    pub script_restore: Option<u64>,
}

impl TimeoutConfig {
    /// HTTP timeouts with overrides applied on top of the defaults
    pub fn http(&self) -> Timeouts {
        let defaults = Timeouts::default();
        let pick = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_secs).unwrap_or(default)
        };
        Timeouts {
            probe: pick(self.probe, defaults.probe),
            metadata: pick(self.metadata, defaults.metadata),
            delete: pick(self.delete, defaults.delete),
            document: pick(self.document, defaults.document),
            bulk: pick(self.bulk, defaults.bulk),
        }
    }

    /// Script timeouts as (backup, restore)
    pub fn script(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.script_backup.unwrap_or(5 * 60)),
            Duration::from_secs(self.script_restore.unwrap_or(10 * 60)),
        )
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Server backups are taken from
    pub source_url: ConfigValue<Option<String>>,
    /// Server backups are restored into
    pub target_url: ConfigValue<Option<String>>,
    /// Root directory for backup artifacts
    pub backup_dir: ConfigValue<PathBuf>,
    /// Legacy backup script used when the HTTP path fails
    pub script_path: ConfigValue<Option<PathBuf>>,
    pub timeouts: TimeoutConfig,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    source_url: Option<String>,
    target_url: Option<String>,
    backup_dir: Option<PathBuf>,
    script_path: Option<PathBuf>,
    timeouts: Option<TimeoutConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`], reading environment variables through `env`
    pub fn load_with_env(
        config_path: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut source_url = ConfigValue::new(None, ConfigSource::Default);
        let mut target_url = ConfigValue::new(None, ConfigSource::Default);
        let mut backup_dir = ConfigValue::new(Self::default_backup_dir(), ConfigSource::Default);
        let mut script_path = ConfigValue::new(None, ConfigSource::Default);
        let mut timeouts = TimeoutConfig::default();
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            // Resolve relative paths against config file's directory
            let resolve = |p: PathBuf| {
                if p.is_relative() {
                    path.parent().map(|dir| dir.join(&p)).unwrap_or(p)
                } else {
                    p
                }
            };

            if let Some(url) = file_config.source_url {
                source_url = ConfigValue::new(Some(url), ConfigSource::File);
            }
            if let Some(url) = file_config.target_url {
                target_url = ConfigValue::new(Some(url), ConfigSource::File);
            }
            if let Some(dir) = file_config.backup_dir {
                backup_dir = ConfigValue::new(resolve(dir), ConfigSource::File);
            }
            if let Some(script) = file_config.script_path {
                script_path = ConfigValue::new(Some(resolve(script)), ConfigSource::File);
            }
            if let Some(file_timeouts) = file_config.timeouts {
                timeouts = file_timeouts;
            }
        }

        // Apply environment variable overrides
        if let Some(url) = env("SOURCE_COUCHDB_URL") {
            source_url = ConfigValue::new(Some(url), ConfigSource::Environment);
        }
        if let Some(url) = env("TARGET_COUCHDB_URL") {
            target_url = ConfigValue::new(Some(url), ConfigSource::Environment);
        }
        if let Some(dir) = env("COUCHMIGRATE_BACKUP_DIR") {
            backup_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Some(script) = env("COUCHMIGRATE_SCRIPT") {
            script_path = ConfigValue::new(Some(PathBuf::from(script)), ConfigSource::Environment);
        }

        Ok(Self {
            source_url,
            target_url,
            backup_dir,
            script_path,
            timeouts,
            config_file,
        })
    }

    /// The URL for a server, or an error naming how to configure it
    pub fn server_url(&self, server: Server) -> Result<&str, ConfigError> {
        let value = match server {
            Server::Source => &self.source_url,
            Server::Target => &self.target_url,
        };
        value
            .value
            .as_deref()
            .ok_or(ConfigError::MissingUrl(server))
    }

    /// A copy safe to print: passwords in URLs are masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.source_url.value = config.source_url.value.as_deref().map(redact);
        config.target_url.value = config.target_url.value.as_deref().map(redact);
        config
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/couchmigrate/
    /// - macOS: ~/Library/Application Support/couchmigrate/
    /// - Windows: %APPDATA%/couchmigrate/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("couchmigrate")
    }

    /// Default backup directory: platform data dir + couchmigrate/backups
    pub fn default_backup_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("couchmigrate")
            .join("backups")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

/// Which configured server an operation talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Server {
    Source,
    Target,
}

impl Server {
    pub fn env_var(&self) -> &'static str {
        match self {
            Server::Source => "SOURCE_COUCHDB_URL",
            Server::Target => "TARGET_COUCHDB_URL",
        }
    }
}

impl std::fmt::Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Server::Source => write!(f, "source"),
            Server::Target => write!(f, "target"),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    MissingUrl(Server),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingUrl(server) => write!(
                f,
                "No {} server configured. Set {} or add {}_url to the config file",
                server,
                server.env_var(),
                server
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
