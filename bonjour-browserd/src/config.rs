use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};
use shared::protocol::{
    BROWSER_TYPE_BONJOUR_WITH_TXT, DEFAULT_DOMAIN, DEFAULT_SERVICE_TYPE, LOG_FILE_NAME,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub presenter: PresenterConfig,
}

/// How results are requested from the discovery daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Descriptor {
    /// Instance presence and address only
    Bonjour,
    /// Also keep the advertised TXT record
    BonjourWithTxtRecord,
}

impl Descriptor {
    /// Pick the descriptor from the `BROWSER_TYPE` value, if set.
    /// "bonjourWithTXTRecord" selects TXT records, any other value plain browsing.
    pub fn resolve(configured: Descriptor, env_value: Option<&str>) -> Descriptor {
        match env_value {
            Some(BROWSER_TYPE_BONJOUR_WITH_TXT) => Descriptor::BonjourWithTxtRecord,
            Some(_) => Descriptor::Bonjour,
            None => configured,
        }
    }

    pub fn includes_txt(&self) -> bool {
        matches!(self, Descriptor::BonjourWithTxtRecord)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_descriptor")]
    pub descriptor: Descriptor,
    /// Restrict mDNS to a single interface
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_max_browse_attempts")]
    pub max_browse_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

fn default_descriptor() -> Descriptor {
    Descriptor::BonjourWithTxtRecord
}

fn default_retry_interval() -> u64 {
    5
}

fn default_max_browse_attempts() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    "127.0.0.1:8054".to_string()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            domain: default_domain(),
            descriptor: default_descriptor(),
            interface: None,
            retry_interval_secs: default_retry_interval(),
            max_browse_attempts: default_max_browse_attempts(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl LogConfig {
    /// Configured path, else the per-user data directory, else the working directory
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("bonjour-browser").join(LOG_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(LOG_FILE_NAME))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_listen(),
        }
    }
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Like `load`, but a missing file yields the defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Self::load(path)
    }
}
