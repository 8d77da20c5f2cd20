use anyhow::{Context, Result};
use common::{JobKind, Tool};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_url")]
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_server_url() -> String { common::DEFAULT_SERVER_URL.to_string() }
fn default_timeout() -> u64 { 30_000 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            timeout_ms: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Check every job, terminal or not, when a collection is loaded.
    #[serde(default = "default_check_all_on_load")]
    pub check_all_on_load: bool,
}

fn default_interval() -> u64 { common::DEFAULT_POLL_INTERVAL_MS }
fn default_check_all_on_load() -> bool { true }

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            check_all_on_load: default_check_all_on_load(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: JobKind,
    #[serde(default)]
    pub tool: Tool,
}

fn default_kind() -> JobKind { JobKind::Optimization }

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            id: None,
            kind: default_kind(),
            tool: Tool::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Main log file; stderr when unset.
    pub output: Option<PathBuf>,
    /// File receiving server-reported task errors; stderr when unset.
    pub task_errors: Option<PathBuf>,
}

fn default_log_level() -> String { "warn".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: None,
            task_errors: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Detect file type by extension and load
    pub fn from_file(path: &Path) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "toml" => Self::from_toml_file(path),
            _ => Err(anyhow::anyhow!("Unsupported config file format. Use .yaml, .yml, or .toml")),
        }
    }

    /// Defaults, overlaid with the first config file that exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();
        if let Some(path) = explicit {
            config.merge(Self::from_file(path)?);
            return Ok(config);
        }
        for candidate in [expand_home(common::USER_CONFIG_PATH), PathBuf::from(common::DEFAULT_CONFIG_PATH)] {
            if candidate.exists() {
                log::debug!("Loading config from {:?}", candidate);
                config.merge(Self::from_file(&candidate)?);
                break;
            }
        }
        Ok(config)
    }

    /// Merge with another config, preferring values from other
    pub fn merge(&mut self, other: Config) {
        self.server.url = other.server.url;
        self.server.timeout_ms = other.server.timeout_ms;

        self.polling.interval_ms = other.polling.interval_ms;
        self.polling.check_all_on_load = other.polling.check_all_on_load;

        if other.project.id.is_some() {
            self.project.id = other.project.id;
        }
        self.project.kind = other.project.kind;
        self.project.tool = other.project.tool;

        self.logging.level = other.logging.level;
        if other.logging.output.is_some() {
            self.logging.output = other.logging.output;
        }
        if other.logging.task_errors.is_some() {
            self.logging.task_errors = other.logging.task_errors;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.timeout_ms)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
