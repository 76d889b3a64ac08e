//! Layered configuration.
//!
//! Sources, later overriding earlier:
//! - built-in defaults
//! - `.mdpulse/settings.toml`, found by walking ancestors of the current
//!   directory
//! - `MDPULSE_`-prefixed environment variables, `__` separating nested
//!   levels (`MDPULSE_SERVER__BIND=0.0.0.0:7420` sets `server.bind`)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::client::{ReconnectPolicy, RefreshIntervals};

const CONFIG_DIR: &str = ".mdpulse";
const CONFIG_FILE: &str = "settings.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root (where `.mdpulse` lives). Detected when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Documentation directory, relative to the workspace root.
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,

    /// Task-file directory, relative to the workspace root.
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Bind address for the stream endpoint.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Heartbeat period in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClientConfig {
    /// Quiet period before a documents re-fetch, in milliseconds.
    #[serde(default = "default_documents_refresh_ms")]
    pub documents_refresh_ms: u64,

    /// Quiet period before a tasks re-fetch, in milliseconds.
    #[serde(default = "default_tasks_refresh_ms")]
    pub tasks_refresh_ms: u64,

    /// Quiet period before a directory-tree re-fetch, in milliseconds.
    #[serde(default = "default_tree_refresh_ms")]
    pub tree_refresh_ms: u64,

    /// Consecutive failed connection attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base reconnect delay in milliseconds; doubles per attempt.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level directive.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `"mdpulse::hub" = "debug"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_docs_dir() -> String {
    "docs".to_string()
}
fn default_tasks_dir() -> String {
    "tasks".to_string()
}
fn default_bind() -> String {
    "127.0.0.1:7420".to_string()
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_documents_refresh_ms() -> u64 {
    500
}
fn default_tasks_refresh_ms() -> u64 {
    500
}
fn default_tree_refresh_ms() -> u64 {
    800
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_base_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            docs_dir: default_docs_dir(),
            tasks_dir: default_tasks_dir(),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            documents_refresh_ms: default_documents_refresh_ms(),
            tasks_refresh_ms: default_tasks_refresh_ms(),
            tree_refresh_ms: default_tree_refresh_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_ms: default_reconnect_base_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("MDPULSE_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::detect_workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file (tests, `--config`).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MDPULSE_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Walk ancestors looking for `.mdpulse/settings.toml`.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }
        None
    }

    /// The directory containing `.mdpulse`, if any ancestor has one.
    pub fn detect_workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            if ancestor.join(CONFIG_DIR).is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }
        None
    }

    /// Effective workspace root: configured, detected, or the current
    /// directory.
    pub fn effective_workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .or_else(Self::detect_workspace_root)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn docs_root(&self) -> PathBuf {
        self.effective_workspace_root().join(&self.docs_dir)
    }

    pub fn tasks_root(&self) -> PathBuf {
        self.effective_workspace_root().join(&self.tasks_dir)
    }

    /// Candidate watch roots; the supervisor drops the ones that are
    /// missing on disk.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        vec![self.docs_root(), self.tasks_root()]
    }

    pub fn refresh_intervals(&self) -> RefreshIntervals {
        RefreshIntervals {
            documents: Duration::from_millis(self.client.documents_refresh_ms),
            tasks: Duration::from_millis(self.client.tasks_refresh_ms),
            tree: Duration::from_millis(self.client.tree_refresh_ms),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.client.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.client.reconnect_base_ms),
        }
    }

    /// Stream endpoint URL for a client talking to this server.
    pub fn events_url(&self) -> String {
        format!("http://{}/api/events", self.server.bind)
    }

    /// Save the configuration to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Create a default settings file in the current directory.
    pub fn init_config_file(force: bool) -> anyhow::Result<PathBuf> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            anyhow::bail!("configuration already exists at {} (use --force to overwrite)",
                config_path.display());
        }

        let mut settings = Settings::default();
        if let Ok(current_dir) = std::env::current_dir() {
            settings.workspace_root = Some(current_dir);
        }
        settings.save(&config_path)?;
        Ok(config_path)
    }
}
