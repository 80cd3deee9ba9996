use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::module::ModuleCategory;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Modules to load, in registration order.
    #[serde(default = "default_modules")]
    pub modules: Vec<ModuleConfig>,
    /// Per-port listener policy, keyed by port number.
    #[serde(default)]
    pub listeners: BTreeMap<String, ListenerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    /// Name of a registered module factory.
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the priority the module declares.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
    /// Module specific settings, exposed as `modules.<name>.<key>`.
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfig {
    /// Categories cloned for connections accepted on this port. Empty means all.
    #[serde(default)]
    pub categories: Vec<ModuleCategory>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
    /// Directory for rolling log files; console only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_grace() -> u64 {
    5000
}

pub(crate) fn default_enabled() -> bool {
    true
}

fn default_file_prefix() -> String {
    "apirate.log".to_string()
}

fn default_modules() -> Vec<ModuleConfig> {
    ["line", "command_parser", "guard", "echo", "renderer", "access_log"]
        .into_iter()
        .map(ModuleConfig::named)
        .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            directory: None,
            file_prefix: default_file_prefix(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            modules: default_modules(),
            listeners: BTreeMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ModuleConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            priority: None,
            options: serde_json::Map::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: serde_json::Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }
}

impl Config {
    /// Modules that should be instantiated, in registration order.
    pub fn enabled_modules(&self) -> impl Iterator<Item = &ModuleConfig> {
        self.modules.iter().filter(|m| m.enabled)
    }
}
