//! Read-only configuration view handed to modules
//!
//! Modules receive the configuration through the [`Configuration`] trait and
//! look values up by dotted key, e.g. `modules.line.port` or `server.host`.

use serde_json::{Map, Value};

use super::schema::Config;

pub trait Configuration: Send + Sync {
    fn get(&self, key: &str) -> Option<&Value>;

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    fn get_str_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Configuration for Value {
    fn get(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(self, |node, segment| node.as_object()?.get(segment))
    }
}

/// Snapshot of a loaded [`Config`] indexed for dotted lookups.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: Value,
}

impl ConfigStore {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut modules = Map::new();
        for module in &config.modules {
            let mut entry = module.options.clone();
            entry.insert("enabled".to_string(), Value::Bool(module.enabled));
            modules.insert(module.name.clone(), Value::Object(entry));
        }

        let mut root = Map::new();
        root.insert(
            "server".to_string(),
            serde_json::to_value(&config.server).unwrap_or(Value::Null),
        );
        root.insert("modules".to_string(), Value::Object(modules));
        root.insert(
            "listeners".to_string(),
            serde_json::to_value(&config.listeners).unwrap_or(Value::Null),
        );

        Self::new(Value::Object(root))
    }
}

impl Configuration for ConfigStore {
    fn get(&self, key: &str) -> Option<&Value> {
        Configuration::get(&self.root, key)
    }
}
