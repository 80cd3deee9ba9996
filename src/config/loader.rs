use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::schema::Config;
use crate::error::{ConfigError, Result};

const ENV_PREFIX: &str = "APIRATE_";

/// camelCase keys of the schema. Environment variables are upper case, so
/// these are matched ignoring case and underscores.
const CAMEL_CASE_FIELDS: &[&str] = &["shutdownGraceMs", "filePrefix"];

pub async fn load_from_env_or_file() -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    // User-level file first so the working directory wins.
    if let Some(dir) = user_config_dir() {
        figment = figment.merge(Toml::file(dir.join("apirate.toml")));
    }

    let config: Config = figment
        .merge(Toml::file("apirate.toml"))
        .merge(Json::file("apirate.json"))
        .merge(Yaml::file("apirate.yaml"))
        .merge(Yaml::file("apirate.yml"))
        .merge(env_provider())
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finish(config)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    load_path(path.as_ref())
}

fn load_path(path: &Path) -> Result<Config> {
    let base = Figment::from(Serialized::defaults(Config::default()));

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => base.merge(Toml::file(path)),
        Some("json") => base.merge(Json::file(path)),
        Some("yaml") | Some("yml") => base.merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    if !path.exists() {
        return Err(ConfigError::Parse(format!(
            "Configuration file not found: {}",
            path.display()
        ))
        .into());
    }

    let config: Config = figment
        .merge(env_provider())
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finish(config)
}

/// `APIRATE_SERVER__SHUTDOWN_GRACE_MS` and `APIRATE_SERVER__SHUTDOWNGRACEMS`
/// both land on `server.shutdownGraceMs`.
fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX)
        .map(|key| env_key_path(key.as_str()).into())
        .lowercase(false)
}

fn env_key_path(key: &str) -> String {
    key.split("__")
        .map(env_key_segment)
        .collect::<Vec<_>>()
        .join(".")
}

fn env_key_segment(segment: &str) -> String {
    let folded = segment.replace('_', "");
    if let Some(field) = CAMEL_CASE_FIELDS
        .iter()
        .find(|field| field.eq_ignore_ascii_case(&folded))
    {
        return (*field).to_string();
    }

    let mut out = String::with_capacity(segment.len());
    let mut upper_next = false;
    for c in segment.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

fn finish(config: Config) -> Result<Config> {
    validate(&config)?;
    apply_env_substitutions(config)
}

fn user_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("apirate"))
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.host.trim().is_empty() {
        return Err(ConfigError::MissingField("server.host".into()).into());
    }

    let mut seen = HashSet::new();
    for module in &config.modules {
        if module.name.trim().is_empty() {
            return Err(ConfigError::Validation("Module with empty name".into()).into());
        }
        if !seen.insert(module.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Module '{}' is listed more than once",
                module.name
            ))
            .into());
        }
        if let Some(priority) = module.priority {
            if !priority.is_finite() {
                return Err(ConfigError::Validation(format!(
                    "Module '{}' has a non-finite priority",
                    module.name
                ))
                .into());
            }
        }
    }

    for port in config.listeners.keys() {
        if port.parse::<u16>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Listener key '{port}' is not a valid port"
            ))
            .into());
        }
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    let re = env_pattern();

    for module in config.modules.iter_mut() {
        for value in module.options.values_mut() {
            substitute_value(&re, value)?;
        }
    }

    config.server.host = substitute_env_vars(&re, &config.server.host)?;

    Ok(config)
}

fn substitute_value(re: &Regex, value: &mut serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::String(s) => *s = substitute_env_vars(re, s)?,
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_value(re, item)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                substitute_value(re, item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn env_pattern() -> Regex {
    Regex::new(r"\$\{([^}]+)\}").expect("static pattern is valid")
}

fn substitute_env_vars(re: &Regex, input: &str) -> Result<String> {
    let mut result = input.to_string();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                // ${VAR:-default}
                if let Some((name, default)) = var_name.split_once(":-") {
                    match std::env::var(name) {
                        Ok(value) => result = result.replace(&cap[0], &value),
                        Err(_) => result = result.replace(&cap[0], default),
                    }
                } else {
                    return Err(ConfigError::EnvVar(format!(
                        "Environment variable '{var_name}' not found"
                    ))
                    .into());
                }
            }
        }
    }

    Ok(result)
}
