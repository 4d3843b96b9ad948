//! Configuration file discovery and loading.
//!
//! The discovery order is:
//! 1. An explicit path (the CLI `--config` flag).
//! 2. `MODELOPS_CONFIG` environment variable.
//! 3. `~/.modelops/config.json`
//! 4. If none found, an empty JSON object (`{}`), i.e. all defaults.
//!
//! JSON keys are normalized from camelCase to snake_case before the typed
//! [`Config`] is deserialized, except the keys of user-named maps
//! (`families`, `headers`, `extra`), which are kept verbatim.

use std::path::{Path, PathBuf};

use serde_json::Value;

use modelops_types::config::Config;
use modelops_types::{ModelOpsError, Result};

use crate::env::Environment;
use crate::fs::FileSystem;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MODELOPS_CONFIG";

/// Objects whose keys are user data rather than schema field names.
const VERBATIM_KEY_MAPS: &[&str] = &["families", "headers", "extra"];

/// Discover the config file path using the fallback chain.
///
/// Returns `None` if neither the environment variable is set nor the
/// default file exists.
pub fn discover_config_path(env: &dyn Environment, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(env_path) = env.get_var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(env_path));
    }

    let default_path = home_dir?.join(".modelops").join("config.json");
    default_path.exists().then_some(default_path)
}

/// Load, normalize, deserialize and validate the configuration.
///
/// An explicit `override_path` must exist. A discovered path that does not
/// exist falls back to defaults with a warning.
pub async fn load_config(
    fs: &dyn FileSystem,
    env: &dyn Environment,
    override_path: Option<&Path>,
) -> Result<Config> {
    let raw = match override_path {
        Some(path) => {
            if !fs.exists(path).await {
                return Err(ModelOpsError::ConfigInvalid {
                    reason: format!("config file not found: {}", path.display()),
                });
            }
            read_raw(fs, path).await?
        }
        None => match discover_config_path(env, fs.home_dir()) {
            None => {
                tracing::info!("no config file found, using defaults");
                Value::Object(serde_json::Map::new())
            }
            Some(path) if !fs.exists(&path).await => {
                tracing::warn!(
                    path = %path.display(),
                    "config path does not exist, using defaults"
                );
                Value::Object(serde_json::Map::new())
            }
            Some(path) => read_raw(fs, &path).await?,
        },
    };

    let config: Config = serde_json::from_value(raw)?;
    config.validate()?;
    Ok(config)
}

async fn read_raw(fs: &dyn FileSystem, path: &Path) -> Result<Value> {
    tracing::debug!(path = %path.display(), "loading config file");
    let contents = fs.read_to_string(path).await?;
    let value: Value = serde_json::from_str(&contents).map_err(|e| ModelOpsError::ConfigInvalid {
        reason: format!("failed to parse {}: {e}", path.display()),
    })?;
    Ok(normalize_keys(value))
}

/// Convert camelCase JSON keys to snake_case recursively.
///
/// The direct children of `families`, `headers` and `extra` objects keep
/// their spelling; their nested values are still normalized.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut new_map = serde_json::Map::new();
            for (key, val) in map {
                let snake_key = camel_to_snake(&key);
                let val = if VERBATIM_KEY_MAPS.contains(&snake_key.as_str()) {
                    normalize_values_only(val)
                } else {
                    normalize_keys(val)
                };
                new_map.insert(snake_key, val);
            }
            Value::Object(new_map)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

fn normalize_values_only(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| (key, normalize_keys(val)))
                .collect(),
        ),
        other => normalize_keys(other),
    }
}

/// Convert a single camelCase string to snake_case.
///
/// A run of uppercase letters (an acronym) stays together; an underscore
/// goes before the last uppercase letter of the run only when a lowercase
/// letter follows it.
///
/// # Examples
/// ```
/// # use modelops_platform::config_loader::camel_to_snake;
/// assert_eq!(camel_to_snake("minMap50"), "min_map50");
/// assert_eq!(camel_to_snake("pollIntervalSecs"), "poll_interval_secs");
/// assert_eq!(camel_to_snake("already_snake"), "already_snake");
/// assert_eq!(camel_to_snake("webhookURL"), "webhook_url");
/// assert_eq!(camel_to_snake("HTTPEndpoint"), "http_endpoint");
/// ```
pub fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut result = String::with_capacity(name.len() + 4);

    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();

            // camelCase boundary, or the end of an acronym ("HTTPEndpoint").
            if prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next.is_some_and(|c| c.is_lowercase()))
            {
                result.push('_');
            }
        }
        result.push(ch.to_ascii_lowercase());
    }
    result
}
