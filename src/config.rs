//! Settings resolution and the persisted configuration file.
//!
//! Settings are merged from four layered sources, highest precedence first:
//! command-line flags, environment variables, `~/.config/llmq/config.toml`,
//! and built-in defaults. The `--cloud`/`--local` mode flags replace the
//! environment/file tiers of the host lookup with a fixed endpoint.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::Error;

pub const DEFAULT_LOCAL_HOST: &str = "http://localhost:11434";
pub const DEFAULT_CLOUD_HOST: &str = "https://ollama.com";
pub const DEFAULT_MODEL: &str = "llama3.1";
pub const DEFAULT_TIMEOUT_SECS: i64 = 60;

/// Credential for the cloud host, also sent to any host when present.
pub const API_KEY_ENV: &str = "OLLAMA_API_KEY";
pub const HOST_ENV: &str = "OLLAMA_HOST";
pub const MODEL_ENV: &str = "LLMQ_MODEL";

/// Resolved per-invocation settings. Built once, then read-only.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub model: String,
    /// Seconds. Non-positive values are accepted unvalidated and behave as
    /// an immediate deadline at request time.
    pub timeout: i64,
    pub api_key: Option<String>,
}

/// Flag-level overrides collected by the CLI layer.
///
/// `cloud` and `local` are mutually exclusive; clap enforces that before
/// this module ever sees them.
#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub model: Option<String>,
    pub timeout: Option<i64>,
    pub cloud: bool,
    pub local: bool,
}

/// Resolve settings from flags, environment, and the persisted config file.
///
/// Errors from a malformed config file propagate unchanged; a `--cloud`
/// request without a credential is rejected here.
pub fn resolve_settings(overrides: Overrides) -> Result<Settings, Error> {
    let env = EnvOverrides::from_env();
    let stored = load_config()?;
    let settings = merge(overrides, env, stored)?;
    debug!(host = %settings.host, model = %settings.model, timeout = settings.timeout, "resolved settings");
    Ok(settings)
}

/// Environment-variable tier of the lookup chain.
#[derive(Debug, Default)]
struct EnvOverrides {
    api_key: Option<String>,
    host: Option<String>,
    model: Option<String>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            api_key: env_var(API_KEY_ENV),
            host: env_var(HOST_ENV),
            model: env_var(MODEL_ENV),
        }
    }
}

/// A set-but-empty variable counts as absent, so it falls through to the
/// next tier instead of producing an empty host or model.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn merge(
    overrides: Overrides,
    env: EnvOverrides,
    stored: StoredConfig,
) -> Result<Settings, Error> {
    if overrides.cloud && env.api_key.is_none() {
        return Err(Error::config(format!(
            "{API_KEY_ENV} is required for --cloud. Set the environment variable and try again."
        )));
    }

    let default_host = if overrides.cloud {
        DEFAULT_CLOUD_HOST.to_string()
    } else if overrides.local {
        DEFAULT_LOCAL_HOST.to_string()
    } else {
        env.host
            .or(stored.host)
            .unwrap_or_else(|| DEFAULT_LOCAL_HOST.to_string())
    };

    Ok(Settings {
        host: overrides.host.unwrap_or(default_host),
        model: overrides
            .model
            .or(env.model)
            .or(stored.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        timeout: overrides
            .timeout
            .or(stored.timeout)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
        api_key: env.api_key,
    })
}

/// Contents of the persisted config file. Every key is optional.
#[derive(Debug, Default, PartialEq)]
pub struct StoredConfig {
    pub host: Option<String>,
    pub model: Option<String>,
    pub timeout: Option<i64>,
}

/// Path of the per-user config file.
pub fn config_path() -> Result<PathBuf, Error> {
    dirs::config_dir()
        .map(|dir| dir.join("llmq").join("config.toml"))
        .ok_or_else(|| Error::config("Could not determine config directory."))
}

/// Load the persisted config, or an empty one if the file does not exist.
pub fn load_config() -> Result<StoredConfig, Error> {
    load_config_from(&config_path()?)
}

fn load_config_from(path: &Path) -> Result<StoredConfig, Error> {
    if !path.exists() {
        return Ok(StoredConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|err| Error::config(format!("Invalid config file at {}: {err}", path.display())))?;
    let table: toml::Table = contents
        .parse()
        .map_err(|err| Error::config(format!("Invalid config file at {}: {err}", path.display())))?;
    debug!(path = %path.display(), "loaded config file");
    Ok(StoredConfig {
        host: string_key(&table, "host", path)?,
        model: string_key(&table, "model", path)?,
        timeout: integer_key(&table, "timeout", path)?,
    })
}

fn string_key(table: &toml::Table, key: &str, path: &Path) -> Result<Option<String>, Error> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(Error::config(format!(
            "Invalid config file at {}: '{key}' must be a string.",
            path.display()
        ))),
    }
}

fn integer_key(table: &toml::Table, key: &str, path: &Path) -> Result<Option<i64>, Error> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::Integer(value)) => Ok(Some(*value)),
        Some(_) => Err(Error::config(format!(
            "Invalid config file at {}: '{key}' must be an integer.",
            path.display()
        ))),
    }
}

/// On-disk shape of the config file; kept to exactly these three keys so the
/// document stays hand-editable.
#[derive(Debug, Serialize)]
struct PersistedConfig<'a> {
    host: &'a str,
    model: &'a str,
    timeout: i64,
}

/// Write the config file, creating parent directories as needed.
/// Returns the path it was written to.
pub fn write_config(host: &str, model: &str, timeout: i64) -> Result<PathBuf, Error> {
    let path = config_path()?;
    write_config_to(&path, host, model, timeout)?;
    Ok(path)
}

fn write_config_to(path: &Path, host: &str, model: &str, timeout: i64) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            Error::config(format!("Unable to write config file at {}: {err}", path.display()))
        })?;
    }
    let document = PersistedConfig { host, model, timeout };
    let contents = toml::to_string(&document).map_err(|err| {
        Error::config(format!("Unable to write config file at {}: {err}", path.display()))
    })?;
    std::fs::write(path, contents).map_err(|err| {
        Error::config(format!("Unable to write config file at {}: {err}", path.display()))
    })?;
    debug!(path = %path.display(), "wrote config file");
    Ok(())
}
