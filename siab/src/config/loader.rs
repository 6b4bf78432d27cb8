//! Layered configuration loader.

use super::SiabConfig;
use crate::errors::ConfigError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of recognised environment keys.
pub const ENV_PREFIX: &str = "SIAB_";

/// File read when no `--config` is given, if it exists.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/siab/siab.env";

/// Builds a [`SiabConfig`] from defaults, a file and the environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    file_required: bool,
    process_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from(DEFAULT_CONFIG_FILE)),
            file_required: false,
            process_env: true,
        }
    }
}

impl ConfigLoader {
    /// Creates a loader reading the default file (if present) and the environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `path` instead of the default file; the file must exist.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self.file_required = true;
        self
    }

    /// Skips the configuration file entirely.
    #[must_use]
    pub fn without_file(mut self) -> Self {
        self.file = None;
        self.file_required = false;
        self
    }

    /// Ignores the process environment.
    #[must_use]
    pub fn without_process_env(mut self) -> Self {
        self.process_env = false;
        self
    }

    /// Loads the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a required file cannot be read or any value is
    /// malformed.
    pub fn load(&self) -> Result<SiabConfig, ConfigError> {
        let mut config = SiabConfig::default();

        if let Some(path) = &self.file {
            if path.exists() {
                let pairs = read_env_file(path)?;
                debug!(path = %path.display(), keys = pairs.len(), "Loaded config file");
                apply_pairs(&mut config, pairs)?;
            } else if self.file_required {
                return Err(ConfigError::File {
                    path: path.display().to_string(),
                    reason: "file does not exist".to_string(),
                });
            }
        }

        if self.process_env {
            let pairs: Vec<(String, String)> = std::env::vars()
                .filter(|(key, _)| key.starts_with(ENV_PREFIX))
                .collect();
            apply_pairs(&mut config, pairs)?;
        }

        Ok(config)
    }
}

fn read_env_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let file_error = |reason: String| ConfigError::File {
        path: path.display().to_string(),
        reason,
    };

    dotenvy::from_path_iter(path)
        .map_err(|e| file_error(e.to_string()))?
        .map(|item| item.map_err(|e| file_error(e.to_string())))
        .collect()
}

/// Applies `KEY=VALUE` pairs on top of `config`.
///
/// Keys without the `SIAB_` prefix are ignored; unrecognised `SIAB_*` keys
/// are kept in [`SiabConfig::env_overrides`].
///
/// # Errors
///
/// Returns an error on the first malformed value.
pub fn apply_pairs<I>(config: &mut SiabConfig, pairs: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut single_node = false;

    for (key, value) in pairs {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let value = value.trim().to_string();

        match name {
            "DOMAIN" => {
                if value.is_empty() || value.contains(char::is_whitespace) {
                    return Err(ConfigError::invalid(&key, &value, "expected a DNS domain"));
                }
                config.domain = value;
            }
            "MIN_CPUS" => config.sizing.min_cpus = parse_number(&key, &value)?,
            "MIN_MEMORY_GB" => config.sizing.min_memory_gb = parse_number(&key, &value)?,
            "MIN_DISK_GB" => config.sizing.min_disk_gb = parse_number(&key, &value)?,
            "LONGHORN_REPLICAS" => config.sizing.longhorn_replicas = parse_number(&key, &value)?,
            "METALLB_RANGE" => config.sizing.metallb_range = value,
            "SKIP_MONITORING" => config.toggles.skip_monitoring = parse_bool(&key, &value)?,
            "SKIP_STORAGE" => config.toggles.skip_storage = parse_bool(&key, &value)?,
            "SKIP_OBJECT_STORAGE" => config.toggles.skip_object_storage = parse_bool(&key, &value)?,
            "SKIP_SECURITY_SCANNING" => {
                config.toggles.skip_security_scanning = parse_bool(&key, &value)?;
            }
            "SKIP_POLICY" => config.toggles.skip_policy = parse_bool(&key, &value)?,
            "SINGLE_NODE" => single_node = parse_bool(&key, &value)?,
            "MANAGEMENT_PORT" => config.management_port = parse_number(&key, &value)?,
            "STATE_DIR" => config.state_dir = PathBuf::from(value),
            "DATA_DIR" => config.data_dir = PathBuf::from(value),
            "PROBE_TIMEOUT_SECS" => config.timeouts.probe_secs = parse_number(&key, &value)?,
            "READY_TIMEOUT_SECS" => config.timeouts.ready_secs = parse_number(&key, &value)?,
            "DELETE_TIMEOUT_SECS" => config.timeouts.delete_secs = parse_number(&key, &value)?,
            _ => {
                config.env_overrides.insert(key, value);
            }
        }
    }

    // Applied last so explicit sizing keys cannot undo the single-node caps.
    if single_node {
        config.apply_single_node();
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(key, value, "expected a non-negative integer"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected true/false")),
    }
}
