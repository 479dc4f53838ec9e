use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::{
    warehouse::{ConnectorOptions, SNOWFLAKE_SOURCE_NAME},
    Result, SnowcheckError,
};

/// Environment variable naming the harness config file.
pub const CONFIG_ENV_VAR: &str = "SNOWCHECK_CONFIG";

/// Connector options every harness config must carry.
pub const REQUIRED_OPTIONS: [&str; 4] = ["sfURL", "sfUser", "sfDatabase", "sfSchema"];

// Config file structures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub version: u32,
    /// Connector options passed to every read and write.
    pub options: BTreeMap<String, String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
}

fn default_format() -> String {
    SNOWFLAKE_SOURCE_NAME.to_string()
}

fn default_table_prefix() -> String {
    "test_table_".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl HarnessConfig {
    /// Load a YAML or JSON config file (by extension) and substitute
    /// `${VAR}` references from the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SnowcheckError::Configuration(format!(
                "cannot read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        let mut config: HarnessConfig = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.substitute_env()?;
        config.validate()?;
        info!("Loaded harness config from {}", path.display());
        Ok(config)
    }

    /// Load the config file named by `SNOWCHECK_CONFIG`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV_VAR).map_err(|_| {
            SnowcheckError::Configuration(format!(
                "Environment variable '{}' not found",
                CONFIG_ENV_VAR
            ))
        })?;
        Self::from_file(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(SnowcheckError::Configuration(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        let missing: Vec<&str> = REQUIRED_OPTIONS
            .iter()
            .copied()
            .filter(|key| self.options.get(*key).map_or(true, |v| v.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(SnowcheckError::Configuration(format!(
                "missing connector options: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    pub fn connector_options(&self) -> ConnectorOptions {
        ConnectorOptions::from(self.options.clone())
    }

    /// Account name, the first label of the `sfURL` host.
    pub fn account(&self) -> Result<String> {
        let raw = self
            .options
            .get("sfURL")
            .ok_or_else(|| SnowcheckError::Configuration("sfURL is not set".to_string()))?;

        let with_scheme = if raw.contains("://") {
            raw.clone()
        } else {
            format!("https://{}", raw)
        };
        let url = Url::parse(&with_scheme).map_err(|e| {
            SnowcheckError::Configuration(format!("Invalid sfURL '{}': {}", raw, e))
        })?;

        url.host_str()
            .and_then(|host| host.split('.').next())
            .filter(|account| !account.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                SnowcheckError::Configuration(format!("sfURL '{}' has no account host", raw))
            })
    }

    fn substitute_env(&mut self) -> Result<()> {
        for value in self.options.values_mut() {
            *value = substitute_env_vars(value)?;
        }
        self.format = substitute_env_vars(&self.format)?;
        self.table_prefix = substitute_env_vars(&self.table_prefix)?;
        Ok(())
    }
}

/// Substitute environment variable patterns like ${VAR_NAME} in strings
fn substitute_env_vars(input: &str) -> Result<String> {
    let env_var_pattern = Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| SnowcheckError::Configuration(e.to_string()))?;
    let mut result = input.to_string();

    for caps in env_var_pattern.captures_iter(input) {
        let var_name = &caps[1];
        let env_value = std::env::var(var_name).map_err(|_| {
            SnowcheckError::Configuration(format!(
                "Environment variable '{}' not found",
                var_name
            ))
        })?;
        result = result.replace(&caps[0], &env_value);
    }

    Ok(result)
}

/// Install a fmt subscriber at `level`; `RUST_LOG` takes precedence.
/// Later calls are ignored, so every test may call this.
pub fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err("Invalid log level. Valid values: debug, info, warn, error"),
        }
    }
}
