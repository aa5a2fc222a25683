use crate::paths;
use anyhow::{Context, Result};
use dataforge_core::{AgentSettings, EngineConfig, ExportFormat};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Prefix of environment overrides, e.g. `DATAFORGE_ENGINE__WORKER_COUNT=4`
pub const ENV_PREFIX: &str = "DATAFORGE_";

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub default_format: String,
    pub color_enabled: bool,
    pub progress_enabled: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_format: "text".to_string(),
            color_enabled: true,
            progress_enabled: true,
        }
    }
}

impl AppConfig {
    /// Apply CLI argument overrides to the configuration
    pub fn apply_cli_overrides(&mut self, workers: Option<usize>, data_dir: Option<PathBuf>) {
        if let Some(workers) = workers {
            self.engine.worker_count = workers;
        }
        if let Some(dir) = data_dir {
            self.engine.data_dir = dir;
        }
    }
}

/// Configuration manager that handles XDG-compliant paths and layered configuration
pub struct ConfigManager {
    config_path: PathBuf,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    /// Create a new ConfigManager with default XDG-compliant paths
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a ConfigManager with a specific path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn get_config_path(&self) -> PathBuf {
        self.config_path.clone()
    }

    fn default_config_path() -> PathBuf {
        #[cfg(not(target_os = "windows"))]
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
            && !xdg_config.is_empty()
        {
            return PathBuf::from(xdg_config).join("dataforge/config.toml");
        }

        paths::get_config_path()
    }

    /// Load configuration with layered priority: ENV > File > Defaults
    pub fn load(&self) -> Result<AppConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        if self.config_path.exists() {
            figment = figment.merge(Toml::file(&self.config_path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: AppConfig = figment.extract().context("Failed to load configuration")?;
        config
            .engine
            .validate()
            .context("Invalid engine configuration")?;
        Ok(config)
    }

    /// Write a configuration file holding every default value
    ///
    /// Returns `false` without touching the file when one already exists and
    /// `force` is not set.
    pub fn init(&self, force: bool) -> Result<bool> {
        if self.config_path.exists() && !force {
            return Ok(false);
        }
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(&AppConfig::default())?;
        fs::write(&self.config_path, contents).with_context(|| {
            format!("Failed to write {}", self.config_path.display())
        })?;
        Ok(true)
    }

    /// Get a configuration value by key (dot notation)
    pub fn get(&self, key: &str) -> Result<String> {
        let config = self.load()?;
        let value: toml::Value = toml::from_str(&toml::to_string(&config)?)?;

        let mut current = &value;
        for part in key.split('.') {
            match current {
                toml::Value::Table(table) => {
                    current = table
                        .get(part)
                        .ok_or_else(|| anyhow::anyhow!("Key '{}' not found", key))?;
                }
                _ => anyhow::bail!("Invalid key path: {}", key),
            }
        }

        match current {
            toml::Value::String(s) => Ok(s.clone()),
            toml::Value::Integer(i) => Ok(i.to_string()),
            toml::Value::Float(f) => Ok(f.to_string()),
            toml::Value::Boolean(b) => Ok(b.to_string()),
            _ => anyhow::bail!("Value at '{}' is not a simple type", key),
        }
    }

    /// Set a configuration value by key (dot notation)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let parsed_value = self.validate_config_value(key, value)?;

        let mut config = if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path)?;
            toml::from_str(&content)?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        let parts: Vec<&str> = key.split('.').collect();
        let Some((last, parents)) = parts.split_last() else {
            anyhow::bail!("Empty key");
        };

        let mut current = &mut config;
        for part in parents {
            let toml::Value::Table(table) = current else {
                anyhow::bail!("Invalid key path: expected table at '{}'", part);
            };
            if !table.contains_key(*part) {
                table.insert(part.to_string(), toml::Value::Table(toml::map::Map::new()));
            }
            current = table
                .get_mut(*part)
                .ok_or_else(|| anyhow::anyhow!("Invalid key path: {}", key))?;
        }
        let toml::Value::Table(table) = current else {
            anyhow::bail!("Cannot set value on non-table");
        };
        table.insert(last.to_string(), parsed_value);

        // Reject files figment could not load back
        let candidate: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string(&toml::to_string(&config)?))
            .extract()
            .with_context(|| format!("Invalid value for {key}"))?;
        candidate
            .engine
            .validate()
            .with_context(|| format!("Invalid value for {key}"))?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.config_path, toml::to_string_pretty(&config)?)?;

        Ok(())
    }

    /// List all configuration values
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let config = self.load()?;
        let value: toml::Value = toml::from_str(&toml::to_string(&config)?)?;

        let mut items = Vec::new();
        Self::collect_values(&value, String::new(), &mut items);
        items.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(items)
    }

    fn collect_values(value: &toml::Value, prefix: String, items: &mut Vec<(String, String)>) {
        match value {
            toml::Value::Table(table) => {
                for (key, val) in table {
                    let new_prefix = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    Self::collect_values(val, new_prefix, items);
                }
            }
            // never echo secrets
            toml::Value::String(_) if prefix == "agent.api_key" => {
                items.push((prefix, "********".to_string()))
            }
            toml::Value::String(s) => items.push((prefix, s.clone())),
            toml::Value::Integer(i) => items.push((prefix, i.to_string())),
            toml::Value::Float(f) => items.push((prefix, f.to_string())),
            toml::Value::Boolean(b) => items.push((prefix, b.to_string())),
            _ => {}
        }
    }

    /// Validate a value for `key` and convert it to its TOML type
    fn validate_config_value(&self, key: &str, value: &str) -> Result<toml::Value> {
        let positive = |name: &str| -> Result<toml::Value> {
            let n: i64 = value
                .parse()
                .with_context(|| format!("{name} must be a positive integer"))?;
            if n <= 0 {
                anyhow::bail!("{name} must be greater than 0");
            }
            Ok(toml::Value::Integer(n))
        };

        match key {
            "engine.worker_count"
            | "engine.queue_capacity"
            | "engine.upload_idle_timeout_secs"
            | "engine.reaper_interval_secs"
            | "engine.chunk_threshold_bytes"
            | "engine.spill_threshold_bytes"
            | "engine.progress_buffer"
            | "engine.stage_timeout_secs"
            | "engine.preview_rows" => positive(key.trim_start_matches("engine.")),
            "engine.storage_retry_attempts" | "engine.storage_retry_backoff_ms" => {
                let n: u32 = value
                    .parse()
                    .context("Value must be a non-negative integer")?;
                Ok(toml::Value::Integer(i64::from(n)))
            }
            "engine.output_format" => {
                let format: ExportFormat = value.parse()?;
                Ok(toml::Value::String(format.to_string()))
            }
            "engine.data_dir" => {
                if value.trim().is_empty() {
                    anyhow::bail!("data_dir must not be empty");
                }
                Ok(toml::Value::String(value.to_string()))
            }
            "agent.provider" => {
                if !dataforge_core::config::AGENT_PROVIDERS.contains(&value) {
                    anyhow::bail!(
                        "provider must be one of {}",
                        dataforge_core::config::AGENT_PROVIDERS.join(", ")
                    );
                }
                Ok(toml::Value::String(value.to_string()))
            }
            "agent.model" => {
                if value.trim().is_empty() {
                    anyhow::bail!("model must not be empty");
                }
                Ok(toml::Value::String(value.to_string()))
            }
            "agent.base_url" | "agent.api_key" => Ok(toml::Value::String(value.to_string())),
            "output.default_format" => match value {
                "text" | "json" => Ok(toml::Value::String(value.to_string())),
                _ => anyhow::bail!("default_format must be 'text' or 'json'"),
            },
            "output.color_enabled" | "output.progress_enabled" => {
                let b: bool = value.parse().context("Value must be 'true' or 'false'")?;
                Ok(toml::Value::Boolean(b))
            }
            _ => anyhow::bail!("Unknown configuration key: {key}"),
        }
    }
}

/// Load the configuration from the default location
pub fn get_config() -> Result<AppConfig> {
    ConfigManager::new().load()
}
