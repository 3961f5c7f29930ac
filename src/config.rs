//! Configuration loading using Figment.
//!
//! Settings are merged from a TOML file and environment variables prefixed
//! with `GATEHOUSE_` (double underscore separates nesting levels, e.g.
//! `GATEHOUSE_APPLICATION__LOG_LEVEL=debug`).
//!
//! A module entry only needs a `name` and a `file`; everything under its
//! `module_config` table is passed through to the module untouched. The
//! `level` field orders startup and shutdown: lower levels run first.
//!
//! ```toml
//! [application]
//! name = "gatehouse"
//! log_level = "info"
//!
//! [[modules]]
//! name = "door_led"
//! file = "led"
//! level = 10
//!
//! [modules.module_config]
//! default_blink_duration = 1000
//! default_blink_speed = 300
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Top-level platform configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application-wide settings.
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Message bus tuning knobs.
    #[serde(default)]
    pub bus: BusSettings,
    /// Directories scanned, in order, when resolving module files.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
    /// Modules to load at startup.
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name, used in logs only.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json).
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Capacity of the shared data-plane broadcast channel. Slow subscribers
    /// that fall further behind than this miss events.
    #[serde(default = "default_data_plane_capacity")]
    pub data_plane_capacity: usize,
    /// Capacity of each module's point-to-point command channel.
    #[serde(default = "default_endpoint_capacity")]
    pub endpoint_capacity: usize,
    /// How long a facade waits for a command reply before giving up.
    /// Omit (`command_timeout = ""` is invalid; leave the key out) to block
    /// forever, which matches the behavior of classic request/reply sockets.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Option<Duration>,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            data_plane_capacity: default_data_plane_capacity(),
            endpoint_capacity: default_endpoint_capacity(),
            command_timeout: default_command_timeout(),
        }
    }
}

/// One module entry from the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDefinition {
    /// Unique module name; doubles as the module's bus address.
    pub name: String,
    /// Library file name resolved against the search paths, or the name of a
    /// builtin module.
    pub file: String,
    /// Startup priority. Lower levels start first; shutdown follows the same
    /// order.
    #[serde(default = "default_level")]
    pub level: i64,
    /// Disabled modules stay in the configuration but are never loaded.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Opaque module-specific configuration subtree, passed through unparsed.
    #[serde(default = "default_module_config")]
    pub module_config: toml::Value,
}

impl ModuleDefinition {
    /// Creates a definition with default level and an empty config subtree.
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            level: default_level(),
            enabled: true,
            module_config: default_module_config(),
        }
    }

    /// Sets the startup priority.
    pub fn with_level(mut self, level: i64) -> Self {
        self.level = level;
        self
    }

    /// Sets the module-specific configuration subtree.
    pub fn with_config(mut self, config: toml::Value) -> Self {
        self.module_config = config;
        self
    }
}

fn default_app_name() -> String {
    "gatehouse".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_data_plane_capacity() -> usize {
    256
}

fn default_endpoint_capacity() -> usize {
    16
}

fn default_command_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

fn default_level() -> i64 {
    100
}

fn default_enabled() -> bool {
    true
}

fn default_module_config() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl Settings {
    /// Loads configuration from `gatehouse.toml` and the environment.
    pub fn load() -> CoreResult<Self> {
        Self::load_from("gatehouse.toml")
    }

    /// Loads configuration from a specific file path, with `GATEHOUSE_`
    /// environment variables taking precedence.
    pub fn load_from<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GATEHOUSE_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validates settings after loading.
    pub fn validate(&self) -> CoreResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(CoreError::Configuration(format!(
                "invalid log_level '{}'; must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(CoreError::Configuration(format!(
                "invalid log_format '{}'; must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let mut names = std::collections::HashSet::new();
        for module in &self.modules {
            if module.name.is_empty() {
                return Err(CoreError::Configuration(
                    "module with empty name".to_string(),
                ));
            }
            if module.file.is_empty() {
                return Err(CoreError::Configuration(format!(
                    "module '{}' has an empty file",
                    module.name
                )));
            }
            if !names.insert(&module.name) {
                return Err(CoreError::Configuration(format!(
                    "duplicate module name: {}",
                    module.name
                )));
            }
        }

        Ok(())
    }

    /// All modules that should actually be loaded.
    pub fn enabled_modules(&self) -> impl Iterator<Item = &ModuleDefinition> {
        self.modules.iter().filter(|module| module.enabled)
    }
}
