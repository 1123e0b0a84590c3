//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use dt_core::EngineConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the store database file.
    pub database_path: PathBuf,

    /// Path to a shared cache file. Without one, groups are cached in
    /// process memory for the duration of a single command.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,

    /// Lifetime of cache entries in seconds.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Remove trackers from their group once fully completed.
    pub remove_completed: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("cache_path", &self.cache_path)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("remove_completed", &self.remove_completed)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("dt.db"),
            cache_path: None,
            cache_ttl_secs: None,
            remove_completed: EngineConfig::default().remove_completed,
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (DT_*)
        figment = figment.merge(Env::prefixed("DT_"));

        figment.extract()
    }

    /// Engine settings carried by this configuration.
    pub const fn engine(&self) -> EngineConfig {
        EngineConfig {
            cache_ttl_secs: self.cache_ttl_secs,
            remove_completed: self.remove_completed,
        }
    }
}

/// Returns the platform-specific config directory for dt.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dt"))
}

/// Returns the platform-specific data directory for dt.
///
/// On Linux: `~/.local/share/dt`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("dt"))
}
