//! Layered configuration for the `inwatch` tool.
//!
//! Sources, later ones winning:
//! - Built-in defaults
//! - `.inwatch/settings.toml`, found by walking up from the current directory
//! - Environment variables
//! - CLI arguments (applied by the command)
//!
//! # Environment Variables
//!
//! Variables are prefixed with `INWATCH_` and use double underscores to
//! separate nested levels:
//! - `INWATCH_WATCH__AUTO_ADD=true` sets `watch.auto_add`
//! - `INWATCH_DISPATCHER__POLL_INTERVAL_MS=250` sets `dispatcher.poll_interval_ms`
//! - `INWATCH_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mask::{EventMask, WatchOptions};
use crate::watcher::{WalkOrder, WatchResult};

const CONFIG_DIR: &str = ".inwatch";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "INWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// What `inwatch watch` registers
    #[serde(default)]
    pub watch: WatchConfig,

    /// Background dispatch and auto-add policy
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Event names to deliver, e.g. `["create", "delete"]` or `["all"]`
    #[serde(default = "default_events")]
    pub events: Vec<String>,

    /// Watch directories created under a watched directory
    #[serde(default)]
    pub auto_add: bool,

    /// Remove watches whose target was moved
    #[serde(default)]
    pub remove_moved: bool,

    /// Watch whole subtrees
    #[serde(default)]
    pub recursive: bool,

    /// Walk subtrees parent first
    #[serde(default = "default_true")]
    pub top_down: bool,

    #[serde(default = "default_true")]
    pub follow_symlinks: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatcherConfig {
    /// Longest single wait of the background loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive auto-add failures on one watch before a warning
    #[serde(default = "default_auto_add_warn_after")]
    pub auto_add_warn_after: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Level for everything not listed in `modules`
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module levels, e.g. `watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_events() -> Vec<String> {
    vec!["all".to_string()]
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_auto_add_warn_after() -> u32 {
    3
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            dispatcher: DispatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            events: default_events(),
            auto_add: false,
            remove_moved: false,
            recursive: false,
            top_down: true,
            follow_symlinks: true,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            auto_add_warn_after: default_auto_add_warn_after(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl WatchConfig {
    /// Kernel mask for the configured events.
    pub fn mask(&self) -> WatchResult<EventMask> {
        let mut mask = EventMask::from_names(&self.events)?;
        if !self.follow_symlinks {
            mask |= EventMask::DONT_FOLLOW;
        }
        Ok(mask)
    }

    pub fn options(&self) -> WatchOptions {
        let mut options = WatchOptions::empty();
        options.set(WatchOptions::AUTO_ADD, self.auto_add);
        options.set(WatchOptions::REMOVE_MOVED, self.remove_moved);
        options
    }

    pub fn order(&self) -> WalkOrder {
        if self.top_down {
            WalkOrder::TopDown
        } else {
            WalkOrder::BottomUp
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring the
    /// environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates levels; single underscores stay
            // part of the field name
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)
    }

    /// Find `.inwatch/settings.toml` in the current directory or an ancestor
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Path of the settings file in use, if any
    pub fn config_path() -> Option<PathBuf> {
        Self::find_workspace_config().filter(|path| path.exists())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);
        let existed = config_path.exists();

        if !force && existed {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        if existed {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!("Created default configuration at: {}", config_path.display());
        }

        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.watch.events, vec!["all"]);
        assert_eq!(settings.watch.mask().unwrap(), EventMask::ALL_EVENTS);
        assert_eq!(settings.watch.options(), WatchOptions::empty());
        assert_eq!(settings.watch.order(), WalkOrder::TopDown);
        assert_eq!(settings.dispatcher.poll_interval(), Duration::from_millis(100));
        assert_eq!(settings.dispatcher.auto_add_warn_after, 3);
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[watch]
events = ["create", "moved-to", "delete"]
auto_add = true
recursive = true
top_down = false
follow_symlinks = false

[dispatcher]
poll_interval_ms = 250

[logging.modules]
watcher = "debug"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(
            settings.watch.mask().unwrap(),
            EventMask::CREATE | EventMask::MOVED_TO | EventMask::DELETE | EventMask::DONT_FOLLOW
        );
        assert_eq!(settings.watch.options(), WatchOptions::AUTO_ADD);
        assert!(settings.watch.recursive);
        assert_eq!(settings.watch.order(), WalkOrder::BottomUp);
        assert_eq!(settings.dispatcher.poll_interval_ms, 250);
        // Untouched values keep their defaults
        assert_eq!(settings.dispatcher.auto_add_warn_after, 3);
        assert_eq!(settings.logging.modules["watcher"], "debug");
    }

    #[test]
    fn test_unknown_event_name() {
        let config = WatchConfig {
            events: vec!["create".to_string(), "bogus".to_string()],
            ..WatchConfig::default()
        };
        assert!(config.mask().is_err());
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/settings.toml");

        let mut settings = Settings::default();
        settings.watch.remove_moved = true;
        settings.dispatcher.auto_add_warn_after = 7;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert!(loaded.watch.remove_moved);
        assert_eq!(loaded.dispatcher.auto_add_warn_after, 7);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.watch.events, vec!["all"]);
    }
}
