//! Configuration loading.
//!
//! JSON with three sections: `keybinds`, `display` and `input`. Files are
//! looked up in order (working directory, user config directory, system
//! directory) and the first one that exists wins. A missing or malformed
//! file falls back to defaults with a warning; configuration must never
//! prevent the compositor from starting.

mod keybind;

pub use self::keybind::{
    default_keybinds, Action, KeybindRegistry, KeyCombination, ParseComboError,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::utils::Guard;

/// How new sessions are spread across displays.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStrategy {
    #[default]
    RoundRobin,
    PrimaryOnly,
    FillThenNext,
}

impl AssignmentStrategy {
    fn parse(raw: &str) -> Self {
        match raw {
            "primary_only" => AssignmentStrategy::PrimaryOnly,
            "fill_then_next" => AssignmentStrategy::FillThenNext,
            "round_robin" => AssignmentStrategy::RoundRobin,
            other => {
                warn!(strategy = other, "unknown assignment strategy, using round_robin");
                AssignmentStrategy::RoundRobin
            }
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeybindsSection {
    pub focus_management: HashMap<String, String>,
    pub window_management: HashMap<String, String>,
    pub custom_binds: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DisplaySection {
    pub auto_distribute_windows: bool,
    pub display_assignment_strategy: String,
    pub primary_display_id: u32,
    /// `#RRGGBB`.
    pub background_color: String,
    pub wallpaper_path: String,
}

impl Default for DisplaySection {
    fn default() -> Self {
        DisplaySection {
            auto_distribute_windows: false,
            display_assignment_strategy: "round_robin".into(),
            primary_display_id: 0,
            background_color: "#000000".into(),
            wallpaper_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputSection {
    pub enable_global_keybinds: bool,
    pub pass_unhandled_input: bool,
    /// Device poll rate in Hz.
    pub input_poll_rate: u32,
}

impl Default for InputSection {
    fn default() -> Self {
        InputSection {
            enable_global_keybinds: true,
            pass_unhandled_input: true,
            input_poll_rate: 100,
        }
    }
}

/// The raw configuration file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub keybinds: KeybindsSection,
    pub display: DisplaySection,
    pub input: InputSection,
}

/// Parses `#RRGGBB` into a packed `0x00RRGGBB` value; anything else is
/// black.
pub fn parse_color(raw: &str) -> u32 {
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    if hex.len() != 6 {
        return 0;
    }
    u32::from_str_radix(hex, 16).unwrap_or(0)
}

/// Candidate config paths, most specific first.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("./config.json")];
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(Path::new(&xdg).join("GGDirect/config.json"));
    } else if let Ok(home) = std::env::var("HOME") {
        paths.push(Path::new(&home).join(".config/GGDirect/config.json"));
    }
    paths.push(PathBuf::from("/etc/GGDirect/config.json"));
    paths
}

impl Config {
    /// Reads and parses one file.
    pub fn from_file(path: &Path) -> Option<Config> {
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(config) => {
                info!(?path, "configuration loaded");
                Some(config)
            }
            Err(err) => {
                warn!(?path, %err, "malformed configuration, using defaults");
                None
            }
        }
    }

    /// Loads the first existing config file, or defaults.
    pub fn load() -> Config {
        for path in config_paths() {
            if path.exists() {
                if let Some(config) = Config::from_file(&path) {
                    return config;
                }
                // Malformed file: fall through to defaults, not to the
                // lower-priority paths.
                break;
            }
            debug!(?path, "no config at this path");
        }
        Config::default()
    }
}

/// Parsed settings shared across threads. The wallpaper path and background
/// colour are read every frame by the render loop.
#[derive(Debug)]
pub struct ConfigStore {
    inner: Guard<Settings>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub background_color: u32,
    pub wallpaper_path: Option<PathBuf>,
    pub auto_distribute_windows: bool,
    pub assignment_strategy: AssignmentStrategy,
    pub primary_display_id: u32,
    pub enable_global_keybinds: bool,
    pub pass_unhandled_input: bool,
    pub input_poll_rate: u32,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Settings {
            background_color: parse_color(&config.display.background_color),
            wallpaper_path: if config.display.wallpaper_path.is_empty() {
                None
            } else {
                Some(PathBuf::from(&config.display.wallpaper_path))
            },
            auto_distribute_windows: config.display.auto_distribute_windows,
            assignment_strategy: AssignmentStrategy::parse(&config.display.display_assignment_strategy),
            primary_display_id: config.display.primary_display_id,
            enable_global_keybinds: config.input.enable_global_keybinds,
            pass_unhandled_input: config.input.pass_unhandled_input,
            input_poll_rate: config.input.input_poll_rate.clamp(1, 1000),
        }
    }
}

impl ConfigStore {
    pub fn new(config: &Config) -> Self {
        ConfigStore {
            inner: Guard::new(Settings::from(config)),
        }
    }

    pub fn settings(&self) -> Settings {
        self.inner.with(|s| s.clone())
    }

    pub fn background_color(&self) -> u32 {
        self.inner.with(|s| s.background_color)
    }

    pub fn wallpaper_path(&self) -> Option<PathBuf> {
        self.inner.with(|s| s.wallpaper_path.clone())
    }

    pub fn update(&self, config: &Config) {
        self.inner.with(|s| *s = Settings::from(config));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn color_parsing() {
        assert_eq!(parse_color("#000000"), 0);
        assert_eq!(parse_color("#ff8000"), 0x00ff_8000);
        assert_eq!(parse_color("1a2b3c"), 0x001a_2b3c);
        assert_eq!(parse_color("#zzz"), 0);
        assert_eq!(parse_color(""), 0);
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        let settings = Settings::from(&config);
        assert_eq!(settings.background_color, 0);
        assert!(settings.wallpaper_path.is_none());
        assert!(settings.enable_global_keybinds);
        assert!(settings.pass_unhandled_input);
        assert_eq!(settings.input_poll_rate, 100);
        assert_eq!(settings.assignment_strategy, AssignmentStrategy::RoundRobin);
    }

    #[test]
    fn full_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r##"{{
                "keybinds": {{
                    "focusManagement": {{ "alt+tab": "switch_focus_next" }},
                    "windowManagement": {{ "super+left": "move_window_left" }},
                    "customBinds": {{ "super+t": "custom:xterm" }}
                }},
                "display": {{
                    "autoDistributeWindows": true,
                    "displayAssignmentStrategy": "primary_only",
                    "primaryDisplayId": 3,
                    "backgroundColor": "#102030",
                    "wallpaperPath": "/tmp/wall.png"
                }},
                "input": {{
                    "enableGlobalKeybinds": false,
                    "passUnhandledInput": false,
                    "inputPollRate": 250
                }}
            }}"##
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(
            config.keybinds.focus_management.get("alt+tab").map(String::as_str),
            Some("switch_focus_next")
        );
        let settings = Settings::from(&config);
        assert_eq!(settings.background_color, 0x0010_2030);
        assert_eq!(settings.primary_display_id, 3);
        assert_eq!(settings.assignment_strategy, AssignmentStrategy::PrimaryOnly);
        assert!(!settings.enable_global_keybinds);
        assert_eq!(settings.input_poll_rate, 250);
        assert_eq!(settings.wallpaper_path.as_deref(), Some(Path::new("/tmp/wall.png")));
    }

    #[test]
    fn malformed_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::from_file(&path).is_none());
    }
}
