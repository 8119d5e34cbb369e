//! Key combinations, actions and the global keybinding table.
//!
//! Combo strings follow `[modifier+]*keyname` with modifiers `ctrl`, `alt`,
//! `shift` and `super` (aliases `meta`, `win`). The canonical rendering is
//! lowercase with modifiers ordered ctrl, alt, shift, super; keys without a
//! symbolic name render as `key<decimal>`.

use std::collections::HashMap;
use std::fmt;

use evdev::Key;
use thiserror::Error;
use tracing::{debug, warn};

use crate::utils::Guard;

/// A keycode plus modifier set, matched by exact equality.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCombination {
    pub code: u16,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub super_key: bool,
}

impl KeyCombination {
    pub fn new(code: u16) -> Self {
        KeyCombination {
            code,
            ..Default::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn super_key(mut self) -> Self {
        self.super_key = true;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseComboError {
    #[error("empty combo string")]
    Empty,
    #[error("unknown key name {0:?}")]
    UnknownKey(String),
}

/// Symbolic key names. The table is small and scanned linearly; combo
/// parsing happens at config load, not on the input path.
const KEY_NAMES: &[(&str, Key)] = &[
    ("tab", Key::KEY_TAB),
    ("enter", Key::KEY_ENTER),
    ("escape", Key::KEY_ESC),
    ("space", Key::KEY_SPACE),
    ("up", Key::KEY_UP),
    ("down", Key::KEY_DOWN),
    ("left", Key::KEY_LEFT),
    ("right", Key::KEY_RIGHT),
    ("home", Key::KEY_HOME),
    ("end", Key::KEY_END),
    ("pageup", Key::KEY_PAGEUP),
    ("pagedown", Key::KEY_PAGEDOWN),
    ("delete", Key::KEY_DELETE),
    ("backspace", Key::KEY_BACKSPACE),
    ("insert", Key::KEY_INSERT),
    ("minus", Key::KEY_MINUS),
    ("equal", Key::KEY_EQUAL),
    ("f1", Key::KEY_F1),
    ("f2", Key::KEY_F2),
    ("f3", Key::KEY_F3),
    ("f4", Key::KEY_F4),
    ("f5", Key::KEY_F5),
    ("f6", Key::KEY_F6),
    ("f7", Key::KEY_F7),
    ("f8", Key::KEY_F8),
    ("f9", Key::KEY_F9),
    ("f10", Key::KEY_F10),
    ("f11", Key::KEY_F11),
    ("f12", Key::KEY_F12),
    ("a", Key::KEY_A),
    ("b", Key::KEY_B),
    ("c", Key::KEY_C),
    ("d", Key::KEY_D),
    ("e", Key::KEY_E),
    ("f", Key::KEY_F),
    ("g", Key::KEY_G),
    ("h", Key::KEY_H),
    ("i", Key::KEY_I),
    ("j", Key::KEY_J),
    ("k", Key::KEY_K),
    ("l", Key::KEY_L),
    ("m", Key::KEY_M),
    ("n", Key::KEY_N),
    ("o", Key::KEY_O),
    ("p", Key::KEY_P),
    ("q", Key::KEY_Q),
    ("r", Key::KEY_R),
    ("s", Key::KEY_S),
    ("t", Key::KEY_T),
    ("u", Key::KEY_U),
    ("v", Key::KEY_V),
    ("w", Key::KEY_W),
    ("x", Key::KEY_X),
    ("y", Key::KEY_Y),
    ("z", Key::KEY_Z),
    ("0", Key::KEY_0),
    ("1", Key::KEY_1),
    ("2", Key::KEY_2),
    ("3", Key::KEY_3),
    ("4", Key::KEY_4),
    ("5", Key::KEY_5),
    ("6", Key::KEY_6),
    ("7", Key::KEY_7),
    ("8", Key::KEY_8),
    ("9", Key::KEY_9),
];

fn key_name_to_code(name: &str) -> Option<u16> {
    KEY_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, key)| key.code())
}

fn key_code_to_name(code: u16) -> Option<&'static str> {
    KEY_NAMES
        .iter()
        .find(|(_, key)| key.code() == code)
        .map(|(name, _)| *name)
}

impl fmt::Display for KeyCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("ctrl+")?;
        }
        if self.alt {
            f.write_str("alt+")?;
        }
        if self.shift {
            f.write_str("shift+")?;
        }
        if self.super_key {
            f.write_str("super+")?;
        }
        match key_code_to_name(self.code) {
            Some(name) => f.write_str(name),
            None => write!(f, "key{}", self.code),
        }
    }
}

impl std::str::FromStr for KeyCombination {
    type Err = ParseComboError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut combo = KeyCombination::default();
        let mut key = None;
        for part in s.split('+') {
            let part = part.trim().to_lowercase();
            match part.as_str() {
                "" => return Err(ParseComboError::Empty),
                "ctrl" => combo.ctrl = true,
                "alt" => combo.alt = true,
                "shift" => combo.shift = true,
                "super" | "meta" | "win" => combo.super_key = true,
                name => key = Some(name.to_owned()),
            }
        }
        let name = key.ok_or(ParseComboError::Empty)?;
        combo.code = match key_name_to_code(&name) {
            Some(code) => code,
            None => name
                .strip_prefix("key")
                .and_then(|digits| digits.parse().ok())
                .ok_or(ParseComboError::UnknownKey(name))?,
        };
        Ok(combo)
    }
}

/// What a keybind does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SwitchFocusNext,
    SwitchFocusPrevious,
    MoveWindowFullscreen,
    MoveWindowLeft,
    MoveWindowRight,
    MoveWindowTop,
    MoveWindowBottom,
    CloseFocusedWindow,
    ToggleZoom,
    IncreaseZoom,
    DecreaseZoom,
    /// Spawns a shell command.
    Custom(String),
}

impl Action {
    pub fn parse(raw: &str) -> Option<Action> {
        Some(match raw {
            "switch_focus_next" => Action::SwitchFocusNext,
            "switch_focus_previous" => Action::SwitchFocusPrevious,
            "move_window_fullscreen" => Action::MoveWindowFullscreen,
            "move_window_left" => Action::MoveWindowLeft,
            "move_window_right" => Action::MoveWindowRight,
            "move_window_top" => Action::MoveWindowTop,
            "move_window_bottom" => Action::MoveWindowBottom,
            "close_focused_window" => Action::CloseFocusedWindow,
            "toggle_zoom" => Action::ToggleZoom,
            "increase_zoom" => Action::IncreaseZoom,
            "decrease_zoom" => Action::DecreaseZoom,
            other => return other.strip_prefix("custom:").map(|cmd| Action::Custom(cmd.into())),
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::SwitchFocusNext => f.write_str("switch_focus_next"),
            Action::SwitchFocusPrevious => f.write_str("switch_focus_previous"),
            Action::MoveWindowFullscreen => f.write_str("move_window_fullscreen"),
            Action::MoveWindowLeft => f.write_str("move_window_left"),
            Action::MoveWindowRight => f.write_str("move_window_right"),
            Action::MoveWindowTop => f.write_str("move_window_top"),
            Action::MoveWindowBottom => f.write_str("move_window_bottom"),
            Action::CloseFocusedWindow => f.write_str("close_focused_window"),
            Action::ToggleZoom => f.write_str("toggle_zoom"),
            Action::IncreaseZoom => f.write_str("increase_zoom"),
            Action::DecreaseZoom => f.write_str("decrease_zoom"),
            Action::Custom(cmd) => write!(f, "custom:{cmd}"),
        }
    }
}

/// The built-in bindings, installed before any config file is applied.
pub fn default_keybinds() -> Vec<(KeyCombination, Action)> {
    vec![
        (
            KeyCombination::new(Key::KEY_TAB.code()).alt(),
            Action::SwitchFocusNext,
        ),
        (
            KeyCombination::new(Key::KEY_TAB.code()).alt().shift(),
            Action::SwitchFocusPrevious,
        ),
        (
            KeyCombination::new(Key::KEY_UP.code()).super_key(),
            Action::MoveWindowTop,
        ),
        (
            KeyCombination::new(Key::KEY_DOWN.code()).super_key(),
            Action::MoveWindowBottom,
        ),
        (
            KeyCombination::new(Key::KEY_LEFT.code()).super_key(),
            Action::MoveWindowLeft,
        ),
        (
            KeyCombination::new(Key::KEY_RIGHT.code()).super_key(),
            Action::MoveWindowRight,
        ),
        (
            KeyCombination::new(Key::KEY_F.code()).super_key(),
            Action::MoveWindowFullscreen,
        ),
        (
            KeyCombination::new(Key::KEY_Q.code()).super_key(),
            Action::CloseFocusedWindow,
        ),
        (
            KeyCombination::new(Key::KEY_EQUAL.code()).ctrl(),
            Action::IncreaseZoom,
        ),
        (
            KeyCombination::new(Key::KEY_MINUS.code()).ctrl(),
            Action::DecreaseZoom,
        ),
        (
            KeyCombination::new(Key::KEY_0.code()).ctrl(),
            Action::ToggleZoom,
        ),
    ]
}

/// Process-wide combo → action table. Any thread may mutate it through the
/// guard; the input thread resolves combos through the same guard.
#[derive(Debug, Default)]
pub struct KeybindRegistry {
    binds: Guard<HashMap<KeyCombination, Action>>,
}

impl KeybindRegistry {
    pub fn new() -> Self {
        KeybindRegistry::default()
    }

    /// Defaults plus the three config sections; file entries override
    /// defaults on the same combo.
    pub fn from_config(config: &super::Config) -> Self {
        let registry = KeybindRegistry::new();
        for (combo, action) in default_keybinds() {
            registry.add(combo, action);
        }
        for section in [
            &config.keybinds.focus_management,
            &config.keybinds.window_management,
            &config.keybinds.custom_binds,
        ] {
            for (combo_str, action_str) in section {
                let combo = match combo_str.parse::<KeyCombination>() {
                    Ok(combo) => combo,
                    Err(err) => {
                        warn!(combo = %combo_str, %err, "skipping keybind");
                        continue;
                    }
                };
                let Some(action) = Action::parse(action_str) else {
                    warn!(action = %action_str, "skipping keybind with unknown action");
                    continue;
                };
                debug!(combo = %combo, action = %action, "keybind registered");
                registry.add(combo, action);
            }
        }
        registry
    }

    pub fn add(&self, combo: KeyCombination, action: Action) {
        self.binds.with(|map| {
            map.insert(combo, action);
        });
    }

    pub fn remove(&self, combo: &KeyCombination) -> bool {
        self.binds.with(|map| map.remove(combo).is_some())
    }

    pub fn lookup(&self, combo: &KeyCombination) -> Option<Action> {
        self.binds.with(|map| map.get(combo).cloned())
    }

    pub fn len(&self) -> usize {
        self.binds.with(|map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
