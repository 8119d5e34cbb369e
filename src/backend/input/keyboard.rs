//! Keyboard state tracking, keybind interception and keycode translation.

use std::collections::HashMap;

use evdev::Key;

use crate::config::{Action, KeybindRegistry, KeyCombination};
use crate::protocol::{AdditionalKey, InputEvent, Modifiers};

/// What the keyboard handler decided about one kernel key event.
#[derive(Debug, PartialEq)]
pub enum KeyOutcome {
    /// A keybind matched; run the action, send nothing to the client.
    Keybind(Action),
    /// Translated event for the focused client.
    Forward(InputEvent),
    /// Releases and unmapped keys produce no output.
    Ignored,
}

/// Letter, digit and punctuation translation: (key, unshifted, shifted).
const PRINTABLE: &[(Key, u8, u8)] = &[
    (Key::KEY_A, b'a', b'A'),
    (Key::KEY_B, b'b', b'B'),
    (Key::KEY_C, b'c', b'C'),
    (Key::KEY_D, b'd', b'D'),
    (Key::KEY_E, b'e', b'E'),
    (Key::KEY_F, b'f', b'F'),
    (Key::KEY_G, b'g', b'G'),
    (Key::KEY_H, b'h', b'H'),
    (Key::KEY_I, b'i', b'I'),
    (Key::KEY_J, b'j', b'J'),
    (Key::KEY_K, b'k', b'K'),
    (Key::KEY_L, b'l', b'L'),
    (Key::KEY_M, b'm', b'M'),
    (Key::KEY_N, b'n', b'N'),
    (Key::KEY_O, b'o', b'O'),
    (Key::KEY_P, b'p', b'P'),
    (Key::KEY_Q, b'q', b'Q'),
    (Key::KEY_R, b'r', b'R'),
    (Key::KEY_S, b's', b'S'),
    (Key::KEY_T, b't', b'T'),
    (Key::KEY_U, b'u', b'U'),
    (Key::KEY_V, b'v', b'V'),
    (Key::KEY_W, b'w', b'W'),
    (Key::KEY_X, b'x', b'X'),
    (Key::KEY_Y, b'y', b'Y'),
    (Key::KEY_Z, b'z', b'Z'),
    (Key::KEY_1, b'1', b'!'),
    (Key::KEY_2, b'2', b'@'),
    (Key::KEY_3, b'3', b'#'),
    (Key::KEY_4, b'4', b'$'),
    (Key::KEY_5, b'5', b'%'),
    (Key::KEY_6, b'6', b'^'),
    (Key::KEY_7, b'7', b'&'),
    (Key::KEY_8, b'8', b'*'),
    (Key::KEY_9, b'9', b'('),
    (Key::KEY_0, b'0', b')'),
    (Key::KEY_SPACE, b' ', b' '),
    (Key::KEY_TAB, b'\t', b'\t'),
    (Key::KEY_ENTER, b'\n', b'\n'),
    (Key::KEY_BACKSPACE, 0x08, 0x08),
    (Key::KEY_ESC, 0x1b, 0x1b),
    (Key::KEY_MINUS, b'-', b'_'),
    (Key::KEY_EQUAL, b'=', b'+'),
    (Key::KEY_LEFTBRACE, b'[', b'{'),
    (Key::KEY_RIGHTBRACE, b']', b'}'),
    (Key::KEY_SEMICOLON, b';', b':'),
    (Key::KEY_APOSTROPHE, b'\'', b'"'),
    (Key::KEY_GRAVE, b'`', b'~'),
    (Key::KEY_BACKSLASH, b'\\', b'|'),
    (Key::KEY_COMMA, b',', b'<'),
    (Key::KEY_DOT, b'.', b'>'),
    (Key::KEY_SLASH, b'/', b'?'),
];

const SPECIAL: &[(Key, AdditionalKey)] = &[
    (Key::KEY_F1, AdditionalKey::F1),
    (Key::KEY_F2, AdditionalKey::F2),
    (Key::KEY_F3, AdditionalKey::F3),
    (Key::KEY_F4, AdditionalKey::F4),
    (Key::KEY_F5, AdditionalKey::F5),
    (Key::KEY_F6, AdditionalKey::F6),
    (Key::KEY_F7, AdditionalKey::F7),
    (Key::KEY_F8, AdditionalKey::F8),
    (Key::KEY_F9, AdditionalKey::F9),
    (Key::KEY_F10, AdditionalKey::F10),
    (Key::KEY_F11, AdditionalKey::F11),
    (Key::KEY_F12, AdditionalKey::F12),
    (Key::KEY_UP, AdditionalKey::ArrowUp),
    (Key::KEY_DOWN, AdditionalKey::ArrowDown),
    (Key::KEY_LEFT, AdditionalKey::ArrowLeft),
    (Key::KEY_RIGHT, AdditionalKey::ArrowRight),
    (Key::KEY_HOME, AdditionalKey::Home),
    (Key::KEY_END, AdditionalKey::End),
    (Key::KEY_PAGEUP, AdditionalKey::PageUp),
    (Key::KEY_PAGEDOWN, AdditionalKey::PageDown),
    (Key::KEY_INSERT, AdditionalKey::Insert),
    (Key::KEY_DELETE, AdditionalKey::Delete),
];

fn special_key(code: u16) -> Option<AdditionalKey> {
    SPECIAL
        .iter()
        .find(|(key, _)| key.code() == code)
        .map(|&(_, additional)| additional)
}

fn printable_key(code: u16, shift: bool) -> u8 {
    PRINTABLE
        .iter()
        .find(|(key, _, _)| key.code() == code)
        .map(|&(_, normal, shifted)| if shift { shifted } else { normal })
        .unwrap_or(0)
}

/// Held-key tracking for one seat's keyboards.
#[derive(Debug, Default)]
pub struct KeyboardState {
    key_states: HashMap<u16, bool>,
}

impl KeyboardState {
    pub fn new() -> Self {
        KeyboardState::default()
    }

    fn is_down(&self, key: Key) -> bool {
        self.key_states.get(&key.code()).copied().unwrap_or(false)
    }

    /// Processes one kernel key event (`value` 0 = release, 1 = press,
    /// 2 = auto-repeat).
    ///
    /// Keybinds are resolved before any translation; a hit clears the state
    /// of every key that participated so auto-repeat cannot re-trigger the
    /// action while the combo is physically held.
    pub fn process(
        &mut self,
        code: u16,
        value: i32,
        registry: &KeybindRegistry,
        intercept: bool,
    ) -> KeyOutcome {
        let pressed = value == 1 || value == 2;
        self.key_states.insert(code, pressed);
        if !pressed {
            return KeyOutcome::Ignored;
        }

        let ctrl = self.is_down(Key::KEY_LEFTCTRL) || self.is_down(Key::KEY_RIGHTCTRL);
        let alt = self.is_down(Key::KEY_LEFTALT) || self.is_down(Key::KEY_RIGHTALT);
        let shift = self.is_down(Key::KEY_LEFTSHIFT) || self.is_down(Key::KEY_RIGHTSHIFT);
        let super_key = self.is_down(Key::KEY_LEFTMETA) || self.is_down(Key::KEY_RIGHTMETA);

        if intercept {
            let combo = KeyCombination {
                code,
                ctrl,
                alt,
                shift,
                super_key,
            };
            if let Some(action) = registry.lookup(&combo) {
                self.key_states.insert(code, false);
                if ctrl {
                    self.key_states.insert(Key::KEY_LEFTCTRL.code(), false);
                    self.key_states.insert(Key::KEY_RIGHTCTRL.code(), false);
                }
                if alt {
                    self.key_states.insert(Key::KEY_LEFTALT.code(), false);
                    self.key_states.insert(Key::KEY_RIGHTALT.code(), false);
                }
                if shift {
                    self.key_states.insert(Key::KEY_LEFTSHIFT.code(), false);
                    self.key_states.insert(Key::KEY_RIGHTSHIFT.code(), false);
                }
                if super_key {
                    self.key_states.insert(Key::KEY_LEFTMETA.code(), false);
                    self.key_states.insert(Key::KEY_RIGHTMETA.code(), false);
                }
                return KeyOutcome::Keybind(action);
            }
        }

        let mut modifiers = Modifiers::PRESSED_DOWN;
        modifiers.set(Modifiers::SHIFT, shift);
        modifiers.set(Modifiers::CTRL, ctrl);
        modifiers.set(Modifiers::ALT, alt);
        modifiers.set(Modifiers::SUPER, super_key);

        let mut event = InputEvent {
            modifiers,
            ..InputEvent::default()
        };
        if let Some(additional) = special_key(code) {
            event.additional = additional;
        } else {
            event.key = printable_key(code, shift);
        }
        KeyOutcome::Forward(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_alt_tab() -> KeybindRegistry {
        let registry = KeybindRegistry::new();
        registry.add(
            KeyCombination::new(Key::KEY_TAB.code()).alt(),
            Action::SwitchFocusNext,
        );
        registry
    }

    #[test]
    fn letters_respect_shift() {
        let registry = KeybindRegistry::new();
        let mut state = KeyboardState::new();

        match state.process(Key::KEY_A.code(), 1, &registry, true) {
            KeyOutcome::Forward(ev) => {
                assert_eq!(ev.key, b'a');
                assert!(ev.modifiers.contains(Modifiers::PRESSED_DOWN));
                assert!(!ev.modifiers.contains(Modifiers::SHIFT));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        state.process(Key::KEY_LEFTSHIFT.code(), 1, &registry, true);
        match state.process(Key::KEY_A.code(), 1, &registry, true) {
            KeyOutcome::Forward(ev) => {
                assert_eq!(ev.key, b'A');
                assert!(ev.modifiers.contains(Modifiers::SHIFT));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn punctuation_shift_table() {
        let registry = KeybindRegistry::new();
        let mut state = KeyboardState::new();

        let cases = [
            (Key::KEY_1, b'1', b'!'),
            (Key::KEY_MINUS, b'-', b'_'),
            (Key::KEY_SLASH, b'/', b'?'),
            (Key::KEY_GRAVE, b'`', b'~'),
        ];
        for (key, normal, shifted) in cases {
            match state.process(key.code(), 1, &registry, true) {
                KeyOutcome::Forward(ev) => assert_eq!(ev.key, normal),
                other => panic!("unexpected outcome: {other:?}"),
            }
            state.process(Key::KEY_RIGHTSHIFT.code(), 1, &registry, true);
            match state.process(key.code(), 1, &registry, true) {
                KeyOutcome::Forward(ev) => assert_eq!(ev.key, shifted),
                other => panic!("unexpected outcome: {other:?}"),
            }
            state.process(Key::KEY_RIGHTSHIFT.code(), 0, &registry, true);
        }
    }

    #[test]
    fn special_keys_map_to_additional() {
        let registry = KeybindRegistry::new();
        let mut state = KeyboardState::new();

        match state.process(Key::KEY_F5.code(), 1, &registry, true) {
            KeyOutcome::Forward(ev) => {
                assert_eq!(ev.additional, AdditionalKey::F5);
                assert_eq!(ev.key, 0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match state.process(Key::KEY_DELETE.code(), 1, &registry, true) {
            KeyOutcome::Forward(ev) => assert_eq!(ev.additional, AdditionalKey::Delete),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn releases_are_suppressed() {
        let registry = KeybindRegistry::new();
        let mut state = KeyboardState::new();
        state.process(Key::KEY_A.code(), 1, &registry, true);
        assert_eq!(
            state.process(Key::KEY_A.code(), 0, &registry, true),
            KeyOutcome::Ignored
        );
    }

    #[test]
    fn keybind_interception_consumes_and_clears_state() {
        let registry = registry_with_alt_tab();
        let mut state = KeyboardState::new();

        state.process(Key::KEY_LEFTALT.code(), 1, &registry, true);
        match state.process(Key::KEY_TAB.code(), 1, &registry, true) {
            KeyOutcome::Keybind(action) => assert_eq!(action, Action::SwitchFocusNext),
            other => panic!("unexpected outcome: {other:?}"),
        }

        // Auto-repeat of tab with alt still physically held must not
        // re-trigger: the alt state was cleared on the hit.
        match state.process(Key::KEY_TAB.code(), 2, &registry, true) {
            KeyOutcome::Forward(ev) => {
                assert_eq!(ev.key, b'\t');
                assert!(!ev.modifiers.contains(Modifiers::ALT));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // Releasing alt afterwards produces no spurious event.
        assert_eq!(
            state.process(Key::KEY_LEFTALT.code(), 0, &registry, true),
            KeyOutcome::Ignored
        );
    }

    #[test]
    fn interception_can_be_disabled() {
        let registry = registry_with_alt_tab();
        let mut state = KeyboardState::new();

        state.process(Key::KEY_LEFTALT.code(), 1, &registry, false);
        match state.process(Key::KEY_TAB.code(), 1, &registry, false) {
            KeyOutcome::Forward(ev) => {
                assert_eq!(ev.key, b'\t');
                assert!(ev.modifiers.contains(Modifiers::ALT));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
