//! Mouse and touchpad state tracking.

use evdev::{AbsoluteAxisType, Key, RelativeAxisType};

use crate::protocol::{AdditionalKey, InputEvent, Modifiers};
use crate::utils::Point;

fn position_event(position: Point) -> InputEvent {
    InputEvent {
        mouse_x: position.x.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        mouse_y: position.y.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        ..InputEvent::default()
    }
}

/// Accumulated pointer position and button state for relative devices.
#[derive(Debug, Default)]
pub struct MouseState {
    position: Point,
    buttons: [bool; 8],
}

impl MouseState {
    pub fn new() -> Self {
        MouseState::default()
    }

    /// Relative axis motion; emits the updated position.
    pub fn motion(&mut self, axis: u16, value: i32) -> Option<InputEvent> {
        if axis == RelativeAxisType::REL_X.0 {
            self.position.x += value;
        } else if axis == RelativeAxisType::REL_Y.0 {
            self.position.y += value;
        } else if axis == RelativeAxisType::REL_WHEEL.0 {
            let mut event = position_event(self.position);
            event.additional = if value > 0 {
                AdditionalKey::ScrollUp
            } else {
                AdditionalKey::ScrollDown
            };
            return Some(event);
        } else {
            return None;
        }
        Some(position_event(self.position))
    }

    /// Button press/release; emits click events at the current position.
    pub fn button(&mut self, code: u16, pressed: bool) -> Option<InputEvent> {
        let (additional, slot) = if code == Key::BTN_LEFT.code() {
            (AdditionalKey::LeftClick, 0)
        } else if code == Key::BTN_RIGHT.code() {
            (AdditionalKey::RightClick, 1)
        } else if code == Key::BTN_MIDDLE.code() {
            (AdditionalKey::MiddleClick, 2)
        } else {
            return None;
        };
        self.buttons[slot] = pressed;

        let mut event = position_event(self.position);
        event.additional = additional;
        if pressed {
            event.modifiers |= Modifiers::PRESSED_DOWN;
        }
        Some(event)
    }
}

/// Absolute position tracking; touch start/end map to left clicks.
#[derive(Debug, Default)]
pub struct TouchpadState {
    position: Point,
    touching: bool,
}

impl TouchpadState {
    pub fn new() -> Self {
        TouchpadState::default()
    }

    pub fn motion(&mut self, axis: u16, value: i32) -> Option<InputEvent> {
        if axis == AbsoluteAxisType::ABS_X.0 {
            self.position.x = value;
        } else if axis == AbsoluteAxisType::ABS_Y.0 {
            self.position.y = value;
        } else {
            return None;
        }
        Some(position_event(self.position))
    }

    pub fn touch(&mut self, code: u16, pressed: bool) -> Option<InputEvent> {
        if code != Key::BTN_TOUCH.code() {
            return None;
        }
        self.touching = pressed;
        let mut event = position_event(self.position);
        event.additional = AdditionalKey::LeftClick;
        if pressed {
            event.modifiers |= Modifiers::PRESSED_DOWN;
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_motion_accumulates() {
        let mut mouse = MouseState::new();
        mouse.motion(RelativeAxisType::REL_X.0, 10);
        mouse.motion(RelativeAxisType::REL_Y.0, 5);
        let event = mouse.motion(RelativeAxisType::REL_X.0, -3).unwrap();
        assert_eq!((event.mouse_x, event.mouse_y), (7, 5));
    }

    #[test]
    fn buttons_report_press_state() {
        let mut mouse = MouseState::new();
        let press = mouse.button(Key::BTN_LEFT.code(), true).unwrap();
        assert_eq!(press.additional, AdditionalKey::LeftClick);
        assert!(press.modifiers.contains(Modifiers::PRESSED_DOWN));

        let release = mouse.button(Key::BTN_LEFT.code(), false).unwrap();
        assert_eq!(release.additional, AdditionalKey::LeftClick);
        assert!(!release.modifiers.contains(Modifiers::PRESSED_DOWN));

        assert!(mouse.button(Key::BTN_EXTRA.code(), true).is_none());
    }

    #[test]
    fn wheel_maps_to_scroll_direction() {
        let mut mouse = MouseState::new();
        let up = mouse.motion(RelativeAxisType::REL_WHEEL.0, 1).unwrap();
        assert_eq!(up.additional, AdditionalKey::ScrollUp);
        let down = mouse.motion(RelativeAxisType::REL_WHEEL.0, -1).unwrap();
        assert_eq!(down.additional, AdditionalKey::ScrollDown);
    }

    #[test]
    fn touchpad_tracks_absolute_position_and_taps() {
        let mut pad = TouchpadState::new();
        pad.motion(AbsoluteAxisType::ABS_X.0, 300);
        let event = pad.motion(AbsoluteAxisType::ABS_Y.0, 200).unwrap();
        assert_eq!((event.mouse_x, event.mouse_y), (300, 200));

        let start = pad.touch(Key::BTN_TOUCH.code(), true).unwrap();
        assert_eq!(start.additional, AdditionalKey::LeftClick);
        assert!(start.modifiers.contains(Modifiers::PRESSED_DOWN));
        let end = pad.touch(Key::BTN_TOUCH.code(), false).unwrap();
        assert!(!end.modifiers.contains(Modifiers::PRESSED_DOWN));
    }
}
