//! Native keystroke injection through enigo.

use enigo::{Axis, Direction, Enigo, Keyboard, Mouse, Settings};

use super::{InjectionError, InputAction, InputSimulator};
use crate::script::{Key, ScrollDirection};

pub struct EnigoSimulator {
    enigo: Enigo,
}

impl EnigoSimulator {
    pub fn new() -> Result<Self, InjectionError> {
        let enigo = Enigo::new(&Settings::default()).map_err(|e| {
            InjectionError::new(
                InputAction::TypeChar('\0'),
                format!("failed to initialize enigo: {e}"),
            )
        })?;
        Ok(Self { enigo })
    }
}

fn native_key(key: Key) -> enigo::Key {
    match key {
        Key::Up => enigo::Key::UpArrow,
        Key::Down => enigo::Key::DownArrow,
        Key::Left => enigo::Key::LeftArrow,
        Key::Right => enigo::Key::RightArrow,
        Key::Enter => enigo::Key::Return,
        Key::Tab => enigo::Key::Tab,
        Key::Backspace => enigo::Key::Backspace,
        Key::Delete => enigo::Key::Delete,
        Key::Home => enigo::Key::Home,
        Key::End => enigo::Key::End,
        Key::PageUp => enigo::Key::PageUp,
        Key::PageDown => enigo::Key::PageDown,
        Key::Escape => enigo::Key::Escape,
        Key::F(1) => enigo::Key::F1,
        Key::F(2) => enigo::Key::F2,
        Key::F(3) => enigo::Key::F3,
        Key::F(4) => enigo::Key::F4,
        Key::F(5) => enigo::Key::F5,
        Key::F(6) => enigo::Key::F6,
        Key::F(7) => enigo::Key::F7,
        Key::F(8) => enigo::Key::F8,
        Key::F(9) => enigo::Key::F9,
        Key::F(10) => enigo::Key::F10,
        Key::F(11) => enigo::Key::F11,
        Key::F(_) => enigo::Key::F12,
        Key::Control => enigo::Key::Control,
        Key::Alt => enigo::Key::Alt,
        Key::Shift => enigo::Key::Shift,
        Key::Char(c) => enigo::Key::Unicode(c),
    }
}

impl InputSimulator for EnigoSimulator {
    fn simulate(&mut self, action: &InputAction) -> Result<(), InjectionError> {
        let fail = |e: enigo::InputError| InjectionError::new(*action, e.to_string());
        match *action {
            InputAction::TypeChar(c) => {
                let mut buf = [0u8; 4];
                self.enigo.text(c.encode_utf8(&mut buf)).map_err(fail)
            }
            InputAction::Press { key, repeat } => {
                for _ in 0..repeat {
                    self.enigo
                        .key(native_key(key), Direction::Click)
                        .map_err(fail)?;
                }
                Ok(())
            }
            InputAction::Chord { modifiers, key } => {
                let mut held = Vec::new();
                let mut outcome = Ok(());
                for modifier in modifiers.keys() {
                    outcome = self.enigo.key(native_key(modifier), Direction::Press);
                    if outcome.is_err() {
                        break;
                    }
                    held.push(modifier);
                }
                if outcome.is_ok() {
                    outcome = self.enigo.key(native_key(key), Direction::Click);
                }
                // Release whatever was pressed, even if a later step failed.
                for modifier in held.into_iter().rev() {
                    let released = self.enigo.key(native_key(modifier), Direction::Release);
                    outcome = outcome.and(released);
                }
                outcome.map_err(fail)
            }
            InputAction::Scroll { direction, count } => {
                let clicks = i32::try_from(count).unwrap_or(i32::MAX);
                let length = match direction {
                    ScrollDirection::Up => -clicks,
                    ScrollDirection::Down => clicks,
                };
                self.enigo.scroll(length, Axis::Vertical).map_err(fail)
            }
        }
    }
}
