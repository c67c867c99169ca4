//! Token types produced by the script lexer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One playback step parsed from source text.
///
/// Directive tokens are atomic: a `Scroll` or `RepeatKey` with a count of
/// ten is still a single step for the scheduler and the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// A literal character (anything except `\n`).
    Character(char),
    /// A line break.
    Newline,
    /// `<<PAUSE>>`: hand control back to the operator.
    Pause,
    /// `<<WAIT:N>>`: hold for N milliseconds before the next token.
    Wait { millis: u32 },
    /// `<<SCROLL:UP|DOWN:N>>`
    Scroll { direction: ScrollDirection, count: u32 },
    /// `<<DOWN:N>>`, `<<ENTER:N>>` and the other repeat-key directives.
    RepeatKey { key: Key, count: u32 },
    /// `<<CTRL+S>>`, `<<ALT+TAB>>`: `key` clicked while `modifiers` are held.
    Chord { modifiers: Modifiers, key: Key },
}

impl Token {
    /// Whether this token came from a `<<...>>` directive.
    pub fn is_directive(&self) -> bool {
        !matches!(self, Token::Character(_) | Token::Newline)
    }
}

/// Renders the token back to canonical source text.
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Character(c) => write!(f, "{c}"),
            Token::Newline => writeln!(f),
            Token::Pause => write!(f, "<<PAUSE>>"),
            Token::Wait { millis } => write!(f, "<<WAIT:{millis}>>"),
            Token::Scroll { direction, count } => {
                write!(f, "<<SCROLL:{}:{count}>>", direction.keyword())
            }
            Token::RepeatKey { key, count } => write!(f, "<<{key}:{count}>>"),
            Token::Chord { modifiers, key } => write!(f, "<<{modifiers}{key}>>"),
        }
    }
}

/// Scroll direction for `<<SCROLL:...>>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    pub fn keyword(self) -> &'static str {
        match self {
            ScrollDirection::Up => "UP",
            ScrollDirection::Down => "DOWN",
        }
    }

    /// Case-insensitive lookup.
    pub fn from_keyword(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("UP") {
            Some(ScrollDirection::Up)
        } else if s.eq_ignore_ascii_case("DOWN") {
            Some(ScrollDirection::Down)
        } else {
            None
        }
    }
}

/// Keys that directives and emission transforms can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Tab,
    Backspace,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    Escape,
    /// Function key F1..=F12.
    F(u8),
    Control,
    Alt,
    Shift,
    /// A printable character, only reachable as the target of a chord.
    Char(char),
}

/// Directive spelling of the key.
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Key::Up => "UP",
            Key::Down => "DOWN",
            Key::Left => "LEFT",
            Key::Right => "RIGHT",
            Key::Enter => "ENTER",
            Key::Tab => "TAB",
            Key::Backspace => "BACKSPACE",
            Key::Delete => "DELETE",
            Key::Home => "HOME",
            Key::End => "END",
            Key::PageUp => "PAGEUP",
            Key::PageDown => "PAGEDOWN",
            Key::Escape => "ESC",
            Key::F(n) => return write!(f, "F{n}"),
            Key::Control => "CTRL",
            Key::Alt => "ALT",
            Key::Shift => "SHIFT",
            Key::Char(' ') => "SPACE",
            Key::Char(c) => return write!(f, "{c}"),
        };
        f.write_str(name)
    }
}

/// Modifier keys held during a chord.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
}

impl Modifiers {
    pub const CTRL: Modifiers = Modifiers {
        ctrl: true,
        alt: false,
        shift: false,
    };

    pub fn is_empty(self) -> bool {
        !(self.ctrl || self.alt || self.shift)
    }

    /// Held keys in press order (Ctrl, Alt, Shift).
    pub fn keys(self) -> impl DoubleEndedIterator<Item = Key> {
        [
            (self.ctrl, Key::Control),
            (self.alt, Key::Alt),
            (self.shift, Key::Shift),
        ]
        .into_iter()
        .filter_map(|(held, key)| held.then_some(key))
    }
}

/// Renders as a `CTRL+ALT+` prefix.
impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in self.keys() {
            write!(f, "{key}+")?;
        }
        Ok(())
    }
}

/// Concatenate the canonical source text of a token sequence.
pub fn reconstruct(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_canonical_source() {
        assert_eq!(Token::Character('a').to_string(), "a");
        assert_eq!(Token::Newline.to_string(), "\n");
        assert_eq!(Token::Pause.to_string(), "<<PAUSE>>");
        assert_eq!(Token::Wait { millis: 250 }.to_string(), "<<WAIT:250>>");
        assert_eq!(
            Token::Scroll {
                direction: ScrollDirection::Down,
                count: 3
            }
            .to_string(),
            "<<SCROLL:DOWN:3>>"
        );
        assert_eq!(
            Token::RepeatKey {
                key: Key::Escape,
                count: 1
            }
            .to_string(),
            "<<ESC:1>>"
        );
        assert_eq!(
            Token::Chord {
                modifiers: Modifiers {
                    ctrl: true,
                    shift: true,
                    ..Modifiers::default()
                },
                key: Key::Char('t'),
            }
            .to_string(),
            "<<CTRL+SHIFT+t>>"
        );
        assert_eq!(
            Token::RepeatKey {
                key: Key::F(5),
                count: 2
            }
            .to_string(),
            "<<F5:2>>"
        );
    }

    #[test]
    fn modifier_keys_in_press_order() {
        let all = Modifiers {
            ctrl: true,
            alt: true,
            shift: true,
        };
        assert_eq!(
            all.keys().collect::<Vec<_>>(),
            vec![Key::Control, Key::Alt, Key::Shift]
        );
        assert!(Modifiers::default().is_empty());
        assert!(!Modifiers::CTRL.is_empty());
    }

    #[test]
    fn directive_classification() {
        assert!(!Token::Character('<').is_directive());
        assert!(!Token::Newline.is_directive());
        assert!(Token::Pause.is_directive());
        assert!(Token::Wait { millis: 1 }.is_directive());
    }

    #[test]
    fn scroll_direction_ignores_case() {
        assert_eq!(ScrollDirection::from_keyword("up"), Some(ScrollDirection::Up));
        assert_eq!(ScrollDirection::from_keyword("Down"), Some(ScrollDirection::Down));
        assert_eq!(ScrollDirection::from_keyword("left"), None);
    }
}
