//! Directive grammar table.
//!
//! Each row names a keyword and the argument shape it accepts. Adding a
//! directive means adding a row; the lexer never changes. Chords
//! (`<<CTRL+S>>`) are built from the modifier table plus any repeat-key
//! row, an alias row or a single printable character.

use super::token::{Key, Modifiers, ScrollDirection, Token};

/// Argument shape accepted after a directive keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `<<KEYWORD>>`
    Pause,
    /// `<<KEYWORD:N>>`, N in milliseconds.
    Wait,
    /// `<<KEYWORD:UP|DOWN:N>>`
    Scroll,
    /// `<<KEYWORD>>` or `<<KEYWORD:N>>`
    Repeat(Key),
}

/// One row of the grammar.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub keyword: &'static str,
    pub shape: Shape,
}

/// Every directive the lexer recognizes.
pub const GRAMMAR: &[Rule] = &[
    Rule { keyword: "PAUSE", shape: Shape::Pause },
    Rule { keyword: "WAIT", shape: Shape::Wait },
    Rule { keyword: "SCROLL", shape: Shape::Scroll },
    Rule { keyword: "DOWN", shape: Shape::Repeat(Key::Down) },
    Rule { keyword: "ENTER", shape: Shape::Repeat(Key::Enter) },
    Rule { keyword: "UP", shape: Shape::Repeat(Key::Up) },
    Rule { keyword: "LEFT", shape: Shape::Repeat(Key::Left) },
    Rule { keyword: "RIGHT", shape: Shape::Repeat(Key::Right) },
    Rule { keyword: "TAB", shape: Shape::Repeat(Key::Tab) },
    Rule { keyword: "BACKSPACE", shape: Shape::Repeat(Key::Backspace) },
    Rule { keyword: "DELETE", shape: Shape::Repeat(Key::Delete) },
    Rule { keyword: "HOME", shape: Shape::Repeat(Key::Home) },
    Rule { keyword: "END", shape: Shape::Repeat(Key::End) },
    Rule { keyword: "ESC", shape: Shape::Repeat(Key::Escape) },
    Rule { keyword: "ESCAPE", shape: Shape::Repeat(Key::Escape) },
    Rule { keyword: "PAGEUP", shape: Shape::Repeat(Key::PageUp) },
    Rule { keyword: "PAGEDOWN", shape: Shape::Repeat(Key::PageDown) },
    Rule { keyword: "F1", shape: Shape::Repeat(Key::F(1)) },
    Rule { keyword: "F2", shape: Shape::Repeat(Key::F(2)) },
    Rule { keyword: "F3", shape: Shape::Repeat(Key::F(3)) },
    Rule { keyword: "F4", shape: Shape::Repeat(Key::F(4)) },
    Rule { keyword: "F5", shape: Shape::Repeat(Key::F(5)) },
    Rule { keyword: "F6", shape: Shape::Repeat(Key::F(6)) },
    Rule { keyword: "F7", shape: Shape::Repeat(Key::F(7)) },
    Rule { keyword: "F8", shape: Shape::Repeat(Key::F(8)) },
    Rule { keyword: "F9", shape: Shape::Repeat(Key::F(9)) },
    Rule { keyword: "F10", shape: Shape::Repeat(Key::F(10)) },
    Rule { keyword: "F11", shape: Shape::Repeat(Key::F(11)) },
    Rule { keyword: "F12", shape: Shape::Repeat(Key::F(12)) },
];

/// Modifier names accepted before `+` in a chord.
pub const MODIFIERS: &[(&str, Key)] = &[
    ("CTRL", Key::Control),
    ("CONTROL", Key::Control),
    ("ALT", Key::Alt),
    ("SHIFT", Key::Shift),
];

/// Extra key names accepted only as a chord target.
pub const CHORD_ALIASES: &[(&str, Key)] = &[
    ("RETURN", Key::Enter),
    ("DEL", Key::Delete),
    ("SPACE", Key::Char(' ')),
];

/// Longest body (text between `<<` and `>>`) the lexer will try to match.
pub const MAX_BODY_LEN: usize = 64;

/// Match a directive body against the grammar.
///
/// Returns `None` for anything malformed; the caller treats the text
/// literally in that case.
pub fn match_body(body: &str) -> Option<Token> {
    if body.contains('+') {
        return match_chord(body);
    }

    let mut parts = body.split(':');
    let keyword = parts.next()?;
    let args: Vec<&str> = parts.collect();
    let rule = GRAMMAR
        .iter()
        .find(|rule| rule.keyword.eq_ignore_ascii_case(keyword))?;

    match (rule.shape, args.as_slice()) {
        (Shape::Pause, []) => Some(Token::Pause),
        (Shape::Wait, [n]) => parse_count(n).map(|millis| Token::Wait { millis }),
        (Shape::Scroll, [dir, n]) => {
            let direction = ScrollDirection::from_keyword(dir)?;
            let count = parse_count(n)?;
            Some(Token::Scroll { direction, count })
        }
        (Shape::Repeat(key), []) => Some(Token::RepeatKey { key, count: 1 }),
        (Shape::Repeat(key), [n]) => parse_count(n).map(|count| Token::RepeatKey { key, count }),
        _ => None,
    }
}

/// `MOD+MOD+KEY`: one or more modifiers, then exactly one key.
fn match_chord(body: &str) -> Option<Token> {
    let mut parts: Vec<&str> = body.split('+').collect();
    let key = chord_key(parts.pop()?)?;
    if parts.is_empty() {
        return None;
    }

    let mut modifiers = Modifiers::default();
    for name in parts {
        let (_, modifier) = MODIFIERS
            .iter()
            .find(|(m, _)| m.eq_ignore_ascii_case(name))?;
        match modifier {
            Key::Control => modifiers.ctrl = true,
            Key::Alt => modifiers.alt = true,
            _ => modifiers.shift = true,
        }
    }
    Some(Token::Chord { modifiers, key })
}

fn chord_key(name: &str) -> Option<Key> {
    let named = GRAMMAR
        .iter()
        .filter_map(|rule| match rule.shape {
            Shape::Repeat(key) => Some((rule.keyword, key)),
            _ => None,
        })
        .chain(CHORD_ALIASES.iter().copied())
        .find(|(keyword, _)| keyword.eq_ignore_ascii_case(name))
        .map(|(_, key)| key);
    if named.is_some() {
        return named;
    }

    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_graphic() && !matches!(c, '<' | '>' | '+') => {
            Some(Key::Char(c.to_ascii_lowercase()))
        }
        _ => None,
    }
}

/// Parse a strictly positive decimal count made of ASCII digits only.
fn parse_count(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok().filter(|&n| n > 0)
}
