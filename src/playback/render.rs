//! Emission-time transforms: token → simulator actions.
//!
//! Quad-space-to-tab, auto-home and Ctrl+Enter depend on the live config, so
//! they are applied here at emission time and never stored in the token.

use super::config::PlaybackConfig;
use crate::input::InputAction;
use crate::script::{Key, Modifiers, Token};

/// Actions to perform when emitting `tokens[index]`.
///
/// Returns an empty list for tokens that produce no keystrokes (`\r`,
/// directives that only affect timing, and the tail of a tabbed space run).
pub fn render(tokens: &[Token], index: usize, config: &PlaybackConfig) -> Vec<InputAction> {
    let Some(&token) = tokens.get(index) else {
        return Vec::new();
    };

    match token {
        Token::Character('\r') => Vec::new(),
        Token::Character(' ') if config.quad_spaces_to_tab => render_space(tokens, index),
        Token::Character(c) => vec![InputAction::TypeChar(c)],
        Token::Newline => {
            let mut actions = Vec::with_capacity(2);
            if config.ctrl_on_newline {
                actions.push(InputAction::Chord {
                    modifiers: Modifiers::CTRL,
                    key: Key::Enter,
                });
            } else {
                actions.push(InputAction::press(Key::Enter));
            }
            if config.auto_home_on_newline {
                actions.push(InputAction::press(Key::Home));
            }
            actions
        }
        Token::Scroll { direction, count } => vec![InputAction::Scroll { direction, count }],
        Token::RepeatKey { key, count } => vec![InputAction::Press { key, repeat: count }],
        Token::Chord { modifiers, key } => vec![InputAction::Chord { modifiers, key }],
        Token::Pause | Token::Wait { .. } => Vec::new(),
    }
}

/// A space inside a run of spaces. Each complete group of four becomes one
/// Tab, pressed on the group's first space; leftovers type as spaces.
fn render_space(tokens: &[Token], index: usize) -> Vec<InputAction> {
    let is_space = |t: &Token| *t == Token::Character(' ');

    let run_start = tokens[..index]
        .iter()
        .rposition(|t| !is_space(t))
        .map_or(0, |i| i + 1);
    let run_end = tokens[index..]
        .iter()
        .position(|t| !is_space(t))
        .map_or(tokens.len(), |i| index + i);

    let offset = index - run_start;
    let full_groups = (run_end - run_start) / 4;

    if offset / 4 >= full_groups {
        vec![InputAction::TypeChar(' ')]
    } else if offset % 4 == 0 {
        vec![InputAction::press(Key::Tab)]
    } else {
        Vec::new()
    }
}
