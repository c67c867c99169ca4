//! Script parsing: source text → ordered playback tokens.
//!
//! Source files are typed verbatim except for a small set of `<<...>>`
//! directives (see [`directive::GRAMMAR`]). Parsing is total: every
//! character of the input ends up in exactly one token, in source order.

pub mod directive;
pub mod lexer;
pub mod token;

pub use token::{reconstruct, Key, Modifiers, ScrollDirection, Token};

use lexer::Lexer;

/// Parse source text into playback tokens.
pub fn parse(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize()
}
