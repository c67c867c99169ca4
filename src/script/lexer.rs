//! Lexer for playback scripts.
//!
//! Converts source text into a stream of [`Token`]s. Never fails: a
//! `<<...>>` sequence that does not match the grammar is emitted as
//! ordinary characters.

use super::directive::{match_body, MAX_BODY_LEN};
use super::token::Token;

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(self.chars.len());

        while !self.is_at_end() {
            let ch = self.peek();

            if ch == '<' && self.peek_next() == Some('<') {
                if let Some(token) = self.lex_directive() {
                    tokens.push(token);
                    continue;
                }
            }

            self.advance();
            tokens.push(match ch {
                '\n' => Token::Newline,
                c => Token::Character(c),
            });
        }

        tokens
    }

    fn peek(&self) -> char {
        self.chars[self.pos]
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        ch
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Try to read a directive at the current position. On success the
    /// whole `<<...>>` span is consumed; on failure nothing is.
    fn lex_directive(&mut self) -> Option<Token> {
        let body_start = self.pos + 2;
        let limit = (body_start + MAX_BODY_LEN).min(self.chars.len());

        let mut end = None;
        let mut i = body_start;
        while i + 1 < self.chars.len() && i <= limit {
            if self.chars[i] == '>' && self.chars[i + 1] == '>' {
                end = Some(i);
                break;
            }
            if self.chars[i] == '\n' {
                break;
            }
            i += 1;
        }

        let end = end?;
        let body: String = self.chars[body_start..end].iter().collect();
        let token = match_body(&body)?;
        self.pos = end + 2;
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::token::{Key, Modifiers, ScrollDirection};

    fn lex(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize()
    }

    fn chars(src: &str) -> Vec<Token> {
        src.chars()
            .map(|c| match c {
                '\n' => Token::Newline,
                c => Token::Character(c),
            })
            .collect()
    }

    #[test]
    fn empty_source() {
        assert!(lex("").is_empty());
    }

    #[test]
    fn plain_text_and_newlines() {
        assert_eq!(
            lex("a b\nc"),
            vec![
                Token::Character('a'),
                Token::Character(' '),
                Token::Character('b'),
                Token::Newline,
                Token::Character('c'),
            ]
        );
    }

    #[test]
    fn pause_between_characters() {
        assert_eq!(
            lex("a<<PAUSE>>b"),
            vec![Token::Character('a'), Token::Pause, Token::Character('b')]
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(lex("<<pause>>"), vec![Token::Pause]);
        assert_eq!(
            lex("<<Scroll:Down:2>>"),
            vec![Token::Scroll {
                direction: ScrollDirection::Down,
                count: 2
            }]
        );
    }

    #[test]
    fn malformed_scroll_count_is_literal() {
        let src = "<<SCROLL:UP:abc>>";
        let tokens = lex(src);
        assert_eq!(tokens, chars(src));
        assert_eq!(tokens.len(), src.chars().count());
    }

    #[test]
    fn zero_and_negative_counts_are_literal() {
        assert_eq!(lex("<<DOWN:0>>"), chars("<<DOWN:0>>"));
        assert_eq!(lex("<<ENTER:-1>>"), chars("<<ENTER:-1>>"));
    }

    #[test]
    fn repeat_key_directives() {
        assert_eq!(
            lex("<<DOWN:3>><<ENTER:2>>"),
            vec![
                Token::RepeatKey {
                    key: Key::Down,
                    count: 3
                },
                Token::RepeatKey {
                    key: Key::Enter,
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn chord_directives() {
        assert_eq!(
            lex("x<<ctrl+s>>y<<ALT+TAB>>"),
            vec![
                Token::Character('x'),
                Token::Chord {
                    modifiers: Modifiers::CTRL,
                    key: Key::Char('s'),
                },
                Token::Character('y'),
                Token::Chord {
                    modifiers: Modifiers {
                        alt: true,
                        ..Modifiers::default()
                    },
                    key: Key::Tab,
                },
            ]
        );
        // An unknown modifier leaves the whole directive as text.
        assert_eq!(lex("<<HYPER+s>>"), chars("<<HYPER+s>>"));
    }

    #[test]
    fn unterminated_directive_is_literal() {
        assert_eq!(lex("x <<PAUSE"), chars("x <<PAUSE"));
        assert_eq!(lex("<<"), chars("<<"));
        assert_eq!(lex("<<>>"), chars("<<>>"));
    }

    #[test]
    fn directive_does_not_span_lines() {
        assert_eq!(lex("<<PAU\nSE>>"), chars("<<PAU\nSE>>"));
    }

    #[test]
    fn extra_angle_bracket_rescans() {
        assert_eq!(
            lex("<<<PAUSE>>>"),
            vec![Token::Character('<'), Token::Pause, Token::Character('>')]
        );
    }

    #[test]
    fn first_closing_marker_wins() {
        // The body "PAUSE" closes at the first ">>"; the rest is text.
        assert_eq!(
            lex("<<PAUSE>>PAUSE>>"),
            [vec![Token::Pause], chars("PAUSE>>")].concat()
        );
    }

    #[test]
    fn overlong_body_is_literal() {
        let src = format!("<<{}>>", "A".repeat(MAX_BODY_LEN + 10));
        assert_eq!(lex(&src), chars(&src));
    }

    #[test]
    fn wait_directive() {
        assert_eq!(lex("<<WAIT:1500>>"), vec![Token::Wait { millis: 1500 }]);
        assert_eq!(lex("<<WAIT>>"), chars("<<WAIT>>"));
    }

    #[test]
    fn unicode_passes_through() {
        assert_eq!(
            lex("é→<<TAB>>"),
            vec![
                Token::Character('é'),
                Token::Character('→'),
                Token::RepeatKey {
                    key: Key::Tab,
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn carriage_returns_are_characters() {
        assert_eq!(
            lex("a\r\nb"),
            vec![
                Token::Character('a'),
                Token::Character('\r'),
                Token::Newline,
                Token::Character('b'),
            ]
        );
    }
}
