//! The textual IR lexer (§6.1).
//!
//! Unlike a typical expression language, newlines are significant here: they
//! terminate instructions, so whitespace-skipping stops short of consuming
//! them and they come out of [`Lexer::next`] as their own token kind.

use crate::error::CompileError;
use derive_more::Display;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Ident,
    Int,
    Str,
    Percent,
    Equals,
    Comma,
    Colon,
    Minus,
    LParen,
    RParen,
    Newline,
}

#[derive(Clone, Copy, Display, Debug)]
#[display("{kind:?}({text:?})")]
pub struct Token<'src> {
    pub kind: TokenKind,
    /// The exact source slice. For `Str`, this excludes the surrounding
    /// quotes. For `Int`, this is the decimal digits.
    pub text: &'src str,
    pub pos: usize,
}

pub struct Lexer<'src> {
    input: &'src str,
    pos: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

impl<'src> Lexer<'src> {
    pub fn new(input: &'src str) -> Self {
        Lexer { input, pos: 0 }
    }

    pub fn end_of_input(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn rest(&self) -> &'src str {
        &self.input[self.pos..]
    }

    /// Skip spaces, tabs, carriage returns and `//` line comments, but *not*
    /// newlines: those are their own significant token.
    fn skip_insignificant_whitespace(&mut self) {
        loop {
            let rest = self.rest();
            let skip = if let Some(stripped) = rest.strip_prefix("//") {
                stripped.find('\n').unwrap_or(stripped.len()) + 2
            } else {
                let ws_len = rest
                    .chars()
                    .take_while(|&c| c == ' ' || c == '\t' || c == '\r')
                    .map(char::len_utf8)
                    .sum::<usize>();
                ws_len
            };

            if skip == 0 {
                break;
            }
            self.pos += skip;
        }
    }

    /// Return the next token, or `None` at end of input.
    pub fn next(&mut self) -> Result<Option<Token<'src>>, CompileError> {
        self.skip_insignificant_whitespace();

        if self.end_of_input() {
            return Ok(None);
        }

        let start = self.pos;
        let ch = self.rest().chars().next().unwrap();

        let single = |kind: TokenKind, len: usize, pos: usize, input: &'src str| Token {
            kind,
            text: &input[pos..pos + len],
            pos,
        };

        let tok = match ch {
            '\n' => {
                self.pos += 1;
                single(TokenKind::Newline, 1, start, self.input)
            }
            '%' => {
                self.pos += 1;
                single(TokenKind::Percent, 1, start, self.input)
            }
            '=' => {
                self.pos += 1;
                single(TokenKind::Equals, 1, start, self.input)
            }
            ',' => {
                self.pos += 1;
                single(TokenKind::Comma, 1, start, self.input)
            }
            ':' => {
                self.pos += 1;
                single(TokenKind::Colon, 1, start, self.input)
            }
            '-' => {
                self.pos += 1;
                single(TokenKind::Minus, 1, start, self.input)
            }
            '(' => {
                self.pos += 1;
                single(TokenKind::LParen, 1, start, self.input)
            }
            ')' => {
                self.pos += 1;
                single(TokenKind::RParen, 1, start, self.input)
            }
            '"' => {
                let rest = &self.rest()[1..];
                let end = rest.find('"').ok_or(CompileError::LexError { pos: start, ch })?;
                self.pos += 2 + end;
                Token {
                    kind: TokenKind::Str,
                    text: &rest[..end],
                    pos: start,
                }
            }
            c if c.is_ascii_digit() => {
                let len = self
                    .rest()
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .count();
                self.pos += len;
                single(TokenKind::Int, len, start, self.input)
            }
            c if is_ident_char(c) && !c.is_ascii_digit() => {
                let len = self.rest().chars().take_while(|&c| is_ident_char(c)).count();
                self.pos += len;
                single(TokenKind::Ident, len, start, self.input)
            }
            _ => return Err(CompileError::LexError { pos: start, ch }),
        };

        Ok(Some(tok))
    }

    /// Lex the whole input eagerly; convenient for the parser and for the
    /// `--out tokens` CLI mode.
    pub fn lex_all(input: &'src str) -> Result<Vec<Token<'src>>, CompileError> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        while let Some(tok) = lexer.next()? {
            out.push(tok);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_an_instruction_line() {
        let toks = Lexer::lex_all("%x = literal i32 42\n").unwrap();
        let kinds: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Percent,
                TokenKind::Ident,
                TokenKind::Equals,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Int,
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn block_label_and_comment_are_skipped_correctly() {
        let toks = Lexer::lex_all(".loop: // comment\njmp .loop\n").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Ident);
        assert_eq!(toks[0].text, ".loop");
        assert_eq!(toks[1].kind, TokenKind::Colon);
        assert_eq!(toks[2].kind, TokenKind::Newline);
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(Lexer::lex_all("global_string %s = \"oops").is_err());
    }
}
