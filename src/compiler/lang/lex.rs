//! Tokenizer for the shader DSL. Whitespace, comments and preprocessor
//! directives are retained as skippable tokens so a stream can be emitted
//! back to byte-identical source.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::token::{Token, TokenKind};
use crate::compiler::common::span::Span;

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    TokenKind::ALL
        .iter()
        .copied()
        .filter(|kind| kind.is_word())
        .map(|kind| (kind.spelling(), kind))
        .collect()
});

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 0 }
    }

    /// Tokenizes the whole input. An unrecognized character produces a
    /// single `Error` token and ends the stream.
    pub fn tokenize(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src);
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next_token() {
            let stop = token.kind == TokenKind::Error;
            tokens.push(token);
            if stop {
                break;
            }
        }
        tokens
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.rest().chars().nth(offset)
    }

    fn make(&mut self, kind: TokenKind, len: usize) -> Token {
        let lo = self.pos;
        self.pos += len;
        Token {
            kind,
            text: None,
            constant: 0.0,
            line: self.line,
            span: Some(Span::new(lo, self.pos)),
        }
    }

    fn make_text(&mut self, kind: TokenKind, len: usize) -> Token {
        let lo = self.pos;
        let text = self.src[lo..lo + len].to_string();
        let mut token = self.make(kind, len);
        token.text = Some(text);
        token
    }

    fn next_token(&mut self) -> Option<Token> {
        let c = self.peek_char(0)?;
        let token = match c {
            '\t' => self.make(TokenKind::Tab, 1),
            '\r' => self.make(TokenKind::Cr, 1),
            ' ' => self.make(TokenKind::Space, 1),
            '\n' => {
                let token = self.make(TokenKind::Newline, 1);
                self.line += 1;
                token
            }
            '/' => match self.peek_char(1) {
                Some('/') => {
                    let len = self.rest().find('\n').unwrap_or(self.rest().len());
                    self.make_text(TokenKind::LineComment, len)
                }
                Some('*') => {
                    let len = match self.rest()[2..].find("*/") {
                        Some(end) => end + 4,
                        None => self.rest().len(),
                    };
                    let newlines = self.rest()[..len].matches('\n').count() as u32;
                    let token = self.make_text(TokenKind::BlockComment, len);
                    self.line += newlines;
                    token
                }
                Some('=') => self.make(TokenKind::OpAssignDiv, 2),
                _ => self.make(TokenKind::OpDiv, 1),
            },
            '#' => {
                let len = self.rest().find('\n').unwrap_or(self.rest().len());
                self.make_text(TokenKind::PreprocDirective, len)
            }
            '0'..='9' => self.lex_number(),
            '.' if matches!(self.peek_char(1), Some('0'..='9')) => self.lex_number(),
            'a'..='z' | 'A'..='Z' | '_' => self.lex_word(),
            _ => self.lex_punct(c),
        };
        Some(token)
    }

    fn lex_word(&mut self) -> Token {
        let len = self
            .rest()
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .count();
        let word = &self.src[self.pos..self.pos + len];
        match KEYWORDS.get(word) {
            Some(&kind) => self.make(kind, len),
            None => self.make_text(TokenKind::Identifier, len),
        }
    }

    fn lex_number(&mut self) -> Token {
        let s = self.rest();
        let bytes = s.as_bytes();
        let mut end = 0;
        let mut is_float = false;
        let mut is_uint = false;

        if s.starts_with("0x") || s.starts_with("0X") {
            end = 2;
            while end < bytes.len() && bytes[end].is_ascii_hexdigit() {
                end += 1;
            }
            let value = i64::from_str_radix(&s[2..end], 16).unwrap_or(0);
            let mut token = self.make_text(TokenKind::IntConstant, end);
            token.constant = value as f64;
            return token;
        }

        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end < bytes.len() && bytes[end] == b'.' {
            is_float = true;
            end += 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
        if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
            let mut exp_end = end + 1;
            if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
                exp_end += 1;
            }
            if exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
                is_float = true;
                end = exp_end;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
            }
        }
        if end < bytes.len() && bytes[end] == b'f' {
            // The legacy dialect allows an `f` sigil even without a decimal
            // point, so the suffix alone makes this a float.
            is_float = true;
            end += 1;
        } else if end < bytes.len() && bytes[end] == b'u' && !is_float {
            is_uint = true;
            end += 1;
        }

        let digits = s[..end].trim_end_matches(['f', 'u']);
        let kind = if is_float {
            TokenKind::FloatConstant
        } else if is_uint {
            TokenKind::UintConstant
        } else {
            TokenKind::IntConstant
        };
        let mut token = self.make_text(kind, end);
        token.constant = digits.parse::<f64>().unwrap_or(0.0);
        token
    }

    fn lex_punct(&mut self, c: char) -> Token {
        let next = self.peek_char(1);
        let next2 = self.peek_char(2);
        match c {
            '<' => match (next, next2) {
                (Some('<'), Some('=')) => self.make(TokenKind::OpAssignShiftLeft, 3),
                (Some('<'), _) => self.make(TokenKind::OpShiftLeft, 2),
                (Some('='), _) => self.make(TokenKind::OpLessEqual, 2),
                _ => self.make(TokenKind::OpLess, 1),
            },
            '>' => match (next, next2) {
                (Some('>'), Some('=')) => self.make(TokenKind::OpAssignShiftRight, 3),
                (Some('>'), _) => self.make(TokenKind::OpShiftRight, 2),
                (Some('='), _) => self.make(TokenKind::OpGreaterEqual, 2),
                _ => self.make(TokenKind::OpGreater, 1),
            },
            '=' => match next {
                Some('=') => self.make(TokenKind::OpEqual, 2),
                _ => self.make(TokenKind::OpAssign, 1),
            },
            '!' => match next {
                Some('=') => self.make(TokenKind::OpNotEqual, 2),
                _ => self.make(TokenKind::OpNot, 1),
            },
            '+' => match next {
                Some('=') => self.make(TokenKind::OpAssignAdd, 2),
                Some('+') => self.make(TokenKind::OpIncrement, 2),
                _ => self.make(TokenKind::OpAdd, 1),
            },
            '-' => match next {
                Some('=') => self.make(TokenKind::OpAssignSub, 2),
                Some('-') => self.make(TokenKind::OpDecrement, 2),
                _ => self.make(TokenKind::OpSub, 1),
            },
            '*' => match next {
                Some('=') => self.make(TokenKind::OpAssignMul, 2),
                _ => self.make(TokenKind::OpMul, 1),
            },
            '%' => match next {
                Some('=') => self.make(TokenKind::OpAssignMod, 2),
                _ => self.make(TokenKind::OpMod, 1),
            },
            '&' => match next {
                Some('&') => self.make(TokenKind::OpAnd, 2),
                Some('=') => self.make(TokenKind::OpAssignBitAnd, 2),
                _ => self.make(TokenKind::OpBitAnd, 1),
            },
            '|' => match next {
                Some('|') => self.make(TokenKind::OpOr, 2),
                Some('=') => self.make(TokenKind::OpAssignBitOr, 2),
                _ => self.make(TokenKind::OpBitOr, 1),
            },
            '^' => match next {
                Some('=') => self.make(TokenKind::OpAssignBitXor, 2),
                _ => self.make(TokenKind::OpBitXor, 1),
            },
            '~' => self.make(TokenKind::OpBitInvert, 1),
            '[' => self.make(TokenKind::BracketOpen, 1),
            ']' => self.make(TokenKind::BracketClose, 1),
            '{' => self.make(TokenKind::CurlyBracketOpen, 1),
            '}' => self.make(TokenKind::CurlyBracketClose, 1),
            '(' => self.make(TokenKind::ParenthesisOpen, 1),
            ')' => self.make(TokenKind::ParenthesisClose, 1),
            '?' => self.make(TokenKind::Question, 1),
            ',' => self.make(TokenKind::Comma, 1),
            ':' => self.make(TokenKind::Colon, 1),
            ';' => self.make(TokenKind::Semicolon, 1),
            '.' => self.make(TokenKind::Period, 1),
            _ => {
                let mut token = self.make(TokenKind::Error, c.len_utf8());
                token.text = Some(format!("unexpected character '{}'", c));
                token
            }
        }
    }
}

/// Reads the shader mode name from the mandatory `shader_type <id>;` header.
/// Returns `None` if anything else comes first, including a preprocessor
/// directive.
pub fn get_shader_type(src: &str) -> Option<String> {
    let tokens = Lexer::tokenize(src);
    let mut code = tokens.iter().filter(|tk| {
        !matches!(
            tk.kind,
            TokenKind::Tab
                | TokenKind::Cr
                | TokenKind::Space
                | TokenKind::Newline
                | TokenKind::BlockComment
                | TokenKind::LineComment
        )
    });
    if code.next()?.kind != TokenKind::ShaderType {
        return None;
    }
    let name = code.next()?;
    if name.kind != TokenKind::Identifier {
        return None;
    }
    if code.next()?.kind != TokenKind::Semicolon {
        return None;
    }
    name.text.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(src: &str) -> String {
        Lexer::tokenize(src)
            .iter()
            .map(|tk| tk.literal_text())
            .collect()
    }

    #[test]
    fn test_roundtrip_preserves_source() {
        let src = "shader_type spatial;\n\n// comment\nuniform sampler2D tex : hint_albedo;\nvoid fragment() {\n\tALBEDO = texture(tex, UV).rgb; /* inline */\n}\n";
        assert_eq!(roundtrip(src), src);
    }

    #[test]
    fn test_numbers() {
        let tokens = Lexer::tokenize("1.0 1f 2u 0x1F 3e-2 .5");
        let kinds: Vec<_> = tokens
            .iter()
            .filter(|tk| !tk.kind.is_skippable())
            .map(|tk| (tk.kind, tk.literal_text()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (TokenKind::FloatConstant, "1.0".to_string()),
                (TokenKind::FloatConstant, "1f".to_string()),
                (TokenKind::UintConstant, "2u".to_string()),
                (TokenKind::IntConstant, "0x1F".to_string()),
                (TokenKind::FloatConstant, "3e-2".to_string()),
                (TokenKind::FloatConstant, ".5".to_string()),
            ]
        );
        assert_eq!(tokens[0].constant, 1.0);
        assert_eq!(tokens[2].constant, 1.0);
    }

    #[test]
    fn test_keywords_and_operators() {
        let tokens = Lexer::tokenize("uniform vec3 x <<= 2;");
        let kinds: Vec<_> = tokens
            .iter()
            .filter(|tk| !tk.kind.is_skippable())
            .map(|tk| tk.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Uniform,
                TokenKind::TypeVec3,
                TokenKind::Identifier,
                TokenKind::OpAssignShiftLeft,
                TokenKind::IntConstant,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_preproc_and_line_numbers() {
        let tokens = Lexer::tokenize("shader_type spatial;\n#define FOO 1\nvoid x() {}");
        let preproc = tokens
            .iter()
            .find(|tk| tk.kind == TokenKind::PreprocDirective)
            .unwrap();
        assert_eq!(preproc.literal_text(), "#define FOO 1");
        assert_eq!(preproc.line, 1);
    }

    #[test]
    fn test_get_shader_type() {
        assert_eq!(
            get_shader_type("shader_type particles;"),
            Some("particles".to_string())
        );
        assert_eq!(
            get_shader_type("// leading comment\nshader_type spatial;"),
            Some("spatial".to_string())
        );
        assert_eq!(get_shader_type("#define X\nshader_type spatial;"), None);
        assert_eq!(get_shader_type("void fn() {}"), None);
    }
}
