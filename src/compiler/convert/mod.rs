//! Deprecation converter: rewrites legacy-dialect (3.x) shader source into
//! the current dialect (4.x) as a token-stream transformation, preserving
//! every byte the migration does not require changing.

use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::compiler::lang::lex::{self, Lexer};
use crate::compiler::lang::token::{Token, TokenKind};
use crate::compiler::lang::ShaderMode;

use self::analyze::{FunctionDecl, UniformDecl, VarDecl};
use self::stream::{TokenId, TokenStream};

pub mod analyze;
pub mod classify;
pub mod rewrite;
pub mod stream;
pub mod tables;

/// Internal short-circuiting failure; surfaced through `error_text()` /
/// `error_line()` at the public boundary.
#[derive(Debug, Clone)]
pub(crate) struct Failure {
    pub line: u32,
    pub message: String,
}

pub(crate) type CResult<T> = Result<T, Failure>;

pub(crate) fn fail<T>(message: impl Into<String>) -> CResult<T> {
    Err(Failure {
        line: 0,
        message: message.into(),
    })
}

pub(crate) fn fail_at<T>(line: u32, message: impl Into<String>) -> CResult<T> {
    Err(Failure {
        line: line + 1,
        message: message.into(),
    })
}

pub struct DeprecatedConverter {
    old_code: String,
    pub(crate) stream: TokenStream,
    pub(crate) curr: TokenId,
    pub(crate) after_type_decl: TokenId,
    pub(crate) uniform_decls: BTreeMap<String, UniformDecl>,
    pub(crate) var_decls: BTreeMap<String, Vec<VarDecl>>,
    pub(crate) function_decls: BTreeMap<String, FunctionDecl>,
    pub(crate) scope_declarations: BTreeMap<String, HashSet<String>>,
    pub(crate) uniform_type_poses: HashSet<TokenId>,
    pub(crate) shader_mode: Option<ShaderMode>,
    pub(crate) assume_correct: bool,
    pub(crate) add_comments: bool,
    pub(crate) fail_on_unported: bool,
    pub(crate) function_pass_failed: bool,
    pub(crate) var_pass_failed: bool,
    pub(crate) err_str: String,
    pub(crate) err_line: u32,
}

pub(crate) const GLOBAL_SCOPE: &str = "<global>";

impl DeprecatedConverter {
    pub fn new(code: impl Into<String>) -> Self {
        let old_code = code.into();
        let stream = TokenStream::new(Vec::new());
        let head = stream.head().expect("stream always has sentinels");
        Self {
            old_code,
            curr: head,
            after_type_decl: head,
            stream,
            uniform_decls: BTreeMap::new(),
            var_decls: BTreeMap::new(),
            function_decls: BTreeMap::new(),
            scope_declarations: BTreeMap::new(),
            uniform_type_poses: HashSet::new(),
            shader_mode: None,
            assume_correct: true,
            add_comments: false,
            fail_on_unported: true,
            function_pass_failed: false,
            var_pass_failed: false,
            err_str: String::new(),
            err_line: 0,
        }
    }

    pub fn set_add_comments(&mut self, add_comments: bool) {
        self.add_comments = add_comments;
    }

    pub fn set_fail_on_unported(&mut self, fail_on_unported: bool) {
        self.fail_on_unported = fail_on_unported;
    }

    pub fn set_assume_correct(&mut self, assume_correct: bool) {
        self.assume_correct = assume_correct;
    }

    pub fn error_text(&self) -> &str {
        &self.err_str
    }

    pub fn error_line(&self) -> u32 {
        self.err_line
    }

    /// Emits the (possibly rewritten) source. Empty when conversion never
    /// tokenized anything.
    pub fn emit(&self) -> String {
        if self.stream.len() <= 2 {
            return String::new();
        }
        self.stream.emit()
    }

    /// Whether this source is legacy-dialect. Never reports an error; any
    /// malformed or ambiguous input classifies as "not legacy".
    pub fn is_legacy(&mut self) -> bool {
        let mode_str = match lex::get_shader_type(&self.old_code) {
            Some(mode_str) => mode_str,
            None => return false,
        };
        let mode = match ShaderMode::from_legacy_name(&mode_str) {
            Some(mode) => mode,
            None => return false,
        };
        if self.preprocess().is_err() {
            return false;
        }
        self.classify(mode)
    }

    /// Converts in place; on failure the error is readable through
    /// `error_text()` / `error_line()`.
    pub fn convert(&mut self) -> bool {
        self.err_str = String::new();
        self.err_line = 0;
        match self.convert_inner() {
            Ok(()) => true,
            Err(failure) => {
                debug!("conversion failed: {}", failure.message);
                self.err_str = failure.message;
                self.err_line = failure.line;
                false
            }
        }
    }

    // ---- token plumbing ----------------------------------------------

    pub(crate) fn reset(&mut self) {
        self.stream = TokenStream::new(Lexer::tokenize(&self.old_code));
        self.curr = self.stream.head().expect("stream always has sentinels");
        self.after_type_decl = self.curr;
        self.uniform_decls.clear();
        self.var_decls.clear();
        self.function_decls.clear();
        self.scope_declarations.clear();
        self.uniform_type_poses.clear();
        self.function_pass_failed = false;
        self.var_pass_failed = false;
    }

    pub(crate) fn kind(&self, id: TokenId) -> TokenKind {
        self.stream.kind(id)
    }

    pub(crate) fn line_of(&self, id: TokenId) -> u32 {
        self.stream.get(id).line
    }

    pub(crate) fn literal_text(&self, id: TokenId) -> String {
        self.stream.get(id).literal_text()
    }

    pub(crate) fn get_next_token(&mut self) -> TokenId {
        self.curr = self.stream.next_code(self.curr);
        self.curr
    }

    pub(crate) fn get_prev_token(&mut self) -> TokenId {
        self.curr = self.stream.prev_code(self.curr);
        self.curr
    }

    pub(crate) fn get_pos(&self) -> TokenId {
        self.curr
    }

    pub(crate) fn reset_to(&mut self, pos: TokenId) {
        self.curr = pos;
    }

    fn peek(&self, count: i64) -> (TokenKind, TokenId) {
        let mut id = self.curr;
        let backwards = count < 0;
        for _ in 0..count.unsigned_abs() {
            id = if backwards {
                self.stream.prev_code(id)
            } else {
                self.stream.next_code(id)
            };
        }
        (self.stream.kind(id), id)
    }

    pub(crate) fn peek_next_kind(&self, count: u32) -> TokenKind {
        self.peek(count as i64).0
    }

    pub(crate) fn peek_prev_kind(&self, count: u32) -> TokenKind {
        self.peek(-(count as i64)).0
    }

    pub(crate) fn replace_curr(&mut self, token: Token) -> TokenId {
        self.curr = self.stream.replace(self.curr, token);
        self.curr
    }

    pub(crate) fn remove_cur_and_get_next(&mut self) -> TokenId {
        let prev = self
            .stream
            .raw_prev(self.curr)
            .expect("sentinel keeps a predecessor");
        self.stream.remove(self.curr);
        self.curr = prev;
        self.get_next_token()
    }

    /// Removes `[curr, end)` including skippables; leaves the cursor at
    /// `end`.
    pub(crate) fn remove_from_curr_to(&mut self, end: TokenId) -> TokenId {
        while self.curr != end {
            let next = self
                .stream
                .raw_next(self.curr)
                .expect("end token must follow the cursor");
            self.stream.remove(self.curr);
            self.curr = next;
        }
        self.curr
    }

    /// If the current token opens a bracket/paren/brace, the matching
    /// closer; otherwise the last token before a `;`/`,` at depth zero.
    pub(crate) fn end_of_closure(&self) -> TokenId {
        let mut ptr = self.curr;
        let start_is_scope_start = matches!(
            self.kind(ptr),
            TokenKind::CurlyBracketOpen | TokenKind::ParenthesisOpen | TokenKind::BracketOpen
        );
        let mut additional = 0i32;
        loop {
            match self.kind(ptr) {
                TokenKind::CurlyBracketOpen
                | TokenKind::ParenthesisOpen
                | TokenKind::BracketOpen => {
                    additional += 1;
                }
                TokenKind::CurlyBracketClose
                | TokenKind::ParenthesisClose
                | TokenKind::BracketClose => {
                    if additional > 0 {
                        additional -= 1;
                        if start_is_scope_start && additional == 0 {
                            return ptr;
                        }
                    } else {
                        return ptr;
                    }
                }
                TokenKind::Semicolon | TokenKind::Comma => {
                    if additional <= 0 {
                        return self.stream.prev_code(ptr);
                    }
                }
                TokenKind::Eof | TokenKind::Error => {
                    return ptr;
                }
                _ => {}
            }
            match self.stream.raw_next(ptr) {
                Some(next) => ptr = next,
                None => return ptr,
            }
        }
    }

    pub(crate) fn expect_live(&self, id: TokenId) -> CResult<TokenId> {
        match self.kind(id) {
            TokenKind::Eof => fail_at(self.line_of(id), "Unexpected end of file"),
            TokenKind::Error => fail_at(
                self.line_of(id),
                format!(
                    "Parser error ({})",
                    self.stream.get(id).text.as_deref().unwrap_or("")
                ),
            ),
            _ => Ok(id),
        }
    }

    pub(crate) fn scope_has_decl(&self, scope: &str, name: &str) -> bool {
        if self.uniform_decls.contains_key(name) || self.function_decls.contains_key(name) {
            return true;
        }
        if let Some(globals) = self.scope_declarations.get(GLOBAL_SCOPE) {
            if globals.contains(name) {
                return true;
            }
        }
        if let Some(decls) = self.scope_declarations.get(scope) {
            if decls.contains(name) {
                return true;
            }
        }
        false
    }

    pub(crate) fn skip_struct(&mut self) -> CResult<()> {
        let struct_name = self.get_next_token();
        self.expect_live(struct_name)?;
        let body_start = if self.kind(struct_name) == TokenKind::CurlyBracketOpen {
            struct_name
        } else {
            self.get_next_token()
        };
        self.expect_live(body_start)?;
        if self.kind(body_start) != TokenKind::CurlyBracketOpen {
            return fail_at(
                self.line_of(body_start),
                "Expected '{' after struct declaration",
            );
        }
        self.reset_to(body_start);
        let body_end = self.end_of_closure();
        self.expect_live(body_end)?;
        if self.kind(body_end) != TokenKind::CurlyBracketClose {
            return fail_at(self.line_of(body_start), "Expected '}' bracket");
        }
        self.reset_to(body_end);
        if tables::kind_is_identifier(self.peek_next_kind(1)) {
            self.get_next_token();
        }
        Ok(())
    }

    // ---- comment stamping --------------------------------------------

    fn stamp_text(comment: &str) -> String {
        format!("/* !convert: {} */", comment)
    }

    /// Stamps a block comment on its own line immediately before the line
    /// holding `pos`. An identical immediately preceding stamp is reused.
    pub(crate) fn add_comment_before(&mut self, comment: &str, pos: TokenId) {
        let mut start = pos;
        while self.stream.raw_prev(start).is_some()
            && self.kind(start) != TokenKind::Newline
            && self.kind(start) != TokenKind::Eof
        {
            start = self.stream.raw_prev(start).unwrap();
        }
        let text = Self::stamp_text(comment);
        if let Some(prev) = self.stream.raw_prev(start) {
            if self.kind(prev) == TokenKind::BlockComment && self.literal_text(prev) == text {
                return;
            }
        }
        self.stream.insert_many_after(
            start,
            vec![
                Token::with_text(TokenKind::BlockComment, text),
                Token::new(TokenKind::Newline),
            ],
        );
    }

    /// Stamps a note at the end of the line holding `pos`.
    pub(crate) fn add_comment_at_eol(&mut self, comment: &str, pos: TokenId) {
        let mut end = pos;
        while self.kind(end) != TokenKind::Newline && self.kind(end) != TokenKind::Eof {
            match self.stream.raw_next(end) {
                Some(next) => end = next,
                None => break,
            }
        }
        let text = Self::stamp_text(comment);
        if let Some(prev) = self.stream.raw_prev(end) {
            if self.kind(prev) == TokenKind::BlockComment && self.literal_text(prev) == text {
                return;
            }
        }
        self.stream
            .insert_before(end, Token::with_text(TokenKind::BlockComment, text));
    }

    /// Synthesizes `uniform <type> <name> : <hints>;` directly after the
    /// `shader_type` line and registers it in the uniform table so later
    /// references resolve against it.
    pub(crate) fn insert_uniform_declaration(&mut self, name: &str) -> CResult<()> {
        let uniform_type = match tables::get_removed_builtin_type(name) {
            Some(kind) if kind != TokenKind::Error => kind,
            _ => return fail("No uniform declaration for this built-in"),
        };
        let hints = tables::get_removed_builtin_hints(name);

        let mut decl = vec![
            Token::new(TokenKind::Newline),
            Token::new(TokenKind::Uniform),
            Token::new(TokenKind::Space),
            Token::new(uniform_type),
            Token::new(TokenKind::Space),
            Token::with_text(TokenKind::Identifier, name),
            Token::new(TokenKind::Space),
            Token::new(TokenKind::Colon),
            Token::new(TokenKind::Space),
        ];
        for (i, hint) in hints.iter().enumerate() {
            decl.push(Token::new(*hint));
            if i + 1 < hints.len() {
                decl.push(Token::new(TokenKind::Comma));
                decl.push(Token::new(TokenKind::Space));
            }
        }
        decl.push(Token::new(TokenKind::Semicolon));
        decl.push(Token::new(TokenKind::Newline));
        self.stream.insert_many_after(self.after_type_decl, decl);

        let cur_pos = self.get_pos();
        self.reset_to(self.after_type_decl);
        let start = self.get_next_token(); // uniform
        let ty = self.get_next_token(); // type
        let name_pos = self.get_next_token(); // identifier
        self.get_next_token(); // colon
        let mut hint_poses = Vec::new();
        for i in 0..hints.len() {
            hint_poses.push(self.get_next_token());
            if i + 1 < hints.len() {
                self.get_next_token(); // comma
            }
        }
        let end = self.get_next_token(); // semicolon
        self.uniform_decls.insert(
            name.to_string(),
            UniformDecl {
                start,
                end,
                ty,
                name: name_pos,
                hints: hint_poses,
                is_array: false,
            },
        );
        self.reset_to(cur_pos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_before_conversion_is_empty() {
        let converter = DeprecatedConverter::new("shader_type spatial;");
        assert_eq!(converter.emit(), "");
    }

    #[test]
    fn test_end_of_closure_statement() {
        let mut converter = DeprecatedConverter::new("shader_type spatial; float x = 1.0 + (2.0);");
        converter.reset();
        // Walk to `x`.
        let mut id = converter.get_next_token();
        while converter.literal_text(id) != "x" {
            id = converter.get_next_token();
        }
        let end = converter.end_of_closure();
        assert_eq!(converter.literal_text(end), ")");
    }

    #[test]
    fn test_end_of_closure_group() {
        let mut converter = DeprecatedConverter::new("shader_type spatial; void f(int a, int b) {}");
        converter.reset();
        let mut id = converter.get_next_token();
        while converter.kind(id) != TokenKind::ParenthesisOpen {
            id = converter.get_next_token();
        }
        let end = converter.end_of_closure();
        assert_eq!(converter.kind(end), TokenKind::ParenthesisClose);
    }

    #[test]
    fn test_comment_stamp_dedup() {
        let mut converter = DeprecatedConverter::new("shader_type spatial;\nfloat x;\n");
        converter.reset();
        let mut id = converter.get_next_token();
        while converter.literal_text(id) != "x" {
            id = converter.get_next_token();
        }
        converter.add_comment_before("test note", id);
        converter.add_comment_before("test note", id);
        let emitted = converter.emit();
        assert_eq!(emitted.matches("/* !convert: test note */").count(), 1);
    }
}
