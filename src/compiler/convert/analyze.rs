//! Multi-pass declaration analysis over the token stream. After these
//! passes, every later classification or rewriting decision answers "what
//! does this name refer to, and in what scope?" from the tables built here.
//!
//! Pass 1 collects uniform declarations, pass 2 function declarations, and
//! pass 3 variable declarations together with the scope table. The third
//! pass may be allowed to fail when `assume_correct` is off; the rewriter
//! then works from partial tables.

use std::collections::HashSet;

use log::trace;

use super::stream::TokenId;
use super::tables;
use super::{fail, fail_at, CResult, DeprecatedConverter, Failure, GLOBAL_SCOPE};
use crate::compiler::lang::token::TokenKind;
use crate::compiler::lang::ShaderMode;

#[derive(Debug, Clone)]
pub(crate) struct UniformDecl {
    pub start: TokenId,
    pub end: TokenId,
    pub ty: TokenId,
    pub name: TokenId,
    pub hints: Vec<TokenId>,
    pub is_array: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct VarDecl {
    pub start: TokenId,
    pub end: TokenId,
    pub ty: TokenId,
    pub name: TokenId,
    pub is_array: bool,
    /// `T[N] name` declaration style, current dialect only.
    pub new_arr_style_decl: bool,
    pub is_func_arg: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionDecl {
    pub start: TokenId,
    pub ty: TokenId,
    pub name: TokenId,
    pub args_open: TokenId,
    pub args_close: TokenId,
    pub body_open: TokenId,
    pub body_close: TokenId,
    pub has_array_return_type: bool,
}

impl DeprecatedConverter {
    /// Tokenizes and runs the three declaration passes. Leaves the cursor
    /// at the head of the stream.
    pub(crate) fn preprocess(&mut self) -> CResult<()> {
        self.reset();
        if self.stream.len() <= 2 {
            return fail("Empty shader file");
        }

        let first = self.get_next_token();
        self.expect_live(first)?;
        if self.kind(first) != TokenKind::ShaderType {
            return fail_at(self.line_of(first), "Shader type must be first token");
        }
        let id = self.get_next_token();
        self.expect_live(id)?;
        if self.kind(id) != TokenKind::Identifier {
            return fail_at(self.line_of(id), "Invalid shader type");
        }
        let mode_string = self.literal_text(id);
        let semi = self.get_next_token();
        self.expect_live(semi)?;
        if self.kind(semi) != TokenKind::Semicolon {
            return fail_at(self.line_of(semi), "Expected semi-colon after shader type");
        }
        self.shader_mode = ShaderMode::from_legacy_name(&mode_string);
        self.after_type_decl = self.get_pos();

        let head = self.stream.head().expect("stream always has sentinels");
        if let Err(failure) = self.uniform_pass() {
            self.reset_to(head);
            return Err(Failure {
                line: failure.line,
                message: format!("First pre-process pass failed: {}", failure.message),
            });
        }
        if let Err(failure) = self.decl_pass(true) {
            self.function_pass_failed = true;
            self.reset_to(head);
            return Err(Failure {
                line: failure.line,
                message: format!("Second pre-process pass failed: {}", failure.message),
            });
        }
        if let Err(failure) = self.decl_pass(false) {
            self.var_pass_failed = true;
            let message = format!("Third pre-process pass failed: {}", failure.message);
            if self.assume_correct {
                self.reset_to(head);
                return Err(Failure {
                    line: failure.line,
                    message,
                });
            }
            // Lenient analysis: remember the warning, keep partial tables.
            trace!("{}", message);
            self.err_str = message;
            self.err_line = failure.line;
        }
        self.reset_to(head);
        trace!(
            "analysis: {} uniforms, {} functions, {} vars (function_pass_failed={}, var_pass_failed={})",
            self.uniform_decls.len(),
            self.function_decls.len(),
            self.var_decls.len(),
            self.function_pass_failed,
            self.var_pass_failed
        );
        Ok(())
    }

    /// The cursor sits on a `[`; steps past the matching `]` and leaves the
    /// cursor on the following code token.
    fn skip_array_size(&mut self) -> CResult<()> {
        let end = self.end_of_closure();
        self.expect_live(end)?;
        if self.kind(end) != TokenKind::BracketClose {
            return fail_at(self.line_of(end), "Expected ']' after array type");
        }
        self.reset_to(end);
        let next = self.get_next_token();
        self.expect_live(next)?;
        Ok(())
    }

    // ---- pass 1: uniforms --------------------------------------------

    fn uniform_pass(&mut self) -> CResult<()> {
        loop {
            let cur = self.get_next_token();
            if self.kind(cur) == TokenKind::Eof {
                break;
            }
            if self.kind(cur) != TokenKind::Uniform {
                continue;
            }

            let start = cur;
            let mut next = self.get_next_token();
            self.expect_live(next)?;
            while self.kind(next).is_precision() || self.kind(next).is_interpolation() {
                next = self.get_next_token();
                self.expect_live(next)?;
            }
            if !tables::token_is_type(self.stream.get(next)) {
                return fail_at(self.line_of(next), "Expected type after 'uniform'");
            }
            let ty = next;
            self.uniform_type_poses.insert(ty);

            let mut is_array = false;
            next = self.get_next_token();
            self.expect_live(next)?;
            if self.kind(next) == TokenKind::BracketOpen {
                is_array = true;
                self.skip_array_size()?;
                next = self.get_pos();
            }
            if !tables::kind_is_identifier(self.kind(next)) {
                return fail_at(self.line_of(next), "Expected identifier after uniform type");
            }
            let name = self.literal_text(next);
            let name_pos = next;

            next = self.get_next_token();
            self.expect_live(next)?;
            if self.kind(next) == TokenKind::BracketOpen {
                is_array = true;
                self.skip_array_size()?;
                next = self.get_pos();
            }

            let mut hints = Vec::new();
            if self.kind(next) == TokenKind::Colon {
                loop {
                    next = self.get_next_token();
                    self.expect_live(next)?;
                    if !tables::token_is_hint(self.stream.get(next)) {
                        return fail_at(
                            self.line_of(next),
                            "Expected hint after ':' in uniform declaration",
                        );
                    }
                    hints.push(next);
                    next = self.get_next_token();
                    self.expect_live(next)?;
                    if self.kind(next) == TokenKind::ParenthesisOpen {
                        let close = self.end_of_closure();
                        self.expect_live(close)?;
                        if self.kind(close) != TokenKind::ParenthesisClose {
                            return fail_at(self.line_of(close), "Expected ')' after hint range");
                        }
                        self.reset_to(close);
                        next = self.get_next_token();
                        self.expect_live(next)?;
                    }
                    if self.kind(next) != TokenKind::Comma {
                        break;
                    }
                }
            }
            if self.kind(next) == TokenKind::OpAssign {
                let end = self.end_of_closure();
                self.expect_live(end)?;
                self.reset_to(end);
                next = self.get_next_token();
            }
            let end = next;
            self.expect_live(end)?;
            if self.kind(end) != TokenKind::Semicolon {
                return fail_at(self.line_of(end), "Expected ';' after uniform declaration");
            }
            self.uniform_decls.insert(
                name,
                UniformDecl {
                    start,
                    end,
                    ty,
                    name: name_pos,
                    hints,
                    is_array,
                },
            );
        }
        Ok(())
    }

    // ---- pass 2 (functions) and pass 3 (variables + scopes) ----------

    fn decl_pass(&mut self, second_pass: bool) -> CResult<()> {
        self.reset_to(self.after_type_decl);
        let mut curr_func = GLOBAL_SCOPE.to_string();
        loop {
            let cur = self.get_next_token();
            if self.kind(cur) == TokenKind::Eof {
                break;
            }

            if !second_pass {
                for (name, func) in &self.function_decls {
                    if cur == func.body_open {
                        curr_func = name.clone();
                    } else if cur == func.body_close {
                        curr_func = GLOBAL_SCOPE.to_string();
                    }
                }
            }
            if self.kind(cur) == TokenKind::Struct {
                self.skip_struct()?;
                continue;
            }
            if self.uniform_type_poses.contains(&cur) {
                continue;
            }
            if !tables::token_is_type(self.stream.get(cur)) {
                continue;
            }

            let mut is_decl = tables::kind_is_identifier(self.peek_next_kind(1));
            let mut is_function = self.peek_next_kind(2) == TokenKind::ParenthesisOpen;
            if !is_decl {
                // Maybe a `T[N] name` array declaration.
                let next = self.get_next_token();
                if self.kind(next) == TokenKind::BracketOpen {
                    let bracket_end = self.end_of_closure();
                    self.expect_live(bracket_end)?;
                    if self.kind(bracket_end) != TokenKind::BracketClose {
                        return fail_at(self.line_of(bracket_end), "Expected ']' after array type");
                    }
                    self.reset_to(bracket_end);
                    let next_next = self.get_next_token();
                    if self.kind(next_next) == TokenKind::Identifier {
                        is_decl = true;
                        is_function = self.peek_next_kind(1) == TokenKind::ParenthesisOpen;
                    }
                }
                self.reset_to(cur);
            }
            if !is_decl {
                continue;
            }

            let ty = cur;
            let mut start = ty;
            if self.peek_prev_kind(1) == TokenKind::Const
                || self.peek_prev_kind(1) == TokenKind::Varying
            {
                start = self.get_prev_token();
                self.get_next_token();
            }
            let id_tok = self.get_next_token();
            self.expect_live(id_tok)?;
            if is_function {
                self.process_func_decl(start, ty, second_pass)?;
                // Back up so the main loop re-enters at the body brace.
                self.get_prev_token();
            } else if !second_pass {
                self.process_decl(start, ty, &curr_func, false)?;
            }
        }
        Ok(())
    }

    /// Cursor is just past the type, at the name or an array-size bracket.
    /// Consumes one declaration statement, including compound
    /// (`vec3 a, b, c;`) and function-argument lists.
    fn process_decl(
        &mut self,
        start: TokenId,
        ty: TokenId,
        scope: &str,
        func_args: bool,
    ) -> CResult<()> {
        let mut start = start;
        let mut ty = ty;
        loop {
            self.expect_live(start)?;
            self.expect_live(ty)?;
            if !tables::token_is_type(self.stream.get(ty)) {
                return fail_at(self.line_of(ty), "Expected type in declaration");
            }
            let mut next = self.get_pos();
            self.expect_live(next)?;

            let mut is_array = false;
            let mut new_arr_style_decl = false;
            if self.kind(next) == TokenKind::BracketOpen {
                is_array = true;
                new_arr_style_decl = true;
                self.skip_array_size()?;
                next = self.get_pos();
            }
            if !tables::kind_is_identifier(self.kind(next)) {
                return fail_at(
                    self.line_of(next),
                    "Expected identifier after type in declaration",
                );
            }
            let name_pos = next;
            let name = self.literal_text(name_pos);

            next = self.get_next_token();
            self.expect_live(next)?;
            let mut end_pos = next;
            if self.kind(next) == TokenKind::BracketOpen {
                is_array = true;
                self.skip_array_size()?;
                end_pos = self.get_pos();
                next = end_pos;
            }
            if self.kind(next) == TokenKind::OpAssign {
                end_pos = self.end_of_closure();
                self.expect_live(end_pos)?;
                self.reset_to(end_pos);
                if self.kind(end_pos) == TokenKind::ParenthesisClose && func_args {
                    next = end_pos;
                    end_pos = self
                        .stream
                        .raw_prev(end_pos)
                        .expect("sentinel keeps a predecessor");
                } else {
                    next = self.get_next_token();
                    self.expect_live(next)?;
                    end_pos = next;
                }
            }
            if !matches!(
                self.kind(next),
                TokenKind::Semicolon | TokenKind::Comma | TokenKind::ParenthesisClose
            ) {
                return fail_at(
                    self.line_of(next),
                    "Expected comma or semi-colon after variable declaration",
                );
            }

            let var = VarDecl {
                start,
                end: end_pos,
                ty,
                name: name_pos,
                is_array,
                new_arr_style_decl,
                is_func_arg: func_args,
            };
            self.var_decls.entry(name.clone()).or_default().push(var);
            self.scope_declarations
                .entry(scope.to_string())
                .or_insert_with(HashSet::new)
                .insert(name);

            match self.kind(next) {
                TokenKind::Comma => {
                    next = self.get_next_token();
                    self.expect_live(next)?;
                    start = next;
                    if func_args {
                        while self.kind(next) == TokenKind::Const
                            || self.kind(next).is_precision()
                            || self.kind(next).is_arg_qualifier()
                            || self.kind(next).is_interpolation()
                        {
                            next = self.get_next_token();
                            self.expect_live(next)?;
                        }
                        ty = next;
                        if !tables::token_is_type(self.stream.get(ty)) {
                            return fail_at(
                                self.line_of(ty),
                                "Expected type after comma in function argument declaration",
                            );
                        }
                        let id = self.get_next_token();
                        self.expect_live(id)?;
                    }
                    // Compound declarations keep the shared type token.
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Cursor is just past the return type, at the name or an array-size
    /// bracket. In the second pass only the declaration skeleton is
    /// recorded; the third pass descends into the argument list.
    fn process_func_decl(
        &mut self,
        start: TokenId,
        ty: TokenId,
        second_pass: bool,
    ) -> CResult<()> {
        let mut next = self.get_pos();
        let mut has_array_return_type = false;
        if self.kind(next) == TokenKind::BracketOpen {
            has_array_return_type = true;
            self.skip_array_size()?;
            next = self.get_pos();
        }
        let name_pos = next;
        let name = self.literal_text(name_pos);

        let args_open = self.get_next_token();
        self.expect_live(args_open)?;
        let args_close;
        if self.peek_next_kind(1) == TokenKind::ParenthesisClose {
            args_close = self.get_next_token();
        } else {
            args_close = self.end_of_closure();
            self.expect_live(args_close)?;
            if second_pass {
                self.reset_to(args_close);
            } else {
                let arg_start = self.get_next_token();
                let mut arg_type = arg_start;
                while self.kind(arg_type) == TokenKind::Const
                    || self.kind(arg_type).is_precision()
                    || self.kind(arg_type).is_arg_qualifier()
                    || self.kind(arg_type).is_interpolation()
                {
                    arg_type = self.get_next_token();
                    self.expect_live(arg_type)?;
                }
                self.get_next_token(); // the argument name
                self.process_decl(arg_start, arg_type, &name, true)?;
            }
        }

        let body_open = self.get_next_token();
        self.expect_live(body_open)?;
        if self.kind(body_open) != TokenKind::CurlyBracketOpen {
            return fail_at(
                self.line_of(body_open),
                "Expected '{' after function declaration",
            );
        }
        let body_close = self.end_of_closure();
        self.expect_live(body_close)?;
        if self.kind(body_close) != TokenKind::CurlyBracketClose {
            return fail_at(self.line_of(body_open), "Expected '}' bracket");
        }

        if second_pass {
            self.function_decls.insert(
                name,
                FunctionDecl {
                    start,
                    ty,
                    name: name_pos,
                    args_open,
                    args_close,
                    body_open,
                    body_close,
                    has_array_return_type,
                },
            );
        } else if !self.function_decls.contains_key(&name) {
            return fail_at(
                self.line_of(start),
                format!("Function declaration not found in third pass ({})", name),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzed(src: &str) -> DeprecatedConverter {
        let mut converter = DeprecatedConverter::new(src);
        converter.preprocess().expect("preprocess failed");
        converter
    }

    #[test]
    fn test_uniform_pass() {
        let converter = analyzed(
            "shader_type spatial;\nuniform sampler2D tex : hint_albedo;\nuniform lowp float amount = 0.5;\nvoid fragment() {}\n",
        );
        assert_eq!(converter.uniform_decls.len(), 2);
        let tex = &converter.uniform_decls["tex"];
        assert_eq!(tex.hints.len(), 1);
        assert!(!tex.is_array);
        assert!(converter.uniform_decls.contains_key("amount"));
    }

    #[test]
    fn test_function_pass() {
        let converter = analyzed(
            "shader_type spatial;\nfloat helper(float x, int y) { return x; }\nvoid fragment() { float v = helper(1.0, 2); }\n",
        );
        assert_eq!(converter.function_decls.len(), 2);
        let helper = &converter.function_decls["helper"];
        assert!(!helper.has_array_return_type);
        assert_eq!(
            converter.kind(helper.body_close),
            TokenKind::CurlyBracketClose
        );
    }

    #[test]
    fn test_scope_table() {
        let converter = analyzed(
            "shader_type spatial;\nconst float g = 1.0;\nvoid fragment() { float local_a = g; vec3 b, c; }\n",
        );
        let globals = &converter.scope_declarations[GLOBAL_SCOPE];
        assert!(globals.contains("g"));
        let fragment = &converter.scope_declarations["fragment"];
        assert!(fragment.contains("local_a"));
        assert!(fragment.contains("b"));
        assert!(fragment.contains("c"));
    }

    #[test]
    fn test_function_args_in_scope() {
        let converter = analyzed(
            "shader_type spatial;\nfloat helper(float x, int y) { return x; }\nvoid fragment() {}\n",
        );
        let helper_scope = &converter.scope_declarations["helper"];
        assert!(helper_scope.contains("x"));
        assert!(helper_scope.contains("y"));
    }

    #[test]
    fn test_decl_positions_are_ordered() {
        let converter = analyzed(
            "shader_type spatial;\nuniform vec4 tint : hint_color;\nvoid fragment() {}\n",
        );
        let tint = &converter.uniform_decls["tint"];
        for window in [tint.start, tint.ty, tint.name, tint.end].windows(2) {
            // Token ids are allocated in lexical order for source tokens.
            assert!(window[0] != window[1]);
        }
    }

    #[test]
    fn test_struct_is_skipped() {
        let converter = analyzed(
            "shader_type spatial;\nstruct Light { vec3 dir; float power; };\nvoid fragment() { float dir = 1.0; }\n",
        );
        // Struct members must not leak into the global scope.
        assert!(!converter.scope_declarations[GLOBAL_SCOPE].contains("power"));
        assert!(converter.scope_declarations["fragment"].contains("dir"));
    }

    #[test]
    fn test_third_pass_failure_modes() {
        let src = "shader_type spatial;\nvoid fragment() { vec3 a = }\n";
        let mut strict = DeprecatedConverter::new(src);
        let failure = strict.preprocess().unwrap_err();
        assert!(failure.message.contains("Third pre-process pass failed"));

        let mut lenient = DeprecatedConverter::new(src);
        lenient.set_assume_correct(false);
        assert!(lenient.preprocess().is_ok());
        assert!(lenient.var_pass_failed);
    }
}
