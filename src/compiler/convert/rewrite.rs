//! The conversion rewrites: renames, literal normalization, render-mode
//! surgery, removed-builtin uniform synthesis and the CLEARCOAT_GLOSS
//! inversion algebra. A single left-to-right pass over the stream applies
//! the reference-site rewrites after the declaration tables have been
//! adjusted.

use std::collections::{HashMap, HashSet};

use log::debug;

use super::stream::TokenId;
use super::tables;
use super::{fail, fail_at, CResult, DeprecatedConverter, GLOBAL_SCOPE};
use crate::compiler::lang::token::{Token, TokenKind};
use crate::compiler::lang::{new_builtin_funcs, ShaderMode};

impl DeprecatedConverter {
    pub(crate) fn convert_inner(&mut self) -> CResult<()> {
        self.preprocess()?;
        let mode = match self.shader_mode {
            Some(mode) => mode,
            None => return fail("Shader type not a 3.x type."),
        };
        self.err_str = String::new();
        self.err_line = 0;
        self.reset_to(self.after_type_decl);

        // Hint renames first; their positions are reused by the keyword
        // pass to avoid clobbering hints that double as keywords.
        let mut hint_edits = Vec::new();
        for (name, uniform) in &self.uniform_decls {
            for (i, &hint) in uniform.hints.iter().enumerate() {
                if self.kind(hint) == TokenKind::Identifier {
                    if let Some(replacement) =
                        tables::get_hint_replacement(&self.literal_text(hint))
                    {
                        hint_edits.push((name.clone(), i, hint, replacement));
                    }
                }
            }
        }
        for (name, i, hint, replacement) in hint_edits {
            self.reset_to(hint);
            let new_id = self.replace_curr(Token::new(replacement));
            self.uniform_decls.get_mut(&name).unwrap().hints[i] = new_id;
            self.reset_to(self.after_type_decl);
        }
        let mut all_hints: HashSet<TokenId> = self
            .uniform_decls
            .values()
            .flat_map(|u| u.hints.iter().copied())
            .collect();

        // New reserved keywords used as identifiers get a uniquified
        // `name_` rename, but only when a declaration proves the use.
        let mut new_keyword_renames: HashMap<TokenKind, String> = HashMap::new();
        let mut func_renames: HashMap<String, String> = HashMap::new();
        // Only used when a function rename collides with an existing
        // non-function global.
        let mut nonfunc_globals_renames: HashMap<String, String> = HashMap::new();

        let uniform_names: Vec<String> = self.uniform_decls.keys().cloned().collect();
        for key in uniform_names {
            let (ty, name_tok) = {
                let uniform = &self.uniform_decls[&key];
                (uniform.ty, uniform.name)
            };
            self.check_deprecated_type(ty)?;
            let kind = self.kind(name_tok);
            if tables::is_new_reserved_keyword(kind) {
                let text = self.literal_text(name_tok);
                let rename = self.keyword_rename(&mut new_keyword_renames, kind, &text);
                self.reset_to(name_tok);
                let new_id = self.replace_curr(Token::with_text(TokenKind::Identifier, rename));
                self.uniform_decls.get_mut(&key).unwrap().name = new_id;
                self.reset_to(self.after_type_decl);
            }
        }

        let var_names: Vec<String> = self.var_decls.keys().cloned().collect();
        for key in var_names {
            let type_positions: Vec<TokenId> =
                self.var_decls[&key].iter().map(|v| v.ty).collect();
            if type_positions.is_empty() {
                continue;
            }
            for ty in type_positions {
                self.check_deprecated_type(ty)?;
            }
            let first = &self.var_decls[&key][0];
            let kind = self.kind(first.name);
            if tables::is_new_reserved_keyword(kind) {
                let text = self.literal_text(first.name);
                let rename = self.keyword_rename(&mut new_keyword_renames, kind, &text);
                for i in 0..self.var_decls[&key].len() {
                    let (name_pos, start_pos) = {
                        let var = &self.var_decls[&key][i];
                        (var.name, var.start)
                    };
                    self.reset_to(name_pos);
                    let new_id = self
                        .replace_curr(Token::with_text(TokenKind::Identifier, rename.clone()));
                    let var = &mut self.var_decls.get_mut(&key).unwrap()[i];
                    var.name = new_id;
                    if name_pos == start_pos {
                        var.start = new_id;
                    }
                    self.reset_to(self.after_type_decl);
                }
            }
        }

        let func_names: Vec<String> = self.function_decls.keys().cloned().collect();
        for key in func_names {
            let (ty, name_tok, start_tok) = {
                let func = &self.function_decls[&key];
                (func.ty, func.name, func.start)
            };
            self.check_deprecated_type(ty)?;
            let tok_kind = self.kind(name_tok);
            let return_kind = self.kind(ty);
            let name = self.literal_text(name_tok);

            if tables::is_renamed_function(mode, &name)
                && Some(return_kind) == tables::get_renamed_function_type(&name)
            {
                let rename = tables::get_renamed_function(&name).unwrap().to_string();
                debug!("renaming function {} -> {}", name, rename);
                self.reset_to(name_tok);
                let new_id = self
                    .replace_curr(Token::with_text(TokenKind::Identifier, rename.clone()));
                self.function_decls.get_mut(&key).unwrap().name = new_id;
                self.reset_to(self.after_type_decl);
                func_renames.insert(name.clone(), rename.clone());

                // The replacement is a common word; push aside whatever
                // already owns it.
                let global_var_collision = self.var_decls.contains_key(&rename)
                    && self
                        .scope_declarations
                        .get(GLOBAL_SCOPE)
                        .map(|s| s.contains(&rename))
                        .unwrap_or(false);
                if self.function_decls.contains_key(&rename)
                    || self.uniform_decls.contains_key(&rename)
                    || global_var_collision
                {
                    let mut rerename = format!("{}_", rename);
                    while self.function_decls.contains_key(&rerename)
                        || self.uniform_decls.contains_key(&rerename)
                        || self.var_decls.contains_key(&rerename)
                    {
                        rerename.push('_');
                    }
                    if self.function_decls.contains_key(&rename) {
                        func_renames.insert(rename.clone(), rerename.clone());
                        let pos = self.function_decls[&rename].name;
                        self.reset_to(pos);
                        let new_id = self.replace_curr(Token::with_text(
                            TokenKind::Identifier,
                            rerename.clone(),
                        ));
                        self.function_decls.get_mut(&rename).unwrap().name = new_id;
                        self.reset_to(self.after_type_decl);
                    } else if self.uniform_decls.contains_key(&rename) {
                        nonfunc_globals_renames.insert(rename.clone(), rerename.clone());
                        let pos = self.uniform_decls[&rename].name;
                        self.reset_to(pos);
                        let new_id = self.replace_curr(Token::with_text(
                            TokenKind::Identifier,
                            rerename.clone(),
                        ));
                        self.uniform_decls.get_mut(&rename).unwrap().name = new_id;
                        self.reset_to(self.after_type_decl);
                    } else {
                        nonfunc_globals_renames.insert(rename.clone(), rerename.clone());
                        for i in 0..self.var_decls[&rename].len() {
                            let pos = self.var_decls[&rename][i].name;
                            self.reset_to(pos);
                            let new_id = self.replace_curr(Token::with_text(
                                TokenKind::Identifier,
                                rerename.clone(),
                            ));
                            self.var_decls.get_mut(&rename).unwrap()[i].name = new_id;
                            self.reset_to(self.after_type_decl);
                        }
                    }
                }
            } else if new_builtin_funcs().contains(name.as_str()) {
                // Renaming would be too invasive; warn instead.
                self.add_comment_before(
                    &format!(
                        "WARNING: Function '{}' is a built-in function in the current shader dialect.",
                        name
                    ),
                    start_tok,
                );
            } else if tables::is_new_reserved_keyword(tok_kind) {
                let rename = self.keyword_rename(&mut new_keyword_renames, tok_kind, &name);
                self.reset_to(name_tok);
                let new_id = self.replace_curr(Token::with_text(TokenKind::Identifier, rename));
                self.function_decls.get_mut(&key).unwrap().name = new_id;
                self.reset_to(self.after_type_decl);
            }
        }

        // Reference-site pass.
        let mut in_function = false;
        let mut curr_func = GLOBAL_SCOPE.to_string();
        self.reset_to(self.after_type_decl);
        loop {
            let cur = self.get_next_token();
            if self.kind(cur) == TokenKind::Eof {
                break;
            }
            for (name, func) in &self.function_decls {
                // Keys are the original function names, not the renamed
                // ones; scope checks depend on that.
                if cur == func.body_open {
                    in_function = true;
                    curr_func = name.clone();
                } else if in_function && cur == func.body_close {
                    in_function = false;
                    curr_func = GLOBAL_SCOPE.to_string();
                }
            }
            if self.kind(cur) == TokenKind::Struct {
                self.skip_struct()?;
                continue;
            }

            let kind = self.kind(cur);
            if !self.stream.get(cur).is_synthesized()
                && new_keyword_renames.contains_key(&kind)
                && self.scope_has_decl(&curr_func, &self.literal_text(cur))
            {
                let tok_text = self.literal_text(cur);
                if tok_text == "global" || tok_text == "instance" {
                    if self.peek_next_kind(1) == TokenKind::Uniform {
                        continue; // A legitimate uniform qualifier.
                    }
                } else if all_hints.contains(&cur) {
                    continue;
                } else if self.peek_prev_kind(1) == TokenKind::Period {
                    continue; // Struct member access.
                }
                let rename = new_keyword_renames[&kind].clone();
                self.replace_curr(Token::with_text(TokenKind::Identifier, rename));
                continue;
            }

            match kind {
                TokenKind::FloatConstant => {
                    // Pre-3.5 sources allowed the `f` sigil without a
                    // decimal place.
                    let text = self.literal_text(cur);
                    if text.ends_with('f') && !text.contains('.') && !text.contains('e') {
                        let fixed = format!("{}.0f", &text[..text.len() - 1]);
                        self.replace_curr(Token::with_text(TokenKind::FloatConstant, fixed));
                    }
                }
                TokenKind::RenderMode => {
                    if mode == ShaderMode::Spatial {
                        self.rewrite_render_modes(mode)?;
                    }
                }
                TokenKind::Identifier => {
                    if self.stream.get(cur).is_synthesized() {
                        continue;
                    }
                    if self.peek_prev_kind(1) == TokenKind::Period {
                        continue; // Struct member access.
                    }
                    let id_text = self.literal_text(cur);
                    if func_renames.contains_key(&id_text)
                        && self.peek_next_kind(1) == TokenKind::ParenthesisOpen
                    {
                        let rename = func_renames[&id_text].clone();
                        self.replace_curr(Token::with_text(TokenKind::Identifier, rename));
                    } else if nonfunc_globals_renames.contains_key(&id_text)
                        && self.peek_next_kind(1) != TokenKind::ParenthesisOpen
                    {
                        let rename = nonfunc_globals_renames[&id_text].clone();
                        self.replace_curr(Token::with_text(TokenKind::Identifier, rename));
                    } else if tables::is_removed_builtin(mode, &id_text, Some(&curr_func))
                        && !self.scope_has_decl(&curr_func, &id_text)
                    {
                        if tables::get_removed_builtin_type(&id_text) == Some(TokenKind::Error) {
                            let message = format!(
                                "Deprecated built-in '{}' is not supported by the current shader dialect",
                                id_text
                            );
                            if self.fail_on_unported {
                                return fail_at(self.line_of(cur), message);
                            }
                            self.add_comment_before(&message, cur);
                            continue;
                        }
                        if self.insert_uniform_declaration(&id_text).is_err() {
                            return fail_at(
                                self.line_of(cur),
                                "Failed to insert uniform declaration",
                            );
                        }
                        all_hints.extend(self.uniform_decls[&id_text].hints.iter().copied());
                        if self.add_comments {
                            self.add_comment_at_eol(
                                &format!("added uniform for '{}'", id_text),
                                cur,
                            );
                        }
                    } else if id_text == "INDEX"
                        && tables::has_builtin_rename(mode, &id_text, Some(&curr_func))
                        && !self.scope_has_decl(&curr_func, &id_text)
                    {
                        self.wrap_index_reference(cur);
                    } else if id_text == "CLEARCOAT_GLOSS"
                        && tables::has_builtin_rename(mode, &id_text, Some(&curr_func))
                        && !self.scope_has_decl(&curr_func, &id_text)
                    {
                        self.invert_clearcoat_reference()?;
                    } else if tables::has_builtin_rename(mode, &id_text, Some(&curr_func))
                        && !self.scope_has_decl(&curr_func, &id_text)
                    {
                        let rename = tables::get_builtin_rename(&id_text).unwrap().to_string();
                        self.replace_curr(Token::with_text(TokenKind::Identifier, rename));
                    }
                }
                TokenKind::Error => {
                    return fail_at(
                        self.line_of(cur),
                        format!(
                            "Parser error ({})",
                            self.stream.get(cur).text.as_deref().unwrap_or("")
                        ),
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_deprecated_type(&mut self, ty: TokenId) -> CResult<()> {
        if self.kind(ty) == TokenKind::Identifier
            && tables::has_removed_type(&self.literal_text(ty))
        {
            let message = format!(
                "Deprecated type '{}' is not supported by the current shader dialect.",
                self.literal_text(ty)
            );
            if self.fail_on_unported {
                return fail_at(self.line_of(ty), message);
            }
            self.add_comment_before(&message, ty);
        }
        Ok(())
    }

    /// Uniquifies a rename for a reserved keyword used as an identifier by
    /// suffixing `_` until no declaration owns the name.
    fn keyword_rename(
        &self,
        renames: &mut HashMap<TokenKind, String>,
        kind: TokenKind,
        name: &str,
    ) -> String {
        if let Some(rename) = renames.get(&kind) {
            return rename.clone();
        }
        let mut rename = format!("{}_", name);
        while self.function_decls.contains_key(&rename)
            || self.uniform_decls.contains_key(&rename)
            || self.var_decls.contains_key(&rename)
        {
            rename.push('_');
        }
        renames.insert(kind, rename.clone());
        rename
    }

    /// `INDEX` was an int and is now a uint; wrap reads in `int()` unless
    /// the reference is already singularly wrapped in a cast.
    fn wrap_index_reference(&mut self, cur: TokenId) {
        if self.peek_prev_kind(1) == TokenKind::ParenthesisOpen
            && self.peek_next_kind(1) == TokenKind::ParenthesisClose
        {
            let wrapping = self.peek_prev_kind(2);
            if matches!(
                wrapping,
                TokenKind::TypeInt | TokenKind::TypeUint | TokenKind::TypeFloat
            ) {
                return;
            }
        }
        self.stream.insert_many_before(
            cur,
            vec![
                Token::new(TokenKind::TypeInt),
                Token::new(TokenKind::ParenthesisOpen),
            ],
        );
        self.stream
            .insert_after(cur, Token::new(TokenKind::ParenthesisClose));
    }

    /// CLEARCOAT_GLOSS is the semantic inverse of CLEARCOAT_ROUGHNESS;
    /// every read becomes `(1.0 - NEW)` and every write stores
    /// `(1.0 - value)`, composing when a write is itself read.
    fn invert_clearcoat_reference(&mut self) -> CResult<()> {
        let float_one = || Token::with_constant(TokenKind::FloatConstant, 1.0);
        let cur = self.replace_curr(Token::with_text(
            TokenKind::Identifier,
            "CLEARCOAT_ROUGHNESS",
        ));

        let mut assign_closure_end: Option<TokenId> = None;
        if matches!(
            self.peek_next_kind(1),
            TokenKind::OpAssign
                | TokenKind::OpAssignAdd
                | TokenKind::OpAssignSub
                | TokenKind::OpAssignMul
                | TokenKind::OpAssignDiv
        ) {
            let closure_end = self.end_of_closure();
            self.expect_live(closure_end)?;
            assign_closure_end = Some(closure_end);

            let assign_tk = self.get_next_token();
            let assign_kind = self.kind(assign_tk);
            let mut insert_pos = assign_tk;
            if let Some(next_raw) = self.stream.raw_next(assign_tk) {
                if self.kind(next_raw) == TokenKind::Space {
                    insert_pos = next_raw;
                }
            }

            // " = (1.0 - ("
            let mut assign_prefix = vec![
                Token::new(TokenKind::OpAssign),
                Token::new(TokenKind::Space),
                Token::new(TokenKind::ParenthesisOpen),
                float_one(),
                Token::new(TokenKind::Space),
                Token::new(TokenKind::OpSub),
                Token::new(TokenKind::Space),
                Token::new(TokenKind::ParenthesisOpen),
            ];
            if assign_kind != TokenKind::OpAssign {
                // " = (1.0 - ((1.0 - CLEARCOAT_ROUGHNESS) <op> "
                assign_prefix.extend(vec![
                    Token::new(TokenKind::ParenthesisOpen),
                    float_one(),
                    Token::new(TokenKind::Space),
                    Token::new(TokenKind::OpSub),
                    Token::new(TokenKind::Space),
                    Token::with_text(TokenKind::Identifier, "CLEARCOAT_ROUGHNESS"),
                    Token::new(TokenKind::ParenthesisClose),
                    Token::new(TokenKind::Space),
                ]);
            }
            match assign_kind {
                TokenKind::OpAssignAdd => {
                    assign_prefix.push(Token::new(TokenKind::OpAdd));
                    assign_prefix.push(Token::new(TokenKind::Space));
                }
                TokenKind::OpAssignSub => {
                    assign_prefix.push(Token::new(TokenKind::OpSub));
                    assign_prefix.push(Token::new(TokenKind::Space));
                }
                TokenKind::OpAssignMul => {
                    assign_prefix.push(Token::new(TokenKind::OpMul));
                    assign_prefix.push(Token::new(TokenKind::Space));
                }
                TokenKind::OpAssignDiv => {
                    assign_prefix.push(Token::new(TokenKind::OpDiv));
                    assign_prefix.push(Token::new(TokenKind::Space));
                }
                _ => {}
            }
            self.stream.insert_many_after(insert_pos, assign_prefix);

            // Drop the original assignment operator (and trailing space).
            if assign_tk != insert_pos {
                let first_inserted = self
                    .stream
                    .raw_next(insert_pos)
                    .expect("insertion placed tokens after this position");
                self.remove_from_curr_to(first_inserted);
            } else {
                self.remove_cur_and_get_next();
            }
            // "))"
            self.stream.insert_many_after(
                closure_end,
                vec![
                    Token::new(TokenKind::ParenthesisClose),
                    Token::new(TokenKind::ParenthesisClose),
                ],
            );
            self.reset_to(cur);
        }

        // A preceding `;`, `{` or `}` means the usage is only a write.
        if matches!(
            self.peek_prev_kind(1),
            TokenKind::Semicolon | TokenKind::CurlyBracketOpen | TokenKind::CurlyBracketClose
        ) {
            return Ok(());
        }

        // Invert the read: "(1.0 - " ... ")"
        let mut right_hand_prefix = vec![
            Token::new(TokenKind::ParenthesisOpen),
            float_one(),
            Token::new(TokenKind::Space),
            Token::new(TokenKind::OpSub),
            Token::new(TokenKind::Space),
        ];
        if let Some(closure_end) = assign_closure_end {
            right_hand_prefix.push(Token::new(TokenKind::ParenthesisOpen));
            self.stream.insert_many_after(
                closure_end,
                vec![
                    Token::new(TokenKind::ParenthesisClose),
                    Token::new(TokenKind::ParenthesisClose),
                ],
            );
        } else {
            self.stream
                .insert_after(cur, Token::new(TokenKind::ParenthesisClose));
        }
        self.stream.insert_many_before(cur, right_hand_prefix);
        Ok(())
    }

    /// Inside a `render_mode` directive: renamed modes are replaced,
    /// removed modes are elided together with their separators (or the
    /// whole directive when they were the sole entry).
    fn rewrite_render_modes(&mut self, mode: ShaderMode) -> CResult<()> {
        loop {
            let next = self.get_next_token();
            let mut last = next;
            if self.kind(next) == TokenKind::Identifier {
                let id_text = self.literal_text(next);
                if tables::has_removed_render_mode(mode, &id_text) {
                    if !tables::can_remove_render_mode(&id_text) {
                        let message = format!(
                            "Deprecated render mode '{}' is not supported by the current shader dialect.",
                            id_text
                        );
                        if self.fail_on_unported {
                            return fail_at(self.line_of(next), message);
                        }
                        self.add_comment_before(&message, next);
                    } else if self.peek_next_kind(1) == TokenKind::Comma {
                        let comma = self.get_next_token();
                        self.reset_to(next);
                        let after_comma = self
                            .stream
                            .raw_next(comma)
                            .expect("sentinel terminates the stream");
                        self.expect_live(after_comma)?;
                        last = self.remove_from_curr_to(after_comma);
                        if self.add_comments {
                            self.add_comment_at_eol(
                                &format!("removed render mode '{}'", id_text),
                                last,
                            );
                        }
                    } else if self.peek_prev_kind(1) == TokenKind::Comma
                        && self.peek_next_kind(1) == TokenKind::Semicolon
                    {
                        let end = self.get_next_token();
                        self.reset_to(next);
                        self.get_prev_token();
                        last = self.remove_from_curr_to(end);
                        if self.add_comments {
                            self.add_comment_at_eol(
                                &format!("removed render mode '{}'", id_text),
                                last,
                            );
                        }
                        break;
                    } else if self.peek_prev_kind(1) == TokenKind::RenderMode
                        && self.peek_next_kind(1) == TokenKind::Semicolon
                    {
                        let semi = self.get_next_token();
                        let after_semi = match self.stream.raw_next(semi) {
                            Some(after_semi) => after_semi,
                            None => return fail_at(self.line_of(semi), "Unexpected end of file"),
                        };
                        self.reset_to(next);
                        self.get_prev_token();
                        self.remove_from_curr_to(after_semi);
                        break;
                    } else {
                        return fail_at(
                            self.line_of(next),
                            "Unexpected token after render mode declaration.",
                        );
                    }
                } else if tables::is_renamed_render_mode(mode, &id_text) {
                    let rename = tables::get_render_mode_rename(&id_text).unwrap();
                    last = self.replace_curr(Token::with_text(TokenKind::Identifier, rename));
                }
            } else if !matches!(
                self.kind(next),
                TokenKind::Comma | TokenKind::Semicolon
            ) {
                return fail_at(
                    self.line_of(next),
                    "Expected ',' or ';' after render mode declaration.",
                );
            }
            if self.kind(last) == TokenKind::Semicolon {
                break;
            }
        }
        Ok(())
    }
}
