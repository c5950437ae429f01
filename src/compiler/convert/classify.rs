//! Dialect classification: decides whether a source is legacy-dialect.
//! Negative indicators (anything only the current dialect can express) are
//! checked first; any hit means "not legacy". Then positive indicators
//! (anything only the legacy dialect would contain) confirm.

use log::debug;

use super::tables;
use super::{DeprecatedConverter, GLOBAL_SCOPE};
use crate::compiler::lang::token::TokenKind;
use crate::compiler::lang::ShaderMode;

impl DeprecatedConverter {
    /// Runs after a successful `preprocess()`. Never reports an error;
    /// structural trouble mid-scan classifies as "not legacy".
    pub(crate) fn classify(&mut self, mode: ShaderMode) -> bool {
        // Preprocessor directives exist in the current dialect only.
        for id in self.stream.iter() {
            if self.kind(id) == TokenKind::PreprocDirective {
                return false;
            }
        }

        // Declaration-shape negatives.
        for uniform in self.uniform_decls.values() {
            if uniform.is_array {
                return false;
            }
            if tables::is_new_type(self.kind(uniform.ty)) {
                return false;
            }
            for hint in &uniform.hints {
                if tables::is_new_hint(self.kind(*hint)) {
                    return false;
                }
            }
        }
        for func in self.function_decls.values() {
            if func.has_array_return_type {
                return false;
            }
            if tables::is_new_type(self.kind(func.ty)) {
                return false;
            }
        }
        for decls in self.var_decls.values() {
            for var in decls {
                if var.is_array && var.is_func_arg {
                    return false;
                }
                if var.new_arr_style_decl {
                    return false;
                }
                if tables::is_new_type(self.kind(var.ty)) {
                    return false;
                }
            }
        }

        // Token-stream negatives.
        self.reset_to(self.after_type_decl);
        let mut curr_func = GLOBAL_SCOPE.to_string();
        loop {
            let cur = self.get_next_token();
            if matches!(self.kind(cur), TokenKind::Eof | TokenKind::Error) {
                break;
            }
            for (name, func) in &self.function_decls {
                if cur == func.body_open {
                    curr_func = name.clone();
                    break;
                } else if cur == func.body_close {
                    curr_func = GLOBAL_SCOPE.to_string();
                    break;
                }
            }
            if self.kind(cur) == TokenKind::Struct {
                if self.skip_struct().is_err() {
                    return false;
                }
                continue;
            }

            let kind = self.kind(cur);
            if tables::is_new_type(kind) && self.peek_next_kind(1) == TokenKind::Identifier {
                return false;
            } else if kind == TokenKind::Uniform {
                // `global`/`instance` qualified uniforms were added in 4.x.
                if matches!(
                    self.peek_prev_kind(1),
                    TokenKind::Global | TokenKind::Instance
                ) {
                    return false;
                }
            } else if kind == TokenKind::Identifier {
                let id = self.literal_text(cur);
                if tables::has_builtin_rename(mode, &id, Some(&curr_func))
                    || tables::is_removed_builtin(mode, &id, Some(&curr_func))
                {
                    // Legacy built-ins are global names that could not be
                    // redeclared; a shadowing declaration means 4.x.
                    if self.scope_has_decl(&curr_func, &id) {
                        return false;
                    }
                } else if crate::compiler::lang::new_builtin_funcs().contains(id.as_str())
                    && self.peek_next_kind(1) == TokenKind::ParenthesisOpen
                    && !self.function_decls.contains_key(&id)
                {
                    return false;
                }
            } else if tables::is_new_reserved_keyword(kind)
                && !self.scope_has_decl(&curr_func, &self.literal_text(cur))
            {
                return false;
            }
        }

        // Declaration-shape positives.
        for uniform in self.uniform_decls.values() {
            if self.kind(uniform.ty) == TokenKind::Identifier
                && tables::has_removed_type(&self.literal_text(uniform.ty))
            {
                return true;
            }
            if tables::is_new_reserved_keyword(self.kind(uniform.name)) {
                return true;
            }
            for hint in &uniform.hints {
                if self.kind(*hint) == TokenKind::Identifier
                    && tables::has_hint_replacement(&self.literal_text(*hint))
                {
                    return true;
                }
            }
        }
        for func in self.function_decls.values() {
            let name = self.literal_text(func.name);
            if self.kind(func.ty) == TokenKind::Identifier
                && tables::has_removed_type(&self.literal_text(func.ty))
            {
                return true;
            }
            if self.kind(func.name) == TokenKind::Identifier
                && tables::is_renamed_function(mode, &name)
                && Some(self.kind(func.ty)) == tables::get_renamed_function_type(&name)
            {
                return true;
            }
            if tables::is_new_reserved_keyword(self.kind(func.name)) {
                return true;
            }
            if crate::compiler::lang::new_builtin_funcs().contains(name.as_str()) {
                return true;
            }
        }
        for decls in self.var_decls.values() {
            for var in decls {
                if self.kind(var.ty) == TokenKind::Identifier
                    && tables::has_removed_type(&self.literal_text(var.ty))
                {
                    return true;
                }
                if tables::is_new_reserved_keyword(self.kind(var.name)) {
                    return true;
                }
            }
        }

        // Token-stream positives.
        let mut is_legacy = false;
        let mut curr_func = GLOBAL_SCOPE.to_string();
        self.reset_to(self.after_type_decl);
        loop {
            let cur = self.get_next_token();
            if matches!(self.kind(cur), TokenKind::Eof | TokenKind::Error) {
                break;
            }
            for (name, func) in &self.function_decls {
                if cur == func.body_open {
                    curr_func = name.clone();
                    break;
                } else if cur == func.body_close {
                    curr_func = GLOBAL_SCOPE.to_string();
                    break;
                }
            }
            if self.kind(cur) == TokenKind::Struct {
                if self.skip_struct().is_err() {
                    return false;
                }
                continue;
            }

            match self.kind(cur) {
                TokenKind::FloatConstant => {
                    // Legacy float literals could end in `f` without a
                    // decimal point.
                    let text = self.literal_text(cur);
                    if text.ends_with('f') && !text.contains('.') && !text.contains('e') {
                        return true;
                    }
                }
                TokenKind::RenderMode => loop {
                    let next = self.get_next_token();
                    if self.kind(next) == TokenKind::Identifier {
                        let text = self.literal_text(next);
                        if tables::is_renamed_render_mode(mode, &text)
                            || tables::has_removed_render_mode(mode, &text)
                        {
                            return true;
                        }
                    } else if !matches!(
                        self.kind(next),
                        TokenKind::Comma | TokenKind::Semicolon
                    ) {
                        debug!("malformed render_mode declaration; not legacy");
                        return false;
                    }
                    if self.kind(next) == TokenKind::Semicolon {
                        break;
                    }
                },
                TokenKind::Identifier => {
                    let id = self.literal_text(cur);
                    if tables::has_builtin_rename(mode, &id, Some(&curr_func))
                        || tables::is_removed_builtin(mode, &id, Some(&curr_func))
                    {
                        if !self.scope_has_decl(&curr_func, &id) {
                            is_legacy = true;
                            if !self.var_pass_failed {
                                return true;
                            }
                            // With partial tables, keep scanning; a later
                            // negative may still disqualify.
                        }
                    } else if tables::has_removed_type(&id)
                        && self.peek_next_kind(1) == TokenKind::Identifier
                    {
                        return true;
                    }
                }
                _ => {}
            }
        }
        let head = self.stream.head().expect("stream always has sentinels");
        self.reset_to(head);
        is_legacy
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::convert::DeprecatedConverter;

    fn is_legacy(src: &str) -> bool {
        DeprecatedConverter::new(src).is_legacy()
    }

    #[test]
    fn test_legacy_positive_indicators() {
        assert!(is_legacy(
            "shader_type particles; void vertex() { float x = 1.0; }"
        ));
        assert!(is_legacy("shader_type spatial; const float x = 1f;"));
        assert!(is_legacy(
            "shader_type spatial; uniform sampler2D t : hint_albedo;"
        ));
        assert!(is_legacy(
            "shader_type spatial; render_mode specular_blinn; void fragment() {}"
        ));
        assert!(is_legacy(
            "shader_type spatial; void fragment() { ALBEDO = texture(SCREEN_TEXTURE, SCREEN_UV).rgb; }"
        ));
        assert!(is_legacy(
            "shader_type spatial; void fragment() { CLEARCOAT_GLOSS = 0.5; }"
        ));
    }

    #[test]
    fn test_current_dialect_is_not_legacy() {
        assert!(!is_legacy(
            "shader_type spatial; void fragment() { ALBEDO = vec3(1.0); }"
        ));
        assert!(!is_legacy(
            "shader_type spatial; uniform float xs[4]; void fragment() {}"
        ));
        assert!(!is_legacy(
            "shader_type spatial; global uniform float g; void fragment() {}"
        ));
        assert!(!is_legacy(
            "shader_type spatial; void fragment() { float[2] xs; }"
        ));
        assert!(!is_legacy(
            "shader_type spatial; uniform sampler2D t : source_color;"
        ));
    }

    #[test]
    fn test_preproc_always_disqualifies() {
        assert!(!is_legacy(
            "#define X 1\nshader_type spatial; const float x = 1f;"
        ));
        assert!(!is_legacy(
            "shader_type spatial;\n#include \"foo.gdshaderinc\"\nconst float x = 1f;"
        ));
    }

    #[test]
    fn test_shadowed_builtin_is_not_legacy() {
        // Declaring a name that was a legacy built-in is only legal in 4.x.
        assert!(!is_legacy(
            "shader_type spatial; void fragment() { float NORMALMAP = 1.0; NORMALMAP += 1.0; }"
        ));
    }

    #[test]
    fn test_builtin_in_wrong_function_is_not_legacy() {
        assert!(!is_legacy(
            "shader_type spatial; void vertex() { float x = CLEARCOAT_GLOSS; }"
        ));
    }

    #[test]
    fn test_new_builtin_call_is_not_legacy() {
        assert!(!is_legacy(
            "shader_type spatial; void fragment() { float x = fma(1.0, 2.0, 3.0); }"
        ));
    }

    #[test]
    fn test_unknown_mode_is_not_legacy() {
        assert!(!is_legacy("shader_type sky; void sky() {}"));
        assert!(!is_legacy("not a shader at all"));
    }
}
