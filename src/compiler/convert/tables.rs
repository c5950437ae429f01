//! Migration tables between the legacy (3.x) and current (4.x) dialects,
//! plus the token classifications that depend on the dialect split.

use crate::compiler::lang::token::{Token, TokenKind};
use crate::compiler::lang::ShaderMode;

pub struct RenamedBuiltin {
    pub name: &'static str,
    pub replacement: &'static str,
    pub mode_functions: &'static [(ShaderMode, &'static [&'static str])],
    /// Requires more than a plain token swap (inversion, casts).
    pub special_handling: bool,
}

pub const RENAMED_BUILTINS: &[RenamedBuiltin] = &[
    RenamedBuiltin {
        name: "ALPHA_SCISSOR",
        replacement: "ALPHA_SCISSOR_THRESHOLD",
        mode_functions: &[(ShaderMode::Spatial, &["fragment"])],
        special_handling: false,
    },
    RenamedBuiltin {
        name: "CAMERA_MATRIX",
        replacement: "INV_VIEW_MATRIX",
        mode_functions: &[(ShaderMode::Spatial, &["vertex", "fragment", "light"])],
        special_handling: false,
    },
    RenamedBuiltin {
        name: "INV_CAMERA_MATRIX",
        replacement: "VIEW_MATRIX",
        mode_functions: &[(ShaderMode::Spatial, &["vertex", "fragment", "light"])],
        special_handling: false,
    },
    RenamedBuiltin {
        name: "NORMALMAP",
        replacement: "NORMAL_MAP",
        mode_functions: &[
            (ShaderMode::CanvasItem, &["fragment"]),
            (ShaderMode::Spatial, &["fragment"]),
        ],
        special_handling: false,
    },
    RenamedBuiltin {
        name: "NORMALMAP_DEPTH",
        replacement: "NORMAL_MAP_DEPTH",
        mode_functions: &[
            (ShaderMode::CanvasItem, &["fragment"]),
            (ShaderMode::Spatial, &["fragment"]),
        ],
        special_handling: false,
    },
    RenamedBuiltin {
        name: "TRANSMISSION",
        replacement: "BACKLIGHT",
        mode_functions: &[(ShaderMode::Spatial, &["fragment", "light"])],
        special_handling: false,
    },
    RenamedBuiltin {
        name: "WORLD_MATRIX",
        replacement: "MODEL_MATRIX",
        mode_functions: &[
            (ShaderMode::CanvasItem, &["vertex"]),
            (ShaderMode::Spatial, &["vertex", "fragment", "light"]),
        ],
        special_handling: false,
    },
    // Usages require inversion, handled in the rewriter.
    RenamedBuiltin {
        name: "CLEARCOAT_GLOSS",
        replacement: "CLEARCOAT_ROUGHNESS",
        mode_functions: &[(ShaderMode::Spatial, &["fragment"])],
        special_handling: true,
    },
    // No rename; was an int, now a uint, usages get an int() cast.
    RenamedBuiltin {
        name: "INDEX",
        replacement: "INDEX",
        mode_functions: &[(ShaderMode::Particles, &["vertex"])],
        special_handling: true,
    },
];

pub struct RenamedRenderMode {
    pub mode: ShaderMode,
    pub name: &'static str,
    pub replacement: &'static str,
}

pub const RENAMED_RENDER_MODES: &[RenamedRenderMode] = &[RenamedRenderMode {
    mode: ShaderMode::Spatial,
    name: "depth_draw_alpha_prepass",
    replacement: "depth_prepass_alpha",
}];

pub struct RenamedHint {
    pub name: &'static str,
    pub replacement: TokenKind,
}

pub const RENAMED_HINTS: &[RenamedHint] = &[
    RenamedHint {
        name: "hint_albedo",
        replacement: TokenKind::HintSourceColor,
    },
    RenamedHint {
        name: "hint_aniso",
        replacement: TokenKind::HintAnisotropyTexture,
    },
    RenamedHint {
        name: "hint_black",
        replacement: TokenKind::HintDefaultBlackTexture,
    },
    RenamedHint {
        name: "hint_black_albedo",
        replacement: TokenKind::HintDefaultBlackTexture,
    },
    RenamedHint {
        name: "hint_color",
        replacement: TokenKind::HintSourceColor,
    },
    RenamedHint {
        name: "hint_transparent",
        replacement: TokenKind::HintDefaultTransparentTexture,
    },
    RenamedHint {
        name: "hint_white",
        replacement: TokenKind::HintDefaultWhiteTexture,
    },
];

pub struct RenamedFunction {
    pub mode: ShaderMode,
    pub return_kind: TokenKind,
    pub name: &'static str,
    pub replacement: &'static str,
}

pub const RENAMED_FUNCTIONS: &[RenamedFunction] = &[RenamedFunction {
    mode: ShaderMode::Particles,
    return_kind: TokenKind::TypeVoid,
    name: "vertex",
    replacement: "process",
}];

pub struct RemovedRenderMode {
    pub mode: ShaderMode,
    pub name: &'static str,
    pub can_remove: bool,
}

pub const REMOVED_RENDER_MODES: &[RemovedRenderMode] = &[
    RemovedRenderMode {
        mode: ShaderMode::Spatial,
        name: "specular_blinn",
        can_remove: false,
    },
    RemovedRenderMode {
        mode: ShaderMode::Spatial,
        name: "specular_phong",
        can_remove: false,
    },
    RemovedRenderMode {
        mode: ShaderMode::Spatial,
        name: "async_visible",
        can_remove: true,
    },
    RemovedRenderMode {
        mode: ShaderMode::Spatial,
        name: "async_hidden",
        can_remove: true,
    },
];

pub struct RemovedBuiltin {
    pub name: &'static str,
    /// `TokenKind::Error` marks a built-in with no migration path.
    pub uniform_type: TokenKind,
    pub hints: &'static [TokenKind],
    pub mode_functions: &'static [(ShaderMode, &'static [&'static str])],
}

/// Built-ins that became plain hinted uniforms; their use necessitates
/// synthesizing a uniform declaration.
pub const REMOVED_BUILTINS: &[RemovedBuiltin] = &[
    RemovedBuiltin {
        name: "SCREEN_TEXTURE",
        uniform_type: TokenKind::TypeSampler2D,
        hints: &[TokenKind::HintScreenTexture, TokenKind::FilterLinearMipmap],
        mode_functions: &[
            (ShaderMode::Spatial, &["fragment"]),
            (ShaderMode::CanvasItem, &["fragment"]),
        ],
    },
    RemovedBuiltin {
        name: "DEPTH_TEXTURE",
        uniform_type: TokenKind::TypeSampler2D,
        hints: &[TokenKind::HintDepthTexture, TokenKind::FilterLinearMipmap],
        mode_functions: &[(ShaderMode::Spatial, &["fragment"])],
    },
    RemovedBuiltin {
        name: "NORMAL_ROUGHNESS_TEXTURE",
        uniform_type: TokenKind::TypeSampler2D,
        hints: &[
            TokenKind::HintNormalRoughnessTexture,
            TokenKind::FilterLinearMipmap,
        ],
        mode_functions: &[(ShaderMode::Spatial, &["fragment"])],
    },
    RemovedBuiltin {
        name: "MODULATE",
        uniform_type: TokenKind::Error,
        hints: &[],
        mode_functions: &[(ShaderMode::CanvasItem, &["vertex", "fragment", "light"])],
    },
];

pub const REMOVED_TYPES: &[&str] = &["samplerExternalOES"];

fn mode_functions_match(
    table: &[(ShaderMode, &[&str])],
    mode: ShaderMode,
    function: Option<&str>,
) -> bool {
    for (table_mode, functions) in table {
        if *table_mode != mode {
            continue;
        }
        match function {
            None => return true,
            Some(function) => {
                if functions.contains(&function) {
                    return true;
                }
            }
        }
    }
    false
}

pub fn get_builtin_rename(name: &str) -> Option<&'static str> {
    RENAMED_BUILTINS
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.replacement)
}

/// `function` of `None` means "don't check the function".
pub fn has_builtin_rename(mode: ShaderMode, name: &str, function: Option<&str>) -> bool {
    RENAMED_BUILTINS
        .iter()
        .any(|r| r.name == name && mode_functions_match(r.mode_functions, mode, function))
}

pub fn rename_has_special_handling(name: &str) -> bool {
    RENAMED_BUILTINS
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.special_handling)
        .unwrap_or(false)
}

pub fn builtin_rename_functions(mode: ShaderMode, name: &str) -> Vec<&'static str> {
    let mut functions = Vec::new();
    for renamed in RENAMED_BUILTINS.iter().filter(|r| r.name == name) {
        for (table_mode, mode_functions) in renamed.mode_functions {
            if *table_mode == mode {
                functions.extend_from_slice(mode_functions);
            }
        }
    }
    functions
}

pub fn is_removed_builtin(mode: ShaderMode, name: &str, function: Option<&str>) -> bool {
    REMOVED_BUILTINS
        .iter()
        .any(|r| r.name == name && mode_functions_match(r.mode_functions, mode, function))
}

pub fn get_removed_builtin_type(name: &str) -> Option<TokenKind> {
    REMOVED_BUILTINS
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.uniform_type)
}

pub fn get_removed_builtin_hints(name: &str) -> &'static [TokenKind] {
    REMOVED_BUILTINS
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.hints)
        .unwrap_or(&[])
}

pub fn removed_builtin_functions(mode: ShaderMode, name: &str) -> Vec<&'static str> {
    let mut functions = Vec::new();
    for removed in REMOVED_BUILTINS.iter().filter(|r| r.name == name) {
        for (table_mode, mode_functions) in removed.mode_functions {
            if *table_mode == mode {
                functions.extend_from_slice(mode_functions);
            }
        }
    }
    functions
}

pub fn has_hint_replacement(name: &str) -> bool {
    RENAMED_HINTS.iter().any(|r| r.name == name)
}

pub fn get_hint_replacement(name: &str) -> Option<TokenKind> {
    RENAMED_HINTS
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.replacement)
}

pub fn is_renamed_render_mode(mode: ShaderMode, name: &str) -> bool {
    RENAMED_RENDER_MODES
        .iter()
        .any(|r| r.mode == mode && r.name == name)
}

pub fn get_render_mode_rename(name: &str) -> Option<&'static str> {
    RENAMED_RENDER_MODES
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.replacement)
}

pub fn has_removed_render_mode(mode: ShaderMode, name: &str) -> bool {
    REMOVED_RENDER_MODES
        .iter()
        .any(|r| r.mode == mode && r.name == name)
}

pub fn can_remove_render_mode(name: &str) -> bool {
    REMOVED_RENDER_MODES
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.can_remove)
        .unwrap_or(false)
}

pub fn has_removed_type(name: &str) -> bool {
    REMOVED_TYPES.contains(&name)
}

pub fn is_renamed_function(mode: ShaderMode, name: &str) -> bool {
    RENAMED_FUNCTIONS
        .iter()
        .any(|r| r.mode == mode && r.name == name)
}

pub fn get_renamed_function(name: &str) -> Option<&'static str> {
    RENAMED_FUNCTIONS
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.replacement)
}

pub fn get_renamed_function_type(name: &str) -> Option<TokenKind> {
    RENAMED_FUNCTIONS
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.return_kind)
}

/// Reserved keywords introduced by the current dialect. Word tokens shared
/// with the legacy dialect are excluded explicitly.
pub fn is_new_reserved_keyword(kind: TokenKind) -> bool {
    if !kind.is_word() {
        return false;
    }
    // Shared 3.x keywords and every 3.x type keyword.
    if kind.is_datatype() && kind != TokenKind::TypeSamplerCubeArray {
        return false;
    }
    !matches!(
        kind,
        TokenKind::ArgIn
            | TokenKind::ArgInout
            | TokenKind::ArgOut
            | TokenKind::CfBreak
            | TokenKind::CfCase
            | TokenKind::CfContinue
            | TokenKind::CfDefault
            | TokenKind::CfDiscard
            | TokenKind::CfDo
            | TokenKind::CfElse
            | TokenKind::CfFor
            | TokenKind::CfIf
            | TokenKind::CfReturn
            | TokenKind::CfSwitch
            | TokenKind::CfWhile
            | TokenKind::Const
            | TokenKind::False
            | TokenKind::True
            | TokenKind::HintNormalTexture
            | TokenKind::HintRange
            | TokenKind::InterpolationFlat
            | TokenKind::InterpolationSmooth
            | TokenKind::PrecisionHigh
            | TokenKind::PrecisionLow
            | TokenKind::PrecisionMid
            | TokenKind::RenderMode
            | TokenKind::ShaderType
            | TokenKind::Struct
            | TokenKind::Uniform
            | TokenKind::Varying
    )
}

/// Type keywords only the current dialect knows.
pub fn is_new_type(kind: TokenKind) -> bool {
    kind.is_datatype() && kind == TokenKind::TypeSamplerCubeArray
}

/// Hint-position keywords only the current dialect knows.
pub fn is_new_hint(kind: TokenKind) -> bool {
    kind.is_hint()
        && !matches!(kind, TokenKind::HintNormalTexture | TokenKind::HintRange)
}

/// Identifier-position tokens: plain identifiers, or new-dialect keywords a
/// legacy program may legally use as names.
pub fn kind_is_identifier(kind: TokenKind) -> bool {
    kind == TokenKind::Identifier || is_new_reserved_keyword(kind)
}

pub fn token_is_type(token: &Token) -> bool {
    token.kind.is_datatype()
        || (token.kind == TokenKind::Identifier
            && has_removed_type(token.text.as_deref().unwrap_or("")))
}

pub fn token_is_hint(token: &Token) -> bool {
    if token.kind == TokenKind::Identifier {
        return has_hint_replacement(token.text.as_deref().unwrap_or(""));
    }
    token.kind.is_hint()
}

pub fn token_is_new_builtin_func(token: &Token) -> bool {
    match &token.text {
        Some(text) => crate::compiler::lang::new_builtin_funcs().contains(text.as_str()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rename_scoping() {
        assert!(has_builtin_rename(
            ShaderMode::Spatial,
            "CAMERA_MATRIX",
            Some("fragment")
        ));
        assert!(!has_builtin_rename(
            ShaderMode::CanvasItem,
            "CAMERA_MATRIX",
            Some("fragment")
        ));
        assert!(has_builtin_rename(ShaderMode::Spatial, "CAMERA_MATRIX", None));
        assert!(!has_builtin_rename(
            ShaderMode::Spatial,
            "NORMALMAP",
            Some("vertex")
        ));
    }

    #[test]
    fn test_new_keyword_classification() {
        assert!(is_new_reserved_keyword(TokenKind::Global));
        assert!(is_new_reserved_keyword(TokenKind::Instance));
        assert!(is_new_reserved_keyword(TokenKind::HintSourceColor));
        assert!(is_new_reserved_keyword(TokenKind::FilterNearest));
        assert!(!is_new_reserved_keyword(TokenKind::Uniform));
        assert!(!is_new_reserved_keyword(TokenKind::CfIf));
        assert!(!is_new_reserved_keyword(TokenKind::TypeVec3));
        assert!(!is_new_reserved_keyword(TokenKind::OpAdd));
    }

    #[test]
    fn test_new_type_and_hint() {
        assert!(is_new_type(TokenKind::TypeSamplerCubeArray));
        assert!(!is_new_type(TokenKind::TypeSamplerCube));
        assert!(is_new_hint(TokenKind::HintScreenTexture));
        assert!(!is_new_hint(TokenKind::HintRange));
        assert!(!is_new_hint(TokenKind::HintNormalTexture));
    }

    #[test]
    fn test_removed_builtins() {
        assert_eq!(
            get_removed_builtin_type("SCREEN_TEXTURE"),
            Some(TokenKind::TypeSampler2D)
        );
        assert_eq!(get_removed_builtin_type("MODULATE"), Some(TokenKind::Error));
        assert!(is_removed_builtin(
            ShaderMode::CanvasItem,
            "SCREEN_TEXTURE",
            Some("fragment")
        ));
        assert!(!is_removed_builtin(
            ShaderMode::Particles,
            "SCREEN_TEXTURE",
            None
        ));
    }
}
