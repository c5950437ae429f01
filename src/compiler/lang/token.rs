use crate::compiler::common::span::Span;

/// Defines the token kind enumeration together with its canonical spelling
/// table. Kinds whose text is not fixed (identifiers, literals, comments)
/// carry an empty spelling and retain their text on the token itself.
macro_rules! define_token_kinds {
    ($($name:ident => $text:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum TokenKind {
            $($name,)*
        }

        impl TokenKind {
            pub const ALL: &'static [TokenKind] = &[$(TokenKind::$name,)*];

            pub fn spelling(self) -> &'static str {
                match self {
                    $(TokenKind::$name => $text,)*
                }
            }
        }
    };
}

define_token_kinds! {
    Empty => "",
    Identifier => "",
    True => "true",
    False => "false",
    FloatConstant => "",
    IntConstant => "",
    UintConstant => "",
    TypeVoid => "void",
    TypeBool => "bool",
    TypeBVec2 => "bvec2",
    TypeBVec3 => "bvec3",
    TypeBVec4 => "bvec4",
    TypeInt => "int",
    TypeIVec2 => "ivec2",
    TypeIVec3 => "ivec3",
    TypeIVec4 => "ivec4",
    TypeUint => "uint",
    TypeUVec2 => "uvec2",
    TypeUVec3 => "uvec3",
    TypeUVec4 => "uvec4",
    TypeFloat => "float",
    TypeVec2 => "vec2",
    TypeVec3 => "vec3",
    TypeVec4 => "vec4",
    TypeMat2 => "mat2",
    TypeMat3 => "mat3",
    TypeMat4 => "mat4",
    TypeSampler2D => "sampler2D",
    TypeISampler2D => "isampler2D",
    TypeUSampler2D => "usampler2D",
    TypeSampler2DArray => "sampler2DArray",
    TypeISampler2DArray => "isampler2DArray",
    TypeUSampler2DArray => "usampler2DArray",
    TypeSampler3D => "sampler3D",
    TypeISampler3D => "isampler3D",
    TypeUSampler3D => "usampler3D",
    TypeSamplerCube => "samplerCube",
    TypeSamplerCubeArray => "samplerCubeArray",
    InterpolationFlat => "flat",
    InterpolationSmooth => "smooth",
    Const => "const",
    Struct => "struct",
    PrecisionLow => "lowp",
    PrecisionMid => "mediump",
    PrecisionHigh => "highp",
    OpEqual => "==",
    OpNotEqual => "!=",
    OpLess => "<",
    OpLessEqual => "<=",
    OpGreater => ">",
    OpGreaterEqual => ">=",
    OpAnd => "&&",
    OpOr => "||",
    OpNot => "!",
    OpAdd => "+",
    OpSub => "-",
    OpMul => "*",
    OpDiv => "/",
    OpMod => "%",
    OpShiftLeft => "<<",
    OpShiftRight => ">>",
    OpAssign => "=",
    OpAssignAdd => "+=",
    OpAssignSub => "-=",
    OpAssignMul => "*=",
    OpAssignDiv => "/=",
    OpAssignMod => "%=",
    OpAssignShiftLeft => "<<=",
    OpAssignShiftRight => ">>=",
    OpAssignBitAnd => "&=",
    OpAssignBitOr => "|=",
    OpAssignBitXor => "^=",
    OpBitAnd => "&",
    OpBitOr => "|",
    OpBitXor => "^",
    OpBitInvert => "~",
    OpIncrement => "++",
    OpDecrement => "--",
    CfIf => "if",
    CfElse => "else",
    CfFor => "for",
    CfWhile => "while",
    CfDo => "do",
    CfSwitch => "switch",
    CfCase => "case",
    CfDefault => "default",
    CfBreak => "break",
    CfContinue => "continue",
    CfReturn => "return",
    CfDiscard => "discard",
    BracketOpen => "[",
    BracketClose => "]",
    CurlyBracketOpen => "{",
    CurlyBracketClose => "}",
    ParenthesisOpen => "(",
    ParenthesisClose => ")",
    Question => "?",
    Comma => ",",
    Colon => ":",
    Semicolon => ";",
    Period => ".",
    Uniform => "uniform",
    GroupUniforms => "group_uniforms",
    Instance => "instance",
    Global => "global",
    Varying => "varying",
    ArgIn => "in",
    ArgOut => "out",
    ArgInout => "inout",
    RenderMode => "render_mode",
    HintDefaultWhiteTexture => "hint_default_white",
    HintDefaultBlackTexture => "hint_default_black",
    HintDefaultTransparentTexture => "hint_default_transparent",
    HintNormalTexture => "hint_normal",
    HintRoughnessNormalTexture => "hint_roughness_normal",
    HintRoughnessR => "hint_roughness_r",
    HintRoughnessG => "hint_roughness_g",
    HintRoughnessB => "hint_roughness_b",
    HintRoughnessA => "hint_roughness_a",
    HintRoughnessGray => "hint_roughness_gray",
    HintAnisotropyTexture => "hint_anisotropy",
    HintSourceColor => "source_color",
    HintRange => "hint_range",
    HintInstanceIndex => "instance_index",
    HintScreenTexture => "hint_screen_texture",
    HintNormalRoughnessTexture => "hint_normal_roughness_texture",
    HintDepthTexture => "hint_depth_texture",
    FilterNearest => "filter_nearest",
    FilterLinear => "filter_linear",
    FilterNearestMipmap => "filter_nearest_mipmap",
    FilterLinearMipmap => "filter_linear_mipmap",
    FilterNearestMipmapAnisotropic => "filter_nearest_mipmap_anisotropic",
    FilterLinearMipmapAnisotropic => "filter_linear_mipmap_anisotropic",
    RepeatEnable => "repeat_enable",
    RepeatDisable => "repeat_disable",
    ShaderType => "shader_type",
    Cursor => "",
    Error => "",
    Eof => "",
    Tab => "\t",
    Cr => "\r",
    Space => " ",
    Newline => "\n",
    BlockComment => "",
    LineComment => "",
    PreprocDirective => "",
}

impl TokenKind {
    /// Tokens that navigation steps over while text emission preserves them.
    pub fn is_skippable(self) -> bool {
        matches!(
            self,
            TokenKind::Tab
                | TokenKind::Cr
                | TokenKind::Space
                | TokenKind::Newline
                | TokenKind::BlockComment
                | TokenKind::LineComment
                | TokenKind::PreprocDirective
        )
    }

    pub fn is_datatype(self) -> bool {
        TokenKind::TypeVoid <= self && self <= TokenKind::TypeSamplerCubeArray
    }

    pub fn is_precision(self) -> bool {
        matches!(
            self,
            TokenKind::PrecisionLow | TokenKind::PrecisionMid | TokenKind::PrecisionHigh
        )
    }

    pub fn is_interpolation(self) -> bool {
        matches!(
            self,
            TokenKind::InterpolationFlat | TokenKind::InterpolationSmooth
        )
    }

    pub fn is_arg_qualifier(self) -> bool {
        matches!(
            self,
            TokenKind::ArgIn | TokenKind::ArgOut | TokenKind::ArgInout
        )
    }

    /// Uniform hint position tokens: hints proper plus filter and repeat
    /// modes, all of which are legal after the `:` of a uniform declaration.
    pub fn is_hint(self) -> bool {
        TokenKind::HintDefaultWhiteTexture <= self && self <= TokenKind::RepeatDisable
    }

    /// Any token with a fixed alphabetic spelling, i.e. a keyword.
    pub fn is_word(self) -> bool {
        self.spelling()
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
    }
}

/// A single lexical token. `span` is `None` for tokens synthesized by the
/// rewriter, which lets later passes distinguish them from source tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: Option<String>,
    pub constant: f64,
    pub line: u32,
    pub span: Option<Span>,
}

impl Token {
    /// A synthesized token of a fixed-spelling kind.
    pub fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            text: None,
            constant: 0.0,
            line: 0,
            span: None,
        }
    }

    pub fn with_text(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(kind)
        }
    }

    pub fn with_constant(kind: TokenKind, constant: f64) -> Self {
        Self {
            constant,
            ..Self::new(kind)
        }
    }

    pub fn is_synthesized(&self) -> bool {
        self.span.is_none()
    }

    pub fn is_integer_constant(&self) -> bool {
        matches!(self.kind, TokenKind::IntConstant | TokenKind::UintConstant)
    }

    /// The exact text this token contributes to emitted source.
    pub fn literal_text(&self) -> String {
        match self.kind {
            TokenKind::Identifier
            | TokenKind::PreprocDirective
            | TokenKind::LineComment
            | TokenKind::BlockComment => self.text.clone().unwrap_or_default(),
            TokenKind::FloatConstant | TokenKind::IntConstant | TokenKind::UintConstant => {
                if let Some(text) = &self.text {
                    return text.clone();
                }
                if self.is_integer_constant() {
                    format!("{}", self.constant as i64)
                } else {
                    float_text(self.constant)
                }
            }
            TokenKind::Error | TokenKind::Eof => String::new(),
            kind => kind.spelling().to_string(),
        }
    }
}

/// Renders a float the way GLSL sources spell it, always with a decimal
/// point so the literal stays a float after round-tripping.
pub fn float_text(value: f64) -> String {
    let text = format!("{}", value);
    if !text.contains('.') && !text.contains('e') && !text.contains("inf") && !text.contains("NaN")
    {
        text + ".0"
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spellings() {
        assert_eq!(TokenKind::OpAssignShiftLeft.spelling(), "<<=");
        assert_eq!(TokenKind::TypeSamplerCubeArray.spelling(), "samplerCubeArray");
        assert_eq!(TokenKind::HintSourceColor.spelling(), "source_color");
        assert_eq!(TokenKind::Identifier.spelling(), "");
    }

    #[test]
    fn test_classification() {
        assert!(TokenKind::TypeVoid.is_datatype());
        assert!(TokenKind::TypeSamplerCubeArray.is_datatype());
        assert!(!TokenKind::Struct.is_datatype());
        assert!(TokenKind::FilterLinearMipmap.is_hint());
        assert!(TokenKind::HintScreenTexture.is_hint());
        assert!(!TokenKind::ShaderType.is_hint());
        assert!(TokenKind::Space.is_skippable());
        assert!(TokenKind::PreprocDirective.is_skippable());
        assert!(TokenKind::Uniform.is_word());
        assert!(!TokenKind::OpAdd.is_word());
    }

    #[test]
    fn test_literal_text() {
        let tk = Token::with_text(TokenKind::Identifier, "foo");
        assert_eq!(tk.literal_text(), "foo");
        let tk = Token::with_constant(TokenKind::FloatConstant, 1.0);
        assert_eq!(tk.literal_text(), "1.0");
        let tk = Token::with_constant(TokenKind::FloatConstant, 0.5);
        assert_eq!(tk.literal_text(), "0.5");
        let tk = Token::new(TokenKind::OpAssignMul);
        assert_eq!(tk.literal_text(), "*=");
    }

    #[test]
    fn test_float_text() {
        assert_eq!(float_text(1.0), "1.0");
        assert_eq!(float_text(2.5), "2.5");
        assert_eq!(float_text(100.0), "100.0");
    }
}
