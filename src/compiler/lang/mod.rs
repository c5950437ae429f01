//! Shared language model: scalar/vector/sampler types, uniform attributes,
//! shader modes and the built-in function name sets.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use self::token::TokenKind;

pub mod ast;
pub mod lex;
pub mod parse;
pub mod token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Void,
    Bool,
    BVec2,
    BVec3,
    BVec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    Uint,
    UVec2,
    UVec3,
    UVec4,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
    Sampler2D,
    ISampler2D,
    USampler2D,
    Sampler2DArray,
    ISampler2DArray,
    USampler2DArray,
    Sampler3D,
    ISampler3D,
    USampler3D,
    SamplerCube,
    SamplerCubeArray,
    Struct,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Void
    }
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Void => "void",
            DataType::Bool => "bool",
            DataType::BVec2 => "bvec2",
            DataType::BVec3 => "bvec3",
            DataType::BVec4 => "bvec4",
            DataType::Int => "int",
            DataType::IVec2 => "ivec2",
            DataType::IVec3 => "ivec3",
            DataType::IVec4 => "ivec4",
            DataType::Uint => "uint",
            DataType::UVec2 => "uvec2",
            DataType::UVec3 => "uvec3",
            DataType::UVec4 => "uvec4",
            DataType::Float => "float",
            DataType::Vec2 => "vec2",
            DataType::Vec3 => "vec3",
            DataType::Vec4 => "vec4",
            DataType::Mat2 => "mat2",
            DataType::Mat3 => "mat3",
            DataType::Mat4 => "mat4",
            DataType::Sampler2D => "sampler2D",
            DataType::ISampler2D => "isampler2D",
            DataType::USampler2D => "usampler2D",
            DataType::Sampler2DArray => "sampler2DArray",
            DataType::ISampler2DArray => "isampler2DArray",
            DataType::USampler2DArray => "usampler2DArray",
            DataType::Sampler3D => "sampler3D",
            DataType::ISampler3D => "isampler3D",
            DataType::USampler3D => "usampler3D",
            DataType::SamplerCube => "samplerCube",
            DataType::SamplerCubeArray => "samplerCubeArray",
            DataType::Struct => "struct",
        }
    }

    pub fn is_sampler(self) -> bool {
        matches!(
            self,
            DataType::Sampler2D
                | DataType::ISampler2D
                | DataType::USampler2D
                | DataType::Sampler2DArray
                | DataType::ISampler2DArray
                | DataType::USampler2DArray
                | DataType::Sampler3D
                | DataType::ISampler3D
                | DataType::USampler3D
                | DataType::SamplerCube
                | DataType::SamplerCubeArray
        )
    }

    pub fn is_float_type(self) -> bool {
        matches!(
            self,
            DataType::Float
                | DataType::Vec2
                | DataType::Vec3
                | DataType::Vec4
                | DataType::Mat2
                | DataType::Mat3
                | DataType::Mat4
        )
    }

    /// std140 base size in bytes; samplers report their opaque slot size.
    pub fn size(self) -> u32 {
        match self {
            DataType::Void | DataType::Struct => 0,
            DataType::Bool | DataType::Int | DataType::Uint | DataType::Float => 4,
            DataType::BVec2 | DataType::IVec2 | DataType::UVec2 | DataType::Vec2 => 8,
            DataType::BVec3 | DataType::IVec3 | DataType::UVec3 | DataType::Vec3 => 12,
            DataType::BVec4 | DataType::IVec4 | DataType::UVec4 | DataType::Vec4 => 16,
            DataType::Mat2 => 32,
            DataType::Mat3 => 48,
            DataType::Mat4 => 64,
            _ => 16,
        }
    }

    /// std140 alignment in bytes.
    pub fn alignment(self) -> u32 {
        match self {
            DataType::Void | DataType::Struct => 0,
            DataType::Bool | DataType::Int | DataType::Uint | DataType::Float => 4,
            DataType::BVec2 | DataType::IVec2 | DataType::UVec2 | DataType::Vec2 => 8,
            _ => 16,
        }
    }

    pub fn from_token(kind: TokenKind) -> Option<DataType> {
        Some(match kind {
            TokenKind::TypeVoid => DataType::Void,
            TokenKind::TypeBool => DataType::Bool,
            TokenKind::TypeBVec2 => DataType::BVec2,
            TokenKind::TypeBVec3 => DataType::BVec3,
            TokenKind::TypeBVec4 => DataType::BVec4,
            TokenKind::TypeInt => DataType::Int,
            TokenKind::TypeIVec2 => DataType::IVec2,
            TokenKind::TypeIVec3 => DataType::IVec3,
            TokenKind::TypeIVec4 => DataType::IVec4,
            TokenKind::TypeUint => DataType::Uint,
            TokenKind::TypeUVec2 => DataType::UVec2,
            TokenKind::TypeUVec3 => DataType::UVec3,
            TokenKind::TypeUVec4 => DataType::UVec4,
            TokenKind::TypeFloat => DataType::Float,
            TokenKind::TypeVec2 => DataType::Vec2,
            TokenKind::TypeVec3 => DataType::Vec3,
            TokenKind::TypeVec4 => DataType::Vec4,
            TokenKind::TypeMat2 => DataType::Mat2,
            TokenKind::TypeMat3 => DataType::Mat3,
            TokenKind::TypeMat4 => DataType::Mat4,
            TokenKind::TypeSampler2D => DataType::Sampler2D,
            TokenKind::TypeISampler2D => DataType::ISampler2D,
            TokenKind::TypeUSampler2D => DataType::USampler2D,
            TokenKind::TypeSampler2DArray => DataType::Sampler2DArray,
            TokenKind::TypeISampler2DArray => DataType::ISampler2DArray,
            TokenKind::TypeUSampler2DArray => DataType::USampler2DArray,
            TokenKind::TypeSampler3D => DataType::Sampler3D,
            TokenKind::TypeISampler3D => DataType::ISampler3D,
            TokenKind::TypeUSampler3D => DataType::USampler3D,
            TokenKind::TypeSamplerCube => DataType::SamplerCube,
            TokenKind::TypeSamplerCubeArray => DataType::SamplerCubeArray,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Default,
    Low,
    Mid,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Default,
    Flat,
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgumentQualifier {
    #[default]
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFilter {
    #[default]
    Default,
    Nearest,
    Linear,
    NearestMipmap,
    LinearMipmap,
    NearestMipmapAnisotropic,
    LinearMipmapAnisotropic,
}

impl TextureFilter {
    pub fn uses_mipmaps(self) -> bool {
        matches!(
            self,
            TextureFilter::NearestMipmap
                | TextureFilter::LinearMipmap
                | TextureFilter::NearestMipmapAnisotropic
                | TextureFilter::LinearMipmapAnisotropic
        )
    }

    pub fn from_token(kind: TokenKind) -> Option<TextureFilter> {
        Some(match kind {
            TokenKind::FilterNearest => TextureFilter::Nearest,
            TokenKind::FilterLinear => TextureFilter::Linear,
            TokenKind::FilterNearestMipmap => TextureFilter::NearestMipmap,
            TokenKind::FilterLinearMipmap => TextureFilter::LinearMipmap,
            TokenKind::FilterNearestMipmapAnisotropic => TextureFilter::NearestMipmapAnisotropic,
            TokenKind::FilterLinearMipmapAnisotropic => TextureFilter::LinearMipmapAnisotropic,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureRepeat {
    #[default]
    Default,
    Disable,
    Enable,
}

impl TextureRepeat {
    pub fn from_token(kind: TokenKind) -> Option<TextureRepeat> {
        Some(match kind {
            TokenKind::RepeatEnable => TextureRepeat::Enable,
            TokenKind::RepeatDisable => TextureRepeat::Disable,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UniformScope {
    #[default]
    Local,
    Instance,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UniformHint {
    #[default]
    None,
    SourceColor,
    Range,
    InstanceIndex,
    NormalTexture,
    RoughnessNormalTexture,
    RoughnessR,
    RoughnessG,
    RoughnessB,
    RoughnessA,
    RoughnessGray,
    AnisotropyTexture,
    DefaultWhiteTexture,
    DefaultBlackTexture,
    DefaultTransparentTexture,
    ScreenTexture,
    NormalRoughnessTexture,
    DepthTexture,
}

impl UniformHint {
    pub fn from_token(kind: TokenKind) -> Option<UniformHint> {
        Some(match kind {
            TokenKind::HintSourceColor => UniformHint::SourceColor,
            TokenKind::HintRange => UniformHint::Range,
            TokenKind::HintInstanceIndex => UniformHint::InstanceIndex,
            TokenKind::HintNormalTexture => UniformHint::NormalTexture,
            TokenKind::HintRoughnessNormalTexture => UniformHint::RoughnessNormalTexture,
            TokenKind::HintRoughnessR => UniformHint::RoughnessR,
            TokenKind::HintRoughnessG => UniformHint::RoughnessG,
            TokenKind::HintRoughnessB => UniformHint::RoughnessB,
            TokenKind::HintRoughnessA => UniformHint::RoughnessA,
            TokenKind::HintRoughnessGray => UniformHint::RoughnessGray,
            TokenKind::HintAnisotropyTexture => UniformHint::AnisotropyTexture,
            TokenKind::HintDefaultWhiteTexture => UniformHint::DefaultWhiteTexture,
            TokenKind::HintDefaultBlackTexture => UniformHint::DefaultBlackTexture,
            TokenKind::HintDefaultTransparentTexture => UniformHint::DefaultTransparentTexture,
            TokenKind::HintScreenTexture => UniformHint::ScreenTexture,
            TokenKind::HintNormalRoughnessTexture => UniformHint::NormalRoughnessTexture,
            TokenKind::HintDepthTexture => UniformHint::DepthTexture,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderMode {
    Spatial,
    CanvasItem,
    Particles,
    Sky,
    Fog,
    Compute,
}

impl ShaderMode {
    pub fn name(self) -> &'static str {
        match self {
            ShaderMode::Spatial => "spatial",
            ShaderMode::CanvasItem => "canvas_item",
            ShaderMode::Particles => "particles",
            ShaderMode::Sky => "sky",
            ShaderMode::Fog => "fog",
            ShaderMode::Compute => "compute",
        }
    }

    pub fn from_name(name: &str) -> Option<ShaderMode> {
        Some(match name {
            "spatial" => ShaderMode::Spatial,
            "canvas_item" => ShaderMode::CanvasItem,
            "particles" => ShaderMode::Particles,
            "sky" => ShaderMode::Sky,
            "fog" => ShaderMode::Fog,
            "compute" => ShaderMode::Compute,
            _ => return None,
        })
    }

    /// Modes the legacy dialect could express.
    pub fn from_legacy_name(name: &str) -> Option<ShaderMode> {
        match Self::from_name(name) {
            Some(mode @ (ShaderMode::Spatial | ShaderMode::CanvasItem | ShaderMode::Particles)) => {
                Some(mode)
            }
            _ => None,
        }
    }
}

/// Built-in functions present in the legacy dialect. Frozen; never extend.
pub const LEGACY_BUILTIN_FUNCS: &[&str] = &[
    "abs",
    "acos",
    "acosh",
    "all",
    "any",
    "asin",
    "asinh",
    "atan",
    "atanh",
    "bool",
    "bvec2",
    "bvec3",
    "bvec4",
    "ceil",
    "clamp",
    "cos",
    "cosh",
    "cross",
    "dFdx",
    "dFdy",
    "degrees",
    "determinant",
    "distance",
    "dot",
    "equal",
    "exp",
    "exp2",
    "faceforward",
    "float",
    "floatBitsToInt",
    "floatBitsToUint",
    "floor",
    "fract",
    "fwidth",
    "greaterThan",
    "greaterThanEqual",
    "int",
    "intBitsToFloat",
    "inverse",
    "inversesqrt",
    "isinf",
    "isnan",
    "ivec2",
    "ivec3",
    "ivec4",
    "length",
    "lessThan",
    "lessThanEqual",
    "log",
    "log2",
    "mat2",
    "mat3",
    "mat4",
    "matrixCompMult",
    "max",
    "min",
    "mix",
    "mod",
    "modf",
    "normalize",
    "not",
    "notEqual",
    "outerProduct",
    "pow",
    "radians",
    "reflect",
    "refract",
    "round",
    "roundEven",
    "sign",
    "sin",
    "sinh",
    "smoothstep",
    "sqrt",
    "step",
    "tan",
    "tanh",
    "texelFetch",
    "texture",
    "textureGrad",
    "textureLod",
    "textureProj",
    "textureProjLod",
    "textureSize",
    "transpose",
    "trunc",
    "uint",
    "uintBitsToFloat",
    "uvec2",
    "uvec3",
    "uvec4",
    "vec2",
    "vec3",
    "vec4",
];

/// Functions added by the current dialect on top of the legacy set.
const CURRENT_ONLY_BUILTIN_FUNCS: &[&str] = &[
    "bitCount",
    "bitfieldExtract",
    "bitfieldInsert",
    "bitfieldReverse",
    "dFdxCoarse",
    "dFdxFine",
    "dFdyCoarse",
    "dFdyFine",
    "findLSB",
    "findMSB",
    "fma",
    "frexp",
    "fwidthCoarse",
    "fwidthFine",
    "imulExtended",
    "ldexp",
    "packHalf2x16",
    "packSnorm2x16",
    "packSnorm4x8",
    "packUnorm2x16",
    "packUnorm4x8",
    "textureGather",
    "textureProjGrad",
    "textureQueryLevels",
    "textureQueryLod",
    "uaddCarry",
    "umulExtended",
    "unpackHalf2x16",
    "unpackSnorm2x16",
    "unpackSnorm4x8",
    "unpackUnorm2x16",
    "unpackUnorm4x8",
    "usubBorrow",
];

pub fn is_builtin_func(name: &str) -> bool {
    LEGACY_BUILTIN_FUNCS.binary_search(&name).is_ok()
        || CURRENT_ONLY_BUILTIN_FUNCS.binary_search(&name).is_ok()
}

/// Built-in function names introduced by the current dialect, computed once
/// by set-differencing the current list against the frozen legacy list.
pub fn new_builtin_funcs() -> &'static HashSet<&'static str> {
    static NEW_FUNCS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
        let legacy: HashSet<&str> = LEGACY_BUILTIN_FUNCS.iter().copied().collect();
        let mut current: HashSet<&str> = LEGACY_BUILTIN_FUNCS.iter().copied().collect();
        current.extend(CURRENT_ONLY_BUILTIN_FUNCS.iter().copied());
        current.difference(&legacy).copied().collect()
    });
    &NEW_FUNCS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_tables() {
        assert_eq!(DataType::Vec3.size(), 12);
        assert_eq!(DataType::Vec3.alignment(), 16);
        assert_eq!(DataType::Vec2.alignment(), 8);
        assert_eq!(DataType::Mat3.size(), 48);
        assert_eq!(DataType::Uint.size(), 4);
        assert!(DataType::Sampler2DArray.is_sampler());
        assert!(!DataType::Vec4.is_sampler());
        assert!(DataType::Mat2.is_float_type());
        assert!(!DataType::IVec2.is_float_type());
    }

    #[test]
    fn test_new_builtin_funcs() {
        let new_funcs = new_builtin_funcs();
        assert!(new_funcs.contains("fma"));
        assert!(new_funcs.contains("packHalf2x16"));
        assert!(!new_funcs.contains("texture"));
        assert!(!new_funcs.contains("mix"));
    }

    #[test]
    fn test_legacy_builtin_list_is_sorted() {
        let mut sorted = LEGACY_BUILTIN_FUNCS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, LEGACY_BUILTIN_FUNCS);
    }
}
