//! Compiler core: the lowerer (AST to stage GLSL plus resource metadata)
//! and the deprecation converter (legacy-dialect source to current-dialect
//! source), sharing one lexical layer.

use thiserror::Error;

pub mod common;
pub mod convert;
pub mod lang;
pub mod lower;

pub use convert::DeprecatedConverter;
pub use lang::ShaderMode;
pub use lower::{
    DefaultIdentifierActions, GeneratedCode, IdentifierActions, ShaderCompiler, Stage,
};

#[derive(Debug, Error)]
pub enum CompileError {
    /// The source did not tokenize or parse.
    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: u32,
        message: String,
    },
    /// The AST violated an invariant the lowerer depends on; emission was
    /// aborted and any partial output discarded.
    #[error("invariant violated: {0}")]
    Invariant(String),
}
