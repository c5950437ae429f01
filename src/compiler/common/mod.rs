pub mod span;

/// A literal scalar captured from source or synthesized by a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantValue {
    Bool(bool),
    Sint(i64),
    Uint(u64),
    Real(f64),
}
impl ConstantValue {
    pub fn as_real(&self) -> f64 {
        match self {
            Self::Bool(x) => {
                if *x {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Sint(x) => *x as f64,
            Self::Uint(x) => *x as f64,
            Self::Real(x) => *x,
        }
    }
}
