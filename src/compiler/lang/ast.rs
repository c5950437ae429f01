//! Typed AST consumed by the lowerer. The statement/expression tree is a
//! closed set of variants; the lowerer's match over them is exhaustive.

use std::collections::{BTreeMap, HashSet};

use super::{
    ArgumentQualifier, DataType, Interpolation, Precision, TextureFilter, TextureRepeat,
    UniformHint, UniformScope,
};
use crate::compiler::common::ConstantValue;

#[derive(Debug, Clone, Default)]
pub struct ShaderNode {
    pub render_modes: Vec<String>,
    pub structs: Vec<StructInfo>,
    /// Keyed by uniform name; ordered so emission is deterministic.
    pub uniforms: BTreeMap<String, Uniform>,
    pub varyings: BTreeMap<String, Varying>,
    pub constants: Vec<ConstantDecl>,
    pub functions: Vec<FunctionInfo>,
}

impl ShaderNode {
    pub fn find_function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct StructInfo {
    pub name: String,
    pub shader_struct: StructNode,
}

#[derive(Debug, Clone, Default)]
pub struct StructNode {
    pub members: Vec<StructMember>,
}

#[derive(Debug, Clone)]
pub struct StructMember {
    pub name: String,
    pub datatype: DataType,
    pub struct_name: String,
    pub precision: Precision,
    pub array_size: u32,
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub function: FunctionNode,
    /// Names of functions called directly from this function's body.
    pub uses_function: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct FunctionNode {
    pub name: String,
    pub return_type: DataType,
    pub return_struct_name: String,
    pub return_precision: Precision,
    pub return_array_size: u32,
    pub arguments: Vec<FunctionArgument>,
    pub body: Node,
}

#[derive(Debug, Clone)]
pub struct FunctionArgument {
    pub name: String,
    pub datatype: DataType,
    pub struct_name: String,
    pub precision: Precision,
    pub qualifier: ArgumentQualifier,
    pub is_const: bool,
    pub array_size: u32,
}

#[derive(Debug, Clone)]
pub struct Uniform {
    pub datatype: DataType,
    pub precision: Precision,
    pub scope: UniformScope,
    pub hint: UniformHint,
    pub filter: TextureFilter,
    pub repeat: TextureRepeat,
    pub use_color: bool,
    /// Placement among non-sampler uniforms, -1 for samplers.
    pub order: i32,
    /// Placement among samplers, -1 for non-samplers.
    pub texture_order: i32,
    pub texture_binding: u32,
    pub instance_index: u32,
    pub array_size: u32,
}

impl Default for Uniform {
    fn default() -> Self {
        Self {
            datatype: DataType::Void,
            precision: Precision::Default,
            scope: UniformScope::Local,
            hint: UniformHint::None,
            filter: TextureFilter::Default,
            repeat: TextureRepeat::Default,
            use_color: false,
            order: -1,
            texture_order: -1,
            texture_binding: 0,
            instance_index: 0,
            array_size: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Varying {
    pub datatype: DataType,
    pub precision: Precision,
    pub interpolation: Interpolation,
    pub stage: VaryingStage,
    pub array_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaryingStage {
    Unknown,
    Vertex,
    Fragment,
    FragmentToLight,
}

#[derive(Debug, Clone)]
pub struct ConstantDecl {
    pub name: String,
    pub datatype: DataType,
    pub type_str: String,
    pub precision: Precision,
    pub array_size: u32,
    pub initializer: Node,
}

/// Statement and expression tree.
#[derive(Debug, Clone)]
pub enum Node {
    Block(BlockNode),
    VariableDeclaration(VariableDeclarationNode),
    Variable(VariableNode),
    Array(ArrayNode),
    ArrayConstruct(ArrayConstructNode),
    Constant(ConstantNode),
    Operator(OperatorNode),
    ControlFlow(ControlFlowNode),
    Member(MemberNode),
}

impl Node {
    /// Best-effort static type of this expression.
    pub fn datatype(&self) -> DataType {
        match self {
            Node::Block(_) => DataType::Void,
            Node::VariableDeclaration(n) => n.datatype,
            Node::Variable(n) => n.datatype,
            Node::Array(n) => n.datatype,
            Node::ArrayConstruct(n) => n.datatype,
            Node::Constant(n) => n.datatype,
            Node::Operator(n) => n.return_type,
            Node::ControlFlow(_) => DataType::Void,
            Node::Member(n) => n.datatype,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlockNode {
    pub statements: Vec<Node>,
    pub single_statement: bool,
    pub use_comma_between_statements: bool,
}

#[derive(Debug, Clone)]
pub struct VariableDeclarationNode {
    pub datatype: DataType,
    pub struct_name: String,
    pub precision: Precision,
    pub is_const: bool,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub size: u32,
    pub size_expression: Option<Box<Node>>,
    /// An array initialized from a single expression rather than a list.
    pub single_expression: bool,
    pub initializer: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct VariableNode {
    pub name: String,
    pub datatype: DataType,
    pub struct_name: String,
    pub is_local: bool,
}

/// A reference to a named array, with the optional index/call/assign tail
/// the grammar folds onto it.
#[derive(Debug, Clone)]
pub struct ArrayNode {
    pub name: String,
    pub datatype: DataType,
    pub struct_name: String,
    pub is_local: bool,
    pub index_expression: Option<Box<Node>>,
    pub call_expression: Option<Box<Node>>,
    pub assign_expression: Option<Box<Node>>,
}

#[derive(Debug, Clone)]
pub struct ArrayConstructNode {
    pub datatype: DataType,
    pub struct_name: String,
    pub initializer: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct ConstantNode {
    pub datatype: DataType,
    pub struct_name: String,
    pub values: Vec<ConstantValue>,
    pub array_size: u32,
    pub array_declarations: Vec<Declaration>,
}

#[derive(Debug, Clone)]
pub struct OperatorNode {
    pub op: Operator,
    pub return_type: DataType,
    pub struct_name: String,
    pub arguments: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    ShiftLeft,
    ShiftRight,
    Assign,
    AssignAdd,
    AssignSub,
    AssignMul,
    AssignDiv,
    AssignMod,
    AssignShiftLeft,
    AssignShiftRight,
    AssignBitAnd,
    AssignBitOr,
    AssignBitXor,
    BitAnd,
    BitOr,
    BitXor,
    BitInvert,
    Negate,
    Increment,
    Decrement,
    PostIncrement,
    PostDecrement,
    Select,
    Call,
    Construct,
    StructConstruct,
    Index,
    Empty,
}

impl Operator {
    pub fn text(self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Not => "!",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::ShiftLeft => "<<",
            Operator::ShiftRight => ">>",
            Operator::Assign => "=",
            Operator::AssignAdd => "+=",
            Operator::AssignSub => "-=",
            Operator::AssignMul => "*=",
            Operator::AssignDiv => "/=",
            Operator::AssignMod => "%=",
            Operator::AssignShiftLeft => "<<=",
            Operator::AssignShiftRight => ">>=",
            Operator::AssignBitAnd => "&=",
            Operator::AssignBitOr => "|=",
            Operator::AssignBitXor => "^=",
            Operator::BitAnd => "&",
            Operator::BitOr => "|",
            Operator::BitXor => "^",
            Operator::BitInvert => "~",
            Operator::Negate => "-",
            Operator::Increment | Operator::PostIncrement => "++",
            Operator::Decrement | Operator::PostDecrement => "--",
            Operator::Select => "?",
            Operator::Call | Operator::Construct | Operator::StructConstruct => "(",
            Operator::Index => "[",
            Operator::Empty => "",
        }
    }

    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            Operator::Assign
                | Operator::AssignAdd
                | Operator::AssignSub
                | Operator::AssignMul
                | Operator::AssignDiv
                | Operator::AssignMod
                | Operator::AssignShiftLeft
                | Operator::AssignShiftRight
                | Operator::AssignBitAnd
                | Operator::AssignBitOr
                | Operator::AssignBitXor
        )
    }
}

#[derive(Debug, Clone)]
pub struct ControlFlowNode {
    pub flow_op: FlowOperation,
    pub expressions: Vec<Node>,
    pub blocks: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOperation {
    If,
    Switch,
    Case,
    Default,
    Do,
    While,
    For,
    Return,
    Discard,
    Continue,
    Break,
}

#[derive(Debug, Clone)]
pub struct MemberNode {
    pub owner: Box<Node>,
    pub name: String,
    pub datatype: DataType,
    pub struct_name: String,
    pub index_expression: Option<Box<Node>>,
    pub assign_expression: Option<Box<Node>>,
    pub call_expression: Option<Box<Node>>,
}
