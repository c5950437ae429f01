//! Recursive-descent parser producing the typed AST the lowerer walks.
//!
//! The parser accepts well-formed programs and reports structural errors
//! with line numbers; it tracks declared types so every type query the
//! lowerer performs can be answered, but it is not a full type checker.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::ast::*;
use super::lex::Lexer;
use super::token::{Token, TokenKind};
use super::{
    ArgumentQualifier, DataType, Interpolation, Precision, ShaderMode, TextureFilter,
    TextureRepeat, UniformHint, UniformScope,
};
use crate::compiler::common::ConstantValue;

pub type GlobalTypeFn = fn(&str) -> Option<DataType>;

/// Caller-supplied context for a single parse.
pub struct CompileInfo {
    pub mode: ShaderMode,
    /// Resolves the registry type of a `global uniform`.
    pub global_type_func: Option<GlobalTypeFn>,
}

impl CompileInfo {
    pub fn new(mode: ShaderMode) -> Self {
        Self {
            mode,
            global_type_func: None,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub message: String,
}

pub fn parse(source: &str, info: &CompileInfo) -> Result<ShaderNode, ParseError> {
    let tokens: Vec<Token> = Lexer::tokenize(source)
        .into_iter()
        .filter(|tk| !tk.kind.is_skippable())
        .collect();
    let mut parser = Parser {
        tokens,
        idx: 0,
        info,
        shader: ShaderNode::default(),
        struct_names: HashSet::new(),
        function_sigs: HashMap::new(),
        locals: Vec::new(),
        current_function: None,
        current_uses: HashSet::new(),
        next_uniform_order: 0,
        next_texture_order: 0,
        next_texture_binding: 0,
        next_instance_index: 0,
    };
    parser.parse_shader()?;
    Ok(parser.shader)
}

#[derive(Clone)]
struct LocalVar {
    datatype: DataType,
    struct_name: String,
    array_size: u32,
}

struct Parser<'a> {
    tokens: Vec<Token>,
    idx: usize,
    info: &'a CompileInfo,
    shader: ShaderNode,
    struct_names: HashSet<String>,
    function_sigs: HashMap<String, (DataType, String)>,
    locals: Vec<HashMap<String, LocalVar>>,
    current_function: Option<String>,
    current_uses: HashSet<String>,
    next_uniform_order: i32,
    next_texture_order: i32,
    next_texture_binding: u32,
    next_instance_index: u32,
}

impl<'a> Parser<'a> {
    fn peek(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.idx + offset)
            .map(|tk| tk.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn peek_text(&self) -> &str {
        self.tokens
            .get(self.idx)
            .and_then(|tk| tk.text.as_deref())
            .unwrap_or("")
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.idx.min(self.tokens.len().saturating_sub(1)))
            .map(|tk| tk.line + 1)
            .unwrap_or(1)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            line: self.line(),
            message: message.into(),
        })
    }

    fn advance(&mut self) -> Token {
        let token = self
            .tokens
            .get(self.idx)
            .cloned()
            .unwrap_or_else(|| Token::new(TokenKind::Eof));
        if self.idx < self.tokens.len() {
            self.idx += 1;
        }
        token
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.peek(0) == kind {
            self.idx += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.peek(0) == kind {
            Ok(self.advance())
        } else {
            self.error(format!("expected {}", what))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String, ParseError> {
        if self.peek(0) == TokenKind::Identifier {
            let token = self.advance();
            Ok(token.text.unwrap_or_default())
        } else {
            self.error(format!("expected {}", what))
        }
    }

    // ---- top level ----------------------------------------------------

    fn parse_shader(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::ShaderType, "'shader_type' at start of shader")?;
        let mode_name = self.expect_identifier("shader type name")?;
        self.expect(TokenKind::Semicolon, "';' after shader type")?;
        match ShaderMode::from_name(&mode_name) {
            Some(mode) if mode == self.info.mode => {}
            Some(_) => return self.error(format!("shader type '{}' does not match the requested mode", mode_name)),
            None => return self.error(format!("unknown shader type '{}'", mode_name)),
        }

        loop {
            match self.peek(0) {
                TokenKind::Eof => break,
                TokenKind::RenderMode => self.parse_render_modes()?,
                TokenKind::Struct => self.parse_struct()?,
                TokenKind::GroupUniforms => self.parse_group_uniforms()?,
                TokenKind::Global => {
                    self.advance();
                    self.expect(TokenKind::Uniform, "'uniform' after 'global'")?;
                    self.parse_uniform(UniformScope::Global)?;
                }
                TokenKind::Instance => {
                    self.advance();
                    self.expect(TokenKind::Uniform, "'uniform' after 'instance'")?;
                    self.parse_uniform(UniformScope::Instance)?;
                }
                TokenKind::Uniform => {
                    self.advance();
                    self.parse_uniform(UniformScope::Local)?;
                }
                TokenKind::Varying => self.parse_varying()?,
                TokenKind::Const => self.parse_global_constant()?,
                _ => self.parse_function()?,
            }
        }
        Ok(())
    }

    fn parse_render_modes(&mut self) -> Result<(), ParseError> {
        self.advance();
        loop {
            let name = self.expect_identifier("render mode name")?;
            self.shader.render_modes.push(name);
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semicolon, "';' after render_mode")?;
        Ok(())
    }

    fn parse_group_uniforms(&mut self) -> Result<(), ParseError> {
        self.advance();
        // Group names only affect editor presentation; accept and drop them.
        while self.peek(0) != TokenKind::Semicolon && self.peek(0) != TokenKind::Eof {
            self.advance();
        }
        self.expect(TokenKind::Semicolon, "';' after group_uniforms")?;
        Ok(())
    }

    fn parse_struct(&mut self) -> Result<(), ParseError> {
        self.advance();
        let name = self.expect_identifier("struct name")?;
        self.expect(TokenKind::CurlyBracketOpen, "'{' after struct name")?;
        let mut members = Vec::new();
        while self.peek(0) != TokenKind::CurlyBracketClose {
            let precision = self.parse_precision();
            let (datatype, struct_name) = self.parse_type("struct member type")?;
            loop {
                let member_name = self.expect_identifier("struct member name")?;
                let array_size = self.parse_optional_array_size()?.unwrap_or(0);
                members.push(StructMember {
                    name: member_name,
                    datatype,
                    struct_name: struct_name.clone(),
                    precision,
                    array_size,
                });
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Semicolon, "';' after struct member")?;
        }
        self.expect(TokenKind::CurlyBracketClose, "'}' after struct body")?;
        self.expect(TokenKind::Semicolon, "';' after struct declaration")?;
        self.struct_names.insert(name.clone());
        self.shader.structs.push(StructInfo {
            name,
            shader_struct: StructNode { members },
        });
        Ok(())
    }

    fn parse_precision(&mut self) -> Precision {
        match self.peek(0) {
            TokenKind::PrecisionLow => {
                self.advance();
                Precision::Low
            }
            TokenKind::PrecisionMid => {
                self.advance();
                Precision::Mid
            }
            TokenKind::PrecisionHigh => {
                self.advance();
                Precision::High
            }
            _ => Precision::Default,
        }
    }

    /// Parses a datatype token or a declared struct name.
    fn parse_type(&mut self, what: &str) -> Result<(DataType, String), ParseError> {
        if let Some(datatype) = DataType::from_token(self.peek(0)) {
            self.advance();
            return Ok((datatype, String::new()));
        }
        if self.peek(0) == TokenKind::Identifier && self.struct_names.contains(self.peek_text()) {
            let name = self.advance().text.unwrap_or_default();
            return Ok((DataType::Struct, name));
        }
        self.error(format!("expected {}", what))
    }

    /// `[ N ]` with a constant size; empty brackets yield size 0 for the
    /// caller to infer from an initializer.
    fn parse_optional_array_size(&mut self) -> Result<Option<u32>, ParseError> {
        if !self.accept(TokenKind::BracketOpen) {
            return Ok(None);
        }
        if self.accept(TokenKind::BracketClose) {
            return Ok(Some(0));
        }
        let size = match self.peek(0) {
            TokenKind::IntConstant | TokenKind::UintConstant => self.advance().constant as u32,
            _ => return self.error("expected array size"),
        };
        self.expect(TokenKind::BracketClose, "']' after array size")?;
        Ok(Some(size))
    }

    fn parse_uniform(&mut self, scope: UniformScope) -> Result<(), ParseError> {
        let precision = self.parse_precision();
        let datatype = match DataType::from_token(self.peek(0)) {
            Some(datatype) => {
                self.advance();
                datatype
            }
            None => return self.error("expected type after 'uniform'"),
        };
        let name = self.expect_identifier("uniform name")?;
        let array_size = self.parse_optional_array_size()?.unwrap_or(0);

        let mut uniform = Uniform {
            datatype,
            precision,
            scope,
            array_size,
            ..Uniform::default()
        };

        if self.accept(TokenKind::Colon) {
            loop {
                let kind = self.peek(0);
                if let Some(filter) = TextureFilter::from_token(kind) {
                    uniform.filter = filter;
                    self.advance();
                } else if let Some(repeat) = TextureRepeat::from_token(kind) {
                    uniform.repeat = repeat;
                    self.advance();
                } else if let Some(hint) = UniformHint::from_token(kind) {
                    self.advance();
                    if hint == UniformHint::SourceColor {
                        uniform.use_color = true;
                    }
                    if uniform.hint == UniformHint::None {
                        uniform.hint = hint;
                    }
                    if kind == TokenKind::HintRange || kind == TokenKind::HintInstanceIndex {
                        if self.accept(TokenKind::ParenthesisOpen) {
                            self.skip_to_matching_paren()?;
                        }
                    }
                } else {
                    return self.error("expected uniform hint");
                }
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
        }

        if self.accept(TokenKind::OpAssign) {
            // Default values feed the material system, not the generated
            // code; parse and drop.
            if self.peek(0) == TokenKind::CurlyBracketOpen {
                self.parse_brace_initializer_list()?;
            } else {
                self.parse_expression()?;
            }
        }
        self.expect(TokenKind::Semicolon, "';' after uniform declaration")?;

        if scope == UniformScope::Global {
            if let Some(global_type) = self.info.global_type_func {
                match global_type(&name) {
                    Some(t) if t == datatype => {}
                    Some(_) => {
                        return self.error(format!(
                            "global uniform '{}' type does not match the global registry",
                            name
                        ))
                    }
                    None => {
                        return self.error(format!("global uniform '{}' is not registered", name))
                    }
                }
            }
        }

        let virtual_texture = matches!(
            uniform.hint,
            UniformHint::ScreenTexture
                | UniformHint::NormalRoughnessTexture
                | UniformHint::DepthTexture
        );
        if datatype.is_sampler() {
            if !virtual_texture {
                uniform.texture_order = self.next_texture_order;
                self.next_texture_order += 1;
                uniform.texture_binding = self.next_texture_binding;
                self.next_texture_binding += 1;
            } else {
                uniform.texture_order = i32::MAX; // virtual, never indexed
            }
        } else if scope == UniformScope::Instance {
            uniform.instance_index = self.next_instance_index;
            self.next_instance_index += 1;
        } else {
            uniform.order = self.next_uniform_order;
            self.next_uniform_order += 1;
        }

        self.shader.uniforms.insert(name, uniform);
        Ok(())
    }

    fn skip_to_matching_paren(&mut self) -> Result<(), ParseError> {
        let mut depth = 1;
        loop {
            match self.peek(0) {
                TokenKind::ParenthesisOpen => depth += 1,
                TokenKind::ParenthesisClose => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        return Ok(());
                    }
                }
                TokenKind::Eof => return self.error("unexpected end of file in hint arguments"),
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_varying(&mut self) -> Result<(), ParseError> {
        self.advance();
        let interpolation = match self.peek(0) {
            TokenKind::InterpolationFlat => {
                self.advance();
                Interpolation::Flat
            }
            TokenKind::InterpolationSmooth => {
                self.advance();
                Interpolation::Smooth
            }
            _ => Interpolation::Default,
        };
        let precision = self.parse_precision();
        let datatype = match DataType::from_token(self.peek(0)) {
            Some(datatype) => {
                self.advance();
                datatype
            }
            None => return self.error("expected type after 'varying'"),
        };
        let name = self.expect_identifier("varying name")?;
        let array_size = self.parse_optional_array_size()?.unwrap_or(0);
        self.expect(TokenKind::Semicolon, "';' after varying declaration")?;
        self.shader.varyings.insert(
            name,
            Varying {
                datatype,
                precision,
                interpolation,
                stage: VaryingStage::Unknown,
                array_size,
            },
        );
        Ok(())
    }

    fn parse_global_constant(&mut self) -> Result<(), ParseError> {
        // `const` may also begin a function returning a struct by value in
        // some dialects; this grammar keeps `const` for constants only.
        self.advance();
        let precision = self.parse_precision();
        let (datatype, type_str) = self.parse_type("type after 'const'")?;
        // A type directly followed by `name (` is a function definition the
        // `const` does not belong to; reject for clarity.
        let name = self.expect_identifier("constant name")?;
        if self.peek(0) == TokenKind::ParenthesisOpen {
            return self.error("functions cannot be declared 'const'");
        }
        let array_size = self.parse_optional_array_size()?.unwrap_or(0);
        self.expect(TokenKind::OpAssign, "'=' after constant name")?;
        let initializer = if self.peek(0) == TokenKind::CurlyBracketOpen {
            let values = self.parse_brace_initializer_list()?;
            Node::ArrayConstruct(ArrayConstructNode {
                datatype,
                struct_name: type_str.clone(),
                initializer: values,
            })
        } else {
            self.parse_expression()?
        };
        self.expect(TokenKind::Semicolon, "';' after constant declaration")?;
        self.shader.constants.push(ConstantDecl {
            name,
            datatype,
            type_str,
            precision,
            array_size,
            initializer,
        });
        Ok(())
    }

    fn parse_brace_initializer_list(&mut self) -> Result<Vec<Node>, ParseError> {
        self.expect(TokenKind::CurlyBracketOpen, "'{'")?;
        let mut values = Vec::new();
        if self.peek(0) != TokenKind::CurlyBracketClose {
            loop {
                values.push(self.parse_expression()?);
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::CurlyBracketClose, "'}' after initializer list")?;
        Ok(values)
    }

    // ---- functions ----------------------------------------------------

    fn parse_function(&mut self) -> Result<(), ParseError> {
        let return_precision = self.parse_precision();
        let (return_type, return_struct_name) = self.parse_type("function return type")?;
        let return_array_size = self.parse_optional_array_size()?.unwrap_or(0);
        let name = self.expect_identifier("function name")?;
        self.expect(TokenKind::ParenthesisOpen, "'(' after function name")?;

        let mut arguments = Vec::new();
        if self.peek(0) != TokenKind::ParenthesisClose {
            loop {
                let is_const = self.accept(TokenKind::Const);
                let qualifier = match self.peek(0) {
                    TokenKind::ArgIn => {
                        self.advance();
                        ArgumentQualifier::In
                    }
                    TokenKind::ArgOut => {
                        self.advance();
                        ArgumentQualifier::Out
                    }
                    TokenKind::ArgInout => {
                        self.advance();
                        ArgumentQualifier::InOut
                    }
                    _ => ArgumentQualifier::In,
                };
                let precision = self.parse_precision();
                let (datatype, struct_name) = self.parse_type("argument type")?;
                let arg_name = self.expect_identifier("argument name")?;
                let array_size = self.parse_optional_array_size()?.unwrap_or(0);
                arguments.push(FunctionArgument {
                    name: arg_name,
                    datatype,
                    struct_name,
                    precision,
                    qualifier,
                    is_const,
                    array_size,
                });
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::ParenthesisClose, "')' after function arguments")?;

        self.function_sigs
            .insert(name.clone(), (return_type, return_struct_name.clone()));
        self.current_function = Some(name.clone());
        self.current_uses = HashSet::new();
        let mut scope = HashMap::new();
        for arg in &arguments {
            scope.insert(
                arg.name.clone(),
                LocalVar {
                    datatype: arg.datatype,
                    struct_name: arg.struct_name.clone(),
                    array_size: arg.array_size,
                },
            );
        }
        self.locals.push(scope);
        let body = self.parse_braced_block()?;
        self.locals.pop();
        self.current_function = None;

        let uses_function = std::mem::take(&mut self.current_uses);
        self.shader.functions.push(FunctionInfo {
            name: name.clone(),
            function: FunctionNode {
                name,
                return_type,
                return_struct_name,
                return_precision,
                return_array_size,
                arguments,
                body,
            },
            uses_function,
        });
        Ok(())
    }

    // ---- statements ---------------------------------------------------

    fn parse_braced_block(&mut self) -> Result<Node, ParseError> {
        self.expect(TokenKind::CurlyBracketOpen, "'{'")?;
        self.locals.push(HashMap::new());
        let mut statements = Vec::new();
        while self.peek(0) != TokenKind::CurlyBracketClose {
            if self.peek(0) == TokenKind::Eof {
                return self.error("unexpected end of file in block");
            }
            statements.push(self.parse_statement()?);
        }
        self.advance();
        self.locals.pop();
        Ok(Node::Block(BlockNode {
            statements,
            single_statement: false,
            use_comma_between_statements: false,
        }))
    }

    /// A statement-position block: braced, or a single statement.
    fn parse_body(&mut self) -> Result<Node, ParseError> {
        if self.peek(0) == TokenKind::CurlyBracketOpen {
            self.parse_braced_block()
        } else {
            let statement = self.parse_statement()?;
            Ok(Node::Block(BlockNode {
                statements: vec![statement],
                single_statement: true,
                use_comma_between_statements: false,
            }))
        }
    }

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        match self.peek(0) {
            TokenKind::CfIf => self.parse_if(),
            TokenKind::CfWhile => {
                self.advance();
                self.expect(TokenKind::ParenthesisOpen, "'(' after 'while'")?;
                let cond = self.parse_expression()?;
                self.expect(TokenKind::ParenthesisClose, "')' after condition")?;
                let body = self.parse_body()?;
                Ok(Node::ControlFlow(ControlFlowNode {
                    flow_op: FlowOperation::While,
                    expressions: vec![cond],
                    blocks: vec![body],
                }))
            }
            TokenKind::CfDo => {
                self.advance();
                let body = self.parse_body()?;
                self.expect(TokenKind::CfWhile, "'while' after do body")?;
                self.expect(TokenKind::ParenthesisOpen, "'(' after 'while'")?;
                let cond = self.parse_expression()?;
                self.expect(TokenKind::ParenthesisClose, "')' after condition")?;
                self.expect(TokenKind::Semicolon, "';' after do-while")?;
                Ok(Node::ControlFlow(ControlFlowNode {
                    flow_op: FlowOperation::Do,
                    expressions: vec![cond],
                    blocks: vec![body],
                }))
            }
            TokenKind::CfFor => self.parse_for(),
            TokenKind::CfSwitch => self.parse_switch(),
            TokenKind::CfReturn => {
                self.advance();
                let mut expressions = Vec::new();
                if self.peek(0) != TokenKind::Semicolon {
                    expressions.push(self.parse_expression()?);
                }
                self.expect(TokenKind::Semicolon, "';' after return")?;
                Ok(Node::ControlFlow(ControlFlowNode {
                    flow_op: FlowOperation::Return,
                    expressions,
                    blocks: Vec::new(),
                }))
            }
            TokenKind::CfDiscard | TokenKind::CfContinue | TokenKind::CfBreak => {
                let flow_op = match self.advance().kind {
                    TokenKind::CfDiscard => FlowOperation::Discard,
                    TokenKind::CfContinue => FlowOperation::Continue,
                    _ => FlowOperation::Break,
                };
                self.expect(TokenKind::Semicolon, "';' after statement")?;
                Ok(Node::ControlFlow(ControlFlowNode {
                    flow_op,
                    expressions: Vec::new(),
                    blocks: Vec::new(),
                }))
            }
            TokenKind::Semicolon => {
                self.advance();
                Ok(Node::Operator(OperatorNode {
                    op: Operator::Empty,
                    return_type: DataType::Void,
                    struct_name: String::new(),
                    arguments: Vec::new(),
                }))
            }
            _ if self.starts_declaration() => {
                let declaration = self.parse_local_declaration()?;
                self.expect(TokenKind::Semicolon, "';' after declaration")?;
                Ok(declaration)
            }
            _ => {
                let expression = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';' after expression")?;
                Ok(expression)
            }
        }
    }

    fn parse_if(&mut self) -> Result<Node, ParseError> {
        self.advance();
        self.expect(TokenKind::ParenthesisOpen, "'(' after 'if'")?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::ParenthesisClose, "')' after condition")?;
        let then_block = self.parse_body()?;
        let mut blocks = vec![then_block];
        if self.accept(TokenKind::CfElse) {
            blocks.push(self.parse_body()?);
        }
        Ok(Node::ControlFlow(ControlFlowNode {
            flow_op: FlowOperation::If,
            expressions: vec![cond],
            blocks,
        }))
    }

    fn parse_for(&mut self) -> Result<Node, ParseError> {
        self.advance();
        self.expect(TokenKind::ParenthesisOpen, "'(' after 'for'")?;
        self.locals.push(HashMap::new());
        let init = if self.peek(0) == TokenKind::Semicolon {
            self.empty_statement()
        } else if self.starts_declaration() {
            self.parse_local_declaration()?
        } else {
            self.parse_expression()?
        };
        self.expect(TokenKind::Semicolon, "';' after for initializer")?;
        let cond = if self.peek(0) == TokenKind::Semicolon {
            self.empty_statement()
        } else {
            self.parse_expression()?
        };
        self.expect(TokenKind::Semicolon, "';' after for condition")?;
        let increment = if self.peek(0) == TokenKind::ParenthesisClose {
            self.empty_statement()
        } else {
            self.parse_expression()?
        };
        self.expect(TokenKind::ParenthesisClose, "')' after for header")?;
        let body = self.parse_body()?;
        self.locals.pop();

        let single = |statement: Node| {
            Node::Block(BlockNode {
                statements: vec![statement],
                single_statement: true,
                use_comma_between_statements: false,
            })
        };
        Ok(Node::ControlFlow(ControlFlowNode {
            flow_op: FlowOperation::For,
            expressions: Vec::new(),
            blocks: vec![single(init), single(cond), single(increment), body],
        }))
    }

    fn empty_statement(&self) -> Node {
        Node::Operator(OperatorNode {
            op: Operator::Empty,
            return_type: DataType::Void,
            struct_name: String::new(),
            arguments: Vec::new(),
        })
    }

    fn parse_switch(&mut self) -> Result<Node, ParseError> {
        self.advance();
        self.expect(TokenKind::ParenthesisOpen, "'(' after 'switch'")?;
        let value = self.parse_expression()?;
        self.expect(TokenKind::ParenthesisClose, "')' after switch value")?;
        self.expect(TokenKind::CurlyBracketOpen, "'{' after switch")?;
        let mut cases = Vec::new();
        while self.peek(0) != TokenKind::CurlyBracketClose {
            let (flow_op, expressions) = match self.peek(0) {
                TokenKind::CfCase => {
                    self.advance();
                    let expr = self.parse_expression()?;
                    (FlowOperation::Case, vec![expr])
                }
                TokenKind::CfDefault => {
                    self.advance();
                    (FlowOperation::Default, Vec::new())
                }
                _ => return self.error("expected 'case' or 'default' in switch body"),
            };
            self.expect(TokenKind::Colon, "':' after case label")?;
            self.locals.push(HashMap::new());
            let mut statements = Vec::new();
            while !matches!(
                self.peek(0),
                TokenKind::CfCase | TokenKind::CfDefault | TokenKind::CurlyBracketClose
            ) {
                statements.push(self.parse_statement()?);
            }
            self.locals.pop();
            cases.push(Node::ControlFlow(ControlFlowNode {
                flow_op,
                expressions,
                blocks: vec![Node::Block(BlockNode {
                    statements,
                    single_statement: false,
                    use_comma_between_statements: false,
                })],
            }));
        }
        self.advance();
        Ok(Node::ControlFlow(ControlFlowNode {
            flow_op: FlowOperation::Switch,
            expressions: vec![value],
            blocks: vec![Node::Block(BlockNode {
                statements: cases,
                single_statement: false,
                use_comma_between_statements: false,
            })],
        }))
    }

    /// Whether the upcoming tokens begin a local declaration rather than an
    /// expression. Constructor calls (`vec3(...)`) and array constructors
    /// (`float[2](...)`) are expressions.
    fn starts_declaration(&self) -> bool {
        let mut offset = 0;
        if self.peek(offset) == TokenKind::Const {
            return true;
        }
        if self.peek(offset).is_precision() {
            return true;
        }
        let type_here = self.peek(offset).is_datatype()
            || (self.peek(offset) == TokenKind::Identifier
                && self.struct_names.contains(self.peek_text()));
        if !type_here {
            return false;
        }
        offset += 1;
        match self.peek(offset) {
            TokenKind::Identifier => true,
            TokenKind::BracketOpen => {
                // `T[...] name` declares, `T[...] (` constructs.
                let mut depth = 1;
                offset += 1;
                while depth > 0 {
                    match self.peek(offset) {
                        TokenKind::BracketOpen => depth += 1,
                        TokenKind::BracketClose => depth -= 1,
                        TokenKind::Eof => return false,
                        _ => {}
                    }
                    offset += 1;
                }
                self.peek(offset) == TokenKind::Identifier
            }
            _ => false,
        }
    }

    fn parse_local_declaration(&mut self) -> Result<Node, ParseError> {
        let is_const = self.accept(TokenKind::Const);
        let precision = self.parse_precision();
        let (datatype, struct_name) = self.parse_type("declaration type")?;
        // New-style `T[N] name` array declaration.
        let leading_array = self.parse_optional_array_size()?;

        let mut declarations = Vec::new();
        loop {
            let name = self.expect_identifier("variable name")?;
            let trailing_array = self.parse_optional_array_size()?;
            let declared_size = trailing_array.or(leading_array);
            let mut declaration = Declaration {
                name: name.clone(),
                size: declared_size.unwrap_or(0),
                size_expression: None,
                single_expression: false,
                initializer: Vec::new(),
            };
            let is_array = declared_size.is_some();
            if self.accept(TokenKind::OpAssign) {
                if is_array {
                    match self.peek(0) {
                        TokenKind::CurlyBracketOpen => {
                            declaration.initializer = self.parse_brace_initializer_list()?;
                        }
                        kind if kind.is_datatype() => {
                            // `T[N](a, b, c)` constructor initializer.
                            let expr = self.parse_expression()?;
                            match expr {
                                Node::ArrayConstruct(ac) => {
                                    declaration.initializer = ac.initializer;
                                }
                                other => {
                                    declaration.single_expression = true;
                                    declaration.initializer = vec![other];
                                }
                            }
                        }
                        _ => {
                            declaration.single_expression = true;
                            declaration.initializer = vec![self.parse_expression()?];
                        }
                    }
                    if declaration.size == 0 && !declaration.single_expression {
                        declaration.size = declaration.initializer.len() as u32;
                    }
                } else {
                    declaration.initializer = vec![self.parse_expression()?];
                }
            }
            let array_size = if is_array { declaration.size.max(1) } else { 0 };
            if let Some(scope) = self.locals.last_mut() {
                scope.insert(
                    name,
                    LocalVar {
                        datatype,
                        struct_name: struct_name.clone(),
                        array_size,
                    },
                );
            }
            declarations.push(declaration);
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }

        Ok(Node::VariableDeclaration(VariableDeclarationNode {
            datatype,
            struct_name,
            precision,
            is_const,
            declarations,
        }))
    }

    // ---- expressions --------------------------------------------------

    fn parse_expression(&mut self) -> Result<Node, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Node, ParseError> {
        let lhs = self.parse_ternary()?;
        let op = match self.peek(0) {
            TokenKind::OpAssign => Operator::Assign,
            TokenKind::OpAssignAdd => Operator::AssignAdd,
            TokenKind::OpAssignSub => Operator::AssignSub,
            TokenKind::OpAssignMul => Operator::AssignMul,
            TokenKind::OpAssignDiv => Operator::AssignDiv,
            TokenKind::OpAssignMod => Operator::AssignMod,
            TokenKind::OpAssignShiftLeft => Operator::AssignShiftLeft,
            TokenKind::OpAssignShiftRight => Operator::AssignShiftRight,
            TokenKind::OpAssignBitAnd => Operator::AssignBitAnd,
            TokenKind::OpAssignBitOr => Operator::AssignBitOr,
            TokenKind::OpAssignBitXor => Operator::AssignBitXor,
            _ => return Ok(lhs),
        };
        self.advance();
        self.note_write(&lhs);
        let rhs = self.parse_assignment()?;
        let return_type = lhs.datatype();
        Ok(Node::Operator(OperatorNode {
            op,
            return_type,
            struct_name: String::new(),
            arguments: vec![lhs, rhs],
        }))
    }

    fn parse_ternary(&mut self) -> Result<Node, ParseError> {
        let cond = self.parse_binary(0)?;
        if !self.accept(TokenKind::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expression()?;
        self.expect(TokenKind::Colon, "':' in ternary expression")?;
        let else_expr = self.parse_assignment()?;
        let return_type = then_expr.datatype();
        Ok(Node::Operator(OperatorNode {
            op: Operator::Select,
            return_type,
            struct_name: String::new(),
            arguments: vec![cond, then_expr, else_expr],
        }))
    }

    fn binary_op(kind: TokenKind) -> Option<(Operator, u8)> {
        Some(match kind {
            TokenKind::OpOr => (Operator::Or, 0),
            TokenKind::OpAnd => (Operator::And, 1),
            TokenKind::OpBitOr => (Operator::BitOr, 2),
            TokenKind::OpBitXor => (Operator::BitXor, 3),
            TokenKind::OpBitAnd => (Operator::BitAnd, 4),
            TokenKind::OpEqual => (Operator::Equal, 5),
            TokenKind::OpNotEqual => (Operator::NotEqual, 5),
            TokenKind::OpLess => (Operator::Less, 6),
            TokenKind::OpLessEqual => (Operator::LessEqual, 6),
            TokenKind::OpGreater => (Operator::Greater, 6),
            TokenKind::OpGreaterEqual => (Operator::GreaterEqual, 6),
            TokenKind::OpShiftLeft => (Operator::ShiftLeft, 7),
            TokenKind::OpShiftRight => (Operator::ShiftRight, 7),
            TokenKind::OpAdd => (Operator::Add, 8),
            TokenKind::OpSub => (Operator::Sub, 8),
            TokenKind::OpMul => (Operator::Mul, 9),
            TokenKind::OpDiv => (Operator::Div, 9),
            TokenKind::OpMod => (Operator::Mod, 9),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Node, ParseError> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, precedence)) = Self::binary_op(self.peek(0)) {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(precedence + 1)?;
            let return_type = match op {
                Operator::Equal
                | Operator::NotEqual
                | Operator::Less
                | Operator::LessEqual
                | Operator::Greater
                | Operator::GreaterEqual
                | Operator::And
                | Operator::Or => DataType::Bool,
                _ => promote(lhs.datatype(), rhs.datatype()),
            };
            lhs = Node::Operator(OperatorNode {
                op,
                return_type,
                struct_name: String::new(),
                arguments: vec![lhs, rhs],
            });
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        let op = match self.peek(0) {
            TokenKind::OpNot => Some(Operator::Not),
            TokenKind::OpBitInvert => Some(Operator::BitInvert),
            TokenKind::OpSub => Some(Operator::Negate),
            TokenKind::OpIncrement => Some(Operator::Increment),
            TokenKind::OpDecrement => Some(Operator::Decrement),
            TokenKind::OpAdd => {
                // Unary plus is a no-op; drop it.
                self.advance();
                return self.parse_unary();
            }
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            if matches!(op, Operator::Increment | Operator::Decrement) {
                self.note_write(&operand);
            }
            let return_type = operand.datatype();
            return Ok(Node::Operator(OperatorNode {
                op,
                return_type,
                struct_name: String::new(),
                arguments: vec![operand],
            }));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Node, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek(0) {
                TokenKind::BracketOpen => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::BracketClose, "']' after index")?;
                    let return_type = indexed_type(expr.datatype());
                    expr = Node::Operator(OperatorNode {
                        op: Operator::Index,
                        return_type,
                        struct_name: String::new(),
                        arguments: vec![expr, index],
                    });
                }
                TokenKind::Period => {
                    self.advance();
                    let name = self.expect_member_name()?;
                    let (datatype, struct_name) = self.member_type(&expr, &name);
                    expr = Node::Member(MemberNode {
                        owner: Box::new(expr),
                        name,
                        datatype,
                        struct_name,
                        index_expression: None,
                        assign_expression: None,
                        call_expression: None,
                    });
                }
                TokenKind::OpIncrement => {
                    self.advance();
                    self.note_write(&expr);
                    let return_type = expr.datatype();
                    expr = Node::Operator(OperatorNode {
                        op: Operator::PostIncrement,
                        return_type,
                        struct_name: String::new(),
                        arguments: vec![expr],
                    });
                }
                TokenKind::OpDecrement => {
                    self.advance();
                    self.note_write(&expr);
                    let return_type = expr.datatype();
                    expr = Node::Operator(OperatorNode {
                        op: Operator::PostDecrement,
                        return_type,
                        struct_name: String::new(),
                        arguments: vec![expr],
                    });
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn expect_member_name(&mut self) -> Result<String, ParseError> {
        if self.peek(0) == TokenKind::Identifier {
            return Ok(self.advance().text.unwrap_or_default());
        }
        // Swizzles like `.xy` never collide with keywords, but struct
        // members may shadow type names (`m.length` is still rejected).
        self.error("expected member name after '.'")
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        match self.peek(0) {
            TokenKind::ParenthesisOpen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::ParenthesisClose, "')'")?;
                Ok(expr)
            }
            TokenKind::True | TokenKind::False => {
                let value = self.advance().kind == TokenKind::True;
                Ok(Node::Constant(ConstantNode {
                    datatype: DataType::Bool,
                    struct_name: String::new(),
                    values: vec![ConstantValue::Bool(value)],
                    array_size: 0,
                    array_declarations: Vec::new(),
                }))
            }
            TokenKind::IntConstant => {
                let token = self.advance();
                Ok(Node::Constant(ConstantNode {
                    datatype: DataType::Int,
                    struct_name: String::new(),
                    values: vec![ConstantValue::Sint(token.constant as i64)],
                    array_size: 0,
                    array_declarations: Vec::new(),
                }))
            }
            TokenKind::UintConstant => {
                let token = self.advance();
                Ok(Node::Constant(ConstantNode {
                    datatype: DataType::Uint,
                    struct_name: String::new(),
                    values: vec![ConstantValue::Uint(token.constant as u64)],
                    array_size: 0,
                    array_declarations: Vec::new(),
                }))
            }
            TokenKind::FloatConstant => {
                let token = self.advance();
                Ok(Node::Constant(ConstantNode {
                    datatype: DataType::Float,
                    struct_name: String::new(),
                    values: vec![ConstantValue::Real(token.constant)],
                    array_size: 0,
                    array_declarations: Vec::new(),
                }))
            }
            kind if kind.is_datatype() => self.parse_constructor(),
            TokenKind::Identifier => self.parse_identifier_expression(),
            _ => self.error("expected expression"),
        }
    }

    fn parse_constructor(&mut self) -> Result<Node, ParseError> {
        let type_token = self.advance();
        let datatype = DataType::from_token(type_token.kind).unwrap();
        if self.peek(0) == TokenKind::BracketOpen {
            self.parse_optional_array_size()?;
            self.expect(TokenKind::ParenthesisOpen, "'(' after array type")?;
            let args = self.parse_call_arguments()?;
            return Ok(Node::ArrayConstruct(ArrayConstructNode {
                datatype,
                struct_name: String::new(),
                initializer: args,
            }));
        }
        self.expect(TokenKind::ParenthesisOpen, "'(' after type name")?;
        let mut arguments = vec![Node::Variable(VariableNode {
            name: type_token.kind.spelling().to_string(),
            datatype,
            struct_name: String::new(),
            is_local: false,
        })];
        arguments.extend(self.parse_call_arguments()?);
        Ok(Node::Operator(OperatorNode {
            op: Operator::Construct,
            return_type: datatype,
            struct_name: String::new(),
            arguments,
        }))
    }

    fn parse_call_arguments(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut args = Vec::new();
        if self.peek(0) != TokenKind::ParenthesisClose {
            loop {
                args.push(self.parse_expression()?);
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::ParenthesisClose, "')' after arguments")?;
        Ok(args)
    }

    fn parse_identifier_expression(&mut self) -> Result<Node, ParseError> {
        let token = self.advance();
        let name = token.text.unwrap_or_default();

        if self.peek(0) == TokenKind::ParenthesisOpen {
            self.advance();
            let is_struct = self.struct_names.contains(&name);
            let (op, return_type, struct_name) = if is_struct {
                (Operator::StructConstruct, DataType::Struct, name.clone())
            } else if let Some((return_type, struct_name)) = self.function_sigs.get(&name) {
                self.current_uses.insert(name.clone());
                (Operator::Call, *return_type, struct_name.clone())
            } else {
                (Operator::Call, DataType::Void, String::new())
            };
            let mut arguments = vec![Node::Variable(VariableNode {
                name,
                datatype: DataType::Void,
                struct_name: String::new(),
                is_local: false,
            })];
            arguments.extend(self.parse_call_arguments()?);
            return Ok(Node::Operator(OperatorNode {
                op,
                return_type,
                struct_name,
                arguments,
            }));
        }

        let (datatype, struct_name, array_size, is_local) = self.resolve_name(&name);
        if array_size > 0 {
            let index_expression = if self.accept(TokenKind::BracketOpen) {
                let index = self.parse_expression()?;
                self.expect(TokenKind::BracketClose, "']' after index")?;
                Some(Box::new(index))
            } else {
                None
            };
            return Ok(Node::Array(ArrayNode {
                name,
                datatype,
                struct_name,
                is_local,
                index_expression,
                call_expression: None,
                assign_expression: None,
            }));
        }
        Ok(Node::Variable(VariableNode {
            name,
            datatype,
            struct_name,
            is_local,
        }))
    }

    fn resolve_name(&self, name: &str) -> (DataType, String, u32, bool) {
        for scope in self.locals.iter().rev() {
            if let Some(var) = scope.get(name) {
                return (var.datatype, var.struct_name.clone(), var.array_size, true);
            }
        }
        if let Some(uniform) = self.shader.uniforms.get(name) {
            return (uniform.datatype, String::new(), uniform.array_size, false);
        }
        if let Some(varying) = self.shader.varyings.get(name) {
            return (varying.datatype, String::new(), varying.array_size, false);
        }
        if let Some(constant) = self.shader.constants.iter().find(|c| c.name == name) {
            return (
                constant.datatype,
                constant.type_str.clone(),
                constant.array_size,
                false,
            );
        }
        // Unresolved names are stage built-ins supplied by the renderer.
        (DataType::Void, String::new(), 0, false)
    }

    /// Records a write to a varying so its stage can be inferred.
    fn note_write(&mut self, lhs: &Node) {
        let name = match base_name(lhs) {
            Some(name) => name,
            None => return,
        };
        let stage = match self.current_function.as_deref() {
            Some("vertex") => VaryingStage::Vertex,
            Some("fragment") => VaryingStage::Fragment,
            Some("light") => VaryingStage::FragmentToLight,
            _ => return,
        };
        if let Some(varying) = self.shader.varyings.get_mut(&name) {
            if varying.stage == VaryingStage::Unknown {
                varying.stage = stage;
            }
        }
    }

    fn member_type(&self, owner: &Node, member: &str) -> (DataType, String) {
        let owner_type = owner.datatype();
        if owner_type == DataType::Struct {
            let struct_name = match owner {
                Node::Variable(n) => n.struct_name.clone(),
                Node::Array(n) => n.struct_name.clone(),
                Node::Member(n) => n.struct_name.clone(),
                Node::Operator(n) => n.struct_name.clone(),
                _ => String::new(),
            };
            if let Some(info) = self.shader.structs.iter().find(|s| s.name == struct_name) {
                if let Some(m) = info.shader_struct.members.iter().find(|m| m.name == member) {
                    return (m.datatype, m.struct_name.clone());
                }
            }
            return (DataType::Void, String::new());
        }
        (swizzle_type(owner_type, member.len()), String::new())
    }
}

/// Component type of an indexed vector/matrix.
fn indexed_type(datatype: DataType) -> DataType {
    match datatype {
        DataType::BVec2 | DataType::BVec3 | DataType::BVec4 => DataType::Bool,
        DataType::IVec2 | DataType::IVec3 | DataType::IVec4 => DataType::Int,
        DataType::UVec2 | DataType::UVec3 | DataType::UVec4 => DataType::Uint,
        DataType::Vec2 | DataType::Vec3 | DataType::Vec4 => DataType::Float,
        DataType::Mat2 => DataType::Vec2,
        DataType::Mat3 => DataType::Vec3,
        DataType::Mat4 => DataType::Vec4,
        other => other,
    }
}

fn swizzle_type(base: DataType, len: usize) -> DataType {
    let scalar = indexed_type(base);
    let family = match scalar {
        DataType::Bool => [DataType::Bool, DataType::BVec2, DataType::BVec3, DataType::BVec4],
        DataType::Int => [DataType::Int, DataType::IVec2, DataType::IVec3, DataType::IVec4],
        DataType::Uint => [DataType::Uint, DataType::UVec2, DataType::UVec3, DataType::UVec4],
        DataType::Float => [DataType::Float, DataType::Vec2, DataType::Vec3, DataType::Vec4],
        _ => return DataType::Void,
    };
    match len {
        1..=4 => family[len - 1],
        _ => DataType::Void,
    }
}

/// Type of an arithmetic combination; vectors and matrices win over scalars.
fn promote(a: DataType, b: DataType) -> DataType {
    let rank = |t: DataType| match t {
        DataType::Mat2 | DataType::Mat3 | DataType::Mat4 => 2,
        DataType::Vec2
        | DataType::Vec3
        | DataType::Vec4
        | DataType::IVec2
        | DataType::IVec3
        | DataType::IVec4
        | DataType::UVec2
        | DataType::UVec3
        | DataType::UVec4
        | DataType::BVec2
        | DataType::BVec3
        | DataType::BVec4 => 1,
        _ => 0,
    };
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

fn base_name(node: &Node) -> Option<String> {
    match node {
        Node::Variable(n) => Some(n.name.clone()),
        Node::Array(n) => Some(n.name.clone()),
        Node::Member(n) => base_name(&n.owner),
        Node::Operator(n) if n.op == Operator::Index => base_name(n.arguments.first()?),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str, mode: ShaderMode) -> ShaderNode {
        parse(source, &CompileInfo::new(mode)).expect("parse failed")
    }

    #[test]
    fn test_parse_minimal() {
        let shader = parse_ok(
            "shader_type spatial; void fragment() { ALBEDO = vec3(1.0); }",
            ShaderMode::Spatial,
        );
        assert_eq!(shader.functions.len(), 1);
        assert_eq!(shader.functions[0].name, "fragment");
    }

    #[test]
    fn test_parse_uniform_attributes() {
        let shader = parse_ok(
            "shader_type spatial;\nuniform sampler2D tex : source_color, filter_nearest, repeat_enable;\nuniform vec4 tint : source_color = vec4(1.0);\nvoid fragment() {}",
            ShaderMode::Spatial,
        );
        let tex = &shader.uniforms["tex"];
        assert_eq!(tex.filter, TextureFilter::Nearest);
        assert_eq!(tex.repeat, TextureRepeat::Enable);
        assert!(tex.use_color);
        assert_eq!(tex.texture_order, 0);
        let tint = &shader.uniforms["tint"];
        assert_eq!(tint.order, 0);
        assert_eq!(tint.texture_order, -1);
    }

    #[test]
    fn test_uniform_ordering() {
        let shader = parse_ok(
            "shader_type spatial;\nuniform float a;\nuniform sampler2D s1;\nuniform float b;\nuniform sampler2D s2;\nvoid fragment() {}",
            ShaderMode::Spatial,
        );
        assert_eq!(shader.uniforms["a"].order, 0);
        assert_eq!(shader.uniforms["b"].order, 1);
        assert_eq!(shader.uniforms["s1"].texture_order, 0);
        assert_eq!(shader.uniforms["s2"].texture_order, 1);
        assert_eq!(shader.uniforms["s2"].texture_binding, 1);
    }

    #[test]
    fn test_varying_stage_inference() {
        let shader = parse_ok(
            "shader_type spatial;\nvarying vec3 pos;\nvarying float depth;\nvoid vertex() { pos = VERTEX; }\nvoid fragment() { depth = 1.0; }",
            ShaderMode::Spatial,
        );
        assert_eq!(shader.varyings["pos"].stage, VaryingStage::Vertex);
        assert_eq!(shader.varyings["depth"].stage, VaryingStage::Fragment);
    }

    #[test]
    fn test_call_graph() {
        let shader = parse_ok(
            "shader_type spatial;\nfloat helper(float x) { return x * 2.0; }\nvoid fragment() { float y = helper(1.0); }",
            ShaderMode::Spatial,
        );
        let fragment = shader.find_function("fragment").unwrap();
        assert!(fragment.uses_function.contains("helper"));
    }

    #[test]
    fn test_mode_mismatch_rejected() {
        let err = parse(
            "shader_type spatial; void fragment() {}",
            &CompileInfo::new(ShaderMode::Particles),
        )
        .unwrap_err();
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn test_array_declarations() {
        let shader = parse_ok(
            "shader_type spatial;\nvoid fragment() { float xs[2] = {1.0, 2.0}; float[3] ys; xs[0] = ys[1]; }",
            ShaderMode::Spatial,
        );
        assert_eq!(shader.functions.len(), 1);
    }
}
