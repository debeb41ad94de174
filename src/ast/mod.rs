//! The abstract syntax tree the compiler core consumes.
//!
//! AST values are produced by an external parser and handed to this crate
//! either directly or serialized as JSON (every node type derives serde).
//! Each node carries its source file and byte-offset span so diagnostics and
//! `#line` mapping can point back at user code.

mod utils;

pub use utils::{is_idempotent, visit_topologically};

use std::fmt;
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::types::Type;

/// A source file. The compiler core only reads `text` to compute line
/// numbers and to slice out raw source for literals; it never re-parses it.
#[derive(Debug, Serialize, Deserialize)]
pub struct SourceFile {
    pub filename: String,
    pub text: String,
    #[serde(skip)]
    line_offsets: OnceCell<Vec<usize>>,
}

impl SourceFile {
    pub fn new(filename: impl Into<String>, text: impl Into<String>) -> Self {
        SourceFile {
            filename: filename.into(),
            text: text.into(),
            line_offsets: OnceCell::new(),
        }
    }

    /// A synthetic file used for compiler-fabricated AST nodes.
    pub fn builtin() -> Rc<SourceFile> {
        thread_local! {
            static BUILTIN_FILE: Rc<SourceFile> = Rc::new(SourceFile::new("<builtin>", ""));
        }
        BUILTIN_FILE.with(Rc::clone)
    }

    fn offsets(&self) -> &[usize] {
        self.line_offsets.get_or_init(|| {
            let mut offsets = vec![0];
            for (i, b) in self.text.bytes().enumerate() {
                if b == b'\n' {
                    offsets.push(i + 1);
                }
            }
            offsets
        })
    }

    pub fn relative_filename(&self) -> &str {
        let cwd = ".";
        self.filename.strip_prefix(cwd).map(|f| f.trim_start_matches('/')).unwrap_or(&self.filename)
    }

    pub fn line_count(&self) -> usize {
        self.offsets().len()
    }

    /// 1-based line number of a byte offset.
    pub fn line_number(&self, offset: usize) -> usize {
        match self.offsets().binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    /// 1-based (line, column) of a byte offset.
    pub fn line_column(&self, offset: usize) -> (usize, usize) {
        let line = self.line_number(offset);
        let line_start = self.offsets()[line - 1];
        (line, offset.saturating_sub(line_start) + 1)
    }

    /// Byte offset where a 1-based line starts.
    pub fn line_offset(&self, line: usize) -> usize {
        self.offsets().get(line - 1).copied().unwrap_or(self.text.len())
    }

    /// The text of a 1-based line, including its newline when present.
    pub fn line_text(&self, line: usize) -> Option<&str> {
        let offsets = self.offsets();
        let start = *offsets.get(line - 1)?;
        let end = offsets.get(line).copied().unwrap_or(self.text.len());
        self.text.get(start..end)
    }
}

/// Binary (and update-assignment) operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Power,
    Multiply,
    Divide,
    Mod,
    Mod1,
    Plus,
    Minus,
    Concat,
    LeftShift,
    RightShift,
    UnsignedLeftShift,
    UnsignedRightShift,
    And,
    Or,
    Xor,
    Compare,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
    Min,
    Max,
}

impl BinOp {
    /// The conventional method name consulted for operator overloading.
    pub fn method_name(self) -> Option<&'static str> {
        match self {
            BinOp::Power => Some("power"),
            BinOp::Multiply => Some("times"),
            BinOp::Divide => Some("divided_by"),
            BinOp::Mod => Some("modulo"),
            BinOp::Mod1 => Some("modulo1"),
            BinOp::Plus => Some("plus"),
            BinOp::Minus => Some("minus"),
            BinOp::Concat => Some("concatenated_with"),
            BinOp::LeftShift => Some("left_shifted"),
            BinOp::RightShift => Some("right_shifted"),
            BinOp::UnsignedLeftShift => Some("unsigned_left_shifted"),
            BinOp::UnsignedRightShift => Some("unsigned_right_shifted"),
            BinOp::And => Some("bit_and"),
            BinOp::Or => Some("bit_or"),
            BinOp::Xor => Some("bit_xor"),
            _ => None,
        }
    }

    /// The primitive C operator spelling, for the operators that have one.
    pub fn operator(self) -> Option<&'static str> {
        match self {
            BinOp::Multiply => Some("*"),
            BinOp::Divide => Some("/"),
            BinOp::Mod => Some("%"),
            BinOp::Plus => Some("+"),
            BinOp::Minus => Some("-"),
            BinOp::LeftShift => Some("<<"),
            BinOp::RightShift => Some(">>"),
            BinOp::And => Some("&"),
            BinOp::Or => Some("|"),
            BinOp::Xor => Some("^"),
            BinOp::Equals => Some("=="),
            BinOp::NotEquals => Some("!="),
            BinOp::LessThan => Some("<"),
            BinOp::LessThanOrEquals => Some("<="),
            BinOp::GreaterThan => Some(">"),
            BinOp::GreaterThanOrEquals => Some(">="),
            _ => None,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Equals
                | BinOp::NotEquals
                | BinOp::LessThan
                | BinOp::LessThanOrEquals
                | BinOp::GreaterThan
                | BinOp::GreaterThanOrEquals
        )
    }
}

/// What kind of thing a `use` statement imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UseKind {
    /// `use ./sibling.tm`: another source file, resolved relative to the
    /// importing file.
    Local,
    /// `use somelib`: an installed module (resolution is a collaborator
    /// concern; see `Env::module_loader`).
    Module,
    /// `use <stdio.h>` or `use ./header.h`: a raw C header include.
    Header,
    /// `use ./impl.c`: a raw C file include.
    CCode,
}

/// A named argument in a definition (`name:Type = default`) or a call
/// argument (`name=value` / positional `value`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgAst {
    pub name: Option<String>,
    pub type_ast: Option<Rc<TypeAstNode>>,
    pub value: Option<Rc<AstNode>>,
}

impl ArgAst {
    pub fn positional(value: Rc<AstNode>) -> Self {
        ArgAst { name: None, type_ast: None, value: Some(value) }
    }

    pub fn named(name: impl Into<String>, value: Rc<AstNode>) -> Self {
        ArgAst { name: Some(name.into()), type_ast: None, value: Some(value) }
    }
}

/// One tag of an enum definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagAst {
    pub name: String,
    pub fields: Vec<ArgAst>,
    #[serde(default)]
    pub secret: bool,
}

/// One `is Pattern: body` clause of a `when`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenClause {
    pub pattern: Rc<AstNode>,
    pub body: Rc<AstNode>,
}

/// An AST node: a variant plus the source span it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstNode {
    pub file: Rc<SourceFile>,
    pub start: usize,
    pub end: usize,
    pub ast: Ast,
}

impl AstNode {
    pub fn new(file: Rc<SourceFile>, start: usize, end: usize, ast: Ast) -> Rc<AstNode> {
        Rc::new(AstNode { file, start, end, ast })
    }

    /// A synthesized node carrying this node's span (used when the compiler
    /// rewrites or wraps user code).
    pub fn wrap(&self, ast: Ast) -> Rc<AstNode> {
        Rc::new(AstNode { file: self.file.clone(), start: self.start, end: self.end, ast })
    }

    /// A synthesized node with no real source location.
    pub fn fake(ast: Ast) -> Rc<AstNode> {
        Rc::new(AstNode { file: SourceFile::builtin(), start: 0, end: 0, ast })
    }

    /// Inline C code with a known type, used by the code generator to splice
    /// already-compiled text back into AST positions.
    pub fn literal_code(code: impl Into<String>, ty: Type) -> Rc<AstNode> {
        AstNode::fake(Ast::LiteralCode { code: code.into(), ty: Some(ty) })
    }

    /// The raw source text this node spans.
    pub fn source_text(&self) -> &str {
        self.file.text.get(self.start..self.end).unwrap_or("")
    }

    /// 1-based line number of this node's start.
    pub fn line_number(&self) -> usize {
        self.file.line_number(self.start)
    }
}

/// Type expressions as written in source (`[Int]`, `@Foo`, `{Text=Int}`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeAstNode {
    pub file: Rc<SourceFile>,
    pub start: usize,
    pub end: usize,
    pub ast: TypeAst,
}

impl TypeAstNode {
    pub fn new(file: Rc<SourceFile>, start: usize, end: usize, ast: TypeAst) -> Rc<TypeAstNode> {
        Rc::new(TypeAstNode { file, start, end, ast })
    }

    pub fn fake(ast: TypeAst) -> Rc<TypeAstNode> {
        Rc::new(TypeAstNode { file: SourceFile::builtin(), start: 0, end: 0, ast })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeAst {
    Unknown,
    Var { name: String },
    Pointer { pointed: Rc<TypeAstNode>, is_stack: bool },
    List { item: Rc<TypeAstNode> },
    Set { item: Rc<TypeAstNode> },
    Table { key: Rc<TypeAstNode>, value: Rc<TypeAstNode>, default_value: Option<Rc<AstNode>> },
    Function { args: Vec<ArgAst>, ret: Option<Rc<TypeAstNode>> },
    Optional { inner: Rc<TypeAstNode> },
}

/// The expression/statement sum. Variants marked `#[serde(skip)]` are
/// internal vehicles fabricated by the compiler and never cross the parser
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Ast {
    Unknown,
    None,
    Bool(bool),
    Var(String),
    /// Integer literals keep their raw source spelling; magnitude decides
    /// how they are compiled.
    Int { text: String },
    Num { n: f64 },
    TextLiteral { text: String },
    TextJoin { lang: Option<String>, children: Vec<Rc<AstNode>>, #[serde(default)] colorize: bool },
    PathLiteral { path: String },

    Declare { var: Rc<AstNode>, type_ast: Option<Rc<TypeAstNode>>, value: Option<Rc<AstNode>> },
    Assign { targets: Vec<Rc<AstNode>>, values: Vec<Rc<AstNode>> },
    BinaryOp { op: BinOp, lhs: Rc<AstNode>, rhs: Rc<AstNode> },
    UpdateAssign { op: BinOp, lhs: Rc<AstNode>, rhs: Rc<AstNode> },
    Negative { value: Rc<AstNode> },
    Not { value: Rc<AstNode> },
    HeapAllocate { value: Rc<AstNode> },
    StackReference { value: Rc<AstNode> },
    Min { lhs: Rc<AstNode>, rhs: Rc<AstNode>, key: Option<Rc<AstNode>> },
    Max { lhs: Rc<AstNode>, rhs: Rc<AstNode>, key: Option<Rc<AstNode>> },

    List { items: Vec<Rc<AstNode>> },
    Set { items: Vec<Rc<AstNode>> },
    Table {
        default_value: Option<Rc<AstNode>>,
        fallback: Option<Rc<AstNode>>,
        entries: Vec<Rc<AstNode>>,
    },
    TableEntry { key: Rc<AstNode>, value: Rc<AstNode> },
    Comprehension {
        expr: Rc<AstNode>,
        vars: Vec<Rc<AstNode>>,
        iter: Rc<AstNode>,
        filter: Option<Rc<AstNode>>,
    },

    FunctionDef {
        name: Rc<AstNode>,
        args: Vec<ArgAst>,
        ret_type: Option<Rc<TypeAstNode>>,
        body: Rc<AstNode>,
        cache: Option<Rc<AstNode>>,
        #[serde(default)]
        is_inline: bool,
    },
    ConvertDef {
        args: Vec<ArgAst>,
        ret_type: Option<Rc<TypeAstNode>>,
        body: Rc<AstNode>,
        cache: Option<Rc<AstNode>>,
        #[serde(default)]
        is_inline: bool,
    },
    Lambda { args: Vec<ArgAst>, ret_type: Option<Rc<TypeAstNode>>, body: Rc<AstNode> },
    FunctionCall { fn_ast: Rc<AstNode>, args: Vec<ArgAst> },
    MethodCall { self_ast: Rc<AstNode>, name: String, args: Vec<ArgAst> },

    Block { statements: Vec<Rc<AstNode>> },
    For {
        vars: Vec<Rc<AstNode>>,
        iter: Rc<AstNode>,
        body: Rc<AstNode>,
        empty: Option<Rc<AstNode>>,
    },
    While { condition: Rc<AstNode>, body: Rc<AstNode> },
    Repeat { body: Rc<AstNode> },
    If { condition: Rc<AstNode>, body: Rc<AstNode>, else_body: Option<Rc<AstNode>> },
    When { subject: Rc<AstNode>, clauses: Vec<WhenClause>, else_body: Option<Rc<AstNode>> },
    Reduction { op: BinOp, key: Option<Rc<AstNode>>, iter: Rc<AstNode> },
    Skip { target: Option<String> },
    Stop { target: Option<String> },
    Pass,
    Defer { body: Rc<AstNode> },
    Return { value: Option<Rc<AstNode>> },

    Extern { name: String, type_ast: Rc<TypeAstNode> },
    StructDef {
        name: String,
        fields: Vec<ArgAst>,
        namespace: Option<Rc<AstNode>>,
        #[serde(default)]
        secret: bool,
        #[serde(default)]
        external: bool,
        #[serde(default)]
        opaque: bool,
    },
    EnumDef { name: String, tags: Vec<TagAst>, namespace: Option<Rc<AstNode>> },
    LangDef { name: String, namespace: Option<Rc<AstNode>> },
    Extend { name: String, body: Rc<AstNode> },
    Use { var: Option<Rc<AstNode>>, path: String, what: UseKind },

    Index { indexed: Rc<AstNode>, index: Option<Rc<AstNode>>, #[serde(default)] unchecked: bool },
    FieldAccess { fielded: Rc<AstNode>, field: String },
    Optional { value: Rc<AstNode> },
    NonOptional { value: Rc<AstNode> },

    DocTest { expr: Rc<AstNode>, expected: Option<Rc<AstNode>> },
    Assert { expr: Rc<AstNode>, message: Option<Rc<AstNode>> },
    InlineCCode { chunks: Vec<Rc<AstNode>>, type_ast: Option<Rc<TypeAstNode>> },
    Deserialize { type_ast: Rc<TypeAstNode>, value: Rc<AstNode> },

    /// Already-compiled C code with a known type, fabricated by codegen.
    #[serde(skip)]
    LiteralCode { code: String, ty: Option<Type> },
    /// An expression whose type was completed from outside context.
    #[serde(skip)]
    ExplicitlyTyped { ast: Rc<AstNode>, ty: Type },
}

impl Ast {
    /// The operands of a binary operation or update assignment.
    pub fn binary_operands(&self) -> Option<(BinOp, &Rc<AstNode>, &Rc<AstNode>)> {
        match self {
            Ast::BinaryOp { op, lhs, rhs } | Ast::UpdateAssign { op, lhs, rhs } => {
                Some((*op, lhs, rhs))
            }
            _ => None,
        }
    }

    pub fn is_binary_operation(&self) -> bool {
        matches!(self, Ast::BinaryOp { .. })
    }

    pub fn is_update_assignment(&self) -> bool {
        matches!(self, Ast::UpdateAssign { .. })
    }

    /// The variable name, when this is a `Var` node.
    pub fn var_name(&self) -> Option<&str> {
        match self {
            Ast::Var(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
