//! Helpers for building AST fixtures in integration tests.
//!
//! The compiler core consumes ASTs from an external parser, so tests build
//! their inputs through this little construction kit. Every node built
//! through an [`AstBuilder`] carries a distinct (if synthetic) source span,
//! which keeps generated identifiers and diagnostics distinguishable.

use std::cell::Cell;
use std::rc::Rc;

use tomo_lang::ast::{ArgAst, Ast, AstNode, BinOp, SourceFile, TagAst, TypeAst, TypeAstNode, WhenClause};

/// Builds AST nodes against a synthetic source file.
pub struct AstBuilder {
    file: Rc<SourceFile>,
    next_offset: Cell<usize>,
}

impl AstBuilder {
    pub fn new(filename: &str) -> Self {
        // Padding text so every node can get a unique, nonempty span.
        let text: String = "x".repeat(4096);
        AstBuilder { file: Rc::new(SourceFile::new(filename, text)), next_offset: Cell::new(0) }
    }

    pub fn file(&self) -> Rc<SourceFile> {
        self.file.clone()
    }

    fn span(&self) -> (usize, usize) {
        let start = self.next_offset.get();
        self.next_offset.set(start + 2);
        (start, start + 1)
    }

    pub fn node(&self, ast: Ast) -> Rc<AstNode> {
        let (start, end) = self.span();
        AstNode::new(self.file.clone(), start, end, ast)
    }

    pub fn type_node(&self, ast: TypeAst) -> Rc<TypeAstNode> {
        let (start, end) = self.span();
        TypeAstNode::new(self.file.clone(), start, end, ast)
    }

    pub fn int(&self, text: &str) -> Rc<AstNode> {
        self.node(Ast::Int { text: text.into() })
    }

    pub fn num(&self, n: f64) -> Rc<AstNode> {
        self.node(Ast::Num { n })
    }

    pub fn bool(&self, b: bool) -> Rc<AstNode> {
        self.node(Ast::Bool(b))
    }

    pub fn none(&self) -> Rc<AstNode> {
        self.node(Ast::None)
    }

    pub fn var(&self, name: &str) -> Rc<AstNode> {
        self.node(Ast::Var(name.into()))
    }

    pub fn text(&self, text: &str) -> Rc<AstNode> {
        self.node(Ast::TextLiteral { text: text.into() })
    }

    pub fn list(&self, items: Vec<Rc<AstNode>>) -> Rc<AstNode> {
        self.node(Ast::List { items })
    }

    pub fn block(&self, statements: Vec<Rc<AstNode>>) -> Rc<AstNode> {
        self.node(Ast::Block { statements })
    }

    pub fn declare(&self, name: &str, value: Rc<AstNode>) -> Rc<AstNode> {
        self.node(Ast::Declare { var: self.var(name), type_ast: None, value: Some(value) })
    }

    pub fn declare_typed(
        &self,
        name: &str,
        type_ast: Rc<TypeAstNode>,
        value: Option<Rc<AstNode>>,
    ) -> Rc<AstNode> {
        self.node(Ast::Declare { var: self.var(name), type_ast: Some(type_ast), value })
    }

    pub fn binop(&self, op: BinOp, lhs: Rc<AstNode>, rhs: Rc<AstNode>) -> Rc<AstNode> {
        self.node(Ast::BinaryOp { op, lhs, rhs })
    }

    pub fn var_type(&self, name: &str) -> Rc<TypeAstNode> {
        self.type_node(TypeAst::Var { name: name.into() })
    }

    pub fn optional_type(&self, inner: Rc<TypeAstNode>) -> Rc<TypeAstNode> {
        self.type_node(TypeAst::Optional { inner })
    }

    pub fn list_type(&self, item: Rc<TypeAstNode>) -> Rc<TypeAstNode> {
        self.type_node(TypeAst::List { item })
    }

    pub fn arg(&self, name: &str, type_ast: Rc<TypeAstNode>) -> ArgAst {
        ArgAst { name: Some(name.into()), type_ast: Some(type_ast), value: None }
    }

    pub fn fn_def(
        &self,
        name: &str,
        args: Vec<ArgAst>,
        ret_type: Option<Rc<TypeAstNode>>,
        body: Rc<AstNode>,
    ) -> Rc<AstNode> {
        self.node(Ast::FunctionDef {
            name: self.var(name),
            args,
            ret_type,
            body,
            cache: None,
            is_inline: false,
        })
    }

    pub fn call(&self, fn_ast: Rc<AstNode>, args: Vec<Rc<AstNode>>) -> Rc<AstNode> {
        self.node(Ast::FunctionCall {
            fn_ast,
            args: args.into_iter().map(ArgAst::positional).collect(),
        })
    }

    pub fn lambda(&self, args: Vec<ArgAst>, body: Rc<AstNode>) -> Rc<AstNode> {
        self.node(Ast::Lambda { args, ret_type: None, body })
    }

    pub fn ret(&self, value: Option<Rc<AstNode>>) -> Rc<AstNode> {
        self.node(Ast::Return { value })
    }

    pub fn enum_def(&self, name: &str, tags: &[&str]) -> Rc<AstNode> {
        self.node(Ast::EnumDef {
            name: name.into(),
            tags: tags
                .iter()
                .map(|tag| TagAst { name: (*tag).to_string(), fields: vec![], secret: false })
                .collect(),
            namespace: None,
        })
    }

    pub fn struct_def(&self, name: &str, fields: Vec<ArgAst>) -> Rc<AstNode> {
        self.node(Ast::StructDef {
            name: name.into(),
            fields,
            namespace: None,
            secret: false,
            external: false,
            opaque: false,
        })
    }

    pub fn when(
        &self,
        subject: Rc<AstNode>,
        clauses: Vec<(Rc<AstNode>, Rc<AstNode>)>,
        else_body: Option<Rc<AstNode>>,
    ) -> Rc<AstNode> {
        self.node(Ast::When {
            subject,
            clauses: clauses
                .into_iter()
                .map(|(pattern, body)| WhenClause { pattern, body })
                .collect(),
            else_body,
        })
    }

    pub fn comprehension(
        &self,
        expr: Rc<AstNode>,
        vars: Vec<Rc<AstNode>>,
        iter: Rc<AstNode>,
        filter: Option<Rc<AstNode>>,
    ) -> Rc<AstNode> {
        self.node(Ast::Comprehension { expr, vars, iter, filter })
    }
}
