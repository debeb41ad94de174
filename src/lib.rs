//! Compiler core for the Tomo programming language.
//!
//! Tomo is a statically typed, ahead-of-time compiled language that emits C
//! source code. This crate contains the three tightly coupled subsystems that
//! make up the compiler core:
//!
//! - the type system and type checker ([`types`], [`typecheck`]),
//! - the compilation environment: bindings, namespaces and scoping
//!   ([`environment`]),
//! - the AST-to-C code generator ([`codegen`]).
//!
//! Lexing and parsing live in an external collaborator: this crate consumes
//! [`ast::AstNode`] trees (optionally deserialized from JSON via serde) and
//! produces textual C translation units. The runtime library the generated
//! code links against is likewise external; the code generator emits calls
//! against its fixed surface (`Text_t`, `List_t`, `generic_equal`, ...).
//!
//! The compiler is single-threaded and fail-fast: every user-facing problem
//! is reported as a [`diagnostics::CompileError`] carrying a source span, and
//! compilation of the current file stops there.

pub mod ast;
pub mod codegen;
pub mod diagnostics;
pub mod environment;
pub mod typecheck;
pub mod types;

pub use ast::{Ast, AstNode, BinOp, SourceFile, TypeAst, TypeAstNode};
pub use diagnostics::{CResult, CompileError, ErrorKind};
pub use environment::{global_env, Binding, Env};
pub use types::Type;
