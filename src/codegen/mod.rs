//! The AST-to-C code generator.
//!
//! Every function here takes a typed AST (plus the compilation environment)
//! and returns C source text; shared declarations accumulate in the
//! environment's per-translation-unit code buffers. The module split keeps
//! one file per kind of construct.

pub mod assertions;
pub mod binops;
pub mod cli;
pub mod conditionals;
pub mod doctests;
pub mod enums;
pub mod expressions;
pub mod fieldaccess;
pub mod files;
pub mod functions;
pub mod indexing;
pub mod integers;
pub mod lists;
pub mod loops;
pub mod optionals;
pub mod pointers;
pub mod promotions;
pub mod reductions;
pub mod sets;
pub mod statements;
pub mod structs;
pub mod tables;
pub mod text;
pub mod types;
pub mod whens;

pub use cli::compile_cli_arg_call;
pub use expressions::{compile, compile_empty, compile_maybe_incref};
pub use files::{compile_file, compile_file_header};
pub use functions::{compile_arguments, compile_function, compile_lambda};
pub use promotions::{compile_to_type, promote};
pub use statements::{compile_lvalue, compile_statement, with_source_info};
pub use types::{compile_declaration, compile_type, compile_type_info};
