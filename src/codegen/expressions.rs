//! The expression compiler: dispatches every expression-bearing AST node to
//! its emitter.

use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{get_namespace_binding, naming, Env};
use crate::typecheck::{can_be_mutated, can_compile_to_type, get_arg_type, get_type};
use crate::types::Type;

use super::binops::{compile_binary_op, compile_comparison, compile_min_max};
use super::functions::compile_arguments;
use super::integers::{compile_int, hex_double};
use super::optionals::{check_none, compile_none};
use super::text::compile_text_literal;

/// Compile an expression, inserting a copy-on-write reference count when the
/// value is a mutable collection being handed to a new owner.
pub fn compile_maybe_incref(env: &Env, ast: &Rc<AstNode>, t: &Type) -> CResult<String> {
    if crate::ast::is_idempotent(ast) && can_be_mutated(env, ast)? {
        if matches!(t, Type::List { .. }) {
            return Ok(format!("LIST_COPY({})", super::promotions::compile_to_type(env, ast, t)?));
        }
        if matches!(t, Type::Table(_) | Type::Set { .. }) {
            return Ok(format!("TABLE_COPY({})", super::promotions::compile_to_type(env, ast, t)?));
        }
    }
    super::promotions::compile_to_type(env, ast, t)
}

/// The default (zero) value for a type, or an empty string when the type
/// can't be default-initialized.
pub fn compile_empty(t: &Type) -> CResult<String> {
    if t.is_optional() {
        return compile_none(t);
    }
    Ok(match t {
        Type::BigInt => "I(0)".into(),
        Type::Int { bits } => format!("I{bits}(0)"),
        Type::Byte => "((Byte_t)0)".into(),
        Type::Bool => "((Bool_t)no)".into(),
        Type::List { .. } => "((List_t){})".into(),
        Type::Table(_) | Type::Set { .. } => "((Table_t){})".into(),
        Type::Text(info) => {
            if info.lang == "Path" && info.env.id_suffix.is_empty() {
                "NONE_PATH".into()
            } else {
                "Text(\"\")".into()
            }
        }
        Type::CString => "\"\"".into(),
        Type::Pointer { pointed, is_stack } => {
            let empty_pointed = compile_empty(pointed)?;
            if empty_pointed.is_empty() {
                String::new()
            } else if *is_stack {
                format!("stack({empty_pointed})")
            } else {
                format!("heap({empty_pointed})")
            }
        }
        Type::Num { bits: 32 } => "N32(0.0f)".into(),
        Type::Num { .. } => "N64(0.0)".into(),
        Type::Struct(_) => super::structs::compile_empty_struct(t)?,
        Type::Enum(_) => super::enums::compile_empty_enum(t)?,
        _ => String::new(),
    })
}

/// Compile an expression-position AST node to a C expression.
pub fn compile(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    match &ast.ast {
        Ast::None => {
            code_err!(ast, ErrorKind::IncompleteType,
                "I can't figure out what this `none`'s type is!")
        }
        Ast::Bool(b) => Ok(if *b { "yes".into() } else { "no".into() }),
        Ast::Var(name) => match env.get_binding(name) {
            Some(b) => {
                if b.code.is_empty() {
                    Ok(naming::user_id(name))
                } else {
                    Ok(b.code)
                }
            }
            None => code_err!(ast, ErrorKind::UnknownName,
                "I don't know of any variable by this name"),
        },
        Ast::Int { .. } => compile_int(ast),
        Ast::Num { n } => Ok(hex_double(*n)),
        Ast::Not { value } => {
            let t = get_type(env, value)?;
            if let Some(b) = get_namespace_binding(env, value, "negated")? {
                if let Type::Function(fn_info) = &b.ty {
                    if let Some(first) = fn_info.args.first() {
                        let arg_t = get_arg_type(env, first)?;
                        if can_compile_to_type(env, value, &arg_t)? {
                            let args = vec![crate::ast::ArgAst::positional(value.clone())];
                            return Ok(format!(
                                "{}({})",
                                b.code,
                                compile_arguments(env, ast, &fn_info.args, &args)?
                            ));
                        }
                    }
                }
            }
            match &t {
                Type::Bool => Ok(format!("!({})", compile(env, value)?)),
                Type::Int { .. } | Type::Byte => Ok(format!("~({})", compile(env, value)?)),
                Type::List { .. } => Ok(format!("(({}).length == 0)", compile(env, value)?)),
                Type::Set { .. } | Type::Table(_) => {
                    Ok(format!("(({}).entries.length == 0)", compile(env, value)?))
                }
                Type::Text(_) => Ok(format!("(({}).length == 0)", compile(env, value)?)),
                Type::Optional(_) => check_none(&t, &compile(env, value)?),
                _ => code_err!(ast, ErrorKind::TypeMismatch,
                    "I don't know how to negate values of type {t}"),
            }
        }
        Ast::Negative { value } => {
            let t = get_type(env, value)?;
            if let Some(b) = get_namespace_binding(env, value, "negative")? {
                if let Type::Function(fn_info) = &b.ty {
                    if let Some(first) = fn_info.args.first() {
                        let arg_t = get_arg_type(env, first)?;
                        if can_compile_to_type(env, value, &arg_t)? {
                            let args = vec![crate::ast::ArgAst::positional(value.clone())];
                            return Ok(format!(
                                "{}({})",
                                b.code,
                                compile_arguments(env, ast, &fn_info.args, &args)?
                            ));
                        }
                    }
                }
            }
            if matches!(t, Type::Int { .. } | Type::Num { .. }) {
                return Ok(format!("-({})", compile(env, value)?));
            }
            code_err!(ast, ErrorKind::TypeMismatch,
                "I don't know how to get the negative value of type {t}")
        }
        Ast::HeapAllocate { .. } | Ast::StackReference { .. } => {
            let t = get_type(env, ast)?;
            super::pointers::compile_typed_allocation(env, ast, &t)
        }
        Ast::Optional { .. } => super::optionals::compile_optional(env, ast),
        Ast::NonOptional { .. } => super::optionals::compile_non_optional(env, ast),
        Ast::BinaryOp { op, .. } => {
            if op.is_comparison() || matches!(op, crate::ast::BinOp::Compare) {
                compile_comparison(env, ast)
            } else {
                compile_binary_op(env, ast)
            }
        }
        Ast::TextLiteral { .. } | Ast::TextJoin { .. } => super::text::compile_text_ast(env, ast),
        Ast::PathLiteral { path } => Ok(format!("Path({})", compile_text_literal(path))),
        Ast::Block { statements } => {
            if let [only] = statements.as_slice() {
                return compile(env, only);
            }
            compile_block_expression(env, ast)
        }
        Ast::Min { .. } | Ast::Max { .. } => compile_min_max(env, ast),
        Ast::List { items } => {
            if items.is_empty() {
                return Ok("(List_t){.length=0}".into());
            }
            let list_type = get_type(env, ast)?;
            super::lists::compile_typed_list(env, ast, &list_type)
        }
        Ast::Table { entries, fallback, .. } => {
            if entries.is_empty() {
                let mut code = "((Table_t){".to_string();
                if let Some(fallback) = fallback {
                    code.push_str(&format!(".fallback=heap({})", compile(env, fallback)?));
                }
                code.push_str("})");
                return Ok(code);
            }
            let table_type = get_type(env, ast)?;
            super::tables::compile_typed_table(env, ast, &table_type)
        }
        Ast::Set { items } => {
            if items.is_empty() {
                return Ok("((Table_t){})".into());
            }
            let set_type = get_type(env, ast)?;
            super::sets::compile_typed_set(env, ast, &set_type)
        }
        Ast::Comprehension { expr, .. } => {
            // An expression-position comprehension builds a fresh collection:
            let mut base: &Rc<AstNode> = expr;
            while let Ast::Comprehension { expr, .. } = &base.ast {
                base = expr;
            }
            if matches!(base.ast, Ast::TableEntry { .. }) {
                compile(
                    env,
                    &ast.wrap(Ast::Table {
                        default_value: None,
                        fallback: None,
                        entries: vec![ast.clone()],
                    }),
                )
            } else {
                compile(env, &ast.wrap(Ast::List { items: vec![ast.clone()] }))
            }
        }
        Ast::Lambda { .. } => super::functions::compile_lambda(env, ast),
        Ast::MethodCall { .. } => super::functions::compile_method_call(env, ast),
        Ast::FunctionCall { .. } => super::functions::compile_function_call(env, ast),
        Ast::Deserialize { type_ast, value } => {
            let value_t = get_type(env, value)?;
            if !crate::types::type_eq(&value_t, &Type::list_of(Type::Byte)) {
                code_err!(value, ErrorKind::TypeMismatch,
                    "This value should be a list of bytes, not a {value_t}");
            }
            let t = crate::typecheck::parse_type_ast(env, type_ast)?;
            Ok(format!(
                "({{ {};\ngeneric_deserialize({}, &deserialized, {});\ndeserialized; }})",
                super::types::compile_declaration(&t, "deserialized"),
                compile(env, value)?,
                super::types::compile_type_info(&t)
            ))
        }
        Ast::ExplicitlyTyped { ast: inner, ty } => {
            super::promotions::compile_to_type(env, inner, ty)
        }
        Ast::When { .. } => super::whens::compile_when_expression(env, ast),
        Ast::If { .. } => super::conditionals::compile_if_expression(env, ast),
        Ast::Reduction { .. } => super::reductions::compile_reduction(env, ast),
        Ast::FieldAccess { .. } => super::fieldaccess::compile_field_access(env, ast),
        Ast::Index { .. } => super::indexing::compile_indexing(env, ast, false),
        Ast::InlineCCode { type_ast, .. } => {
            let t = get_type(env, ast)?;
            if type_ast.is_some() {
                Ok(format!("({{{}; }})", super::statements::compile_statement(env, ast)?))
            } else if matches!(t, Type::Void) {
                Ok(format!("{{\n{}\n}}", super::statements::compile_statement(env, ast)?))
            } else {
                super::statements::compile_statement(env, ast)
            }
        }
        Ast::LiteralCode { code, .. } => Ok(code.clone()),
        Ast::Use { .. } => code_err!(ast, ErrorKind::InvalidExpression,
            "Compiling 'use' as expression!"),
        Ast::Defer { .. } => code_err!(ast, ErrorKind::InvalidExpression,
            "Compiling 'defer' as expression!"),
        Ast::Extern { .. } => code_err!(ast, ErrorKind::InvalidExpression,
            "Externs are not supported as expressions"),
        Ast::TableEntry { .. } => code_err!(ast, ErrorKind::InvalidExpression,
            "Table entries should not be compiled directly"),
        Ast::UpdateAssign { .. }
        | Ast::Declare { .. }
        | Ast::Assign { .. }
        | Ast::For { .. }
        | Ast::While { .. }
        | Ast::Repeat { .. }
        | Ast::StructDef { .. }
        | Ast::LangDef { .. }
        | Ast::Extend { .. }
        | Ast::EnumDef { .. }
        | Ast::FunctionDef { .. }
        | Ast::ConvertDef { .. }
        | Ast::Skip { .. }
        | Ast::Stop { .. }
        | Ast::Pass
        | Ast::Return { .. }
        | Ast::DocTest { .. }
        | Ast::Assert { .. } => {
            code_err!(ast, ErrorKind::InvalidExpression, "This is not a valid expression")
        }
        Ast::Unknown => code_err!(ast, ErrorKind::InvalidExpression, "Unknown AST node"),
    }
}

/// A multi-statement block in expression position compiles to a GCC
/// statement expression ending in the block's value.
pub fn compile_block_expression(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Block { statements } = &ast.ast else {
        return compile(env, ast);
    };
    let scope = crate::environment::fresh_scope(env);
    let mut code = "({\n".to_string();
    for stmt in statements {
        crate::typecheck::prebind_statement(&scope, stmt)?;
    }
    for (i, stmt) in statements.iter().enumerate() {
        if i + 1 < statements.len() {
            code.push_str(&super::statements::compile_statement(&scope, stmt)?);
            code.push('\n');
        } else {
            code.push_str(&compile(&scope, stmt)?);
            code.push_str(";\n");
        }
        crate::typecheck::bind_statement(&scope, stmt)?;
    }
    code.push_str("})");
    Ok(code)
}
