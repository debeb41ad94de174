//! Pointers, allocation, and pointer-depth adjustment.

use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::Env;
use crate::typecheck::{can_be_mutated, get_type};
use crate::types::{type_eq, Type};

use super::expressions::compile;
use super::promotions::compile_to_type;

/// Compile an expression, then adjust its pointer depth to `target_depth`
/// by taking addresses (only of variables) or dereferencing. When
/// `needs_incref` is set and the result is a mutable collection, a
/// copy-on-write reference count is added.
pub fn compile_to_pointer_depth(
    env: &Env,
    ast: &Rc<AstNode>,
    target_depth: i64,
    mut needs_incref: bool,
) -> CResult<String> {
    let mut val = compile(env, ast)?;
    let mut t = get_type(env, ast)?;
    let mut depth = 0i64;
    {
        let mut cursor = &t;
        while let Type::Pointer { pointed, .. } = cursor {
            depth += 1;
            cursor = pointed;
        }
    }

    // Ephemeral values (e.g. `[10, 20].reversed()`) can't be mutated through,
    // so they don't need an incref.
    if !matches!(t, Type::Pointer { .. }) && needs_incref && !can_be_mutated(env, ast)? {
        needs_incref = false;
    }

    while depth != target_depth {
        if depth < target_depth {
            if ast.ast.var_name().is_some() && target_depth == 1 {
                val = format!("(&{val})");
            } else {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "This should be a pointer, not {t}");
            }
            t = Type::pointer_to(t, true);
            depth += 1;
        } else {
            let Type::Pointer { pointed, .. } = t else { unreachable!() };
            val = format!("*({val})");
            t = *pointed;
            depth -= 1;
        }
    }
    while let Type::Pointer { pointed, .. } = t {
        t = *pointed;
    }

    if needs_incref && matches!(t, Type::List { .. }) {
        val = format!("LIST_COPY({val})");
    } else if needs_incref && matches!(t, Type::Table(_) | Type::Set { .. }) {
        val = format!("TABLE_COPY({val})");
    }
    Ok(val)
}

/// Compile `@value` / `&value` at a known pointer type.
pub fn compile_typed_allocation(env: &Env, ast: &Rc<AstNode>, pointer_type: &Type) -> CResult<String> {
    let Type::Pointer { pointed, .. } = pointer_type else {
        code_err!(ast, ErrorKind::TypeMismatch, "This is not a pointer type");
    };
    match &ast.ast {
        Ast::HeapAllocate { value } => {
            Ok(format!("heap({})", compile_to_type(env, value, pointed)?))
        }
        Ast::StackReference { value } => {
            if can_be_mutated(env, value)? && type_eq(pointed, &get_type(env, value)?) {
                Ok(format!("(&{})", super::statements::compile_lvalue(env, value)?))
            } else {
                Ok(format!("stack({})", compile_to_type(env, value, pointed)?))
            }
        }
        _ => code_err!(ast, ErrorKind::InvalidExpression, "Not an allocation"),
    }
}
