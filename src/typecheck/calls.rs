//! Call validation: matching call arguments (keyword and positional) against
//! a function's argument specification, plus the small predicates the
//! checker and generator share (`is_constant`, `can_be_mutated`, ...).

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{ArgAst, Ast, AstNode, BinOp};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::Env;
use crate::types::{
    self, can_promote, is_incomplete_type, is_numeric_type, most_complete_type, non_optional,
    type_eq, value_type, Arg, Type,
};

use super::{get_type, parse_type_ast};

/// Options for call validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOpts {
    /// Allow type promotion when matching argument types (a second, more
    /// permissive pass after exact matching fails).
    pub promotion: bool,
    /// Allow supplying underscore-prefixed (private) arguments.
    pub underscores: bool,
}

impl CallOpts {
    pub fn exact() -> Self {
        CallOpts { promotion: false, underscores: false }
    }

    pub fn promoting() -> Self {
        CallOpts { promotion: true, underscores: false }
    }
}

/// The type of a call/definition argument: its annotation if present,
/// otherwise the type of its value.
pub fn get_arg_ast_type(env: &Env, arg: &ArgAst) -> CResult<Type> {
    if let Some(type_ast) = &arg.type_ast {
        return parse_type_ast(env, type_ast);
    }
    match &arg.value {
        Some(value) => get_type(env, value),
        None => Err(crate::diagnostics::CompileError::new(
            ErrorKind::MissingValue,
            "This argument has neither a type nor a value",
        )),
    }
}

/// The type of a specification argument: its declared type, or the type of
/// its default value.
pub fn get_arg_type(env: &Env, arg: &Arg) -> CResult<Type> {
    if let Some(ty) = &arg.ty {
        return Ok(ty.clone());
    }
    match &arg.default_val {
        Some(default) => get_type(env, default),
        None => Err(crate::diagnostics::CompileError::new(
            ErrorKind::MissingValue,
            format!("The argument '{}' has neither a type nor a default value", arg.name),
        )),
    }
}

fn arg_type_matches(
    env: &Env,
    call_arg: &ArgAst,
    spec_type: &Type,
    promotion: bool,
) -> CResult<bool> {
    let call_type = get_arg_ast_type(env, call_arg)?;
    let complete_call_type = if is_incomplete_type(&call_type) {
        match most_complete_type(&call_type, spec_type) {
            Some(t) => t,
            None => return Ok(false),
        }
    } else {
        call_type
    };
    if type_eq(&complete_call_type, spec_type) {
        return Ok(true);
    }
    if !promotion {
        return Ok(false);
    }
    if can_promote(&complete_call_type, spec_type) {
        return Ok(true);
    }
    let value = call_arg.value.as_ref();
    // Numeric literals coerce to any numeric argument type.
    if let Some(value) = value {
        if matches!(value.ast, Ast::Int { .. }) && is_numeric_type(spec_type) {
            return Ok(true);
        }
        if matches!(value.ast, Ast::Num { .. }) && matches!(spec_type, Type::Num { .. }) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether `call_args` is a valid way to call a function with `spec_args`:
/// keyword arguments fill their named slots, positional arguments fill the
/// remainder in order, anything left over must have a default, and nothing
/// may remain unconsumed.
pub fn is_valid_call(
    env: &Env,
    spec_args: &[Arg],
    call_args: &[ArgAst],
    opts: CallOpts,
) -> CResult<bool> {
    let mut used_keywords: HashSet<&str> = HashSet::new();
    // Keyword arguments first:
    for call_arg in call_args {
        let Some(name) = &call_arg.name else { continue };
        let Some(spec_arg) = spec_args.iter().find(|s| s.name == *name) else {
            return Ok(false);
        };
        if spec_arg.name.starts_with('_') && !opts.underscores {
            return Ok(false);
        }
        let spec_type = get_arg_type(env, spec_arg)?;
        if !arg_type_matches(env, call_arg, &spec_type, opts.promotion)? {
            return Ok(false);
        }
        used_keywords.insert(name.as_str());
    }

    // Then positional arguments fill the remaining spec slots in order:
    let mut positional = call_args.iter().filter(|a| a.name.is_none());
    let mut pending: Option<&ArgAst> = positional.next();
    for spec_arg in spec_args {
        if used_keywords.contains(spec_arg.name.as_str()) {
            continue;
        }
        if spec_arg.name.starts_with('_') && !opts.underscores {
            if spec_arg.default_val.is_none() {
                return Ok(false);
            }
            continue;
        }
        if let Some(call_arg) = pending {
            let spec_type = get_arg_type(env, spec_arg)?;
            if arg_type_matches(env, call_arg, &spec_type, opts.promotion)? {
                pending = positional.next();
                continue;
            }
            return Ok(false);
        }
        if spec_arg.default_val.is_none() {
            return Ok(false);
        }
    }

    // Extra positional arguments are an error:
    Ok(pending.is_none())
}

/// Whether this expression can appear on the left of an assignment (or have
/// its address taken for mutation).
pub fn can_be_mutated(env: &Env, ast: &Rc<AstNode>) -> CResult<bool> {
    match &ast.ast {
        Ast::Var(_) | Ast::InlineCCode { .. } | Ast::LiteralCode { .. } => Ok(true),
        Ast::FieldAccess { fielded, .. } => {
            let fielded_type = get_type(env, fielded)?;
            match &fielded_type {
                Type::Pointer { .. } => {
                    Ok(matches!(value_type(&fielded_type), Type::Struct(_)))
                }
                Type::Struct(_) => can_be_mutated(env, fielded),
                _ => Ok(false),
            }
        }
        Ast::Index { indexed, .. } => {
            Ok(matches!(get_type(env, indexed)?, Type::Pointer { .. }))
        }
        _ => Ok(false),
    }
}

/// Whether this expression can be evaluated at C compile time, making it
/// usable as a static initializer.
pub fn is_constant(env: &Env, ast: &Rc<AstNode>) -> CResult<bool> {
    match &ast.ast {
        Ast::Bool(_) | Ast::Num { .. } | Ast::None => Ok(true),
        Ast::Int { text } => {
            let Some(value) = crate::codegen::integers::parse_int_literal(text) else {
                return Ok(false);
            };
            Ok(value.unsigned_abs() <= crate::codegen::integers::BIGGEST_SMALL_INT)
        }
        Ast::TextLiteral { text } => Ok(text.is_ascii()),
        Ast::TextJoin { children, .. } => match children.as_slice() {
            [] => Ok(true),
            [only] => is_constant(env, only),
            _ => Ok(false),
        },
        Ast::Not { value } | Ast::Negative { value } => is_constant(env, value),
        Ast::BinaryOp { op, lhs, rhs } => match op {
            BinOp::Power | BinOp::Concat | BinOp::Min | BinOp::Max | BinOp::Compare => Ok(false),
            _ => Ok(is_constant(env, lhs)? && is_constant(env, rhs)?),
        },
        Ast::Use { .. } | Ast::InlineCCode { .. } | Ast::LiteralCode { .. } => Ok(true),
        _ => Ok(false),
    }
}

/// Whether a statement's value may be silently discarded.
pub fn is_discardable(env: &Env, ast: &Rc<AstNode>) -> CResult<bool> {
    match &ast.ast {
        Ast::UpdateAssign { .. }
        | Ast::Assign { .. }
        | Ast::Declare { .. }
        | Ast::FunctionDef { .. }
        | Ast::ConvertDef { .. }
        | Ast::StructDef { .. }
        | Ast::EnumDef { .. }
        | Ast::LangDef { .. }
        | Ast::Use { .. }
        | Ast::Extend { .. } => Ok(true),
        _ => {
            let t = get_type(env, ast)?;
            Ok(t.is_void_like())
        }
    }
}

/// The result type of a math operation between two types, following the
/// precision lattice.
pub fn get_math_type(env: &Env, ast: &Rc<AstNode>, lhs_t: &Type, rhs_t: &Type) -> CResult<Type> {
    let _ = env;
    match types::compare_precision(lhs_t, rhs_t) {
        types::Precision::Equal | types::Precision::More => Ok(lhs_t.clone()),
        types::Precision::Less => Ok(rhs_t.clone()),
        types::Precision::Incomparable => {
            code_err!(
                ast,
                ErrorKind::TypeMismatch,
                "Math operations between {lhs_t} and {rhs_t} are not supported"
            )
        }
    }
}

/// Whether `ast` can be compiled as a value of type `needed`, including
/// structural matches through collection literals and allocations.
pub fn can_compile_to_type(env: &Env, ast: &Rc<AstNode>, needed: &Type) -> CResult<bool> {
    if is_incomplete_type(needed) {
        return Ok(false);
    }
    if needed.is_optional() && matches!(ast.ast, Ast::None) {
        return Ok(true);
    }
    let needed = non_optional(needed);
    match (&needed, &ast.ast) {
        (Type::List { item: Some(item_type) }, Ast::List { items }) => {
            for item in items {
                if !can_compile_to_type(env, item, item_type)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Type::Set { item: Some(item_type) }, Ast::Set { items }) => {
            for item in items {
                if !can_compile_to_type(env, item, item_type)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Type::Table(info), Ast::Table { entries, .. }) => {
            let (Some(key_type), Some(value_type)) = (&info.key, &info.value) else {
                return Ok(false);
            };
            for entry in entries {
                let Ast::TableEntry { key, value } = &entry.ast else { continue };
                if !can_compile_to_type(env, key, key_type)?
                    || !can_compile_to_type(env, value, value_type)?
                {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Type::Pointer { pointed, is_stack }, Ast::HeapAllocate { value }) => {
            Ok(!is_stack && can_compile_to_type(env, value, pointed)?)
        }
        (Type::Pointer { pointed, is_stack }, Ast::StackReference { value }) => {
            Ok(*is_stack && can_compile_to_type(env, value, pointed)?)
        }
        _ => {
            let actual = get_type(env, ast)?;
            Ok(can_promote(&actual, &needed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::global_env;

    fn int_arg(name: &str) -> Arg {
        Arg::new(name, Type::BigInt)
    }

    fn int_literal(text: &str) -> Rc<AstNode> {
        AstNode::fake(Ast::Int { text: text.into() })
    }

    #[test]
    fn positional_and_keyword_args_fill_slots() {
        let env = global_env(false);
        let spec = vec![int_arg("x"), int_arg("y")];
        let ok = vec![
            ArgAst::positional(int_literal("1")),
            ArgAst::named("y", int_literal("2")),
        ];
        assert!(is_valid_call(&env, &spec, &ok, CallOpts::promoting()).unwrap());

        let missing = vec![ArgAst::positional(int_literal("1"))];
        assert!(!is_valid_call(&env, &spec, &missing, CallOpts::promoting()).unwrap());

        let extra = vec![
            ArgAst::positional(int_literal("1")),
            ArgAst::positional(int_literal("2")),
            ArgAst::positional(int_literal("3")),
        ];
        assert!(!is_valid_call(&env, &spec, &extra, CallOpts::promoting()).unwrap());

        let misnamed = vec![
            ArgAst::positional(int_literal("1")),
            ArgAst::named("z", int_literal("2")),
        ];
        assert!(!is_valid_call(&env, &spec, &misnamed, CallOpts::promoting()).unwrap());
    }

    #[test]
    fn defaults_fill_unsupplied_slots() {
        let env = global_env(false);
        let spec = vec![
            int_arg("x"),
            Arg::with_default("y", Type::BigInt, int_literal("0")),
        ];
        let args = vec![ArgAst::positional(int_literal("1"))];
        assert!(is_valid_call(&env, &spec, &args, CallOpts::promoting()).unwrap());
    }

    #[test]
    fn private_args_are_gated() {
        let env = global_env(false);
        let spec = vec![Arg::new("_secret", Type::BigInt)];
        let args = vec![ArgAst::named("_secret", int_literal("1"))];
        assert!(!is_valid_call(&env, &spec, &args, CallOpts::promoting()).unwrap());
        assert!(is_valid_call(
            &env,
            &spec,
            &args,
            CallOpts { promotion: true, underscores: true }
        )
        .unwrap());
    }

    #[test]
    fn promotion_pass_is_separate() {
        let env = global_env(false);
        let spec = vec![Arg::new("x", Type::optional(Type::BigInt))];
        let var = AstNode::fake(Ast::Bool(true));
        let args = vec![ArgAst::positional(var)];
        assert!(!is_valid_call(&env, &spec, &args, CallOpts::exact()).unwrap());
    }
}
