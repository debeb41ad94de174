//! Binary operators: metamethod dispatch first, then primitive C operators.

use std::rc::Rc;

use crate::ast::{ArgAst, Ast, AstNode, BinOp};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{get_metamethod_binding, get_namespace_binding, Env};
use crate::typecheck::{can_compile_to_type, get_type, is_valid_call, CallOpts};
use crate::types::{
    is_incomplete_type, is_numeric_type, most_complete_type, non_optional, type_eq, Type,
};

use super::expressions::compile;
use super::optionals::{check_none, optional_into_nonnone};
use super::promotions::compile_to_type;
use super::statements::compile_statement;
use super::types::{compile_declaration, compile_type, compile_type_info, compile_unsigned_type};

/// Dispatch a binary operator to a metamethod when one matches the operand
/// and result types.
fn try_metamethod(
    env: &Env,
    ast: &Rc<AstNode>,
    op: BinOp,
    lhs: &Rc<AstNode>,
    rhs: &Rc<AstNode>,
    overall_t: &Type,
) -> CResult<Option<String>> {
    let binding = match get_metamethod_binding(env, op, lhs, rhs, overall_t)? {
        Some(b) => Some(b),
        None => get_metamethod_binding(env, op, rhs, lhs, overall_t)?,
    };
    let Some(b) = binding else { return Ok(None) };
    let Some(fn_info) = b.ty.fn_info() else { return Ok(None) };
    let args = vec![ArgAst::positional(lhs.clone()), ArgAst::positional(rhs.clone())];
    Ok(Some(format!(
        "{}({})",
        b.code,
        super::functions::compile_arguments(env, ast, &fn_info.args, &args)?
    )))
}

/// A `self.method(other)`-shaped dispatch used by `scaled_by`/`divided_by`
/// fallbacks for mixed-type arithmetic.
fn try_named_method(
    env: &Env,
    ast: &Rc<AstNode>,
    method: &str,
    self_ast: &Rc<AstNode>,
    other: &Rc<AstNode>,
    self_t: &Type,
) -> CResult<Option<String>> {
    let Some(b) = get_namespace_binding(env, self_ast, method)? else { return Ok(None) };
    let Type::Function(fn_info) = &b.ty else { return Ok(None) };
    if !type_eq(&fn_info.ret, self_t) {
        return Ok(None);
    }
    let args = vec![ArgAst::positional(self_ast.clone()), ArgAst::positional(other.clone())];
    if !is_valid_call(env, &fn_info.args, &args, CallOpts::promoting())? {
        return Ok(None);
    }
    Ok(Some(format!(
        "{}({})",
        b.code,
        super::functions::compile_arguments(env, ast, &fn_info.args, &args)?
    )))
}

pub fn compile_binary_op(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Some((op, lhs, rhs)) = ast.ast.binary_operands() else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a binary operation");
    };
    let lhs = &lhs.clone();
    let rhs = &rhs.clone();
    let lhs_t = get_type(env, lhs)?;
    let rhs_t = get_type(env, rhs)?;
    let overall_t = get_type(env, ast)?;

    if let Some(code) = try_metamethod(env, ast, op, lhs, rhs, &overall_t)? {
        return Ok(code);
    }

    // `scalar * T` via `scaled_by`, `T / scalar` via `divided_by`, etc.
    if matches!(op, BinOp::Multiply) && is_numeric_type(&lhs_t) {
        if let Some(code) = try_named_method(env, ast, "scaled_by", rhs, lhs, &rhs_t)? {
            return Ok(code);
        }
    } else if matches!(op, BinOp::Multiply) && is_numeric_type(&rhs_t) {
        if let Some(code) = try_named_method(env, ast, "scaled_by", lhs, rhs, &lhs_t)? {
            return Ok(code);
        }
    } else if matches!(op, BinOp::Divide | BinOp::Mod | BinOp::Mod1) && is_numeric_type(&rhs_t) {
        if let Some(method) = op.method_name() {
            if let Some(code) = try_named_method(env, ast, method, lhs, rhs, &lhs_t)? {
                return Ok(code);
            }
        }
    }

    // `opt or fallback` short-circuiting forms:
    if matches!(op, BinOp::Or) && lhs_t.is_optional() {
        let mut rhs_t = rhs_t.clone();
        if matches!(rhs_t, Type::Abort | Type::Return(_)) {
            return Ok(format!(
                "({{ {decl} = {lhs_code}; if ({check}) {stmt} {unwrapped}; }})",
                decl = compile_declaration(&lhs_t, "lhs"),
                lhs_code = compile(env, lhs)?,
                check = check_none(&lhs_t, "lhs")?,
                stmt = compile_statement(env, rhs)?,
                unwrapped = optional_into_nonnone(&lhs_t, "lhs"),
            ));
        }
        if is_incomplete_type(&rhs_t) {
            let Type::Optional(Some(inner)) = &lhs_t else {
                code_err!(lhs, ErrorKind::IncompleteType,
                    "I can't tell what type this optional value is");
            };
            match most_complete_type(&rhs_t, inner) {
                Some(complete) => rhs_t = complete,
                None => code_err!(rhs, ErrorKind::TypeMismatch,
                    "I don't know how to convert a {rhs_t} to a {inner}"),
            }
        }
        if rhs_t.is_optional() && type_eq(&lhs_t, &rhs_t) {
            return Ok(format!(
                "({{ {decl} = {lhs_code}; {check} ? {rhs_code} : lhs; }})",
                decl = compile_declaration(&lhs_t, "lhs"),
                lhs_code = compile(env, lhs)?,
                check = check_none(&lhs_t, "lhs")?,
                rhs_code = compile(env, rhs)?,
            ));
        }
        if !rhs_t.is_optional() && type_eq(&non_optional(&lhs_t), &rhs_t) {
            return Ok(format!(
                "({{ {decl} = {lhs_code}; {check} ? {rhs_code} : {unwrapped}; }})",
                decl = compile_declaration(&lhs_t, "lhs"),
                lhs_code = compile(env, lhs)?,
                check = check_none(&lhs_t, "lhs")?,
                rhs_code = compile_to_type(env, rhs, &non_optional(&lhs_t))?,
                unwrapped = optional_into_nonnone(&lhs_t, "lhs"),
            ));
        }
        if matches!(rhs_t, Type::Bool) {
            // A non-none LHS short-circuits to true without evaluating it as
            // a value.
            return Ok(format!(
                "((!{}) || {})",
                check_none(&lhs_t, &compile(env, lhs)?)?,
                compile(env, rhs)?
            ));
        }
        code_err!(ast, ErrorKind::TypeMismatch,
            "I don't know how to do an 'or' operation between {lhs_t} and {rhs_t}");
    }

    let lhs_code = compile_to_type(env, lhs, &overall_t)?;
    let rhs_code = compile_to_type(env, rhs, &overall_t)?;
    let numeric_overall =
        matches!(overall_t, Type::Int { .. } | Type::Num { .. } | Type::Byte | Type::BigInt);

    match op {
        BinOp::Power => {
            let Type::Num { bits } = &overall_t else {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "Exponentiation is only supported for Num types, not {overall_t}");
            };
            if *bits == 32 {
                Ok(format!("powf({lhs_code}, {rhs_code})"))
            } else {
                Ok(format!("pow({lhs_code}, {rhs_code})"))
            }
        }
        BinOp::Multiply | BinOp::Divide | BinOp::Plus | BinOp::Mod | BinOp::LeftShift
        | BinOp::RightShift => {
            if !numeric_overall {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "Math operations are only supported for values of the same numeric type, not {lhs_t} and {rhs_t}");
            }
            let c_op = op.operator().unwrap();
            Ok(format!("({lhs_code} {c_op} {rhs_code})"))
        }
        BinOp::Mod1 => {
            if !numeric_overall {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "Math operations are only supported for values of the same numeric type, not {lhs_t} and {rhs_t}");
            }
            Ok(format!("(((({lhs_code})-1) % ({rhs_code})) + 1)"))
        }
        BinOp::Minus => {
            if matches!(overall_t, Type::Set { .. }) {
                return Ok(format!(
                    "Table$without({lhs_code}, {rhs_code}, {})",
                    compile_type_info(&overall_t)
                ));
            }
            if !numeric_overall {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "Math operations are only supported for values of the same numeric type, not {lhs_t} and {rhs_t}");
            }
            Ok(format!("({lhs_code} - {rhs_code})"))
        }
        BinOp::UnsignedLeftShift | BinOp::UnsignedRightShift => {
            if !numeric_overall {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "Math operations are only supported for values of the same numeric type, not {lhs_t} and {rhs_t}");
            }
            let c_op = if matches!(op, BinOp::UnsignedLeftShift) { "<<" } else { ">>" };
            Ok(format!(
                "({})(({}){lhs_code} {c_op} {rhs_code})",
                compile_type(&overall_t),
                compile_unsigned_type(&lhs_t)
            ))
        }
        BinOp::And => match &overall_t {
            Type::Bool => Ok(format!("({lhs_code} && {rhs_code})")),
            Type::Int { .. } | Type::BigInt | Type::Byte => {
                Ok(format!("({lhs_code} & {rhs_code})"))
            }
            Type::Set { .. } => Ok(format!(
                "Table$overlap({lhs_code}, {rhs_code}, {})",
                compile_type_info(&overall_t)
            )),
            _ => code_err!(ast, ErrorKind::TypeMismatch,
                "The 'and' operator isn't supported between {lhs_t} and {rhs_t} values"),
        },
        BinOp::Or => match &overall_t {
            Type::Bool => Ok(format!("({lhs_code} || {rhs_code})")),
            Type::Int { .. } | Type::BigInt | Type::Byte => {
                Ok(format!("({lhs_code} | {rhs_code})"))
            }
            Type::Set { .. } => Ok(format!(
                "Table$with({lhs_code}, {rhs_code}, {})",
                compile_type_info(&overall_t)
            )),
            _ => code_err!(ast, ErrorKind::TypeMismatch,
                "The 'or' operator isn't supported between {lhs_t} and {rhs_t} values"),
        },
        BinOp::Xor => match &overall_t {
            Type::Bool | Type::Int { .. } | Type::BigInt | Type::Byte => {
                Ok(format!("({lhs_code} ^ {rhs_code})"))
            }
            Type::Set { .. } => Ok(format!(
                "Table$xor({lhs_code}, {rhs_code}, {})",
                compile_type_info(&overall_t)
            )),
            _ => code_err!(ast, ErrorKind::TypeMismatch,
                "The 'xor' operator isn't supported between {lhs_t} and {rhs_t} values"),
        },
        BinOp::Concat => {
            if let Type::Text(info) = &overall_t {
                if info.lang == "Path" && info.env.id_suffix.is_empty() {
                    return Ok(format!("Path$concat({lhs_code}, {rhs_code})"));
                }
                return Ok(format!("Text$concat({lhs_code}, {rhs_code})"));
            }
            match &overall_t {
                Type::List { item: Some(item) } => Ok(format!(
                    "List$concat({lhs_code}, {rhs_code}, sizeof({}))",
                    compile_type(item)
                )),
                Type::Set { .. } => Ok(format!(
                    "Table$with({lhs_code}, {rhs_code}, {})",
                    compile_type_info(&overall_t)
                )),
                _ => code_err!(ast, ErrorKind::TypeMismatch,
                    "Concatenation isn't supported between {lhs_t} and {rhs_t} values"),
            }
        }
        BinOp::Compare => Ok(format!(
            "generic_compare(stack({lhs_code}), stack({rhs_code}), {})",
            compile_type_info(&overall_t)
        )),
        _ => code_err!(ast, ErrorKind::InvalidExpression, "Not a valid binary operation"),
    }
}

/// Pick the shared operand type for a comparison: literal ints adapt to the
/// other side, otherwise whichever side can absorb the other.
fn comparison_operand_type(
    env: &Env,
    ast: &Rc<AstNode>,
    lhs: &Rc<AstNode>,
    rhs: &Rc<AstNode>,
) -> CResult<Type> {
    let lhs_t = get_type(env, lhs)?;
    let rhs_t = get_type(env, rhs)?;
    if type_eq(&lhs_t, &rhs_t) {
        return Ok(lhs_t);
    }
    if matches!(lhs.ast, Ast::Int { .. }) && is_numeric_type(&rhs_t) {
        return Ok(rhs_t);
    }
    if matches!(rhs.ast, Ast::Int { .. }) && is_numeric_type(&lhs_t) {
        return Ok(lhs_t);
    }
    if can_compile_to_type(env, rhs, &lhs_t)? {
        return Ok(lhs_t);
    }
    if can_compile_to_type(env, lhs, &rhs_t)? {
        return Ok(rhs_t);
    }
    code_err!(ast, ErrorKind::TypeMismatch, "I can't do comparisons between {lhs_t} and {rhs_t}")
}

pub fn compile_comparison(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Some((op, lhs, rhs)) = ast.ast.binary_operands() else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a comparison");
    };
    let lhs = &lhs.clone();
    let rhs = &rhs.clone();
    let operand_t = comparison_operand_type(env, ast, lhs, rhs)?;
    let lhs_code = compile_to_type(env, lhs, &operand_t)?;
    let rhs_code = compile_to_type(env, rhs, &operand_t)?;

    if matches!(op, BinOp::Compare) {
        return Ok(format!(
            "generic_compare(stack({lhs_code}), stack({rhs_code}), {})",
            compile_type_info(&operand_t)
        ));
    }

    let is_primitive = matches!(
        operand_t,
        Type::Bool | Type::Byte | Type::Int { .. } | Type::Num { .. } | Type::Pointer { .. }
            | Type::Function(_)
    );
    match op {
        BinOp::Equals | BinOp::NotEquals => {
            let negate = if matches!(op, BinOp::NotEquals) { "!" } else { "" };
            match &operand_t {
                Type::BigInt => {
                    Ok(format!("{negate}Int$equal_value({lhs_code}, {rhs_code})"))
                }
                _ if is_primitive => {
                    let c_op = if matches!(op, BinOp::Equals) { "==" } else { "!=" };
                    Ok(format!("({lhs_code} {c_op} {rhs_code})"))
                }
                _ => Ok(format!(
                    "{negate}generic_equal(stack({lhs_code}), stack({rhs_code}), {})",
                    compile_type_info(&operand_t)
                )),
            }
        }
        _ => {
            let c_op = op.operator().unwrap_or("==");
            match &operand_t {
                Type::BigInt => {
                    Ok(format!("(Int$compare_value({lhs_code}, {rhs_code}) {c_op} 0)"))
                }
                _ if is_primitive => Ok(format!("({lhs_code} {c_op} {rhs_code})")),
                _ => Ok(format!(
                    "(generic_compare(stack({lhs_code}), stack({rhs_code}), {}) {c_op} 0)",
                    compile_type_info(&operand_t)
                )),
            }
        }
    }
}

/// The dedicated `_min_`/`_max_` expressions with their optional key.
pub fn compile_min_max(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let (is_min, lhs, rhs, key) = match &ast.ast {
        Ast::Min { lhs, rhs, key } => (true, lhs, rhs, key),
        Ast::Max { lhs, rhs, key } => (false, lhs, rhs, key),
        _ => code_err!(ast, ErrorKind::InvalidExpression, "This is not a min/max expression"),
    };
    let t = get_type(env, ast)?;
    let key_name = if is_min { "_min_" } else { "_max_" };
    let key = match key {
        Some(key) => key.clone(),
        None => AstNode::fake(Ast::Var(key_name.to_string())),
    };

    let expr_env = crate::environment::fresh_scope(env);
    expr_env.set_binding(key_name, t.clone(), "ternary$lhs");
    let lhs_key = compile(&expr_env, &key)?;
    expr_env.set_binding(key_name, t.clone(), "ternary$rhs");
    let rhs_key = compile(&expr_env, &key)?;

    let key_t = get_type(&expr_env, &key)?;
    let cmp = if is_min { "<=" } else { ">=" };
    let comparison = match &key_t {
        Type::BigInt => format!("(Int$compare_value({lhs_key}, {rhs_key}){cmp}0)"),
        Type::Int { .. } | Type::Num { .. } | Type::Bool | Type::Pointer { .. } | Type::Byte => {
            format!("(({lhs_key}){cmp}({rhs_key}))")
        }
        _ => format!(
            "generic_compare(stack({lhs_key}), stack({rhs_key}), {}){cmp}0",
            compile_type_info(&key_t)
        ),
    };
    Ok(format!(
        "({{\n{type_code} ternary$lhs = {lhs_code}, ternary$rhs = {rhs_code};\n{comparison} ? ternary$lhs : ternary$rhs;\n}})",
        type_code = compile_type(&t),
        lhs_code = compile_to_type(env, lhs, &t)?,
        rhs_code = compile_to_type(env, rhs, &t)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{fresh_scope, global_env};

    #[test]
    fn set_algebra_goes_through_the_table_runtime() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        let set_t = Type::set_of(Type::BigInt);
        scope.set_binding("a", set_t.clone(), "_$a");
        scope.set_binding("b", set_t, "_$b");
        let union = AstNode::fake(Ast::BinaryOp {
            op: BinOp::Or,
            lhs: AstNode::fake(Ast::Var("a".into())),
            rhs: AstNode::fake(Ast::Var("b".into())),
        });
        let code = compile_binary_op(&scope, &union).unwrap();
        assert_eq!(code, "Table$with(_$a, _$b, Set$info(&Int$info))");
        let intersection = AstNode::fake(Ast::BinaryOp {
            op: BinOp::And,
            lhs: AstNode::fake(Ast::Var("a".into())),
            rhs: AstNode::fake(Ast::Var("b".into())),
        });
        let code = compile_binary_op(&scope, &intersection).unwrap();
        assert_eq!(code, "Table$overlap(_$a, _$b, Set$info(&Int$info))");
    }

    #[test]
    fn optional_or_falls_back_with_a_none_check() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        scope.set_binding("maybe", Type::optional(Type::BigInt), "_$maybe");
        let fallback = AstNode::fake(Ast::BinaryOp {
            op: BinOp::Or,
            lhs: AstNode::fake(Ast::Var("maybe".into())),
            rhs: AstNode::fake(Ast::Int { text: "5".into() }),
        });
        let code = compile_binary_op(&scope, &fallback).unwrap();
        assert!(code.contains(".small == 0"), "got: {code}");
        assert!(code.contains("I_small(5)"), "got: {code}");
    }

    #[test]
    fn bigint_arithmetic_dispatches_to_metamethods() {
        let env = global_env(false);
        let sum = AstNode::fake(Ast::BinaryOp {
            op: BinOp::Plus,
            lhs: AstNode::fake(Ast::Int { text: "1".into() }),
            rhs: AstNode::fake(Ast::Int { text: "2".into() }),
        });
        let code = compile_binary_op(&env, &sum).unwrap();
        assert_eq!(code, "Int$plus(I_small(1), I_small(2))");
    }

    #[test]
    fn structural_equality_uses_generic_equal() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        let list_t = Type::list_of(Type::BigInt);
        scope.set_binding("a", list_t.clone(), "_$a");
        scope.set_binding("b", list_t, "_$b");
        let eq = AstNode::fake(Ast::BinaryOp {
            op: BinOp::Equals,
            lhs: AstNode::fake(Ast::Var("a".into())),
            rhs: AstNode::fake(Ast::Var("b".into())),
        });
        let code = compile_comparison(&scope, &eq).unwrap();
        assert_eq!(code, "generic_equal(stack(_$a), stack(_$b), List$info(&Int$info))");
    }
}
