//! Type-directed coercion at expression boundaries.
//!
//! `promote` rewrites an already-compiled expression from its actual type to
//! a needed type; `compile_to_type` compiles an AST directly at a target
//! type, handling the literal special cases that bypass promotion.

use std::rc::Rc;

use crate::ast::{ArgAst, Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{get_constructor, with_enum_scope, Env};
use crate::typecheck::{can_be_mutated, get_type};
use crate::types::{
    can_promote, enum_single_value_tag, is_incomplete_type, is_numeric_type, most_complete_type,
    non_optional, type_eq, value_type, Type,
};

use super::expressions::compile;
use super::integers::{compile_int_to_type, hex_double};
use super::optionals::{check_none, compile_none, promote_to_optional};
use super::types::{compile_declaration, compile_type, compile_type_info};

fn byte_list() -> Type {
    Type::list_of(Type::Byte)
}

/// Try to coerce `code` (an expression of type `actual`) into type `needed`,
/// rewriting `code` in place. Returns whether the promotion succeeded.
pub fn promote(
    env: &Env,
    ast: &Rc<AstNode>,
    code: &mut String,
    actual: &Type,
    needed: &Type,
) -> CResult<bool> {
    if type_eq(actual, needed) {
        return Ok(true);
    }
    if !can_promote(actual, needed) {
        return Ok(false);
    }

    // Function -> Closure wrapping:
    if matches!(needed, Type::Closure(_)) && matches!(actual, Type::Function(_)) {
        *code = format!("((Closure_t){{{code}, NULL}})");
        return Ok(true);
    }

    // Empty promotion (one side merely completes the other):
    if most_complete_type(actual, needed).is_some() {
        return Ok(true);
    }

    // Serialization / deserialization through [Byte]:
    let bytes = byte_list();
    if !type_eq(&non_optional(&value_type(needed)), &bytes)
        || !type_eq(&non_optional(&value_type(actual)), &bytes)
    {
        if type_eq(needed, &bytes) {
            *code = format!(
                "generic_serialize(({}[1]){{{code}}}, {})",
                compile_type(actual),
                compile_type_info(actual)
            );
            return Ok(true);
        }
        if type_eq(actual, &bytes) {
            *code = format!(
                "({{ {};\ngeneric_deserialize({code}, &deserialized, {});\ndeserialized; }})",
                compile_declaration(needed, "deserialized"),
                compile_type_info(needed)
            );
            return Ok(true);
        }
    }

    // Non-optional -> optional:
    if let Type::Optional(inner) = needed {
        if inner.as_deref().map(|inner| type_eq(actual, inner)).unwrap_or(false) {
            *code = promote_to_optional(actual, code);
            return Ok(true);
        }
    }

    // Optional -> Bool check:
    if actual.is_optional() && matches!(needed, Type::Bool) {
        *code = format!("(!{})", check_none(actual, code)?);
        return Ok(true);
    }

    // Lang-tagged text -> plain text (same representation):
    if let (Type::Text(_), Type::Text(needed_info)) = (actual, needed) {
        if needed_info.lang == "Text" {
            return Ok(true);
        }
    }

    // Numeric promotion through a registered conversion constructor:
    if (is_numeric_type(actual) || matches!(actual, Type::Bool))
        && (is_numeric_type(needed) || matches!(needed, Type::Bool))
    {
        let args = vec![ArgAst::positional(AstNode::literal_code(code.clone(), actual.clone()))];
        let allow_underscores = env
            .current_type
            .as_ref()
            .map(|cur| type_eq(cur, &value_type(needed)))
            .unwrap_or(false);
        if let Some(constructor) = get_constructor(env, needed, &args, allow_underscores)? {
            let Some(fn_info) = constructor.ty.fn_info() else { unreachable!() };
            if fn_info.args.len() == 1 || fn_info.args.iter().skip(1).all(|a| a.default_val.is_some())
            {
                *code = format!(
                    "{}({})",
                    constructor.code,
                    super::functions::compile_arguments(env, ast, &fn_info.args, &args)?
                );
                return Ok(true);
            }
        }
    }

    // Single-value enum construction:
    if let Type::Enum(info) = needed {
        if let Some(tag) = enum_single_value_tag(needed, actual) {
            let b = info.borrow().env.get_binding(&tag);
            if let Some(b) = b {
                if let Some(fn_info) = b.ty.fn_info() {
                    let field_t = fn_info.args[0].ty.clone().unwrap_or(Type::Void);
                    if !promote(env, ast, code, actual, &field_t)? {
                        return Ok(false);
                    }
                    *code = format!("{}({code})", b.code);
                    return Ok(true);
                }
            }
        }
    }

    // Text -> C string:
    if matches!(actual, Type::Text(_)) && matches!(needed, Type::CString) {
        *code = format!("Text$as_c_string({code})");
        return Ok(true);
    }

    // Automatic dereferencing:
    if let Type::Pointer { pointed, .. } = actual {
        if !matches!(needed, Type::Pointer { .. }) && can_promote(pointed, needed) {
            *code = format!("*({code})");
            return promote(env, ast, code, pointed, needed);
        }
    }

    // Pointer compatibility (heap pointers pass as stack refs, `@Memory`
    // erasure) and tables with/without defaults share representations:
    if matches!(actual, Type::Pointer { .. }) && matches!(needed, Type::Pointer { .. }) {
        return Ok(true);
    }
    if matches!(actual, Type::Table(_)) && matches!(needed, Type::Table(_)) {
        return Ok(true);
    }
    if matches!(actual, Type::Closure(_)) && matches!(needed, Type::Closure(_)) {
        return Ok(true);
    }

    Ok(false)
}

/// Whether an operand can be compiled directly at a numeric target type,
/// counting the numeric-literal exceptions.
fn operand_fits(env: &Env, ast: &Rc<AstNode>, target: &Type) -> CResult<bool> {
    if matches!(ast.ast, Ast::Int { .. }) {
        return Ok(true);
    }
    if matches!(ast.ast, Ast::Num { .. }) && matches!(target, Type::Num { .. }) {
        return Ok(true);
    }
    crate::typecheck::can_compile_to_type(env, ast, target)
}

/// Compile `ast` as a value of type `t`, or fail with a type mismatch.
pub fn compile_to_type(env: &Env, ast: &Rc<AstNode>, t: &Type) -> CResult<String> {
    if is_incomplete_type(t) {
        code_err!(ast, ErrorKind::IncompleteType, "The target type {t} is incomplete");
    }

    let scoped;
    let env = if matches!(t, Type::Enum(_)) {
        scoped = with_enum_scope(env, t);
        &scoped
    } else {
        env
    };

    // A single-statement block is transparent:
    let mut ast = ast;
    if let Ast::Block { statements } = &ast.ast {
        if let [only] = statements.as_slice() {
            ast = only;
        }
    }

    // Numeric literals compile directly at the target width:
    if matches!(ast.ast, Ast::Int { .. }) && is_numeric_type(&non_optional(t)) {
        let code = compile_int_to_type(env, ast, t)?;
        return if t.is_optional() {
            Ok(promote_to_optional(&non_optional(t), &code))
        } else {
            Ok(code)
        };
    }
    if let (Ast::Num { n }, Type::Num { bits }) = (&ast.ast, &non_optional(t)) {
        let code = if *bits == 32 {
            format!("{}f", hex_double(*n))
        } else {
            hex_double(*n)
        };
        return if t.is_optional() {
            Ok(promote_to_optional(&non_optional(t), &code))
        } else {
            Ok(code)
        };
    }
    if matches!(ast.ast, Ast::None) {
        let Type::Optional(inner) = t else {
            code_err!(ast, ErrorKind::TypeMismatch, "This is not supposed to be an optional type");
        };
        if inner.is_none() {
            code_err!(ast, ErrorKind::IncompleteType,
                "I don't know what kind of `none` this is supposed to be!\nPlease tell me by declaring a variable like `foo : Type = none`");
        }
        return compile_none(t);
    }
    if matches!(t, Type::Pointer { .. })
        && matches!(ast.ast, Ast::HeapAllocate { .. } | Ast::StackReference { .. })
    {
        return super::pointers::compile_typed_allocation(env, ast, t);
    }
    if matches!(t, Type::List { .. }) && matches!(ast.ast, Ast::List { .. }) {
        return super::lists::compile_typed_list(env, ast, t);
    }
    if matches!(t, Type::Set { .. }) && matches!(ast.ast, Ast::Set { .. }) {
        return super::sets::compile_typed_set(env, ast, t);
    }
    if matches!(t, Type::Table(_)) && matches!(ast.ast, Ast::Table { .. }) {
        return super::tables::compile_typed_table(env, ast, t);
    }

    // Arithmetic distributes the target type into its operands, so numeric
    // literals land at the right width without explicit conversions:
    if let Ast::BinaryOp { op, lhs, rhs } = &ast.ast {
        let target = non_optional(t);
        if is_numeric_type(&target)
            && !matches!(target, Type::BigInt)
            && matches!(
                op,
                crate::ast::BinOp::Plus
                    | crate::ast::BinOp::Minus
                    | crate::ast::BinOp::Multiply
                    | crate::ast::BinOp::Divide
                    | crate::ast::BinOp::Mod
                    | crate::ast::BinOp::Mod1
            )
            && operand_fits(env, lhs, &target)?
            && operand_fits(env, rhs, &target)?
        {
            let lhs_code = compile_to_type(env, lhs, &target)?;
            let rhs_code = compile_to_type(env, rhs, &target)?;
            let code = if matches!(op, crate::ast::BinOp::Mod1) {
                format!("(((({lhs_code})-1) % ({rhs_code})) + 1)")
            } else {
                format!("({lhs_code} {} {rhs_code})", op.operator().unwrap())
            };
            return if t.is_optional() {
                Ok(promote_to_optional(&target, &code))
            } else {
                Ok(code)
            };
        }
    }

    let actual = get_type(env, ast)?;

    // A method call whose self type is incomplete but equal to its return
    // type (e.g. `[none].sorted()`) threads the needed type back through:
    if let Ast::MethodCall { self_ast, name, args } = &ast.ast {
        let self_type = get_type(env, self_ast)?;
        if is_incomplete_type(&self_type) && type_eq(&self_type, &actual) {
            if let Some(completed_self) = most_complete_type(&self_type, t) {
                let explicit_self = self_ast.wrap(Ast::ExplicitlyTyped {
                    ast: self_ast.clone(),
                    ty: completed_self,
                });
                let new_call = ast.wrap(Ast::MethodCall {
                    self_ast: explicit_self,
                    name: name.clone(),
                    args: args.clone(),
                });
                return compile_to_type(env, &new_call, t);
            }
        }
    }

    // Auto-address-of for `&lvalue` parameters:
    if let Type::Pointer { pointed, is_stack: true } = t {
        if !matches!(actual, Type::Pointer { .. })
            && type_eq(&actual, pointed)
            && can_be_mutated(env, ast)?
        {
            return Ok(format!("&({})", super::statements::compile_lvalue(env, ast)?));
        }
    }

    if !is_incomplete_type(&actual) {
        let mut code = compile(env, ast)?;
        if promote(env, ast, &mut code, &actual, t)? {
            return Ok(code);
        }
    }

    // Last resort: a registered conversion constructor.
    let constructor_args = vec![ArgAst::positional(ast.clone())];
    if let Some(constructor) = get_constructor(env, t, &constructor_args, true)? {
        let Some(fn_info) = constructor.ty.fn_info() else { unreachable!() };
        return Ok(format!(
            "{}({})",
            constructor.code,
            super::functions::compile_arguments(env, ast, &fn_info.args, &constructor_args)?
        ));
    }

    code_err!(ast, ErrorKind::TypeMismatch, "I expected a {t} here, but this is a {actual}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::global_env;

    #[test]
    fn int_literals_compile_at_target_width() {
        let env = global_env(false);
        let lit = AstNode::fake(Ast::Int { text: "5".into() });
        assert_eq!(compile_to_type(&env, &lit, &Type::int(32)).unwrap(), "I32(5)");
        assert_eq!(compile_to_type(&env, &lit, &Type::num(32)).unwrap(), "0x1.4p+2f");
        assert_eq!(compile_to_type(&env, &lit, &Type::BigInt).unwrap(), "I_small(5)");
    }

    #[test]
    fn optional_promotion_wraps() {
        let env = global_env(false);
        let lit = AstNode::fake(Ast::Int { text: "5".into() });
        let code = compile_to_type(&env, &lit, &Type::optional(Type::int(64))).unwrap();
        assert_eq!(code, "((OptionalInt64_t){.has_value=true, .value=I64(5)})");
    }

    #[test]
    fn none_needs_a_complete_optional() {
        let env = global_env(false);
        let none = AstNode::fake(Ast::None);
        assert_eq!(
            compile_to_type(&env, &none, &Type::optional(Type::BigInt)).unwrap(),
            "NONE_INT"
        );
        assert!(compile_to_type(&env, &none, &Type::Optional(None)).is_err());
        assert!(compile_to_type(&env, &none, &Type::BigInt).is_err());
    }

    #[test]
    fn function_to_closure_wraps() {
        let env = global_env(false);
        let fn_t = Type::function(vec![], Type::Void);
        let closure_t = Type::closure(vec![], Type::Void);
        let node = AstNode::literal_code("my_func", fn_t.clone());
        let mut code = "my_func".to_string();
        assert!(promote(&env, &node, &mut code, &fn_t, &closure_t).unwrap());
        assert_eq!(code, "((Closure_t){my_func, NULL})");
    }
}
