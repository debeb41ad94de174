//! Doctest compilation: `>> expr` statements become runtime `inspect(...)`
//! calls, and `>> expr = expected` become `test(...)` assertions.

use std::rc::Rc;

use crate::ast::{is_idempotent, Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{naming, with_enum_scope, Env};
use crate::typecheck::{get_type, parse_type_ast};
use crate::types::{has_stack_memory, non_optional, value_type, Type};

use super::expressions::compile;
use super::promotions::compile_to_type;
use super::statements::{
    compile_assignment, compile_declared_value, compile_lvalue, compile_statement,
};
use super::types::{compile_declaration, compile_type, compile_type_info};

pub fn compile_doctest(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::DocTest { expr, expected } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a doctest");
    };
    let mut expr_t = get_type(env, expr)?;
    let mut setup = String::new();
    let test_code;

    match &expr.ast {
        Ast::Declare { var, type_ast, value } => {
            let mut t = match (type_ast, value) {
                (Some(type_ast), _) => parse_type_ast(env, type_ast)?,
                (None, Some(value)) => get_type(env, value)?,
                (None, None) => code_err!(expr, ErrorKind::MissingValue,
                    "This declaration needs a value"),
            };
            if let Type::Function(info) = &t {
                t = Type::Closure(info.clone());
            }
            let var_id = naming::user_id(var.ast.var_name().unwrap_or(""));
            let val_code = compile_declared_value(env, expr)?;
            setup = format!("{};\n", compile_declaration(&t, &var_id));
            test_code = format!("({var_id} = {val_code})");
            expr_t = t;
        }
        Ast::Assign { targets, values } => {
            if let ([target], [value]) = (targets.as_slice(), values.as_slice()) {
                if target.ast.var_name().is_some() && is_idempotent(target) {
                    let mut lhs_t = get_type(env, target)?;
                    if let Ast::Index { indexed, .. } = &target.ast {
                        if lhs_t.is_optional()
                            && matches!(value_type(&get_type(env, indexed)?), Type::Table(_))
                        {
                            lhs_t = non_optional(&lhs_t);
                        }
                    }
                    if has_stack_memory(&lhs_t) {
                        code_err!(expr, ErrorKind::ConstraintViolation,
                            "Stack references cannot be assigned to variables because the variable's scope may outlive the scope of the stack memory");
                    }
                    let val_scope = with_enum_scope(env, &lhs_t);
                    let value_code = compile_to_type(&val_scope, value, &lhs_t)?;
                    test_code =
                        format!("({})", compile_assignment(env, target, &value_code)?);
                    expr_t = lhs_t;
                } else {
                    if expected.is_some() && targets.len() > 1 {
                        code_err!(ast, ErrorKind::InvalidExpression,
                            "Doctesting with '=' is not supported for multi-assignments");
                    }
                    let mut code = "({ // Assignment\n".to_string();
                    let mut first_t = Type::Void;
                    for (i, (target, value)) in targets.iter().zip(values).enumerate() {
                        let lhs_t = get_type(env, target)?;
                        if has_stack_memory(&lhs_t) {
                            code_err!(ast, ErrorKind::ConstraintViolation,
                                "Stack references cannot be assigned to variables");
                        }
                        if i == 0 {
                            first_t = lhs_t.clone();
                        }
                        let val_scope = with_enum_scope(env, &lhs_t);
                        let val_code = compile_to_type(&val_scope, value, &lhs_t)?;
                        code.push_str(&format!(
                            "{} ${} = {val_code};\n",
                            compile_type(&lhs_t),
                            i + 1
                        ));
                    }
                    for (i, target) in targets.iter().enumerate() {
                        code.push_str(&format!(
                            "{};\n",
                            compile_assignment(env, target, &format!("${}", i + 1))?
                        ));
                    }
                    code.push_str("$1; })");
                    test_code = code;
                    expr_t = first_t;
                }
            } else {
                code_err!(ast, ErrorKind::InvalidExpression,
                    "Doctests require matching assignment targets and values");
            }
        }
        Ast::UpdateAssign { lhs, .. } => {
            let lhs_t = get_type(env, lhs)?;
            if let Ast::Index { indexed, .. } = &lhs.ast {
                if let Type::Table(info) = &value_type(&get_type(env, indexed)?) {
                    if info.default_value.is_none() {
                        code_err!(lhs, ErrorKind::ConstraintViolation,
                            "Update assignments are not currently supported for tables");
                    }
                }
            }
            let rewritten = {
                let Ast::UpdateAssign { op, rhs, .. } = &expr.ast else { unreachable!() };
                expr.wrap(Ast::UpdateAssign {
                    op: *op,
                    lhs: AstNode::literal_code("(*expr)", lhs_t.clone()),
                    rhs: rhs.clone(),
                })
            };
            test_code = format!(
                "({{{} = &({}); {}; *expr; }})",
                compile_declaration(&Type::pointer_to(lhs_t.clone(), false), "expr"),
                compile_lvalue(env, lhs)?,
                compile_statement(env, &rewritten)?
            );
            expr_t = lhs_t;
        }
        _ if expr_t.is_void_like() => {
            test_code = format!("({{{} NULL;}})", compile_statement(env, expr)?);
        }
        _ => {
            test_code = compile(env, expr)?;
        }
    }

    if let Some(expected) = expected {
        Ok(format!(
            "{setup}test({}, {test_code}, {}, {}, {}, {});",
            compile_type(&expr_t),
            compile_to_type(env, expected, &expr_t)?,
            compile_type_info(&expr_t),
            expr.start,
            expr.end
        ))
    } else if expr_t.is_void_like() {
        Ok(format!(
            "{setup}inspect_void({test_code}, {}, {}, {});",
            compile_type_info(&expr_t),
            expr.start,
            expr.end
        ))
    } else {
        Ok(format!(
            "{setup}inspect({}, {test_code}, {}, {}, {});",
            compile_type(&expr_t),
            compile_type_info(&expr_t),
            expr.start,
            expr.end
        ))
    }
}
