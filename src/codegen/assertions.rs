//! Assertion compilation. Comparison assertions hoist both operands into
//! temporaries so the failure message can show the values that disagreed.

use std::rc::Rc;

use crate::ast::{Ast, AstNode, BinOp};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{with_enum_scope, Env};
use crate::typecheck::{can_compile_to_type, get_type};
use crate::types::{is_numeric_type, type_eq, Type};

use super::conditionals::compile_condition;
use super::promotions::compile_to_type;
use super::statements::compile_statement;
use super::text::{expr_as_text, quoted_str};
use super::types::compile_declaration;

fn comparison_failure(op: BinOp) -> Option<&'static str> {
    match op {
        BinOp::Equals => Some("!="),
        BinOp::NotEquals => Some("=="),
        BinOp::LessThan => Some(">="),
        BinOp::LessThanOrEquals => Some(">"),
        BinOp::GreaterThan => Some("<="),
        BinOp::GreaterThanOrEquals => Some("<"),
        _ => None,
    }
}

pub fn compile_assertion(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Assert { expr, message } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an assertion");
    };

    // `assert a and b` splits into two assertions with better messages:
    if let Ast::BinaryOp { op: BinOp::And, lhs, rhs } = &expr.ast {
        let lhs_t = get_type(env, lhs)?;
        let rhs_t = get_type(env, rhs)?;
        if matches!(lhs_t, Type::Bool) && matches!(rhs_t, Type::Bool) {
            let first = ast.wrap(Ast::Assert { expr: lhs.clone(), message: message.clone() });
            let second = ast.wrap(Ast::Assert { expr: rhs.clone(), message: message.clone() });
            return Ok(format!(
                "{}{}",
                compile_statement(env, &first)?,
                compile_statement(env, &second)?
            ));
        }
    }

    let line = ast.line_number();
    let text_t = env.get_type("Text").expect("Text is always defined");
    let message_code = match message {
        Some(message) => compile_to_type(env, message, &text_t)?,
        None => "Text(\"This assertion failed!\")".to_string(),
    };

    if let Ast::BinaryOp { op, lhs, rhs } = &expr.ast {
        if let Some(failure) = comparison_failure(*op) {
            let lhs_t = get_type(env, lhs)?;
            let rhs_t = get_type(&with_enum_scope(env, &lhs_t), rhs)?;
            let operand_t = if type_eq(&lhs_t, &rhs_t) {
                lhs_t.clone()
            } else if matches!(lhs.ast, Ast::Int { .. }) && is_numeric_type(&rhs_t) {
                rhs_t.clone()
            } else if matches!(rhs.ast, Ast::Int { .. }) && is_numeric_type(&lhs_t) {
                lhs_t.clone()
            } else if can_compile_to_type(&with_enum_scope(env, &lhs_t), rhs, &lhs_t)? {
                lhs_t.clone()
            } else if can_compile_to_type(env, lhs, &rhs_t)? {
                rhs_t.clone()
            } else {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "I can't do comparisons between {lhs_t} and {rhs_t}");
            };

            let var_comparison = expr.wrap(Ast::BinaryOp {
                op: *op,
                lhs: AstNode::literal_code("_lhs", operand_t.clone()),
                rhs: AstNode::literal_code("_rhs", operand_t.clone()),
            });
            return Ok(format!(
                "{{ // assertion\n{lhs_decl} = {lhs_code};\n\n#line {line}\n{rhs_decl} = {rhs_code};\n\n#line {line}\nif (!({cond}))\n#line {line}\nfail_source({file}, {start}, {end}, Text$concat({message_code}, Text(\" (\"), {lhs_text}, Text(\" {failure} \"), {rhs_text}, Text(\")\")));\n}}\n",
                lhs_decl = compile_declaration(&operand_t, "_lhs"),
                lhs_code = compile_to_type(env, lhs, &operand_t)?,
                rhs_decl = compile_declaration(&operand_t, "_rhs"),
                rhs_code = compile_to_type(env, rhs, &operand_t)?,
                cond = compile_condition(env, &var_comparison)?,
                file = quoted_str(&ast.file.filename),
                start = expr.start,
                end = expr.end,
                lhs_text = expr_as_text("_lhs", &operand_t, "no"),
                rhs_text = expr_as_text("_rhs", &operand_t, "no"),
            ));
        }
    }

    Ok(format!(
        "if (!({cond}))\n#line {line}\nfail_source({file}, {start}, {end}, {message_code});\n",
        cond = compile_condition(env, expr)?,
        file = quoted_str(&ast.file.filename),
        start = expr.start,
        end = expr.end,
    ))
}
