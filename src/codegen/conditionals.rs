//! Conditionals: truthiness, `if` statements and `if` expressions, with
//! optional-narrowing `if var := ...` declarations.

use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{fresh_scope, Env};
use crate::typecheck::{bind_statement, get_type, parse_type_ast};
use crate::types::{is_incomplete_type, non_optional, Type};

use super::expressions::compile;
use super::optionals::{check_none, optional_into_nonnone};
use super::statements::{compile_block, compile_inline_block, compile_statement};

/// A C boolean expression for using `ast` as a condition.
pub fn compile_condition(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let t = get_type(env, ast)?;
    match &t {
        Type::Bool => compile(env, ast),
        Type::Text(_) => Ok(format!("({}).length", compile(env, ast)?)),
        Type::List { .. } => Ok(format!("({}).length", compile(env, ast)?)),
        Type::Table(_) | Type::Set { .. } => {
            Ok(format!("({}).entries.length", compile(env, ast)?))
        }
        Type::Optional(_) => Ok(format!("!{}", check_none(&t, &compile(env, ast)?)?)),
        Type::Pointer { .. } => code_err!(ast, ErrorKind::TypeMismatch,
            "This pointer will always be non-none, so it should not be used in a conditional"),
        _ => code_err!(ast, ErrorKind::TypeMismatch,
            "{t} values cannot be used for conditionals"),
    }
}

pub fn compile_if_statement(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::If { condition, body, else_body } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an if statement");
    };
    if let Ast::Declare { var, value, .. } = &condition.ast {
        if value.is_none() {
            code_err!(condition, ErrorKind::MissingValue, "This declaration must have a value");
        }
        let truthy_scope = fresh_scope(env);
        bind_statement(&truthy_scope, condition)?;
        let var_type = get_type(&truthy_scope, var)?;

        let mut code = format!(
            "if (true) {{\n{}if ({})",
            compile_statement(env, condition)?,
            compile_condition(&truthy_scope, var)?
        );

        let mut nonnull_scope = truthy_scope.clone();
        if let Type::Optional(Some(inner)) = &var_type {
            nonnull_scope = fresh_scope(&truthy_scope);
            if let Some(name) = var.ast.var_name() {
                nonnull_scope.set_binding(
                    name,
                    (**inner).clone(),
                    optional_into_nonnone(&var_type, &compile(&truthy_scope, var)?),
                );
            }
        }
        code.push_str(&compile_block(&nonnull_scope, body)?);

        if let Some(else_body) = else_body {
            let label = format!("_falsey_{}", ast.start);
            code.push_str(&format!(
                "else goto {label};\n}} else {{\n{label}:;\n{}}}\n",
                compile_inline_block(env, else_body)?
            ));
        } else {
            code.push_str("}\n");
        }
        return Ok(code);
    }

    let mut code = format!("if ({})", compile_condition(env, condition)?);
    let mut truthy_scope = env.clone();
    let cond_t = get_type(env, condition)?;
    if let (Ast::Var(name), Type::Optional(Some(inner))) = (&condition.ast, &cond_t) {
        truthy_scope = fresh_scope(env);
        truthy_scope.set_binding(
            name.clone(),
            (**inner).clone(),
            optional_into_nonnone(&cond_t, &compile(env, condition)?),
        );
    }
    code.push_str(&compile_statement(&truthy_scope, body)?);
    if let Some(else_body) = else_body {
        code.push_str(&format!("\nelse {}", compile_statement(env, else_body)?));
    }
    Ok(code)
}

pub fn compile_if_expression(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::If { condition, body, else_body } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an if expression");
    };
    let mut decl_code = String::new();
    let mut truthy_scope = env.clone();
    let condition_code;

    if let Ast::Declare { var, type_ast, value } = &condition.ast {
        let Some(value) = value else {
            code_err!(condition, ErrorKind::MissingValue, "This declaration must have a value");
        };
        let condition_type = match type_ast {
            Some(type_ast) => parse_type_ast(env, type_ast)?,
            None => get_type(env, value)?,
        };
        if !condition_type.is_optional() {
            code_err!(condition, ErrorKind::TypeMismatch,
                "This `if var := ...:` declaration should be an optional type, not {condition_type}");
        }
        if is_incomplete_type(&condition_type) {
            code_err!(condition, ErrorKind::IncompleteType, "This type is incomplete!");
        }
        decl_code = compile_statement(env, condition)?;
        truthy_scope = fresh_scope(env);
        bind_statement(&truthy_scope, condition)?;
        condition_code = compile_condition(&truthy_scope, var)?;
        if let Some(name) = var.ast.var_name() {
            truthy_scope.set_binding(
                name,
                non_optional(&condition_type),
                optional_into_nonnone(&condition_type, &compile(&truthy_scope, var)?),
            );
        }
    } else if let Ast::Var(name) = &condition.ast {
        let condition_type = get_type(env, condition)?;
        condition_code = compile_condition(env, condition)?;
        if let Type::Optional(Some(inner)) = &condition_type {
            truthy_scope = fresh_scope(env);
            truthy_scope.set_binding(
                name.clone(),
                (**inner).clone(),
                optional_into_nonnone(&condition_type, &compile(env, condition)?),
            );
        }
    } else {
        condition_code = compile_condition(env, condition)?;
    }

    let true_type = get_type(&truthy_scope, body)?;
    let mut else_ast = else_body.clone();
    if let Some(inner) = &else_ast {
        if let Ast::Block { statements } = &inner.ast {
            if let [only] = statements.as_slice() {
                else_ast = Some(only.clone());
            }
        }
    }
    let Some(else_ast) = else_ast else {
        code_err!(ast, ErrorKind::MissingValue,
            "This if expression needs an else clause to have a value");
    };
    let false_type = get_type(env, &else_ast)?;
    if matches!(true_type, Type::Abort | Type::Return(_)) {
        Ok(format!(
            "({{ {decl_code}if ({condition_code}) {}\n{}; }})",
            compile_statement(&truthy_scope, body)?,
            compile(env, &else_ast)?
        ))
    } else if matches!(false_type, Type::Abort | Type::Return(_)) {
        Ok(format!(
            "({{ {decl_code}if (!({condition_code})) {}\n{}; }})",
            compile_statement(env, &else_ast)?,
            compile(&truthy_scope, body)?
        ))
    } else if !decl_code.is_empty() {
        Ok(format!(
            "({{ {decl_code}({condition_code}) ? {} : {};}})",
            compile(&truthy_scope, body)?,
            compile(env, &else_ast)?
        ))
    } else {
        Ok(format!(
            "(({condition_code}) ? {} : {})",
            compile(&truthy_scope, body)?,
            compile(env, &else_ast)?
        ))
    }
}
