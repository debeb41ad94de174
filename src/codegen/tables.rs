//! Table literals, table comprehensions, and the table method catalog.

use std::rc::Rc;

use crate::ast::{ArgAst, Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{fresh_scope, with_enum_scope, ComprehensionAction, Env};
use crate::typecheck::get_type;
use crate::types::{value_type, Arg, Type};

use super::expressions::compile;
use super::functions::compile_arguments;
use super::optionals::{compile_none, promote_to_optional};
use super::pointers::compile_to_pointer_depth;
use super::promotions::compile_to_type;
use super::statements::compile_statement;
use super::types::{compile_type, compile_type_info};

pub(crate) fn add_to_table_comprehension(entry: &Rc<AstNode>, subject: &Rc<AstNode>) -> Rc<AstNode> {
    let Ast::TableEntry { key, value } = &entry.ast else {
        return entry.clone();
    };
    entry.wrap(Ast::MethodCall {
        self_ast: subject.clone(),
        name: "set".into(),
        args: vec![ArgAst::positional(key.clone()), ArgAst::positional(value.clone())],
    })
}

pub fn compile_typed_table(env: &Env, ast: &Rc<AstNode>, table_type: &Type) -> CResult<String> {
    let Ast::Table { entries, fallback, .. } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a table literal");
    };
    if entries.is_empty() {
        let mut code = "((Table_t){".to_string();
        if let Some(fallback) = fallback {
            code.push_str(&format!(".fallback=heap({})", compile(env, fallback)?));
        }
        code.push_str("})");
        return Ok(code);
    }
    let Type::Table(info) = table_type else {
        code_err!(ast, ErrorKind::TypeMismatch, "This is not a table type");
    };
    let (Some(key_t), Some(value_t)) = (&info.key, &info.value) else {
        code_err!(ast, ErrorKind::IncompleteType, "This table's type can't be inferred!");
    };
    if value_t.is_optional() {
        code_err!(ast, ErrorKind::ConstraintViolation,
            "Tables whose values are optional ({value_t}) are not currently supported");
    }

    let has_comprehension =
        entries.iter().any(|entry| matches!(entry.ast, Ast::Comprehension { .. }));
    if !has_comprehension {
        let key_scope = if matches!(key_t, Type::Enum(_)) {
            with_enum_scope(env, key_t)
        } else {
            env.clone()
        };
        let value_scope = if matches!(value_t, Type::Enum(_)) {
            with_enum_scope(env, value_t)
        } else {
            env.clone()
        };
        let mut code = format!(
            "Table({}, {}, {}, {}",
            compile_type(key_t),
            compile_type(value_t),
            compile_type_info(key_t),
            compile_type_info(value_t)
        );
        match fallback {
            Some(fallback) => {
                code.push_str(&format!(", /*fallback:*/ heap({})", compile(env, fallback)?))
            }
            None => code.push_str(", /*fallback:*/ NULL"),
        }
        code.push_str(&format!(", {}", entries.len()));
        for entry in entries {
            let Ast::TableEntry { key, value } = &entry.ast else {
                code_err!(entry, ErrorKind::InvalidExpression,
                    "Table entries must be `key = value` pairs");
            };
            code.push_str(&format!(
                ",\n\t{{{}, {}}}",
                compile_to_type(&key_scope, key, key_t)?,
                compile_to_type(&value_scope, value, value_t)?
            ));
        }
        code.push(')');
        return Ok(code);
    }

    let mut scope = fresh_scope(env);
    let comprehension_name = format!("table${}", ast.start);
    let comprehension_var = AstNode::literal_code(
        format!("&{comprehension_name}"),
        Type::pointer_to(table_type.clone(), true),
    );
    let mut code = format!("({{ Table_t {comprehension_name} = {{");
    if let Some(fallback) = fallback {
        code.push_str(&format!(".fallback=heap({}), ", compile(env, fallback)?));
    }
    code.push_str("};");
    let action_var = comprehension_var.clone();
    scope.comprehension_action =
        Some(ComprehensionAction::new(move |entry| add_to_table_comprehension(entry, &action_var)));
    for entry in entries {
        if matches!(entry.ast, Ast::Comprehension { .. }) {
            code.push('\n');
            code.push_str(&compile_statement(&scope, entry)?);
        } else {
            code.push_str(&compile_statement(
                env,
                &add_to_table_comprehension(entry, &comprehension_var),
            )?);
        }
    }
    code.push_str(&format!(" {comprehension_name}; }})"));
    Ok(code)
}

pub fn compile_table_method_call(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::MethodCall { self_ast, name, args } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a method call");
    };
    let self_t = get_type(env, self_ast)?;
    let self_value_t = value_type(&self_t);
    let Type::Table(info) = &self_value_t else {
        code_err!(self_ast, ErrorKind::TypeMismatch, "This is not a table");
    };
    let (Some(key_t), Some(value_t)) = (&info.key, &info.value) else {
        code_err!(self_ast, ErrorKind::IncompleteType, "I can't tell what this table holds");
    };
    let expect_pointer = || -> CResult<String> {
        if !matches!(self_t, Type::Pointer { .. }) {
            code_err!(self_ast, ErrorKind::TypeMismatch,
                "I expected a table pointer here, not a table value");
        }
        compile(env, self_ast)
    };
    let type_info = compile_type_info(&self_value_t);

    match name.as_str() {
        "clear" => {
            let self_code = expect_pointer()?;
            compile_arguments(env, ast, &[], args)?;
            Ok(format!("Table$clear({self_code})"))
        }
        "get" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let spec = vec![Arg::new("key", key_t.clone())];
            Ok(format!(
                "Table$get_optional({self_code}, {}, {}, {}, _, {}, {}, {type_info})",
                compile_type(key_t),
                compile_type(value_t),
                compile_arguments(env, ast, &spec, args)?,
                promote_to_optional(value_t, "(*_)"),
                compile_none(value_t)?
            ))
        }
        "get_or_set" => {
            let self_code = expect_pointer()?;
            let mut spec = vec![Arg::new("key", key_t.clone())];
            match &info.default_value {
                Some(default) => {
                    spec.push(Arg::with_default("default", value_t.clone(), default.clone()))
                }
                None => spec.push(Arg::new("default", value_t.clone())),
            }
            Ok(format!(
                "*Table$get_or_setdefault({self_code}, {}, {}, {}, {type_info})",
                compile_type(key_t),
                compile_type(value_t),
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "has" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let spec = vec![Arg::new("key", key_t.clone())];
            Ok(format!(
                "Table$has_value({self_code}, {}, {type_info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "remove" => {
            let self_code = expect_pointer()?;
            let spec = vec![Arg::new("key", key_t.clone())];
            Ok(format!(
                "Table$remove_value({self_code}, {}, {type_info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "set" => {
            let self_code = expect_pointer()?;
            let spec = vec![Arg::new("key", key_t.clone()), Arg::new("value", value_t.clone())];
            Ok(format!(
                "Table$set_value({self_code}, {}, {type_info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "sorted" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            compile_arguments(env, ast, &[], args)?;
            Ok(format!("Table$sorted({self_code}, {type_info})"))
        }
        _ => code_err!(ast, ErrorKind::UnknownName,
            "There is no '{name}' method for {self_value_t} tables"),
    }
}
