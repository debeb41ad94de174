//! Set literals, set comprehensions, and the set method catalog.

use std::rc::Rc;

use crate::ast::{ArgAst, Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{fresh_scope, with_enum_scope, ComprehensionAction, Env};
use crate::typecheck::get_type;
use crate::types::{value_type, Arg, Type};

use super::expressions::compile;
use super::functions::compile_arguments;
use super::pointers::compile_to_pointer_depth;
use super::promotions::compile_to_type;
use super::statements::compile_statement;
use super::types::{compile_type, compile_type_info};

pub(crate) fn add_to_set_comprehension(item: &Rc<AstNode>, subject: &Rc<AstNode>) -> Rc<AstNode> {
    item.wrap(Ast::MethodCall {
        self_ast: subject.clone(),
        name: "add".into(),
        args: vec![ArgAst::positional(item.clone())],
    })
}

pub fn compile_typed_set(env: &Env, ast: &Rc<AstNode>, set_type: &Type) -> CResult<String> {
    let Ast::Set { items } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a set literal");
    };
    if items.is_empty() {
        return Ok("((Table_t){})".into());
    }
    let Type::Set { item: Some(item_type) } = set_type else {
        code_err!(ast, ErrorKind::IncompleteType, "This set's type can't be inferred!");
    };
    let item_type = item_type.as_ref();

    let has_comprehension = items.iter().any(|item| matches!(item.ast, Ast::Comprehension { .. }));
    if !has_comprehension {
        let scope = if matches!(item_type, Type::Enum(_)) {
            with_enum_scope(env, item_type)
        } else {
            env.clone()
        };
        let mut code = format!(
            "Set({}, {}, {}",
            compile_type(item_type),
            compile_type_info(item_type),
            items.len()
        );
        for item in items {
            code.push_str(", ");
            code.push_str(&compile_to_type(&scope, item, item_type)?);
        }
        code.push(')');
        return Ok(code);
    }

    let mut scope = if matches!(item_type, Type::Enum(_)) {
        with_enum_scope(env, item_type)
    } else {
        fresh_scope(env)
    };
    let comprehension_name = format!("set${}", ast.start);
    let comprehension_var = AstNode::literal_code(
        format!("&{comprehension_name}"),
        Type::pointer_to(set_type.clone(), true),
    );
    let action_var = comprehension_var.clone();
    scope.comprehension_action =
        Some(ComprehensionAction::new(move |item| add_to_set_comprehension(item, &action_var)));
    let mut code = format!("({{ Table_t {comprehension_name} = {{}};");
    for item in items {
        if matches!(item.ast, Ast::Comprehension { .. }) {
            code.push('\n');
            code.push_str(&compile_statement(&scope, item)?);
        } else {
            code.push_str(&compile_statement(
                env,
                &add_to_set_comprehension(item, &comprehension_var),
            )?);
        }
    }
    code.push_str(&format!(" {comprehension_name}; }})"));
    Ok(code)
}

pub fn compile_set_method_call(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::MethodCall { self_ast, name, args } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a method call");
    };
    let self_t = get_type(env, self_ast)?;
    let self_value_t = value_type(&self_t);
    let Type::Set { item } = &self_value_t else {
        code_err!(self_ast, ErrorKind::TypeMismatch, "This is not a set");
    };
    let Some(item_t) = item.as_deref() else {
        code_err!(self_ast, ErrorKind::IncompleteType, "I can't tell what this set holds");
    };
    let expect_pointer = || -> CResult<String> {
        if !matches!(self_t, Type::Pointer { .. }) {
            code_err!(self_ast, ErrorKind::TypeMismatch,
                "I expected a set pointer here, not a set value");
        }
        compile(env, self_ast)
    };
    let info = compile_type_info(&self_value_t);

    match name.as_str() {
        "add" => {
            let self_code = expect_pointer()?;
            let spec = vec![Arg::new("item", item_t.clone())];
            Ok(format!(
                "Table$set_value({self_code}, {}, NULL, {info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "add_all" => {
            let self_code = expect_pointer()?;
            let spec = vec![Arg::new("items", self_value_t.clone())];
            Ok(format!(
                "Set$add_all({self_code}, {}, {info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "remove" => {
            let self_code = expect_pointer()?;
            let spec = vec![Arg::new("item", item_t.clone())];
            Ok(format!(
                "Table$remove_value({self_code}, {}, {info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "remove_all" => {
            let self_code = expect_pointer()?;
            let spec = vec![Arg::new("items", self_value_t.clone())];
            Ok(format!(
                "Set$remove_all({self_code}, {}, {info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "clear" => {
            let self_code = expect_pointer()?;
            compile_arguments(env, ast, &[], args)?;
            Ok(format!("Table$clear({self_code})"))
        }
        "has" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let spec = vec![Arg::new("item", item_t.clone())];
            Ok(format!(
                "Table$has_value({self_code}, {}, {info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "is_subset_of" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let spec = vec![
                Arg::new("other", self_value_t.clone()),
                Arg::with_default("strict", Type::Bool, AstNode::fake(Ast::Bool(false))),
            ];
            Ok(format!(
                "Set$is_subset_of({self_code}, {}, {info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "is_superset_of" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let spec = vec![
                Arg::new("other", self_value_t.clone()),
                Arg::with_default("strict", Type::Bool, AstNode::fake(Ast::Bool(false))),
            ];
            Ok(format!(
                "Set$is_superset_of({self_code}, {}, {info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "overlap" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let spec = vec![Arg::new("other", self_value_t.clone())];
            Ok(format!(
                "Table$overlap({self_code}, {}, {info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "with" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let spec = vec![Arg::new("other", self_value_t.clone())];
            Ok(format!(
                "Table$with({self_code}, {}, {info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "without" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let spec = vec![Arg::new("other", self_value_t.clone())];
            Ok(format!(
                "Table$without({self_code}, {}, {info})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        _ => code_err!(ast, ErrorKind::UnknownName, "There is no '{name}' method for sets"),
    }
}
