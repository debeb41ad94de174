//! List literals, list comprehensions, and the list method catalog.

use std::rc::Rc;

use crate::ast::{ArgAst, Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{fresh_scope, with_enum_scope, ComprehensionAction, Env};
use crate::typecheck::get_type;
use crate::types::{is_incomplete_type, Arg, Type};

use super::expressions::compile;
use super::functions::compile_arguments;
use super::optionals::{compile_none, promote_to_optional};
use super::pointers::compile_to_pointer_depth;
use super::promotions::compile_to_type;
use super::statements::compile_statement;
use super::types::{compile_type, compile_type_info};

pub(crate) fn add_to_list_comprehension(item: &Rc<AstNode>, subject: &Rc<AstNode>) -> Rc<AstNode> {
    item.wrap(Ast::MethodCall {
        self_ast: subject.clone(),
        name: "insert".into(),
        args: vec![ArgAst::positional(item.clone())],
    })
}

pub fn compile_typed_list(env: &Env, ast: &Rc<AstNode>, list_type: &Type) -> CResult<String> {
    let Ast::List { items } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a list literal");
    };
    if items.is_empty() {
        return Ok("(List_t){.length=0}".into());
    }
    let Type::List { item: Some(item_type) } = list_type else {
        code_err!(ast, ErrorKind::IncompleteType, "This list's type can't be inferred!");
    };
    let item_type = item_type.as_ref();

    let has_comprehension = items.iter().any(|item| matches!(item.ast, Ast::Comprehension { .. }));
    if !has_comprehension {
        if is_incomplete_type(item_type) {
            code_err!(ast, ErrorKind::IncompleteType, "This list's type can't be inferred!");
        }
        let scope = if matches!(item_type, Type::Enum(_)) {
            with_enum_scope(env, item_type)
        } else {
            env.clone()
        };
        let mut code = format!("TypedListN({}, {}", compile_type(item_type), items.len());
        for item in items {
            code.push_str(", ");
            code.push_str(&compile_to_type(&scope, item, item_type)?);
        }
        code.push(')');
        return Ok(code);
    }

    // Comprehension: build into a hidden accumulator.
    let mut scope = if matches!(item_type, Type::Enum(_)) {
        with_enum_scope(env, item_type)
    } else {
        fresh_scope(env)
    };
    let comprehension_name = format!("list${}", ast.start);
    let comprehension_var = AstNode::literal_code(
        format!("&{comprehension_name}"),
        Type::pointer_to(list_type.clone(), true),
    );
    let action_var = comprehension_var.clone();
    scope.comprehension_action =
        Some(ComprehensionAction::new(move |item| add_to_list_comprehension(item, &action_var)));
    let mut code = format!("({{ List_t {comprehension_name} = {{}};");
    for item in items {
        if matches!(item.ast, Ast::Comprehension { .. }) {
            code.push('\n');
            code.push_str(&compile_statement(&scope, item)?);
        } else {
            code.push_str(&compile_statement(
                env,
                &add_to_list_comprehension(item, &comprehension_var),
            )?);
        }
    }
    code.push_str(&format!(" {comprehension_name}; }})"));
    Ok(code)
}

/// The default `generic_compare` closure used by sorting/heap methods.
fn generic_compare_closure(item_t: &Type) -> (Type, Rc<AstNode>) {
    let item_ptr = Type::pointer_to(item_t.clone(), true);
    let fn_t = Type::closure(
        vec![Arg::new("x", item_ptr.clone()), Arg::new("y", item_ptr)],
        Type::int(32),
    );
    let default = AstNode::literal_code(
        format!(
            "((Closure_t){{.fn=generic_compare, .userdata=(void*){}}})",
            compile_type_info(item_t)
        ),
        fn_t.clone(),
    );
    (fn_t, default)
}

fn fake_int(text: &str) -> Rc<AstNode> {
    AstNode::fake(Ast::Int { text: text.into() })
}

pub fn compile_list_method_call(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::MethodCall { self_ast, name, args } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a method call");
    };
    let self_t = get_type(env, self_ast)?;
    let mut pointer_depth = 0;
    let mut self_value_t = self_t.clone();
    while let Type::Pointer { pointed, .. } = self_value_t {
        pointer_depth += 1;
        self_value_t = *pointed;
    }
    let Type::List { item } = &self_value_t else {
        code_err!(self_ast, ErrorKind::TypeMismatch, "This is not a list");
    };
    let Some(item_t) = item.as_deref() else {
        code_err!(self_ast, ErrorKind::IncompleteType, "I can't tell what this list holds");
    };
    let expect_pointer = || -> CResult<()> {
        if pointer_depth < 1 {
            code_err!(self_ast, ErrorKind::TypeMismatch,
                "I expected a list pointer here, not a list value");
        } else if pointer_depth > 1 {
            code_err!(self_ast, ErrorKind::TypeMismatch,
                "I expected a list pointer here, not a nested list pointer");
        }
        Ok(())
    };
    let padded_item_size = format!("sizeof({})", compile_type(item_t));
    let int = Type::BigInt;

    match name.as_str() {
        "insert" => {
            expect_pointer()?;
            let self_code = compile(env, self_ast)?;
            let spec = vec![
                Arg::new("item", item_t.clone()),
                Arg::with_default("at", int, fake_int("0")),
            ];
            Ok(format!(
                "List$insert_value({self_code}, {}, {padded_item_size})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "insert_all" => {
            expect_pointer()?;
            let self_code = compile(env, self_ast)?;
            let spec = vec![
                Arg::new("items", self_value_t.clone()),
                Arg::with_default("at", int, fake_int("0")),
            ];
            Ok(format!(
                "List$insert_all({self_code}, {}, {padded_item_size})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "remove_at" => {
            expect_pointer()?;
            let self_code = compile(env, self_ast)?;
            let spec = vec![
                Arg::with_default("index", int.clone(), fake_int("-1")),
                Arg::with_default("count", int, fake_int("1")),
            ];
            Ok(format!(
                "List$remove_at({self_code}, {}, {padded_item_size})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "remove_item" => {
            expect_pointer()?;
            let self_code = compile(env, self_ast)?;
            let spec = vec![
                Arg::new("item", item_t.clone()),
                Arg::with_default("max_count", int, fake_int("-1")),
            ];
            Ok(format!(
                "List$remove_item_value({self_code}, {}, {})",
                compile_arguments(env, ast, &spec, args)?,
                compile_type_info(&self_value_t)
            ))
        }
        "has" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let spec = vec![Arg::new("item", item_t.clone())];
            Ok(format!(
                "List$has_value({self_code}, {}, {})",
                compile_arguments(env, ast, &spec, args)?,
                compile_type_info(&self_value_t)
            ))
        }
        "find" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let spec = vec![Arg::new("item", item_t.clone())];
            Ok(format!(
                "List$find_value({self_code}, {}, {})",
                compile_arguments(env, ast, &spec, args)?,
                compile_type_info(&self_value_t)
            ))
        }
        "where" | "first" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, !args.is_empty())?;
            let item_ptr = Type::pointer_to(item_t.clone(), true);
            let predicate_type =
                Type::closure(vec![Arg::new("item", item_ptr)], Type::Bool);
            let spec = vec![Arg::new("predicate", predicate_type)];
            Ok(format!(
                "List$first({self_code}, {})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "sort" | "sorted" => {
            let self_code = if name == "sort" {
                expect_pointer()?;
                compile(env, self_ast)?
            } else {
                compile_to_pointer_depth(env, self_ast, 0, false)?
            };
            let comparison = if args.is_empty() {
                format!(
                    "((Closure_t){{.fn=generic_compare, .userdata=(void*){}}})",
                    compile_type_info(item_t)
                )
            } else {
                let (fn_t, _) = generic_compare_closure(item_t);
                let spec = vec![Arg::new("by", fn_t)];
                compile_arguments(env, ast, &spec, args)?
            };
            Ok(format!("List${name}({self_code}, {comparison}, {padded_item_size})"))
        }
        "heapify" => {
            expect_pointer()?;
            let self_code = compile(env, self_ast)?;
            let (fn_t, default) = generic_compare_closure(item_t);
            let spec = vec![Arg::with_default("by", fn_t, default)];
            Ok(format!(
                "List$heapify({self_code}, {}, {padded_item_size})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "heap_push" => {
            expect_pointer()?;
            let self_code = compile(env, self_ast)?;
            let (fn_t, default) = generic_compare_closure(item_t);
            let spec = vec![
                Arg::new("item", item_t.clone()),
                Arg::with_default("by", fn_t, default),
            ];
            Ok(format!(
                "List$heap_push_value({self_code}, {}, {padded_item_size})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "heap_pop" => {
            expect_pointer()?;
            let self_code = compile(env, self_ast)?;
            let (fn_t, default) = generic_compare_closure(item_t);
            let spec = vec![Arg::with_default("by", fn_t, default)];
            Ok(format!(
                "List$heap_pop_value({self_code}, {}, {}, _, {}, {})",
                compile_arguments(env, ast, &spec, args)?,
                compile_type(item_t),
                promote_to_optional(item_t, "_"),
                compile_none(item_t)?
            ))
        }
        "binary_search" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, !args.is_empty())?;
            let (fn_t, default) = generic_compare_closure(item_t);
            let spec = vec![
                Arg::new("target", item_t.clone()),
                Arg::with_default("by", fn_t, default),
            ];
            Ok(format!(
                "List$binary_search_value({self_code}, {})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "clear" => {
            expect_pointer()?;
            let self_code = compile(env, self_ast)?;
            compile_arguments(env, ast, &[], args)?;
            Ok(format!("List$clear({self_code})"))
        }
        "pop" => {
            expect_pointer()?;
            let self_code = compile(env, self_ast)?;
            let spec = vec![Arg::with_default("index", int, fake_int("-1"))];
            Ok(format!(
                "List$pop({self_code}, {}, {}, _, {}, {})",
                compile_arguments(env, ast, &spec, args)?,
                compile_type(item_t),
                promote_to_optional(item_t, "_"),
                compile_none(item_t)?
            ))
        }
        "counts" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            compile_arguments(env, ast, &[], args)?;
            Ok(format!(
                "List$counts({self_code}, {})",
                compile_type_info(&self_value_t)
            ))
        }
        "from" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, true)?;
            let spec = vec![Arg::new("first", int)];
            Ok(format!("List$from({self_code}, {})", compile_arguments(env, ast, &spec, args)?))
        }
        "to" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, true)?;
            let spec = vec![Arg::new("last", int)];
            Ok(format!("List$to({self_code}, {})", compile_arguments(env, ast, &spec, args)?))
        }
        "slice" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, true)?;
            let spec = vec![Arg::new("first", int.clone()), Arg::new("last", int)];
            Ok(format!("List$slice({self_code}, {})", compile_arguments(env, ast, &spec, args)?))
        }
        "by" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, true)?;
            let spec = vec![Arg::new("stride", int)];
            Ok(format!(
                "List$by({self_code}, {}, {padded_item_size})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "reversed" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, true)?;
            compile_arguments(env, ast, &[], args)?;
            Ok(format!("List$reversed({self_code}, {padded_item_size})"))
        }
        "unique" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            compile_arguments(env, ast, &[], args)?;
            Ok(format!(
                "Table$from_entries({self_code}, Set$info({}))",
                compile_type_info(item_t)
            ))
        }
        "sample" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let random_t = Type::optional(Type::closure(vec![], Type::num(64)));
            let spec = vec![
                Arg::new("count", int),
                Arg::with_default(
                    "weights",
                    Type::optional(Type::list_of(Type::num(64))),
                    AstNode::fake(Ast::None),
                ),
                Arg::with_default("random", random_t, AstNode::fake(Ast::None)),
            ];
            Ok(format!(
                "List$sample({self_code}, {}, {padded_item_size})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "shuffle" | "shuffled" => {
            let self_code = if name == "shuffle" {
                expect_pointer()?;
                compile(env, self_ast)?
            } else {
                compile_to_pointer_depth(env, self_ast, 0, false)?
            };
            let random_t = Type::optional(Type::closure(
                vec![Arg::new("min", Type::int(64)), Arg::new("max", Type::int(64))],
                Type::int(64),
            ));
            let spec = vec![Arg::with_default("random", random_t, AstNode::fake(Ast::None))];
            Ok(format!(
                "List${name}({self_code}, {}, {padded_item_size})",
                compile_arguments(env, ast, &spec, args)?
            ))
        }
        "random" => {
            let self_code = compile_to_pointer_depth(env, self_ast, 0, false)?;
            let random_t = Type::optional(Type::closure(
                vec![Arg::new("min", Type::int(64)), Arg::new("max", Type::int(64))],
                Type::int(64),
            ));
            let spec = vec![Arg::with_default("random", random_t, AstNode::fake(Ast::None))];
            Ok(format!(
                "List$random_value({self_code}, {}, {})",
                compile_arguments(env, ast, &spec, args)?,
                compile_type(item_t)
            ))
        }
        _ => code_err!(ast, ErrorKind::UnknownName, "There is no '{name}' method for lists"),
    }
}
