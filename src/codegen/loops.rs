//! Loop compilation: `for` over lists/sets/tables/integer ranges/iterator
//! functions, `while`, `repeat`, and `skip`/`stop` resolution.

use std::cell::Cell;
use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{for_scope, naming, Env, LoopCtx};
use crate::typecheck::get_type;
use crate::types::{non_optional, value_type, Arg, Type};

use super::expressions::compile;
use super::optionals::{check_none, optional_into_nonnone};
use super::pointers::compile_to_pointer_depth;
use super::statements::{compile_inline_block, compile_statement, goto_label};
use super::types::{compile_declaration, compile_type};

fn loop_ctx(
    env: &Env,
    loop_name: &str,
    loop_vars: Vec<String>,
    ast: &Rc<AstNode>,
) -> (Env, Rc<LoopCtx>) {
    let ctx = Rc::new(LoopCtx {
        loop_name: loop_name.to_string(),
        loop_vars,
        skip_label: format!("skip_{}", ast.start),
        stop_label: format!("stop_{}", ast.start),
        used_skip: Cell::new(false),
        used_stop: Cell::new(false),
        next: env.loop_ctx.clone(),
    });
    let mut loop_env = env.clone();
    loop_env.loop_ctx = Some(ctx.clone());
    (loop_env, ctx)
}

fn labeled_body(ctx: &Rc<LoopCtx>, body_code: &str) -> String {
    if ctx.used_skip.get() {
        format!("{body_code}\n{}: ;\n", ctx.skip_label)
    } else {
        body_code.to_string()
    }
}

fn stop_label(ctx: &Rc<LoopCtx>) -> String {
    if ctx.used_stop.get() {
        format!("\n{}: ;\n", ctx.stop_label)
    } else {
        String::new()
    }
}

pub fn compile_for_loop(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::For { vars, iter, body, empty } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a loop");
    };
    let iter_t = value_type(&get_type(env, iter)?);
    let var_names: Vec<String> =
        vars.iter().filter_map(|v| v.ast.var_name().map(str::to_string)).collect();
    let body_scope = for_scope(env, ast)?;
    let (loop_env, ctx) = loop_ctx(&body_scope, "for", var_names.clone(), ast);

    let empty_code = match empty {
        Some(empty) => Some(compile_statement(env, empty)?),
        None => None,
    };

    match &iter_t {
        Type::List { item } => {
            let Some(item_t) = item.as_deref() else {
                code_err!(iter, ErrorKind::IncompleteType, "I can't tell what this list holds");
            };
            let list_code = compile_to_pointer_depth(env, iter, 0, true)?;
            let mut loop_body = String::new();
            match var_names.as_slice() {
                [var] => loop_body.push_str(&format!(
                    "{} = *({}*)(iterating.data + i*iterating.stride);\n",
                    compile_declaration(item_t, &naming::user_id(var)),
                    compile_type(item_t)
                )),
                [index, var] => {
                    loop_body.push_str(&format!(
                        "{} = Int$from_int64(i+1);\n",
                        compile_declaration(&Type::BigInt, &naming::user_id(index))
                    ));
                    loop_body.push_str(&format!(
                        "{} = *({}*)(iterating.data + i*iterating.stride);\n",
                        compile_declaration(item_t, &naming::user_id(var)),
                        compile_type(item_t)
                    ));
                }
                _ => {}
            }
            loop_body.push_str(&compile_inline_block(&loop_env, body)?);
            let mut code = format!("{{ // For loop:\nList_t iterating = {list_code};\n");
            if let Some(empty_code) = &empty_code {
                code.push_str(&format!("if (iterating.length == 0) {{\n{empty_code}\n}} else "));
            }
            code.push_str(&format!(
                "for (int64_t i = 0; i < iterating.length; ++i) {{\n{}}}\n{}}}\n",
                labeled_body(&ctx, &loop_body),
                stop_label(&ctx)
            ));
            Ok(code)
        }
        Type::Set { item } => {
            let Some(item_t) = item.as_deref() else {
                code_err!(iter, ErrorKind::IncompleteType, "I can't tell what this set holds");
            };
            let set_code = compile_to_pointer_depth(env, iter, 0, true)?;
            let mut loop_body = String::new();
            if let [var] = var_names.as_slice() {
                loop_body.push_str(&format!(
                    "{} = *({}*)(iterating.data + i*iterating.stride);\n",
                    compile_declaration(item_t, &naming::user_id(var)),
                    compile_type(item_t)
                ));
            }
            loop_body.push_str(&compile_inline_block(&loop_env, body)?);
            let mut code =
                format!("{{ // For loop:\nList_t iterating = ({set_code}).entries;\n");
            if let Some(empty_code) = &empty_code {
                code.push_str(&format!("if (iterating.length == 0) {{\n{empty_code}\n}} else "));
            }
            code.push_str(&format!(
                "for (int64_t i = 0; i < iterating.length; ++i) {{\n{}}}\n{}}}\n",
                labeled_body(&ctx, &loop_body),
                stop_label(&ctx)
            ));
            Ok(code)
        }
        Type::Table(info) => {
            let (Some(key_t), Some(value_t)) = (&info.key, &info.value) else {
                code_err!(iter, ErrorKind::IncompleteType, "I can't tell what this table holds");
            };
            let table_code = compile_to_pointer_depth(env, iter, 0, true)?;
            let mut loop_body = String::new();
            match var_names.as_slice() {
                [key] => loop_body.push_str(&format!(
                    "{} = *({}*)(iterating.data + i*iterating.stride);\n",
                    compile_declaration(key_t, &naming::user_id(key)),
                    compile_type(key_t)
                )),
                [key, value] => {
                    let value_offset = format!(
                        "offsetof(struct {{ {}; {}; }}, v)",
                        compile_declaration(key_t, "k"),
                        compile_declaration(value_t, "v")
                    );
                    loop_body.push_str(&format!(
                        "{} = *({}*)(iterating.data + i*iterating.stride);\n",
                        compile_declaration(key_t, &naming::user_id(key)),
                        compile_type(key_t)
                    ));
                    loop_body.push_str(&format!(
                        "{} = *({}*)(iterating.data + i*iterating.stride + {value_offset});\n",
                        compile_declaration(value_t, &naming::user_id(value)),
                        compile_type(value_t)
                    ));
                }
                _ => {}
            }
            loop_body.push_str(&compile_inline_block(&loop_env, body)?);
            let mut code =
                format!("{{ // For loop:\nList_t iterating = ({table_code}).entries;\n");
            if let Some(empty_code) = &empty_code {
                code.push_str(&format!("if (iterating.length == 0) {{\n{empty_code}\n}} else "));
            }
            code.push_str(&format!(
                "for (int64_t i = 0; i < iterating.length; ++i) {{\n{}}}\n{}}}\n",
                labeled_body(&ctx, &loop_body),
                stop_label(&ctx)
            ));
            Ok(code)
        }
        Type::BigInt => {
            let limit_code = compile(env, iter)?;
            let var = var_names.first().cloned().unwrap_or_else(|| "i".to_string());
            let var_id = naming::user_id(&var);
            let loop_body = compile_inline_block(&loop_env, body)?;
            let mut code = format!(
                "{{ // For loop:\nInt_t {var_id} = I_small(1);\nInt_t limit = {limit_code};\n"
            );
            if let Some(empty_code) = &empty_code {
                code.push_str(&format!(
                    "if (Int$compare_value(limit, I_small(1)) < 0) {{\n{empty_code}\n}} else "
                ));
            }
            code.push_str(&format!(
                "for (; Int$compare_value({var_id}, limit) <= 0; {var_id} = Int$plus({var_id}, I_small(1))) {{\n{}}}\n{}}}\n",
                labeled_body(&ctx, &loop_body),
                stop_label(&ctx)
            ));
            Ok(code)
        }
        Type::Int { .. } => {
            let limit_code = compile(env, iter)?;
            let var = var_names.first().cloned().unwrap_or_else(|| "i".to_string());
            let var_id = naming::user_id(&var);
            let loop_body = compile_inline_block(&loop_env, body)?;
            let type_code = compile_type(&iter_t);
            let mut code =
                format!("{{ // For loop:\n{type_code} {var_id} = 1;\n{type_code} limit = {limit_code};\n");
            if let Some(empty_code) = &empty_code {
                code.push_str(&format!("if (limit < 1) {{\n{empty_code}\n}} else "));
            }
            code.push_str(&format!(
                "for (; {var_id} <= limit; ++{var_id}) {{\n{}}}\n{}}}\n",
                labeled_body(&ctx, &loop_body),
                stop_label(&ctx)
            ));
            Ok(code)
        }
        Type::Function(_) | Type::Closure(_) => {
            let fn_info = iter_t.fn_info().unwrap().clone();
            let ret_t = &fn_info.ret;
            let item_t = non_optional(ret_t);
            let iter_code = compile(env, iter)?;
            let var = var_names.first().cloned().unwrap_or_else(|| "x".to_string());
            let var_id = naming::user_id(&var);
            let next_call = match &iter_t {
                Type::Closure(_) => {
                    let mut closure_args = fn_info.args.clone();
                    closure_args.push(Arg::new("userdata", Type::pointer_to(Type::Memory, false)));
                    let fn_type_code =
                        compile_type(&Type::function(closure_args, ret_t.clone()));
                    format!("(({fn_type_code})next.fn)(next.userdata)")
                }
                _ => "next()".to_string(),
            };
            let next_decl = match &iter_t {
                Type::Closure(_) => format!("Closure_t next = {iter_code};"),
                _ => format!("{} = {iter_code};", compile_declaration(&iter_t, "next")),
            };
            let mut loop_body = format!(
                "{} = {next_call};\nif ({}) break;\n",
                compile_declaration(ret_t, "item"),
                check_none(ret_t, "item")?
            );
            loop_body.push_str(&format!(
                "{} = {};\n",
                compile_declaration(&item_t, &var_id),
                optional_into_nonnone(ret_t, "item")
            ));
            loop_body.push_str(&compile_inline_block(&loop_env, body)?);
            let code = format!(
                "{{ // For loop:\n{next_decl}\nfor (;;) {{\n{}}}\n{}}}\n",
                labeled_body(&ctx, &loop_body),
                stop_label(&ctx)
            );
            Ok(code)
        }
        _ => code_err!(iter, ErrorKind::TypeMismatch,
            "Iteration is not implemented for type: {iter_t}"),
    }
}

pub fn compile_while(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::While { condition, body } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a while loop");
    };
    let (loop_env, ctx) = loop_ctx(env, "while", vec![], ast);
    let condition_code = super::conditionals::compile_condition(env, condition)?;
    let body_code = compile_inline_block(&loop_env, body)?;
    Ok(format!(
        "while ({condition_code}) {{\n{}}}\n{}",
        labeled_body(&ctx, &body_code),
        stop_label(&ctx)
    ))
}

pub fn compile_repeat(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Repeat { body } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a repeat loop");
    };
    let (loop_env, ctx) = loop_ctx(env, "repeat", vec![], ast);
    let body_code = compile_inline_block(&loop_env, body)?;
    Ok(format!(
        "for (;;) {{\n{}}}\n{}",
        labeled_body(&ctx, &body_code),
        stop_label(&ctx)
    ))
}

pub fn compile_skip(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Skip { target } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a skip");
    };
    let Some(ctx) = LoopCtx::lookup(&env.loop_ctx, target.as_deref()) else {
        code_err!(ast, ErrorKind::UnknownName,
            "I couldn't find a loop to skip {}",
            target.as_deref().map(|t| format!("'{t}' in")).unwrap_or_default());
    };
    Ok(goto_label(&ctx, true))
}

pub fn compile_stop(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Stop { target } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a stop");
    };
    let Some(ctx) = LoopCtx::lookup(&env.loop_ctx, target.as_deref()) else {
        code_err!(ast, ErrorKind::UnknownName,
            "I couldn't find a loop to stop {}",
            target.as_deref().map(|t| format!("'{t}' in")).unwrap_or_default());
    };
    Ok(goto_label(&ctx, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{fresh_scope, global_env};
    use crate::types::Type;

    #[test]
    fn while_loops_emit_labels_only_when_used() {
        let env = global_env(false);
        let quiet = AstNode::fake(Ast::While {
            condition: AstNode::fake(Ast::Bool(true)),
            body: AstNode::fake(Ast::Block { statements: vec![AstNode::fake(Ast::Pass)] }),
        });
        let code = compile_while(&env, &quiet).unwrap();
        assert!(code.starts_with("while (yes)"), "got: {code}");
        assert!(!code.contains("stop_"), "got: {code}");

        let stopping = AstNode::fake(Ast::While {
            condition: AstNode::fake(Ast::Bool(true)),
            body: AstNode::fake(Ast::Block {
                statements: vec![AstNode::fake(Ast::Stop { target: None })],
            }),
        });
        let code = compile_while(&env, &stopping).unwrap();
        assert!(code.contains("goto stop_0;"), "got: {code}");
        assert!(code.contains("stop_0: ;"), "got: {code}");
    }

    #[test]
    fn list_loops_copy_and_stride() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        scope.set_binding("xs", Type::list_of(Type::BigInt), "_$xs");
        let loop_ast = AstNode::fake(Ast::For {
            vars: vec![AstNode::fake(Ast::Var("x".into()))],
            iter: AstNode::fake(Ast::Var("xs".into())),
            body: AstNode::fake(Ast::Block { statements: vec![AstNode::fake(Ast::Pass)] }),
            empty: None,
        });
        let code = compile_for_loop(&scope, &loop_ast).unwrap();
        assert!(code.contains("List_t iterating = LIST_COPY(_$xs)"), "got: {code}");
        assert!(code.contains("Int_t _$x = *(Int_t*)(iterating.data + i*iterating.stride)"),
            "got: {code}");
    }

    #[test]
    fn integer_ranges_count_from_one() {
        let env = global_env(false);
        let loop_ast = AstNode::fake(Ast::For {
            vars: vec![AstNode::fake(Ast::Var("i".into()))],
            iter: AstNode::fake(Ast::Int { text: "10".into() }),
            body: AstNode::fake(Ast::Block { statements: vec![AstNode::fake(Ast::Pass)] }),
            empty: None,
        });
        let code = compile_for_loop(&env, &loop_ast).unwrap();
        assert!(code.contains("Int_t _$i = I_small(1)"), "got: {code}");
        assert!(code.contains("Int$compare_value(_$i, limit) <= 0"), "got: {code}");
        assert!(code.contains("Int$plus(_$i, I_small(1))"), "got: {code}");
    }

    #[test]
    fn skip_requires_an_enclosing_loop() {
        let env = global_env(false);
        let skip = AstNode::fake(Ast::Skip { target: None });
        assert!(compile_skip(&env, &skip).is_err());
    }
}
