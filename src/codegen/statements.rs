//! Statement compilation: declarations, assignments, update assignments,
//! control flow dispatch, `defer`/`return` interplay, and block scoping.

use std::rc::Rc;

use crate::ast::{Ast, AstNode, BinOp, UseKind};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{fresh_scope, naming, with_enum_scope, Deferral, Env, LoopCtx};
use crate::ast::is_idempotent;
use crate::typecheck::{
    bind_statement, can_be_mutated, get_type, is_discardable, parse_type_ast, prebind_statement,
    resolve_use_path,
};
use crate::types::{has_stack_memory, value_type, Type};

use super::expressions::{compile, compile_empty, compile_maybe_incref};
use super::indexing::compile_index_value;
use super::promotions::compile_to_type;
use super::types::{compile_declaration, compile_type, compile_type_info};

/// Prefix `code` with a `#line` directive pointing at `ast`'s source line,
/// when source mapping is enabled.
pub fn with_source_info(env: &Env, ast: &Rc<AstNode>, code: &str) -> String {
    if code.is_empty() || !env.do_source_mapping || ast.file.text.is_empty() {
        return code.to_string();
    }
    format!("\n#line {}\n{code}", ast.line_number())
}

/// Compile a statement-position AST node to C statement text.
pub fn compile_statement(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    match &ast.ast {
        Ast::When { .. } => super::whens::compile_when_statement(env, ast),
        Ast::If { .. } => super::conditionals::compile_if_statement(env, ast),
        Ast::For { .. } => super::loops::compile_for_loop(env, ast),
        Ast::While { .. } => super::loops::compile_while(env, ast),
        Ast::Repeat { .. } => super::loops::compile_repeat(env, ast),
        Ast::Skip { .. } => super::loops::compile_skip(env, ast),
        Ast::Stop { .. } => super::loops::compile_stop(env, ast),
        Ast::Block { .. } => compile_block(env, ast),
        Ast::Declare { var, type_ast, value } => {
            let Some(name) = var.ast.var_name() else {
                code_err!(var, ErrorKind::InvalidExpression,
                    "This declaration needs a variable name");
            };
            if name == "_" {
                // Explicit discard.
                let Some(value) = value else { return Ok(String::new()) };
                let t = get_type(env, value)?;
                if t.is_void_like() {
                    return Ok(format!("{};\n", compile(env, value)?));
                }
                return Ok(format!("(void)({});\n", compile(env, value)?));
            }
            let mut t = match (type_ast, value) {
                (Some(type_ast), _) => parse_type_ast(env, type_ast)?,
                (None, Some(value)) => get_type(env, value)?,
                (None, None) => code_err!(ast, ErrorKind::MissingValue,
                    "I couldn't figure out the type of this value"),
            };
            if t.is_void_like() {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "You can't declare a variable with a {t} value");
            }
            if let Type::Function(info) = &t {
                t = Type::Closure(info.clone());
            }
            let val_code = compile_declared_value(env, ast)?;
            let code = format!(
                "{} = {val_code};\n",
                compile_declaration(&t, &naming::user_id(name))
            );
            Ok(with_source_info(env, ast, &code))
        }
        Ast::Assign { .. } => compile_assignment_statement(env, ast),
        Ast::UpdateAssign { .. } => compile_update_assignment(env, ast),
        Ast::Return { value } => {
            let mut code = String::new();
            // Deferred blocks run before the function returns:
            for deferral in env.deferred.borrow().iter().rev() {
                code.push_str(&compile_block(&deferral.defer_env, &deferral.block)?);
            }
            match (value, &env.fn_ret) {
                (Some(value), Some(fn_ret)) if !matches!(fn_ret, Type::Void | Type::Abort) => {
                    let ret_env = with_enum_scope(env, fn_ret);
                    code.push_str(&format!(
                        "return {};",
                        compile_to_type(&ret_env, value, fn_ret)?
                    ));
                }
                (Some(value), _) => {
                    let t = get_type(env, value)?;
                    if !t.is_void_like() {
                        code_err!(value, ErrorKind::TypeMismatch,
                            "This function isn't supposed to return a value");
                    }
                    code.push_str(&format!("{};\nreturn;", compile(env, value)?));
                }
                (None, Some(fn_ret)) if !matches!(fn_ret, Type::Void | Type::Abort) => {
                    code_err!(ast, ErrorKind::TypeMismatch,
                        "This function is supposed to return a {fn_ret} value");
                }
                (None, _) => code.push_str("return;"),
            }
            Ok(with_source_info(env, ast, &code))
        }
        Ast::Pass => Ok(String::new()),
        Ast::Defer { body } => {
            env.deferred
                .borrow_mut()
                .push(Deferral { defer_env: env.clone(), block: body.clone() });
            Ok(String::new())
        }
        Ast::Use { path, what, .. } => match what {
            UseKind::Header | UseKind::CCode => Ok(String::new()),
            UseKind::Local | UseKind::Module => {
                let key = resolve_use_path(ast, path, *what);
                let module_env = env.imports.borrow().get(&key).cloned();
                let Some(module_env) = module_env else {
                    code_err!(ast, ErrorKind::UnknownName,
                        "The module '{path}' was not loaded before compilation");
                };
                let init = naming::namespace_name(&module_env, None, "$initialize");
                Ok(format!("{init}();\n"))
            }
        },
        Ast::DocTest { .. } => super::doctests::compile_doctest(env, ast),
        Ast::Assert { .. } => super::assertions::compile_assertion(env, ast),
        Ast::InlineCCode { chunks, .. } => {
            let mut code = String::new();
            for chunk in chunks {
                match &chunk.ast {
                    Ast::TextLiteral { text } => code.push_str(text),
                    _ => code.push_str(&compile(env, chunk)?),
                }
            }
            Ok(code)
        }
        Ast::Comprehension { expr, vars, iter, filter } => {
            // A statement-position comprehension feeds the enclosing
            // collection through the comprehension action hook.
            let Some(action) = env.comprehension_action.clone() else {
                code_err!(ast, ErrorKind::InvalidExpression,
                    "I don't know what to do with this comprehension");
            };
            let mut body = if matches!(expr.ast, Ast::Comprehension { .. }) {
                expr.clone()
            } else {
                (action.0)(expr)
            };
            if let Some(filter) = filter {
                body = expr.wrap(Ast::If {
                    condition: filter.clone(),
                    body,
                    else_body: None,
                });
            }
            let loop_ast = ast.wrap(Ast::For {
                vars: vars.clone(),
                iter: iter.clone(),
                body,
                empty: None,
            });
            super::loops::compile_for_loop(env, &loop_ast)
        }
        Ast::FunctionDef { .. }
        | Ast::ConvertDef { .. }
        | Ast::StructDef { .. }
        | Ast::EnumDef { .. }
        | Ast::LangDef { .. }
        | Ast::Extend { .. }
        | Ast::Extern { .. } => Ok(String::new()),
        _ => {
            let t = get_type(env, ast)?;
            if t.is_void_like() {
                let code = compile(env, ast)?;
                return Ok(with_source_info(env, ast, &format!("{code};\n")));
            }
            if is_discardable(env, ast)? {
                let code = compile(env, ast)?;
                return Ok(with_source_info(env, ast, &format!("(void)({code});\n")));
            }
            code_err!(ast, ErrorKind::ConstraintViolation,
                "The result of this expression (a {t}) is being discarded. Use `_ := ...` to discard it explicitly.")
        }
    }
}

/// The initializer expression for a declaration: its value (promoted to the
/// declared type), or the type's empty value.
pub fn compile_declared_value(env: &Env, declare_ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Declare { type_ast, value, .. } = &declare_ast.ast else {
        code_err!(declare_ast, ErrorKind::InvalidExpression, "This is not a declaration");
    };
    let t = match (type_ast, value) {
        (Some(type_ast), _) => parse_type_ast(env, type_ast)?,
        (None, Some(value)) => get_type(env, value)?,
        (None, None) => code_err!(declare_ast, ErrorKind::MissingValue,
            "I couldn't figure out the type of this value"),
    };
    if t.is_void_like() {
        code_err!(declare_ast, ErrorKind::ConstraintViolation,
            "You can't declare a variable with a {t} value");
    }
    match value {
        Some(value) => {
            let mut val_code = compile_maybe_incref(env, value, &t)?;
            if let Type::Function(info) = &t {
                let closure_t = Type::Closure(info.clone());
                super::promotions::promote(env, value, &mut val_code, &t, &closure_t)?;
            }
            Ok(val_code)
        }
        None => {
            let val_code = compile_empty(&t)?;
            if val_code.is_empty() {
                code_err!(declare_ast, ErrorKind::MissingValue,
                    "This type ({t}) cannot be uninitialized. You must provide a value.");
            }
            Ok(val_code)
        }
    }
}

/// Compile an assignment target as an lvalue.
pub fn compile_lvalue(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    if !can_be_mutated(env, ast)? {
        match &ast.ast {
            Ast::Index { indexed, .. } => {
                code_err!(indexed, ErrorKind::ConstraintViolation,
                    "This is an immutable value, you can't mutate its contents");
            }
            Ast::FieldAccess { fielded, .. } => {
                let t = get_type(env, fielded)?;
                code_err!(fielded, ErrorKind::ConstraintViolation,
                    "This is an immutable {t} value, you can't assign to its fields");
            }
            _ => {
                let t = get_type(env, ast)?;
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "This is a value of type {t} and can't be used as an assignment target");
            }
        }
    }

    match &ast.ast {
        Ast::Index { indexed, index, .. } => {
            let container_t = get_type(env, indexed)?;
            if container_t.is_optional() {
                code_err!(indexed, ErrorKind::ConstraintViolation,
                    "This value might be none, so it can't be safely used as an assignment target");
            }
            if index.is_none() {
                if matches!(container_t, Type::Pointer { .. }) {
                    return compile(env, ast);
                }
                code_err!(ast, ErrorKind::InvalidExpression, "This value needs an index");
            }
            let index = index.as_ref().unwrap();
            let container_t = value_type(&container_t);
            match &container_t {
                Type::List { item } => {
                    let Some(item_type) = item.as_deref() else {
                        code_err!(ast, ErrorKind::IncompleteType,
                            "I can't tell what this list holds");
                    };
                    let target_code =
                        super::pointers::compile_to_pointer_depth(env, indexed, 1, false)?;
                    let index_code = compile_index_value(env, index)?;
                    Ok(format!(
                        "List_lvalue({}, {target_code}, {index_code}, {}, {})",
                        compile_type(item_type),
                        ast.start,
                        ast.end
                    ))
                }
                Type::Table(info) => {
                    let (Some(key_t), Some(value_t)) = (&info.key, &info.value) else {
                        code_err!(ast, ErrorKind::IncompleteType,
                            "I can't tell what this table holds");
                    };
                    let target_code =
                        super::pointers::compile_to_pointer_depth(env, indexed, 1, false)?;
                    if let Some(default_value) = &info.default_value {
                        return Ok(format!(
                            "*Table$get_or_setdefault({target_code}, {}, {}, {}, {}, {})",
                            compile_type(key_t),
                            compile_type(value_t),
                            compile_maybe_incref(env, index, key_t)?,
                            compile_maybe_incref(env, default_value, value_t)?,
                            compile_type_info(&container_t)
                        ));
                    }
                    Ok(format!(
                        "*({})Table$reserve({target_code}, stack({}), NULL, {})",
                        compile_type(&Type::pointer_to(value_t.clone(), false)),
                        compile_maybe_incref(env, index, key_t)?,
                        compile_type_info(&container_t)
                    ))
                }
                _ => code_err!(ast, ErrorKind::InvalidExpression,
                    "I don't know how to assign to this target"),
            }
        }
        Ast::Var(_) | Ast::FieldAccess { .. } | Ast::InlineCCode { .. }
        | Ast::LiteralCode { .. } => compile(env, ast),
        _ => code_err!(ast, ErrorKind::InvalidExpression, "I don't know how to assign to this"),
    }
}

fn assignment_target_type(env: &Env, target: &Rc<AstNode>) -> CResult<Type> {
    let mut lhs_t = get_type(env, target)?;
    // Assigning into a table or list index targets the value type, not the
    // optional lookup type.
    if let Ast::Index { indexed, .. } = &target.ast {
        if lhs_t.is_optional() {
            let container = value_type(&get_type(env, indexed)?);
            if matches!(container, Type::Table(_) | Type::List { .. }) {
                lhs_t = crate::types::non_optional(&lhs_t);
            }
        }
    }
    if has_stack_memory(&lhs_t) {
        code_err!(target, ErrorKind::ConstraintViolation,
            "Stack references cannot be assigned to variables because the variable's scope may outlive the scope of the stack memory");
    }
    Ok(lhs_t)
}

pub fn compile_assignment(env: &Env, target: &Rc<AstNode>, value: &str) -> CResult<String> {
    Ok(format!("{} = {value}", compile_lvalue(env, target)?))
}

pub fn compile_assignment_statement(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Assign { targets, values } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an assignment");
    };
    // Single assignment needs no temporaries:
    if let ([target], [value]) = (targets.as_slice(), values.as_slice()) {
        let lhs_t = assignment_target_type(env, target)?;
        let val_env = with_enum_scope(env, &lhs_t);
        let val = compile_maybe_incref(&val_env, value, &lhs_t)?;
        let code = format!("{};\n", compile_assignment(env, target, &val)?);
        return Ok(with_source_info(env, ast, &code));
    }

    let mut code = "{ // Assignment\n".to_string();
    for (i, (target, value)) in targets.iter().zip(values).enumerate() {
        let lhs_t = assignment_target_type(env, target)?;
        let val_env = with_enum_scope(env, &lhs_t);
        let val = compile_maybe_incref(&val_env, value, &lhs_t)?;
        code.push_str(&format!("{} ${} = {val};\n", compile_type(&lhs_t), i + 1));
    }
    for (i, target) in targets.iter().enumerate() {
        code.push_str(&format!("{};\n", compile_assignment(env, target, &format!("${}", i + 1))?));
    }
    code.push_str("\n}");
    Ok(with_source_info(env, ast, &code))
}

pub fn compile_update_assignment(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::UpdateAssign { op, lhs, rhs } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an update assignment");
    };
    let lhs_t = get_type(env, lhs)?;
    let needs_idempotency_fix = !is_idempotent(lhs);
    let lhs_code =
        if needs_idempotency_fix { "(*lhs)".to_string() } else { compile_lvalue(env, lhs)? };

    let fast_numeric = matches!(lhs_t, Type::Int { .. } | Type::Num { .. } | Type::Byte);
    let mut update_assignment = String::new();
    match op {
        BinOp::Plus | BinOp::Minus | BinOp::Multiply | BinOp::Divide if fast_numeric => {
            update_assignment = format!(
                "{lhs_code} {}= {};",
                op.operator().unwrap(),
                compile_to_type(env, rhs, &lhs_t)?
            );
        }
        BinOp::LeftShift | BinOp::RightShift
            if matches!(lhs_t, Type::Int { .. } | Type::Byte) =>
        {
            update_assignment = format!(
                "{lhs_code} {}= {};",
                op.operator().unwrap(),
                compile_to_type(env, rhs, &lhs_t)?
            );
        }
        BinOp::And if matches!(lhs_t, Type::Bool) => {
            update_assignment = format!(
                "if ({lhs_code}) {lhs_code} = {};",
                compile_to_type(env, rhs, &Type::Bool)?
            );
        }
        BinOp::Or if matches!(lhs_t, Type::Bool) => {
            update_assignment = format!(
                "if (!{lhs_code}) {lhs_code} = {};",
                compile_to_type(env, rhs, &Type::Bool)?
            );
        }
        _ => {}
    }

    if update_assignment.is_empty() {
        let binop_lhs = if needs_idempotency_fix {
            AstNode::literal_code("*lhs", lhs_t.clone())
        } else {
            lhs.clone()
        };
        let binop = ast.wrap(Ast::BinaryOp { op: *op, lhs: binop_lhs, rhs: rhs.clone() });
        update_assignment = format!("{lhs_code} = {};", compile_to_type(env, &binop, &lhs_t)?);
    }

    let code = if needs_idempotency_fix {
        format!(
            "{{ {} = &{}; {update_assignment} }}",
            compile_declaration(&Type::pointer_to(lhs_t.clone(), false), "lhs"),
            compile_lvalue(env, lhs)?
        )
    } else {
        update_assignment
    };
    Ok(with_source_info(env, ast, &code))
}

/// A braced statement block with its own scope.
pub fn compile_block(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    Ok(format!("{{\n{}}}\n", compile_inline_block(env, ast)?))
}

/// The statements of a block, in a fresh scope, without braces. Deferred
/// blocks registered inside are replayed on normal scope exit.
pub fn compile_inline_block(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Block { statements } = &ast.ast else {
        return compile_statement(env, ast);
    };
    let scope = fresh_scope(env);
    let deferred_baseline = scope.deferred.borrow().len();
    let mut code = String::new();
    for stmt in statements {
        prebind_statement(&scope, stmt)?;
    }
    let mut exits_early = false;
    for stmt in statements {
        code.push_str(&compile_statement(&scope, stmt)?);
        code.push('\n');
        bind_statement(&scope, stmt)?;
        if matches!(stmt.ast, Ast::Return { .. }) {
            exits_early = true;
        } else if matches!(get_type(&scope, stmt)?, Type::Abort) {
            exits_early = true;
        }
    }
    if !exits_early {
        let deferred: Vec<(Env, Rc<AstNode>)> = scope
            .deferred
            .borrow()
            .iter()
            .skip(deferred_baseline)
            .map(|d| (d.defer_env.clone(), d.block.clone()))
            .collect();
        for (defer_env, block) in deferred.iter().rev() {
            code.push_str(&compile_block(defer_env, block)?);
        }
    }
    scope.deferred.borrow_mut().truncate(deferred_baseline);
    Ok(code)
}

/// Mark a loop context's labels as used and return the goto.
pub fn goto_label(ctx: &Rc<LoopCtx>, skip: bool) -> String {
    if skip {
        ctx.used_skip.set(true);
        format!("goto {};", ctx.skip_label)
    } else {
        ctx.used_stop.set(true);
        format!("goto {};", ctx.stop_label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::global_env;

    #[test]
    fn declarations_emit_user_identifiers() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        let decl = AstNode::fake(Ast::Declare {
            var: AstNode::fake(Ast::Var("x".into())),
            type_ast: None,
            value: Some(AstNode::fake(Ast::Int { text: "42".into() })),
        });
        let code = compile_statement(&scope, &decl).unwrap();
        assert_eq!(code, "Int_t _$x = I_small(42);\n");
    }

    #[test]
    fn numeric_update_assignments_use_compound_operators() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        scope.set_binding("n", Type::int(64), "_$n");
        let update = AstNode::fake(Ast::UpdateAssign {
            op: BinOp::Plus,
            lhs: AstNode::fake(Ast::Var("n".into())),
            rhs: AstNode::fake(Ast::Int { text: "1".into() }),
        });
        let code = compile_statement(&scope, &update).unwrap();
        assert_eq!(code, "_$n += I64(1);");
    }

    #[test]
    fn non_discardable_expressions_are_rejected_as_statements() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        let stmt = AstNode::fake(Ast::Int { text: "5".into() });
        let err = compile_statement(&scope, &stmt).unwrap_err();
        assert_eq!(err.kind, crate::diagnostics::ErrorKind::ConstraintViolation);
    }

    #[test]
    fn deferred_blocks_replay_on_scope_exit() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        scope.set_binding("cleanup", Type::function(vec![], Type::Void), "do_cleanup");
        let block = AstNode::fake(Ast::Block {
            statements: vec![
                AstNode::fake(Ast::Defer {
                    body: AstNode::fake(Ast::Block {
                        statements: vec![AstNode::fake(Ast::FunctionCall {
                            fn_ast: AstNode::fake(Ast::Var("cleanup".into())),
                            args: vec![],
                        })],
                    }),
                }),
                AstNode::fake(Ast::Pass),
            ],
        });
        let code = compile_inline_block(&scope, &block).unwrap();
        assert!(code.contains("do_cleanup()"), "got: {code}");
        assert!(scope.deferred.borrow().is_empty());
    }
}
