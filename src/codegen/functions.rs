//! Function definitions, calls, argument compilation, lambdas and closure
//! capture, and memoizing (`cached`) wrappers.

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{ArgAst, Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{
    fresh_scope, get_namespace_binding, naming, with_enum_scope, Binding, Env, Table,
};
use crate::typecheck::{
    get_arg_ast_type, get_arg_type, get_method_type, get_type, is_valid_call, parse_type_ast,
    CallOpts,
};
use crate::types::{can_promote, get_field_type, has_stack_memory, type_eq, value_type, Arg, Type};

use super::expressions::{compile, compile_maybe_incref};
use super::integers::{compile_int_to_type, hex_double, parse_int_literal};
use super::promotions::compile_to_type;
use super::statements::{compile_inline_block, compile_statement, with_source_info};
use super::types::{compile_declaration, compile_type, compile_type_info};

/// Compile a call's arguments against a specification: keyword args fill
/// their slots, positional args fill the rest in order, and defaults fill
/// whatever remains. Numeric literals compile directly at the target width.
pub fn compile_arguments(
    env: &Env,
    call_ast: &Rc<AstNode>,
    spec_args: &[Arg],
    call_args: &[ArgAst],
) -> CResult<String> {
    // Defaults are evaluated in the definition's scope, not the call site's.
    let mut default_scope = env.clone();
    default_scope.locals = Table::shared_with_fallback(
        env.namespace_bindings.clone().unwrap_or_else(|| env.globals.clone()),
    );

    let compile_value = |value: &Rc<AstNode>, spec_type: &Type| -> CResult<String> {
        if matches!(spec_type, Type::Int { .. }) && matches!(value.ast, Ast::Int { .. }) {
            return compile_int_to_type(env, value, spec_type);
        }
        if let (Type::Num { bits }, Ast::Int { text }) = (spec_type, &value.ast) {
            let Some(n) = parse_int_literal(text) else {
                code_err!(value, ErrorKind::InvalidExpression, "Failed to parse this integer");
            };
            return Ok(if *bits == 32 {
                format!("{}f", hex_double(n as f32 as f64))
            } else {
                hex_double(n as f64)
            });
        }
        let arg_env = with_enum_scope(env, spec_type);
        compile_maybe_incref(&arg_env, value, spec_type)
    };

    let mut used_keywords: HashSet<&str> = HashSet::new();
    let mut positional = call_args.iter().filter(|a| a.name.is_none());
    let mut parts: Vec<String> = vec![];
    for spec_arg in spec_args {
        let spec_type = get_arg_type(env, spec_arg)?;
        let keyword = call_args
            .iter()
            .find(|a| a.name.as_deref() == Some(spec_arg.name.as_str()));
        if let Some(call_arg) = keyword {
            let Some(value) = &call_arg.value else {
                code_err!(call_ast, ErrorKind::MissingValue, "This argument has no value");
            };
            parts.push(compile_value(value, &spec_type)?);
            used_keywords.insert(spec_arg.name.as_str());
            continue;
        }
        if let Some(call_arg) = positional.next() {
            let Some(value) = &call_arg.value else {
                code_err!(call_ast, ErrorKind::MissingValue, "This argument has no value");
            };
            parts.push(compile_value(value, &spec_type)?);
            continue;
        }
        if let Some(default) = &spec_arg.default_val {
            parts.push(compile_maybe_incref(&default_scope, default, &spec_type)?);
            continue;
        }
        code_err!(call_ast, ErrorKind::MissingValue,
            "The required argument '{}' was not provided", spec_arg.name);
    }

    // Reject leftovers:
    for call_arg in call_args {
        if let Some(name) = &call_arg.name {
            if !used_keywords.contains(name.as_str())
                && !spec_args.iter().any(|s| s.name == *name)
            {
                let site = call_arg.value.as_deref().unwrap_or(call_ast);
                code_err!(site, ErrorKind::UnknownName,
                    "There is no argument with the name '{name}'");
            }
        }
    }
    if positional.next().is_some() {
        code_err!(call_ast, ErrorKind::InvalidExpression, "This is one argument too many!");
    }
    Ok(parts.join(", "))
}

pub fn compile_function_call(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::FunctionCall { fn_ast, args } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a function call");
    };
    let fn_t = get_type(env, fn_ast)?;
    match &fn_t {
        Type::Function(fn_info) => {
            let fn_code = compile(env, fn_ast)?;
            if !is_valid_call(env, &fn_info.args, args, CallOpts::promoting())? {
                if is_valid_call(
                    env,
                    &fn_info.args,
                    args,
                    CallOpts { promotion: true, underscores: true },
                )? {
                    code_err!(ast, ErrorKind::PrivateAccess,
                        "You can't pass underscore arguments to this function (those are private)");
                }
                code_err!(ast, ErrorKind::TypeMismatch,
                    "This function's public signature doesn't match this call site.\nThe signature is: {fn_t}");
            }
            Ok(format!("{fn_code}({})", compile_arguments(env, ast, &fn_info.args, args)?))
        }
        Type::TypeInfo(info) => {
            let t = &info.ty;
            // Literal constructors for numeric types like `Byte(123)` are
            // just a cast:
            if crate::types::is_numeric_type(t) && args.len() == 1 {
                if let Some(value) = &args[0].value {
                    if matches!(value.ast, Ast::Int { .. }) {
                        return compile_to_type(env, value, t);
                    }
                    if matches!(t, Type::Num { .. }) && matches!(value.ast, Ast::Num { .. }) {
                        return compile_to_type(env, value, t);
                    }
                }
            }
            let allow_underscores = env
                .current_type
                .as_ref()
                .map(|cur| type_eq(cur, t))
                .unwrap_or(false);
            if let Some(constructor) =
                crate::environment::get_constructor(env, t, args, allow_underscores)?
            {
                let Some(fn_info) = constructor.ty.fn_info() else { unreachable!() };
                return Ok(format!(
                    "{}({})",
                    constructor.code,
                    compile_arguments(env, ast, &fn_info.args, args)?
                ));
            }
            match t {
                Type::Text(text_info) => {
                    let [only] = &args[..] else {
                        code_err!(fn_ast, ErrorKind::NoMatchingConstructor,
                            "This constructor takes exactly 1 argument");
                    };
                    if text_info.lang != "Text" {
                        code_err!(fn_ast, ErrorKind::NoMatchingConstructor,
                            "I don't have a constructor defined for these arguments");
                    }
                    let Some(value) = &only.value else {
                        code_err!(fn_ast, ErrorKind::MissingValue, "This constructor needs a value");
                    };
                    let actual = get_type(env, value)?;
                    if type_eq(&actual, t) {
                        return compile(env, value);
                    }
                    Ok(super::text::expr_as_text(&compile(env, value)?, &actual, "no"))
                }
                Type::CString => {
                    let [only] = &args[..] else {
                        code_err!(fn_ast, ErrorKind::NoMatchingConstructor,
                            "This constructor takes exactly 1 argument");
                    };
                    let Some(value) = &only.value else {
                        code_err!(fn_ast, ErrorKind::MissingValue, "This constructor needs a value");
                    };
                    match &value.ast {
                        Ast::TextLiteral { text } => {
                            Ok(super::text::compile_text_literal(&text))
                        }
                        Ast::TextJoin { children, .. } if children.is_empty() => Ok("\"\"".into()),
                        Ast::TextJoin { children, .. } if children.len() == 1 => {
                            if let Ast::TextLiteral { text } = &children[0].ast {
                                Ok(super::text::compile_text_literal(text))
                            } else {
                                let actual = get_type(env, value)?;
                                Ok(format!(
                                    "Text$as_c_string({})",
                                    super::text::expr_as_text(&compile(env, value)?, &actual, "no")
                                ))
                            }
                        }
                        _ => {
                            let actual = get_type(env, value)?;
                            Ok(format!(
                                "Text$as_c_string({})",
                                super::text::expr_as_text(&compile(env, value)?, &actual, "no")
                            ))
                        }
                    }
                }
                Type::Struct(_) => super::structs::compile_struct_literal(env, ast, t, args),
                _ => code_err!(ast, ErrorKind::NoMatchingConstructor,
                    "I could not find a constructor matching these arguments for {t}"),
            }
        }
        Type::Closure(fn_info) => {
            // Calls through closures pass the userdata pointer as a final
            // argument to the type-erased function pointer.
            let mut closure_fn_args = fn_info.args.clone();
            closure_fn_args.push(Arg::new("userdata", Type::pointer_to(Type::Memory, false)));
            let fn_type_code =
                compile_type(&Type::function(closure_fn_args, fn_info.ret.clone()));
            let closure = compile(env, fn_ast)?;
            let mut arg_code = compile_arguments(env, ast, &fn_info.args, args)?;
            if !arg_code.is_empty() {
                arg_code.push_str(", ");
            }
            if fn_ast.ast.var_name().is_some() {
                Ok(format!("(({fn_type_code}){closure}.fn)({arg_code}{closure}.userdata)"))
            } else {
                Ok(format!(
                    "({{ Closure_t closure = {closure}; (({fn_type_code})closure.fn)({arg_code}closure.userdata); }})"
                ))
            }
        }
        _ => code_err!(fn_ast, ErrorKind::TypeMismatch,
            "This is not a function, it's a {fn_t}"),
    }
}

pub fn compile_method_call(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::MethodCall { self_ast, name, args } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a method call");
    };
    let self_t = get_type(env, self_ast)?;

    if name == "serialized" {
        if !args.is_empty() {
            code_err!(ast, ErrorKind::InvalidExpression, ".serialized() doesn't take any arguments");
        }
        return Ok(format!(
            "generic_serialize(({}[1]){{{}}}, {})",
            compile_type(&self_t),
            compile(env, self_ast)?,
            compile_type_info(&self_t)
        ));
    }

    let self_value_t = value_type(&self_t);
    if matches!(self_value_t, Type::TypeInfo(_) | Type::Module { .. }) {
        let call = ast.wrap(Ast::FunctionCall {
            fn_ast: self_ast
                .wrap(Ast::FieldAccess { fielded: self_ast.clone(), field: name.clone() }),
            args: args.clone(),
        });
        return compile(env, &call);
    }

    // Closure-typed fields can be called with method syntax:
    let field_type = get_field_type(&self_value_t, name).map(|t| match t {
        Type::Closure(info) => Type::Function(info),
        other => other,
    });
    if matches!(field_type, Some(Type::Function(_))) {
        let call = ast.wrap(Ast::FunctionCall {
            fn_ast: self_ast
                .wrap(Ast::FieldAccess { fielded: self_ast.clone(), field: name.clone() }),
            args: args.clone(),
        });
        return compile(env, &call);
    }

    match &self_value_t {
        Type::List { .. } => super::lists::compile_list_method_call(env, ast),
        Type::Set { .. } => super::sets::compile_set_method_call(env, ast),
        Type::Table(_) => super::tables::compile_table_method_call(env, ast),
        _ => {
            let fn_t = get_method_type(env, self_ast, name)?;
            let Type::Function(fn_info) = &fn_t else {
                code_err!(ast, ErrorKind::TypeMismatch, "This isn't a method, it's a {fn_t}");
            };
            let Some(b) = get_namespace_binding(env, self_ast, name)? else {
                code_err!(ast, ErrorKind::UnknownName, "No such method");
            };
            let mut full_args = vec![ArgAst::positional(self_ast.clone())];
            full_args.extend(args.iter().cloned());
            Ok(format!(
                "{}({})",
                b.code,
                compile_arguments(env, ast, &fn_info.args, &full_args)?
            ))
        }
    }
}

/// Collect the variables a lambda body closes over: every `Var` that
/// resolves to a binding in the enclosing scope and is not shadowed by the
/// lambda's own parameters or locals.
fn add_closed_vars(
    closed: &mut Table<Binding>,
    enclosing_scope: &Env,
    env: &Env,
    ast: &Rc<AstNode>,
) -> CResult<()> {
    let recurse = |closed: &mut Table<Binding>, env: &Env, node: &Rc<AstNode>| {
        add_closed_vars(closed, enclosing_scope, env, node)
    };
    match &ast.ast {
        Ast::Var(name) => {
            if let Some(b) = enclosing_scope.get_binding(name) {
                let shadow = env.get_binding(name);
                let same = shadow
                    .as_ref()
                    .map(|s| s.code == b.code && type_eq(&s.ty, &b.ty))
                    .unwrap_or(true);
                if same {
                    closed.set(name.clone(), b);
                }
            }
            Ok(())
        }
        Ast::Declare { value, .. } => {
            if let Some(value) = value {
                recurse(closed, env, value)?;
            }
            crate::typecheck::bind_statement(env, ast)
        }
        Ast::Assign { targets, values } => {
            for node in targets.iter().chain(values) {
                recurse(closed, env, node)?;
            }
            Ok(())
        }
        Ast::BinaryOp { lhs, rhs, .. } | Ast::UpdateAssign { lhs, rhs, .. } => {
            recurse(closed, env, lhs)?;
            recurse(closed, env, rhs)
        }
        Ast::Not { value }
        | Ast::Negative { value }
        | Ast::HeapAllocate { value }
        | Ast::StackReference { value }
        | Ast::Optional { value }
        | Ast::NonOptional { value } => recurse(closed, env, value),
        Ast::Min { lhs, rhs, key } | Ast::Max { lhs, rhs, key } => {
            recurse(closed, env, lhs)?;
            recurse(closed, env, rhs)?;
            if let Some(key) = key {
                recurse(closed, env, key)?;
            }
            Ok(())
        }
        Ast::TextJoin { children, .. } => {
            for child in children {
                recurse(closed, env, child)?;
            }
            Ok(())
        }
        Ast::List { items } | Ast::Set { items } => {
            for item in items {
                recurse(closed, env, item)?;
            }
            Ok(())
        }
        Ast::Table { default_value, fallback, entries } => {
            for node in default_value.iter().chain(fallback).chain(entries) {
                recurse(closed, env, node)?;
            }
            Ok(())
        }
        Ast::TableEntry { key, value } => {
            recurse(closed, env, key)?;
            recurse(closed, env, value)
        }
        Ast::Comprehension { expr, vars, iter, filter } => {
            let mut body: Rc<AstNode> = expr.clone();
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
            recurse(closed, env, &loop_ast)
        }
        Ast::Lambda { args, body, .. } => {
            let lambda_scope = fresh_scope(env);
            for arg in args {
                let arg_type = get_arg_ast_type(env, arg)?;
                let arg_name = arg.name.clone().unwrap_or_default();
                lambda_scope.set_binding(arg_name.clone(), arg_type, naming::user_id(&arg_name));
            }
            add_closed_vars(closed, enclosing_scope, &lambda_scope, body)
        }
        Ast::FunctionCall { fn_ast, args } => {
            recurse(closed, env, fn_ast)?;
            for arg in args {
                if let Some(value) = &arg.value {
                    recurse(closed, env, value)?;
                }
            }
            Ok(())
        }
        Ast::MethodCall { self_ast, args, .. } => {
            recurse(closed, env, self_ast)?;
            for arg in args {
                if let Some(value) = &arg.value {
                    recurse(closed, env, value)?;
                }
            }
            Ok(())
        }
        Ast::Block { statements } => {
            let block_env = fresh_scope(env);
            for stmt in statements {
                add_closed_vars(closed, enclosing_scope, &block_env, stmt)?;
            }
            Ok(())
        }
        Ast::For { iter, body, empty, .. } => {
            recurse(closed, env, iter)?;
            let body_scope = crate::environment::for_scope(env, ast)?;
            add_closed_vars(closed, enclosing_scope, &body_scope, body)?;
            if let Some(empty) = empty {
                recurse(closed, env, empty)?;
            }
            Ok(())
        }
        Ast::While { condition, body } => {
            recurse(closed, env, condition)?;
            let scope = fresh_scope(env);
            add_closed_vars(closed, enclosing_scope, &scope, body)
        }
        Ast::Repeat { body } => recurse(closed, env, body),
        Ast::If { condition, body, else_body } => {
            if let Ast::Declare { var, value, .. } = &condition.ast {
                let truthy_scope = fresh_scope(env);
                crate::typecheck::bind_statement(&truthy_scope, condition)?;
                if let Some(value) = value {
                    recurse(closed, env, value)?;
                }
                if let Some(var_name) = var.ast.var_name() {
                    let cond_t = get_type(&truthy_scope, var)?;
                    if let Type::Optional(Some(inner)) = &cond_t {
                        truthy_scope.set_binding(var_name, (**inner).clone(), "");
                    }
                }
                add_closed_vars(closed, enclosing_scope, &truthy_scope, body)?;
            } else {
                recurse(closed, env, condition)?;
                let mut truthy_scope = env.clone();
                let cond_t = get_type(env, condition)?;
                if let (Ast::Var(var_name), Type::Optional(Some(inner))) =
                    (&condition.ast, &cond_t)
                {
                    truthy_scope = fresh_scope(env);
                    truthy_scope.set_binding(var_name.clone(), (**inner).clone(), "");
                }
                add_closed_vars(closed, enclosing_scope, &truthy_scope, body)?;
            }
            if let Some(else_body) = else_body {
                recurse(closed, env, else_body)?;
            }
            Ok(())
        }
        Ast::When { subject, clauses, else_body } => {
            recurse(closed, env, subject)?;
            let subject_t = get_type(env, subject)?;
            for clause in clauses {
                if matches!(subject_t, Type::Enum(_)) {
                    let scope = crate::typecheck::when_clause_scope(env, &subject_t, clause)?;
                    add_closed_vars(closed, enclosing_scope, &scope, &clause.body)?;
                } else {
                    recurse(closed, env, &clause.pattern)?;
                    recurse(closed, env, &clause.body)?;
                }
            }
            if let Some(else_body) = else_body {
                recurse(closed, env, else_body)?;
            }
            Ok(())
        }
        Ast::Reduction { key, iter, .. } => {
            recurse(closed, env, iter)?;
            let item = AstNode::fake(Ast::Var(format!("$it{}", ast.start)));
            let loop_ast = ast.wrap(Ast::For {
                vars: vec![item.clone()],
                iter: iter.clone(),
                body: AstNode::fake(Ast::Pass),
                empty: None,
            });
            let scope = crate::environment::for_scope(env, &loop_ast)?;
            match key {
                Some(key) => add_closed_vars(closed, enclosing_scope, &scope, key),
                None => add_closed_vars(closed, enclosing_scope, &scope, &item),
            }
        }
        Ast::Defer { body } => recurse(closed, env, body),
        Ast::Return { value } => {
            if let Some(value) = value {
                recurse(closed, env, value)?;
            }
            Ok(())
        }
        Ast::Index { indexed, index, .. } => {
            recurse(closed, env, indexed)?;
            if let Some(index) = index {
                recurse(closed, env, index)?;
            }
            Ok(())
        }
        Ast::FieldAccess { fielded, .. } => recurse(closed, env, fielded),
        Ast::DocTest { expr, expected } => {
            recurse(closed, env, expr)?;
            if let Some(expected) = expected {
                recurse(closed, env, expected)?;
            }
            Ok(())
        }
        Ast::Assert { expr, message } => {
            recurse(closed, env, expr)?;
            if let Some(message) = message {
                recurse(closed, env, message)?;
            }
            Ok(())
        }
        Ast::Deserialize { value, .. } => recurse(closed, env, value),
        Ast::ExplicitlyTyped { ast: inner, .. } => recurse(closed, env, inner),
        Ast::InlineCCode { chunks, .. } => {
            for chunk in chunks {
                if !matches!(chunk.ast, Ast::TextLiteral { .. }) {
                    recurse(closed, env, chunk)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// The captured-variable table for a lambda with the given parameters.
pub fn get_closed_vars(env: &Env, args: &[ArgAst], block: &Rc<AstNode>) -> CResult<Table<Binding>> {
    let body_scope = fresh_scope(env);
    for arg in args {
        let arg_type = get_arg_ast_type(env, arg)?;
        let arg_name = arg.name.clone().unwrap_or_default();
        body_scope.set_binding(arg_name.clone(), arg_type, naming::user_id(&arg_name));
    }
    let mut closed = Table::new();
    add_closed_vars(&mut closed, env, &body_scope, block)?;
    Ok(closed)
}

/// Compile a lambda: a static top-level function (with a trailing userdata
/// parameter when it captures), a userdata struct typedef, and a
/// `Closure_t` literal at the expression site.
pub fn compile_lambda(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Lambda { args, ret_type, body } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a lambda");
    };
    let name = naming::namespace_name(
        env,
        env.namespace.as_ref(),
        &format!("lambda${}", ast.start),
    );

    let mut body_scope = fresh_scope(env);
    body_scope.deferred = Rc::new(std::cell::RefCell::new(vec![]));
    for arg in args {
        let arg_type = get_arg_ast_type(env, arg)?;
        let arg_name = arg.name.clone().unwrap_or_default();
        body_scope.set_binding(arg_name.clone(), arg_type, naming::user_id(&arg_name));
    }

    let mut ret_t = get_type(&body_scope, body)?;
    if let Type::Return(inner) = ret_t {
        ret_t = *inner;
    }
    if matches!(ret_t, Type::Abort) {
        ret_t = Type::Void;
    }
    if let Some(ret_type) = ret_type {
        let declared = parse_type_ast(env, ret_type)?;
        if can_promote(&ret_t, &declared) {
            ret_t = declared;
        } else {
            code_err!(ast, ErrorKind::TypeMismatch,
                "This function was declared to return a value of type {declared}, but actually returns a value of type {ret_t}");
        }
    }
    if crate::types::is_incomplete_type(&ret_t) {
        code_err!(body, ErrorKind::IncompleteType,
            "This function doesn't return a specific type");
    }
    body_scope.fn_ret = Some(ret_t.clone());

    let closed_vars = get_closed_vars(env, args, body)?;
    let captures = closed_vars.entries();
    let captures: Vec<(String, Binding)> = captures
        .into_iter()
        .filter(|(_, b)| !matches!(b.ty, Type::Module { .. } | Type::TypeInfo(_)))
        .collect();

    if !captures.is_empty() {
        let mut def = "typedef struct {".to_string();
        for (capture_name, b) in &captures {
            if has_stack_memory(&b.ty) {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "This function is holding onto a reference to {} stack memory in the variable `{capture_name}`, but the function may outlive the stack memory",
                    b.ty);
            }
            body_scope.set_binding(
                capture_name.clone(),
                b.ty.clone(),
                format!("userdata->{}", naming::valid_c_name(capture_name)),
            );
            def.push_str(&compile_declaration(&b.ty, &naming::valid_c_name(capture_name)));
            def.push_str("; ");
        }
        def.push_str(&format!("}} {name}$userdata_t;"));
        env.code.borrow_mut().local_typedefs.push_str(&def);
        env.code.borrow_mut().local_typedefs.push('\n');
    }

    let mut code = format!("static {} {name}(", compile_type(&ret_t));
    for arg in args {
        let arg_type = get_arg_ast_type(env, arg)?;
        code.push_str(&format!(
            "{} {}, ",
            compile_type(&arg_type),
            naming::user_id(arg.name.as_deref().unwrap_or(""))
        ));
    }
    let userdata = if captures.is_empty() {
        code.push_str("void *_)");
        "NULL".to_string()
    } else {
        let mut userdata = format!("new({name}$userdata_t");
        for (capture_name, b) in &captures {
            let binding = env.get_binding(capture_name).unwrap_or_else(|| b.clone());
            let binding_code = if binding.code.is_empty() {
                naming::user_id(capture_name)
            } else {
                binding.code
            };
            match &b.ty {
                Type::List { .. } => userdata.push_str(&format!(", LIST_COPY({binding_code})")),
                Type::Table(_) | Type::Set { .. } => {
                    userdata.push_str(&format!(", TABLE_COPY({binding_code})"))
                }
                _ => userdata.push_str(&format!(", {binding_code}")),
            }
        }
        userdata.push(')');
        code.push_str(&format!("{name}$userdata_t *userdata)"));
        userdata
    };

    let mut body_code = String::new();
    let statements: Vec<Rc<AstNode>> = match &body.ast {
        Ast::Block { statements } => statements.clone(),
        _ => vec![body.clone()],
    };
    for (i, stmt) in statements.iter().enumerate() {
        let is_last = i + 1 == statements.len();
        let stmt_t = get_type(&body_scope, stmt)?;
        if !is_last
            || ret_t.is_void_like()
            || matches!(stmt_t, Type::Return(_) | Type::Abort)
        {
            body_code.push_str(&compile_statement(&body_scope, stmt)?);
        } else {
            let ret_stmt = stmt.wrap(Ast::Return { value: Some(stmt.clone()) });
            body_code.push_str(&compile_statement(&body_scope, &ret_stmt)?);
        }
        body_code.push('\n');
        crate::typecheck::bind_statement(&body_scope, stmt)?;
    }
    if ret_t.is_void_like() && !body_scope.deferred.borrow().is_empty() {
        let ret_stmt = AstNode::fake(Ast::Return { value: None });
        body_code.push_str(&compile_statement(&body_scope, &ret_stmt)?);
        body_code.push('\n');
    }

    env.code
        .borrow_mut()
        .lambdas
        .push_str(&format!("{code} {{\n{body_code}\n}}\n"));
    Ok(format!("((Closure_t){{{name}, {userdata}}})"))
}

/// The header-facing declaration of a function definition.
pub fn compile_function_declaration(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::FunctionDef { name, args, ret_type, .. } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a function definition");
    };
    let Some(decl_name) = name.ast.var_name() else {
        code_err!(name, ErrorKind::InvalidExpression, "This function needs a name");
    };
    if decl_name.starts_with('_') {
        return Ok(String::new());
    }
    let mut arg_signature = "(".to_string();
    for (i, arg) in args.iter().enumerate() {
        let arg_type = get_arg_ast_type(env, arg)?;
        if i > 0 {
            arg_signature.push_str(", ");
        }
        arg_signature.push_str(&compile_declaration(
            &arg_type,
            &naming::user_id(arg.name.as_deref().unwrap_or("")),
        ));
    }
    arg_signature.push(')');

    let ret_t = match ret_type {
        Some(ret_type) => parse_type_ast(env, ret_type)?,
        None => Type::Void,
    };
    let mut ret_type_code = compile_type(&ret_t);
    if matches!(ret_t, Type::Abort) {
        ret_type_code = format!("__attribute__((noreturn)) _Noreturn {ret_type_code}");
    }
    let mut fn_name =
        naming::namespace_name(env, env.namespace.as_ref(), &naming::valid_c_name(decl_name));
    if let Some(ns) = &env.namespace {
        // A method named after its own type would collide with the type's
        // constructor names, so it gets a line-number suffix.
        if ns.parent.is_some() && decl_name == ns.name {
            fn_name = naming::namespace_name(
                env,
                env.namespace.as_ref(),
                &ast.line_number().to_string(),
            );
        }
    }
    Ok(format!("{ret_type_code} {fn_name}{arg_signature};\n"))
}

/// The header-facing declaration of a convert definition.
pub fn compile_convert_declaration(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::ConvertDef { args, ret_type, .. } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a convert definition");
    };
    let mut arg_signature = "(".to_string();
    for (i, arg) in args.iter().enumerate() {
        let arg_type = get_arg_ast_type(env, arg)?;
        if i > 0 {
            arg_signature.push_str(", ");
        }
        arg_signature.push_str(&compile_declaration(
            &arg_type,
            &naming::user_id(arg.name.as_deref().unwrap_or("")),
        ));
    }
    arg_signature.push(')');

    let ret_t = match ret_type {
        Some(ret_type) => parse_type_ast(env, ret_type)?,
        None => Type::Void,
    };
    let Some(type_name) = crate::types::get_type_name(&ret_t) else {
        code_err!(ast, ErrorKind::TypeMismatch,
            "Conversions are only supported for text, struct, and enum types, not {ret_t}");
    };
    let name_code = naming::namespace_name(
        env,
        env.namespace.as_ref(),
        &format!("{type_name}${}", ast.line_number()),
    );
    Ok(format!("{} {name_code}{arg_signature};\n", compile_type(&ret_t)))
}

/// Compile a function (or convert) definition's C definition, plus its
/// cached wrapper when `cached` is requested.
pub fn compile_function(
    env: &Env,
    name_code: &str,
    ast: &Rc<AstNode>,
    staticdefs: &mut String,
) -> CResult<String> {
    let (function_name, args, ret_type, body, cache, is_inline) = match &ast.ast {
        Ast::FunctionDef { name, args, ret_type, body, cache, is_inline } => {
            let Some(fn_name) = name.ast.var_name() else {
                code_err!(name, ErrorKind::InvalidExpression, "This function needs a name");
            };
            (fn_name.to_string(), args, ret_type, body, cache, *is_inline)
        }
        Ast::ConvertDef { args, ret_type, body, cache, is_inline } => {
            let ret_t = match ret_type {
                Some(ret_type) => parse_type_ast(env, ret_type)?,
                None => Type::Void,
            };
            let Some(type_name) = crate::types::get_type_name(&ret_t) else {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "Conversions are only supported for text, struct, and enum types, not {ret_t}");
            };
            (type_name, args, ret_type, body, cache, *is_inline)
        }
        _ => code_err!(ast, ErrorKind::InvalidExpression, "This is not a function definition"),
    };
    let is_private = function_name.starts_with('_');

    let mut arg_signature = "(".to_string();
    let mut used_names: HashSet<&str> = HashSet::new();
    for (i, arg) in args.iter().enumerate() {
        let arg_type = get_arg_ast_type(env, arg)?;
        if i > 0 {
            arg_signature.push_str(", ");
        }
        let arg_name = arg.name.as_deref().unwrap_or("");
        arg_signature.push_str(&compile_declaration(&arg_type, &naming::user_id(arg_name)));
        if !used_names.insert(arg_name) {
            code_err!(ast, ErrorKind::ConstraintViolation,
                "The argument name '{arg_name}' is used more than once");
        }
    }
    arg_signature.push(')');

    let ret_t = match ret_type {
        Some(ret_type) => parse_type_ast(env, ret_type)?,
        None => Type::Void,
    };
    let mut ret_type_code = compile_type(&ret_t);
    if matches!(ret_t, Type::Abort) {
        ret_type_code = format!("__attribute__((noreturn)) _Noreturn {ret_type_code}");
    }

    if is_private {
        staticdefs.push_str(&format!("static {ret_type_code} {name_code}{arg_signature};\n"));
    }

    let mut code = if cache.is_some() {
        format!("static {ret_type_code} {name_code}$uncached{arg_signature}")
    } else {
        let mut code = format!("{ret_type_code} {name_code}{arg_signature}");
        if is_inline {
            code = format!("INLINE {code}");
        }
        if !is_private {
            code = format!("public {code}");
        }
        code
    };

    // The body runs outside any namespace: methods see module-level names,
    // not their siblings, without qualification.
    let mut body_scope = fresh_scope(env);
    {
        let mut fallback = env.locals.clone();
        let mut ns = env.namespace.clone();
        while let Some(n) = ns {
            let next = fallback.borrow().fallback.clone();
            if let Some(next) = next {
                fallback = next;
            }
            ns = n.parent.clone();
        }
        body_scope.locals = Table::shared_with_fallback(fallback);
        body_scope.namespace = None;
    }
    body_scope.deferred = Rc::new(std::cell::RefCell::new(vec![]));
    for arg in args {
        let arg_type = get_arg_ast_type(env, arg)?;
        let arg_name = arg.name.clone().unwrap_or_default();
        body_scope.set_binding(arg_name.clone(), arg_type, naming::user_id(&arg_name));
    }
    body_scope.fn_ret = Some(ret_t.clone());

    let body_type = get_type(&body_scope, body)?;
    match &ret_t {
        Type::Abort => {
            if !matches!(body_type, Type::Abort) {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "This function can reach the end without aborting!");
            }
        }
        Type::Void => {
            if matches!(body_type, Type::Abort) {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "This function will always abort before it reaches the end, but it's declared as having a Void return. It should be declared as an Abort return instead.");
            }
        }
        _ => {
            if !matches!(body_type, Type::Return(_) | Type::Abort) {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "This function looks like it can reach the end without returning a {ret_t} value!");
            }
        }
    }

    let body_code = format!("{{\n{}}}\n", compile_inline_block(&body_scope, body)?);
    code.push(' ');
    code.push_str(&body_code);
    let mut definition = with_source_info(env, ast, &code);
    definition.push('\n');

    if let Some(cache) = cache {
        definition.push_str(&compile_cache_wrapper(
            env,
            name_code,
            &ret_type_code,
            &ret_t,
            &arg_signature,
            args,
            cache,
            is_private,
        )?);
    }
    Ok(definition)
}

#[allow(clippy::too_many_arguments)]
fn compile_cache_wrapper(
    env: &Env,
    name_code: &str,
    ret_type_code: &str,
    ret_t: &Type,
    arg_signature: &str,
    args: &[ArgAst],
    cache: &Rc<AstNode>,
    is_private: bool,
) -> CResult<String> {
    let public = if is_private { "" } else { "public " };

    if args.is_empty() {
        // No-arg cached functions just use a static variable.
        return Ok(format!(
            "{public}{ret_type_code} {name_code}(void) {{\nstatic {cached_decl};\nstatic bool initialized = false;\nif (!initialized) {{\n\tcached_result = {name_code}$uncached();\n\tinitialized = true;\n}}\nreturn cached_result;\n}}\n",
            cached_decl = compile_declaration(ret_t, "cached_result"),
        ));
    }

    let cache_size = match &cache.ast {
        Ast::Int { text } => parse_int_literal(text).unwrap_or(0),
        _ => 0,
    };
    let pop_code = if cache_size > 0 {
        format!(
            "if (cache.entries.length > {cache_size}) Table$remove(&cache, cache.entries.data + cache.entries.stride*0, table_type);\n"
        )
    } else {
        String::new()
    };

    if args.len() == 1 {
        let arg_name = args[0].name.as_deref().unwrap_or("");
        let arg_type = get_arg_ast_type(env, &args[0])?;
        let arg_id = naming::user_id(arg_name);
        return Ok(format!(
            "{public}{ret_type_code} {name_code}{arg_signature}{{\nstatic Table_t cache = {{}};\nconst TypeInfo_t *table_type = Table$info({arg_info}, {ret_info});\n{cached_decl} = Table$get_raw(cache, &{arg_id}, table_type);\nif (cached) return *cached;\n{ret_decl} = {name_code}$uncached({arg_id});\n{pop_code}Table$set(&cache, &{arg_id}, &ret, table_type);\nreturn ret;\n}}\n",
            arg_info = compile_type_info(&arg_type),
            ret_info = compile_type_info(ret_t),
            cached_decl = compile_declaration(&Type::pointer_to(ret_t.clone(), false), "cached"),
            ret_decl = compile_declaration(ret_t, "ret"),
        ));
    }

    // Multi-argument caches key on a synthesized argument struct.
    let mut args_type = "struct { ".to_string();
    let mut args_typeinfo = format!(
        "((TypeInfo_t[1]){{{{.size=sizeof(args), .align=__alignof__(args), .metamethods=Struct$metamethods, .tag=StructInfo, .StructInfo.name=\"FunctionArguments\", .StructInfo.num_fields={}, .StructInfo.fields=(NamedType_t[{}]){{",
        args.len(),
        args.len()
    );
    let mut all_args = String::new();
    for (i, arg) in args.iter().enumerate() {
        let arg_type = get_arg_ast_type(env, arg)?;
        let arg_name = arg.name.as_deref().unwrap_or("");
        args_type.push_str(&compile_declaration(&arg_type, &naming::valid_c_name(arg_name)));
        args_type.push_str("; ");
        args_typeinfo.push_str(&format!(
            "{{\"{arg_name}\", {}}}",
            compile_type_info(&arg_type)
        ));
        if i + 1 < args.len() {
            args_typeinfo.push_str(", ");
        }
        all_args.push_str(&naming::user_id(arg_name));
        if i + 1 < args.len() {
            all_args.push_str(", ");
        }
    }
    args_type.push('}');
    args_typeinfo.push_str("}}})");

    Ok(format!(
        "{public}{ret_type_code} {name_code}{arg_signature}{{\nstatic Table_t cache = {{}};\n{args_type} args = {{{all_args}}};\nconst TypeInfo_t *table_type = Table$info({args_typeinfo}, {ret_info});\n{cached_decl} = Table$get_raw(cache, &args, table_type);\nif (cached) return *cached;\n{ret_decl} = {name_code}$uncached({all_args});\n{pop_code}Table$set(&cache, &args, &ret, table_type);\nreturn ret;\n}}\n",
        ret_info = compile_type_info(ret_t),
        cached_decl = compile_declaration(&Type::pointer_to(ret_t.clone(), false), "cached"),
        ret_decl = compile_declaration(ret_t, "ret"),
    ))
}
