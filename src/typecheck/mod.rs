//! The type checker: resolving type expressions, computing the type of
//! every AST node, and validating calls.
//!
//! Checking is fail-fast: any rule violation produces a spanned
//! [`CompileError`](crate::diagnostics::CompileError) and aborts the compile.

mod bind;
mod calls;

pub use bind::{bind_statement, load_module, prebind_statement};
pub use calls::{
    can_be_mutated, can_compile_to_type, get_arg_ast_type, get_arg_type, get_math_type,
    is_constant, is_discardable, is_valid_call, CallOpts,
};

use std::rc::Rc;

use crate::ast::{Ast, AstNode, BinOp, TypeAst, TypeAstNode, WhenClause};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{
    self, for_scope, fresh_scope, get_metamethod_binding, get_namespace_binding, with_enum_scope,
    Env,
};
use crate::types::{
    self, can_promote, compare_precision, get_iterated_type, has_stack_memory, is_int_type,
    is_numeric_type, most_complete_type, non_optional, type_eq, type_or_type, type_size,
    value_type, Arg, Precision, Type, LIST_MAX_STRIDE,
};

/// Resolve a textual type expression into a `Type`.
pub fn parse_type_ast(env: &Env, ast: &Rc<TypeAstNode>) -> CResult<Type> {
    match &ast.ast {
        TypeAst::Var { name } => {
            if let Some(t) = env.get_type(name) {
                return Ok(t);
            }
            // Dotted paths like `Mod.Sub.Name` walk through module bindings.
            let mut env = env.clone();
            let mut remaining = name.as_str();
            while let Some((module_name, rest)) = remaining.split_once('.') {
                let Some(b) = env.get_binding(module_name) else {
                    code_err!(ast, ErrorKind::UnknownName,
                        "I don't know a module with the name '{module_name}'");
                };
                let Type::Module { name: module_key } = &b.ty else {
                    code_err!(ast, ErrorKind::UnknownName,
                        "I don't know a module with the name '{module_name}'");
                };
                let imported = env.imports.borrow().get(module_key).cloned();
                let Some(imported) = imported else {
                    code_err!(ast, ErrorKind::UnknownName,
                        "I couldn't find the environment for the module '{module_name}'");
                };
                env = imported;
                remaining = rest;
                if let Some(t) = env.get_type(remaining) {
                    return Ok(t);
                }
            }
            code_err!(ast, ErrorKind::UnknownName, "I don't know a type with the name '{name}'")
        }
        TypeAst::Pointer { pointed, is_stack } => {
            let pointed_t = parse_type_ast(env, pointed)?;
            if matches!(pointed_t, Type::Void) {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "Void pointers are not supported. You probably meant 'Memory' instead of 'Void'");
            }
            Ok(Type::pointer_to(pointed_t, *is_stack))
        }
        TypeAst::List { item } => {
            let item_t = parse_type_ast(env, item)?;
            if has_stack_memory(&item_t) {
                code_err!(item, ErrorKind::ConstraintViolation,
                    "Lists can't have stack references because the list may outlive the stack frame");
            }
            if type_size(&item_t) > LIST_MAX_STRIDE {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "This list holds items that take up {} bytes, but the maximum supported size is {} bytes. Consider using a list of pointers instead",
                    type_size(&item_t), LIST_MAX_STRIDE);
            }
            Ok(Type::list_of(item_t))
        }
        TypeAst::Set { item } => {
            let item_t = parse_type_ast(env, item)?;
            if has_stack_memory(&item_t) {
                code_err!(item, ErrorKind::ConstraintViolation,
                    "Sets can't have stack references because the set may outlive the stack frame");
            }
            if type_size(&item_t) > LIST_MAX_STRIDE {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "This set holds items that take up {} bytes, but the maximum supported size is {} bytes. Consider using a set of pointers instead",
                    type_size(&item_t), LIST_MAX_STRIDE);
            }
            Ok(Type::set_of(item_t))
        }
        TypeAst::Table { key, value, default_value } => {
            let key_t = parse_type_ast(env, key)?;
            if has_stack_memory(&key_t) {
                code_err!(key, ErrorKind::ConstraintViolation,
                    "Tables can't have stack references because the table may outlive the stack frame");
            }
            let value_t = parse_type_ast(env, value)?;
            if has_stack_memory(&value_t) {
                code_err!(value, ErrorKind::ConstraintViolation,
                    "Tables can't have stack references because the table may outlive the stack frame");
            }
            if value_t.is_optional() {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "Tables with optional-typed values are not currently supported");
            }
            Ok(Type::Table(Rc::new(types::TableInfo {
                key: Some(key_t),
                value: Some(value_t),
                default_value: default_value.clone(),
                env: env.clone(),
            })))
        }
        TypeAst::Function { args, ret } => {
            let ret_t = match ret {
                Some(ret) => parse_type_ast(env, ret)?,
                None => Type::Void,
            };
            if has_stack_memory(&ret_t) {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "Functions are not allowed to return stack references, because the reference may no longer exist on the stack");
            }
            let mut type_args = vec![];
            for arg in args {
                let ty = if let Some(type_ast) = &arg.type_ast {
                    parse_type_ast(env, type_ast)?
                } else if let Some(value) = &arg.value {
                    get_type(env, value)?
                } else {
                    code_err!(ast, ErrorKind::MissingValue,
                        "This function argument has neither a type nor a default value");
                };
                type_args.push(Arg {
                    name: arg.name.clone().unwrap_or_default(),
                    ty: Some(ty),
                    default_val: arg.value.clone(),
                });
            }
            Ok(Type::closure(type_args, ret_t))
        }
        TypeAst::Optional { inner } => {
            let t = parse_type_ast(env, inner)?;
            if t.is_void_like() {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "Optional {t} types are not supported");
            }
            if t.is_optional() {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "Nested optional types are not currently supported");
            }
            Ok(Type::optional(t))
        }
        TypeAst::Unknown => {
            code_err!(ast, ErrorKind::IncompleteType, "I don't know how to get this type")
        }
    }
}

/// The type of a method on `self_ast`'s type, found in its namespace.
pub fn get_method_type(env: &Env, self_ast: &Rc<AstNode>, name: &str) -> CResult<Type> {
    match get_namespace_binding(env, self_ast, name)? {
        Some(b) => Ok(b.ty),
        None => {
            let t = get_type(env, self_ast)?;
            code_err!(self_ast, ErrorKind::UnknownName, "No such method: {t}.{name}(...)")
        }
    }
}

/// The function type declared by a `func`/`convert` definition.
pub fn get_function_def_type(env: &Env, ast: &Rc<AstNode>) -> CResult<Type> {
    let (arg_asts, ret_type) = match &ast.ast {
        Ast::FunctionDef { args, ret_type, .. } => (args, ret_type),
        Ast::ConvertDef { args, ret_type, .. } => (args, ret_type),
        _ => code_err!(ast, ErrorKind::InvalidExpression, "This is not a function definition"),
    };
    let scope = fresh_scope(env);
    let mut args = vec![];
    for arg in arg_asts {
        let t = get_arg_ast_type(env, arg)?;
        let name = arg.name.clone().unwrap_or_default();
        scope.set_binding(name.clone(), t.clone(), "");
        args.push(Arg { name, ty: Some(t), default_val: arg.value.clone() });
    }
    let ret = match ret_type {
        Some(ret_type) => parse_type_ast(&scope, ret_type)?,
        None => Type::Void,
    };
    if has_stack_memory(&ret) {
        code_err!(ast, ErrorKind::ConstraintViolation,
            "Functions can't return stack references because the reference may outlive its stack frame");
    }
    Ok(Type::function(args, ret))
}

/// Scope for one clause of a `when` over an enum: binds the clause's pattern
/// variables to the tag's payload fields (or the whole payload record for
/// the single-variable shorthand).
pub fn when_clause_scope(env: &Env, subject_t: &Type, clause: &WhenClause) -> CResult<Env> {
    if clause.pattern.ast.var_name().is_some() || !matches!(subject_t, Type::Enum(_)) {
        return Ok(env.clone());
    }
    let Ast::FunctionCall { fn_ast, args } = &clause.pattern.ast else {
        code_err!(clause.pattern, ErrorKind::InvalidExpression,
            "I only support variables and constructors for pattern matching {subject_t} types in a 'when' block");
    };
    let Some(tag_name) = fn_ast.ast.var_name() else {
        code_err!(clause.pattern, ErrorKind::InvalidExpression,
            "I only support variables and constructors for pattern matching {subject_t} types in a 'when' block");
    };
    let Type::Enum(info) = subject_t else { unreachable!() };
    let tag_payload = {
        let info = info.borrow();
        info.tags.iter().find(|tag| tag.name == tag_name).map(|tag| tag.payload.clone())
    };
    let Some(tag_payload) = tag_payload else {
        code_err!(clause.pattern, ErrorKind::UnknownName,
            "There is no tag '{tag_name}' for the type {subject_t}");
    };
    if args.is_empty() {
        return Ok(env.clone());
    }

    let scope = fresh_scope(env);
    let Type::Struct(payload_info) = &tag_payload else { return Ok(scope) };
    let fields = payload_info.borrow().fields.clone();

    // `Tag(rec)` binds the whole payload record when the tag has several
    // fields.
    if args.len() == 1 && fields.len() > 1 {
        let Some(value) = &args[0].value else {
            code_err!(clause.pattern, ErrorKind::InvalidExpression, "I expected a variable here");
        };
        let Some(name) = value.ast.var_name() else {
            code_err!(value, ErrorKind::InvalidExpression, "I expected a variable here");
        };
        scope.set_binding(name, tag_payload.clone(), "");
        return Ok(scope);
    }

    let mut fields_iter = fields.iter();
    for arg in args {
        let Some(field) = fields_iter.next() else {
            let site = arg.value.as_deref().unwrap_or(&clause.pattern);
            code_err!(site, ErrorKind::InvalidExpression,
                "This is one more field than {subject_t} has");
        };
        let Some(value) = &arg.value else {
            code_err!(clause.pattern, ErrorKind::InvalidExpression, "I expected a variable here");
        };
        let Some(name) = value.ast.var_name() else {
            code_err!(value, ErrorKind::InvalidExpression,
                "I expected this to be a plain variable so I could bind it to a value");
        };
        if name != "_" {
            let field_t = field.ty.clone().unwrap_or(Type::Optional(None));
            scope.set_binding(name, field_t, "");
        }
    }
    if let Some(field) = fields_iter.next() {
        code_err!(clause.pattern, ErrorKind::Exhaustiveness,
            "The field {subject_t}.{tag_name}.{} wasn't accounted for", field.name);
    }
    Ok(scope)
}

/// The type of a `when` clause's body, in the clause's pattern scope.
pub fn get_clause_type(env: &Env, subject_t: &Type, clause: &WhenClause) -> CResult<Type> {
    let scope = when_clause_scope(env, subject_t, clause)?;
    get_type(&scope, &clause.body)
}

fn text_type(env: &Env) -> Type {
    env.get_type("Text").expect("the global environment defines Text")
}

fn path_type(env: &Env) -> Type {
    env.get_type("Path").expect("the global environment defines Path")
}

/// Unwrap comprehension layers around a collection element, extending the
/// scope with each comprehension's loop variables.
fn comprehension_scope<'a>(env: &Env, mut item: &'a Rc<AstNode>) -> CResult<(Env, &'a Rc<AstNode>)> {
    let mut scope = env.clone();
    while let Ast::Comprehension { expr, vars, iter, .. } = &item.ast {
        let loop_ast = item.wrap(Ast::For {
            vars: vars.clone(),
            iter: iter.clone(),
            body: AstNode::fake(Ast::Pass),
            empty: None,
        });
        scope = for_scope(&scope, &loop_ast)?;
        item = expr;
    }
    Ok((scope, item))
}

/// Compute the type of an expression.
pub fn get_type(env: &Env, ast: &Rc<AstNode>) -> CResult<Type> {
    match &ast.ast {
        Ast::None => Ok(Type::Optional(None)),
        Ast::Bool(_) => Ok(Type::Bool),
        Ast::Int { .. } => Ok(Type::BigInt),
        Ast::Num { .. } => Ok(Type::num(64)),
        Ast::TextLiteral { .. } => Ok(text_type(env)),
        Ast::PathLiteral { .. } => Ok(path_type(env)),
        Ast::TextJoin { lang, .. } => match lang {
            Some(lang) => {
                let Some(b) = env.get_binding(lang) else {
                    code_err!(ast, ErrorKind::UnknownName,
                        "There is no text language called '{lang}'");
                };
                match &b.ty {
                    Type::TypeInfo(info) if matches!(info.ty, Type::Text(_)) => Ok(info.ty.clone()),
                    _ => code_err!(ast, ErrorKind::UnknownName,
                        "There is no text language called '{lang}'"),
                }
            }
            None => Ok(text_type(env)),
        },
        Ast::Var(name) => match env.get_binding(name) {
            Some(b) => Ok(b.ty),
            None => code_err!(ast, ErrorKind::UnknownName,
                "I don't know what '{name}' refers to"),
        },
        Ast::HeapAllocate { value } => {
            let pointed = get_type(env, value)?;
            if has_stack_memory(&pointed) {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "Stack references cannot be moved to the heap because they may outlive the stack frame they were created in");
            }
            Ok(Type::pointer_to(pointed, false))
        }
        Ast::StackReference { value } => match &value.ast {
            Ast::FieldAccess { .. } => {
                let mut base = value;
                while let Ast::FieldAccess { fielded, .. } = &base.ast {
                    base = fielded;
                }
                let ref_type = get_type(env, value)?;
                let base_type = get_type(env, base)?;
                if base_type.is_optional() {
                    code_err!(base, ErrorKind::ConstraintViolation,
                        "This value might be none, so it can't be safely dereferenced");
                }
                if let Type::Pointer { is_stack, .. } = &base_type {
                    return Ok(Type::pointer_to(ref_type, *is_stack));
                }
                if base.ast.var_name().is_some() {
                    return Ok(Type::pointer_to(ref_type, true));
                }
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "'&' stack references can only be used on the fields of pointers and local variables")
            }
            Ast::Index { .. } => code_err!(ast, ErrorKind::ConstraintViolation,
                "'&' stack references are not supported for list or table indexing"),
            _ => Ok(Type::pointer_to(get_type(env, value)?, true)),
        },
        Ast::Optional { value } => {
            let t = get_type(env, value)?;
            if t.is_optional() {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "This value is already optional, it can't be converted to optional");
            }
            Ok(Type::optional(t))
        }
        Ast::NonOptional { value } => {
            let t = get_type(env, value)?;
            let Type::Optional(inner) = &t else {
                code_err!(value, ErrorKind::TypeMismatch,
                    "This value is not optional. Only optional values can use the '!' operator");
            };
            match inner {
                Some(inner) => Ok((**inner).clone()),
                None => code_err!(value, ErrorKind::IncompleteType,
                    "I can't tell what type this `none` is supposed to be"),
            }
        }
        Ast::List { items } => {
            let mut item_type: Option<Type> = None;
            for item in items {
                let (scope, item_ast) = comprehension_scope(env, item)?;
                let t2 = get_type(&scope, item_ast)?;
                let merged = match &item_type {
                    Some(existing) => type_or_type(Some(existing), Some(&t2)),
                    None => Some(t2.clone()),
                };
                let Some(merged) = merged else {
                    code_err!(item, ErrorKind::TypeMismatch,
                        "This list item has type {t2}, which is different from earlier list items which have type {}",
                        item_type.as_ref().unwrap());
                };
                item_type = Some(merged);
            }
            if let Some(item_type) = &item_type {
                if has_stack_memory(item_type) {
                    code_err!(ast, ErrorKind::ConstraintViolation,
                        "Lists cannot hold stack references, because the list may outlive the stack frame the reference was created in");
                }
            }
            Ok(Type::List { item: item_type.map(Box::new) })
        }
        Ast::Set { items } => {
            let mut item_type: Option<Type> = None;
            for item in items {
                let (scope, item_ast) = comprehension_scope(env, item)?;
                let t2 = get_type(&scope, item_ast)?;
                let merged = match &item_type {
                    Some(existing) => type_or_type(Some(existing), Some(&t2)),
                    None => Some(t2.clone()),
                };
                let Some(merged) = merged else {
                    code_err!(item, ErrorKind::TypeMismatch,
                        "This set item has type {t2}, which is different from earlier set items which have type {}",
                        item_type.as_ref().unwrap());
                };
                item_type = Some(merged);
            }
            if let Some(item_type) = &item_type {
                if has_stack_memory(item_type) {
                    code_err!(ast, ErrorKind::ConstraintViolation,
                        "Sets cannot hold stack references because the set may outlive the reference's stack frame");
                }
            }
            Ok(Type::Set { item: item_type.map(Box::new) })
        }
        Ast::Table { default_value, entries, .. } => {
            let mut key_type: Option<Type> = None;
            let mut val_type: Option<Type> = None;
            for entry in entries {
                let (scope, entry_ast) = comprehension_scope(env, entry)?;
                let Ast::TableEntry { key, value } = &entry_ast.ast else {
                    code_err!(entry_ast, ErrorKind::InvalidExpression,
                        "Table entries must be `key = value` pairs");
                };
                let key_t = get_type(&scope, key)?;
                let value_t = get_type(&scope, value)?;
                let key_merged = match &key_type {
                    Some(existing) => type_or_type(Some(existing), Some(&key_t)),
                    None => Some(key_t.clone()),
                };
                let Some(key_merged) = key_merged else {
                    code_err!(entry, ErrorKind::TypeMismatch,
                        "This table entry has key type {key_t}, which is different from earlier table entries which have type {}",
                        key_type.as_ref().unwrap());
                };
                key_type = Some(key_merged);
                let val_merged = match &val_type {
                    Some(existing) => type_or_type(Some(existing), Some(&value_t)),
                    None => Some(value_t.clone()),
                };
                let Some(val_merged) = val_merged else {
                    code_err!(entry, ErrorKind::TypeMismatch,
                        "This table entry has value type {value_t}, which is different from earlier table entries which have type {}",
                        val_type.as_ref().unwrap());
                };
                val_type = Some(val_merged);
            }
            let stack = key_type.as_ref().map(has_stack_memory).unwrap_or(false)
                || val_type.as_ref().map(has_stack_memory).unwrap_or(false);
            if stack {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "Tables cannot hold stack references because the table may outlive the reference's stack frame");
            }
            Ok(Type::Table(Rc::new(types::TableInfo {
                key: key_type,
                value: val_type,
                default_value: default_value.clone(),
                env: env.clone(),
            })))
        }
        Ast::TableEntry { .. } => {
            code_err!(ast, ErrorKind::InvalidExpression,
                "Table entries should not be typechecked directly")
        }
        Ast::Comprehension { expr, vars, iter, .. } => {
            let loop_ast = ast.wrap(Ast::For {
                vars: vars.clone(),
                iter: iter.clone(),
                body: AstNode::fake(Ast::Pass),
                empty: None,
            });
            let scope = for_scope(env, &loop_ast)?;
            match &expr.ast {
                Ast::Comprehension { .. } => get_type(&scope, expr),
                Ast::TableEntry { key, value } => Ok(Type::Table(Rc::new(types::TableInfo {
                    key: Some(get_type(&scope, key)?),
                    value: Some(get_type(&scope, value)?),
                    default_value: None,
                    env: env.clone(),
                }))),
                _ => Ok(Type::list_of(get_type(&scope, expr)?)),
            }
        }
        Ast::FieldAccess { fielded, field } => {
            let fielded_t = get_type(env, fielded)?;
            if let Type::Module { name } = &fielded_t {
                let module_env = env.imports.borrow().get(name).cloned();
                let Some(module_env) = module_env else {
                    code_err!(fielded, ErrorKind::UnknownName,
                        "I couldn't find the environment for the module {name}");
                };
                return get_type(&module_env, &ast.wrap(Ast::Var(field.clone())));
            }
            if let Type::TypeInfo(info) = &fielded_t {
                let Some(b) = info.env.get_binding(field) else {
                    code_err!(ast, ErrorKind::UnknownName,
                        "I couldn't find the field '{field}' on this type");
                };
                return Ok(b.ty);
            }
            let value_t = value_type(&fielded_t);
            match &value_t {
                Type::Text(info) if info.lang != "Text" && field == "text" => Ok(text_type(env)),
                Type::Text(_) if field == "length" => Ok(Type::BigInt),
                Type::List { item } => match field.as_str() {
                    "length" => Ok(Type::BigInt),
                    _ => code_err!(ast, ErrorKind::UnknownName,
                        "There is no '{field}' field on [{}] lists",
                        item.as_deref().map(|t| t.to_string()).unwrap_or_default()),
                },
                Type::Set { item } => match field.as_str() {
                    "length" => Ok(Type::BigInt),
                    "items" => Ok(Type::List { item: item.clone() }),
                    _ => code_err!(ast, ErrorKind::UnknownName,
                        "There is no '{field}' field on sets"),
                },
                Type::Table(info) => match field.as_str() {
                    "length" => Ok(Type::BigInt),
                    "keys" => Ok(Type::List { item: info.key.clone().map(Box::new) }),
                    "values" => Ok(Type::List { item: info.value.clone().map(Box::new) }),
                    "fallback" => Ok(value_t.clone()),
                    _ => code_err!(ast, ErrorKind::UnknownName,
                        "There is no '{field}' field on tables"),
                },
                _ => match types::get_field_type(&value_t, field) {
                    Some(t) => Ok(t),
                    None => code_err!(ast, ErrorKind::UnknownName,
                        "{fielded_t} objects don't have a field called '{field}'"),
                },
            }
        }
        Ast::Index { indexed, index, .. } => {
            let indexed_t = get_type(env, indexed)?;
            if indexed_t.is_optional() && index.is_none() {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "You're attempting to dereference a value whose type indicates it could be none");
            }
            if let Type::Pointer { pointed, .. } = &indexed_t {
                if index.is_none() {
                    return Ok((**pointed).clone());
                }
            }
            let container_t = value_type(&indexed_t);
            match &container_t {
                Type::List { item } => {
                    let Some(index) = index else { return Ok(indexed_t) };
                    let index_t = get_type(env, index)?;
                    if is_int_type(&index_t) {
                        match item.as_deref() {
                            Some(item) => Ok(item.clone()),
                            None => code_err!(ast, ErrorKind::IncompleteType,
                                "I can't tell what this list holds"),
                        }
                    } else {
                        code_err!(index, ErrorKind::TypeMismatch,
                            "I only know how to index lists using integers, not {index_t}")
                    }
                }
                Type::Table(info) => {
                    let value = info.value.clone().unwrap_or(Type::Optional(None));
                    if info.default_value.is_some() {
                        Ok(value)
                    } else if value.is_optional() {
                        Ok(value)
                    } else {
                        Ok(Type::optional(value))
                    }
                }
                Type::Text(_) => Ok(container_t.clone()),
                _ => code_err!(ast, ErrorKind::TypeMismatch,
                    "I don't know how to index {indexed_t} values"),
            }
        }
        Ast::FunctionCall { fn_ast, args } => {
            let fn_type_t = get_type(env, fn_ast)?;
            if let Type::TypeInfo(info) = &fn_type_t {
                let t = &info.ty;
                let allow_underscores = env
                    .current_type
                    .as_ref()
                    .map(|cur| type_eq(cur, t))
                    .unwrap_or(false);
                let constructor =
                    environment::get_constructor(env, t, args, allow_underscores)?;
                if constructor.is_some() {
                    return Ok(t.clone());
                }
                if matches!(
                    t,
                    Type::Struct(_)
                        | Type::Int { .. }
                        | Type::BigInt
                        | Type::Num { .. }
                        | Type::Byte
                        | Type::Text(_)
                        | Type::CString
                ) {
                    return Ok(t.clone());
                }
                code_err!(fn_ast, ErrorKind::NoMatchingConstructor,
                    "This is not a type that has a constructor");
            }
            match fn_type_t.fn_info() {
                Some(info) => Ok(info.ret.clone()),
                None => code_err!(fn_ast, ErrorKind::TypeMismatch,
                    "This isn't a function, it's a {fn_type_t}"),
            }
        }
        Ast::MethodCall { self_ast, name, args } => {
            if name == "serialized" {
                return Ok(Type::list_of(Type::Byte));
            }
            let self_value_t = value_type(&get_type(env, self_ast)?);
            if matches!(self_value_t, Type::TypeInfo(_) | Type::Module { .. }) {
                let call = ast.wrap(Ast::FunctionCall {
                    fn_ast: self_ast.wrap(Ast::FieldAccess {
                        fielded: self_ast.clone(),
                        field: name.clone(),
                    }),
                    args: args.clone(),
                });
                return get_type(env, &call);
            }
            match &self_value_t {
                Type::List { item } => {
                    let item_type = || -> CResult<Type> {
                        match item.as_deref() {
                            Some(t) => Ok(t.clone()),
                            None => code_err!(self_ast, ErrorKind::IncompleteType,
                                "I can't tell what this list holds"),
                        }
                    };
                    match name.as_str() {
                        "binary_search" => Ok(Type::BigInt),
                        "by" | "from" | "reversed" | "sample" | "shuffled" | "slice"
                        | "sorted" | "to" => Ok(self_value_t.clone()),
                        "clear" | "heap_push" | "heapify" | "insert" | "insert_all"
                        | "remove_at" | "remove_item" | "shuffle" | "sort" => Ok(Type::Void),
                        "counts" => Ok(Type::Table(Rc::new(types::TableInfo {
                            key: Some(item_type()?),
                            value: Some(Type::BigInt),
                            default_value: None,
                            env: env.clone(),
                        }))),
                        "find" | "first" => Ok(Type::optional(Type::BigInt)),
                        "has" => Ok(Type::Bool),
                        "heap_pop" | "pop" => Ok(Type::optional(item_type()?)),
                        "random" => item_type(),
                        "unique" => Ok(Type::set_of(item_type()?)),
                        "where" => Ok(Type::optional(Type::BigInt)),
                        _ => code_err!(ast, ErrorKind::UnknownName,
                            "There is no '{name}' method for lists"),
                    }
                }
                Type::Set { .. } => match name.as_str() {
                    "add" | "add_all" | "clear" | "remove" | "remove_all" => Ok(Type::Void),
                    "has" | "is_subset_of" | "is_superset_of" => Ok(Type::Bool),
                    "overlap" | "with" | "without" => Ok(self_value_t.clone()),
                    _ => code_err!(ast, ErrorKind::UnknownName,
                        "There is no '{name}' method for sets"),
                },
                Type::Table(info) => {
                    let value_type = || -> CResult<Type> {
                        match &info.value {
                            Some(t) => Ok(t.clone()),
                            None => code_err!(self_ast, ErrorKind::IncompleteType,
                                "I can't tell what this table holds"),
                        }
                    };
                    match name.as_str() {
                        "clear" | "remove" | "set" => Ok(Type::Void),
                        "get" => Ok(Type::optional(value_type()?)),
                        "get_or_set" => value_type(),
                        "has" => Ok(Type::Bool),
                        "sorted" => Ok(self_value_t.clone()),
                        _ => code_err!(ast, ErrorKind::UnknownName,
                            "There is no '{name}' method for {self_value_t} tables"),
                    }
                }
                _ => {
                    let field_type = types::get_field_type(&self_value_t, name).map(|t| match t {
                        Type::Closure(info) => Type::Function(info),
                        other => other,
                    });
                    if let Some(Type::Function(info)) = field_type {
                        return Ok(info.ret.clone());
                    }
                    let fn_type_t = get_method_type(env, self_ast, name)?;
                    match &fn_type_t {
                        Type::Function(info) => Ok(info.ret.clone()),
                        _ => code_err!(ast, ErrorKind::TypeMismatch,
                            "This isn't a method, it's a {fn_type_t}"),
                    }
                }
            }
        }
        Ast::Block { statements } => {
            let Some(last) = statements.last() else { return Ok(Type::Void) };
            // Early out when the last statement's type needs no context:
            match &last.ast {
                Ast::UpdateAssign { .. }
                | Ast::Assign { .. }
                | Ast::Declare { .. }
                | Ast::FunctionDef { .. }
                | Ast::ConvertDef { .. }
                | Ast::StructDef { .. }
                | Ast::EnumDef { .. }
                | Ast::LangDef { .. }
                | Ast::Extend { .. } => return Ok(Type::Void),
                _ => {}
            }
            let block_env = fresh_scope(env);
            for stmt in statements {
                prebind_statement(&block_env, stmt)?;
            }
            for (i, stmt) in statements.iter().enumerate() {
                bind_statement(&block_env, stmt)?;
                if i + 1 < statements.len() {
                    if matches!(stmt.ast, Ast::Return { .. }) {
                        code_err!(stmt, ErrorKind::UnreachableCode,
                            "This statement will always return, so the rest of the code in this block is unreachable!");
                    }
                    let statement_type = get_type(&block_env, stmt)?;
                    if matches!(statement_type, Type::Abort) {
                        code_err!(stmt, ErrorKind::UnreachableCode,
                            "This statement will always abort, so the rest of the code in this block is unreachable!");
                    }
                }
            }
            get_type(&block_env, last)
        }
        Ast::Extern { type_ast, .. } => parse_type_ast(env, type_ast),
        Ast::Declare { .. }
        | Ast::Assign { .. }
        | Ast::UpdateAssign { .. }
        | Ast::DocTest { .. }
        | Ast::Assert { .. } => Ok(Type::Void),
        Ast::Use { path, what, .. } => Ok(Type::Module {
            name: bind::resolve_use_path(ast, path, *what),
        }),
        Ast::Return { value } => {
            let scoped;
            let env = if let Some(fn_ret) = &env.fn_ret {
                scoped = with_enum_scope(env, fn_ret);
                &scoped
            } else {
                env
            };
            let inner = match value {
                Some(value) => get_type(env, value)?,
                None => Type::Void,
            };
            Ok(Type::Return(Box::new(inner)))
        }
        Ast::Stop { .. } | Ast::Skip { .. } => Ok(Type::Abort),
        Ast::Pass | Ast::Defer { .. } => Ok(Type::Void),
        Ast::Negative { value } => {
            let t = get_type(env, value)?;
            if matches!(t, Type::Int { .. } | Type::BigInt | Type::Num { .. }) {
                return Ok(t);
            }
            if let Some(b) = get_namespace_binding(env, value, "negative")? {
                if let Type::Function(info) = &b.ty {
                    if let Some(first) = info.args.first() {
                        let arg_t = get_arg_type(env, first)?;
                        if type_eq(&t, &arg_t) && type_eq(&t, &info.ret) {
                            return Ok(t);
                        }
                    }
                }
            }
            code_err!(ast, ErrorKind::TypeMismatch,
                "I don't know how to get the negative value of type {t}")
        }
        Ast::Not { value } => {
            let t = get_type(env, value)?;
            if matches!(t, Type::Int { .. } | Type::BigInt | Type::Num { .. } | Type::Bool) {
                return Ok(t);
            }
            if t.is_optional() {
                return Ok(Type::Bool);
            }
            if let Some(b) = get_namespace_binding(env, value, "negated")? {
                if let Type::Function(info) = &b.ty {
                    if let Some(first) = info.args.first() {
                        let arg_t = get_arg_type(env, first)?;
                        if type_eq(&t, &arg_t) && type_eq(&t, &info.ret) {
                            return Ok(t);
                        }
                    }
                }
            }
            code_err!(ast, ErrorKind::TypeMismatch,
                "I only know how to get 'not' of boolean, numeric, and optional types, not {t}")
        }
        Ast::BinaryOp { op, lhs, rhs } => get_binary_op_type(env, ast, *op, lhs, rhs),
        Ast::Min { lhs, rhs, .. } | Ast::Max { lhs, rhs, .. } => {
            let lhs_t = get_type(env, lhs)?;
            let rhs_t = get_type(env, rhs)?;
            match type_or_type(Some(&lhs_t), Some(&rhs_t)) {
                Some(t) => Ok(t),
                None => code_err!(ast, ErrorKind::TypeMismatch,
                    "The two sides of this operation are not compatible: {lhs_t} vs {rhs_t}"),
            }
        }
        Ast::Reduction { op, key, iter } => {
            let iter_t = get_type(env, iter)?;
            if op.is_comparison() && !matches!(op, BinOp::Compare) {
                return Ok(Type::optional(Type::Bool));
            }
            let Some(mut iterated) = get_iterated_type(&iter_t) else {
                code_err!(iter, ErrorKind::TypeMismatch,
                    "I don't know how to do a reduction over {iter_t} values");
            };
            if let Some(key) = key {
                if !matches!(op, BinOp::Min | BinOp::Max) {
                    let item_scope = fresh_scope(env);
                    item_scope.set_binding("$", iterated.clone(), "");
                    iterated = get_type(&item_scope, key)?;
                }
            }
            if iterated.is_optional() {
                Ok(iterated)
            } else {
                Ok(Type::optional(iterated))
            }
        }
        Ast::Lambda { args: lambda_args, ret_type, body } => {
            let mut args = vec![];
            let scope = fresh_scope(env);
            for arg in lambda_args {
                let t = get_arg_ast_type(env, arg)?;
                let name = arg.name.clone().unwrap_or_default();
                scope.set_binding(name.clone(), t.clone(), "");
                args.push(Arg { name, ty: Some(t), default_val: None });
            }
            let mut ret = get_type(&scope, body)?;
            if let Type::Return(inner) = ret {
                ret = *inner;
            }
            if matches!(ret, Type::Abort) {
                ret = Type::Void;
            }
            if matches!(ret, Type::Optional(None)) {
                code_err!(body, ErrorKind::IncompleteType,
                    "This function doesn't return a specific optional type");
            }
            if let Some(ret_type) = ret_type {
                let declared = parse_type_ast(env, ret_type)?;
                if can_promote(&ret, &declared) {
                    ret = declared;
                } else {
                    code_err!(ast, ErrorKind::TypeMismatch,
                        "This function was declared to return a value of type {declared}, but actually returns a value of type {ret}");
                }
            }
            if has_stack_memory(&ret) {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "Functions can't return stack references because the reference may outlive its stack frame");
            }
            Ok(Type::closure(args, ret))
        }
        Ast::FunctionDef { .. }
        | Ast::ConvertDef { .. }
        | Ast::StructDef { .. }
        | Ast::EnumDef { .. }
        | Ast::LangDef { .. }
        | Ast::Extend { .. } => Ok(Type::Void),
        Ast::If { condition, body, else_body } => {
            let Some(else_body) = else_body else { return Ok(Type::Void) };
            let mut truthy_scope = env.clone();
            if let Ast::Declare { var, type_ast, value } = &condition.ast {
                let condition_type = match type_ast {
                    Some(type_ast) => parse_type_ast(env, type_ast)?,
                    None => match value {
                        Some(value) => get_type(env, value)?,
                        None => code_err!(condition, ErrorKind::MissingValue,
                            "This declaration must have a value"),
                    },
                };
                let Some(varname) = var.ast.var_name() else {
                    code_err!(condition, ErrorKind::InvalidExpression,
                        "This declaration needs a variable name");
                };
                if varname == "_" {
                    code_err!(condition, ErrorKind::InvalidExpression,
                        "To use `if var := ...:`, you must choose a real variable name, not `_`");
                }
                truthy_scope = fresh_scope(env);
                truthy_scope.set_binding(varname, non_optional(&condition_type), "");
            } else if let Ast::Var(varname) = &condition.ast {
                let condition_type = get_type(env, condition)?;
                if let Type::Optional(Some(inner)) = &condition_type {
                    truthy_scope = fresh_scope(env);
                    truthy_scope.set_binding(varname.clone(), (**inner).clone(), "");
                }
            }
            let true_t = get_type(&truthy_scope, body)?;
            let false_t = get_type(env, else_body)?;
            match type_or_type(Some(&true_t), Some(&false_t)) {
                Some(t) => Ok(t),
                None => code_err!(else_body, ErrorKind::TypeMismatch,
                    "I was expecting this block to have a {true_t} value (based on earlier clauses), but it actually has a {false_t} value"),
            }
        }
        Ast::When { subject, clauses, else_body } => {
            get_when_type(env, ast, subject, clauses, else_body.as_ref())
        }
        Ast::While { .. } | Ast::Repeat { .. } | Ast::For { .. } => Ok(Type::Void),
        Ast::InlineCCode { type_ast, .. } => match type_ast {
            Some(type_ast) => parse_type_ast(env, type_ast),
            None => Ok(Type::Void),
        },
        Ast::LiteralCode { ty, .. } => match ty {
            Some(ty) => Ok(ty.clone()),
            None => Ok(Type::Void),
        },
        Ast::Deserialize { type_ast, .. } => parse_type_ast(env, type_ast),
        Ast::ExplicitlyTyped { ty, .. } => Ok(ty.clone()),
        Ast::Unknown => code_err!(ast, ErrorKind::InvalidExpression,
            "I can't figure out the type of this"),
    }
}

fn get_binary_op_type(
    env: &Env,
    ast: &Rc<AstNode>,
    op: BinOp,
    lhs: &Rc<AstNode>,
    rhs: &Rc<AstNode>,
) -> CResult<Type> {
    let lhs_t = get_type(env, lhs)?;
    let rhs_t = get_type(env, rhs)?;

    match op {
        BinOp::Or | BinOp::And | BinOp::Xor => {
            // Integer literals re-type to match the other operand:
            if matches!(lhs.ast, Ast::Int { .. }) && is_int_type(&rhs_t) {
                return Ok(rhs_t);
            }
            if matches!(rhs.ast, Ast::Int { .. }) && is_int_type(&lhs_t) {
                return Ok(lhs_t);
            }

            if matches!(op, BinOp::Or) {
                // `opt? or (x == y)` is a boolean conditional:
                if (lhs_t.is_optional() && matches!(rhs_t, Type::Bool))
                    || (matches!(lhs_t, Type::Bool) && rhs_t.is_optional())
                {
                    return Ok(Type::Bool);
                }
            } else if (lhs_t.is_optional() || matches!(lhs_t, Type::Bool))
                && (rhs_t.is_optional() || matches!(rhs_t, Type::Bool))
            {
                return Ok(Type::Bool);
            }

            if type_eq(&lhs_t, &rhs_t)
                && get_metamethod_binding(env, op, lhs, rhs, &lhs_t)?.is_some()
            {
                return Ok(lhs_t);
            }

            if matches!(op, BinOp::Or) && lhs_t.is_optional() {
                if let Type::Optional(inner) = &lhs_t {
                    if rhs_t.is_optional() {
                        match most_complete_type(&lhs_t, &rhs_t) {
                            Some(result) => return Ok(result),
                            None => code_err!(ast, ErrorKind::TypeMismatch,
                                "I could not determine the type of {lhs_t} `or` {rhs_t}"),
                        }
                    }
                    if matches!(rhs_t, Type::Abort | Type::Return(_)) {
                        match inner.as_deref() {
                            Some(inner) => return Ok(inner.clone()),
                            None => code_err!(lhs, ErrorKind::IncompleteType,
                                "I can't tell what type this optional value is"),
                        }
                    }
                    let merged = match inner.as_deref() {
                        Some(inner) => most_complete_type(inner, &rhs_t),
                        None => Some(rhs_t.clone()),
                    };
                    if let Some(non_opt) = merged {
                        return Ok(non_opt);
                    }
                }
            }

            let bitwise_ok = (is_numeric_type(&lhs_t) || matches!(lhs_t, Type::Bool))
                && (is_numeric_type(&rhs_t) || matches!(rhs_t, Type::Bool))
                && !matches!(lhs_t, Type::Num { .. })
                && !matches!(rhs_t, Type::Num { .. });
            if bitwise_ok {
                if can_promote(&rhs_t, &lhs_t) {
                    return Ok(lhs_t);
                }
                if can_promote(&lhs_t, &rhs_t) {
                    return Ok(rhs_t);
                }
            }
            if matches!(lhs_t, Type::Set { .. }) && type_eq(&lhs_t, &rhs_t) {
                return Ok(lhs_t);
            }
            code_err!(ast, ErrorKind::TypeMismatch,
                "I couldn't figure out how to do `{op}` between {lhs_t} and {rhs_t}")
        }
        BinOp::Compare
        | BinOp::Equals
        | BinOp::NotEquals
        | BinOp::LessThan
        | BinOp::LessThanOrEquals
        | BinOp::GreaterThan
        | BinOp::GreaterThanOrEquals => {
            if (matches!(lhs.ast, Ast::Int { .. }) && is_numeric_type(&rhs_t))
                || (matches!(rhs.ast, Ast::Int { .. }) && is_numeric_type(&lhs_t))
                || can_promote(&rhs_t, &lhs_t)
                || can_promote(&lhs_t, &rhs_t)
            {
                return Ok(if matches!(op, BinOp::Compare) {
                    Type::int(32)
                } else {
                    Type::Bool
                });
            }
            code_err!(ast, ErrorKind::TypeMismatch,
                "I don't know how to compare {lhs_t} and {rhs_t}")
        }
        BinOp::Concat => {
            let overall_t = if can_promote(&rhs_t, &lhs_t) {
                Some(lhs_t.clone())
            } else if can_promote(&lhs_t, &rhs_t) {
                Some(rhs_t.clone())
            } else {
                None
            };
            let Some(overall_t) = overall_t else {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "I don't know how to do operations between {lhs_t} and {rhs_t}");
            };
            if get_metamethod_binding(env, op, lhs, rhs, &overall_t)?.is_some() {
                return Ok(overall_t);
            }
            if matches!(overall_t, Type::List { .. } | Type::Set { .. } | Type::Text(_)) {
                return Ok(overall_t);
            }
            code_err!(ast, ErrorKind::TypeMismatch,
                "I don't know how to do concatenation between {lhs_t} and {rhs_t}")
        }
        BinOp::Min | BinOp::Max => match type_or_type(Some(&lhs_t), Some(&rhs_t)) {
            Some(t) => Ok(t),
            None => code_err!(ast, ErrorKind::TypeMismatch,
                "The two sides of this operation are not compatible: {lhs_t} vs {rhs_t}"),
        },
        _ => {
            // Power, Multiply, Divide, Mod, Mod1, Plus, Minus, shifts.
            if matches!(
                op,
                BinOp::LeftShift
                    | BinOp::UnsignedLeftShift
                    | BinOp::RightShift
                    | BinOp::UnsignedRightShift
            ) && !is_int_type(&rhs_t)
            {
                code_err!(rhs, ErrorKind::TypeMismatch,
                    "I only know how to do bit shifting by integer amounts, not {rhs_t}");
            }

            if is_numeric_type(&lhs_t) && matches!(rhs.ast, Ast::Int { .. }) {
                return Ok(lhs_t);
            }
            if is_numeric_type(&rhs_t) && matches!(lhs.ast, Ast::Int { .. }) {
                return Ok(rhs_t);
            }
            match compare_precision(&lhs_t, &rhs_t) {
                Precision::Less => return Ok(rhs_t),
                Precision::More | Precision::Equal => return Ok(lhs_t),
                Precision::Incomparable => {
                    if can_compile_to_type(env, rhs, &lhs_t)? {
                        return Ok(lhs_t);
                    }
                    if can_compile_to_type(env, lhs, &rhs_t)? {
                        return Ok(rhs_t);
                    }
                }
            }

            // `scalar * T` via T's scaled_by, and `T / scalar` etc. via the
            // conventional method names:
            if matches!(op, BinOp::Multiply) && is_numeric_type(&lhs_t) {
                if scaled_by_applies(env, rhs, lhs, &rhs_t)? {
                    return Ok(rhs_t);
                }
            } else if matches!(op, BinOp::Multiply) && is_numeric_type(&rhs_t) {
                if scaled_by_applies(env, lhs, rhs, &lhs_t)? {
                    return Ok(lhs_t);
                }
            } else if matches!(op, BinOp::Divide | BinOp::Mod | BinOp::Mod1)
                && is_numeric_type(&rhs_t)
            {
                if let Some(method) = op.method_name() {
                    if lhs_method_applies(env, method, lhs, rhs, &lhs_t)? {
                        return Ok(lhs_t);
                    }
                }
            }

            let overall_t = if can_promote(&rhs_t, &lhs_t) {
                Some(lhs_t.clone())
            } else if can_promote(&lhs_t, &rhs_t) {
                Some(rhs_t.clone())
            } else {
                None
            };
            let Some(overall_t) = overall_t else {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "I don't know how to do math operations between {lhs_t} and {rhs_t}");
            };
            if get_metamethod_binding(env, op, lhs, rhs, &overall_t)?.is_some() {
                return Ok(overall_t);
            }
            if is_numeric_type(&lhs_t) && is_numeric_type(&rhs_t) {
                return Ok(overall_t);
            }
            code_err!(ast, ErrorKind::TypeMismatch,
                "I don't know how to do math operations between {lhs_t} and {rhs_t}")
        }
    }
}

/// Whether `subject`'s namespace has a `scaled_by` method accepting
/// `(subject, scalar)` and returning the subject's type.
fn scaled_by_applies(
    env: &Env,
    subject: &Rc<AstNode>,
    scalar: &Rc<AstNode>,
    subject_t: &Type,
) -> CResult<bool> {
    let Some(b) = get_namespace_binding(env, subject, "scaled_by")? else { return Ok(false) };
    let Type::Function(info) = &b.ty else { return Ok(false) };
    if !type_eq(&info.ret, subject_t) {
        return Ok(false);
    }
    let args = vec![
        crate::ast::ArgAst::positional(subject.clone()),
        crate::ast::ArgAst::positional(scalar.clone()),
    ];
    is_valid_call(env, &info.args, &args, CallOpts::promoting())
}

fn lhs_method_applies(
    env: &Env,
    method: &str,
    lhs: &Rc<AstNode>,
    rhs: &Rc<AstNode>,
    lhs_t: &Type,
) -> CResult<bool> {
    let Some(b) = get_namespace_binding(env, lhs, method)? else { return Ok(false) };
    let Type::Function(info) = &b.ty else { return Ok(false) };
    if !type_eq(&info.ret, lhs_t) {
        return Ok(false);
    }
    let args = vec![
        crate::ast::ArgAst::positional(lhs.clone()),
        crate::ast::ArgAst::positional(rhs.clone()),
    ];
    is_valid_call(env, &info.args, &args, CallOpts::promoting())
}

fn get_when_type(
    env: &Env,
    ast: &Rc<AstNode>,
    subject: &Rc<AstNode>,
    clauses: &[WhenClause],
    else_body: Option<&Rc<AstNode>>,
) -> CResult<Type> {
    let subject_t = get_type(env, subject)?;
    let Type::Enum(enum_info) = &subject_t else {
        // Non-enum `when` is a chain of equality tests:
        let mut t: Option<Type> = None;
        for clause in clauses {
            let clause_t = get_type(env, &clause.body)?;
            t = type_or_type(t.as_ref(), Some(&clause_t));
        }
        if let Some(else_body) = else_body {
            let else_t = get_type(env, else_body)?;
            t = type_or_type(t.as_ref(), Some(&else_t));
        } else if let Some(inner) = &t {
            if !inner.is_optional() && !inner.is_void_like() {
                t = Some(Type::optional(inner.clone()));
            }
        }
        return Ok(t.unwrap_or(Type::Void));
    };

    let tags: Vec<String> =
        enum_info.borrow().tags.iter().map(|tag| tag.name.clone()).collect();
    let mut handled = vec![false; tags.len()];

    for clause in clauses {
        let tag_name = match &clause.pattern.ast {
            Ast::Var(name) => name.clone(),
            Ast::FunctionCall { fn_ast, .. } => match fn_ast.ast.var_name() {
                Some(name) => name.to_string(),
                None => code_err!(clause.pattern, ErrorKind::InvalidExpression,
                    "This is not a valid pattern for a {subject_t} enum"),
            },
            _ => code_err!(clause.pattern, ErrorKind::InvalidExpression,
                "This is not a valid pattern for a {subject_t} enum"),
        };
        match tags.iter().position(|t| *t == tag_name) {
            Some(i) => {
                if handled[i] {
                    code_err!(clause.pattern, ErrorKind::Exhaustiveness,
                        "This tag was already handled earlier");
                }
                handled[i] = true;
            }
            None => {
                code_err!(clause.pattern, ErrorKind::UnknownName,
                    "There is no tag '{tag_name}' for the type {subject_t} (valid tags: {})",
                    tags.join(", "));
            }
        }
    }

    let mut overall_t: Option<Type> = None;
    for clause in clauses {
        let clause_type = get_clause_type(env, &subject_t, clause)?;
        let merged = type_or_type(overall_t.as_ref(), Some(&clause_type));
        let Some(merged) = merged else {
            code_err!(clause.body, ErrorKind::TypeMismatch,
                "The type of this branch is {clause_type}, which conflicts with the earlier branch type of {}",
                overall_t.as_ref().unwrap());
        };
        overall_t = Some(merged);
    }

    if let Some(else_body) = else_body {
        let any_unhandled = handled.iter().any(|h| !h);
        // A `while when ...` desugars with an implicit `else: stop` whose
        // source span is empty; that else is exempt from the dead-else check.
        if !any_unhandled && else_body.end > else_body.start {
            code_err!(else_body, ErrorKind::Exhaustiveness,
                "This 'else' block will never run because every tag is handled");
        }
        let else_t = get_type(env, else_body)?;
        match type_or_type(overall_t.as_ref(), Some(&else_t)) {
            Some(merged) => Ok(merged),
            None => code_err!(else_body, ErrorKind::TypeMismatch,
                "I was expecting this block to have a {} value (based on earlier clauses), but it actually has a {else_t} value",
                overall_t.as_ref().unwrap()),
        }
    } else {
        let unhandled: Vec<&String> = tags
            .iter()
            .zip(&handled)
            .filter(|(_, h)| !**h)
            .map(|(t, _)| t)
            .collect();
        if !unhandled.is_empty() {
            code_err!(ast, ErrorKind::Exhaustiveness,
                "This 'when' statement doesn't handle the tags: {}",
                unhandled.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "));
        }
        Ok(overall_t.unwrap_or(Type::Void))
    }
}

// Re-exported so the code generator can reuse the module path resolution.
pub(crate) use bind::resolve_use_path;

