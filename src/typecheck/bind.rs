//! Prebinding and binding of top-level statements.
//!
//! Definitions are installed in two passes so mutually recursive types can
//! reference each other: `prebind_statement` installs opaque placeholders
//! for every struct/enum/lang definition, and `bind_statement` fills in the
//! fields, registers constructors, and wires up imports.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{Ast, AstNode, UseKind};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{
    load_module_env, namespace_env, naming, Env, SharedTable, Table,
};
use crate::types::{
    self, non_optional, type_eq, Arg, EnumInfo, StructInfo, Tag, TextInfo, Type, TypeInfoInfo,
};

use super::{get_arg_ast_type, get_function_def_type, get_type, parse_type_ast};

fn bind_type_placeholder(env: &Env, ast: &Rc<AstNode>, name: &str, ty: Type, ns_env: &Env) -> CResult<()> {
    log::trace!("prebinding type '{name}'");
    if let Some(existing) = env.get_binding(name) {
        code_err!(ast, ErrorKind::ConstraintViolation,
            "A {} called '{name}' has already been defined", existing.ty);
    }
    env.set_type(name, ty.clone());
    let info = Type::TypeInfo(Rc::new(TypeInfoInfo {
        name: name.to_string(),
        ty,
        env: ns_env.clone(),
    }));
    let code = naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$info"));
    env.set_binding(name, info, code);
    Ok(())
}

fn namespace_statements(namespace: &Option<Rc<AstNode>>) -> &[Rc<AstNode>] {
    match namespace.as_ref().map(|ns| &ns.ast) {
        Some(Ast::Block { statements }) => statements,
        _ => &[],
    }
}

/// An `extend` block's working environment: the type's namespace, but with
/// lookups falling back to the extending scope.
fn extended_env(env: &Env, name: &str) -> Env {
    let ns_env = namespace_env(env, name);
    let mut extended = ns_env.clone();
    extended.locals = Table::shared_with_fallback(env.locals.clone());
    extended.namespace_bindings = Some(extended.locals.clone());
    extended.id_suffix = env.id_suffix.clone();
    extended
}

fn merge_extension(env: &Env, ast: &Rc<AstNode>, name: &str, extended: &Env) -> CResult<()> {
    let ns_env = namespace_env(env, name);
    for (entry_name, binding) in extended.locals.borrow().entries() {
        if let Some(clobbered) = ns_env.locals.borrow().get_local(&entry_name) {
            if !type_eq(&clobbered.ty, &binding.ty) {
                code_err!(ast, ErrorKind::ConstraintViolation,
                    "This `extend` block overwrites the binding for '{entry_name}' in the original namespace (with type {}) with a new binding with type {}",
                    clobbered.ty, binding.ty);
            }
        }
        ns_env.locals.borrow_mut().set(entry_name, binding);
    }
    Ok(())
}

/// First pass: install opaque placeholder types so forward and mutually
/// recursive references resolve.
pub fn prebind_statement(env: &Env, statement: &Rc<AstNode>) -> CResult<()> {
    match &statement.ast {
        Ast::DocTest { expr, .. } => prebind_statement(env, expr),
        Ast::StructDef { name, namespace, external, secret, .. } => {
            let ns_env = namespace_env(env, name);
            let placeholder = Type::Struct(Rc::new(RefCell::new(StructInfo {
                name: name.clone(),
                fields: vec![],
                env: ns_env.clone(),
                opaque: true,
                external: *external,
                secret: *secret,
            })));
            bind_type_placeholder(env, statement, name, placeholder, &ns_env)?;
            for stmt in namespace_statements(namespace) {
                prebind_statement(&ns_env, stmt)?;
            }
            Ok(())
        }
        Ast::EnumDef { name, namespace, .. } => {
            let ns_env = namespace_env(env, name);
            let placeholder = Type::Enum(Rc::new(RefCell::new(EnumInfo {
                name: name.clone(),
                tags: vec![],
                env: ns_env.clone(),
                opaque: true,
            })));
            bind_type_placeholder(env, statement, name, placeholder, &ns_env)?;
            for stmt in namespace_statements(namespace) {
                prebind_statement(&ns_env, stmt)?;
            }
            Ok(())
        }
        Ast::LangDef { name, namespace } => {
            let ns_env = namespace_env(env, name);
            let lang = Type::Text(Rc::new(TextInfo { lang: name.clone(), env: ns_env.clone() }));
            bind_type_placeholder(env, statement, name, lang, &ns_env)?;
            for stmt in namespace_statements(namespace) {
                prebind_statement(&ns_env, stmt)?;
            }
            Ok(())
        }
        Ast::Extend { name, body } => {
            let extended = extended_env(env, name);
            for stmt in namespace_statements(&Some(body.clone())) {
                prebind_statement(&extended, stmt)?;
            }
            merge_extension(env, statement, name, &extended)
        }
        _ => Ok(()),
    }
}

/// Second pass: fill in placeholder types, register function and variable
/// bindings, and process imports.
pub fn bind_statement(env: &Env, statement: &Rc<AstNode>) -> CResult<()> {
    match &statement.ast {
        Ast::DocTest { expr, .. } => bind_statement(env, expr),
        Ast::Declare { var, type_ast, value } => {
            let Some(name) = var.ast.var_name() else {
                code_err!(var, ErrorKind::InvalidExpression, "This declaration needs a variable name");
            };
            if name == "_" {
                return Ok(());
            }
            if let Some(existing) = env.get_binding(name) {
                code_err!(var, ErrorKind::ConstraintViolation,
                    "A {} called '{name}' has already been defined", existing.ty);
            }
            if let Some(value) = value {
                bind_statement(env, value)?;
            }
            let mut ty = match (type_ast, value) {
                (Some(type_ast), _) => parse_type_ast(env, type_ast)?,
                (None, Some(value)) => get_type(env, value)?,
                (None, None) => code_err!(statement, ErrorKind::MissingValue,
                    "I couldn't figure out the type of this value"),
            };
            if let Type::Function(info) = &ty {
                ty = Type::Closure(info.clone());
            }
            // Module- and namespace-level declarations get their qualified C
            // name; block locals are plain user identifiers.
            let at_top_level = env
                .namespace_bindings
                .as_ref()
                .map(|nb| Rc::ptr_eq(nb, &env.locals))
                .unwrap_or(false);
            let code = if at_top_level {
                naming::namespace_name(env, env.namespace.as_ref(), &naming::valid_c_name(name))
            } else {
                naming::user_id(name)
            };
            env.set_binding(name, ty, code);
            Ok(())
        }
        Ast::FunctionDef { name, .. } => {
            let Some(fn_name) = name.ast.var_name() else {
                code_err!(name, ErrorKind::InvalidExpression, "This function needs a name");
            };
            let ty = get_function_def_type(env, statement)?;
            let code =
                naming::namespace_name(env, env.namespace.as_ref(), &naming::valid_c_name(fn_name));
            env.set_binding(fn_name, ty, code);
            Ok(())
        }
        Ast::ConvertDef { .. } => {
            let ty = get_function_def_type(env, statement)?;
            let Type::Function(info) = &ty else { unreachable!() };
            let Some(name) = types::get_type_name(&info.ret) else {
                code_err!(statement, ErrorKind::TypeMismatch,
                    "Conversions are only supported for text, struct, and enum types, not {}",
                    info.ret);
            };
            let code = naming::namespace_name(
                env,
                env.namespace.as_ref(),
                &format!("{name}${}", statement.line_number()),
            );
            let Some(type_ns) = crate::environment::get_namespace_by_type(env, &info.ret) else {
                code_err!(statement, ErrorKind::TypeMismatch,
                    "I don't know how to register conversions for {}", info.ret);
            };
            let Some(ns) = &type_ns.namespace else {
                code_err!(statement, ErrorKind::TypeMismatch,
                    "I don't know how to register conversions for {}", info.ret);
            };
            ns.constructors
                .borrow_mut()
                .push(crate::environment::Binding::new(ty, code));
            Ok(())
        }
        Ast::StructDef { name, fields: field_asts, namespace, opaque, .. } => {
            let ns_env = namespace_env(env, name);
            let Some(placeholder) = env.get_type(name) else {
                code_err!(statement, ErrorKind::UnknownName, "Couldn't find type '{name}'");
            };
            let Type::Struct(info) = &placeholder else {
                code_err!(statement, ErrorKind::ConstraintViolation,
                    "'{name}' is not a struct type");
            };
            if !*opaque {
                let mut fields = vec![];
                for field_ast in field_asts {
                    let field_t = get_arg_ast_type(env, field_ast)?;
                    check_field_completeness(statement, field_ast, &placeholder, &field_t)?;
                    fields.push(Arg {
                        name: field_ast.name.clone().unwrap_or_default(),
                        ty: Some(field_t),
                        default_val: field_ast.value.clone(),
                    });
                }
                let mut info = info.borrow_mut();
                info.fields = fields;
                info.opaque = false;
            }
            for stmt in namespace_statements(namespace) {
                bind_statement(&ns_env, stmt)?;
            }
            Ok(())
        }
        Ast::EnumDef { name, tags: tag_asts, namespace } => {
            let ns_env = namespace_env(env, name);
            let Some(placeholder) = env.get_type(name) else {
                code_err!(statement, ErrorKind::UnknownName, "Couldn't find type '{name}'");
            };
            let Type::Enum(info) = &placeholder else {
                code_err!(statement, ErrorKind::ConstraintViolation,
                    "'{name}' is not an enum type");
            };
            let mut tags = vec![];
            let mut next_tag = 1i64;
            for tag_ast in tag_asts {
                let mut fields = vec![];
                for field_ast in &tag_ast.fields {
                    let field_t = get_arg_ast_type(env, field_ast)?;
                    check_field_completeness(statement, field_ast, &placeholder, &field_t)?;
                    fields.push(Arg {
                        name: field_ast.name.clone().unwrap_or_default(),
                        ty: Some(field_t),
                        default_val: field_ast.value.clone(),
                    });
                }
                let member_name = format!("{name}${}", tag_ast.name);
                let member_ns = namespace_env(env, &member_name);
                let payload = Type::Struct(Rc::new(RefCell::new(StructInfo {
                    name: member_name,
                    fields,
                    env: member_ns,
                    opaque: false,
                    external: false,
                    secret: tag_ast.secret,
                })));
                tags.push(Tag { name: tag_ast.name.clone(), tag_value: next_tag, payload });
                next_tag += 1;
            }
            {
                let mut info = info.borrow_mut();
                info.tags = tags.clone();
                info.opaque = false;
            }

            for tag in &tags {
                let has_payload = match &tag.payload {
                    Type::Struct(payload) => !payload.borrow().fields.is_empty(),
                    _ => false,
                };
                if has_payload {
                    let Type::Struct(payload) = &tag.payload else { unreachable!() };
                    let constructor_t =
                        Type::function(payload.borrow().fields.clone(), placeholder.clone());
                    let code = naming::namespace_name(
                        env,
                        env.namespace.as_ref(),
                        &format!("{name}$tagged${}", tag.name),
                    );
                    ns_env.set_binding(&tag.name, constructor_t, code);
                } else {
                    let type_name = naming::namespace_name(
                        env,
                        env.namespace.as_ref(),
                        &format!("{name}$$type"),
                    );
                    let tag_const = naming::namespace_name(
                        env,
                        env.namespace.as_ref(),
                        &format!("{name}$tag${}", tag.name),
                    );
                    let code = format!("(({type_name}){{{tag_const}}})");
                    ns_env.set_binding(&tag.name, placeholder.clone(), code);
                }
                env.set_type(format!("{name}${}", tag.name), tag.payload.clone());
            }

            for stmt in namespace_statements(namespace) {
                bind_statement(&ns_env, stmt)?;
            }
            Ok(())
        }
        Ast::LangDef { name, namespace } => {
            let ns_env = namespace_env(env, name);
            let Some(lang_t) = env.get_type(name) else {
                code_err!(statement, ErrorKind::UnknownName, "Couldn't find type '{name}'");
            };
            let text_t = env.get_type("Text").expect("Text is always defined");
            let type_name =
                naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$type"));
            ns_env.set_binding(
                "from_text",
                Type::function(vec![Arg::new("text", text_t)], lang_t),
                format!("({type_name})"),
            );
            for stmt in namespace_statements(namespace) {
                bind_statement(&ns_env, stmt)?;
            }
            Ok(())
        }
        Ast::Extend { name, body } => {
            let extended = extended_env(env, name);
            for stmt in namespace_statements(&Some(body.clone())) {
                bind_statement(&extended, stmt)?;
            }
            merge_extension(env, statement, name, &extended)
        }
        Ast::Use { var, .. } => {
            let Some(module_env) = load_module(env, statement)? else { return Ok(()) };
            // Re-export the module's public bindings into this scope:
            let mut bindings: Option<SharedTable<crate::environment::Binding>> =
                Some(module_env.locals.clone());
            while let Some(table) = bindings {
                if Rc::ptr_eq(&table, &module_env.globals) {
                    break;
                }
                for (entry_name, binding) in table.borrow().entries() {
                    if entry_name.starts_with('_') || entry_name == "main" {
                        continue;
                    }
                    match env.locals.borrow().get(&entry_name) {
                        None => env.locals.borrow_mut().set(entry_name, binding),
                        Some(existing) => {
                            if existing.code != binding.code || !type_eq(&existing.ty, &binding.ty)
                            {
                                code_err!(statement, ErrorKind::ConstraintViolation,
                                    "This module imports a symbol called '{entry_name}', which would clobber another variable");
                            }
                        }
                    }
                }
                bindings = table.borrow().fallback.clone();
            }
            for (type_name, ty) in module_env.types.borrow().entries() {
                if type_name.starts_with('_') || env.get_type(&type_name).is_some() {
                    continue;
                }
                env.set_type(type_name, ty);
            }
            if let Some(var) = var {
                if let Some(name) = var.ast.var_name() {
                    let module_t = get_type(env, statement)?;
                    env.set_binding(name, module_t, "");
                }
            }
            Ok(())
        }
        Ast::Extern { name, type_ast } => {
            let mut t = parse_type_ast(env, type_ast)?;
            if let Type::Closure(info) = &t {
                t = Type::Function(info.clone());
            }
            env.set_binding(name, t, name.clone());
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Reject struct/enum fields whose type is still an opaque placeholder: a
/// value-typed recursive field would be infinitely large.
fn check_field_completeness(
    statement: &Rc<AstNode>,
    field_ast: &crate::ast::ArgAst,
    defining: &Type,
    field_t: &Type,
) -> CResult<()> {
    let non_opt = non_optional(field_t);
    let (is_opaque, is_external, same_as_defining) = match (&non_opt, defining) {
        (Type::Struct(info), Type::Struct(defining_info)) => {
            let borrowed = info.borrow();
            (borrowed.opaque, borrowed.external, Rc::ptr_eq(info, defining_info))
        }
        (Type::Struct(info), _) => {
            let borrowed = info.borrow();
            (borrowed.opaque, borrowed.external, false)
        }
        (Type::Enum(info), Type::Enum(defining_info)) => {
            (info.borrow().opaque, false, Rc::ptr_eq(info, defining_info))
        }
        (Type::Enum(info), _) => (info.borrow().opaque, false, false),
        _ => return Ok(()),
    };
    if !is_opaque {
        return Ok(());
    }
    let site = field_ast
        .type_ast
        .as_ref()
        .map(|t| (t.file.clone(), t.start, t.end))
        .or_else(|| field_ast.value.as_ref().map(|v| (v.file.clone(), v.start, v.end)))
        .unwrap_or((statement.file.clone(), statement.start, statement.end));
    let message = if same_as_defining {
        format!(
            "This is a recursive {defining} that would be infinitely large. Maybe you meant to use an optional '@{defining}?' pointer instead?"
        )
    } else if is_external {
        format!(
            "This is an opaque externally defined struct. I can't use it as a member without knowing what its fields are. Either specify its fields or use something like a @{non_opt} pointer."
        )
    } else {
        format!(
            "I'm still in the process of defining the fields of {field_t}, so I don't know how to use it as a member. Try using a @{field_t} pointer for this field."
        )
    };
    Err(crate::diagnostics::CompileError::at(
        &site.0,
        site.1,
        site.2,
        ErrorKind::ConstraintViolation,
        message,
    ))
}

/// Lexically normalize `.` and `..` components of a path (no filesystem
/// access; the module loader owns I/O).
fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = vec![];
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(&"..")) || parts.is_empty() {
                    parts.push("..");
                } else {
                    parts.pop();
                }
            }
            _ => parts.push(part),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// The import-table key for a `use` statement: the resolved path for local
/// imports, the raw module name otherwise.
pub(crate) fn resolve_use_path(ast: &AstNode, path: &str, what: UseKind) -> String {
    match what {
        UseKind::Local => {
            let source_dir = match ast.file.filename.rsplit_once('/') {
                Some((dir, _)) => dir,
                None => ".",
            };
            if path.starts_with('/') {
                normalize_path(path)
            } else {
                normalize_path(&format!("{source_dir}/{path}"))
            }
        }
        _ => path.to_string(),
    }
}

/// Resolve and load the module a `use` statement refers to. Returns `None`
/// for raw header/C-file includes, which bind nothing.
pub fn load_module(env: &Env, ast: &Rc<AstNode>) -> CResult<Option<Env>> {
    let Ast::Use { path, what, .. } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a 'use' statement");
    };
    match what {
        UseKind::Header | UseKind::CCode => Ok(None),
        UseKind::Local | UseKind::Module => {
            let key = resolve_use_path(ast, path, *what);
            if let Some(cached) = env.imports.borrow().get(&key) {
                return Ok(Some(cached.clone()));
            }
            let Some(loader) = &env.module_loader else {
                code_err!(ast, ErrorKind::UnknownName,
                    "I can't import '{path}' because no module loader was provided");
            };
            let Some(module_ast) = loader(&key) else {
                code_err!(ast, ErrorKind::UnknownName, "No such file exists: '{path}'");
            };
            Ok(Some(load_module_env(env, &module_ast)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path("a/b/../c.tm"), "a/c.tm");
        assert_eq!(normalize_path("./foo.tm"), "foo.tm");
        assert_eq!(normalize_path("a/./b.tm"), "a/b.tm");
        assert_eq!(normalize_path("/x/../y.tm"), "/y.tm");
    }
}
