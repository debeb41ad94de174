//! The compilation environment: lexically scoped bindings, type tables,
//! namespaces, imports, loop/defer contexts and the per-translation-unit
//! code buffers the generator appends to.
//!
//! Environments are cheap to clone: all shared state lives behind
//! `Rc<RefCell<…>>` tables with parent fallback chains, so opening a scope
//! is a clone plus one fresh table.

mod builtins;
pub mod naming;
mod table;

pub use builtins::global_env;
pub use table::{SharedTable, Table};

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::diagnostics::{CResult, ErrorKind};
use crate::typecheck::{self, CallOpts};
use crate::types::{self, Type};
use crate::{code_err, spanned_err};

/// A name bound in some scope: its type plus the C expression that reads it.
/// An empty `code` means "use the canonical mangled identifier".
#[derive(Debug, Clone)]
pub struct Binding {
    pub ty: Type,
    pub code: String,
}

impl Binding {
    pub fn new(ty: Type, code: impl Into<String>) -> Self {
        Binding { ty, code: code.into() }
    }
}

/// Mutable buffers for one translation unit, shared by every scope compiled
/// within it.
#[derive(Debug, Default)]
pub struct CompilationUnit {
    pub local_typedefs: String,
    pub staticdefs: String,
    pub lambdas: String,
    pub variable_initializers: String,
}

/// The namespace chain identifying where a definition lives
/// (`Foo` → methods of `Foo`; nested for enum tag namespaces).
#[derive(Debug)]
pub struct Namespace {
    pub name: String,
    pub constructors: RefCell<Vec<Binding>>,
    pub parent: Option<Rc<Namespace>>,
}

/// One enclosing loop, for resolving `skip`/`stop` targets. The `used_*`
/// flags record whether a label must actually be emitted.
#[derive(Debug)]
pub struct LoopCtx {
    pub loop_name: String,
    pub loop_vars: Vec<String>,
    pub skip_label: String,
    pub stop_label: String,
    pub used_skip: std::cell::Cell<bool>,
    pub used_stop: std::cell::Cell<bool>,
    pub next: Option<Rc<LoopCtx>>,
}

impl LoopCtx {
    /// Find the loop a `skip`/`stop` targets: the innermost one, or the one
    /// whose keyword or loop variable matches `target`.
    pub fn lookup(start: &Option<Rc<LoopCtx>>, target: Option<&str>) -> Option<Rc<LoopCtx>> {
        let mut cursor = start.clone();
        while let Some(ctx) = cursor {
            match target {
                None => return Some(ctx),
                Some(name) => {
                    if ctx.loop_name == name || ctx.loop_vars.iter().any(|v| v == name) {
                        return Some(ctx);
                    }
                }
            }
            cursor = ctx.next.clone();
        }
        None
    }
}

/// One deferred block, replayed on scope exit and early returns.
pub struct Deferral {
    pub defer_env: Env,
    pub block: Rc<AstNode>,
}

/// Hook nested comprehensions use to inject each produced item into the
/// enclosing collection: given the item expression, produce the statement
/// that adds it.
pub struct ComprehensionAction(pub Box<dyn Fn(&Rc<AstNode>) -> Rc<AstNode>>);

impl ComprehensionAction {
    pub fn new(f: impl Fn(&Rc<AstNode>) -> Rc<AstNode> + 'static) -> Rc<Self> {
        Rc::new(ComprehensionAction(Box::new(f)))
    }
}

/// Callback that supplies the parsed AST for a `use`d module, keyed by its
/// resolved path. Parsing itself is a collaborator concern.
pub type ModuleLoader = dyn Fn(&str) -> Option<Rc<AstNode>>;

#[derive(Clone)]
pub struct Env {
    pub types: SharedTable<Type>,
    pub globals: SharedTable<Binding>,
    pub locals: SharedTable<Binding>,
    pub namespace_bindings: Option<SharedTable<Binding>>,
    pub namespace: Option<Rc<Namespace>>,
    pub id_suffix: String,
    pub imports: Rc<RefCell<HashMap<String, Env>>>,
    pub code: Rc<RefCell<CompilationUnit>>,
    pub fn_ret: Option<Type>,
    pub loop_ctx: Option<Rc<LoopCtx>>,
    pub deferred: Rc<RefCell<Vec<Deferral>>>,
    pub comprehension_action: Option<Rc<ComprehensionAction>>,
    pub do_source_mapping: bool,
    pub current_type: Option<Type>,
    pub module_loader: Option<Rc<ModuleLoader>>,
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("namespace", &self.namespace.as_ref().map(|ns| ns.name.clone()))
            .field("id_suffix", &self.id_suffix)
            .field("fn_ret", &self.fn_ret)
            .field("do_source_mapping", &self.do_source_mapping)
            .finish_non_exhaustive()
    }
}

impl Env {
    /// An empty root environment (no builtins). `global_env` is the public
    /// entry point.
    pub(crate) fn root(source_mapping: bool) -> Env {
        let globals = Table::shared();
        Env {
            types: Table::shared(),
            locals: globals.clone(),
            globals,
            namespace_bindings: None,
            namespace: None,
            id_suffix: String::new(),
            imports: Rc::new(RefCell::new(HashMap::new())),
            code: Rc::new(RefCell::new(CompilationUnit::default())),
            fn_ret: None,
            loop_ctx: None,
            deferred: Rc::new(RefCell::new(vec![])),
            comprehension_action: None,
            do_source_mapping: source_mapping,
            current_type: None,
            module_loader: None,
        }
    }

    pub fn get_binding(&self, name: &str) -> Option<Binding> {
        self.locals.borrow().get(name)
    }

    pub fn set_binding(&self, name: impl Into<String>, ty: Type, code: impl Into<String>) {
        self.locals.borrow_mut().set(name.into(), Binding::new(ty, code));
    }

    pub fn get_type(&self, name: &str) -> Option<Type> {
        self.types.borrow().get(name)
    }

    pub fn set_type(&self, name: impl Into<String>, ty: Type) {
        self.types.borrow_mut().set(name.into(), ty);
    }
}

/// A child scope whose locals chain onto this environment's locals.
pub fn fresh_scope(env: &Env) -> Env {
    let mut scope = env.clone();
    scope.locals = Table::shared_with_fallback(env.locals.clone());
    scope
}

/// Open (or re-open) the namespace for `namespace_name` under this env.
pub fn namespace_env(env: &Env, namespace_name: &str) -> Env {
    if let Some(b) = env.get_binding(namespace_name) {
        if let Type::TypeInfo(info) = &b.ty {
            return info.env.clone();
        }
    }
    let mut ns_env = env.clone();
    ns_env.locals = Table::shared_with_fallback(env.locals.clone());
    ns_env.namespace = Some(Rc::new(Namespace {
        name: namespace_name.to_string(),
        constructors: RefCell::new(vec![]),
        parent: env.namespace.clone(),
    }));
    ns_env.namespace_bindings = Some(ns_env.locals.clone());
    ns_env
}

/// Bring an enum's unqualified tag names into scope (so `when x is Foo`
/// works without `EnumName.Foo`). A no-op for non-enum types.
pub fn with_enum_scope(env: &Env, t: &Type) -> Env {
    let t = types::non_optional(t);
    let Type::Enum(info) = &t else { return env.clone() };
    let scope = fresh_scope(env);
    let info = info.borrow();
    for tag in &info.tags {
        if scope.get_binding(&tag.name).is_some() {
            continue;
        }
        if let Some(b) = info.env.get_binding(&tag.name) {
            scope.locals.borrow_mut().set(tag.name.clone(), b);
        }
    }
    scope
}

/// The namespace environment belonging to a type, when it has one.
pub fn get_namespace_by_type(env: &Env, t: &Type) -> Option<Env> {
    let t = types::value_type(t);
    match &t {
        Type::Bool
        | Type::Byte
        | Type::Int { .. }
        | Type::BigInt
        | Type::Num { .. }
        | Type::CString => {
            let b = env.get_binding(&t.to_string())?;
            match &b.ty {
                Type::TypeInfo(info) => Some(info.env.clone()),
                _ => None,
            }
        }
        Type::Text(info) => Some(info.env.clone()),
        Type::Struct(info) => Some(info.borrow().env.clone()),
        Type::Enum(info) => Some(info.borrow().env.clone()),
        Type::TypeInfo(info) => Some(info.env.clone()),
        _ => None,
    }
}

/// Look up a method/constant in the namespace of `self_ast`'s type.
pub fn get_namespace_binding(env: &Env, self_ast: &Rc<AstNode>, name: &str) -> CResult<Option<Binding>> {
    let self_type = typecheck::get_type(env, self_ast)?;
    Ok(get_namespace_by_type(env, &self_type).and_then(|ns| ns.get_binding(name)))
}

/// Choose a constructor for `t` matching `args`: exact matches first, then
/// promotion, scanning the registration list from the end so later
/// registrations win ties.
pub fn get_constructor(
    env: &Env,
    t: &Type,
    args: &[crate::ast::ArgAst],
    allow_underscores: bool,
) -> CResult<Option<Binding>> {
    let Some(type_env) = get_namespace_by_type(env, t) else { return Ok(None) };
    let Some(ns) = &type_env.namespace else { return Ok(None) };
    let constructors = ns.constructors.borrow().clone();
    for promotion in [false, true] {
        for b in constructors.iter().rev() {
            let Some(fn_info) = b.ty.fn_info() else { continue };
            if !allow_underscores && fn_info.args.iter().any(|a| a.name.starts_with('_')) {
                continue;
            }
            if types::type_eq(&fn_info.ret, t)
                && typecheck::is_valid_call(
                    env,
                    &fn_info.args,
                    args,
                    CallOpts { promotion, underscores: allow_underscores },
                )?
            {
                return Ok(Some(b.clone()));
            }
        }
    }
    Ok(None)
}

/// Find an operator-overload method (`plus`, `concatenated_with`, ...) whose
/// signature matches `(lhs, rhs) -> ret`, looking at the LHS namespace first
/// and then the RHS's.
pub fn get_metamethod_binding(
    env: &Env,
    op: crate::ast::BinOp,
    lhs: &Rc<AstNode>,
    rhs: &Rc<AstNode>,
    ret: &Type,
) -> CResult<Option<Binding>> {
    let Some(method_name) = op.method_name() else { return Ok(None) };
    let Some(b) = get_namespace_binding(env, lhs, method_name)? else { return Ok(None) };
    let Some(fn_info) = (match &b.ty {
        Type::Function(info) => Some(info),
        _ => None,
    }) else {
        return Ok(None);
    };
    if !types::type_eq(&fn_info.ret, ret) {
        return Ok(None);
    }
    let args = vec![
        crate::ast::ArgAst::positional(lhs.clone()),
        crate::ast::ArgAst::positional(rhs.clone()),
    ];
    if typecheck::is_valid_call(env, &fn_info.args, &args, CallOpts::promoting())? {
        Ok(Some(b))
    } else {
        Ok(None)
    }
}

/// Scope for a `for` loop: binds the iteration variables according to the
/// iterable's type.
pub fn for_scope(env: &Env, ast: &Rc<AstNode>) -> CResult<Env> {
    let Ast::For { vars, iter, .. } = &ast.ast else {
        return Err(spanned_err!(ast, ErrorKind::InvalidExpression, "This is not a loop"));
    };
    let iter_t = types::value_type(&typecheck::get_type(env, iter)?);
    let scope = fresh_scope(env);

    let var_names: Vec<&str> = vars.iter().filter_map(|v| v.ast.var_name()).collect();
    let too_many = |max: usize| -> CResult<()> {
        if var_names.len() > max {
            code_err!(
                vars[max],
                ErrorKind::InvalidExpression,
                "This is too many variables for this loop"
            );
        }
        Ok(())
    };

    match &iter_t {
        Type::List { item } => {
            too_many(2)?;
            let item_t = item.as_deref().cloned().unwrap_or(Type::Optional(None));
            match var_names.as_slice() {
                [var] => scope.set_binding(*var, item_t, naming::user_id(var)),
                [index, var] => {
                    scope.set_binding(*index, Type::BigInt, naming::user_id(index));
                    scope.set_binding(*var, item_t, naming::user_id(var));
                }
                _ => {}
            }
        }
        Type::Set { item } => {
            too_many(1)?;
            if let [var] = var_names.as_slice() {
                let item_t = item.as_deref().cloned().unwrap_or(Type::Optional(None));
                scope.set_binding(*var, item_t, naming::user_id(var));
            }
        }
        Type::Table(info) => {
            too_many(2)?;
            let key_t = info.key.clone().unwrap_or(Type::Optional(None));
            match var_names.as_slice() {
                [key] => scope.set_binding(*key, key_t, naming::user_id(key)),
                [key, value] => {
                    let value_t = info.value.clone().unwrap_or(Type::Optional(None));
                    scope.set_binding(*key, key_t, naming::user_id(key));
                    scope.set_binding(*value, value_t, naming::user_id(value));
                }
                _ => {}
            }
        }
        Type::BigInt | Type::Int { .. } => {
            too_many(1)?;
            if let [var] = var_names.as_slice() {
                scope.set_binding(*var, iter_t.clone(), naming::user_id(var));
            }
        }
        Type::Function(_) | Type::Closure(_) => {
            too_many(1)?;
            let info = iter_t.fn_info().unwrap();
            if let [var] = var_names.as_slice() {
                scope.set_binding(*var, types::non_optional(&info.ret), naming::user_id(var));
            }
        }
        _ => {
            code_err!(iter, ErrorKind::TypeMismatch, "Iteration is not implemented for type: {iter_t}");
        }
    }
    Ok(scope)
}

/// Load (or return the memoized) environment for an imported module. The
/// module's statements are prebound then bound, both in topological order,
/// so mutually recursive type definitions resolve.
pub fn load_module_env(env: &Env, ast: &Rc<AstNode>) -> CResult<Env> {
    let name = ast.file.filename.clone();
    if let Some(cached) = env.imports.borrow().get(&name) {
        return Ok(cached.clone());
    }
    log::debug!("loading module environment for {name}");
    let mut module_env = fresh_scope(env);
    module_env.code = Rc::new(RefCell::new(CompilationUnit::default()));
    module_env.namespace_bindings = Some(module_env.locals.clone());
    module_env.id_suffix = naming::get_id_suffix(&name);
    env.imports.borrow_mut().insert(name, module_env.clone());

    let Ast::Block { statements } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "Module files must be blocks of statements");
    };
    let mut prebind_err = None;
    crate::ast::visit_topologically(statements, |stmt| {
        if prebind_err.is_none() {
            if let Err(e) = typecheck::prebind_statement(&module_env, stmt) {
                prebind_err = Some(e);
            }
        }
    });
    if let Some(e) = prebind_err {
        return Err(e);
    }
    let mut bind_err = None;
    crate::ast::visit_topologically(statements, |stmt| {
        if bind_err.is_none() {
            if let Err(e) = typecheck::bind_statement(&module_env, stmt) {
                bind_err = Some(e);
            }
        }
    });
    if let Some(e) = bind_err {
        return Err(e);
    }
    Ok(module_env)
}
