//! Whole-file emission: the `#pragma once` header consumed by importers,
//! and the `.c` body with its typedefs, lambdas, static definitions,
//! top-level code and the idempotent `$initialize` function.

use std::rc::Rc;

use crate::ast::{visit_topologically, Ast, AstNode, UseKind};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{namespace_env, naming, Env};
use crate::typecheck::{get_type, is_constant, parse_type_ast, resolve_use_path};
use crate::types::{has_heap_memory, Type};

use super::functions::{
    compile_convert_declaration, compile_function, compile_function_declaration,
};
use super::statements::{compile_statement, with_source_info};
use super::structs::{compile_struct_header, compile_struct_typeinfo};
use super::types::{compile_declaration, compile_type};

fn declared_type(env: &Env, ast: &Rc<AstNode>) -> CResult<Type> {
    let Ast::Declare { type_ast, value, .. } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a declaration");
    };
    let mut t = match (type_ast, value) {
        (Some(type_ast), _) => parse_type_ast(env, type_ast)?,
        (None, Some(value)) => get_type(env, value)?,
        (None, None) => code_err!(ast, ErrorKind::MissingValue,
            "I couldn't figure out the type of this value"),
    };
    if let Type::Function(info) = &t {
        t = Type::Closure(info.clone());
    }
    if t.is_void_like() {
        code_err!(ast, ErrorKind::ConstraintViolation,
            "You can't declare a variable with a {t} value");
    }
    Ok(t)
}

/// The header line(s) a single statement contributes for type definitions
/// and imports.
pub fn compile_statement_type_header(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    match &ast.ast {
        Ast::Use { path, what, .. } => match what {
            UseKind::Header => {
                if path.starts_with('<') {
                    Ok(format!("#include {path}\n"))
                } else {
                    Ok(format!("#include \"{path}\"\n"))
                }
            }
            UseKind::CCode => Ok(String::new()),
            UseKind::Local | UseKind::Module => {
                let key = resolve_use_path(ast, path, *what);
                Ok(with_source_info(env, ast, &format!("#include \"{key}.h\"\n")))
            }
        },
        Ast::StructDef { .. } => compile_struct_header(env, ast),
        Ast::EnumDef { .. } => super::enums::compile_enum_header(env, ast),
        Ast::LangDef { name, .. } => {
            let constructor = naming::namespace_name(env, env.namespace.as_ref(), name);
            let type_name =
                naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$type"));
            let info_name =
                naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$info"));
            Ok(format!(
                "#define {constructor}(text) (({type_name}){{.length=sizeof(text)-1, .tag=TEXT_ASCII, .ascii=\"\" text}})\n#define {constructor}s(...) (({type_name})Texts(__VA_ARGS__))\nextern const TypeInfo_t {info_name};\n"
            ))
        }
        _ => Ok(String::new()),
    }
}

/// The header declarations a statement contributes: extern variables,
/// function prototypes, and namespace members (recursively).
pub fn compile_statement_namespace_header(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let (ns_env, block) = match &ast.ast {
        Ast::LangDef { name, namespace } => (namespace_env(env, name), namespace.clone()),
        Ast::StructDef { name, namespace, .. } => (namespace_env(env, name), namespace.clone()),
        Ast::EnumDef { name, namespace, .. } => (namespace_env(env, name), namespace.clone()),
        Ast::Extend { name, body } => {
            let mut extended = namespace_env(env, name);
            extended.id_suffix = env.id_suffix.clone();
            (extended, Some(body.clone()))
        }
        Ast::Extern { name, type_ast } => {
            let mut t = parse_type_ast(env, type_ast)?;
            if let Type::Closure(info) = &t {
                t = Type::Function(info.clone());
            }
            let decl = if let Type::Function(fn_info) = &t {
                let mut decl = format!("{} {name}(", compile_type(&fn_info.ret));
                for (i, arg) in fn_info.args.iter().enumerate() {
                    if i > 0 {
                        decl.push_str(", ");
                    }
                    decl.push_str(&compile_type(arg.ty.as_ref().unwrap_or(&Type::Void)));
                }
                decl.push(')');
                decl
            } else {
                compile_declaration(&t, name)
            };
            return Ok(format!("extern {decl};\n"));
        }
        Ast::Declare { var, .. } => {
            let Some(decl_name) = var.ast.var_name() else {
                return Ok(String::new());
            };
            if decl_name.starts_with('_') {
                return Ok(String::new());
            }
            let t = declared_type(env, ast)?;
            let full_name = naming::namespace_name(
                env,
                env.namespace.as_ref(),
                &naming::valid_c_name(decl_name),
            );
            return Ok(format!("extern {};\n", compile_declaration(&t, &full_name)));
        }
        Ast::FunctionDef { .. } => return compile_function_declaration(env, ast),
        Ast::ConvertDef { .. } => return compile_convert_declaration(env, ast),
        _ => return Ok(String::new()),
    };
    let mut header = String::new();
    if let Some(Ast::Block { statements }) = block.as_ref().map(|b| &b.ast) {
        for stmt in statements {
            header.push_str(&compile_statement_namespace_header(&ns_env, stmt)?);
        }
    }
    Ok(header)
}

fn make_typedefs(env: &Env, ast: &Rc<AstNode>, header: &mut String) {
    match &ast.ast {
        Ast::StructDef { name, external, .. } => {
            if *external {
                return;
            }
            let struct_name =
                naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$struct"));
            let type_name =
                naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$type"));
            header.push_str(&format!("typedef struct {struct_name} {type_name};\n"));
        }
        Ast::EnumDef { name, tags, .. } => {
            let type_name =
                naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$type"));
            let struct_name =
                naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$struct"));
            header.push_str(&format!("typedef struct {struct_name} {type_name};\n"));
            for tag in tags {
                if tag.fields.is_empty() {
                    continue;
                }
                let tag_struct = naming::namespace_name(
                    env,
                    env.namespace.as_ref(),
                    &format!("{name}${}$$struct", tag.name),
                );
                let tag_type = naming::namespace_name(
                    env,
                    env.namespace.as_ref(),
                    &format!("{name}${}$$type", tag.name),
                );
                header.push_str(&format!("typedef struct {tag_struct} {tag_type};\n"));
            }
        }
        Ast::LangDef { name, .. } => {
            let type_name =
                naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$type"));
            header.push_str(&format!("typedef Text_t {type_name};\n"));
        }
        _ => {}
    }
}

/// The `#pragma once` header for one source file, consumed by `use`
/// importers. Typedefs come first (topologically ordered), then full type
/// definitions and declarations.
pub fn compile_file_header(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Block { statements } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "Module files must be blocks of statements");
    };
    let mut header = "#pragma once\n".to_string();
    if env.do_source_mapping {
        header.push_str(&format!("#line 1 {}\n", super::text::quoted_str(&ast.file.filename)));
    }
    header.push_str("#include <tomo/tomo.h>\n");

    visit_topologically(statements, |stmt| {
        make_typedefs(env, stmt, &mut header);
    });

    let mut emit_err = None;
    visit_topologically(statements, |stmt| {
        if emit_err.is_some() {
            return;
        }
        let result = compile_statement_type_header(env, stmt)
            .and_then(|type_header| {
                compile_statement_namespace_header(env, stmt)
                    .map(|ns_header| format!("{type_header}{ns_header}"))
            });
        match result {
            Ok(text) => header.push_str(&text),
            Err(e) => emit_err = Some(e),
        }
    });
    if let Some(e) = emit_err {
        return Err(e);
    }

    let init_name = naming::namespace_name(env, None, "$initialize");
    header.push_str(&format!("void {init_name}(void);\n"));
    Ok(header)
}

/// Collect the runtime initializers for non-constant globals (in
/// declaration order) into `env.code.variable_initializers`.
fn initialize_vars_and_statics(env: &Env, ast: &Rc<AstNode>) -> CResult<()> {
    let Ast::Block { statements } = &ast.ast else { return Ok(()) };
    for stmt in statements {
        match &stmt.ast {
            Ast::InlineCCode { .. } => {
                let code = compile_statement(env, stmt)?;
                let mut unit = env.code.borrow_mut();
                unit.staticdefs.push_str(&code);
                unit.staticdefs.push('\n');
            }
            Ast::Declare { var, value, .. } => {
                let Some(decl_name) = var.ast.var_name() else { continue };
                let t = declared_type(env, stmt)?;
                let full_name = naming::namespace_name(
                    env,
                    env.namespace.as_ref(),
                    &naming::valid_c_name(decl_name),
                );
                let needs_runtime_init = match value {
                    Some(value) => !is_constant(env, value)?,
                    None => has_heap_memory(&t),
                };
                if needs_runtime_init {
                    let val_code = super::statements::compile_declared_value(env, stmt)?;
                    let initialized_name = naming::namespace_name(
                        env,
                        env.namespace.as_ref(),
                        &format!("{}$$initialized", naming::valid_c_name(decl_name)),
                    );
                    let init = with_source_info(
                        env,
                        stmt,
                        &format!("{full_name} = {val_code},\n{initialized_name} = true;\n"),
                    );
                    env.code.borrow_mut().variable_initializers.push_str(&init);
                }
            }
            Ast::StructDef { name, namespace, .. }
            | Ast::EnumDef { name, namespace, .. }
            | Ast::LangDef { name, namespace } => {
                if let Some(namespace) = namespace {
                    initialize_vars_and_statics(&namespace_env(env, name), namespace)?;
                }
            }
            Ast::Extend { name, body } => {
                initialize_vars_and_statics(&namespace_env(env, name), body)?;
            }
            Ast::Use { .. } => continue,
            _ => {
                let code = compile_statement(env, stmt)?;
                if !code.is_empty() {
                    code_err!(stmt, ErrorKind::InvalidExpression,
                        "I did not expect this statement to produce code at the top level");
                }
            }
        }
    }
    Ok(())
}

/// Top-level definitions: typeinfos, functions, global variables, and the
/// contents of type namespaces.
fn compile_top_level_code(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    match &ast.ast {
        Ast::Use { .. } => Ok(String::new()),
        Ast::Declare { var, value, .. } => {
            let Some(decl_name) = var.ast.var_name() else {
                code_err!(var, ErrorKind::InvalidExpression,
                    "This declaration needs a variable name");
            };
            let t = declared_type(env, ast)?;
            let full_name = naming::namespace_name(
                env,
                env.namespace.as_ref(),
                &naming::valid_c_name(decl_name),
            );
            let is_private = decl_name.starts_with('_');
            let can_init_statically = match value {
                Some(value) => is_constant(env, value)?,
                None => !has_heap_memory(&t),
            };
            if can_init_statically {
                let val_code = super::statements::compile_declared_value(env, ast)?;
                env.set_binding(decl_name, t.clone(), full_name.clone());
                Ok(format!(
                    "{}{} = {val_code};\n",
                    if is_private { "static " } else { "public " },
                    compile_declaration(&t, &full_name)
                ))
            } else {
                let initialized_name = naming::namespace_name(
                    env,
                    env.namespace.as_ref(),
                    &format!("{}$$initialized", naming::valid_c_name(decl_name)),
                );
                let checked_access =
                    format!("check_initialized({full_name}, {initialized_name}, \"{decl_name}\")");
                env.set_binding(decl_name, t.clone(), checked_access);
                Ok(format!(
                    "static bool {initialized_name} = false;\n{}{};\n",
                    if is_private { "static " } else { "public " },
                    compile_declaration(&t, &full_name)
                ))
            }
        }
        Ast::FunctionDef { name, .. } => {
            let Some(fn_name) = name.ast.var_name() else {
                code_err!(name, ErrorKind::InvalidExpression, "This function needs a name");
            };
            let name_code = naming::namespace_name(
                env,
                env.namespace.as_ref(),
                &naming::valid_c_name(fn_name),
            );
            let mut staticdefs = String::new();
            let definition = compile_function(env, &name_code, ast, &mut staticdefs)?;
            env.code.borrow_mut().staticdefs.push_str(&staticdefs);
            Ok(definition)
        }
        Ast::ConvertDef { .. } => {
            let fn_type = crate::typecheck::get_function_def_type(env, ast)?;
            let Type::Function(fn_info) = &fn_type else { unreachable!() };
            let Some(type_name) = crate::types::get_type_name(&fn_info.ret) else {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "Conversions are only supported for text, struct, and enum types, not {}",
                    fn_info.ret);
            };
            let name_code = naming::namespace_name(
                env,
                env.namespace.as_ref(),
                &format!("{type_name}${}", ast.line_number()),
            );
            let mut staticdefs = String::new();
            let definition = compile_function(env, &name_code, ast, &mut staticdefs)?;
            env.code.borrow_mut().staticdefs.push_str(&staticdefs);
            Ok(definition)
        }
        Ast::StructDef { name, fields, namespace, secret, opaque, .. } => {
            let Some(t) = env.get_type(name) else {
                code_err!(ast, ErrorKind::UnknownName, "Couldn't find type '{name}'");
            };
            let mut code = compile_struct_typeinfo(env, &t, name, fields, *secret, *opaque)?;
            if let Some(namespace) = namespace {
                code.push_str(&compile_top_level_code(&namespace_env(env, name), namespace)?);
            }
            Ok(code)
        }
        Ast::EnumDef { name, namespace, .. } => {
            let mut code = super::enums::compile_enum_typeinfo(env, ast)?;
            code.push_str(&super::enums::compile_enum_constructors(env, ast)?);
            if let Some(namespace) = namespace {
                code.push_str(&compile_top_level_code(&namespace_env(env, name), namespace)?);
            }
            Ok(code)
        }
        Ast::LangDef { name, namespace } => {
            let info_name =
                naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$info"));
            let mut code = format!(
                "public const TypeInfo_t {info_name} = {{sizeof(Text_t), __alignof__(Text_t), .metamethods=Text$metamethods, .tag=TextInfo, .TextInfo={{{}}}}};\n",
                super::text::quoted_str(name)
            );
            if let Some(namespace) = namespace {
                code.push_str(&compile_top_level_code(&namespace_env(env, name), namespace)?);
            }
            Ok(code)
        }
        Ast::Extend { name, body } => {
            let Some(b) = env.get_binding(name) else {
                code_err!(ast, ErrorKind::UnknownName,
                    "'{name}' is not the name of any type I recognize");
            };
            let Type::TypeInfo(_) = &b.ty else {
                code_err!(ast, ErrorKind::UnknownName,
                    "'{name}' is not the name of any type I recognize");
            };
            let mut extended = namespace_env(env, name);
            extended.id_suffix = env.id_suffix.clone();
            compile_top_level_code(&extended, body)
        }
        Ast::Extern { .. } => Ok(String::new()),
        Ast::Block { statements } => {
            let mut code = String::new();
            for stmt in statements {
                code.push_str(&compile_top_level_code(env, stmt)?);
            }
            Ok(code)
        }
        _ => Ok(String::new()),
    }
}

/// Compile one source file's `.c` translation unit. The environment must be
/// the module env produced by `load_module_env`.
pub fn compile_file(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    log::debug!("compiling file {}", ast.file.filename);
    let Ast::Block { statements } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "Module files must be blocks of statements");
    };
    let top_level_code = compile_top_level_code(env, ast)?;

    let mut includes = String::new();
    let mut use_imports = String::new();
    for stmt in statements {
        if let Ast::Use { path, what, .. } = &stmt.ast {
            use_imports.push_str(&compile_statement(env, stmt)?);
            if matches!(what, UseKind::CCode) {
                includes.push_str(&format!("#include \"{path}\"\n"));
            }
        }
    }

    initialize_vars_and_statics(env, ast)?;

    let unit = env.code.borrow();
    let init_name = naming::namespace_name(env, None, "$initialize");
    let mut code = String::new();
    if env.do_source_mapping {
        code.push_str(&format!("#line 1 {}\n", super::text::quoted_str(&ast.file.filename)));
    }
    code.push_str(&format!(
        "#define __SOURCE_FILE__ {}\n",
        super::text::quoted_str(&ast.file.filename)
    ));
    code.push_str("#include <tomo/tomo.h>\n");
    code.push_str(&format!(
        "#include \"{}.h\"\n\n",
        ast.file.filename
    ));
    code.push_str(&includes);
    code.push_str(&unit.local_typedefs);
    code.push('\n');
    code.push_str(&unit.lambdas);
    code.push('\n');
    code.push_str(&unit.staticdefs);
    code.push('\n');
    code.push_str(&top_level_code);
    code.push_str(&format!(
        "public void {init_name}(void) {{\nstatic bool initialized = false;\nif (initialized) return;\ninitialized = true;\n{use_imports}{}}}\n",
        unit.variable_initializers
    ));
    Ok(code)
}
