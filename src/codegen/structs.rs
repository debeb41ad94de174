//! Struct definitions: header emission, typeinfo constants, literal
//! construction and default values.

use std::rc::Rc;

use crate::ast::{ArgAst, Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{naming, Env};
use crate::typecheck::{get_arg_ast_type, is_valid_call, CallOpts};
use crate::types::{is_packed_data, non_optional, type_eq, unpadded_struct_size, Type};

use super::functions::compile_arguments;
use super::types::{compile_declaration, compile_type, compile_type_info};

/// The `TypeInfo_t` constant definition for a struct type.
pub fn compile_struct_typeinfo(
    env: &Env,
    t: &Type,
    name: &str,
    fields: &[ArgAst],
    is_secret: bool,
    is_opaque: bool,
) -> CResult<String> {
    let Type::Struct(info) = t else {
        return Err(crate::diagnostics::CompileError::new(
            ErrorKind::InvalidExpression,
            format!("'{name}' is not a struct type"),
        ));
    };
    let typeinfo_name =
        naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$info"));
    let type_code = if info.borrow().external {
        name.to_string()
    } else {
        format!(
            "struct {}",
            naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$struct"))
        )
    };
    let short_name = name.rsplit('$').next().unwrap_or(name);
    let metamethods =
        if is_packed_data(t) { "PackedData$metamethods" } else { "Struct$metamethods" };

    let mut typeinfo = format!(
        "public const TypeInfo_t {typeinfo_name} = {{.size=sizeof({type_code}), .align=__alignof__({type_code}), .metamethods={metamethods}, .tag=StructInfo, .StructInfo.name=\"{short_name}\""
    );
    if is_secret {
        typeinfo.push_str(", .StructInfo.is_secret=true");
    }
    if is_opaque {
        typeinfo.push_str(", .StructInfo.is_opaque=true");
    }
    typeinfo.push_str(&format!(", .StructInfo.num_fields={}", fields.len()));
    if !fields.is_empty() {
        typeinfo.push_str(&format!(", .StructInfo.fields=(NamedType_t[{}]){{", fields.len()));
        for (i, field) in fields.iter().enumerate() {
            let field_type = get_arg_ast_type(env, field)?;
            if i > 0 {
                typeinfo.push_str(", ");
            }
            typeinfo.push_str(&format!(
                "{{\"{}\", {}}}",
                field.name.as_deref().unwrap_or(""),
                compile_type_info(&field_type)
            ));
        }
        typeinfo.push('}');
    }
    typeinfo.push_str("};\n");
    Ok(typeinfo)
}

/// The header text for a struct definition: the struct layout, its optional
/// wrapper type, and the typeinfo extern.
pub fn compile_struct_header(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::StructDef { name, fields: field_asts, external, opaque, .. } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a struct definition");
    };
    let typeinfo_name =
        naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$info"));
    let type_code = if *external {
        name.clone()
    } else {
        format!(
            "struct {}",
            naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$struct"))
        )
    };

    let mut fields = String::new();
    for field_ast in field_asts {
        let field_t = get_arg_ast_type(env, field_ast)?;
        let check_for_opaque = non_optional(&field_t);
        if let Type::Struct(field_info) = &check_for_opaque {
            if field_info.borrow().opaque {
                let site = field_ast
                    .type_ast
                    .as_ref()
                    .map(|t| (t.file.clone(), t.start, t.end))
                    .or_else(|| field_ast.value.as_ref().map(|v| (v.file.clone(), v.start, v.end)))
                    .unwrap_or((ast.file.clone(), ast.start, ast.end));
                return Err(crate::diagnostics::CompileError::at(
                    &site.0,
                    site.1,
                    site.2,
                    ErrorKind::ConstraintViolation,
                    "This is an opaque type, so it can't be used as a struct field type",
                ));
            }
        }
        let field_name = naming::valid_c_name(field_ast.name.as_deref().unwrap_or(""));
        fields.push_str(&compile_declaration(&field_t, &field_name));
        if matches!(field_t, Type::Bool) {
            fields.push_str(":1");
        }
        fields.push_str(";\n");
    }

    let struct_code =
        if *external { String::new() } else { format!("{type_code} {{\n{fields}}};\n") };
    let t = env.get_type(name).ok_or_else(|| {
        crate::diagnostics::CompileError::new(
            ErrorKind::UnknownName,
            format!("Couldn't find type '{name}'"),
        )
    })?;

    let mut optional_code = String::new();
    if !*opaque {
        let unpadded = unpadded_struct_size(&t);
        let optional_name = naming::namespace_name(
            env,
            env.namespace.as_ref(),
            &format!("$Optional{name}$$type"),
        );
        optional_code = format!(
            "DEFINE_OPTIONAL_TYPE({}, {unpadded}, {optional_name});\n",
            compile_type(&t)
        );
    }
    Ok(format!("{struct_code}{optional_code}extern const TypeInfo_t {typeinfo_name};\n"))
}

/// The zero/default value for a struct: each field's default expression, or
/// its type's empty value.
pub fn compile_empty_struct(t: &Type) -> CResult<String> {
    let Type::Struct(info) = t else {
        return Err(crate::diagnostics::CompileError::new(
            ErrorKind::InvalidExpression,
            "This is not a struct type".to_string(),
        ));
    };
    let info = info.borrow();
    let mut code = format!("(({}){{", compile_type(t));
    for (i, field) in info.fields.iter().enumerate() {
        let empty_field = match &field.default_val {
            Some(default) => super::expressions::compile(&info.env, default)?,
            None => {
                let Some(field_t) = &field.ty else {
                    return Err(crate::diagnostics::CompileError::new(
                        ErrorKind::MissingValue,
                        format!("The field '{}' has no type", field.name),
                    ));
                };
                let empty = super::expressions::compile_empty(field_t)?;
                if empty.is_empty() {
                    return Ok(String::new());
                }
                empty
            }
        };
        if i > 0 {
            code.push_str(", ");
        }
        code.push_str(&empty_field);
    }
    code.push_str("})");
    Ok(code)
}

/// Compile `StructName(args...)` as a C compound literal, checking the
/// arguments against the struct's fields.
pub fn compile_struct_literal(
    env: &Env,
    ast: &Rc<AstNode>,
    t: &Type,
    args: &[ArgAst],
) -> CResult<String> {
    let Type::Struct(info) = t else {
        code_err!(ast, ErrorKind::TypeMismatch, "This is not a struct type");
    };
    let (fields, opaque) = {
        let info = info.borrow();
        (info.fields.clone(), info.opaque)
    };
    if opaque {
        code_err!(ast, ErrorKind::ConstraintViolation,
            "This struct is opaque, so I don't know what's inside it!");
    }
    let underscores =
        env.current_type.as_ref().map(|cur| type_eq(cur, t)).unwrap_or(false);
    let opts = CallOpts { promotion: true, underscores };
    if is_valid_call(env, &fields, args, opts)? {
        return Ok(format!(
            "(({}){{{}}})",
            compile_type(t),
            compile_arguments(env, ast, &fields, args)?
        ));
    }
    if !underscores
        && is_valid_call(env, &fields, args, CallOpts { promotion: true, underscores: true })?
    {
        code_err!(ast, ErrorKind::PrivateAccess,
            "This constructor uses private fields that are not exposed");
    }
    code_err!(ast, ErrorKind::NoMatchingConstructor,
        "I could not find a constructor matching these arguments for the struct {t}")
}
