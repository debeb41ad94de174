//! Enum (tagged union) definitions: header layout, per-tag constructor
//! functions, typeinfo constants, and tag-test field access.

use std::rc::Rc;

use crate::ast::{Ast, AstNode, TagAst};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{naming, Env};
use crate::typecheck::{get_arg_ast_type, get_type};
use crate::types::{is_packed_data, type_align, type_size, value_type, Type};

use super::structs::{compile_empty_struct, compile_struct_header, compile_struct_typeinfo};
use super::types::{compile_declaration, compile_type, compile_type_info};

fn tag_has_fields(tag: &TagAst) -> bool {
    !tag.fields.is_empty()
}

/// Typeinfo constants for an enum: one per payload struct, then the enum's
/// own descriptor.
pub fn compile_enum_typeinfo(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::EnumDef { name, tags, .. } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an enum definition");
    };
    let mut member_typeinfos = String::new();
    for tag in tags {
        if !tag_has_fields(tag) {
            continue;
        }
        let tag_name = format!("{name}${}", tag.name);
        let Some(tag_type) = env.get_type(&tag_name) else {
            code_err!(ast, ErrorKind::UnknownName, "Couldn't find tag type '{tag_name}'");
        };
        member_typeinfos.push_str(&compile_struct_typeinfo(
            env,
            &tag_type,
            &tag_name,
            &tag.fields,
            tag.secret,
            false,
        )?);
    }

    let Some(t) = env.get_type(name) else {
        code_err!(ast, ErrorKind::UnknownName, "Couldn't find type '{name}'");
    };
    let metamethods =
        if is_packed_data(&t) { "PackedDataEnum$metamethods" } else { "Enum$metamethods" };
    let info_name = naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$info"));
    let mut typeinfo = format!(
        "public const TypeInfo_t {info_name} = {{{}u, {}u, .metamethods={metamethods}, {{.tag=EnumInfo, .EnumInfo={{.name=\"{name}\", .num_tags={}, .tags=(NamedType_t[]){{",
        type_size(&t),
        type_align(&t),
        tags.len()
    );
    for tag in tags {
        if tag_has_fields(tag) {
            let tag_type = env.get_type(&format!("{name}${}", tag.name)).unwrap();
            typeinfo.push_str(&format!(
                "{{\"{}\", {}}}, ",
                tag.name,
                compile_type_info(&tag_type)
            ));
        } else {
            typeinfo.push_str(&format!("{{\"{}\"}}, ", tag.name));
        }
    }
    typeinfo.push_str("}}}};\n");
    Ok(format!("{member_typeinfos}{typeinfo}"))
}

/// The per-tag constructor functions for payload-carrying tags.
pub fn compile_enum_constructors(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::EnumDef { name, tags, .. } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an enum definition");
    };
    let mut constructors = String::new();
    for tag in tags {
        if !tag_has_fields(tag) {
            continue;
        }
        let mut arg_sig = String::new();
        for (i, field) in tag.fields.iter().enumerate() {
            let field_t = get_arg_ast_type(env, field)?;
            if i > 0 {
                arg_sig.push_str(", ");
            }
            arg_sig.push_str(&compile_declaration(
                &field_t,
                &format!("${}", field.name.as_deref().unwrap_or("")),
            ));
        }
        if arg_sig.is_empty() {
            arg_sig.push_str("void");
        }
        let type_name =
            naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$type"));
        let tagged_name = naming::namespace_name(
            env,
            env.namespace.as_ref(),
            &format!("{name}$tagged${}", tag.name),
        );
        let tag_const = naming::namespace_name(
            env,
            env.namespace.as_ref(),
            &format!("{name}$tag${}", tag.name),
        );
        let mut constructor = format!(
            "public inline {type_name} {tagged_name}({arg_sig}) {{ return ({type_name}){{.$tag={tag_const}, .{}={{",
            naming::valid_c_name(&tag.name)
        );
        for (i, field) in tag.fields.iter().enumerate() {
            if i > 0 {
                constructor.push_str(", ");
            }
            constructor.push_str(&format!("${}", field.name.as_deref().unwrap_or("")));
        }
        constructor.push_str("}}; }\n");
        constructors.push_str(&constructor);
    }
    Ok(constructors)
}

/// The header text for an enum: tag constants, the tagged-struct layout (or
/// plain enum when no tag has a payload), constructor declarations and the
/// typeinfo extern.
pub fn compile_enum_header(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::EnumDef { name, tags, .. } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an enum definition");
    };
    let none_name = naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$none"));
    let enum_name = naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$enum"));
    let mut enum_tags = format!("{{ {none_name}=0, ");
    let mut has_any_fields = false;
    for (i, tag) in tags.iter().enumerate() {
        let tag_const = naming::namespace_name(
            env,
            env.namespace.as_ref(),
            &format!("{name}$tag${}", tag.name),
        );
        enum_tags.push_str(&tag_const);
        if i + 1 < tags.len() {
            enum_tags.push_str(", ");
        }
        has_any_fields = has_any_fields || tag_has_fields(tag);
    }
    enum_tags.push_str(" }");

    let info_name = naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$info"));
    let mut all_defs = String::new();
    let struct_name =
        naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$struct"));
    let mut enum_def = format!("struct {struct_name} {{\nenum {enum_name} {enum_tags} $tag;\n");
    if has_any_fields {
        enum_def.push_str("union {\n");
    }
    for tag in tags {
        if !tag_has_fields(tag) {
            continue;
        }
        let field_def = compile_struct_header(
            env,
            &ast.wrap(Ast::StructDef {
                name: format!("{name}${}", tag.name),
                fields: tag.fields.clone(),
                namespace: None,
                secret: tag.secret,
                external: false,
                opaque: false,
            }),
        )?;
        all_defs.push_str(&field_def);
        let tag_type = naming::namespace_name(
            env,
            env.namespace.as_ref(),
            &format!("{name}${}$$type", tag.name),
        );
        enum_def.push_str(&format!("{tag_type} {};\n", naming::valid_c_name(&tag.name)));
    }
    if has_any_fields {
        enum_def.push_str("};\n");
    }
    enum_def.push_str("};\n");
    all_defs.push_str(&enum_def);
    all_defs.push_str(&format!("extern const TypeInfo_t {info_name};\n"));

    for tag in tags {
        if !tag_has_fields(tag) {
            continue;
        }
        let mut arg_sig = String::new();
        for (i, field) in tag.fields.iter().enumerate() {
            let field_t = get_arg_ast_type(env, field)?;
            if i > 0 {
                arg_sig.push_str(", ");
            }
            arg_sig.push_str(&compile_declaration(
                &field_t,
                &format!("${}", field.name.as_deref().unwrap_or("")),
            ));
        }
        if arg_sig.is_empty() {
            arg_sig.push_str("void");
        }
        let enum_type =
            naming::namespace_name(env, env.namespace.as_ref(), &format!("{name}$$type"));
        let tagged_name = naming::namespace_name(
            env,
            env.namespace.as_ref(),
            &format!("{name}$tagged${}", tag.name),
        );
        all_defs.push_str(&format!("{enum_type} {tagged_name}({arg_sig});\n"));
    }
    Ok(all_defs)
}

/// The zero value of an enum: its first tag with an empty payload.
pub fn compile_empty_enum(t: &Type) -> CResult<String> {
    let Type::Enum(info) = t else {
        return Err(crate::diagnostics::CompileError::new(
            ErrorKind::InvalidExpression,
            "This is not an enum type".to_string(),
        ));
    };
    let info = info.borrow();
    let Some(tag) = info.tags.first() else {
        return Ok(String::new());
    };
    let payload_has_fields = match &tag.payload {
        Type::Struct(payload) => !payload.borrow().fields.is_empty(),
        _ => false,
    };
    if payload_has_fields {
        let empty_payload = compile_empty_struct(&tag.payload)?;
        if empty_payload.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(
            "(({}){{.$tag={}, .{}={empty_payload}}})",
            compile_type(t),
            tag.tag_value,
            naming::valid_c_name(&tag.name)
        ))
    } else {
        Ok(format!("(({}){{.$tag={}}})", compile_type(t), tag.tag_value))
    }
}

/// Field access on an enum is a tag test (`e.Tag` is a `Bool`), or an
/// optional payload extraction for payload-carrying tags.
pub fn compile_enum_field_access(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::FieldAccess { fielded, field } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a field access");
    };
    let fielded_t = get_type(env, fielded)?;
    let val_t = value_type(&fielded_t);
    let Type::Enum(info) = &val_t else {
        code_err!(ast, ErrorKind::TypeMismatch, "This is not an enum value");
    };
    let tag_data = {
        let info = info.borrow();
        info.tags.iter().find(|tag| tag.name == *field).map(|tag| {
            let tag_const = naming::namespace_name(
                &info.env,
                info.env.namespace.as_ref(),
                &format!("tag${}", tag.name),
            );
            let has_payload = match &tag.payload {
                Type::Struct(payload) => !payload.borrow().fields.is_empty(),
                _ => false,
            };
            (tag_const, tag.payload.clone(), has_payload)
        })
    };
    let Some((tag_const, payload, has_payload)) = tag_data else {
        code_err!(ast, ErrorKind::UnknownName,
            "The field '{field}' is not a valid tag name of {val_t}");
    };

    let subject = super::pointers::compile_to_pointer_depth(env, fielded, 0, false)?;
    if !has_payload {
        return Ok(format!("(({subject}).$tag == {tag_const})"));
    }

    // Payload access yields an optional payload value:
    Ok(format!(
        "({{ {decl} = {subject}; (_enum.$tag == {tag_const}) ? {some} : {none}; }})",
        decl = compile_declaration(&val_t, "_enum"),
        some = super::optionals::promote_to_optional(
            &payload,
            &format!("_enum.{}", naming::valid_c_name(field))
        ),
        none = super::optionals::compile_none(&payload)?,
    ))
}
