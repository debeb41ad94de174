//! Field access: struct fields, enum tag tests, container pseudo-fields
//! (`length`, `keys`, `values`, ...), namespace constants and module
//! members.

use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::Env;
use crate::typecheck::get_type;
use crate::types::{type_eq, value_type, Type};

use super::pointers::compile_to_pointer_depth;
use super::types::compile_declaration;

pub fn compile_field_access(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::FieldAccess { fielded, field } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a field access");
    };
    let fielded_t = get_type(env, fielded)?;
    let val_t = value_type(&fielded_t);
    match &val_t {
        Type::TypeInfo(info) => {
            if field.starts_with('_') {
                let in_definition = env
                    .current_type
                    .as_ref()
                    .map(|cur| type_eq(cur, &info.ty))
                    .unwrap_or(false);
                if !in_definition {
                    code_err!(ast, ErrorKind::PrivateAccess,
                        "Fields that start with underscores are not accessible on types outside of the type definition");
                }
            }
            let Some(b) = info.env.get_binding(field) else {
                code_err!(ast, ErrorKind::UnknownName,
                    "I couldn't find the field '{field}' on this type");
            };
            if b.code.is_empty() {
                code_err!(ast, ErrorKind::UnknownName,
                    "I couldn't figure out how to compile this field");
            }
            Ok(b.code)
        }
        Type::Text(info) => {
            if info.lang != "Text" && field == "text" {
                let text = compile_to_pointer_depth(env, fielded, 0, false)?;
                Ok(format!("((Text_t){text})"))
            } else if field == "length" {
                Ok(format!(
                    "Int$from_int64(({}).length)",
                    compile_to_pointer_depth(env, fielded, 0, false)?
                ))
            } else {
                code_err!(ast, ErrorKind::UnknownName,
                    "There is no '{field}' field on {val_t} values")
            }
        }
        Type::Struct(_) => compile_struct_field_access(env, ast),
        Type::Enum(_) => super::enums::compile_enum_field_access(env, ast),
        Type::List { .. } => {
            if field == "length" {
                Ok(format!(
                    "Int$from_int64(({}).length)",
                    compile_to_pointer_depth(env, fielded, 0, false)?
                ))
            } else {
                code_err!(ast, ErrorKind::UnknownName, "There is no '{field}' field on lists")
            }
        }
        Type::Set { .. } => match field.as_str() {
            "items" => Ok(format!(
                "LIST_COPY(({}).entries)",
                compile_to_pointer_depth(env, fielded, 0, false)?
            )),
            "length" => Ok(format!(
                "Int$from_int64(({}).entries.length)",
                compile_to_pointer_depth(env, fielded, 0, false)?
            )),
            _ => code_err!(ast, ErrorKind::UnknownName, "There is no '{field}' field on sets"),
        },
        Type::Table(info) => match field.as_str() {
            "length" => Ok(format!(
                "Int$from_int64(({}).entries.length)",
                compile_to_pointer_depth(env, fielded, 0, false)?
            )),
            "keys" => Ok(format!(
                "LIST_COPY(({}).entries)",
                compile_to_pointer_depth(env, fielded, 0, false)?
            )),
            "values" => {
                let (Some(key_t), Some(value_t)) = (&info.key, &info.value) else {
                    code_err!(ast, ErrorKind::IncompleteType, "I can't tell what this table holds");
                };
                let offset = format!(
                    "offsetof(struct {{ {}; {}; }}, v)",
                    compile_declaration(key_t, "k"),
                    compile_declaration(value_t, "v")
                );
                Ok(format!(
                    "({{ List_t *entries = &({}).entries;\nLIST_INCREF(*entries);\nList_t values = *entries;\nvalues.data += {offset};\nvalues; }})",
                    compile_to_pointer_depth(env, fielded, 0, false)?
                ))
            }
            "fallback" => Ok(format!(
                "({{ Table_t *_fallback = ({}).fallback; _fallback ? *_fallback : NONE_TABLE; }})",
                compile_to_pointer_depth(env, fielded, 0, false)?
            )),
            _ => code_err!(ast, ErrorKind::UnknownName, "There is no '{field}' field on tables"),
        },
        Type::Module { name } => {
            let module_env = env.imports.borrow().get(name).cloned();
            let Some(module_env) = module_env else {
                code_err!(fielded, ErrorKind::UnknownName,
                    "I couldn't find the environment for the module {name}");
            };
            super::expressions::compile(&module_env, &ast.wrap(Ast::Var(field.clone())))
        }
        _ => code_err!(ast, ErrorKind::TypeMismatch,
            "Field accesses are not supported on {fielded_t} values"),
    }
}

pub fn compile_struct_field_access(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::FieldAccess { fielded, field } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a field access");
    };
    let fielded_t = get_type(env, fielded)?;
    let val_t = value_type(&fielded_t);
    let Type::Struct(info) = &val_t else {
        code_err!(ast, ErrorKind::TypeMismatch, "This is not a struct value");
    };
    let has_field = info.borrow().fields.iter().any(|f| f.name == *field);
    if !has_field {
        code_err!(ast, ErrorKind::UnknownName,
            "The field '{field}' is not a valid field name of {val_t}");
    }
    let c_field = crate::environment::naming::valid_c_name(field);
    if matches!(fielded_t, Type::Pointer { .. }) {
        let fielded_code = compile_to_pointer_depth(env, fielded, 1, false)?;
        Ok(format!("({fielded_code})->{c_field}"))
    } else {
        let fielded_code = super::expressions::compile(env, fielded)?;
        Ok(format!("({fielded_code}).{c_field}"))
    }
}
