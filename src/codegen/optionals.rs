//! Compilation of optional values: `none` constants, none-checks, wrapping
//! and unwrapping.
//!
//! Pointer-like types represent `none` in-band (null pointer, zero tag, NaN)
//! so wrapping them is free; ints, bytes and structs get a `has_value`
//! wrapper struct.

use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::Env;
use crate::typecheck::get_type;
use crate::types::{non_optional, value_type, Type};

use super::types::{compile_declaration, compile_type};

/// Unwrap an optional expression known to hold a value.
pub fn optional_into_nonnone(t: &Type, value: &str) -> String {
    let t = non_optional(t);
    match t {
        Type::Int { .. } | Type::Byte | Type::Struct(_) => format!("{value}.value"),
        _ => value.to_string(),
    }
}

/// Wrap a non-optional value as its optional representation.
pub fn promote_to_optional(t: &Type, code: &str) -> String {
    match t {
        Type::Int { bits } => {
            format!("((OptionalInt{bits}_t){{.has_value=true, .value={code}}})")
        }
        Type::Byte => format!("((OptionalByte_t){{.has_value=true, .value={code}}})"),
        Type::Struct(_) => format!(
            "(({}){{.has_value=true, .value={code}}})",
            compile_type(&Type::optional(t.clone()))
        ),
        _ => code.to_string(),
    }
}

/// The `none` constant for an optional of `t`.
pub fn compile_none(t: &Type) -> CResult<String> {
    let t = non_optional(t);
    Ok(match &t {
        Type::BigInt => "NONE_INT".into(),
        Type::Int { bits } => format!("NONE_INT{bits}"),
        Type::Bool => "NONE_BOOL".into(),
        Type::Byte => "NONE_BYTE".into(),
        Type::Num { .. } => "nan(\"none\")".into(),
        Type::List { .. } => "NONE_LIST".into(),
        Type::Set { .. } | Type::Table(_) => "NONE_TABLE".into(),
        Type::Text(info) => {
            if info.lang == "Path" && info.env.id_suffix.is_empty() {
                "NONE_PATH".into()
            } else {
                "NONE_TEXT".into()
            }
        }
        Type::CString => "NULL".into(),
        Type::Pointer { .. } => format!("(({})NULL)", compile_type(&t)),
        Type::Closure(_) => "NONE_CLOSURE".into(),
        Type::Struct(_) => format!(
            "(({}){{.has_value=false}})",
            compile_type(&Type::optional(t.clone()))
        ),
        Type::Enum(info) => {
            let info = info.borrow();
            let none_tag = crate::environment::naming::namespace_name(
                &info.env,
                info.env.namespace.as_ref().and_then(|ns| ns.parent.as_ref()),
                &format!("{}$none", info.name),
            );
            format!("(({}){{{none_tag}}})", compile_type(&t))
        }
        _ => {
            return Err(crate::diagnostics::CompileError::new(
                ErrorKind::IncompleteType,
                format!("none isn't implemented for this type: {t}"),
            ))
        }
    })
}

/// A C expression testing whether an optional value is `none`.
pub fn check_none(t: &Type, value: &str) -> CResult<String> {
    let t = non_optional(t);
    Ok(match &t {
        Type::Pointer { .. } | Type::Function(_) | Type::CString => format!("({value} == NULL)"),
        Type::BigInt => format!("(({value}).small == 0)"),
        Type::Closure(_) => format!("(({value}).fn == NULL)"),
        Type::Num { bits: 64 } => format!("Num$isnan({value})"),
        Type::Num { .. } => format!("Num32$isnan({value})"),
        Type::List { .. } => format!("(({value}).data == NULL)"),
        Type::Set { .. } | Type::Table(_) => format!("(({value}).entries.data == NULL)"),
        Type::Bool => format!("(({value}) == NONE_BOOL)"),
        Type::Text(_) => format!("(({value}).tag == TEXT_NONE)"),
        Type::Int { .. } | Type::Byte | Type::Struct(_) => format!("!({value}).has_value"),
        Type::Enum(_) => format!("(({value}).$tag == 0)"),
        _ => {
            return Err(crate::diagnostics::CompileError::new(
                ErrorKind::IncompleteType,
                format!("Optional check not implemented for: {t}"),
            ))
        }
    })
}

/// Compile `value?`, wrapping a value as optional.
pub fn compile_optional(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Optional { value } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an optional expression");
    };
    let t = get_type(env, value)?;
    let value_code = super::expressions::compile(env, value)?;
    Ok(promote_to_optional(&t, &value_code))
}

/// Compile `value!`, unwrapping an optional with a runtime none-check that
/// aborts with the source span on failure.
pub fn compile_non_optional(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::NonOptional { value } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a '!' expression");
    };
    if let Ast::Index { index: Some(_), .. } = &value.ast {
        return super::indexing::compile_indexing(env, value, true);
    }
    let value_t = get_type(env, value)?;
    if matches!(value_t, Type::Pointer { .. }) {
        // Dereference pointers automatically.
        let deref = ast.wrap(Ast::NonOptional {
            value: ast.wrap(Ast::Index { indexed: value.clone(), index: None, unchecked: false }),
        });
        return compile_non_optional(env, &deref);
    }

    // `e!` on an enum desugars to `e.FirstTag!`:
    if let Type::Enum(info) = &value_t {
        let first_tag = info.borrow().tags.first().map(|tag| tag.name.clone());
        let Some(first_tag) = first_tag else {
            code_err!(ast, ErrorKind::ConstraintViolation, "'!' cannot be used on an empty enum");
        };
        let access = ast.wrap(Ast::NonOptional {
            value: value.wrap(Ast::FieldAccess { fielded: value.clone(), field: first_tag }),
        });
        return compile_non_optional(env, &access);
    }

    // `e.Tag!` extracts a tag's payload with a runtime tag check:
    if let Ast::FieldAccess { fielded, field } = &value.ast {
        let enum_t = value_type(&get_type(env, fielded)?);
        if let Type::Enum(info) = &enum_t {
            let tag = {
                let info = info.borrow();
                info.tags.iter().find(|tag| tag.name == *field).map(|tag| {
                    let tag_const = crate::environment::naming::namespace_name(
                        &info.env,
                        info.env.namespace.as_ref(),
                        &format!("tag${}", tag.name),
                    );
                    (tag_const, tag.name.clone())
                })
            };
            let Some((tag_const, tag_name)) = tag else {
                code_err!(value, ErrorKind::UnknownName,
                    "The field '{field}' is not a valid tag name of {enum_t}");
            };
            let line = ast.line_number();
            let subject = super::pointers::compile_to_pointer_depth(env, fielded, 0, true)?;
            let payload_code =
                format!("_test_enum.{}", crate::environment::naming::valid_c_name(&tag_name));
            return Ok(format!(
                "({{ {decl} = {subject}; if unlikely (_test_enum.$tag != {tag_const}) {{\n#line {line}\nfail_source({file}, {start}, {end}, \"This was expected to be {tag_name}, but it was: \", {as_text}, \"\\n\");\n}}\n{payload_code}; }})",
                decl = compile_declaration(&enum_t, "_test_enum"),
                file = super::text::quoted_str(&fielded.file.filename),
                start = fielded.start,
                end = fielded.end,
                as_text = super::text::expr_as_text("_test_enum", &enum_t, "no"),
            ));
        }
    }

    let value_code = super::expressions::compile(env, value)?;
    let line = ast.line_number();
    Ok(format!(
        "({{ {decl} = {value_code}; if unlikely ({check})\n#line {line}\nfail_source({file}, {start}, {end}, \"This was expected to be a value, but it's `none`\\n\");\n{unwrapped}; }})",
        decl = compile_declaration(&value_t, "opt"),
        check = check_none(&value_t, "opt")?,
        file = super::text::quoted_str(&value.file.filename),
        start = value.start,
        end = value.end,
        unwrapped = optional_into_nonnone(&value_t, "opt"),
        line = line,
        value_code = value_code,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_cost_optionals_pass_through() {
        let ptr = Type::pointer_to(Type::BigInt, false);
        assert_eq!(promote_to_optional(&ptr, "p"), "p");
        assert_eq!(check_none(&Type::optional(ptr), "p").unwrap(), "(p == NULL)");
    }

    #[test]
    fn flagged_optionals_wrap() {
        let t = Type::int(64);
        assert_eq!(
            promote_to_optional(&t, "x"),
            "((OptionalInt64_t){.has_value=true, .value=x})"
        );
        assert_eq!(check_none(&Type::optional(t.clone()), "x").unwrap(), "!(x).has_value");
        assert_eq!(optional_into_nonnone(&Type::optional(t), "x"), "x.value");
    }

    #[test]
    fn none_constants() {
        assert_eq!(compile_none(&Type::BigInt).unwrap(), "NONE_INT");
        assert_eq!(compile_none(&Type::int(32)).unwrap(), "NONE_INT32");
        assert_eq!(compile_none(&Type::list_of(Type::Bool)).unwrap(), "NONE_LIST");
        assert_eq!(compile_none(&Type::num(64)).unwrap(), "nan(\"none\")");
    }
}
