//! Indexing: list element access (bounds-checked), table lookup (with
//! default or optional result), text cluster access, and whole-pointer
//! dereference via `ptr[]`.

use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::Env;
use crate::typecheck::get_type;
use crate::types::{is_int_type, value_type, Type};

use super::expressions::compile;
use super::integers::compile_int_to_type;
use super::optionals::{check_none, compile_none, optional_into_nonnone, promote_to_optional};
use super::pointers::compile_to_pointer_depth;
use super::promotions::compile_to_type;
use super::text::quoted_str;
use super::types::{compile_declaration, compile_type, compile_type_info};

/// The `Int64_t` expression for a list index.
pub fn compile_index_value(env: &Env, index: &Rc<AstNode>) -> CResult<String> {
    if matches!(index.ast, Ast::Int { .. }) {
        return compile_int_to_type(env, index, &Type::int(64));
    }
    let index_t = get_type(env, index)?;
    if matches!(index_t, Type::BigInt) {
        Ok(format!("Int64$from_int({}, no)", compile(env, index)?))
    } else {
        Ok(format!("(Int64_t)({})", compile(env, index)?))
    }
}

pub fn compile_indexing(env: &Env, ast: &Rc<AstNode>, checked: bool) -> CResult<String> {
    let Ast::Index { indexed, index, unchecked } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an index expression");
    };
    let indexed_type = get_type(env, indexed)?;
    let Some(index) = index else {
        let Type::Pointer { pointed, .. } = &indexed_type else {
            code_err!(ast, ErrorKind::TypeMismatch,
                "Only pointers can use the '[]' operator to dereference the entire value");
        };
        return Ok(match pointed.as_ref() {
            Type::List { .. } => format!(
                "*({{ List_t *list = {}; LIST_INCREF(*list); list; }})",
                compile(env, indexed)?
            ),
            Type::Table(_) | Type::Set { .. } => format!(
                "*({{ Table_t *t = {}; TABLE_INCREF(*t); t; }})",
                compile(env, indexed)?
            ),
            _ => format!("*({})", compile(env, indexed)?),
        });
    };

    let container_t = value_type(&indexed_type);
    let index_t = get_type(env, index)?;
    match &container_t {
        Type::List { item } => {
            if !is_int_type(&index_t) {
                code_err!(index, ErrorKind::TypeMismatch,
                    "Lists can only be indexed by integers, not {index_t}");
            }
            let Some(item_type) = item.as_deref() else {
                code_err!(ast, ErrorKind::IncompleteType, "I can't tell what this list holds");
            };
            let list = compile_to_pointer_depth(env, indexed, 0, false)?;
            let index_code = compile_index_value(env, index)?;
            if *unchecked {
                return Ok(format!(
                    "List_get_unchecked({}, {list}, {index_code})",
                    compile_type(item_type)
                ));
            }
            if checked {
                let code = format!(
                    "List_get_checked({list}, {index_code}, {}, {}, {})",
                    compile_type(item_type),
                    index.start,
                    index.end
                );
                if item_type.is_optional() {
                    let line = ast.line_number();
                    return Ok(format!(
                        "({{ {decl} = {code}; if unlikely ({check})\n#line {line}\nfail_source({file}, {start}, {end}, Text(\"This was expected to be a value, but it's `none`\\n\"));\n{unwrapped}; }})",
                        decl = compile_declaration(item_type, "opt"),
                        check = check_none(item_type, "opt")?,
                        file = quoted_str(&ast.file.filename),
                        start = ast.start,
                        end = ast.end,
                        unwrapped = optional_into_nonnone(item_type, "opt"),
                    ));
                }
                return Ok(code);
            }
            if item_type.is_optional() {
                Ok(format!(
                    "List_get({list}, {index_code}, {}, value, value, {})",
                    compile_type(item_type),
                    compile_none(item_type)?
                ))
            } else {
                Ok(format!(
                    "List_get({list}, {index_code}, {}, value, {}, {})",
                    compile_type(item_type),
                    promote_to_optional(item_type, "value"),
                    compile_none(item_type)?
                ))
            }
        }
        Type::Table(info) => {
            if *unchecked {
                code_err!(ast, ErrorKind::ConstraintViolation, "Table indexes cannot be unchecked");
            }
            let (Some(key_type), Some(val_type)) = (&info.key, &info.value) else {
                code_err!(ast, ErrorKind::IncompleteType, "I can't tell what this table holds");
            };
            let table = compile_to_pointer_depth(env, indexed, 0, false)?;
            if let Some(default_value) = &info.default_value {
                return Ok(format!(
                    "Table$get_or_default({table}, {}, {}, {}, {}, {})",
                    compile_type(key_type),
                    compile_type(val_type),
                    compile_to_type(env, index, key_type)?,
                    compile_to_type(env, default_value, val_type)?,
                    compile_type_info(&container_t)
                ));
            }
            if checked {
                return Ok(format!(
                    "Table$get_checked({table}, {}, {}, {}, {}, {}, {})",
                    compile_type(key_type),
                    compile_type(val_type),
                    compile(env, index)?,
                    ast.start,
                    ast.end,
                    compile_type_info(&container_t)
                ));
            }
            Ok(format!(
                "Table$get_optional({table}, {}, {}, {}, _, {}, {}, {})",
                compile_type(key_type),
                compile_type(val_type),
                compile_to_type(env, index, key_type)?,
                promote_to_optional(val_type, "(*_)"),
                compile_none(val_type)?,
                compile_type_info(&container_t)
            ))
        }
        Type::Text(_) => {
            let text = compile_to_pointer_depth(env, indexed, 0, false)?;
            let index_code = compile_to_type(env, index, &Type::BigInt)?;
            if checked {
                Ok(format!(
                    "Text$cluster_checked({text}, {index_code}, {}, {})",
                    ast.start, ast.end
                ))
            } else {
                Ok(format!("Text$cluster({text}, {index_code})"))
            }
        }
        _ => code_err!(ast, ErrorKind::TypeMismatch,
            "Indexing is not supported for type: {container_t}"),
    }
}
