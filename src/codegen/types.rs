//! C type spellings and runtime `TypeInfo_t` expressions for `Type` values.

use crate::environment::naming::namespace_name;
use crate::types::Type;

/// Whether a text type is the runtime-provided `Path` lang (which has its
/// own C type) rather than a user-defined lang.
fn is_builtin_lang(info: &crate::types::TextInfo) -> bool {
    info.env.id_suffix.is_empty()
}

/// The C type used to spell `t` in generated code.
pub fn compile_type(t: &Type) -> String {
    match t {
        Type::Return(_) | Type::Abort | Type::Void | Type::Memory => "void".into(),
        Type::Bool => "Bool_t".into(),
        Type::Byte => "Byte_t".into(),
        Type::CString => "const char*".into(),
        Type::BigInt => "Int_t".into(),
        Type::Int { bits } => format!("Int{bits}_t"),
        Type::Num { bits: 64 } => "Num_t".into(),
        Type::Num { bits } => format!("Num{bits}_t"),
        Type::Text(info) => {
            if info.lang == "Text" {
                "Text_t".into()
            } else if is_builtin_lang(info) {
                format!("{}_t", info.lang)
            } else {
                namespace_name(&info.env, info.env.namespace.as_ref(), "$type")
            }
        }
        Type::List { .. } => "List_t".into(),
        Type::Set { .. } | Type::Table(_) => "Table_t".into(),
        Type::Function(info) => {
            let mut code = format!("{} (*)(", compile_type(&info.ret));
            if info.args.is_empty() {
                code.push_str("void");
            }
            for (i, arg) in info.args.iter().enumerate() {
                if i > 0 {
                    code.push_str(", ");
                }
                code.push_str(&compile_type(arg.ty.as_ref().unwrap_or(&Type::Void)));
            }
            code.push(')');
            code
        }
        Type::Closure(_) => "Closure_t".into(),
        Type::Pointer { pointed, .. } => format!("{}*", compile_type(pointed)),
        Type::Struct(info) => {
            let info = info.borrow();
            if info.external {
                info.name.clone()
            } else {
                format!("struct {}", namespace_name(&info.env, info.env.namespace.as_ref(), "$struct"))
            }
        }
        Type::Enum(info) => {
            let info = info.borrow();
            namespace_name(&info.env, info.env.namespace.as_ref(), "$type")
        }
        Type::Optional(inner) => {
            let Some(nonnull) = inner.as_deref() else {
                return "void".into();
            };
            match nonnull {
                Type::CString
                | Type::Function(_)
                | Type::Closure(_)
                | Type::Pointer { .. }
                | Type::Enum(_) => compile_type(nonnull),
                Type::Text(info) => {
                    if info.lang == "Text" {
                        "OptionalText_t".into()
                    } else if is_builtin_lang(info) {
                        format!("Optional{}_t", info.lang)
                    } else {
                        compile_type(nonnull)
                    }
                }
                Type::Int { .. }
                | Type::BigInt
                | Type::Num { .. }
                | Type::Bool
                | Type::Byte
                | Type::List { .. }
                | Type::Table(_)
                | Type::Set { .. } => format!("Optional{}", compile_type(nonnull)),
                Type::Struct(s) => {
                    let s = s.borrow();
                    namespace_name(
                        &s.env,
                        s.env.namespace.as_ref().and_then(|ns| ns.parent.as_ref()),
                        &format!("$Optional{}$$type", s.name),
                    )
                }
                _ => compile_type(nonnull),
            }
        }
        Type::TypeInfo(_) => "TypeInfo_t".into(),
        Type::Module { .. } => "void".into(),
    }
}

/// The C declaration of `name` with type `t` (function pointers need the
/// name spliced into the declarator).
pub fn compile_declaration(t: &Type, name: &str) -> String {
    match t {
        Type::Function(info) => {
            let mut code = format!("{} (*{name})(", compile_type(&info.ret));
            if info.args.is_empty() {
                code.push_str("void");
            }
            for (i, arg) in info.args.iter().enumerate() {
                if i > 0 {
                    code.push_str(", ");
                }
                code.push_str(&compile_type(arg.ty.as_ref().unwrap_or(&Type::Void)));
            }
            code.push(')');
            code
        }
        Type::Module { .. } => String::new(),
        _ => format!("{} {name}", compile_type(t)),
    }
}

/// The unsigned counterpart of a fixed-width int's C type, used by the
/// unsigned shift operators.
pub fn compile_unsigned_type(t: &Type) -> String {
    match t {
        Type::Int { bits } => format!("uint{bits}_t"),
        Type::Byte => "uint8_t".into(),
        _ => "uint64_t".into(),
    }
}

fn quoted_type_str(t: &Type) -> String {
    format!("\"{}\"", t.to_string().replace('"', "\\\""))
}

/// The C expression for the runtime `TypeInfo_t` descriptor of `t`, used by
/// generic runtime functions (`generic_equal`, `generic_as_text`, ...).
pub fn compile_type_info(t: &Type) -> String {
    match t {
        Type::Bool | Type::Byte | Type::Int { .. } | Type::BigInt | Type::Num { .. }
        | Type::CString => {
            format!("&{t}$info")
        }
        Type::Text(info) => {
            if info.lang == "Text" {
                "&Text$info".into()
            } else if is_builtin_lang(info) {
                format!("&{}$info", info.lang)
            } else {
                format!("(&{})", namespace_name(&info.env, info.env.namespace.as_ref(), "$info"))
            }
        }
        Type::Struct(info) => {
            let info = info.borrow();
            format!("(&{})", namespace_name(&info.env, info.env.namespace.as_ref(), "$info"))
        }
        Type::Enum(info) => {
            let info = info.borrow();
            format!("(&{})", namespace_name(&info.env, info.env.namespace.as_ref(), "$info"))
        }
        Type::List { item } => match item.as_deref() {
            Some(item) => format!("List$info({})", compile_type_info(item)),
            None => "List$info(&Void$info)".into(),
        },
        Type::Set { item } => match item.as_deref() {
            Some(item) => format!("Set$info({})", compile_type_info(item)),
            None => "Set$info(&Void$info)".into(),
        },
        Type::Table(info) => {
            let key = info.key.as_ref().map(compile_type_info).unwrap_or("&Void$info".into());
            let value = info.value.as_ref().map(compile_type_info).unwrap_or("&Void$info".into());
            format!("Table$info({key}, {value})")
        }
        Type::Pointer { pointed, is_stack } => {
            let sigil = if *is_stack { "\"&\"" } else { "\"@\"" };
            format!("Pointer$info({sigil}, {})", compile_type_info(pointed))
        }
        Type::Function(_) => format!("Function$info({})", quoted_type_str(t)),
        Type::Closure(_) => format!("Closure$info({})", quoted_type_str(t)),
        Type::Optional(inner) => match inner.as_deref() {
            Some(nonnull) => format!(
                "Optional$info(sizeof({0}), __alignof__({0}), {1})",
                compile_type(nonnull),
                compile_type_info(nonnull)
            ),
            None => "&Void$info".into(),
        },
        Type::TypeInfo(info) => format!("Type$info({})", quoted_type_str(&info.ty)),
        Type::Memory => "&Memory$info".into(),
        Type::Void => "&Void$info".into(),
        Type::Abort | Type::Return(_) | Type::Module { .. } => "&Void$info".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::global_env;

    #[test]
    fn primitive_type_spellings() {
        let env = global_env(false);
        assert_eq!(compile_type(&Type::int(64)), "Int64_t");
        assert_eq!(compile_type(&Type::BigInt), "Int_t");
        assert_eq!(compile_type(&Type::num(64)), "Num_t");
        assert_eq!(compile_type(&Type::num(32)), "Num32_t");
        assert_eq!(compile_type(&Type::list_of(Type::BigInt)), "List_t");
        assert_eq!(compile_type(&env.get_type("Text").unwrap()), "Text_t");
        assert_eq!(compile_type(&env.get_type("Path").unwrap()), "Path_t");
        assert_eq!(compile_type(&Type::pointer_to(Type::int(32), false)), "Int32_t*");
    }

    #[test]
    fn optional_spellings() {
        assert_eq!(compile_type(&Type::optional(Type::int(64))), "OptionalInt64_t");
        assert_eq!(
            compile_type(&Type::optional(Type::pointer_to(Type::Memory, false))),
            "void*"
        );
        assert_eq!(compile_type(&Type::optional(Type::list_of(Type::Byte))), "OptionalList_t");
    }

    #[test]
    fn type_infos() {
        assert_eq!(compile_type_info(&Type::int(64)), "&Int64$info");
        assert_eq!(compile_type_info(&Type::BigInt), "&Int$info");
        assert_eq!(
            compile_type_info(&Type::list_of(Type::BigInt)),
            "List$info(&Int$info)"
        );
        assert_eq!(
            compile_type_info(&Type::pointer_to(Type::BigInt, true)),
            "Pointer$info(\"&\", &Int$info)"
        );
    }
}
