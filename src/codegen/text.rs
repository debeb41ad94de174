//! Text literals, interpolation, and stringification of arbitrary values.

use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{get_constructor, naming, Env};
use crate::typecheck::get_type;
use crate::types::{type_eq, Type};

use super::types::{compile_type, compile_type_info};

/// Quote a string as a C string literal.
pub fn quoted_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    push_escaped(&mut out, s);
    out.push('"');
    out
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            c => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).as_bytes() {
                    out.push_str(&format!("\\x{byte:02X}\"\""));
                }
            }
        }
    }
}

/// A C string literal with the runtime's escaping conventions.
pub fn compile_text_literal(text: &str) -> String {
    quoted_str(text)
}

/// A C expression that renders `expr` (of type `t`) as a `Text_t`, with the
/// given colorization flag expression.
pub fn expr_as_text(expr: &str, t: &Type, color: &str) -> String {
    match t {
        Type::Memory => format!("Memory$as_text(stack({expr}), {color}, &Memory$info)"),
        // Bools may be bit fields, which can't have their address taken.
        Type::Bool => format!("Bool$as_text((Bool_t[1]){{{expr}}}, {color}, &Bool$info)"),
        Type::CString => format!("CString$as_text(stack({expr}), {color}, &CString$info)"),
        Type::BigInt | Type::Int { .. } | Type::Byte | Type::Num { .. } => {
            format!("{t}$as_text(stack({expr}), {color}, &{t}$info)")
        }
        Type::Text(_) => {
            format!("Text$as_text(stack({expr}), {color}, {})", compile_type_info(t))
        }
        Type::List { .. } => {
            format!("List$as_text(stack({expr}), {color}, {})", compile_type_info(t))
        }
        Type::Set { .. } | Type::Table(_) => {
            format!("Table$as_text(stack({expr}), {color}, {})", compile_type_info(t))
        }
        Type::Function(_) | Type::Closure(_) => {
            format!("Func$as_text(stack({expr}), {color}, {})", compile_type_info(t))
        }
        Type::Pointer { .. } => {
            format!("Pointer$as_text(stack({expr}), {color}, {})", compile_type_info(t))
        }
        Type::Optional(_) => {
            format!("Optional$as_text(stack({expr}), {color}, {})", compile_type_info(t))
        }
        _ => format!("generic_as_text(stack({expr}), {color}, {})", compile_type_info(t)),
    }
}

/// Compile an expression and render it as text.
pub fn compile_text(env: &Env, ast: &Rc<AstNode>, color: &str) -> CResult<String> {
    let t = get_type(env, ast)?;
    let expr = super::expressions::compile(env, ast)?;
    Ok(expr_as_text(&expr, &t, color))
}

/// Compile a `TextLiteral` or `TextJoin` node.
pub fn compile_text_ast(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    if let Ast::TextLiteral { text } = &ast.ast {
        if text.is_empty() {
            return Ok("EMPTY_TEXT".into());
        }
        return Ok(if text.is_ascii() {
            format!("Text({})", compile_text_literal(text))
        } else {
            format!("Text$from_str({})", compile_text_literal(text))
        });
    }

    let Ast::TextJoin { lang, children, colorize } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a text expression");
    };
    let colorize = if *colorize { "yes" } else { "no" };

    let text_t = match lang {
        Some(lang) => match env.get_type(lang) {
            Some(t @ Type::Text(_)) => t,
            _ => code_err!(ast, ErrorKind::UnknownName,
                "'{lang}' is not a valid text language name"),
        },
        None => env.get_type("Text").expect("Text is always defined"),
    };
    let lang_constructor = match lang.as_deref() {
        None | Some("Text") => "Text".to_string(),
        Some(lang) => {
            let Type::Text(info) = &text_t else { unreachable!() };
            naming::namespace_name(
                &info.env,
                info.env.namespace.as_ref().and_then(|ns| ns.parent.as_ref()),
                lang,
            )
        }
    };

    if children.is_empty() {
        return Ok(format!("{lang_constructor}(\"\")"));
    }
    if let [only] = children.as_slice() {
        if let Ast::TextLiteral { text } = &only.ast {
            if text.is_ascii() {
                return Ok(format!("{lang_constructor}({})", compile_text_literal(text)));
            }
            return Ok(format!(
                "(({}){})",
                compile_type(&text_t),
                super::expressions::compile(env, only)?
            ));
        }
    }

    let base_text = env.get_type("Text").expect("Text is always defined");
    let mut chunk_codes = vec![];
    for chunk in children {
        let chunk_t = get_type(env, chunk)?;
        let chunk_code = if matches!(chunk.ast, Ast::TextLiteral { .. }) || type_eq(&chunk_t, &text_t)
        {
            super::expressions::compile(env, chunk)?
        } else {
            let args = vec![crate::ast::ArgAst::positional(chunk.clone())];
            let allow_underscores = env
                .current_type
                .as_ref()
                .map(|cur| type_eq(cur, &text_t))
                .unwrap_or(false);
            if let Some(constructor) = get_constructor(env, &text_t, &args, allow_underscores)? {
                let Some(fn_info) = constructor.ty.fn_info() else { unreachable!() };
                format!(
                    "{}({})",
                    constructor.code,
                    super::functions::compile_arguments(env, ast, &fn_info.args, &args)?
                )
            } else if type_eq(&text_t, &base_text) {
                if matches!(chunk_t, Type::Text(_)) {
                    super::expressions::compile(env, chunk)?
                } else {
                    compile_text(env, chunk, colorize)?
                }
            } else {
                code_err!(chunk, ErrorKind::TypeMismatch,
                    "I don't know how to convert {chunk_t} to {text_t}");
            }
        };
        chunk_codes.push(chunk_code);
    }
    if chunk_codes.len() > 1 {
        Ok(format!("{lang_constructor}s({})", chunk_codes.join(", ")))
    } else {
        Ok(chunk_codes.pop().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_are_escaped() {
        assert_eq!(quoted_str("hi"), "\"hi\"");
        assert_eq!(quoted_str("a\"b"), "\"a\\\"b\"");
        assert_eq!(quoted_str("line\n"), "\"line\\n\"");
    }

    #[test]
    fn ascii_literals_use_the_text_macro() {
        let env = crate::environment::global_env(false);
        let lit = AstNode::fake(Ast::TextLiteral { text: "hello".into() });
        assert_eq!(compile_text_ast(&env, &lit).unwrap(), "Text(\"hello\")");
        let empty = AstNode::fake(Ast::TextLiteral { text: String::new() });
        assert_eq!(compile_text_ast(&env, &empty).unwrap(), "EMPTY_TEXT");
    }

    #[test]
    fn interpolation_stringifies_non_text_chunks() {
        let env = crate::environment::global_env(false);
        let join = AstNode::fake(Ast::TextJoin {
            lang: None,
            children: vec![
                AstNode::fake(Ast::TextLiteral { text: "x = ".into() }),
                AstNode::fake(Ast::Int { text: "5".into() }),
            ],
            colorize: false,
        });
        let code = compile_text_ast(&env, &join).unwrap();
        assert!(code.starts_with("Texts("), "got: {code}");
        assert!(code.contains("Int$as_text"), "got: {code}");
    }
}
