//! Integer and float literal emission.
//!
//! Integer literals dispatch on magnitude: small values use the compact
//! `I_small` constructor, values that fit in 64 bits go through
//! `Int$from_int64`, and anything larger is parsed from a string at runtime.

use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::Env;
use crate::types::Type;

/// The largest magnitude that fits in the runtime's small-int payload.
pub const BIGGEST_SMALL_INT: u128 = (1 << 29) - 1;

/// Parse an integer literal's source spelling (decimal, hex `0x`, octal
/// `0o`, binary `0b`, with `_` separators). `None` when out of `i128` range.
pub fn parse_int_literal(text: &str) -> Option<i128> {
    let text = text.trim();
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let digits: String = text.chars().filter(|c| *c != '_').collect();
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i128::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = digits.strip_prefix("0o").or_else(|| digits.strip_prefix("0O")) {
        i128::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        i128::from_str_radix(bin, 2).ok()?
    } else {
        digits.parse::<i128>().ok()?
    };
    Some(if negative { -value } else { value })
}

/// Compile an `Int` literal at its default (big integer) type.
pub fn compile_int(ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Int { text } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an integer literal");
    };
    match parse_int_literal(text) {
        Some(value) if value.unsigned_abs() <= BIGGEST_SMALL_INT => {
            Ok(format!("I_small({text})"))
        }
        Some(value) if i64::try_from(value).is_ok() => Ok(format!("Int$from_int64({text})")),
        Some(_) | None => {
            if text.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '_') {
                Ok(format!("Int$from_str(\"{text}\")"))
            } else {
                code_err!(ast, ErrorKind::InvalidExpression, "Failed to parse this integer")
            }
        }
    }
}

/// Compile an `Int` literal directly at a specific numeric target type,
/// bypassing promotion (the literal just gets the right spelling).
pub fn compile_int_to_type(env: &Env, ast: &Rc<AstNode>, target: &Type) -> CResult<String> {
    let Ast::Int { text } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not an integer literal");
    };
    let target = crate::types::non_optional(target);
    let value = parse_int_literal(text);
    let code = match &target {
        Type::BigInt => compile_int(ast)?,
        Type::Int { bits } => {
            let Some(value) = value else {
                code_err!(ast, ErrorKind::InvalidExpression, "Failed to parse this integer");
            };
            let (min, max): (i128, i128) = match bits {
                8 => (i8::MIN as i128, i8::MAX as i128),
                16 => (i16::MIN as i128, i16::MAX as i128),
                32 => (i32::MIN as i128, i32::MAX as i128),
                _ => (i64::MIN as i128, i64::MAX as i128),
            };
            if value < min || value > max {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "This integer literal does not fit in an Int{bits}");
            }
            format!("I{bits}({value})")
        }
        Type::Byte => {
            let Some(value) = value else {
                code_err!(ast, ErrorKind::InvalidExpression, "Failed to parse this integer");
            };
            if !(0..=255).contains(&value) {
                code_err!(ast, ErrorKind::TypeMismatch,
                    "This integer literal does not fit in a Byte");
            }
            format!("((Byte_t){value})")
        }
        Type::Num { bits } => {
            let Some(value) = value else {
                code_err!(ast, ErrorKind::InvalidExpression, "Failed to parse this integer");
            };
            if *bits == 32 {
                format!("{}f", hex_double(value as f32 as f64))
            } else {
                hex_double(value as f64)
            }
        }
        _ => code_err!(ast, ErrorKind::TypeMismatch,
            "I can't compile an integer literal as a {target}"),
    };
    let _ = env;
    Ok(code)
}

/// Format a float as a C hexadecimal literal (`0x1.8p+1`), which
/// round-trips exactly.
pub fn hex_double(n: f64) -> String {
    if n.is_nan() {
        return "nan(\"\")".into();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-INFINITY".into() } else { "INFINITY".into() };
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0x0p+0".into() } else { "0x0p+0".into() };
    }
    let bits = n.to_bits();
    let sign = if bits >> 63 == 1 { "-" } else { "" };
    let raw_exponent = ((bits >> 52) & 0x7ff) as i64;
    let mantissa = bits & 0x000f_ffff_ffff_ffff;
    let (leading, exponent) = if raw_exponent == 0 {
        (0u64, -1022i64) // subnormal
    } else {
        (1u64, raw_exponent - 1023)
    };
    let mut hex = format!("{mantissa:013x}");
    while hex.len() > 1 && hex.ends_with('0') {
        hex.pop();
    }
    if mantissa == 0 {
        format!("{sign}0x{leading}p{exponent:+}")
    } else {
        format!("{sign}0x{leading}.{hex}p{exponent:+}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_node(text: &str) -> Rc<AstNode> {
        AstNode::fake(Ast::Int { text: text.into() })
    }

    #[test]
    fn small_ints_use_the_compact_constructor() {
        assert_eq!(compile_int(&int_node("42")).unwrap(), "I_small(42)");
        assert_eq!(compile_int(&int_node("-7")).unwrap(), "I_small(-7)");
    }

    #[test]
    fn larger_ints_use_int64_or_strings() {
        assert_eq!(
            compile_int(&int_node("123456789012")).unwrap(),
            "Int$from_int64(123456789012)"
        );
        assert_eq!(
            compile_int(&int_node("170141183460469231731687303715884105727")).unwrap(),
            "Int$from_str(\"170141183460469231731687303715884105727\")"
        );
    }

    #[test]
    fn literals_fit_fixed_widths() {
        let env = crate::environment::global_env(false);
        assert_eq!(
            compile_int_to_type(&env, &int_node("42"), &Type::int(32)).unwrap(),
            "I32(42)"
        );
        assert!(compile_int_to_type(&env, &int_node("300"), &Type::int(8)).is_err());
        assert_eq!(
            compile_int_to_type(&env, &int_node("255"), &Type::Byte).unwrap(),
            "((Byte_t)255)"
        );
    }

    #[test]
    fn hex_doubles_round_trip() {
        assert_eq!(hex_double(1.0), "0x1p+0");
        assert_eq!(hex_double(2.0), "0x1p+1");
        assert_eq!(hex_double(1.5), "0x1.8p+0");
        assert_eq!(hex_double(0.0), "0x0p+0");
        assert_eq!(hex_double(-3.0), "-0x1.8p+1");
    }

    #[test]
    fn literal_radixes_parse() {
        assert_eq!(parse_int_literal("0x10"), Some(16));
        assert_eq!(parse_int_literal("0b101"), Some(5));
        assert_eq!(parse_int_literal("1_000"), Some(1000));
        assert_eq!(parse_int_literal("0o17"), Some(15));
    }
}
