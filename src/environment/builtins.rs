//! Construction of the global environment: primitive types, their namespace
//! methods and constants, conversion constructors, and built-in globals.
//!
//! The catalogs below bind Tomo-visible names to the runtime library's C
//! symbols. Registration order of conversion constructors matters: lookups
//! scan the list from the end, so later registrations shadow earlier ones.

use std::rc::Rc;

use crate::ast::{Ast, AstNode};
use crate::types::{Arg, TextInfo, Type};

use super::{namespace_env, Binding, Env};

fn fake_int(text: &str) -> Rc<AstNode> {
    AstNode::fake(Ast::Int { text: text.into() })
}

fn fake_num(n: f64) -> Rc<AstNode> {
    AstNode::fake(Ast::Num { n })
}

fn fake_bool(b: bool) -> Rc<AstNode> {
    AstNode::fake(Ast::Bool(b))
}

fn fake_none() -> Rc<AstNode> {
    AstNode::fake(Ast::None)
}

fn fake_text(text: &str) -> Rc<AstNode> {
    AstNode::fake(Ast::TextLiteral { text: text.into() })
}

fn a(name: &str, ty: Type) -> Arg {
    Arg::new(name, ty)
}

fn a_d(name: &str, ty: Type, default: Rc<AstNode>) -> Arg {
    Arg::with_default(name, ty, default)
}

fn func(args: Vec<Arg>, ret: Type) -> Type {
    Type::function(args, ret)
}

/// `func(-> T?)` iterator closures returned by `to`/`onward`/`by_line`.
fn iterator_of(t: Type) -> Type {
    Type::closure(vec![], Type::optional(t))
}

fn method(ns: &Env, name: &str, ty: Type, code: &str) {
    ns.set_binding(name, ty, code);
}

fn constant(ns: &Env, name: &str, ty: Type, code: &str) {
    ns.set_binding(name, ty, code);
}

/// Register a type name: the type itself in `env.types` plus a `TypeInfo`
/// binding so the name works in expression position.
fn register_type(env: &Env, name: &str, ty: Type, ns_env: &Env) {
    env.set_type(name, ty.clone());
    let info = Type::TypeInfo(Rc::new(crate::types::TypeInfoInfo {
        name: name.to_string(),
        ty,
        env: ns_env.clone(),
    }));
    env.globals.borrow_mut().set(name.to_string(), Binding::new(info, format!("{name}$info")));
}

fn add_constructor(ns_env: &Env, code: &str, args: Vec<Arg>, ret: Type) {
    let ns = ns_env.namespace.as_ref().expect("constructor namespace");
    ns.constructors
        .borrow_mut()
        .push(Binding::new(Type::function(args, ret), code));
}

/// Build the root environment all compilation starts from.
pub fn global_env(source_mapping: bool) -> Env {
    let env = Env::root(source_mapping);

    let text_env = namespace_env(&env, "Text");
    let text_t = Type::Text(Rc::new(TextInfo { lang: "Text".into(), env: text_env.clone() }));
    let path_env = namespace_env(&env, "Path");
    let path_t = Type::Text(Rc::new(TextInfo { lang: "Path".into(), env: path_env.clone() }));

    let void_env = namespace_env(&env, "Void");
    register_type(&env, "Void", Type::Void, &void_env);
    let abort_env = namespace_env(&env, "Abort");
    register_type(&env, "Abort", Type::Abort, &abort_env);
    let memory_env = namespace_env(&env, "Memory");
    register_type(&env, "Memory", Type::Memory, &memory_env);

    bind_bool(&env, &text_t);
    bind_byte(&env, &text_t);
    bind_bigint(&env, &text_t);
    for bits in [64u8, 32, 16, 8] {
        bind_sized_int(&env, bits, &text_t);
    }
    for bits in [64u8, 32] {
        bind_num(&env, bits, &text_t);
    }
    bind_cstring(&env, &text_t);
    bind_text(&env, &text_t, &text_env);
    bind_path(&env, &path_t, &text_t, &path_env);

    add_numeric_constructors(&env);
    add_path_constructors(&env, &path_t, &text_t);

    bind_globals(&env, &text_t);

    env
}

fn bind_bool(env: &Env, text_t: &Type) {
    let ns = namespace_env(env, "Bool");
    register_type(env, "Bool", Type::Bool, &ns);
    method(
        &ns,
        "parse",
        func(
            vec![
                a("text", text_t.clone()),
                a_d(
                    "remainder",
                    Type::optional(Type::pointer_to(text_t.clone(), true)),
                    fake_none(),
                ),
            ],
            Type::optional(Type::Bool),
        ),
        "Bool$parse",
    );
}

fn bind_byte(env: &Env, text_t: &Type) {
    let ns = namespace_env(env, "Byte");
    register_type(env, "Byte", Type::Byte, &ns);
    method(
        &ns,
        "get_bit",
        func(vec![a("x", Type::Byte), a("bit_index", Type::BigInt)], Type::Bool),
        "Byte$get_bit",
    );
    method(
        &ns,
        "hex",
        func(
            vec![
                a("byte", Type::Byte),
                a_d("uppercase", Type::Bool, fake_bool(true)),
                a_d("prefix", Type::Bool, fake_bool(false)),
            ],
            text_t.clone(),
        ),
        "Byte$hex",
    );
    method(
        &ns,
        "is_between",
        func(vec![a("x", Type::Byte), a("low", Type::Byte), a("high", Type::Byte)], Type::Bool),
        "Byte$is_between",
    );
    constant(&ns, "max", Type::Byte, "Byte$max");
    constant(&ns, "min", Type::Byte, "Byte$min");
    method(
        &ns,
        "parse",
        func(
            vec![
                a("text", text_t.clone()),
                a_d(
                    "remainder",
                    Type::optional(Type::pointer_to(text_t.clone(), true)),
                    fake_none(),
                ),
            ],
            Type::optional(Type::Byte),
        ),
        "Byte$parse",
    );
    method(
        &ns,
        "to",
        func(
            vec![
                a("first", Type::Byte),
                a("last", Type::Byte),
                a_d("step", Type::optional(Type::int(8)), fake_none()),
            ],
            iterator_of(Type::Byte),
        ),
        "Byte$to",
    );
}

fn bind_bigint(env: &Env, text_t: &Type) {
    let ns = namespace_env(env, "Int");
    register_type(env, "Int", Type::BigInt, &ns);
    let int = Type::BigInt;
    let un = |arg_name: &str| func(vec![a(arg_name, int.clone())], int.clone());
    let bin = |name_x: &str, name_y: &str| {
        func(vec![a(name_x, int.clone()), a(name_y, int.clone())], int.clone())
    };
    method(&ns, "abs", un("x"), "Int$abs");
    method(&ns, "negated", un("x"), "Int$negated");
    method(&ns, "negative", un("x"), "Int$negative");
    method(&ns, "factorial", un("x"), "Int$factorial");
    method(&ns, "next_prime", un("x"), "Int$next_prime");
    method(&ns, "sqrt", func(vec![a("x", int.clone())], Type::optional(int.clone())), "Int$sqrt");
    method(&ns, "plus", bin("x", "y"), "Int$plus");
    method(&ns, "minus", bin("x", "y"), "Int$minus");
    method(&ns, "times", bin("x", "y"), "Int$times");
    method(&ns, "divided_by", bin("x", "y"), "Int$divided_by");
    method(&ns, "modulo", bin("x", "y"), "Int$modulo");
    method(&ns, "modulo1", bin("x", "y"), "Int$modulo1");
    method(&ns, "gcd", bin("x", "y"), "Int$gcd");
    method(&ns, "choose", bin("x", "y"), "Int$choose");
    method(&ns, "left_shifted", bin("x", "y"), "Int$left_shifted");
    method(&ns, "right_shifted", bin("x", "y"), "Int$right_shifted");
    method(&ns, "bit_and", bin("x", "y"), "Int$bit_and");
    method(&ns, "bit_or", bin("x", "y"), "Int$bit_or");
    method(&ns, "bit_xor", bin("x", "y"), "Int$bit_xor");
    method(
        &ns,
        "power",
        func(vec![a("base", int.clone()), a("exponent", int.clone())], int.clone()),
        "Int$power",
    );
    method(
        &ns,
        "clamped",
        func(vec![a("x", int.clone()), a("low", int.clone()), a("high", int.clone())], int.clone()),
        "Int$clamped",
    );
    method(
        &ns,
        "is_between",
        func(vec![a("x", int.clone()), a("low", int.clone()), a("high", int.clone())], Type::Bool),
        "Int$is_between",
    );
    method(
        &ns,
        "is_prime",
        func(vec![a("x", int.clone()), a_d("reps", int.clone(), fake_int("50"))], Type::Bool),
        "Int$is_prime",
    );
    method(
        &ns,
        "get_bit",
        func(vec![a("x", int.clone()), a("bit_index", int.clone())], Type::Bool),
        "Int$get_bit",
    );
    method(
        &ns,
        "hex",
        func(
            vec![
                a("i", int.clone()),
                a_d("digits", int.clone(), fake_int("0")),
                a_d("uppercase", Type::Bool, fake_bool(true)),
                a_d("prefix", Type::Bool, fake_bool(true)),
            ],
            text_t.clone(),
        ),
        "Int$hex",
    );
    method(
        &ns,
        "octal",
        func(
            vec![
                a("i", int.clone()),
                a_d("digits", int.clone(), fake_int("0")),
                a_d("prefix", Type::Bool, fake_bool(true)),
            ],
            text_t.clone(),
        ),
        "Int$octal",
    );
    method(
        &ns,
        "parse",
        func(
            vec![
                a("text", text_t.clone()),
                a_d(
                    "remainder",
                    Type::optional(Type::pointer_to(text_t.clone(), true)),
                    fake_none(),
                ),
            ],
            Type::optional(int.clone()),
        ),
        "Int$parse",
    );
    method(
        &ns,
        "to",
        func(
            vec![
                a("first", int.clone()),
                a("last", int.clone()),
                a_d("step", Type::optional(int.clone()), fake_none()),
            ],
            iterator_of(int.clone()),
        ),
        "Int$to",
    );
    method(
        &ns,
        "onward",
        func(
            vec![a("first", int.clone()), a_d("step", int.clone(), fake_int("1"))],
            iterator_of(int.clone()),
        ),
        "Int$onward",
    );
}

fn bind_sized_int(env: &Env, bits: u8, text_t: &Type) {
    let name = format!("Int{bits}");
    let ns = namespace_env(env, &name);
    let int = Type::int(bits);
    register_type(env, &name, int.clone(), &ns);
    let code = |method: &str| format!("{name}${method}");
    let un = || func(vec![a("i", int.clone())], int.clone());
    let bin = || func(vec![a("x", int.clone()), a("y", int.clone())], int.clone());
    method(&ns, "abs", un(), if bits == 64 { "labs" } else { "abs" });
    method(&ns, "bits", func(vec![a("x", int.clone())], Type::list_of(Type::Bool)), &code("bits"));
    method(
        &ns,
        "clamped",
        func(vec![a("x", int.clone()), a("low", int.clone()), a("high", int.clone())], int.clone()),
        &code("clamped"),
    );
    method(&ns, "divided_by", bin(), &code("divided_by"));
    method(&ns, "gcd", bin(), &code("gcd"));
    method(&ns, "modulo", bin(), &code("modulo"));
    method(&ns, "modulo1", bin(), &code("modulo1"));
    method(&ns, "unsigned_left_shifted", bin(), &code("unsigned_left_shifted"));
    method(&ns, "unsigned_right_shifted", bin(), &code("unsigned_right_shifted"));
    method(&ns, "wrapping_plus", bin(), &code("wrapping_plus"));
    method(&ns, "wrapping_minus", bin(), &code("wrapping_minus"));
    method(
        &ns,
        "get_bit",
        func(vec![a("x", int.clone()), a("bit_index", Type::BigInt)], Type::Bool),
        &code("get_bit"),
    );
    method(
        &ns,
        "is_between",
        func(vec![a("x", int.clone()), a("low", int.clone()), a("high", int.clone())], Type::Bool),
        &code("is_between"),
    );
    constant(&ns, "max", int.clone(), &code("max"));
    constant(&ns, "min", int.clone(), &code("min"));
    method(
        &ns,
        "hex",
        func(
            vec![
                a("i", int.clone()),
                a_d("digits", Type::BigInt, fake_int("0")),
                a_d("uppercase", Type::Bool, fake_bool(true)),
                a_d("prefix", Type::Bool, fake_bool(true)),
            ],
            text_t.clone(),
        ),
        &code("hex"),
    );
    method(
        &ns,
        "octal",
        func(
            vec![
                a("i", int.clone()),
                a_d("digits", Type::BigInt, fake_int("0")),
                a_d("prefix", Type::Bool, fake_bool(true)),
            ],
            text_t.clone(),
        ),
        &code("octal"),
    );
    method(
        &ns,
        "parse",
        func(
            vec![
                a("text", text_t.clone()),
                a_d(
                    "remainder",
                    Type::optional(Type::pointer_to(text_t.clone(), true)),
                    fake_none(),
                ),
            ],
            Type::optional(int.clone()),
        ),
        &code("parse"),
    );
    method(
        &ns,
        "to",
        func(
            vec![
                a("first", int.clone()),
                a("last", int.clone()),
                a_d("step", Type::optional(int.clone()), fake_none()),
            ],
            iterator_of(int.clone()),
        ),
        &code("to"),
    );
    method(
        &ns,
        "onward",
        func(
            vec![a("first", int.clone()), a_d("step", int.clone(), fake_int("1"))],
            iterator_of(int.clone()),
        ),
        &code("onward"),
    );
}

fn bind_num(env: &Env, bits: u8, text_t: &Type) {
    let name = if bits == 64 { "Num".to_string() } else { format!("Num{bits}") };
    let ns = namespace_env(env, &name);
    let num = Type::num(bits);
    register_type(env, &name, num.clone(), &ns);
    let suffix = if bits == 32 { "f" } else { "" };
    let cast = if bits == 32 { "(Num32_t)" } else { "(Num_t)" };
    let un = || func(vec![a("n", num.clone())], num.clone());
    let un_opt = || func(vec![a("n", num.clone())], Type::optional(num.clone()));
    let bin = || func(vec![a("x", num.clone()), a("y", num.clone())], num.clone());

    for c in ["PI", "PI_2", "PI_4", "E", "SQRT2", "SQRT1_2", "LN2", "LN10", "LOG2E"] {
        constant(&ns, c, num.clone(), &format!("{cast}(M_{c})"));
    }
    constant(&ns, "INF", num.clone(), &format!("{cast}(INFINITY)"));
    constant(
        &ns,
        "TAU",
        num.clone(),
        if bits == 32 { "(Num32_t)(2.f*M_PI)" } else { "(Num_t)(2.*M_PI)" },
    );

    method(&ns, "abs", un(), if bits == 32 { "fabsf" } else { "fabs" });
    for f in ["asinh", "atan", "cbrt", "ceil", "cosh", "erf", "erfc", "exp", "exp2", "expm1",
              "floor", "logb", "rint", "round", "sinh", "tanh", "trunc"] {
        method(&ns, f, un(), &format!("{f}{suffix}"));
    }
    for f in ["acos", "acosh", "asin", "atanh", "cos", "log", "log10", "log1p", "log2", "sin",
              "sqrt", "tan", "tgamma"] {
        method(&ns, f, un_opt(), &format!("{f}{suffix}"));
    }
    for f in ["atan2", "copysign", "fdim", "hypot", "nextafter"] {
        method(&ns, f, bin(), &format!("{f}{suffix}"));
    }
    method(&ns, "modulo", bin(), &format!("{name}$mod"));
    method(&ns, "modulo1", bin(), &format!("{name}$mod1"));
    method(
        &ns,
        "near",
        func(
            vec![
                a("x", num.clone()),
                a("y", num.clone()),
                a_d("ratio", num.clone(), fake_num(1e-9)),
                a_d("min_epsilon", num.clone(), fake_num(1e-9)),
            ],
            Type::Bool,
        ),
        &format!("{name}$near"),
    );
    method(
        &ns,
        "clamped",
        func(vec![a("x", num.clone()), a("low", num.clone()), a("high", num.clone())], num.clone()),
        &format!("{name}$clamped"),
    );
    method(
        &ns,
        "percent",
        func(
            vec![a("n", num.clone()), a_d("precision", num.clone(), fake_num(0.01))],
            text_t.clone(),
        ),
        &format!("{name}$percent"),
    );
    method(
        &ns,
        "with_precision",
        func(vec![a("n", num.clone()), a("precision", num.clone())], num.clone()),
        &format!("{name}$with_precision"),
    );
    method(
        &ns,
        "is_between",
        func(vec![a("x", num.clone()), a("low", num.clone()), a("high", num.clone())], Type::Bool),
        &format!("{name}$is_between"),
    );
    method(&ns, "isinf", func(vec![a("n", num.clone())], Type::Bool), &format!("{name}$isinf"));
    method(
        &ns,
        "isfinite",
        func(vec![a("n", num.clone())], Type::Bool),
        &format!("{name}$isfinite"),
    );
    method(
        &ns,
        "mix",
        func(
            vec![a("amount", num.clone()), a("x", num.clone()), a("y", num.clone())],
            num.clone(),
        ),
        &format!("{name}$mix"),
    );
    method(
        &ns,
        "parse",
        func(
            vec![
                a("text", text_t.clone()),
                a_d(
                    "remainder",
                    Type::optional(Type::pointer_to(text_t.clone(), true)),
                    fake_none(),
                ),
            ],
            Type::optional(num.clone()),
        ),
        &format!("{name}$parse"),
    );
}

fn bind_cstring(env: &Env, text_t: &Type) {
    let ns = namespace_env(env, "CString");
    register_type(env, "CString", Type::CString, &ns);
    method(
        &ns,
        "as_text",
        func(vec![a("str", Type::CString)], text_t.clone()),
        "Text$from_str",
    );
}

fn bind_text(env: &Env, text_t: &Type, ns: &Env) {
    register_type(env, "Text", text_t.clone(), ns);
    let t = || text_t.clone();
    let int = Type::BigInt;
    let text_to_text = |arg: &str| func(vec![a(arg, t())], t());

    method(ns, "as_c_string", func(vec![a("text", t())], Type::CString), "Text$as_c_string");
    method(ns, "at", func(vec![a("text", t()), a("index", int.clone())], t()), "Text$cluster");
    method(ns, "by_line", func(vec![a("text", t())], iterator_of(t())), "Text$by_line");
    method(
        ns,
        "by_split",
        func(vec![a("text", t()), a_d("delimiter", t(), fake_text(""))], iterator_of(t())),
        "Text$by_split",
    );
    method(ns, "bytes", func(vec![a("text", t())], Type::list_of(Type::Byte)), "Text$utf8_bytes");
    method(
        ns,
        "caseless_equals",
        func(
            vec![a("a", t()), a("b", t()), a_d("language", t(), fake_text("C"))],
            Type::Bool,
        ),
        "Text$equal_ignoring_case",
    );
    method(
        ns,
        "ends_with",
        func(
            vec![
                a("text", t()),
                a("suffix", t()),
                a_d("remainder", Type::optional(Type::pointer_to(t(), true)), fake_none()),
            ],
            Type::Bool,
        ),
        "Text$ends_with",
    );
    method(
        ns,
        "starts_with",
        func(
            vec![
                a("text", t()),
                a("prefix", t()),
                a_d("remainder", Type::optional(Type::pointer_to(t(), true)), fake_none()),
            ],
            Type::Bool,
        ),
        "Text$starts_with",
    );
    method(ns, "from", func(vec![a("text", t()), a("first", int.clone())], t()), "Text$from");
    method(
        ns,
        "from_bytes",
        func(vec![a("bytes", Type::list_of(Type::Byte))], Type::optional(t())),
        "Text$from_bytes",
    );
    method(
        ns,
        "from_c_string",
        func(vec![a("str", Type::CString)], Type::optional(t())),
        "Text$from_str",
    );
    method(
        ns,
        "from_codepoints",
        func(vec![a("codepoints", Type::list_of(Type::int(32)))], t()),
        "Text$from_codepoints",
    );
    method(ns, "has", func(vec![a("text", t()), a("target", t())], Type::Bool), "Text$has");
    method(
        ns,
        "join",
        func(vec![a("glue", t()), a("pieces", Type::list_of(t()))], t()),
        "Text$join",
    );
    method(ns, "lines", func(vec![a("text", t())], Type::list_of(t())), "Text$lines");
    method(
        ns,
        "lower",
        func(vec![a("text", t()), a_d("language", t(), fake_text("C"))], t()),
        "Text$lower",
    );
    method(
        ns,
        "upper",
        func(vec![a("text", t()), a_d("language", t(), fake_text("C"))], t()),
        "Text$upper",
    );
    method(
        ns,
        "title",
        func(vec![a("text", t()), a_d("language", t(), fake_text("C"))], t()),
        "Text$title",
    );
    method(ns, "memory_size", func(vec![a("text", t())], int.clone()), "Text$memory_size");
    method(
        ns,
        "left_pad",
        func(
            vec![
                a("text", t()),
                a("count", int.clone()),
                a_d("pad", t(), fake_text(" ")),
                a_d("language", t(), fake_text("C")),
            ],
            t(),
        ),
        "Text$left_pad",
    );
    method(
        ns,
        "right_pad",
        func(
            vec![
                a("text", t()),
                a("count", int.clone()),
                a_d("pad", t(), fake_text(" ")),
                a_d("language", t(), fake_text("C")),
            ],
            t(),
        ),
        "Text$right_pad",
    );
    method(
        ns,
        "quoted",
        func(
            vec![
                a("text", t()),
                a_d("color", Type::Bool, fake_bool(false)),
                a_d("quotation_mark", t(), fake_text("\"")),
            ],
            t(),
        ),
        "Text$quoted",
    );
    method(
        ns,
        "repeat",
        func(vec![a("text", t()), a("count", int.clone())], t()),
        "Text$repeat",
    );
    method(
        ns,
        "replace",
        func(vec![a("text", t()), a("target", t()), a("replacement", t())], t()),
        "Text$replace",
    );
    method(ns, "reversed", text_to_text("text"), "Text$reversed");
    method(
        ns,
        "slice",
        func(
            vec![
                a("text", t()),
                a_d("from", int.clone(), fake_int("1")),
                a_d("to", int.clone(), fake_int("-1")),
            ],
            t(),
        ),
        "Text$slice",
    );
    method(
        ns,
        "split",
        func(vec![a("text", t()), a_d("delimiter", t(), fake_text(""))], Type::list_of(t())),
        "Text$split",
    );
    method(ns, "to", func(vec![a("text", t()), a("last", int.clone())], t()), "Text$to");
    method(
        ns,
        "trim",
        func(
            vec![
                a("text", t()),
                a_d("to_trim", t(), fake_text(" \t\r\n")),
                a_d("left", Type::Bool, fake_bool(true)),
                a_d("right", Type::Bool, fake_bool(true)),
            ],
            t(),
        ),
        "Text$trim",
    );
    method(
        ns,
        "utf32_codepoints",
        func(vec![a("text", t())], Type::list_of(Type::int(32))),
        "Text$utf32_codepoints",
    );
    method(
        ns,
        "width",
        func(vec![a("text", t()), a_d("language", t(), fake_text("C"))], int.clone()),
        "Text$width",
    );
    method(
        ns,
        "without_prefix",
        func(vec![a("text", t()), a("prefix", t())], t()),
        "Text$without_prefix",
    );
    method(
        ns,
        "without_suffix",
        func(vec![a("text", t()), a("suffix", t())], t()),
        "Text$without_suffix",
    );
}

fn bind_path(env: &Env, path_t: &Type, text_t: &Type, ns: &Env) {
    register_type(env, "Path", path_t.clone(), ns);
    let p = || path_t.clone();
    let t = || text_t.clone();
    let int = Type::BigInt;
    let perms = |default: &str| a_d("permissions", Type::int(32), fake_int(default));

    method(ns, "exists", func(vec![a("path", p())], Type::Bool), "Path$exists");
    method(
        ns,
        "is_directory",
        func(vec![a("path", p()), a_d("follow_symlinks", Type::Bool, fake_bool(true))], Type::Bool),
        "Path$is_directory",
    );
    method(
        ns,
        "is_file",
        func(vec![a("path", p()), a_d("follow_symlinks", Type::Bool, fake_bool(true))], Type::Bool),
        "Path$is_file",
    );
    method(ns, "is_symlink", func(vec![a("path", p())], Type::Bool), "Path$is_symlink");
    method(ns, "can_read", func(vec![a("path", p())], Type::Bool), "Path$can_read");
    method(ns, "can_write", func(vec![a("path", p())], Type::Bool), "Path$can_write");
    method(ns, "can_execute", func(vec![a("path", p())], Type::Bool), "Path$can_execute");
    method(ns, "base_name", func(vec![a("path", p())], t()), "Path$base_name");
    method(
        ns,
        "extension",
        func(vec![a("path", p()), a_d("full", Type::Bool, fake_bool(true))], t()),
        "Path$extension",
    );
    method(ns, "parent", func(vec![a("path", p())], p()), "Path$parent");
    method(ns, "child", func(vec![a("path", p()), a("child", t())], p()), "Path$child");
    method(
        ns,
        "children",
        func(
            vec![a("path", p()), a_d("include_hidden", Type::Bool, fake_bool(false))],
            Type::list_of(p()),
        ),
        "Path$children",
    );
    method(ns, "sibling", func(vec![a("path", p()), a("name", t())], p()), "Path$sibling");
    method(
        ns,
        "concatenated_with",
        func(vec![a("a", p()), a("b", p())], p()),
        "Path$concat",
    );
    method(ns, "current_dir", func(vec![], p()), "Path$current_dir");
    method(ns, "expand_home", func(vec![a("path", p())], p()), "Path$expand_home");
    method(ns, "glob", func(vec![a("path", p())], Type::list_of(p())), "Path$glob");
    method(
        ns,
        "has_extension",
        func(vec![a("path", p()), a("extension", t())], Type::Bool),
        "Path$has_extension",
    );
    method(
        ns,
        "accessed",
        func(
            vec![a("path", p()), a_d("follow_symlinks", Type::Bool, fake_bool(true))],
            Type::optional(Type::int(64)),
        ),
        "Path$accessed",
    );
    method(
        ns,
        "changed",
        func(
            vec![a("path", p()), a_d("follow_symlinks", Type::Bool, fake_bool(true))],
            Type::optional(Type::int(64)),
        ),
        "Path$changed",
    );
    method(
        ns,
        "modified",
        func(
            vec![a("path", p()), a_d("follow_symlinks", Type::Bool, fake_bool(true))],
            Type::optional(Type::int(64)),
        ),
        "Path$modified",
    );
    method(
        ns,
        "owner",
        func(
            vec![a("path", p()), a_d("follow_symlinks", Type::Bool, fake_bool(true))],
            Type::optional(t()),
        ),
        "Path$owner",
    );
    method(
        ns,
        "group",
        func(
            vec![a("path", p()), a_d("follow_symlinks", Type::Bool, fake_bool(true))],
            Type::optional(t()),
        ),
        "Path$group",
    );
    method(ns, "read", func(vec![a("path", p())], Type::optional(t())), "Path$read");
    method(
        ns,
        "read_bytes",
        func(
            vec![a("path", p()), a_d("limit", Type::optional(int.clone()), fake_none())],
            Type::optional(Type::list_of(Type::Byte)),
        ),
        "Path$read_bytes",
    );
    method(
        ns,
        "write",
        func(vec![a("path", p()), a("text", t()), perms("0o644")], Type::Void),
        "Path$write",
    );
    method(
        ns,
        "write_bytes",
        func(
            vec![a("path", p()), a("bytes", Type::list_of(Type::Byte)), perms("0o644")],
            Type::Void,
        ),
        "Path$write_bytes",
    );
    method(
        ns,
        "append",
        func(vec![a("path", p()), a("text", t()), perms("0o644")], Type::Void),
        "Path$append",
    );
    method(
        ns,
        "create_directory",
        func(vec![a("path", p()), perms("0o755")], Type::Void),
        "Path$create_directory",
    );
    method(
        ns,
        "remove",
        func(vec![a("path", p()), a_d("ignore_missing", Type::Bool, fake_bool(false))], Type::Void),
        "Path$remove",
    );
    method(
        ns,
        "relative_to",
        func(vec![a("path", p()), a("relative_to", p())], p()),
        "Path$relative_to",
    );
    method(ns, "by_line", func(vec![a("path", p())], Type::optional(iterator_of(t()))), "Path$by_line");
    method(ns, "from_text", func(vec![a("text", t())], p()), "Path$from_text");
}

fn add_numeric_constructors(env: &Env) {
    let numeric = |name: &str| -> Type {
        match name {
            "Bool" => Type::Bool,
            "Byte" => Type::Byte,
            "Int" => Type::BigInt,
            "Int8" => Type::int(8),
            "Int16" => Type::int(16),
            "Int32" => Type::int(32),
            "Int64" => Type::int(64),
            "Num" => Type::num(64),
            "Num32" => Type::num(32),
            _ => unreachable!(),
        }
    };
    let all = ["Bool", "Byte", "Int8", "Int16", "Int32", "Int64", "Int", "Num32", "Num"];
    // Whether converting `from` into `to` can lose information, which makes
    // the constructor take a `truncate=no` safety argument.
    let lossy = |from: &str, to: &str| -> bool {
        let rank = |n: &str| all.iter().position(|x| *x == n).unwrap();
        let from_is_num = from.starts_with("Num");
        let to_is_num = to.starts_with("Num");
        if from == "Bool" || to == "Bool" {
            return false;
        }
        if from_is_num != to_is_num {
            return true;
        }
        rank(from) > rank(to)
    };
    for to in all {
        let ns = namespace_env(env, to);
        let to_t = numeric(to);
        for from in all {
            if from == to {
                continue;
            }
            let from_t = numeric(from);
            let arg_name = match from {
                "Bool" => "b",
                "Byte" => "b",
                "Num" | "Num32" => "n",
                _ => "i",
            };
            let code = format!("{to}$from_{}", from.to_lowercase());
            let args = if lossy(from, to) {
                vec![
                    a(arg_name, from_t),
                    a_d("truncate", Type::Bool, fake_bool(false)),
                ]
            } else {
                vec![a(arg_name, from_t)]
            };
            add_constructor(&ns, &code, args, to_t.clone());
        }
    }
}

fn add_path_constructors(env: &Env, path_t: &Type, text_t: &Type) {
    let path_ns = namespace_env(env, "Path");
    add_constructor(
        &path_ns,
        "Path$escape_text",
        vec![a("text", text_t.clone())],
        path_t.clone(),
    );
    add_constructor(
        &path_ns,
        "Path$escape_path",
        vec![a("path", path_t.clone())],
        path_t.clone(),
    );
    add_constructor(
        &path_ns,
        "Int$value_as_text",
        vec![a("i", Type::BigInt)],
        path_t.clone(),
    );
    let cstring_ns = namespace_env(env, "CString");
    add_constructor(
        &cstring_ns,
        "Text$as_c_string",
        vec![a("text", text_t.clone())],
        Type::CString,
    );
}

fn bind_globals(env: &Env, text_t: &Type) {
    let t = || text_t.clone();
    let say = Type::function(
        vec![a("text", t()), a_d("newline", Type::Bool, fake_bool(true))],
        Type::Void,
    );
    env.globals.borrow_mut().set("say".into(), Binding::new(say.clone(), "say"));
    env.globals.borrow_mut().set("print".into(), Binding::new(say, "say"));
    env.globals.borrow_mut().set(
        "ask".into(),
        Binding::new(
            Type::function(
                vec![
                    a("prompt", t()),
                    a_d("bold", Type::Bool, fake_bool(true)),
                    a_d("force_tty", Type::Bool, fake_bool(true)),
                ],
                Type::optional(t()),
            ),
            "ask",
        ),
    );
    env.globals.borrow_mut().set(
        "getenv".into(),
        Binding::new(Type::function(vec![a("name", t())], Type::optional(t())), "getenv_text"),
    );
    env.globals.borrow_mut().set(
        "setenv".into(),
        Binding::new(
            Type::function(vec![a("name", t()), a("value", t())], Type::optional(t())),
            "setenv_text",
        ),
    );
    env.globals.borrow_mut().set(
        "exit".into(),
        Binding::new(
            Type::function(
                vec![
                    a_d("message", Type::optional(t()), fake_none()),
                    a_d("code", Type::int(32), fake_int("1")),
                ],
                Type::Abort,
            ),
            "tomo_exit",
        ),
    );
    env.globals.borrow_mut().set(
        "fail".into(),
        Binding::new(Type::function(vec![a("message", t())], Type::Abort), "fail_text"),
    );
    env.globals.borrow_mut().set(
        "sleep".into(),
        Binding::new(Type::function(vec![a("seconds", Type::num(64))], Type::Void), "sleep_num"),
    );
    env.globals.borrow_mut().set("USE_COLOR".into(), Binding::new(Type::Bool, "USE_COLOR"));
    env.globals
        .borrow_mut()
        .set("TOMO_VERSION".into(), Binding::new(t(), "TOMO_VERSION_TEXT"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::get_namespace_by_type;

    #[test]
    fn builtins_are_bound() {
        let env = global_env(false);
        assert!(env.get_type("Int").is_some());
        assert!(env.get_type("Int32").is_some());
        assert!(env.get_type("Num32").is_some());
        assert!(env.get_type("Text").is_some());
        assert!(env.get_type("Path").is_some());
        assert!(env.get_binding("say").is_some());
        assert!(env.get_binding("fail").is_some());
        assert!(env.get_binding("USE_COLOR").is_some());
    }

    #[test]
    fn int_namespace_has_methods() {
        let env = global_env(false);
        let ns = get_namespace_by_type(&env, &Type::BigInt).unwrap();
        let hex = ns.get_binding("hex").unwrap();
        assert_eq!(hex.code, "Int$hex");
        assert!(matches!(hex.ty, Type::Function(_)));
        let pi = get_namespace_by_type(&env, &Type::num(64)).unwrap().get_binding("PI").unwrap();
        assert_eq!(pi.code, "(Num_t)(M_PI)");
    }

    #[test]
    fn constructors_are_registered_in_order() {
        let env = global_env(false);
        let ns = get_namespace_by_type(&env, &Type::int(32)).unwrap();
        let constructors = ns.namespace.as_ref().unwrap().constructors.borrow();
        assert!(!constructors.is_empty());
        // Later registrations are preferred, so lookups must scan in reverse.
        assert!(constructors.iter().any(|b| b.code == "Int32$from_num"));
    }
}
