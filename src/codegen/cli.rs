//! `main` entry-point synthesis: parse `argc`/`argv` against a function's
//! parameters via the runtime's `tomo_parse_args`, then invoke it.

use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{fresh_scope, naming, Env};
use crate::typecheck::get_arg_type;
use crate::types::{non_optional, Type};

use super::expressions::compile;
use super::optionals::{compile_none, optional_into_nonnone, promote_to_optional};
use super::promotions::promote;
use super::text::quoted_str;
use super::types::{compile_declaration, compile_type_info};

/// The placeholder shown in usage text for one flag's value.
fn flag_options(t: &Type, separator: &str) -> String {
    match t {
        Type::Bool => "yes|no".to_string(),
        Type::Enum(info) => {
            let info = info.borrow();
            info.tags
                .iter()
                .map(|tag| tag.name.clone())
                .collect::<Vec<_>>()
                .join(separator)
        }
        Type::Int { .. } | Type::BigInt | Type::Num { .. } => "N".to_string(),
        Type::Optional(Some(inner)) => flag_options(inner, separator),
        _ => "...".to_string(),
    }
}

/// Synthesize the body of `main`: a usage string, argument parsing, and the
/// call to the program's entry function.
pub fn compile_cli_arg_call(
    env: &Env,
    fn_name: &str,
    fn_type: &Type,
    version: &str,
) -> CResult<String> {
    let Some(fn_info) = fn_type.fn_info() else {
        return Err(crate::diagnostics::CompileError::new(
            ErrorKind::TypeMismatch,
            "The CLI entry point must be a function".to_string(),
        ));
    };
    let main_env = fresh_scope(env);
    let mut code = String::new();

    let usage_binding = env.get_binding("_USAGE");
    let usage_code = usage_binding.as_ref().map(|b| b.code.clone()).unwrap_or("usage".to_string());
    let help_code = env
        .get_binding("_HELP")
        .map(|b| b.code)
        .unwrap_or_else(|| usage_code.clone());

    if usage_binding.is_none() {
        let explicit_help_flag = fn_info.args.iter().any(|arg| arg.name == "help");
        let mut usage = if explicit_help_flag { String::new() } else { " [--help]".to_string() };
        for arg in &fn_info.args {
            usage.push(' ');
            let t = get_arg_type(&main_env, arg)?;
            let flag = arg.name.replace('_', "-");
            let optional = arg.default_val.is_some() || t.is_optional();
            let is_bool = matches!(non_optional(&t), Type::Bool);
            if optional {
                if arg.name.len() == 1 {
                    if is_bool {
                        usage.push_str(&format!("[-{flag}]"));
                    } else {
                        usage.push_str(&format!("[-{flag} {}]", flag_options(&t, "|")));
                    }
                } else if is_bool {
                    usage.push_str(&format!("[--{flag}]"));
                } else if matches!(non_optional(&t), Type::List { .. }) {
                    usage.push_str(&format!("[--{flag} {}]", flag_options(&t, "|")));
                } else {
                    usage.push_str(&format!("[--{flag}={}]", flag_options(&t, "|")));
                }
            } else if is_bool {
                usage.push_str(&format!("<--{flag}|--no-{flag}>"));
            } else if matches!(t, Type::Enum(_)) {
                usage.push_str(&flag_options(&t, "|"));
            } else if matches!(t, Type::List { .. }) {
                usage.push_str(&format!("[{flag}...]"));
            } else {
                usage.push_str(&format!("<{flag}>"));
            }
        }
        code.push_str("Text_t usage = Texts(Text(\"Usage: \"), Text$from_str(argv[0])");
        if !usage.is_empty() {
            code.push_str(&format!(", Text({})", quoted_str(&usage)));
        }
        code.push_str(");\n");
    }

    // One optional-typed local per parameter, pre-filled with defaults:
    for arg in &fn_info.args {
        let arg_t = arg.ty.clone().unwrap_or(Type::Void);
        let opt_type =
            if arg_t.is_optional() { arg_t.clone() } else { Type::optional(arg_t.clone()) };
        code.push_str(&compile_declaration(&opt_type, &naming::user_id(&arg.name)));
        if let Some(default) = &arg.default_val {
            let mut default_code = compile(env, default)?;
            if !arg_t.is_optional() {
                let default_t = crate::typecheck::get_type(env, default)?;
                promote(env, default, &mut default_code, &default_t, &arg_t)?;
                default_code = promote_to_optional(&arg_t, &default_code);
            }
            code.push_str(&format!(" = {default_code}"));
        } else {
            code.push_str(&format!(" = {}", compile_none(&arg_t)?));
        }
        code.push_str(";\n");
    }

    code.push_str(&format!(
        "tomo_parse_args(argc, argv, {usage_code}, {help_code}, {})",
        quoted_str(version)
    ));
    for arg in &fn_info.args {
        let arg_t = arg.ty.clone().unwrap_or(Type::Void);
        let required = arg.default_val.is_none() && !arg_t.is_optional();
        code.push_str(&format!(
            ",\n{{{}, {}, {}, &{}}}",
            quoted_str(&arg.name.replace('_', "-")),
            if required { "true" } else { "false" },
            compile_type_info(&arg_t),
            naming::user_id(&arg.name)
        ));
    }
    code.push_str(");\n");

    code.push_str(&format!("{fn_name}("));
    for (i, arg) in fn_info.args.iter().enumerate() {
        let arg_t = arg.ty.clone().unwrap_or(Type::Void);
        let mut arg_code = naming::user_id(&arg.name);
        if !arg_t.is_optional() {
            arg_code = optional_into_nonnone(&arg_t, &arg_code);
        }
        if i > 0 {
            code.push_str(", ");
        }
        code.push_str(&arg_code);
    }
    code.push_str(");\n");
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::global_env;
    use crate::types::Arg;

    #[test]
    fn usage_and_parse_args_are_emitted() {
        let env = global_env(false);
        let fn_t = Type::function(
            vec![
                Arg::new("input", env.get_type("Text").unwrap()),
                Arg::with_default(
                    "verbose",
                    Type::Bool,
                    crate::ast::AstNode::fake(crate::ast::Ast::Bool(false)),
                ),
            ],
            Type::Void,
        );
        let code = compile_cli_arg_call(&env, "my_main", &fn_t, "v1.0").unwrap();
        assert!(code.contains("tomo_parse_args(argc, argv, usage, usage, \"v1.0\")"), "{code}");
        assert!(code.contains("<input>"), "{code}");
        assert!(code.contains("[--verbose]"), "{code}");
        assert!(code.contains("my_main("), "{code}");
    }
}
