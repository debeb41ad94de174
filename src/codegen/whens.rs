//! `when` compilation: equality chains for non-enum subjects, `switch` on
//! the tag for enums, with pattern-variable binding in each arm.

use std::rc::Rc;

use crate::ast::{is_idempotent, Ast, AstNode, WhenClause};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{fresh_scope, naming, Env};
use crate::typecheck::{get_clause_type, get_type};
use crate::types::{enum_has_fields, Tag, Type};

use super::expressions::compile;
use super::statements::{compile_inline_block, compile_statement};
use super::types::{compile_declaration, compile_type};

fn clause_tag_name<'a>(clause: &'a WhenClause, subject_t: &Type) -> CResult<&'a str> {
    match &clause.pattern.ast {
        Ast::Var(name) => Ok(name),
        Ast::FunctionCall { fn_ast, .. } => match fn_ast.ast.var_name() {
            Some(name) => Ok(name),
            None => code_err!(clause.pattern, ErrorKind::InvalidExpression,
                "This is not a valid pattern for a {subject_t} enum type"),
        },
        _ => code_err!(clause.pattern, ErrorKind::InvalidExpression,
            "This is not a valid pattern for a {subject_t} enum type"),
    }
}

fn is_empty_block(body: &AstNode) -> bool {
    match &body.ast {
        Ast::Block { statements } => {
            statements.is_empty()
                || (statements.len() == 1 && matches!(statements[0].ast, Ast::Pass))
        }
        _ => false,
    }
}

pub fn compile_when_statement(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    // Typecheck up front: this is what enforces exhaustiveness.
    let _result_t = get_type(env, ast)?;

    let Ast::When { subject, clauses, else_body } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a when statement");
    };
    let subject_t = get_type(env, subject)?;

    let Type::Enum(enum_info) = &subject_t else {
        // Chain of equality tests, with a temp when the subject has effects:
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut subject_ast = subject.clone();
        if !is_idempotent(subject) {
            prefix = format!(
                "{{\n{} = {};\n",
                compile_declaration(&subject_t, "_when_subject"),
                compile(env, subject)?
            );
            suffix = "}\n".to_string();
            subject_ast = AstNode::literal_code("_when_subject", subject_t.clone());
        }
        let mut code = String::new();
        for clause in clauses {
            let comparison = clause.pattern.wrap(Ast::BinaryOp {
                op: crate::ast::BinOp::Equals,
                lhs: subject_ast.clone(),
                rhs: clause.pattern.clone(),
            });
            get_type(env, &comparison)?;
            if !code.is_empty() {
                code.push_str("else ");
            }
            code.push_str(&format!(
                "if ({}){}",
                compile(env, &comparison)?,
                compile_statement(env, &clause.body)?
            ));
        }
        if let Some(else_body) = else_body {
            code.push_str(&format!("else {}", compile_statement(env, else_body)?));
        }
        return Ok(format!("{prefix}{code}{suffix}"));
    };

    let (tags, ns_env): (Vec<Tag>, Env) = {
        let info = enum_info.borrow();
        (info.tags.clone(), info.env.clone())
    };
    let tag_const = |tag_name: &str| {
        naming::namespace_name(&ns_env, ns_env.namespace.as_ref(), &format!("tag${tag_name}"))
    };

    let has_payloads = enum_has_fields(&subject_t);
    let mut code = if has_payloads {
        format!(
            "WHEN({}, {}, _when_subject, {{\n",
            compile_type(&subject_t),
            compile(env, subject)?
        )
    } else {
        format!("switch(({}).$tag) {{\n", compile(env, subject)?)
    };

    for clause in clauses {
        let tag_name = clause_tag_name(clause, &subject_t)?.to_string();
        let Some(tag) = tags.iter().find(|tag| tag.name == tag_name) else {
            code_err!(clause.pattern, ErrorKind::UnknownName,
                "There is no tag '{tag_name}' for the type {subject_t}");
        };

        if clause.pattern.ast.var_name().is_some() {
            // Bare tag pattern, no bindings:
            let clause_type = get_type(env, &clause.body)?;
            let break_code = if matches!(clause_type, Type::Return(_) | Type::Abort) {
                ""
            } else {
                "break;\n"
            };
            code.push_str(&format!(
                "case {}: {{\n{}{break_code}}}\n",
                tag_const(&tag_name),
                compile_inline_block(env, &clause.body)?
            ));
            continue;
        }

        let Ast::FunctionCall { args, .. } = &clause.pattern.ast else { unreachable!() };
        code.push_str(&format!("case {}: {{\n", tag_const(&tag_name)));
        let mut scope = env.clone();
        let Type::Struct(payload_info) = &tag.payload else {
            code_err!(clause.pattern, ErrorKind::InvalidExpression,
                "This tag has no payload to match");
        };
        let fields = payload_info.borrow().fields.clone();

        if args.len() == 1 && fields.len() > 1 {
            // Whole-record capture: `Tag(rec)`
            let Some(value) = &args[0].value else {
                code_err!(clause.pattern, ErrorKind::InvalidExpression,
                    "This is not a valid variable to bind to");
            };
            let Some(var_name) = value.ast.var_name() else {
                code_err!(value, ErrorKind::InvalidExpression,
                    "This is not a valid variable to bind to");
            };
            if var_name != "_" {
                let var = naming::user_id(var_name);
                code.push_str(&format!(
                    "{} = _when_subject.{};\n",
                    compile_declaration(&tag.payload, &var),
                    naming::valid_c_name(&tag_name)
                ));
                scope = fresh_scope(&scope);
                scope.set_binding(var_name, tag.payload.clone(), var);
            }
        } else if !args.is_empty() {
            scope = fresh_scope(&scope);
            let mut fields_iter = fields.iter();
            for arg in args {
                let Some(field) = fields_iter.next() else {
                    let site = arg.value.as_deref().unwrap_or(&clause.pattern);
                    code_err!(site, ErrorKind::InvalidExpression,
                        "This is one more field than {subject_t} has");
                };
                if arg.name.is_some() {
                    let site = arg.value.as_deref().unwrap_or(&clause.pattern);
                    code_err!(site, ErrorKind::InvalidExpression,
                        "Named arguments are not currently supported");
                }
                let Some(value) = &arg.value else {
                    code_err!(clause.pattern, ErrorKind::InvalidExpression,
                        "This is not a valid variable to bind to");
                };
                let Some(var_name) = value.ast.var_name() else {
                    code_err!(value, ErrorKind::InvalidExpression,
                        "This is not a valid variable to bind to");
                };
                if var_name != "_" {
                    let var = naming::user_id(var_name);
                    let field_t = field.ty.clone().unwrap_or(Type::Optional(None));
                    code.push_str(&format!(
                        "{} = _when_subject.{}.{};\n",
                        compile_declaration(&field_t, &var),
                        naming::valid_c_name(&tag_name),
                        naming::valid_c_name(&field.name)
                    ));
                    scope.set_binding(var_name, field_t, var);
                }
            }
            if fields_iter.next().is_some() {
                code_err!(clause.pattern, ErrorKind::Exhaustiveness,
                    "Some of this tag's fields weren't accounted for");
            }
        }

        if is_empty_block(&clause.body) {
            code.push_str("break;\n}\n");
        } else {
            let clause_type = get_clause_type(env, &subject_t, clause)?;
            let break_code = if matches!(clause_type, Type::Return(_) | Type::Abort) {
                ""
            } else {
                "\nbreak;\n"
            };
            code.push_str(&format!(
                "{}{break_code}}}\n",
                compile_inline_block(&scope, &clause.body)?
            ));
        }
    }

    match else_body {
        Some(else_body) if is_empty_block(else_body) => code.push_str("default: break;\n"),
        Some(else_body) => code.push_str(&format!(
            "default: {{\n{}\nbreak;\n}}\n",
            compile_inline_block(env, else_body)?
        )),
        // Exhaustiveness was already checked, so a default arm would only
        // mask tag corruption.
        None => {}
    }
    code.push_str("\n}");
    if has_payloads {
        code.push(')');
    }
    code.push('\n');
    Ok(code)
}

/// A `when` in expression position: every non-aborting clause assigns into a
/// hidden `when` variable, and the whole thing compiles as a statement
/// expression.
pub fn compile_when_expression(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::When { subject, clauses, else_body } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a when expression");
    };
    let when_var = AstNode::fake(Ast::Var("when".to_string()));
    let subject_t = get_type(env, subject)?;
    let mut new_clauses = vec![];
    for clause in clauses {
        let clause_type = get_clause_type(env, &subject_t, clause)?;
        if matches!(clause_type, Type::Abort | Type::Return(_)) {
            new_clauses.push(clause.clone());
        } else {
            let assign = clause.body.wrap(Ast::Assign {
                targets: vec![when_var.clone()],
                values: vec![clause.body.clone()],
            });
            new_clauses.push(WhenClause { pattern: clause.pattern.clone(), body: assign });
        }
    }
    let mut new_else = else_body.clone();
    if let Some(else_body) = else_body {
        let else_type = get_type(env, else_body)?;
        if !matches!(else_type, Type::Abort | Type::Return(_)) {
            new_else = Some(else_body.wrap(Ast::Assign {
                targets: vec![when_var.clone()],
                values: vec![else_body.clone()],
            }));
        }
    }

    let t = get_type(env, ast)?;
    let when_env = fresh_scope(env);
    when_env.set_binding("when", t.clone(), "when");
    let stmt = ast.wrap(Ast::When {
        subject: subject.clone(),
        clauses: new_clauses,
        else_body: new_else,
    });
    Ok(format!(
        "({{ {};\n{}when; }})",
        compile_declaration(&t, "when"),
        compile_when_statement(&when_env, &stmt)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ArgAst, TagAst, TypeAst, TypeAstNode};
    use crate::environment::global_env;

    fn pass_block() -> Rc<AstNode> {
        AstNode::fake(Ast::Block { statements: vec![AstNode::fake(Ast::Pass)] })
    }

    #[test]
    fn non_enum_whens_chain_equality_tests() {
        let env = global_env(false);
        let scope = crate::environment::fresh_scope(&env);
        scope.set_binding("x", crate::types::Type::BigInt, "_$x");
        let when = AstNode::fake(Ast::When {
            subject: AstNode::fake(Ast::Var("x".into())),
            clauses: vec![
                WhenClause {
                    pattern: AstNode::fake(Ast::Int { text: "1".into() }),
                    body: pass_block(),
                },
                WhenClause {
                    pattern: AstNode::fake(Ast::Int { text: "2".into() }),
                    body: pass_block(),
                },
            ],
            else_body: Some(pass_block()),
        });
        let code = compile_when_statement(&scope, &when).unwrap();
        assert!(code.contains("Int$equal_value"), "got: {code}");
        assert!(code.contains("else "), "got: {code}");
        assert!(!code.contains("switch"), "got: {code}");
    }

    #[test]
    fn payload_patterns_bind_fields() {
        let env = global_env(false);
        let enum_def = AstNode::fake(Ast::EnumDef {
            name: "Shape".into(),
            tags: vec![
                TagAst {
                    name: "Circle".into(),
                    fields: vec![ArgAst {
                        name: Some("radius".into()),
                        type_ast: Some(TypeAstNode::fake(TypeAst::Var { name: "Int".into() })),
                        value: None,
                    }],
                    secret: false,
                },
                TagAst { name: "Point".into(), fields: vec![], secret: false },
            ],
            namespace: None,
        });
        crate::typecheck::prebind_statement(&env, &enum_def).unwrap();
        crate::typecheck::bind_statement(&env, &enum_def).unwrap();

        let scope = crate::environment::fresh_scope(&env);
        scope.set_binding("s", env.get_type("Shape").unwrap(), "_$s");
        let when = AstNode::fake(Ast::When {
            subject: AstNode::fake(Ast::Var("s".into())),
            clauses: vec![
                WhenClause {
                    pattern: AstNode::fake(Ast::FunctionCall {
                        fn_ast: AstNode::fake(Ast::Var("Circle".into())),
                        args: vec![ArgAst::positional(AstNode::fake(Ast::Var("r".into())))],
                    }),
                    body: pass_block(),
                },
                WhenClause {
                    pattern: AstNode::fake(Ast::Var("Point".into())),
                    body: pass_block(),
                },
            ],
            else_body: None,
        });
        let code = compile_when_statement(&scope, &when).unwrap();
        assert!(code.contains("WHEN("), "got: {code}");
        assert!(code.contains("_when_subject.Circle.radius"), "got: {code}");
        assert!(code.contains("Int_t _$r"), "got: {code}");
    }
}
