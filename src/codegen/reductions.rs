//! Reductions like `(+: nums)`: desugared into a loop maintaining an
//! accumulator and a `has_value` flag, with chained-comparison and
//! min/max special forms.

use std::rc::Rc;

use crate::ast::{Ast, AstNode, BinOp};
use crate::code_err;
use crate::diagnostics::{CResult, ErrorKind};
use crate::environment::{for_scope, fresh_scope, Env};
use crate::typecheck::get_type;
use crate::types::{get_iterated_type, non_optional, Type};

use super::expressions::compile;
use super::optionals::{check_none, compile_none, promote_to_optional};
use super::statements::compile_statement;
use super::types::compile_declaration;

fn inline_c(code: String) -> Rc<AstNode> {
    AstNode::fake(Ast::InlineCCode {
        chunks: vec![AstNode::fake(Ast::TextLiteral { text: code })],
        type_ast: None,
    })
}

pub fn compile_reduction(env: &Env, ast: &Rc<AstNode>) -> CResult<String> {
    let Ast::Reduction { op, key, iter } = &ast.ast else {
        code_err!(ast, ErrorKind::InvalidExpression, "This is not a reduction");
    };
    let op = *op;
    let iter_t = get_type(env, iter)?;
    let Some(item_t) = get_iterated_type(&iter_t) else {
        code_err!(iter, ErrorKind::TypeMismatch,
            "I couldn't figure out how to iterate over this type: {iter_t}");
    };

    let item = AstNode::fake(Ast::Var(format!("$it{}", ast.start)));
    let scope_loop = ast.wrap(Ast::For {
        vars: vec![item.clone()],
        iter: iter.clone(),
        body: AstNode::fake(Ast::Pass),
        empty: None,
    });
    let body_scope = for_scope(env, &scope_loop)?;
    let make_loop = |body: Rc<AstNode>| -> Rc<AstNode> {
        ast.wrap(Ast::For {
            vars: vec![item.clone()],
            iter: iter.clone(),
            body,
            empty: None,
        })
    };

    if op.is_comparison() && !matches!(op, BinOp::Compare) {
        // Chained comparisons: rolling boolean with short-circuit break.
        let mut item_value = item.clone();
        let mut item_value_type = item_t.clone();
        if let Some(key) = key {
            body_scope.set_binding("$", item_t.clone(), compile(&body_scope, &item)?);
            item_value = key.clone();
            item_value_type = get_type(&body_scope, key)?;
        }

        let comparison = ast.wrap(Ast::BinaryOp {
            op,
            lhs: AstNode::literal_code("prev", item_value_type.clone()),
            rhs: item_value.clone(),
        });
        let body_text = format!(
            "if (result == NONE_BOOL) {{\n    prev = {value};\n    result = yes;\n}} else {{\n    if ({cmp}) {{\n        prev = {value};\n    }} else {{\n        result = no;\n        break;\n    }}\n}}\n",
            value = compile(&body_scope, &item_value)?,
            cmp = compile(&body_scope, &comparison)?,
        );
        let loop_ast = make_loop(inline_c(body_text));
        return Ok(format!(
            "({{ // Reduction:\n{};\nOptionalBool_t result = NONE_BOOL;\n{}\nresult;}})",
            compile_declaration(&item_value_type, "prev"),
            compile_statement(env, &loop_ast)?
        ));
    }

    if matches!(op, BinOp::Min | BinOp::Max) {
        let superlative = if matches!(op, BinOp::Min) { "min" } else { "max" };
        let cmp_op = if matches!(op, BinOp::Min) { BinOp::LessThan } else { BinOp::GreaterThan };
        let item_code = compile(&body_scope, &item)?;
        let mut code = format!(
            "({{ // Reduction:\n{};\nBool_t has_value = no;\n",
            compile_declaration(&item_t, superlative)
        );
        let body_text;
        if let Some(key) = key {
            let key_scope = fresh_scope(env);
            key_scope.set_binding("$", item_t.clone(), item_code.clone());
            let key_type = get_type(&key_scope, key)?;
            let superlative_key = format!("{superlative}_key");
            code.push_str(&format!("{};\n", compile_declaration(&key_type, &superlative_key)));
            let comparison = ast.wrap(Ast::BinaryOp {
                op: cmp_op,
                lhs: AstNode::literal_code("key", key_type.clone()),
                rhs: AstNode::literal_code(superlative_key.clone(), key_type.clone()),
            });
            body_text = format!(
                "{key_decl} = {key_code};\nif (!has_value || {cmp}) {{\n    {superlative} = {item};\n    {superlative_key} = key;\n    has_value = yes;\n}}\n",
                key_decl = compile_declaration(&key_type, "key"),
                key_code = compile(&key_scope, key)?,
                cmp = compile(&body_scope, &comparison)?,
                item = compile(&body_scope, &item)?,
            );
        } else {
            let comparison = ast.wrap(Ast::BinaryOp {
                op: cmp_op,
                lhs: item.clone(),
                rhs: AstNode::literal_code(superlative, item_t.clone()),
            });
            body_text = format!(
                "if (!has_value || {cmp}) {{\n    {superlative} = {item};\n    has_value = yes;\n}}\n",
                cmp = compile(&body_scope, &comparison)?,
                item = compile(&body_scope, &item)?,
            );
        }
        let loop_ast = make_loop(inline_c(body_text));
        code.push_str(&format!(
            "{}\nhas_value ? {} : {};}})",
            compile_statement(env, &loop_ast)?,
            promote_to_optional(&item_t, superlative),
            compile_none(&item_t)?
        ));
        return Ok(code);
    }

    // Generic accumulator fold:
    let reduction_type = non_optional(&get_type(env, ast)?);
    let mut item_value = item.clone();
    if let Some(key) = key {
        body_scope.set_binding("$", item_t.clone(), compile(&body_scope, &item)?);
        item_value = key.clone();
    }

    if matches!(op, BinOp::Compare) && !matches!(reduction_type, Type::Int { bits: 32 }) {
        code_err!(ast, ErrorKind::TypeMismatch, "<> reductions are only supported for Int32 values");
    }

    // Boolean and optional `and`/`or` can exit early:
    let early_out = match op {
        BinOp::And => match &reduction_type {
            Type::Bool => "if (!reduction) break;".to_string(),
            Type::Optional(_) => {
                format!("if ({}) break;", check_none(&reduction_type, "reduction")?)
            }
            _ => String::new(),
        },
        BinOp::Or => match &reduction_type {
            Type::Bool => "if (reduction) break;".to_string(),
            Type::Optional(_) => {
                format!("if (!{}) break;", check_none(&reduction_type, "reduction")?)
            }
            _ => String::new(),
        },
        _ => String::new(),
    };

    let combination = ast.wrap(Ast::BinaryOp {
        op,
        lhs: AstNode::literal_code("reduction", reduction_type.clone()),
        rhs: item_value.clone(),
    });
    let body_text = format!(
        "if (!has_value) {{\n    reduction = {value};\n    has_value = yes;\n}} else {{\n    reduction = {combo};\n{early_out}}}\n",
        value = compile(&body_scope, &item_value)?,
        combo = compile(&body_scope, &combination)?,
    );
    let loop_ast = make_loop(inline_c(body_text));
    Ok(format!(
        "({{ // Reduction:\n{};\nBool_t has_value = no;\n{}\nhas_value ? {} : {};}})",
        compile_declaration(&reduction_type, "reduction"),
        compile_statement(env, &loop_ast)?,
        promote_to_optional(&reduction_type, "reduction"),
        compile_none(&reduction_type)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{fresh_scope, global_env};

    #[test]
    fn fold_reductions_keep_an_accumulator() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        scope.set_binding("xs", Type::list_of(Type::BigInt), "_$xs");
        let sum = AstNode::fake(Ast::Reduction {
            op: BinOp::Plus,
            key: None,
            iter: AstNode::fake(Ast::Var("xs".into())),
        });
        let code = compile_reduction(&scope, &sum).unwrap();
        assert!(code.contains("// Reduction:"), "got: {code}");
        assert!(code.contains("Bool_t has_value = no;"), "got: {code}");
        assert!(code.contains("Int$plus(reduction"), "got: {code}");
        assert!(code.contains("has_value ?"), "got: {code}");
    }

    #[test]
    fn comparison_reductions_roll_a_boolean() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        scope.set_binding("xs", Type::list_of(Type::BigInt), "_$xs");
        let ordered = AstNode::fake(Ast::Reduction {
            op: BinOp::LessThan,
            key: None,
            iter: AstNode::fake(Ast::Var("xs".into())),
        });
        let code = compile_reduction(&scope, &ordered).unwrap();
        assert!(code.contains("OptionalBool_t result = NONE_BOOL;"), "got: {code}");
        assert!(code.contains("break;"), "got: {code}");
    }

    #[test]
    fn min_reductions_track_the_superlative() {
        let env = global_env(false);
        let scope = fresh_scope(&env);
        scope.set_binding("xs", Type::list_of(Type::BigInt), "_$xs");
        let smallest = AstNode::fake(Ast::Reduction {
            op: BinOp::Min,
            key: None,
            iter: AstNode::fake(Ast::Var("xs".into())),
        });
        let code = compile_reduction(&scope, &smallest).unwrap();
        assert!(code.contains("Int_t min;"), "got: {code}");
        assert!(code.contains("min = "), "got: {code}");
    }
}
