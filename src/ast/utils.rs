//! AST predicates and traversal helpers shared by the type checker and the
//! code generator.

use std::collections::HashMap;
use std::rc::Rc;

use super::{Ast, AstNode, TypeAst};

/// Whether evaluating this expression twice is both cheap and side-effect
/// free. The code generator uses this to decide when a temporary is needed.
pub fn is_idempotent(ast: &AstNode) -> bool {
    match &ast.ast {
        Ast::Int { .. }
        | Ast::Bool(_)
        | Ast::Num { .. }
        | Ast::Var(_)
        | Ast::None
        | Ast::TextLiteral { .. }
        | Ast::LiteralCode { .. } => true,
        Ast::Index { indexed, index, .. } => {
            is_idempotent(indexed) && index.as_ref().is_some_and(|i| is_idempotent(i))
        }
        Ast::FieldAccess { fielded, .. } => is_idempotent(fielded),
        _ => false,
    }
}

/// Visit top-level statements in dependency order:
///
/// 1. `use` statements, in source order;
/// 2. type definitions (struct/enum/lang), each after the type definitions
///    its fields name, depth-first;
/// 3. everything else, in source order.
pub fn visit_topologically<'a, F>(statements: &'a [Rc<AstNode>], mut visit: F)
where
    F: FnMut(&'a Rc<AstNode>),
{
    let mut definitions: HashMap<&str, &'a Rc<AstNode>> = HashMap::new();
    for stmt in statements {
        match &stmt.ast {
            Ast::StructDef { name, .. } | Ast::EnumDef { name, .. } | Ast::LangDef { name, .. } => {
                definitions.insert(name.as_str(), stmt);
            }
            _ => {}
        }
    }

    for stmt in statements {
        if matches!(stmt.ast, Ast::Use { .. }) {
            visit(stmt);
        }
    }

    let mut visited: HashMap<String, bool> = HashMap::new();
    for stmt in statements {
        if matches!(stmt.ast, Ast::StructDef { .. } | Ast::EnumDef { .. } | Ast::LangDef { .. }) {
            visit_type_def(stmt, &definitions, &mut visited, &mut visit);
        }
    }

    for stmt in statements {
        if !matches!(
            stmt.ast,
            Ast::Use { .. } | Ast::StructDef { .. } | Ast::EnumDef { .. } | Ast::LangDef { .. }
        ) {
            visit(stmt);
        }
    }
}

fn visit_type_def<'a, F>(
    ast: &'a Rc<AstNode>,
    definitions: &HashMap<&str, &'a Rc<AstNode>>,
    visited: &mut HashMap<String, bool>,
    visit: &mut F,
) where
    F: FnMut(&'a Rc<AstNode>),
{
    match &ast.ast {
        Ast::StructDef { name, fields, .. } => {
            if visited.contains_key(name.as_str()) {
                return;
            }
            visited.insert(name.clone(), true);
            for field in fields {
                visit_field_dependency(field.type_ast.as_deref(), definitions, visited, visit);
            }
            visit(ast);
        }
        Ast::EnumDef { name, tags, .. } => {
            if visited.contains_key(name.as_str()) {
                return;
            }
            visited.insert(name.clone(), true);
            for tag in tags {
                for field in &tag.fields {
                    visit_field_dependency(field.type_ast.as_deref(), definitions, visited, visit);
                }
            }
            visit(ast);
        }
        Ast::LangDef { name, .. } => {
            if visited.contains_key(name.as_str()) {
                return;
            }
            visited.insert(name.clone(), true);
            visit(ast);
        }
        _ => visit(ast),
    }
}

fn visit_field_dependency<'a, F>(
    type_ast: Option<&super::TypeAstNode>,
    definitions: &HashMap<&str, &'a Rc<AstNode>>,
    visited: &mut HashMap<String, bool>,
    visit: &mut F,
) where
    F: FnMut(&'a Rc<AstNode>),
{
    let Some(type_ast) = type_ast else { return };
    if let TypeAst::Var { name } = &type_ast.ast {
        if let Some(dependency) = definitions.get(name.as_str()) {
            visit_type_def(dependency, definitions, visited, visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ArgAst, TypeAstNode};

    fn struct_def(name: &str, field_types: &[&str]) -> Rc<AstNode> {
        AstNode::fake(Ast::StructDef {
            name: name.into(),
            fields: field_types
                .iter()
                .map(|t| ArgAst {
                    name: Some(format!("{}_field", t.to_lowercase())),
                    type_ast: Some(TypeAstNode::fake(TypeAst::Var { name: (*t).into() })),
                    value: None,
                })
                .collect(),
            namespace: None,
            secret: false,
            external: false,
            opaque: false,
        })
    }

    fn visited_names(statements: &[Rc<AstNode>]) -> Vec<String> {
        let mut names = vec![];
        visit_topologically(statements, |stmt| {
            if let Ast::StructDef { name, .. } = &stmt.ast {
                names.push(name.clone());
            }
        });
        names
    }

    #[test]
    fn dependencies_visited_first() {
        let a = struct_def("A", &["B"]);
        let b = struct_def("B", &["Int"]);
        assert_eq!(visited_names(&[a.clone(), b.clone()]), vec!["B", "A"]);
        assert_eq!(visited_names(&[b, a]), vec!["B", "A"]);
    }

    #[test]
    fn cycles_terminate() {
        let a = struct_def("A", &["B"]);
        let b = struct_def("B", &["A"]);
        let names = visited_names(&[a, b]);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn idempotence() {
        let var = AstNode::fake(Ast::Var("x".into()));
        assert!(is_idempotent(&var));
        let access =
            AstNode::fake(Ast::FieldAccess { fielded: var.clone(), field: "y".into() });
        assert!(is_idempotent(&access));
        let call = AstNode::fake(Ast::FunctionCall { fn_ast: var.clone(), args: vec![] });
        assert!(!is_idempotent(&call));
        let index = AstNode::fake(Ast::Index { indexed: var, index: Some(call), unchecked: false });
        assert!(!is_idempotent(&index));
    }
}
