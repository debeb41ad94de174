//! Semantic properties of the type system and environment, exercised
//! through the public API.

use test_utils::AstBuilder;
use tomo_lang::ast::{Ast, BinOp};
use tomo_lang::codegen;
use tomo_lang::environment::{self, load_module_env};
use tomo_lang::typecheck::{self, parse_type_ast};
use tomo_lang::types::{self, Type};
use tomo_lang::{global_env, ErrorKind};

fn init_logging() {
    let _ = simple_logger::SimpleLogger::new().init();
}

#[test]
fn type_equality_is_structural() -> tomo_lang::CResult<()> {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("types.tm");
    // [Int?] == [Int?]
    let a1 = parse_type_ast(&env, &b.list_type(b.optional_type(b.var_type("Int"))))?;
    let a2 = parse_type_ast(&env, &b.list_type(b.optional_type(b.var_type("Int"))))?;
    assert!(types::type_eq(&a1, &a2));
    // Int32 != Int64
    let i32_t = parse_type_ast(&env, &b.var_type("Int32"))?;
    let i64_t = parse_type_ast(&env, &b.var_type("Int64"))?;
    assert!(!types::type_eq(&i32_t, &i64_t));
    Ok(())
}

#[test]
fn promotion_is_monotonic_over_int_widths() {
    init_logging();
    for (small, big) in [(8u8, 16u8), (16, 32), (32, 64), (8, 64)] {
        assert!(types::can_promote(&Type::int(small), &Type::int(big)));
        assert!(!types::can_promote(&Type::int(big), &Type::int(small)));
    }
}

#[test]
fn completion_lattice_merges_unknowns() {
    init_logging();
    let unknown = Type::Optional(None);
    let opt_int = Type::optional(Type::BigInt);
    assert_eq!(types::most_complete_type(&unknown, &opt_int), Some(opt_int.clone()));
    assert_eq!(
        types::most_complete_type(&Type::list_of(Type::BigInt), &Type::list_of(Type::num(64))),
        None
    );
}

#[test]
fn optional_promotion_is_one_way_and_unwrap_checks() -> tomo_lang::CResult<()> {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("optionals.tm");

    // T can be passed where T? is expected:
    let code = codegen::compile_to_type(&env, &b.int("5"), &Type::optional(Type::int(64)))?;
    assert!(code.contains(".has_value=true"), "got: {code}");

    // The reverse requires `!` and emits a runtime none-check:
    let scope = environment::fresh_scope(&env);
    scope.set_binding("maybe", Type::optional(Type::BigInt), "_$maybe");
    let err = codegen::compile_to_type(&scope, &b.var("maybe"), &Type::BigInt);
    assert!(err.is_err());
    let unwrap = b.node(Ast::NonOptional { value: b.var("maybe") });
    let code = codegen::compile(&scope, &unwrap)?;
    assert!(code.contains("fail_source"), "got: {code}");
    Ok(())
}

#[test]
fn when_exhaustiveness_is_enforced() -> tomo_lang::CResult<()> {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("colors.tm");
    let enum_def = b.enum_def("Color", &["Red", "Green", "Blue"]);
    typecheck::prebind_statement(&env, &enum_def)?;
    typecheck::bind_statement(&env, &enum_def)?;

    let color_t = env.get_type("Color").unwrap();
    let scope = environment::fresh_scope(&env);
    scope.set_binding("c", color_t, "_$c");

    // Missing tags without an else is rejected:
    let partial = b.when(b.var("c"), vec![(b.var("Red"), b.int("1"))], None);
    let err = typecheck::get_type(&scope, &partial).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Exhaustiveness);

    // A dead else (all tags present) is also rejected:
    let total_plus_else = b.when(
        b.var("c"),
        vec![
            (b.var("Red"), b.int("1")),
            (b.var("Green"), b.int("2")),
            (b.var("Blue"), b.int("3")),
        ],
        Some(b.int("4")),
    );
    let err = typecheck::get_type(&scope, &total_plus_else).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Exhaustiveness);

    // Exactly covering the tags is accepted:
    let total = b.when(
        b.var("c"),
        vec![
            (b.var("Red"), b.int("1")),
            (b.var("Green"), b.int("2")),
            (b.var("Blue"), b.int("3")),
        ],
        None,
    );
    assert!(typecheck::get_type(&scope, &total).is_ok());
    Ok(())
}

#[test]
fn closures_cannot_capture_stack_references() -> tomo_lang::CResult<()> {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("lambda.tm");
    let module = b.block(vec![]);
    let module_env = load_module_env(&env, &module)?;

    let scope = environment::fresh_scope(&module_env);
    scope.set_binding(
        "ref",
        Type::pointer_to(Type::BigInt, true),
        "_$ref",
    );
    let lambda = b.lambda(
        vec![b.arg("x", b.var_type("Int"))],
        b.block(vec![b.node(Ast::Index { indexed: b.var("ref"), index: None, unchecked: false })]),
    );
    let err = codegen::compile(&scope, &lambda).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConstraintViolation);
    Ok(())
}

#[test]
fn metamethod_comparison_operators_yield_bool() -> tomo_lang::CResult<()> {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("cmp.tm");
    let eq = b.binop(BinOp::Equals, b.int("1"), b.int("2"));
    assert_eq!(typecheck::get_type(&env, &eq)?, Type::Bool);
    let cmp = b.binop(BinOp::Compare, b.int("1"), b.int("2"));
    assert_eq!(typecheck::get_type(&env, &cmp)?, Type::int(32));
    Ok(())
}

#[test]
fn blocks_reject_unreachable_code() -> tomo_lang::CResult<()> {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("unreachable.tm");
    let mut scope = environment::fresh_scope(&env);
    scope.fn_ret = Some(Type::BigInt);
    let block = b.block(vec![b.ret(Some(b.int("1"))), b.int("2")]);
    let err = typecheck::get_type(&scope, &block).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnreachableCode);
    Ok(())
}

#[test]
fn stack_pointers_are_rejected_in_collections() {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("stackref.tm");
    let stack_ptr_type = b.type_node(tomo_lang::ast::TypeAst::Pointer {
        pointed: b.var_type("Int"),
        is_stack: true,
    });
    let list_of_refs = b.list_type(stack_ptr_type);
    let err = parse_type_ast(&env, &list_of_refs).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConstraintViolation);
}

#[test]
fn nested_optionals_are_rejected() {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("nested.tm");
    let nested = b.optional_type(b.optional_type(b.var_type("Int")));
    let err = parse_type_ast(&env, &nested).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConstraintViolation);
}
