//! End-to-end scenarios: compile small programs and check the emitted C for
//! the expected shapes.

use test_utils::AstBuilder;
use tomo_lang::ast::{Ast, BinOp};
use tomo_lang::codegen::{self, compile_file, compile_file_header};
use tomo_lang::environment::{self, load_module_env};
use tomo_lang::typecheck;
use tomo_lang::types::Type;
use tomo_lang::global_env;

fn init_logging() {
    let _ = simple_logger::SimpleLogger::new().init();
}

#[test]
fn int_declarations_use_compact_constructors() -> tomo_lang::CResult<()> {
    init_logging();
    let b = AstBuilder::new("decl.tm");
    let module = b.block(vec![b.declare("x", b.int("42"))]);
    let env = global_env(false);
    let module_env = load_module_env(&env, &module)?;
    let code = compile_file(&module_env, &module)?;
    assert!(code.contains("Int_t"), "got: {code}");
    assert!(code.contains("I_small(42)"), "got: {code}");
    Ok(())
}

#[test]
fn integer_literals_promote_to_num32() -> tomo_lang::CResult<()> {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("nums.tm");
    let sum = b.binop(BinOp::Plus, b.num(1.0), b.int("2"));
    let code = codegen::compile_to_type(&env, &sum, &Type::num(32))?;
    // Both operands are emitted as 32-bit float literals:
    assert!(code.contains(" + "), "got: {code}");
    assert!(code.contains("0x1p+0f"), "got: {code}");
    assert!(code.contains("0x1p+1f"), "got: {code}");
    Ok(())
}

#[test]
fn exhaustive_when_compiles_to_a_switch_without_default() -> tomo_lang::CResult<()> {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("when.tm");
    let enum_def = b.enum_def("Color", &["Red", "Green", "Blue"]);
    typecheck::prebind_statement(&env, &enum_def)?;
    typecheck::bind_statement(&env, &enum_def)?;
    let scope = environment::fresh_scope(&env);
    scope.set_binding("c", env.get_type("Color").unwrap(), "_$c");

    let when = b.when(
        b.var("c"),
        vec![
            (b.var("Red"), b.int("1")),
            (b.var("Green"), b.int("2")),
            (b.var("Blue"), b.int("3")),
        ],
        None,
    );
    let code = codegen::compile(&scope, &when)?;
    assert!(code.contains("switch"), "got: {code}");
    assert!(code.contains(".$tag"), "got: {code}");
    assert_eq!(code.matches("case ").count(), 3, "got: {code}");
    assert!(!code.contains("default"), "got: {code}");
    Ok(())
}

#[test]
fn comprehensions_build_into_a_hidden_accumulator() -> tomo_lang::CResult<()> {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("comp.tm");
    // [x for x in 10 if x mod 2 == 0]
    let filter = b.binop(
        BinOp::Equals,
        b.binop(BinOp::Mod, b.var("x"), b.int("2")),
        b.int("0"),
    );
    let comp = b.comprehension(b.var("x"), vec![b.var("x")], b.int("10"), Some(filter));
    let list = b.list(vec![comp]);
    let code = codegen::compile(&env, &list)?;
    assert!(code.contains("List_t list$"), "got: {code}");
    assert!(code.contains("for ("), "got: {code}");
    assert!(code.contains("if ("), "got: {code}");
    assert!(code.contains("List$insert_value"), "got: {code}");
    Ok(())
}

#[test]
fn function_definitions_declare_define_and_call() -> tomo_lang::CResult<()> {
    init_logging();
    let b = AstBuilder::new("fns.tm");
    let add = b.fn_def(
        "add",
        vec![b.arg("a", b.var_type("Int")), b.arg("b", b.var_type("Int"))],
        Some(b.var_type("Int")),
        b.block(vec![b.ret(Some(b.binop(BinOp::Plus, b.var("a"), b.var("b"))))]),
    );
    let check = b.fn_def(
        "check",
        vec![],
        Some(b.var_type("Int")),
        b.block(vec![b.ret(Some(b.call(b.var("add"), vec![b.int("1"), b.int("2")])))]),
    );
    let module = b.block(vec![add, check]);
    let env = global_env(false);
    let module_env = load_module_env(&env, &module)?;
    let header = compile_file_header(&module_env, &module)?;
    let body = compile_file(&module_env, &module)?;
    assert!(header.contains("add(Int_t _$a, Int_t _$b);"), "got: {header}");
    assert!(body.contains("add(Int_t _$a, Int_t _$b)"), "got: {body}");
    assert!(body.contains("add(I_small(1), I_small(2))"), "got: {body}");
    Ok(())
}

#[test]
fn lambdas_capture_into_userdata_structs() -> tomo_lang::CResult<()> {
    init_logging();
    let b = AstBuilder::new("lambdas.tm");
    let module = b.block(vec![]);
    let env = global_env(false);
    let module_env = load_module_env(&env, &module)?;

    let scope = environment::fresh_scope(&module_env);
    scope.set_binding("captured", Type::BigInt, "_$captured");
    let lambda = b.lambda(
        vec![b.arg("x", b.var_type("Int"))],
        b.block(vec![b.binop(BinOp::Plus, b.var("x"), b.var("captured"))]),
    );
    let closure_literal = codegen::compile(&scope, &lambda)?;
    assert!(closure_literal.starts_with("((Closure_t){"), "got: {closure_literal}");

    let unit = module_env.code.borrow();
    assert!(unit.local_typedefs.contains("captured"), "got: {}", unit.local_typedefs);
    assert!(unit.local_typedefs.contains("$userdata_t"), "got: {}", unit.local_typedefs);
    assert!(unit.lambdas.contains("userdata"), "got: {}", unit.lambdas);
    assert!(unit.lambdas.contains("Int_t _$x"), "got: {}", unit.lambdas);
    Ok(())
}

#[test]
fn topological_header_order_and_idempotent_init() -> tomo_lang::CResult<()> {
    init_logging();
    let b = AstBuilder::new("topo.tm");
    // struct A(b:B) comes first in source, but B must be declared first.
    let a_def = b.struct_def("A", vec![b.arg("b", b.var_type("B"))]);
    let b_def = b.struct_def("B", vec![b.arg("n", b.var_type("Int"))]);
    let module = b.block(vec![a_def, b_def]);
    let env = global_env(false);
    let module_env = load_module_env(&env, &module)?;
    let header = compile_file_header(&module_env, &module)?;
    let b_pos = header.find("B$$struct {").expect("B$$struct definition");
    let a_pos = header.find("A$$struct {").expect("A$$struct definition");
    assert!(b_pos < a_pos, "B must be defined before A:\n{header}");

    let body = compile_file(&module_env, &module)?;
    assert!(body.contains("static bool initialized = false;"), "got: {body}");
    assert!(body.contains("if (initialized) return;"), "got: {body}");
    assert!(body.contains("$initialize(void)"), "got: {body}");
    Ok(())
}

#[test]
fn compilation_is_deterministic() -> tomo_lang::CResult<()> {
    init_logging();
    let compile_once = || -> tomo_lang::CResult<(String, String)> {
        let b = AstBuilder::new("det.tm");
        let module = b.block(vec![
            b.struct_def("Point", vec![b.arg("x", b.var_type("Int")), b.arg("y", b.var_type("Int"))]),
            b.declare("origin_x", b.int("0")),
            b.fn_def(
                "double",
                vec![b.arg("n", b.var_type("Int"))],
                Some(b.var_type("Int")),
                b.block(vec![b.ret(Some(b.binop(BinOp::Plus, b.var("n"), b.var("n"))))]),
            ),
        ]);
        let env = global_env(false);
        let module_env = load_module_env(&env, &module)?;
        Ok((compile_file_header(&module_env, &module)?, compile_file(&module_env, &module)?))
    };
    let (header1, body1) = compile_once()?;
    let (header2, body2) = compile_once()?;
    assert_eq!(header1, header2);
    assert_eq!(body1, body2);
    Ok(())
}

#[test]
fn doctests_compile_to_inspect_calls() -> tomo_lang::CResult<()> {
    init_logging();
    let env = global_env(false);
    let b = AstBuilder::new("doctest.tm");
    let scope = environment::fresh_scope(&env);
    let doctest = b.node(Ast::DocTest { expr: b.int("42"), expected: None });
    let code = codegen::compile_statement(&scope, &doctest)?;
    assert!(code.contains("inspect("), "got: {code}");
    let checked = b.node(Ast::DocTest { expr: b.int("42"), expected: Some(b.int("42")) });
    let code = codegen::compile_statement(&scope, &checked)?;
    assert!(code.contains("test("), "got: {code}");
    Ok(())
}
