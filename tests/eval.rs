// tests/eval.rs
//
// End-to-end compilation and invocation: arithmetic, lifted nullable
// operators, conversions, calls, objects, arrays, and bound constants.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use alder::runtime::{Env, FieldDef, RuntimeError, TypeDef};
use alder::tree::{BinaryOp, SignatureData, UnaryOp};
use alder::{compile, compile_with_env, Expr, ExprRef, Ty, Value};

fn run(lambda: &ExprRef, args: &[Value]) -> Value {
    compile(lambda)
        .expect("lambda compiles")
        .invoke(args)
        .expect("invocation succeeds")
}

fn int(v: Value) -> i32 {
    v.as_i32()
        .unwrap_or_else(|| panic!("expected an i32 result, got {v:?}"))
}

fn tri(v: Value) -> Option<bool> {
    match v {
        Value::Null => None,
        other => Some(other.as_bool().expect("bool result")),
    }
}

#[test]
fn adds_two_parameters() {
    let a = Expr::variable("a", Ty::I32);
    let b = Expr::variable("b", Ty::I32);
    let body = Expr::add(Expr::param(&a), Expr::param(&b));
    let lambda = Expr::lambda("add", vec![a, b], body, Ty::I32);

    assert_eq!(int(run(&lambda, &[Value::I32(3), Value::I32(4)])), 7);
}

#[test]
fn conditional_picks_the_larger_value() {
    let a = Expr::variable("a", Ty::I32);
    let b = Expr::variable("b", Ty::I32);
    let body = Expr::conditional(
        Expr::binary(BinaryOp::Lt, Expr::param(&a), Expr::param(&b)),
        Expr::param(&b),
        Expr::param(&a),
    );
    let lambda = Expr::lambda("max", vec![a, b], body, Ty::I32);

    assert_eq!(int(run(&lambda, &[Value::I32(2), Value::I32(9)])), 9);
    assert_eq!(int(run(&lambda, &[Value::I32(8), Value::I32(-1)])), 8);
}

#[test]
fn coalesce_supplies_the_fallback() {
    let a = Expr::variable("a", Ty::nullable(Ty::I32));
    let body = Expr::coalesce(Expr::param(&a), Expr::i32(-1));
    let lambda = Expr::lambda("or_minus_one", vec![a], body, Ty::I32);

    assert_eq!(int(run(&lambda, &[Value::Null])), -1);
    assert_eq!(int(run(&lambda, &[Value::I32(5)])), 5);
}

#[test]
fn lifted_addition_propagates_null() {
    let a = Expr::variable("a", Ty::nullable(Ty::I32));
    let body = Expr::add(Expr::param(&a), Expr::i32(2));
    let lambda = Expr::lambda("plus_two", vec![a], body, Ty::nullable(Ty::I32));

    assert!(run(&lambda, &[Value::Null]).is_null());
    assert_eq!(int(run(&lambda, &[Value::I32(5)])), 7);
}

#[test]
fn lifted_negate_propagates_null() {
    let a = Expr::variable("a", Ty::nullable(Ty::I32));
    let lambda = Expr::lambda(
        "neg",
        vec![a.clone()],
        Expr::negate(Expr::param(&a)),
        Ty::nullable(Ty::I32),
    );

    assert!(run(&lambda, &[Value::Null]).is_null());
    assert_eq!(int(run(&lambda, &[Value::I32(5)])), -5);
}

#[test]
fn lifted_and_also_matches_the_three_valued_table() {
    let a = Expr::variable("a", Ty::nullable(Ty::Bool));
    let b = Expr::variable("b", Ty::nullable(Ty::Bool));
    let lambda = Expr::lambda(
        "and",
        vec![a.clone(), b.clone()],
        Expr::and_also(Expr::param(&a), Expr::param(&b)),
        Ty::nullable(Ty::Bool),
    );
    let compiled = compile(&lambda).expect("lambda compiles");

    let v = |o: Option<bool>| o.map_or(Value::Null, Value::Bool);
    let table = [
        (Some(true), Some(true), Some(true)),
        (Some(true), Some(false), Some(false)),
        (Some(true), None, None),
        (Some(false), Some(true), Some(false)),
        (Some(false), Some(false), Some(false)),
        (Some(false), None, Some(false)),
        (None, Some(true), None),
        (None, Some(false), Some(false)),
        (None, None, None),
    ];
    for (l, r, expected) in table {
        let out = compiled.invoke(&[v(l), v(r)]).expect("invocation succeeds");
        assert_eq!(tri(out), expected, "{l:?} && {r:?}");
    }
}

#[test]
fn lifted_or_else_matches_the_three_valued_table() {
    let a = Expr::variable("a", Ty::nullable(Ty::Bool));
    let b = Expr::variable("b", Ty::nullable(Ty::Bool));
    let lambda = Expr::lambda(
        "or",
        vec![a.clone(), b.clone()],
        Expr::or_else(Expr::param(&a), Expr::param(&b)),
        Ty::nullable(Ty::Bool),
    );
    let compiled = compile(&lambda).expect("lambda compiles");

    let v = |o: Option<bool>| o.map_or(Value::Null, Value::Bool);
    let table = [
        (Some(true), Some(true), Some(true)),
        (Some(true), Some(false), Some(true)),
        (Some(true), None, Some(true)),
        (Some(false), Some(true), Some(true)),
        (Some(false), Some(false), Some(false)),
        (Some(false), None, None),
        (None, Some(true), Some(true)),
        (None, Some(false), None),
        (None, None, None),
    ];
    for (l, r, expected) in table {
        let out = compiled.invoke(&[v(l), v(r)]).expect("invocation succeeds");
        assert_eq!(tri(out), expected, "{l:?} || {r:?}");
    }
}

#[test]
fn lifted_equality_treats_null_as_a_comparable_value() {
    let a = Expr::variable("a", Ty::nullable(Ty::I32));
    let b = Expr::variable("b", Ty::nullable(Ty::I32));
    let eq = Expr::lambda(
        "eq",
        vec![a.clone(), b.clone()],
        Expr::eq(Expr::param(&a), Expr::param(&b)),
        Ty::Bool,
    );
    let ne = Expr::lambda(
        "ne",
        vec![a.clone(), b.clone()],
        Expr::binary(BinaryOp::Ne, Expr::param(&a), Expr::param(&b)),
        Ty::Bool,
    );

    let cases = [
        (Value::Null, Value::Null, true),
        (Value::Null, Value::I32(5), false),
        (Value::I32(5), Value::Null, false),
        (Value::I32(5), Value::I32(5), true),
        (Value::I32(5), Value::I32(6), false),
    ];
    let eq = compile(&eq).expect("lambda compiles");
    let ne = compile(&ne).expect("lambda compiles");
    for (l, r, equal) in cases {
        let args = [l, r];
        assert_eq!(
            eq.invoke(&args).expect("runs").as_bool(),
            Some(equal),
            "eq {args:?}"
        );
        assert_eq!(
            ne.invoke(&args).expect("runs").as_bool(),
            Some(!equal),
            "ne {args:?}"
        );
    }
}

#[test]
fn lifted_relational_defaults_to_false_on_null() {
    let a = Expr::variable("a", Ty::nullable(Ty::I32));
    let b = Expr::variable("b", Ty::nullable(Ty::I32));
    let lambda = Expr::lambda(
        "lt",
        vec![a.clone(), b.clone()],
        Expr::binary(BinaryOp::Lt, Expr::param(&a), Expr::param(&b)),
        Ty::Bool,
    );
    let compiled = compile(&lambda).expect("lambda compiles");

    let lt = |l, r| compiled.invoke(&[l, r]).expect("runs").as_bool();
    assert_eq!(lt(Value::I32(5), Value::I32(9)), Some(true));
    assert_eq!(lt(Value::I32(9), Value::I32(5)), Some(false));
    assert_eq!(lt(Value::Null, Value::I32(9)), Some(false));
    assert_eq!(lt(Value::I32(5), Value::Null), Some(false));
    assert_eq!(lt(Value::Null, Value::Null), Some(false));
}

#[test]
fn null_propagating_relational_yields_null_on_null() {
    let a = Expr::variable("a", Ty::nullable(Ty::I32));
    let b = Expr::variable("b", Ty::nullable(Ty::I32));
    let lambda = Expr::lambda(
        "lt3",
        vec![a.clone(), b.clone()],
        Expr::binary_lifted_to_null(BinaryOp::Lt, Expr::param(&a), Expr::param(&b)),
        Ty::nullable(Ty::Bool),
    );
    let compiled = compile(&lambda).expect("lambda compiles");

    let lt = |l, r| tri(compiled.invoke(&[l, r]).expect("runs"));
    assert_eq!(lt(Value::I32(5), Value::I32(9)), Some(true));
    assert_eq!(lt(Value::I32(9), Value::I32(5)), Some(false));
    assert_eq!(lt(Value::Null, Value::I32(9)), None);
    assert_eq!(lt(Value::I32(5), Value::Null), None);
}

#[test]
fn string_equality_compares_contents() {
    let s = Expr::variable("s", Ty::Str);
    let body = Expr::conditional(
        Expr::eq(Expr::param(&s), Expr::str("hi")),
        Expr::i32(1),
        Expr::i32(0),
    );
    let lambda = Expr::lambda("is_hi", vec![s], body, Ty::I32);

    assert_eq!(int(run(&lambda, &[Value::Str(Rc::from("hi"))])), 1);
    assert_eq!(int(run(&lambda, &[Value::Str(Rc::from("no"))])), 0);
}

#[test]
fn not_flips_booleans_and_complements_integers() {
    let b = Expr::variable("b", Ty::Bool);
    let flip = Expr::lambda("flip", vec![b.clone()], Expr::not(Expr::param(&b)), Ty::Bool);
    assert_eq!(run(&flip, &[Value::Bool(true)]).as_bool(), Some(false));

    let n = Expr::variable("n", Ty::I32);
    let complement = Expr::lambda("compl", vec![n.clone()], Expr::not(Expr::param(&n)), Ty::I32);
    assert_eq!(int(run(&complement, &[Value::I32(0)])), -1);
}

#[test]
fn unchecked_narrowing_wraps() {
    let lambda = Expr::lambda(
        "narrow",
        vec![],
        Expr::convert(Expr::i32(300), Ty::U8),
        Ty::U8,
    );
    assert!(matches!(run(&lambda, &[]), Value::U8(44)));
}

#[test]
fn checked_narrowing_raises_overflow() {
    let env = Env::new();
    let overflow = Ty::Class(env.builtins.overflow);
    let env = env.into_rc();

    let body = Expr::try_catch(
        Expr::block(
            vec![],
            vec![
                Expr::convert_checked(Expr::i32(300), Ty::U8),
                Expr::i32(0),
            ],
        ),
        vec![Expr::catch(overflow, Expr::i32(-1))],
    );
    let lambda = Expr::lambda("narrow_checked", vec![], body, Ty::I32);
    let out = compile_with_env(&lambda, env)
        .expect("lambda compiles")
        .invoke(&[])
        .expect("invocation succeeds");

    assert_eq!(int(out), -1);
}

#[test]
fn nullable_conversion_passes_null_through() {
    let v = Expr::variable("v", Ty::nullable(Ty::I32));
    let lambda = Expr::lambda(
        "widen",
        vec![v.clone()],
        Expr::convert(Expr::param(&v), Ty::nullable(Ty::I64)),
        Ty::nullable(Ty::I64),
    );

    assert!(run(&lambda, &[Value::Null]).is_null());
    assert_eq!(run(&lambda, &[Value::I32(5)]).as_int_wide(), Some(5));
}

#[test]
fn unwrapping_a_null_nullable_raises() {
    let env = Env::new();
    let null_value = Ty::Class(env.builtins.null_value);
    let env = env.into_rc();

    let v = Expr::variable("v", Ty::nullable(Ty::I32));
    let body = Expr::try_catch(
        Expr::convert(Expr::param(&v), Ty::I64),
        vec![Expr::catch(null_value, Expr::i64(-1))],
    );
    let lambda = Expr::lambda("unwrap", vec![v], body, Ty::I64);
    let compiled = compile_with_env(&lambda, env).expect("lambda compiles");

    let out = |arg| compiled.invoke(&[arg]).expect("runs").as_int_wide();
    assert_eq!(out(Value::Null), Some(-1));
    assert_eq!(out(Value::I32(5)), Some(5));
}

#[test]
fn checked_add_overflow_is_a_catchable_error() {
    let env = Env::new();
    let overflow = Ty::Class(env.builtins.overflow);
    let env = env.into_rc();

    let body = Expr::try_catch(
        Expr::binary(BinaryOp::AddChecked, Expr::i32(i32::MAX), Expr::i32(1)),
        vec![Expr::catch(overflow, Expr::i32(-1))],
    );
    let lambda = Expr::lambda("overflowing", vec![], body, Ty::I32);
    let out = compile_with_env(&lambda, env)
        .expect("lambda compiles")
        .invoke(&[])
        .expect("invocation succeeds");

    assert_eq!(int(out), -1);
}

#[test]
fn unchecked_add_wraps_silently() {
    let lambda = Expr::lambda(
        "wrapping",
        vec![],
        Expr::add(Expr::i32(i32::MAX), Expr::i32(1)),
        Ty::I32,
    );
    assert_eq!(int(run(&lambda, &[])), i32::MIN);
}

#[test]
fn division_by_zero_is_a_catchable_error() {
    let env = Env::new();
    let div_zero = Ty::Class(env.builtins.divide_by_zero);
    let env = env.into_rc();

    let body = Expr::try_catch(
        Expr::binary(BinaryOp::Div, Expr::i32(7), Expr::i32(0)),
        vec![Expr::catch(div_zero, Expr::i32(-1))],
    );
    let lambda = Expr::lambda("div", vec![], body, Ty::I32);
    let out = compile_with_env(&lambda, env)
        .expect("lambda compiles")
        .invoke(&[])
        .expect("invocation succeeds");

    assert_eq!(int(out), -1);
}

#[test]
fn invokes_a_nested_delegate() {
    let x = Expr::variable("x", Ty::I32);
    let double = Expr::lambda(
        "double",
        vec![x.clone()],
        Expr::binary(BinaryOp::Mul, Expr::param(&x), Expr::i32(2)),
        Ty::I32,
    );
    let lambda = Expr::lambda(
        "call_it",
        vec![],
        Expr::invoke(double, vec![Expr::i32(21)]),
        Ty::I32,
    );

    assert_eq!(int(run(&lambda, &[])), 42);
}

fn min2(args: &mut [Value]) -> Result<Value, RuntimeError> {
    let a = args[0].as_i32().ok_or(RuntimeError::Internal("min2: i32 expected"))?;
    let b = args[1].as_i32().ok_or(RuntimeError::Internal("min2: i32 expected"))?;
    Ok(Value::I32(a.min(b)))
}

#[test]
fn calls_a_registered_native() {
    let mut env = Env::new();
    let min = env.natives.register(
        "min2",
        Rc::new(SignatureData {
            params: vec![Ty::I32, Ty::I32],
            ret: Ty::I32,
        }),
        min2,
    );
    let env = env.into_rc();

    let a = Expr::variable("a", Ty::I32);
    let b = Expr::variable("b", Ty::I32);
    let body = Expr::call(min, vec![Expr::param(&a), Expr::param(&b)], Ty::I32);
    let lambda = Expr::lambda("use_min", vec![a, b], body, Ty::I32);
    let out = compile_with_env(&lambda, env)
        .expect("lambda compiles")
        .invoke(&[Value::I32(9), Value::I32(4)])
        .expect("invocation succeeds");

    assert_eq!(int(out), 4);
}

fn bump(args: &mut [Value]) -> Result<Value, RuntimeError> {
    let Value::Cell(cell) = &args[0] else {
        return Err(RuntimeError::Internal("bump: by-ref cell expected"));
    };
    let next = cell.borrow().as_i32().unwrap_or(0) + 1;
    *cell.borrow_mut() = Value::I32(next);
    Ok(Value::Null)
}

#[test]
fn by_ref_native_argument_writes_back() {
    let mut env = Env::new();
    let bump = env.natives.register(
        "bump",
        Rc::new(SignatureData {
            params: vec![Ty::by_ref(Ty::I32)],
            ret: Ty::Void,
        }),
        bump,
    );
    let env = env.into_rc();

    let x = Expr::variable("x", Ty::I32);
    let body = Expr::block(
        vec![],
        vec![
            Expr::call(bump, vec![Expr::param(&x)], Ty::Void),
            Expr::param(&x),
        ],
    );
    let lambda = Expr::lambda("bumped", vec![x], body, Ty::I32);
    let out = compile_with_env(&lambda, env)
        .expect("lambda compiles")
        .invoke(&[Value::I32(5)])
        .expect("invocation succeeds");

    assert_eq!(int(out), 6);
}

#[test]
fn by_ref_parameter_shares_the_caller_cell() {
    let x = Expr::by_ref_variable("x", Ty::I32);
    let body = Expr::assign(Expr::param(&x), Expr::add(Expr::param(&x), Expr::i32(1)));
    let lambda = Expr::lambda("bump_ref", vec![x], body, Ty::I32);

    let cell = Rc::new(RefCell::new(Value::I32(5)));
    let out = run(&lambda, &[Value::Cell(cell.clone())]);
    assert_eq!(int(out), 6);
    assert!(matches!(&*cell.borrow(), Value::I32(6)));
}

#[test]
fn constructs_objects_and_reads_fields() {
    let mut env = Env::new();
    let point = env.types.define(
        TypeDef::new("Point")
            .with_field(FieldDef::new("x", Ty::I32))
            .with_field(FieldDef::new("y", Ty::I32)),
    );
    let x = env.types.field(point, "x").expect("field x");
    let y = env.types.field(point, "y").expect("field y");
    let env = env.into_rc();

    let p = Expr::variable("p", Ty::Class(point));
    let body = Expr::block(
        vec![p.clone()],
        vec![
            Expr::assign(
                Expr::param(&p),
                Expr::new_obj(point, vec![Expr::i32(3), Expr::i32(4)]),
            ),
            Expr::assign(Expr::field(Expr::param(&p), y, Ty::I32), Expr::i32(6)),
            Expr::add(
                Expr::field(Expr::param(&p), x, Ty::I32),
                Expr::field(Expr::param(&p), y, Ty::I32),
            ),
        ],
    );
    let lambda = Expr::lambda("point_sum", vec![], body, Ty::I32);
    let out = compile_with_env(&lambda, env)
        .expect("lambda compiles")
        .invoke(&[])
        .expect("invocation succeeds");

    assert_eq!(int(out), 9);
}

#[test]
fn arrays_support_element_access_and_length() {
    let xs = Expr::variable("xs", Ty::array(Ty::I32));
    let body = Expr::block(
        vec![xs.clone()],
        vec![
            Expr::assign(
                Expr::param(&xs),
                Expr::new_array(Ty::I32, vec![Expr::i32(1), Expr::i32(2), Expr::i32(3)]),
            ),
            Expr::assign(Expr::index(Expr::param(&xs), Expr::i32(1)), Expr::i32(20)),
            Expr::add(
                Expr::index(Expr::param(&xs), Expr::i32(0)),
                Expr::add(
                    Expr::index(Expr::param(&xs), Expr::i32(1)),
                    Expr::unary(UnaryOp::ArrayLength, Expr::param(&xs)),
                ),
            ),
        ],
    );
    let lambda = Expr::lambda("array_ops", vec![], body, Ty::I32);

    assert_eq!(int(run(&lambda, &[])), 24);
}

#[test]
fn out_of_range_index_is_a_catchable_error() {
    let env = Env::new();
    let index_range = Ty::Class(env.builtins.index_range);
    let env = env.into_rc();

    let body = Expr::try_catch(
        Expr::index(
            Expr::new_array(Ty::I32, vec![Expr::i32(1)]),
            Expr::i32(9),
        ),
        vec![Expr::catch(index_range, Expr::i32(-1))],
    );
    let lambda = Expr::lambda("oob", vec![], body, Ty::I32);
    let out = compile_with_env(&lambda, env)
        .expect("lambda compiles")
        .invoke(&[])
        .expect("invocation succeeds");

    assert_eq!(int(out), -1);
}

#[test]
fn live_constants_read_through_the_binding() {
    let shared = Rc::new(RefCell::new(vec![Value::I32(10), Value::I32(20)]));
    let arr = Expr::constant(Value::Array(shared.clone()), Ty::array(Ty::I32));
    let lambda = Expr::lambda(
        "pick",
        vec![],
        Expr::index(arr, Expr::i32(1)),
        Ty::I32,
    );
    let compiled = compile(&lambda).expect("lambda compiles");

    assert_eq!(int(compiled.invoke(&[]).expect("runs")), 20);
    shared.borrow_mut()[1] = Value::I32(30);
    assert_eq!(int(compiled.invoke(&[]).expect("runs")), 30);
}

#[test]
fn deeply_nested_trees_compile() {
    let mut e = Expr::i32(0);
    for _ in 0..5_000 {
        e = Expr::add(e, Expr::i32(1));
    }
    let lambda = Expr::lambda("deep", vec![], e, Ty::I32);

    assert_eq!(int(run(&lambda, &[])), 5_000);
}
