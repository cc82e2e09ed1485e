// tests/control_flow.rs
//
// Loops, labels and jump validation, exception regions, and switch
// dispatch strategies.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use alder::runtime::{Env, TypeDef};
use alder::tree::BinaryOp;
use alder::{compile, compile_with_env, CompileErrorKind, Expr, ExprRef, Ty, Value};

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

fn skip() -> ExprRef {
    Expr::default_of(Ty::Void)
}

#[test]
fn loop_with_break_and_continue_sums_odds() {
    let i = Expr::variable("i", Ty::I32);
    let acc = Expr::variable("acc", Ty::I32);
    let brk = Expr::label_target("brk", Ty::Void);
    let cont = Expr::label_target("cont", Ty::Void);

    let body = Expr::block(
        vec![],
        vec![
            Expr::assign(Expr::param(&i), Expr::add(Expr::param(&i), Expr::i32(1))),
            Expr::conditional(
                Expr::binary(BinaryOp::Gt, Expr::param(&i), Expr::i32(10)),
                Expr::break_to(brk.clone()),
                skip(),
            ),
            Expr::conditional(
                Expr::eq(
                    Expr::binary(BinaryOp::Rem, Expr::param(&i), Expr::i32(2)),
                    Expr::i32(0),
                ),
                Expr::continue_to(cont.clone()),
                skip(),
            ),
            Expr::assign(Expr::param(&acc), Expr::add(Expr::param(&acc), Expr::param(&i))),
        ],
    );
    let lambda = Expr::lambda(
        "sum_odds",
        vec![],
        Expr::block(
            vec![i, acc.clone()],
            vec![Expr::loop_(body, Some(brk), Some(cont)), Expr::param(&acc)],
        ),
        Ty::I32,
    );

    assert_eq!(int(run(&lambda, &[])), 25);
}

#[test]
fn break_carries_the_loop_value() {
    let brk = Expr::label_target("brk", Ty::I32);
    let body = Expr::goto_with(brk.clone(), Expr::i32(42));
    let lambda = Expr::lambda("answer", vec![], Expr::loop_(body, Some(brk), None), Ty::I32);

    assert_eq!(int(run(&lambda, &[])), 42);
}

#[test]
fn goto_with_a_value_skips_the_label_default() {
    let f = Expr::variable("f", Ty::Bool);
    let l = Expr::label_target("out", Ty::I32);
    let body = Expr::block(
        vec![],
        vec![
            Expr::conditional(
                Expr::param(&f),
                Expr::goto_with(l.clone(), Expr::i32(3)),
                skip(),
            ),
            Expr::label(l, Some(Expr::i32(9))),
        ],
    );
    let lambda = Expr::lambda("pick", vec![f], body, Ty::I32);
    let compiled = compile(&lambda).expect("lambda compiles");

    let out = |flag| compiled.invoke(&[Value::Bool(flag)]).expect("runs");
    assert_eq!(int(out(true)), 3);
    assert_eq!(int(out(false)), 9);
}

#[test]
fn early_return_through_the_tail_label() {
    let f = Expr::variable("f", Ty::Bool);
    let ret = Expr::label_target("ret", Ty::I32);
    let body = Expr::block(
        vec![],
        vec![
            Expr::conditional(
                Expr::param(&f),
                Expr::return_to(ret.clone(), Some(Expr::i32(1))),
                skip(),
            ),
            Expr::label(ret, Some(Expr::i32(0))),
        ],
    );
    let lambda = Expr::lambda("early", vec![f], body, Ty::I32);
    let compiled = compile(&lambda).expect("lambda compiles");

    let out = |flag| compiled.invoke(&[Value::Bool(flag)]).expect("runs");
    assert_eq!(int(out(true)), 1);
    assert_eq!(int(out(false)), 0);
}

#[test]
fn jump_into_a_try_block_is_rejected() {
    let l = Expr::label_target("inside", Ty::Void);
    let body = Expr::block(
        vec![],
        vec![
            Expr::goto(l.clone()),
            Expr::try_catch(
                Expr::block(vec![], vec![Expr::label(l, None), Expr::i32(0)]),
                vec![Expr::catch(Ty::Object, Expr::i32(1))],
            ),
        ],
    );
    let lambda = Expr::lambda("bad_jump", vec![], body, Ty::I32);

    let err = compile(&lambda).expect_err("jump into a try must not compile");
    assert!(matches!(err.kind, CompileErrorKind::CannotJumpIntoTry { .. }));
}

#[test]
fn undefined_label_is_rejected() {
    let l = Expr::label_target("nowhere", Ty::Void);
    let body = Expr::block(vec![], vec![Expr::goto(l), Expr::i32(0)]);
    let lambda = Expr::lambda("dangling", vec![], body, Ty::I32);

    let err = compile(&lambda).expect_err("undefined label must not compile");
    assert!(matches!(err.kind, CompileErrorKind::LabelUndefined { .. }));
}

#[test]
fn rethrow_outside_a_catch_is_rejected() {
    let body = Expr::block(vec![], vec![Expr::rethrow(), Expr::i32(0)]);
    let lambda = Expr::lambda("bad_rethrow", vec![], body, Ty::I32);

    let err = compile(&lambda).expect_err("rethrow outside catch must not compile");
    assert!(matches!(err.kind, CompileErrorKind::RethrowOutsideCatch));
}

fn error_env() -> (Rc<Env>, alder::runtime::TypeDefId, alder::runtime::FieldId) {
    let mut env = Env::new();
    let boom = env.types.define(
        TypeDef::new("Boom").with_field(alder::runtime::FieldDef::new("message", Ty::Str)),
    );
    let message = env.types.field(boom, "message").expect("message field");
    (env.into_rc(), boom, message)
}

#[test]
fn catch_receives_the_thrown_object() {
    let (env, boom, _) = error_env();
    let body = Expr::try_catch(
        Expr::block(
            vec![],
            vec![
                Expr::throw(Expr::new_obj(boom, vec![Expr::str("boom")])),
                Expr::i32(0),
            ],
        ),
        vec![Expr::catch(Ty::Class(boom), Expr::i32(-1))],
    );
    let lambda = Expr::lambda("catches", vec![], body, Ty::I32);
    let out = compile_with_env(&lambda, env)
        .expect("lambda compiles")
        .invoke(&[])
        .expect("invocation succeeds");

    assert_eq!(int(out), -1);
}

#[test]
fn finally_runs_after_a_normal_body() {
    let x = Expr::variable("x", Ty::I32);
    let r = Expr::variable("r", Ty::I32);
    let guarded = Expr::try_finally(
        Expr::block(
            vec![],
            vec![Expr::assign(Expr::param(&x), Expr::i32(5)), Expr::i32(1)],
        ),
        Expr::assign(Expr::param(&x), Expr::add(Expr::param(&x), Expr::i32(1))),
    );
    let body = Expr::block(
        vec![x.clone(), r.clone()],
        vec![
            Expr::assign(Expr::param(&r), guarded),
            Expr::add(Expr::param(&r), Expr::param(&x)),
        ],
    );
    let lambda = Expr::lambda("finally_runs", vec![], body, Ty::I32);

    // try value 1, then finally bumps x from 5 to 6.
    assert_eq!(int(run(&lambda, &[])), 7);
}

#[test]
fn finally_runs_when_a_catch_handles() {
    let (env, boom, _) = error_env();
    let x = Expr::variable("x", Ty::I32);
    let guarded = Expr::try_catch_finally(
        Expr::block(
            vec![],
            vec![
                Expr::throw(Expr::new_obj(boom, vec![Expr::str("boom")])),
                Expr::i32(0),
            ],
        ),
        vec![Expr::catch(Ty::Class(boom), Expr::i32(10))],
        Expr::assign(Expr::param(&x), Expr::i32(3)),
    );
    let body = Expr::block(
        vec![x.clone()],
        vec![Expr::add(guarded, Expr::param(&x))],
    );
    let lambda = Expr::lambda("both_run", vec![], body, Ty::I32);
    let out = compile_with_env(&lambda, env)
        .expect("lambda compiles")
        .invoke(&[])
        .expect("invocation succeeds");

    assert_eq!(int(out), 13);
}

#[test]
fn fault_runs_only_when_the_body_raises() {
    let (env, boom, _) = error_env();
    let compiled_env = env.clone();
    let flag = Expr::variable("flag", Ty::I32);

    // Raising path: the fault body runs, then the outer catch sees the flag.
    let inner = Expr::try_fault(
        Expr::block(
            vec![],
            vec![
                Expr::throw(Expr::new_obj(boom, vec![Expr::str("boom")])),
                Expr::i32(0),
            ],
        ),
        Expr::assign(Expr::param(&flag), Expr::i32(1)),
    );
    let raising = Expr::lambda(
        "fault_on_raise",
        vec![],
        Expr::block(
            vec![flag.clone()],
            vec![Expr::try_catch(
                inner,
                vec![Expr::catch(Ty::Class(boom), Expr::param(&flag))],
            )],
        ),
        Ty::I32,
    );
    let out = compile_with_env(&raising, compiled_env)
        .expect("lambda compiles")
        .invoke(&[])
        .expect("invocation succeeds");
    assert_eq!(int(out), 1);

    // Normal path: the fault body is skipped.
    let quiet = Expr::lambda(
        "fault_skipped",
        vec![],
        Expr::block(
            vec![flag.clone()],
            vec![Expr::add(
                Expr::try_fault(Expr::i32(5), Expr::assign(Expr::param(&flag), Expr::i32(100))),
                Expr::param(&flag),
            )],
        ),
        Ty::I32,
    );
    let out = compile_with_env(&quiet, env)
        .expect("lambda compiles")
        .invoke(&[])
        .expect("invocation succeeds");
    assert_eq!(int(out), 5);
}

#[test]
fn rethrow_reaches_the_outer_handler() {
    let (env, boom, _) = error_env();
    let inner = Expr::try_catch(
        Expr::block(
            vec![],
            vec![
                Expr::throw(Expr::new_obj(boom, vec![Expr::str("boom")])),
                Expr::i32(0),
            ],
        ),
        vec![Expr::catch(
            Ty::Class(boom),
            Expr::block(vec![], vec![Expr::rethrow(), Expr::i32(0)]),
        )],
    );
    let body = Expr::try_catch(inner, vec![Expr::catch(Ty::Class(boom), Expr::i32(7))]);
    let lambda = Expr::lambda("rethrows", vec![], body, Ty::I32);
    let out = compile_with_env(&lambda, env)
        .expect("lambda compiles")
        .invoke(&[])
        .expect("invocation succeeds");

    assert_eq!(int(out), 7);
}

#[test]
fn filter_selects_between_handlers() {
    let (env, boom, message) = error_env();
    let m = Expr::variable("m", Ty::Str);
    let e = Expr::variable("e", Ty::Class(boom));

    let filter = Expr::eq(
        Expr::field(Expr::param(&e), message, Ty::Str),
        Expr::str("bad"),
    );
    let body = Expr::try_catch(
        Expr::block(
            vec![],
            vec![
                Expr::throw(Expr::new_obj(boom, vec![Expr::param(&m)])),
                Expr::i32(0),
            ],
        ),
        vec![
            Expr::catch_filtered(e, filter, Expr::i32(1)),
            Expr::catch(Ty::Class(boom), Expr::i32(2)),
        ],
    );
    let lambda = Expr::lambda("filtered", vec![m], body, Ty::I32);
    let compiled = compile_with_env(&lambda, env).expect("lambda compiles");

    let out = |msg: &str| compiled.invoke(&[Value::Str(Rc::from(msg))]).expect("runs");
    assert_eq!(int(out("bad")), 1);
    assert_eq!(int(out("fine")), 2);
}

#[test]
fn rejecting_filter_leaves_the_exception_unhandled() {
    let (env, boom, message) = error_env();
    let e = Expr::variable("e", Ty::Class(boom));
    let filter = Expr::eq(
        Expr::field(Expr::param(&e), message, Ty::Str),
        Expr::str("never"),
    );
    let body = Expr::try_catch(
        Expr::block(
            vec![],
            vec![
                Expr::throw(Expr::new_obj(boom, vec![Expr::str("boom")])),
                Expr::i32(0),
            ],
        ),
        vec![Expr::catch_filtered(e, filter, Expr::i32(1))],
    );
    let lambda = Expr::lambda("unfiltered", vec![], body, Ty::I32);
    let compiled = compile_with_env(&lambda, env).expect("lambda compiles");

    assert!(compiled.invoke(&[]).is_err());
}

fn int_switch(keys: &[i32], default: i32) -> ExprRef {
    let v = Expr::variable("v", Ty::I32);
    let cases = keys
        .iter()
        .enumerate()
        .map(|(index, &k)| Expr::case(vec![Expr::i32(k)], Expr::i32(index as i32 * 10)))
        .collect();
    let body = Expr::switch(Expr::param(&v), cases, Some(Expr::i32(default)));
    Expr::lambda("dispatch", vec![v], body, Ty::I32)
}

#[test]
fn switch_dispatches_through_clustered_jump_tables() {
    // Two dense clusters far apart: each becomes its own jump table.
    let lambda = int_switch(&[1, 2, 3, 100, 101, 102], -1);
    let compiled = compile(&lambda).expect("lambda compiles");

    let out = |v| compiled.invoke(&[Value::I32(v)]).expect("runs");
    for (index, key) in [1, 2, 3, 100, 101, 102].into_iter().enumerate() {
        assert_eq!(int(out(key)), index as i32 * 10, "key {key}");
    }
    assert_eq!(int(out(0)), -1);
    assert_eq!(int(out(50)), -1);
    assert_eq!(int(out(103)), -1);
}

#[test]
fn switch_handles_negative_keys() {
    let lambda = int_switch(&[-300, -299, -298, 5], -1);
    let compiled = compile(&lambda).expect("lambda compiles");

    let out = |v| compiled.invoke(&[Value::I32(v)]).expect("runs");
    assert_eq!(int(out(-300)), 0);
    assert_eq!(int(out(-299)), 10);
    assert_eq!(int(out(-298)), 20);
    assert_eq!(int(out(5)), 30);
    assert_eq!(int(out(0)), -1);
    assert_eq!(int(out(-301)), -1);
}

#[test]
fn switch_case_with_several_values_shares_a_body() {
    let v = Expr::variable("v", Ty::I32);
    let body = Expr::switch(
        Expr::param(&v),
        vec![
            Expr::case(vec![Expr::i32(1), Expr::i32(2)], Expr::i32(10)),
            Expr::case(vec![Expr::i32(3)], Expr::i32(30)),
        ],
        Some(Expr::i32(-1)),
    );
    let lambda = Expr::lambda("shared_body", vec![v], body, Ty::I32);
    let compiled = compile(&lambda).expect("lambda compiles");

    let out = |v| compiled.invoke(&[Value::I32(v)]).expect("runs");
    assert_eq!(int(out(1)), 10);
    assert_eq!(int(out(2)), 10);
    assert_eq!(int(out(3)), 30);
    assert_eq!(int(out(4)), -1);
}

#[test]
fn switch_with_duplicate_keys_takes_the_first_match() {
    // Duplicates rule out a jump table; the comparison chain preserves
    // case order.
    let v = Expr::variable("v", Ty::I32);
    let body = Expr::switch(
        Expr::param(&v),
        vec![
            Expr::case(vec![Expr::i32(1)], Expr::i32(10)),
            Expr::case(vec![Expr::i32(1)], Expr::i32(20)),
        ],
        Some(Expr::i32(-1)),
    );
    let lambda = Expr::lambda("first_match", vec![v], body, Ty::I32);
    let compiled = compile(&lambda).expect("lambda compiles");

    assert_eq!(int(compiled.invoke(&[Value::I32(1)]).expect("runs")), 10);
}

#[test]
fn switch_with_computed_case_values_compares_in_order() {
    let v = Expr::variable("v", Ty::I32);
    let body = Expr::switch(
        Expr::param(&v),
        vec![Expr::case(
            vec![Expr::add(Expr::i32(2), Expr::i32(3))],
            Expr::i32(50),
        )],
        Some(Expr::i32(-1)),
    );
    let lambda = Expr::lambda("computed", vec![v], body, Ty::I32);
    let compiled = compile(&lambda).expect("lambda compiles");

    assert_eq!(int(compiled.invoke(&[Value::I32(5)]).expect("runs")), 50);
    assert_eq!(int(compiled.invoke(&[Value::I32(4)]).expect("runs")), -1);
}

fn string_switch(names: &[&str]) -> ExprRef {
    let v = Expr::variable("v", Ty::Str);
    let cases = names
        .iter()
        .enumerate()
        .map(|(index, name)| Expr::case(vec![Expr::str(name)], Expr::i32(index as i32)))
        .collect();
    let body = Expr::switch(Expr::param(&v), cases, Some(Expr::i32(-1)));
    Expr::lambda("by_name", vec![v], body, Ty::I32)
}

#[test]
fn string_switch_uses_a_hash_table_above_the_threshold() {
    let days = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
    let compiled = compile(&string_switch(&days)).expect("lambda compiles");

    for (index, day) in days.into_iter().enumerate() {
        let out = compiled.invoke(&[Value::Str(Rc::from(day))]).expect("runs");
        assert_eq!(int(out), index as i32, "day {day}");
    }
    let miss = compiled.invoke(&[Value::Str(Rc::from("nope"))]).expect("runs");
    assert_eq!(int(miss), -1);
}

#[test]
fn small_string_switch_compares_in_order() {
    let names = ["red", "green", "blue"];
    let compiled = compile(&string_switch(&names)).expect("lambda compiles");

    for (index, name) in names.into_iter().enumerate() {
        let out = compiled.invoke(&[Value::Str(Rc::from(name))]).expect("runs");
        assert_eq!(int(out), index as i32, "name {name}");
    }
    let miss = compiled.invoke(&[Value::Str(Rc::from("mauve"))]).expect("runs");
    assert_eq!(int(miss), -1);
}
