// tests/closures.rs
//
// Variable hoisting and closure frames: counters, shared frames,
// multi-level capture, runtime variable access, quoting, and the
// ahead-of-time method table.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use alder::runtime::{Closure, Env};
use alder::{
    compile, compile_into, CompileErrorKind, Expr, ExprRef, MethodTable, Ty, Value,
};

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

fn delegate(v: Value) -> Rc<Closure> {
    match v {
        Value::Delegate(c) => c,
        other => panic!("expected a delegate, got {other:?}"),
    }
}

fn counter_factory() -> ExprRef {
    let n = Expr::variable("n", Ty::I32);
    let inc = Expr::lambda(
        "inc",
        vec![],
        Expr::assign(Expr::param(&n), Expr::add(Expr::param(&n), Expr::i32(1))),
        Ty::I32,
    );
    let ret = inc.ty.clone();
    Expr::lambda("make_counter", vec![], Expr::block(vec![n], vec![inc]), ret)
}

#[test]
fn closure_counter_increments_its_hoisted_cell() {
    let counter = delegate(run(&counter_factory(), &[]));

    assert_eq!(int(counter.invoke(vec![]).expect("runs")), 1);
    assert_eq!(int(counter.invoke(vec![]).expect("runs")), 2);
    assert_eq!(int(counter.invoke(vec![]).expect("runs")), 3);
}

#[test]
fn each_factory_call_gets_an_independent_frame() {
    let factory = compile(&counter_factory()).expect("lambda compiles");
    let first = delegate(factory.invoke(&[]).expect("runs"));
    let second = delegate(factory.invoke(&[]).expect("runs"));

    assert_eq!(int(first.invoke(vec![]).expect("runs")), 1);
    assert_eq!(int(first.invoke(vec![]).expect("runs")), 2);
    assert_eq!(int(second.invoke(vec![]).expect("runs")), 1);
    assert_eq!(int(first.invoke(vec![]).expect("runs")), 3);
}

#[test]
fn sibling_closures_share_one_frame() {
    let n = Expr::variable("n", Ty::I32);
    let inc = Expr::lambda(
        "inc",
        vec![],
        Expr::assign(Expr::param(&n), Expr::add(Expr::param(&n), Expr::i32(1))),
        Ty::I32,
    );
    let get = Expr::lambda("get", vec![], Expr::param(&n), Ty::I32);
    let make = Expr::lambda(
        "make_pair",
        vec![],
        Expr::block(vec![n], vec![Expr::new_array(Ty::Object, vec![inc, get])]),
        Ty::array(Ty::Object),
    );

    let Value::Array(pair) = run(&make, &[]) else {
        panic!("expected an array of delegates");
    };
    let (inc, get) = {
        let items = pair.borrow();
        (delegate(items[0].clone()), delegate(items[1].clone()))
    };

    inc.invoke(vec![]).expect("runs");
    inc.invoke(vec![]).expect("runs");
    assert_eq!(int(get.invoke(vec![]).expect("runs")), 2);
}

#[test]
fn capture_reaches_through_two_frames() {
    let a = Expr::variable("a", Ty::I32);
    let b = Expr::variable("b", Ty::I32);
    let inner = Expr::lambda(
        "inner",
        vec![],
        Expr::add(Expr::param(&a), Expr::param(&b)),
        Ty::I32,
    );
    let mid_ret = inner.ty.clone();
    let mid = Expr::lambda(
        "mid",
        vec![],
        Expr::block(
            vec![b.clone()],
            vec![Expr::assign(Expr::param(&b), Expr::i32(5)), inner],
        ),
        mid_ret,
    );
    let outer_ret = mid.ty.clone();
    let outer = Expr::lambda(
        "outer",
        vec![],
        Expr::block(
            vec![a.clone()],
            vec![Expr::assign(Expr::param(&a), Expr::i32(10)), mid],
        ),
        outer_ret,
    );

    let mid = delegate(run(&outer, &[]));
    let inner = delegate(mid.invoke(vec![]).expect("runs"));
    assert_eq!(int(inner.invoke(vec![]).expect("runs")), 15);
}

#[test]
fn hoisted_parameters_seed_their_cells() {
    let start = Expr::variable("start", Ty::I32);
    let next = Expr::lambda(
        "next",
        vec![],
        Expr::assign(
            Expr::param(&start),
            Expr::add(Expr::param(&start), Expr::i32(1)),
        ),
        Ty::I32,
    );
    let ret = next.ty.clone();
    let make = Expr::lambda("from", vec![start], next, ret);

    let counter = delegate(run(&make, &[Value::I32(40)]));
    assert_eq!(int(counter.invoke(vec![]).expect("runs")), 41);
    assert_eq!(int(counter.invoke(vec![]).expect("runs")), 42);
}

#[test]
fn runtime_variables_expose_the_hoisted_cells() {
    let n = Expr::variable("n", Ty::I32);
    let body = Expr::block(
        vec![n.clone()],
        vec![
            Expr::assign(Expr::param(&n), Expr::i32(5)),
            Expr::runtime_variables(vec![n.clone()]),
        ],
    );
    let lambda = Expr::lambda("expose", vec![], body, Ty::array(Ty::Object));

    let Value::Array(vars) = run(&lambda, &[]) else {
        panic!("expected an array of cells");
    };
    let vars = vars.borrow();
    assert_eq!(vars.len(), 1);
    let Value::Cell(cell) = &vars[0] else {
        panic!("expected a cell, got {:?}", vars[0]);
    };
    assert!(matches!(&*cell.borrow(), Value::I32(5)));
}

#[test]
fn quote_produces_an_invokable_delegate() {
    let x = Expr::variable("x", Ty::I32);
    let inner = Expr::lambda(
        "succ",
        vec![x.clone()],
        Expr::add(Expr::param(&x), Expr::i32(1)),
        Ty::I32,
    );
    let lambda = Expr::lambda("quoted", vec![], Expr::quote(inner), Ty::Object);

    let succ = delegate(run(&lambda, &[]));
    assert_eq!(int(succ.invoke(vec![Value::I32(41)]).expect("runs")), 42);
}

#[test]
fn method_table_compiles_nested_lambdas() {
    let mut table = MethodTable::new(Env::new().into_rc());
    let x = Expr::variable("x", Ty::I32);
    let succ = Expr::lambda(
        "succ",
        vec![x.clone()],
        Expr::add(Expr::param(&x), Expr::i32(1)),
        Ty::I32,
    );
    let root = Expr::lambda(
        "entry",
        vec![],
        Expr::invoke(succ, vec![Expr::i32(5)]),
        Ty::I32,
    );

    let id = compile_into(&root, &mut table).expect("table compilation succeeds");
    assert_eq!(table.methods().len(), 2);

    let out = table.delegate(id).invoke(&[]).expect("runs");
    assert_eq!(int(out), 6);
}

#[test]
fn method_table_rejects_live_constants() {
    let mut table = MethodTable::new(Env::new().into_rc());
    let arr = Expr::constant(
        Value::Array(Rc::new(std::cell::RefCell::new(vec![Value::I32(1)]))),
        Ty::array(Ty::I32),
    );
    let lambda = Expr::lambda("live", vec![], Expr::index(arr, Expr::i32(0)), Ty::I32);

    let err = compile_into(&lambda, &mut table).expect_err("live constants must be rejected");
    assert!(matches!(err.kind, CompileErrorKind::CannotEmitConstant { .. }));
}
