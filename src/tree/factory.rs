// src/tree/factory.rs
//
// Node constructors. These compute each node's static result type,
// including the nullable-lifting decision for operators. The compiler
// treats the tree as pre-validated, so factories only `debug_assert` shape;
// they are a convenience for callers and tests, not a validation layer.

use std::rc::Rc;

use crate::compiler::delegates;
use crate::runtime::{FieldId, NativeFnId, TypeDefId, Value};

use super::expr::*;
use super::ops::{BinaryOp, GotoKind, UnaryOp};
use super::types::Ty;

impl Expr {
    fn new(kind: ExprKind, ty: Ty) -> ExprRef {
        Rc::new(Expr { kind, ty })
    }

    pub fn constant(value: Value, ty: Ty) -> ExprRef {
        Self::new(ExprKind::Constant(value), ty)
    }

    pub fn i32(v: i32) -> ExprRef {
        Self::constant(Value::I32(v), Ty::I32)
    }

    pub fn i64(v: i64) -> ExprRef {
        Self::constant(Value::I64(v), Ty::I64)
    }

    pub fn f64(v: f64) -> ExprRef {
        Self::constant(Value::F64(v), Ty::F64)
    }

    pub fn bool(v: bool) -> ExprRef {
        Self::constant(Value::Bool(v), Ty::Bool)
    }

    pub fn str(v: &str) -> ExprRef {
        Self::constant(Value::Str(Rc::from(v)), Ty::Str)
    }

    pub fn null(ty: Ty) -> ExprRef {
        debug_assert!(ty.admits_null(), "null constant of non-nullable type {ty}");
        Self::constant(Value::Null, ty)
    }

    pub fn default_of(ty: Ty) -> ExprRef {
        Self::new(ExprKind::Default, ty)
    }

    /// Declares a new variable. The returned handle is the variable's
    /// identity; reuse it for every reference.
    pub fn variable(name: &str, ty: Ty) -> ParamRef {
        Rc::new(ParameterExpr {
            name: Some(Rc::from(name)),
            ty,
            by_ref: false,
        })
    }

    pub fn by_ref_variable(name: &str, ty: Ty) -> ParamRef {
        Rc::new(ParameterExpr {
            name: Some(Rc::from(name)),
            ty: Ty::by_ref(ty),
            by_ref: true,
        })
    }

    /// A reference to a declared variable.
    pub fn param(p: &ParamRef) -> ExprRef {
        let ty = match &p.ty {
            Ty::Ref(inner) => (**inner).clone(),
            other => other.clone(),
        };
        Self::new(ExprKind::Parameter(p.clone()), ty)
    }

    pub fn binary(op: BinaryOp, left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary_full(op, left, right, false)
    }

    /// Comparison whose lifted form yields `bool?` instead of `bool`.
    pub fn binary_lifted_to_null(op: BinaryOp, left: ExprRef, right: ExprRef) -> ExprRef {
        debug_assert!(op.is_comparison());
        Self::binary_full(op, left, right, true)
    }

    fn binary_full(op: BinaryOp, left: ExprRef, right: ExprRef, lift_to_null: bool) -> ExprRef {
        let (lifted, ty) = binary_result(op, &left.ty, &right.ty, lift_to_null);
        Self::new(
            ExprKind::Binary(BinaryExpr {
                op,
                left,
                right,
                lifted,
                lifted_to_null: lifted && (lift_to_null || !op.is_comparison()),
            }),
            ty,
        )
    }

    pub fn add(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::Add, left, right)
    }

    pub fn coalesce(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::Coalesce, left, right)
    }

    pub fn and_also(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::AndAlso, left, right)
    }

    pub fn or_else(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::OrElse, left, right)
    }

    pub fn eq(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::Eq, left, right)
    }

    pub fn unary(op: UnaryOp, operand: ExprRef) -> ExprRef {
        let (lifted, ty) = match op {
            UnaryOp::ArrayLength => (false, Ty::I32),
            _ => {
                let lifted = operand.ty.is_nullable();
                (lifted, operand.ty.clone())
            }
        };
        Self::new(ExprKind::Unary(UnaryExpr { op, operand, lifted }), ty)
    }

    pub fn negate(operand: ExprRef) -> ExprRef {
        Self::unary(UnaryOp::Negate, operand)
    }

    pub fn not(operand: ExprRef) -> ExprRef {
        Self::unary(UnaryOp::Not, operand)
    }

    pub fn convert(operand: ExprRef, to: Ty) -> ExprRef {
        Self::new(ExprKind::Convert(ConvertExpr { operand, checked: false }), to)
    }

    pub fn convert_checked(operand: ExprRef, to: Ty) -> ExprRef {
        Self::new(ExprKind::Convert(ConvertExpr { operand, checked: true }), to)
    }

    pub fn conditional(test: ExprRef, if_true: ExprRef, if_false: ExprRef) -> ExprRef {
        debug_assert_eq!(test.ty, Ty::Bool);
        let ty = if_true.ty.clone();
        Self::new(
            ExprKind::Conditional(ConditionalExpr {
                test,
                if_true,
                if_false,
            }),
            ty,
        )
    }

    pub fn call(func: NativeFnId, args: Vec<ExprRef>, ret: Ty) -> ExprRef {
        Self::new(ExprKind::Call(CallExpr { func, args }), ret)
    }

    pub fn invoke(target: ExprRef, args: Vec<ExprRef>) -> ExprRef {
        let ret = match &target.ty {
            Ty::Delegate(sig) => sig.ret.clone(),
            other => panic!("invoke target must be a delegate, got {other}"),
        };
        Self::new(ExprKind::Invoke(InvokeExpr { target, args }), ret)
    }

    pub fn new_obj(type_def: TypeDefId, args: Vec<ExprRef>) -> ExprRef {
        Self::new(ExprKind::New(NewExpr { type_def, args }), Ty::Class(type_def))
    }

    pub fn field(object: ExprRef, field: FieldId, ty: Ty) -> ExprRef {
        Self::new(
            ExprKind::Field(FieldExpr {
                object: Some(object),
                field,
            }),
            ty,
        )
    }

    pub fn static_field(field: FieldId, ty: Ty) -> ExprRef {
        Self::new(ExprKind::Field(FieldExpr { object: None, field }), ty)
    }

    pub fn index(array: ExprRef, index: ExprRef) -> ExprRef {
        let ty = match &array.ty {
            Ty::Array(elem) => (**elem).clone(),
            other => panic!("index target must be an array, got {other}"),
        };
        Self::new(ExprKind::Index(IndexExpr { array, index }), ty)
    }

    pub fn new_array(elem: Ty, items: Vec<ExprRef>) -> ExprRef {
        let ty = Ty::array(elem.clone());
        Self::new(ExprKind::NewArray(NewArrayExpr { elem, items }), ty)
    }

    pub fn block(vars: Vec<ParamRef>, exprs: Vec<ExprRef>) -> ExprRef {
        debug_assert!(!exprs.is_empty(), "block needs at least one expression");
        let ty = exprs.last().map(|e| e.ty.clone()).unwrap_or(Ty::Void);
        Self::new(ExprKind::Block(BlockExpr { vars, exprs }), ty)
    }

    pub fn assign(target: ExprRef, value: ExprRef) -> ExprRef {
        debug_assert!(matches!(
            target.kind,
            ExprKind::Parameter(_) | ExprKind::Field(_) | ExprKind::Index(_)
        ));
        let ty = target.ty.clone();
        Self::new(ExprKind::Assign(AssignExpr { target, value }), ty)
    }

    pub fn lambda(name: &str, params: Vec<ParamRef>, body: ExprRef, ret: Ty) -> ExprRef {
        let sig = delegates::signature(params.iter().map(|p| p.ty.clone()).collect(), ret.clone());
        Self::new(
            ExprKind::Lambda(LambdaExpr {
                name: Some(Rc::from(name)),
                params,
                body,
                ret,
                tail_call: false,
            }),
            Ty::Delegate(sig),
        )
    }

    pub fn quote(lambda: ExprRef) -> ExprRef {
        debug_assert!(matches!(lambda.kind, ExprKind::Lambda(_)));
        Self::new(ExprKind::Quote(lambda), Ty::Object)
    }

    pub fn runtime_variables(vars: Vec<ParamRef>) -> ExprRef {
        Self::new(
            ExprKind::RuntimeVariables(vars),
            Ty::array(Ty::Object),
        )
    }

    pub fn label_target(name: &str, ty: Ty) -> LabelRef {
        Rc::new(LabelTarget {
            name: Some(Rc::from(name)),
            ty,
        })
    }

    pub fn label(target: LabelRef, default: Option<ExprRef>) -> ExprRef {
        let ty = target.ty.clone();
        Self::new(ExprKind::Label(LabelExpr { target, default }), ty)
    }

    pub fn goto(target: LabelRef) -> ExprRef {
        Self::goto_full(GotoKind::Goto, target, None)
    }

    pub fn goto_with(target: LabelRef, value: ExprRef) -> ExprRef {
        Self::goto_full(GotoKind::Goto, target, Some(value))
    }

    pub fn break_to(target: LabelRef) -> ExprRef {
        Self::goto_full(GotoKind::Break, target, None)
    }

    pub fn continue_to(target: LabelRef) -> ExprRef {
        Self::goto_full(GotoKind::Continue, target, None)
    }

    pub fn return_to(target: LabelRef, value: Option<ExprRef>) -> ExprRef {
        Self::goto_full(GotoKind::Return, target, value)
    }

    fn goto_full(kind: GotoKind, target: LabelRef, value: Option<ExprRef>) -> ExprRef {
        Self::new(ExprKind::Goto(GotoExpr { kind, target, value }), Ty::Void)
    }

    pub fn loop_(body: ExprRef, break_label: Option<LabelRef>, continue_label: Option<LabelRef>) -> ExprRef {
        let ty = break_label
            .as_ref()
            .map(|l| l.ty.clone())
            .unwrap_or(Ty::Void);
        Self::new(
            ExprKind::Loop(LoopExpr {
                body,
                break_label,
                continue_label,
            }),
            ty,
        )
    }

    pub fn try_catch(body: ExprRef, handlers: Vec<CatchRef>) -> ExprRef {
        let ty = body.ty.clone();
        Self::new(
            ExprKind::Try(TryExpr {
                body,
                handlers,
                finally: None,
                fault: None,
            }),
            ty,
        )
    }

    pub fn try_finally(body: ExprRef, finally: ExprRef) -> ExprRef {
        let ty = body.ty.clone();
        Self::new(
            ExprKind::Try(TryExpr {
                body,
                handlers: Vec::new(),
                finally: Some(finally),
                fault: None,
            }),
            ty,
        )
    }

    pub fn try_catch_finally(body: ExprRef, handlers: Vec<CatchRef>, finally: ExprRef) -> ExprRef {
        let ty = body.ty.clone();
        Self::new(
            ExprKind::Try(TryExpr {
                body,
                handlers,
                finally: Some(finally),
                fault: None,
            }),
            ty,
        )
    }

    pub fn try_fault(body: ExprRef, fault: ExprRef) -> ExprRef {
        let ty = body.ty.clone();
        Self::new(
            ExprKind::Try(TryExpr {
                body,
                handlers: Vec::new(),
                finally: None,
                fault: Some(fault),
            }),
            ty,
        )
    }

    pub fn catch(test_ty: Ty, body: ExprRef) -> CatchRef {
        Rc::new(CatchBlock {
            var: None,
            test_ty,
            filter: None,
            body,
        })
    }

    pub fn catch_var(var: ParamRef, body: ExprRef) -> CatchRef {
        Rc::new(CatchBlock {
            test_ty: var.ty.clone(),
            var: Some(var),
            filter: None,
            body,
        })
    }

    pub fn catch_filtered(var: ParamRef, filter: ExprRef, body: ExprRef) -> CatchRef {
        debug_assert_eq!(filter.ty, Ty::Bool);
        Rc::new(CatchBlock {
            test_ty: var.ty.clone(),
            var: Some(var),
            filter: Some(filter),
            body,
        })
    }

    pub fn switch(value: ExprRef, cases: Vec<SwitchCase>, default: Option<ExprRef>) -> ExprRef {
        let ty = cases
            .first()
            .map(|c| c.body.ty.clone())
            .or_else(|| default.as_ref().map(|d| d.ty.clone()))
            .unwrap_or(Ty::Void);
        Self::new(ExprKind::Switch(SwitchExpr { value, cases, default }), ty)
    }

    pub fn case(values: Vec<ExprRef>, body: ExprRef) -> SwitchCase {
        SwitchCase { values, body }
    }

    pub fn throw(value: ExprRef) -> ExprRef {
        Self::new(ExprKind::Throw(Some(value)), Ty::Void)
    }

    pub fn rethrow() -> ExprRef {
        Self::new(ExprKind::Throw(None), Ty::Void)
    }
}

/// Lifting decision and result type for a binary operator. A lifted
/// operator sees through `Nullable` operands and propagates null per the
/// 3-valued rules at codegen time.
fn binary_result(op: BinaryOp, left: &Ty, right: &Ty, lift_to_null: bool) -> (bool, Ty) {
    match op {
        BinaryOp::Coalesce => {
            let ty = match left {
                Ty::Nullable(inner) if **inner == *right => right.clone(),
                _ if left == right => left.clone(),
                _ => right.clone(),
            };
            (false, ty)
        }
        BinaryOp::AndAlso | BinaryOp::OrElse => {
            let lifted = left.is_nullable() || right.is_nullable();
            let ty = if lifted {
                Ty::nullable(Ty::Bool)
            } else {
                Ty::Bool
            };
            (lifted, ty)
        }
        op if op.is_comparison() => {
            let lifted = left.is_nullable() || right.is_nullable();
            let ty = if lifted && lift_to_null {
                Ty::nullable(Ty::Bool)
            } else {
                Ty::Bool
            };
            (lifted, ty)
        }
        _ => {
            // Arithmetic, bitwise, shifts: operand cores must agree.
            let core = left.non_nullable().clone();
            debug_assert_eq!(
                core,
                *right.non_nullable(),
                "binary operand types must match"
            );
            let lifted = left.is_nullable() || right.is_nullable();
            let ty = if lifted { Ty::nullable(core) } else { core };
            (lifted, ty)
        }
    }
}
