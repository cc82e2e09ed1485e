// src/tree/mod.rs
//
// The expression node model: an immutable, typed AST tagged by node kind.
// The compiler never mutates a node; rewriting passes build new nodes that
// share unchanged subtrees through `Rc`. Node identity (used by the binder,
// scope, and label maps) is `Rc` pointer identity, exposed via `NodeKey`.

mod expr;
mod factory;
mod ops;
mod types;

pub use expr::{
    AssignExpr, BinaryExpr, BlockExpr, CallExpr, CatchBlock, CatchRef, ConditionalExpr,
    ConvertExpr, Expr, ExprKind, ExprRef, FieldExpr, GotoExpr, IndexExpr, InvokeExpr, LabelExpr,
    LabelRef, LabelTarget, LambdaExpr, LoopExpr, NewArrayExpr, NewExpr, NodeKey, ParamRef,
    ParameterExpr, SwitchCase, SwitchExpr, TryExpr, UnaryExpr,
};
pub use ops::{BinaryOp, GotoKind, UnaryOp};
pub use types::{NumTy, Signature, SignatureData, Ty};
