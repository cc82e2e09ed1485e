// src/tree/expr.rs
//
// Expression nodes. Every node carries its static result type; children are
// `Rc`-shared so rewriting passes can rebuild a parent without copying
// untouched subtrees.

use std::rc::Rc;

use crate::runtime::{FieldId, NativeFnId, TypeDefId, Value};

use super::ops::{BinaryOp, GotoKind, UnaryOp};
use super::types::Ty;

pub type ExprRef = Rc<Expr>;

#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Ty,
}

/// A declared variable: a lambda parameter, block local, catch variable, or
/// spill temporary. Identity (the `Rc` pointer) is what binds references to
/// definitions; two parameters with the same name are different variables.
#[derive(Debug)]
pub struct ParameterExpr {
    pub name: Option<Rc<str>>,
    pub ty: Ty,
    pub by_ref: bool,
}

pub type ParamRef = Rc<ParameterExpr>;

impl ParameterExpr {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// A jump target. Like variables, identity is the `Rc` pointer; `ty` is the
/// type of the value the label yields (`Void` for plain targets).
#[derive(Debug)]
pub struct LabelTarget {
    pub name: Option<Rc<str>>,
    pub ty: Ty,
}

pub type LabelRef = Rc<LabelTarget>;

impl LabelTarget {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<label>")
    }
}

#[derive(Debug)]
pub enum ExprKind {
    /// A compile-time constant. Literal-emittable values (numerics, bool,
    /// strings, null) become immediates; live reference values go through
    /// the per-lambda bound-constants table.
    Constant(Value),
    Parameter(ParamRef),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Convert(ConvertExpr),
    Conditional(ConditionalExpr),
    /// Call of a registered native function.
    Call(CallExpr),
    /// Invocation of a delegate value.
    Invoke(InvokeExpr),
    New(NewExpr),
    Field(FieldExpr),
    Index(IndexExpr),
    NewArray(NewArrayExpr),
    Block(BlockExpr),
    Assign(AssignExpr),
    Lambda(LambdaExpr),
    /// A lambda treated as data rather than executed in place. Visited for
    /// variable binding (references inside force hoisting) but skipped for
    /// constant collection.
    Quote(ExprRef),
    /// Reifies live access to the listed (necessarily hoisted) variables.
    RuntimeVariables(Vec<ParamRef>),
    Loop(LoopExpr),
    Try(TryExpr),
    Switch(SwitchExpr),
    Label(LabelExpr),
    Goto(GotoExpr),
    /// Throw of the operand, or a rethrow of the in-flight exception when
    /// the operand is absent (only legal inside a catch handler).
    Throw(Option<ExprRef>),
    /// The default value of the node's type (zero, null, false).
    Default,
}

#[derive(Debug)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: ExprRef,
    pub right: ExprRef,
    /// Operand nullability lifted this operator (3-valued semantics).
    pub lifted: bool,
    /// For lifted comparisons: whether the result lifts to `bool?` (true)
    /// or stays plain `bool` with null operands comparing per the
    /// non-lifted table (false). Arithmetic lifts always produce null.
    pub lifted_to_null: bool,
}

#[derive(Debug)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: ExprRef,
    pub lifted: bool,
}

#[derive(Debug)]
pub struct ConvertExpr {
    pub operand: ExprRef,
    /// Overflow-checked narrowing vs. wrapping/truncating conversion.
    pub checked: bool,
}

#[derive(Debug)]
pub struct ConditionalExpr {
    pub test: ExprRef,
    pub if_true: ExprRef,
    pub if_false: ExprRef,
}

#[derive(Debug)]
pub struct CallExpr {
    pub func: NativeFnId,
    pub args: Vec<ExprRef>,
}

#[derive(Debug)]
pub struct InvokeExpr {
    pub target: ExprRef,
    pub args: Vec<ExprRef>,
}

/// Field-initializing construction of a registered class; `args` align with
/// the class's declared fields. Abstract classes cannot be constructed.
#[derive(Debug)]
pub struct NewExpr {
    pub type_def: TypeDefId,
    pub args: Vec<ExprRef>,
}

/// Field load; `object` is `None` for static fields.
#[derive(Debug)]
pub struct FieldExpr {
    pub object: Option<ExprRef>,
    pub field: FieldId,
}

#[derive(Debug)]
pub struct IndexExpr {
    pub array: ExprRef,
    pub index: ExprRef,
}

#[derive(Debug)]
pub struct NewArrayExpr {
    pub elem: Ty,
    pub items: Vec<ExprRef>,
}

/// A sequence of expressions yielding the last one's value. Declared
/// variables make this a binding scope.
#[derive(Debug)]
pub struct BlockExpr {
    pub vars: Vec<ParamRef>,
    pub exprs: Vec<ExprRef>,
}

/// Assignment; `target` must be a `Parameter`, `Field`, or `Index` node.
#[derive(Debug)]
pub struct AssignExpr {
    pub target: ExprRef,
    pub value: ExprRef,
}

#[derive(Debug)]
pub struct LambdaExpr {
    pub name: Option<Rc<str>>,
    pub params: Vec<ParamRef>,
    pub body: ExprRef,
    pub ret: Ty,
    /// Caller preference only; the in-repo backend has no tail-call form.
    pub tail_call: bool,
}

impl LambdaExpr {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<lambda>")
    }
}

/// An unconditional loop; exits happen through gotos to `break_label`.
#[derive(Debug)]
pub struct LoopExpr {
    pub body: ExprRef,
    pub break_label: Option<LabelRef>,
    pub continue_label: Option<LabelRef>,
}

#[derive(Debug)]
pub struct TryExpr {
    pub body: ExprRef,
    pub handlers: Vec<CatchRef>,
    pub finally: Option<ExprRef>,
    /// Runs only when the body unwinds. Mutually exclusive with handlers
    /// and finally.
    pub fault: Option<ExprRef>,
}

#[derive(Debug)]
pub struct CatchBlock {
    /// The caught exception, bound for the filter and handler body.
    pub var: Option<ParamRef>,
    pub test_ty: Ty,
    /// Boolean pre-check run before the handler commits to the exception.
    pub filter: Option<ExprRef>,
    pub body: ExprRef,
}

pub type CatchRef = Rc<CatchBlock>;

#[derive(Debug)]
pub struct SwitchExpr {
    pub value: ExprRef,
    pub cases: Vec<SwitchCase>,
    pub default: Option<ExprRef>,
}

#[derive(Debug)]
pub struct SwitchCase {
    pub values: Vec<ExprRef>,
    pub body: ExprRef,
}

/// Marks a jump target in the tree; yields `default` (or the value carried
/// by whichever goto arrived) when execution reaches it.
#[derive(Debug)]
pub struct LabelExpr {
    pub target: LabelRef,
    pub default: Option<ExprRef>,
}

#[derive(Debug)]
pub struct GotoExpr {
    pub kind: GotoKind,
    pub target: LabelRef,
    pub value: Option<ExprRef>,
}

/// Reference-identity key for tree maps. The binder, scopes, and label
/// tables all key on node identity, never structural equality: two
/// structurally equal nodes are still distinct definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey(usize);

impl NodeKey {
    pub fn expr(e: &ExprRef) -> Self {
        NodeKey(Rc::as_ptr(e) as usize)
    }

    pub fn param(p: &ParamRef) -> Self {
        NodeKey(Rc::as_ptr(p) as usize)
    }

    pub fn label(l: &LabelRef) -> Self {
        NodeKey(Rc::as_ptr(l) as usize)
    }

    pub fn catch(c: &CatchRef) -> Self {
        NodeKey(Rc::as_ptr(c) as usize)
    }
}
