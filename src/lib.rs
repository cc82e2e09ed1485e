// src/lib.rs
//
// alder: an expression-tree compiler. Callers hand us an immutable, typed
// expression tree rooted at a lambda; we hand back an invokable delegate.
//
// The pipeline, leaves first:
//   1. stack spiller    - rewrites the tree so constructs that must start on
//                         an empty operand stack (try, loop, goto, throw)
//                         never see pending values; pending results are
//                         materialized into pooled temporaries.
//   2. variable binder  - classifies every variable as frame-local or
//                         hoisted into a shared heap cell, and records which
//                         scopes need access to an enclosing closure frame.
//   3. lambda compiler  - walks the rewritten tree once per lambda and emits
//                         a linear instruction stream through the
//                         instruction sink, using the scope/label/constant
//                         structures built by the earlier passes.
//
// The single in-repo emission backend is the `runtime` module's method
// writer plus interpreter; the sink itself is an abstraction the compiler
// never misuses (stack balance and region nesting are our responsibility,
// not the sink's).

pub mod compiler;
pub mod errors;
pub mod runtime;
pub mod tree;

pub use compiler::{compile, compile_into, compile_with_env, MethodId, MethodTable};
pub use errors::{CompileError, CompileErrorKind};
pub use runtime::{CompiledDelegate, Env, RuntimeError, Value};
pub use tree::{Expr, ExprKind, ExprRef, ParamRef, Signature, Ty};
