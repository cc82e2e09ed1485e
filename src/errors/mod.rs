// src/errors/mod.rs
//! Compilation errors.
//!
//! Two classes, deliberately kept apart:
//!
//! - Contract violations: the caller's tree breaks a documented
//!   precondition (ambiguous label, jump into a try, closing over a by-ref
//!   variable, ...). These carry the offending name and, where available,
//!   the enclosing lambda's name. The caller fixes the tree and recompiles;
//!   nothing is retried.
//! - Internal errors: states the binder/spiller/validator should have made
//!   impossible before codegen. These are compiler bugs. Debug builds also
//!   `debug_assert!` at the detection site so they crash loudly there.

use miette::Diagnostic;
use thiserror::Error;

use crate::tree::Ty;

/// The kind of compilation failure.
#[derive(Debug, Clone)]
pub enum CompileErrorKind {
    /// A label is defined in more than one scope visible from a jump.
    AmbiguousJump { label: String },
    /// A label was jumped to but never defined in the compiled lambda.
    LabelUndefined { label: String },
    /// A label target was marked twice.
    LabelAlreadyDefined { label: String },
    /// The jump would enter a try block partway through.
    CannotJumpIntoTry { label: String },
    /// The jump would enter an expression that is not a jump boundary.
    CannotJumpIntoExpression { label: String },
    /// Control cannot leave a finally block.
    CannotLeaveFinally { label: String },
    /// Control cannot leave a catch filter.
    CannotLeaveFilter { label: String },
    /// A value-carrying jump crosses a block boundary.
    NonLocalJumpWithValue { label: String },
    /// A nested lambda closes over a by-reference variable.
    CannotCloseOverByRef { variable: String, lambda: String },
    /// A rethrow appears outside any catch handler.
    RethrowOutsideCatch,
    /// A live runtime constant in a compilation target that only permits
    /// literal-emittable constants.
    CannotEmitConstant { ty: Ty },
    /// Construction of an abstract class.
    AbstractConstructor { class: String },
    /// Assignment to a readonly field outside construction.
    ReadonlyField { field: String },

    /// Internal invariant violation: a compiler bug, not a tree problem.
    Internal { message: &'static str, context: Option<String> },
}

impl std::fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use CompileErrorKind::*;
        match self {
            AmbiguousJump { label } => {
                write!(f, "cannot jump to ambiguously defined label '{label}'")
            }
            LabelUndefined { label } => {
                write!(f, "label '{label}' was referenced but never defined")
            }
            LabelAlreadyDefined { label } => {
                write!(f, "label '{label}' is already defined in this scope")
            }
            CannotJumpIntoTry { label } => {
                write!(f, "jump to '{label}' would enter a try block")
            }
            CannotJumpIntoExpression { label } => {
                write!(f, "jump to '{label}' would enter an expression")
            }
            CannotLeaveFinally { label } => {
                write!(f, "jump to '{label}' cannot leave a finally block")
            }
            CannotLeaveFilter { label } => {
                write!(f, "jump to '{label}' cannot leave an exception filter")
            }
            NonLocalJumpWithValue { label } => {
                write!(f, "jump to '{label}' carries a value across a block boundary")
            }
            CannotCloseOverByRef { variable, lambda } => {
                write!(
                    f,
                    "cannot close over by-ref variable '{variable}' in lambda '{lambda}'"
                )
            }
            RethrowOutsideCatch => write!(f, "rethrow is only valid inside a catch handler"),
            CannotEmitConstant { ty } => {
                write!(
                    f,
                    "cannot compile a runtime constant of type {ty} in this target; \
                     only literal-emittable constants are supported"
                )
            }
            AbstractConstructor { class } => {
                write!(f, "cannot construct abstract class '{class}'")
            }
            ReadonlyField { field } => {
                write!(f, "cannot assign readonly field '{field}'")
            }
            Internal { message, context } => match context {
                Some(ctx) => write!(f, "internal compiler error: {message} ({ctx})"),
                None => write!(f, "internal compiler error: {message}"),
            },
        }
    }
}

/// A compilation failure, with the enclosing lambda's name when one was in
/// scope at the point of failure.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("{kind}{}", lambda.as_ref().map(|l| format!(" (in lambda '{l}')")).unwrap_or_default())]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub lambda: Option<String>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind) -> Self {
        CompileError { kind, lambda: None }
    }

    pub fn in_lambda(kind: CompileErrorKind, lambda: impl Into<String>) -> Self {
        CompileError {
            kind,
            lambda: Some(lambda.into()),
        }
    }

    /// Internal-consistency failure. Debug builds assert at the call site;
    /// release builds surface a structured error rather than corrupt output.
    #[track_caller]
    pub fn internal(message: &'static str) -> Self {
        debug_assert!(false, "internal compiler error: {message}");
        Self::new(CompileErrorKind::Internal {
            message,
            context: None,
        })
    }

    #[track_caller]
    pub fn internal_with(message: &'static str, context: impl Into<String>) -> Self {
        let context = context.into();
        debug_assert!(false, "internal compiler error: {message} ({context})");
        Self::new(CompileErrorKind::Internal {
            message,
            context: Some(context),
        })
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.kind, CompileErrorKind::Internal { .. })
    }
}

impl From<CompileErrorKind> for CompileError {
    fn from(kind: CompileErrorKind) -> Self {
        CompileError::new(kind)
    }
}
