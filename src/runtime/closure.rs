// src/runtime/closure.rs
//
// Compiled methods and the closure carrier. A delegate packages a method
// with its construction-time context: the method's bound-constants array
// and (optionally) the hoisted-locals array of the constructing frame.

use std::rc::Rc;

use crate::tree::Signature;

use super::interp::{self, RuntimeError};
use super::instr::MethodBody;
use super::value::Value;
use super::Env;

/// One compiled lambda body. Immutable once built; shared by every
/// delegate constructed over it.
#[derive(Debug)]
pub struct CompiledMethod {
    pub name: Rc<str>,
    pub sig: Signature,
    pub body: MethodBody,
    /// Runtime constants that could not be emitted as immediates, in
    /// first-reference order. Bound to the method at compile time.
    pub constants: Rc<[Value]>,
}

/// A method plus its captured context: invokable.
pub struct Closure {
    pub method: Rc<CompiledMethod>,
    /// The constructing frame's hoisted-locals array, when the method (or
    /// a lambda nested in it) reads an outer variable. `Value::Array`
    /// whose elements are `Value::Cell`.
    pub frame: Option<Value>,
    pub env: Rc<Env>,
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closure")
            .field("method", &self.method.name)
            .field("captured_frame", &self.frame.is_some())
            .finish()
    }
}

impl Closure {
    pub fn invoke(self: &Rc<Self>, args: Vec<Value>) -> Result<Value, RuntimeError> {
        interp::invoke(self, args)
    }
}

/// The public invokable produced by `compile`.
#[derive(Debug, Clone)]
pub struct CompiledDelegate {
    closure: Rc<Closure>,
}

impl CompiledDelegate {
    pub fn new(method: Rc<CompiledMethod>, env: Rc<Env>) -> CompiledDelegate {
        CompiledDelegate {
            closure: Rc::new(Closure {
                method,
                frame: None,
                env,
            }),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.closure.method.sig
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        self.closure.invoke(args.to_vec())
    }

    pub fn as_value(&self) -> Value {
        Value::Delegate(self.closure.clone())
    }
}
