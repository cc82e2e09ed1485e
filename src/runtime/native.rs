// src/runtime/native.rs
//
// Host functions callable from compiled code. `Call` nodes reference these
// by id; by-ref parameters receive a `Value::Cell` the function may write
// through, and the call site copies the result back into the original
// location.

use std::rc::Rc;

use crate::tree::Signature;

use super::interp::RuntimeError;
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeFnId(pub u32);

pub type NativeFn = fn(&mut [Value]) -> Result<Value, RuntimeError>;

pub struct NativeDef {
    pub name: Rc<str>,
    pub sig: Signature,
    pub func: NativeFn,
}

#[derive(Default)]
pub struct NativeRegistry {
    fns: Vec<NativeDef>,
}

impl NativeRegistry {
    pub fn new() -> NativeRegistry {
        NativeRegistry::default()
    }

    pub fn register(&mut self, name: &str, sig: Signature, func: NativeFn) -> NativeFnId {
        let id = NativeFnId(self.fns.len() as u32);
        self.fns.push(NativeDef {
            name: Rc::from(name),
            sig,
            func,
        });
        id
    }

    pub fn get(&self, id: NativeFnId) -> &NativeDef {
        &self.fns[id.0 as usize]
    }
}
