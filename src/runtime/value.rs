// src/runtime/value.rs

use std::cell::RefCell;
use std::rc::Rc;

use crate::tree::Ty;

use super::closure::Closure;
use super::object::ObjectData;

/// A runtime value. Nullable types are represented as either `Null` or the
/// underlying value; there is no separate wrapper, so "has value" checks
/// compile to a null test.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Obj(Rc<ObjectData>),
    /// A heap cell: the storage for one hoisted variable, shared between
    /// the defining frame and every closure over it.
    Cell(Rc<RefCell<Value>>),
    Delegate(Rc<Closure>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The default value of a static type: zero, false, or null.
    pub fn default_of(ty: &Ty) -> Value {
        match ty {
            Ty::Bool => Value::Bool(false),
            Ty::I8 => Value::I8(0),
            Ty::U8 => Value::U8(0),
            Ty::I16 => Value::I16(0),
            Ty::U16 => Value::U16(0),
            Ty::I32 => Value::I32(0),
            Ty::U32 => Value::U32(0),
            Ty::I64 => Value::I64(0),
            Ty::U64 => Value::U64(0),
            Ty::F32 => Value::F32(0.0),
            Ty::F64 => Value::F64(0.0),
            _ => Value::Null,
        }
    }

    /// Stable identity for reference-shaped values, used for
    /// identity-keyed de-duplication (bound constants). Primitives have no
    /// identity and return `None`.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(Rc::as_ptr(s) as *const u8 as usize),
            Value::Array(a) => Some(Rc::as_ptr(a) as usize),
            Value::Obj(o) => Some(Rc::as_ptr(o) as usize),
            Value::Cell(c) => Some(Rc::as_ptr(c) as usize),
            Value::Delegate(d) => Some(Rc::as_ptr(d) as usize),
            _ => None,
        }
    }

    /// Whether this value can be emitted as an immediate in the
    /// instruction stream. Everything else goes through bound constants.
    pub fn is_literal_emittable(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Bool(_)
                | Value::I8(_)
                | Value::U8(_)
                | Value::I16(_)
                | Value::U16(_)
                | Value::I32(_)
                | Value::U32(_)
                | Value::I64(_)
                | Value::U64(_)
                | Value::F32(_)
                | Value::F64(_)
                | Value::Str(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Widens any integral value to i64 (unsigned values zero-extend).
    pub fn as_int_wide(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v as i64),
            Value::U8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            Value::U64(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Value equality: content equality for primitives and strings,
    /// reference identity for objects, arrays, cells, and delegates.
    pub fn value_eq(a: &Value, b: &Value) -> bool {
        use Value::*;
        match (a, b) {
            (Null, Null) => true,
            (Bool(x), Bool(y)) => x == y,
            (I8(x), I8(y)) => x == y,
            (U8(x), U8(y)) => x == y,
            (I16(x), I16(y)) => x == y,
            (U16(x), U16(y)) => x == y,
            (I32(x), I32(y)) => x == y,
            (U32(x), U32(y)) => x == y,
            (I64(x), I64(y)) => x == y,
            (U64(x), U64(y)) => x == y,
            (F32(x), F32(y)) => x == y,
            (F64(x), F64(y)) => x == y,
            (Str(x), Str(y)) => x == y,
            (Array(x), Array(y)) => Rc::ptr_eq(x, y),
            (Obj(x), Obj(y)) => Rc::ptr_eq(x, y),
            (Cell(x), Cell(y)) => Rc::ptr_eq(x, y),
            (Delegate(x), Delegate(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }
}
