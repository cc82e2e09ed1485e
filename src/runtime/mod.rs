// src/runtime/mod.rs
//
// The runtime half of the crate: the value model, the class/native
// registries the tree references by id, the instruction set with its
// abstract sink, the method writer (the single in-repo sink backend), and
// the interpreter that makes compiled methods invokable.

mod closure;
mod instr;
mod interp;
mod native;
mod object;
mod value;
mod writer;

pub use closure::{Closure, CompiledDelegate, CompiledMethod};
pub use instr::{
    ArithOp, CatchHandler, CmpOp, HandlerRange, Instr, LabelId, LocalId, MethodBody, Overflow,
    StringSwitchTable, TryRegion,
};
pub use interp::RuntimeError;
pub use native::{NativeDef, NativeFn, NativeFnId, NativeRegistry};
pub use object::{FieldDef, FieldId, ObjectData, TypeDef, TypeDefId, TypeRegistry};
pub use value::Value;
pub use writer::{InstrSink, MethodWriter};

use std::rc::Rc;

/// Compilation/execution environment: the registries that `Call`, `New`,
/// and `Field` nodes reference by id, plus the built-in error classes the
/// interpreter throws for traps (overflow, division by zero, null value,
/// invalid cast, index out of range).
pub struct Env {
    pub types: TypeRegistry,
    pub natives: NativeRegistry,
    pub builtins: Builtins,
}

/// Well-known error classes, registered up front in every environment.
/// Each carries a single readonly `message` field.
#[derive(Debug, Clone, Copy)]
pub struct Builtins {
    pub overflow: TypeDefId,
    pub divide_by_zero: TypeDefId,
    pub null_value: TypeDefId,
    pub invalid_cast: TypeDefId,
    pub index_range: TypeDefId,
}

impl Env {
    pub fn new() -> Env {
        let mut types = TypeRegistry::new();
        let mut error_class = |name: &str| {
            types.define(TypeDef::new(name).with_field(FieldDef::readonly("message", crate::tree::Ty::Str)))
        };
        let builtins = Builtins {
            overflow: error_class("OverflowError"),
            divide_by_zero: error_class("DivideByZeroError"),
            null_value: error_class("NullValueError"),
            invalid_cast: error_class("InvalidCastError"),
            index_range: error_class("IndexRangeError"),
        };
        Env {
            types,
            natives: NativeRegistry::new(),
            builtins,
        }
    }

    pub fn into_rc(self) -> Rc<Env> {
        Rc::new(self)
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new()
    }
}
