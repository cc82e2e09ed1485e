// src/runtime/instr.rs
//
// The linear instruction stream produced through the instruction sink.
// Opcode-level contract only: the compiler guarantees stack balance and
// protected-region nesting, the backend checks nothing.

use std::rc::Rc;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use crate::tree::{NumTy, Ty};

use super::closure::CompiledMethod;
use super::object::{FieldId, TypeDefId};
use super::native::NativeFnId;
use super::value::Value;

/// Index into a method's label table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

/// Index into a method's local slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Overflow behavior of a numeric conversion. The code generator selects
/// between the two checked forms from the *source* type's signedness; the
/// distinction is part of the opcode surface even though a typed-value
/// backend could infer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Overflow {
    /// Wrapping / truncating.
    None,
    /// Trap on overflow; source is signed (or floating).
    Checked,
    /// Trap on overflow; source is unsigned.
    CheckedUnsigned,
}

#[derive(Debug)]
pub enum Instr {
    /// Push a literal-emittable constant.
    Push(Value),
    Pop,
    Dup,
    LoadArg(u16),
    StoreArg(u16),
    LoadLocal(LocalId),
    StoreLocal(LocalId),
    /// Push one slot of the method's bound-constants array.
    LoadConstant(u16),
    /// Push the hoisted-locals array the closure was constructed with.
    LoadFrame,
    /// Pops a value, pushes a fresh cell holding it.
    NewCell,
    /// Pops a cell, pushes its contents.
    LoadCell,
    /// Pops `[cell, value]`, stores the value through the cell.
    StoreCell,
    /// Pops an i32 length, pushes a null-initialized array.
    NewArray,
    /// Pops `[array, index]`, pushes the element.
    LoadElem,
    /// Pops `[array, index, value]`.
    StoreElem,
    /// Pops an array, pushes its length as i32.
    ArrayLen,
    /// Pops `argc` field initializers (leftmost deepest); remaining fields
    /// default.
    NewObj { type_def: TypeDefId, argc: u16 },
    LoadField(FieldId),
    /// Pops `[object, value]`.
    StoreField(FieldId),
    LoadStatic(FieldId),
    StoreStatic(FieldId),
    Arith { op: ArithOp, ty: NumTy, checked: bool },
    /// Non-short-circuit boolean And/Or/Xor.
    BoolOp(ArithOp),
    Neg { ty: NumTy, checked: bool },
    BitNot { ty: NumTy },
    NotBool,
    Compare { op: CmpOp, ty: NumTy },
    /// Pops two values; content equality for primitives/strings, reference
    /// identity for heap values.
    ValueEq,
    /// Pops a value, pushes whether it was null.
    IsNull,
    /// Traps with a null-value error if the top of stack is null; the
    /// value stays put.
    NullGuard,
    Conv { to: NumTy, overflow: Overflow },
    /// Pops a value, pushes whether its runtime type matches.
    IsInstance(Ty),
    /// Checked downcast; traps with an invalid-cast error on mismatch.
    CastClass(Ty),
    Branch(LabelId),
    BranchTrue(LabelId),
    BranchFalse(LabelId),
    /// Pops an i32; jumps to `targets[i]` when in range, falls through
    /// otherwise.
    TableSwitch { targets: Vec<LabelId> },
    /// Pops a string, pushes its case index or -1. The lookup table is
    /// built on first execution.
    StringSwitch(Rc<StringSwitchTable>),
    /// Branch that exits protected regions: clears the operand stack and
    /// runs the finally handlers of every region left behind.
    Leave(LabelId),
    Ret,
    CallNative { func: NativeFnId, argc: u16 },
    /// Pops `argc` args above the delegate being invoked.
    Invoke { argc: u16 },
    /// Pushes a delegate over `method`; when `capture_frame` is set, pops
    /// the hoisted-locals array to store in the closure.
    MakeDelegate {
        method: Rc<CompiledMethod>,
        capture_frame: bool,
    },
    Throw,
    Rethrow,
    /// Pops the filter verdict and ends the filter region.
    EndFilter,
    /// Ends a finally or fault region; resumes the suspended leave/unwind.
    EndFinally,
    /// Pops the hoisted-locals array; pushes an array of the cells reached
    /// by each (parent-hops, index) pair.
    NewRuntimeVars(Rc<[(u32, u32)]>),
}

/// Lazily built string-to-case-index table for hashtable switch lowering.
/// Built once on first execution; concurrent first uses race benignly.
#[derive(Debug)]
pub struct StringSwitchTable {
    pub cases: Vec<Rc<str>>,
    map: OnceLock<FxHashMap<Rc<str>, i32>>,
}

impl StringSwitchTable {
    pub fn new(cases: Vec<Rc<str>>) -> StringSwitchTable {
        StringSwitchTable {
            cases,
            map: OnceLock::new(),
        }
    }

    pub fn lookup(&self, s: &str) -> i32 {
        let map = self.map.get_or_init(|| {
            let mut m = FxHashMap::default();
            for (i, case) in self.cases.iter().enumerate() {
                m.entry(case.clone()).or_insert(i as i32);
            }
            m
        });
        map.get(s).copied().unwrap_or(-1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRange {
    pub start: u32,
    pub end: u32,
}

impl HandlerRange {
    pub fn contains(&self, pc: u32) -> bool {
        self.start <= pc && pc < self.end
    }
}

#[derive(Debug)]
pub struct CatchHandler {
    /// Runtime type test applied to the in-flight exception before the
    /// handler (or its filter) is considered.
    pub test_ty: Ty,
    pub filter: Option<HandlerRange>,
    pub body: HandlerRange,
}

/// One protected region. `start..end` is the try range; catches apply only
/// to exceptions raised inside it. `finalizer` is a finally range, or a
/// fault range when `fault` is set (runs only during unwind).
#[derive(Debug)]
pub struct TryRegion {
    pub start: u32,
    pub end: u32,
    pub catches: Vec<CatchHandler>,
    pub finalizer: Option<HandlerRange>,
    pub fault: bool,
}

impl TryRegion {
    pub fn try_contains(&self, pc: u32) -> bool {
        self.start <= pc && pc < self.end
    }

    /// Whether `pc` is anywhere inside this region: the try range, a
    /// filter, a handler body, or the finalizer.
    pub fn spans(&self, pc: u32) -> bool {
        if self.try_contains(pc) {
            return true;
        }
        if self.catches.iter().any(|c| {
            c.body.contains(pc) || c.filter.is_some_and(|f| f.contains(pc))
        }) {
            return true;
        }
        self.finalizer.is_some_and(|f| f.contains(pc))
    }
}

/// A finished method: instructions, resolved labels, local slot types, and
/// the protected-region table.
#[derive(Debug)]
pub struct MethodBody {
    pub code: Vec<Instr>,
    /// LabelId -> instruction offset.
    pub labels: Vec<u32>,
    pub locals: Vec<Ty>,
    pub argc: u16,
    pub regions: Vec<TryRegion>,
}

impl MethodBody {
    pub fn target(&self, label: LabelId) -> u32 {
        self.labels[label.0 as usize]
    }
}
