// src/tree/types.rs
//
// Static types carried by expression nodes, plus interned signatures for
// delegate-shaped types. Type equality is structural; signatures handed out
// by the signature cache are additionally pointer-shared, so identical
// shapes compare cheaply.

use std::fmt;
use std::rc::Rc;

use crate::runtime::TypeDefId;

/// The static type of an expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    /// No value; only legal as a statement/body type or return type.
    Void,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Str,
    /// Any reference value (the "object" top type for reference shapes).
    Object,
    Array(Rc<Ty>),
    /// A value type that additionally admits null. The inner type must not
    /// itself be nullable or a reference type.
    Nullable(Rc<Ty>),
    /// A delegate/function-shaped type; signatures are interned by the
    /// signature cache so equal shapes share one allocation.
    Delegate(Signature),
    /// A by-reference slot. Only legal for parameters and spill temporaries
    /// feeding by-ref call arguments; by-ref variables can never be hoisted.
    Ref(Rc<Ty>),
    /// An instance of a registered class.
    Class(TypeDefId),
}

impl Ty {
    pub fn nullable(inner: Ty) -> Ty {
        debug_assert!(inner.is_value_type() && !matches!(inner, Ty::Nullable(_)));
        Ty::Nullable(Rc::new(inner))
    }

    pub fn array(elem: Ty) -> Ty {
        Ty::Array(Rc::new(elem))
    }

    pub fn by_ref(inner: Ty) -> Ty {
        Ty::Ref(Rc::new(inner))
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Ty::Nullable(_))
    }

    /// Strips one level of `Nullable`, if present.
    pub fn non_nullable(&self) -> &Ty {
        match self {
            Ty::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Ty::Str | Ty::Object | Ty::Array(_) | Ty::Delegate(_) | Ty::Class(_)
        )
    }

    pub fn is_value_type(&self) -> bool {
        !self.is_reference() && !matches!(self, Ty::Void | Ty::Ref(_))
    }

    /// Whether values of this type can be null at runtime.
    pub fn admits_null(&self) -> bool {
        self.is_nullable() || self.is_reference()
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Void)
    }

    pub fn is_by_ref(&self) -> bool {
        matches!(self, Ty::Ref(_))
    }

    pub fn num_ty(&self) -> Option<NumTy> {
        Some(match self {
            Ty::I8 => NumTy::I8,
            Ty::U8 => NumTy::U8,
            Ty::I16 => NumTy::I16,
            Ty::U16 => NumTy::U16,
            Ty::I32 => NumTy::I32,
            Ty::U32 => NumTy::U32,
            Ty::I64 => NumTy::I64,
            Ty::U64 => NumTy::U64,
            Ty::F32 => NumTy::F32,
            Ty::F64 => NumTy::F64,
            _ => return None,
        })
    }

    pub fn is_numeric(&self) -> bool {
        self.num_ty().is_some()
    }

    pub fn is_integral(&self) -> bool {
        self.num_ty().is_some_and(|n| n.is_integral())
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Bool => write!(f, "bool"),
            Ty::I8 => write!(f, "i8"),
            Ty::U8 => write!(f, "u8"),
            Ty::I16 => write!(f, "i16"),
            Ty::U16 => write!(f, "u16"),
            Ty::I32 => write!(f, "i32"),
            Ty::U32 => write!(f, "u32"),
            Ty::I64 => write!(f, "i64"),
            Ty::U64 => write!(f, "u64"),
            Ty::F32 => write!(f, "f32"),
            Ty::F64 => write!(f, "f64"),
            Ty::Str => write!(f, "str"),
            Ty::Object => write!(f, "object"),
            Ty::Array(e) => write!(f, "[{e}]"),
            Ty::Nullable(i) => write!(f, "{i}?"),
            Ty::Delegate(sig) => write!(f, "{sig}"),
            Ty::Ref(i) => write!(f, "ref {i}"),
            Ty::Class(id) => write!(f, "class#{}", id.0),
        }
    }
}

/// Numeric kind used by arithmetic, comparison, and conversion instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumTy {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl NumTy {
    pub fn is_integral(self) -> bool {
        !matches!(self, NumTy::F32 | NumTy::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            NumTy::I8 | NumTy::I16 | NumTy::I32 | NumTy::I64 | NumTy::F32 | NumTy::F64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, NumTy::U8 | NumTy::U16 | NumTy::U32 | NumTy::U64)
    }

    pub fn bits(self) -> u32 {
        match self {
            NumTy::I8 | NumTy::U8 => 8,
            NumTy::I16 | NumTy::U16 => 16,
            NumTy::I32 | NumTy::U32 | NumTy::F32 => 32,
            NumTy::I64 | NumTy::U64 | NumTy::F64 => 64,
        }
    }

    pub fn ty(self) -> Ty {
        match self {
            NumTy::I8 => Ty::I8,
            NumTy::U8 => Ty::U8,
            NumTy::I16 => Ty::I16,
            NumTy::U16 => Ty::U16,
            NumTy::I32 => Ty::I32,
            NumTy::U32 => Ty::U32,
            NumTy::I64 => Ty::I64,
            NumTy::U64 => Ty::U64,
            NumTy::F32 => Ty::F32,
            NumTy::F64 => Ty::F64,
        }
    }
}

/// Parameter and return shape of a delegate. Interned by the signature
/// cache; construct through `compiler::delegates::signature`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SignatureData {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

pub type Signature = Rc<SignatureData>;

impl fmt::Display for SignatureData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}
