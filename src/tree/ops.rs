// src/tree/ops.rs

/// Binary operator kinds. Checked variants trap on overflow instead of
/// wrapping; `AndAlso`/`OrElse`/`Coalesce` are short-circuiting and never
/// evaluate the right operand when the left alone decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    AddChecked,
    Sub,
    SubChecked,
    Mul,
    MulChecked,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    AndAlso,
    OrElse,
    Coalesce,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_checked(self) -> bool {
        matches!(
            self,
            BinaryOp::AddChecked | BinaryOp::SubChecked | BinaryOp::MulChecked
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse | BinaryOp::Coalesce)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation; the checked variant traps on `MIN` negation.
    Negate,
    NegateChecked,
    /// Logical not on bool, bitwise not on integral types.
    Not,
    ArrayLength,
}

/// What a `Goto` node means. All four kinds share the same machinery; the
/// kind only affects factory typing conventions and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GotoKind {
    Goto,
    Return,
    Break,
    Continue,
}
