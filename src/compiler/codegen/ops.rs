// src/compiler/codegen/ops.rs
//
// Operator emission. Non-lifted operators map straight onto the arithmetic
// and comparison opcodes. Lifted operators carry the three-valued
// semantics in emitted control flow: operands are parked in locals, null
// tests pick the path, and only the all-present path reaches the
// underlying opcode. Null never flows into an opcode that expects a value.

use crate::errors::CompileError;
use crate::runtime::{ArithOp, CmpOp, Instr, InstrSink, Value};
use crate::tree::{BinaryExpr, BinaryOp, ConvertExpr, ExprRef, Ty, UnaryExpr, UnaryOp};

use super::LambdaCompiler;

impl<'a> LambdaCompiler<'a> {
    pub(super) fn emit_binary(&mut self, b: &BinaryExpr) -> Result<(), CompileError> {
        match b.op {
            BinaryOp::Coalesce => self.emit_coalesce(b),
            BinaryOp::AndAlso | BinaryOp::OrElse => {
                if b.lifted {
                    self.emit_lifted_logical(b)
                } else {
                    self.emit_short_circuit(b)
                }
            }
            op if op.is_comparison() => {
                if b.lifted {
                    self.emit_lifted_comparison(b)
                } else {
                    self.emit(&b.left)?;
                    self.emit(&b.right)?;
                    self.emit_compare_core(b.op, &b.left.ty)
                }
            }
            _ => {
                if b.lifted {
                    self.emit_lifted_arith(b)
                } else {
                    self.emit(&b.left)?;
                    self.emit(&b.right)?;
                    self.emit_arith_core(b.op, &b.left.ty)
                }
            }
        }
    }

    fn emit_coalesce(&mut self, b: &BinaryExpr) -> Result<(), CompileError> {
        let end = self.writer.def_label();
        self.emit(&b.left)?;
        self.writer.emit(Instr::Dup);
        self.writer.emit(Instr::IsNull);
        self.writer.emit(Instr::BranchFalse(end));
        self.writer.emit(Instr::Pop);
        self.emit(&b.right)?;
        self.writer.mark(end);
        Ok(())
    }

    fn emit_short_circuit(&mut self, b: &BinaryExpr) -> Result<(), CompileError> {
        let end = self.writer.def_label();
        self.emit(&b.left)?;
        self.writer.emit(Instr::Dup);
        match b.op {
            BinaryOp::AndAlso => self.writer.emit(Instr::BranchFalse(end)),
            _ => self.writer.emit(Instr::BranchTrue(end)),
        }
        self.writer.emit(Instr::Pop);
        self.emit(&b.right)?;
        self.writer.mark(end);
        Ok(())
    }

    /// Lifted `and`/`or` over `bool?`. The right operand is evaluated on
    /// every path where the left does not decide the result; all paths
    /// converge after a single emission of each operand.
    fn emit_lifted_logical(&mut self, b: &BinaryExpr) -> Result<(), CompileError> {
        let and = b.op == BinaryOp::AndAlso;
        let l = self.get_local(Ty::Object);
        let r = self.get_local(Ty::Object);
        let eval_right = self.writer.def_label();
        let ret_decided = self.writer.def_label();
        let ret_null = self.writer.def_label();
        let end = self.writer.def_label();

        self.emit(&b.left)?;
        self.writer.emit(Instr::StoreLocal(l));
        self.writer.emit(Instr::LoadLocal(l));
        self.writer.emit(Instr::IsNull);
        self.writer.emit(Instr::BranchTrue(eval_right));
        self.writer.emit(Instr::LoadLocal(l));
        // A decided left short-circuits: false for and, true for or.
        if and {
            self.writer.emit(Instr::BranchFalse(ret_decided));
        } else {
            self.writer.emit(Instr::BranchTrue(ret_decided));
        }

        self.writer.mark(eval_right);
        self.emit(&b.right)?;
        self.writer.emit(Instr::StoreLocal(r));
        self.writer.emit(Instr::LoadLocal(r));
        self.writer.emit(Instr::IsNull);
        self.writer.emit(Instr::BranchTrue(ret_null));
        self.writer.emit(Instr::LoadLocal(r));
        if and {
            self.writer.emit(Instr::BranchFalse(ret_decided));
        } else {
            self.writer.emit(Instr::BranchTrue(ret_decided));
        }
        // Right does not decide; the result is the left operand (which is
        // either null or the neutral element).
        self.writer.emit(Instr::LoadLocal(l));
        self.writer.emit(Instr::Branch(end));

        self.writer.mark(ret_decided);
        self.writer.emit(Instr::Push(Value::Bool(!and)));
        self.writer.emit(Instr::Branch(end));
        self.writer.mark(ret_null);
        self.writer.emit(Instr::Push(Value::Null));
        self.writer.mark(end);

        self.free_local(Ty::Object, r);
        self.free_local(Ty::Object, l);
        Ok(())
    }

    fn emit_lifted_arith(&mut self, b: &BinaryExpr) -> Result<(), CompileError> {
        let test_left = b.left.ty.admits_null();
        let test_right = b.right.ty.admits_null();
        if !test_left && !test_right {
            self.emit(&b.left)?;
            self.emit(&b.right)?;
            return self.emit_arith_core(b.op, b.left.ty.non_nullable());
        }
        let l = self.get_local(Ty::Object);
        let r = self.get_local(Ty::Object);
        let ret_null = self.writer.def_label();
        let end = self.writer.def_label();

        self.emit(&b.left)?;
        self.writer.emit(Instr::StoreLocal(l));
        self.emit(&b.right)?;
        self.writer.emit(Instr::StoreLocal(r));
        if test_left {
            self.writer.emit(Instr::LoadLocal(l));
            self.writer.emit(Instr::IsNull);
            self.writer.emit(Instr::BranchTrue(ret_null));
        }
        if test_right {
            self.writer.emit(Instr::LoadLocal(r));
            self.writer.emit(Instr::IsNull);
            self.writer.emit(Instr::BranchTrue(ret_null));
        }
        self.writer.emit(Instr::LoadLocal(l));
        self.writer.emit(Instr::LoadLocal(r));
        self.emit_arith_core(b.op, b.left.ty.non_nullable())?;
        self.writer.emit(Instr::Branch(end));
        self.writer.mark(ret_null);
        self.writer.emit(Instr::Push(Value::Null));
        self.writer.mark(end);

        self.free_local(Ty::Object, r);
        self.free_local(Ty::Object, l);
        Ok(())
    }

    /// Lifted comparisons. With `lifted_to_null` the result is `bool?` and
    /// any null operand yields null. Without it the result stays `bool`:
    /// two nulls are equal, a null never equals a value, and relational
    /// operators are false whenever an operand is null.
    fn emit_lifted_comparison(&mut self, b: &BinaryExpr) -> Result<(), CompileError> {
        let core_ty = b.left.ty.non_nullable().clone();
        let l = self.get_local(Ty::Object);
        let r = self.get_local(Ty::Object);
        let end = self.writer.def_label();

        self.emit(&b.left)?;
        self.writer.emit(Instr::StoreLocal(l));
        self.emit(&b.right)?;
        self.writer.emit(Instr::StoreLocal(r));

        if b.lifted_to_null {
            let ret_null = self.writer.def_label();
            self.writer.emit(Instr::LoadLocal(l));
            self.writer.emit(Instr::IsNull);
            self.writer.emit(Instr::BranchTrue(ret_null));
            self.writer.emit(Instr::LoadLocal(r));
            self.writer.emit(Instr::IsNull);
            self.writer.emit(Instr::BranchTrue(ret_null));
            self.writer.emit(Instr::LoadLocal(l));
            self.writer.emit(Instr::LoadLocal(r));
            self.emit_compare_core(b.op, &core_ty)?;
            self.writer.emit(Instr::Branch(end));
            self.writer.mark(ret_null);
            self.writer.emit(Instr::Push(Value::Null));
        } else {
            match b.op {
                BinaryOp::Eq | BinaryOp::Ne => {
                    let left_null = self.writer.def_label();
                    let decided = self.writer.def_label();
                    self.writer.emit(Instr::LoadLocal(l));
                    self.writer.emit(Instr::IsNull);
                    self.writer.emit(Instr::BranchTrue(left_null));
                    self.writer.emit(Instr::LoadLocal(r));
                    self.writer.emit(Instr::IsNull);
                    self.writer.emit(Instr::BranchTrue(decided));
                    self.writer.emit(Instr::LoadLocal(l));
                    self.writer.emit(Instr::LoadLocal(r));
                    self.emit_compare_core(b.op, &core_ty)?;
                    self.writer.emit(Instr::Branch(end));
                    // Left null: the answer is whether right is null too.
                    self.writer.mark(left_null);
                    self.writer.emit(Instr::LoadLocal(r));
                    self.writer.emit(Instr::IsNull);
                    if b.op == BinaryOp::Ne {
                        self.writer.emit(Instr::NotBool);
                    }
                    self.writer.emit(Instr::Branch(end));
                    // Left present, right null.
                    self.writer.mark(decided);
                    self.writer
                        .emit(Instr::Push(Value::Bool(b.op == BinaryOp::Ne)));
                }
                _ => {
                    let ret_false = self.writer.def_label();
                    self.writer.emit(Instr::LoadLocal(l));
                    self.writer.emit(Instr::IsNull);
                    self.writer.emit(Instr::BranchTrue(ret_false));
                    self.writer.emit(Instr::LoadLocal(r));
                    self.writer.emit(Instr::IsNull);
                    self.writer.emit(Instr::BranchTrue(ret_false));
                    self.writer.emit(Instr::LoadLocal(l));
                    self.writer.emit(Instr::LoadLocal(r));
                    self.emit_compare_core(b.op, &core_ty)?;
                    self.writer.emit(Instr::Branch(end));
                    self.writer.mark(ret_false);
                    self.writer.emit(Instr::Push(Value::Bool(false)));
                }
            }
        }
        self.writer.mark(end);
        self.free_local(Ty::Object, r);
        self.free_local(Ty::Object, l);
        Ok(())
    }

    /// Comparison over two already-pushed operands of `operand_ty`.
    pub(super) fn emit_compare_core(
        &mut self,
        op: BinaryOp,
        operand_ty: &Ty,
    ) -> Result<(), CompileError> {
        match operand_ty.num_ty() {
            Some(ty) => {
                self.writer.emit(Instr::Compare {
                    op: cmp_of(op)?,
                    ty,
                });
            }
            None if op == BinaryOp::Eq => self.writer.emit(Instr::ValueEq),
            None if op == BinaryOp::Ne => {
                self.writer.emit(Instr::ValueEq);
                self.writer.emit(Instr::NotBool);
            }
            None => {
                return Err(CompileError::internal_with(
                    "relational comparison on non-numeric operands",
                    format!("{operand_ty:?}"),
                ));
            }
        }
        Ok(())
    }

    /// Arithmetic or bitwise over two already-pushed operands.
    fn emit_arith_core(&mut self, op: BinaryOp, operand_ty: &Ty) -> Result<(), CompileError> {
        if *operand_ty == Ty::Bool {
            let op = match op {
                BinaryOp::And => ArithOp::And,
                BinaryOp::Or => ArithOp::Or,
                BinaryOp::Xor => ArithOp::Xor,
                _ => {
                    return Err(CompileError::internal("arithmetic operator on bool operands"));
                }
            };
            self.writer.emit(Instr::BoolOp(op));
            return Ok(());
        }
        let ty = operand_ty.num_ty().ok_or_else(|| {
            CompileError::internal_with(
                "arithmetic on non-numeric operands",
                format!("{operand_ty:?}"),
            )
        })?;
        self.writer.emit(Instr::Arith {
            op: arith_of(op)?,
            ty,
            checked: op.is_checked(),
        });
        Ok(())
    }

    pub(super) fn emit_unary(&mut self, u: &UnaryExpr) -> Result<(), CompileError> {
        self.emit(&u.operand)?;
        if u.op == UnaryOp::ArrayLength {
            self.writer.emit(Instr::ArrayLen);
            return Ok(());
        }
        if u.lifted {
            // Null propagates; the operand is already the result then.
            let end = self.writer.def_label();
            self.writer.emit(Instr::Dup);
            self.writer.emit(Instr::IsNull);
            self.writer.emit(Instr::BranchTrue(end));
            self.emit_unary_core(u.op, u.operand.ty.non_nullable())?;
            self.writer.mark(end);
            Ok(())
        } else {
            self.emit_unary_core(u.op, &u.operand.ty)
        }
    }

    fn emit_unary_core(&mut self, op: UnaryOp, operand_ty: &Ty) -> Result<(), CompileError> {
        match op {
            UnaryOp::Negate | UnaryOp::NegateChecked => {
                let ty = operand_ty.num_ty().ok_or_else(|| {
                    CompileError::internal("negation of a non-numeric operand")
                })?;
                self.writer.emit(Instr::Neg {
                    ty,
                    checked: op == UnaryOp::NegateChecked,
                });
            }
            UnaryOp::Not => {
                if *operand_ty == Ty::Bool {
                    self.writer.emit(Instr::NotBool);
                } else {
                    let ty = operand_ty.num_ty().ok_or_else(|| {
                        CompileError::internal("bitwise not of a non-integral operand")
                    })?;
                    self.writer.emit(Instr::BitNot { ty });
                }
            }
            UnaryOp::ArrayLength => {
                return Err(CompileError::internal("array length handled before the core"));
            }
        }
        Ok(())
    }

    pub(super) fn emit_convert(
        &mut self,
        node: &ExprRef,
        c: &ConvertExpr,
    ) -> Result<(), CompileError> {
        if node.ty.is_void() {
            return self.emit_as_void(&c.operand);
        }
        self.emit(&c.operand)?;
        self.emit_convert_ops(&c.operand.ty, &node.ty, c.checked)
    }

    fn emit_convert_ops(&mut self, from: &Ty, to: &Ty, checked: bool) -> Result<(), CompileError> {
        if from == to || *to == Ty::Object {
            return Ok(());
        }
        match (from, to) {
            (Ty::Nullable(a), Ty::Nullable(b)) => {
                // Null converts to null; only a present value goes through
                // the inner conversion.
                let end = self.writer.def_label();
                self.writer.emit(Instr::Dup);
                self.writer.emit(Instr::IsNull);
                self.writer.emit(Instr::BranchTrue(end));
                self.emit_convert_ops(a, b, checked)?;
                self.writer.mark(end);
                Ok(())
            }
            (Ty::Nullable(a), b) => {
                self.writer.emit(Instr::NullGuard);
                self.emit_convert_ops(a, b, checked)
            }
            (a, Ty::Nullable(b)) => self.emit_convert_ops(a, b, checked),
            (Ty::Object, t) => {
                self.writer.emit(Instr::CastClass(t.clone()));
                Ok(())
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let src = a.num_ty().ok_or_else(|| {
                    CompileError::internal("numeric type without a numeric kind")
                })?;
                let dst = b.num_ty().ok_or_else(|| {
                    CompileError::internal("numeric type without a numeric kind")
                })?;
                let overflow = if !checked {
                    crate::runtime::Overflow::None
                } else if src.is_unsigned() {
                    crate::runtime::Overflow::CheckedUnsigned
                } else {
                    crate::runtime::Overflow::Checked
                };
                self.writer.emit(Instr::Conv { to: dst, overflow });
                Ok(())
            }
            (a, b) if a.is_reference() && b.is_reference() => {
                self.writer.emit(Instr::CastClass(b.clone()));
                Ok(())
            }
            _ => Err(CompileError::internal_with(
                "unsupported conversion",
                format!("{from:?} -> {to:?}"),
            )),
        }
    }
}

fn cmp_of(op: BinaryOp) -> Result<CmpOp, CompileError> {
    Ok(match op {
        BinaryOp::Eq => CmpOp::Eq,
        BinaryOp::Ne => CmpOp::Ne,
        BinaryOp::Lt => CmpOp::Lt,
        BinaryOp::Le => CmpOp::Le,
        BinaryOp::Gt => CmpOp::Gt,
        BinaryOp::Ge => CmpOp::Ge,
        _ => return Err(CompileError::internal("comparison opcode for a non-comparison")),
    })
}

fn arith_of(op: BinaryOp) -> Result<ArithOp, CompileError> {
    Ok(match op {
        BinaryOp::Add | BinaryOp::AddChecked => ArithOp::Add,
        BinaryOp::Sub | BinaryOp::SubChecked => ArithOp::Sub,
        BinaryOp::Mul | BinaryOp::MulChecked => ArithOp::Mul,
        BinaryOp::Div => ArithOp::Div,
        BinaryOp::Rem => ArithOp::Rem,
        BinaryOp::And => ArithOp::And,
        BinaryOp::Or => ArithOp::Or,
        BinaryOp::Xor => ArithOp::Xor,
        BinaryOp::Shl => ArithOp::Shl,
        BinaryOp::Shr => ArithOp::Shr,
        _ => return Err(CompileError::internal("arithmetic opcode for a non-arithmetic")),
    })
}
