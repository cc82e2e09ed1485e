// src/compiler/codegen/expr.rs
//
// Blocks, assignments, conditionals, field and array access, and the
// branch emitter that fuses boolean tests into conditional jumps.

use crate::errors::{CompileError, CompileErrorKind};
use crate::runtime::{FieldId, Instr, InstrSink, LabelId, Value};
use crate::tree::{
    AssignExpr, BlockExpr, BinaryOp, ConditionalExpr, ExprKind, ExprRef, FieldExpr, NewArrayExpr,
    NodeKey, Ty, UnaryOp,
};

use super::LambdaCompiler;

impl<'a> LambdaCompiler<'a> {
    pub(super) fn emit_block(
        &mut self,
        node: &ExprRef,
        b: &BlockExpr,
        as_void: bool,
    ) -> Result<(), CompileError> {
        let scoped = !b.vars.is_empty();
        if scoped {
            self.enter_scope(NodeKey::expr(node))?;
        }
        let result = self.emit_block_body(b, as_void || node.ty.is_void());
        if scoped {
            self.exit_scope();
        }
        result
    }

    fn emit_block_body(&mut self, b: &BlockExpr, as_void: bool) -> Result<(), CompileError> {
        let (last, rest) = b
            .exprs
            .split_last()
            .ok_or_else(|| CompileError::internal("empty block"))?;
        for e in rest {
            self.emit_as_void(e)?;
        }
        if as_void {
            self.emit_as_void(last)
        } else {
            self.emit(last)
        }
    }

    pub(super) fn emit_assign(&mut self, a: &AssignExpr, as_void: bool) -> Result<(), CompileError> {
        match &a.target.kind {
            ExprKind::Parameter(p) => {
                self.emit(&a.value)?;
                if !as_void {
                    self.writer.emit(Instr::Dup);
                }
                self.emit_var_store(p)
            }
            ExprKind::Field(f) => {
                self.writable_field(f.field)?;
                match &f.object {
                    Some(object) => {
                        self.emit(object)?;
                        self.emit(&a.value)?;
                        if as_void {
                            self.writer.emit(Instr::StoreField(f.field));
                        } else {
                            let tmp = self.get_local(Ty::Object);
                            self.writer.emit(Instr::Dup);
                            self.writer.emit(Instr::StoreLocal(tmp));
                            self.writer.emit(Instr::StoreField(f.field));
                            self.writer.emit(Instr::LoadLocal(tmp));
                            self.free_local(Ty::Object, tmp);
                        }
                        Ok(())
                    }
                    None => {
                        self.emit(&a.value)?;
                        if !as_void {
                            self.writer.emit(Instr::Dup);
                        }
                        self.writer.emit(Instr::StoreStatic(f.field));
                        Ok(())
                    }
                }
            }
            ExprKind::Index(ix) => {
                self.emit(&ix.array)?;
                self.emit(&ix.index)?;
                self.emit(&a.value)?;
                if as_void {
                    self.writer.emit(Instr::StoreElem);
                } else {
                    let tmp = self.get_local(Ty::Object);
                    self.writer.emit(Instr::Dup);
                    self.writer.emit(Instr::StoreLocal(tmp));
                    self.writer.emit(Instr::StoreElem);
                    self.writer.emit(Instr::LoadLocal(tmp));
                    self.free_local(Ty::Object, tmp);
                }
                Ok(())
            }
            _ => Err(CompileError::internal("assignment to a non-lvalue")),
        }
    }

    pub(super) fn emit_conditional(
        &mut self,
        c: &ConditionalExpr,
        ty: &Ty,
        as_void: bool,
    ) -> Result<(), CompileError> {
        let as_void = as_void || ty.is_void();
        let otherwise = self.writer.def_label();
        let end = self.writer.def_label();
        self.emit_branch(&c.test, false, otherwise)?;
        if as_void {
            self.emit_as_void(&c.if_true)?;
        } else {
            self.emit(&c.if_true)?;
        }
        self.writer.emit(Instr::Branch(end));
        self.writer.mark(otherwise);
        if as_void {
            self.emit_as_void(&c.if_false)?;
        } else {
            self.emit(&c.if_false)?;
        }
        self.writer.mark(end);
        Ok(())
    }

    pub(super) fn emit_field(&mut self, f: &FieldExpr) -> Result<(), CompileError> {
        match &f.object {
            Some(object) => {
                self.emit(object)?;
                self.writer.emit(Instr::LoadField(f.field));
            }
            None => self.writer.emit(Instr::LoadStatic(f.field)),
        }
        Ok(())
    }

    pub(super) fn emit_new_array(&mut self, n: &NewArrayExpr) -> Result<(), CompileError> {
        self.writer.emit(Instr::Push(Value::I32(n.items.len() as i32)));
        self.writer.emit(Instr::NewArray);
        for (i, item) in n.items.iter().enumerate() {
            self.writer.emit(Instr::Dup);
            self.writer.emit(Instr::Push(Value::I32(i as i32)));
            self.emit(item)?;
            self.writer.emit(Instr::StoreElem);
        }
        Ok(())
    }

    pub(super) fn writable_field(&self, field: FieldId) -> Result<(), CompileError> {
        let def = self.env.types.field_def(field);
        if def.readonly {
            return Err(CompileErrorKind::ReadonlyField {
                field: def.name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Emits a jump to `target` taken when `test` evaluates to `when`.
    /// Constant tests fold away, `not` flips the sense, short-circuit
    /// operators lower to a branch pair, and a bare comparison fuses with
    /// the conditional jump.
    pub(super) fn emit_branch(
        &mut self,
        test: &ExprRef,
        when: bool,
        target: LabelId,
    ) -> Result<(), CompileError> {
        match &test.kind {
            ExprKind::Constant(Value::Bool(b)) => {
                if *b == when {
                    self.writer.emit(Instr::Branch(target));
                }
                Ok(())
            }
            ExprKind::Unary(u) if u.op == UnaryOp::Not && !u.lifted && test.ty == Ty::Bool => {
                self.emit_branch(&u.operand, !when, target)
            }
            ExprKind::Binary(b)
                if !b.lifted && matches!(b.op, BinaryOp::AndAlso | BinaryOp::OrElse) =>
            {
                let and = b.op == BinaryOp::AndAlso;
                if when == and {
                    // Both operands must agree before the jump is taken.
                    let skip = self.writer.def_label();
                    self.emit_branch(&b.left, !and, skip)?;
                    self.emit_branch(&b.right, when, target)?;
                    self.writer.mark(skip);
                } else {
                    // Either operand alone decides.
                    self.emit_branch(&b.left, when, target)?;
                    self.emit_branch(&b.right, when, target)?;
                }
                Ok(())
            }
            ExprKind::Binary(b) if !b.lifted && b.op.is_comparison() => {
                self.emit(&b.left)?;
                self.emit(&b.right)?;
                self.emit_compare_core(b.op, &b.left.ty)?;
                self.writer.emit(if when {
                    Instr::BranchTrue(target)
                } else {
                    Instr::BranchFalse(target)
                });
                Ok(())
            }
            _ => {
                self.emit(test)?;
                self.writer.emit(if when {
                    Instr::BranchTrue(target)
                } else {
                    Instr::BranchFalse(target)
                });
                Ok(())
            }
        }
    }
}
