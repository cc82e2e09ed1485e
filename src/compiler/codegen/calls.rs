// src/compiler/codegen/calls.rs
//
// Native calls, delegate invocation, and construction. By-ref parameters
// use the cell protocol: the caller wraps the argument value in a fresh
// cell, passes the cell, and after the call writes the cell's content back
// through the original lvalue.

use crate::errors::{CompileError, CompileErrorKind};
use crate::runtime::{Instr, InstrSink, LocalId};
use crate::tree::{CallExpr, ExprKind, ExprRef, InvokeExpr, NewExpr, Signature, Ty};

use super::LambdaCompiler;

impl<'a> LambdaCompiler<'a> {
    pub(super) fn emit_call(&mut self, c: &CallExpr) -> Result<(), CompileError> {
        let sig = self.env.natives.get(c.func).sig.clone();
        let write_backs = self.emit_arguments(&c.args, &sig)?;
        self.writer.emit(Instr::CallNative {
            func: c.func,
            argc: c.args.len() as u16,
        });
        self.emit_write_backs(write_backs)
    }

    pub(super) fn emit_invoke(&mut self, inv: &InvokeExpr) -> Result<(), CompileError> {
        let sig = match &inv.target.ty {
            Ty::Delegate(sig) => sig.clone(),
            _ => return Err(CompileError::internal("invocation of a non-delegate")),
        };
        self.emit(&inv.target)?;
        let write_backs = self.emit_arguments(&inv.args, &sig)?;
        self.writer.emit(Instr::Invoke {
            argc: inv.args.len() as u16,
        });
        self.emit_write_backs(write_backs)
    }

    pub(super) fn emit_new(&mut self, n: &NewExpr) -> Result<(), CompileError> {
        let def = self.env.types.get(n.type_def);
        if def.is_abstract {
            return Err(CompileErrorKind::AbstractConstructor {
                class: def.name.to_string(),
            }
            .into());
        }
        for a in &n.args {
            self.emit(a)?;
        }
        self.writer.emit(Instr::NewObj {
            type_def: n.type_def,
            argc: n.args.len() as u16,
        });
        Ok(())
    }

    fn emit_arguments(
        &mut self,
        args: &[ExprRef],
        sig: &Signature,
    ) -> Result<Vec<(ExprRef, LocalId)>, CompileError> {
        let mut write_backs = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            self.emit(arg)?;
            if sig.params.get(i).is_some_and(Ty::is_by_ref) {
                self.writer.emit(Instr::NewCell);
                self.writer.emit(Instr::Dup);
                let cell = self.get_local(Ty::Object);
                self.writer.emit(Instr::StoreLocal(cell));
                write_backs.push((arg.clone(), cell));
            }
        }
        Ok(write_backs)
    }

    fn emit_write_backs(
        &mut self,
        write_backs: Vec<(ExprRef, LocalId)>,
    ) -> Result<(), CompileError> {
        for (lvalue, cell) in write_backs {
            self.writer.emit(Instr::LoadLocal(cell));
            self.writer.emit(Instr::LoadCell);
            self.emit_store_to(&lvalue)?;
            self.free_local(Ty::Object, cell);
        }
        Ok(())
    }

    /// Stores the value on top of the stack through an lvalue expression.
    /// The stack spiller reduced the lvalue's components to variables, so
    /// re-evaluating them here cannot repeat side effects.
    fn emit_store_to(&mut self, target: &ExprRef) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Parameter(p) => self.emit_var_store(p),
            ExprKind::Field(f) => {
                self.writable_field(f.field)?;
                match &f.object {
                    Some(object) => {
                        let tmp = self.get_local(Ty::Object);
                        self.writer.emit(Instr::StoreLocal(tmp));
                        self.emit(object)?;
                        self.writer.emit(Instr::LoadLocal(tmp));
                        self.writer.emit(Instr::StoreField(f.field));
                        self.free_local(Ty::Object, tmp);
                        Ok(())
                    }
                    None => {
                        self.writer.emit(Instr::StoreStatic(f.field));
                        Ok(())
                    }
                }
            }
            ExprKind::Index(ix) => {
                let tmp = self.get_local(Ty::Object);
                self.writer.emit(Instr::StoreLocal(tmp));
                self.emit(&ix.array)?;
                self.emit(&ix.index)?;
                self.writer.emit(Instr::LoadLocal(tmp));
                self.writer.emit(Instr::StoreElem);
                self.free_local(Ty::Object, tmp);
                Ok(())
            }
            // The argument was not addressable; by-value semantics apply
            // and the updated value is dropped.
            _ => {
                self.writer.emit(Instr::Pop);
                Ok(())
            }
        }
    }
}
