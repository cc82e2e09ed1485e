// src/compiler/codegen/stmt.rs
//
// Control-flow statements: labels, gotos, loops, protected regions, and
// throws. Protected regions follow the nesting contract the interpreter
// documents: when a try has both catch handlers and a finalizer, the
// finalizer owns an outer region wrapped around the inner try/catch.

use crate::errors::{CompileError, CompileErrorKind};
use crate::runtime::{Instr, InstrSink, LabelId, LocalId, Value};
use crate::tree::{CatchRef, ExprRef, GotoExpr, LabelExpr, LoopExpr, NodeKey, TryExpr, Ty};

use super::super::labels::{LabelInfo, LabelScopeInfo, LabelScopeKind};
use super::LambdaCompiler;

impl<'a> LambdaCompiler<'a> {
    pub(super) fn emit_label(&mut self, l: &LabelExpr, as_void: bool) -> Result<(), CompileError> {
        // A label pre-defined by an enclosing block or switch is only
        // marked here; anything else gets defined in the current scope.
        if !self.label_visible(&l.target) {
            self.define_label_here(&l.target)?;
        }
        let key = NodeKey::label(&l.target);
        let value = !as_void && !l.target.ty.is_void();
        if let Some(default) = &l.default {
            if value {
                self.emit(default)?;
            } else {
                self.emit_as_void(default)?;
            }
        }
        let info = self
            .labels
            .get_mut(&key)
            .ok_or_else(|| CompileError::internal("label defined but untracked"))?;
        if value && l.default.is_some() {
            info.mark(&mut self.writer);
        } else {
            info.mark_with_empty_stack(&mut self.writer);
            if !value && !l.target.ty.is_void() {
                // Arrivals stored a value nobody wants.
                self.writer.emit(Instr::Pop);
            }
        }
        Ok(())
    }

    pub(super) fn emit_goto(&mut self, g: &GotoExpr) -> Result<(), CompileError> {
        let block = self.label_block.clone();
        let key = NodeKey::label(&g.target);
        {
            let info = self
                .labels
                .entry(key)
                .or_insert_with(|| LabelInfo::new(&g.target));
            info.reference(&block)?;
        }
        if let Some(value) = &g.value {
            if g.target.ty.is_void() {
                self.emit_as_void(value)?;
            } else {
                self.emit(value)?;
            }
        }
        let info = self
            .labels
            .get_mut(&key)
            .ok_or_else(|| CompileError::internal("jump target lost"))?;
        info.emit_jump(&mut self.writer);
        Ok(())
    }

    pub(super) fn emit_loop(
        &mut self,
        node: &ExprRef,
        l: &LoopExpr,
        as_void: bool,
    ) -> Result<(), CompileError> {
        let saved = self.label_block.clone();
        self.label_block = LabelScopeInfo::new(Some(saved.clone()), LabelScopeKind::Statement);
        if let Some(b) = &l.break_label {
            self.define_label_here(b)?;
        }
        if let Some(c) = &l.continue_label {
            self.define_label_here(c)?;
        }

        let top = self.writer.def_label();
        if let Some(c) = &l.continue_label {
            let info = self
                .labels
                .get_mut(&NodeKey::label(c))
                .ok_or_else(|| CompileError::internal("continue label lost"))?;
            info.mark_with_empty_stack(&mut self.writer);
        }
        self.writer.mark(top);
        self.emit_as_void(&l.body)?;
        self.writer.emit(Instr::Branch(top));
        self.label_block = saved;

        if let Some(b) = &l.break_label {
            let info = self
                .labels
                .get_mut(&NodeKey::label(b))
                .ok_or_else(|| CompileError::internal("break label lost"))?;
            info.mark_with_empty_stack(&mut self.writer);
            if (as_void || node.ty.is_void()) && !b.ty.is_void() {
                self.writer.emit(Instr::Pop);
            }
        }
        Ok(())
    }

    pub(super) fn emit_throw(&mut self, operand: &Option<ExprRef>) -> Result<(), CompileError> {
        match operand {
            Some(value) => {
                self.emit(value)?;
                self.writer.emit(Instr::Throw);
            }
            None => {
                self.check_rethrow()?;
                self.writer.emit(Instr::Rethrow);
            }
        }
        Ok(())
    }

    /// A rethrow must sit inside a catch handler, not past a finalizer or
    /// filter boundary.
    fn check_rethrow(&self) -> Result<(), CompileError> {
        let mut cur = Some(self.label_block.clone());
        while let Some(s) = cur {
            match s.kind {
                LabelScopeKind::Catch => return Ok(()),
                LabelScopeKind::Finally | LabelScopeKind::Filter | LabelScopeKind::Lambda => {
                    return Err(CompileErrorKind::RethrowOutsideCatch.into());
                }
                _ => {}
            }
            cur = s.parent.clone();
        }
        Err(CompileErrorKind::RethrowOutsideCatch.into())
    }

    pub(super) fn emit_try(
        &mut self,
        node: &ExprRef,
        t: &TryExpr,
        as_void: bool,
    ) -> Result<(), CompileError> {
        let value = !as_void && !node.ty.is_void();
        let result = if value {
            Some(self.get_local(Ty::Object))
        } else {
            None
        };
        let end = self.writer.def_label();

        let outer = t.finally.is_some() || t.fault.is_some();
        let catches = !t.handlers.is_empty();
        if outer {
            self.writer.begin_try();
        }
        if catches {
            self.writer.begin_try();
        }

        let saved = self.label_block.clone();
        self.label_block = LabelScopeInfo::new(Some(saved.clone()), LabelScopeKind::Try);
        if let Some(local) = result {
            self.emit(&t.body)?;
            self.writer.emit(Instr::StoreLocal(local));
        } else {
            self.emit_as_void(&t.body)?;
        }
        self.label_block = saved.clone();
        self.writer.emit(Instr::Leave(end));

        for handler in &t.handlers {
            self.emit_catch_handler(handler, result, end)?;
        }
        if catches {
            self.writer.end_try();
        }

        if let Some(f) = &t.finally {
            self.writer.begin_finally();
            self.label_block = LabelScopeInfo::new(Some(saved.clone()), LabelScopeKind::Finally);
            self.emit_as_void(f)?;
            self.label_block = saved.clone();
            self.writer.emit(Instr::EndFinally);
        }
        if let Some(f) = &t.fault {
            self.writer.begin_fault();
            self.label_block = LabelScopeInfo::new(Some(saved.clone()), LabelScopeKind::Finally);
            self.emit_as_void(f)?;
            self.label_block = saved;
            self.writer.emit(Instr::EndFinally);
        }
        if outer {
            self.writer.end_try();
        }

        self.writer.mark(end);
        if let Some(local) = result {
            self.writer.emit(Instr::LoadLocal(local));
            self.free_local(Ty::Object, local);
        }
        Ok(())
    }

    /// One catch handler. A filtered handler binds its variable while the
    /// filter runs, so both the filter expression and the handler body see
    /// it; the runtime then re-enters at the body with the exception
    /// pushed again, which the body discards.
    fn emit_catch_handler(
        &mut self,
        handler: &CatchRef,
        result: Option<LocalId>,
        end: LabelId,
    ) -> Result<(), CompileError> {
        let scoped = handler.var.is_some();
        let saved = self.label_block.clone();
        if let Some(filter) = &handler.filter {
            self.writer.begin_filter();
            if scoped {
                self.enter_scope(NodeKey::catch(handler))?;
            }
            let no_match = self.writer.def_label();
            let done = self.writer.def_label();
            self.writer.emit(Instr::Dup);
            self.writer.emit(Instr::IsInstance(handler.test_ty.clone()));
            self.writer.emit(Instr::BranchFalse(no_match));
            self.bind_exception(handler)?;
            self.label_block = LabelScopeInfo::new(Some(saved.clone()), LabelScopeKind::Filter);
            self.emit(filter)?;
            self.label_block = saved.clone();
            self.writer.emit(Instr::Branch(done));
            self.writer.mark(no_match);
            self.writer.emit(Instr::Pop);
            self.writer.emit(Instr::Push(Value::Bool(false)));
            self.writer.mark(done);
            self.writer.emit(Instr::EndFilter);
            self.writer.begin_catch(None);
            self.writer.emit(Instr::Pop);
        } else {
            self.writer.begin_catch(Some(handler.test_ty.clone()));
            if scoped {
                self.enter_scope(NodeKey::catch(handler))?;
            }
            self.bind_exception(handler)?;
        }

        self.label_block = LabelScopeInfo::new(Some(saved.clone()), LabelScopeKind::Catch);
        if let Some(local) = result {
            self.emit(&handler.body)?;
            self.writer.emit(Instr::StoreLocal(local));
        } else {
            self.emit_as_void(&handler.body)?;
        }
        self.label_block = saved;
        if scoped {
            self.exit_scope();
        }
        self.writer.emit(Instr::Leave(end));
        Ok(())
    }

    /// Consumes the exception on top of the stack.
    fn bind_exception(&mut self, handler: &CatchRef) -> Result<(), CompileError> {
        match &handler.var {
            Some(var) => self.emit_var_store(var),
            None => {
                self.writer.emit(Instr::Pop);
                Ok(())
            }
        }
    }
}
