// src/compiler/codegen/lambda.rs
//
// Lambda entry and exit: parameter storage, the hoisted-frame prologue,
// the bound-constant cache prologue, nested delegate creation, and
// runtime variable reification.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::errors::CompileError;
use crate::runtime::{Instr, InstrSink, Value};
use crate::tree::{ExprKind, ExprRef, LambdaExpr, NodeKey, ParamRef, Ty};

use super::super::labels::LabelInfo;
use super::super::scope::{HoistedLocals, Storage, VarStorage};
use super::{local_ty, LambdaCompiler};

impl<'a> LambdaCompiler<'a> {
    pub(super) fn emit_lambda_body(
        &mut self,
        node: &ExprRef,
        l: &LambdaExpr,
    ) -> Result<(), CompileError> {
        self.enter_lambda_scope(node, l)?;
        self.emit_constant_prologue()?;
        self.mark_return_label(&l.body, &l.ret);
        if l.ret.is_void() {
            self.emit_as_void(&l.body)?;
        } else {
            self.emit(&l.body)?;
        }
        self.writer.emit(Instr::Ret);
        self.exit_scope();
        Ok(())
    }

    /// Activates the lambda's own scope: unhoisted parameters resolve to
    /// argument slots (through the caller's cell for by-ref ones), hoisted
    /// parameters are copied into the frame array the prologue allocates.
    fn enter_lambda_scope(&mut self, node: &ExprRef, l: &LambdaExpr) -> Result<(), CompileError> {
        let scope = self.tree.scope(NodeKey::expr(node))?;
        let mut arg_of = FxHashMap::default();
        {
            let mut s = scope.borrow_mut();
            s.parent = None;
            s.nearest_hoisted = self.closure_frame.clone();
            for (i, p) in l.params.iter().enumerate() {
                let key = NodeKey::param(p);
                arg_of.insert(key, i as u16);
                if s.definitions.get(&key) == Some(&VarStorage::Hoisted) {
                    continue;
                }
                let storage = if p.by_ref {
                    Storage::BoxedArgument(i as u16)
                } else {
                    Storage::Argument(i as u16)
                };
                s.locals.insert(key, storage);
            }
        }
        let has_hoisted = scope.borrow().has_hoisted();
        self.scope = scope;
        if has_hoisted {
            self.emit_hoisted_frame(&arg_of)?;
        }
        Ok(())
    }

    /// Allocates the current scope's hoisted frame: an array of cells, one
    /// per hoisted variable, with slot 0 linking to the parent frame when
    /// one is reachable. Hoisted parameters seed their cell from the
    /// argument slot; everything else starts at its type's default.
    pub(super) fn emit_hoisted_frame(
        &mut self,
        arg_of: &FxHashMap<NodeKey, u16>,
    ) -> Result<(), CompileError> {
        let scope = self.scope.clone();
        let parent = scope.borrow().nearest_hoisted.clone();
        let hoisted = scope.borrow().hoisted_vars();
        let locals = HoistedLocals::new(parent.clone(), hoisted);

        self.writer
            .emit(Instr::Push(Value::I32(locals.vars.len() as i32)));
        self.writer.emit(Instr::NewArray);
        for (i, var) in locals.vars.iter().enumerate() {
            self.writer.emit(Instr::Dup);
            self.writer.emit(Instr::Push(Value::I32(i as i32)));
            if parent.is_some() && i == 0 {
                let storage = self.resolve(var)?;
                self.emit_storage_load(&storage);
            } else if let Some(&slot) = arg_of.get(&NodeKey::param(var)) {
                self.writer.emit(Instr::LoadArg(slot));
            } else {
                self.writer.emit(Instr::Push(Value::default_of(&local_ty(var))));
            }
            self.writer.emit(Instr::NewCell);
            self.writer.emit(Instr::StoreElem);
        }
        let self_local = self.writer.declare_local(Ty::array(Ty::Object));
        self.writer.emit(Instr::StoreLocal(self_local));

        {
            let mut s = scope.borrow_mut();
            s.locals.insert(
                NodeKey::param(&locals.self_var),
                Storage::Local(self_local),
            );
            let array = Rc::new(Storage::Local(self_local));
            for (i, var) in locals.vars.iter().enumerate() {
                if parent.is_some() && i == 0 {
                    continue;
                }
                s.locals.insert(
                    NodeKey::param(var),
                    Storage::ElementBox {
                        index: i as u32,
                        array: array.clone(),
                    },
                );
            }
            s.nearest_hoisted = Some(locals.clone());
        }

        // Hot cells get pulled into a frame local once, up front.
        let cached: Vec<(NodeKey, u32)> = {
            let s = scope.borrow();
            locals
                .vars
                .iter()
                .enumerate()
                .filter(|&(i, _)| !(parent.is_some() && i == 0))
                .filter(|(_, v)| s.should_cache(v))
                .map(|(i, v)| (NodeKey::param(v), i as u32))
                .collect()
        };
        for (key, index) in cached {
            let cell = self.writer.declare_local(Ty::Object);
            self.writer.emit(Instr::LoadLocal(self_local));
            self.writer.emit(Instr::Push(Value::I32(index as i32)));
            self.writer.emit(Instr::LoadElem);
            self.writer.emit(Instr::StoreLocal(cell));
            scope.borrow_mut().locals.insert(key, Storage::LocalBox(cell));
        }
        Ok(())
    }

    /// Loads the bound constants that the reference-count heuristic marked
    /// hot into dedicated locals before the body runs.
    fn emit_constant_prologue(&mut self) -> Result<(), CompileError> {
        if !self.allow_live_constants {
            return Ok(());
        }
        let worthy = self.constants.borrow().cache_worthy();
        for (value, ty, slot) in worthy {
            let local = self.writer.declare_local(ty.clone());
            self.writer.emit(Instr::LoadConstant(slot));
            self.writer.emit(Instr::StoreLocal(local));
            self.constants.borrow_mut().record_cached(&value, &ty, local)?;
        }
        Ok(())
    }

    /// A label in tail position whose type matches the return type doubles
    /// as the return point; jumps to it compile to a direct return.
    fn mark_return_label(&mut self, body: &ExprRef, ret: &Ty) {
        let mut cur = body;
        loop {
            match &cur.kind {
                ExprKind::Label(l) if l.target.ty == *ret => {
                    let info = self
                        .labels
                        .entry(NodeKey::label(&l.target))
                        .or_insert_with(|| LabelInfo::new(&l.target));
                    info.mark_can_return();
                    return;
                }
                ExprKind::Block(b) => match b.exprs.last() {
                    Some(last) => cur = last,
                    None => return,
                },
                _ => return,
            }
        }
    }

    /// Compiles a nested lambda and emits the delegate that wraps it,
    /// capturing the nearest hoisted frame when the lambda closes over it.
    pub(super) fn emit_delegate(&mut self, node: &ExprRef) -> Result<(), CompileError> {
        let scope = self.tree.scope(NodeKey::expr(node))?;
        let needs_closure = scope.borrow().needs_closure;
        let frame = if needs_closure {
            let frame = self.scope.borrow().nearest_hoisted.clone();
            Some(frame.ok_or_else(|| {
                CompileError::internal("closure needed with no hoisted frame in scope")
            })?)
        } else {
            None
        };
        let method = LambdaCompiler::compile(
            node,
            self.tree,
            self.env,
            self.produced,
            self.allow_live_constants,
            frame.clone(),
        )?;
        match frame {
            Some(frame) => {
                let storage = self.resolve(&frame.self_var)?;
                self.emit_storage_load(&storage);
                self.writer.emit(Instr::MakeDelegate {
                    method,
                    capture_frame: true,
                });
            }
            None => {
                self.writer.emit(Instr::MakeDelegate {
                    method,
                    capture_frame: false,
                });
            }
        }
        Ok(())
    }

    /// Builds the live variable-access array: the nearest frame plus a
    /// (hops, index) path for each requested variable.
    pub(super) fn emit_runtime_variables(&mut self, vars: &[ParamRef]) -> Result<(), CompileError> {
        if vars.is_empty() {
            self.writer.emit(Instr::Push(Value::I32(0)));
            self.writer.emit(Instr::NewArray);
            return Ok(());
        }
        let start = self
            .scope
            .borrow()
            .nearest_hoisted
            .clone()
            .ok_or_else(|| CompileError::internal("runtime variables with no hoisted frame"))?;
        let storage = self.resolve(&start.self_var)?;
        self.emit_storage_load(&storage);
        let mut pairs = Vec::with_capacity(vars.len());
        for var in vars {
            pairs.push(frame_path(&start, var)?);
        }
        self.writer.emit(Instr::NewRuntimeVars(pairs.into()));
        Ok(())
    }
}

fn frame_path(start: &Rc<HoistedLocals>, var: &ParamRef) -> Result<(u32, u32), CompileError> {
    let key = NodeKey::param(var);
    let mut hops = 0u32;
    let mut frame = Some(start.clone());
    while let Some(h) = frame {
        if let Some(&index) = h.indexes.get(&key) {
            return Ok((hops, index));
        }
        hops += 1;
        frame = h.parent.clone();
    }
    Err(CompileError::internal_with(
        "runtime variable is not hoisted in any reachable frame",
        var.display_name(),
    ))
}
