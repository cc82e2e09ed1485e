// src/compiler/codegen/mod.rs
//
// The code generator: walks a spilled, bound lambda and emits a linear
// instruction stream through a `MethodWriter`. One `LambdaCompiler` exists
// per lambda; nested lambdas recurse into fresh compilers that share the
// analyzed tree and the produced-methods list. Emission is shaped by two
// axes threaded through every node: whether the value is wanted
// (`as_void`), and the label-scope chain that decides which jumps are
// legal and what form they take.

mod calls;
mod expr;
mod lambda;
mod ops;
mod stmt;
mod switch;

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::errors::{CompileError, CompileErrorKind};
use crate::runtime::{CompiledMethod, Env, Instr, InstrSink, LocalId, MethodWriter, Value};
use crate::tree::{ExprKind, ExprRef, LabelRef, NodeKey, ParamRef, Ty};

use super::analyzed::AnalyzedTree;
use super::constants::BoundConstants;
use super::guard;
use super::labels::{LabelInfo, LabelScopeInfo, LabelScopeKind};
use super::scope::{CompilerScope, HoistedLocals, Storage, VarStorage};

/// Compiles `lambda` and every lambda nested in it. Returns the root
/// method and the full production list (root last).
#[tracing::instrument(skip_all)]
pub(crate) fn compile_tree(
    lambda: &ExprRef,
    tree: &AnalyzedTree,
    env: &Rc<Env>,
    allow_live_constants: bool,
) -> Result<(Rc<CompiledMethod>, Vec<Rc<CompiledMethod>>), CompileError> {
    let produced = RefCell::new(Vec::new());
    let root = LambdaCompiler::compile(lambda, tree, env, &produced, allow_live_constants, None)?;
    Ok((root, produced.into_inner()))
}

pub(super) struct LambdaCompiler<'a> {
    env: &'a Rc<Env>,
    tree: &'a AnalyzedTree,
    produced: &'a RefCell<Vec<Rc<CompiledMethod>>>,
    /// False when compiling into a method table; every constant must then
    /// be a literal.
    allow_live_constants: bool,
    writer: MethodWriter,
    /// Currently active innermost scope.
    scope: Rc<RefCell<CompilerScope>>,
    constants: Rc<RefCell<BoundConstants>>,
    /// The hoisted-locals descriptor of the frame this method is closed
    /// over, if any.
    closure_frame: Option<Rc<HoistedLocals>>,
    labels: FxHashMap<NodeKey, LabelInfo>,
    label_block: Rc<LabelScopeInfo>,
    /// Scratch locals, pooled by type.
    free_locals: FxHashMap<Ty, Vec<LocalId>>,
}

impl<'a> LambdaCompiler<'a> {
    fn compile(
        node: &ExprRef,
        tree: &'a AnalyzedTree,
        env: &'a Rc<Env>,
        produced: &'a RefCell<Vec<Rc<CompiledMethod>>>,
        allow_live_constants: bool,
        closure_frame: Option<Rc<HoistedLocals>>,
    ) -> Result<Rc<CompiledMethod>, CompileError> {
        let ExprKind::Lambda(l) = &node.kind else {
            return Err(CompileError::internal("code generation expects a lambda"));
        };
        let sig = match &node.ty {
            Ty::Delegate(sig) => sig.clone(),
            _ => return Err(CompileError::internal("lambda node without a delegate type")),
        };
        let key = NodeKey::expr(node);
        let mut compiler = LambdaCompiler {
            env,
            tree,
            produced,
            allow_live_constants,
            writer: MethodWriter::new(),
            scope: tree.scope(key)?,
            constants: tree.constants_of(key)?,
            closure_frame,
            labels: FxHashMap::default(),
            label_block: LabelScopeInfo::new(None, LabelScopeKind::Lambda),
            free_locals: FxHashMap::default(),
        };

        let in_lambda = |e: CompileError| match e.lambda {
            Some(_) => e,
            None => CompileError::in_lambda(e.kind, l.display_name()),
        };
        compiler.emit_lambda_body(node, l).map_err(in_lambda)?;
        for info in compiler.labels.values() {
            info.validate_finish().map_err(in_lambda)?;
        }

        let body = compiler.writer.finish(l.params.len() as u16);
        debug!(
            lambda = l.display_name(),
            instrs = body.code.len(),
            locals = body.locals.len(),
            "compiled lambda"
        );
        let method = Rc::new(CompiledMethod {
            name: Rc::from(l.display_name()),
            sig,
            body,
            constants: compiler.constants.borrow().to_array(),
        });
        produced.borrow_mut().push(method.clone());
        Ok(method)
    }

    // ---- emission entry points -------------------------------------------

    /// Emits `node` so that its value is left on the stack.
    pub(super) fn emit(&mut self, node: &ExprRef) -> Result<(), CompileError> {
        guard::with_stack(|| self.emit_node(node, false))
    }

    /// Emits `node` for effect only; nothing is left on the stack.
    pub(super) fn emit_as_void(&mut self, node: &ExprRef) -> Result<(), CompileError> {
        guard::with_stack(|| self.emit_node(node, true))
    }

    fn emit_node(&mut self, node: &ExprRef, as_void: bool) -> Result<(), CompileError> {
        let saved = self.push_label_scope(node)?;
        let result = self.emit_kind(node, as_void);
        if let Some(prev) = saved {
            self.label_block = prev;
        }
        result
    }

    fn emit_kind(&mut self, node: &ExprRef, as_void: bool) -> Result<(), CompileError> {
        match &node.kind {
            // Pure leaves cost nothing to skip in void position.
            ExprKind::Constant(v) => {
                if !as_void {
                    self.emit_constant(v, &node.ty)?;
                }
                Ok(())
            }
            ExprKind::Parameter(p) => {
                if !as_void {
                    self.emit_var_load(p)?;
                }
                Ok(())
            }
            ExprKind::Default => {
                if !as_void && !node.ty.is_void() {
                    self.writer.emit(Instr::Push(Value::default_of(&node.ty)));
                }
                Ok(())
            }
            ExprKind::Binary(b) => {
                self.emit_binary(b)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::Unary(u) => {
                self.emit_unary(u)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::Convert(c) => {
                self.emit_convert(node, c)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::Call(c) => {
                self.emit_call(c)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::Invoke(i) => {
                self.emit_invoke(i)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::New(n) => {
                self.emit_new(n)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::Field(f) => {
                self.emit_field(f)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::Index(ix) => {
                self.emit(&ix.array)?;
                self.emit(&ix.index)?;
                self.writer.emit(Instr::LoadElem);
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::NewArray(n) => {
                self.emit_new_array(n)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::Lambda(_) => {
                self.emit_delegate(node)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::Quote(inner) => {
                self.emit_delegate(inner)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::RuntimeVariables(vars) => {
                self.emit_runtime_variables(vars)?;
                self.discard_if(as_void, &node.ty);
                Ok(())
            }
            ExprKind::Assign(a) => self.emit_assign(a, as_void),
            ExprKind::Block(b) => self.emit_block(node, b, as_void),
            ExprKind::Conditional(c) => self.emit_conditional(c, &node.ty, as_void),
            ExprKind::Loop(l) => self.emit_loop(node, l, as_void),
            ExprKind::Try(t) => self.emit_try(node, t, as_void),
            ExprKind::Switch(s) => self.emit_switch(node, s, as_void),
            ExprKind::Label(l) => self.emit_label(l, as_void),
            ExprKind::Goto(g) => self.emit_goto(g),
            ExprKind::Throw(t) => self.emit_throw(t),
        }
    }

    fn discard_if(&mut self, as_void: bool, ty: &Ty) {
        if as_void && !ty.is_void() {
            self.writer.emit(Instr::Pop);
        }
    }

    // ---- constants -------------------------------------------------------

    fn emit_constant(&mut self, value: &Value, ty: &Ty) -> Result<(), CompileError> {
        if value.is_literal_emittable() {
            self.writer.emit(Instr::Push(value.clone()));
            return Ok(());
        }
        if !self.allow_live_constants {
            return Err(CompileErrorKind::CannotEmitConstant { ty: ty.clone() }.into());
        }
        let cached = self.constants.borrow().cached_local(value, ty)?;
        match cached {
            Some(local) => self.writer.emit(Instr::LoadLocal(local)),
            None => {
                let slot = self.constants.borrow().slot(value)?;
                self.writer.emit(Instr::LoadConstant(slot));
            }
        }
        Ok(())
    }

    // ---- scopes and variable storage -------------------------------------

    /// Activates the scope of a block or catch node, declaring frame locals
    /// for its unhoisted variables and allocating the hoisted frame if any
    /// variable was hoisted.
    pub(super) fn enter_scope(&mut self, key: NodeKey) -> Result<(), CompileError> {
        let scope = self.tree.scope(key)?;
        {
            let mut s = scope.borrow_mut();
            s.parent = Some(self.scope.clone());
            s.nearest_hoisted = self.scope.borrow().nearest_hoisted.clone();
            let vars = s.vars.clone();
            for var in &vars {
                let k = NodeKey::param(var);
                if s.definitions.get(&k) == Some(&VarStorage::Hoisted) {
                    continue;
                }
                let local = self.writer.declare_local(local_ty(var));
                s.locals.insert(k, Storage::Local(local));
            }
        }
        let has_hoisted = scope.borrow().has_hoisted();
        self.scope = scope;
        if has_hoisted {
            self.emit_hoisted_frame(&FxHashMap::default())?;
        }
        Ok(())
    }

    pub(super) fn exit_scope(&mut self) {
        let parent = self.scope.borrow().parent.clone();
        self.scope.borrow_mut().deactivate();
        if let Some(parent) = parent {
            self.scope = parent;
        }
    }

    /// Resolves a variable to its storage: first through the activated
    /// scopes of this method, then through the closure frame chain.
    pub(super) fn resolve(&self, var: &ParamRef) -> Result<Storage, CompileError> {
        let key = NodeKey::param(var);
        let mut scope = Some(self.scope.clone());
        while let Some(s) = scope {
            if let Some(storage) = s.borrow().locals.get(&key) {
                return Ok(storage.clone());
            }
            scope = s.borrow().parent.clone();
        }
        self.resolve_through_frame(var)
    }

    /// Walks the closure frame descriptors: each hop loads the parent
    /// array out of slot 0 of the current one.
    fn resolve_through_frame(&self, var: &ParamRef) -> Result<Storage, CompileError> {
        let key = NodeKey::param(var);
        let mut frame = self.closure_frame.clone();
        let mut array = Storage::Frame;
        while let Some(h) = frame {
            if key == NodeKey::param(&h.self_var) {
                return Ok(array);
            }
            if let Some(&index) = h.indexes.get(&key) {
                return Ok(Storage::ElementBox {
                    index,
                    array: Rc::new(array),
                });
            }
            array = Storage::ElementBox {
                index: 0,
                array: Rc::new(array),
            };
            frame = h.parent.clone();
        }
        Err(CompileError::internal_with(
            "variable resolves to no storage",
            var.display_name(),
        ))
    }

    pub(super) fn emit_var_load(&mut self, var: &ParamRef) -> Result<(), CompileError> {
        let storage = self.resolve(var)?;
        self.emit_storage_load(&storage);
        Ok(())
    }

    /// Stores the value on top of the stack into `var`.
    pub(super) fn emit_var_store(&mut self, var: &ParamRef) -> Result<(), CompileError> {
        let storage = self.resolve(var)?;
        self.emit_storage_store(&storage)
    }

    fn emit_storage_load(&mut self, storage: &Storage) {
        match storage {
            Storage::Local(local) => self.writer.emit(Instr::LoadLocal(*local)),
            Storage::Argument(slot) => self.writer.emit(Instr::LoadArg(*slot)),
            Storage::BoxedArgument(slot) => {
                self.writer.emit(Instr::LoadArg(*slot));
                self.writer.emit(Instr::LoadCell);
            }
            Storage::LocalBox(local) => {
                self.writer.emit(Instr::LoadLocal(*local));
                self.writer.emit(Instr::LoadCell);
            }
            Storage::ElementBox { index, array } => {
                self.emit_storage_load(array);
                self.writer.emit(Instr::Push(Value::I32(*index as i32)));
                self.writer.emit(Instr::LoadElem);
                self.writer.emit(Instr::LoadCell);
            }
            Storage::Frame => self.writer.emit(Instr::LoadFrame),
        }
    }

    fn emit_storage_store(&mut self, storage: &Storage) -> Result<(), CompileError> {
        match storage {
            Storage::Local(local) => self.writer.emit(Instr::StoreLocal(*local)),
            Storage::Argument(slot) => self.writer.emit(Instr::StoreArg(*slot)),
            Storage::BoxedArgument(_) | Storage::LocalBox(_) | Storage::ElementBox { .. } => {
                // Park the value, load the cell, write through it.
                let tmp = self.get_local(Ty::Object);
                self.writer.emit(Instr::StoreLocal(tmp));
                match storage {
                    Storage::BoxedArgument(slot) => self.writer.emit(Instr::LoadArg(*slot)),
                    Storage::LocalBox(local) => self.writer.emit(Instr::LoadLocal(*local)),
                    Storage::ElementBox { index, array } => {
                        self.emit_storage_load(array);
                        self.writer.emit(Instr::Push(Value::I32(*index as i32)));
                        self.writer.emit(Instr::LoadElem);
                    }
                    _ => unreachable!(),
                }
                self.writer.emit(Instr::LoadLocal(tmp));
                self.writer.emit(Instr::StoreCell);
                self.free_local(Ty::Object, tmp);
            }
            Storage::Frame => {
                return Err(CompileError::internal("the closure frame is not assignable"));
            }
        }
        Ok(())
    }

    // ---- scratch locals --------------------------------------------------

    pub(super) fn get_local(&mut self, ty: Ty) -> LocalId {
        if let Some(local) = self.free_locals.get_mut(&ty).and_then(|pool| pool.pop()) {
            return local;
        }
        self.writer.declare_local(ty)
    }

    pub(super) fn free_local(&mut self, ty: Ty, local: LocalId) {
        self.free_locals.entry(ty).or_default().push(local);
    }

    // ---- label scopes ----------------------------------------------------

    /// Pushes the label scope `node` opens, if any, returning the scope to
    /// restore afterwards. Labels directly under a block or a switch were
    /// already defined when that construct was entered and open nothing.
    fn push_label_scope(
        &mut self,
        node: &ExprRef,
    ) -> Result<Option<Rc<LabelScopeInfo>>, CompileError> {
        let saved = self.label_block.clone();
        match &node.kind {
            ExprKind::Label(l) => {
                if saved.kind == LabelScopeKind::Block {
                    let key = NodeKey::label(&l.target);
                    if saved.contains_target(key) {
                        return Ok(None);
                    }
                    let in_switch = saved.parent.as_ref().is_some_and(|p| {
                        p.kind == LabelScopeKind::Switch && p.contains_target(key)
                    });
                    if in_switch {
                        return Ok(None);
                    }
                }
                self.label_block =
                    LabelScopeInfo::new(Some(saved.clone()), LabelScopeKind::Statement);
                Ok(Some(saved))
            }
            ExprKind::Block(_) => {
                self.label_block = LabelScopeInfo::new(Some(saved.clone()), LabelScopeKind::Block);
                // Labels defined immediately in a block are in scope for
                // the whole block. Switch case bodies defined theirs at
                // the switch already.
                if saved.kind != LabelScopeKind::Switch {
                    self.define_block_labels(node)?;
                }
                Ok(Some(saved))
            }
            ExprKind::Switch(s) => {
                self.label_block = LabelScopeInfo::new(Some(saved.clone()), LabelScopeKind::Switch);
                for case in &s.cases {
                    self.define_case_label(&case.body)?;
                }
                if let Some(d) = &s.default {
                    self.define_case_label(d)?;
                }
                Ok(Some(saved))
            }
            _ => {
                if saved.kind != LabelScopeKind::Expression {
                    self.label_block =
                        LabelScopeInfo::new(Some(saved.clone()), LabelScopeKind::Expression);
                    Ok(Some(saved))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn define_block_labels(&mut self, node: &ExprRef) -> Result<(), CompileError> {
        let ExprKind::Block(b) = &node.kind else {
            return Ok(());
        };
        for e in &b.exprs {
            if let ExprKind::Label(l) = &e.kind {
                self.define_label_here(&l.target)?;
            }
        }
        Ok(())
    }

    fn define_case_label(&mut self, body: &ExprRef) -> Result<(), CompileError> {
        if let ExprKind::Label(l) = &body.kind {
            self.define_label_here(&l.target)?;
        }
        Ok(())
    }

    pub(super) fn define_label_here(&mut self, target: &LabelRef) -> Result<(), CompileError> {
        let block = self.label_block.clone();
        let info = self
            .labels
            .entry(NodeKey::label(target))
            .or_insert_with(|| LabelInfo::new(target));
        info.define(&block)
    }

    /// Whether `target` is already defined in a scope visible from here.
    pub(super) fn label_visible(&self, target: &LabelRef) -> bool {
        let key = NodeKey::label(target);
        let mut cur = Some(self.label_block.clone());
        while let Some(s) = cur {
            if s.contains_target(key) {
                return true;
            }
            cur = s.parent.clone();
        }
        false
    }
}

/// The frame-local type for a variable; by-ref parameters hold the
/// referenced value's type.
pub(super) fn local_ty(var: &ParamRef) -> Ty {
    match &var.ty {
        Ty::Ref(inner) => (**inner).clone(),
        other => other.clone(),
    }
}
