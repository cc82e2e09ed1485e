// src/compiler/labels.rs
//
// Label and branch validation. A `LabelScopeInfo` chain mirrors the
// constructs the code generator is currently inside; `LabelInfo` tracks one
// jump target per compiled lambda. Jump legality is decided against the
// nearest common ancestor of the jump site and the definition site:
// control can never leave a finally or a filter, can never enter a try or
// a bare expression, and a value-carrying label only accepts jumps that
// stay inside its own scope chain.
//
// The chosen jump form is the cheapest valid one: a direct return when the
// label is the method's tail return point, a plain branch when no
// protected region is crossed, and a stack-clearing leave otherwise.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::errors::{CompileError, CompileErrorKind};
use crate::runtime::{Instr, InstrSink, LabelId, LocalId};
use crate::tree::{LabelRef, NodeKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LabelScopeKind {
    /// A construct that freely admits jumps into it (loops and other
    /// statement-shaped nodes).
    Statement,
    Block,
    Switch,
    Lambda,
    Try,
    Catch,
    Finally,
    Filter,
    /// The default classification for any sub-expression; cannot be
    /// jumped into.
    Expression,
}

impl LabelScopeKind {
    fn can_jump_into(self) -> bool {
        matches!(
            self,
            LabelScopeKind::Statement
                | LabelScopeKind::Block
                | LabelScopeKind::Switch
                | LabelScopeKind::Lambda
        )
    }
}

/// One node of the traversal-time scope chain. Ephemeral; rebuilt on every
/// codegen pass.
pub(crate) struct LabelScopeInfo {
    pub parent: Option<Rc<LabelScopeInfo>>,
    pub kind: LabelScopeKind,
    targets: RefCell<FxHashSet<NodeKey>>,
}

impl LabelScopeInfo {
    pub fn new(parent: Option<Rc<LabelScopeInfo>>, kind: LabelScopeKind) -> Rc<LabelScopeInfo> {
        Rc::new(LabelScopeInfo {
            parent,
            kind,
            targets: RefCell::new(FxHashSet::default()),
        })
    }

    pub fn contains_target(&self, key: NodeKey) -> bool {
        self.targets.borrow().contains(&key)
    }

    fn add_target(&self, key: NodeKey) {
        self.targets.borrow_mut().insert(key);
    }
}

/// Walks `b`'s chain upward until it meets an ancestor of `a`.
fn common_node(a: &Rc<LabelScopeInfo>, b: &Rc<LabelScopeInfo>) -> Option<Rc<LabelScopeInfo>> {
    let mut ancestors: Vec<*const LabelScopeInfo> = Vec::new();
    let mut cur = Some(a.clone());
    while let Some(s) = cur {
        ancestors.push(Rc::as_ptr(&s));
        cur = s.parent.clone();
    }
    let mut cur = Some(b.clone());
    while let Some(s) = cur {
        if ancestors.contains(&Rc::as_ptr(&s)) {
            return Some(s);
        }
        cur = s.parent.clone();
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JumpForm {
    Ret,
    Branch,
    Leave,
}

/// One jump target within the lambda being compiled.
pub(crate) struct LabelInfo {
    target: LabelRef,
    label: Option<LabelId>,
    /// Sink label currently open for marking; redefinition invalidates it.
    label_open: bool,
    value_local: Option<LocalId>,
    definitions: SmallVec<[Rc<LabelScopeInfo>; 1]>,
    references: Vec<Rc<LabelScopeInfo>>,
    across_block_jump: bool,
    form: JumpForm,
    can_return: bool,
}

impl LabelInfo {
    pub fn new(target: &LabelRef) -> LabelInfo {
        LabelInfo {
            target: target.clone(),
            label: None,
            label_open: false,
            value_local: None,
            definitions: SmallVec::new(),
            references: Vec::new(),
            across_block_jump: false,
            form: JumpForm::Leave,
            can_return: false,
        }
    }

    fn name(&self) -> String {
        self.target.display_name().to_owned()
    }

    pub fn mark_can_return(&mut self) {
        self.can_return = true;
    }

    pub fn is_defined(&self) -> bool {
        !self.definitions.is_empty()
    }

    /// Records a jump from `block`; validates it if the label is already
    /// defined, otherwise validation is deferred to the definition.
    pub fn reference(&mut self, block: &Rc<LabelScopeInfo>) -> Result<(), CompileError> {
        self.references.push(block.clone());
        if !self.definitions.is_empty() {
            self.validate_jump(block)?;
        }
        Ok(())
    }

    /// Records a definition in `block`. A label may be defined in several
    /// sibling scopes, but never in a scope where an enclosing definition
    /// is still visible, and never as the target of a cross-scope jump
    /// once more than one definition exists.
    pub fn define(&mut self, block: &Rc<LabelScopeInfo>) -> Result<(), CompileError> {
        let key = NodeKey::label(&self.target);
        let mut cur = Some(block.clone());
        while let Some(s) = cur {
            if s.contains_target(key) {
                return Err(CompileErrorKind::LabelAlreadyDefined { label: self.name() }.into());
            }
            cur = s.parent.clone();
        }
        self.definitions.push(block.clone());
        block.add_target(key);

        if self.definitions.len() == 1 {
            for r in self.references.clone() {
                self.validate_jump(&r)?;
            }
        } else {
            if self.across_block_jump {
                return Err(CompileErrorKind::AmbiguousJump { label: self.name() }.into());
            }
            // Local jumps only from here on; the next mark gets a fresh
            // sink label.
            self.label_open = false;
        }
        Ok(())
    }

    fn validate_jump(&mut self, reference: &Rc<LabelScopeInfo>) -> Result<(), CompileError> {
        self.form = if self.can_return {
            JumpForm::Ret
        } else {
            JumpForm::Branch
        };

        // Quick pass: a jump that stays inside already-open constructs.
        let mut cur = Some(reference.clone());
        while let Some(s) = cur {
            if self.definitions.iter().any(|d| Rc::ptr_eq(d, &s)) {
                return Ok(());
            }
            match s.kind {
                LabelScopeKind::Finally | LabelScopeKind::Filter => break,
                LabelScopeKind::Try | LabelScopeKind::Catch => self.form = JumpForm::Leave,
                _ => {}
            }
            cur = s.parent.clone();
        }

        self.across_block_jump = true;
        if !self.target.ty.is_void() {
            return Err(CompileErrorKind::NonLocalJumpWithValue { label: self.name() }.into());
        }
        if self.definitions.len() > 1 {
            return Err(CompileErrorKind::AmbiguousJump { label: self.name() }.into());
        }

        let def = self.definitions[0].clone();
        let common = common_node(&def, reference)
            .ok_or_else(|| CompileError::internal("jump site and label share no scope chain"))?;

        self.form = if self.can_return {
            JumpForm::Ret
        } else {
            JumpForm::Branch
        };
        let mut cur = Some(reference.clone());
        while let Some(s) = cur {
            if Rc::ptr_eq(&s, &common) {
                break;
            }
            match s.kind {
                LabelScopeKind::Finally => {
                    return Err(CompileErrorKind::CannotLeaveFinally { label: self.name() }.into());
                }
                LabelScopeKind::Filter => {
                    return Err(CompileErrorKind::CannotLeaveFilter { label: self.name() }.into());
                }
                LabelScopeKind::Try | LabelScopeKind::Catch => self.form = JumpForm::Leave,
                _ => {}
            }
            cur = s.parent.clone();
        }
        let mut cur = Some(def);
        while let Some(s) = cur {
            if Rc::ptr_eq(&s, &common) {
                break;
            }
            if !s.kind.can_jump_into() {
                let err = if s.kind == LabelScopeKind::Expression {
                    CompileErrorKind::CannotJumpIntoExpression { label: self.name() }
                } else {
                    CompileErrorKind::CannotJumpIntoTry { label: self.name() }
                };
                return Err(err.into());
            }
            cur = s.parent.clone();
        }
        Ok(())
    }

    fn ensure_label_and_value(&mut self, sink: &mut dyn InstrSink) {
        if !self.label_open {
            self.label = Some(sink.def_label());
            self.label_open = true;
        }
        if self.value_local.is_none() && !self.target.ty.is_void() {
            self.value_local = Some(sink.declare_local(self.target.ty.clone()));
        }
    }

    /// Emits the jump; any carried value must already be on the stack.
    pub fn emit_jump(&mut self, sink: &mut dyn InstrSink) {
        if self.form == JumpForm::Ret {
            sink.emit(Instr::Ret);
            return;
        }
        self.ensure_label_and_value(sink);
        if let Some(local) = self.value_local {
            sink.emit(Instr::StoreLocal(local));
        }
        let label = self.label.expect("label allocated above");
        match self.form {
            JumpForm::Branch => sink.emit(Instr::Branch(label)),
            JumpForm::Leave => sink.emit(Instr::Leave(label)),
            JumpForm::Ret => unreachable!(),
        }
    }

    /// Marks the label. A fall-through value must already be on the stack
    /// (for non-void labels); it is reloaded after the mark so every
    /// arrival path yields it.
    pub fn mark(&mut self, sink: &mut dyn InstrSink) {
        self.ensure_label_and_value(sink);
        if let Some(local) = self.value_local {
            sink.emit(Instr::StoreLocal(local));
        }
        sink.mark(self.label.expect("label allocated above"));
        if let Some(local) = self.value_local {
            sink.emit(Instr::LoadLocal(local));
        }
    }

    /// Marks a label that can only be reached by jumping (no fall-through
    /// value on the stack).
    pub fn mark_with_empty_stack(&mut self, sink: &mut dyn InstrSink) {
        self.ensure_label_and_value(sink);
        sink.mark(self.label.expect("label allocated above"));
        if let Some(local) = self.value_local {
            sink.emit(Instr::LoadLocal(local));
        }
    }

    /// A referenced-but-never-defined label is a contract violation.
    pub fn validate_finish(&self) -> Result<(), CompileError> {
        if !self.references.is_empty() && self.definitions.is_empty() {
            return Err(CompileErrorKind::LabelUndefined { label: self.name() }.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Expr, Ty};

    fn chain(kinds: &[LabelScopeKind]) -> Rc<LabelScopeInfo> {
        let mut scope = LabelScopeInfo::new(None, LabelScopeKind::Lambda);
        for &k in kinds {
            scope = LabelScopeInfo::new(Some(scope), k);
        }
        scope
    }

    #[test]
    fn jump_within_open_blocks_is_a_plain_branch() {
        let root = chain(&[LabelScopeKind::Block]);
        let target = Expr::label_target("l", Ty::Void);
        let mut info = LabelInfo::new(&target);
        info.define(&root).unwrap();
        let inner = LabelScopeInfo::new(Some(root), LabelScopeKind::Block);
        info.reference(&inner).unwrap();
        assert_eq!(info.form, JumpForm::Branch);
    }

    #[test]
    fn jump_out_of_a_try_becomes_a_leave() {
        let block = chain(&[LabelScopeKind::Block]);
        let target = Expr::label_target("l", Ty::Void);
        let mut info = LabelInfo::new(&target);
        info.define(&block).unwrap();
        let in_try = LabelScopeInfo::new(Some(block), LabelScopeKind::Try);
        info.reference(&in_try).unwrap();
        assert_eq!(info.form, JumpForm::Leave);
    }

    #[test]
    fn jump_into_a_try_is_rejected() {
        let block = chain(&[LabelScopeKind::Block]);
        let in_try = LabelScopeInfo::new(Some(block.clone()), LabelScopeKind::Try);
        let target = Expr::label_target("l", Ty::Void);
        let mut info = LabelInfo::new(&target);
        info.define(&in_try).unwrap();
        let err = info.reference(&block).unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::CannotJumpIntoTry { .. }
        ));
    }

    #[test]
    fn cannot_leave_a_finally() {
        let block = chain(&[LabelScopeKind::Block]);
        let target = Expr::label_target("l", Ty::Void);
        let mut info = LabelInfo::new(&target);
        info.define(&block).unwrap();
        let in_finally = LabelScopeInfo::new(Some(block), LabelScopeKind::Finally);
        let err = info.reference(&in_finally).unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::CannotLeaveFinally { .. }
        ));
    }

    #[test]
    fn value_carrying_jump_across_blocks_is_rejected() {
        let root = chain(&[]);
        let a = LabelScopeInfo::new(Some(root.clone()), LabelScopeKind::Block);
        let b = LabelScopeInfo::new(Some(root), LabelScopeKind::Block);
        let target = Expr::label_target("l", Ty::I32);
        let mut info = LabelInfo::new(&target);
        info.define(&a).unwrap();
        let err = info.reference(&b).unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::NonLocalJumpWithValue { .. }
        ));
    }

    #[test]
    fn two_definitions_with_a_cross_scope_jump_are_ambiguous() {
        let root = chain(&[]);
        let a = LabelScopeInfo::new(Some(root.clone()), LabelScopeKind::Block);
        let b = LabelScopeInfo::new(Some(root.clone()), LabelScopeKind::Block);
        let target = Expr::label_target("l", Ty::Void);
        let mut info = LabelInfo::new(&target);
        info.define(&a).unwrap();
        // A jump from an unrelated scope crosses out of `a`'s chain.
        info.reference(&b).unwrap();
        let err = info.define(&b).unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::AmbiguousJump { .. }));
    }

    #[test]
    fn shadowing_an_enclosing_definition_is_rejected() {
        let outer = chain(&[LabelScopeKind::Block]);
        let inner = LabelScopeInfo::new(Some(outer.clone()), LabelScopeKind::Block);
        let target = Expr::label_target("l", Ty::Void);
        let mut info = LabelInfo::new(&target);
        info.define(&outer).unwrap();
        let err = info.define(&inner).unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::LabelAlreadyDefined { .. }
        ));
    }

    #[test]
    fn referenced_but_undefined_fails_at_finish() {
        let root = chain(&[]);
        let target = Expr::label_target("l", Ty::Void);
        let mut info = LabelInfo::new(&target);
        info.reference(&root).unwrap();
        let err = info.validate_finish().unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::LabelUndefined { .. }));
    }
}
