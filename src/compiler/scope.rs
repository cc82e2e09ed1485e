// src/compiler/scope.rs
//
// Compiler scopes and hoisted locals. The binder creates one `CompilerScope`
// per scope-bearing node (lambda, block with variables, catch with a bound
// variable) and classifies each variable as frame-local or hoisted. The
// code generator then activates scopes with `enter`/`exit`; the same scope
// object can be activated more than once in one compile, so all
// per-activation state is cleared on exit.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::runtime::LocalId;
use crate::tree::{Expr, NodeKey, ParamRef, Ty};

/// Where a variable's value lives, decided by the binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarStorage {
    /// A frame local or argument slot.
    Local,
    /// An element of the scope's hoisted-locals array, each element its own
    /// shared heap cell.
    Hoisted,
}

/// A resolved storage location, produced at codegen time. Cell-shaped
/// storages load the cell first and go through it.
#[derive(Debug, Clone)]
pub(crate) enum Storage {
    Local(LocalId),
    Argument(u16),
    /// A by-ref parameter: the argument slot holds the cell the caller
    /// aliased.
    BoxedArgument(u16),
    /// Element `index` of the hoisted array reached by loading `array`.
    /// Resolving a parent frame's variable nests these: the parent array is
    /// itself element 0 of the child's array.
    ElementBox { index: u32, array: Rc<Storage> },
    /// A hoisted cell cached in a frame local (the reference-count
    /// heuristic).
    LocalBox(LocalId),
    /// The closure frame the current method was constructed with.
    Frame,
}

/// One hoisted-locals frame: the compile-time descriptor of the runtime
/// array of cells allocated when its owning scope is entered. Immutable.
/// When a parent frame exists, slot 0 holds the parent array (boxed like
/// every other slot) and `vars[0]` is the parent's self variable.
#[derive(Debug)]
pub(crate) struct HoistedLocals {
    pub parent: Option<Rc<HoistedLocals>>,
    /// Slot order; contiguous indexes 0..N.
    pub vars: Vec<ParamRef>,
    pub indexes: FxHashMap<NodeKey, u32>,
    /// Synthetic variable standing for the array itself; resolving it
    /// yields the storage of the array (a frame local, a slot in a child
    /// array, or the closure frame).
    pub self_var: ParamRef,
}

impl HoistedLocals {
    pub fn new(parent: Option<Rc<HoistedLocals>>, hoisted: Vec<ParamRef>) -> Rc<HoistedLocals> {
        let mut vars = Vec::with_capacity(hoisted.len() + 1);
        if let Some(p) = &parent {
            vars.push(p.self_var.clone());
        }
        vars.extend(hoisted);
        let indexes = vars
            .iter()
            .enumerate()
            .map(|(i, v)| (NodeKey::param(v), i as u32))
            .collect();
        Rc::new(HoistedLocals {
            parent,
            vars,
            indexes,
            self_var: Expr::variable("$frame", Ty::array(Ty::Object)),
        })
    }
}

/// One lexical scope. Built by the binder, activated by the code generator.
#[derive(Debug)]
pub(crate) struct CompilerScope {
    pub key: NodeKey,
    pub is_lambda: bool,
    /// Variables defined directly in this scope, in declaration order.
    pub vars: Vec<ParamRef>,
    /// Binder classification per defined variable.
    pub definitions: FxHashMap<NodeKey, VarStorage>,
    /// Reference counts, for the cell-caching heuristic.
    pub ref_count: FxHashMap<NodeKey, u32>,
    /// Set when this scope, or one nested in it, reaches an enclosing
    /// frame's variable; the scope must then thread the closure frame.
    pub needs_closure: bool,

    // Activation state below; valid only between enter and exit.
    pub(crate) parent: Option<Rc<std::cell::RefCell<CompilerScope>>>,
    pub(crate) nearest_hoisted: Option<Rc<HoistedLocals>>,
    pub(crate) locals: FxHashMap<NodeKey, Storage>,
}

impl CompilerScope {
    pub fn new(key: NodeKey, is_lambda: bool) -> CompilerScope {
        CompilerScope {
            key,
            is_lambda,
            vars: Vec::new(),
            definitions: FxHashMap::default(),
            ref_count: FxHashMap::default(),
            needs_closure: false,
            parent: None,
            nearest_hoisted: None,
            locals: FxHashMap::default(),
        }
    }

    pub fn declare(&mut self, var: &ParamRef) {
        let key = NodeKey::param(var);
        debug_assert!(
            !self.definitions.contains_key(&key),
            "variable '{}' declared twice in one scope",
            var.display_name()
        );
        self.vars.push(var.clone());
        self.definitions.insert(key, VarStorage::Local);
    }

    pub fn defines(&self, var: &ParamRef) -> bool {
        self.definitions.contains_key(&NodeKey::param(var))
    }

    pub fn note_reference(&mut self, var: &ParamRef) {
        *self.ref_count.entry(NodeKey::param(var)).or_insert(0) += 1;
    }

    /// Hoisting is monotonic: once hoisted, never local again.
    pub fn hoist(&mut self, var: &ParamRef) {
        self.definitions
            .insert(NodeKey::param(var), VarStorage::Hoisted);
    }

    pub fn hoisted_vars(&self) -> Vec<ParamRef> {
        self.vars
            .iter()
            .filter(|v| self.definitions[&NodeKey::param(v)] == VarStorage::Hoisted)
            .cloned()
            .collect()
    }

    pub fn has_hoisted(&self) -> bool {
        self.definitions.values().any(|s| *s == VarStorage::Hoisted)
    }

    /// Whether a hoisted variable's cell is worth caching in a frame local.
    pub fn should_cache(&self, var: &ParamRef) -> bool {
        self.ref_count
            .get(&NodeKey::param(var))
            .is_some_and(|&n| n > 2)
    }

    /// Clears per-activation state so the scope can be entered again.
    pub fn deactivate(&mut self) {
        self.parent = None;
        self.nearest_hoisted = None;
        self.locals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoisted_indexes_are_contiguous_with_parent_at_zero() {
        let a = Expr::variable("a", Ty::I32);
        let b = Expr::variable("b", Ty::I64);
        let outer = HoistedLocals::new(None, vec![a.clone()]);
        let inner = HoistedLocals::new(Some(outer.clone()), vec![b.clone()]);

        assert_eq!(outer.indexes[&NodeKey::param(&a)], 0);
        assert_eq!(inner.indexes[&NodeKey::param(&outer.self_var)], 0);
        assert_eq!(inner.indexes[&NodeKey::param(&b)], 1);
        assert_eq!(inner.vars.len(), 2);
    }

    #[test]
    fn hoisting_is_monotonic() {
        let v = Expr::variable("v", Ty::I32);
        let mut scope = CompilerScope::new(NodeKey::param(&v), false);
        scope.declare(&v);
        assert_eq!(scope.definitions[&NodeKey::param(&v)], VarStorage::Local);
        scope.hoist(&v);
        scope.note_reference(&v);
        assert_eq!(scope.definitions[&NodeKey::param(&v)], VarStorage::Hoisted);
        assert_eq!(scope.hoisted_vars().len(), 1);
    }
}
