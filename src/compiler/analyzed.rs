// src/compiler/analyzed.rs
//
// The binder's output artifact: scope descriptors keyed by scope-bearing
// node, and one bound-constants collector per lambda. Built once per
// top-level compile; the code generator only mutates the scopes'
// activation state and the constant caches.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::errors::CompileError;
use crate::tree::NodeKey;

use super::constants::BoundConstants;
use super::scope::CompilerScope;

#[derive(Debug, Default)]
pub(crate) struct AnalyzedTree {
    pub scopes: FxHashMap<NodeKey, Rc<RefCell<CompilerScope>>>,
    pub constants: FxHashMap<NodeKey, Rc<RefCell<BoundConstants>>>,
}

impl AnalyzedTree {
    pub fn scope(&self, key: NodeKey) -> Result<Rc<RefCell<CompilerScope>>, CompileError> {
        self.scopes
            .get(&key)
            .cloned()
            .ok_or_else(|| CompileError::internal("scope-bearing node has no scope descriptor"))
    }

    pub fn constants_of(&self, lambda: NodeKey) -> Result<Rc<RefCell<BoundConstants>>, CompileError> {
        self.constants
            .get(&lambda)
            .cloned()
            .ok_or_else(|| CompileError::internal("lambda has no bound-constants collector"))
    }
}
