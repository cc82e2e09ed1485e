// src/compiler/delegates.rs
//
// The signature cache. Delegate-shaped types are interned so that two
// lambdas with the same parameter list and return type share one
// `Signature` allocation and compare by pointer. The cache is a trie keyed
// by successive parameter types, then return type; append-only, no
// eviction.
//
// Trees and signatures are `Rc`-shared and never cross threads, so the
// cache lives per thread rather than behind a process-wide lock; the
// insert-if-absent idempotence the callers rely on holds the same way.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::tree::{Signature, SignatureData, Ty};

#[derive(Default)]
struct TrieNode {
    children: FxHashMap<Ty, TrieNode>,
    /// Leaves, keyed by return type.
    signatures: FxHashMap<Ty, Signature>,
}

#[derive(Default)]
struct SignatureTrie {
    root: TrieNode,
}

impl SignatureTrie {
    fn intern(&mut self, params: Vec<Ty>, ret: Ty) -> Signature {
        let mut node = &mut self.root;
        for p in &params {
            node = node.children.entry(p.clone()).or_default();
        }
        node.signatures
            .entry(ret.clone())
            .or_insert_with(|| Rc::new(SignatureData { params, ret }))
            .clone()
    }
}

thread_local! {
    static CACHE: RefCell<SignatureTrie> = RefCell::new(SignatureTrie::default());
}

/// Interns a signature. Equal shapes return the same `Rc`.
pub fn signature(params: Vec<Ty>, ret: Ty) -> Signature {
    CACHE.with(|cache| cache.borrow_mut().intern(params, ret))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_shapes_share_one_allocation() {
        let a = signature(vec![Ty::I32, Ty::I32], Ty::I64);
        let b = signature(vec![Ty::I32, Ty::I32], Ty::I64);
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_shapes_get_distinct_signatures() {
        let a = signature(vec![Ty::I32], Ty::I32);
        let b = signature(vec![Ty::I32], Ty::I64);
        let c = signature(vec![Ty::I64], Ty::I32);
        assert!(!Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(b.ret, Ty::I64);
    }

    #[test]
    fn prefix_shapes_do_not_collide() {
        let a = signature(vec![], Ty::Void);
        let b = signature(vec![Ty::Void], Ty::Void);
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(a.params.len(), 0);
        assert_eq!(b.params.len(), 1);
    }
}
