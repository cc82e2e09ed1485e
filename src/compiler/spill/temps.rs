// src/compiler/spill/temps.rs
//
// Pooled spill temporaries. Temps are reused across sibling rewrites via a
// mark/free watermark; every temp ever created is declared once in the
// block wrapped around the rewritten lambda body.

use rustc_hash::FxHashMap;

use crate::tree::{Expr, ParamRef, Ty};

#[derive(Default)]
pub(super) struct TempMaker {
    made: u32,
    /// Every temp created for this lambda, for the root declaration.
    all: Vec<ParamRef>,
    free: FxHashMap<Ty, Vec<ParamRef>>,
    /// Allocation stack; `mark`/`free` operate on its length.
    used: Vec<ParamRef>,
}

impl TempMaker {
    pub fn temp(&mut self, ty: &Ty) -> ParamRef {
        let var = match self.free.get_mut(ty).and_then(|pool| pool.pop()) {
            Some(var) => var,
            None => {
                let var = Expr::variable(&format!("$temp${}", self.made), ty.clone());
                self.made += 1;
                self.all.push(var.clone());
                var
            }
        };
        self.used.push(var.clone());
        var
    }

    pub fn mark(&self) -> usize {
        self.used.len()
    }

    /// Returns every temp allocated since `mark` to the pool.
    pub fn free(&mut self, mark: usize) {
        while self.used.len() > mark {
            let var = self.used.pop().expect("watermark below zero");
            self.free.entry(var.ty.clone()).or_default().push(var);
        }
    }

    pub fn all(&self) -> &[ParamRef] {
        &self.all
    }

    /// The pool must be fully reclaimed after each top-level lambda.
    pub fn verify(&self) {
        debug_assert!(
            self.used.is_empty(),
            "{} spill temps leaked past the lambda rewrite",
            self.used.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_temps_are_reused_by_type() {
        let mut tm = TempMaker::default();
        let mark = tm.mark();
        let a = tm.temp(&Ty::I32);
        tm.free(mark);
        let b = tm.temp(&Ty::I32);
        let c = tm.temp(&Ty::I32);
        assert!(std::rc::Rc::ptr_eq(&a, &b));
        assert!(!std::rc::Rc::ptr_eq(&b, &c));
        assert_eq!(tm.all().len(), 2);
    }

    #[test]
    fn pool_balances_back_to_empty() {
        let mut tm = TempMaker::default();
        let outer = tm.mark();
        tm.temp(&Ty::I64);
        let inner = tm.mark();
        tm.temp(&Ty::I64);
        tm.temp(&Ty::Bool);
        tm.free(inner);
        tm.temp(&Ty::I64);
        tm.free(outer);
        tm.verify();
    }
}
