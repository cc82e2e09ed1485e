// src/compiler/constants.rs
//
// Bound constants: per-lambda collection of runtime values that cannot be
// emitted as immediates (live arrays, objects, cells, delegates). The
// values land in an array bound to the compiled method at creation time;
// generated code loads slots by index. De-duplication is keyed on
// reference identity, never structural equality: two structurally equal
// but distinct objects occupy distinct slots.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::errors::CompileError;
use crate::runtime::{LocalId, Value};
use crate::tree::Ty;

#[derive(Debug, Default)]
pub(crate) struct BoundConstants {
    /// Distinct constants in first-reference order.
    values: Vec<Value>,
    /// Identity -> slot.
    indexes: FxHashMap<usize, u16>,
    /// Reference count per (identity, static type) pair; drives the
    /// cache-in-a-local heuristic.
    counts: FxHashMap<(usize, Ty), u32>,
    /// Codegen-time cache locals for hot constants.
    cached: FxHashMap<(usize, Ty), LocalId>,
}

impl BoundConstants {
    pub fn new() -> BoundConstants {
        BoundConstants::default()
    }

    fn identity(value: &Value) -> Result<usize, CompileError> {
        value
            .identity()
            .ok_or_else(|| CompileError::internal("literal-emittable value bound as constant"))
    }

    /// Records one reference to `value`, assigning a slot on first sight.
    pub fn add_reference(&mut self, value: &Value, ty: &Ty) -> Result<(), CompileError> {
        debug_assert!(!value.is_literal_emittable());
        let id = Self::identity(value)?;
        if !self.indexes.contains_key(&id) {
            let slot = u16::try_from(self.values.len())
                .map_err(|_| CompileError::internal("bound-constant table overflow"))?;
            self.indexes.insert(id, slot);
            self.values.push(value.clone());
        }
        *self.counts.entry((id, ty.clone())).or_insert(0) += 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn slot(&self, value: &Value) -> Result<u16, CompileError> {
        let id = Self::identity(value)?;
        self.indexes
            .get(&id)
            .copied()
            .ok_or_else(|| CompileError::internal("constant was never collected"))
    }

    /// Whether a reference through (value, type) is hot enough to cache in
    /// a frame local; three or more uses within one method body.
    pub fn should_cache(&self, value: &Value, ty: &Ty) -> Result<bool, CompileError> {
        let id = Self::identity(value)?;
        Ok(self
            .counts
            .get(&(id, ty.clone()))
            .is_some_and(|&n| n >= 3))
    }

    /// Pairs worth caching, in slot order, for the method prologue.
    pub fn cache_worthy(&self) -> Vec<(Value, Ty, u16)> {
        let mut out = Vec::new();
        for ((id, ty), &n) in &self.counts {
            if n >= 3 {
                let slot = self.indexes[id];
                out.push((self.values[slot as usize].clone(), ty.clone(), slot));
            }
        }
        out.sort_by_key(|&(_, _, slot)| slot);
        out
    }

    pub fn record_cached(&mut self, value: &Value, ty: &Ty, local: LocalId) -> Result<(), CompileError> {
        let id = Self::identity(value)?;
        self.cached.insert((id, ty.clone()), local);
        Ok(())
    }

    pub fn cached_local(&self, value: &Value, ty: &Ty) -> Result<Option<LocalId>, CompileError> {
        let id = Self::identity(value)?;
        Ok(self.cached.get(&(id, ty.clone())).copied())
    }

    /// The array bound to the method.
    pub fn to_array(&self) -> Rc<[Value]> {
        self.values.as_slice().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn arr() -> Value {
        Value::Array(Rc::new(RefCell::new(vec![Value::I32(1)])))
    }

    #[test]
    fn identity_keyed_dedup_keeps_distinct_equal_values_apart() {
        let mut bc = BoundConstants::new();
        let a = arr();
        let b = arr();
        let ty = Ty::array(Ty::I32);
        bc.add_reference(&a, &ty).unwrap();
        bc.add_reference(&b, &ty).unwrap();
        bc.add_reference(&a, &ty).unwrap();
        assert_eq!(bc.len(), 2);
        assert_eq!(bc.slot(&a).unwrap(), 0);
        assert_eq!(bc.slot(&b).unwrap(), 1);
    }

    #[test]
    fn cache_heuristic_needs_three_references() {
        let mut bc = BoundConstants::new();
        let a = arr();
        let ty = Ty::array(Ty::I32);
        bc.add_reference(&a, &ty).unwrap();
        bc.add_reference(&a, &ty).unwrap();
        assert!(!bc.should_cache(&a, &ty).unwrap());
        bc.add_reference(&a, &ty).unwrap();
        assert!(bc.should_cache(&a, &ty).unwrap());
        assert_eq!(bc.cache_worthy().len(), 1);
    }
}
