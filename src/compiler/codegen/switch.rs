// src/compiler/codegen/switch.rs
//
// Switch lowering. Three strategies, tried in order:
//   1. all-constant integral cases with distinct keys become dense jump
//      tables, grouped into buckets (a bucket must be more than half full)
//      selected by a binary search over bucket split points;
//   2. seven or more distinct constant string cases go through a hash
//      lookup that yields a jump-table index;
//   3. anything else degrades to a linear sequence of equality tests,
//      which also preserves first-match semantics for duplicate keys.

use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::errors::CompileError;
use crate::runtime::{
    CmpOp, Instr, InstrSink, LabelId, LocalId, StringSwitchTable, Value,
};
use crate::tree::{ExprKind, ExprRef, NumTy, SwitchExpr, Ty};

use super::LambdaCompiler;

/// Cases per bucket tail merge threshold; see `fits_in_bucket`.
const STRING_SWITCH_MIN_CASES: usize = 7;

impl<'a> LambdaCompiler<'a> {
    pub(super) fn emit_switch(
        &mut self,
        node: &ExprRef,
        s: &SwitchExpr,
        as_void: bool,
    ) -> Result<(), CompileError> {
        let value = !as_void && !node.ty.is_void();
        self.emit(&s.value)?;
        let val = self.get_local(Ty::Object);
        self.writer.emit(Instr::StoreLocal(val));

        let end = self.writer.def_label();
        let default_l = self.writer.def_label();
        let case_labels: Vec<LabelId> = s.cases.iter().map(|_| self.writer.def_label()).collect();

        let dispatched = self.try_emit_table_switch(s, val, &case_labels, default_l)?
            || self.try_emit_string_switch(s, val, &case_labels)?;
        if !dispatched {
            self.emit_linear_switch(s, val, &case_labels)?;
        }
        self.writer.emit(Instr::Branch(default_l));

        let result = if value {
            Some(self.get_local(Ty::Object))
        } else {
            None
        };
        for (j, case) in s.cases.iter().enumerate() {
            self.writer.mark(case_labels[j]);
            self.emit_case_body(&case.body, result)?;
            self.writer.emit(Instr::Branch(end));
        }
        self.writer.mark(default_l);
        match &s.default {
            Some(d) => self.emit_case_body(d, result)?,
            None => {
                if let Some(local) = result {
                    self.writer.emit(Instr::Push(Value::default_of(&node.ty)));
                    self.writer.emit(Instr::StoreLocal(local));
                }
            }
        }
        self.writer.mark(end);
        if let Some(local) = result {
            self.writer.emit(Instr::LoadLocal(local));
            self.free_local(Ty::Object, local);
        }
        self.free_local(Ty::Object, val);
        Ok(())
    }

    fn emit_case_body(
        &mut self,
        body: &ExprRef,
        result: Option<LocalId>,
    ) -> Result<(), CompileError> {
        match result {
            Some(local) => {
                self.emit(body)?;
                self.writer.emit(Instr::StoreLocal(local));
                Ok(())
            }
            None => self.emit_as_void(body),
        }
    }

    fn try_emit_table_switch(
        &mut self,
        s: &SwitchExpr,
        val: LocalId,
        case_labels: &[LabelId],
        default_l: LabelId,
    ) -> Result<bool, CompileError> {
        let Some(ty) = s.value.ty.num_ty() else {
            return Ok(false);
        };
        if !ty.is_integral() {
            return Ok(false);
        }
        let mut keys: Vec<(i128, usize)> = Vec::new();
        let mut seen = FxHashSet::default();
        for (j, case) in s.cases.iter().enumerate() {
            for v in &case.values {
                let ExprKind::Constant(c) = &v.kind else {
                    return Ok(false);
                };
                let Some(k) = switch_key(c) else {
                    return Ok(false);
                };
                if !seen.insert(k) {
                    return Ok(false);
                }
                keys.push((k, j));
            }
        }
        if keys.is_empty() {
            return Ok(false);
        }
        keys.sort_unstable_by_key(|&(k, _)| k);
        let mut buckets: Vec<Vec<(i128, usize)>> = Vec::new();
        for key in keys {
            add_to_buckets(&mut buckets, key);
        }
        let last = buckets.len() - 1;
        self.emit_switch_buckets(&buckets, 0, last, val, ty, case_labels, default_l)?;
        Ok(true)
    }

    /// Binary search over buckets: compare against the last key of the
    /// left half's final bucket, recurse into each side.
    #[allow(clippy::too_many_arguments)]
    fn emit_switch_buckets(
        &mut self,
        buckets: &[Vec<(i128, usize)>],
        first: usize,
        last: usize,
        val: LocalId,
        ty: NumTy,
        case_labels: &[LabelId],
        default_l: LabelId,
    ) -> Result<(), CompileError> {
        if first == last {
            return self.emit_switch_bucket(&buckets[first], val, ty, case_labels, default_l);
        }
        let mid = (first + last + 1) / 2;
        if first == mid - 1 {
            self.emit_switch_bucket(&buckets[first], val, ty, case_labels, default_l)?;
        } else {
            let second_half = self.writer.def_label();
            let split = buckets[mid - 1]
                .last()
                .ok_or_else(|| CompileError::internal("empty switch bucket"))?
                .0;
            self.writer.emit(Instr::LoadLocal(val));
            self.writer.emit(Instr::Push(key_value(ty, split)?));
            self.writer.emit(Instr::Compare { op: CmpOp::Gt, ty });
            self.writer.emit(Instr::BranchTrue(second_half));
            self.emit_switch_buckets(buckets, first, mid - 1, val, ty, case_labels, default_l)?;
            self.writer.mark(second_half);
        }
        self.emit_switch_buckets(buckets, mid, last, val, ty, case_labels, default_l)
    }

    fn emit_switch_bucket(
        &mut self,
        bucket: &[(i128, usize)],
        val: LocalId,
        ty: NumTy,
        case_labels: &[LabelId],
        default_l: LabelId,
    ) -> Result<(), CompileError> {
        if let [(key, j)] = bucket {
            self.writer.emit(Instr::LoadLocal(val));
            self.writer.emit(Instr::Push(key_value(ty, *key)?));
            self.writer.emit(Instr::Compare { op: CmpOp::Eq, ty });
            self.writer.emit(Instr::BranchTrue(case_labels[*j]));
            return Ok(());
        }
        let first = bucket
            .first()
            .ok_or_else(|| CompileError::internal("empty switch bucket"))?
            .0;
        let last = bucket
            .last()
            .ok_or_else(|| CompileError::internal("empty switch bucket"))?
            .0;
        let after = self.writer.def_label();
        // Range guard in the value's own type, then the table index is
        // computed in i64; in-range differences survive the wrapping cast
        // because the bucket span is small.
        self.writer.emit(Instr::LoadLocal(val));
        self.writer.emit(Instr::Push(key_value(ty, last)?));
        self.writer.emit(Instr::Compare { op: CmpOp::Gt, ty });
        self.writer.emit(Instr::BranchTrue(after));
        self.writer.emit(Instr::LoadLocal(val));
        self.writer.emit(Instr::Push(key_value(ty, first)?));
        self.writer.emit(Instr::Compare { op: CmpOp::Lt, ty });
        self.writer.emit(Instr::BranchTrue(after));
        self.writer.emit(Instr::LoadLocal(val));
        if ty != NumTy::I64 {
            self.writer.emit(Instr::Conv {
                to: NumTy::I64,
                overflow: crate::runtime::Overflow::None,
            });
        }
        self.writer.emit(Instr::Push(Value::I64(first as i64)));
        self.writer.emit(Instr::Arith {
            op: crate::runtime::ArithOp::Sub,
            ty: NumTy::I64,
            checked: false,
        });
        self.writer.emit(Instr::Conv {
            to: NumTy::I32,
            overflow: crate::runtime::Overflow::None,
        });
        let slots = (last - first + 1) as usize;
        let mut targets = vec![default_l; slots];
        for (k, j) in bucket {
            targets[(k - first) as usize] = case_labels[*j];
        }
        self.writer.emit(Instr::TableSwitch { targets });
        self.writer.mark(after);
        Ok(())
    }

    fn try_emit_string_switch(
        &mut self,
        s: &SwitchExpr,
        val: LocalId,
        case_labels: &[LabelId],
    ) -> Result<bool, CompileError> {
        if s.value.ty != Ty::Str {
            return Ok(false);
        }
        let mut cases: Vec<Rc<str>> = Vec::new();
        let mut targets: Vec<LabelId> = Vec::new();
        let mut seen = FxHashSet::default();
        for (j, case) in s.cases.iter().enumerate() {
            for v in &case.values {
                let ExprKind::Constant(Value::Str(text)) = &v.kind else {
                    return Ok(false);
                };
                if !seen.insert(text.clone()) {
                    return Ok(false);
                }
                cases.push(text.clone());
                targets.push(case_labels[j]);
            }
        }
        if cases.len() < STRING_SWITCH_MIN_CASES {
            return Ok(false);
        }
        self.writer.emit(Instr::LoadLocal(val));
        self.writer
            .emit(Instr::StringSwitch(Rc::new(StringSwitchTable::new(cases))));
        self.writer.emit(Instr::TableSwitch { targets });
        Ok(true)
    }

    fn emit_linear_switch(
        &mut self,
        s: &SwitchExpr,
        val: LocalId,
        case_labels: &[LabelId],
    ) -> Result<(), CompileError> {
        for (j, case) in s.cases.iter().enumerate() {
            for v in &case.values {
                self.writer.emit(Instr::LoadLocal(val));
                self.emit(v)?;
                self.writer.emit(Instr::ValueEq);
                self.writer.emit(Instr::BranchTrue(case_labels[j]));
            }
        }
        Ok(())
    }
}

fn switch_key(value: &Value) -> Option<i128> {
    Some(match *value {
        Value::I8(v) => v as i128,
        Value::U8(v) => v as i128,
        Value::I16(v) => v as i128,
        Value::U16(v) => v as i128,
        Value::I32(v) => v as i128,
        Value::U32(v) => v as i128,
        Value::I64(v) => v as i128,
        Value::U64(v) => v as i128,
        _ => return None,
    })
}

fn key_value(ty: NumTy, key: i128) -> Result<Value, CompileError> {
    Ok(match ty {
        NumTy::I8 => Value::I8(key as i8),
        NumTy::U8 => Value::U8(key as u8),
        NumTy::I16 => Value::I16(key as i16),
        NumTy::U16 => Value::U16(key as u16),
        NumTy::I32 => Value::I32(key as i32),
        NumTy::U32 => Value::U32(key as u32),
        NumTy::I64 => Value::I64(key as i64),
        NumTy::U64 => Value::U64(key as u64),
        NumTy::F32 | NumTy::F64 => {
            return Err(CompileError::internal("jump table over floating keys"));
        }
    })
}

/// A bucket stays acceptable while it is more than half full: the number
/// of keys doubled must exceed the span they cover.
fn fits_in_bucket(first: i128, key: i128, count: usize) -> bool {
    let slots = key - first + 1;
    (count as i128) * 2 > slots
}

fn add_to_buckets(buckets: &mut Vec<Vec<(i128, usize)>>, key: (i128, usize)) {
    if let Some(last_bucket) = buckets.last_mut() {
        if fits_in_bucket(last_bucket[0].0, key.0, last_bucket.len() + 1) {
            last_bucket.push(key);
            // Growing the tail bucket may make merging with its left
            // neighbor profitable, repeatedly.
            while buckets.len() > 1 {
                let left = &buckets[buckets.len() - 2];
                let right = &buckets[buckets.len() - 1];
                let merged = left.len() + right.len();
                let first = left[0].0;
                let last = right[right.len() - 1].0;
                if fits_in_bucket(first, last, merged) {
                    let tail = buckets.pop().expect("bucket list shrank");
                    buckets
                        .last_mut()
                        .expect("bucket list shrank")
                        .extend(tail);
                } else {
                    break;
                }
            }
            return;
        }
    }
    buckets.push(vec![key]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bucket_spans(keys: &[i128]) -> Vec<Vec<i128>> {
        let mut buckets = Vec::new();
        for (i, &k) in keys.iter().enumerate() {
            add_to_buckets(&mut buckets, (k, i));
        }
        buckets
            .into_iter()
            .map(|b| b.into_iter().map(|(k, _)| k).collect())
            .collect()
    }

    #[test]
    fn dense_keys_share_one_bucket() {
        assert_eq!(
            bucket_spans(&[1, 2, 3, 5, 6]),
            vec![vec![1, 2, 3, 5, 6]]
        );
    }

    #[test]
    fn a_distant_key_starts_a_new_bucket() {
        assert_eq!(
            bucket_spans(&[1, 2, 3, 1000]),
            vec![vec![1, 2, 3], vec![1000]]
        );
    }

    #[test]
    fn tail_growth_merges_neighboring_buckets() {
        // 10..14 alone is too sparse next to 1..3 at first, but filling it
        // makes the combined range more than half full.
        assert_eq!(
            bucket_spans(&[1, 2, 3, 10, 11, 12, 13, 14]),
            vec![vec![1, 2, 3, 10, 11, 12, 13, 14]]
        );
    }

    #[test]
    fn half_full_is_not_enough() {
        // Span 8, four keys: 4 * 2 == 8 fails the strict test.
        assert_eq!(
            bucket_spans(&[1, 2, 7, 8]),
            vec![vec![1, 2], vec![7, 8]]
        );
    }
}
