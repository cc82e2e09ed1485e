// src/compiler/spill/children.rs
//
// Rewrites the children of one value-producing node, threading the stack
// state left to right. When any child demands a spill, every child up to
// and including the last spilling one is evaluated into a temp first, and
// the parent is rebuilt over temp reads inside a comma block. Children
// whose evaluation cannot observe the stack (constants, defaults, readonly
// static loads) are left in place.

use crate::errors::CompileError;
use crate::tree::{Expr, ExprKind, ExprRef, FieldExpr, IndexExpr};

use super::{remake, RewriteAction, Rewritten, StackSpiller, StackState};

pub(super) struct ChildRewriter<'s> {
    spiller: &'s mut StackSpiller,
    stack: StackState,
    action: RewriteAction,
    expressions: Vec<ExprRef>,
    actions: Vec<RewriteAction>,
    by_ref: Vec<bool>,
}

impl<'s> ChildRewriter<'s> {
    pub fn new(spiller: &'s mut StackSpiller, stack: StackState) -> ChildRewriter<'s> {
        ChildRewriter {
            spiller,
            stack,
            action: RewriteAction::None,
            expressions: Vec::new(),
            actions: Vec::new(),
            by_ref: Vec::new(),
        }
    }

    pub fn add(&mut self, expr: &ExprRef) -> Result<(), CompileError> {
        self.push(expr, false)
    }

    /// Adds a by-ref argument. If spilling hits it, only the components of
    /// the lvalue are spilled so the call still writes through the original
    /// location.
    pub fn add_by_ref(&mut self, expr: &ExprRef) -> Result<(), CompileError> {
        self.push(expr, true)
    }

    fn push(&mut self, expr: &ExprRef, by_ref: bool) -> Result<(), CompileError> {
        let r = self.spiller.rewrite(expr, self.stack)?;
        self.action = self.action.union(r.action);
        // Whatever this child leaves behind is on the stack for the next.
        self.stack = StackState::NonEmpty;
        self.actions.push(r.action);
        self.expressions.push(r.node);
        self.by_ref.push(by_ref);
        Ok(())
    }

    pub fn finish(
        mut self,
        original: &ExprRef,
        rebuild: impl FnOnce(Vec<ExprRef>) -> ExprRef,
    ) -> Result<Rewritten, CompileError> {
        match self.action {
            RewriteAction::None => Ok(Rewritten::unchanged(original)),
            RewriteAction::Copy => Ok(Rewritten {
                action: RewriteAction::Copy,
                node: rebuild(self.expressions),
            }),
            RewriteAction::SpillStack => {
                let last = self
                    .actions
                    .iter()
                    .rposition(|a| *a == RewriteAction::SpillStack)
                    .ok_or_else(|| {
                        CompileError::internal("spill requested with no spilling child")
                    })?;
                let mut comma = Vec::with_capacity(last + 2);
                for i in 0..=last {
                    if self.spiller.is_stack_blind(&self.expressions[i]) {
                        continue;
                    }
                    if self.by_ref[i] {
                        self.spill_lvalue_components(i, &mut comma)?;
                    } else {
                        let child = self.expressions[i].clone();
                        self.expressions[i] = self.spiller.to_temp(&child, &mut comma);
                    }
                }
                comma.push(rebuild(self.expressions));
                Ok(Rewritten {
                    action: RewriteAction::SpillStack,
                    node: Expr::block(Vec::new(), comma),
                })
            }
        }
    }

    /// Spills the pieces of a by-ref lvalue, keeping the lvalue shape.
    /// Variables and static fields need no spilling at all; for an element
    /// or instance field the container and index move into temps and the
    /// access node is rebuilt over them.
    fn spill_lvalue_components(
        &mut self,
        i: usize,
        comma: &mut Vec<ExprRef>,
    ) -> Result<(), CompileError> {
        let child = self.expressions[i].clone();
        match &child.kind {
            ExprKind::Parameter(_) => {}
            ExprKind::Field(f) if f.object.is_none() => {}
            ExprKind::Field(f) => {
                let object = f.object.as_ref().ok_or_else(|| {
                    CompileError::internal("instance field lost its object")
                })?;
                let object = self.spiller.to_temp(object, comma);
                self.expressions[i] = remake(
                    &child,
                    ExprKind::Field(FieldExpr {
                        object: Some(object),
                        field: f.field,
                    }),
                );
            }
            ExprKind::Index(ix) => {
                let array = self.spiller.to_temp(&ix.array, comma);
                let index = self.spiller.to_temp(&ix.index, comma);
                self.expressions[i] =
                    remake(&child, ExprKind::Index(IndexExpr { array, index }));
            }
            // Not addressable; degrade to by-value spilling.
            _ => {
                self.expressions[i] = self.spiller.to_temp(&child, comma);
            }
        }
        Ok(())
    }
}
