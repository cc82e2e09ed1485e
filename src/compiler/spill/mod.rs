// src/compiler/spill/mod.rs
//
// Stack spilling. The backend's evaluation stack does not survive entry
// into a protected region or a jump, so any construct that needs an empty
// stack (try, loop, goto, throw) appearing where operands are already
// pending forces those operands into temporaries first. The rewrite is a
// bottom-up pass over one lambda: each node reports whether it was left
// alone, copied with rewritten children, or wrapped in a spill block, and
// parents react to the strongest child action. Running the pass on its own
// output changes nothing.

mod children;
mod temps;

use std::rc::Rc;

use tracing::trace;

use crate::errors::CompileError;
use crate::runtime::Env;
use crate::tree::{
    AssignExpr, BinaryExpr, BlockExpr, CallExpr, CatchBlock, ConditionalExpr, ConvertExpr, Expr,
    ExprKind, ExprRef, FieldExpr, GotoExpr, IndexExpr, InvokeExpr, LabelExpr, LambdaExpr,
    LoopExpr, NewArrayExpr, NewExpr, SwitchCase, SwitchExpr, TryExpr, Ty, UnaryExpr,
};

use super::guard;
use children::ChildRewriter;
use temps::TempMaker;

/// How a subtree came out of the rewrite. Actions compose as a join:
/// a parent's action is at least the strongest of its children's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RewriteAction {
    /// Subtree untouched; the original node is reused.
    None = 0,
    /// Children changed, so the node was rebuilt, but no spill happened.
    Copy = 1,
    /// Somewhere below, pending operands were forced into temps.
    SpillStack = 3,
}

impl RewriteAction {
    fn union(self, other: RewriteAction) -> RewriteAction {
        match (self as u8) | (other as u8) {
            0 => RewriteAction::None,
            1 => RewriteAction::Copy,
            _ => RewriteAction::SpillStack,
        }
    }
}

/// Whether operands are already pending on the evaluation stack at the
/// point a node starts executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackState {
    Empty,
    NonEmpty,
}

struct Rewritten {
    action: RewriteAction,
    node: ExprRef,
}

impl Rewritten {
    fn unchanged(node: &ExprRef) -> Rewritten {
        Rewritten {
            action: RewriteAction::None,
            node: node.clone(),
        }
    }
}

/// Rebuilds a node with new children, keeping its static type.
fn remake(node: &ExprRef, kind: ExprKind) -> ExprRef {
    Rc::new(Expr {
        kind,
        ty: node.ty.clone(),
    })
}

/// Rewrites `lambda` so that every empty-stack construct actually runs on
/// an empty stack. Returns the original node when nothing needed spilling.
#[tracing::instrument(skip_all)]
pub(crate) fn spill(lambda: &ExprRef, env: &Rc<Env>) -> Result<ExprRef, CompileError> {
    Ok(rewrite_lambda(lambda, env)?.node)
}

/// Each lambda is spilled independently; its temps live in its own frame.
fn rewrite_lambda(node: &ExprRef, env: &Rc<Env>) -> Result<Rewritten, CompileError> {
    let ExprKind::Lambda(l) = &node.kind else {
        return Err(CompileError::internal("stack spilling expects a lambda"));
    };
    let mut spiller = StackSpiller {
        env: env.clone(),
        temps: TempMaker::default(),
    };
    let mark = spiller.temps.mark();
    let body = spiller.rewrite(&l.body, StackState::Empty)?;
    spiller.temps.free(mark);
    spiller.temps.verify();

    if body.action == RewriteAction::None {
        return Ok(Rewritten::unchanged(node));
    }
    trace!(lambda = l.display_name(), temps = spiller.temps.all().len(), "spilled");
    let body = if spiller.temps.all().is_empty() {
        body.node
    } else {
        Expr::block(spiller.temps.all().to_vec(), vec![body.node])
    };
    Ok(Rewritten {
        action: RewriteAction::Copy,
        node: remake(
            node,
            ExprKind::Lambda(LambdaExpr {
                name: l.name.clone(),
                params: l.params.clone(),
                body,
                ret: l.ret.clone(),
                tail_call: l.tail_call,
            }),
        ),
    })
}

struct StackSpiller {
    env: Rc<Env>,
    temps: TempMaker,
}

impl StackSpiller {
    fn rewrite(&mut self, node: &ExprRef, stack: StackState) -> Result<Rewritten, CompileError> {
        guard::with_stack(|| self.rewrite_node(node, stack))
    }

    /// Rewrite with a temp watermark: everything allocated below is
    /// returned to the pool afterwards. Used where evaluation is about to
    /// leave the expression (jump values, throw operands, switch values)
    /// and at the lambda body itself.
    fn rewrite_free_temps(
        &mut self,
        node: &ExprRef,
        stack: StackState,
    ) -> Result<Rewritten, CompileError> {
        let mark = self.temps.mark();
        let r = self.rewrite(node, stack)?;
        self.temps.free(mark);
        Ok(r)
    }

    /// Evaluates into a fresh temp; pushes the store onto `comma` and
    /// returns the read.
    fn to_temp(&mut self, expr: &ExprRef, comma: &mut Vec<ExprRef>) -> ExprRef {
        let temp = self.temps.temp(&expr.ty);
        comma.push(Expr::assign(Expr::param(&temp), expr.clone()));
        Expr::param(&temp)
    }

    /// Whether evaluating this node can never observe the stack state, so
    /// it is safe to leave in place when siblings get spilled.
    fn is_stack_blind(&self, e: &ExprRef) -> bool {
        match &e.kind {
            ExprKind::Constant(_) | ExprKind::Default => true,
            ExprKind::Field(f) if f.object.is_none() => {
                self.env.types.field_def(f.field).readonly
            }
            _ => false,
        }
    }

    fn rewrite_node(
        &mut self,
        node: &ExprRef,
        stack: StackState,
    ) -> Result<Rewritten, CompileError> {
        match &node.kind {
            ExprKind::Constant(_)
            | ExprKind::Parameter(_)
            | ExprKind::Default
            | ExprKind::RuntimeVariables(_) => Ok(Rewritten::unchanged(node)),

            // Quoted trees are data; nothing inside them ever executes on
            // this frame's stack.
            ExprKind::Quote(_) => Ok(Rewritten::unchanged(node)),

            ExprKind::Lambda(_) => {
                let env = self.env.clone();
                rewrite_lambda(node, &env)
            }

            ExprKind::Binary(b) if b.op.is_logical() => {
                // Short-circuit operators branch; both operands start on
                // the same stack the operator itself sees.
                let left = self.rewrite(&b.left, stack)?;
                let right = self.rewrite(&b.right, stack)?;
                let action = left.action.union(right.action);
                if action == RewriteAction::None {
                    return Ok(Rewritten::unchanged(node));
                }
                Ok(Rewritten {
                    action,
                    node: remake(
                        node,
                        ExprKind::Binary(BinaryExpr {
                            op: b.op,
                            left: left.node,
                            right: right.node,
                            lifted: b.lifted,
                            lifted_to_null: b.lifted_to_null,
                        }),
                    ),
                })
            }

            ExprKind::Binary(b) => {
                let (op, lifted, lifted_to_null) = (b.op, b.lifted, b.lifted_to_null);
                let mut cr = ChildRewriter::new(self, stack);
                cr.add(&b.left)?;
                cr.add(&b.right)?;
                cr.finish(node, |mut c| {
                    let right = c.pop().unwrap();
                    let left = c.pop().unwrap();
                    remake(
                        node,
                        ExprKind::Binary(BinaryExpr {
                            op,
                            left,
                            right,
                            lifted,
                            lifted_to_null,
                        }),
                    )
                })
            }

            ExprKind::Unary(u) => {
                let (op, lifted) = (u.op, u.lifted);
                let mut cr = ChildRewriter::new(self, stack);
                cr.add(&u.operand)?;
                cr.finish(node, |mut c| {
                    remake(
                        node,
                        ExprKind::Unary(UnaryExpr {
                            op,
                            operand: c.pop().unwrap(),
                            lifted,
                        }),
                    )
                })
            }

            ExprKind::Convert(c) => {
                let checked = c.checked;
                let mut cr = ChildRewriter::new(self, stack);
                cr.add(&c.operand)?;
                cr.finish(node, |mut ch| {
                    remake(
                        node,
                        ExprKind::Convert(ConvertExpr {
                            operand: ch.pop().unwrap(),
                            checked,
                        }),
                    )
                })
            }

            ExprKind::Conditional(c) => {
                let test = self.rewrite(&c.test, stack)?;
                let if_true = self.rewrite(&c.if_true, stack)?;
                let if_false = self.rewrite(&c.if_false, stack)?;
                let action = test.action.union(if_true.action).union(if_false.action);
                if action == RewriteAction::None {
                    return Ok(Rewritten::unchanged(node));
                }
                Ok(Rewritten {
                    action,
                    node: remake(
                        node,
                        ExprKind::Conditional(ConditionalExpr {
                            test: test.node,
                            if_true: if_true.node,
                            if_false: if_false.node,
                        }),
                    ),
                })
            }

            ExprKind::Call(c) => {
                let func = c.func;
                let sig = self.env.natives.get(func).sig.clone();
                let mut cr = ChildRewriter::new(self, stack);
                for (i, arg) in c.args.iter().enumerate() {
                    if sig.params.get(i).is_some_and(Ty::is_by_ref) {
                        cr.add_by_ref(arg)?;
                    } else {
                        cr.add(arg)?;
                    }
                }
                cr.finish(node, |args| {
                    remake(node, ExprKind::Call(CallExpr { func, args }))
                })
            }

            ExprKind::Invoke(inv) => {
                let sig = match &inv.target.ty {
                    Ty::Delegate(sig) => sig.clone(),
                    _ => return Err(CompileError::internal("invoke target is not a delegate")),
                };
                let mut cr = ChildRewriter::new(self, stack);
                cr.add(&inv.target)?;
                for (i, arg) in inv.args.iter().enumerate() {
                    if sig.params.get(i).is_some_and(Ty::is_by_ref) {
                        cr.add_by_ref(arg)?;
                    } else {
                        cr.add(arg)?;
                    }
                }
                cr.finish(node, |mut c| {
                    let target = c.remove(0);
                    remake(node, ExprKind::Invoke(InvokeExpr { target, args: c }))
                })
            }

            ExprKind::New(n) => {
                let type_def = n.type_def;
                let mut cr = ChildRewriter::new(self, stack);
                for arg in &n.args {
                    cr.add(arg)?;
                }
                cr.finish(node, |args| {
                    remake(node, ExprKind::New(NewExpr { type_def, args }))
                })
            }

            ExprKind::Field(f) => match &f.object {
                None => Ok(Rewritten::unchanged(node)),
                Some(object) => {
                    let field = f.field;
                    let mut cr = ChildRewriter::new(self, stack);
                    cr.add(object)?;
                    cr.finish(node, |mut c| {
                        remake(
                            node,
                            ExprKind::Field(FieldExpr {
                                object: c.pop(),
                                field,
                            }),
                        )
                    })
                }
            },

            ExprKind::Index(ix) => {
                let mut cr = ChildRewriter::new(self, stack);
                cr.add(&ix.array)?;
                cr.add(&ix.index)?;
                cr.finish(node, |mut c| {
                    let index = c.pop().unwrap();
                    let array = c.pop().unwrap();
                    remake(node, ExprKind::Index(IndexExpr { array, index }))
                })
            }

            ExprKind::NewArray(n) => {
                // Elements are stored with the array reference already on
                // the stack.
                let elem = n.elem.clone();
                let mut cr = ChildRewriter::new(self, StackState::NonEmpty);
                for item in &n.items {
                    cr.add(item)?;
                }
                cr.finish(node, |items| {
                    remake(node, ExprKind::NewArray(NewArrayExpr { elem, items }))
                })
            }

            ExprKind::Block(b) => {
                let mut action = RewriteAction::None;
                let mut exprs = Vec::with_capacity(b.exprs.len());
                for e in &b.exprs {
                    let r = self.rewrite(e, stack)?;
                    action = action.union(r.action);
                    exprs.push(r.node);
                }
                if action == RewriteAction::None {
                    return Ok(Rewritten::unchanged(node));
                }
                Ok(Rewritten {
                    action,
                    node: remake(
                        node,
                        ExprKind::Block(BlockExpr {
                            vars: b.vars.clone(),
                            exprs,
                        }),
                    ),
                })
            }

            ExprKind::Assign(a) => self.rewrite_assign(node, a, stack),

            ExprKind::Label(l) => {
                let Some(default) = &l.default else {
                    return Ok(Rewritten::unchanged(node));
                };
                let r = self.rewrite(default, stack)?;
                if r.action == RewriteAction::None {
                    return Ok(Rewritten::unchanged(node));
                }
                Ok(Rewritten {
                    action: r.action,
                    node: remake(
                        node,
                        ExprKind::Label(LabelExpr {
                            target: l.target.clone(),
                            default: Some(r.node),
                        }),
                    ),
                })
            }

            ExprKind::Goto(g) => {
                // A jump abandons the stack, so anything pending must be
                // spilled by the enclosing node; the carried value itself
                // is computed on a clean stack.
                let mut action = if stack == StackState::Empty {
                    RewriteAction::None
                } else {
                    RewriteAction::SpillStack
                };
                let value = match &g.value {
                    Some(v) => {
                        let r = self.rewrite_free_temps(v, StackState::Empty)?;
                        action = action.union(r.action);
                        Some(r.node)
                    }
                    None => None,
                };
                if action == RewriteAction::None {
                    return Ok(Rewritten::unchanged(node));
                }
                Ok(Rewritten {
                    action,
                    node: remake(
                        node,
                        ExprKind::Goto(GotoExpr {
                            kind: g.kind,
                            target: g.target.clone(),
                            value,
                        }),
                    ),
                })
            }

            ExprKind::Loop(l) => {
                let body = self.rewrite(&l.body, StackState::Empty)?;
                let mut action = body.action;
                if stack != StackState::Empty {
                    action = action.union(RewriteAction::SpillStack);
                }
                if action == RewriteAction::None {
                    return Ok(Rewritten::unchanged(node));
                }
                Ok(Rewritten {
                    action,
                    node: remake(
                        node,
                        ExprKind::Loop(LoopExpr {
                            body: body.node,
                            break_label: l.break_label.clone(),
                            continue_label: l.continue_label.clone(),
                        }),
                    ),
                })
            }

            ExprKind::Try(t) => self.rewrite_try(node, t, stack),

            ExprKind::Switch(s) => {
                let value = self.rewrite_free_temps(&s.value, stack)?;
                let mut action = value.action;
                let mut cases = Vec::with_capacity(s.cases.len());
                for case in &s.cases {
                    let mut values = Vec::with_capacity(case.values.len());
                    for v in &case.values {
                        let r = self.rewrite(v, stack)?;
                        action = action.union(r.action);
                        values.push(r.node);
                    }
                    let body = self.rewrite(&case.body, stack)?;
                    action = action.union(body.action);
                    cases.push(SwitchCase {
                        values,
                        body: body.node,
                    });
                }
                let default = match &s.default {
                    Some(d) => {
                        let r = self.rewrite(d, stack)?;
                        action = action.union(r.action);
                        Some(r.node)
                    }
                    None => None,
                };
                if action == RewriteAction::None {
                    return Ok(Rewritten::unchanged(node));
                }
                Ok(Rewritten {
                    action,
                    node: remake(
                        node,
                        ExprKind::Switch(SwitchExpr {
                            value: value.node,
                            cases,
                            default,
                        }),
                    ),
                })
            }

            ExprKind::Throw(operand) => {
                let mut action = if stack == StackState::Empty {
                    RewriteAction::None
                } else {
                    RewriteAction::SpillStack
                };
                let operand = match operand {
                    Some(v) => {
                        let r = self.rewrite_free_temps(v, StackState::Empty)?;
                        action = action.union(r.action);
                        Some(r.node)
                    }
                    None => None,
                };
                if action == RewriteAction::None {
                    return Ok(Rewritten::unchanged(node));
                }
                Ok(Rewritten {
                    action,
                    node: remake(node, ExprKind::Throw(operand)),
                })
            }
        }
    }

    fn rewrite_assign(
        &mut self,
        node: &ExprRef,
        a: &AssignExpr,
        stack: StackState,
    ) -> Result<Rewritten, CompileError> {
        match &a.target.kind {
            ExprKind::Parameter(_) => {
                let value = self.rewrite(&a.value, stack)?;
                if value.action == RewriteAction::None {
                    return Ok(Rewritten::unchanged(node));
                }
                Ok(Rewritten {
                    action: value.action,
                    node: remake(
                        node,
                        ExprKind::Assign(AssignExpr {
                            target: a.target.clone(),
                            value: value.node,
                        }),
                    ),
                })
            }
            ExprKind::Index(ix) => {
                let target = a.target.clone();
                let mut cr = ChildRewriter::new(self, stack);
                cr.add(&ix.array)?;
                cr.add(&ix.index)?;
                cr.add(&a.value)?;
                cr.finish(node, |mut c| {
                    let value = c.pop().unwrap();
                    let index = c.pop().unwrap();
                    let array = c.pop().unwrap();
                    remake(
                        node,
                        ExprKind::Assign(AssignExpr {
                            target: remake(&target, ExprKind::Index(IndexExpr { array, index })),
                            value,
                        }),
                    )
                })
            }
            ExprKind::Field(f) => {
                let target = a.target.clone();
                let field = f.field;
                let mut cr = ChildRewriter::new(self, stack);
                let instance = f.object.is_some();
                if let Some(object) = &f.object {
                    cr.add(object)?;
                }
                cr.add(&a.value)?;
                cr.finish(node, |mut c| {
                    let value = c.pop().unwrap();
                    let object = if instance { c.pop() } else { None };
                    remake(
                        node,
                        ExprKind::Assign(AssignExpr {
                            target: remake(&target, ExprKind::Field(FieldExpr { object, field })),
                            value,
                        }),
                    )
                })
            }
            _ => Err(CompileError::internal("assignment target is not an lvalue")),
        }
    }

    fn rewrite_try(
        &mut self,
        node: &ExprRef,
        t: &TryExpr,
        stack: StackState,
    ) -> Result<Rewritten, CompileError> {
        // Entering a protected region clears the stack, and every handler
        // entry point starts clean too.
        let body = self.rewrite(&t.body, StackState::Empty)?;
        let mut action = body.action;

        let mut handlers = Vec::with_capacity(t.handlers.len());
        for h in &t.handlers {
            let mut handler_action = RewriteAction::None;
            let filter = match &h.filter {
                Some(f) => {
                    let r = self.rewrite(f, StackState::Empty)?;
                    handler_action = handler_action.union(r.action);
                    Some(r.node)
                }
                None => None,
            };
            let hbody = self.rewrite(&h.body, StackState::Empty)?;
            handler_action = handler_action.union(hbody.action);
            action = action.union(handler_action);
            if handler_action == RewriteAction::None {
                handlers.push(h.clone());
            } else {
                handlers.push(Rc::new(CatchBlock {
                    var: h.var.clone(),
                    test_ty: h.test_ty.clone(),
                    filter,
                    body: hbody.node,
                }));
            }
        }

        let finally = match &t.finally {
            Some(f) => {
                let r = self.rewrite(f, StackState::Empty)?;
                action = action.union(r.action);
                Some(r.node)
            }
            None => None,
        };
        let fault = match &t.fault {
            Some(f) => {
                let r = self.rewrite(f, StackState::Empty)?;
                action = action.union(r.action);
                Some(r.node)
            }
            None => None,
        };

        if stack != StackState::Empty {
            action = action.union(RewriteAction::SpillStack);
        }
        if action == RewriteAction::None {
            return Ok(Rewritten::unchanged(node));
        }
        Ok(Rewritten {
            action,
            node: remake(
                node,
                ExprKind::Try(TryExpr {
                    body: body.node,
                    handlers,
                    finally,
                    fault,
                }),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Expr;
    use pretty_assertions::assert_eq;

    fn env() -> Rc<Env> {
        Env::new().into_rc()
    }

    fn lambda(body: ExprRef, ret: Ty) -> ExprRef {
        Expr::lambda("f", vec![], body, ret)
    }

    fn body_of(lambda: &ExprRef) -> &ExprRef {
        match &lambda.kind {
            ExprKind::Lambda(l) => &l.body,
            other => panic!("expected lambda, got {other:?}"),
        }
    }

    #[test]
    fn try_as_operand_spills_pending_left_operand() {
        let var = Expr::variable("x", Ty::I32);
        let body = Expr::block(
            vec![var.clone()],
            vec![Expr::add(
                Expr::param(&var),
                Expr::try_finally(Expr::i32(2), Expr::i32(0)),
            )],
        );
        let f = lambda(body, Ty::I32);
        let env = env();
        let spilled = spill(&f, &env).unwrap();
        assert!(!Rc::ptr_eq(&spilled, &f));

        // Body is wrapped in a block declaring the spill temps.
        let ExprKind::Block(outer) = &body_of(&spilled).kind else {
            panic!("expected temp-declaring block");
        };
        assert_eq!(outer.vars.len(), 2);
        assert!(outer.vars.iter().all(|v| v.ty == Ty::I32));
    }

    #[test]
    fn spilling_reaches_a_fixpoint() {
        let body = Expr::add(
            Expr::i32(1),
            Expr::try_finally(Expr::i32(2), Expr::i32(0)),
        );
        let f = lambda(body, Ty::I32);
        let env = env();
        let once = spill(&f, &env).unwrap();
        assert!(!Rc::ptr_eq(&once, &f));
        let twice = spill(&once, &env).unwrap();
        assert!(Rc::ptr_eq(&twice, &once));
    }

    #[test]
    fn constants_stay_in_place_when_a_sibling_spills() {
        let body = Expr::add(
            Expr::i32(1),
            Expr::try_finally(Expr::i32(2), Expr::i32(0)),
        );
        let f = lambda(body, Ty::I32);
        let spilled = spill(&f, &env()).unwrap();

        let ExprKind::Block(outer) = &body_of(&spilled).kind else {
            panic!("expected temp-declaring block");
        };
        // Only the try got a temp; the constant left operand was exempt.
        assert_eq!(outer.vars.len(), 1);
        let ExprKind::Block(comma) = &outer.exprs[0].kind else {
            panic!("expected spill comma block");
        };
        assert_eq!(comma.exprs.len(), 2);
        assert!(matches!(comma.exprs[0].kind, ExprKind::Assign(_)));
        let ExprKind::Binary(b) = &comma.exprs[1].kind else {
            panic!("expected rebuilt add");
        };
        assert!(matches!(b.left.kind, ExprKind::Constant(_)));
        assert!(matches!(b.right.kind, ExprKind::Parameter(_)));
    }

    #[test]
    fn statement_position_try_needs_no_spilling() {
        let body = Expr::block(
            vec![],
            vec![
                Expr::try_finally(Expr::i32(2), Expr::i32(0)),
                Expr::i32(1),
            ],
        );
        let f = lambda(body, Ty::I32);
        let spilled = spill(&f, &env()).unwrap();
        assert!(Rc::ptr_eq(&spilled, &f));
    }

    #[test]
    fn all_spill_temps_are_declared_at_the_root() {
        let first = Expr::add(
            Expr::i32(1),
            Expr::try_finally(Expr::i32(2), Expr::i32(0)),
        );
        let second = Expr::add(
            Expr::i32(3),
            Expr::try_finally(Expr::i32(4), Expr::i32(0)),
        );
        let var = Expr::variable("sink", Ty::I32);
        let body = Expr::block(
            vec![var.clone()],
            vec![
                Expr::assign(Expr::param(&var), first),
                Expr::assign(Expr::param(&var), second),
                Expr::param(&var),
            ],
        );
        let f = lambda(body, Ty::I32);
        let spilled = spill(&f, &env()).unwrap();

        let ExprKind::Block(outer) = &body_of(&spilled).kind else {
            panic!("expected temp-declaring block");
        };
        // Both statements spill; every temp lands in the one root block.
        assert_eq!(outer.vars.len(), 2);
        assert!(outer.vars.iter().all(|v| v.ty == Ty::I32));
    }

    #[test]
    fn nested_lambda_spills_independently() {
        let inner_body = Expr::add(
            Expr::i32(1),
            Expr::try_finally(Expr::i32(2), Expr::i32(0)),
        );
        let inner = Expr::lambda("inner", vec![], inner_body, Ty::I32);
        let f = lambda(Expr::invoke(inner, vec![]), Ty::I32);
        let spilled = spill(&f, &env()).unwrap();
        assert!(!Rc::ptr_eq(&spilled, &f));

        // The outer body needed no temps of its own.
        let ExprKind::Invoke(inv) = &body_of(&spilled).kind else {
            panic!("expected invoke body");
        };
        let ExprKind::Lambda(l) = &inv.target.kind else {
            panic!("expected rebuilt inner lambda");
        };
        assert!(matches!(l.body.kind, ExprKind::Block(_)));
    }
}
