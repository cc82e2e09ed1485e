// src/compiler/binder.rs
//
// The variable binder: one forward walk over the (already spilled) tree.
// For every scope-bearing node it records the variables defined there and
// a reference count per variable; a variable referenced from a lambda
// strictly inside its defining scope is hoisted in the defining scope, and
// every scope strictly between definition and use is marked as needing the
// closure chain. Quoted subtrees are visited for binding (their variable
// references force hoisting, since a quote materializes variable access at
// runtime); their constants belong to the quoted lambda itself, never to
// the lambda holding the quote.
//
// An unbound variable here is a compiler bug, not a tree problem: the tree
// is assumed pre-validated. Closing over a by-ref variable is the one
// user-facing error this pass raises.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::errors::{CompileError, CompileErrorKind};
use crate::tree::{ExprKind, ExprRef, NodeKey, ParamRef};

use super::analyzed::AnalyzedTree;
use super::constants::BoundConstants;
use super::guard;
use super::scope::{CompilerScope, VarStorage};

#[tracing::instrument(skip_all)]
pub(crate) fn bind(lambda: &ExprRef) -> Result<AnalyzedTree, CompileError> {
    debug_assert!(matches!(lambda.kind, ExprKind::Lambda(_)));
    let mut binder = VariableBinder {
        tree: AnalyzedTree::default(),
        scopes: Vec::new(),
        constants: Vec::new(),
        lambda_names: Vec::new(),
        in_quote: 0,
    };
    binder.visit(lambda)?;
    Ok(binder.tree)
}

struct VariableBinder {
    tree: AnalyzedTree,
    /// Active scope chain, innermost last.
    scopes: Vec<Rc<RefCell<CompilerScope>>>,
    /// Active per-lambda constant collectors, innermost last.
    constants: Vec<Rc<RefCell<BoundConstants>>>,
    lambda_names: Vec<String>,
    in_quote: u32,
}

impl VariableBinder {
    fn visit(&mut self, node: &ExprRef) -> Result<(), CompileError> {
        guard::with_stack(|| self.visit_inner(node))
    }

    fn visit_inner(&mut self, node: &ExprRef) -> Result<(), CompileError> {
        match &node.kind {
            ExprKind::Constant(v) => {
                if self.in_quote == 0 && !v.is_literal_emittable() {
                    let constants = self
                        .constants
                        .last()
                        .ok_or_else(|| CompileError::internal("constant outside any lambda"))?;
                    constants.borrow_mut().add_reference(v, &node.ty)?;
                }
                Ok(())
            }
            ExprKind::Parameter(p) => self.reference(p, false),
            ExprKind::Binary(b) => {
                self.visit(&b.left)?;
                self.visit(&b.right)
            }
            ExprKind::Unary(u) => self.visit(&u.operand),
            ExprKind::Convert(c) => self.visit(&c.operand),
            ExprKind::Conditional(c) => {
                self.visit(&c.test)?;
                self.visit(&c.if_true)?;
                self.visit(&c.if_false)
            }
            ExprKind::Call(c) => c.args.iter().try_for_each(|a| self.visit(a)),
            ExprKind::Invoke(i) => {
                self.visit(&i.target)?;
                i.args.iter().try_for_each(|a| self.visit(a))
            }
            ExprKind::New(n) => n.args.iter().try_for_each(|a| self.visit(a)),
            ExprKind::Field(f) => f.object.iter().try_for_each(|o| self.visit(o)),
            ExprKind::Index(i) => {
                self.visit(&i.array)?;
                self.visit(&i.index)
            }
            ExprKind::NewArray(n) => n.items.iter().try_for_each(|e| self.visit(e)),
            ExprKind::Block(b) => {
                if b.vars.is_empty() {
                    return b.exprs.iter().try_for_each(|e| self.visit(e));
                }
                let key = NodeKey::expr(node);
                let scope = Rc::new(RefCell::new(CompilerScope::new(key, false)));
                for v in &b.vars {
                    scope.borrow_mut().declare(v);
                }
                self.scopes.push(scope.clone());
                let result = b.exprs.iter().try_for_each(|e| self.visit(e));
                self.scopes.pop();
                self.tree.scopes.insert(key, scope);
                result
            }
            ExprKind::Assign(a) => {
                self.visit(&a.target)?;
                self.visit(&a.value)
            }
            ExprKind::Lambda(l) => {
                let key = NodeKey::expr(node);
                let scope = Rc::new(RefCell::new(CompilerScope::new(key, true)));
                for p in &l.params {
                    scope.borrow_mut().declare(p);
                }
                trace!(lambda = %l.display_name(), params = l.params.len(), "binding lambda");
                self.scopes.push(scope.clone());
                self.constants
                    .push(Rc::new(RefCell::new(BoundConstants::new())));
                self.lambda_names.push(l.display_name().to_owned());
                // The lambda owns its constants even under a quote.
                let saved_quote = std::mem::replace(&mut self.in_quote, 0);
                let result = self.visit(&l.body);
                self.in_quote = saved_quote;
                self.lambda_names.pop();
                let constants = self.constants.pop().expect("constant stack underflow");
                self.scopes.pop();
                self.tree.scopes.insert(key, scope);
                self.tree.constants.insert(key, constants);
                result
            }
            ExprKind::Quote(inner) => {
                self.in_quote += 1;
                let result = self.visit(inner);
                self.in_quote -= 1;
                result
            }
            ExprKind::RuntimeVariables(vars) => {
                vars.iter().try_for_each(|v| self.reference(v, true))
            }
            ExprKind::Loop(l) => self.visit(&l.body),
            ExprKind::Try(t) => {
                self.visit(&t.body)?;
                for handler in &t.handlers {
                    match &handler.var {
                        Some(var) => {
                            let key = NodeKey::catch(handler);
                            let scope = Rc::new(RefCell::new(CompilerScope::new(key, false)));
                            scope.borrow_mut().declare(var);
                            self.scopes.push(scope.clone());
                            let result = handler
                                .filter
                                .iter()
                                .try_for_each(|f| self.visit(f))
                                .and_then(|()| self.visit(&handler.body));
                            self.scopes.pop();
                            self.tree.scopes.insert(key, scope);
                            result?;
                        }
                        None => {
                            handler.filter.iter().try_for_each(|f| self.visit(f))?;
                            self.visit(&handler.body)?;
                        }
                    }
                }
                t.finally.iter().try_for_each(|f| self.visit(f))?;
                t.fault.iter().try_for_each(|f| self.visit(f))
            }
            ExprKind::Switch(s) => {
                self.visit(&s.value)?;
                for case in &s.cases {
                    case.values.iter().try_for_each(|v| self.visit(v))?;
                    self.visit(&case.body)?;
                }
                s.default.iter().try_for_each(|d| self.visit(d))
            }
            ExprKind::Label(l) => l.default.iter().try_for_each(|d| self.visit(d)),
            ExprKind::Goto(g) => g.value.iter().try_for_each(|v| self.visit(v)),
            ExprKind::Throw(v) => v.iter().try_for_each(|v| self.visit(v)),
            ExprKind::Default => Ok(()),
        }
    }

    /// Resolves one variable reference against the active scope chain.
    /// Crossing a lambda boundary (or referencing from inside a quote)
    /// hoists the variable in its defining scope.
    fn reference(&mut self, var: &ParamRef, force_hoist: bool) -> Result<(), CompileError> {
        let mut storage = if force_hoist || self.in_quote > 0 {
            VarStorage::Hoisted
        } else {
            VarStorage::Local
        };
        let mut definition = None;
        for scope in self.scopes.iter().rev() {
            if scope.borrow().defines(var) {
                definition = Some(scope.clone());
                break;
            }
            let mut s = scope.borrow_mut();
            s.needs_closure = true;
            if s.is_lambda {
                storage = VarStorage::Hoisted;
            }
        }
        let definition = definition.ok_or_else(|| {
            CompileError::internal_with("unbound variable", var.display_name())
        })?;
        let mut def = definition.borrow_mut();
        def.note_reference(var);
        if storage == VarStorage::Hoisted {
            if var.by_ref {
                return Err(CompileError::new(CompileErrorKind::CannotCloseOverByRef {
                    variable: var.display_name().to_owned(),
                    lambda: self.lambda_names.last().cloned().unwrap_or_default(),
                }));
            }
            def.hoist(var);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Expr, Ty};

    #[test]
    fn local_use_stays_local() {
        let x = Expr::variable("x", Ty::I32);
        let lambda = Expr::lambda("f", vec![x.clone()], Expr::param(&x), Ty::I32);
        let tree = bind(&lambda).unwrap();
        let scope = tree.scope(NodeKey::expr(&lambda)).unwrap();
        assert_eq!(
            scope.borrow().definitions[&NodeKey::param(&x)],
            VarStorage::Local
        );
        assert!(!scope.borrow().needs_closure);
    }

    #[test]
    fn crossing_a_lambda_boundary_hoists_in_the_defining_scope() {
        let x = Expr::variable("x", Ty::I32);
        let inner = Expr::lambda("inner", vec![], Expr::param(&x), Ty::I32);
        let outer = Expr::lambda("outer", vec![x.clone()], inner.clone(), Ty::Void);

        let tree = bind(&outer).unwrap();
        let outer_scope = tree.scope(NodeKey::expr(&outer)).unwrap();
        assert_eq!(
            outer_scope.borrow().definitions[&NodeKey::param(&x)],
            VarStorage::Hoisted
        );
        let inner_scope = tree.scope(NodeKey::expr(&inner)).unwrap();
        assert!(inner_scope.borrow().needs_closure);
    }

    #[test]
    fn intermediate_blocks_are_marked_needing_closure() {
        let x = Expr::variable("x", Ty::I32);
        let y = Expr::variable("y", Ty::I32);
        let body = Expr::block(vec![y.clone()], vec![Expr::param(&x)]);
        let inner = Expr::lambda("inner", vec![], body.clone(), Ty::I32);
        let outer = Expr::lambda("outer", vec![x.clone()], inner.clone(), Ty::Void);

        let tree = bind(&outer).unwrap();
        let block_scope = tree.scope(NodeKey::expr(&body)).unwrap();
        assert!(block_scope.borrow().needs_closure);
        assert_eq!(
            block_scope.borrow().definitions[&NodeKey::param(&y)],
            VarStorage::Local
        );
    }

    #[test]
    fn closing_over_by_ref_is_rejected_with_names() {
        let r = Expr::by_ref_variable("r", Ty::I32);
        let inner = Expr::lambda("inner", vec![], Expr::param(&r), Ty::I32);
        let outer = Expr::lambda("outer", vec![r.clone()], inner, Ty::Void);

        let err = bind(&outer).unwrap_err();
        match err.kind {
            CompileErrorKind::CannotCloseOverByRef { variable, lambda } => {
                assert_eq!(variable, "r");
                assert_eq!(lambda, "inner");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn quoted_references_force_hoisting() {
        let x = Expr::variable("x", Ty::I32);
        let quoted = Expr::lambda("q", vec![], Expr::param(&x), Ty::I32);
        let body = Expr::quote(quoted);
        let outer = Expr::lambda("outer", vec![x.clone()], body, Ty::Object);

        let tree = bind(&outer).unwrap();
        let scope = tree.scope(NodeKey::expr(&outer)).unwrap();
        assert_eq!(
            scope.borrow().definitions[&NodeKey::param(&x)],
            VarStorage::Hoisted
        );
    }

    #[test]
    fn live_constants_land_in_the_owning_lambda() {
        use crate::runtime::Value;
        use std::cell::RefCell as Cell;

        let live = Value::Array(Rc::new(Cell::new(vec![Value::I32(7)])));
        let node = Expr::constant(live.clone(), Ty::array(Ty::I32));
        let lambda = Expr::lambda("f", vec![], node, Ty::array(Ty::I32));
        let tree = bind(&lambda).unwrap();
        let constants = tree.constants_of(NodeKey::expr(&lambda)).unwrap();
        assert_eq!(constants.borrow().len(), 1);

        // Under a quote the constant belongs to the quoted lambda, not to
        // the lambda holding the quote.
        let quoted_const = Expr::constant(live, Ty::array(Ty::I32));
        let inner = Expr::lambda("q", vec![], quoted_const, Ty::array(Ty::I32));
        let quoted = Expr::quote(inner.clone());
        let lambda2 = Expr::lambda("g", vec![], quoted, Ty::Object);
        let tree2 = bind(&lambda2).unwrap();
        let outer_constants = tree2.constants_of(NodeKey::expr(&lambda2)).unwrap();
        assert!(outer_constants.borrow().is_empty());
        let inner_constants = tree2.constants_of(NodeKey::expr(&inner)).unwrap();
        assert_eq!(inner_constants.borrow().len(), 1);
    }
}
