// src/compiler/mod.rs
//
// The compilation pipeline. `compile` runs the three passes in order:
// spill the tree so protected constructs start on an empty stack, bind
// variables into scopes, then generate code per lambda. The two public
// targets differ only in how constants and produced methods are owned:
// a `CompiledDelegate` carries its bound constants and environment, while
// a `MethodTable` collects constant-free methods for ahead-of-time use.

mod analyzed;
mod binder;
mod codegen;
mod constants;
pub(crate) mod delegates;
mod guard;
mod labels;
mod scope;
mod spill;

use std::rc::Rc;

use crate::errors::CompileError;
use crate::runtime::{CompiledDelegate, CompiledMethod, Env};
use crate::tree::ExprRef;

/// Compiles a lambda into an invokable delegate against a fresh
/// environment.
pub fn compile(lambda: &ExprRef) -> Result<CompiledDelegate, CompileError> {
    compile_with_env(lambda, Env::new().into_rc())
}

/// Compiles a lambda against `env`; natives and types the tree references
/// must already be registered there.
#[tracing::instrument(skip_all)]
pub fn compile_with_env(lambda: &ExprRef, env: Rc<Env>) -> Result<CompiledDelegate, CompileError> {
    let spilled = spill::spill(lambda, &env)?;
    let tree = binder::bind(&spilled)?;
    let (root, _) = codegen::compile_tree(&spilled, &tree, &env, true)?;
    Ok(CompiledDelegate::new(root, env))
}

/// Identifies one method in a `MethodTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

/// Ahead-of-time compilation target: a flat table of finished methods.
/// Trees compiled here may not bind live constants; every constant must
/// be emittable as a literal.
pub struct MethodTable {
    env: Rc<Env>,
    methods: Vec<Rc<CompiledMethod>>,
}

impl MethodTable {
    pub fn new(env: Rc<Env>) -> MethodTable {
        MethodTable {
            env,
            methods: Vec::new(),
        }
    }

    pub fn env(&self) -> &Rc<Env> {
        &self.env
    }

    pub fn get(&self, id: MethodId) -> &Rc<CompiledMethod> {
        &self.methods[id.0 as usize]
    }

    pub fn methods(&self) -> &[Rc<CompiledMethod>] {
        &self.methods
    }

    /// Wraps a table method in an invokable delegate.
    pub fn delegate(&self, id: MethodId) -> CompiledDelegate {
        CompiledDelegate::new(self.get(id).clone(), self.env.clone())
    }
}

/// Compiles a lambda and every lambda nested in it into `table`, returning
/// the id of the root method. Nested methods land in the table too, in
/// inside-out order.
#[tracing::instrument(skip_all)]
pub fn compile_into(lambda: &ExprRef, table: &mut MethodTable) -> Result<MethodId, CompileError> {
    let spilled = spill::spill(lambda, &table.env)?;
    let tree = binder::bind(&spilled)?;
    let (root, all) = codegen::compile_tree(&spilled, &tree, &table.env, false)?;
    let mut root_id = None;
    for method in all {
        let id = MethodId(table.methods.len() as u32);
        if Rc::ptr_eq(&method, &root) {
            root_id = Some(id);
        }
        table.methods.push(method);
    }
    root_id.ok_or_else(|| CompileError::internal("root method missing from compilation output"))
}
