// src/runtime/interp.rs
//
// Executes a MethodBody against a frame of arguments, locals, and an
// operand stack. Protected regions follow the structured model the writer
// records: catches guard the try range only (the compiler nests a
// try/finally around a try/catch when both are present), finallys run on
// both normal leave and unwind, faults on unwind only, and filters run
// against the in-flight exception before any intervening finally.

use std::rc::Rc;

use thiserror::Error;

use crate::tree::{NumTy, Ty};

use super::closure::Closure;
use super::instr::{ArithOp, CmpOp, HandlerRange, Instr, MethodBody, Overflow};
use super::object::{ObjectData, TypeDefId};
use super::value::Value;
use super::Env;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// A thrown value unwound past the outermost frame.
    #[error("unhandled exception: {0:?}")]
    Unhandled(Value),
    /// Interpreter invariant violation; indicates a compiler bug, since
    /// the compiler owns stack balance and region nesting.
    #[error("internal runtime error: {0}")]
    Internal(&'static str),
}

/// Internal signal: either a catchable thrown value or a fatal defect.
enum Raised {
    Exn(Value),
    Fatal(&'static str),
}

pub fn invoke(closure: &Rc<Closure>, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let method = &closure.method;
    let body = &method.body;
    debug_assert_eq!(args.len(), body.argc as usize);
    let locals = body.locals.iter().map(Value::default_of).collect();
    let mut frame = Frame {
        body,
        constants: &method.constants,
        closure,
        env: &closure.env,
        args,
        locals,
        stack: Vec::new(),
        conts: Vec::new(),
        in_flight: Vec::new(),
    };
    match frame.run() {
        Ok(v) => Ok(v),
        Err(Raised::Exn(v)) => Err(RuntimeError::Unhandled(v)),
        Err(Raised::Fatal(m)) => Err(RuntimeError::Internal(m)),
    }
}

/// What to do when the finalizer currently executing finishes.
enum Resume {
    /// Resume a leave: run the remaining finalizers, then branch.
    Leave { remaining: Vec<HandlerRange>, target: u32 },
    /// Resume an unwind: run the remaining finalizers, then enter the
    /// handler (or propagate out of the frame).
    Unwind {
        exn: Value,
        remaining: Vec<HandlerRange>,
        handler: Option<(usize, u32)>,
    },
    /// A filter is executing; on EndFilter either enter this candidate or
    /// keep searching the remaining ones.
    Filter {
        exn: Value,
        at: u32,
        candidate: (usize, usize),
        remaining: Vec<(usize, usize)>,
    },
}

struct Cont {
    resume: Resume,
    /// The code range being executed on behalf of this continuation; used
    /// to recognize stale continuations when a nested exception escapes.
    active: HandlerRange,
}

struct Frame<'a> {
    body: &'a MethodBody,
    constants: &'a [Value],
    closure: &'a Rc<Closure>,
    env: &'a Rc<Env>,
    args: Vec<Value>,
    locals: Vec<Value>,
    stack: Vec<Value>,
    conts: Vec<Cont>,
    /// Exceptions whose handlers are on the current control path:
    /// (region index, value). Consulted by Rethrow.
    in_flight: Vec<(usize, Value)>,
}

impl Frame<'_> {
    fn pop(&mut self) -> Result<Value, Raised> {
        self.stack.pop().ok_or(Raised::Fatal("operand stack underflow"))
    }

    fn pop_bool(&mut self) -> Result<bool, Raised> {
        match self.pop()? {
            Value::Bool(b) => Ok(b),
            _ => Err(Raised::Fatal("expected bool on operand stack")),
        }
    }

    fn builtin(&self, class: TypeDefId, msg: &str) -> Raised {
        Raised::Exn(Value::Obj(ObjectData::new(
            class,
            vec![Value::Str(Rc::from(msg))],
        )))
    }

    fn run(&mut self) -> Result<Value, Raised> {
        let mut pc: u32 = 0;
        loop {
            let at = pc;
            let instr = self
                .body
                .code
                .get(pc as usize)
                .ok_or(Raised::Fatal("instruction pointer out of bounds"))?;
            pc += 1;
            match instr {
                Instr::Push(v) => self.stack.push(v.clone()),
                Instr::Pop => {
                    self.pop()?;
                }
                Instr::Dup => {
                    let v = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or(Raised::Fatal("dup on empty stack"))?;
                    self.stack.push(v);
                }
                Instr::LoadArg(i) => self.stack.push(self.args[*i as usize].clone()),
                Instr::StoreArg(i) => {
                    let v = self.pop()?;
                    self.args[*i as usize] = v;
                }
                Instr::LoadLocal(l) => self.stack.push(self.locals[l.0 as usize].clone()),
                Instr::StoreLocal(l) => {
                    let v = self.pop()?;
                    self.locals[l.0 as usize] = v;
                }
                Instr::LoadConstant(i) => self.stack.push(self.constants[*i as usize].clone()),
                Instr::LoadFrame => {
                    let frame = self
                        .closure
                        .frame
                        .clone()
                        .ok_or(Raised::Fatal("method has no closure frame"))?;
                    self.stack.push(frame);
                }
                Instr::NewCell => {
                    let v = self.pop()?;
                    self.stack.push(Value::Cell(Rc::new(std::cell::RefCell::new(v))));
                }
                Instr::LoadCell => match self.pop()? {
                    Value::Cell(c) => self.stack.push(c.borrow().clone()),
                    _ => return Err(Raised::Fatal("load through non-cell")),
                },
                Instr::StoreCell => {
                    let v = self.pop()?;
                    match self.pop()? {
                        Value::Cell(c) => *c.borrow_mut() = v,
                        _ => return Err(Raised::Fatal("store through non-cell")),
                    }
                }
                Instr::NewArray => {
                    let len = match self.pop()? {
                        Value::I32(n) if n >= 0 => n as usize,
                        _ => return Err(Raised::Fatal("bad array length")),
                    };
                    self.stack.push(Value::Array(Rc::new(std::cell::RefCell::new(
                        vec![Value::Null; len],
                    ))));
                }
                Instr::LoadElem => {
                    let idx = self.index_operand()?;
                    let arr = self.array_operand()?;
                    let v = arr.borrow().get(idx).cloned();
                    match v {
                        Some(v) => self.stack.push(v),
                        None => {
                            return Err(
                                self.builtin(self.env.builtins.index_range, "index out of range")
                            )
                        }
                    }
                }
                Instr::StoreElem => {
                    let v = self.pop()?;
                    let idx = self.index_operand()?;
                    let arr = self.array_operand()?;
                    let mut arr = arr.borrow_mut();
                    if idx >= arr.len() {
                        return Err(
                            self.builtin(self.env.builtins.index_range, "index out of range")
                        );
                    }
                    arr[idx] = v;
                }
                Instr::ArrayLen => {
                    let arr = self.array_operand()?;
                    let len = arr.borrow().len();
                    self.stack.push(Value::I32(len as i32));
                }
                Instr::NewObj { type_def, argc } => {
                    let def = self.env.types.get(*type_def);
                    debug_assert!(!def.is_abstract, "abstract construction reached runtime");
                    let split = self.stack.len() - *argc as usize;
                    let mut fields: Vec<Value> = self.stack.split_off(split);
                    for field in def.fields.iter().skip(fields.len()) {
                        fields.push(Value::default_of(&field.ty));
                    }
                    self.stack.push(Value::Obj(ObjectData::new(*type_def, fields)));
                }
                Instr::LoadField(id) => {
                    let obj = self.object_operand()?;
                    let v = obj.fields.borrow()[id.index as usize].clone();
                    self.stack.push(v);
                }
                Instr::StoreField(id) => {
                    let v = self.pop()?;
                    let obj = self.object_operand()?;
                    obj.fields.borrow_mut()[id.index as usize] = v;
                }
                Instr::LoadStatic(id) => {
                    let def = self.env.types.get(id.owner);
                    self.stack.push(def.statics[id.index as usize].1.borrow().clone());
                }
                Instr::StoreStatic(id) => {
                    let v = self.pop()?;
                    let def = self.env.types.get(id.owner);
                    *def.statics[id.index as usize].1.borrow_mut() = v;
                }
                Instr::Arith { op, ty, checked } => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let v = self.arith(*op, *ty, *checked, a, b)?;
                    self.stack.push(v);
                }
                Instr::BoolOp(op) => {
                    let b = self.pop_bool()?;
                    let a = self.pop_bool()?;
                    let v = match op {
                        ArithOp::And => a & b,
                        ArithOp::Or => a | b,
                        ArithOp::Xor => a ^ b,
                        _ => return Err(Raised::Fatal("non-boolean op on bools")),
                    };
                    self.stack.push(Value::Bool(v));
                }
                Instr::Neg { ty, checked } => {
                    let a = self.pop()?;
                    let v = self.negate(*ty, *checked, a)?;
                    self.stack.push(v);
                }
                Instr::BitNot { .. } => {
                    let v = match self.pop()? {
                        Value::I8(v) => Value::I8(!v),
                        Value::U8(v) => Value::U8(!v),
                        Value::I16(v) => Value::I16(!v),
                        Value::U16(v) => Value::U16(!v),
                        Value::I32(v) => Value::I32(!v),
                        Value::U32(v) => Value::U32(!v),
                        Value::I64(v) => Value::I64(!v),
                        Value::U64(v) => Value::U64(!v),
                        _ => return Err(Raised::Fatal("bitwise not on non-integral")),
                    };
                    self.stack.push(v);
                }
                Instr::NotBool => {
                    let b = self.pop_bool()?;
                    self.stack.push(Value::Bool(!b));
                }
                Instr::Compare { op, ty } => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let v = compare(*op, *ty, &a, &b)?;
                    self.stack.push(Value::Bool(v));
                }
                Instr::ValueEq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Bool(Value::value_eq(&a, &b)));
                }
                Instr::IsNull => {
                    let v = self.pop()?;
                    self.stack.push(Value::Bool(v.is_null()));
                }
                Instr::NullGuard => {
                    if self.stack.last().is_none_or(|v| v.is_null()) {
                        return Err(self.builtin(
                            self.env.builtins.null_value,
                            "nullable value was null",
                        ));
                    }
                }
                Instr::Conv { to, overflow } => {
                    let v = self.pop()?;
                    let v = self.convert(v, *to, *overflow)?;
                    self.stack.push(v);
                }
                Instr::IsInstance(ty) => {
                    let v = self.pop()?;
                    self.stack.push(Value::Bool(is_instance(&v, ty)));
                }
                Instr::CastClass(ty) => {
                    let v = self
                        .stack
                        .last()
                        .ok_or(Raised::Fatal("cast on empty stack"))?;
                    if !v.is_null() && !is_instance(v, ty) {
                        return Err(self.builtin(
                            self.env.builtins.invalid_cast,
                            "value is not of the target type",
                        ));
                    }
                }
                Instr::Branch(l) => pc = self.body.target(*l),
                Instr::BranchTrue(l) => {
                    if self.pop_bool()? {
                        pc = self.body.target(*l);
                    }
                }
                Instr::BranchFalse(l) => {
                    if !self.pop_bool()? {
                        pc = self.body.target(*l);
                    }
                }
                Instr::TableSwitch { targets } => {
                    let i = match self.pop()? {
                        Value::I32(i) => i,
                        _ => return Err(Raised::Fatal("switch index must be i32")),
                    };
                    if i >= 0 && (i as usize) < targets.len() {
                        pc = self.body.target(targets[i as usize]);
                    }
                }
                Instr::StringSwitch(table) => {
                    let v = self.pop()?;
                    let idx = match &v {
                        Value::Str(s) => table.lookup(s),
                        Value::Null => -1,
                        _ => return Err(Raised::Fatal("string switch on non-string")),
                    };
                    self.stack.push(Value::I32(idx));
                }
                Instr::Leave(l) => {
                    pc = self.leave(at, self.body.target(*l))?;
                }
                Instr::Ret => {
                    return Ok(self.stack.pop().unwrap_or(Value::Null));
                }
                Instr::CallNative { func, argc } => {
                    let split = self.stack.len() - *argc as usize;
                    let mut args: Vec<Value> = self.stack.split_off(split);
                    let def = self.env.natives.get(*func);
                    match (def.func)(&mut args) {
                        Ok(v) => {
                            if !def.sig.ret.is_void() {
                                self.stack.push(v);
                            }
                        }
                        Err(RuntimeError::Unhandled(v)) => pc = self.unwind(v, at)?,
                        Err(RuntimeError::Internal(m)) => return Err(Raised::Fatal(m)),
                    }
                }
                Instr::Invoke { argc } => {
                    let split = self.stack.len() - *argc as usize;
                    let args: Vec<Value> = self.stack.split_off(split);
                    let target = self.pop()?;
                    let result = match &target {
                        Value::Delegate(c) => c.invoke(args),
                        Value::Null => Err(RuntimeError::Unhandled(
                            match self.builtin(self.env.builtins.null_value, "invoke of null") {
                                Raised::Exn(v) => v,
                                Raised::Fatal(_) => unreachable!(),
                            },
                        )),
                        _ => return Err(Raised::Fatal("invoke of non-delegate")),
                    };
                    match result {
                        Ok(v) => {
                            let ret_void = match &target {
                                Value::Delegate(c) => c.method.sig.ret.is_void(),
                                _ => false,
                            };
                            if !ret_void {
                                self.stack.push(v);
                            }
                        }
                        Err(RuntimeError::Unhandled(v)) => pc = self.unwind(v, at)?,
                        Err(RuntimeError::Internal(m)) => return Err(Raised::Fatal(m)),
                    }
                }
                Instr::MakeDelegate {
                    method,
                    capture_frame,
                } => {
                    let frame = if *capture_frame { Some(self.pop()?) } else { None };
                    self.stack.push(Value::Delegate(Rc::new(Closure {
                        method: method.clone(),
                        frame,
                        env: self.env.clone(),
                    })));
                }
                Instr::Throw => {
                    let exn = self.pop()?;
                    let exn = if exn.is_null() {
                        match self.builtin(self.env.builtins.null_value, "throw of null") {
                            Raised::Exn(v) => v,
                            Raised::Fatal(_) => unreachable!(),
                        }
                    } else {
                        exn
                    };
                    pc = self.unwind(exn, at)?;
                }
                Instr::Rethrow => {
                    let exn = self
                        .in_flight
                        .iter()
                        .rev()
                        .find(|(region, _)| {
                            self.body.regions[*region]
                                .catches
                                .iter()
                                .any(|c| c.body.contains(at))
                        })
                        .map(|(_, v)| v.clone())
                        .ok_or(Raised::Fatal("rethrow outside catch handler"))?;
                    pc = self.unwind(exn, at)?;
                }
                Instr::EndFilter => {
                    let verdict = self.pop_bool()?;
                    pc = self.end_filter(verdict)?;
                }
                Instr::EndFinally => {
                    pc = self.end_finally()?;
                }
                Instr::NewRuntimeVars(pairs) => {
                    let frame = self.pop()?;
                    let mut cells = Vec::with_capacity(pairs.len());
                    for (hops, index) in pairs.iter() {
                        cells.push(runtime_var_cell(&frame, *hops, *index)?);
                    }
                    self.stack.push(Value::Array(Rc::new(std::cell::RefCell::new(cells))));
                }
            }
        }
    }

    fn index_operand(&mut self) -> Result<usize, Raised> {
        match self.pop()? {
            Value::I32(i) if i >= 0 => Ok(i as usize),
            Value::I32(_) => Err(self.builtin(self.env.builtins.index_range, "negative index")),
            _ => Err(Raised::Fatal("array index must be i32")),
        }
    }

    fn array_operand(&mut self) -> Result<Rc<std::cell::RefCell<Vec<Value>>>, Raised> {
        match self.pop()? {
            Value::Array(a) => Ok(a),
            Value::Null => Err(self.builtin(self.env.builtins.null_value, "array was null")),
            _ => Err(Raised::Fatal("expected array operand")),
        }
    }

    fn object_operand(&mut self) -> Result<Rc<ObjectData>, Raised> {
        match self.pop()? {
            Value::Obj(o) => Ok(o),
            Value::Null => Err(self.builtin(self.env.builtins.null_value, "object was null")),
            _ => Err(Raised::Fatal("expected object operand")),
        }
    }

    // ---- protected-region machinery ----

    /// Regions whose try range covers `at`, innermost first.
    fn covering_regions(&self, at: u32) -> Vec<usize> {
        let mut ids: Vec<usize> = (0..self.body.regions.len())
            .filter(|&i| self.body.regions[i].try_contains(at))
            .collect();
        ids.sort_by_key(|&i| {
            let r = &self.body.regions[i];
            (std::cmp::Reverse(r.start), r.end)
        });
        ids
    }

    /// Regions spanning `at` anywhere (try, handler, or finalizer),
    /// innermost first.
    fn spanning_regions(&self, at: u32) -> Vec<usize> {
        let mut ids: Vec<usize> = (0..self.body.regions.len())
            .filter(|&i| self.body.regions[i].spans(at))
            .collect();
        ids.sort_by_key(|&i| {
            let r = &self.body.regions[i];
            (std::cmp::Reverse(r.start), r.end)
        });
        ids
    }

    /// Normal-control exit: run the finally (not fault) handlers of every
    /// region left behind, then branch to `target`.
    fn leave(&mut self, at: u32, target: u32) -> Result<u32, Raised> {
        self.stack.clear();
        let body = self.body;
        self.in_flight
            .retain(|(region, _)| body.regions[*region].spans(target));
        let mut fins: Vec<HandlerRange> = Vec::new();
        for i in self.spanning_regions(at) {
            let r = &self.body.regions[i];
            if r.spans(target) {
                continue;
            }
            if let Some(f) = r.finalizer {
                if !r.fault && !f.contains(at) {
                    fins.push(f);
                }
            }
        }
        self.run_finalizers(fins, Resume::Leave {
            remaining: Vec::new(),
            target,
        })
    }

    /// Steps into the first of `fins`, queuing the rest on the
    /// continuation stack; when there are none, resolves `resume` at once.
    fn run_finalizers(&mut self, mut fins: Vec<HandlerRange>, resume: Resume) -> Result<u32, Raised> {
        match resume {
            Resume::Leave { target, .. } if fins.is_empty() => Ok(target),
            Resume::Unwind { exn, handler, .. } if fins.is_empty() => {
                self.resolve_unwind(exn, handler)
            }
            Resume::Filter { .. } => Err(Raised::Fatal("filter used as finalizer resume")),
            resume => {
                let first = fins.remove(0);
                let resume = match resume {
                    Resume::Leave { target, .. } => Resume::Leave {
                        remaining: fins,
                        target,
                    },
                    Resume::Unwind { exn, handler, .. } => Resume::Unwind {
                        exn,
                        remaining: fins,
                        handler,
                    },
                    Resume::Filter { .. } => unreachable!(),
                };
                self.conts.push(Cont {
                    resume,
                    active: first,
                });
                self.stack.clear();
                Ok(first.start)
            }
        }
    }

    fn end_finally(&mut self) -> Result<u32, Raised> {
        let cont = self
            .conts
            .pop()
            .ok_or(Raised::Fatal("end-finally with no continuation"))?;
        match cont.resume {
            Resume::Leave { remaining, target } => {
                self.run_finalizers(remaining, Resume::Leave {
                    remaining: Vec::new(),
                    target,
                })
            }
            Resume::Unwind {
                exn,
                remaining,
                handler,
            } => self.run_finalizers(remaining, Resume::Unwind {
                exn,
                remaining: Vec::new(),
                handler,
            }),
            Resume::Filter { .. } => Err(Raised::Fatal("end-finally inside filter")),
        }
    }

    /// Starts (or continues) an unwind of `exn` raised at `at`. Returns
    /// the next pc; `Err` when the exception leaves the frame.
    fn unwind(&mut self, exn: Value, at: u32) -> Result<u32, Raised> {
        // Candidate handlers, innermost region first, source order within
        // a region. Unfiltered candidates are type-tested eagerly; a
        // filtered candidate defers to its filter code.
        let mut candidates: Vec<(usize, usize)> = Vec::new();
        for i in self.covering_regions(at) {
            for (j, c) in self.body.regions[i].catches.iter().enumerate() {
                if c.filter.is_some() || is_instance(&exn, &c.test_ty) {
                    candidates.push((i, j));
                }
            }
        }
        self.search_handler(exn, at, candidates)
    }

    fn search_handler(
        &mut self,
        exn: Value,
        at: u32,
        mut candidates: Vec<(usize, usize)>,
    ) -> Result<u32, Raised> {
        while let Some((region, catch)) = candidates.first().copied() {
            candidates.remove(0);
            let c = &self.body.regions[region].catches[catch];
            if let Some(filter) = c.filter {
                // Run the filter before committing; intervening finallys
                // wait until a handler accepts.
                self.conts.push(Cont {
                    resume: Resume::Filter {
                        exn: exn.clone(),
                        at,
                        candidate: (region, catch),
                        remaining: candidates,
                    },
                    active: filter,
                });
                self.stack.clear();
                self.stack.push(exn);
                return Ok(filter.start);
            }
            return self.accept_handler(exn, at, region, catch);
        }
        // No handler in this frame: run every finally and fault between
        // the raise point and the frame boundary, then propagate.
        let fins = self.unwind_finalizers(at, None);
        self.run_finalizers(fins, Resume::Unwind {
            exn,
            remaining: Vec::new(),
            handler: None,
        })
    }

    fn end_filter(&mut self, verdict: bool) -> Result<u32, Raised> {
        let cont = self
            .conts
            .pop()
            .ok_or(Raised::Fatal("end-filter with no continuation"))?;
        match cont.resume {
            Resume::Filter {
                exn,
                at,
                candidate: (region, catch),
                remaining,
            } => {
                if verdict {
                    self.accept_handler(exn, at, region, catch)
                } else {
                    self.search_handler(exn, at, remaining)
                }
            }
            _ => Err(Raised::Fatal("end-filter outside filter")),
        }
    }

    /// Finally and fault ranges to run for an unwind raised at `at`,
    /// innermost first, stopping short of `up_to` (the accepting region).
    fn unwind_finalizers(&self, at: u32, up_to: Option<usize>) -> Vec<HandlerRange> {
        let mut fins = Vec::new();
        for i in self.spanning_regions(at) {
            if Some(i) == up_to {
                break;
            }
            let r = &self.body.regions[i];
            if let Some(f) = r.finalizer {
                if !f.contains(at) {
                    fins.push(f);
                }
            }
        }
        fins
    }

    fn accept_handler(
        &mut self,
        exn: Value,
        at: u32,
        region: usize,
        catch: usize,
    ) -> Result<u32, Raised> {
        // A nested exception cancels any leave/unwind suspended in a
        // finalizer it escapes from.
        let region_start = self.body.regions[region].start;
        while let Some(top) = self.conts.last() {
            if top.active.contains(region_start) {
                break;
            }
            self.conts.pop();
        }
        let fins = self.unwind_finalizers(at, Some(region));
        let handler = self.body.regions[region].catches[catch].body.start;
        self.run_finalizers(fins, Resume::Unwind {
            exn,
            remaining: Vec::new(),
            handler: Some((region, handler)),
        })
    }

    /// Final step of an unwind once every intervening finalizer has run.
    fn resolve_unwind(
        &mut self,
        exn: Value,
        handler: Option<(usize, u32)>,
    ) -> Result<u32, Raised> {
        match handler {
            Some((region, pc)) => {
                self.stack.clear();
                self.stack.push(exn.clone());
                self.in_flight.push((region, exn));
                Ok(pc)
            }
            None => {
                self.conts.clear();
                Err(Raised::Exn(exn))
            }
        }
    }

    // ---- numerics ----

    fn arith(
        &self,
        op: ArithOp,
        ty: NumTy,
        checked: bool,
        a: Value,
        b: Value,
    ) -> Result<Value, Raised> {
        macro_rules! int_case {
            ($ty:ty, $ctor:path, $a:expr, $b:expr) => {{
                let (a, b): ($ty, $ty) = ($a, $b);
                let v: $ty = match op {
                    ArithOp::Add => {
                        if checked {
                            a.checked_add(b).ok_or_else(|| self.overflow())?
                        } else {
                            a.wrapping_add(b)
                        }
                    }
                    ArithOp::Sub => {
                        if checked {
                            a.checked_sub(b).ok_or_else(|| self.overflow())?
                        } else {
                            a.wrapping_sub(b)
                        }
                    }
                    ArithOp::Mul => {
                        if checked {
                            a.checked_mul(b).ok_or_else(|| self.overflow())?
                        } else {
                            a.wrapping_mul(b)
                        }
                    }
                    ArithOp::Div => {
                        if b == 0 {
                            return Err(self.builtin(
                                self.env.builtins.divide_by_zero,
                                "division by zero",
                            ));
                        }
                        a.checked_div(b).ok_or_else(|| self.overflow())?
                    }
                    ArithOp::Rem => {
                        if b == 0 {
                            return Err(self.builtin(
                                self.env.builtins.divide_by_zero,
                                "division by zero",
                            ));
                        }
                        a.checked_rem(b).ok_or_else(|| self.overflow())?
                    }
                    ArithOp::And => a & b,
                    ArithOp::Or => a | b,
                    ArithOp::Xor => a ^ b,
                    ArithOp::Shl => a.wrapping_shl(b as u32),
                    ArithOp::Shr => a.wrapping_shr(b as u32),
                };
                Ok($ctor(v))
            }};
        }
        macro_rules! float_case {
            ($ctor:path, $a:expr, $b:expr) => {{
                let (a, b) = ($a, $b);
                let v = match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                    ArithOp::Rem => a % b,
                    _ => return Err(Raised::Fatal("bitwise op on float")),
                };
                Ok($ctor(v))
            }};
        }
        use Value::*;
        match (ty, a, b) {
            (NumTy::I8, I8(a), I8(b)) => int_case!(i8, Value::I8, a, b),
            (NumTy::U8, U8(a), U8(b)) => int_case!(u8, Value::U8, a, b),
            (NumTy::I16, I16(a), I16(b)) => int_case!(i16, Value::I16, a, b),
            (NumTy::U16, U16(a), U16(b)) => int_case!(u16, Value::U16, a, b),
            (NumTy::I32, I32(a), I32(b)) => int_case!(i32, Value::I32, a, b),
            (NumTy::U32, U32(a), U32(b)) => int_case!(u32, Value::U32, a, b),
            (NumTy::I64, I64(a), I64(b)) => int_case!(i64, Value::I64, a, b),
            (NumTy::U64, U64(a), U64(b)) => int_case!(u64, Value::U64, a, b),
            (NumTy::F32, F32(a), F32(b)) => float_case!(Value::F32, a, b),
            (NumTy::F64, F64(a), F64(b)) => float_case!(Value::F64, a, b),
            _ => Err(Raised::Fatal("arith operand type mismatch")),
        }
    }

    fn overflow(&self) -> Raised {
        self.builtin(self.env.builtins.overflow, "arithmetic overflow")
    }

    fn negate(&self, ty: NumTy, checked: bool, a: Value) -> Result<Value, Raised> {
        macro_rules! neg_int {
            ($ctor:path, $v:expr) => {{
                if checked {
                    $v.checked_neg().map($ctor).ok_or_else(|| self.overflow())
                } else {
                    Ok($ctor($v.wrapping_neg()))
                }
            }};
        }
        use Value::*;
        match (ty, a) {
            (NumTy::I8, I8(v)) => neg_int!(Value::I8, v),
            (NumTy::I16, I16(v)) => neg_int!(Value::I16, v),
            (NumTy::I32, I32(v)) => neg_int!(Value::I32, v),
            (NumTy::I64, I64(v)) => neg_int!(Value::I64, v),
            (NumTy::F32, F32(v)) => Ok(Value::F32(-v)),
            (NumTy::F64, F64(v)) => Ok(Value::F64(-v)),
            _ => Err(Raised::Fatal("negate operand type mismatch")),
        }
    }

    fn convert(&self, v: Value, to: NumTy, overflow: Overflow) -> Result<Value, Raised> {
        enum Num {
            I(i64),
            U(u64),
            F(f64),
        }
        let src = match v {
            Value::I8(v) => Num::I(v as i64),
            Value::I16(v) => Num::I(v as i64),
            Value::I32(v) => Num::I(v as i64),
            Value::I64(v) => Num::I(v),
            Value::U8(v) => Num::U(v as u64),
            Value::U16(v) => Num::U(v as u64),
            Value::U32(v) => Num::U(v as u64),
            Value::U64(v) => Num::U(v),
            Value::F32(v) => Num::F(v as f64),
            Value::F64(v) => Num::F(v),
            _ => return Err(Raised::Fatal("convert of non-numeric")),
        };
        let checked = !matches!(overflow, Overflow::None);
        macro_rules! to_int {
            ($t:ty, $ctor:path) => {{
                match src {
                    Num::I(v) => {
                        if checked {
                            <$t>::try_from(v).map($ctor).map_err(|_| self.overflow())
                        } else {
                            Ok($ctor(v as $t))
                        }
                    }
                    Num::U(v) => {
                        if checked {
                            <$t>::try_from(v).map($ctor).map_err(|_| self.overflow())
                        } else {
                            Ok($ctor(v as $t))
                        }
                    }
                    Num::F(v) => {
                        if checked {
                            let t = v.trunc();
                            if t >= <$t>::MIN as f64 && t <= <$t>::MAX as f64 {
                                Ok($ctor(t as $t))
                            } else {
                                Err(self.overflow())
                            }
                        } else {
                            Ok($ctor(v as $t))
                        }
                    }
                }
            }};
        }
        match to {
            NumTy::I8 => to_int!(i8, Value::I8),
            NumTy::U8 => to_int!(u8, Value::U8),
            NumTy::I16 => to_int!(i16, Value::I16),
            NumTy::U16 => to_int!(u16, Value::U16),
            NumTy::I32 => to_int!(i32, Value::I32),
            NumTy::U32 => to_int!(u32, Value::U32),
            NumTy::I64 => to_int!(i64, Value::I64),
            NumTy::U64 => to_int!(u64, Value::U64),
            NumTy::F32 => Ok(Value::F32(match src {
                Num::I(v) => v as f32,
                Num::U(v) => v as f32,
                Num::F(v) => v as f32,
            })),
            NumTy::F64 => Ok(Value::F64(match src {
                Num::I(v) => v as f64,
                Num::U(v) => v as f64,
                Num::F(v) => v,
            })),
        }
    }
}

fn compare(op: CmpOp, ty: NumTy, a: &Value, b: &Value) -> Result<bool, Raised> {
    macro_rules! cmp {
        ($a:expr, $b:expr) => {{
            let (a, b) = ($a, $b);
            Ok(match op {
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
            })
        }};
    }
    use Value::*;
    match (ty, a, b) {
        (NumTy::I8, I8(a), I8(b)) => cmp!(a, b),
        (NumTy::U8, U8(a), U8(b)) => cmp!(a, b),
        (NumTy::I16, I16(a), I16(b)) => cmp!(a, b),
        (NumTy::U16, U16(a), U16(b)) => cmp!(a, b),
        (NumTy::I32, I32(a), I32(b)) => cmp!(a, b),
        (NumTy::U32, U32(a), U32(b)) => cmp!(a, b),
        (NumTy::I64, I64(a), I64(b)) => cmp!(a, b),
        (NumTy::U64, U64(a), U64(b)) => cmp!(a, b),
        (NumTy::F32, F32(a), F32(b)) => cmp!(a, b),
        (NumTy::F64, F64(a), F64(b)) => cmp!(a, b),
        _ => Err(Raised::Fatal("compare operand type mismatch")),
    }
}

/// Runtime type test backing `IsInstance`, filters, and catch dispatch.
fn is_instance(v: &Value, ty: &Ty) -> bool {
    match ty {
        Ty::Object => !v.is_null(),
        Ty::Nullable(inner) => is_instance(v, inner),
        Ty::Bool => matches!(v, Value::Bool(_)),
        Ty::I8 => matches!(v, Value::I8(_)),
        Ty::U8 => matches!(v, Value::U8(_)),
        Ty::I16 => matches!(v, Value::I16(_)),
        Ty::U16 => matches!(v, Value::U16(_)),
        Ty::I32 => matches!(v, Value::I32(_)),
        Ty::U32 => matches!(v, Value::U32(_)),
        Ty::I64 => matches!(v, Value::I64(_)),
        Ty::U64 => matches!(v, Value::U64(_)),
        Ty::F32 => matches!(v, Value::F32(_)),
        Ty::F64 => matches!(v, Value::F64(_)),
        Ty::Str => matches!(v, Value::Str(_)),
        Ty::Array(_) => matches!(v, Value::Array(_)),
        Ty::Delegate(_) => matches!(v, Value::Delegate(_)),
        Ty::Class(id) => matches!(v, Value::Obj(o) if o.type_def == *id),
        Ty::Void | Ty::Ref(_) => false,
    }
}

/// Walks `hops` parent links (element 0 cells) from a hoisted frame, then
/// picks the cell at `index`.
fn runtime_var_cell(frame: &Value, hops: u32, index: u32) -> Result<Value, Raised> {
    let mut current = frame.clone();
    for _ in 0..hops {
        let parent = match &current {
            Value::Array(a) => a.borrow().first().cloned(),
            _ => None,
        };
        current = match parent {
            Some(Value::Cell(c)) => c.borrow().clone(),
            _ => return Err(Raised::Fatal("hoisted frame parent link missing")),
        };
    }
    match &current {
        Value::Array(a) => a
            .borrow()
            .get(index as usize)
            .cloned()
            .ok_or(Raised::Fatal("hoisted slot out of range")),
        _ => Err(Raised::Fatal("hoisted frame is not an array")),
    }
}
