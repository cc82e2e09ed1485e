// src/runtime/writer.rs
//
// The instruction sink and its single in-repo implementation. The sink is
// the compiler's only emission surface: labels, locals, opcodes, and
// protected-region markers. It applies no legality rules of its own; the
// compiler is responsible for stack balance and region nesting.

use crate::tree::Ty;

use super::instr::{
    CatchHandler, HandlerRange, Instr, LabelId, LocalId, MethodBody, TryRegion,
};

pub trait InstrSink {
    fn def_label(&mut self) -> LabelId;
    fn mark(&mut self, label: LabelId);
    fn declare_local(&mut self, ty: Ty) -> LocalId;
    fn emit(&mut self, instr: Instr);
    /// Opens a protected region over the instructions that follow.
    fn begin_try(&mut self);
    /// Opens the filter of the next catch handler; the filter code sees
    /// the exception on a fresh stack and ends with `EndFilter`.
    fn begin_filter(&mut self);
    /// Opens a catch handler. `test_ty` of `None` means the preceding
    /// filter region decides acceptance (the region then matches any
    /// exception type and defers to the filter).
    fn begin_catch(&mut self, test_ty: Option<Ty>);
    fn begin_finally(&mut self);
    fn begin_fault(&mut self);
    /// Closes the innermost open region.
    fn end_try(&mut self);
    fn offset(&self) -> u32;
}

#[derive(Debug)]
enum Pending {
    /// Still inside the try range.
    Body,
    Filter {
        start: u32,
    },
    Catch {
        test_ty: Ty,
        filter: Option<HandlerRange>,
        start: u32,
    },
    Finally {
        start: u32,
    },
    Fault {
        start: u32,
    },
}

#[derive(Debug)]
struct OpenRegion {
    start: u32,
    end: u32,
    catches: Vec<CatchHandler>,
    finalizer: Option<HandlerRange>,
    fault: bool,
    pending: Pending,
}

/// Builds a `MethodBody`: buffers instructions, resolves label marks to
/// offsets, and folds region markers into the exception table.
#[derive(Debug, Default)]
pub struct MethodWriter {
    code: Vec<Instr>,
    labels: Vec<Option<u32>>,
    locals: Vec<Ty>,
    regions: Vec<TryRegion>,
    open: Vec<OpenRegion>,
}

impl MethodWriter {
    pub fn new() -> MethodWriter {
        MethodWriter::default()
    }

    /// Closes whatever part of the innermost open region is in progress.
    fn seal_pending(&mut self) {
        let at = self.code.len() as u32;
        let region = self
            .open
            .last_mut()
            .expect("region marker outside begin_try");
        match std::mem::replace(&mut region.pending, Pending::Body) {
            Pending::Body => {
                region.end = at;
            }
            Pending::Filter { .. } => {
                // Sealed by the begin_catch(None) that follows; a filter
                // never ends a region on its own.
                unreachable!("filter region not followed by its catch");
            }
            Pending::Catch {
                test_ty,
                filter,
                start,
            } => {
                region.catches.push(CatchHandler {
                    test_ty,
                    filter,
                    body: HandlerRange { start, end: at },
                });
            }
            Pending::Finally { start } => {
                region.finalizer = Some(HandlerRange { start, end: at });
            }
            Pending::Fault { start } => {
                region.finalizer = Some(HandlerRange { start, end: at });
                region.fault = true;
            }
        }
    }

    pub fn finish(mut self, argc: u16) -> MethodBody {
        debug_assert!(self.open.is_empty(), "unclosed protected region");
        let labels = self
            .labels
            .drain(..)
            .map(|l| l.expect("unmarked label at finish"))
            .collect();
        MethodBody {
            code: self.code,
            labels,
            locals: self.locals,
            argc,
            regions: self.regions,
        }
    }
}

impl InstrSink for MethodWriter {
    fn def_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(None);
        id
    }

    fn mark(&mut self, label: LabelId) {
        let slot = &mut self.labels[label.0 as usize];
        debug_assert!(slot.is_none(), "label marked twice");
        *slot = Some(self.code.len() as u32);
    }

    fn declare_local(&mut self, ty: Ty) -> LocalId {
        let id = LocalId(self.locals.len() as u16);
        self.locals.push(ty);
        id
    }

    fn emit(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    fn begin_try(&mut self) {
        self.open.push(OpenRegion {
            start: self.code.len() as u32,
            end: 0,
            catches: Vec::new(),
            finalizer: None,
            fault: false,
            pending: Pending::Body,
        });
    }

    fn begin_filter(&mut self) {
        self.seal_pending();
        let at = self.code.len() as u32;
        let region = self.open.last_mut().expect("begin_filter outside try");
        region.pending = Pending::Filter { start: at };
    }

    fn begin_catch(&mut self, test_ty: Option<Ty>) {
        let at = self.code.len() as u32;
        let region = self.open.last_mut().expect("begin_catch outside try");
        match (test_ty, std::mem::replace(&mut region.pending, Pending::Body)) {
            (None, Pending::Filter { start }) => {
                // Filtered handler: the region accepts any exception type
                // and lets the filter code decide.
                region.pending = Pending::Catch {
                    test_ty: Ty::Object,
                    filter: Some(HandlerRange { start, end: at }),
                    start: at,
                };
            }
            (Some(ty), prev) => {
                region.pending = prev;
                self.seal_pending();
                let region = self.open.last_mut().expect("begin_catch outside try");
                region.pending = Pending::Catch {
                    test_ty: ty,
                    filter: None,
                    start: self.code.len() as u32,
                };
            }
            (None, _) => unreachable!("filtered catch without a preceding filter"),
        }
    }

    fn begin_finally(&mut self) {
        self.seal_pending();
        let at = self.code.len() as u32;
        let region = self.open.last_mut().expect("begin_finally outside try");
        region.pending = Pending::Finally { start: at };
    }

    fn begin_fault(&mut self) {
        self.seal_pending();
        let at = self.code.len() as u32;
        let region = self.open.last_mut().expect("begin_fault outside try");
        region.pending = Pending::Fault { start: at };
    }

    fn end_try(&mut self) {
        self.seal_pending();
        let region = self.open.pop().expect("end_try without begin_try");
        self.regions.push(TryRegion {
            start: region.start,
            end: region.end,
            catches: region.catches,
            finalizer: region.finalizer,
            fault: region.fault,
        });
    }

    fn offset(&self) -> u32 {
        self.code.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Value;

    #[test]
    fn labels_resolve_to_offsets() {
        let mut w = MethodWriter::new();
        let l = w.def_label();
        w.emit(Instr::Push(Value::I32(1)));
        w.emit(Instr::Branch(l));
        w.mark(l);
        w.emit(Instr::Ret);
        let body = w.finish(0);
        assert_eq!(body.target(l), 2);
    }

    #[test]
    fn region_table_records_catch_and_finally() {
        let mut w = MethodWriter::new();
        let end = w.def_label();
        w.begin_try();
        w.emit(Instr::Push(Value::I32(1)));
        w.emit(Instr::Leave(end));
        w.begin_catch(Some(Ty::Object));
        w.emit(Instr::Pop);
        w.emit(Instr::Leave(end));
        w.begin_finally();
        w.emit(Instr::EndFinally);
        w.end_try();
        w.mark(end);
        w.emit(Instr::Ret);
        let body = w.finish(0);

        assert_eq!(body.regions.len(), 1);
        let region = &body.regions[0];
        assert_eq!((region.start, region.end), (0, 2));
        assert_eq!(region.catches.len(), 1);
        assert_eq!(region.catches[0].body, HandlerRange { start: 2, end: 4 });
        assert_eq!(region.finalizer, Some(HandlerRange { start: 4, end: 5 }));
        assert!(!region.fault);
    }
}
