// src/compiler/guard.rs
//
// Recursion guard for pathologically deep trees. Every recursive visitor
// entry point (spiller, binder, code generator) passes through here; when
// native stack headroom runs low the traversal continues on a fresh stack
// segment and rejoins, producing identical results either way.

/// Headroom below which the stack is grown.
const RED_ZONE: usize = 96 * 1024;

/// Size of each additional stack segment.
const STACK_SEGMENT: usize = 2 * 1024 * 1024;

pub(crate) fn with_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_SEGMENT, f)
}
