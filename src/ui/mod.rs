//! Front-end contract. A front-end runs its own thread; the engine only ever
//! calls into it to announce that the target has stopped.

pub mod console;

use std::sync::Arc;

use crate::debugger::{BreakPoint, DebugControl};

/// Why the target stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakEvent {
    /// A resolved breakpoint matched the line about to run.
    BreakPoint(BreakPoint),
    /// A step request completed.
    Step { file: String, line: usize },
}

impl BreakEvent {
    pub fn location(&self) -> (&str, usize) {
        match self {
            BreakEvent::BreakPoint(bp) => (&bp.file, bp.line),
            BreakEvent::Step { file, line } => (file, *line),
        }
    }
}

pub trait DebuggerUi: Send + Sync {
    /// Hands the front-end its control handle. Called once, before anything
    /// else, on the interpreter thread.
    fn initialize(&self, server: Arc<dyn DebugControl>);

    /// The target is held before its first line; the front-end may set
    /// breakpoints and must eventually resume or step.
    fn wait_for_continue(&self);

    /// The target stopped. Implementations dispatch to their own thread and
    /// return; the engine keeps the interpreter blocked until the front-end
    /// calls `resume` or `step`.
    fn on_break(&self, event: &BreakEvent);

    /// The target finished; the front-end should wind down.
    fn terminated(&self) {}
}
