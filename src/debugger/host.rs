//! What the engine needs from the interpreter it is attached to.

use std::sync::Arc;

use crate::error::EvalError;

/// Read access to the interpreter's table of loaded scripts.
pub trait SourceRegistry: Send + Sync {
    /// Canonical paths of every script loaded so far.
    fn loaded_scripts(&self) -> Vec<String>;

    /// Source lines of a loaded script, first line first.
    fn script_lines(&self, path: &str) -> Option<Vec<String>>;
}

/// One level of the interpreter's call stack as reported at a line event.
#[derive(Debug, Clone)]
pub struct RawFrame<E> {
    pub name: String,
    pub env: E,
}

/// Introspection handed to the line hook. Only valid for the duration of the
/// callback it was passed to.
pub trait StackInspector<E> {
    /// Live frames, innermost first.
    fn frames(&self) -> Vec<RawFrame<E>>;
}

/// Callback the interpreter invokes before executing each source line.
pub trait LineHook<E>: Send + Sync {
    fn on_line(&self, file: &str, line: usize, stack: &dyn StackInspector<E>);
}

/// The full interpreter integration contract.
pub trait ScriptHost: SourceRegistry + 'static {
    /// Opaque handle to the bindings visible in one frame.
    type Env: Clone + Send + Sync + 'static;

    /// Installs the global line hook. Replaces any previous hook.
    fn set_line_hook(&self, hook: Arc<dyn LineHook<Self::Env>>);

    /// Evaluates `expr` against `env`, returning its printable form.
    fn evaluate(&self, expr: &str, env: &Self::Env) -> Result<String, EvalError>;
}
