//! A small batch-style interpreter that hosts the debugger.

mod executor;
pub mod expr;
mod parser;
mod runtime;

pub use executor::{run_script, Frame};
pub use parser::{build_label_map, is_comment, Script, Statement};
pub use runtime::{ScopeRef, ScriptRuntime, SourceSet};
