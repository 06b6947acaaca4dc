use std::path::PathBuf;

use clap::Parser;

use crate::debugger::BreakPoint;

/// Lines shown on each side of the break line when no range is given.
pub const DEFAULT_CONTEXT_LINES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Window used by `code_lines(0, 0)`.
    pub context_lines: usize,
    /// Stop at the first executed line whatever the front-end does at startup.
    pub stop_on_entry: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            context_lines: DEFAULT_CONTEXT_LINES,
            stop_on_entry: false,
        }
    }
}

/// Source-level debugger for batch-style scripts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Script to run
    pub script: PathBuf,

    /// Speak the Debug Adapter Protocol on stdin/stdout instead of the console
    #[arg(long, alias = "debug-adapter")]
    pub dap: bool,

    /// Breakpoint to set before the script starts, as FILE:LINE
    #[arg(short, long = "break", value_name = "FILE:LINE")]
    pub breakpoints: Vec<BreakPoint>,

    /// Stop on the first executed line
    #[arg(long)]
    pub stop_on_entry: bool,

    /// Lines listed around the current line
    #[arg(long, default_value_t = DEFAULT_CONTEXT_LINES)]
    pub context_lines: usize,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            context_lines: self.context_lines,
            stop_on_entry: self.stop_on_entry,
        }
    }
}
