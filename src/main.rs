use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use script_debugger::config::Args;
use script_debugger::dap::DapUi;
use script_debugger::debugger::{DebugControl, DebugServer};
use script_debugger::script::{run_script, ScriptRuntime, SourceSet};
use script_debugger::ui::console::ConsoleUi;
use script_debugger::ui::DebuggerUi;

fn main() -> Result<()> {
    let args = Args::parse();

    // stdout belongs to the script (and to the protocol in DAP mode).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), script = %args.script.display(), "starting debugger");

    let runtime = if args.dap {
        ScriptRuntime::with_sources(SourceSet::FileSystem, Box::new(io::stderr()))
    } else {
        ScriptRuntime::new()
    };
    let runtime = Arc::new(runtime);

    let entry = runtime.canonical_path(&args.script.to_string_lossy(), None)?;
    runtime
        .load(&entry)
        .with_context(|| format!("cannot start {}", args.script.display()))?;

    let server = DebugServer::with_config(Arc::clone(&runtime), args.server_config());
    for bp in &args.breakpoints {
        let mut bp = bp.clone();
        if !server.add_breakpoint(&mut bp) {
            warn!(breakpoint = %bp, "breakpoint does not match a loaded script yet");
        }
    }

    let ui: Arc<dyn DebuggerUi> = if args.dap {
        info!("speaking DAP on stdio");
        Arc::new(DapUi::stdio())
    } else {
        Arc::new(ConsoleUi::stdio())
    };
    server.start(ui);

    let result = run_script(&runtime, &entry);
    server.finish();

    let code = result.with_context(|| format!("{} failed", args.script.display()))?;
    info!(exit_code = code, "script finished");
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
