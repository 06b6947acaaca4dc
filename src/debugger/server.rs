use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, trace, warn};

use super::breakpoints::{BreakPoint, BreakPointTable};
use super::host::{LineHook, ScriptHost, StackInspector};
use super::resolver::LoadedSources;
use super::stack;
use super::state::{lock, ResumeSignal, StopState};
use crate::config::ServerConfig;
use crate::ui::{BreakEvent, DebuggerUi};

/// Returned by `evaluate_expression` when there is no frame to evaluate in.
pub const CANNOT_EVALUATE: &str = "Expression cannot be evaluated";

/// Control surface a front-end drives from its own thread.
pub trait DebugControl: Send + Sync {
    /// Registers `bp`, filling in its index and, when it resolves, its
    /// canonical file. Returns whether it resolved; registration itself
    /// always succeeds.
    fn add_breakpoint(&self, bp: &mut BreakPoint) -> bool;

    fn remove_breakpoint(&self, index: usize) -> bool;

    /// Drops every breakpoint, pending or resolved. Indices keep counting up.
    fn clear_breakpoints(&self);

    /// Every breakpoint in index order, after retrying pending ones.
    fn breakpoints(&self) -> Vec<BreakPoint>;

    fn is_stopped(&self) -> bool;

    /// Resumes and stops again at the next executed line. No-op unless
    /// stopped.
    fn step(&self) -> bool;

    /// Resumes the target. No-op unless stopped.
    fn resume(&self) -> bool;

    /// Evaluates `expr` in the active frame and returns the printable result
    /// or the error text.
    fn evaluate_expression(&self, expr: &str) -> String;

    /// Display names of the captured frames, innermost first.
    fn stack_frames(&self) -> Vec<String>;

    fn shift_active_frame(&self, up: bool);

    fn active_frame_index(&self) -> usize;

    /// Numbered source lines of the stop's file. `0` picks the default
    /// window around the break line for either bound.
    fn code_lines(&self, begin: usize, end: usize) -> Vec<(usize, String)>;

    fn break_line_number(&self) -> usize;

    fn break_file(&self) -> Option<String>;
}

/// Breakpoints and the loaded-source cache they resolve against. Sweeps and
/// refreshes always run under one lock.
#[derive(Debug, Default)]
struct Registry {
    table: BreakPointTable,
    sources: LoadedSources,
}

impl Registry {
    fn sweep(&mut self, host: &dyn super::host::SourceRegistry) {
        self.sources.refresh(host);
        self.sources.resolve_pending(&mut self.table);
    }
}

/// The debug engine: breakpoint bookkeeping, the line hook and the stop/resume
/// handshake with the front-end.
pub struct DebugServer<H: ScriptHost> {
    host: Arc<H>,
    config: ServerConfig,
    registry: Mutex<Registry>,
    state: Mutex<StopState<H::Env>>,
    resume: ResumeSignal,
    ui: Mutex<Option<Arc<dyn DebuggerUi>>>,
}

impl<H: ScriptHost> DebugServer<H> {
    pub fn new(host: Arc<H>) -> Arc<Self> {
        Self::with_config(host, ServerConfig::default())
    }

    pub fn with_config(host: Arc<H>, config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            host,
            config,
            registry: Mutex::new(Registry::default()),
            state: Mutex::new(StopState::default()),
            resume: ResumeSignal::new(),
            ui: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Installs the line hook, hands `ui` its control handle and holds the
    /// calling (interpreter) thread until the front-end lets the target run.
    pub fn start(self: &Arc<Self>, ui: Arc<dyn DebuggerUi>) {
        self.host.set_line_hook(Arc::new(TraceHook {
            server: Arc::downgrade(self),
        }));

        *lock(&self.ui) = Some(Arc::clone(&ui));
        ui.initialize(Arc::clone(self) as Arc<dyn DebugControl>);

        self.resume.arm();
        {
            let mut state = lock(&self.state);
            state.publish(None, Vec::new());
            if self.config.stop_on_entry {
                state.request_step();
            }
        }

        info!("holding target until the front-end continues");
        ui.wait_for_continue();
        self.resume.wait();
        lock(&self.state).clear_stale();
        info!("target running");
    }

    /// Tells the front-end the target finished and lets go of it.
    pub fn finish(&self) {
        let ui = lock(&self.ui).take();
        if let Some(ui) = ui {
            info!("target finished");
            ui.terminated();
        }
    }

    fn front_end(&self) -> Option<Arc<dyn DebuggerUi>> {
        lock(&self.ui).clone()
    }

    /// Line-event entry point, run on the interpreter thread.
    pub fn on_line(&self, file: &str, line: usize, stack: &dyn StackInspector<H::Env>) {
        trace!(file, line, "line event");

        let stepping = {
            let mut state = lock(&self.state);
            if state.is_stopped() {
                // Raised by code running inside an evaluation.
                trace!(file, line, "line event while stopped ignored");
                return;
            }
            state.clear_stale();
            state.take_step()
        };

        if stepping {
            let event = BreakEvent::Step {
                file: file.to_string(),
                line,
            };
            self.halt(event, file, line, stack);
            return;
        }

        let hit = {
            let mut registry = lock(&self.registry);
            if registry.table.has_unresolved() {
                registry.sweep(self.host.as_ref());
            }
            registry.table.lookup(file, line).cloned()
        };

        if let Some(bp) = hit {
            self.halt(BreakEvent::BreakPoint(bp), file, line, stack);
        }
    }

    /// Publishes a stop, notifies the front-end and blocks until released.
    fn halt(
        &self,
        event: BreakEvent,
        file: &str,
        line: usize,
        stack: &dyn StackInspector<H::Env>,
    ) {
        let generation = lock(&self.state).generation();
        let frames = stack::capture(stack, generation);
        let depth = frames.len();

        self.resume.arm();
        lock(&self.state).publish(Some((file, line)), frames);

        let Some(ui) = self.front_end() else {
            warn!(file, line, "stop with no front-end attached, continuing");
            lock(&self.state).clear();
            return;
        };

        match &event {
            BreakEvent::BreakPoint(bp) => info!(index = bp.index, file, line, depth, "breakpoint hit"),
            BreakEvent::Step { .. } => info!(file, line, depth, "step complete"),
        }
        ui.on_break(&event);

        self.resume.wait();
        lock(&self.state).clear_stale();
        debug!(file, line, "resumed");
    }

    fn release(&self, step: bool) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.is_stopped() {
                return false;
            }
            if step {
                state.request_step();
            }
            state.clear();
        }
        self.resume.release();
        true
    }
}

impl<H: ScriptHost> DebugControl for DebugServer<H> {
    fn add_breakpoint(&self, bp: &mut BreakPoint) -> bool {
        let mut registry = lock(&self.registry);
        let Registry { table, sources } = &mut *registry;
        sources.refresh(self.host.as_ref());
        let resolved = sources.resolve(bp);
        table.add(bp, resolved);
        resolved
    }

    fn remove_breakpoint(&self, index: usize) -> bool {
        lock(&self.registry).table.remove(index)
    }

    fn clear_breakpoints(&self) {
        lock(&self.registry).table.clear();
        debug!("breakpoints cleared");
    }

    fn breakpoints(&self) -> Vec<BreakPoint> {
        let mut registry = lock(&self.registry);
        registry.sweep(self.host.as_ref());
        registry.table.list()
    }

    fn is_stopped(&self) -> bool {
        lock(&self.state).is_stopped()
    }

    fn step(&self) -> bool {
        self.release(true)
    }

    fn resume(&self) -> bool {
        self.release(false)
    }

    fn evaluate_expression(&self, expr: &str) -> String {
        let env = lock(&self.state).active_env().cloned();
        let Some(env) = env else {
            return CANNOT_EVALUATE.to_string();
        };

        let host = self.host.as_ref();
        match panic::catch_unwind(AssertUnwindSafe(|| host.evaluate(expr, &env))) {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                debug!(expr, error = %err, "evaluation failed");
                err.to_string()
            }
            Err(_) => {
                warn!(expr, "evaluator panicked");
                format!("evaluation of `{expr}` panicked")
            }
        }
    }

    fn stack_frames(&self) -> Vec<String> {
        let state = lock(&self.state);
        if !state.is_stopped() {
            return Vec::new();
        }
        state
            .frames()
            .iter()
            .map(|frame| frame.display_name.clone())
            .collect()
    }

    fn shift_active_frame(&self, up: bool) {
        lock(&self.state).shift_active_frame(up);
    }

    fn active_frame_index(&self) -> usize {
        lock(&self.state).active_frame()
    }

    fn code_lines(&self, begin: usize, end: usize) -> Vec<(usize, String)> {
        let (file, break_line) = {
            let state = lock(&self.state);
            match (state.is_stopped(), state.break_file()) {
                (true, Some(file)) => (file.to_string(), state.break_line()),
                _ => return Vec::new(),
            }
        };

        let mut registry = lock(&self.registry);
        registry.sources.refresh(self.host.as_ref());
        let Some(lines) = registry.sources.lines(&file) else {
            return Vec::new();
        };

        let context = self.config.context_lines;
        let begin = if begin == 0 {
            break_line.saturating_sub(context).max(1)
        } else {
            begin
        };
        let end = if end == 0 {
            break_line.saturating_add(context)
        } else {
            end
        };
        let end = end.min(lines.len());

        if end < begin {
            return Vec::new();
        }
        (begin..=end)
            .map(|number| (number, lines[number - 1].clone()))
            .collect()
    }

    fn break_line_number(&self) -> usize {
        lock(&self.state).break_line()
    }

    fn break_file(&self) -> Option<String> {
        lock(&self.state).break_file().map(str::to_string)
    }
}

/// Registered with the host. Holds the server weakly so host and engine do
/// not keep each other alive.
struct TraceHook<H: ScriptHost> {
    server: Weak<DebugServer<H>>,
}

impl<H: ScriptHost> LineHook<H::Env> for TraceHook<H> {
    fn on_line(&self, file: &str, line: usize, stack: &dyn StackInspector<H::Env>) {
        if let Some(server) = self.server.upgrade() {
            server.on_line(file, line, stack);
        }
    }
}
