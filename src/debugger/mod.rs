mod breakpoints;
pub mod host;
mod resolver;
mod server;
mod stack;
mod state;

pub use breakpoints::{BreakPoint, BreakPointTable};
pub use host::{LineHook, RawFrame, ScriptHost, SourceRegistry, StackInspector};
pub use resolver::{contains_ignore_case, LoadedSources};
pub use server::{DebugControl, DebugServer, CANNOT_EVALUATE};
pub use stack::{capture, EnvHandle, StackFrame};
pub(crate) use state::lock;
pub use state::{ResumeSignal, StopState};
