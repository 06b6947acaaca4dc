use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::protocol::{read_message, write_message, DapMessage, DapMessageContent};
use crate::debugger::{lock, BreakPoint, DebugControl};
use crate::error::ProtocolError;
use crate::ui::{BreakEvent, DebuggerUi};

/// The interpreter runs on a single thread.
const THREAD_ID: u64 = 1;

/// Outgoing half of the connection, shared by the request loop and the
/// interpreter thread (which emits `stopped` and `terminated`).
struct Outbox {
    seq: u64,
    writer: Box<dyn Write + Send>,
}

impl Outbox {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn send(&mut self, msg_type: &str, content: DapMessageContent) {
        let msg = DapMessage {
            seq: self.next_seq(),
            msg_type: msg_type.to_string(),
            content,
        };
        if let Err(err) = write_message(&mut self.writer, &msg) {
            warn!(error = %err, "cannot write DAP message");
        }
    }

    fn send_response(&mut self, request_seq: u64, command: &str, success: bool, body: Option<Value>) {
        self.send(
            "response",
            DapMessageContent::Response {
                request_seq,
                success,
                command: command.to_string(),
                message: None,
                body,
            },
        );
    }

    fn send_error(&mut self, request_seq: u64, command: &str, message: &str) {
        self.send(
            "response",
            DapMessageContent::Response {
                request_seq,
                success: false,
                command: command.to_string(),
                message: Some(message.to_string()),
                body: None,
            },
        );
    }

    fn send_event(&mut self, event: &str, body: Option<Value>) {
        self.send(
            "event",
            DapMessageContent::Event {
                event: event.to_string(),
                body,
            },
        );
    }
}

/// Where the startup handshake stands. `configurationDone` and the engine's
/// startup stop can arrive in either order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Startup {
    Configuring,
    Held,
    Configured,
}

/// Debug Adapter Protocol front-end. Requests are served on a reader thread
/// started by `initialize`; stop and exit events are written from the
/// interpreter thread.
pub struct DapUi {
    input: Mutex<Option<Box<dyn BufRead + Send>>>,
    outbox: Arc<Mutex<Outbox>>,
    startup: Arc<Mutex<Startup>>,
    server: Mutex<Option<Arc<dyn DebugControl>>>,
}

impl DapUi {
    pub fn new(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input: Mutex::new(Some(input)),
            outbox: Arc::new(Mutex::new(Outbox { seq: 0, writer: output })),
            startup: Arc::new(Mutex::new(Startup::Configuring)),
            server: Mutex::new(None),
        }
    }

    /// Adapter speaking on the process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(Box::new(BufReader::new(io::stdin())), Box::new(io::stdout()))
    }
}

impl DebuggerUi for DapUi {
    fn initialize(&self, server: Arc<dyn DebugControl>) {
        *lock(&self.server) = Some(Arc::clone(&server));
        let Some(input) = lock(&self.input).take() else {
            warn!("debug adapter already initialized");
            return;
        };

        let session = Session {
            server,
            input,
            outbox: Arc::clone(&self.outbox),
            startup: Arc::clone(&self.startup),
            sources: HashMap::new(),
        };
        // Detached: the reader ends on `disconnect` or end of input.
        let spawned = thread::Builder::new()
            .name("dap".to_string())
            .spawn(move || session.run());
        if let Err(err) = spawned {
            warn!(error = %err, "cannot start debug adapter thread");
        }
    }

    fn wait_for_continue(&self) {
        let mut startup = lock(&self.startup);
        if *startup == Startup::Configured {
            if let Some(server) = lock(&self.server).as_ref() {
                server.resume();
            }
        } else {
            *startup = Startup::Held;
            debug!("holding target until configurationDone");
        }
    }

    fn on_break(&self, event: &BreakEvent) {
        let body = match event {
            BreakEvent::BreakPoint(bp) => json!({
                "reason": "breakpoint",
                "threadId": THREAD_ID,
                "allThreadsStopped": true,
                "hitBreakpointIds": [bp.index],
            }),
            BreakEvent::Step { .. } => json!({
                "reason": "step",
                "threadId": THREAD_ID,
                "allThreadsStopped": true,
            }),
        };
        lock(&self.outbox).send_event("stopped", Some(body));
    }

    fn terminated(&self) {
        lock(&self.outbox).send_event("terminated", None);
        lock(&self.server).take();
    }
}

/// Request loop state.
struct Session {
    server: Arc<dyn DebugControl>,
    input: Box<dyn BufRead + Send>,
    outbox: Arc<Mutex<Outbox>>,
    startup: Arc<Mutex<Startup>>,
    /// Breakpoint indices registered per `setBreakpoints` source path.
    sources: HashMap<String, Vec<usize>>,
}

impl Session {
    fn run(mut self) {
        loop {
            let msg = match read_message(&mut self.input) {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    info!("debug adapter input closed");
                    break;
                }
                Err(ProtocolError::Json(err)) => {
                    warn!(error = %err, "skipping malformed DAP message");
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "debug adapter connection failed");
                    break;
                }
            };

            match msg.content {
                DapMessageContent::Request { command, arguments } if msg.msg_type == "request" => {
                    debug!(seq = msg.seq, command = %command, "request");
                    if !self.handle(msg.seq, &command, arguments) {
                        return;
                    }
                }
                other => debug!(message = ?other, "ignoring non-request message"),
            }
        }
        self.detach();
    }

    /// Returns false once the client has disconnected.
    fn handle(&mut self, seq: u64, command: &str, args: Option<Value>) -> bool {
        match command {
            "initialize" => self.handle_initialize(seq, command),
            "launch" | "attach" => self.respond(seq, command, None),
            "setBreakpoints" => self.handle_set_breakpoints(seq, command, args),
            "configurationDone" => self.handle_configuration_done(seq, command),
            "threads" => self.respond(
                seq,
                command,
                Some(json!({ "threads": [{ "id": THREAD_ID, "name": "script" }] })),
            ),
            "stackTrace" => self.handle_stack_trace(seq, command),
            "scopes" => self.respond(seq, command, Some(json!({ "scopes": [] }))),
            "evaluate" => self.handle_evaluate(seq, command, args),
            // Only this thread releases the target, so a stop seen here is
            // still live when the release below runs.
            "continue" | "next" | "stepIn" | "stepOut" if !self.server.is_stopped() => {
                lock(&self.outbox).send_error(seq, command, "not stopped");
            }
            "continue" => {
                self.respond(seq, command, Some(json!({ "allThreadsContinued": true })));
                self.server.resume();
            }
            "next" | "stepIn" | "stepOut" => {
                self.respond(seq, command, None);
                self.server.step();
            }
            "pause" => lock(&self.outbox).send_error(seq, command, "pause is not supported"),
            "disconnect" => {
                self.respond(seq, command, None);
                self.detach();
                return false;
            }
            _ => {
                warn!(command, "unhandled DAP request");
                lock(&self.outbox).send_error(seq, command, "unsupported request");
            }
        }
        true
    }

    fn respond(&self, seq: u64, command: &str, body: Option<Value>) {
        lock(&self.outbox).send_response(seq, command, true, body);
    }

    fn handle_initialize(&self, seq: u64, command: &str) {
        let body = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsStepBack": false,
            "supportsStepInTargetsRequest": false,
            "supportsFunctionBreakpoints": false,
            "supportsConditionalBreakpoints": false,
            "supportsSetVariable": false,
            "supportsEvaluateForHovers": true,
        });
        let mut outbox = lock(&self.outbox);
        outbox.send_response(seq, command, true, Some(body));
        outbox.send_event("initialized", None);
    }

    fn handle_set_breakpoints(&mut self, seq: u64, command: &str, args: Option<Value>) {
        let Some(path) = args
            .as_ref()
            .and_then(|v| v.get("source"))
            .and_then(|v| v.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            lock(&self.outbox).send_error(seq, command, "setBreakpoints needs source.path");
            return;
        };
        let lines: Vec<usize> = args
            .as_ref()
            .and_then(|v| v.get("breakpoints"))
            .and_then(Value::as_array)
            .map(|bps| {
                bps.iter()
                    .filter_map(|bp| bp.get("line").and_then(Value::as_u64))
                    .filter_map(|line| usize::try_from(line).ok())
                    .collect()
            })
            .unwrap_or_default();

        for index in self.sources.remove(&path).unwrap_or_default() {
            self.server.remove_breakpoint(index);
        }

        let mut registered = Vec::new();
        let mut reported = Vec::new();
        for line in lines {
            if line == 0 {
                reported.push(json!({ "verified": false, "line": line, "message": "invalid line" }));
                continue;
            }
            let mut bp = BreakPoint::new(path.as_str(), line);
            let verified = self.server.add_breakpoint(&mut bp);
            registered.push(bp.index);
            reported.push(json!({ "id": bp.index, "verified": verified, "line": line }));
        }
        debug!(path = %path, count = registered.len(), "breakpoints replaced");
        self.sources.insert(path, registered);

        self.respond(seq, command, Some(json!({ "breakpoints": reported })));
    }

    fn handle_configuration_done(&self, seq: u64, command: &str) {
        self.respond(seq, command, None);
        let mut startup = lock(&self.startup);
        if *startup == Startup::Held {
            self.server.resume();
        }
        *startup = Startup::Configured;
    }

    fn handle_stack_trace(&self, seq: u64, command: &str) {
        let frames: Vec<Value> = self
            .server
            .stack_frames()
            .iter()
            .enumerate()
            .map(|(id, name)| {
                let (path, line) = frame_location(name).unwrap_or(("", 0));
                json!({
                    "id": id,
                    "name": name,
                    "line": line,
                    "column": 1,
                    "source": { "path": path },
                })
            })
            .collect();
        self.respond(
            seq,
            command,
            Some(json!({ "stackFrames": frames, "totalFrames": frames.len() })),
        );
    }

    fn handle_evaluate(&self, seq: u64, command: &str, args: Option<Value>) {
        let Some(expr) = args
            .as_ref()
            .and_then(|v| v.get("expression"))
            .and_then(Value::as_str)
        else {
            lock(&self.outbox).send_error(seq, command, "evaluate needs an expression");
            return;
        };
        if let Some(frame) = args
            .as_ref()
            .and_then(|v| v.get("frameId"))
            .and_then(Value::as_u64)
            .and_then(|id| usize::try_from(id).ok())
        {
            self.select_frame(frame);
        }

        let result = self.server.evaluate_expression(expr);
        self.respond(
            seq,
            command,
            Some(json!({ "result": result, "variablesReference": 0 })),
        );
    }

    fn select_frame(&self, target: usize) {
        for _ in 0..self.server.stack_frames().len() {
            let active = self.server.active_frame_index();
            if active == target {
                break;
            }
            self.server.shift_active_frame(active < target);
        }
    }

    /// Lets the target run to completion with no further stops.
    fn detach(&self) {
        self.server.clear_breakpoints();
        *lock(&self.startup) = Startup::Configured;
        self.server.resume();
    }
}

/// Splits a frame display name (`path:line:in 'label'`) into path and line.
fn frame_location(name: &str) -> Option<(&str, usize)> {
    let (location, _) = name.rsplit_once(":in ")?;
    let (path, line) = location.rsplit_once(':')?;
    Some((path, line.parse().ok()?))
}
