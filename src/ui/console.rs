//! Line-oriented console front-end.

use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::str::FromStr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::{BreakEvent, DebuggerUi};
use crate::debugger::{lock, BreakPoint, DebugControl};
use crate::error::CommandError;

const PROMPT: &str = "(sdb) ";

const HELP: &str = "\
Commands:
  c, continue          resume the script
  s, step              run one line and stop again
  b, break FILE:LINE   set a breakpoint
  bl, breakpoints      list breakpoints
  bd, delete INDEX     remove a breakpoint
  bt, where            show the call stack
  up / down            move the active frame outward / inward
  l, list [BEGIN [END]] show source around the current line
  e, eval, p EXPR      evaluate EXPR in the active frame
  h, help              this text
  q, quit              drop all breakpoints and let the script finish";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Blank input.
    Nothing,
    Continue,
    Step,
    Break(BreakPoint),
    ListBreakpoints,
    Delete(usize),
    Backtrace,
    Up,
    Down,
    /// `0` means "default" for either bound.
    List { begin: usize, end: usize },
    Eval(String),
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let args = || shlex::split(rest).ok_or(CommandError::Quoting);

        let command = match word.to_lowercase().as_str() {
            "" => ConsoleCommand::Nothing,
            "c" | "continue" => ConsoleCommand::Continue,
            "s" | "step" => ConsoleCommand::Step,
            "b" | "break" => match args()?.as_slice() {
                [location] => ConsoleCommand::Break(location.parse()?),
                _ => return Err(CommandError::Usage("b FILE:LINE")),
            },
            "bl" | "breakpoints" => ConsoleCommand::ListBreakpoints,
            "bd" | "delete" => match args()?.as_slice() {
                [index] => ConsoleCommand::Delete(number(index)?),
                _ => return Err(CommandError::Usage("bd INDEX")),
            },
            "bt" | "where" => ConsoleCommand::Backtrace,
            "up" => ConsoleCommand::Up,
            "down" => ConsoleCommand::Down,
            "l" | "list" => match args()?.as_slice() {
                [] => ConsoleCommand::List { begin: 0, end: 0 },
                [begin] => ConsoleCommand::List {
                    begin: number(begin)?,
                    end: 0,
                },
                [begin, end] => ConsoleCommand::List {
                    begin: number(begin)?,
                    end: number(end)?,
                },
                _ => return Err(CommandError::Usage("l [BEGIN [END]]")),
            },
            // The expression is taken verbatim; quotes belong to it.
            "e" | "eval" | "p" if rest.is_empty() => return Err(CommandError::Usage("e EXPR")),
            "e" | "eval" | "p" => ConsoleCommand::Eval(rest.to_string()),
            "h" | "help" => ConsoleCommand::Help,
            "q" | "quit" => ConsoleCommand::Quit,
            _ => return Err(CommandError::Unknown(word.to_string())),
        };
        Ok(command)
    }
}

fn number(text: &str) -> Result<usize, CommandError> {
    text.parse()
        .map_err(|_| CommandError::InvalidNumber(text.to_string()))
}

enum ConsoleEvent {
    Startup,
    Break(BreakEvent),
    Terminated,
}

type Output = Arc<Mutex<Box<dyn Write + Send>>>;

/// Console UI. Commands are read only while the target is stopped, so the
/// reader never competes with the script for input.
pub struct ConsoleUi {
    input: Mutex<Option<Box<dyn BufRead + Send>>>,
    output: Output,
    events: Mutex<Option<Sender<ConsoleEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleUi {
    pub fn new(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input: Mutex::new(Some(input)),
            output: Arc::new(Mutex::new(output)),
            events: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Console on the process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(Box::new(BufReader::new(io::stdin())), Box::new(io::stdout()))
    }

    fn post(&self, event: ConsoleEvent) {
        if let Some(events) = lock(&self.events).as_ref() {
            if events.send(event).is_err() {
                warn!("console thread has exited");
            }
        }
    }
}

impl DebuggerUi for ConsoleUi {
    fn initialize(&self, server: Arc<dyn DebugControl>) {
        let Some(input) = lock(&self.input).take() else {
            warn!("console already initialized");
            return;
        };
        let (tx, rx) = channel();
        *lock(&self.events) = Some(tx);

        let repl = Repl {
            server,
            input,
            output: Arc::clone(&self.output),
            detached: false,
        };
        let spawned = thread::Builder::new()
            .name("console".to_string())
            .spawn(move || repl.run(rx));
        match spawned {
            Ok(handle) => *lock(&self.worker) = Some(handle),
            Err(err) => warn!(error = %err, "cannot start console thread"),
        }
    }

    fn wait_for_continue(&self) {
        self.post(ConsoleEvent::Startup);
    }

    fn on_break(&self, event: &BreakEvent) {
        self.post(ConsoleEvent::Break(event.clone()));
    }

    fn terminated(&self) {
        self.post(ConsoleEvent::Terminated);
        lock(&self.events).take();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("console thread panicked");
            }
        }
    }
}

/// The console thread.
struct Repl {
    server: Arc<dyn DebugControl>,
    input: Box<dyn BufRead + Send>,
    output: Output,
    detached: bool,
}

impl Repl {
    fn run(mut self, events: Receiver<ConsoleEvent>) {
        for event in events {
            match event {
                ConsoleEvent::Startup => {
                    self.say("Script loaded and held before its first line.");
                    self.say("Set breakpoints, then `c` to run or `s` to step. `h` for help.");
                }
                ConsoleEvent::Break(event) => self.show_stop(&event),
                ConsoleEvent::Terminated => {
                    self.say("Script finished.");
                    return;
                }
            }

            if self.detached {
                self.server.resume();
            } else {
                self.command_loop();
            }
        }
    }

    /// Reads commands until one of them lets the target run.
    fn command_loop(&mut self) {
        loop {
            let Some(line) = self.prompt() else {
                debug!("console input closed, detaching");
                self.detach();
                return;
            };
            match line.parse::<ConsoleCommand>() {
                Ok(command) => {
                    if self.dispatch(command) {
                        return;
                    }
                }
                Err(err) => self.say(err),
            }
        }
    }

    /// Returns true once the target has been released.
    fn dispatch(&mut self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Nothing => {}
            ConsoleCommand::Continue => return self.server.resume(),
            ConsoleCommand::Step => return self.server.step(),
            ConsoleCommand::Break(mut bp) => {
                if self.server.add_breakpoint(&mut bp) {
                    self.say(format_args!("Breakpoint {} at {}", bp.index, bp));
                } else {
                    self.say(format_args!(
                        "Breakpoint {} at {} pending until a matching script loads",
                        bp.index, bp
                    ));
                }
            }
            ConsoleCommand::ListBreakpoints => {
                let breakpoints = self.server.breakpoints();
                if breakpoints.is_empty() {
                    self.say("No breakpoints.");
                }
                for bp in breakpoints {
                    self.say(format_args!("{:>3}  {}", bp.index, bp));
                }
            }
            ConsoleCommand::Delete(index) => {
                if !self.server.remove_breakpoint(index) {
                    self.say(format_args!("No breakpoint {index}."));
                }
            }
            ConsoleCommand::Backtrace => self.show_frames(),
            ConsoleCommand::Up => {
                self.server.shift_active_frame(true);
                self.show_active_frame();
            }
            ConsoleCommand::Down => {
                self.server.shift_active_frame(false);
                self.show_active_frame();
            }
            ConsoleCommand::List { begin, end } => self.show_code(begin, end),
            ConsoleCommand::Eval(expr) => {
                let value = self.server.evaluate_expression(&expr);
                self.say(value);
            }
            ConsoleCommand::Help => self.say(HELP),
            ConsoleCommand::Quit => {
                self.detach();
                return true;
            }
        }
        false
    }

    fn detach(&mut self) {
        self.server.clear_breakpoints();
        self.detached = true;
        self.say("Detached; the script runs to completion.");
        self.server.resume();
    }

    fn show_stop(&mut self, event: &BreakEvent) {
        let (file, line) = event.location();
        match event {
            BreakEvent::BreakPoint(bp) => {
                self.say(format_args!("Breakpoint {} hit at {file}:{line}", bp.index))
            }
            BreakEvent::Step { .. } => self.say(format_args!("Stepped to {file}:{line}")),
        }
        self.show_code(0, 0);
    }

    fn show_code(&mut self, begin: usize, end: usize) {
        let current = self.server.break_line_number();
        let lines = self.server.code_lines(begin, end);
        if lines.is_empty() {
            self.say("No source to show.");
        }
        for (number, text) in lines {
            let marker = if number == current { "=>" } else { "  " };
            self.say(format_args!("{marker}{number:>5}  {text}"));
        }
    }

    fn show_frames(&mut self) {
        let active = self.server.active_frame_index();
        let frames = self.server.stack_frames();
        if frames.is_empty() {
            self.say("No frames.");
        }
        for (index, name) in frames.iter().enumerate() {
            let marker = if index == active { "=>" } else { "  " };
            self.say(format_args!("{marker} #{index} {name}"));
        }
    }

    fn show_active_frame(&mut self) {
        let active = self.server.active_frame_index();
        match self.server.stack_frames().get(active) {
            Some(name) => self.say(format_args!("#{active} {name}")),
            None => self.say("No frames."),
        }
    }

    fn prompt(&mut self) -> Option<String> {
        {
            let mut out = lock(&self.output);
            if let Err(err) = write!(out, "{PROMPT}").and_then(|_| out.flush()) {
                warn!(error = %err, "console write failed");
            }
        }
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(err) => {
                warn!(error = %err, "console read failed");
                None
            }
        }
    }

    fn say(&self, text: impl fmt::Display) {
        let mut out = lock(&self.output);
        if let Err(err) = writeln!(out, "{text}").and_then(|_| out.flush()) {
            warn!(error = %err, "console write failed");
        }
    }
}
