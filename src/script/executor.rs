use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace};

use super::expr;
use super::parser::{Script, Statement};
use super::runtime::{ScopeRef, ScriptRuntime};
use crate::debugger::{RawFrame, StackInspector};
use crate::error::{EvalError, ScriptError};

/// One call level: a script, the label it was entered through and its scope.
#[derive(Debug)]
pub struct Frame {
    script: Arc<Script>,
    label: Option<String>,
    /// Next line to consider.
    pc: usize,
    /// Line currently executing (the `call` line for callers).
    line: usize,
    args: Vec<String>,
    scope: ScopeRef,
}

impl Frame {
    fn new(script: Arc<Script>, label: Option<String>, pc: usize, args: Vec<String>, scope: ScopeRef) -> Self {
        Self {
            script,
            label,
            pc,
            line: pc,
            args,
            scope,
        }
    }

    pub fn display_name(&self) -> String {
        let name = match &self.label {
            Some(label) => format!(":{label}"),
            None => "<main>".to_string(),
        };
        format!("{}:{}:in '{}'", self.script.path, self.line, name)
    }

    fn arg(&self, n: usize) -> Option<&str> {
        n.checked_sub(1)
            .and_then(|i| self.args.get(i))
            .map(String::as_str)
    }
}

/// Live call stack as seen from the line hook.
struct CallStack<'a>(&'a [Frame]);

impl StackInspector<ScopeRef> for CallStack<'_> {
    fn frames(&self) -> Vec<RawFrame<ScopeRef>> {
        self.0
            .iter()
            .rev()
            .map(|frame| RawFrame {
                name: frame.display_name(),
                env: frame.scope.clone(),
            })
            .collect()
    }
}

enum Flow {
    Next,
    Return,
    Exit(i32),
}

/// Runs the script at `path` to completion, raising a line event before
/// every executable line. Returns the last `exit /b` code.
pub fn run_script(runtime: &ScriptRuntime, path: &str) -> Result<i32, ScriptError> {
    let path = runtime.canonical_path(path, None)?;
    let script = runtime.load(&path)?;
    let globals = ScopeRef::root();
    let mut stack = vec![Frame::new(script, None, 1, Vec::new(), globals.clone())];
    let mut exit_code = 0;

    while let Some(frame) = stack.last_mut() {
        // EOF unwinding
        if frame.pc > frame.script.len() {
            stack.pop();
            continue;
        }

        let line = frame.pc;
        frame.pc += 1;
        let Some(stmt) = frame.script.statement(line).cloned() else {
            continue;
        };
        frame.line = line;
        let script = Arc::clone(&frame.script);

        if let Some(hook) = runtime.line_hook() {
            hook.on_line(&script.path, line, &CallStack(&stack));
        }

        match execute(runtime, &mut stack, &globals, &stmt)? {
            Flow::Next => {}
            Flow::Return => {
                stack.pop();
            }
            Flow::Exit(code) => {
                exit_code = code;
                globals.set("ERRORLEVEL", code.to_string());
                stack.pop();
            }
        }
    }

    debug!(path = %path, exit_code, "script completed");
    Ok(exit_code)
}

fn execute(
    runtime: &ScriptRuntime,
    stack: &mut Vec<Frame>,
    globals: &ScopeRef,
    stmt: &Statement,
) -> Result<Flow, ScriptError> {
    let Some(frame) = stack.last_mut() else {
        return Ok(Flow::Return);
    };
    let script = Arc::clone(&frame.script);
    let line = frame.line;
    let eval_error = |source: EvalError| ScriptError::Eval {
        path: script.path.clone(),
        line,
        source,
    };

    match stmt {
        Statement::Nop => {}
        Statement::Echo(text) => runtime.write_line(&expand(text, frame))?,
        Statement::Set { name, value } => {
            let value = expand(value, frame);
            trace!(name = %name, value = %value, "set");
            frame.scope.set(name, value);
        }
        Statement::SetArith { name, expr } => {
            let source = expand(expr, frame);
            let scope = frame.scope.clone();
            let value = expr::evaluate(&source, &|var| scope.get(var)).map_err(eval_error)?;
            frame.scope.set(name, value.to_string());
        }
        Statement::CallLabel { label, args } => {
            let target = script.label(label).ok_or_else(|| ScriptError::UnknownLabel {
                path: script.path.clone(),
                line,
                label: label.clone(),
            })?;
            let args = split_args(&expand(args, frame), &script, line)?;
            trace!(label = %label, target, "call");
            stack.push(Frame::new(
                Arc::clone(&script),
                Some(label.clone()),
                target + 1,
                args,
                globals.child(),
            ));
        }
        Statement::CallScript { path, args } => {
            let base = Path::new(&script.path).parent();
            let target = runtime.canonical_path(&expand(path, frame), base)?;
            let args = split_args(&expand(args, frame), &script, line)?;
            let callee = runtime.load(&target)?;
            trace!(target = %target, "call script");
            stack.push(Frame::new(callee, None, 1, args, globals.child()));
        }
        Statement::Goto(label) => {
            frame.pc = script.label(label).ok_or_else(|| ScriptError::UnknownLabel {
                path: script.path.clone(),
                line,
                label: label.clone(),
            })?;
        }
        Statement::Return => return Ok(Flow::Return),
        Statement::Exit(code) => {
            let code = match code {
                Some(code) => {
                    let text = expand(code, frame);
                    text.trim().parse().map_err(|_| {
                        eval_error(EvalError::Runtime(format!("invalid exit code `{text}`")))
                    })?
                }
                None => 0,
            };
            return Ok(Flow::Exit(code));
        }
        Statement::If {
            negate,
            lhs,
            rhs,
            then,
        } => {
            let matched = expand(lhs, frame) == expand(rhs, frame);
            if matched != *negate {
                return execute(runtime, stack, globals, then);
            }
        }
    }
    Ok(Flow::Next)
}

fn split_args(text: &str, script: &Script, line: usize) -> Result<Vec<String>, ScriptError> {
    shlex::split(text).ok_or_else(|| ScriptError::Parse {
        path: script.path.clone(),
        line,
        message: "unbalanced quotes in arguments".to_string(),
    })
}

/// Expands `%NAME%`, `%0`..`%9`, `%~1`..`%~9` and `%%`. Unknown variables
/// expand to nothing.
fn expand(text: &str, frame: &Frame) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let mut chars = after.chars();

        match chars.next() {
            Some('%') => {
                out.push('%');
                rest = &after[1..];
            }
            Some('0') => {
                match &frame.label {
                    Some(label) => out.push_str(&format!(":{label}")),
                    None => out.push_str(&frame.script.path),
                }
                rest = &after[1..];
            }
            Some(d @ '1'..='9') => {
                let arg = frame.arg(d as usize - '0' as usize).unwrap_or("");
                if arg.contains(char::is_whitespace) {
                    out.push_str(&format!("\"{arg}\""));
                } else {
                    out.push_str(arg);
                }
                rest = &after[1..];
            }
            Some('~') if matches!(chars.next(), Some('1'..='9')) => {
                let d = after.as_bytes()[1];
                out.push_str(frame.arg((d - b'0') as usize).unwrap_or(""));
                rest = &after[2..];
            }
            _ => match after.find('%') {
                Some(end) => {
                    let name = &after[..end];
                    out.push_str(&frame.scope.get(name).unwrap_or_default());
                    rest = &after[end + 1..];
                }
                None => {
                    out.push('%');
                    rest = after;
                }
            },
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn run(files: &[(&str, &str)], entry: &str) -> (Result<i32, ScriptError>, String) {
        let out = Captured::default();
        let files = files
            .iter()
            .map(|(p, t)| (p.to_string(), t.to_string()))
            .collect();
        let runtime = ScriptRuntime::with_sources(
            crate::script::SourceSet::Memory(files),
            Box::new(out.clone()),
        );
        let result = run_script(&runtime, entry);
        (result, out.text())
    }

    #[test]
    fn runs_calls_and_expansion() {
        let main = "@echo off
set NAME=World
echo Hello %NAME%
call :twice \"a b\" 21
echo after %RESULT%
exit /b 3

:twice
set /a RESULT=%2 * 2
echo [%~1] %1 100%%
goto :eof
";
        let (result, out) = run(&[("/s/main.bat", main)], "/s/main.bat");
        assert_eq!(result.unwrap(), 3);
        // RESULT was set in the subroutine's own scope.
        assert_eq!(out, "Hello World\n[a b] \"a b\" 100%\nafter \n");
    }

    #[test]
    fn calls_other_scripts_relative_to_caller() {
        let main = "call lib/util.bat 5\necho done\n";
        let util = "echo util got %1\nexit /b 0\n";
        let (result, out) = run(
            &[("/s/main.bat", main), ("/s/lib/util.bat", util)],
            "/s/main.bat",
        );
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, "util got 5\ndone\n");
    }

    #[test]
    fn goto_and_if() {
        let main = "set N=0
:loop
set /a N=N + 1
if not %N%==3 goto loop
echo N=%N%
";
        let (result, out) = run(&[("/s/loop.bat", main)], "/s/loop.bat");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, "N=3\n");
    }

    #[test]
    fn reports_runtime_errors_with_location() {
        let (result, _) = run(&[("/s/e.bat", "echo ok\nset /a X=1 / 0\n")], "/s/e.bat");
        match result {
            Err(ScriptError::Eval { line, source, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(source, EvalError::DivisionByZero);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let (result, _) = run(&[("/s/l.bat", "goto nowhere\n")], "/s/l.bat");
        assert!(matches!(result, Err(ScriptError::UnknownLabel { line: 1, .. })));
    }
}
