use std::io::{self, BufReader, Read, Write};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use script_debugger::dap::{read_message, write_message, DapMessage, DapMessageContent, DapUi};
use script_debugger::debugger::DebugServer;
use script_debugger::script::{run_script, ScriptRuntime};

const TIMEOUT: Duration = Duration::from_secs(5);

const MAIN: &str = "@echo off
set NAME=adapter
echo %NAME%
set /a N=2 * 21
exit /b 0
";

/// Byte pipe built on a channel; reads fail after `TIMEOUT` of silence.
struct PipeReader {
    chunks: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.chunks.recv_timeout(TIMEOUT) {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct PipeWriter(Sender<Vec<u8>>);

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn pipe() -> (PipeWriter, BufReader<PipeReader>) {
    let (tx, rx) = channel();
    let reader = PipeReader {
        chunks: rx,
        pending: Vec::new(),
    };
    (PipeWriter(tx), BufReader::new(reader))
}

struct Client {
    seq: u64,
    requests: PipeWriter,
    replies: BufReader<PipeReader>,
}

impl Client {
    fn request(&mut self, command: &str, arguments: Value) {
        self.seq += 1;
        let msg = DapMessage {
            seq: self.seq,
            msg_type: "request".to_string(),
            content: DapMessageContent::Request {
                command: command.to_string(),
                arguments: Some(arguments),
            },
        };
        write_message(&mut self.requests, &msg).unwrap();
    }

    fn next(&mut self) -> Value {
        let msg = read_message(&mut self.replies)
            .unwrap()
            .expect("adapter went quiet");
        serde_json::to_value(msg).unwrap()
    }

    fn response(&mut self, command: &str) -> Value {
        let msg = self.next();
        assert_eq!(msg["type"], "response", "{msg}");
        assert_eq!(msg["command"], command, "{msg}");
        msg
    }

    fn event(&mut self, event: &str) -> Value {
        let msg = self.next();
        assert_eq!(msg["type"], "event", "{msg}");
        assert_eq!(msg["event"], event, "{msg}");
        msg
    }
}

fn launch() -> Client {
    let (requests, adapter_in) = pipe();
    let (adapter_out, replies) = pipe();
    let ui = DapUi::new(Box::new(adapter_in), Box::new(adapter_out));

    thread::spawn(move || {
        let runtime = Arc::new(ScriptRuntime::in_memory([("/proj/main.bat", MAIN)]));
        let server = DebugServer::new(Arc::clone(&runtime));
        server.start(Arc::new(ui));
        let _ = run_script(&runtime, "/proj/main.bat");
        server.finish();
    });

    Client {
        seq: 0,
        requests,
        replies,
    }
}

#[test]
fn breakpoint_step_and_evaluate_over_dap() {
    let mut client = launch();

    client.request("initialize", json!({ "adapterID": "script" }));
    let init = client.response("initialize");
    assert_eq!(init["success"], true);
    assert_eq!(init["body"]["supportsConfigurationDoneRequest"], true);
    client.event("initialized");

    client.request("launch", json!({}));
    client.response("launch");

    client.request(
        "setBreakpoints",
        json!({ "source": { "path": "main.bat" }, "breakpoints": [{ "line": 3 }, { "line": 0 }] }),
    );
    let set = client.response("setBreakpoints");
    assert_eq!(set["body"]["breakpoints"][0]["id"], 1);
    assert_eq!(set["body"]["breakpoints"][0]["verified"], false);
    assert_eq!(set["body"]["breakpoints"][1]["verified"], false);

    client.request("configurationDone", json!({}));
    client.response("configurationDone");
    let stopped = client.event("stopped");
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(stopped["body"]["hitBreakpointIds"], json!([1]));

    client.request("threads", json!({}));
    let threads = client.response("threads");
    assert_eq!(threads["body"]["threads"][0]["id"], 1);

    client.request("stackTrace", json!({ "threadId": 1 }));
    let trace = client.response("stackTrace");
    let top = &trace["body"]["stackFrames"][0];
    assert_eq!(top["line"], 3);
    assert_eq!(top["source"]["path"], "/proj/main.bat");
    assert_eq!(top["name"], "/proj/main.bat:3:in '<main>'");

    client.request("scopes", json!({ "frameId": 0 }));
    assert_eq!(client.response("scopes")["body"]["scopes"], json!([]));

    client.request("evaluate", json!({ "expression": "NAME + \"!\"", "frameId": 0 }));
    assert_eq!(client.response("evaluate")["body"]["result"], "adapter!");

    client.request("next", json!({ "threadId": 1 }));
    client.response("next");
    assert_eq!(client.event("stopped")["body"]["reason"], "step");

    client.request("pause", json!({ "threadId": 1 }));
    assert_eq!(client.response("pause")["success"], false);

    client.request("frobnicate", json!({}));
    assert_eq!(client.response("frobnicate")["success"], false);

    client.request("continue", json!({ "threadId": 1 }));
    client.response("continue");
    client.event("terminated");

    client.request("continue", json!({ "threadId": 1 }));
    let late = client.response("continue");
    assert_eq!(late["success"], false);
    assert_eq!(late["message"], "not stopped");
    client.request("next", json!({ "threadId": 1 }));
    assert_eq!(client.response("next")["success"], false);

    client.request("disconnect", json!({}));
    client.response("disconnect");
}

#[test]
fn replacing_breakpoints_drops_the_old_ones() {
    let mut client = launch();

    client.request("initialize", json!({}));
    client.response("initialize");
    client.event("initialized");

    client.request(
        "setBreakpoints",
        json!({ "source": { "path": "main.bat" }, "breakpoints": [{ "line": 2 }] }),
    );
    client.response("setBreakpoints");
    client.request(
        "setBreakpoints",
        json!({ "source": { "path": "main.bat" }, "breakpoints": [{ "line": 4 }] }),
    );
    let set = client.response("setBreakpoints");
    assert_eq!(set["body"]["breakpoints"][0]["id"], 2);

    client.request("configurationDone", json!({}));
    client.response("configurationDone");
    let stopped = client.event("stopped");
    assert_eq!(stopped["body"]["hitBreakpointIds"], json!([2]));

    client.request("disconnect", json!({}));
    client.response("disconnect");
    client.event("terminated");
}
