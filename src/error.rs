use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure while evaluating an expression inside a stopped frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0}")]
    Runtime(String),
}

/// Malformed `file:line` breakpoint location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("expected <file>:<line>, got `{0}`")]
    MissingLine(String),
    #[error("invalid line number `{0}`")]
    InvalidLine(String),
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("{path}:{line}: unknown label `{label}`")]
    UnknownLabel {
        path: String,
        line: usize,
        label: String,
    },
    #[error("{path}:{line}: {source}")]
    Eval {
        path: String,
        line: usize,
        #[source]
        source: EvalError,
    },
    #[error("cannot write script output: {0}")]
    Output(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error on the protocol stream: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing Content-Length header")]
    MissingLength,
    #[error("invalid Content-Length `{0}`")]
    InvalidLength(String),
}

/// Console input that is not a valid command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command `{0}`, type `h` for help")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("`{0}` is not a number")]
    InvalidNumber(String),
    #[error("unbalanced quotes")]
    Quoting,
    #[error(transparent)]
    Location(#[from] LocationError),
}
