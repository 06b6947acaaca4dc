use std::collections::HashMap;

use crate::error::ScriptError;

/// One executable source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `@echo off` and friends; runs but has no effect.
    Nop,
    Echo(String),
    Set { name: String, value: String },
    SetArith { name: String, expr: String },
    CallLabel { label: String, args: String },
    CallScript { path: String, args: String },
    Goto(String),
    /// `goto :eof`
    Return,
    Exit(Option<String>),
    If {
        negate: bool,
        lhs: String,
        rhs: String,
        then: Box<Statement>,
    },
}

/// A parsed script: raw lines for listing, statements by line, labels.
#[derive(Debug)]
pub struct Script {
    pub path: String,
    pub lines: Vec<String>,
    statements: Vec<Option<Statement>>,
    labels: HashMap<String, usize>,
}

impl Script {
    pub fn parse(path: &str, text: &str) -> Result<Self, ScriptError> {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut statements = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            let stmt = parse_line(line).map_err(|message| ScriptError::Parse {
                path: path.to_string(),
                line: i + 1,
                message,
            })?;
            statements.push(stmt);
        }
        let labels = build_label_map(&lines);

        Ok(Self {
            path: path.to_string(),
            lines,
            statements,
            labels,
        })
    }

    /// Statement on 1-based `line`, `None` for blank, comment and label lines.
    pub fn statement(&self, line: usize) -> Option<&Statement> {
        line.checked_sub(1)
            .and_then(|i| self.statements.get(i))
            .and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Line of `:label`, case-insensitive.
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(&name.to_lowercase()).copied()
    }
}

/// Scan labels (case-insensitive), mapped to their 1-based line.
pub fn build_label_map(lines: &[String]) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (i, line) in lines.iter().enumerate() {
        let t = line.trim();
        if t.starts_with("::") {
            continue;
        }
        if let Some(label_text) = t.strip_prefix(':') {
            if let Some(name) = label_text.split_whitespace().next() {
                map.insert(name.to_lowercase(), i + 1);
            }
        }
    }
    map
}

/// Check if line is a comment or blank
pub fn is_comment(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("::") {
        return true;
    }
    let upper = trimmed.to_uppercase();
    upper == "REM" || upper.starts_with("REM ") || upper.starts_with("REM\t")
}

fn parse_line(line: &str) -> Result<Option<Statement>, String> {
    if is_comment(line) || line.trim().starts_with(':') {
        return Ok(None);
    }
    parse_statement(line.trim()).map(Some)
}

/// Splits off the first word, returning it uppercased and the trimmed rest.
fn keyword(text: &str) -> (String, &str) {
    match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head.to_uppercase(), rest.trim()),
        None => (text.to_uppercase(), ""),
    }
}

fn parse_statement(text: &str) -> Result<Statement, String> {
    let text = text.strip_prefix('@').unwrap_or(text).trim();
    let (word, rest) = keyword(text);

    match word.as_str() {
        "ECHO" => match rest.to_uppercase().as_str() {
            "OFF" | "ON" => Ok(Statement::Nop),
            _ => Ok(Statement::Echo(rest.to_string())),
        },
        "ECHO." => Ok(Statement::Echo(String::new())),
        "SETLOCAL" | "ENDLOCAL" => Ok(Statement::Nop),
        "SET" => parse_set(rest),
        "CALL" => {
            let (target, args) = match rest.split_once(char::is_whitespace) {
                Some((target, args)) => (target, args.trim()),
                None => (rest, ""),
            };
            if target.is_empty() {
                return Err("CALL needs a target".to_string());
            }
            match target.strip_prefix(':') {
                Some(label) => Ok(Statement::CallLabel {
                    label: label.to_lowercase(),
                    args: args.to_string(),
                }),
                None => Ok(Statement::CallScript {
                    path: target.trim_matches('"').to_string(),
                    args: args.to_string(),
                }),
            }
        }
        "GOTO" => {
            let label = rest
                .trim_start_matches(':')
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_lowercase();
            match label.as_str() {
                "" => Err("GOTO needs a label".to_string()),
                "eof" => Ok(Statement::Return),
                _ => Ok(Statement::Goto(label)),
            }
        }
        "EXIT" => {
            let (flag, code) = keyword(rest);
            if flag != "/B" {
                return Err("only EXIT /B is supported".to_string());
            }
            Ok(Statement::Exit((!code.is_empty()).then(|| code.to_string())))
        }
        "IF" => parse_if(rest),
        _ => Err(format!("unsupported command `{}`", text)),
    }
}

fn parse_set(rest: &str) -> Result<Statement, String> {
    let (arith, body) = match rest.get(..2) {
        Some(flag) if flag.eq_ignore_ascii_case("/a") => (true, rest[2..].trim()),
        _ => (false, rest),
    };
    let (name, value) = body
        .split_once('=')
        .ok_or_else(|| format!("SET needs NAME=VALUE, got `{}`", body))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(format!("invalid variable name `{}`", name));
    }
    if arith {
        Ok(Statement::SetArith {
            name: name.to_string(),
            expr: value.trim().to_string(),
        })
    } else {
        Ok(Statement::Set {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

fn parse_if(rest: &str) -> Result<Statement, String> {
    let (word, after_not) = keyword(rest);
    let (negate, cond) = if word == "NOT" {
        (true, after_not)
    } else {
        (false, rest)
    };

    let (lhs, tail) = cond
        .split_once("==")
        .ok_or_else(|| "IF needs a `==` comparison".to_string())?;
    let tail = tail.trim_start();

    // A quoted right-hand side may contain spaces.
    let split_at = if let Some(quoted) = tail.strip_prefix('"') {
        quoted.find('"').map(|i| i + 2).unwrap_or(tail.len())
    } else {
        tail.find(char::is_whitespace).unwrap_or(tail.len())
    };
    let (rhs, then) = tail.split_at(split_at);
    let then = then.trim();
    if then.is_empty() {
        return Err("IF needs a command".to_string());
    }

    Ok(Statement::If {
        negate,
        lhs: lhs.trim().to_string(),
        rhs: rhs.to_string(),
        then: Box::new(parse_statement(then)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "@echo off
REM sample
set NAME=World
echo Hello %NAME%

call :greet \"dear friend\" 2
exit /b 0

:: helpers
:greet
set /a COUNT=%2 * 10
if not \"%~1\"==\"\" echo %~1
goto :eof
";

    #[test]
    fn parses_statements_by_line() {
        let script = Script::parse("/s/sample.bat", SAMPLE).unwrap();
        assert_eq!(script.len(), 13);
        assert_eq!(script.statement(1), Some(&Statement::Nop));
        assert_eq!(script.statement(2), None);
        assert_eq!(
            script.statement(3),
            Some(&Statement::Set {
                name: "NAME".into(),
                value: "World".into()
            })
        );
        assert_eq!(script.statement(5), None);
        assert_eq!(
            script.statement(6),
            Some(&Statement::CallLabel {
                label: "greet".into(),
                args: "\"dear friend\" 2".into()
            })
        );
        assert_eq!(script.statement(7), Some(&Statement::Exit(Some("0".into()))));
        assert_eq!(script.statement(9), None);
        assert_eq!(script.statement(10), None);
        assert_eq!(script.statement(13), Some(&Statement::Return));
        assert_eq!(script.statement(0), None);
        assert_eq!(script.statement(99), None);
    }

    #[test]
    fn labels_skip_comments() {
        let script = Script::parse("/s/sample.bat", SAMPLE).unwrap();
        assert_eq!(script.label("GREET"), Some(10));
        assert_eq!(script.label("helpers"), None);
    }

    #[test]
    fn parses_if_with_quoted_operand() {
        let stmt = parse_statement("if \"%A%\"==\"two words\" goto done").unwrap();
        assert_eq!(
            stmt,
            Statement::If {
                negate: false,
                lhs: "\"%A%\"".into(),
                rhs: "\"two words\"".into(),
                then: Box::new(Statement::Goto("done".into())),
            }
        );
    }

    #[test]
    fn comment_detection() {
        assert!(is_comment("REM This is a comment"));
        assert!(is_comment(":: This is also a comment"));
        assert!(is_comment("rem"));
        assert!(is_comment(""));
        assert!(!is_comment("echo Hello"));
        assert!(!is_comment("remark.bat"));
    }

    #[test]
    fn call_to_another_script() {
        let stmt = parse_statement("call lib\\util.bat one").unwrap();
        assert_eq!(
            stmt,
            Statement::CallScript {
                path: "lib\\util.bat".into(),
                args: "one".into()
            }
        );
    }

    #[test]
    fn reports_line_of_bad_statement() {
        let err = Script::parse("/s/bad.bat", "echo ok\npause\n").unwrap_err();
        match err {
            ScriptError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}
