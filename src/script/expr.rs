//! Arithmetic/string expressions used by `set /a` and by the debugger's
//! evaluate command.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    /// Variables are stored as text; numeric text reads back as an integer.
    pub fn from_text(text: &str) -> Self {
        match text.trim().parse() {
            Ok(n) => Value::Int(n),
            Err(_) => Value::Str(text.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Op(char),
    Open,
    Close,
}

fn tokenize(src: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => tokens.push(Token::Int(read_int(&mut chars)?)),
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => text.push(c),
                        None => return Err(EvalError::Syntax("unterminated string".into())),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name));
            }
            '+' | '-' | '*' | '/' => {
                chars.next();
                tokens.push(Token::Op(ch));
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            other => return Err(EvalError::Syntax(format!("unexpected `{other}`"))),
        }
    }
    Ok(tokens)
}

fn read_int(chars: &mut Peekable<Chars<'_>>) -> Result<i64, EvalError> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(c);
            chars.next();
        } else {
            break;
        }
    }
    digits
        .parse()
        .map_err(|_| EvalError::Syntax(format!("number `{digits}` is too large")))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Value, EvalError> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            return match self.unary()? {
                Value::Int(n) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EvalError::Runtime("integer overflow".into())),
                Value::Str(_) => Err(EvalError::Runtime("cannot negate a string".into())),
            };
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, EvalError> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Value::Int(n)),
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Ident(name)) => (self.lookup)(&name)
                .map(|text| Value::from_text(&text))
                .ok_or(EvalError::UndefinedVariable(name)),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(EvalError::Syntax("missing `)`".into())),
                }
            }
            Some(other) => Err(EvalError::Syntax(format!("unexpected {other:?}"))),
            None => Err(EvalError::Syntax("unexpected end of expression".into())),
        }
    }
}

fn apply(op: char, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let overflow = || EvalError::Runtime("integer overflow".into());
    match (op, lhs, rhs) {
        ('+', Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        ('-', Value::Int(a), Value::Int(b)) => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        ('*', Value::Int(a), Value::Int(b)) => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        ('/', Value::Int(_), Value::Int(0)) => Err(EvalError::DivisionByZero),
        ('/', Value::Int(a), Value::Int(b)) => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
        ('+', a, b) => Ok(Value::Str(format!("{a}{b}"))),
        (op, _, _) => Err(EvalError::Runtime(format!("cannot apply `{op}` to a string"))),
    }
}

/// Evaluates `src`, resolving identifiers through `lookup`.
pub fn evaluate(src: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Value, EvalError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(EvalError::Syntax("empty expression".into()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        lookup,
    };
    let value = parser.expr()?;
    match parser.peek() {
        None => Ok(value),
        Some(token) => Err(EvalError::Syntax(format!("unexpected {token:?}"))),
    }
}
