//! Named scalar parameters: arithmetic expressions that may reference each other.
//!
//! Evaluation never fails as a whole. Every parameter ends up with either a finite value or
//! exactly one [`ParamErrorKind`], and a broken parameter never prevents unrelated ones from
//! resolving.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::model::Parameter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamErrorKind {
    DuplicateName,
    UnknownReference,
    CyclicDependency,
    InvalidExpression,
    NonFiniteResult,
    DependencyError,
    /// A size expression whose result would exceed the buffer element limit.
    SizeTooLarge,
}

impl fmt::Display for ParamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamErrorKind::DuplicateName => "duplicate parameter name",
            ParamErrorKind::UnknownReference => "reference to an unknown parameter",
            ParamErrorKind::CyclicDependency => "cyclic dependency",
            ParamErrorKind::InvalidExpression => "invalid expression",
            ParamErrorKind::NonFiniteResult => "result is not a finite number",
            ParamErrorKind::DependencyError => "depends on a parameter with an error",
            ParamErrorKind::SizeTooLarge => "resulting buffer size is too large",
        })
    }
}

impl std::error::Error for ParamErrorKind {}

/// Result of [`evaluate_parameters`], keyed by parameter id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamEvaluation {
    pub values: HashMap<String, f64>,
    pub errors: HashMap<String, ParamErrorKind>,
    names: HashMap<String, String>,
}

impl ParamEvaluation {
    /// Resolved value or error for a parameter *name*; `None` if no parameter has that name.
    pub fn lookup(&self, name: &str) -> Option<Result<f64, ParamErrorKind>> {
        let id = self.names.get(name)?;
        if let Some(kind) = self.errors.get(id) {
            return Some(Err(*kind));
        }
        self.values.get(id).copied().map(Ok)
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Evaluate a standalone expression (a buffer size or dispatch count) against the
    /// resolved parameters.
    pub fn evaluate(&self, expr: &str) -> Result<f64, ParamErrorKind> {
        let mut substituted = String::with_capacity(expr.len());
        for token in tokenize(expr) {
            match token {
                Token::Ident(name) => match self.lookup(name) {
                    None => return Err(ParamErrorKind::UnknownReference),
                    Some(Err(_)) => return Err(ParamErrorKind::DependencyError),
                    Some(Ok(v)) => substituted.push_str(&format!("({v})")),
                },
                Token::Other(text) => substituted.push_str(text),
            }
        }
        evaluate_arithmetic(&substituted)
    }
}

enum Token<'a> {
    Ident(&'a str),
    Other(&'a str),
}

fn tokenize(expr: &str) -> Vec<Token<'_>> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut other_start = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_digit() || c == b'.' {
            // Numbers are consumed whole so `2x` is not read as the identifier `x`.
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.' || bytes[i] == b'_') {
                i += 1;
            }
        } else if c.is_ascii_alphabetic() || c == b'_' {
            if other_start < i {
                tokens.push(Token::Other(&expr[other_start..i]));
            }
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Token::Ident(&expr[start..i]));
            other_start = i;
        } else {
            i += 1;
        }
    }
    if other_start < expr.len() {
        tokens.push(Token::Other(&expr[other_start..]));
    }
    tokens
}

fn references(expr: &str) -> Vec<&str> {
    tokenize(expr)
        .into_iter()
        .filter_map(|t| match t {
            Token::Ident(name) => Some(name),
            Token::Other(_) => None,
        })
        .collect()
}

/// Resolve every parameter. Pure; repeated calls with the same input give the same output.
pub fn evaluate_parameters(params: &[Parameter]) -> ParamEvaluation {
    let mut eval = ParamEvaluation::default();

    let mut by_lower: HashMap<String, Vec<&str>> = HashMap::new();
    for p in params {
        let name = p.name.trim();
        by_lower.entry(name.to_lowercase()).or_default().push(&p.id);
        eval.names.insert(name.to_string(), p.id.clone());
    }
    for ids in by_lower.values().filter(|ids| ids.len() > 1) {
        for id in ids {
            eval.errors.insert(id.to_string(), ParamErrorKind::DuplicateName);
        }
    }

    let by_id: HashMap<&str, &Parameter> = params.iter().map(|p| (p.id.as_str(), p)).collect();
    let mut resolver = Resolver {
        by_id: &by_id,
        stack: Vec::new(),
        on_stack: HashSet::new(),
    };
    for p in params {
        resolver.resolve(&p.id, &mut eval);
    }
    eval
}

struct Resolver<'a> {
    by_id: &'a HashMap<&'a str, &'a Parameter>,
    stack: Vec<String>,
    on_stack: HashSet<String>,
}

impl Resolver<'_> {
    fn resolve(&mut self, id: &str, eval: &mut ParamEvaluation) -> Result<f64, ParamErrorKind> {
        if let Some(kind) = eval.errors.get(id) {
            return Err(*kind);
        }
        if let Some(v) = eval.values.get(id) {
            return Ok(*v);
        }
        if self.on_stack.contains(id) {
            // Everything from the first visit of `id` to the top of the stack is in the cycle.
            if let Some(pos) = self.stack.iter().position(|s| s == id) {
                for member in &self.stack[pos..] {
                    eval.errors
                        .insert(member.clone(), ParamErrorKind::CyclicDependency);
                }
            }
            return Err(ParamErrorKind::CyclicDependency);
        }
        let by_id = self.by_id;
        let Some(param) = by_id.get(id).copied() else {
            return Err(ParamErrorKind::UnknownReference);
        };

        let refs = references(&param.expr);
        let mut dep_ids = Vec::with_capacity(refs.len());
        for name in &refs {
            match eval.names.get(*name) {
                Some(dep) => dep_ids.push(dep.clone()),
                None => {
                    eval.errors
                        .insert(id.to_string(), ParamErrorKind::UnknownReference);
                    return Err(ParamErrorKind::UnknownReference);
                }
            }
        }

        self.stack.push(id.to_string());
        self.on_stack.insert(id.to_string());
        let mut upstream_failed = false;
        for dep in &dep_ids {
            if self.resolve(dep, eval).is_err() {
                upstream_failed = true;
            }
        }
        self.stack.pop();
        self.on_stack.remove(id);

        // A cycle found below us may already have claimed this parameter.
        if let Some(kind) = eval.errors.get(id) {
            return Err(*kind);
        }
        if upstream_failed {
            eval.errors
                .insert(id.to_string(), ParamErrorKind::DependencyError);
            return Err(ParamErrorKind::DependencyError);
        }

        match eval.evaluate(&param.expr) {
            Ok(v) => {
                eval.values.insert(id.to_string(), v);
                Ok(v)
            }
            Err(kind) => {
                eval.errors.insert(id.to_string(), kind);
                Err(kind)
            }
        }
    }
}

/// Evaluate text that should contain only numbers, `+ - * /`, parentheses and whitespace.
pub fn evaluate_arithmetic(text: &str) -> Result<f64, ParamErrorKind> {
    let allowed = |c: char| c.is_ascii_digit() || "+-*/().".contains(c) || c.is_whitespace();
    if text.trim().is_empty() || !text.chars().all(allowed) {
        return Err(ParamErrorKind::InvalidExpression);
    }

    let mut parser = Parser {
        src: text.as_bytes(),
        pos: 0,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos != parser.src.len() {
        return Err(ParamErrorKind::InvalidExpression);
    }
    if !value.is_finite() {
        return Err(ParamErrorKind::NonFiniteResult);
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, ParamErrorKind> {
        let mut acc = self.term()?;
        while let Some(op @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == b'+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<f64, ParamErrorKind> {
        let mut acc = self.factor()?;
        while let Some(op @ (b'*' | b'/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            acc = if op == b'*' { acc * rhs } else { acc / rhs };
        }
        Ok(acc)
    }

    fn factor(&mut self) -> Result<f64, ParamErrorKind> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some(b'+') => {
                self.pos += 1;
                self.factor()
            }
            Some(b'(') => {
                self.pos += 1;
                let v = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err(ParamErrorKind::InvalidExpression);
                }
                self.pos += 1;
                Ok(v)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => {
                let start = self.pos;
                while self.pos < self.src.len()
                    && (self.src[self.pos].is_ascii_digit() || self.src[self.pos] == b'.')
                {
                    self.pos += 1;
                }
                std::str::from_utf8(&self.src[start..self.pos])
                    .ok()
                    .and_then(|s| s.parse::<f64>().ok())
                    .ok_or(ParamErrorKind::InvalidExpression)
            }
            _ => Err(ParamErrorKind::InvalidExpression),
        }
    }
}
