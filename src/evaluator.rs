//! Rego compilation and evaluation, wrapped over the embedded `regorus`
//! engine.
//!
//! A [`PolicyCompiler`] parses a set of modules into a [`CompiledPolicy`];
//! evaluation clones the prepared engine per call, so a compiled policy is
//! immutable and safe to share across concurrent requests.

use std::time::Instant;

use once_cell::sync::Lazy;
use regorus::Engine as RegorusEngine;
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};

/// Unsafe builtins stripped from policy compilation by default.
pub const DEFAULT_UNSAFE_BUILTINS: &[&str] = &["http.send", "opa.runtime"];

/// Internal prefixes stripped from evaluator messages before they surface on
/// bundle references.
static INTERNAL_PREFIXES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "rego_parse_error: ",
        "rego_compile_error: ",
        "rego_type_error: ",
        "rego_unsafe_var_error: ",
        "rego_recursion_error: ",
    ]
});

fn strip_internal_prefixes(message: &str) -> String {
    let trimmed = message.trim();
    for prefix in INTERNAL_PREFIXES.iter() {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    trimmed.to_string()
}

/// Compiles Rego modules under a configurable capability set.
///
/// The compiler is cheap to clone; [`PolicyCompiler::permissive`] derives the
/// mapper-compiler variant that re-enables the builtins policy compilation
/// denies.
#[derive(Debug, Clone)]
pub struct PolicyCompiler {
    denied_builtins: Vec<String>,
}

impl Default for PolicyCompiler {
    fn default() -> Self {
        PolicyCompiler {
            denied_builtins: DEFAULT_UNSAFE_BUILTINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PolicyCompiler {
    /// A compiler denying the given builtins.
    pub fn new(denied_builtins: Vec<String>) -> Self {
        PolicyCompiler { denied_builtins }
    }

    /// The mapper-compiler variant: same compiler with the deny-list cleared.
    pub fn permissive(&self) -> Self {
        PolicyCompiler {
            denied_builtins: Vec::new(),
        }
    }

    /// Syntactic validation of a single module. Used by the validator; the
    /// module is parsed but no compiled artifact is retained.
    pub fn parse(&self, filename: &str, rego: &str) -> Result<()> {
        self.check_builtins(filename, rego)?;
        let mut engine = RegorusEngine::new();
        engine
            .add_policy(filename.to_string(), rego.to_string())
            .map_err(|e| Error::Compilation(strip_internal_prefixes(&e.to_string())))?;
        Ok(())
    }

    /// Parse a set of `(filename, source)` modules as one unit.
    pub fn compile(&self, name: &str, modules: &[(String, String)]) -> Result<CompiledPolicy> {
        let mut engine = RegorusEngine::new();
        for (filename, source) in modules {
            self.check_builtins(filename, source)?;
            engine
                .add_policy(filename.clone(), source.clone())
                .map_err(|e| {
                    Error::Compilation(format!(
                        "{filename}: {}",
                        strip_internal_prefixes(&e.to_string())
                    ))
                })?;
        }
        trace!(policy = name, modules = modules.len(), "compiled policy");
        Ok(CompiledPolicy {
            name: name.to_string(),
            engine,
        })
    }

    fn check_builtins(&self, filename: &str, rego: &str) -> Result<()> {
        for builtin in &self.denied_builtins {
            if references_builtin(rego, builtin) {
                return Err(Error::Compilation(format!(
                    "{filename}: unsafe builtin {builtin} is not permitted"
                )));
            }
        }
        Ok(())
    }
}

/// Minimal token stream for call-site scanning: identifiers, string
/// literals, and single punctuation characters. Comments are dropped and
/// string contents are kept as opaque values.
#[derive(Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Sym(char),
}

fn lex(rego: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = rego.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '#' => {
                while chars.next_if(|&c| c != '\n').is_some() {}
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        other => value.push(other),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '`' => {
                chars.next();
                let mut value = String::new();
                for c in chars.by_ref() {
                    if c == '`' {
                        break;
                    }
                    value.push(c);
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(c) = chars.next_if(|&c| c.is_alphanumeric() || c == '_') {
                    ident.push(c);
                }
                tokens.push(Token::Ident(ident));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            other => {
                tokens.push(Token::Sym(other));
                chars.next();
            }
        }
    }
    tokens
}

/// True when the module contains a call site for the named builtin, in
/// dotted (`http.send(..)`) or bracket (`http["send"](..)`) form. Mentions
/// inside comments and string literals do not count. Builtins resolve bare,
/// so a path reached through `data.` or any other leading reference is a
/// reference, not a builtin call.
fn references_builtin(rego: &str, builtin: &str) -> bool {
    let mut segments = builtin.split('.');
    let first = match segments.next() {
        Some(s) if !s.is_empty() => s,
        _ => return false,
    };
    let rest: Vec<&str> = segments.collect();
    let tokens = lex(rego);

    'candidates: for (start, token) in tokens.iter().enumerate() {
        match token {
            Token::Ident(ident) if ident.as_str() == first => {}
            _ => continue,
        }
        if start > 0 && tokens[start - 1] == Token::Sym('.') {
            continue;
        }
        let mut pos = start + 1;
        for segment in &rest {
            pos = match (tokens.get(pos), tokens.get(pos + 1), tokens.get(pos + 2)) {
                (Some(Token::Sym('.')), Some(Token::Ident(ident)), _)
                    if ident.as_str() == *segment =>
                {
                    pos + 2
                }
                (Some(Token::Sym('[')), Some(Token::Str(key)), Some(Token::Sym(']')))
                    if key.as_str() == *segment =>
                {
                    pos + 3
                }
                _ => continue 'candidates,
            };
        }
        if tokens.get(pos) == Some(&Token::Sym('(')) {
            return true;
        }
    }
    false
}

/// A compiled, immutable policy bundle ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    name: String,
    engine: RegorusEngine,
}

impl CompiledPolicy {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate a query against JSON-shaped input, returning the single
    /// result row's value.
    ///
    /// No result row (an undefined query) is an evaluation error; callers
    /// treat it as a DENY vote for the bundle. A deadline already breached
    /// when evaluation starts fails the same way.
    pub fn evaluate(
        &self,
        query: &str,
        input: &Value,
        deadline: Option<Instant>,
    ) -> Result<Value> {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(Error::Evaluation(format!(
                    "deadline exceeded before evaluating {query}"
                )));
            }
        }

        let input_json = serde_json::to_string(input)?;

        let mut engine = self.engine.clone();
        engine
            .set_input_json(&input_json)
            .map_err(|e| Error::InvalidParam(format!("input is not JSON-shaped: {e}")))?;
        let results = engine
            .eval_query(query.to_string(), false)
            .map_err(|e| Error::Evaluation(strip_internal_prefixes(&e.to_string())))?;

        let value = results
            .result
            .first()
            .and_then(|row| row.expressions.first())
            .map(|expr| expr.value.clone())
            .filter(|v| *v != regorus::Value::Undefined)
            .ok_or_else(|| Error::Evaluation(format!("query {query} produced no result")))?;

        // Value renders as JSON text; round-trip into the serde model.
        serde_json::from_str(&value.to_string())
            .map_err(|e| Error::Evaluation(format!("result is not JSON-shaped: {e}")))
    }
}
