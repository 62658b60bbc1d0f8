//! Shell-style glob patterns.
//!
//! A pattern supports `*` (any run of characters), `**` (any run of
//! characters, including separators), `?` (any single character),
//! `{a,b}` alternation and `\` escapes. When a separator is configured,
//! `*` and `?` never match it.
//!
//! Patterns are compiled to anchored regular expressions. A pattern that
//! fails to compile matches nothing. The free functions keep every pattern
//! they compile, so repeated decisions against the same project reuse it.

use ahash::AHashMap as HashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

#[derive(Clone, Debug)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum GlobError {
    #[error("pattern '{0}' ends with an unterminated escape")]
    TrailingEscape(String),

    #[error("pattern '{0}' has an unclosed '{{'")]
    UnclosedAlternation(String),

    #[error("pattern '{pattern}' is not a valid expression: {reason}")]
    Invalid { pattern: String, reason: String },
}

/// Compiled patterns by pattern and separator. `None` marks a pattern that
/// failed to compile.
static COMPILED: Lazy<RwLock<HashMap<(String, Option<char>), Option<Glob>>>> =
    Lazy::new(Default::default);

/// Matches `candidate` against `pattern`, where `*` matches any string.
pub fn is_match(pattern: &str, candidate: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    cached(pattern, None).is_some_and(|g| g.is_match(candidate))
}

/// Matches `candidate` against `pattern`, where `*` stops at `separator`.
pub fn is_match_with_separator(pattern: &str, candidate: &str, separator: char) -> bool {
    cached(pattern, Some(separator)).is_some_and(|g| g.is_match(candidate))
}

/// Matches `candidate` against `pattern`. When negation is allowed, a
/// pattern of the form `!p` matches exactly the candidates `p` rejects.
pub fn matches(pattern: &str, candidate: &str, allow_negation: bool) -> bool {
    match pattern.strip_prefix('!') {
        Some(negated) if allow_negation => !is_match(negated, candidate),
        _ => is_match(pattern, candidate),
    }
}

/// Returns true if the pattern is a negation (`!p`).
pub fn is_deny_pattern(pattern: &str) -> bool {
    pattern.starts_with('!')
}

// === impl Glob ===

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        Self::compile(pattern, None)
    }

    pub fn with_separator(pattern: &str, separator: char) -> Result<Self, GlobError> {
        Self::compile(pattern, Some(separator))
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    fn compile(pattern: &str, separator: Option<char>) -> Result<Self, GlobError> {
        let expr = translate(pattern, separator)?;
        let regex = Regex::new(&expr).map_err(|error| GlobError::Invalid {
            pattern: pattern.to_string(),
            reason: error.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }
}

fn cached(pattern: &str, separator: Option<char>) -> Option<Glob> {
    let key = (pattern.to_string(), separator);
    if let Some(glob) = COMPILED.read().get(&key) {
        return glob.clone();
    }

    let glob = match Glob::compile(pattern, separator) {
        Ok(glob) => Some(glob),
        Err(error) => {
            tracing::debug!(%error, "Pattern matches nothing");
            None
        }
    };
    COMPILED.write().entry(key).or_insert(glob).clone()
}

fn translate(pattern: &str, separator: Option<char>) -> Result<String, GlobError> {
    let (any_run, any_char) = match separator {
        Some(sep) => {
            let sep = regex::escape(&sep.to_string());
            (format!("[^{sep}]*"), format!("[^{sep}]"))
        }
        None => ("(?s:.*)".to_string(), "(?s:.)".to_string()),
    };

    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');

    let mut depth = 0usize;
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    while chars.peek() == Some(&'*') {
                        chars.next();
                    }
                    expr.push_str("(?s:.*)");
                } else {
                    expr.push_str(&any_run);
                }
            }
            '?' => expr.push_str(&any_char),
            '{' => {
                depth += 1;
                expr.push_str("(?:");
            }
            ',' if depth > 0 => expr.push('|'),
            '}' if depth > 0 => {
                depth -= 1;
                expr.push(')');
            }
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| GlobError::TrailingEscape(pattern.to_string()))?;
                expr.push_str(&regex::escape(&escaped.to_string()));
            }
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }

    if depth > 0 {
        return Err(GlobError::UnclosedAlternation(pattern.to_string()));
    }

    expr.push('$');
    Ok(expr)
}
