//! Filter-query compiler.
//!
//! Turns the user-facing search syntax (`key:value`, `!key:value`, quoted
//! phrases, bare text) into structured predicates evaluated against the
//! per-event tag-hash membership set.

use serde::{Deserialize, Serialize};

/// One structured tag predicate. `negated` flips the membership test from
/// "has tag" to "does not have tag".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPredicate {
    pub key: String,
    pub value: String,
    pub negated: bool,
}

impl TagPredicate {
    /// The `key=value` membership string this predicate checks.
    pub fn tag_hash(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

/// A compiled search query: bare free-text tokens plus tag predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub free_text: Vec<String>,
    pub predicates: Vec<TagPredicate>,
}

impl SearchQuery {
    /// The single free-text term the legacy one-field search used: only the
    /// last bare token is retained.
    pub fn legacy_free_text(&self) -> Option<&str> {
        self.free_text.last().map(String::as_str)
    }
}

/// Compile a raw query string.
///
/// Tokens are split on whitespace outside quotes. A token containing `:` is
/// a `key:value` predicate (value may be single- or double-quoted to include
/// spaces); a leading `!` on the key negates it. Everything else is free
/// text.
pub fn compile(query: &str) -> SearchQuery {
    let mut out = SearchQuery::default();

    for token in tokenize(query) {
        let (negated, rest) = match token.strip_prefix('!') {
            Some(rest) if rest.contains(':') => (true, rest),
            _ => (false, token.as_str()),
        };

        if let Some((key, value)) = rest.split_once(':') {
            if !key.is_empty() {
                out.predicates.push(TagPredicate {
                    key: key.to_string(),
                    value: unquote(value).to_string(),
                    negated,
                });
                continue;
            }
        }

        let text = unquote(&token);
        if !text.is_empty() {
            out.free_text.push(text.to_string());
        }
    }

    out
}

/// Whitespace split that keeps quoted runs (and `key:"quoted value"` forms)
/// as one token.
fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in query.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => {
                    current.push(ch);
                    quote = Some(ch);
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
