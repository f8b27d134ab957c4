//! Typed WHERE-clause builder.
//!
//! Variable-length `IN (...)` lists and optional filters are assembled as an
//! ordered list of clauses plus a positional parameter vector, so no query
//! is ever built by concatenating user input into SQL text.

use rusqlite::types::ToSql;

#[derive(Default)]
pub struct WhereBuilder {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl WhereBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `column <op> ?` with one bound parameter.
    pub fn cmp<T: ToSql + 'static>(&mut self, column: &str, op: &str, value: T) -> &mut Self {
        let idx = self.params.len() + 1;
        self.clauses.push(format!("{column} {op} ?{idx}"));
        self.params.push(Box::new(value));
        self
    }

    /// Add `column IN (?, ?, ...)`. An empty list compiles to a clause that
    /// matches nothing, keeping "no projects in scope" queries well-formed.
    pub fn in_list<T: ToSql + 'static>(&mut self, column: &str, values: Vec<T>) -> &mut Self {
        if values.is_empty() {
            self.clauses.push("1 = 0".to_string());
            return self;
        }
        let start = self.params.len() + 1;
        let placeholders: Vec<String> = (0..values.len())
            .map(|i| format!("?{}", start + i))
            .collect();
        self.clauses
            .push(format!("{column} IN ({})", placeholders.join(", ")));
        for v in values {
            self.params.push(Box::new(v));
        }
        self
    }

    /// Add a case-insensitive substring match on a text column. `instr`
    /// sidesteps LIKE wildcard escaping.
    pub fn contains(&mut self, column: &str, needle: &str) -> &mut Self {
        let idx = self.params.len() + 1;
        self.clauses
            .push(format!("instr(lower({column}), ?{idx}) > 0"));
        self.params.push(Box::new(needle.to_lowercase()));
        self
    }

    /// Add a raw clause with no parameters (e.g. `deleted = 0`).
    pub fn raw(&mut self, clause: &str) -> &mut Self {
        self.clauses.push(clause.to_string());
        self
    }

    /// Render ` WHERE ...` (with leading space), or an empty string when no
    /// clause was added.
    pub fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    /// Positional parameters in clause order, ready for `query_map`.
    pub fn params(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}
