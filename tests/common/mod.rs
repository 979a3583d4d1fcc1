//! Shared test fixture: an executor that resolves term lookups from an
//! in-memory term table, records every other statement, and replays canned
//! row sets.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use pgsparql::engine::{SqlExecutor, SqlRow};
use pgsparql::terms::{sql_quote, TermKey, TermKind};
use pgsparql::SparqlResult;

pub struct FixtureExecutor {
    terms: Vec<(TermKey, Uuid)>,
    canned: Mutex<VecDeque<Vec<SqlRow>>>,
    pub queries: Mutex<Vec<String>>,
    pub executed: Mutex<Vec<String>>,
}

impl FixtureExecutor {
    pub fn new(terms: Vec<(TermKey, Uuid)>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            terms,
            canned: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Queue the row set returned by the next non-lookup query.
    pub fn push_rows(&self, rows: Vec<SqlRow>) {
        self.canned.lock().unwrap().push_back(rows);
    }

    pub fn recorded_queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn recorded_statements(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn is_term_lookup(sql: &str) -> bool {
        sql.starts_with("SELECT term_text, term_type, term_uuid")
            || sql.starts_with("SELECT t.term_text, t.term_type, t.term_uuid")
    }

    fn lookup_rows(&self, sql: &str) -> Vec<SqlRow> {
        self.terms
            .iter()
            .filter(|(key, _)| {
                let quoted = sql_quote(&key.text);
                let kind = key.kind.as_char();
                sql.contains(&format!("({}, '{}')", quoted, kind))
                    || sql.contains(&format!("term_text = {} AND term_type = '{}'", quoted, kind))
            })
            .map(|(key, uuid)| {
                SqlRow::new(
                    vec![
                        "term_text".to_string(),
                        "term_type".to_string(),
                        "term_uuid".to_string(),
                    ],
                    vec![
                        Some(key.text.clone()),
                        Some(key.kind.as_char().to_string()),
                        Some(uuid.to_string()),
                    ],
                )
            })
            .collect()
    }
}

#[async_trait]
impl SqlExecutor for FixtureExecutor {
    async fn query(&self, sql: &str) -> SparqlResult<Vec<SqlRow>> {
        if Self::is_term_lookup(sql) {
            return Ok(self.lookup_rows(sql));
        }
        self.queries.lock().unwrap().push(sql.to_string());
        Ok(self.canned.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn execute(&self, sql: &str) -> SparqlResult<u64> {
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(0)
    }

    async fn execute_transactional(&self, statements: &[String]) -> SparqlResult<()> {
        self.executed
            .lock()
            .unwrap()
            .extend(statements.iter().cloned());
        Ok(())
    }
}

pub fn uri(text: &str) -> TermKey {
    TermKey {
        text: text.to_string(),
        kind: TermKind::Uri,
    }
}

pub fn literal(text: &str) -> TermKey {
    TermKey {
        text: text.to_string(),
        kind: TermKind::Literal,
    }
}

/// Every generated table alias that is referenced as `alias.column` must
/// also be declared somewhere in the statement (an occurrence not followed
/// by a dot). This is a flat approximation of the scope rule, good enough to
/// catch "missing FROM-clause entry" bugs.
pub fn assert_identifiers_declared(sql: &str) {
    let reference =
        regex::Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.[A-Za-z_]").expect("reference regex");
    let generated = regex::Regex::new(
        r"^(\w*q\d+|\w*(subject|predicate|object|context|g)_term_\d+|\w*union_\d+|\w*subquery_\d+|\w*values_\d+)$",
    )
    .expect("alias shape regex");

    for captures in reference.captures_iter(sql) {
        let alias = &captures[1];
        if !generated.is_match(alias) {
            continue;
        }
        let declared = sql.match_indices(alias).any(|(at, _)| {
            let before_ok = at == 0
                || !sql[..at]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.');
            let after = sql[at + alias.len()..].chars().next();
            let after_ok = after.is_none_or(|c| !(c == '.' || c.is_alphanumeric() || c == '_'));
            before_ok && after_ok
        });
        assert!(
            declared,
            "alias '{}' is referenced but never declared in:\n{}",
            alias, sql
        );
    }
}

/// One result row over named columns.
pub fn row(pairs: &[(&str, Option<&str>)]) -> SqlRow {
    SqlRow::new(
        pairs.iter().map(|(name, _)| name.to_string()).collect(),
        pairs
            .iter()
            .map(|(_, value)| value.map(str::to_string))
            .collect(),
    )
}
