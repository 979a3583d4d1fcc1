//! Batch term resolution: `(text, kind) → UUID` through the shared cache with
//! a database fallback.
//!
//! The database read uses an INNER JOIN against a VALUES list so the
//! composite `(term_text, term_type)` index is used for the whole batch
//! instead of degenerating into an OR chain. A single remaining key takes a
//! plain equality predicate.

use std::collections::HashMap;

use uuid::Uuid;

use super::cache::TermCache;
use super::TermKey;
use crate::catalog::TableConfig;
use crate::engine::executor::SqlExecutor;
use crate::error::{SparqlError, SparqlResult};
use crate::terms::sql_quote;

/// Resolve every key in `keys`. Keys absent from both cache and database are
/// absent from the returned map; callers treat that as "no match".
pub async fn resolve_terms(
    executor: &dyn SqlExecutor,
    cache: &TermCache,
    tables: &TableConfig,
    keys: &[TermKey],
) -> SparqlResult<HashMap<TermKey, Uuid>> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }

    let mut resolved = cache.get_batch(keys);
    let misses: Vec<&TermKey> = keys
        .iter()
        .filter(|key| !resolved.contains_key(*key))
        .collect();
    log::debug!(
        "term lookup: {}/{} cache hits, {} need database",
        resolved.len(),
        keys.len(),
        misses.len()
    );

    if misses.is_empty() {
        return Ok(resolved);
    }

    let sql = term_lookup_sql(tables, &misses);
    let rows = executor.query(&sql).await?;

    let mut fresh = HashMap::with_capacity(rows.len());
    for row in rows {
        let text = row.get_named("term_text");
        let kind = row
            .get_named("term_type")
            .and_then(|t| t.chars().next())
            .and_then(super::TermKind::from_char);
        let uuid = row
            .get_named("term_uuid")
            .map(|u| {
                Uuid::parse_str(u)
                    .map_err(|e| SparqlError::Execution(format!("malformed term_uuid: {}", e)))
            })
            .transpose()?;
        if let (Some(text), Some(kind), Some(uuid)) = (text, kind, uuid) {
            fresh.insert(
                TermKey {
                    text: text.to_string(),
                    kind,
                },
                uuid,
            );
        }
    }

    cache.put_batch(&fresh);
    resolved.extend(fresh);
    Ok(resolved)
}

/// Batch lookup SQL: equality for one key, VALUES join for many.
pub fn term_lookup_sql(tables: &TableConfig, keys: &[&TermKey]) -> String {
    if keys.len() == 1 {
        let key = keys[0];
        return format!(
            "SELECT term_text, term_type, term_uuid FROM {} WHERE term_text = {} AND term_type = '{}'",
            tables.term_table,
            sql_quote(&key.text),
            key.kind.as_char()
        );
    }

    let values: Vec<String> = keys
        .iter()
        .map(|key| format!("({}, '{}')", sql_quote(&key.text), key.kind.as_char()))
        .collect();
    format!(
        "SELECT t.term_text, t.term_type, t.term_uuid FROM {} t \
         INNER JOIN (VALUES {}) AS v(term_text, term_type) \
         ON t.term_text = v.term_text AND t.term_type = v.term_type",
        tables.term_table,
        values.join(", ")
    )
}
