//! Final statement assembly: SELECT, CONSTRUCT, ASK and DESCRIBE.
//!
//! SQL folds unquoted identifiers to lower case, so every projected column
//! gets a quoted lowercase alias and the original SPARQL variable name is
//! returned alongside the statement for the result shaper.

use std::collections::HashMap;

use oxrdf::{NamedNode, Variable};
use spargebra::term::{TermPattern, TriplePattern};

use super::fragment::SqlFragment;
use super::pattern_builder::sentinel_sql;
use crate::catalog::TableConfig;
use crate::terms::sql_quote;

/// One projected column: the SQL alias actually emitted and the variable it
/// carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    pub variable: Variable,
    pub alias: String,
}

#[derive(Debug, Clone)]
pub struct BuiltSelect {
    pub sql: String,
    pub columns: Vec<SelectColumn>,
}

/// Lowercased, collision-disambiguated column aliases for a projection list.
fn projection_columns(projection: &[Variable]) -> Vec<SelectColumn> {
    let mut counters: HashMap<String, usize> = HashMap::new();
    projection
        .iter()
        .map(|var| {
            let lowered = var.as_str().to_lowercase();
            let alias = match counters.get_mut(&lowered) {
                Some(count) => {
                    *count += 1;
                    format!("{}_{}", lowered, count)
                }
                None => {
                    counters.insert(lowered.clone(), 0);
                    lowered
                }
            };
            SelectColumn {
                variable: var.clone(),
                alias,
            }
        })
        .collect()
}

fn select_items(fragment: &SqlFragment, columns: &[SelectColumn]) -> Vec<String> {
    columns
        .iter()
        .map(|column| {
            match fragment.variable_mappings.get(&column.variable) {
                Some(mapping) => format!("{} AS \"{}\"", mapping, column.alias),
                None => {
                    log::warn!(
                        "projected variable ?{} has no mapping, emitting sentinel",
                        column.variable.as_str()
                    );
                    format!("{} AS \"{}\"", sentinel_sql(&column.variable), column.alias)
                }
            }
        })
        .collect()
}

/// Shared clause emission: FROM, JOINs, WHERE (skipped on UNION-derived
/// tables), GROUP BY, HAVING, ORDER BY.
fn push_body(parts: &mut Vec<String>, fragment: &SqlFragment) {
    if !fragment.from_clause.is_empty() {
        let from = fragment.from_clause.trim();
        if from.to_uppercase().starts_with("FROM") {
            parts.push(from.to_string());
        } else {
            parts.push(format!("FROM {}", from));
        }
    }
    parts.extend(fragment.joins.iter().cloned());

    if !fragment.where_conditions.is_empty() {
        if fragment.is_union_derived() {
            log::debug!(
                "skipping {} WHERE conditions on a UNION-derived table",
                fragment.where_conditions.len()
            );
        } else {
            parts.push(format!("WHERE {}", fragment.where_conditions.join(" AND ")));
        }
    }

    if !fragment.group_by.is_empty() {
        let items: Vec<String> = fragment
            .group_by
            .iter()
            .filter_map(|var| match fragment.variable_mappings.get(var) {
                Some(mapping) => Some(mapping.to_string()),
                None => {
                    log::warn!("GROUP BY variable ?{} has no mapping", var.as_str());
                    None
                }
            })
            .collect();
        if !items.is_empty() {
            parts.push(format!("GROUP BY {}", items.join(", ")));
        }
    }
    if !fragment.having.is_empty() {
        parts.push(format!("HAVING {}", fragment.having.join(" AND ")));
    }
    if !fragment.order_by.is_empty() {
        parts.push(fragment.order_by.clone());
    }
}

pub fn build_select_query(
    fragment: &SqlFragment,
    projection: &[Variable],
    distinct: bool,
    limit: Option<usize>,
    offset: Option<usize>,
) -> BuiltSelect {
    let distinct_keyword = if distinct { "DISTINCT " } else { "" };
    let columns = projection_columns(projection);

    let select_clause = if columns.is_empty() {
        format!("SELECT {}*", distinct_keyword)
    } else {
        format!(
            "SELECT {}{}",
            distinct_keyword,
            select_items(fragment, &columns).join(", ")
        )
    };

    let mut parts = vec![select_clause];
    push_body(&mut parts, fragment);
    if let Some(offset) = offset {
        parts.push(format!("OFFSET {}", offset));
    }
    if let Some(limit) = limit {
        parts.push(format!("LIMIT {}", limit));
    }

    BuiltSelect {
        sql: parts.join("\n"),
        columns,
    }
}

/// SELECT feeding CONSTRUCT template instantiation: every template variable,
/// sorted for stable column order; DISTINCT when a CROSS JOIN could fan rows
/// out.
pub fn build_construct_query(fragment: &SqlFragment, template: &[TriplePattern]) -> BuiltSelect {
    fn push_unique(variables: &mut Vec<Variable>, var: &Variable) {
        if !variables.contains(var) {
            variables.push(var.clone());
        }
    }
    let mut variables: Vec<Variable> = Vec::new();
    for triple in template {
        if let TermPattern::Variable(var) = &triple.subject {
            push_unique(&mut variables, var);
        }
        if let spargebra::term::NamedNodePattern::Variable(var) = &triple.predicate {
            push_unique(&mut variables, var);
        }
        if let TermPattern::Variable(var) = &triple.object {
            push_unique(&mut variables, var);
        }
    }
    variables.sort_by(|a, b| a.as_str().cmp(b.as_str()));

    let needs_distinct = fragment.from_clause.contains("CROSS JOIN")
        || fragment.joins.iter().any(|join| join.contains("CROSS JOIN"));

    build_select_query(fragment, &variables, needs_distinct, None, None)
}

/// `SELECT 1 … LIMIT 1`; truthy iff any row comes back.
pub fn build_ask_query(fragment: &SqlFragment) -> String {
    let mut parts = vec!["SELECT 1 AS ask_result".to_string()];
    push_body(&mut parts, fragment);
    parts.push("LIMIT 1".to_string());
    parts.join("\n")
}

/// All triples whose subject is one of the described resources: the quad
/// table joined against the term table once per position.
pub fn build_describe_query(tables: &TableConfig, subjects: &[NamedNode]) -> String {
    let mut parts = vec![
        "SELECT s.term_text AS subject, p.term_text AS predicate, o.term_text AS object"
            .to_string(),
        format!("FROM {} q", tables.quad_table),
        format!("JOIN {} s ON q.subject_uuid = s.term_uuid", tables.term_table),
        format!("JOIN {} p ON q.predicate_uuid = p.term_uuid", tables.term_table),
        format!("JOIN {} o ON q.object_uuid = o.term_uuid", tables.term_table),
    ];
    if subjects.is_empty() {
        parts.push("WHERE 1=0".to_string());
    } else {
        let conditions: Vec<String> = subjects
            .iter()
            .map(|subject| {
                format!(
                    "(s.term_text = {} AND s.term_type = 'U')",
                    sql_quote(subject.as_str())
                )
            })
            .collect();
        parts.push(format!("WHERE {}", conditions.join(" OR ")));
    }
    parts.join("\n")
}
