//! Row sets reshaped into SPARQL results.
//!
//! Column aliases are translated back through the case-preservation table so
//! SPARQL variable names survive SQL's case folding; SQL NULL means "variable
//! unbound".

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};

use super::executor::SqlRow;
use crate::sql_generator::select_builder::SelectColumn;

/// One solution: variable name → value, in projection order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingRow {
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub variable: String,
    pub value: Option<String>,
}

impl BindingRow {
    pub fn get(&self, variable: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|binding| binding.variable == variable)
            .and_then(|binding| binding.value.as_deref())
    }

    pub fn is_bound(&self, variable: &str) -> bool {
        self.get(variable).is_some()
    }
}

/// A reconstructed triple (CONSTRUCT / DESCRIBE output).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TripleResult {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// What a query evaluates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueryOutcome {
    Bindings(Vec<BindingRow>),
    Triples(Vec<TripleResult>),
    Boolean(bool),
}

pub fn shape_select(rows: &[SqlRow], columns: &[SelectColumn]) -> Vec<BindingRow> {
    rows.iter()
        .map(|row| BindingRow {
            bindings: columns
                .iter()
                .map(|column| Binding {
                    variable: column.variable.as_str().to_string(),
                    value: row.get_named(&column.alias).map(str::to_string),
                })
                .collect(),
        })
        .collect()
}

pub fn shape_ask(rows: &[SqlRow]) -> bool {
    !rows.is_empty()
}

/// Instantiate the CONSTRUCT template once per row: variables substitute
/// their bindings, triples with any unbound slot are dropped, duplicates
/// across rows collapse.
pub fn shape_construct(
    rows: &[SqlRow],
    columns: &[SelectColumn],
    template: &[TriplePattern],
) -> Vec<TripleResult> {
    let mut seen = HashSet::new();
    let mut triples = Vec::new();

    for row in rows {
        let values: HashMap<&str, &str> = columns
            .iter()
            .filter_map(|column| {
                row.get_named(&column.alias)
                    .map(|value| (column.variable.as_str(), value))
            })
            .collect();

        for pattern in template {
            let subject = term_pattern_text(&pattern.subject, &values);
            let predicate = match &pattern.predicate {
                NamedNodePattern::NamedNode(node) => Some(node.as_str().to_string()),
                NamedNodePattern::Variable(var) => {
                    values.get(var.as_str()).map(|value| value.to_string())
                }
            };
            let object = term_pattern_text(&pattern.object, &values);

            if let (Some(subject), Some(predicate), Some(object)) = (subject, predicate, object) {
                let triple = TripleResult {
                    subject,
                    predicate,
                    object,
                };
                if seen.insert(triple.clone()) {
                    triples.push(triple);
                }
            }
        }
    }
    triples
}

fn term_pattern_text(term: &TermPattern, values: &HashMap<&str, &str>) -> Option<String> {
    match term {
        TermPattern::NamedNode(node) => Some(node.as_str().to_string()),
        TermPattern::Literal(literal) => Some(literal.value().to_string()),
        TermPattern::BlankNode(node) => Some(format!("_:{}", node.as_str())),
        TermPattern::Variable(var) => values.get(var.as_str()).map(|value| value.to_string()),
    }
}

/// DESCRIBE rows come back as three term-text columns.
pub fn shape_describe(rows: &[SqlRow]) -> Vec<TripleResult> {
    rows.iter()
        .filter_map(|row| {
            Some(TripleResult {
                subject: row.get_named("subject")?.to_string(),
                predicate: row.get_named("predicate")?.to_string(),
                object: row.get_named("object")?.to_string(),
            })
        })
        .collect()
}
