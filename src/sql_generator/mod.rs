//! SPARQL algebra → SQL translation.
//!
//! The entry point is [`pattern_builder::translate_pattern`], driven by the
//! engine. All translation state shared across the tree walk lives in
//! [`SparqlContext`]: the alias generator, the pre-resolved constant terms,
//! the table naming policy, and the optional global alias plan.

pub mod alias;
pub mod bgp_builder;
pub mod expression_builder;
pub mod fragment;
pub mod optimizer;
pub mod path_builder;
pub mod pattern_builder;
pub mod select_builder;
pub mod update_builder;

use std::collections::{HashMap, HashSet};

use oxrdf::Variable;
use spargebra::algebra::{
    AggregateExpression, Expression, GraphPattern, OrderExpression, PropertyPathExpression,
};
use spargebra::term::NamedNodePattern;
use uuid::Uuid;

use crate::catalog::{DatatypeTable, TableConfig};
use crate::terms::{named_key, named_node_pattern_key, term_pattern_key, TermKey};
use alias::AliasGenerator;
use optimizer::AliasPlan;

/// Where a variable surfaced as a quad-table column. Used to correlate
/// patterns at the UUID level without re-parsing mapping strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarSite {
    pub alias: String,
    pub column: &'static str,
}

/// Per-request translation state. Created by the engine, carried through the
/// whole tree walk, then discarded.
#[derive(Debug)]
pub struct SparqlContext {
    pub aliases: AliasGenerator,
    pub tables: TableConfig,
    pub datatypes: DatatypeTable,
    /// Constant terms of the whole tree, resolved in one batch up front.
    /// Terms absent from the store are absent here.
    pub resolved: HashMap<TermKey, Uuid>,
    pub alias_plan: Option<AliasPlan>,
    pub max_path_depth: u32,
    /// Aggregate result variables whose mappings hold entire aggregate
    /// expressions. Consulted by HAVING detection and projection.
    pub aggregate_vars: HashSet<Variable>,
    /// Quad-column sites per variable, for UUID-level correlation.
    pub var_sites: HashMap<Variable, Vec<VarSite>>,
}

impl SparqlContext {
    pub fn new(
        tables: TableConfig,
        datatypes: DatatypeTable,
        resolved: HashMap<TermKey, Uuid>,
        max_path_depth: u32,
    ) -> Self {
        Self {
            aliases: AliasGenerator::new(),
            tables,
            datatypes,
            resolved,
            alias_plan: None,
            max_path_depth,
            aggregate_vars: HashSet::new(),
            var_sites: HashMap::new(),
        }
    }

    pub fn lookup_uuid(&self, key: &TermKey) -> Option<Uuid> {
        self.resolved.get(key).copied()
    }

    pub fn record_site(&mut self, var: &Variable, alias: &str, column: &'static str) {
        self.var_sites
            .entry(var.clone())
            .or_default()
            .push(VarSite {
                alias: alias.to_string(),
                column,
            });
    }

    pub fn first_site(&self, var: &Variable) -> Option<&VarSite> {
        self.var_sites.get(var).and_then(|sites| sites.first())
    }

    /// Run `f` with a numbered child alias generator, restoring the parent
    /// generator afterwards. Sibling scopes translated this way cannot
    /// produce colliding identifiers, even when they share `base`.
    pub fn scoped_aliases<T>(&mut self, base: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        let child = self.aliases.scoped_child(base);
        let parent = std::mem::replace(&mut self.aliases, child);
        let result = f(self);
        self.aliases = parent;
        result
    }
}

/// Collect every constant term the translation of `pattern` will need a UUID
/// for: triple constants, GRAPH names, property-path predicates and bound
/// endpoints, and constants reachable through EXISTS patterns inside
/// expressions.
pub fn collect_pattern_terms(pattern: &GraphPattern, acc: &mut HashSet<TermKey>) {
    match pattern {
        GraphPattern::Bgp { patterns } => {
            for triple in patterns {
                if let Some(key) = term_pattern_key(&triple.subject) {
                    acc.insert(key);
                }
                if let Some(key) = named_node_pattern_key(&triple.predicate) {
                    acc.insert(key);
                }
                if let Some(key) = term_pattern_key(&triple.object) {
                    acc.insert(key);
                }
            }
        }
        GraphPattern::Path {
            subject,
            path,
            object,
        } => {
            if let Some(key) = term_pattern_key(subject) {
                acc.insert(key);
            }
            if let Some(key) = term_pattern_key(object) {
                acc.insert(key);
            }
            collect_path_terms(path, acc);
        }
        GraphPattern::Join { left, right }
        | GraphPattern::Union { left, right }
        | GraphPattern::Minus { left, right } => {
            collect_pattern_terms(left, acc);
            collect_pattern_terms(right, acc);
        }
        GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } => {
            collect_pattern_terms(left, acc);
            collect_pattern_terms(right, acc);
            if let Some(expr) = expression {
                collect_expression_terms(expr, acc);
            }
        }
        GraphPattern::Filter { expr, inner } => {
            collect_expression_terms(expr, acc);
            collect_pattern_terms(inner, acc);
        }
        GraphPattern::Extend {
            inner, expression, ..
        } => {
            collect_expression_terms(expression, acc);
            collect_pattern_terms(inner, acc);
        }
        GraphPattern::Graph { name, inner } => {
            if let NamedNodePattern::NamedNode(n) = name {
                acc.insert(named_key(n));
            }
            collect_pattern_terms(inner, acc);
        }
        GraphPattern::Group {
            inner, aggregates, ..
        } => {
            for (_, aggregate) in aggregates {
                if let AggregateExpression::FunctionCall { expr, .. } = aggregate {
                    collect_expression_terms(expr, acc);
                }
            }
            collect_pattern_terms(inner, acc);
        }
        GraphPattern::OrderBy { inner, expression } => {
            for order in expression {
                let (OrderExpression::Asc(expr) | OrderExpression::Desc(expr)) = order;
                collect_expression_terms(expr, acc);
            }
            collect_pattern_terms(inner, acc);
        }
        GraphPattern::Project { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. } => collect_pattern_terms(inner, acc),
        GraphPattern::Values { .. } => {}
        _ => {}
    }
}

fn collect_path_terms(path: &PropertyPathExpression, acc: &mut HashSet<TermKey>) {
    match path {
        PropertyPathExpression::NamedNode(n) => {
            acc.insert(named_key(n));
        }
        PropertyPathExpression::Reverse(inner)
        | PropertyPathExpression::ZeroOrMore(inner)
        | PropertyPathExpression::OneOrMore(inner)
        | PropertyPathExpression::ZeroOrOne(inner) => collect_path_terms(inner, acc),
        PropertyPathExpression::Sequence(a, b) | PropertyPathExpression::Alternative(a, b) => {
            collect_path_terms(a, acc);
            collect_path_terms(b, acc);
        }
        PropertyPathExpression::NegatedPropertySet(predicates) => {
            for predicate in predicates {
                acc.insert(named_key(predicate));
            }
        }
    }
}

fn collect_expression_terms(expr: &Expression, acc: &mut HashSet<TermKey>) {
    match expr {
        Expression::Exists(pattern) => collect_pattern_terms(pattern, acc),
        Expression::Or(a, b)
        | Expression::And(a, b)
        | Expression::Equal(a, b)
        | Expression::SameTerm(a, b)
        | Expression::Greater(a, b)
        | Expression::GreaterOrEqual(a, b)
        | Expression::Less(a, b)
        | Expression::LessOrEqual(a, b)
        | Expression::Add(a, b)
        | Expression::Subtract(a, b)
        | Expression::Multiply(a, b)
        | Expression::Divide(a, b) => {
            collect_expression_terms(a, acc);
            collect_expression_terms(b, acc);
        }
        Expression::In(needle, haystack) => {
            collect_expression_terms(needle, acc);
            for item in haystack {
                collect_expression_terms(item, acc);
            }
        }
        Expression::UnaryPlus(inner) | Expression::UnaryMinus(inner) | Expression::Not(inner) => {
            collect_expression_terms(inner, acc)
        }
        Expression::If(cond, then, otherwise) => {
            collect_expression_terms(cond, acc);
            collect_expression_terms(then, acc);
            collect_expression_terms(otherwise, acc);
        }
        Expression::Coalesce(items) | Expression::FunctionCall(_, items) => {
            for item in items {
                collect_expression_terms(item, acc);
            }
        }
        Expression::NamedNode(_)
        | Expression::Literal(_)
        | Expression::Variable(_)
        | Expression::Bound(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_terms_from_nested_patterns() {
        let query = spargebra::Query::parse(
            "SELECT ?x WHERE { GRAPH <urn:g> { ?x <urn:p> 'v' } FILTER EXISTS { ?x <urn:q> ?y } }",
            None,
        )
        .unwrap();
        let pattern = match query {
            spargebra::Query::Select { pattern, .. } => pattern,
            _ => unreachable!(),
        };
        let mut acc = HashSet::new();
        collect_pattern_terms(&pattern, &mut acc);
        assert!(acc.contains(&TermKey::uri("urn:g")));
        assert!(acc.contains(&TermKey::uri("urn:p")));
        assert!(acc.contains(&TermKey::uri("urn:q")));
        assert!(acc.contains(&TermKey::literal("v")));
    }

    #[test]
    fn scoped_aliases_restore_parent() {
        let mut ctx = SparqlContext::new(
            TableConfig::for_space("p", "s"),
            DatatypeTable::unavailable(),
            HashMap::new(),
            10,
        );
        let first = ctx.aliases.next_quad_alias();
        assert_eq!(first, "q0");
        let child_alias = ctx.scoped_aliases("left", |ctx| ctx.aliases.next_quad_alias());
        assert_eq!(child_alias, "left0_q0");
        assert_eq!(ctx.aliases.next_quad_alias(), "q1");
    }
}
