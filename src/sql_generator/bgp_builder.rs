//! Basic graph pattern → SQL.
//!
//! Each distinct triple pattern scans the quad table under its own alias;
//! duplicate triples share one. Shared variables between triples become
//! position-equality join conditions; a triple with no variable in common
//! with the preceding ones joins with CROSS JOIN. Bound terms become UUID
//! equality predicates, resolved from the context's prefetched term map; a
//! term missing from the store poisons the pattern with `1=0` so the query
//! returns no rows. Graph constraints are applied here, on every quad alias,
//! never around derived tables.

use oxrdf::Variable;
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};

use super::fragment::{SqlFragment, VarMap};
use super::SparqlContext;
use crate::error::SparqlResult;
use crate::terms::{named_node_pattern_key, term_pattern_key, TermKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriplePosition {
    Subject,
    Predicate,
    Object,
}

impl TriplePosition {
    pub fn column(self) -> &'static str {
        match self {
            TriplePosition::Subject => "subject_uuid",
            TriplePosition::Predicate => "predicate_uuid",
            TriplePosition::Object => "object_uuid",
        }
    }

    fn term_alias_prefix(self) -> &'static str {
        match self {
            TriplePosition::Subject => "subject",
            TriplePosition::Predicate => "predicate",
            TriplePosition::Object => "object",
        }
    }
}

/// One slot of a triple: either a variable or a resolved constant key.
enum Slot<'a> {
    Variable(&'a Variable),
    Bound(TermKey),
}

fn triple_slots(triple: &TriplePattern) -> Vec<(TriplePosition, Slot<'_>)> {
    let subject = match &triple.subject {
        TermPattern::Variable(var) => Slot::Variable(var),
        other => Slot::Bound(term_pattern_key(other).expect("non-variable subject")),
    };
    let predicate = match &triple.predicate {
        NamedNodePattern::Variable(var) => Slot::Variable(var),
        other => Slot::Bound(named_node_pattern_key(other).expect("non-variable predicate")),
    };
    let object = match &triple.object {
        TermPattern::Variable(var) => Slot::Variable(var),
        other => Slot::Bound(term_pattern_key(other).expect("non-variable object")),
    };
    vec![
        (TriplePosition::Subject, subject),
        (TriplePosition::Predicate, predicate),
        (TriplePosition::Object, object),
    ]
}

fn triple_variables(triple: &TriplePattern) -> Vec<(&Variable, TriplePosition)> {
    triple_slots(triple)
        .into_iter()
        .filter_map(|(position, slot)| match slot {
            Slot::Variable(var) => Some((var, position)),
            Slot::Bound(_) => None,
        })
        .collect()
}

pub fn translate_bgp(
    ctx: &mut SparqlContext,
    triples: &[TriplePattern],
    projected: Option<&[Variable]>,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    if triples.is_empty() {
        return Ok(SqlFragment::empty());
    }
    log::debug!("translating BGP with {} triples", triples.len());

    // Alias planning: duplicate triples share one alias, everything else gets
    // its own. The global plan only chooses names; it never merges distinct
    // triples onto one quad row.
    let mut triple_aliases: Vec<String> = Vec::with_capacity(triples.len());
    for (idx, triple) in triples.iter().enumerate() {
        if let Some(previous) = triples[..idx].iter().position(|seen| seen == triple) {
            let alias = triple_aliases[previous].clone();
            log::debug!("triple #{} duplicates #{}, reusing {}", idx, previous, alias);
            triple_aliases.push(alias);
            continue;
        }
        let planned = ctx.alias_plan.as_ref().and_then(|plan| {
            triple_variables(triple)
                .into_iter()
                .find_map(|(var, _)| plan.canonical_alias(var))
                .filter(|alias| !triple_aliases.iter().any(|used| used.as_str() == *alias))
                .map(str::to_string)
        });
        let alias = planned.unwrap_or_else(|| ctx.aliases.next_quad_alias());
        triple_aliases.push(alias);
    }

    let mut where_conditions = Vec::new();
    let mut term_joins = Vec::new();
    let mut quad_joins = Vec::new();
    let mut mappings = VarMap::new();

    let projects = |var: &Variable| projected.is_none_or(|vars| vars.contains(var));

    for (triple, alias) in triples.iter().zip(&triple_aliases) {
        for (position, slot) in triple_slots(triple) {
            match slot {
                Slot::Bound(key) => match ctx.lookup_uuid(&key) {
                    Some(uuid) => where_conditions.push(format!(
                        "{}.{} = '{}'",
                        alias,
                        position.column(),
                        uuid
                    )),
                    None => {
                        log::info!(
                            "term ({:?}, {:?}) not in term table, pattern yields no rows",
                            key.text,
                            key.kind
                        );
                        where_conditions.push("1=0".to_string());
                    }
                },
                Slot::Variable(var) => {
                    ctx.record_site(var, alias, position.column());
                    if !mappings.contains(var) && projects(var) {
                        let term_alias = ctx.aliases.next_term_alias(position.term_alias_prefix());
                        term_joins.push(format!(
                            "JOIN {} {} ON {}.{} = {}.term_uuid",
                            ctx.tables.term_table,
                            term_alias,
                            alias,
                            position.column(),
                            term_alias
                        ));
                        mappings.insert(var.clone(), format!("{}.term_text", term_alias));
                    }
                }
            }
        }
    }

    // FROM over the first unique alias, every further unique alias joined on
    // its best-shared-variable predecessor.
    let mut unique_aliases: Vec<&String> = Vec::new();
    for alias in &triple_aliases {
        if !unique_aliases.contains(&alias) {
            unique_aliases.push(alias);
        }
    }

    let from_clause = format!("FROM {} {}", ctx.tables.quad_table, unique_aliases[0]);

    for current in unique_aliases.iter().skip(1) {
        let conditions = best_join_conditions(triples, &triple_aliases, current);
        if conditions.is_empty() {
            log::debug!("no shared variables for {}, emitting CROSS JOIN", current);
            quad_joins.push(format!("CROSS JOIN {} {}", ctx.tables.quad_table, current));
        } else {
            quad_joins.push(format!(
                "JOIN {} {} ON {}",
                ctx.tables.quad_table,
                current,
                conditions.join(" AND ")
            ));
        }
    }

    if let Some(constraint) = context_constraint {
        for alias in &unique_aliases {
            where_conditions.push(format!("{}.{}", alias, constraint));
        }
    }

    let mut joins = quad_joins;
    joins.extend(term_joins);

    let fragment = SqlFragment::of(from_clause, where_conditions, joins, mappings).optimize();
    if !fragment.validate() {
        log::warn!("BGP produced a structurally suspicious fragment");
    }
    Ok(fragment)
}

/// Join conditions tying `current` to the earlier alias it shares the most
/// variables with.
fn best_join_conditions(
    triples: &[TriplePattern],
    triple_aliases: &[String],
    current: &str,
) -> Vec<String> {
    let mut best: Vec<String> = Vec::new();
    for (current_triple, _) in triples
        .iter()
        .zip(triple_aliases)
        .filter(|(_, alias)| alias.as_str() == current)
    {
        for (earlier_triple, earlier_alias) in triples
            .iter()
            .zip(triple_aliases)
            .take_while(|(_, alias)| alias.as_str() != current)
        {
            let current_vars = triple_variables(current_triple);
            let mut conditions = Vec::new();
            for (var, position) in &current_vars {
                for (earlier_var, earlier_position) in triple_variables(earlier_triple) {
                    if earlier_var == *var {
                        conditions.push(format!(
                            "{}.{} = {}.{}",
                            current,
                            position.column(),
                            earlier_alias,
                            earlier_position.column()
                        ));
                    }
                }
            }
            if conditions.len() > best.len() {
                best = conditions;
            }
        }
    }
    best
}
