//! Global variable-alias pre-pass.
//!
//! A single breadth-first walk over the algebra assigns each variable a
//! canonical quad alias on first sight. BGP planning consults these
//! assignments before minting fresh aliases, which keeps alias names stable
//! across the tree and lets triples anchored on the same variable share a
//! scan where that is sound. Correctness never depends on the plan: a BGP
//! only adopts a planned name that is still unused in its own scope, and the
//! join combiner repairs any cross-scope collision by renaming.

use std::collections::{HashMap, HashSet, VecDeque};

use oxrdf::Variable;
use spargebra::algebra::GraphPattern;
use spargebra::term::{NamedNodePattern, TermPattern};

use super::alias::AliasGenerator;

#[derive(Debug, Clone, Default)]
pub struct AliasPlan {
    canonical: HashMap<Variable, String>,
}

impl AliasPlan {
    pub fn canonical_alias(&self, var: &Variable) -> Option<&str> {
        self.canonical.get(var).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

/// Walk the algebra breadth-first and assign one canonical alias per
/// variable. When `packing_threshold` is non-zero and the query has more
/// variables than the threshold, variables are packed round-robin behind
/// `packing_threshold` aliases to cap the number of table references.
pub fn analyze_query(
    pattern: &GraphPattern,
    aliases: &mut AliasGenerator,
    packing_threshold: u32,
) -> AliasPlan {
    let mut ordered: Vec<Variable> = Vec::new();
    let mut seen: HashSet<Variable> = HashSet::new();
    let mut queue: VecDeque<&GraphPattern> = VecDeque::new();
    queue.push_back(pattern);

    while let Some(node) = queue.pop_front() {
        match node {
            GraphPattern::Bgp { patterns } => {
                for triple in patterns {
                    let mut note = |var: &Variable| {
                        if seen.insert(var.clone()) {
                            ordered.push(var.clone());
                        }
                    };
                    if let TermPattern::Variable(var) = &triple.subject {
                        note(var);
                    }
                    if let NamedNodePattern::Variable(var) = &triple.predicate {
                        note(var);
                    }
                    if let TermPattern::Variable(var) = &triple.object {
                        note(var);
                    }
                }
            }
            GraphPattern::Join { left, right }
            | GraphPattern::Union { left, right }
            | GraphPattern::LeftJoin { left, right, .. }
            | GraphPattern::Minus { left, right } => {
                queue.push_back(left);
                queue.push_back(right);
            }
            GraphPattern::Filter { inner, .. }
            | GraphPattern::Extend { inner, .. }
            | GraphPattern::Graph { inner, .. }
            | GraphPattern::Group { inner, .. }
            | GraphPattern::Project { inner, .. }
            | GraphPattern::Distinct { inner }
            | GraphPattern::Reduced { inner }
            | GraphPattern::Slice { inner, .. }
            | GraphPattern::OrderBy { inner, .. } => queue.push_back(inner),
            _ => {}
        }
    }

    let mut plan = AliasPlan::default();
    let threshold = packing_threshold as usize;
    if threshold > 0 && ordered.len() > threshold {
        log::debug!(
            "packing {} variables behind {} canonical aliases",
            ordered.len(),
            threshold
        );
        let pool: Vec<String> = (0..threshold).map(|_| aliases.next_quad_alias()).collect();
        for (index, var) in ordered.into_iter().enumerate() {
            plan.canonical.insert(var, pool[index % threshold].clone());
        }
    } else {
        for var in ordered {
            let alias = aliases.next_quad_alias();
            plan.canonical.insert(var, alias);
        }
    }
    log::debug!("global alias plan covers {} variables", plan.len());
    plan
}
