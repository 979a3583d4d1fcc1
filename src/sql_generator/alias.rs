//! SQL identifier generation.
//!
//! One generator per request, shared through the context. Child generators
//! compound the prefix so sibling subtrees (UNION branches, NOT EXISTS
//! subqueries) cannot collide even when their internal counters coincide.

/// Per-category alias counters with an optional prefix.
#[derive(Debug, Clone, Default)]
pub struct AliasGenerator {
    prefix: String,
    quad: u32,
    term: u32,
    subquery: u32,
    join: u32,
    union: u32,
    values: u32,
    scope: u32,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn next_quad_alias(&mut self) -> String {
        let alias = format!("{}q{}", self.prefix, self.quad);
        self.quad += 1;
        alias
    }

    /// `position` is one of subject/predicate/object/context/g.
    pub fn next_term_alias(&mut self, position: &str) -> String {
        let alias = format!("{}{}_term_{}", self.prefix, position, self.term);
        self.term += 1;
        alias
    }

    pub fn next_subquery_alias(&mut self) -> String {
        let alias = format!("{}subquery_{}", self.prefix, self.subquery);
        self.subquery += 1;
        alias
    }

    pub fn next_join_alias(&mut self) -> String {
        let alias = format!("{}join_{}", self.prefix, self.join);
        self.join += 1;
        alias
    }

    pub fn next_union_alias(&mut self) -> String {
        let alias = format!("{}union_{}", self.prefix, self.union);
        self.union += 1;
        alias
    }

    pub fn next_values_alias(&mut self) -> String {
        let alias = format!("{}values_{}", self.prefix, self.values);
        self.values += 1;
        alias
    }

    /// A fresh generator whose prefix compounds this generator's prefix.
    pub fn child(&self, child_prefix: &str) -> AliasGenerator {
        AliasGenerator::with_prefix(format!("{}{}_", self.prefix, child_prefix))
    }

    /// Like [`child`](Self::child) but numbered, so repeated scopes built
    /// from the same base ("opt", "ex", …) stay disjoint within one request.
    pub fn scoped_child(&mut self, base: &str) -> AliasGenerator {
        let scope = self.scope;
        self.scope += 1;
        AliasGenerator::with_prefix(format!("{}{}{}_", self.prefix, base, scope))
    }
}
