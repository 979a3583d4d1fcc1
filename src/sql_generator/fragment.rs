//! The in-memory representation of a partially translated query.
//!
//! Fragments are built bottom-up and consumed by their parent pattern;
//! patterns never mutate each other's fragments. Serialization to a SQL
//! string happens once, in the assembler.

use oxrdf::Variable;

/// Ordered variable → SQL scalar map. Insertion order is preserved so
/// generated SQL is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarMap {
    entries: Vec<(Variable, String)>,
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: &Variable) -> Option<&str> {
        self.entries
            .iter()
            .find(|(v, _)| v == var)
            .map(|(_, sql)| sql.as_str())
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.get(var).is_some()
    }

    /// Insert or overwrite. Overwriting is reserved for `Extend` re-binding
    /// and aggregate promotion; ordinary patterns only add.
    pub fn insert(&mut self, var: Variable, sql: String) {
        if let Some(entry) = self.entries.iter_mut().find(|(v, _)| *v == var) {
            entry.1 = sql;
        } else {
            self.entries.push((var, sql));
        }
    }

    /// Adopt every mapping from `other` that this map does not have yet.
    pub fn extend_missing(&mut self, other: &VarMap) {
        for (var, sql) in &other.entries {
            if !self.contains(var) {
                self.entries.push((var.clone(), sql.clone()));
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &str)> {
        self.entries.iter().map(|(v, sql)| (v, sql.as_str()))
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.entries.iter().map(|(v, _)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Variable, String)> for VarMap {
    fn from_iter<T: IntoIterator<Item = (Variable, String)>>(iter: T) -> Self {
        let mut map = VarMap::new();
        for (var, sql) in iter {
            map.insert(var, sql);
        }
        map
    }
}

/// A partial SQL query.
///
/// `from_clause` either starts with `FROM` or is empty; `where_conditions`
/// are AND-combined at emission; `joins` are pre-formatted clauses. The
/// `group_by` and `having` fields carry aggregation state to the assembler
/// out-of-band so it lands in the right SQL clause.
#[derive(Debug, Clone, Default)]
pub struct SqlFragment {
    pub from_clause: String,
    pub where_conditions: Vec<String>,
    pub joins: Vec<String>,
    pub variable_mappings: VarMap,
    pub order_by: String,
    pub group_by: Vec<Variable>,
    pub having: Vec<String>,
}

impl SqlFragment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(
        from_clause: impl Into<String>,
        where_conditions: Vec<String>,
        joins: Vec<String>,
        variable_mappings: VarMap,
    ) -> Self {
        Self {
            from_clause: from_clause.into(),
            where_conditions,
            joins,
            variable_mappings,
            ..Self::default()
        }
    }

    /// True when the FROM clause is exactly one UNION-derived table. All
    /// filters for such fragments already live inside the branches, so the
    /// assembler must not emit an outer WHERE. A union table that has since
    /// been CROSS JOINed with something else does not count: its combined
    /// fragment carries live join conditions.
    pub fn is_union_derived(&self) -> bool {
        let Some((inner, alias)) = split_derived_table(&self.from_clause) else {
            return false;
        };
        inner.contains("UNION") && alias.contains("union")
    }

    /// Deduplicate WHERE conditions and JOIN clauses, preserving first-seen
    /// order.
    pub fn optimize(mut self) -> Self {
        self.where_conditions = dedup_preserving_order(self.where_conditions);
        self.joins = dedup_preserving_order(self.joins);
        self
    }

    /// Structural sanity checks used by debug logging: balanced parentheses
    /// in the FROM clause and recognizable JOIN shapes.
    pub fn validate(&self) -> bool {
        let mut depth: i64 = 0;
        for c in self.from_clause.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return false;
            }
        }
        if depth != 0 {
            return false;
        }
        self.joins.iter().all(|join| {
            let j = join.trim_start();
            j.starts_with("JOIN ") || j.starts_with("LEFT JOIN ") || j.starts_with("CROSS JOIN ")
        })
    }

    /// Rough cost signal for debug logging: table references plus conditions.
    pub fn estimate_complexity(&self) -> usize {
        let from_tables = self.from_clause.matches("FROM").count()
            + self.from_clause.matches("CROSS JOIN").count();
        from_tables + self.joins.len() + self.where_conditions.len()
    }
}

/// When `from_clause` is exactly `FROM (<inner>) <alias>`, return the inner
/// SQL and the alias.
pub fn split_derived_table(from_clause: &str) -> Option<(&str, &str)> {
    let rest = from_clause.trim_start().strip_prefix("FROM (")?;
    let mut depth = 1usize;
    let mut close = None;
    for (idx, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;
    let inner = &rest[..close];
    let alias = rest[close + 1..].trim();
    if alias.is_empty() || alias.contains(' ') {
        return None;
    }
    Some((inner, alias))
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable::new(name).unwrap()
    }

    #[test]
    fn varmap_preserves_insertion_order() {
        let mut map = VarMap::new();
        map.insert(var("b"), "q0.b".to_string());
        map.insert(var("a"), "q0.a".to_string());
        let order: Vec<&Variable> = map.variables().collect();
        assert_eq!(order, vec![&var("b"), &var("a")]);
    }

    #[test]
    fn extend_missing_does_not_overwrite() {
        let mut left = VarMap::new();
        left.insert(var("x"), "left.x".to_string());
        let mut right = VarMap::new();
        right.insert(var("x"), "right.x".to_string());
        right.insert(var("y"), "right.y".to_string());

        left.extend_missing(&right);
        assert_eq!(left.get(&var("x")), Some("left.x"));
        assert_eq!(left.get(&var("y")), Some("right.y"));
    }

    #[test]
    fn optimize_deduplicates_preserving_order() {
        let fragment = SqlFragment::of(
            "FROM quads q0",
            vec!["a = 1".to_string(), "b = 2".to_string(), "a = 1".to_string()],
            vec![
                "JOIN t x ON x.id = q0.id".to_string(),
                "JOIN t x ON x.id = q0.id".to_string(),
            ],
            VarMap::new(),
        )
        .optimize();
        assert_eq!(fragment.where_conditions, vec!["a = 1", "b = 2"]);
        assert_eq!(fragment.joins.len(), 1);
    }

    #[test]
    fn union_detection() {
        let union = SqlFragment::of(
            "FROM (SELECT 1 UNION SELECT 2) union_0",
            vec![],
            vec![],
            VarMap::new(),
        );
        assert!(union.is_union_derived());

        let plain = SqlFragment::of("FROM quads q0", vec![], vec![], VarMap::new());
        assert!(!plain.is_union_derived());

        // a VALUES derived table also contains UNION ALL but keeps its WHERE
        let values = SqlFragment::of(
            "FROM (SELECT 'a' AS x_val UNION ALL SELECT 'b' AS x_val) values_0",
            vec![],
            vec![],
            VarMap::new(),
        );
        assert!(!values.is_union_derived());

        // a union joined with something else keeps its WHERE too
        let joined = SqlFragment::of(
            "FROM (SELECT 1 UNION SELECT 2) union_0 CROSS JOIN quads q0",
            vec![],
            vec![],
            VarMap::new(),
        );
        assert!(!joined.is_union_derived());
    }

    #[test]
    fn derived_table_split() {
        let (inner, alias) =
            split_derived_table("FROM (SELECT (a) FROM (b) x) union_1").unwrap();
        assert_eq!(inner, "SELECT (a) FROM (b) x");
        assert_eq!(alias, "union_1");
        assert!(split_derived_table("FROM quads q0").is_none());
    }

    #[test]
    fn validation_catches_unbalanced_from() {
        let bad = SqlFragment::of("FROM (SELECT 1 union_0", vec![], vec![], VarMap::new());
        assert!(!bad.validate());
        let good = SqlFragment::of("FROM quads q0", vec![], vec![], VarMap::new());
        assert!(good.validate());
    }
}
