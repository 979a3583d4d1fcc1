//! Algebra dispatch: every graph-pattern node translated to a fragment.
//!
//! Graph constraints travel down through this recursion (never applied
//! around a derived table), fragments bubble up. Nested SELECTs encountered
//! mid-tree are assembled to complete statements and re-enter as derived
//! tables.

use std::collections::HashSet;

use lazy_static::lazy_static;
use oxrdf::Variable;
use regex::Regex;
use spargebra::algebra::{AggregateExpression, Expression, GraphPattern, OrderExpression};
use spargebra::term::{GroundTerm, NamedNodePattern};
use uuid::Uuid;

use super::bgp_builder::translate_bgp;
use super::expression_builder::{
    is_having_condition, translate_aggregate, translate_expression, translate_order_by,
};
use super::fragment::{split_derived_table, SqlFragment, VarMap};
use super::path_builder::translate_path;
use super::select_builder::build_select_query;
use super::SparqlContext;
use crate::error::{SparqlError, SparqlResult};
use crate::terms::{named_key, sql_quote};

lazy_static! {
    /// `alias.column` references inside conditions and join clauses.
    static ref ALIAS_REF_RE: Regex =
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.[a-z_]+").expect("alias ref regex");
    /// Table aliases declared by `FROM table alias` / `JOIN table alias`.
    static ref DECL_RE: Regex =
        Regex::new(r"(?:FROM|JOIN)\s+\S+\s+([A-Za-z_][A-Za-z0-9_]*)").expect("decl regex");
    /// A FROM clause that is one plain table reference.
    static ref PLAIN_FROM_RE: Regex =
        Regex::new(r"^FROM\s+(\S+)\s+([A-Za-z_][A-Za-z0-9_]*)\s*$").expect("plain from regex");
}

/// Solution modifiers peeled off the top of a (sub)query tree.
#[derive(Debug, Clone, Default)]
pub struct SelectModifiers {
    pub projection: Vec<Variable>,
    pub distinct: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order: Vec<OrderExpression>,
}

/// Strip the contiguous wrapper chain `Slice → Distinct/Reduced → Project →
/// OrderBy` from the top of a tree. Each wrapper is taken at most once and in
/// that order, so the modifiers of a nested sub-select are left in place.
pub fn peel_modifiers(pattern: &GraphPattern) -> (&GraphPattern, SelectModifiers) {
    let mut modifiers = SelectModifiers::default();
    let mut current = pattern;

    if let GraphPattern::Slice {
        inner,
        start,
        length,
    } = current
    {
        if *start > 0 {
            modifiers.offset = Some(*start);
        }
        modifiers.limit = *length;
        current = inner;
    }
    match current {
        GraphPattern::Distinct { inner } | GraphPattern::Reduced { inner } => {
            modifiers.distinct = true;
            current = inner;
        }
        _ => {}
    }
    if let GraphPattern::Project { inner, variables } = current {
        modifiers.projection = variables.clone();
        current = inner;
    }
    if let GraphPattern::OrderBy { inner, expression } = current {
        modifiers.order = expression.clone();
        current = inner;
    }
    (current, modifiers)
}

/// Variables a pattern makes visible to its surroundings.
pub fn pattern_variables(pattern: &GraphPattern, acc: &mut HashSet<Variable>) {
    match pattern {
        GraphPattern::Bgp { patterns } => {
            for triple in patterns {
                if let spargebra::term::TermPattern::Variable(v) = &triple.subject {
                    acc.insert(v.clone());
                }
                if let NamedNodePattern::Variable(v) = &triple.predicate {
                    acc.insert(v.clone());
                }
                if let spargebra::term::TermPattern::Variable(v) = &triple.object {
                    acc.insert(v.clone());
                }
            }
        }
        GraphPattern::Path {
            subject, object, ..
        } => {
            if let spargebra::term::TermPattern::Variable(v) = subject {
                acc.insert(v.clone());
            }
            if let spargebra::term::TermPattern::Variable(v) = object {
                acc.insert(v.clone());
            }
        }
        GraphPattern::Join { left, right }
        | GraphPattern::Union { left, right }
        | GraphPattern::LeftJoin { left, right, .. } => {
            pattern_variables(left, acc);
            pattern_variables(right, acc);
        }
        // the right side of MINUS binds nothing outward
        GraphPattern::Minus { left, .. } => pattern_variables(left, acc),
        GraphPattern::Filter { inner, .. } => pattern_variables(inner, acc),
        GraphPattern::Extend {
            inner, variable, ..
        } => {
            acc.insert(variable.clone());
            pattern_variables(inner, acc);
        }
        GraphPattern::Values { variables, .. } => acc.extend(variables.iter().cloned()),
        GraphPattern::Graph { name, inner } => {
            if let NamedNodePattern::Variable(v) = name {
                acc.insert(v.clone());
            }
            pattern_variables(inner, acc);
        }
        GraphPattern::Group {
            variables,
            aggregates,
            ..
        } => {
            acc.extend(variables.iter().cloned());
            acc.extend(aggregates.iter().map(|(v, _)| v.clone()));
        }
        GraphPattern::Project { variables, .. } => acc.extend(variables.iter().cloned()),
        GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. }
        | GraphPattern::OrderBy { inner, .. } => pattern_variables(inner, acc),
        _ => {}
    }
}

/// Variables referenced directly by an expression. EXISTS subpatterns
/// correlate through mappings on their own and are not descended into.
pub fn expression_variables(expr: &Expression, acc: &mut HashSet<Variable>) {
    match expr {
        Expression::Variable(v) | Expression::Bound(v) => {
            acc.insert(v.clone());
        }
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
            expression_variables(a, acc);
            expression_variables(b, acc);
        }
        Expression::In(needle, haystack) => {
            expression_variables(needle, acc);
            for item in haystack {
                expression_variables(item, acc);
            }
        }
        Expression::UnaryPlus(inner)
        | Expression::UnaryMinus(inner)
        | Expression::Not(inner) => expression_variables(inner, acc),
        Expression::If(a, b, c) => {
            expression_variables(a, acc);
            expression_variables(b, acc);
            expression_variables(c, acc);
        }
        Expression::Coalesce(items) | Expression::FunctionCall(_, items) => {
            for item in items {
                expression_variables(item, acc);
            }
        }
        Expression::Exists(_)
        | Expression::NamedNode(_)
        | Expression::Literal(_) => {}
    }
}

fn shared_pattern_variables(left: &GraphPattern, right: &GraphPattern) -> Vec<Variable> {
    let mut left_vars = HashSet::new();
    let mut right_vars = HashSet::new();
    pattern_variables(left, &mut left_vars);
    pattern_variables(right, &mut right_vars);
    let mut shared: Vec<Variable> = left_vars.intersection(&right_vars).cloned().collect();
    shared.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    shared
}

/// Projected-variable set extended with pattern-internal needs (correlation
/// variables, filter inputs). `None` already projects everything.
fn extend_projected(
    projected: Option<&[Variable]>,
    extra: impl IntoIterator<Item = Variable>,
) -> Option<Vec<Variable>> {
    let base = projected?;
    let mut extended = base.to_vec();
    for var in extra {
        if !extended.contains(&var) {
            extended.push(var);
        }
    }
    Some(extended)
}

pub fn translate_pattern(
    ctx: &mut SparqlContext,
    pattern: &GraphPattern,
    projected: Option<&[Variable]>,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    match pattern {
        GraphPattern::Bgp { patterns } => {
            translate_bgp(ctx, patterns, projected, context_constraint)
        }
        GraphPattern::Path {
            subject,
            path,
            object,
        } => translate_path(ctx, subject, path, object, projected, context_constraint),
        GraphPattern::Join { left, right } => {
            translate_join(ctx, left, right, projected, context_constraint)
        }
        GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } => translate_optional(
            ctx,
            left,
            right,
            expression.as_ref(),
            projected,
            context_constraint,
        ),
        GraphPattern::Union { left, right } => {
            translate_union(ctx, left, right, projected, context_constraint)
        }
        GraphPattern::Minus { left, right } => {
            translate_minus(ctx, left, right, projected, context_constraint)
        }
        GraphPattern::Filter { expr, inner } => {
            translate_filter(ctx, expr, inner, projected, context_constraint)
        }
        GraphPattern::Extend {
            inner,
            variable,
            expression,
        } => translate_extend(ctx, inner, variable, expression, projected, context_constraint),
        GraphPattern::Values {
            variables,
            bindings,
        } => translate_values(ctx, variables, bindings),
        GraphPattern::Graph { name, inner } => {
            translate_graph(ctx, name, inner, projected, context_constraint)
        }
        GraphPattern::Group {
            inner,
            variables,
            aggregates,
        } => translate_group(ctx, inner, variables, aggregates, projected, context_constraint),
        GraphPattern::Project { .. }
        | GraphPattern::Distinct { .. }
        | GraphPattern::Reduced { .. }
        | GraphPattern::Slice { .. }
        | GraphPattern::OrderBy { .. } => translate_subselect(ctx, pattern, context_constraint),
        other => {
            log::warn!("unsupported graph pattern: {:?}", other);
            Err(SparqlError::Unsupported(
                "SERVICE and other non-translatable graph patterns".to_string(),
            ))
        }
    }
}

fn translate_join(
    ctx: &mut SparqlContext,
    left: &GraphPattern,
    right: &GraphPattern,
    projected: Option<&[Variable]>,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    let shared = shared_pattern_variables(left, right);
    let child_projected = extend_projected(projected, shared.iter().cloned());
    let left_fragment =
        translate_pattern(ctx, left, child_projected.as_deref().or(projected), context_constraint)?;
    let right_fragment =
        translate_pattern(ctx, right, child_projected.as_deref().or(projected), context_constraint)?;
    Ok(join_fragments(ctx, left_fragment, right_fragment))
}

/// CROSS JOIN the two sides and connect shared variables: through
/// `term_uuid` when both sides expose a term-table column, directly on the
/// mapping expressions otherwise.
fn join_fragments(
    ctx: &mut SparqlContext,
    left: SqlFragment,
    mut right: SqlFragment,
) -> SqlFragment {
    if left.from_clause.is_empty() {
        right.where_conditions = [left.where_conditions, right.where_conditions].concat();
        right.joins = [left.joins, right.joins].concat();
        let mut mappings = left.variable_mappings;
        mappings.extend_missing(&right.variable_mappings);
        right.variable_mappings = mappings;
        return right;
    }
    if right.from_clause.is_empty() {
        let mut left = left;
        left.where_conditions.extend(right.where_conditions);
        left.joins.extend(right.joins);
        left.variable_mappings.extend_missing(&right.variable_mappings);
        return left;
    }

    // Collision repair: with one shared generator this should never fire,
    // but a renamed right side keeps the combined fragment well-scoped.
    let left_decls = declared_aliases(&left.from_clause, &left.joins);
    let right_decls = declared_aliases(&right.from_clause, &right.joins);
    for collision in right_decls.intersection(&left_decls) {
        let replacement = ctx.aliases.next_quad_alias();
        log::debug!(
            "alias collision on '{}', renaming right side to '{}'",
            collision,
            replacement
        );
        let rename = |text: &str| {
            Regex::new(&format!(r"\b{}\b", regex::escape(collision)))
                .expect("rename regex")
                .replace_all(text, replacement.as_str())
                .into_owned()
        };
        right.from_clause = rename(&right.from_clause);
        right.joins = right.joins.iter().map(|j| rename(j)).collect();
        right.where_conditions = right.where_conditions.iter().map(|w| rename(w)).collect();
        let renamed: VarMap = right
            .variable_mappings
            .iter()
            .map(|(v, m)| (v.clone(), rename(m)))
            .collect();
        right.variable_mappings = renamed;
    }

    let mut where_conditions = [left.where_conditions.clone(), right.where_conditions].concat();
    for (var, left_mapping) in left.variable_mappings.iter() {
        if let Some(right_mapping) = right.variable_mappings.get(var) {
            if left_mapping == right_mapping {
                continue;
            }
            let condition = match (
                left_mapping.strip_suffix(".term_text"),
                right_mapping.strip_suffix(".term_text"),
            ) {
                (Some(left_alias), Some(right_alias)) => {
                    format!("{}.term_uuid = {}.term_uuid", left_alias, right_alias)
                }
                _ => format!("{} = {}", left_mapping, right_mapping),
            };
            where_conditions.push(condition);
        }
    }

    let from_clause = format!(
        "FROM {} CROSS JOIN {}",
        strip_from(&left.from_clause),
        strip_from(&right.from_clause)
    );

    let mut mappings = left.variable_mappings;
    mappings.extend_missing(&right.variable_mappings);

    let mut fragment = SqlFragment::of(
        from_clause,
        where_conditions,
        [left.joins, right.joins].concat(),
        mappings,
    );
    fragment.group_by = [left.group_by, right.group_by].concat();
    fragment.having = [left.having, right.having].concat();
    fragment.order_by = if left.order_by.is_empty() {
        right.order_by
    } else {
        left.order_by
    };
    fragment.optimize()
}

fn translate_union(
    ctx: &mut SparqlContext,
    left: &GraphPattern,
    right: &GraphPattern,
    projected: Option<&[Variable]>,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    // constraints are pushed into each branch, never applied around the UNION
    let left_fragment = ctx.scoped_aliases("left", |ctx| {
        translate_pattern(ctx, left, projected, context_constraint)
    })?;
    let right_fragment = ctx.scoped_aliases("right", |ctx| {
        translate_pattern(ctx, right, projected, context_constraint)
    })?;

    let mut variables: Vec<Variable> = left_fragment
        .variable_mappings
        .variables()
        .chain(right_fragment.variable_mappings.variables())
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    variables.sort_by(|a, b| a.as_str().cmp(b.as_str()));

    let left_sql = union_branch_sql(&left_fragment, &variables);
    let right_sql = union_branch_sql(&right_fragment, &variables);
    let union_sql = normalize_union_sql(format!("{}\nUNION\n{}", left_sql, right_sql));

    let alias = ctx.aliases.next_union_alias();
    let mut mappings = VarMap::new();
    for (idx, var) in variables.iter().enumerate() {
        mappings.insert(var.clone(), format!("{}.var_{}", alias, idx));
    }

    Ok(SqlFragment::of(
        format!("FROM ({}) {}", union_sql, alias),
        vec![],
        vec![],
        mappings,
    ))
}

/// One UNION branch as a standalone SELECT projecting `var_0 … var_n` in the
/// caller's sorted order, `NULL` where the branch does not bind a variable.
/// A branch that already is a union-derived table over the same variable set
/// is unwrapped instead of double-nested.
fn union_branch_sql(fragment: &SqlFragment, variables: &[Variable]) -> String {
    if fragment.is_union_derived() {
        if let Some((inner, alias)) = split_derived_table(&fragment.from_clause) {
            let aligned = variables.iter().enumerate().all(|(idx, var)| {
                fragment.variable_mappings.get(var)
                    == Some(format!("{}.var_{}", alias, idx)).as_deref()
            });
            if aligned && fragment.variable_mappings.len() == variables.len() {
                return inner.to_string();
            }
        }
    }

    let items: Vec<String> = variables
        .iter()
        .enumerate()
        .map(|(idx, var)| match fragment.variable_mappings.get(var) {
            Some(mapping) => format!("{} AS var_{}", mapping, idx),
            None => format!("NULL AS var_{}", idx),
        })
        .collect();

    let mut parts = vec![format!("SELECT {}", items.join(", "))];
    if !fragment.from_clause.is_empty() {
        parts.push(fragment.from_clause.clone());
    }
    parts.extend(fragment.joins.iter().cloned());
    if !fragment.where_conditions.is_empty() {
        parts.push(format!("WHERE {}", fragment.where_conditions.join(" AND ")));
    }
    parts.join("\n")
}

/// Defensive normalization of the concatenated UNION text: collapses
/// accidental `FROM FROM` duplication so every branch stays executable.
fn normalize_union_sql(sql: String) -> String {
    if !sql.contains("FROM FROM") {
        return sql;
    }
    log::warn!("normalizing duplicated FROM keywords in UNION branches");
    sql.replace("FROM FROM", "FROM")
}

fn translate_optional(
    ctx: &mut SparqlContext,
    left: &GraphPattern,
    right: &GraphPattern,
    filter: Option<&Expression>,
    projected: Option<&[Variable]>,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    let shared = shared_pattern_variables(left, right);
    let child_projected = extend_projected(projected, shared.iter().cloned());
    let required = translate_pattern(
        ctx,
        left,
        child_projected.as_deref().or(projected),
        context_constraint,
    )?;
    let optional = ctx.scoped_aliases("opt", |ctx| {
        translate_pattern(
            ctx,
            right,
            child_projected.as_deref().or(projected),
            context_constraint,
        )
    })?;

    let mut joins = required.joins.clone();
    let mut where_conditions = required.where_conditions.clone();
    let required_decls = declared_aliases(&required.from_clause, &required.joins);

    // Aliases the optional side will declare itself, and the ones referenced
    // but declared nowhere: the latter become LEFT JOINs against the quad
    // table, connected through a shared variable site when one exists and
    // through subject_uuid as the fallback.
    let mut optional_aliases: HashSet<String> = HashSet::new();
    let mut optional_joins: Vec<String> = Vec::new();

    if let Some((_, derived_alias)) = split_derived_table(&optional.from_clause) {
        // derived optional side (UNION, VALUES, sub-select): LEFT JOIN the
        // whole table on the shared-variable equalities
        let mut on_conditions: Vec<String> = shared
            .iter()
            .filter_map(|var| {
                let required_mapping = required.variable_mappings.get(var)?;
                let optional_mapping = optional.variable_mappings.get(var)?;
                Some(format!("{} = {}", optional_mapping, required_mapping))
            })
            .collect();
        if on_conditions.is_empty() {
            on_conditions.push("TRUE".to_string());
        }
        optional_aliases.insert(derived_alias.to_string());
        optional_joins.push(format!(
            "LEFT JOIN {} ON {}",
            strip_from(&optional.from_clause),
            on_conditions.join(" AND ")
        ));
    } else {
        let self_declared = declared_aliases("", &optional.joins);
        let referenced = referenced_aliases(
            optional.joins.iter().chain(optional.where_conditions.iter()),
        );
        let mut missing: Vec<String> = referenced
            .into_iter()
            .filter(|alias| !required_decls.contains(alias) && !self_declared.contains(alias))
            .collect();
        missing.sort();

        let connection_alias = first_plain_from_alias(&required.from_clause);
        for alias in &missing {
            let connection = optional_connection(ctx, &shared, &required_decls, alias)
                .or_else(|| {
                    connection_alias.as_ref().map(|required_alias| {
                        format!("{}.subject_uuid = {}.subject_uuid", required_alias, alias)
                    })
                })
                .unwrap_or_else(|| "TRUE".to_string());
            optional_aliases.insert(alias.clone());
            optional_joins.push(format!(
                "LEFT JOIN {} {} ON {}",
                ctx.tables.quad_table, alias, connection
            ));
        }

        for join in &optional.joins {
            optional_aliases.extend(
                DECL_RE
                    .captures_iter(join)
                    .map(|captures| captures[1].to_string()),
            );
            let trimmed = join.trim_start();
            if let Some(rest) = trimmed.strip_prefix("JOIN ") {
                optional_joins.push(format!("LEFT JOIN {}", rest));
            } else {
                optional_joins.push(join.clone());
            }
        }
    }

    // Optional-side conditions restrict the optional rows only; they are
    // attached to the LEFT JOIN ON clauses so unmatched required rows keep
    // their NULLs instead of being filtered away.
    let mut pending: Vec<String> = optional.where_conditions.clone();
    if let Some(filter_expr) = filter {
        let mut combined = required.variable_mappings.clone();
        combined.extend_missing(&optional.variable_mappings);
        pending.push(translate_expression(ctx, filter_expr, &combined)?);
    }
    let mut declaration_index: std::collections::HashMap<String, usize> =
        std::collections::HashMap::new();
    for (idx, join) in optional_joins.iter().enumerate() {
        for captures in DECL_RE.captures_iter(join) {
            declaration_index.entry(captures[1].to_string()).or_insert(idx);
        }
    }
    // derived-table aliases are not caught by the declaration regex
    for alias in &optional_aliases {
        if !declaration_index.contains_key(alias) {
            let marker = format!(") {} ON", alias);
            if let Some(idx) = optional_joins.iter().position(|join| join.contains(&marker)) {
                declaration_index.insert(alias.clone(), idx);
            }
        }
    }
    for condition in pending {
        let refs = referenced_aliases(std::iter::once(&condition));
        // attach where the last referenced optional alias is declared, so
        // the ON clause only sees aliases already in scope
        let target = if refs.is_empty() {
            if optional_joins.is_empty() {
                None
            } else {
                Some(0)
            }
        } else {
            refs.iter()
                .filter_map(|alias| declaration_index.get(alias).copied())
                .max()
        };
        match target {
            Some(idx) if optional_joins[idx].trim_start().starts_with("LEFT JOIN") => {
                optional_joins[idx].push_str(" AND ");
                optional_joins[idx].push_str(&condition);
            }
            _ => where_conditions.push(condition),
        }
    }

    joins.extend(optional_joins);

    let mut mappings = required.variable_mappings;
    mappings.extend_missing(&optional.variable_mappings);

    let mut fragment = SqlFragment::of(required.from_clause, where_conditions, joins, mappings);
    fragment.group_by = [required.group_by, optional.group_by].concat();
    fragment.having = [required.having, optional.having].concat();
    fragment.order_by = required.order_by;
    Ok(fragment.optimize())
}

/// Connection condition for a dangling optional quad alias, derived from a
/// shared variable that has a site on both sides.
fn optional_connection(
    ctx: &SparqlContext,
    shared: &[Variable],
    required_decls: &HashSet<String>,
    optional_alias: &str,
) -> Option<String> {
    for var in shared {
        let Some(sites) = ctx.var_sites.get(var) else {
            continue;
        };
        let required_site = sites.iter().find(|site| required_decls.contains(&site.alias));
        let optional_site = sites.iter().find(|site| site.alias == optional_alias);
        if let (Some(required_site), Some(optional_site)) = (required_site, optional_site) {
            return Some(format!(
                "{}.{} = {}.{}",
                required_site.alias, required_site.column, optional_alias, optional_site.column
            ));
        }
    }
    None
}

fn translate_minus(
    ctx: &mut SparqlContext,
    left: &GraphPattern,
    right: &GraphPattern,
    projected: Option<&[Variable]>,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    let shared = shared_pattern_variables(left, right);
    let child_projected = extend_projected(projected, shared.iter().cloned());
    let mut positive = translate_pattern(
        ctx,
        left,
        child_projected.as_deref().or(projected),
        context_constraint,
    )?;
    // the negative side binds all of its variables internally
    let negative = ctx.scoped_aliases("minus", |ctx| {
        translate_pattern(
            ctx,
            right,
            child_projected.as_deref().or(projected),
            context_constraint,
        )
    })?;

    let mut subquery = String::from("SELECT 1");
    if !negative.from_clause.is_empty() {
        subquery.push(' ');
        subquery.push_str(&negative.from_clause);
    }
    for join in &negative.joins {
        subquery.push(' ');
        subquery.push_str(join);
    }

    let mut conditions = negative.where_conditions.clone();
    for var in &shared {
        if let (Some(negative_mapping), Some(positive_mapping)) = (
            negative.variable_mappings.get(var),
            positive.variable_mappings.get(var),
        ) {
            conditions.push(format!("{} = {}", negative_mapping, positive_mapping));
        }
    }
    if !conditions.is_empty() {
        subquery.push_str(" WHERE ");
        subquery.push_str(&conditions.join(" AND "));
    }

    positive
        .where_conditions
        .push(format!("NOT EXISTS ({})", subquery));
    Ok(positive)
}

fn translate_filter(
    ctx: &mut SparqlContext,
    expr: &Expression,
    inner: &GraphPattern,
    projected: Option<&[Variable]>,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    let mut expr_vars = HashSet::new();
    expression_variables(expr, &mut expr_vars);
    let child_projected = extend_projected(projected, expr_vars);
    let mut fragment = translate_pattern(
        ctx,
        inner,
        child_projected.as_deref().or(projected),
        context_constraint,
    )?;

    let condition = translate_expression(ctx, expr, &fragment.variable_mappings)?;
    if is_having_condition(ctx, &fragment.variable_mappings, &condition) {
        fragment.having.push(condition);
    } else {
        if fragment.is_union_derived() {
            log::warn!(
                "filter condition on a UNION-derived fragment is not emitted: {}",
                condition
            );
        }
        fragment.where_conditions.push(condition);
    }
    Ok(fragment)
}

fn translate_extend(
    ctx: &mut SparqlContext,
    inner: &GraphPattern,
    variable: &Variable,
    expression: &Expression,
    projected: Option<&[Variable]>,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    let mut expr_vars = HashSet::new();
    expression_variables(expression, &mut expr_vars);
    let child_projected = extend_projected(projected, expr_vars);
    let mut fragment = translate_pattern(
        ctx,
        inner,
        child_projected.as_deref().or(projected),
        context_constraint,
    )?;

    let sql = translate_expression(ctx, expression, &fragment.variable_mappings)?;
    fragment.variable_mappings.insert(variable.clone(), sql);
    Ok(fragment)
}

/// Inline data as a UNION ALL derived table. Every value is quoted as a
/// string so comparisons against term-table text stay uniform.
fn translate_values(
    ctx: &mut SparqlContext,
    variables: &[Variable],
    bindings: &[Vec<Option<GroundTerm>>],
) -> SparqlResult<SqlFragment> {
    let alias = ctx.aliases.next_values_alias();

    let column = |var: &Variable| format!("{}_val", var.as_str());
    let mut rows: Vec<String> = bindings
        .iter()
        .map(|row| {
            let items: Vec<String> = variables
                .iter()
                .zip(row.iter())
                .map(|(var, value)| match value {
                    Some(term) => {
                        format!("{} AS {}", crate::terms::ground_term_sql_literal(term), column(var))
                    }
                    None => format!("NULL AS {}", column(var)),
                })
                .collect();
            format!("SELECT {}", items.join(", "))
        })
        .collect();
    if rows.is_empty() {
        let items: Vec<String> = variables
            .iter()
            .map(|var| format!("NULL AS {}", column(var)))
            .collect();
        rows.push(format!("SELECT {} WHERE 1=0", items.join(", ")));
    }

    let mut mappings = VarMap::new();
    for var in variables {
        mappings.insert(var.clone(), format!("{}.{}", alias, column(var)));
    }

    Ok(SqlFragment::of(
        format!("FROM ({}) {}", rows.join(" UNION ALL "), alias),
        vec![],
        vec![],
        mappings,
    ))
}

fn translate_graph(
    ctx: &mut SparqlContext,
    name: &NamedNodePattern,
    inner: &GraphPattern,
    projected: Option<&[Variable]>,
    _outer_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    match name {
        NamedNodePattern::NamedNode(graph) => {
            let constraint = match ctx.lookup_uuid(&named_key(graph)) {
                Some(uuid) => format!("context_uuid = '{}'", uuid),
                None => {
                    log::info!(
                        "graph <{}> not in term table, pattern yields no rows",
                        graph.as_str()
                    );
                    format!("context_uuid = '{}'", Uuid::nil())
                }
            };
            translate_pattern(ctx, inner, projected, Some(&constraint))
        }
        NamedNodePattern::Variable(graph_var) => {
            let mut fragment = translate_pattern(ctx, inner, projected, None)?;
            let wanted = projected.is_none_or(|vars| vars.contains(graph_var));
            if wanted && !fragment.variable_mappings.contains(graph_var) {
                if let Some(first_alias) = first_plain_from_alias(&fragment.from_clause) {
                    let term_alias = ctx.aliases.next_term_alias("g");
                    fragment.joins.push(format!(
                        "JOIN {} {} ON {}.context_uuid = {}.term_uuid",
                        ctx.tables.term_table, term_alias, first_alias, term_alias
                    ));
                    fragment
                        .variable_mappings
                        .insert(graph_var.clone(), format!("{}.term_text", term_alias));
                    ctx.record_site(graph_var, &first_alias, "context_uuid");
                } else {
                    log::warn!(
                        "graph variable ?{} cannot be bound over a derived table",
                        graph_var.as_str()
                    );
                }
            }
            Ok(fragment)
        }
    }
}

fn translate_group(
    ctx: &mut SparqlContext,
    inner: &GraphPattern,
    variables: &[Variable],
    aggregates: &[(Variable, AggregateExpression)],
    projected: Option<&[Variable]>,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    // aggregate inputs and group keys must be mapped by the nested pattern
    let mut needed: HashSet<Variable> = variables.iter().cloned().collect();
    for (_, aggregate) in aggregates {
        if let AggregateExpression::FunctionCall { expr, .. } = aggregate {
            expression_variables(expr, &mut needed);
        }
    }
    let child_projected = extend_projected(projected, needed);
    let mut fragment = translate_pattern(
        ctx,
        inner,
        child_projected.as_deref().or(projected),
        context_constraint,
    )?;

    for (result_var, aggregate) in aggregates {
        let sql = translate_aggregate(ctx, aggregate, &fragment.variable_mappings)?;
        fragment.variable_mappings.insert(result_var.clone(), sql);
        ctx.aggregate_vars.insert(result_var.clone());
    }
    fragment.group_by = variables.to_vec();
    Ok(fragment)
}

/// A nested SELECT met mid-tree: assemble it completely and expose its
/// projection as a derived table.
fn translate_subselect(
    ctx: &mut SparqlContext,
    pattern: &GraphPattern,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    let (inner, modifiers) = peel_modifiers(pattern);

    let mut order_vars = HashSet::new();
    for order in &modifiers.order {
        let (OrderExpression::Asc(expr) | OrderExpression::Desc(expr)) = order;
        expression_variables(expr, &mut order_vars);
    }
    let projected = if modifiers.projection.is_empty() {
        None
    } else {
        extend_projected(Some(&modifiers.projection), order_vars)
    };

    let mut inner_fragment =
        translate_pattern(ctx, inner, projected.as_deref(), context_constraint)?;
    inner_fragment.order_by =
        translate_order_by(ctx, &modifiers.order, &inner_fragment.variable_mappings)?;

    let projection: Vec<Variable> = if modifiers.projection.is_empty() {
        inner_fragment
            .variable_mappings
            .variables()
            .cloned()
            .collect()
    } else {
        modifiers.projection.clone()
    };

    let built = build_select_query(
        &inner_fragment,
        &projection,
        modifiers.distinct,
        modifiers.limit,
        modifiers.offset,
    );

    let alias = ctx.aliases.next_subquery_alias();
    let mut mappings = VarMap::new();
    for column in &built.columns {
        mappings.insert(
            column.variable.clone(),
            format!("{}.{}", alias, column.alias),
        );
    }
    Ok(SqlFragment::of(
        format!("FROM ({}) {}", built.sql, alias),
        vec![],
        vec![],
        mappings,
    ))
}

pub fn strip_from(from_clause: &str) -> &str {
    from_clause
        .trim_start()
        .strip_prefix("FROM ")
        .unwrap_or(from_clause)
        .trim()
}

fn declared_aliases(from_clause: &str, joins: &[String]) -> HashSet<String> {
    let mut declared = HashSet::new();
    if let Some((_, alias)) = split_derived_table(from_clause) {
        declared.insert(alias.to_string());
    } else {
        for captures in DECL_RE.captures_iter(from_clause) {
            declared.insert(captures[1].to_string());
        }
    }
    for join in joins {
        for captures in DECL_RE.captures_iter(join) {
            declared.insert(captures[1].to_string());
        }
    }
    declared
}

fn referenced_aliases<'a>(texts: impl Iterator<Item = &'a String>) -> HashSet<String> {
    let mut referenced = HashSet::new();
    for text in texts {
        for captures in ALIAS_REF_RE.captures_iter(text) {
            referenced.insert(captures[1].to_string());
        }
    }
    referenced
}

fn first_plain_from_alias(from_clause: &str) -> Option<String> {
    PLAIN_FROM_RE
        .captures(from_clause)
        .filter(|captures| !captures[1].starts_with('('))
        .map(|captures| captures[2].to_string())
}

/// Quote `text` for interpolation into generated SQL (re-export used by the
/// assembler's sentinel emission).
pub fn sentinel_sql(variable: &Variable) -> String {
    sql_quote(&format!("UNMAPPED_{}", variable.as_str()))
}
