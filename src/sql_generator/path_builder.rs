//! Property paths compiled to derived tables exposing `(start_node,
//! end_node)` term-UUID pairs.
//!
//! `+` and `*` become recursive CTEs that accumulate the visited nodes in an
//! array: the cycle predicate `NOT (… = ANY(path))` and the hard depth bound
//! together guarantee termination on cyclic data. Graph constraints are
//! pushed into the quad scans at the leaves.

use oxrdf::Variable;
use spargebra::algebra::PropertyPathExpression;
use spargebra::term::TermPattern;
use uuid::Uuid;

use super::fragment::{SqlFragment, VarMap};
use super::SparqlContext;
use crate::error::SparqlResult;
use crate::terms::{named_key, term_pattern_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointState {
    Variable,
    Bound(Uuid),
    /// A bound term that is not in the term table; the path yields nothing.
    Unresolvable,
}

#[derive(Debug, Clone, Copy)]
struct EndpointBindings {
    subject: EndpointState,
    object: EndpointState,
}

fn endpoint_state(ctx: &SparqlContext, term: &TermPattern) -> EndpointState {
    match term_pattern_key(term) {
        None => EndpointState::Variable,
        Some(key) => match ctx.lookup_uuid(&key) {
            Some(uuid) => EndpointState::Bound(uuid),
            None => {
                log::info!(
                    "path endpoint ({:?}) not in term table, path yields no rows",
                    key.text
                );
                EndpointState::Unresolvable
            }
        },
    }
}

pub fn translate_path(
    ctx: &mut SparqlContext,
    subject: &TermPattern,
    path: &PropertyPathExpression,
    object: &TermPattern,
    projected: Option<&[Variable]>,
    context_constraint: Option<&str>,
) -> SparqlResult<SqlFragment> {
    let endpoints = EndpointBindings {
        subject: endpoint_state(ctx, subject),
        object: endpoint_state(ctx, object),
    };
    let compiled = compile_path(ctx, path, context_constraint, endpoints)?;
    let alias = ctx.aliases.next_subquery_alias();

    let mut where_conditions = Vec::new();
    let mut joins = Vec::new();
    let mut mappings = VarMap::new();
    let projects = |var: &Variable| projected.is_none_or(|vars| vars.contains(var));

    let mut bind_endpoint = |ctx: &mut SparqlContext,
                             term: &TermPattern,
                             state: EndpointState,
                             column: &'static str,
                             position: &str| {
        match state {
            EndpointState::Bound(uuid) => {
                where_conditions.push(format!("{}.{} = '{}'", alias, column, uuid));
            }
            EndpointState::Unresolvable => {
                where_conditions.push("1=0".to_string());
            }
            EndpointState::Variable => {
                let TermPattern::Variable(var) = term else {
                    return;
                };
                ctx.record_site(var, &alias, column);
                if mappings.contains(var) {
                    // same variable on both ends: a reflexive constraint
                    where_conditions.push(format!("{}.start_node = {}.end_node", alias, alias));
                } else if projects(var) {
                    let term_alias = ctx.aliases.next_term_alias(position);
                    joins.push(format!(
                        "JOIN {} {} ON {}.{} = {}.term_uuid",
                        ctx.tables.term_table, term_alias, alias, column, term_alias
                    ));
                    mappings.insert(var.clone(), format!("{}.term_text", term_alias));
                }
            }
        }
    };

    bind_endpoint(ctx, subject, endpoints.subject, "start_node", "subject");
    bind_endpoint(ctx, object, endpoints.object, "end_node", "object");

    Ok(SqlFragment::of(
        format!("FROM ({}) {}", compiled, alias),
        where_conditions,
        joins,
        mappings,
    ))
}

/// Compile a path expression to a SELECT producing `start_node, end_node`.
fn compile_path(
    ctx: &mut SparqlContext,
    path: &PropertyPathExpression,
    constraint: Option<&str>,
    endpoints: EndpointBindings,
) -> SparqlResult<String> {
    match path {
        PropertyPathExpression::NamedNode(predicate) => {
            Ok(direct_edge_sql(ctx, predicate, constraint))
        }
        PropertyPathExpression::Reverse(inner) => {
            let inner_sql = compile_path(ctx, inner, constraint, endpoints.reversed())?;
            let alias = ctx.aliases.next_subquery_alias();
            Ok(format!(
                "SELECT {a}.end_node AS start_node, {a}.start_node AS end_node FROM ({inner}) {a}",
                a = alias,
                inner = inner_sql
            ))
        }
        PropertyPathExpression::Sequence(first, second) => {
            // fresh intermediate node joins the two halves
            let first_sql = compile_path(ctx, first, constraint, endpoints.open_object())?;
            let second_sql = compile_path(ctx, second, constraint, endpoints.open_subject())?;
            let first_alias = ctx.aliases.next_subquery_alias();
            let second_alias = ctx.aliases.next_subquery_alias();
            Ok(format!(
                "SELECT {f}.start_node AS start_node, {s}.end_node AS end_node \
                 FROM ({first}) {f} JOIN ({second}) {s} ON {f}.end_node = {s}.start_node",
                f = first_alias,
                s = second_alias,
                first = first_sql,
                second = second_sql
            ))
        }
        PropertyPathExpression::Alternative(left, right) => {
            let left_sql = compile_path(ctx, left, constraint, endpoints)?;
            let right_sql = compile_path(ctx, right, constraint, endpoints)?;
            let left_alias = ctx.aliases.next_subquery_alias();
            let right_alias = ctx.aliases.next_subquery_alias();
            Ok(format!(
                "SELECT start_node, end_node FROM ({left}) {l} \
                 UNION ALL SELECT start_node, end_node FROM ({right}) {r}",
                left = left_sql,
                right = right_sql,
                l = left_alias,
                r = right_alias
            ))
        }
        PropertyPathExpression::ZeroOrMore(inner) => {
            let edge_sql = compile_path(ctx, inner, constraint, EndpointBindings::open())?;
            Ok(recursive_cte_sql(ctx, &edge_sql, true))
        }
        PropertyPathExpression::OneOrMore(inner) => {
            let edge_sql = compile_path(ctx, inner, constraint, EndpointBindings::open())?;
            Ok(recursive_cte_sql(ctx, &edge_sql, false))
        }
        PropertyPathExpression::ZeroOrOne(inner) => {
            let edge_sql = compile_path(ctx, inner, constraint, EndpointBindings::open())?;
            let zero_alias = ctx.aliases.next_subquery_alias();
            let one_alias = ctx.aliases.next_subquery_alias();
            Ok(format!(
                "SELECT DISTINCT {z}.start_node AS start_node, {z}.start_node AS end_node \
                 FROM ({edge}) {z} \
                 UNION SELECT start_node, end_node FROM ({edge}) {o}",
                z = zero_alias,
                o = one_alias,
                edge = edge_sql
            ))
        }
        PropertyPathExpression::NegatedPropertySet(predicates) => {
            Ok(negated_set_sql(ctx, predicates, constraint, endpoints))
        }
    }
}

impl EndpointBindings {
    fn open() -> Self {
        Self {
            subject: EndpointState::Variable,
            object: EndpointState::Variable,
        }
    }

    fn reversed(self) -> Self {
        Self {
            subject: self.object,
            object: self.subject,
        }
    }

    fn open_object(self) -> Self {
        Self {
            subject: self.subject,
            object: EndpointState::Variable,
        }
    }

    fn open_subject(self) -> Self {
        Self {
            subject: EndpointState::Variable,
            object: self.object,
        }
    }
}

fn direct_edge_sql(
    ctx: &SparqlContext,
    predicate: &oxrdf::NamedNode,
    constraint: Option<&str>,
) -> String {
    let predicate_condition = match ctx.lookup_uuid(&named_key(predicate)) {
        Some(uuid) => format!("predicate_uuid = '{}'", uuid),
        None => {
            log::info!(
                "path predicate <{}> not in term table, edge set is empty",
                predicate.as_str()
            );
            "1=0".to_string()
        }
    };
    let mut sql = format!(
        "SELECT subject_uuid AS start_node, object_uuid AS end_node FROM {} WHERE {}",
        ctx.tables.quad_table, predicate_condition
    );
    if let Some(constraint) = constraint {
        sql.push_str(" AND ");
        sql.push_str(constraint);
    }
    sql
}

/// Recursive closure over an arbitrary edge relation. `reflexive` adds the
/// zero-hop base case used by `*`.
fn recursive_cte_sql(ctx: &mut SparqlContext, edge_sql: &str, reflexive: bool) -> String {
    let base_alias = ctx.aliases.next_subquery_alias();
    let step_alias = ctx.aliases.next_subquery_alias();
    let base = if reflexive {
        format!(
            "SELECT DISTINCT {b}.start_node AS start_node, {b}.start_node AS end_node, \
             ARRAY[{b}.start_node] AS path, 0 AS depth FROM ({edge}) {b}",
            b = base_alias,
            edge = edge_sql
        )
    } else {
        format!(
            "SELECT {b}.start_node AS start_node, {b}.end_node AS end_node, \
             ARRAY[{b}.start_node, {b}.end_node] AS path, 1 AS depth FROM ({edge}) {b}",
            b = base_alias,
            edge = edge_sql
        )
    };
    format!(
        "WITH RECURSIVE path_cte(start_node, end_node, path, depth) AS ( \
         {base} \
         UNION ALL \
         SELECT r.start_node, {s}.end_node, r.path || {s}.end_node, r.depth + 1 \
         FROM ({edge}) {s} JOIN path_cte r ON {s}.start_node = r.end_node \
         WHERE r.depth < {max_depth} AND NOT ({s}.end_node = ANY(r.path)) \
         ) SELECT start_node, end_node FROM path_cte",
        base = base,
        s = step_alias,
        edge = edge_sql,
        max_depth = ctx.max_path_depth
    )
}

/// `!(p1|p2|…)`: pairs related by anything except the listed predicates. The
/// candidate set depends on which endpoints are bound.
fn negated_set_sql(
    ctx: &mut SparqlContext,
    predicates: &[oxrdf::NamedNode],
    constraint: Option<&str>,
    endpoints: EndpointBindings,
) -> String {
    let matches: Vec<String> = predicates
        .iter()
        .map(|predicate| direct_edge_sql(ctx, predicate, constraint))
        .collect();
    let matches_sql = if matches.is_empty() {
        format!(
            "SELECT subject_uuid AS start_node, object_uuid AS end_node FROM {} WHERE 1=0",
            ctx.tables.quad_table
        )
    } else {
        matches.join(" UNION ALL ")
    };
    let participating = format!(
        "SELECT subject_uuid AS node FROM {q} UNION SELECT object_uuid AS node FROM {q}",
        q = ctx.tables.quad_table
    );

    let bound = |state: EndpointState| match state {
        EndpointState::Bound(uuid) => Some(format!("CAST('{}' AS UUID)", uuid)),
        _ => None,
    };
    if matches!(endpoints.subject, EndpointState::Unresolvable)
        || matches!(endpoints.object, EndpointState::Unresolvable)
    {
        return format!(
            "SELECT subject_uuid AS start_node, object_uuid AS end_node FROM {} WHERE 1=0",
            ctx.tables.quad_table
        );
    }

    match (bound(endpoints.subject), bound(endpoints.object)) {
        (Some(subject), Some(object)) => format!(
            "SELECT {s} AS start_node, {o} AS end_node WHERE NOT EXISTS ( \
             SELECT 1 FROM ({m}) m WHERE m.start_node = {s} AND m.end_node = {o})",
            s = subject,
            o = object,
            m = matches_sql
        ),
        (Some(subject), None) => format!(
            "SELECT {s} AS start_node, n.node AS end_node FROM ({p}) n \
             WHERE NOT EXISTS (SELECT 1 FROM ({m}) m \
             WHERE m.start_node = {s} AND m.end_node = n.node)",
            s = subject,
            p = participating,
            m = matches_sql
        ),
        (None, Some(object)) => format!(
            "SELECT n.node AS start_node, {o} AS end_node FROM ({p}) n \
             WHERE NOT EXISTS (SELECT 1 FROM ({m}) m \
             WHERE m.start_node = n.node AND m.end_node = {o})",
            o = object,
            p = participating,
            m = matches_sql
        ),
        (None, None) => format!(
            "SELECT n1.node AS start_node, n2.node AS end_node \
             FROM ({p}) n1 CROSS JOIN ({p}) n2 \
             WHERE n1.node <> n2.node AND NOT EXISTS ( \
             SELECT 1 FROM ({m}) m WHERE m.start_node = n1.node AND m.end_node = n2.node)",
            p = participating,
            m = matches_sql
        ),
    }
}
