//! SPARQL 1.1 UPDATE → SQL statement sequences.
//!
//! Every operation resolves terms through subselects against the term table
//! so the statements stay self-contained and can run inside one transaction
//! in emission order. Consecutive INSERT DATA / DELETE DATA operations are
//! coalesced before translation.

use std::collections::HashSet;

use oxrdf::{NamedNode, Variable};
use spargebra::algebra::GraphTarget;
use spargebra::GraphUpdateOperation;
use spargebra::term::{
    GraphNamePattern, GroundQuad, GroundQuadPattern, GroundTermPattern, NamedNodePattern, Quad,
    QuadPattern, TermPattern,
};

use super::fragment::SqlFragment;
use super::pattern_builder::translate_pattern;
use super::SparqlContext;
use crate::catalog::{TableConfig, GLOBAL_GRAPH_IRI};
use crate::error::{SparqlError, SparqlResult};
use crate::terms::{
    ground_subject_key, ground_term_key, ground_term_pattern_key, graph_name_key, named_key,
    named_node_pattern_key, quad_keys, sql_quote, subject_key, term_key, term_pattern_key, TermKey,
};

/// `(SELECT term_uuid FROM … WHERE term_text = … AND term_type = …)`
fn term_subselect(tables: &TableConfig, key: &TermKey) -> String {
    format!(
        "(SELECT term_uuid FROM {} WHERE term_text = {} AND term_type = '{}')",
        tables.term_table,
        sql_quote(&key.text),
        key.kind.as_char()
    )
}

fn global_graph_key() -> TermKey {
    TermKey::uri(GLOBAL_GRAPH_IRI)
}

/// Upsert statement for a set of term keys, `ON CONFLICT DO NOTHING` so
/// re-inserting existing terms is a no-op.
fn term_upsert_sql(tables: &TableConfig, keys: &[TermKey]) -> Option<String> {
    if keys.is_empty() {
        return None;
    }
    let values: Vec<String> = keys
        .iter()
        .map(|key| format!("({}, '{}')", sql_quote(&key.text), key.kind.as_char()))
        .collect();
    Some(format!(
        "INSERT INTO {} (term_text, term_type) VALUES {} \
         ON CONFLICT (term_text, term_type) DO NOTHING",
        tables.term_table,
        values.join(", ")
    ))
}

fn dedup_keys(keys: impl IntoIterator<Item = TermKey>) -> Vec<TermKey> {
    let mut seen = HashSet::new();
    keys.into_iter()
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// INSERT DATA: one term upsert, then one batched quad insert resolving the
/// four positions through term subselects.
pub fn translate_insert_data(tables: &TableConfig, quads: &[Quad]) -> Vec<String> {
    if quads.is_empty() {
        return Vec::new();
    }
    log::debug!("translating INSERT DATA for {} quads", quads.len());

    let mut statements = Vec::new();
    let keys = dedup_keys(quads.iter().flat_map(quad_keys));
    statements.extend(term_upsert_sql(tables, &keys));

    let rows: Vec<String> = quads
        .iter()
        .map(|quad| {
            format!(
                "({}, {}, {}, {})",
                term_subselect(tables, &subject_key(&quad.subject)),
                term_subselect(tables, &named_key(&quad.predicate)),
                term_subselect(tables, &term_key(&quad.object)),
                term_subselect(tables, &graph_name_key(&quad.graph_name))
            )
        })
        .collect();
    statements.push(format!(
        "INSERT INTO {} (subject_uuid, predicate_uuid, object_uuid, context_uuid) VALUES {}",
        tables.quad_table,
        rows.join(", ")
    ));
    statements
}

/// DELETE DATA: one DELETE per quad, all four positions matched through term
/// subselects.
pub fn translate_delete_data(tables: &TableConfig, quads: &[GroundQuad]) -> Vec<String> {
    log::debug!("translating DELETE DATA for {} quads", quads.len());
    quads
        .iter()
        .map(|quad| {
            format!(
                "DELETE FROM {} WHERE subject_uuid = {} AND predicate_uuid = {} \
                 AND object_uuid = {} AND context_uuid = {}",
                tables.quad_table,
                term_subselect(tables, &ground_subject_key(&quad.subject)),
                term_subselect(tables, &named_key(&quad.predicate)),
                term_subselect(tables, &ground_term_key(&quad.object)),
                term_subselect(tables, &graph_name_key(&quad.graph_name))
            )
        })
        .collect()
}

/// A term slot of a template quad: either a binding column or a constant
/// subselect.
fn template_term_sql(
    tables: &TableConfig,
    key: Option<TermKey>,
    variable: Option<&Variable>,
    uuid_vars: &HashSet<Variable>,
) -> SparqlResult<String> {
    if let Some(var) = variable {
        if uuid_vars.contains(var) {
            return Ok(format!("bindings.{}", var.as_str().to_lowercase()));
        }
        // text-valued binding (e.g. BIND result): resolve through the term
        // table at execution time
        return Ok(format!(
            "(SELECT term_uuid FROM {} WHERE term_text = bindings.{} LIMIT 1)",
            tables.term_table,
            var.as_str().to_lowercase()
        ));
    }
    let key = key.ok_or_else(|| {
        SparqlError::InvalidTerm("template slot is neither variable nor constant".to_string())
    })?;
    Ok(term_subselect(tables, &key))
}

fn graph_slot_sql(
    tables: &TableConfig,
    graph: &GraphNamePattern,
    uuid_vars: &HashSet<Variable>,
) -> SparqlResult<String> {
    match graph {
        GraphNamePattern::NamedNode(node) => Ok(term_subselect(tables, &named_key(node))),
        GraphNamePattern::DefaultGraph => Ok(term_subselect(tables, &global_graph_key())),
        GraphNamePattern::Variable(var) => {
            template_term_sql(tables, None, Some(var), uuid_vars)
        }
    }
}

/// DELETE/INSERT WHERE: the WHERE pattern is materialized as a DISTINCT
/// bindings subquery; each template row substitutes variables with binding
/// columns and constants with term subselects.
pub fn translate_modify(
    ctx: &mut SparqlContext,
    delete_templates: &[GroundQuadPattern],
    insert_templates: &[QuadPattern],
    where_fragment: &SqlFragment,
) -> SparqlResult<Vec<String>> {
    let tables = ctx.tables.clone();
    let mut statements = Vec::new();

    if where_fragment.variable_mappings.is_empty() {
        log::warn!("MODIFY with an unbound WHERE pattern produces no statements");
        return Ok(statements);
    }

    // Prefer UUID-valued binding columns (quad-table sites); fall back to
    // the text mapping for computed values.
    let mut binding_items = Vec::new();
    let mut uuid_vars = HashSet::new();
    for (var, mapping) in where_fragment.variable_mappings.iter() {
        let column = var.as_str().to_lowercase();
        match ctx.first_site(var) {
            Some(site) => {
                binding_items.push(format!("{}.{} AS {}", site.alias, site.column, column));
                uuid_vars.insert(var.clone());
            }
            None => binding_items.push(format!("{} AS {}", mapping, column)),
        }
    }

    let mut bindings_query = format!("SELECT DISTINCT {}", binding_items.join(", "));
    if !where_fragment.from_clause.is_empty() {
        bindings_query.push(' ');
        bindings_query.push_str(&where_fragment.from_clause);
    }
    for join in &where_fragment.joins {
        bindings_query.push(' ');
        bindings_query.push_str(join);
    }
    if !where_fragment.where_conditions.is_empty() && !where_fragment.is_union_derived() {
        bindings_query.push_str(" WHERE ");
        bindings_query.push_str(&where_fragment.where_conditions.join(" AND "));
    }

    for template in delete_templates {
        let subject = template_term_sql(
            &tables,
            ground_term_pattern_key(&template.subject),
            ground_pattern_variable(&template.subject),
            &uuid_vars,
        )?;
        let predicate = template_term_sql(
            &tables,
            named_node_pattern_key(&template.predicate),
            named_pattern_variable(&template.predicate),
            &uuid_vars,
        )?;
        let object = template_term_sql(
            &tables,
            ground_term_pattern_key(&template.object),
            ground_pattern_variable(&template.object),
            &uuid_vars,
        )?;
        let graph = graph_slot_sql(&tables, &template.graph_name, &uuid_vars)?;
        statements.push(format!(
            "DELETE FROM {} WHERE (subject_uuid, predicate_uuid, object_uuid, context_uuid) IN ( \
             SELECT {}, {}, {}, {} FROM ({}) AS bindings)",
            tables.quad_table, subject, predicate, object, graph, bindings_query
        ));
    }

    if !insert_templates.is_empty() {
        // constant terms introduced by the INSERT templates must exist first
        let constant_keys = dedup_keys(insert_templates.iter().flat_map(|template| {
            let mut keys = Vec::new();
            keys.extend(term_pattern_key(&template.subject));
            keys.extend(named_node_pattern_key(&template.predicate));
            keys.extend(term_pattern_key(&template.object));
            match &template.graph_name {
                GraphNamePattern::NamedNode(node) => keys.push(named_key(node)),
                GraphNamePattern::DefaultGraph => keys.push(global_graph_key()),
                GraphNamePattern::Variable(_) => {}
            }
            keys
        }));
        statements.extend(term_upsert_sql(&tables, &constant_keys));

        let mut selects = Vec::new();
        for template in insert_templates {
            let subject = template_term_sql(
                &tables,
                term_pattern_key(&template.subject),
                term_pattern_variable(&template.subject),
                &uuid_vars,
            )?;
            let predicate = template_term_sql(
                &tables,
                named_node_pattern_key(&template.predicate),
                named_pattern_variable(&template.predicate),
                &uuid_vars,
            )?;
            let object = template_term_sql(
                &tables,
                term_pattern_key(&template.object),
                term_pattern_variable(&template.object),
                &uuid_vars,
            )?;
            let graph = graph_slot_sql(&tables, &template.graph_name, &uuid_vars)?;
            selects.push(format!(
                "SELECT {}, {}, {}, {} FROM ({}) AS bindings",
                subject, predicate, object, graph, bindings_query
            ));
        }
        statements.push(format!(
            "INSERT INTO {} (subject_uuid, predicate_uuid, object_uuid, context_uuid) {}",
            tables.quad_table,
            selects.join(" UNION ALL ")
        ));
    }

    Ok(statements)
}

fn term_pattern_variable(term: &TermPattern) -> Option<&Variable> {
    match term {
        TermPattern::Variable(var) => Some(var),
        _ => None,
    }
}

fn ground_pattern_variable(term: &GroundTermPattern) -> Option<&Variable> {
    match term {
        GroundTermPattern::Variable(var) => Some(var),
        _ => None,
    }
}

fn named_pattern_variable(term: &NamedNodePattern) -> Option<&Variable> {
    match term {
        NamedNodePattern::Variable(var) => Some(var),
        _ => None,
    }
}

/// LOAD emits the INSERT DATA shape over triples materialized by an external
/// fetch-and-parse collaborator. Without materialized triples there is
/// nothing to emit.
pub fn translate_load(
    tables: &TableConfig,
    source: &NamedNode,
    destination: Option<&NamedNode>,
    quads: &[Quad],
) -> Vec<String> {
    if quads.is_empty() {
        log::warn!(
            "LOAD <{}> has no materialized triples; fetching and parsing is the caller's concern",
            source.as_str()
        );
        return Vec::new();
    }
    let rewritten: Vec<Quad> = quads
        .iter()
        .map(|quad| {
            let mut quad = quad.clone();
            if let Some(graph) = destination {
                quad.graph_name = spargebra::term::GraphName::NamedNode(graph.clone());
            }
            quad
        })
        .collect();
    translate_insert_data(tables, &rewritten)
}

pub fn translate_clear(tables: &TableConfig, target: &GraphTarget) -> Vec<String> {
    match target {
        GraphTarget::AllGraphs => vec![format!("DELETE FROM {}", tables.quad_table)],
        GraphTarget::DefaultGraph => vec![format!(
            "DELETE FROM {} WHERE context_uuid = {}",
            tables.quad_table,
            term_subselect(tables, &global_graph_key())
        )],
        GraphTarget::NamedNode(graph) => vec![format!(
            "DELETE FROM {} WHERE context_uuid = {}",
            tables.quad_table,
            term_subselect(tables, &named_key(graph))
        )],
        GraphTarget::NamedGraphs => vec![format!(
            "DELETE FROM {} WHERE context_uuid <> {}",
            tables.quad_table,
            term_subselect(tables, &global_graph_key())
        )],
    }
}

/// CREATE: the graph exists once its IRI is in the term table.
pub fn translate_create(tables: &TableConfig, graph: &NamedNode) -> Vec<String> {
    term_upsert_sql(tables, &[named_key(graph)])
        .into_iter()
        .collect()
}

/// DROP: delete the graph's quads, then the graph term itself when nothing
/// references it anymore.
pub fn translate_drop(tables: &TableConfig, target: &GraphTarget) -> Vec<String> {
    let GraphTarget::NamedNode(graph) = target else {
        // dropping the default graph or all graphs degenerates to CLEAR
        return translate_clear(tables, target);
    };
    let graph_key = named_key(graph);
    vec![
        format!(
            "DELETE FROM {} WHERE context_uuid = {}",
            tables.quad_table,
            term_subselect(tables, &graph_key)
        ),
        format!(
            "DELETE FROM {} WHERE term_text = {} AND term_type = 'U' AND NOT EXISTS ( \
             SELECT 1 FROM {} WHERE context_uuid = {})",
            tables.term_table,
            sql_quote(&graph_key.text),
            tables.quad_table,
            term_subselect(tables, &graph_key)
        ),
    ]
}

fn insert_select_sql(
    tables: &TableConfig,
    source: &NamedNode,
    target: &NamedNode,
    on_conflict: bool,
) -> String {
    let conflict_clause = if on_conflict {
        " ON CONFLICT DO NOTHING"
    } else {
        ""
    };
    format!(
        "INSERT INTO {q} (subject_uuid, predicate_uuid, object_uuid, context_uuid) \
         SELECT subject_uuid, predicate_uuid, object_uuid, {target} FROM {q} \
         WHERE context_uuid = {source}{conflict}",
        q = tables.quad_table,
        target = term_subselect(tables, &named_key(target)),
        source = term_subselect(tables, &named_key(source)),
        conflict = conflict_clause
    )
}

/// COPY: clear the target, then re-insert the source quads under the target
/// context.
pub fn translate_copy(tables: &TableConfig, source: &NamedNode, target: &NamedNode) -> Vec<String> {
    let mut statements: Vec<String> = translate_create(tables, target);
    statements.extend(translate_clear(tables, &GraphTarget::NamedNode(target.clone())));
    statements.push(insert_select_sql(tables, source, target, false));
    statements
}

/// MOVE: rewrite the context column in place, then forget the source graph.
pub fn translate_move(tables: &TableConfig, source: &NamedNode, target: &NamedNode) -> Vec<String> {
    let mut statements: Vec<String> = translate_create(tables, target);
    statements.extend(translate_clear(tables, &GraphTarget::NamedNode(target.clone())));
    statements.push(format!(
        "UPDATE {} SET context_uuid = {} WHERE context_uuid = {}",
        tables.quad_table,
        term_subselect(tables, &named_key(target)),
        term_subselect(tables, &named_key(source))
    ));
    statements
}

/// ADD: like COPY but additive; duplicate quads are ignored.
pub fn translate_add(tables: &TableConfig, source: &NamedNode, target: &NamedNode) -> Vec<String> {
    let mut statements: Vec<String> = translate_create(tables, target);
    statements.push(insert_select_sql(tables, source, target, true));
    statements
}

/// Translate a full parsed update request, coalescing consecutive data
/// operations. Statements must be executed in order, inside one transaction.
pub fn translate_operations(
    ctx: &mut SparqlContext,
    operations: &[GraphUpdateOperation],
) -> SparqlResult<Vec<String>> {
    let tables = ctx.tables.clone();
    let mut statements = Vec::new();
    let mut index = 0;

    while index < operations.len() {
        match &operations[index] {
            GraphUpdateOperation::InsertData { .. } => {
                let mut batch: Vec<Quad> = Vec::new();
                while let Some(GraphUpdateOperation::InsertData { data }) = operations.get(index) {
                    batch.extend(data.iter().cloned());
                    index += 1;
                }
                statements.extend(translate_insert_data(&tables, &batch));
                continue;
            }
            GraphUpdateOperation::DeleteData { .. } => {
                let mut batch: Vec<GroundQuad> = Vec::new();
                while let Some(GraphUpdateOperation::DeleteData { data }) = operations.get(index) {
                    batch.extend(data.iter().cloned());
                    index += 1;
                }
                statements.extend(translate_delete_data(&tables, &batch));
                continue;
            }
            GraphUpdateOperation::DeleteInsert {
                delete,
                insert,
                using,
                pattern,
            } => {
                if using.is_some() {
                    log::warn!("USING clause on DELETE/INSERT is ignored");
                }
                // sites from earlier operations refer to aliases outside
                // this bindings query
                ctx.var_sites.clear();
                let where_fragment = translate_pattern(ctx, pattern, None, None)?;
                statements.extend(translate_modify(ctx, delete, insert, &where_fragment)?);
            }
            GraphUpdateOperation::Load {
                silent,
                source,
                destination,
            } => {
                let destination = match destination {
                    spargebra::term::GraphName::NamedNode(node) => Some(node),
                    spargebra::term::GraphName::DefaultGraph => None,
                };
                let emitted = translate_load(&tables, source, destination, &[]);
                if emitted.is_empty() && !silent {
                    log::warn!("LOAD produced no statements (no materialized triples)");
                }
                statements.extend(emitted);
            }
            GraphUpdateOperation::Clear { graph, .. } => {
                statements.extend(translate_clear(&tables, graph));
            }
            GraphUpdateOperation::Create { graph, .. } => {
                statements.extend(translate_create(&tables, graph));
            }
            GraphUpdateOperation::Drop { graph, .. } => {
                statements.extend(translate_drop(&tables, graph));
            }
        }
        index += 1;
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::Term;
    use spargebra::term::GraphName;

    fn tables() -> TableConfig {
        TableConfig::for_space("pgsparql1", "space_test")
    }

    fn quad(subject: &str, predicate: &str, object: &str) -> Quad {
        Quad {
            subject: NamedNode::new(subject).unwrap().into(),
            predicate: NamedNode::new(predicate).unwrap(),
            object: Term::NamedNode(NamedNode::new(object).unwrap()),
            graph_name: GraphName::DefaultGraph,
        }
    }

    #[test]
    fn insert_data_upserts_terms_then_quads() {
        let statements = translate_insert_data(
            &tables(),
            &[quad(
                "http://example.org/alice",
                "http://example.org/knows",
                "http://example.org/bob",
            )],
        );
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("ON CONFLICT (term_text, term_type) DO NOTHING"));
        assert!(statements[0].contains("('http://example.org/alice', 'U')"));
        // the default graph term is created too
        assert!(statements[0].contains(&format!("('{}', 'U')", GLOBAL_GRAPH_IRI)));
        assert!(statements[1].starts_with(
            "INSERT INTO pgsparql1__space_test__rdf_quad (subject_uuid, predicate_uuid, object_uuid, context_uuid)"
        ));
        assert!(statements[1].contains("term_text = 'http://example.org/bob'"));
    }

    #[test]
    fn clear_named_graph_scopes_by_context() {
        let graph = NamedNode::new("http://example.org/g").unwrap();
        let statements = translate_clear(&tables(), &GraphTarget::NamedNode(graph));
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("WHERE context_uuid = (SELECT term_uuid"));
        assert!(statements[0].contains("'http://example.org/g'"));
    }

    #[test]
    fn clear_all_is_unscoped() {
        let statements = translate_clear(&tables(), &GraphTarget::AllGraphs);
        assert_eq!(
            statements,
            vec!["DELETE FROM pgsparql1__space_test__rdf_quad".to_string()]
        );
    }

    #[test]
    fn drop_removes_quads_then_orphan_term() {
        let graph = NamedNode::new("http://example.org/g").unwrap();
        let statements = translate_drop(&tables(), &GraphTarget::NamedNode(graph));
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("DELETE FROM pgsparql1__space_test__rdf_quad"));
        assert!(statements[1].contains("DELETE FROM pgsparql1__space_test__term"));
        assert!(statements[1].contains("NOT EXISTS"));
    }

    #[test]
    fn copy_clears_target_first_and_add_does_not() {
        let source = NamedNode::new("urn:src").unwrap();
        let target = NamedNode::new("urn:tgt").unwrap();

        let copy = translate_copy(&tables(), &source, &target);
        assert!(copy.iter().any(|s| s.starts_with("DELETE FROM")));
        assert!(copy.last().unwrap().contains("SELECT subject_uuid, predicate_uuid, object_uuid"));
        assert!(!copy.last().unwrap().contains("ON CONFLICT DO NOTHING"));

        let add = translate_add(&tables(), &source, &target);
        assert!(add.iter().all(|s| !s.starts_with("DELETE FROM")));
        assert!(add.last().unwrap().contains("ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn move_rewrites_context_in_place() {
        let source = NamedNode::new("urn:src").unwrap();
        let target = NamedNode::new("urn:tgt").unwrap();
        let statements = translate_move(&tables(), &source, &target);
        let update = statements.last().unwrap();
        assert!(update.starts_with("UPDATE pgsparql1__space_test__rdf_quad SET context_uuid ="));
        assert!(update.contains("'urn:src'"));
        assert!(update.contains("'urn:tgt'"));
    }

    #[test]
    fn consecutive_insert_data_operations_coalesce() {
        let update = spargebra::Update::parse(
            "INSERT DATA { <urn:a> <urn:p> <urn:b> } ; INSERT DATA { <urn:c> <urn:p> <urn:d> }",
            None,
        )
        .unwrap();
        let mut ctx = SparqlContext::new(
            tables(),
            crate::catalog::DatatypeTable::unavailable(),
            std::collections::HashMap::new(),
            10,
        );
        let statements = translate_operations(&mut ctx, &update.operations).unwrap();
        // one term upsert + one quad insert for both operations
        assert_eq!(statements.len(), 2);
        assert!(statements[1].contains("'urn:a'"));
        assert!(statements[1].contains("'urn:c'"));
    }

    #[test]
    fn delete_data_matches_all_four_positions() {
        let update = spargebra::Update::parse(
            "DELETE DATA { GRAPH <urn:g> { <urn:a> <urn:p> 'v' } }",
            None,
        )
        .unwrap();
        let mut ctx = SparqlContext::new(
            tables(),
            crate::catalog::DatatypeTable::unavailable(),
            std::collections::HashMap::new(),
            10,
        );
        let statements = translate_operations(&mut ctx, &update.operations).unwrap();
        assert_eq!(statements.len(), 1);
        let delete = &statements[0];
        assert!(delete.contains("subject_uuid = (SELECT term_uuid"));
        assert!(delete.contains("term_text = 'v' AND term_type = 'L'"));
        assert!(delete.contains("term_text = 'urn:g'"));
    }

    #[test]
    fn modify_builds_bindings_subquery() {
        let update = spargebra::Update::parse(
            "DELETE { ?s <urn:old> ?o } INSERT { ?s <urn:new> ?o } WHERE { ?s <urn:old> ?o }",
            None,
        )
        .unwrap();
        let mut resolved = std::collections::HashMap::new();
        resolved.insert(TermKey::uri("urn:old"), uuid::Uuid::new_v4());
        let mut ctx = SparqlContext::new(
            tables(),
            crate::catalog::DatatypeTable::unavailable(),
            resolved,
            10,
        );
        let statements = translate_operations(&mut ctx, &update.operations).unwrap();
        // delete + term upsert for <urn:new> + insert
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("DELETE FROM pgsparql1__space_test__rdf_quad"));
        assert!(statements[0].contains("SELECT DISTINCT"));
        assert!(statements[0].contains("FROM (SELECT DISTINCT"));
        assert!(statements[1].contains("('urn:new', 'U')"));
        assert!(statements[2].starts_with("INSERT INTO pgsparql1__space_test__rdf_quad"));
        // variables ride through the bindings table as UUID columns
        assert!(statements[2].contains("bindings.s"));
        assert!(statements[2].contains("bindings.o"));
    }
}
