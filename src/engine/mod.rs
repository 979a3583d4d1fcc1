//! Request orchestration: parse, resolve, translate, execute, shape.
//!
//! One [`SparqlEngine`] serves many spaces; everything request-scoped lives
//! in a per-request [`SparqlContext`]. Translation itself is synchronous —
//! the two suspension points are the up-front term-resolution batch and
//! statement execution.

pub mod executor;
pub mod results;

use std::collections::HashSet;
use std::sync::Arc;

use oxrdf::{NamedNode, Variable};
use spargebra::algebra::{GraphPattern, OrderExpression};
use spargebra::{Query, Update};

pub use executor::{PgExecutor, SqlExecutor, SqlRow};
pub use results::{Binding, BindingRow, QueryOutcome, TripleResult};

use crate::catalog::{DatatypeTable, TableConfig};
use crate::config::EngineConfig;
use crate::error::{SparqlError, SparqlResult};
use crate::sql_generator::expression_builder::translate_order_by;
use crate::sql_generator::optimizer::analyze_query;
use crate::sql_generator::pattern_builder::{
    expression_variables, peel_modifiers, translate_pattern,
};
use crate::sql_generator::select_builder::{
    build_ask_query, build_construct_query, build_describe_query, build_select_query,
};
use crate::sql_generator::update_builder::translate_operations;
use crate::sql_generator::{collect_pattern_terms, SparqlContext};
use crate::terms::cache::TermCache;
use crate::terms::resolver::resolve_terms;
use crate::terms::TermKey;

pub struct SparqlEngine<E> {
    executor: E,
    cache: Arc<TermCache>,
    config: EngineConfig,
}

impl<E: SqlExecutor> SparqlEngine<E> {
    pub fn new(executor: E, config: EngineConfig) -> Self {
        let cache = Arc::new(TermCache::new(config.term_cache_entries));
        Self::with_cache(executor, cache, config)
    }

    /// Share a term cache across engines (one cache per database is the
    /// intended shape).
    pub fn with_cache(executor: E, cache: Arc<TermCache>, config: EngineConfig) -> Self {
        Self {
            executor,
            cache,
            config,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn term_cache(&self) -> &Arc<TermCache> {
        &self.cache
    }

    /// Parse and evaluate a SPARQL query against a space.
    pub async fn query(&self, space_id: &str, sparql: &str) -> SparqlResult<QueryOutcome> {
        let query =
            Query::parse(sparql, None).map_err(|e| SparqlError::Parse(e.to_string()))?;
        self.query_algebra(space_id, &query).await
    }

    /// Evaluate an already-parsed query.
    pub async fn query_algebra(&self, space_id: &str, query: &Query) -> SparqlResult<QueryOutcome> {
        match query {
            Query::Select { pattern, .. } => self.run_select(space_id, pattern).await,
            Query::Ask { pattern, .. } => self.run_ask(space_id, pattern).await,
            Query::Construct {
                template, pattern, ..
            } => self.run_construct(space_id, template, pattern).await,
            Query::Describe { pattern, .. } => self.run_describe(space_id, pattern).await,
        }
    }

    /// Parse and apply a SPARQL update. The statement sequence runs in order
    /// inside one transaction.
    pub async fn update(&self, space_id: &str, sparql: &str) -> SparqlResult<()> {
        let update =
            Update::parse(sparql, None).map_err(|e| SparqlError::Parse(e.to_string()))?;
        self.update_algebra(space_id, &update).await
    }

    pub async fn update_algebra(&self, space_id: &str, update: &Update) -> SparqlResult<()> {
        let mut keys = HashSet::new();
        for operation in &update.operations {
            if let spargebra::GraphUpdateOperation::DeleteInsert { pattern, .. } =
                operation
            {
                collect_pattern_terms(pattern, &mut keys);
            }
        }
        let mut ctx = self.prepare_context(space_id, keys).await?;
        let statements = translate_operations(&mut ctx, &update.operations)?;
        if statements.is_empty() {
            log::debug!("update produced no statements");
            return Ok(());
        }
        log::debug!("executing {} update statements", statements.len());
        self.executor.execute_transactional(&statements).await
    }

    /// Describe explicitly named resources, without a WHERE pattern.
    pub async fn describe_iris(
        &self,
        space_id: &str,
        resources: &[NamedNode],
    ) -> SparqlResult<Vec<TripleResult>> {
        let tables = TableConfig::for_space(&self.config.table_prefix, space_id);
        let sql = build_describe_query(&tables, resources);
        let rows = self.executor.query(&sql).await?;
        Ok(results::shape_describe(&rows))
    }

    async fn run_select(
        &self,
        space_id: &str,
        pattern: &GraphPattern,
    ) -> SparqlResult<QueryOutcome> {
        let (inner, modifiers) = peel_modifiers(pattern);
        let mut ctx = self.prepare_pattern_context(space_id, pattern).await?;

        let mut projected = modifiers.projection.clone();
        let mut order_vars = HashSet::new();
        for order in &modifiers.order {
            let (OrderExpression::Asc(expr) | OrderExpression::Desc(expr)) = order;
            expression_variables(expr, &mut order_vars);
        }
        for var in order_vars {
            if !projected.contains(&var) {
                projected.push(var);
            }
        }
        let projected_ref: Option<&[Variable]> = if modifiers.projection.is_empty() {
            None
        } else {
            Some(&projected)
        };

        let mut fragment = translate_pattern(&mut ctx, inner, projected_ref, None)?;
        fragment.order_by =
            translate_order_by(&mut ctx, &modifiers.order, &fragment.variable_mappings)?;

        let projection: Vec<Variable> = if modifiers.projection.is_empty() {
            fragment.variable_mappings.variables().cloned().collect()
        } else {
            modifiers.projection.clone()
        };
        let built = build_select_query(
            &fragment,
            &projection,
            modifiers.distinct,
            modifiers.limit,
            modifiers.offset,
        );
        log::debug!("SELECT SQL:\n{}", built.sql);

        let rows = self.executor.query(&built.sql).await?;
        Ok(QueryOutcome::Bindings(results::shape_select(
            &rows,
            &built.columns,
        )))
    }

    async fn run_ask(&self, space_id: &str, pattern: &GraphPattern) -> SparqlResult<QueryOutcome> {
        let (inner, _) = peel_modifiers(pattern);
        let mut ctx = self.prepare_pattern_context(space_id, pattern).await?;
        let fragment = translate_pattern(&mut ctx, inner, Some(&[]), None)?;
        let sql = build_ask_query(&fragment);
        log::debug!("ASK SQL:\n{}", sql);
        let rows = self.executor.query(&sql).await?;
        Ok(QueryOutcome::Boolean(results::shape_ask(&rows)))
    }

    async fn run_construct(
        &self,
        space_id: &str,
        template: &[spargebra::term::TriplePattern],
        pattern: &GraphPattern,
    ) -> SparqlResult<QueryOutcome> {
        let (inner, modifiers) = peel_modifiers(pattern);
        if modifiers.limit.is_some() || modifiers.offset.is_some() {
            log::warn!("CONSTRUCT solution modifiers beyond the pattern are not applied");
        }
        let mut ctx = self.prepare_pattern_context(space_id, pattern).await?;

        let mut template_vars = HashSet::new();
        for triple in template {
            if let spargebra::term::TermPattern::Variable(var) = &triple.subject {
                template_vars.insert(var.clone());
            }
            if let spargebra::term::NamedNodePattern::Variable(var) = &triple.predicate {
                template_vars.insert(var.clone());
            }
            if let spargebra::term::TermPattern::Variable(var) = &triple.object {
                template_vars.insert(var.clone());
            }
        }
        let projected: Vec<Variable> = template_vars.into_iter().collect();

        let fragment = translate_pattern(&mut ctx, inner, Some(&projected), None)?;
        let built = build_construct_query(&fragment, template);
        log::debug!("CONSTRUCT SQL:\n{}", built.sql);

        let rows = self.executor.query(&built.sql).await?;
        Ok(QueryOutcome::Triples(results::shape_construct(
            &rows,
            &built.columns,
            template,
        )))
    }

    /// DESCRIBE with a WHERE pattern: evaluate the pattern, take every
    /// IRI-shaped value it binds as a described subject, then fetch all of
    /// their triples.
    async fn run_describe(
        &self,
        space_id: &str,
        pattern: &GraphPattern,
    ) -> SparqlResult<QueryOutcome> {
        let (inner, modifiers) = peel_modifiers(pattern);
        let mut ctx = self.prepare_pattern_context(space_id, pattern).await?;
        let tables = ctx.tables.clone();

        let projected_ref: Option<&[Variable]> = if modifiers.projection.is_empty() {
            None
        } else {
            Some(&modifiers.projection)
        };
        let fragment = translate_pattern(&mut ctx, inner, projected_ref, None)?;
        let projection: Vec<Variable> = fragment.variable_mappings.variables().cloned().collect();
        let built = build_select_query(&fragment, &projection, true, None, None);
        let rows = self.executor.query(&built.sql).await?;

        let mut subjects = Vec::new();
        for row in &rows {
            for column in &built.columns {
                if let Some(value) = row.get_named(&column.alias) {
                    if let Ok(node) = NamedNode::new(value) {
                        if !subjects.contains(&node) {
                            subjects.push(node);
                        }
                    }
                }
            }
        }

        let sql = build_describe_query(&tables, &subjects);
        log::debug!("DESCRIBE SQL:\n{}", sql);
        let rows = self.executor.query(&sql).await?;
        Ok(QueryOutcome::Triples(results::shape_describe(&rows)))
    }

    async fn prepare_pattern_context(
        &self,
        space_id: &str,
        pattern: &GraphPattern,
    ) -> SparqlResult<SparqlContext> {
        let mut keys = HashSet::new();
        collect_pattern_terms(pattern, &mut keys);
        let mut ctx = self.prepare_context(space_id, keys).await?;
        if self.config.global_optimizer {
            let plan = analyze_query(
                pattern,
                &mut ctx.aliases,
                self.config.alias_packing_threshold,
            );
            ctx.alias_plan = Some(plan);
        }
        Ok(ctx)
    }

    /// The single term-resolution suspension point: every constant term the
    /// translation will need, resolved in one batch.
    async fn prepare_context(
        &self,
        space_id: &str,
        keys: HashSet<TermKey>,
    ) -> SparqlResult<SparqlContext> {
        let tables = TableConfig::for_space(&self.config.table_prefix, space_id);
        let key_list: Vec<TermKey> = keys.into_iter().collect();
        let resolved = resolve_terms(&self.executor, &self.cache, &tables, &key_list).await?;
        log::debug!(
            "resolved {}/{} constant terms for space '{}'",
            resolved.len(),
            key_list.len(),
            space_id
        );
        let datatypes = if self.config.datatype_table_enabled {
            DatatypeTable::new(tables.datatype_table.clone())
        } else {
            DatatypeTable::unavailable()
        };
        Ok(SparqlContext::new(
            tables,
            datatypes,
            resolved,
            self.config.max_path_depth,
        ))
    }
}
