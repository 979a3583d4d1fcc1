//! End-to-end translation scenarios over the canonical three-triple fixture:
//! (ex:alice ex:knows ex:bob), (ex:bob ex:knows ex:carol),
//! (ex:alice ex:name "Alice"), all in the default graph.

mod common;

use common::{assert_identifiers_declared, literal, row, uri, FixtureExecutor};
use pgsparql::engine::QueryOutcome;
use pgsparql::{EngineConfig, SparqlEngine};
use uuid::Uuid;

const ALICE: &str = "ex:alice";
const BOB: &str = "ex:bob";
const CAROL: &str = "ex:carol";
const KNOWS: &str = "ex:knows";
const NAME: &str = "ex:name";
const GRAPH_G: &str = "ex:g";

struct Fixture {
    engine: SparqlEngine<FixtureExecutor>,
    knows_uuid: Uuid,
    graph_uuid: Uuid,
}

fn fixture() -> Fixture {
    let knows_uuid = Uuid::new_v4();
    let graph_uuid = Uuid::new_v4();
    let terms = vec![
        (uri(ALICE), Uuid::new_v4()),
        (uri(BOB), Uuid::new_v4()),
        (uri(CAROL), Uuid::new_v4()),
        (uri(KNOWS), knows_uuid),
        (uri(NAME), Uuid::new_v4()),
        (uri(GRAPH_G), graph_uuid),
        (literal("Alice"), Uuid::new_v4()),
    ];
    Fixture {
        engine: SparqlEngine::new(FixtureExecutor::new(terms), EngineConfig::default()),
        knows_uuid,
        graph_uuid,
    }
}

fn first_query(engine: &SparqlEngine<FixtureExecutor>) -> String {
    engine.executor().recorded_queries()[0].clone()
}

#[tokio::test]
async fn select_returns_bindings_for_each_matching_row() {
    let f = fixture();
    f.engine
        .executor()
        .push_rows(vec![row(&[("x", Some(ALICE))]), row(&[("x", Some(BOB))])]);

    let outcome = f
        .engine
        .query("space_test", &format!("SELECT ?x WHERE {{ ?x <{}> ?y }}", KNOWS))
        .await
        .unwrap();

    let QueryOutcome::Bindings(rows) = outcome else {
        panic!("expected bindings");
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("x"), Some(ALICE));
    assert_eq!(rows[1].get("x"), Some(BOB));

    let sql = first_query(&f.engine);
    assert!(sql.contains("FROM pgsparql__space_test__rdf_quad q0"));
    assert!(sql.contains(&format!("q0.predicate_uuid = '{}'", f.knows_uuid)));
    assert!(sql.contains("JOIN pgsparql__space_test__term"));
}

#[tokio::test]
async fn bound_subject_and_predicate_become_uuid_conditions() {
    let f = fixture();
    f.engine.executor().push_rows(vec![row(&[("n", Some("Alice"))])]);

    let outcome = f
        .engine
        .query(
            "space_test",
            &format!("SELECT ?n WHERE {{ <{}> <{}> ?n }}", ALICE, NAME),
        )
        .await
        .unwrap();

    let QueryOutcome::Bindings(rows) = outcome else {
        panic!("expected bindings");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("n"), Some("Alice"));

    let sql = first_query(&f.engine);
    assert!(sql.contains("q0.subject_uuid = '"));
    assert!(sql.contains("q0.predicate_uuid = '"));
}

#[tokio::test]
async fn ask_is_true_iff_any_row_returns() {
    let f = fixture();
    f.engine
        .executor()
        .push_rows(vec![row(&[("ask_result", Some("1"))])]);
    let outcome = f
        .engine
        .query(
            "space_test",
            &format!("ASK {{ <{}> <{}> <{}> }}", ALICE, KNOWS, BOB),
        )
        .await
        .unwrap();
    assert_eq!(outcome, QueryOutcome::Boolean(true));
    let sql = first_query(&f.engine);
    assert!(sql.starts_with("SELECT 1 AS ask_result"));
    assert!(sql.ends_with("LIMIT 1"));

    let f = fixture();
    f.engine.executor().push_rows(vec![]);
    let outcome = f
        .engine
        .query(
            "space_test",
            &format!("ASK {{ <{}> <{}> <{}> }}", ALICE, KNOWS, ALICE),
        )
        .await
        .unwrap();
    assert_eq!(outcome, QueryOutcome::Boolean(false));
}

#[tokio::test]
async fn transitive_path_compiles_to_bounded_recursive_cte() {
    let f = fixture();
    f.engine
        .executor()
        .push_rows(vec![row(&[("z", Some(BOB))]), row(&[("z", Some(CAROL))])]);

    let outcome = f
        .engine
        .query(
            "space_test",
            &format!("SELECT ?z WHERE {{ <{}> <{}>+ ?z }}", ALICE, KNOWS),
        )
        .await
        .unwrap();

    let QueryOutcome::Bindings(rows) = outcome else {
        panic!("expected bindings");
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("z"), Some(BOB));
    assert_eq!(rows[1].get("z"), Some(CAROL));

    let sql = first_query(&f.engine);
    assert!(sql.contains("WITH RECURSIVE"));
    assert!(sql.contains("r.depth < 10"), "hard recursion bound");
    assert!(sql.contains("= ANY(r.path)"), "cycle detection");
}

#[tokio::test]
async fn optional_preserves_required_rows_with_null_padding() {
    let f = fixture();
    f.engine
        .executor()
        .push_rows(vec![row(&[("x", Some(ALICE)), ("n", Some("Alice"))])]);

    let outcome = f
        .engine
        .query(
            "space_test",
            &format!(
                "SELECT ?x ?n WHERE {{ ?x <{}> <{}> OPTIONAL {{ ?x <{}> ?n }} }}",
                KNOWS, BOB, NAME
            ),
        )
        .await
        .unwrap();
    let QueryOutcome::Bindings(rows) = outcome else {
        panic!("expected bindings");
    };
    assert_eq!(rows[0].get("x"), Some(ALICE));
    assert_eq!(rows[0].get("n"), Some("Alice"));

    let sql = first_query(&f.engine);
    assert!(sql.contains("LEFT JOIN"));

    // the unmatched case keeps the required row, optional column NULL
    let f = fixture();
    f.engine
        .executor()
        .push_rows(vec![row(&[("x", Some(BOB)), ("n", None)])]);
    let outcome = f
        .engine
        .query(
            "space_test",
            &format!(
                "SELECT ?x ?n WHERE {{ ?x <{}> <{}> OPTIONAL {{ ?x <{}> ?n }} }}",
                KNOWS, CAROL, NAME
            ),
        )
        .await
        .unwrap();
    let QueryOutcome::Bindings(rows) = outcome else {
        panic!("expected bindings");
    };
    assert_eq!(rows[0].get("x"), Some(BOB));
    assert!(!rows[0].is_bound("n"));
}

#[tokio::test]
async fn minus_excludes_via_correlated_not_exists() {
    let f = fixture();
    f.engine.executor().push_rows(vec![row(&[("x", Some(BOB))])]);

    let outcome = f
        .engine
        .query(
            "space_test",
            &format!(
                "SELECT ?x WHERE {{ ?x <{}> ?y MINUS {{ ?x <{}> 'Alice' }} }}",
                KNOWS, NAME
            ),
        )
        .await
        .unwrap();
    let QueryOutcome::Bindings(rows) = outcome else {
        panic!("expected bindings");
    };
    assert_eq!(rows[0].get("x"), Some(BOB));

    let sql = first_query(&f.engine);
    assert!(sql.contains("NOT EXISTS ("));
    // correlation on the shared variable ?x
    assert!(sql.contains("= subject_term_0.term_text"));
}

#[tokio::test]
async fn graph_constraint_is_pushed_down_to_quad_alias() {
    let f = fixture();
    f.engine.executor().push_rows(vec![]);

    f.engine
        .query(
            "space_test",
            &format!(
                "SELECT ?x WHERE {{ GRAPH <{}> {{ ?x <{}> ?y }} }}",
                GRAPH_G, KNOWS
            ),
        )
        .await
        .unwrap();

    let sql = first_query(&f.engine);
    assert!(
        sql.contains(&format!("q0.context_uuid = '{}'", f.graph_uuid)),
        "constraint must land on the quad alias: {}",
        sql
    );
}

#[tokio::test]
async fn union_branches_project_aligned_columns() {
    let f = fixture();
    f.engine.executor().push_rows(vec![]);

    f.engine
        .query(
            "space_test",
            &format!(
                "SELECT ?x ?y WHERE {{ {{ ?x <{}> ?y }} UNION {{ ?y <{}> ?x }} }}",
                KNOWS, NAME
            ),
        )
        .await
        .unwrap();

    let sql = first_query(&f.engine);
    let union_at = sql.find("UNION").expect("union in SQL");
    let (left, right) = sql.split_at(union_at);
    for branch in [left, right] {
        assert!(branch.contains("AS var_0"));
        assert!(branch.contains("AS var_1"));
    }
}

#[tokio::test]
async fn aggregate_filters_live_in_having_not_where() {
    let f = fixture();
    f.engine.executor().push_rows(vec![]);

    f.engine
        .query(
            "space_test",
            &format!(
                "SELECT ?x (COUNT(?y) AS ?c) WHERE {{ ?x <{}> ?y }} GROUP BY ?x HAVING (COUNT(?y) > 1)",
                KNOWS
            ),
        )
        .await
        .unwrap();

    let sql = first_query(&f.engine);
    let having_at = sql.find("HAVING").expect("HAVING clause");
    assert!(sql[having_at..].contains("COUNT("));
    if let Some(where_at) = sql.find("\nWHERE ") {
        let group_at = sql.find("GROUP BY").expect("GROUP BY clause");
        assert!(
            !sql[where_at..group_at].contains("COUNT("),
            "aggregate condition leaked into WHERE: {}",
            sql
        );
    }
}

#[tokio::test]
async fn unknown_terms_poison_instead_of_matching_everything() {
    let f = fixture();
    f.engine.executor().push_rows(vec![]);

    f.engine
        .query("space_test", "SELECT ?x WHERE { ?x <ex:ghost> ?y }")
        .await
        .unwrap();

    let sql = first_query(&f.engine);
    assert!(sql.contains("1=0"));
}

#[tokio::test]
async fn projection_order_survives_case_folding() {
    let f = fixture();
    f.engine
        .executor()
        .push_rows(vec![row(&[("personname", Some("Alice")), ("x", Some(ALICE))])]);

    let outcome = f
        .engine
        .query(
            "space_test",
            &format!("SELECT ?personName ?x WHERE {{ ?x <{}> ?personName }}", NAME),
        )
        .await
        .unwrap();

    let QueryOutcome::Bindings(rows) = outcome else {
        panic!("expected bindings");
    };
    assert_eq!(rows[0].bindings[0].variable, "personName");
    assert_eq!(rows[0].bindings[1].variable, "x");
    assert_eq!(rows[0].get("personName"), Some("Alice"));

    let sql = first_query(&f.engine);
    assert!(sql.contains("AS \"personname\""));
}

#[tokio::test]
async fn translation_is_idempotent_modulo_nothing() {
    let query = format!(
        "SELECT ?x ?n WHERE {{ ?x <{}> ?y OPTIONAL {{ ?x <{}> ?n }} }}",
        KNOWS, NAME
    );
    // two engines over term fixtures with identical UUIDs
    let knows_uuid = Uuid::new_v4();
    let name_uuid = Uuid::new_v4();
    let terms = || {
        vec![
            (uri(KNOWS), knows_uuid),
            (uri(NAME), name_uuid),
        ]
    };
    let first = SparqlEngine::new(FixtureExecutor::new(terms()), EngineConfig::default());
    let second = SparqlEngine::new(FixtureExecutor::new(terms()), EngineConfig::default());
    first.executor().push_rows(vec![]);
    second.executor().push_rows(vec![]);

    first.query("space_test", &query).await.unwrap();
    second.query("space_test", &query).await.unwrap();

    assert_eq!(
        first.executor().recorded_queries(),
        second.executor().recorded_queries()
    );
}

#[tokio::test]
async fn construct_instantiates_and_deduplicates_template() {
    let f = fixture();
    f.engine.executor().push_rows(vec![
        row(&[("n", Some("Alice")), ("s", Some(ALICE))]),
        row(&[("n", Some("Alice")), ("s", Some(ALICE))]),
    ]);

    let outcome = f
        .engine
        .query(
            "space_test",
            &format!(
                "CONSTRUCT {{ ?s <urn:label> ?n }} WHERE {{ ?s <{}> ?n }}",
                NAME
            ),
        )
        .await
        .unwrap();

    let QueryOutcome::Triples(triples) = outcome else {
        panic!("expected triples");
    };
    assert_eq!(triples.len(), 1);
    assert_eq!(triples[0].subject, ALICE);
    assert_eq!(triples[0].predicate, "urn:label");
    assert_eq!(triples[0].object, "Alice");
}

#[tokio::test]
async fn describe_fetches_all_triples_of_bound_subjects() {
    let f = fixture();
    // pattern evaluation round
    f.engine.executor().push_rows(vec![row(&[("x", Some(ALICE))])]);
    // describe round
    f.engine.executor().push_rows(vec![row(&[
        ("subject", Some(ALICE)),
        ("predicate", Some(NAME)),
        ("object", Some("Alice")),
    ])]);

    let outcome = f
        .engine
        .query(
            "space_test",
            &format!("DESCRIBE ?x WHERE {{ ?x <{}> <{}> }}", KNOWS, BOB),
        )
        .await
        .unwrap();

    let QueryOutcome::Triples(triples) = outcome else {
        panic!("expected triples");
    };
    assert_eq!(triples.len(), 1);
    assert_eq!(triples[0].subject, ALICE);

    let queries = f.engine.executor().recorded_queries();
    assert_eq!(queries.len(), 2);
    assert!(queries[1].contains("s.term_text = 'ex:alice' AND s.term_type = 'U'"));
}

#[tokio::test]
async fn every_referenced_alias_is_declared() {
    let queries = [
        format!("SELECT ?x WHERE {{ ?x <{}> ?y }}", KNOWS),
        format!(
            "SELECT ?x ?n WHERE {{ ?x <{}> <{}> OPTIONAL {{ ?x <{}> ?n }} }}",
            KNOWS, BOB, NAME
        ),
        format!(
            "SELECT ?x WHERE {{ ?x <{}> ?y MINUS {{ ?x <{}> 'Alice' }} }}",
            KNOWS, NAME
        ),
        format!(
            "SELECT ?a ?b WHERE {{ {{ ?a <{}> ?b }} UNION {{ ?b <{}> ?a }} }}",
            KNOWS, NAME
        ),
        format!("SELECT ?z WHERE {{ <{}> <{}>+ ?z }}", ALICE, KNOWS),
        format!(
            "SELECT ?g ?x WHERE {{ GRAPH ?g {{ ?x <{}> ?y }} }}",
            KNOWS
        ),
        format!(
            "SELECT ?x ?n WHERE {{ VALUES ?x {{ <{}> }} ?x <{}> ?n }}",
            ALICE, NAME
        ),
        format!(
            "SELECT ?x WHERE {{ {{ SELECT ?x WHERE {{ ?x <{}> ?y }} LIMIT 3 }} }}",
            KNOWS
        ),
        format!(
            "SELECT ?x (COUNT(?y) AS ?c) WHERE {{ ?x <{}> ?y }} GROUP BY ?x HAVING (COUNT(?y) > 1)",
            KNOWS
        ),
    ];
    for query in &queries {
        let f = fixture();
        f.engine.executor().push_rows(vec![]);
        f.engine.query("space_test", query).await.unwrap();
        let sql = first_query(&f.engine);
        assert_identifiers_declared(&sql);
    }
}

#[tokio::test]
async fn filter_exists_becomes_correlated_subquery() {
    let f = fixture();
    f.engine.executor().push_rows(vec![]);

    f.engine
        .query(
            "space_test",
            &format!(
                "SELECT ?x WHERE {{ ?x <{}> ?y FILTER EXISTS {{ ?x <{}> 'Alice' }} }}",
                KNOWS, NAME
            ),
        )
        .await
        .unwrap();

    let sql = first_query(&f.engine);
    assert!(sql.contains("EXISTS (SELECT 1"));
    // correlated on ?x: the inner mapping equated to the outer one
    assert!(sql.contains("= subject_term_0.term_text"));
    assert_identifiers_declared(&sql);
}

#[tokio::test]
async fn filter_not_exists_negates_the_probe() {
    let f = fixture();
    f.engine.executor().push_rows(vec![]);

    f.engine
        .query(
            "space_test",
            &format!(
                "SELECT ?x WHERE {{ ?x <{}> ?y FILTER NOT EXISTS {{ ?x <{}> 'Alice' }} }}",
                KNOWS, NAME
            ),
        )
        .await
        .unwrap();

    let sql = first_query(&f.engine);
    assert!(sql.contains("NOT (EXISTS (SELECT 1"));
}

#[tokio::test]
async fn join_with_values_constrains_bgp_side() {
    let f = fixture();
    f.engine.executor().push_rows(vec![]);

    f.engine
        .query(
            "space_test",
            &format!(
                "SELECT ?x ?n WHERE {{ VALUES ?x {{ <{}> }} ?x <{}> ?n }}",
                ALICE, NAME
            ),
        )
        .await
        .unwrap();

    let sql = first_query(&f.engine);
    assert!(sql.contains("AS x_val"));
    assert!(sql.contains("CROSS JOIN"));
    // shared ?x ties the inline table to the scanned term text
    assert!(
        sql.contains(".x_val = ") || sql.contains("= values_0.x_val") || sql.contains(".x_val\n"),
        "missing VALUES correlation: {}",
        sql
    );
}

#[tokio::test]
async fn three_way_union_does_not_double_nest() {
    let f = fixture();
    f.engine.executor().push_rows(vec![]);

    f.engine
        .query(
            "space_test",
            &format!(
                "SELECT ?x WHERE {{ {{ ?x <{}> ?y }} UNION {{ ?x <{}> ?y }} UNION {{ <{}> <{}> ?x }} }}",
                KNOWS, NAME, ALICE, KNOWS
            ),
        )
        .await
        .unwrap();

    let sql = first_query(&f.engine);
    // one derived table, three branches: the nested union is unwrapped
    // rather than wrapped in a second derived table
    assert_eq!(sql.matches("UNION\n").count(), 2, "{}", sql);
    assert_identifiers_declared(&sql);
}

#[tokio::test]
async fn order_by_is_emitted_before_offset_and_limit() {
    let f = fixture();
    f.engine.executor().push_rows(vec![]);

    f.engine
        .query(
            "space_test",
            &format!(
                "SELECT ?n WHERE {{ ?x <{}> ?n }} ORDER BY DESC(?n) OFFSET 5 LIMIT 10",
                NAME
            ),
        )
        .await
        .unwrap();

    let sql = first_query(&f.engine);
    let order_at = sql.find("ORDER BY").expect("order by");
    let offset_at = sql.find("OFFSET 5").expect("offset");
    let limit_at = sql.find("LIMIT 10").expect("limit");
    assert!(order_at < offset_at && offset_at < limit_at);
    assert!(sql.contains("DESC"));
}

#[tokio::test]
async fn values_rows_surface_as_inline_data() {
    let f = fixture();
    f.engine.executor().push_rows(vec![]);

    f.engine
        .query(
            "space_test",
            "SELECT ?name WHERE { VALUES ?name { 'Alice' 'Bob' } }",
        )
        .await
        .unwrap();

    let sql = first_query(&f.engine);
    assert!(sql.contains("SELECT 'Alice' AS name_val UNION ALL SELECT 'Bob' AS name_val"));
}
