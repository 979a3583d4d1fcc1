//! pgsparql - SPARQL 1.1 over PostgreSQL quad stores
//!
//! This crate compiles SPARQL 1.1 queries and updates into PostgreSQL SQL
//! executed against a relational quad store:
//! - RDF terms live in a term table keyed by `(term_text, term_type)` with a
//!   UUID identity
//! - triples live in a four-column quad table (subject, predicate, object,
//!   context) of term UUIDs
//!
//! The pipeline: parse (spargebra) → resolve constant terms to UUIDs through
//! a shared cache → walk the algebra emitting SQL fragments → assemble one
//! statement → execute through a pluggable [`engine::SqlExecutor`] → reshape
//! rows into SPARQL bindings, triples, or a boolean.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod sql_generator;
pub mod terms;

pub use catalog::{TableConfig, GLOBAL_GRAPH_IRI};
pub use config::EngineConfig;
pub use engine::{QueryOutcome, SparqlEngine, SqlExecutor};
pub use error::{SparqlError, SparqlResult};
