use thiserror::Error;

/// Errors surfaced by translation and execution.
///
/// Translation recovers locally from two situations instead of failing: a
/// bound term missing from the term table compiles to `1=0` (the query
/// returns no rows), and an unmapped variable compiles to an
/// `'UNMAPPED_<name>'` sentinel with a warning. Everything else surfaces as
/// one of these kinds.
#[derive(Debug, Clone, Error)]
pub enum SparqlError {
    #[error("SPARQL parse error: {0}")]
    Parse(String),

    #[error("unsupported SPARQL feature: {0}")]
    Unsupported(String),

    #[error("invalid RDF term: {0}")]
    InvalidTerm(String),

    #[error("term not present in term table: {0}")]
    UnknownTerm(String),

    #[error("variable '{0}' is referenced but has no SQL mapping")]
    UnmappedVariable(String),

    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),

    #[error("generated SQL references alias out of scope: {0}")]
    Scope(String),

    #[error("database execution failed: {0}")]
    Execution(String),

    #[error("term cache transport failed: {0}")]
    Cache(String),
}

pub type SparqlResult<T> = Result<T, SparqlError>;
