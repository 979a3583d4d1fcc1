//! RDF term model: the `(text, kind)` identity key used for every cache and
//! database lookup, and SQL-literal quoting for term text.
//!
//! A term's identity is its lexical text plus a one-character kind. Language
//! tags and datatypes ride along on literals but do not participate in the
//! identity key.

pub mod cache;
pub mod resolver;

use oxrdf::{BlankNode, Literal, NamedNode, Subject, Term};
use spargebra::term::{
    GraphName, GraphNamePattern, GroundSubject, GroundTerm, GroundTermPattern, NamedNodePattern,
    Quad, TermPattern,
};

use crate::error::{SparqlError, SparqlResult};

/// Kind discriminator stored in the term table's `term_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    Uri,
    Literal,
    Blank,
}

impl TermKind {
    pub fn as_char(self) -> char {
        match self {
            TermKind::Uri => 'U',
            TermKind::Literal => 'L',
            TermKind::Blank => 'B',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'U' => Some(TermKind::Uri),
            'L' => Some(TermKind::Literal),
            'B' => Some(TermKind::Blank),
            _ => None,
        }
    }
}

/// Canonical lookup identity of a term: `(text, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TermKey {
    pub text: String,
    pub kind: TermKind,
}

impl TermKey {
    pub fn uri(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: TermKind::Uri,
        }
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: TermKind::Literal,
        }
    }

    pub fn blank(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: TermKind::Blank,
        }
    }
}

pub fn named_key(node: &NamedNode) -> TermKey {
    TermKey::uri(node.as_str())
}

pub fn literal_key(literal: &Literal) -> TermKey {
    TermKey::literal(literal.value())
}

pub fn blank_key(node: &BlankNode) -> TermKey {
    TermKey::blank(node.as_str())
}

/// Identity key of a triple-pattern slot; `None` for variables.
pub fn term_pattern_key(term: &TermPattern) -> Option<TermKey> {
    match term {
        TermPattern::NamedNode(n) => Some(named_key(n)),
        TermPattern::BlankNode(b) => Some(blank_key(b)),
        TermPattern::Literal(l) => Some(literal_key(l)),
        TermPattern::Variable(_) => None,
    }
}

pub fn named_node_pattern_key(term: &NamedNodePattern) -> Option<TermKey> {
    match term {
        NamedNodePattern::NamedNode(n) => Some(named_key(n)),
        NamedNodePattern::Variable(_) => None,
    }
}

pub fn ground_term_key(term: &GroundTerm) -> TermKey {
    match term {
        GroundTerm::NamedNode(n) => named_key(n),
        GroundTerm::Literal(l) => literal_key(l),
    }
}

pub fn ground_term_pattern_key(term: &GroundTermPattern) -> Option<TermKey> {
    match term {
        GroundTermPattern::NamedNode(n) => Some(named_key(n)),
        GroundTermPattern::Literal(l) => Some(literal_key(l)),
        GroundTermPattern::Variable(_) => None,
    }
}

pub fn term_key(term: &Term) -> TermKey {
    match term {
        Term::NamedNode(n) => named_key(n),
        Term::BlankNode(b) => blank_key(b),
        Term::Literal(l) => literal_key(l),
    }
}

pub fn subject_key(subject: &Subject) -> TermKey {
    match subject {
        Subject::NamedNode(n) => named_key(n),
        Subject::BlankNode(b) => blank_key(b),
    }
}

pub fn ground_subject_key(subject: &GroundSubject) -> TermKey {
    match subject {
        GroundSubject::NamedNode(n) => named_key(n),
    }
}

/// Identity key of a quad's graph slot; the default graph maps to the
/// reserved global-graph IRI.
pub fn graph_name_key(graph: &GraphName) -> TermKey {
    match graph {
        GraphName::NamedNode(n) => named_key(n),
        GraphName::DefaultGraph => TermKey::uri(crate::catalog::GLOBAL_GRAPH_IRI),
    }
}

/// Identity key of a quad-pattern's graph slot; `None` for variables.
pub fn graph_name_pattern_key(graph: &GraphNamePattern) -> Option<TermKey> {
    match graph {
        GraphNamePattern::NamedNode(n) => Some(named_key(n)),
        GraphNamePattern::DefaultGraph => Some(TermKey::uri(crate::catalog::GLOBAL_GRAPH_IRI)),
        GraphNamePattern::Variable(_) => None,
    }
}

/// Collect the term keys of a quad including its graph slot.
pub fn quad_keys(quad: &Quad) -> Vec<TermKey> {
    vec![
        subject_key(&quad.subject),
        named_key(&quad.predicate),
        term_key(&quad.object),
        graph_name_key(&quad.graph_name),
    ]
}

/// Quote arbitrary text as a SQL string literal, doubling single quotes.
pub fn sql_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// SQL literal for a triple-pattern slot. Variables cannot be rendered as
/// literals.
pub fn term_pattern_sql_literal(term: &TermPattern) -> SparqlResult<String> {
    match term {
        TermPattern::NamedNode(n) => Ok(sql_quote(n.as_str())),
        TermPattern::Literal(l) => Ok(sql_quote(l.value())),
        TermPattern::BlankNode(b) => Ok(sql_quote(&format!("_:{}", b.as_str()))),
        TermPattern::Variable(v) => Err(SparqlError::InvalidTerm(format!(
            "cannot convert variable ?{} to a SQL literal",
            v.as_str()
        ))),
    }
}

/// SQL literal for a ground term (VALUES rows, update templates). All values
/// are quoted as strings so join conditions against the term table compare
/// uniformly.
pub fn ground_term_sql_literal(term: &GroundTerm) -> String {
    match term {
        GroundTerm::NamedNode(n) => sql_quote(n.as_str()),
        GroundTerm::Literal(l) => sql_quote(l.value()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::Variable;
    use test_case::test_case;

    #[test_case('U', Some(TermKind::Uri); "uri")]
    #[test_case('L', Some(TermKind::Literal); "literal")]
    #[test_case('B', Some(TermKind::Blank); "blank")]
    #[test_case('X', None; "unknown")]
    fn kind_round_trips_through_char(c: char, expected: Option<TermKind>) {
        assert_eq!(TermKind::from_char(c), expected);
        if let Some(kind) = expected {
            assert_eq!(kind.as_char(), c);
        }
    }

    #[test]
    fn term_info_kinds() {
        let iri = NamedNode::new("http://example.org/alice").unwrap();
        assert_eq!(named_key(&iri), TermKey::uri("http://example.org/alice"));

        let lit = Literal::new_simple_literal("Alice");
        assert_eq!(literal_key(&lit), TermKey::literal("Alice"));

        let lang = Literal::new_language_tagged_literal("chat", "fr").unwrap();
        assert_eq!(literal_key(&lang), TermKey::literal("chat"));

        let blank = BlankNode::new("b0").unwrap();
        assert_eq!(blank_key(&blank), TermKey::blank("b0"));
    }

    #[test]
    fn sql_quote_doubles_single_quotes() {
        assert_eq!(sql_quote("O'Brien"), "'O''Brien'");
        assert_eq!(sql_quote("plain"), "'plain'");
    }

    #[test]
    fn variable_is_not_a_literal() {
        let var = TermPattern::Variable(Variable::new("x").unwrap());
        assert!(term_pattern_sql_literal(&var).is_err());
    }

    #[test]
    fn default_graph_resolves_to_global() {
        let key = graph_name_key(&GraphName::DefaultGraph);
        assert_eq!(key, TermKey::uri("urn:___GLOBAL"));
    }
}
