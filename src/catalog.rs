//! Table naming policy and reserved graph IRIs.
//!
//! Every space (logical dataset) owns four tables whose names derive from
//! `(global_prefix, space_id, role)`. The translator depends only on the
//! resolved names carried by [`TableConfig`]; provisioning the tables is the
//! database collaborator's concern.

/// The reserved IRI denoting the default graph. Quads inserted without an
/// explicit graph land in this context.
pub const GLOBAL_GRAPH_IRI: &str = "urn:___GLOBAL";

/// Slot predicates recognized by frame-style queries. The translator treats
/// them as ordinary predicates.
pub const SOURCE_ENTITY_IRI: &str = "urn:hasSourceEntity";
pub const DESTINATION_ENTITY_IRI: &str = "urn:hasDestinationEntity";

/// The four table roles of a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Quad,
    Term,
    Graph,
    Datatype,
}

impl TableRole {
    fn suffix(self) -> &'static str {
        match self {
            TableRole::Quad => "rdf_quad",
            TableRole::Term => "term",
            TableRole::Graph => "graph",
            TableRole::Datatype => "datatype",
        }
    }
}

/// Resolved table names for one space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub quad_table: String,
    pub term_table: String,
    pub graph_table: String,
    pub datatype_table: String,
}

impl TableConfig {
    /// Resolve the table names for `space_id` under `global_prefix`.
    pub fn for_space(global_prefix: &str, space_id: &str) -> Self {
        Self {
            quad_table: table_name(global_prefix, space_id, TableRole::Quad),
            term_table: table_name(global_prefix, space_id, TableRole::Term),
            graph_table: table_name(global_prefix, space_id, TableRole::Graph),
            datatype_table: table_name(global_prefix, space_id, TableRole::Datatype),
        }
    }
}

fn table_name(global_prefix: &str, space_id: &str, role: TableRole) -> String {
    format!("{}__{}__{}", global_prefix, space_id, role.suffix())
}

/// Handle over the per-space datatype table used by `DATATYPE()` and result
/// shaping. When unavailable, datatype resolution falls back to regex-based
/// inference over the literal text.
#[derive(Debug, Clone)]
pub struct DatatypeTable {
    name: Option<String>,
}

impl DatatypeTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    pub fn unavailable() -> Self {
        Self { name: None }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
