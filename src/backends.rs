//! Collaborator interfaces for downstream renderers
//!
//! The engine stops at the AST; turning a transformed tree into a search
//! engine query document or a relational predicate belongs to backends
//! implemented elsewhere. Both receive the AST read-only; a backend that
//! needs rewrites inserts a visitor pass before rendering.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::Document;
use crate::error::Result;

/// Field predicate shared by renderer contexts
pub type FieldPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Context a search-engine renderer works against
#[derive(Clone)]
pub struct SearchRenderContext {
    /// Whether clauses should contribute to scoring or only filter
    pub use_scoring: bool,
    /// Fields searched by unqualified terms
    pub default_fields: Vec<String>,
    pub is_date_field: FieldPredicate,
    pub is_geo_field: FieldPredicate,
}

impl Default for SearchRenderContext {
    fn default() -> Self {
        Self {
            use_scoring: true,
            default_fields: Vec::new(),
            is_date_field: Arc::new(|_| false),
            is_geo_field: Arc::new(|_| false),
        }
    }
}

/// Renders an AST into a structured search-engine query document
pub trait SearchQueryRenderer {
    /// The structured query representation this backend produces
    type Output;

    fn render(&self, document: &Document<'_>, ctx: &SearchRenderContext) -> Result<Self::Output>;
}

/// Scalar type of an entity field in the relational backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityFieldType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
}

/// One column/property in the entity catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityField {
    pub name: String,
    pub field_type: EntityFieldType,
    pub nullable: bool,
    /// Dotted path for fields reached through a navigation property
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation_path: Option<String>,
}

/// Field catalog the relational backend maps query fields against
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EntityMetadata {
    fields: HashMap<String, EntityField>,
}

impl EntityMetadata {
    pub fn new(fields: impl IntoIterator<Item = EntityField>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|f| (f.name.to_lowercase(), f))
                .collect(),
        }
    }

    /// Case-insensitive lookup
    pub fn field(&self, name: &str) -> Option<&EntityField> {
        self.fields.get(&name.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Renders an AST into a relational boolean predicate
pub trait PredicateRenderer {
    /// The predicate expression this backend produces
    type Predicate;

    fn render(&self, document: &Document<'_>, metadata: &EntityMetadata)
        -> Result<Self::Predicate>;
}
