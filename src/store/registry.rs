//! Vector collection registry
//!
//! Each data-point type declares which of its fields are embedded; every
//! `(type, field)` pair owns one collection named `{Type}_{field}`.

use crate::config::VectorConfig;
use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// Built-in index declarations
const DEFAULT_INDEXES: &[(&str, &str)] = &[
    ("DocumentChunk", "text"),
    ("Entity", "name"),
    ("EntityType", "name"),
    ("EdgeType", "relationship_name"),
    ("TextDocument", "name"),
    ("TextSummary", "text"),
];

/// One indexed field on a data-point type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexedField {
    pub data_point_type: String,
    pub field: String,
}

impl IndexedField {
    pub fn new(data_point_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            data_point_type: data_point_type.into(),
            field: field.into(),
        }
    }

    /// Parse a `Type.field` declaration
    pub fn parse(declaration: &str) -> Result<Self> {
        match declaration.split_once('.') {
            Some((ty, field)) if !ty.is_empty() && !field.is_empty() => {
                Ok(Self::new(ty.trim(), field.trim()))
            }
            _ => Err(Error::Config(format!(
                "invalid index declaration '{}', expected 'Type.field'",
                declaration
            ))),
        }
    }

    pub fn collection_name(&self) -> String {
        format!("{}_{}", self.data_point_type, self.field)
    }
}

/// Static mapping from data-point type to indexed fields
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    fields: BTreeSet<IndexedField>,
}

impl CollectionRegistry {
    /// Empty registry; [`collection_names`](Self::collection_names) falls
    /// back to the defaults until something is registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in declarations
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (ty, field) in DEFAULT_INDEXES {
            registry.register(IndexedField::new(*ty, *field));
        }
        registry
    }

    /// Built-in declarations plus `vector.extra_indexes`
    pub fn from_config(config: &VectorConfig) -> Result<Self> {
        let mut registry = Self::with_defaults();
        for declaration in &config.extra_indexes {
            registry.register(IndexedField::parse(declaration)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, field: IndexedField) {
        self.fields.insert(field);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every collection a deleted node may have vectors in, sorted
    pub fn collection_names(&self) -> Vec<String> {
        if self.fields.is_empty() {
            return DEFAULT_INDEXES
                .iter()
                .map(|(ty, field)| IndexedField::new(*ty, *field).collection_name())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
        }

        self.fields.iter().map(IndexedField::collection_name).collect()
    }
}
