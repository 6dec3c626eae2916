// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details
//
//! # Error types for catalog operations

use thiserror::Error;

/// Result type alias for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur while querying the schema catalog
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Qualified name does not resolve to a schema object
    #[error("schema object not found: {0}")]
    ObjectNotFound(String),

    /// Pointer cannot be resolved on the given source type
    #[error("type '{source_type}' has no pointer '{pointer}'")]
    PointerNotFound { source_type: String, pointer: String },

    /// Operation requires an object type but got something else
    #[error("'{0}' is not an object type")]
    NotAnObjectType(String),

    /// Operation requires a scalar type but got something else
    #[error("'{0}' is not a scalar type")]
    NotAScalarType(String),

    /// Pointer has no table-backed storage in the requested bias
    #[error("pointer '{0}' has no mapping table")]
    NoMappingTable(String),
}
