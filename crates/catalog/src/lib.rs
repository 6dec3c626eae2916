// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # SetLang compiler — schema catalog
//!
//! This crate provides the immutable schema abstraction consumed by the
//! SetLang-to-SQL compiler core:
//!
//! - **Types**: object types (with views, virtual union types and
//!   subtyping), scalar types with base chains, tuples and arrays.
//! - **Pointers**: named edges with cardinality, requiredness, exclusive
//!   constraints and link properties.
//! - **Storage resolution**: where each pointer's value lives in the
//!   backend — a column of the source table or a mapping table.
//!
//! A [`Schema`] is built once with [`SchemaBuilder`] and is thereafter
//! read-only; all accessors are synchronous and a schema may be shared
//! freely across compilations.

pub mod error;
pub mod metadata;
pub mod schema;

// Re-exports
pub use error::{CatalogError, CatalogResult};
pub use metadata::{
    ArrayTypeData, Cardinality, Direction, ObjectTypeData, PointerMetadata, PointerStorageInfo,
    PtrId, QualName, ScalarTypeData, TableName, TableType, TupleTypeData, TypeId, TypeKind,
    TypeMetadata,
};
pub use schema::{MAP_SOURCE_COL, MAP_TARGET_COL, PointerBuilder, Schema, SchemaBuilder};
