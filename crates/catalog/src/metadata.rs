// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # Metadata types for schema objects
//!
//! This module defines the types used to represent SetLang schema metadata:
//! object types, scalar types, collection types and pointers.
//!
//! ## Design
//!
//! The schema is an immutable, id-interned value.  Types and pointers are
//! referenced by [`TypeId`] and [`PtrId`] handles into the owning
//! [`Schema`](crate::Schema); the metadata structs here are plain data.
//!
//! ## Pointers
//!
//! A pointer is a named, directed edge between a source object type and a
//! target type.  Outbound cardinality is declared on the pointer; inbound
//! ("backlink") traversal is singular only when the pointer carries an
//! exclusive constraint.  Link properties are pointers whose source is a
//! link rather than an object type; they are flagged with
//! `is_link_property` and resolved against the enclosing link.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to a type interned in a [`Schema`](crate::Schema)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

/// Handle to a pointer interned in a [`Schema`](crate::Schema)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PtrId(pub u32);

/// Declared cardinality of a set or pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// At most one element
    One,
    /// Any number of elements
    Many,
}

impl Cardinality {
    /// Fold two cardinalities: `One` is the bottom, `Many` the top.
    pub fn max(self, other: Cardinality) -> Cardinality {
        if self == Cardinality::One && other == Cardinality::One {
            Cardinality::One
        } else {
            Cardinality::Many
        }
    }

    pub fn is_one(self) -> bool {
        self == Cardinality::One
    }
}

/// Traversal direction of a pointer step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// Source to target (the default)
    Outbound,
    /// Target to source (backlink navigation)
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, ">"),
            Direction::Inbound => write!(f, "<"),
        }
    }
}

/// A module-qualified schema name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualName {
    pub module: String,
    pub name: String,
}

impl QualName {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Parse a `module::name` string; a bare name defaults to `default`.
    pub fn parse(qualname: &str) -> Self {
        match qualname.rsplit_once("::") {
            Some((module, name)) => Self::new(module, name),
            None => Self::new("default", qualname),
        }
    }

    /// The unqualified short name
    pub fn shortname(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for QualName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.name)
    }
}

/// A backend table address: `(schema, table)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

/// Metadata for a schema type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMetadata {
    /// Qualified name
    pub name: QualName,
    /// Kind-specific data
    pub kind: TypeKind,
}

/// Kind-specific type data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TypeKind {
    Object(ObjectTypeData),
    Scalar(ScalarTypeData),
    Tuple(TupleTypeData),
    Array(ArrayTypeData),
}

/// Object type data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectTypeData {
    /// Backend table backing this type (views have none of their own)
    pub table: Option<TableName>,
    /// Whether this is a virtual union type (range compiles to a UNION of
    /// children)
    pub is_virtual: bool,
    /// The aliased base type, if this type is a view
    pub view_of: Option<TypeId>,
    /// Direct subtypes
    pub children: Vec<TypeId>,
    /// Pointers declared on this type, in declaration order
    pub pointers: Vec<PtrId>,
}

/// Scalar type data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarTypeData {
    /// Base scalar, if this is a subtype/domain
    pub base: Option<TypeId>,
    /// Backend type name for casts, e.g. `["text"]` or `["setlang", "ts"]`
    pub pg_type: Vec<String>,
}

/// Tuple type data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleTypeData {
    /// Whether the elements are named
    pub named: bool,
    /// Element names (positional tuples use "0", "1", ...) and types
    pub elements: Vec<(String, TypeId)>,
}

impl TupleTypeData {
    pub fn element(&self, name: &str) -> Option<TypeId> {
        self.elements
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }
}

/// Array type data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArrayTypeData {
    pub element: TypeId,
}

/// Metadata for a pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerMetadata {
    /// Short name, qualified by the declaring module
    pub name: QualName,
    /// Declaring source type
    pub source: TypeId,
    /// Target type
    pub target: TypeId,
    /// Outbound cardinality
    pub cardinality: Cardinality,
    /// Whether a value is required (NOT NULL in the source table)
    pub required: bool,
    /// Whether the pointer carries an exclusive constraint
    pub exclusive: bool,
    /// Whether this is a link property (`@prop`)
    pub is_link_property: bool,
    /// Whether this is the object identity pointer (`id`)
    pub is_id: bool,
    /// Whether the pointer is computed from an expression
    pub computable: bool,
    /// Mapping table, for pointers stored out of line
    pub table: Option<TableName>,
    /// The enclosing link, for link properties
    pub source_link: Option<PtrId>,
}

impl PointerMetadata {
    /// Whether a traversal in the given direction yields at most one value.
    ///
    /// Outbound singularity is the declared cardinality; inbound
    /// singularity requires the exclusive constraint.
    pub fn singular(&self, direction: Direction) -> bool {
        match direction {
            Direction::Outbound => self.cardinality.is_one(),
            Direction::Inbound => self.exclusive,
        }
    }

    /// Whether the pointer target is stored as a column of the source
    /// table rather than a mapping table.
    pub fn stored_inline(&self) -> bool {
        self.table.is_none()
    }
}

/// Classification of the table a pointer value lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableType {
    /// The source object type's own table
    ObjectType,
    /// A pointer mapping table with `source`/`target` columns
    Link,
}

/// Resolved storage of a pointer: which table and column hold its value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerStorageInfo {
    pub table: TableName,
    pub table_type: TableType,
    pub column_name: String,
    pub column_type: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualname_parse() {
        let qn = QualName::parse("std::str");
        assert_eq!(qn.module, "std");
        assert_eq!(qn.shortname(), "str");
        assert_eq!(qn.to_string(), "std::str");

        let bare = QualName::parse("User");
        assert_eq!(bare.module, "default");
        assert_eq!(bare.name, "User");
    }

    #[test]
    fn test_cardinality_max() {
        assert_eq!(
            Cardinality::One.max(Cardinality::One),
            Cardinality::One
        );
        assert_eq!(
            Cardinality::One.max(Cardinality::Many),
            Cardinality::Many
        );
        assert_eq!(
            Cardinality::Many.max(Cardinality::One),
            Cardinality::Many
        );
    }

    #[test]
    fn test_pointer_singular() {
        let ptr = PointerMetadata {
            name: QualName::parse("default::owner"),
            source: TypeId(0),
            target: TypeId(1),
            cardinality: Cardinality::One,
            required: false,
            exclusive: false,
            is_link_property: false,
            is_id: false,
            computable: false,
            table: Some(TableName::new("default", "Issue_owner")),
            source_link: None,
        };

        assert!(ptr.singular(Direction::Outbound));
        // Inbound traversal is singular only for exclusive pointers.
        assert!(!ptr.singular(Direction::Inbound));
    }
}
