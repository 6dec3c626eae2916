// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # SetLang compiler — typed IR
//!
//! This crate provides the source-side data model of the compiler:
//!
//! - [`PathId`]: immutable identifiers of object-graph traversals, with
//!   namespace scoping and normalized equality.
//! - [`ScopeTree`]: the arena-based tree of fences, branches and path
//!   nodes that records which paths are bound where.
//! - The typed IR ([`Set`], [`Expr`], statements) consumed by the
//!   lowering pass.
//! - [`CardinalityInference`]: the ONE/MANY pass the lowering depends on.

pub mod ast;
pub mod cardinality;
pub mod error;
pub mod path_id;
pub mod scope_tree;

// Re-export commonly used types
pub use ast::{
    BinOp, ConstantValue, DeleteStmt, EquivalenceOp, Expr, FunctionCall, FunctionRef, GroupStmt,
    InsertStmt, IrBuilder, NullsOrder, Pointer, SelectStmt, Set, SetId, SortDirection, SortExpr,
    Statement, Stmt, TupleElement, TypeCheckOp, TypeModifier, UnaryOp, UpdateStmt, get_id_path_id,
};
pub use cardinality::CardinalityInference;
pub use error::{IrError, IrResult};
pub use path_id::{
    Namespace, PathId, PathStep, PointerRef, tuple_indirection_path_id, type_indirection_path_id,
};
pub use scope_tree::{NodeId, ScopeNode, ScopeTree};

// The cardinality lattice is shared with the catalog.
pub use setlang_catalog::Cardinality;
