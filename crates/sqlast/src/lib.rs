// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # SetLang compiler — relational SQL tree
//!
//! The target representation of the lowering pass: an arena of relations
//! and range variables mirroring a PostgreSQL query AST, each query node
//! annotated with the `(PathId, Aspect)` bookkeeping the compiler uses to
//! route path references to columns.
//!
//! The tree carries no SQL text; code generation consumes it separately.

pub mod expr;
pub mod query;

// Re-export commonly used types
pub use expr::{
    Alias, Aspect, CaseWhen, ColumnRef, FuncCall, Indices, OutputVar, ParamRef, ResTarget,
    SortBy, SortDir, SortNulls, SqlExpr, SubLinkKind, TupleElement, TupleVar, TypeName,
    UpdateTarget, WindowDef,
};
pub use query::{
    DeleteData, FromItem, InsertData, JoinExpr, JoinKind, PathInfo, QueryInfo, RVarId, RVarKind,
    RangeVar, Rel, RelId, RelKind, SelectData, SetOperation, SqlTree, UpdateData,
};
