// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details
//
//! # Error types for the IR layer

use thiserror::Error;

/// Result type alias for IR operations
pub type IrResult<T> = Result<T, IrError>;

/// Errors raised by path identifiers, scope trees and inference
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrError {
    /// Malformed path construction or extension
    #[error("invalid PathId: {0}")]
    InvalidPathId(String),

    /// Truncation landing on a pointer step
    #[error("invalid PathId slice: {0}")]
    InvalidPathSlice(usize),

    /// Attaching a subtree would change the interpretation of an outer
    /// path across a fence
    #[error(
        "reference to '{offending}' changes the interpretation of \
         '{existing}' in an outer scope"
    )]
    InvalidScopeConfiguration {
        /// Formatted path of the newly attached node
        offending: String,
        /// Formatted path of the conflicting outer node
        existing: String,
        /// Arena id of the offending node
        offending_node: usize,
        /// Arena id of the existing node
        existing_node: usize,
    },

    /// A stale node id was passed to a scope tree
    #[error("invalid scope node id: {0}")]
    InvalidScopeNode(usize),

    /// Cardinality inference produced no usable answer
    #[error("could not determine the cardinality of set produced by expression")]
    AmbiguousCardinality,
}
