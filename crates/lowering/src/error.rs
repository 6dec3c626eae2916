// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Error types and handling strategy for the lowering layer
//!
//! Path-context lookup misses are modeled as
//! [`LoweringError::Lookup`]; every raising accessor has a `maybe_*`
//! companion that converts the miss into `None`, and callers choose
//! which to use.  Scope conflicts are surfaced to the user verbatim.
//! Anything else escaping the compiler is wrapped as an internal error
//! annotated with its message string only.

use thiserror::Error;

/// Result type alias for lowering operations
pub type LoweringResult<T> = Result<T, LoweringError>;

/// Errors that can occur during IR → SQL lowering
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoweringError {
    /// A scope conflict or other IR-level failure; scope conflicts
    /// cannot be recovered from and are shown to the user as-is
    #[error(transparent)]
    Ir(#[from] setlang_ir::IrError),

    /// Schema lookup failure
    #[error(transparent)]
    Catalog(#[from] setlang_catalog::CatalogError),

    /// A path context search exhausted its options; recoverable through
    /// the `maybe_*` accessor variants, fatal otherwise
    #[error("could not find {what}")]
    Lookup { what: String },

    /// A path binding was registered twice without `force`
    #[error("{aspect} of {path} is already present in the relation")]
    DuplicatePathVar { aspect: String, path: String },

    /// Compiler invariant violation
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl LoweringError {
    pub(crate) fn lookup(what: impl Into<String>) -> Self {
        LoweringError::Lookup { what: what.into() }
    }

    /// Whether this is a recoverable lookup miss
    pub fn is_lookup(&self) -> bool {
        matches!(self, LoweringError::Lookup { .. })
    }
}

/// Convert a lookup miss into `None`, propagating any other error.
pub(crate) fn absorb_lookup<T>(
    result: LoweringResult<T>,
) -> LoweringResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_lookup() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_recoverable() {
        let err = LoweringError::lookup("range var for Issue.owner");
        assert!(err.is_lookup());
        assert_eq!(absorb_lookup::<i32>(Err(err)).unwrap(), None);
    }

    #[test]
    fn test_other_errors_propagate() {
        let err = LoweringError::Internal("bad state".to_string());
        assert!(!err.is_lookup());
        assert!(absorb_lookup::<i32>(Err(err)).is_err());
    }

    #[test]
    fn test_scope_conflict_passthrough() {
        let ir_err = setlang_ir::IrError::InvalidScopeConfiguration {
            offending: "Issue".to_string(),
            existing: "Issue".to_string(),
            offending_node: 1,
            existing_node: 2,
        };
        let err: LoweringError = ir_err.into();
        let msg = err.to_string();
        assert!(msg.contains("changes the interpretation"));
    }
}
