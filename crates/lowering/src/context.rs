// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Compiler context and environment
//!
//! The [`Environment`] holds per-compilation state that is never rolled
//! back: the alias generator, output options, the parameter map, DML
//! overlays.  The [`Context`] holds the scoped state — current relation,
//! scope tree position, path-to-statement routing — that every handler
//! must restore on exit; the [`Compiler`](crate::compiler::Compiler)
//! snapshots and restores it around each nested compilation.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

use setlang_ir::{NodeId, PathId};
use setlang_sqlast::{RelId, SqlExpr};

/// Output encoding of the top-level result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Native composite values
    #[default]
    Native,
    /// JSON-encoded rows aggregated into a JSON array
    Json,
}

/// How a DML overlay combines with the base relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayOp {
    Union,
    Replace,
}

/// Options accepted by the compiler entry point
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub output_format: OutputFormat,
    /// Skip shape serialization
    pub ignore_shapes: bool,
    /// Compile each set trivially to a bare column reference; used for
    /// inlining default expressions and constraint checks
    pub singleton_mode: bool,
    /// Allocate named parameters instead of purely positional ones
    pub use_named_params: bool,
}

/// Monotonic, hint-partitioned alias generator.
///
/// Aliases take the form `{hint}_{counter}`; counters are per-hint and
/// never reused, which keeps output stable across runs given identical
/// input.
#[derive(Debug, Clone, Default)]
pub struct AliasGenerator {
    counters: HashMap<String, u32>,
}

impl AliasGenerator {
    pub fn get(&mut self, hint: &str) -> String {
        let hint = if hint.is_empty() { "v" } else { hint };
        let counter = self.counters.entry(hint.to_string()).or_insert(0);
        *counter += 1;
        format!("{hint}_{counter}")
    }
}

/// Per-compilation environment; never shared between compilations.
#[derive(Debug, Default)]
pub struct Environment {
    pub aliases: AliasGenerator,
    pub output_format: OutputFormat,
    pub ignore_shapes: bool,
    pub singleton_mode: bool,
    pub use_named_params: bool,
    /// Parameter name to 1-based index
    pub argmap: IndexMap<String, i32>,
    /// Pre-sealed queries whose outputs are rewritten through their
    /// single path-scope entry
    pub root_rels: HashSet<RelId>,
    /// DML overlays per object-type name, applied when ranging over the
    /// type
    pub rel_overlays: IndexMap<String, Vec<(OverlayOp, RelId)>>,
}

impl Environment {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            output_format: options.output_format,
            ignore_shapes: options.ignore_shapes,
            singleton_mode: options.singleton_mode,
            use_named_params: options.use_named_params,
            ..Self::default()
        }
    }
}

/// The volatility reference slot: either absent, suppressed, or a
/// concrete per-source-row expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum VolatilityRef {
    /// No reference in scope
    #[default]
    None,
    /// Volatility wrapping explicitly disabled for this subtree
    Suppressed,
    /// The identity of the pointer source
    Ref(SqlExpr),
}

/// Which clause of the enclosing query is being compiled; boolean
/// operators lower differently under WHERE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clause {
    #[default]
    Result,
    Where,
    OrderBy,
    OffsetLimit,
}

/// The scoped compiler state, snapshotted around nested compilations
#[derive(Debug, Clone)]
pub struct Context {
    /// The relation currently being populated
    pub rel: RelId,
    /// The relation of the nearest enclosing IR statement
    pub stmt: RelId,
    /// The top-level statement, once created
    pub toplevel: Option<RelId>,
    /// A pre-created subrelation the next nested statement should use
    pub pending_query: Option<RelId>,
    /// Whether expression values surface to the user (enables
    /// serialization); `None` means "not decided yet"
    pub expr_exposed: Option<bool>,
    pub clause: Clause,
    /// Current position in the scope tree
    pub scope_node: NodeId,
    pub volatility_ref: VolatilityRef,
    /// Paths for which semi-join lowering is disabled
    pub disable_semi_join: HashSet<PathId>,
    /// Paths proven unique in this scope (semi-join not needed)
    pub unique_paths: HashSet<PathId>,
    /// Scope-designated statement for each path
    pub path_scope: IndexMap<PathId, RelId>,
    /// Grouped-rel routing for aggregate compilation
    pub group_by_rels: IndexMap<(PathId, PathId), RelId>,
}

impl Context {
    pub fn new(rel: RelId, scope_node: NodeId) -> Self {
        Self {
            rel,
            stmt: rel,
            toplevel: None,
            pending_query: None,
            expr_exposed: None,
            clause: Clause::default(),
            scope_node,
            volatility_ref: VolatilityRef::None,
            disable_semi_join: HashSet::new(),
            unique_paths: HashSet::new(),
            path_scope: IndexMap::new(),
            group_by_rels: IndexMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_generation_is_monotonic() {
        let mut aliases = AliasGenerator::default();
        assert_eq!(aliases.get("user"), "user_1");
        assert_eq!(aliases.get("user"), "user_2");
        assert_eq!(aliases.get("issue"), "issue_1");
        assert_eq!(aliases.get("user"), "user_3");
    }

    #[test]
    fn test_alias_empty_hint() {
        let mut aliases = AliasGenerator::default();
        assert_eq!(aliases.get(""), "v_1");
    }

    #[test]
    fn test_alias_uniqueness() {
        let mut aliases = AliasGenerator::default();
        let mut seen = std::collections::HashSet::new();
        for hint in ["a", "b", "a", "a", "b", "c"] {
            assert!(seen.insert(aliases.get(hint)));
        }
    }
}
