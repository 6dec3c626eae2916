// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! The compiler value and its scoped-context discipline
//!
//! A [`Compiler`] owns the output arena, the environment and the scoped
//! [`Context`].  Handlers that need a nested context run inside
//! [`Compiler::with_new`] / [`Compiler::with_subrel`], which snapshot
//! the context and restore it when the closure returns — normally or
//! with an error — so no handler can leak context changes.

use std::collections::HashMap;

use setlang_catalog::{Cardinality, Schema};
use setlang_ir::{CardinalityInference, NodeId, ScopeTree, Set, SetId};
use setlang_sqlast::{RelId, SqlTree};

use crate::context::{CompileOptions, Context, Environment};
use crate::error::LoweringResult;

/// One IR-to-SQL compilation in progress
pub struct Compiler<'a> {
    pub schema: &'a Schema,
    pub scope_tree: ScopeTree,
    pub tree: SqlTree,
    pub env: Environment,
    pub ctx: Context,
    /// Child query to parent query links, used to search enclosing
    /// statements for range vars
    pub rel_hierarchy: HashMap<RelId, RelId>,
    card_memo: HashMap<(SetId, NodeId), Cardinality>,
}

impl<'a> Compiler<'a> {
    pub fn new(schema: &'a Schema, scope_tree: ScopeTree, options: &CompileOptions) -> Self {
        let mut tree = SqlTree::default();
        // Bootstrap relation; replaced as soon as the top-level
        // statement is created.
        let bootstrap = tree.new_select();
        let root = scope_tree.root();
        Self {
            schema,
            scope_tree,
            tree,
            env: Environment::new(options),
            ctx: Context::new(bootstrap, root),
            rel_hierarchy: HashMap::new(),
            card_memo: HashMap::new(),
        }
    }

    /// Run `f` in a copied context; every context change is rolled back
    /// when `f` returns.
    pub fn with_new<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.ctx.clone();
        let result = f(self);
        self.ctx = saved;
        result
    }

    /// Run `f` with a fresh subrelation as the current rel, linked into
    /// the relation hierarchy.
    pub fn with_subrel<R>(&mut self, f: impl FnOnce(&mut Self, RelId) -> R) -> R {
        let saved = self.ctx.clone();
        let rel = self.tree.new_select();
        self.rel_hierarchy.insert(rel, self.ctx.rel);
        self.ctx.rel = rel;
        self.ctx.pending_query = None;
        let result = f(self, rel);
        self.ctx = saved;
        result
    }

    /// Memoized cardinality inference against the compilation's scope
    /// tree.
    pub fn infer_cardinality(
        &mut self,
        ir_set: &Set,
        scope: NodeId,
    ) -> LoweringResult<Cardinality> {
        let memo = std::mem::take(&mut self.card_memo);
        let mut inference =
            CardinalityInference::with_memo(self.schema, &self.scope_tree, memo);
        let result = inference.infer_set(ir_set, scope);
        self.card_memo = inference.into_memo();
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use setlang_catalog::SchemaBuilder;

    fn schema() -> Schema {
        SchemaBuilder::new().finish()
    }

    #[test]
    fn test_context_restored_after_with_new() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());
        let original_rel = compiler.ctx.rel;

        compiler.with_new(|c| {
            let inner = c.tree.new_select();
            c.ctx.rel = inner;
            c.ctx.expr_exposed = Some(false);
        });

        assert_eq!(compiler.ctx.rel, original_rel);
        assert_eq!(compiler.ctx.expr_exposed, None);
    }

    #[test]
    fn test_subrel_links_hierarchy() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());
        let outer = compiler.ctx.rel;

        let inner = compiler.with_subrel(|c, rel| {
            assert_eq!(c.ctx.rel, rel);
            rel
        });

        assert_eq!(compiler.rel_hierarchy.get(&inner), Some(&outer));
        assert_eq!(compiler.ctx.rel, outer);
    }
}
