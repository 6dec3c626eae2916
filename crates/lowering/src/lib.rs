// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # SetLang compiler — IR to SQL lowering
//!
//! The lowering pass walks a typed SetLang IR under an evolving path
//! context and scope tree, and emits an arena-backed relational tree
//! ready for code generation.
//!
//! ## Overview
//!
//! ```text
//! typed IR + schema
//!     → cardinality inference
//!     → set lowering (scope-routed range variables)
//!     → relational tree + parameter map
//! ```
//!
//! The entry point is [`compile_ir_to_sql_tree`].  Options:
//!
//! - `output_format`: native composite values, or JSON (the top-level
//!   target list is wrapped in `coalesce(json_agg(v), '[]')`);
//! - `ignore_shapes`: disables shape serialization;
//! - `singleton_mode`: compiles each set trivially to a column
//!   reference, used to inline default expressions and constraint
//!   checks;
//! - `use_named_params`: parameter references are allocated by name.
//!
//! ## Error handling
//!
//! Scope conflicts surface verbatim — the compiler cannot recover from
//! them.  Internal lookup misses escaping the compiler are wrapped as
//! [`LoweringError::Internal`] carrying the message string only.

pub mod astutils;
pub mod compiler;
pub mod context;
pub mod dbobj;
pub mod error;
pub mod exprcomp;
pub mod output;
pub mod pathctx;
pub mod relctx;
pub mod relgen;
pub mod shape;
pub mod stmt;

// Re-exports
pub use compiler::Compiler;
pub use context::{CompileOptions, OutputFormat};
pub use error::{LoweringError, LoweringResult};
pub use pathctx::{map_path_id, reverse_map_path_id};

use setlang_catalog::Schema;
use setlang_ir::Statement;
use setlang_sqlast::{RelId, ResTarget, SqlTree};

/// The compiled artifact: the relation arena, the root statement and
/// the parameter map.
#[derive(Debug)]
pub struct CompiledTree {
    pub tree: SqlTree,
    pub root: RelId,
    /// Parameter name to 1-based index
    pub argmap: Vec<(String, i32)>,
}

/// Compile a typed IR statement into a relational SQL tree.
pub fn compile_ir_to_sql_tree(
    ir: &Statement,
    schema: &Schema,
    options: &CompileOptions,
) -> LoweringResult<CompiledTree> {
    compile_ir_to_sql_tree_impl(ir, schema, options).map_err(|e| match e {
        // Scope conflicts are user-facing and surface verbatim.
        e @ LoweringError::Ir(setlang_ir::IrError::InvalidScopeConfiguration { .. }) => e,
        e @ LoweringError::Internal(_) => e,
        // Anything else escaping the compiler is re-wrapped, annotated
        // with the message string only.
        other => LoweringError::Internal(other.to_string()),
    })
}

fn compile_ir_to_sql_tree_impl(
    ir: &Statement,
    schema: &Schema,
    options: &CompileOptions,
) -> LoweringResult<CompiledTree> {
    let mut compiler = Compiler::new(schema, ir.scope_tree.clone(), options);

    if options.ignore_shapes {
        compiler.ctx.expr_exposed = Some(false);
    }

    if options.singleton_mode {
        let expr = compiler.compile_set_in_singleton_mode(&ir.expr)?;
        let rel = compiler.tree.new_select();
        compiler
            .tree
            .rel_mut(rel)
            .target_list_mut()
            .push(ResTarget::new(expr));
        return Ok(finish(compiler, rel));
    }

    compiler.visit_set(&ir.expr)?;

    let top = compiler.ctx.toplevel.unwrap_or(compiler.ctx.rel);

    if compiler.tree.rel(top).target_list().is_empty() {
        if compiler.in_serialization_ctx() {
            compiler.get_path_serialized_output(top, &ir.expr.path_id)?;
        } else {
            compiler.get_path_value_output(top, &ir.expr.path_id)?;
        }
    }

    let root = compiler.top_output_as_value(top)?;
    Ok(finish(compiler, root))
}

fn finish(compiler: Compiler<'_>, root: RelId) -> CompiledTree {
    let argmap = compiler
        .env
        .argmap
        .iter()
        .map(|(name, &index)| (name.clone(), index))
        .collect();

    CompiledTree {
        tree: compiler.tree,
        root,
        argmap,
    }
}
