// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Set lowering
//!
//! [`Compiler::get_set_rvar`] turns each IR set into one or more range
//! variables registered in the current relation.  Dispatch over the set
//! kind is prioritized: subquery sets first, then the per-construct
//! rewrites, then plain path steps and roots.
//!
//! The OptionalRel scaffold — a marker-annotated UNION of the real
//! computation and an all-NULL arm, filtered by
//! `marker = first_value(marker) OVER ()` — is the universal template
//! for sub-relations that may produce no row while the outer query still
//! needs one.

use setlang_catalog::Cardinality;
use setlang_ir::{Expr, PathId, PointerRef, Set, SortDirection, Stmt, tuple_indirection_path_id};
use setlang_sqlast::{
    Alias, Aspect, ColumnRef, FromItem, FuncCall, RVarId, RVarKind, RangeVar, RelId, ResTarget,
    SetOperation, SortBy, SortDir, SortNulls, SqlExpr, SubLinkKind, TupleElement, TupleVar,
    WindowDef,
};
use tracing::debug;

use crate::astutils::{extend_binop, new_binop, new_unop};
use crate::compiler::Compiler;
use crate::context::VolatilityRef;
use crate::error::{LoweringError, LoweringResult};

/// One range variable produced by a set handler
#[derive(Debug, Clone)]
pub(crate) struct SetRVar {
    pub rvar: RVarId,
    pub path_id: PathId,
    pub aspects: Vec<Aspect>,
}

impl SetRVar {
    fn new(rvar: RVarId, path_id: PathId, aspects: &[Aspect]) -> Self {
        Self {
            rvar,
            path_id,
            aspects: aspects.to_vec(),
        }
    }
}

/// The full result of a set handler: the main rvar representing the set
/// plus every new rvar that must be included in the scope statement.
#[derive(Debug, Clone)]
pub(crate) struct SetRVars {
    pub main: SetRVar,
    pub new: Vec<SetRVar>,
}

fn new_simple_set_rvar(ir_set: &Set, rvar: RVarId, aspects: &[Aspect]) -> SetRVars {
    let set_rvar = SetRVar::new(rvar, ir_set.path_id.clone(), aspects);
    SetRVars {
        main: set_rvar.clone(),
        new: vec![set_rvar],
    }
}

fn new_source_set_rvar(ir_set: &Set, rvar: RVarId, is_objtype: bool) -> SetRVars {
    let aspects: &[Aspect] = if is_objtype {
        &[Aspect::Value, Aspect::Source]
    } else {
        &[Aspect::Value]
    };
    new_simple_set_rvar(ir_set, rvar, aspects)
}

/// The pieces of the marker-UNION scaffold while it is being finalized
pub(crate) struct OptionalRel {
    scope_rel: RelId,
    unionrel: RelId,
    wrapper: RelId,
    container: RelId,
    marker: String,
}

impl Compiler<'_> {
    /// Return a range var for the given IR set, lowering it on first
    /// request.
    pub(crate) fn get_set_rvar(&mut self, ir_set: &Set) -> LoweringResult<RVarId> {
        let path_id = ir_set.path_id.clone();

        let scope_stmt = self.maybe_get_scope_stmt(&path_id);
        if let Some(rvar) = self.find_rvar(self.ctx.rel, scope_stmt, &path_id)? {
            return Ok(rvar);
        }

        if self.ctx.toplevel.is_none() {
            // Top level query.
            return self.process_toplevel_query(ir_set);
        }

        debug!(path = %path_id.pformat(), "lowering set");

        let rvars = self.with_new(|c| -> LoweringResult<SetRVars> {
            let scope_stmt = match scope_stmt {
                Some(stmt) => {
                    c.ctx.rel = stmt;
                    stmt
                }
                None => c.ctx.rel,
            };

            // A tentative container for the relation generated by
            // processing the set; handlers are free to return something
            // else instead of a range over it.
            let stmt = c.tree.new_select();
            c.rel_hierarchy.insert(stmt, c.ctx.rel);
            let alias_hint = c.get_set_rel_alias(ir_set);
            let name = c.env.aliases.get(&alias_hint);
            c.tree.rel_mut(stmt).query.name = Some(name);

            c.ctx.rel = stmt;
            c.ctx.pending_query = Some(stmt);

            let is_optional = c.scope_tree.is_optional(c.ctx.scope_node, &path_id);
            let (stmt, optrel) = if is_optional {
                let (target, optrel) = c.prepare_optional_rel(ir_set, stmt)?;
                c.ctx.pending_query = Some(target);
                c.ctx.rel = target;
                (target, Some(optrel))
            } else {
                (stmt, None)
            };

            if let Some(path_scope) = c.get_scope(ir_set) {
                if c.scope_tree.is_visible(path_scope, &path_id) {
                    c.ctx.path_scope.insert(path_id.clone(), scope_stmt);
                }
                c.update_scope(ir_set, stmt);
            }

            let mut rvars = c.dispatch_set_rvar(ir_set, stmt)?;

            if let Some(optrel) = optrel {
                rvars = c.finalize_optional_rel(ir_set, optrel, rvars)?;
            }

            for set_rvar in &rvars.new {
                // The outermost set with a given path must represent
                // the path; nested sets with the same path but
                // different expressions happen when a computed pointer
                // refers to itself.
                c.include_specific_rvar(
                    scope_stmt,
                    set_rvar.rvar,
                    &set_rvar.path_id,
                    true,
                    &set_rvar.aspects,
                )?;
            }

            Ok(rvars)
        })?;

        let rvar = rvars.main.rvar;
        for &aspect in &rvars.main.aspects {
            self.put_path_rvar_if_not_exists(self.ctx.rel, &path_id, rvar, aspect);
        }

        Ok(rvar)
    }

    fn process_toplevel_query(&mut self, ir_set: &Set) -> LoweringResult<RVarId> {
        let top = self.tree.new_select();
        self.ctx.toplevel = Some(top);
        self.ctx.stmt = top;
        self.ctx.rel = top;
        self.update_scope(ir_set, top);
        self.ctx.pending_query = Some(top);
        let rvars = self.dispatch_set_rvar(ir_set, top)?;
        Ok(rvars.main.rvar)
    }

    fn dispatch_set_rvar(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        if ir_set.is_subquery_set() {
            // Sub-statement (explicit or implicit); most computables go
            // here.
            return self.process_set_as_subquery(ir_set, stmt);
        }

        match &ir_set.expr {
            Some(Expr::BinOp { op, .. }) if op.is_membership() => {
                self.process_set_as_membership_expr(ir_set, stmt)
            }

            Some(Expr::EmptySet) => self.process_set_as_empty(ir_set),

            Some(Expr::SetOp { .. }) => self.process_set_as_setop(ir_set, stmt),

            Some(Expr::DistinctOp { .. }) => self.process_set_as_distinct(ir_set, stmt),

            Some(Expr::IfElse { .. }) => self.process_set_as_ifelse(ir_set, stmt),

            Some(Expr::Coalesce { .. }) => self.process_set_as_coalesce(ir_set, stmt),

            Some(Expr::EquivalenceOp { .. }) => {
                self.process_set_as_equivalence(ir_set, stmt)
            }

            Some(Expr::Tuple { .. }) => self.process_set_as_tuple(ir_set, stmt),

            Some(Expr::TupleIndirection { .. }) => {
                self.process_set_as_tuple_indirection(ir_set, stmt)
            }

            Some(Expr::FunctionCall(call)) => {
                if call.func.has_set_of_param() {
                    self.process_set_as_agg_expr(ir_set, stmt)
                } else {
                    self.process_set_as_func_expr(ir_set, stmt)
                }
            }

            Some(Expr::Exists { .. }) => self.process_set_as_exists_expr(ir_set, stmt),

            Some(_) => self.process_set_as_expr(ir_set, stmt),

            None if ir_set.rptr.is_some() => self.process_set_as_path(ir_set, stmt),

            None => self.process_set_as_root(ir_set),
        }
    }

    /// Entry for compiling a set for its side effects (registration of
    /// range vars and outputs).
    pub(crate) fn visit_set(&mut self, ir_set: &Set) -> LoweringResult<()> {
        if self.env.singleton_mode {
            self.compile_set_in_singleton_mode(ir_set)?;
            return Ok(());
        }
        self.compile_set_impl(ir_set)
    }

    /// Entry for compiling a set to its value expression.
    pub(crate) fn compile_set(&mut self, ir_set: &Set) -> LoweringResult<SqlExpr> {
        if self.env.singleton_mode {
            return self.compile_set_in_singleton_mode(ir_set);
        }

        self.compile_set_impl(ir_set)?;
        let value = self.get_path_value_var(self.ctx.rel, &ir_set.path_id)?;
        Ok(self.output_as_value(value))
    }

    fn compile_set_impl(&mut self, ir_set: &Set) -> LoweringResult<()> {
        let is_toplevel = self.ctx.toplevel.is_none();

        if let Some(expr @ Expr::Constant { .. }) = &ir_set.expr {
            // Constants need no relational scaffolding; this also keeps
            // GROUP BY clauses simple.
            let value = self.compile_expr(expr, ir_set)?;
            self.put_path_value_var_if_not_exists(self.ctx.rel, &ir_set.path_id, value);
            if self.in_serialization_ctx() && !ir_set.shape.is_empty() {
                self.compile_shape_for_set(ir_set)?;
            }
            return Ok(());
        }

        if ir_set.path_scope_id.is_some() && !is_toplevel {
            // The set is behind a scope fence; compute it in a fenced
            // context.
            self.with_new(|c| c.compile_set_scoped(ir_set))
        } else {
            self.compile_set_scoped(ir_set)
        }
    }

    fn compile_set_scoped(&mut self, ir_set: &Set) -> LoweringResult<()> {
        self.get_set_rvar(ir_set)?;

        if self.in_serialization_ctx() && !ir_set.shape.is_empty() {
            self.compile_shape_for_set(ir_set)?;
        }

        Ok(())
    }

    fn get_set_rel_alias(&self, ir_set: &Set) -> String {
        if let Some(rptr) = &ir_set.rptr {
            let src_name = self
                .schema
                .type_name(rptr.source.typ)
                .shortname()
                .to_string();
            let ptr_name = match &rptr.ptr {
                PointerRef::Pointer(p) => self.schema.ptr(*p).name.shortname().to_string(),
                PointerRef::TupleElement(name) => name.clone(),
                PointerRef::TypeIndirection { .. } => "indirection".to_string(),
            };
            return format!("{src_name}_{ptr_name}");
        }

        let typ = ir_set.typ;
        if self.schema.is_array(typ) {
            "array".to_string()
        } else if self.schema.is_tuple(typ) {
            "tuple".to_string()
        } else {
            self.schema.type_name(typ).shortname().to_string()
        }
    }

    fn process_set_as_root(&mut self, ir_set: &Set) -> LoweringResult<SetRVars> {
        let rvar = self.new_root_rvar(ir_set)?;
        Ok(new_source_set_rvar(
            ir_set,
            rvar,
            ir_set.path_id.is_objtype_path(self.schema),
        ))
    }

    fn process_set_as_empty(&mut self, ir_set: &Set) -> LoweringResult<SetRVars> {
        let rvar = self.new_empty_rvar(&ir_set.path_id);
        Ok(new_source_set_rvar(
            ir_set,
            rvar,
            ir_set.path_id.is_objtype_path(self.schema),
        ))
    }

    /// Compile a set wrapped in a subquery as `(SELECT v FROM rel)`.
    pub(crate) fn set_as_subquery(
        &mut self,
        ir_set: &Set,
        as_value: bool,
    ) -> LoweringResult<RelId> {
        self.with_subrel(|c, wrapper| -> LoweringResult<RelId> {
            c.visit_set(ir_set)?;

            if as_value {
                if c.in_serialization_ctx() {
                    c.get_path_serialized_output(wrapper, &ir_set.path_id)?;
                } else {
                    c.get_path_value_output(wrapper, &ir_set.path_id)?;

                    let var = c.get_path_value_var(wrapper, &ir_set.path_id)?;
                    let value = c.output_as_value(var);

                    *c.tree.rel_mut(wrapper).target_list_mut() =
                        vec![ResTarget::new(value)];
                }
            } else {
                c.get_path_value_output(wrapper, &ir_set.path_id)?;
            }

            Ok(wrapper)
        })
    }

    /// Collapse a set query into an array with `array_agg`.
    pub(crate) fn set_to_array(
        &mut self,
        ir_set: &Set,
        query: RelId,
    ) -> LoweringResult<RelId> {
        let aggw = self.env.aliases.get("aggw");
        let subrvar = self.tree.add_rvar(RangeVar {
            kind: RVarKind::Subselect(query),
            alias: Alias::new(aggw),
            lateral: false,
            nullable: false,
        });

        let result = self.tree.new_select();
        self.rel_hierarchy.insert(result, self.ctx.rel);
        self.include_rvar(result, subrvar, &ir_set.path_id)?;

        let val = if self.in_serialization_ctx() {
            match self.maybe_get_path_serialized_var(result, &ir_set.path_id)? {
                Some(val) => val,
                None => {
                    let val = self.get_path_value_var(result, &ir_set.path_id)?;
                    let val = self.serialize_expr(val, &ir_set.path_id)?;
                    self.put_path_serialized_var(result, &ir_set.path_id, val.clone(), true)?;
                    val
                }
            }
        } else {
            self.get_path_value_var(result, &ir_set.path_id)?
        };

        *self.tree.rel_mut(result).target_list_mut() = vec![ResTarget::new(
            SqlExpr::FuncCall(FuncCall::new(["array_agg"], vec![val])),
        )];

        Ok(result)
    }

    /// Build the marker-UNION scaffold around an optional computation:
    ///
    /// ```text
    /// SELECT q.* FROM (
    ///     SELECT marker = first_value(marker) OVER () AS marker, ...
    ///     FROM (SELECT 1 AS marker, * FROM left
    ///           UNION ALL
    ///           SELECT 2 AS marker, * FROM empty) AS u
    /// ) AS q
    /// WHERE marker
    /// ```
    fn prepare_optional_rel(
        &mut self,
        ir_set: &Set,
        stmt: RelId,
    ) -> LoweringResult<(RelId, OptionalRel)> {
        let path_id = ir_set.path_id.clone();

        let wrapper = self.tree.new_select();
        self.rel_hierarchy.insert(wrapper, stmt);

        let unionrel = self.tree.new_select();
        self.rel_hierarchy.insert(unionrel, wrapper);

        let scope_rel = self.tree.new_select();
        self.rel_hierarchy.insert(scope_rel, unionrel);

        let target_rel = self.tree.new_select();
        self.rel_hierarchy.insert(target_rel, scope_rel);

        let emptyrel = self.tree.new_select();
        self.rel_hierarchy.insert(emptyrel, unionrel);
        let emptyrvar = self.new_empty_rvar(&path_id);
        self.with_new(|c| -> LoweringResult<()> {
            c.ctx.rel = emptyrel;
            c.include_rvar(emptyrel, emptyrvar, &path_id)?;
            Ok(())
        })?;

        let marker = self.env.aliases.get("m");

        self.tree.rel_mut(scope_rel).target_list_mut().insert(
            0,
            ResTarget::named(marker.clone(), SqlExpr::int(1)),
        );
        self.tree.rel_mut(emptyrel).target_list_mut().insert(
            0,
            ResTarget::named(marker.clone(), SqlExpr::int(2)),
        );

        {
            let data = self
                .tree
                .rel_mut(unionrel)
                .as_select_mut()
                .expect("union scaffold is a select");
            data.op = Some(SetOperation::Union);
            data.all = true;
            data.larg = Some(scope_rel);
            data.rarg = Some(emptyrel);
        }

        let lagged_marker = SqlExpr::FuncCall(
            FuncCall::new(
                ["first_value"],
                vec![SqlExpr::Column(ColumnRef::new([marker.clone()]))],
            )
            .with_over(WindowDef::default()),
        );

        let marker_ok = new_binop(
            SqlExpr::Column(ColumnRef::new([marker.clone()])),
            lagged_marker,
            "=",
        );

        self.tree
            .rel_mut(wrapper)
            .target_list_mut()
            .push(ResTarget::named(marker.clone(), marker_ok));

        Ok((
            target_rel,
            OptionalRel {
                scope_rel,
                unionrel,
                wrapper,
                container: stmt,
                marker,
            },
        ))
    }

    fn finalize_optional_rel(
        &mut self,
        ir_set: &Set,
        optrel: OptionalRel,
        rvars: SetRVars,
    ) -> LoweringResult<SetRVars> {
        let path_id = ir_set.path_id.clone();

        self.with_new(|c| -> LoweringResult<()> {
            let setrel = optrel.scope_rel;
            c.ctx.rel = setrel;

            for set_rvar in &rvars.new {
                c.include_specific_rvar(
                    setrel,
                    set_rvar.rvar,
                    &set_rvar.path_id,
                    false,
                    &set_rvar.aspects,
                )?;
            }

            for &aspect in &rvars.main.aspects {
                c.put_path_rvar_if_not_exists(setrel, &path_id, rvars.main.rvar, aspect);
            }

            let lvar = c.get_path_value_var(setrel, &path_id)?;

            if lvar.nullable(&c.tree) {
                // Non-required singleton scalar links may still be
                // NULL; filter those rows out of the LHS.
                let where_clause = c.tree.rel(setrel).where_clause().cloned();
                *c.tree.rel_mut(setrel).where_clause_mut() = Some(extend_binop(
                    where_clause,
                    SqlExpr::NullTest {
                        arg: Box::new(lvar),
                        negated: true,
                    },
                ));
            }

            Ok(())
        })?;

        let union_rvar = self.rvar_for_rel(optrel.unionrel, true, Vec::new());

        self.with_new(|c| -> LoweringResult<()> {
            c.ctx.rel = optrel.wrapper;
            c.include_rvar(optrel.wrapper, union_rvar, &path_id)?;
            Ok(())
        })?;

        let main_aspects = rvars.main.aspects.clone();

        let sub_rvar = self.with_new(|c| -> LoweringResult<RVarId> {
            let stmt = optrel.container;
            c.ctx.rel = stmt;
            let wrapper_rvar = c.rvar_for_rel(optrel.wrapper, true, Vec::new());

            c.include_rvar(stmt, wrapper_rvar, &path_id)?;

            let marker_col = c.get_column(Some(wrapper_rvar), &optrel.marker, None);
            let where_clause = c.tree.rel(stmt).where_clause().cloned();
            *c.tree.rel_mut(stmt).where_clause_mut() =
                Some(extend_binop(where_clause, SqlExpr::Column(marker_col)));

            c.tree.rel_mut(stmt).query.nullable = true;

            c.new_rel_rvar(ir_set, stmt)
        })?;

        let main = SetRVar::new(sub_rvar, path_id, &main_aspects);
        Ok(SetRVars {
            main: main.clone(),
            new: vec![main],
        })
    }

    fn process_set_as_path(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        let rptr = ir_set.rptr.as_ref().expect("path step has rptr");
        let ir_source = &rptr.source;
        let path_id = ir_set.path_id.clone();

        let mut rvars: Vec<SetRVar> = Vec::new();

        // `__type__` over a scalar set resolves to a static class range.
        let is_static_clsref = self.schema.is_scalar(ir_source.typ)
            && matches!(&rptr.ptr, PointerRef::Pointer(p)
                if self.schema.ptr(*p).name.shortname() == "__type__");
        if is_static_clsref {
            let rvar = self.new_static_class_rvar(ir_set)?;
            return Ok(new_simple_set_rvar(
                ir_set,
                rvar,
                &[Aspect::Value, Aspect::Source],
            ));
        }

        if ir_set.path_id.is_type_indirection_path() {
            self.get_set_rvar(ir_source)?;
            let poly_rvar = self.new_poly_rvar(ir_set)?;
            self.include_rvar(stmt, poly_rvar, &path_id)?;

            let sub_rvar = self.new_rel_rvar(ir_set, stmt)?;
            return Ok(new_simple_set_rvar(
                ir_set,
                sub_rvar,
                &[Aspect::Value, Aspect::Source],
            ));
        }

        let PointerRef::Pointer(ptrcls) = &rptr.ptr else {
            return Err(LoweringError::Internal(
                "plain path step with a synthetic pointer".to_string(),
            ));
        };
        let ptrcls = *ptrcls;

        let ptr_info = self.schema.pointer_storage_info(ptrcls, false)?;
        let is_linkprop = self.schema.ptr(ptrcls).is_link_property;
        let is_inline_ref = ptr_info.table_type == setlang_catalog::TableType::ObjectType;
        let is_scalar_ref = !self.schema.is_object(self.schema.ptr(ptrcls).target);
        let is_inline_scalar_ref = is_inline_ref && is_scalar_ref;
        let source_is_visible = self
            .scope_tree
            .is_visible(self.ctx.scope_node, &ir_source.path_id);
        let semi_join = !source_is_visible
            && !self.ctx.disable_semi_join.contains(&ir_source.path_id)
            && !(is_linkprop || is_scalar_ref);

        let mut main_rvar: Option<SetRVar> = None;
        let mut src_rvar: Option<RVarId> = None;

        if semi_join {
            let set_rvar = self.with_subrel(|c, _| -> LoweringResult<RVarId> {
                c.ctx.expr_exposed = Some(false);
                let src_rvar = c.get_set_rvar(ir_source)?;
                c.semi_join(stmt, ir_set, src_rvar)
            })?;
            rvars.push(SetRVar::new(
                set_rvar,
                path_id.clone(),
                &[Aspect::Value, Aspect::Source],
            ));
        } else if !source_is_visible {
            let srcrel = self.with_subrel(|c, srcrel| -> LoweringResult<RelId> {
                if is_linkprop {
                    c.ctx
                        .disable_semi_join
                        .insert(ir_source.path_id.clone());
                    c.ctx.unique_paths.insert(ir_source.path_id.clone());
                }

                c.get_set_rvar(ir_source)?;

                if is_inline_scalar_ref {
                    // The semi-join variant for inline scalar links:
                    // just filter out the NULLs.
                    c.ensure_source_rvar(ir_source, srcrel)?;

                    let var = c.get_path_value_var(srcrel, &ir_set.path_id)?;
                    if var.nullable(&c.tree) {
                        let where_clause = c.tree.rel(srcrel).where_clause().cloned();
                        *c.tree.rel_mut(srcrel).where_clause_mut() = Some(extend_binop(
                            where_clause,
                            SqlExpr::NullTest {
                                arg: Box::new(var),
                                negated: true,
                            },
                        ));
                    }
                }

                Ok(srcrel)
            })?;

            let rvar = self.rvar_for_rel(srcrel, true, Vec::new());
            self.include_rvar(stmt, rvar, &ir_source.path_id)?;
            self.tree
                .rel_mut(stmt)
                .info
                .path_id_mask
                .insert(ir_source.path_id.clone());
            src_rvar = Some(rvar);
        } else {
            src_rvar = Some(self.get_set_rvar(ir_source)?);
        }

        if is_linkprop {
            let srvars = self.process_set_as_link_property_ref(ir_set)?;
            main_rvar = Some(srvars.main);
            rvars.extend(srvars.new);
        } else if is_inline_scalar_ref {
            let rvar = self.ensure_source_rvar(ir_source, stmt)?;
            main_rvar = Some(SetRVar::new(
                rvar,
                path_id.clone(),
                &[Aspect::Value, Aspect::Source],
            ));
        } else if !semi_join {
            // Link range.
            let src_rvar = src_rvar.expect("path source range resolved");
            let map_rvar = SetRVar::new(
                self.new_pointer_rvar(ir_set, false, src_rvar)?,
                path_id.ptr_path(),
                &[Aspect::Value, Aspect::Source],
            );
            rvars.push(map_rvar.clone());

            // Target set range.
            if self.schema.is_object(ir_set.typ) {
                let target_rvar = self.new_root_rvar(ir_set)?;
                if !self.ctx.unique_paths.contains(&ir_source.path_id) {
                    if let Some(rel) = self.tree.rvar(target_rvar).rel(&self.tree) {
                        self.tree.rel_mut(rel).info.is_distinct = false;
                    }
                }

                let main = SetRVar::new(
                    target_rvar,
                    path_id.clone(),
                    &[Aspect::Value, Aspect::Source],
                );
                rvars.push(main.clone());
                main_rvar = Some(main);
            } else {
                main_rvar = Some(map_rvar);
            }
        }

        if !source_is_visible {
            // No other paths share this path prefix in this scope, so
            // the path is represented by a subquery rather than a
            // simple set of ranges.
            for set_rvar in &rvars {
                self.include_specific_rvar(
                    stmt,
                    set_rvar.rvar,
                    &set_rvar.path_id,
                    false,
                    &set_rvar.aspects,
                )?;
            }

            let main = SetRVar::new(
                self.new_rel_rvar(ir_set, stmt)?,
                path_id,
                &[Aspect::Value, Aspect::Source],
            );
            rvars = vec![main.clone()];
            main_rvar = Some(main);
        }

        let main_rvar = main_rvar
            .ok_or_else(|| LoweringError::Internal("path handler produced no range".into()))?;

        Ok(SetRVars {
            main: main_rvar,
            new: rvars,
        })
    }

    fn process_set_as_link_property_ref(&mut self, ir_set: &Set) -> LoweringResult<SetRVars> {
        let rptr = ir_set.rptr.as_ref().expect("link property has rptr");
        let ir_source = &rptr.source;
        let src_rvar = self.get_set_rvar(ir_source)?;

        let PointerRef::Pointer(lprop) = &rptr.ptr else {
            return Err(LoweringError::Internal(
                "link property ref with a synthetic pointer".to_string(),
            ));
        };
        let lprop = *lprop;

        let ptr_info = self.schema.pointer_storage_info(lprop, false)?;
        let shortname = self.schema.ptr(lprop).name.shortname().to_string();

        if ptr_info.table_type == setlang_catalog::TableType::ObjectType
            || shortname == "target"
        {
            // A singleton link property stored in the source rel.
            let val = self.get_rvar_path_var(src_rvar, &ir_source.path_id, Aspect::Value)?;
            self.put_rvar_path_output(src_rvar, &ir_set.path_id, Aspect::Value, val);

            return Ok(SetRVars {
                main: SetRVar::new(src_rvar, ir_set.path_id.clone(), &[Aspect::Value]),
                new: vec![],
            });
        }

        self.with_new(|c| -> LoweringResult<SetRVars> {
            let mut rvars = Vec::new();

            let link_path_id = ir_set
                .path_id
                .src_path()
                .ok_or_else(|| LoweringError::Internal("link property off a root".into()))?;
            let source_scope_stmt = c.get_scope_stmt(&ir_source.path_id)?;

            let link_rvar = match c.maybe_get_path_rvar_local(
                source_scope_stmt,
                &link_path_id,
                Aspect::Value,
            ) {
                Some(rvar) => rvar,
                None => c.new_pointer_rvar(ir_source, true, src_rvar)?,
            };
            rvars.push(SetRVar::new(link_rvar, link_path_id.clone(), &[Aspect::Value]));

            let target_rvar = match c.maybe_get_path_rvar_local(
                source_scope_stmt,
                &link_path_id.tgt_path(),
                Aspect::Value,
            ) {
                Some(rvar) => rvar,
                None => c.new_root_rvar(ir_source)?,
            };
            rvars.push(SetRVar::new(
                target_rvar,
                link_path_id.tgt_path(),
                &[Aspect::Value],
            ));

            Ok(SetRVars {
                main: SetRVar::new(link_rvar, ir_set.path_id.clone(), &[Aspect::Value]),
                new: rvars,
            })
        })
    }

    fn process_set_as_subquery(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        let is_scalar_path = ir_set.path_id.is_scalar_path(self.schema);

        let (ir_source, source_is_visible) = match &ir_set.rptr {
            Some(rptr) => {
                let visible = if is_scalar_path {
                    true
                } else {
                    // A non-scalar computed pointer; check whether the
                    // path source is visible in the outer scope.
                    self.scope_tree
                        .parent_fence(self.ctx.scope_node)
                        .is_some_and(|fence| {
                            self.scope_tree.is_visible(fence, &rptr.source.path_id)
                        })
                };

                if visible {
                    self.get_set_rvar(&rptr.source)?;
                }

                (Some(&*rptr.source), visible)
            }
            None => (None, false),
        };

        let Some(Expr::Stmt(stmt_ir)) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "subquery set does not wrap a statement".to_string(),
            ));
        };

        self.with_new(|c| -> LoweringResult<()> {
            let inner_set = stmt_ir.result();
            let outer_id = &ir_set.path_id;
            let inner_id = &inner_set.path_id;
            let mut semi_join_rel: Option<RelId> = None;

            if inner_id != outer_id {
                c.tree
                    .rel_mut(stmt)
                    .query
                    .view_path_id_map
                    .insert(outer_id.clone(), inner_id.clone());
            }

            if let Some(ir_source) = ir_source {
                if is_scalar_path && c.ctx.volatility_ref == VolatilityRef::None {
                    // This is a computed pointer.  To invoke volatile
                    // functions in the pointer expression once per
                    // source row, inject a volatility reference: the
                    // identity of the pointer source.
                    c.ctx.volatility_ref = match c.maybe_get_path_var_in_stmt(
                        stmt,
                        &ir_source.path_id,
                        Aspect::Identity,
                    )? {
                        Some(var) => VolatilityRef::Ref(var),
                        None => VolatilityRef::None,
                    };
                } else if !is_scalar_path && !source_is_visible {
                    let path_scope = c.get_scope(ir_set);
                    let source_in_scope = path_scope.is_some_and(|node| {
                        c.scope_tree
                            .find_descendant(node, &ir_source.path_id)
                            .is_some()
                    });

                    if !source_in_scope {
                        // Non-scalar computable semi-join.
                        let subrel = c.with_subrel(|c2, subrel| -> LoweringResult<RelId> {
                            c2.get_set_rvar(ir_source)?;
                            Ok(subrel)
                        })?;
                        c.get_path_identity_output(subrel, &ir_source.path_id)?;
                        semi_join_rel = Some(subrel);
                    }
                }
            }

            c.visit_stmt(stmt_ir)?;

            if let Some(subrel) = semi_join_rel {
                let ir_source = ir_source.expect("semi-join has a source");
                let src_ref =
                    c.maybe_get_path_identity_var(stmt, &ir_source.path_id)?;

                let cond_expr = match src_ref {
                    Some(src_ref) => new_binop(src_ref, SqlExpr::Subquery(subrel), "IN"),
                    // The link expression does not refer to the
                    // source; simply check it is not empty.
                    None => SqlExpr::SubLink {
                        kind: SubLinkKind::Exists,
                        rel: subrel,
                    },
                };

                let where_clause = c.tree.rel(stmt).where_clause().cloned();
                *c.tree.rel_mut(stmt).where_clause_mut() =
                    Some(extend_binop(where_clause, cond_expr));
            }

            Ok(())
        })?;

        let sub_rvar = self.new_rel_rvar(ir_set, stmt)?;
        Ok(new_simple_set_rvar(
            ir_set,
            sub_rvar,
            &[Aspect::Value, Aspect::Source],
        ))
    }

    /// `A [NOT] IN B` becomes `SELECT [NOT] bool_or(A = B)` over a
    /// cross join; `bool_or` (rather than an IN sublink) partitions `B`
    /// correctly with respect to the path scope.
    fn process_set_as_membership_expr(
        &mut self,
        ir_set: &Set,
        stmt: RelId,
    ) -> LoweringResult<SetRVars> {
        let Some(Expr::BinOp { op, left, right }) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "membership handler on a non-membership op".to_string(),
            ));
        };
        let negated = *op == setlang_ir::BinOp::NotIn;
        let path_id = ir_set.path_id.clone();

        let sub_rvar = self.with_new(|c| -> LoweringResult<RVarId> {
            c.ctx.expr_exposed = Some(false);
            let left_expr = c.compile_set(left)?;

            c.with_subrel(|c, wrapper| -> LoweringResult<RVarId> {
                let right_rvar = c.get_set_rvar(right)?;
                let right_expr = c
                    .get_rvar_path_var(right_rvar, &right.path_id, Aspect::Value)?
                    .into_expr();

                let op = if right_expr.nullable(&c.tree) {
                    "IS NOT DISTINCT FROM"
                } else {
                    "="
                };

                let mut check_expr = new_binop(left_expr, right_expr, op);
                check_expr =
                    SqlExpr::FuncCall(FuncCall::new(["bool_or"], vec![check_expr]));

                if negated {
                    check_expr = new_unop("NOT", check_expr);
                }

                c.put_path_value_var(wrapper, &path_id, check_expr, false)?;
                c.get_path_value_output(wrapper, &path_id)?;

                let result_rel = if negated {
                    // NOT IN must come out TRUE when B is empty.
                    c.with_subrel(|c, outer| -> LoweringResult<RelId> {
                        let coalesce = SqlExpr::Coalesce {
                            args: vec![SqlExpr::Subquery(wrapper), SqlExpr::Boolean(true)],
                        };
                        c.put_path_value_var(outer, &path_id, coalesce, false)?;
                        Ok(outer)
                    })?
                } else {
                    wrapper
                };

                c.new_rel_rvar(ir_set, result_rel)
            })
        })?;

        self.include_rvar(stmt, sub_rvar, &path_id)?;
        let rvar = self.new_rel_rvar(ir_set, stmt)?;
        Ok(new_simple_set_rvar(ir_set, rvar, &[Aspect::Value]))
    }

    fn process_set_as_setop(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        let Some(Expr::SetOp { left, right, .. }) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "set-op handler on a non-set-op".to_string(),
            ));
        };
        let path_id = ir_set.path_id.clone();

        let (larg, rarg) = self.with_new(|c| -> LoweringResult<(RelId, RelId)> {
            c.ctx.expr_exposed = Some(false);

            let larg = c.with_subrel(|c, larg| -> LoweringResult<RelId> {
                c.tree
                    .rel_mut(larg)
                    .query
                    .view_path_id_map
                    .insert(path_id.clone(), left.path_id.clone());
                c.visit_set(left)?;
                Ok(larg)
            })?;

            let rarg = c.with_subrel(|c, rarg| -> LoweringResult<RelId> {
                c.tree
                    .rel_mut(rarg)
                    .query
                    .view_path_id_map
                    .insert(path_id.clone(), right.path_id.clone());
                c.visit_set(right)?;
                Ok(rarg)
            })?;

            Ok((larg, rarg))
        })?;

        self.with_subrel(|c, subqry| -> LoweringResult<()> {
            {
                let data = c
                    .tree
                    .rel_mut(subqry)
                    .as_select_mut()
                    .expect("set-op container is a select");
                data.op = Some(SetOperation::Union);
                data.all = true;
                data.larg = Some(larg);
                data.rarg = Some(rarg);
            }

            let union_rvar = c.rvar_for_rel(subqry, true, Vec::new());
            c.include_rvar(stmt, union_rvar, &path_id)?;
            Ok(())
        })?;

        let rvar = self.rvar_for_rel(stmt, true, Vec::new());
        Ok(new_simple_set_rvar(ir_set, rvar, &[Aspect::Value]))
    }

    fn process_set_as_distinct(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        let Some(Expr::DistinctOp { expr }) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "distinct handler on a non-distinct op".to_string(),
            ));
        };
        let path_id = ir_set.path_id.clone();

        let subrvar = self.with_subrel(|c, subqry| -> LoweringResult<RVarId> {
            c.tree
                .rel_mut(subqry)
                .query
                .view_path_id_map
                .insert(path_id.clone(), expr.path_id.clone());
            c.visit_set(expr)?;
            Ok(c.rvar_for_rel(subqry, true, Vec::new()))
        })?;

        self.include_rvar(stmt, subrvar, &path_id)?;

        let value_var = self.get_rvar_path_var(subrvar, &path_id, Aspect::Value)?;
        let cols = self.get_rvar_output_var_as_col_list(subrvar, &value_var, Aspect::Value)?;

        self.tree
            .rel_mut(stmt)
            .as_select_mut()
            .expect("distinct container is a select")
            .distinct_clause = Some(cols.into_iter().map(SqlExpr::Column).collect());

        let rvar = self.rvar_for_rel(stmt, true, Vec::new());
        Ok(new_simple_set_rvar(ir_set, rvar, &[Aspect::Value]))
    }

    /// `A IF cond ELSE B` becomes
    /// `SELECT A WHERE cond UNION ALL SELECT B WHERE NOT cond`.
    fn process_set_as_ifelse(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        let Some(Expr::IfElse {
            condition,
            if_expr,
            else_expr,
        }) = &ir_set.expr
        else {
            return Err(LoweringError::Internal(
                "if-else handler on a different construct".to_string(),
            ));
        };
        let path_id = ir_set.path_id.clone();

        let condref = self.with_new(|c| -> LoweringResult<SqlExpr> {
            c.ctx.expr_exposed = Some(false);
            c.visit_set(condition)?;
            c.get_path_var_in_stmt(stmt, &condition.path_id, Aspect::Value)
        })?;

        let larg = self.with_subrel(|c, larg| -> LoweringResult<RelId> {
            c.tree
                .rel_mut(larg)
                .query
                .view_path_id_map
                .insert(path_id.clone(), if_expr.path_id.clone());
            c.visit_set(if_expr)?;

            let where_clause = c.tree.rel(larg).where_clause().cloned();
            *c.tree.rel_mut(larg).where_clause_mut() =
                Some(extend_binop(where_clause, condref.clone()));
            Ok(larg)
        })?;

        let rarg = self.with_subrel(|c, rarg| -> LoweringResult<RelId> {
            c.tree
                .rel_mut(rarg)
                .query
                .view_path_id_map
                .insert(path_id.clone(), else_expr.path_id.clone());
            c.visit_set(else_expr)?;

            let where_clause = c.tree.rel(rarg).where_clause().cloned();
            *c.tree.rel_mut(rarg).where_clause_mut() =
                Some(extend_binop(where_clause, new_unop("NOT", condref.clone())));
            Ok(rarg)
        })?;

        self.with_subrel(|c, subqry| -> LoweringResult<()> {
            {
                let data = c
                    .tree
                    .rel_mut(subqry)
                    .as_select_mut()
                    .expect("if-else container is a select");
                data.op = Some(SetOperation::Union);
                data.all = true;
                data.larg = Some(larg);
                data.rarg = Some(rarg);
            }

            let union_rvar = c.rvar_for_rel(subqry, true, Vec::new());
            c.include_rvar(stmt, union_rvar, &path_id)?;
            Ok(())
        })?;

        let rvar = self.rvar_for_rel(stmt, true, Vec::new());
        Ok(new_simple_set_rvar(ir_set, rvar, &[Aspect::Value]))
    }

    fn process_set_as_coalesce(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        let Some(Expr::Coalesce { left, right }) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "coalesce handler on a different construct".to_string(),
            ));
        };
        let path_id = ir_set.path_id.clone();

        let scope_node = self.ctx.scope_node;
        let rcard = self.infer_cardinality(right, scope_node)?;

        self.with_new(|c| -> LoweringResult<()> {
            c.ctx.expr_exposed = Some(false);

            if rcard == Cardinality::One {
                // A singleton RHS: plain scalar COALESCE.
                c.visit_set(left)?;
                c.visit_set(right)?;

                let set_expr = SqlExpr::Coalesce {
                    args: vec![
                        c.get_path_value_var(stmt, &left.path_id)?,
                        c.get_path_value_var(stmt, &right.path_id)?,
                    ],
                };

                c.put_path_value_var_if_not_exists(stmt, &path_id, set_expr);
                return Ok(());
            }

            // A set-valued RHS cannot go through a scalar COALESCE over
            // a join without blowing up the result cardinality; build
            // the marker-UNION scaffold instead.
            let (subqry, marker) = c.with_subrel(
                |c, subqry| -> LoweringResult<(RelId, String)> {
                    let (larg, rarg, marker, unionqry) = c.with_subrel(
                        |c, unionqry| -> LoweringResult<(RelId, RelId, String, RelId)> {
                            let larg = c.with_subrel(|c, larg| -> LoweringResult<RelId> {
                                c.tree
                                    .rel_mut(larg)
                                    .query
                                    .view_path_id_map
                                    .insert(path_id.clone(), left.path_id.clone());
                                c.visit_set(left)?;

                                let lvar = c.get_path_value_var(larg, &left.path_id)?;
                                if lvar.nullable(&c.tree) {
                                    // Filter out NULLs from non-required
                                    // singleton scalar links.
                                    let where_clause =
                                        c.tree.rel(larg).where_clause().cloned();
                                    *c.tree.rel_mut(larg).where_clause_mut() =
                                        Some(extend_binop(
                                            where_clause,
                                            SqlExpr::NullTest {
                                                arg: Box::new(lvar),
                                                negated: true,
                                            },
                                        ));
                                }
                                Ok(larg)
                            })?;

                            let rarg = c.with_subrel(|c, rarg| -> LoweringResult<RelId> {
                                c.tree
                                    .rel_mut(rarg)
                                    .query
                                    .view_path_id_map
                                    .insert(path_id.clone(), right.path_id.clone());
                                c.visit_set(right)?;
                                Ok(rarg)
                            })?;

                            let marker = c.env.aliases.get("m");

                            c.tree.rel_mut(larg).target_list_mut().insert(
                                0,
                                ResTarget::named(marker.clone(), SqlExpr::int(1)),
                            );
                            c.tree.rel_mut(rarg).target_list_mut().insert(
                                0,
                                ResTarget::named(marker.clone(), SqlExpr::int(2)),
                            );

                            let data = c
                                .tree
                                .rel_mut(unionqry)
                                .as_select_mut()
                                .expect("coalesce union is a select");
                            data.op = Some(SetOperation::Union);
                            data.all = true;
                            data.larg = Some(larg);
                            data.rarg = Some(rarg);

                            Ok((larg, rarg, marker, unionqry))
                        },
                    )?;
                    let _ = (larg, rarg);

                    let union_rvar = c.rvar_for_rel(unionqry, true, Vec::new());
                    c.include_rvar(subqry, union_rvar, &path_id)?;

                    let lagged_marker = SqlExpr::FuncCall(
                        FuncCall::new(
                            ["first_value"],
                            vec![SqlExpr::Column(ColumnRef::new([marker.clone()]))],
                        )
                        .with_over(WindowDef::default()),
                    );

                    let marker_ok = new_binop(
                        SqlExpr::Column(ColumnRef::new([marker.clone()])),
                        lagged_marker,
                        "=",
                    );

                    c.tree
                        .rel_mut(subqry)
                        .target_list_mut()
                        .push(ResTarget::named(marker.clone(), marker_ok));

                    Ok((subqry, marker))
                },
            )?;

            let subrvar = c.rvar_for_rel(subqry, true, Vec::new());
            c.include_rvar(stmt, subrvar, &path_id)?;

            let marker_col = c.get_column(Some(subrvar), &marker, None);
            let where_clause = c.tree.rel(stmt).where_clause().cloned();
            *c.tree.rel_mut(stmt).where_clause_mut() =
                Some(extend_binop(where_clause, SqlExpr::Column(marker_col)));

            Ok(())
        })?;

        let rvar = self.rvar_for_rel(stmt, true, Vec::new());
        Ok(new_simple_set_rvar(ir_set, rvar, &[Aspect::Value]))
    }

    fn process_set_as_equivalence(
        &mut self,
        ir_set: &Set,
        stmt: RelId,
    ) -> LoweringResult<SetRVars> {
        let Some(Expr::EquivalenceOp { op, left, right }) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "equivalence handler on a different construct".to_string(),
            ));
        };

        self.visit_set(left)?;
        self.visit_set(right)?;

        let op = match op {
            setlang_ir::EquivalenceOp::NotEquivalent => "IS DISTINCT FROM",
            setlang_ir::EquivalenceOp::Equivalent => "IS NOT DISTINCT FROM",
        };

        let set_expr = new_binop(
            self.get_path_value_var(stmt, &left.path_id)?,
            self.get_path_value_var(stmt, &right.path_id)?,
            op,
        );

        self.put_path_value_var_if_not_exists(stmt, &ir_set.path_id, set_expr);

        let rvar = self.rvar_for_rel(stmt, true, Vec::new());
        Ok(new_simple_set_rvar(ir_set, rvar, &[Aspect::Value]))
    }

    fn process_set_as_tuple(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        let Some(Expr::Tuple { named, elements }) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "tuple handler on a different construct".to_string(),
            ));
        };
        let path_id = ir_set.path_id.clone();

        let set_expr = self.with_new(|c| -> LoweringResult<SqlExpr> {
            let mut tuple_elements = Vec::new();

            for element in elements {
                let el_path_id = tuple_indirection_path_id(
                    c.schema,
                    &path_id,
                    &element.name,
                    element.val.typ,
                )?;
                c.tree
                    .rel_mut(stmt)
                    .query
                    .view_path_id_map
                    .insert(el_path_id.clone(), element.val.path_id.clone());

                c.visit_set(&element.val)?;
                tuple_elements.push(
                    TupleElement::new(el_path_id.clone()).with_name(element.name.clone()),
                );

                // A serialized var may have been registered by nested
                // shape processing; republish it under the element
                // path.
                if let Some(var) =
                    c.maybe_get_path_var(stmt, &element.val.path_id, Aspect::Serialized)?
                {
                    c.put_path_var_if_not_exists(stmt, &el_path_id, var, Aspect::Serialized);
                }
            }

            Ok(SqlExpr::Tuple(TupleVar::new(tuple_elements, *named)))
        })?;

        self.ensure_bond_for_expr(ir_set, stmt)?;
        self.put_path_value_var(stmt, &path_id, set_expr, false)?;

        let rvar = self.new_rel_rvar(ir_set, stmt)?;
        Ok(new_simple_set_rvar(
            ir_set,
            rvar,
            &[Aspect::Value, Aspect::Source],
        ))
    }

    fn process_set_as_tuple_indirection(
        &mut self,
        ir_set: &Set,
        stmt: RelId,
    ) -> LoweringResult<SetRVars> {
        let Some(Expr::TupleIndirection { expr: tuple_set, name }) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "tuple indirection handler on a different construct".to_string(),
            ));
        };

        let rvar = self.with_new(|c| -> LoweringResult<RVarId> {
            c.ctx.expr_exposed = Some(false);
            let rvar = c.get_set_rvar(tuple_set)?;

            if !ir_set.path_id.startswith(&tuple_set.path_id) {
                // The indirection crosses a fence: re-wrap in a
                // subquery so the element's path id gets remapped.
                let element_path = tuple_indirection_path_id(
                    c.schema,
                    &tuple_set.path_id,
                    name,
                    ir_set.typ,
                )?;
                c.tree
                    .rel_mut(stmt)
                    .query
                    .view_path_id_map
                    .insert(ir_set.path_id.clone(), element_path);

                return c.new_rel_rvar(ir_set, stmt);
            }

            Ok(rvar)
        })?;

        Ok(new_simple_set_rvar(
            ir_set,
            rvar,
            &[Aspect::Value, Aspect::Source],
        ))
    }

    fn process_set_as_expr(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        let expr = ir_set.expr.as_ref().expect("expression set");
        let set_expr = self.compile_expr(expr, ir_set)?;

        self.put_path_value_var_if_not_exists(stmt, &ir_set.path_id, set_expr);

        let rvar = self.new_rel_rvar(ir_set, stmt)?;
        Ok(new_simple_set_rvar(ir_set, rvar, &[Aspect::Value]))
    }

    fn process_set_as_func_expr(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        let Some(Expr::FunctionCall(call)) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "function handler on a different construct".to_string(),
            ));
        };
        let path_id = ir_set.path_id.clone();

        let mut set_expr = self.with_new(|c| -> LoweringResult<SqlExpr> {
            c.ctx.rel = stmt;
            c.ctx.expr_exposed = Some(false);

            let mut args = Vec::with_capacity(call.args.len());
            for ir_arg in &call.args {
                let arg_ref = c.compile_set(ir_arg)?;
                args.push(c.output_as_value(arg_ref));
            }

            let shortname = call.func.name.shortname();
            let mut with_ordinality = false;
            let name: Vec<String> = if shortname == "array_unpack" {
                vec!["unnest".to_string()]
            } else if shortname == "array_enumerate" {
                with_ordinality = true;
                vec!["unnest".to_string()]
            } else {
                c.sql_function_name(&call.func)
            };

            let mut func = FuncCall::new(name, args);
            func.with_ordinality = with_ordinality;
            Ok(SqlExpr::FuncCall(func))
        })?;

        if call.func.set_returning {
            let rtype = call.func.return_type;
            let tuple_elements = self.schema.tuple_data(rtype).map(|t| t.elements.clone());

            let colnames: Vec<String> = match &tuple_elements {
                Some(elements) => elements.iter().map(|(n, _)| n.clone()).collect(),
                None => vec![self.env.aliases.get("v")],
            };

            let SqlExpr::FuncCall(func) = set_expr else {
                return Err(LoweringError::Internal(
                    "set-returning function did not compile to a call".to_string(),
                ));
            };
            let with_ordinality = func.with_ordinality;

            let alias = self.env.aliases.get("f");
            let func_rvar = self.tree.add_rvar(RangeVar {
                kind: RVarKind::Function {
                    functions: vec![func],
                    with_ordinality,
                },
                alias: Alias::new(alias).with_colnames(colnames.clone()),
                lateral: true,
                nullable: false,
            });

            self.tree
                .rel_mut(stmt)
                .from_clause_mut()
                .push(FromItem::RVar(func_rvar));

            if colnames.len() == 1 {
                set_expr =
                    SqlExpr::Column(self.get_column(Some(func_rvar), &colnames[0], None));
            } else {
                let elements = tuple_elements.expect("multi-column return is a tuple");
                let mut tuple_els = Vec::new();
                for (n, el_type) in &elements {
                    let el_path =
                        tuple_indirection_path_id(self.schema, &path_id, n, *el_type)?;
                    let val = SqlExpr::Column(self.get_column(Some(func_rvar), n, None));
                    tuple_els.push(
                        TupleElement::new(el_path)
                            .with_name(n.clone())
                            .with_val(val),
                    );
                }

                if call.func.name.shortname() == "array_enumerate" {
                    // Patch the index column to be zero-based.
                    if let Some(el) = tuple_els.get_mut(1) {
                        let val = el.val.take().expect("enumerate column value");
                        el.val = Some(Box::new(new_binop(*val, SqlExpr::int(1), "-")));
                    }
                }

                for el in &tuple_els {
                    if let Some(val) = &el.val {
                        self.put_path_value_var_if_not_exists(
                            stmt,
                            &el.path_id,
                            (**val).clone(),
                        );
                    }
                }

                set_expr = SqlExpr::Tuple(TupleVar::new(tuple_els, true));
            }
        }

        if let VolatilityRef::Ref(volatility_ref) = self.ctx.volatility_ref.clone() {
            // Force per-source-row invocation of volatile functions by
            // joining a VALUES row carrying the source identity.
            let volatility_source = self.tree.new_select();
            self.tree
                .rel_mut(volatility_source)
                .as_select_mut()
                .expect("volatility source is a select")
                .values
                .push(SqlExpr::ImplicitRow {
                    args: vec![volatility_ref],
                });
            let volatility_rvar = self.rvar_for_rel(volatility_source, false, Vec::new());
            self.rel_join(stmt, volatility_rvar)?;
        }

        self.put_path_var_if_not_exists(stmt, &path_id, set_expr, Aspect::Value);

        let rvar = self.new_rel_rvar(ir_set, stmt)?;
        Ok(new_simple_set_rvar(ir_set, rvar, &[Aspect::Value]))
    }

    fn process_set_as_agg_expr(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<SetRVars> {
        let Some(Expr::FunctionCall(call)) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "aggregate handler on a different construct".to_string(),
            ));
        };
        let path_id = ir_set.path_id.clone();

        let (set_expr, serialization_safe, exposed) =
            self.with_new(|c| -> LoweringResult<(SqlExpr, bool, bool)> {
                let mut agg_filter: Option<SqlExpr> = None;
                let mut agg_sort: Vec<SortBy> = Vec::new();

                let group_by_rels = c.ctx.group_by_rels.clone();
                for ((group_path, s_path), group_rel) in group_by_rels {
                    let group_rvar = c.rvar_for_rel(group_rel, false, Vec::new());
                    c.include_rvar(stmt, group_rvar, &group_path)?;
                    let group_ref = c.get_path_identity_var(stmt, &group_path)?;
                    c.tree
                        .rel_mut(stmt)
                        .as_select_mut()
                        .expect("aggregate container is a select")
                        .group_clause
                        .push(group_ref);
                    c.ctx.path_scope.insert(s_path, stmt);
                }

                // Serialized input is safe only when a polymorphic
                // argument flows to a polymorphic return.
                let serialization_safe = call.func.serialization_safe();

                let mut args = Vec::with_capacity(call.args.len());

                let args_result = c.with_new(|c| -> LoweringResult<Vec<SqlExpr>> {
                    if !serialization_safe {
                        c.ctx.expr_exposed = Some(false);
                    }

                    let mut compiled_args = Vec::new();

                    for (i, ir_arg) in call.args.iter().enumerate() {
                        c.visit_set(ir_arg)?;

                        let mut arg_ref = if c.in_serialization_ctx() {
                            let arg_ref = c.get_path_serialized_or_value_var(
                                c.ctx.rel,
                                &ir_arg.path_id,
                            )?;
                            match arg_ref {
                                SqlExpr::Tuple(_) => {
                                    c.serialize_expr(arg_ref, &ir_arg.path_id)?
                                }
                                other => other,
                            }
                        } else {
                            let arg_ref =
                                c.get_path_value_var(c.ctx.rel, &ir_arg.path_id)?;
                            c.output_as_value(arg_ref)
                        };

                        let arg_is_visible = c.get_scope(ir_arg).is_some_and(|node| {
                            c.scope_tree.parent(node).is_some_and(|parent| {
                                c.scope_tree
                                    .is_any_prefix_visible(parent, &ir_arg.path_id)
                            })
                        });

                        if arg_is_visible {
                            // The argument set is visible above this
                            // query level, so we are aggregating a
                            // singleton potentially on the same level;
                            // wrap it in a VALUES range to satisfy the
                            // ban on same-level aggregates.
                            let wrapper = c.tree.new_select();
                            c.tree
                                .rel_mut(wrapper)
                                .as_select_mut()
                                .expect("values wrapper is a select")
                                .values
                                .push(SqlExpr::ImplicitRow {
                                    args: vec![arg_ref],
                                });
                            let colname = c.env.aliases.get("a");
                            let wrapper_rvar =
                                c.rvar_for_rel(wrapper, true, vec![colname.clone()]);
                            c.include_rvar(stmt, wrapper_rvar, &ir_arg.path_id)?;
                            arg_ref = SqlExpr::Column(c.get_column(
                                Some(wrapper_rvar),
                                &colname,
                                None,
                            ));
                        }

                        if call.agg_sort.is_empty() && i == 0 && ir_arg.is_subquery_set()
                        {
                            // Hoist the inner ORDER BY into the
                            // aggregate call so ordering survives.
                            agg_sort.extend(c.hoist_aggregate_order(ir_arg, stmt)?);
                        }

                        compiled_args.push(arg_ref);
                    }

                    Ok(compiled_args)
                })?;
                args.extend(args_result);

                if let Some(filter) = &call.agg_filter {
                    agg_filter = Some(c.compile_set(filter)?);
                }

                for arg in &args {
                    if arg.nullable(&c.tree) {
                        // Drop NULLs from the aggregate input.
                        agg_filter = Some(extend_binop(
                            agg_filter,
                            SqlExpr::NullTest {
                                arg: Box::new(arg.clone()),
                                negated: true,
                            },
                        ));
                    }
                }

                for sortexpr in &call.agg_sort {
                    let node = c.with_new(|c| c.compile_set(&sortexpr.expr))?;
                    agg_sort.push(SortBy {
                        node,
                        dir: match sortexpr.direction {
                            SortDirection::Asc => SortDir::Asc,
                            SortDirection::Desc => SortDir::Desc,
                        },
                        nulls: sortexpr.nulls.map(|n| match n {
                            setlang_ir::NullsOrder::First => SortNulls::First,
                            setlang_ir::NullsOrder::Last => SortNulls::Last,
                        }),
                    });
                }

                let name = c.sql_function_name(&call.func);
                let mut func = FuncCall::new(name, args);
                func.agg_order = agg_sort;
                func.agg_filter = agg_filter.map(Box::new);
                func.agg_distinct = call.agg_distinct;

                let exposed = c.in_serialization_ctx();
                Ok((SqlExpr::FuncCall(func), serialization_safe, exposed))
            })?;

        let mut stmt = stmt;
        let mut set_expr = set_expr;

        if let Some(initial_value) = &call.initial_value {
            // Fold-with-default: wrap the aggregate in
            // COALESCE(agg, iv).
            let iv = if exposed && serialization_safe {
                // Serialization has changed the output type.
                let iv = self.with_new(|c| {
                    c.ctx.expr_exposed = Some(true);
                    c.compile_set(initial_value)
                })?;
                let iv = self.serialize_expr_if_needed(iv, &initial_value.path_id)?;
                set_expr = self.serialize_expr_if_needed(set_expr, &path_id)?;
                iv
            } else {
                self.compile_set(initial_value)?
            };

            self.put_path_value_var(stmt, &path_id, set_expr, false)?;
            self.get_path_value_output(stmt, &path_id)?;

            let inner = stmt;
            let coalesced = SqlExpr::Coalesce {
                args: vec![SqlExpr::Subquery(inner), iv],
            };
            let wrapper = self.with_subrel(|c, wrapper| -> LoweringResult<RelId> {
                c.put_path_value_var(wrapper, &path_id, coalesced.clone(), false)?;
                Ok(wrapper)
            })?;
            stmt = wrapper;
            set_expr = coalesced;
        }

        self.put_path_value_var_if_not_exists(stmt, &path_id, set_expr);

        let rvar = self.new_rel_rvar(ir_set, stmt)?;
        Ok(new_simple_set_rvar(ir_set, rvar, &[Aspect::Value]))
    }

    /// Move the ORDER BY of the first aggregate argument's subquery
    /// into the aggregate call.
    fn hoist_aggregate_order(
        &mut self,
        ir_arg: &Set,
        stmt: RelId,
    ) -> LoweringResult<Vec<SortBy>> {
        let has_order = matches!(
            ir_arg.expr.as_deref_stmt(),
            Some(Stmt::Select(select)) if !select.orderby.is_empty()
        );
        if !has_order {
            return Ok(Vec::new());
        }

        let Some(qrvar) = self.maybe_get_path_rvar_local(stmt, &ir_arg.path_id, Aspect::Value)
        else {
            return Ok(Vec::new());
        };
        let Some(query) = self.tree.rvar(qrvar).rel(&self.tree) else {
            return Ok(Vec::new());
        };

        let sort_clause = match self.tree.rel_mut(query).as_select_mut() {
            Some(data) => std::mem::take(&mut data.sort_clause),
            None => return Ok(Vec::new()),
        };

        let mut agg_sort = Vec::new();
        for (i, sortref) in sort_clause.into_iter().enumerate() {
            let alias = self.env.aliases.get(&format!("s{i}"));
            self.tree
                .rel_mut(query)
                .target_list_mut()
                .push(ResTarget::named(alias.clone(), sortref.node));

            agg_sort.push(SortBy {
                node: SqlExpr::Column(self.get_column(Some(qrvar), &alias, None)),
                dir: sortref.dir,
                nulls: sortref.nulls,
            });
        }

        Ok(agg_sort)
    }

    fn process_set_as_exists_expr(
        &mut self,
        ir_set: &Set,
        stmt: RelId,
    ) -> LoweringResult<SetRVars> {
        let Some(Expr::Exists { expr, negated }) = &ir_set.expr else {
            return Err(LoweringError::Internal(
                "exists handler on a different construct".to_string(),
            ));
        };
        let path_id = ir_set.path_id.clone();

        let set_expr = self.with_subrel(|c, wrapper| -> LoweringResult<SqlExpr> {
            c.ctx.expr_exposed = Some(false);
            let set_ref = c.compile_set(expr)?;

            c.put_path_value_var(wrapper, &path_id, set_ref.clone(), false)?;
            c.get_path_value_output(wrapper, &path_id)?;

            let where_clause = c.tree.rel(wrapper).where_clause().cloned();
            *c.tree.rel_mut(wrapper).where_clause_mut() = Some(extend_binop(
                where_clause,
                SqlExpr::NullTest {
                    arg: Box::new(set_ref),
                    negated: true,
                },
            ));

            let mut set_expr = SqlExpr::SubLink {
                kind: SubLinkKind::Exists,
                rel: wrapper,
            };
            if *negated {
                set_expr = new_unop("NOT", set_expr);
            }
            Ok(set_expr)
        })?;

        self.put_path_value_var(stmt, &path_id, set_expr, false)?;
        let rvar = self.new_rel_rvar(ir_set, stmt)?;
        Ok(new_simple_set_rvar(ir_set, rvar, &[Aspect::Value]))
    }
}

/// Helper to look through the `Expr::Stmt` box when checking statement
/// shapes.
trait AsDerefStmt {
    fn as_deref_stmt(&self) -> Option<&Stmt>;
}

impl AsDerefStmt for Option<Expr> {
    fn as_deref_stmt(&self) -> Option<&Stmt> {
        match self {
            Some(Expr::Stmt(stmt)) => Some(stmt),
            _ => None,
        }
    }
}
