// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Relation ranges and scope routing
//!
//! The higher-level join and inclusion helpers built on the path
//! context: pulling path namespaces across range vars, joining rvars
//! into statements on their path bonds, semi-joins, scope-statement
//! routing, and the constructors for root / pointer / empty / polymorphic
//! ranges.

use setlang_catalog::{Direction, TableType};
use setlang_ir::{Expr, PathId, PointerRef, Set};
use setlang_sqlast::{
    Aspect, FromItem, FuncCall, JoinExpr, JoinKind, OutputVar, RVarId, RelId, SqlExpr,
    WindowDef,
};
use tracing::trace;

use crate::astutils::{extend_binop, join_condition, new_binop};
use crate::compiler::Compiler;
use crate::error::{LoweringError, LoweringResult, absorb_lookup};
use crate::pathctx::reverse_map_path_id;

impl Compiler<'_> {
    /// Make every path visible through `source` visible in `target`,
    /// modulo the source's path masks and view rewrites.
    pub(crate) fn pull_path_namespace(
        &mut self,
        target: RelId,
        source: RVarId,
    ) -> LoweringResult<()> {
        let Some(squery) = self.tree.rvar(source).rel(&self.tree) else {
            return Ok(());
        };

        let source_qs = if self.tree.is_set_op_query(squery) {
            let mut qs = vec![squery];
            qs.extend(self.tree.queries_in_set(squery));
            qs
        } else {
            vec![squery]
        };

        for source_q in source_qs {
            let mut s_paths: Vec<(PathId, Aspect)> = Vec::new();
            let node = self.tree.rel(source_q);
            for path in &node.info.value_scope {
                s_paths.push((path.clone(), Aspect::Value));
            }
            for key in node.info.path_outputs.keys() {
                s_paths.push(key.clone());
            }
            for key in node.query.path_namespace.keys() {
                s_paths.push(key.clone());
            }
            for key in node.query.path_rvar_map.keys() {
                s_paths.push(key.clone());
            }

            let view_path_id_map = node.query.view_path_id_map.clone();
            let mask = self.tree.rel(squery).info.path_id_mask.clone();

            let mut seen: Vec<(PathId, Aspect)> = Vec::new();
            for (path_id, aspect) in s_paths {
                let path_id = reverse_map_path_id(&path_id, &view_path_id_map);
                if mask.contains(&path_id) {
                    continue;
                }
                let key = (path_id.clone(), aspect);
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key);

                if self.maybe_get_path_rvar(target, &path_id, aspect)?.is_none() {
                    self.put_path_rvar(target, &path_id, source, aspect);
                }
            }
        }

        Ok(())
    }

    /// Find an existing range var for `path_id` in the statement
    /// hierarchy, recording it on `stmt` for future reference.
    pub(crate) fn find_rvar(
        &mut self,
        stmt: RelId,
        source_stmt: Option<RelId>,
        path_id: &PathId,
    ) -> LoweringResult<Option<RVarId>> {
        let source_stmt = source_stmt.unwrap_or(stmt);

        let rvar = self.maybe_get_path_rvar(source_stmt, path_id, Aspect::Value)?;
        if let Some(rvar) = rvar {
            self.put_path_rvar_if_not_exists(stmt, path_id, rvar, Aspect::Value);

            if let Some(src_rvar) =
                self.maybe_get_path_rvar(source_stmt, path_id, Aspect::Source)?
            {
                self.put_path_rvar_if_not_exists(stmt, path_id, src_rvar, Aspect::Source);
            }
        }

        Ok(rvar)
    }

    /// Ensure `rvar` is visible in `stmt` under the default aspects for
    /// the path kind.
    pub(crate) fn include_rvar(
        &mut self,
        stmt: RelId,
        rvar: RVarId,
        path_id: &PathId,
    ) -> LoweringResult<RVarId> {
        let aspects: &[Aspect] = if path_id.is_objtype_path(self.schema) {
            &[Aspect::Source, Aspect::Value]
        } else {
            &[Aspect::Value]
        };
        self.include_specific_rvar(stmt, rvar, path_id, false, aspects)
    }

    /// Make the given aspects of `path_id` visible in `stmt` as `rvar`,
    /// joining the rvar in and pulling its namespace if it is new.
    pub(crate) fn include_specific_rvar(
        &mut self,
        stmt: RelId,
        rvar: RVarId,
        path_id: &PathId,
        overwrite_path_rvar: bool,
        aspects: &[Aspect],
    ) -> LoweringResult<RVarId> {
        if !self.has_rvar(stmt, rvar) {
            self.rel_join(stmt, rvar)?;
            // Make sure the path namespace of the rvar is mapped onto
            // the namespace of the including statement.
            self.pull_path_namespace(stmt, rvar)?;
        }

        for &aspect in aspects {
            if overwrite_path_rvar {
                self.put_path_rvar(stmt, path_id, rvar, aspect);
            } else {
                self.put_path_rvar_if_not_exists(stmt, path_id, rvar, aspect);
            }
        }

        Ok(rvar)
    }

    /// Whether `rvar` is already included in `stmt` or any enclosing
    /// statement.
    pub(crate) fn has_rvar(&self, stmt: RelId, rvar: RVarId) -> bool {
        let mut current = Some(stmt);
        while let Some(stmt) = current {
            if self.has_rvar_local(stmt, rvar) {
                return true;
            }
            current = self.rel_hierarchy.get(&stmt).copied();
        }
        false
    }

    fn get_path_rvar_in_hierarchy(
        &mut self,
        stmt: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<(RVarId, PathId)> {
        let mut qry = Some(stmt);
        let mut path_id = path_id.clone();

        while let Some(q) = qry {
            if let Some(rvar) = self.maybe_get_path_rvar_local(q, &path_id, aspect) {
                if q != stmt {
                    // Cache the rvar reference.
                    self.put_path_rvar(stmt, &path_id, rvar, aspect);
                }
                return Ok((rvar, path_id));
            }
            let view_map = &self.tree.rel(q).query.view_path_id_map;
            if !view_map.is_empty() {
                path_id = reverse_map_path_id(&path_id, view_map);
            }
            qry = self.rel_hierarchy.get(&q).copied();
        }

        Err(LoweringError::lookup(format!(
            "range var for {path_id} in the statement hierarchy"
        )))
    }

    /// The range var for `path_id`, searching enclosing statements
    pub(crate) fn get_path_rvar(
        &mut self,
        stmt: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<RVarId> {
        let (rvar, _) = self.get_path_rvar_in_hierarchy(stmt, path_id, aspect)?;
        Ok(rvar)
    }

    pub(crate) fn maybe_get_path_rvar(
        &mut self,
        stmt: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<Option<RVarId>> {
        absorb_lookup(self.get_path_rvar(stmt, path_id, aspect))
    }

    /// A reference to `path_id` in `stmt`, searching the hierarchy when
    /// the statement itself has no binding.
    pub(crate) fn get_path_var_in_stmt(
        &mut self,
        stmt: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<SqlExpr> {
        if let Some(var) = self.maybe_get_path_var(stmt, path_id, aspect)? {
            return Ok(var);
        }
        let (rvar, path_id) = self.get_path_rvar_in_hierarchy(stmt, path_id, aspect)?;
        Ok(self.get_rvar_path_var(rvar, &path_id, aspect)?.into_expr())
    }

    pub(crate) fn maybe_get_path_var_in_stmt(
        &mut self,
        stmt: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<Option<SqlExpr>> {
        absorb_lookup(self.get_path_var_in_stmt(stmt, path_id, aspect))
    }

    /// A range over the object type of `ir_set`, bonded on its path
    pub(crate) fn new_root_rvar(&mut self, ir_set: &Set) -> LoweringResult<RVarId> {
        if !self.schema.is_object(ir_set.typ) {
            return Err(LoweringError::Internal(
                "cannot create a root range for a non-object path".to_string(),
            ));
        }

        let set_rvar = self.range_for_set(ir_set)?;
        self.put_rvar_path_bond(set_rvar, &ir_set.path_id);
        if let Some(rel) = self.tree.rvar(set_rvar).rel(&self.tree) {
            self.tree
                .rel_mut(rel)
                .info
                .value_scope
                .insert(ir_set.path_id.clone());
        }

        if let Some(rptr) = &ir_set.rptr {
            if rptr.is_inbound() {
                if let PointerRef::Pointer(ptrcls) = &rptr.ptr {
                    let ptr_info = self.schema.pointer_storage_info(*ptrcls, false)?;
                    if ptr_info.table_type == TableType::ObjectType {
                        // An inline link addressed from the far side.
                        let required = self.schema.ptr(*ptrcls).required;
                        let rref =
                            self.get_column(None, &ptr_info.column_name, Some(!required));
                        if let Some(src_path) = ir_set.path_id.src_path() {
                            self.put_rvar_path_bond(set_rvar, &src_path);
                            self.put_rvar_path_output(
                                set_rvar,
                                &src_path,
                                Aspect::Identity,
                                OutputVar::Column(rref),
                            );
                        }
                    }
                }
            }
        }

        Ok(set_rvar)
    }

    /// A root range additionally bonded on the source path; used for
    /// type-indirection steps.
    pub(crate) fn new_poly_rvar(&mut self, ir_set: &Set) -> LoweringResult<RVarId> {
        let rvar = self.new_root_rvar(ir_set)?;
        if let Some(src_path) = ir_set.path_id.src_path() {
            self.put_rvar_path_bond(rvar, &src_path);
        }
        Ok(rvar)
    }

    /// A range for the pointer step arriving at `ir_set`: the source
    /// rel itself for inline pointers, the mapping table otherwise.
    pub(crate) fn new_pointer_rvar(
        &mut self,
        ir_set: &Set,
        link_bias: bool,
        src_rvar: RVarId,
    ) -> LoweringResult<RVarId> {
        let rptr = ir_set
            .rptr
            .as_ref()
            .ok_or_else(|| LoweringError::Internal("pointer range without rptr".into()))?;

        let PointerRef::Pointer(ptrcls) = &rptr.ptr else {
            return Err(LoweringError::Internal(
                "pointer range for a synthetic step".to_string(),
            ));
        };

        let ptr_info = self.schema.pointer_storage_info(*ptrcls, link_bias)?;

        if ptr_info.table_type == TableType::ObjectType {
            self.new_inline_pointer_rvar(ir_set, src_rvar)
        } else {
            self.new_mapped_pointer_rvar(ir_set, *ptrcls)
        }
    }

    fn new_inline_pointer_rvar(
        &mut self,
        ir_set: &Set,
        src_rvar: RVarId,
    ) -> LoweringResult<RVarId> {
        let rptr = ir_set.rptr.as_ref().expect("inline pointer has rptr");

        let ptr_rel = self.tree.new_select();
        let ptr_rvar = self.rvar_for_rel(ptr_rel, true, Vec::new());
        self.tree.rel_mut(ptr_rel).info.path_id = Some(ir_set.path_id.ptr_path());

        let far_pid = if rptr.is_inbound() {
            rptr.source.path_id.clone()
        } else {
            ir_set.path_id.clone()
        };

        let far_ref = self.get_rvar_path_identity_var(src_rvar, &far_pid)?;

        self.put_rvar_path_bond(ptr_rvar, &far_pid);
        self.put_path_identity_var(ptr_rel, &far_pid, far_ref.into_expr(), false)?;

        Ok(ptr_rvar)
    }

    fn new_mapped_pointer_rvar(
        &mut self,
        ir_set: &Set,
        ptrcls: setlang_catalog::PtrId,
    ) -> LoweringResult<RVarId> {
        let rptr = ir_set.rptr.as_ref().expect("mapped pointer has rptr");
        let ptr_rvar = self.range_for_ptrcls(ptrcls, rptr.direction, true)?;

        let tgt_col = self.schema.pointer_storage_info(ptrcls, true)?.column_name;
        let required = self.schema.ptr(ptrcls).required;

        let source_ref =
            self.get_column(None, setlang_catalog::MAP_SOURCE_COL, Some(false));
        let target_ref = self.get_column(None, &tgt_col, Some(!required));

        let (near_ref, far_ref) = if rptr.direction == Direction::Inbound {
            (target_ref, source_ref)
        } else {
            (source_ref, target_ref)
        };

        let src_pid = rptr.source.path_id.clone();
        let tgt_pid = ir_set.path_id.clone();
        let ptr_pid = tgt_pid.ptr_path();

        if let Some(rel) = self.tree.rvar(ptr_rvar).rel(&self.tree) {
            self.tree.rel_mut(rel).info.path_id = Some(ptr_pid);
        }
        self.put_rvar_path_bond(ptr_rvar, &src_pid);
        self.put_rvar_path_output(
            ptr_rvar,
            &src_pid,
            Aspect::Identity,
            OutputVar::Column(near_ref.clone()),
        );
        self.put_rvar_path_output(
            ptr_rvar,
            &src_pid,
            Aspect::Value,
            OutputVar::Column(near_ref),
        );
        self.put_rvar_path_output(
            ptr_rvar,
            &tgt_pid,
            Aspect::Value,
            OutputVar::Column(far_ref.clone()),
        );

        if tgt_pid.is_objtype_path(self.schema) {
            self.put_rvar_path_bond(ptr_rvar, &tgt_pid);
            self.put_rvar_path_output(
                ptr_rvar,
                &tgt_pid,
                Aspect::Identity,
                OutputVar::Column(far_ref),
            );
        }

        Ok(ptr_rvar)
    }

    /// Wrap a freshly compiled statement in a range var, bonding
    /// scalar view sets on a transient identity first.
    pub(crate) fn new_rel_rvar(&mut self, ir_set: &Set, stmt: RelId) -> LoweringResult<RVarId> {
        if ir_set.is_scalar_view_set(self.schema) {
            self.ensure_bond_for_expr(ir_set, stmt)?;
        }
        Ok(self.rvar_for_rel(stmt, true, Vec::new()))
    }

    /// A static range over the type relation, filtered by type name;
    /// used for `__type__` over scalar sets.
    pub(crate) fn new_static_class_rvar(&mut self, ir_set: &Set) -> LoweringResult<RVarId> {
        let set_rvar = self.new_root_rvar(ir_set)?;

        let rptr = ir_set.rptr.as_ref().expect("static class ref has rptr");
        let source_name = self
            .schema
            .type_name(self.schema.material_type(rptr.source.typ))
            .to_string();

        let clsname = SqlExpr::String(source_name);
        let nameref = self.get_column(Some(set_rvar), "name", Some(false));
        let condition = new_binop(SqlExpr::Column(nameref), clsname, "=");

        let substmt = self.tree.new_select();
        self.rel_hierarchy.insert(substmt, self.ctx.rel);
        self.include_rvar(substmt, set_rvar, &ir_set.path_id)?;
        let where_clause = self.tree.rel(substmt).where_clause().cloned();
        *self.tree.rel_mut(substmt).where_clause_mut() =
            Some(extend_binop(where_clause, condition));

        self.new_rel_rvar(ir_set, substmt)
    }

    /// Join an IR set into `stmt` using a semi-join: the target range
    /// is filtered by `id IN (mapping subselect)`, so at most one row
    /// per source row is produced.
    pub(crate) fn semi_join(
        &mut self,
        stmt: RelId,
        ir_set: &Set,
        src_rvar: RVarId,
    ) -> LoweringResult<RVarId> {
        let rptr = ir_set.rptr.as_ref().expect("semi-join of a pointer step");
        let PointerRef::Pointer(ptrcls) = &rptr.ptr else {
            return Err(LoweringError::Internal(
                "semi-join of a synthetic step".to_string(),
            ));
        };
        let ptr_info = self.schema.pointer_storage_info(*ptrcls, false)?;
        let is_inline_ref = ptr_info.table_type == TableType::ObjectType;

        // Target set range.
        let set_rvar = self.new_root_rvar(ir_set)?;

        // Link range.
        let map_rvar = self.new_pointer_rvar(ir_set, false, src_rvar)?;

        // Target identity in the target range.
        let tgt_pid = if rptr.is_inbound() && is_inline_ref {
            ir_set
                .path_id
                .extend(self.schema, *ptrcls, Direction::Outbound, None)?
        } else {
            ir_set.path_id.clone()
        };

        let tgt_ref = self.get_rvar_path_identity_var(set_rvar, &tgt_pid)?;

        let cur_rel = self.ctx.rel;
        self.include_rvar(cur_rel, map_rvar, &ir_set.path_id.ptr_path())?;
        self.get_path_identity_output(cur_rel, &ir_set.path_id)?;

        let cond = new_binop(tgt_ref.into_expr(), SqlExpr::Subquery(cur_rel), "IN");
        let where_clause = self.tree.rel(stmt).where_clause().cloned();
        *self.tree.rel_mut(stmt).where_clause_mut() = Some(extend_binop(where_clause, cond));

        Ok(set_rvar)
    }

    /// Ensure a source-aspect range exists for `ir_set` in `stmt`
    pub(crate) fn ensure_source_rvar(
        &mut self,
        ir_set: &Set,
        stmt: RelId,
    ) -> LoweringResult<RVarId> {
        if let Some(rvar) = self.maybe_get_path_rvar(stmt, &ir_set.path_id, Aspect::Source)? {
            return Ok(rvar);
        }

        let scope_stmt = self
            .maybe_get_scope_stmt(&ir_set.path_id)
            .unwrap_or(self.ctx.rel);
        let rvar = self.new_root_rvar(ir_set)?;
        self.include_rvar(scope_stmt, rvar, &ir_set.path_id)?;
        Ok(rvar)
    }

    /// Give an expression-valued set a join bond; object paths carry
    /// inherent identity and need none.
    pub(crate) fn ensure_bond_for_expr(
        &mut self,
        ir_set: &Set,
        stmt: RelId,
    ) -> LoweringResult<()> {
        if ir_set.path_id.is_objtype_path(self.schema) {
            return Ok(());
        }
        self.ensure_transient_identity_for_set(ir_set, stmt)
    }

    pub(crate) fn ensure_transient_identity_for_set(
        &mut self,
        ir_set: &Set,
        stmt: RelId,
    ) -> LoweringResult<()> {
        let id_expr = SqlExpr::FuncCall(
            FuncCall::new(["row_number"], Vec::new()).with_over(WindowDef::default()),
        );

        self.put_path_identity_var(stmt, &ir_set.path_id, id_expr, true)?;
        self.put_path_bond(stmt, &ir_set.path_id);
        Ok(())
    }

    /// The scope-tree node designated by `ir_set`, if any
    pub(crate) fn get_scope(&self, ir_set: &Set) -> Option<setlang_ir::NodeId> {
        let unique_id = ir_set.path_scope_id?;
        let root = self.scope_tree.root_of(self.ctx.scope_node);
        self.scope_tree.find_by_unique_id(root, unique_id)
    }

    /// Enter the scope of `ir_set`: route its bound paths to `stmt` and
    /// mask everything that is invisible from the outer fence.
    pub(crate) fn update_scope(&mut self, ir_set: &Set, stmt: RelId) {
        let Some(scope_node) = self.get_scope(ir_set) else {
            return;
        };

        self.ctx.scope_node = scope_node;

        for child in self.scope_tree.path_children(scope_node) {
            if let Some(path_id) = self.scope_tree.node(child).path_id.clone() {
                self.ctx.path_scope.insert(path_id, stmt);
            }
        }

        let iter_path_id = match &ir_set.expr {
            Some(Expr::Stmt(stmt_node)) => {
                stmt_node.iterator().map(|iter| iter.path_id.clone())
            }
            _ => None,
        };

        let parent_scope = self.scope_tree.parent(scope_node);
        for child_path in self.scope_tree.get_all_paths(scope_node) {
            let visible_outside = parent_scope
                .is_some_and(|p| self.scope_tree.is_visible(p, &child_path));
            if !visible_outside && Some(&child_path) != iter_path_id.as_ref() {
                trace!(path = %child_path.pformat(), "masking scope-local path");
                self.tree
                    .rel_mut(stmt)
                    .info
                    .path_id_mask
                    .insert(child_path);
            }
        }
    }

    /// The statement a path is routed to by the scope tree
    pub(crate) fn get_scope_stmt(&self, path_id: &PathId) -> LoweringResult<RelId> {
        if let Some(&stmt) = self.ctx.path_scope.get(path_id) {
            return Ok(stmt);
        }
        if path_id.is_ptr_path() {
            if let Some(&stmt) = self.ctx.path_scope.get(&path_id.tgt_path()) {
                return Ok(stmt);
            }
        }
        Err(LoweringError::lookup(format!(
            "scope statement for {path_id}"
        )))
    }

    pub(crate) fn maybe_get_scope_stmt(&self, path_id: &PathId) -> Option<RelId> {
        self.get_scope_stmt(path_id).ok()
    }

    /// Join `right_rvar` into `query` on the identity of every path in
    /// its path scope; CROSS JOIN when no bond matches.
    pub(crate) fn rel_join(&mut self, query: RelId, right_rvar: RVarId) -> LoweringResult<()> {
        let mut condition: Option<SqlExpr> = None;

        let path_scope: Vec<PathId> = self
            .tree
            .rvar(right_rvar)
            .rel(&self.tree)
            .map(|rel| self.tree.rel(rel).info.path_scope.iter().cloned().collect())
            .unwrap_or_default();

        for path_id in path_scope {
            let mut lref =
                self.maybe_get_path_var_in_stmt(query, &path_id, Aspect::Identity)?;
            if lref.is_none() {
                lref = self.maybe_get_path_var_in_stmt(query, &path_id, Aspect::Value)?;
            }
            let Some(lref) = lref else {
                continue;
            };

            let rref = self
                .get_rvar_path_identity_var(right_rvar, &path_id)?
                .into_expr();

            let path_cond = join_condition(&lref, &rref, &self.tree);
            condition = Some(extend_binop(condition, path_cond));
        }

        let join_kind = if condition.is_none() {
            JoinKind::Cross
        } else {
            JoinKind::Inner
        };

        if self.tree.rel(query).from_clause().is_empty() {
            self.tree
                .rel_mut(query)
                .from_clause_mut()
                .push(FromItem::RVar(right_rvar));
            if let Some(condition) = condition {
                let where_clause = self.tree.rel(query).where_clause().cloned();
                *self.tree.rel_mut(query).where_clause_mut() =
                    Some(extend_binop(where_clause, condition));
            }
        } else {
            let from = self.tree.rel_mut(query).from_clause_mut();
            let larg = from.remove(0);
            from.insert(
                0,
                FromItem::Join(Box::new(JoinExpr {
                    kind: join_kind,
                    larg,
                    rarg: FromItem::RVar(right_rvar),
                    quals: condition,
                })),
            );
        }

        let rvar_distinct = self
            .tree
            .rvar(right_rvar)
            .rel(&self.tree)
            .is_some_and(|rel| self.tree.rel(rel).info.is_distinct);
        if !rvar_distinct {
            self.tree.rel_mut(query).info.is_distinct = false;
        }

        Ok(())
    }
}
