// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Statement path contexts
//!
//! The resolution of `(PathId, Aspect)` pairs to output variables and
//! range variables inside relations.  [`Compiler::get_path_var`] is the
//! central algorithm: it walks from a relation to the range var that
//! supplies a path, descending through set-operation arms and base
//! relations, caching every resolution in the relation's
//! `path_namespace`.
//!
//! `path_namespace` holds arbitrary expressions (computed values land
//! there too); `path_outputs` holds genuine target-list outputs only.
//! Every raising accessor has a `maybe_*` variant that converts a
//! lookup miss into `None`.

use indexmap::IndexMap;

use setlang_catalog::{Direction, PointerStorageInfo, TableType};
use setlang_ir::{PathId, PointerRef, get_id_path_id};
use setlang_sqlast::{
    Aspect, ColumnRef, OutputVar, RVarId, RVarKind, RelId, ResTarget, SqlExpr, TupleElement,
    TupleVar,
};

use crate::astutils::{same_expr, strip_output_var};
use crate::compiler::Compiler;
use crate::error::{LoweringError, LoweringResult, absorb_lookup};

/// Apply an outer-to-inner path rewrite map
pub fn map_path_id(path_id: &PathId, path_id_map: &IndexMap<PathId, PathId>) -> PathId {
    for (outer_id, inner_id) in path_id_map {
        let new_path_id = path_id.replace_prefix(outer_id, inner_id);
        if &new_path_id != path_id {
            return new_path_id;
        }
    }
    path_id.clone()
}

/// Apply an inner-to-outer path rewrite map
pub fn reverse_map_path_id(
    path_id: &PathId,
    path_id_map: &IndexMap<PathId, PathId>,
) -> PathId {
    for (outer_id, inner_id) in path_id_map {
        let new_path_id = path_id.replace_prefix(inner_id, outer_id);
        if &new_path_id != path_id {
            return new_path_id;
        }
    }
    path_id.clone()
}

impl Compiler<'_> {
    /// Return an expression carrying `path_id` under `aspect` inside
    /// `rel`, resolving and caching it if necessary.
    pub fn get_path_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<SqlExpr> {
        let rel = self.tree.unwrap_cte(rel);

        let path_id = if self.tree.rel(rel).query.view_path_id_map.is_empty() {
            path_id.clone()
        } else {
            map_path_id(path_id, &self.tree.rel(rel).query.view_path_id_map)
        };

        if let Some(var) = self
            .tree
            .rel(rel)
            .query
            .path_namespace
            .get(&(path_id.clone(), aspect))
        {
            return Ok(var.clone());
        }

        // Resolve the trailing pointer's storage, where it has any.
        let rptr = path_id.rptr().cloned();
        let mut ptr_info: Option<PointerStorageInfo> = None;
        let mut is_inbound = false;
        let mut src_path_id: Option<PathId> = None;

        if let Some(step) = &rptr {
            is_inbound = step.direction == Direction::Inbound;
            if let PointerRef::Pointer(p) = &step.ptr {
                ptr_info = Some(self.schema.pointer_storage_info(*p, false)?);
            }

            if is_inbound {
                src_path_id = Some(path_id.clone());
            } else {
                src_path_id = path_id.src_path();

                if let PointerRef::Pointer(p) = &step.ptr {
                    // Value references to the id pointer are identical
                    // to the identity of the source.
                    if self.schema.ptr(*p).is_id && aspect == Aspect::Value {
                        if let Some(src) = &src_path_id {
                            if let Some(var) = self
                                .tree
                                .rel(rel)
                                .query
                                .path_namespace
                                .get(&(src.clone(), Aspect::Identity))
                            {
                                return Ok(var.clone());
                            }
                        }
                    }
                }

                // The default object value is its identity.  The value
                // may be an explicit tuple if the set had a shape.
                if path_id.is_objtype_path(self.schema) && aspect == Aspect::Value {
                    if let Some(var) = self
                        .tree
                        .rel(rel)
                        .query
                        .path_namespace
                        .get(&(path_id.clone(), Aspect::Identity))
                    {
                        return Ok(var.clone());
                    }
                }
            }
        }

        if self.tree.is_set_op_query(rel) {
            return self.get_path_var_in_set_op(rel, &path_id, aspect);
        }

        match &rptr {
            None => {
                if path_id.len() == 1 {
                    // A scalar set derived from an expression.
                    src_path_id = Some(path_id.clone());
                }
            }
            Some(step) => {
                if step.is_linkprop {
                    let inline_prop = ptr_info
                        .as_ref()
                        .is_some_and(|i| i.table_type != TableType::Link);
                    if inline_prop && !is_inbound {
                        // A link prop stored in the source rel; step
                        // back to the link source.
                        src_path_id = Some(path_id.get_prefix(path_id.len() - 4)?);
                    }
                } else if let Some(info) = &ptr_info {
                    if info.table_type != TableType::ObjectType && !is_inbound {
                        // The ref lives in the mapping rvar.
                        src_path_id = Some(path_id.ptr_path());
                    }
                }
            }
        }

        let mut rel_rvar = self.maybe_get_path_rvar_local(rel, &path_id, aspect);

        if rel_rvar.is_none() {
            let src_path_id = src_path_id.ok_or_else(|| {
                LoweringError::lookup(format!("source path for {path_id}"))
            })?;

            let src_aspect = if src_path_id.is_objtype_path(self.schema)
                && aspect == Aspect::Identity
            {
                Aspect::Value
            } else {
                aspect
            };

            rel_rvar = if src_path_id.is_tuple_indirection_path() {
                match self.maybe_get_path_rvar_local(rel, &src_path_id, src_aspect) {
                    Some(rvar) => Some(rvar),
                    None => {
                        let outer = src_path_id.src_path().ok_or_else(|| {
                            LoweringError::lookup(format!(
                                "tuple source path for {src_path_id}"
                            ))
                        })?;
                        Some(self.get_path_rvar_local(rel, &outer, src_aspect)?)
                    }
                }
            } else {
                Some(self.get_path_rvar_local(rel, &src_path_id, src_aspect)?)
            };
        }

        let rel_rvar = rel_rvar.expect("rel_rvar resolved above");

        let source_rel = self
            .tree
            .rvar(rel_rvar)
            .rel(&self.tree)
            .ok_or_else(|| LoweringError::lookup(format!("relation behind {path_id}")))?;

        let mut drilldown_path_id =
            map_path_id(&path_id, &self.tree.rel(rel).query.view_path_id_map);

        if self.env.root_rels.contains(&source_rel)
            && self.tree.rel(source_rel).info.path_scope.len() == 1
        {
            let outer_path_id = if !drilldown_path_id.is_objtype_path(self.schema)
                && rptr.is_some()
            {
                drilldown_path_id
                    .src_path()
                    .unwrap_or_else(|| drilldown_path_id.clone())
            } else {
                drilldown_path_id.clone()
            };

            let inner = self
                .tree
                .rel(source_rel)
                .info
                .path_scope
                .first()
                .cloned()
                .expect("single-path root rel");
            let mut path_id_map = IndexMap::new();
            path_id_map.insert(outer_path_id, inner);
            drilldown_path_id = map_path_id(&drilldown_path_id, &path_id_map);
        }

        let outvar =
            self.get_path_output(source_rel, &drilldown_path_id, aspect, ptr_info.as_ref())?;

        let is_relation_rvar = matches!(&self.tree.rvar(rel_rvar).kind, RVarKind::Relation(r)
            if self.tree.rel(self.tree.unwrap_cte(*r)).is_base_relation());
        if is_relation_rvar && aspect != Aspect::Identity && aspect != Aspect::Value {
            return Err(LoweringError::lookup(format!(
                "{} {:?} is not defined in the relation",
                path_id, aspect
            )));
        }

        let fieldref = self
            .get_rvar_output_var(Some(rel_rvar), &outvar)
            .into_expr();
        self.put_path_var(rel, &path_id, fieldref.clone(), aspect, false)?;
        Ok(fieldref)
    }

    /// Resolve a path var over a UNION by descending into each arm.
    /// Arms that cannot produce the output emit a NULL placeholder and
    /// flip the resulting bond to `optional`, which is what makes
    /// heterogeneous UNIONs joinable.
    fn get_path_var_in_set_op(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<SqlExpr> {
        let mut first: Option<OutputVar> = None;
        let mut optional = false;
        let mut all_null = true;
        let mut nullable = false;

        for arm in self.tree.queries_in_set(rel) {
            let (colref, is_null) = self.get_path_output_or_null(arm, path_id, aspect)?;
            if colref.nullable() {
                nullable = true;
            }
            if first.is_none() {
                first = Some(colref);
            }
            if is_null {
                optional = true;
            } else {
                all_null = false;
            }
        }

        let first = first.ok_or_else(|| {
            LoweringError::lookup(format!("refs for path {path_id} {aspect:?}"))
        })?;

        if all_null {
            return Err(LoweringError::lookup(format!(
                "refs for path {path_id} {aspect:?}"
            )));
        }

        let fieldref = self
            .get_rvar_fieldref(None, &first, optional, optional || nullable)
            .into_expr();
        self.put_path_var(rel, path_id, fieldref.clone(), aspect, false)?;
        Ok(fieldref)
    }

    pub fn get_path_identity_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
    ) -> LoweringResult<SqlExpr> {
        self.get_path_var(rel, path_id, Aspect::Identity)
    }

    pub fn get_path_value_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
    ) -> LoweringResult<SqlExpr> {
        self.get_path_var(rel, path_id, Aspect::Value)
    }

    pub fn maybe_get_path_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<Option<SqlExpr>> {
        absorb_lookup(self.get_path_var(rel, path_id, aspect))
    }

    pub fn maybe_get_path_identity_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
    ) -> LoweringResult<Option<SqlExpr>> {
        absorb_lookup(self.get_path_var(rel, path_id, Aspect::Identity))
    }

    pub fn maybe_get_path_value_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
    ) -> LoweringResult<Option<SqlExpr>> {
        absorb_lookup(self.get_path_var(rel, path_id, Aspect::Value))
    }

    pub fn maybe_get_path_serialized_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
    ) -> LoweringResult<Option<SqlExpr>> {
        absorb_lookup(self.get_path_var(rel, path_id, Aspect::Serialized))
    }

    /// Record a path binding; duplicate inserts without `force` are an
    /// error.
    pub fn put_path_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        var: SqlExpr,
        aspect: Aspect,
        force: bool,
    ) -> LoweringResult<()> {
        let namespace = &mut self.tree.rel_mut(rel).query.path_namespace;
        let key = (path_id.clone(), aspect);
        if namespace.contains_key(&key) && !force {
            return Err(LoweringError::DuplicatePathVar {
                aspect: format!("{aspect:?}"),
                path: path_id.pformat(),
            });
        }
        namespace.insert(key, var);
        Ok(())
    }

    pub fn put_path_var_if_not_exists(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        var: SqlExpr,
        aspect: Aspect,
    ) {
        let namespace = &mut self.tree.rel_mut(rel).query.path_namespace;
        namespace.entry((path_id.clone(), aspect)).or_insert(var);
    }

    pub fn put_path_identity_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        var: SqlExpr,
        force: bool,
    ) -> LoweringResult<()> {
        self.put_path_var(rel, path_id, var, Aspect::Identity, force)
    }

    pub fn put_path_value_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        var: SqlExpr,
        force: bool,
    ) -> LoweringResult<()> {
        self.put_path_var(rel, path_id, var, Aspect::Value, force)
    }

    pub fn put_path_value_var_if_not_exists(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        var: SqlExpr,
    ) {
        self.put_path_var_if_not_exists(rel, path_id, var, Aspect::Value);
    }

    pub fn put_path_serialized_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        var: SqlExpr,
        force: bool,
    ) -> LoweringResult<()> {
        self.put_path_var(rel, path_id, var, Aspect::Serialized, force)
    }

    /// Mark `path_id` as always produced by `stmt`; bonds participate
    /// in JOIN conditions.
    pub fn put_path_bond(&mut self, stmt: RelId, path_id: &PathId) {
        self.tree
            .rel_mut(stmt)
            .info
            .path_scope
            .insert(path_id.clone());
    }

    /// Bond on the relation behind a range var
    pub fn put_rvar_path_bond(&mut self, rvar: RVarId, path_id: &PathId) {
        if let Some(rel) = self.tree.rvar(rvar).rel(&self.tree) {
            self.put_path_bond(rel, path_id);
        }
    }

    /// The `{hint}_{aspect}` output alias of a path
    pub fn get_path_output_alias(&mut self, path_id: &PathId, aspect: Aspect) -> String {
        let alias_base = match path_id.rptr() {
            Some(step) => step.shortname().to_string(),
            None => match path_id.target() {
                Some(t) => {
                    let name = self.schema.type_name(t);
                    if self.schema.is_array(t) {
                        "array".to_string()
                    } else if self.schema.is_tuple(t) {
                        format!("tuple_{}", name.shortname())
                    } else {
                        name.shortname().to_string()
                    }
                }
                None => "v".to_string(),
            },
        };

        let aspect_tag = match aspect {
            Aspect::Identity => "identity",
            Aspect::Value => "value",
            Aspect::Serialized => "serialized",
            Aspect::Source => "source",
        };

        self.env.aliases.get(&format!("{alias_base}_{aspect_tag}"))
    }

    /// The output of `path_id` as supplied by the given range var,
    /// qualified into the consuming query.
    pub fn get_rvar_path_var(
        &mut self,
        rvar: RVarId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<OutputVar> {
        let rel = self
            .tree
            .rvar(rvar)
            .rel(&self.tree)
            .ok_or_else(|| LoweringError::lookup(format!("relation behind {path_id}")))?;

        let outvar = if let Some(var) = self
            .tree
            .rel(rel)
            .info
            .path_outputs
            .get(&(path_id.clone(), aspect))
        {
            var.clone()
        } else if self.tree.rel(rel).is_base_relation() {
            self.get_rel_path_output(rel, path_id, aspect, None)?
        } else {
            // The range is another query.
            self.get_path_output(rel, path_id, aspect, None)?
        };

        Ok(self.get_rvar_output_var(Some(rvar), &outvar))
    }

    pub fn put_rvar_path_output(
        &mut self,
        rvar: RVarId,
        path_id: &PathId,
        aspect: Aspect,
        var: OutputVar,
    ) {
        if let Some(rel) = self.tree.rvar(rvar).rel(&self.tree) {
            self.tree
                .rel_mut(rel)
                .info
                .path_outputs
                .insert((path_id.clone(), aspect), var);
        }
    }

    pub fn get_rvar_path_identity_var(
        &mut self,
        rvar: RVarId,
        path_id: &PathId,
    ) -> LoweringResult<OutputVar> {
        self.get_rvar_path_var(rvar, path_id, Aspect::Identity)
    }

    pub fn maybe_get_rvar_path_identity_var(
        &mut self,
        rvar: RVarId,
        path_id: &PathId,
    ) -> LoweringResult<Option<OutputVar>> {
        absorb_lookup(self.get_rvar_path_var(rvar, path_id, Aspect::Identity))
    }

    pub fn get_rvar_path_value_var(
        &mut self,
        rvar: RVarId,
        path_id: &PathId,
    ) -> LoweringResult<OutputVar> {
        self.get_rvar_path_var(rvar, path_id, Aspect::Value)
    }

    pub fn maybe_get_rvar_path_value_var(
        &mut self,
        rvar: RVarId,
        path_id: &PathId,
    ) -> LoweringResult<Option<OutputVar>> {
        absorb_lookup(self.get_rvar_path_var(rvar, path_id, Aspect::Value))
    }

    /// Flatten an output var into the columns backing it on the given
    /// range var; used to build DISTINCT ON clauses.
    pub fn get_rvar_output_var_as_col_list(
        &mut self,
        rvar: RVarId,
        outvar: &OutputVar,
        aspect: Aspect,
    ) -> LoweringResult<Vec<ColumnRef>> {
        match outvar {
            OutputVar::Column(col) => Ok(vec![col.clone()]),
            OutputVar::Tuple(tuple) => {
                let mut cols = Vec::new();
                for el in &tuple.elements {
                    let var = self.get_rvar_path_var(rvar, &el.path_id, aspect)?;
                    cols.extend(self.get_rvar_output_var_as_col_list(rvar, &var, aspect)?);
                }
                Ok(cols)
            }
        }
    }

    /// Register `rvar` as the supplier of `path_id`'s aspect in `stmt`.
    ///
    /// Masked paths normally stay hidden, but when the masked path is
    /// the main path of a set it must still surface one level, so the
    /// mask is propagated to the immediate parent query.
    pub fn put_path_rvar(
        &mut self,
        stmt: RelId,
        path_id: &PathId,
        rvar: RVarId,
        aspect: Aspect,
    ) {
        self.tree
            .rel_mut(stmt)
            .query
            .path_rvar_map
            .insert((path_id.clone(), aspect), rvar);

        let masked = self
            .tree
            .rvar(rvar)
            .rel(&self.tree)
            .is_some_and(|rel| self.tree.rel(rel).info.path_id_mask.contains(path_id));
        if masked {
            self.tree
                .rel_mut(stmt)
                .info
                .path_id_mask
                .insert(path_id.clone());
        }
    }

    pub fn put_path_value_rvar(&mut self, stmt: RelId, path_id: &PathId, rvar: RVarId) {
        self.put_path_rvar(stmt, path_id, rvar, Aspect::Value);
    }

    pub fn put_path_rvar_if_not_exists(
        &mut self,
        stmt: RelId,
        path_id: &PathId,
        rvar: RVarId,
        aspect: Aspect,
    ) {
        if !self
            .tree
            .rel(stmt)
            .query
            .path_rvar_map
            .contains_key(&(path_id.clone(), aspect))
        {
            self.put_path_rvar(stmt, path_id, rvar, aspect);
        }
    }

    /// Whether `rvar` is registered anywhere in `stmt`'s path-rvar map
    pub fn has_rvar_local(&self, stmt: RelId, rvar: RVarId) -> bool {
        self.tree
            .rel(stmt)
            .query
            .path_rvar_map
            .values()
            .any(|&r| r == rvar)
    }

    /// The range var registered for `path_id` in this statement only
    /// (no hierarchy search); identity falls back to value.
    pub fn get_path_rvar_local(
        &self,
        stmt: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<RVarId> {
        let map = &self.tree.rel(stmt).query.path_rvar_map;
        if let Some(&rvar) = map.get(&(path_id.clone(), aspect)) {
            return Ok(rvar);
        }
        if aspect == Aspect::Identity {
            if let Some(&rvar) = map.get(&(path_id.clone(), Aspect::Value)) {
                return Ok(rvar);
            }
        }
        Err(LoweringError::lookup(format!(
            "range var for {path_id} {aspect:?}"
        )))
    }

    pub fn maybe_get_path_rvar_local(
        &self,
        stmt: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> Option<RVarId> {
        self.get_path_rvar_local(stmt, path_id, aspect).ok()
    }

    fn find_path_output(&self, rel: RelId, reference: &SqlExpr) -> Option<OutputVar> {
        let node = self.tree.rel(rel);
        for (key, other_ref) in &node.query.path_namespace {
            if same_expr(other_ref, reference) {
                if let Some(output) = node.info.path_outputs.get(key) {
                    return Some(output.clone());
                }
            }
        }
        None
    }

    /// Return an output of `rel`'s target list carrying `path_id` under
    /// `aspect`, appending a projection if needed.  Requests for the
    /// same `(PathId, aspect)` pair return the same target entry.
    pub fn get_path_output(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        aspect: Aspect,
        ptr_info: Option<&PointerStorageInfo>,
    ) -> LoweringResult<OutputVar> {
        let path_id = if self.tree.rel(rel).query.view_path_id_map.is_empty() {
            path_id.clone()
        } else {
            map_path_id(path_id, &self.tree.rel(rel).query.view_path_id_map)
        };

        if let Some(output) = self
            .tree
            .rel(rel)
            .info
            .path_outputs
            .get(&(path_id.clone(), aspect))
        {
            return Ok(output.clone());
        }

        if self.tree.rel(rel).is_base_relation() {
            return self.get_rel_path_output(rel, &path_id, aspect, ptr_info);
        }

        let reference = self.get_path_var(rel, &path_id, aspect)?;

        if let Some(other_output) = self.find_path_output(rel, &reference) {
            self.tree
                .rel_mut(rel)
                .info
                .path_outputs
                .insert((path_id, aspect), other_output.clone());
            return Ok(other_output);
        }

        let result = match &reference {
            SqlExpr::Tuple(tuple) => {
                let mut elements = Vec::new();
                for el in &tuple.elements {
                    let el_path_id = reverse_map_path_id(
                        &el.path_id,
                        &self.tree.rel(rel).query.view_path_id_map,
                    );
                    let element = self.get_path_output(rel, &el_path_id, aspect, None)?;
                    elements.push(TupleElement::new(el_path_id).with_var(element));
                }
                OutputVar::Tuple(TupleVar::new(elements, tuple.named))
            }

            SqlExpr::Column(col) if self.tree.is_set_op_query(rel) => {
                strip_output_var(&OutputVar::Column(col.clone()), None, None)
            }

            reference => {
                let alias = self.get_path_output_alias(&path_id, aspect);

                let (nullable, optional) = match reference {
                    SqlExpr::Column(col) => (col.nullable, col.optional),
                    _ => (self.tree.rel(rel).query.nullable, false),
                };

                self.tree
                    .rel_mut(rel)
                    .target_list_mut()
                    .push(ResTarget::named(alias.clone(), reference.clone()));

                OutputVar::Column(
                    ColumnRef::new([alias])
                        .with_nullable(nullable)
                        .with_optional(optional),
                )
            }
        };

        self.tree
            .rel_mut(rel)
            .info
            .path_outputs
            .insert((path_id, aspect), result.clone());
        Ok(result)
    }

    /// Resolve a path output on a base relation from the trailing
    /// pointer's storage.
    pub(crate) fn get_rel_path_output(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        aspect: Aspect,
        ptr_info: Option<&PointerStorageInfo>,
    ) -> LoweringResult<OutputVar> {
        let mut path_id = path_id.clone();
        let mut aspect = aspect;

        if path_id.is_objtype_path(self.schema) {
            if aspect == Aspect::Value {
                aspect = Aspect::Identity;
            }
            if aspect != Aspect::Identity {
                return Err(LoweringError::lookup(format!(
                    "non-scalar path {path_id} {aspect:?}"
                )));
            }

            let rel_path = self.tree.rel(rel).info.path_id.clone();
            let addresses_rel = match &rel_path {
                Some(rel_path_id) => {
                    path_id == *rel_path_id
                        || (rel_path_id.is_type_indirection_path()
                            && rel_path_id.src_path().as_ref() == Some(&path_id))
                }
                None => false,
            };
            if addresses_rel {
                path_id =
                    get_id_path_id(self.schema, &path_id).map_err(LoweringError::from)?;
            }
        } else if aspect == Aspect::Identity {
            return Err(LoweringError::lookup(format!(
                "identity of scalar path {path_id}"
            )));
        }

        if path_id.rptr_dir() != Some(Direction::Outbound) {
            return Err(LoweringError::lookup(format!(
                "{path_id} is an inbound pointer and cannot be resolved on a base relation"
            )));
        }

        let step = path_id
            .rptr()
            .cloned()
            .ok_or_else(|| LoweringError::lookup(format!("trailing pointer of {path_id}")))?;

        let PointerRef::Pointer(ptrcls) = step.ptr else {
            return Err(LoweringError::lookup(format!(
                "storage of synthetic pointer in {path_id}"
            )));
        };

        let info = match ptr_info {
            Some(info) => info.clone(),
            None => self.schema.pointer_storage_info(ptrcls, false)?,
        };

        let required = self.schema.ptr(ptrcls).required;
        let rel_nullable = self.tree.rel(rel).query.nullable;
        let result = OutputVar::Column(
            ColumnRef::new([info.column_name]).with_nullable(rel_nullable || !required),
        );

        self.tree
            .rel_mut(rel)
            .info
            .path_outputs
            .insert((path_id, aspect), result.clone());
        Ok(result)
    }

    pub fn get_path_identity_output(
        &mut self,
        rel: RelId,
        path_id: &PathId,
    ) -> LoweringResult<OutputVar> {
        self.get_path_output(rel, path_id, Aspect::Identity, None)
    }

    pub fn get_path_value_output(
        &mut self,
        rel: RelId,
        path_id: &PathId,
    ) -> LoweringResult<OutputVar> {
        self.get_path_output(rel, path_id, Aspect::Value, None)
    }

    /// The serialized var when present, the value var otherwise
    pub fn get_path_serialized_or_value_var(
        &mut self,
        rel: RelId,
        path_id: &PathId,
    ) -> LoweringResult<SqlExpr> {
        match self.maybe_get_path_serialized_var(rel, path_id)? {
            Some(var) => Ok(var),
            None => self.get_path_value_var(rel, path_id),
        }
    }

    /// Serialized output is requested lazily and derived from the value
    /// var; deliberately non-recursive, unlike
    /// [`Compiler::get_path_output`].
    pub fn get_path_serialized_output(
        &mut self,
        rel: RelId,
        path_id: &PathId,
    ) -> LoweringResult<OutputVar> {
        let aspect = Aspect::Serialized;

        if let Some(output) = self
            .tree
            .rel(rel)
            .info
            .path_outputs
            .get(&(path_id.clone(), aspect))
        {
            return Ok(output.clone());
        }

        let reference = self.get_path_serialized_or_value_var(rel, path_id)?;
        let nullable = reference.nullable(&self.tree);

        let serialized = self.serialize_expr(reference, path_id)?;
        let alias = self.get_path_output_alias(path_id, aspect);

        self.tree
            .rel_mut(rel)
            .target_list_mut()
            .push(ResTarget::named(alias.clone(), serialized));

        let result = OutputVar::Column(ColumnRef::new([alias]).with_nullable(nullable));
        self.tree
            .rel_mut(rel)
            .info
            .path_outputs
            .insert((path_id.clone(), aspect), result.clone());
        Ok(result)
    }

    /// Resolve a path output, producing a NULL placeholder projection
    /// when the arm cannot supply it; returns the placeholder flag.
    pub fn get_path_output_or_null(
        &mut self,
        rel: RelId,
        path_id: &PathId,
        aspect: Aspect,
    ) -> LoweringResult<(OutputVar, bool)> {
        match absorb_lookup(self.get_path_output(rel, path_id, aspect, None))? {
            Some(output) => Ok((output, false)),
            None => {
                let alias = self.env.aliases.get("null");
                self.tree
                    .rel_mut(rel)
                    .target_list_mut()
                    .push(ResTarget::named(alias.clone(), SqlExpr::Null));
                let reference =
                    OutputVar::Column(ColumnRef::new([alias]).with_nullable(true));
                Ok((reference, true))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::context::CompileOptions;
    use setlang_catalog::{Schema, SchemaBuilder};
    use setlang_ir::ScopeTree;

    fn schema() -> Schema {
        let mut builder = SchemaBuilder::new();
        let str_t = builder.scalar("std::str");
        let user = builder.object_type("default::User");
        builder.pointer(user, "name", str_t).required();
        builder.finish()
    }

    fn user_path(schema: &Schema) -> PathId {
        PathId::from_type(schema, schema.get("default::User").unwrap())
    }

    #[test]
    fn test_put_get_path_var_roundtrip() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());
        let rel = compiler.tree.new_select();
        let path = user_path(&schema);

        let var = SqlExpr::Column(ColumnRef::new(["u", "id"]));
        compiler
            .put_path_var(rel, &path, var.clone(), Aspect::Value, false)
            .unwrap();

        assert_eq!(
            compiler.get_path_var(rel, &path, Aspect::Value).unwrap(),
            var
        );
    }

    #[test]
    fn test_duplicate_put_requires_force() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());
        let rel = compiler.tree.new_select();
        let path = user_path(&schema);

        let var = SqlExpr::Column(ColumnRef::new(["u", "id"]));
        compiler
            .put_path_var(rel, &path, var.clone(), Aspect::Value, false)
            .unwrap();

        let dup = compiler.put_path_var(rel, &path, var.clone(), Aspect::Value, false);
        assert!(matches!(dup, Err(LoweringError::DuplicatePathVar { .. })));

        // With force the binding is replaced.
        compiler
            .put_path_var(rel, &path, var, Aspect::Value, true)
            .unwrap();
    }

    #[test]
    fn test_path_output_is_deduplicated() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());
        let rel = compiler.tree.new_select();
        let path = user_path(&schema);

        let var = SqlExpr::Column(ColumnRef::new(["u", "id"]));
        compiler
            .put_path_var(rel, &path, var, Aspect::Value, false)
            .unwrap();

        let first = compiler
            .get_path_output(rel, &path, Aspect::Value, None)
            .unwrap();
        let second = compiler
            .get_path_output(rel, &path, Aspect::Value, None)
            .unwrap();

        // Two requests for the same (path, aspect) return the same
        // target entry, and only one projection is emitted.
        assert_eq!(first, second);
        assert_eq!(compiler.tree.rel(rel).target_list().len(), 1);
    }

    #[test]
    fn test_mask_propagates_through_put_path_rvar() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());
        let path = user_path(&schema);

        let inner = compiler.tree.new_select();
        compiler
            .tree
            .rel_mut(inner)
            .info
            .path_id_mask
            .insert(path.clone());
        let rvar = compiler.rvar_for_rel(inner, false, Vec::new());

        let outer = compiler.tree.new_select();
        compiler.put_path_rvar(outer, &path, rvar, Aspect::Value);

        assert!(compiler.tree.rel(outer).info.path_id_mask.contains(&path));
    }

    #[test]
    fn test_output_or_null_emits_placeholder() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());
        let rel = compiler.tree.new_select();
        let path = user_path(&schema);

        let (reference, is_null) = compiler
            .get_path_output_or_null(rel, &path, Aspect::Value)
            .unwrap();

        assert!(is_null);
        assert!(reference.nullable());
        // The placeholder projects a NULL constant.
        assert!(matches!(
            compiler.tree.rel(rel).target_list()[0].val,
            SqlExpr::Null
        ));
    }

    #[test]
    fn test_map_path_id_replaces_first_match() {
        let schema = schema();
        let outer = user_path(&schema);
        let inner = outer.merge_namespace([setlang_ir::Namespace::hard("inner")]);

        let mut map = IndexMap::new();
        map.insert(outer.clone(), inner.clone());

        assert_eq!(map_path_id(&outer, &map), inner);
        assert_eq!(reverse_map_path_id(&inner, &map), outer);
    }
}
