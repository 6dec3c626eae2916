// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Ranges over schema objects
//!
//! Construction of FROM-clause ranges for object types and pointers:
//! base table ranges, virtual union types as UNION ALL of their
//! children, DML overlay application, pointer mapping-table ranges, and
//! the generic rvar/column helpers.

use setlang_catalog::{Direction, PtrId, TypeId};
use setlang_ir::{PathId, Set};
use setlang_sqlast::{
    Alias, Aspect, ColumnRef, FromItem, OutputVar, RVarId, RVarKind, RangeVar, RelId, RelKind,
    ResTarget, SetOperation, SqlExpr,
};

use crate::compiler::Compiler;
use crate::context::OverlayOp;
use crate::error::{LoweringError, LoweringResult};

impl Compiler<'_> {
    /// A range over the concrete table of an object type, with DML
    /// overlays applied.
    pub(crate) fn range_for_material_objtype(
        &mut self,
        objtype: TypeId,
        path_id: &PathId,
        include_overlays: bool,
    ) -> LoweringResult<RVarId> {
        let material = self.schema.material_type(objtype);
        let type_name = self.schema.type_name(material).clone();
        let table = self.schema.object_table(material)?;

        let relation =
            self.tree
                .new_relation(table.schema, table.name, Some(path_id.clone()));
        let alias = self.env.aliases.get(type_name.shortname());
        let rvar = self.tree.add_rvar(RangeVar {
            kind: RVarKind::Relation(relation),
            alias: Alias::new(alias),
            lateral: false,
            nullable: false,
        });

        let overlays = self.env.rel_overlays.get(&type_name.to_string()).cloned();
        let Some(overlays) = overlays.filter(|o| include_overlays && !o.is_empty()) else {
            return Ok(rvar);
        };

        let mut set_ops: Vec<(OverlayOp, RelId, RVarId)> = Vec::new();

        let base_qry = self.wrap_rvar_for_overlay(rvar, path_id);
        set_ops.push((OverlayOp::Union, base_qry, rvar));

        for (op, overlay_rel) in overlays {
            let hint = self
                .tree
                .rel(overlay_rel)
                .query
                .name
                .clone()
                .unwrap_or_else(|| "overlay".to_string());
            let alias = self.env.aliases.get(&hint);
            let overlay_rvar = self.tree.add_rvar(RangeVar {
                kind: RVarKind::Relation(overlay_rel),
                alias: Alias::new(alias),
                lateral: false,
                nullable: false,
            });

            let qry = self.wrap_rvar_for_overlay(overlay_rvar, path_id);

            if op == OverlayOp::Replace {
                set_ops.clear();
                set_ops.push((OverlayOp::Union, qry, overlay_rvar));
            } else {
                set_ops.push((op, qry, overlay_rvar));
            }
        }

        self.range_from_queryset(set_ops, type_name.shortname())
    }

    fn wrap_rvar_for_overlay(&mut self, rvar: RVarId, path_id: &PathId) -> RelId {
        let qry = self.tree.new_select();
        self.tree
            .rel_mut(qry)
            .from_clause_mut()
            .push(FromItem::RVar(rvar));
        self.put_path_rvar(qry, path_id, rvar, Aspect::Value);
        self.put_path_bond(qry, path_id);
        qry
    }

    /// A range over an object type; virtual union types compile to a
    /// UNION ALL of their children.
    pub(crate) fn range_for_objtype(
        &mut self,
        objtype: TypeId,
        path_id: &PathId,
        include_overlays: bool,
    ) -> LoweringResult<RVarId> {
        let rvar = if !self.schema.is_virtual(objtype) {
            self.range_for_material_objtype(objtype, path_id, include_overlays)?
        } else {
            let children = self.schema.children(objtype).to_vec();
            let mut set_ops: Vec<(OverlayOp, RelId, RVarId)> = Vec::new();

            for child in children {
                let c_rvar = self.range_for_objtype(child, path_id, include_overlays)?;
                let qry = self.wrap_rvar_for_overlay(c_rvar, path_id);
                set_ops.push((OverlayOp::Union, qry, c_rvar));
            }

            let hint = self.schema.type_name(objtype).shortname().to_string();
            self.range_from_queryset(set_ops, &hint)?
        };

        if let Some(rel) = self.tree.rvar(rvar).rel(&self.tree) {
            self.tree.rel_mut(rel).info.is_distinct = true;
            self.tree.rel_mut(rel).info.path_id = Some(path_id.clone());
        }

        Ok(rvar)
    }

    /// A range producing the rows of `ir_set`'s object type
    pub(crate) fn range_for_set(&mut self, ir_set: &Set) -> LoweringResult<RVarId> {
        self.range_for_objtype(ir_set.typ, &ir_set.path_id, true)
    }

    /// A range over a pointer's mapping table.  Takes source inheritance
    /// into account: every descendant declaring the same pointer
    /// contributes its table to a UNION.
    pub(crate) fn range_for_ptrcls(
        &mut self,
        ptrcls: PtrId,
        _direction: Direction,
        include_overlays: bool,
    ) -> LoweringResult<RVarId> {
        let pointer = self.schema.ptr(ptrcls).clone();
        let ptr_name = pointer.name.clone();
        let tgt_col = self
            .schema
            .pointer_storage_info(ptrcls, true)?
            .column_name;
        let cols = [
            setlang_catalog::MAP_SOURCE_COL.to_string(),
            tgt_col.clone(),
        ];

        let mut set_ops: Vec<(OverlayOp, RelId, RVarId)> = Vec::new();
        let mut seen: Vec<PtrId> = Vec::new();

        let mut sources = vec![pointer.source];
        sources.extend(self.schema.descendants(pointer.source));

        for source in sources {
            let Some(src_ptr) = self.schema.getptr(source, ptr_name.shortname()) else {
                continue;
            };
            if seen.contains(&src_ptr) {
                continue;
            }
            seen.push(src_ptr);

            let info = self.schema.pointer_storage_info(src_ptr, true)?;
            let relation = self
                .tree
                .new_relation(info.table.schema, info.table.name, None);
            let alias = self.env.aliases.get(ptr_name.shortname());
            let table_rvar = self.tree.add_rvar(RangeVar {
                kind: RVarKind::Relation(relation),
                alias: Alias::new(alias),
                lateral: false,
                nullable: false,
            });

            let qry = self.tree.new_select();
            self.tree
                .rel_mut(qry)
                .from_clause_mut()
                .push(FromItem::RVar(table_rvar));

            // Pull the map columns up under stable names.
            let rvar_alias = self.tree.rvar(table_rvar).alias.aliasname.clone();
            for colname in &cols {
                let selexpr = SqlExpr::Column(ColumnRef::new([
                    rvar_alias.clone(),
                    colname.clone(),
                ]));
                self.tree
                    .rel_mut(qry)
                    .target_list_mut()
                    .push(ResTarget::named(colname.clone(), selexpr));
            }

            set_ops.push((OverlayOp::Union, qry, table_rvar));

            if include_overlays {
                let overlays = self
                    .env
                    .rel_overlays
                    .get(&self.schema.ptr(src_ptr).name.to_string())
                    .cloned()
                    .unwrap_or_default();
                for (op, overlay_rel) in overlays {
                    let alias = self.env.aliases.get(ptr_name.shortname());
                    let overlay_rvar = self.tree.add_rvar(RangeVar {
                        kind: RVarKind::Relation(overlay_rel),
                        alias: Alias::new(alias),
                        lateral: false,
                        nullable: false,
                    });
                    let qry = self.tree.new_select();
                    self.tree
                        .rel_mut(qry)
                        .from_clause_mut()
                        .push(FromItem::RVar(overlay_rvar));
                    for colname in &cols {
                        let selexpr = SqlExpr::Column(ColumnRef::new([colname.clone()]));
                        self.tree
                            .rel_mut(qry)
                            .target_list_mut()
                            .push(ResTarget::named(colname.clone(), selexpr));
                    }
                    set_ops.push((op, qry, overlay_rvar));
                }
            }
        }

        if set_ops.is_empty() {
            return Err(LoweringError::lookup(format!(
                "mapping table for pointer '{ptr_name}'"
            )));
        }

        self.range_from_queryset(set_ops, ptr_name.shortname())
    }

    /// Fold a list of per-table queries into a single range var:
    /// directly for one table, a UNION ALL subselect otherwise.
    fn range_from_queryset(
        &mut self,
        set_ops: Vec<(OverlayOp, RelId, RVarId)>,
        hint: &str,
    ) -> LoweringResult<RVarId> {
        if set_ops.len() > 1 {
            let mut iter = set_ops.into_iter();
            let (_, mut result, _) = iter.next().expect("non-empty query set");

            for (_, rarg, _) in iter {
                let union = self.tree.new_select();
                {
                    let data = self
                        .tree
                        .rel_mut(union)
                        .as_select_mut()
                        .expect("set-op node is a select");
                    data.op = Some(SetOperation::Union);
                    data.all = true;
                    data.larg = Some(result);
                    data.rarg = Some(rarg);
                }
                result = union;
            }

            let alias = self.env.aliases.get(hint);
            Ok(self.tree.add_rvar(RangeVar {
                kind: RVarKind::Subselect(result),
                alias: Alias::new(alias),
                lateral: false,
                nullable: false,
            }))
        } else {
            let (_, _, rvar) = set_ops.into_iter().next().expect("non-empty query set");
            Ok(rvar)
        }
    }

    /// Wrap a relation in a range var
    pub(crate) fn rvar_for_rel(
        &mut self,
        rel: RelId,
        lateral: bool,
        colnames: Vec<String>,
    ) -> RVarId {
        let node = self.tree.rel(rel);
        let (kind, hint) = match &node.kind {
            RelKind::Relation { name, .. } => {
                (RVarKind::Relation(rel), name.clone())
            }
            RelKind::Cte { .. } => (RVarKind::Relation(rel), "cte".to_string()),
            RelKind::NullRelation { .. } => {
                (RVarKind::Subselect(rel), "null".to_string())
            }
            _ => {
                let hint = node.query.name.clone().unwrap_or_else(|| "q".to_string());
                (RVarKind::Subselect(rel), hint)
            }
        };

        let alias = self.env.aliases.get(&hint);
        self.tree.add_rvar(RangeVar {
            kind,
            alias: Alias::new(alias).with_colnames(colnames),
            lateral,
            nullable: false,
        })
    }

    /// A column of a range var, with nullability inferred from the
    /// underlying query when possible.
    pub(crate) fn get_column(
        &self,
        rvar: Option<RVarId>,
        colname: &str,
        nullable: Option<bool>,
    ) -> ColumnRef {
        let Some(rvar_id) = rvar else {
            return ColumnRef::new([colname.to_string()])
                .with_nullable(nullable.unwrap_or(true));
        };

        let rvar_node = self.tree.rvar(rvar_id);
        let nullable = nullable.unwrap_or_else(|| match &rvar_node.kind {
            // Range over a base table: nullability unknowable here.
            RVarKind::Relation(rel) if self.tree.rel(*rel).is_base_relation() => true,
            RVarKind::Relation(rel) | RVarKind::Subselect(rel) => {
                let rel = self.tree.unwrap_cte(*rel);
                self.subselect_column_nullable(rel, colname)
            }
            RVarKind::Function { .. } => true,
        });

        ColumnRef::new([rvar_node.alias.aliasname.clone(), colname.to_string()])
            .with_nullable(nullable)
    }

    fn subselect_column_nullable(&self, rel: RelId, colname: &str) -> bool {
        let queries = self.tree.queries_in_set(rel);
        let leftmost = queries[0];
        let Some(col_idx) = self
            .tree
            .rel(leftmost)
            .target_list()
            .iter()
            .position(|rt| rt.name.as_deref() == Some(colname))
        else {
            return true;
        };

        queries.iter().any(|&q| {
            self.tree
                .rel(q)
                .target_list()
                .get(col_idx)
                .is_none_or(|rt| rt.val.nullable(&self.tree))
        })
    }

    /// Resolve an output var against a range var, producing refs local
    /// to the consuming query.
    pub(crate) fn get_rvar_output_var(
        &self,
        rvar: Option<RVarId>,
        var: &OutputVar,
    ) -> OutputVar {
        match var {
            OutputVar::Tuple(tuple) => {
                let mut elements = Vec::with_capacity(tuple.elements.len());
                for el in &tuple.elements {
                    let val = el
                        .var
                        .as_ref()
                        .map(|v| self.get_rvar_output_var(rvar, v));
                    let mut element = el.clone();
                    if let Some(val) = val {
                        element.val = Some(Box::new(val.into_expr()));
                    }
                    elements.push(element);
                }
                OutputVar::Tuple(setlang_sqlast::TupleVar {
                    elements,
                    named: tuple.named,
                    nullable: tuple.nullable,
                })
            }
            OutputVar::Column(col) => OutputVar::Column(self.get_column(
                rvar,
                col.colname(),
                Some(col.nullable),
            )),
        }
    }

    /// [`Compiler::get_rvar_output_var`] with explicit bond flags; used
    /// by the set-op descent in path resolution.
    pub(crate) fn get_rvar_fieldref(
        &self,
        rvar: Option<RVarId>,
        var: &OutputVar,
        optional: bool,
        nullable: bool,
    ) -> OutputVar {
        match self.get_rvar_output_var(rvar, var) {
            OutputVar::Column(col) => OutputVar::Column(
                col.with_optional(optional).with_nullable(nullable),
            ),
            tuple => tuple,
        }
    }

    /// Register a DML overlay for an object type
    pub(crate) fn add_rel_overlay(&mut self, objtype: TypeId, op: OverlayOp, rel: RelId) {
        let name = self
            .schema
            .type_name(self.schema.material_type(objtype))
            .to_string();
        self.env.rel_overlays.entry(name).or_default().push((op, rel));
    }

    /// Wrap a query into a common table expression node
    pub(crate) fn cte_for_query(&mut self, rel: RelId) -> RelId {
        let hint = self
            .tree
            .rel(rel)
            .query
            .name
            .clone()
            .unwrap_or_else(|| "cte".to_string());
        let name = self.env.aliases.get(&hint);
        let cte = self.tree.new_cte(rel, false);
        self.tree.rel_mut(cte).query.name = Some(name);
        cte
    }

    /// A relation producing one all-NULL row bonded on `path_id`
    pub(crate) fn new_empty_rvar(&mut self, path_id: &PathId) -> RVarId {
        let nullrel = self.tree.new_null_relation(Some(path_id.clone()));
        let rvar = self.rvar_for_rel(nullrel, false, Vec::new());
        self.put_rvar_path_bond(rvar, path_id);
        if let Some(rel) = self.tree.rvar(rvar).rel(&self.tree) {
            self.tree
                .rel_mut(rel)
                .info
                .value_scope
                .insert(path_id.clone());
        }
        rvar
    }
}
