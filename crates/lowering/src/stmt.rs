// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Statement lowering
//!
//! SELECT / INSERT / UPDATE / DELETE / GROUP statements compile into the
//! pending subrelation set up by the enclosing set handler.  DML
//! statements build their write relation as a CTE and register an
//! overlay so later reads of the mutated type see the new rows.

use setlang_ir::{
    DeleteStmt, GroupStmt, InsertStmt, PointerRef, SelectStmt, Set, SortDirection, Stmt,
    UpdateStmt,
};
use setlang_sqlast::{
    Aspect, ColumnRef, FromItem, InsertData, PathInfo, QueryInfo, Rel, RelId, RelKind,
    ResTarget, SortBy, SortDir, SortNulls, SqlExpr, UpdateTarget,
};

use crate::astutils::{extend_binop, new_binop};
use crate::compiler::Compiler;
use crate::context::{Clause, OverlayOp};
use crate::error::LoweringResult;

impl Compiler<'_> {
    /// Compile a statement into the pending query (or a fresh
    /// subrelation) and return it.
    pub(crate) fn visit_stmt(&mut self, stmt: &Stmt) -> LoweringResult<RelId> {
        self.with_new(|c| -> LoweringResult<RelId> {
            let query = match c.ctx.pending_query.take() {
                Some(query) => query,
                None => {
                    let query = c.tree.new_select();
                    c.rel_hierarchy.insert(query, c.ctx.rel);
                    query
                }
            };
            c.ctx.rel = query;
            c.ctx.stmt = query;

            match stmt {
                Stmt::Select(select) => c.compile_select_stmt(select, query)?,
                Stmt::Insert(insert) => c.compile_insert_stmt(insert, query)?,
                Stmt::Update(update) => c.compile_update_stmt(update, query)?,
                Stmt::Delete(delete) => c.compile_delete_stmt(delete, query)?,
                Stmt::Group(group) => c.compile_group_stmt(group, query)?,
            }

            Ok(query)
        })
    }

    fn compile_iterator(
        &mut self,
        iterator: Option<&Set>,
        query: RelId,
    ) -> LoweringResult<()> {
        let Some(iterator) = iterator else {
            return Ok(());
        };

        let iter_rvar = self.get_set_rvar(iterator)?;
        self.include_rvar(query, iter_rvar, &iterator.path_id)?;
        self.put_path_bond(query, &iterator.path_id);
        Ok(())
    }

    fn compile_select_stmt(
        &mut self,
        select: &SelectStmt,
        query: RelId,
    ) -> LoweringResult<()> {
        self.compile_iterator(select.iterator.as_deref(), query)?;

        // Result.
        self.visit_set(&select.result)?;
        if self.in_serialization_ctx() {
            self.get_path_serialized_output(query, &select.result.path_id)?;
        } else {
            self.get_path_value_output(query, &select.result.path_id)?;
        }

        self.compile_filter_clause(select.where_clause.as_ref(), query)?;

        // ORDER BY.
        for sortexpr in &select.orderby {
            let node = self.with_new(|c| {
                c.ctx.clause = Clause::OrderBy;
                c.ctx.expr_exposed = Some(false);
                c.compile_set(&sortexpr.expr)
            })?;
            self.tree
                .rel_mut(query)
                .as_select_mut()
                .expect("select statement compiles into a select")
                .sort_clause
                .push(SortBy {
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

        // OFFSET / LIMIT.
        if let Some(offset) = &select.offset {
            let expr = self.with_new(|c| {
                c.ctx.clause = Clause::OffsetLimit;
                c.ctx.expr_exposed = Some(false);
                c.compile_set(offset)
            })?;
            self.tree
                .rel_mut(query)
                .as_select_mut()
                .expect("select statement compiles into a select")
                .limit_offset = Some(expr);
        }

        if let Some(limit) = &select.limit {
            let expr = self.with_new(|c| {
                c.ctx.clause = Clause::OffsetLimit;
                c.ctx.expr_exposed = Some(false);
                c.compile_set(limit)
            })?;
            self.tree
                .rel_mut(query)
                .as_select_mut()
                .expect("select statement compiles into a select")
                .limit_count = Some(expr);
        }

        Ok(())
    }

    fn compile_filter_clause(
        &mut self,
        where_clause: Option<&Set>,
        query: RelId,
    ) -> LoweringResult<()> {
        let Some(filter) = where_clause else {
            return Ok(());
        };

        let cond = self.with_new(|c| {
            c.ctx.clause = Clause::Where;
            c.ctx.expr_exposed = Some(false);
            c.compile_set(filter)
        })?;

        let existing = self.tree.rel(query).where_clause().cloned();
        *self.tree.rel_mut(query).where_clause_mut() = Some(extend_binop(existing, cond));
        Ok(())
    }

    fn compile_insert_stmt(
        &mut self,
        insert: &InsertStmt,
        query: RelId,
    ) -> LoweringResult<()> {
        let subject = &insert.subject;
        let table = self.schema.object_table(subject.typ)?;

        self.compile_iterator(insert.iterator.as_deref(), query)?;

        // Compile the shape into inline column values and out-of-line
        // mapping inserts.
        let mut cols: Vec<String> = Vec::new();
        let mut values: Vec<SqlExpr> = Vec::new();
        let mut mapped: Vec<(setlang_catalog::PtrId, SqlExpr)> = Vec::new();

        for element in &subject.shape {
            let Some(rptr) = &element.rptr else {
                continue;
            };
            let PointerRef::Pointer(ptrcls) = &rptr.ptr else {
                continue;
            };
            let ptrcls = *ptrcls;
            if self.schema.ptr(ptrcls).is_id {
                continue;
            }

            let value = self.with_new(|c| {
                c.ctx.expr_exposed = Some(false);
                c.compile_set(element)
            })?;

            let info = self.schema.pointer_storage_info(ptrcls, false)?;
            if info.table_type == setlang_catalog::TableType::ObjectType {
                cols.push(info.column_name);
                values.push(value);
            } else {
                mapped.push((ptrcls, value));
            }
        }

        // The source of the INSERT: a single computed row.
        let values_rel = self.tree.new_select();
        for value in values {
            self.tree
                .rel_mut(values_rel)
                .target_list_mut()
                .push(ResTarget::new(value));
        }

        let rel = self
            .tree
            .new_relation(table.schema.clone(), table.name.clone(), None);
        let relation = self.rvar_for_rel(rel, false, Vec::new());

        let insert_rel = self.tree.add_rel(Rel {
            kind: RelKind::Insert(InsertData {
                relation,
                cols,
                select_stmt: Some(values_rel),
                returning_list: vec![ResTarget::named(
                    "id",
                    SqlExpr::Column(ColumnRef::new(["id"])),
                )],
            }),
            info: PathInfo {
                path_id: Some(subject.path_id.clone()),
                ..PathInfo::default()
            },
            query: QueryInfo {
                name: Some(self.env.aliases.get("ins")),
                ..QueryInfo::default()
            },
        });

        let id_output = setlang_sqlast::OutputVar::Column(ColumnRef::new(["id"]));
        self.tree
            .rel_mut(insert_rel)
            .info
            .path_outputs
            .insert((subject.path_id.clone(), Aspect::Identity), id_output.clone());
        self.tree
            .rel_mut(insert_rel)
            .info
            .path_outputs
            .insert((subject.path_id.clone(), Aspect::Value), id_output);
        self.put_path_bond(insert_rel, &subject.path_id);

        let cte = self.cte_for_query(insert_rel);
        self.tree.rel_mut(query).query.ctes.push(cte);

        // Mapping-table pointers insert through the main CTE's id.
        for (ptrcls, value) in mapped {
            let link_table = self
                .schema
                .pointer_storage_info(ptrcls, true)?
                .table
                .clone();
            let link_rel =
                self.tree
                    .new_relation(link_table.schema, link_table.name, None);
            let link_relation = self.rvar_for_rel(link_rel, false, Vec::new());

            let cte_rvar = self.rvar_for_rel(cte, false, Vec::new());
            let select_rel = self.tree.new_select();
            self.tree
                .rel_mut(select_rel)
                .from_clause_mut()
                .push(FromItem::RVar(cte_rvar));
            let source_id = self.get_column(Some(cte_rvar), "id", Some(false));
            self.tree
                .rel_mut(select_rel)
                .target_list_mut()
                .push(ResTarget::new(SqlExpr::Column(source_id)));
            self.tree
                .rel_mut(select_rel)
                .target_list_mut()
                .push(ResTarget::new(value));

            let link_insert = self.tree.add_rel(Rel {
                kind: RelKind::Insert(InsertData {
                    relation: link_relation,
                    cols: vec![
                        setlang_catalog::MAP_SOURCE_COL.to_string(),
                        self.schema.pointer_storage_info(ptrcls, true)?.column_name,
                    ],
                    select_stmt: Some(select_rel),
                    returning_list: Vec::new(),
                }),
                info: PathInfo::default(),
                query: QueryInfo {
                    name: Some(self.env.aliases.get("ins")),
                    ..QueryInfo::default()
                },
            });
            let link_cte = self.cte_for_query(link_insert);
            self.tree.rel_mut(query).query.ctes.push(link_cte);
        }

        // Writes become visible to later reads of the type.
        self.add_rel_overlay(subject.typ, OverlayOp::Union, cte);

        // The statement's result: the inserted rows.
        let cte_rvar = self.rvar_for_rel(cte, false, Vec::new());
        self.include_rvar(query, cte_rvar, &subject.path_id)?;
        self.get_path_identity_output(query, &subject.path_id)?;

        Ok(())
    }

    fn compile_update_stmt(
        &mut self,
        update: &UpdateStmt,
        query: RelId,
    ) -> LoweringResult<()> {
        let subject = &update.subject;
        let table = self.schema.object_table(subject.typ)?;

        self.compile_iterator(update.iterator.as_deref(), query)?;

        // The range of rows to update.
        let range_rel = self.with_subrel(|c, range_rel| -> LoweringResult<RelId> {
            let rvar = c.get_set_rvar(subject)?;
            c.include_rvar(range_rel, rvar, &subject.path_id)?;
            c.compile_filter_clause(update.where_clause.as_ref(), range_rel)?;
            c.get_path_identity_output(range_rel, &subject.path_id)?;
            Ok(range_rel)
        })?;

        // SET targets from the subject shape (inline pointers only; a
        // mapping-table pointer updates through delete+insert on its
        // own table).
        let mut targets: Vec<UpdateTarget> = Vec::new();
        for element in &subject.shape {
            let Some(rptr) = &element.rptr else {
                continue;
            };
            let PointerRef::Pointer(ptrcls) = &rptr.ptr else {
                continue;
            };
            let ptrcls = *ptrcls;
            if self.schema.ptr(ptrcls).is_id {
                continue;
            }

            let info = self.schema.pointer_storage_info(ptrcls, false)?;
            if info.table_type != setlang_catalog::TableType::ObjectType {
                continue;
            }

            let value = self.with_new(|c| {
                c.ctx.expr_exposed = Some(false);
                c.compile_set(element)
            })?;
            targets.push(UpdateTarget {
                name: info.column_name,
                val: value,
            });
        }

        let rel = self
            .tree
            .new_relation(table.schema, table.name, None);
        let relation = self.rvar_for_rel(rel, false, Vec::new());

        let update_rel = self.tree.add_rel(Rel {
            kind: RelKind::Update(setlang_sqlast::UpdateData {
                relation,
                targets,
                where_clause: Some(new_binop(
                    SqlExpr::Column(ColumnRef::new(["id"])),
                    SqlExpr::Subquery(range_rel),
                    "IN",
                )),
                from_clause: Vec::new(),
                returning_list: vec![ResTarget::named(
                    "id",
                    SqlExpr::Column(ColumnRef::new(["id"])),
                )],
            }),
            info: PathInfo {
                path_id: Some(subject.path_id.clone()),
                ..PathInfo::default()
            },
            query: QueryInfo {
                name: Some(self.env.aliases.get("upd")),
                ..QueryInfo::default()
            },
        });

        let id_output = setlang_sqlast::OutputVar::Column(ColumnRef::new(["id"]));
        self.tree
            .rel_mut(update_rel)
            .info
            .path_outputs
            .insert((subject.path_id.clone(), Aspect::Identity), id_output.clone());
        self.tree
            .rel_mut(update_rel)
            .info
            .path_outputs
            .insert((subject.path_id.clone(), Aspect::Value), id_output);
        self.put_path_bond(update_rel, &subject.path_id);

        let cte = self.cte_for_query(update_rel);
        self.tree.rel_mut(query).query.ctes.push(cte);
        self.add_rel_overlay(subject.typ, OverlayOp::Union, cte);

        let cte_rvar = self.rvar_for_rel(cte, false, Vec::new());
        self.include_rvar(query, cte_rvar, &subject.path_id)?;
        self.get_path_identity_output(query, &subject.path_id)?;

        Ok(())
    }

    fn compile_delete_stmt(
        &mut self,
        delete: &DeleteStmt,
        query: RelId,
    ) -> LoweringResult<()> {
        let subject = &delete.subject;
        let table = self.schema.object_table(subject.typ)?;

        self.compile_iterator(delete.iterator.as_deref(), query)?;

        let range_rel = self.with_subrel(|c, range_rel| -> LoweringResult<RelId> {
            let rvar = c.get_set_rvar(subject)?;
            c.include_rvar(range_rel, rvar, &subject.path_id)?;
            c.compile_filter_clause(delete.where_clause.as_ref(), range_rel)?;
            c.get_path_identity_output(range_rel, &subject.path_id)?;
            Ok(range_rel)
        })?;

        let rel = self
            .tree
            .new_relation(table.schema, table.name, None);
        let relation = self.rvar_for_rel(rel, false, Vec::new());

        let delete_rel = self.tree.add_rel(Rel {
            kind: RelKind::Delete(setlang_sqlast::DeleteData {
                relation,
                where_clause: Some(new_binop(
                    SqlExpr::Column(ColumnRef::new(["id"])),
                    SqlExpr::Subquery(range_rel),
                    "IN",
                )),
                using_clause: Vec::new(),
                returning_list: vec![ResTarget::named(
                    "id",
                    SqlExpr::Column(ColumnRef::new(["id"])),
                )],
            }),
            info: PathInfo {
                path_id: Some(subject.path_id.clone()),
                ..PathInfo::default()
            },
            query: QueryInfo {
                name: Some(self.env.aliases.get("del")),
                ..QueryInfo::default()
            },
        });

        let id_output = setlang_sqlast::OutputVar::Column(ColumnRef::new(["id"]));
        self.tree
            .rel_mut(delete_rel)
            .info
            .path_outputs
            .insert((subject.path_id.clone(), Aspect::Identity), id_output.clone());
        self.tree
            .rel_mut(delete_rel)
            .info
            .path_outputs
            .insert((subject.path_id.clone(), Aspect::Value), id_output);
        self.put_path_bond(delete_rel, &subject.path_id);

        let cte = self.cte_for_query(delete_rel);
        self.tree.rel_mut(query).query.ctes.push(cte);

        let cte_rvar = self.rvar_for_rel(cte, false, Vec::new());
        self.include_rvar(query, cte_rvar, &subject.path_id)?;
        self.get_path_identity_output(query, &subject.path_id)?;

        Ok(())
    }

    fn compile_group_stmt(&mut self, group: &GroupStmt, query: RelId) -> LoweringResult<()> {
        // The grouped subject compiles into its own relation; the
        // aggregate handler pulls it in through `group_by_rels`.
        let subject_rel = self.with_subrel(|c, subject_rel| -> LoweringResult<RelId> {
            let rvar = c.get_set_rvar(&group.subject)?;
            c.include_rvar(subject_rel, rvar, &group.subject.path_id)?;
            for groupby in &group.groupby {
                c.visit_set(groupby)?;
            }
            Ok(subject_rel)
        })?;

        self.ctx.group_by_rels.insert(
            (group.subject.path_id.clone(), group.group_path_id.clone()),
            subject_rel,
        );

        self.visit_set(&group.result)?;
        if self.in_serialization_ctx() {
            self.get_path_serialized_output(query, &group.result.path_id)?;
        } else {
            self.get_path_value_output(query, &group.result.path_id)?;
        }

        Ok(())
    }
}
