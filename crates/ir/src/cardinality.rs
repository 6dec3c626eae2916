// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # Cardinality inference
//!
//! A single pass mapping `(IR node, scope node)` to [`Cardinality::One`]
//! or [`Cardinality::Many`], memoized per set and scope.  The lowering
//! consults it to choose between scalar and set-shaped rewrites (most
//! notably for `??` and for shape elements).
//!
//! The interesting rules:
//!
//! - a set whose path is already visible at the parent fence is a
//!   *reference*, not a traversal, and is ONE;
//! - SET-OF arguments never broaden a call's cardinality;
//! - an equality filter on an exclusive (or id) pointer collapses a
//!   statement to ONE when the other side is ONE.

use std::collections::HashMap;

use setlang_catalog::{Cardinality, PtrId, Schema, TypeId};

use crate::ast::{
    BinOp, ConstantValue, Expr, FunctionCall, Set, SetId, Stmt, TypeModifier,
};
use crate::error::IrResult;
use crate::path_id::PointerRef;
use crate::scope_tree::{NodeId, ScopeTree};

/// Memoizing cardinality inference over one IR tree
pub struct CardinalityInference<'a> {
    schema: &'a Schema,
    tree: &'a ScopeTree,
    memo: HashMap<(SetId, NodeId), Cardinality>,
}

impl<'a> CardinalityInference<'a> {
    pub fn new(schema: &'a Schema, tree: &'a ScopeTree) -> Self {
        Self::with_memo(schema, tree, HashMap::new())
    }

    /// Resume with a previously captured memo table, so callers that
    /// cannot hold the borrow across passes can thread the cache
    /// through.
    pub fn with_memo(
        schema: &'a Schema,
        tree: &'a ScopeTree,
        memo: HashMap<(SetId, NodeId), Cardinality>,
    ) -> Self {
        Self { schema, tree, memo }
    }

    /// Surrender the memo table for a later [`Self::with_memo`].
    pub fn into_memo(self) -> HashMap<(SetId, NodeId), Cardinality> {
        self.memo
    }

    /// Infer the cardinality of `ir_set` as seen from `scope`.
    pub fn infer_set(&mut self, ir_set: &Set, scope: NodeId) -> IrResult<Cardinality> {
        if let Some(&cached) = self.memo.get(&(ir_set.id, scope)) {
            return Ok(cached);
        }

        let result = self.infer_set_uncached(ir_set, scope)?;
        self.memo.insert((ir_set.id, scope), result);
        Ok(result)
    }

    fn infer_set_uncached(&mut self, ir_set: &Set, scope: NodeId) -> IrResult<Cardinality> {
        if let Some(parent_fence) = self.tree.parent_fence(scope) {
            let namespaces = &self.tree.node(scope).namespaces;
            let path_id = if namespaces.is_empty() {
                ir_set.path_id.clone()
            } else {
                ir_set.path_id.strip_namespace(namespaces.iter())
            };

            if self.tree.is_visible(parent_fence, &path_id) {
                // A reference to an already-bound path, not a traversal.
                return Ok(Cardinality::One);
            }
        }

        if let Some(rptr) = &ir_set.rptr {
            if self.step_is_singular(&rptr.ptr, rptr.direction) {
                let new_scope = self.set_scope(ir_set, scope);
                self.infer_set(&rptr.source, new_scope)
            } else {
                Ok(Cardinality::Many)
            }
        } else if let Some(expr) = &ir_set.expr {
            let new_scope = self.set_scope(ir_set, scope);
            self.infer_expr(expr, new_scope)
        } else {
            Ok(Cardinality::Many)
        }
    }

    fn step_is_singular(&self, ptr: &PointerRef, direction: setlang_catalog::Direction) -> bool {
        match ptr {
            PointerRef::Pointer(p) => self.schema.ptr(*p).singular(direction),
            // Tuple elements and type narrowing never multiply rows.
            PointerRef::TupleElement(_) => true,
            PointerRef::TypeIndirection { .. } => true,
        }
    }

    fn infer_expr(&mut self, expr: &Expr, scope: NodeId) -> IrResult<Cardinality> {
        match expr {
            Expr::EmptySet
            | Expr::Constant { .. }
            | Expr::Parameter { .. }
            | Expr::TypeRef { .. } => Ok(Cardinality::One),

            Expr::Array { .. } | Expr::Tuple { .. } | Expr::TupleIndirection { .. } => {
                Ok(Cardinality::One)
            }

            Expr::IndexIndirection { expr, index } => {
                self.common(&[expr, index], scope)
            }

            Expr::SliceIndirection { expr, start, stop } => {
                self.common(&[expr, start, stop], scope)
            }

            Expr::BinOp { left, right, .. } => self.common(&[left, right], scope),

            Expr::UnaryOp { expr, .. } => self.infer_set(expr, scope),

            Expr::EquivalenceOp { left, right, .. } => self.common(&[left, right], scope),

            Expr::TypeCheckOp { left, .. } => self.infer_set(left, scope),

            Expr::IfElse {
                condition,
                if_expr,
                else_expr,
            } => self.common(&[if_expr, else_expr, condition], scope),

            Expr::Coalesce { left, right } => self.common(&[left, right], scope),

            Expr::SetOp {
                left,
                right,
                exclusive,
            } => {
                if *exclusive {
                    // Exclusive UNIONs are generated from IF/ELSE
                    // expressions.
                    self.common(&[left, right], scope)
                } else {
                    Ok(Cardinality::Many)
                }
            }

            Expr::DistinctOp { expr } => self.infer_set(expr, scope),

            Expr::Exists { .. } => Ok(Cardinality::One),

            Expr::TypeCast { expr, .. } => self.infer_set(expr, scope),

            Expr::FunctionCall(call) => self.infer_call(call, scope),

            Expr::Stmt(stmt) => self.infer_stmt(stmt, scope),
        }
    }

    fn infer_call(&mut self, call: &FunctionCall, scope: NodeId) -> IrResult<Cardinality> {
        if call.func.return_typemod == TypeModifier::SetOf {
            return Ok(Cardinality::Many);
        }

        // SET-OF arguments do not broaden the result cardinality.
        let mut result = Cardinality::One;
        for (i, arg) in call.args.iter().enumerate() {
            let typemod = call
                .func
                .param_typemods
                .get(i)
                .copied()
                .unwrap_or(TypeModifier::Singleton);
            if typemod != TypeModifier::SetOf {
                result = result.max(self.infer_set(arg, scope)?);
            }
        }
        Ok(result)
    }

    fn infer_stmt(&mut self, stmt: &Stmt, scope: NodeId) -> IrResult<Cardinality> {
        match stmt {
            Stmt::Select(select) => {
                if let Some(declared) = select.cardinality {
                    return Ok(declared);
                }

                let stmt_card = if select.limit.as_ref().is_some_and(is_const_one) {
                    // Explicit LIMIT 1 clause.
                    Cardinality::One
                } else {
                    self.infer_filtered_stmt(
                        &select.result,
                        select.where_clause.as_ref(),
                        scope,
                    )?
                };

                self.fold_iterator(stmt_card, select.iterator.as_deref(), scope)
            }

            Stmt::Insert(insert) => {
                if let Some(declared) = insert.cardinality {
                    return Ok(declared);
                }
                match &insert.iterator {
                    Some(iterator) => self.infer_set(iterator, scope),
                    // INSERT without a FOR is always a singleton.
                    None => Ok(Cardinality::One),
                }
            }

            Stmt::Update(update) => {
                if let Some(declared) = update.cardinality {
                    return Ok(declared);
                }
                let stmt_card = self.infer_filtered_stmt(
                    &update.subject,
                    update.where_clause.as_ref(),
                    scope,
                )?;
                self.fold_iterator(stmt_card, update.iterator.as_deref(), scope)
            }

            Stmt::Delete(delete) => {
                if let Some(declared) = delete.cardinality {
                    return Ok(declared);
                }
                let stmt_card = self.infer_filtered_stmt(
                    &delete.subject,
                    delete.where_clause.as_ref(),
                    scope,
                )?;
                self.fold_iterator(stmt_card, delete.iterator.as_deref(), scope)
            }

            Stmt::Group(group) => self.infer_set(&group.result, scope),
        }
    }

    fn fold_iterator(
        &mut self,
        stmt_card: Cardinality,
        iterator: Option<&Set>,
        scope: NodeId,
    ) -> IrResult<Cardinality> {
        match iterator {
            Some(iterator) => {
                let iter_card = self.infer_set(iterator, scope)?;
                Ok(stmt_card.max(iter_card))
            }
            None => Ok(stmt_card),
        }
    }

    fn infer_filtered_stmt(
        &mut self,
        result: &Set,
        filter: Option<&Set>,
        scope: NodeId,
    ) -> IrResult<Cardinality> {
        let result_card = self.infer_set(result, scope)?;
        if result_card.is_one() {
            return Ok(result_card);
        }
        let Some(filter) = filter else {
            return Ok(result_card);
        };
        self.analyse_filter_clause(result, filter, scope)
    }

    /// Walk a conjunction of equality checks and collapse the statement
    /// to ONE if any of them pins a unique pointer.
    fn analyse_filter_clause(
        &mut self,
        result: &Set,
        filter: &Set,
        scope: NodeId,
    ) -> IrResult<Cardinality> {
        let mut filtered_ptrs = Vec::new();
        self.extract_filters(result, filter, scope, &mut filtered_ptrs)?;

        for ptr in filtered_ptrs {
            let meta = self.schema.ptr(ptr);
            if meta.is_id || meta.exclusive {
                // An equality filter on a pointer with a unique
                // constraint.
                return Ok(Cardinality::One);
            }
        }

        Ok(Cardinality::Many)
    }

    fn extract_filters(
        &mut self,
        result: &Set,
        ir_set: &Set,
        scope: NodeId,
        out: &mut Vec<PtrId>,
    ) -> IrResult<()> {
        let scope = self.set_scope(ir_set, scope);

        let Some(Expr::BinOp { op, left, right }) = &ir_set.expr else {
            return Ok(());
        };

        match op {
            BinOp::Eq => {
                let op_card = self.common(&[left, right], scope)?;
                if op_card == Cardinality::Many {
                    return Ok(());
                }

                if self.is_ptr_or_self_ref(left, result.typ) {
                    if self.infer_set(right, scope)?.is_one() {
                        self.push_filtered_ptr(left, result.typ, out);
                    }
                } else if self.is_ptr_or_self_ref(right, result.typ)
                    && self.infer_set(left, scope)?.is_one()
                {
                    self.push_filtered_ptr(right, result.typ, out);
                }
            }

            BinOp::And => {
                self.extract_filters(result, left, scope, out)?;
                self.extract_filters(result, right, scope, out)?;
            }

            _ => {}
        }

        Ok(())
    }

    fn push_filtered_ptr(&self, ir_set: &Set, result_type: TypeId, out: &mut Vec<PtrId>) {
        if self.schema.material_type(ir_set.typ) == self.schema.material_type(result_type) {
            // A bare self reference equates the implicit id.
            if let Ok(id_ptr) = self.schema.id_pointer(result_type) {
                out.push(id_ptr);
            }
        } else if let Some(crate::ast::Pointer {
            ptr: PointerRef::Pointer(p),
            ..
        }) = &ir_set.rptr
        {
            out.push(*p);
        }
    }

    fn is_ptr_or_self_ref(&self, ir_expr: &Set, src_type: TypeId) -> bool {
        if !self.schema.is_object(src_type) || ir_expr.expr.is_some() {
            return false;
        }

        if self.schema.material_type(ir_expr.typ) == self.schema.material_type(src_type) {
            return true;
        }

        match &ir_expr.rptr {
            Some(crate::ast::Pointer {
                ptr: PointerRef::Pointer(p),
                ..
            }) => {
                let name = self.schema.ptr(*p).name.shortname().to_string();
                self.schema.getptr(src_type, &name).is_some()
            }
            _ => false,
        }
    }

    fn common(&mut self, args: &[&Set], scope: NodeId) -> IrResult<Cardinality> {
        let mut result = Cardinality::One;
        for arg in args {
            result = result.max(self.infer_set(arg, scope)?);
        }
        Ok(result)
    }

    fn set_scope(&self, ir_set: &Set, scope: NodeId) -> NodeId {
        match ir_set.path_scope_id {
            Some(unique_id) => self
                .tree
                .find_by_unique_id(self.tree.root_of(scope), unique_id)
                .unwrap_or(scope),
            None => scope,
        }
    }
}

fn is_const_one(limit: &Set) -> bool {
    matches!(
        &limit.expr,
        Some(Expr::Constant {
            value: ConstantValue::Int(1),
            ..
        })
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{IrBuilder, SelectStmt};
    use crate::path_id::PathId;
    use setlang_catalog::{Direction, SchemaBuilder};

    struct Fixture {
        schema: Schema,
        tree: ScopeTree,
    }

    fn fixture() -> Fixture {
        let mut builder = SchemaBuilder::new();
        let str_t = builder.scalar("std::str");
        let int_t = builder.scalar("std::int64");
        let user = builder.object_type("default::User");
        builder.pointer(user, "name", str_t).required().exclusive();
        builder.pointer(user, "nickname", str_t);
        let issue = builder.object_type("default::Issue");
        builder.pointer(issue, "number", int_t).required();
        builder.pointer(issue, "owner", user);
        builder.pointer(issue, "watchers", user).many();

        Fixture {
            schema: builder.finish(),
            tree: ScopeTree::new(),
        }
    }

    fn const_int(b: &mut IrBuilder, schema: &Schema, val: i64) -> Set {
        let int_t = schema.get("std::int64").unwrap();
        b.expr_set(
            PathId::from_type(schema, int_t),
            int_t,
            Expr::Constant {
                value: ConstantValue::Int(val),
                typ: int_t,
            },
        )
    }

    fn const_str(b: &mut IrBuilder, schema: &Schema, val: &str) -> Set {
        let str_t = schema.get("std::str").unwrap();
        b.expr_set(
            PathId::from_type(schema, str_t),
            str_t,
            Expr::Constant {
                value: ConstantValue::String(val.to_string()),
                typ: str_t,
            },
        )
    }

    #[test]
    fn test_constants_are_one() {
        let f = fixture();
        let mut b = IrBuilder::new();
        let c = const_int(&mut b, &f.schema, 42);
        let mut inf = CardinalityInference::new(&f.schema, &f.tree);
        assert_eq!(
            inf.infer_set(&c, f.tree.root()).unwrap(),
            Cardinality::One
        );
    }

    #[test]
    fn test_root_set_is_many() {
        let f = fixture();
        let mut b = IrBuilder::new();
        let user = f.schema.get("default::User").unwrap();
        let root = b.root_set(&f.schema, user);
        let mut inf = CardinalityInference::new(&f.schema, &f.tree);
        assert_eq!(
            inf.infer_set(&root, f.tree.root()).unwrap(),
            Cardinality::Many
        );
    }

    #[test]
    fn test_visible_path_is_reference() {
        let f = fixture();
        let mut tree = f.tree.clone();
        let mut b = IrBuilder::new();
        let user = f.schema.get("default::User").unwrap();
        let root = b.root_set(&f.schema, user);

        tree.attach_path(tree.root(), &root.path_id).unwrap();
        let fence = tree.attach_fence(tree.root());
        let inner = tree.attach_fence(fence);

        let mut inf = CardinalityInference::new(&f.schema, &tree);
        assert_eq!(
            inf.infer_set(&root, inner).unwrap(),
            Cardinality::One
        );
    }

    #[test]
    fn test_singular_step_inherits_source() {
        let f = fixture();
        let mut tree = f.tree.clone();
        let mut b = IrBuilder::new();
        let issue = f.schema.get("default::Issue").unwrap();
        let owner = f.schema.getptr(issue, "owner").unwrap();

        let root = b.root_set(&f.schema, issue);
        let root_path = root.path_id.clone();
        let step = b
            .step(&f.schema, root, owner, Direction::Outbound)
            .unwrap();

        // With the source visible, Issue.owner is ONE.
        tree.attach_path(tree.root(), &root_path).unwrap();
        let fence = tree.attach_fence(tree.root());
        let inner = tree.attach_fence(fence);
        let mut inf = CardinalityInference::new(&f.schema, &tree);
        assert_eq!(
            inf.infer_set(&step, inner).unwrap(),
            Cardinality::One
        );
    }

    #[test]
    fn test_many_step_is_many() {
        let f = fixture();
        let mut b = IrBuilder::new();
        let issue = f.schema.get("default::Issue").unwrap();
        let watchers = f.schema.getptr(issue, "watchers").unwrap();
        let root = b.root_set(&f.schema, issue);
        let step = b
            .step(&f.schema, root, watchers, Direction::Outbound)
            .unwrap();

        let mut inf = CardinalityInference::new(&f.schema, &f.tree);
        assert_eq!(
            inf.infer_set(&step, f.tree.root()).unwrap(),
            Cardinality::Many
        );
    }

    #[test]
    fn test_limit_one_collapses_select() {
        let f = fixture();
        let mut b = IrBuilder::new();
        let user = f.schema.get("default::User").unwrap();
        let result = b.root_set(&f.schema, user);
        let path = result.path_id.clone();
        let limit = const_int(&mut b, &f.schema, 1);

        let stmt = b.expr_set(
            path,
            user,
            Expr::Stmt(Box::new(Stmt::Select(SelectStmt {
                result,
                where_clause: None,
                orderby: Vec::new(),
                offset: None,
                limit: Some(limit),
                iterator: None,
                cardinality: None,
            }))),
        );

        let mut inf = CardinalityInference::new(&f.schema, &f.tree);
        assert_eq!(
            inf.infer_set(&stmt, f.tree.root()).unwrap(),
            Cardinality::One
        );
    }

    fn filtered_select(f: &Fixture, ptr_name: &str) -> Set {
        // SELECT User FILTER User.<ptr_name> = 'x'
        let mut b = IrBuilder::new();
        let user = f.schema.get("default::User").unwrap();
        let ptr = f.schema.getptr(user, ptr_name).unwrap();
        let bool_t = f.schema.get("std::bool").unwrap();

        let result = b.root_set(&f.schema, user);
        let path = result.path_id.clone();

        let lhs_root = b.root_set(&f.schema, user);
        let lhs = b
            .step(&f.schema, lhs_root, ptr, Direction::Outbound)
            .unwrap();
        let rhs = const_str(&mut b, &f.schema, "Elvis");

        let cond = b.expr_set(
            PathId::from_type(&f.schema, bool_t),
            bool_t,
            Expr::BinOp {
                op: BinOp::Eq,
                left: Box::new(lhs),
                right: Box::new(rhs),
            },
        );

        b.expr_set(
            path,
            user,
            Expr::Stmt(Box::new(Stmt::Select(SelectStmt {
                result,
                where_clause: Some(cond),
                orderby: Vec::new(),
                offset: None,
                limit: None,
                iterator: None,
                cardinality: None,
            }))),
        )
    }

    #[test]
    fn test_exclusive_filter_collapses_to_one() {
        let f = fixture();
        let stmt = filtered_select(&f, "name");
        let mut inf = CardinalityInference::new(&f.schema, &f.tree);
        assert_eq!(
            inf.infer_set(&stmt, f.tree.root()).unwrap(),
            Cardinality::One
        );
    }

    #[test]
    fn test_non_unique_filter_stays_many() {
        let f = fixture();
        let stmt = filtered_select(&f, "nickname");
        let mut inf = CardinalityInference::new(&f.schema, &f.tree);
        assert_eq!(
            inf.infer_set(&stmt, f.tree.root()).unwrap(),
            Cardinality::Many
        );
    }

    #[test]
    fn test_union_is_many_unless_exclusive() {
        let f = fixture();
        let mut b = IrBuilder::new();
        let int_t = f.schema.get("std::int64").unwrap();
        let l = const_int(&mut b, &f.schema, 1);
        let r = const_int(&mut b, &f.schema, 2);
        let path = PathId::from_type(&f.schema, int_t);

        let union = b.expr_set(
            path.clone(),
            int_t,
            Expr::SetOp {
                left: Box::new(l.clone()),
                right: Box::new(r.clone()),
                exclusive: false,
            },
        );
        let exclusive = b.expr_set(
            path,
            int_t,
            Expr::SetOp {
                left: Box::new(l),
                right: Box::new(r),
                exclusive: true,
            },
        );

        let mut inf = CardinalityInference::new(&f.schema, &f.tree);
        assert_eq!(
            inf.infer_set(&union, f.tree.root()).unwrap(),
            Cardinality::Many
        );
        assert_eq!(
            inf.infer_set(&exclusive, f.tree.root()).unwrap(),
            Cardinality::One
        );
    }

    #[test]
    fn test_set_of_argument_does_not_broaden() {
        let f = fixture();
        let mut b = IrBuilder::new();
        let int_t = f.schema.get("std::int64").unwrap();
        let user = f.schema.get("default::User").unwrap();
        let arg = b.root_set(&f.schema, user);

        let call = FunctionCall {
            func: crate::ast::FunctionRef {
                name: setlang_catalog::QualName::parse("std::count"),
                from_function: Some("count".to_string()),
                param_typemods: vec![TypeModifier::SetOf],
                param_types: vec![None],
                return_typemod: TypeModifier::Singleton,
                return_type: int_t,
                return_polymorphic: false,
                set_returning: false,
                aggregate: true,
                null_safe: true,
            },
            args: vec![arg],
            agg_sort: Vec::new(),
            agg_filter: None,
            agg_distinct: false,
            initial_value: None,
        };
        let set = b.expr_set(
            PathId::from_type(&f.schema, int_t),
            int_t,
            Expr::FunctionCall(call),
        );

        let mut inf = CardinalityInference::new(&f.schema, &f.tree);
        // The MANY argument is SET-OF, so the call stays ONE.
        assert_eq!(
            inf.infer_set(&set, f.tree.root()).unwrap(),
            Cardinality::One
        );
    }
}
