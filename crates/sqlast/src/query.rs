// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # Relations, range variables and the tree arena
//!
//! The relational tree is arena-backed: statements and base relations
//! live in [`SqlTree::rels`], range variables in [`SqlTree::rvars`], and
//! nodes reference each other through [`RelId`] / [`RVarId`] handles.
//! This is what lets several queries share one range variable and lets
//! the compiler keep mutating a statement after it has been registered in
//! path maps.
//!
//! ## Path bookkeeping
//!
//! Every relation carries a [`PathInfo`]; query relations additionally
//! carry a [`QueryInfo`]:
//!
//! - `path_outputs` — `(PathId, Aspect)` → output var in the target list;
//! - `path_namespace` — `(PathId, Aspect)` → column ref in this query;
//! - `path_rvar_map` — `(PathId, Aspect)` → range var supplying the path;
//! - `path_scope` — paths with guaranteed non-NULL rows (join bonds);
//! - `value_scope` — paths whose value aspect this node supplies;
//! - `path_id_mask` — paths suppressed in the outer namespace;
//! - `view_path_id_map` — outer-to-inner path rewrites for view
//!   subqueries.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use setlang_ir::PathId;

use crate::expr::{
    Alias, Aspect, FuncCall, OutputVar, ResTarget, SortBy, SqlExpr, UpdateTarget,
};

/// Handle to a relation in a [`SqlTree`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RelId(pub u32);

/// Handle to a range variable in a [`SqlTree`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RVarId(pub u32);

/// Path metadata carried by every relation
#[derive(Debug, Clone)]
pub struct PathInfo {
    /// The path id represented by the node
    pub path_id: Option<PathId>,
    /// Whether the node represents a distinct set
    pub is_distinct: bool,
    /// Paths necessary to perform joining
    pub path_scope: IndexSet<PathId>,
    /// Paths for which this node provides the value aspect
    pub value_scope: IndexSet<PathId>,
    /// Res-target outputs corresponding to paths
    pub path_outputs: IndexMap<(PathId, Aspect), OutputVar>,
    /// Paths suppressed in the outer namespace
    pub path_id_mask: IndexSet<PathId>,
}

impl Default for PathInfo {
    fn default() -> Self {
        Self {
            path_id: None,
            is_distinct: true,
            path_scope: IndexSet::new(),
            value_scope: IndexSet::new(),
            path_outputs: IndexMap::new(),
            path_id_mask: IndexSet::new(),
        }
    }
}

/// Query-level path bookkeeping
#[derive(Debug, Clone, Default)]
pub struct QueryInfo {
    /// Rewrites from outer to inner path ids for view subqueries
    pub view_path_id_map: IndexMap<PathId, PathId>,
    /// Range vars supplying each path aspect
    pub path_rvar_map: IndexMap<(PathId, Aspect), RVarId>,
    /// Column refs corresponding to paths in this query
    pub path_namespace: IndexMap<(PathId, Aspect), SqlExpr>,
    /// Whether the query may produce no row for an outer row
    pub nullable: bool,
    /// Alias hint used when the query is wrapped in a range var
    pub name: Option<String>,
    /// Attached common table expressions
    pub ctes: Vec<RelId>,
}

/// Set operation connecting two queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOperation {
    Union,
    Intersect,
    Except,
}

/// SELECT statement payload
#[derive(Debug, Clone, Default)]
pub struct SelectData {
    /// DISTINCT ON expressions; `Some(vec![])` is plain DISTINCT
    pub distinct_clause: Option<Vec<SqlExpr>>,
    pub target_list: Vec<ResTarget>,
    pub from_clause: Vec<FromItem>,
    pub where_clause: Option<SqlExpr>,
    pub group_clause: Vec<SqlExpr>,
    pub having: Option<SqlExpr>,
    /// Rows of a VALUES query
    pub values: Vec<SqlExpr>,
    pub sort_clause: Vec<SortBy>,
    pub limit_offset: Option<SqlExpr>,
    pub limit_count: Option<SqlExpr>,
    /// Set operation fields; when `op` is set, `larg`/`rarg` hold the
    /// operand queries and the clause fields above are unused
    pub op: Option<SetOperation>,
    pub all: bool,
    pub larg: Option<RelId>,
    pub rarg: Option<RelId>,
}

/// INSERT statement payload
#[derive(Debug, Clone)]
pub struct InsertData {
    pub relation: RVarId,
    pub cols: Vec<String>,
    pub select_stmt: Option<RelId>,
    pub returning_list: Vec<ResTarget>,
}

/// UPDATE statement payload
#[derive(Debug, Clone)]
pub struct UpdateData {
    pub relation: RVarId,
    pub targets: Vec<UpdateTarget>,
    pub where_clause: Option<SqlExpr>,
    pub from_clause: Vec<FromItem>,
    pub returning_list: Vec<ResTarget>,
}

/// DELETE statement payload
#[derive(Debug, Clone)]
pub struct DeleteData {
    pub relation: RVarId,
    pub where_clause: Option<SqlExpr>,
    pub using_clause: Vec<FromItem>,
    pub returning_list: Vec<ResTarget>,
}

/// Relation payloads
#[derive(Debug, Clone)]
pub enum RelKind {
    /// Named base table
    Relation { schema_name: String, name: String },

    /// Produces a single all-NULL row
    NullRelation {
        target_list: Vec<ResTarget>,
        where_clause: Option<SqlExpr>,
    },

    Select(SelectData),
    Insert(InsertData),
    Update(UpdateData),
    Delete(DeleteData),

    /// WITH query wrapper
    Cte { query: RelId, recursive: bool },
}

/// A relation node: payload plus path bookkeeping
#[derive(Debug, Clone)]
pub struct Rel {
    pub kind: RelKind,
    pub info: PathInfo,
    pub query: QueryInfo,
}

impl Rel {
    pub fn is_statement(&self) -> bool {
        matches!(
            self.kind,
            RelKind::Select(_) | RelKind::Insert(_) | RelKind::Update(_) | RelKind::Delete(_)
        )
    }

    pub fn is_base_relation(&self) -> bool {
        matches!(self.kind, RelKind::Relation { .. })
    }

    pub fn as_select(&self) -> Option<&SelectData> {
        match &self.kind {
            RelKind::Select(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_select_mut(&mut self) -> Option<&mut SelectData> {
        match &mut self.kind {
            RelKind::Select(data) => Some(data),
            _ => None,
        }
    }

    /// The projection list: `returning_list` for DML, `target_list`
    /// otherwise.
    pub fn target_list_mut(&mut self) -> &mut Vec<ResTarget> {
        match &mut self.kind {
            RelKind::Select(data) => &mut data.target_list,
            RelKind::Insert(data) => &mut data.returning_list,
            RelKind::Update(data) => &mut data.returning_list,
            RelKind::Delete(data) => &mut data.returning_list,
            RelKind::NullRelation { target_list, .. } => target_list,
            RelKind::Relation { .. } | RelKind::Cte { .. } => {
                panic!("base relations have no target list")
            }
        }
    }

    pub fn target_list(&self) -> &[ResTarget] {
        match &self.kind {
            RelKind::Select(data) => &data.target_list,
            RelKind::Insert(data) => &data.returning_list,
            RelKind::Update(data) => &data.returning_list,
            RelKind::Delete(data) => &data.returning_list,
            RelKind::NullRelation { target_list, .. } => target_list,
            RelKind::Relation { .. } | RelKind::Cte { .. } => &[],
        }
    }

    pub fn where_clause_mut(&mut self) -> &mut Option<SqlExpr> {
        match &mut self.kind {
            RelKind::Select(data) => &mut data.where_clause,
            RelKind::Update(data) => &mut data.where_clause,
            RelKind::Delete(data) => &mut data.where_clause,
            RelKind::NullRelation { where_clause, .. } => where_clause,
            _ => panic!("relation kind has no WHERE clause"),
        }
    }

    pub fn where_clause(&self) -> Option<&SqlExpr> {
        match &self.kind {
            RelKind::Select(data) => data.where_clause.as_ref(),
            RelKind::Update(data) => data.where_clause.as_ref(),
            RelKind::Delete(data) => data.where_clause.as_ref(),
            RelKind::NullRelation { where_clause, .. } => where_clause.as_ref(),
            _ => None,
        }
    }

    pub fn from_clause_mut(&mut self) -> &mut Vec<FromItem> {
        match &mut self.kind {
            RelKind::Select(data) => &mut data.from_clause,
            RelKind::Update(data) => &mut data.from_clause,
            RelKind::Delete(data) => &mut data.using_clause,
            _ => panic!("relation kind has no FROM clause"),
        }
    }

    pub fn from_clause(&self) -> &[FromItem] {
        match &self.kind {
            RelKind::Select(data) => &data.from_clause,
            RelKind::Update(data) => &data.from_clause,
            RelKind::Delete(data) => &data.using_clause,
            _ => &[],
        }
    }
}

/// Join types emitted by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
}

/// A JOIN tree node of a FROM clause
#[derive(Debug, Clone)]
pub struct JoinExpr {
    pub kind: JoinKind,
    pub larg: FromItem,
    pub rarg: FromItem,
    pub quals: Option<SqlExpr>,
}

/// A FROM clause item
#[derive(Debug, Clone)]
pub enum FromItem {
    RVar(RVarId),
    Join(Box<JoinExpr>),
}

impl FromItem {
    /// Every range var referenced by this item
    pub fn rvars(&self) -> Vec<RVarId> {
        match self {
            FromItem::RVar(rvar) => vec![*rvar],
            FromItem::Join(join) => {
                let mut result = join.larg.rvars();
                result.extend(join.rarg.rvars());
                result
            }
        }
    }
}

/// Range variable payloads
#[derive(Debug, Clone)]
pub enum RVarKind {
    /// Range over a base relation or CTE
    Relation(RelId),
    /// Range over a subquery
    Subselect(RelId),
    /// Range over set-returning functions
    Function {
        functions: Vec<FuncCall>,
        with_ordinality: bool,
    },
}

/// A FROM-clause range variable
#[derive(Debug, Clone)]
pub struct RangeVar {
    pub kind: RVarKind,
    pub alias: Alias,
    pub lateral: bool,
    /// Set when the rvar ends up on the nullable side of a join
    pub nullable: bool,
}

impl RangeVar {
    /// The relation this range var wraps, CTEs unwrapped to their query
    pub fn rel(&self, tree: &SqlTree) -> Option<RelId> {
        match self.kind {
            RVarKind::Relation(rel) | RVarKind::Subselect(rel) => {
                Some(tree.unwrap_cte(rel))
            }
            RVarKind::Function { .. } => None,
        }
    }
}

/// The arena owning all relations and range variables of one compilation
#[derive(Debug, Clone, Default)]
pub struct SqlTree {
    rels: Vec<Rel>,
    rvars: Vec<RangeVar>,
}

impl SqlTree {
    pub fn rel(&self, id: RelId) -> &Rel {
        &self.rels[id.0 as usize]
    }

    pub fn rel_mut(&mut self, id: RelId) -> &mut Rel {
        &mut self.rels[id.0 as usize]
    }

    pub fn rvar(&self, id: RVarId) -> &RangeVar {
        &self.rvars[id.0 as usize]
    }

    pub fn rvar_mut(&mut self, id: RVarId) -> &mut RangeVar {
        &mut self.rvars[id.0 as usize]
    }

    pub fn add_rel(&mut self, rel: Rel) -> RelId {
        let id = RelId(self.rels.len() as u32);
        self.rels.push(rel);
        id
    }

    pub fn add_rvar(&mut self, rvar: RangeVar) -> RVarId {
        let id = RVarId(self.rvars.len() as u32);
        self.rvars.push(rvar);
        id
    }

    /// A fresh empty SELECT
    pub fn new_select(&mut self) -> RelId {
        self.add_rel(Rel {
            kind: RelKind::Select(SelectData::default()),
            info: PathInfo::default(),
            query: QueryInfo::default(),
        })
    }

    /// A named base relation bound to `path_id`
    pub fn new_relation(
        &mut self,
        schema_name: impl Into<String>,
        name: impl Into<String>,
        path_id: Option<PathId>,
    ) -> RelId {
        self.add_rel(Rel {
            kind: RelKind::Relation {
                schema_name: schema_name.into(),
                name: name.into(),
            },
            info: PathInfo {
                path_id,
                ..PathInfo::default()
            },
            query: QueryInfo::default(),
        })
    }

    /// A relation producing a single all-NULL row for `path_id`
    pub fn new_null_relation(&mut self, path_id: Option<PathId>) -> RelId {
        self.add_rel(Rel {
            kind: RelKind::NullRelation {
                target_list: Vec::new(),
                where_clause: None,
            },
            info: PathInfo {
                path_id,
                ..PathInfo::default()
            },
            query: QueryInfo::default(),
        })
    }

    /// Wrap a query in a CTE node
    pub fn new_cte(&mut self, query: RelId, recursive: bool) -> RelId {
        self.add_rel(Rel {
            kind: RelKind::Cte { query, recursive },
            info: PathInfo::default(),
            query: QueryInfo::default(),
        })
    }

    /// Follow CTE wrappers to the underlying query
    pub fn unwrap_cte(&self, id: RelId) -> RelId {
        match &self.rel(id).kind {
            RelKind::Cte { query, .. } => self.unwrap_cte(*query),
            _ => id,
        }
    }

    /// Whether the relation is a set-operation query
    pub fn is_set_op_query(&self, id: RelId) -> bool {
        matches!(
            &self.rel(id).kind,
            RelKind::Select(SelectData { op: Some(_), .. })
        )
    }

    /// The non-set-op leaf queries of a UNION tree, left to right
    pub fn queries_in_set(&self, id: RelId) -> Vec<RelId> {
        match &self.rel(id).kind {
            RelKind::Select(SelectData {
                op: Some(_),
                larg: Some(larg),
                rarg: Some(rarg),
                ..
            }) => {
                let mut result = self.queries_in_set(*larg);
                result.extend(self.queries_in_set(*rarg));
                result
            }
            _ => vec![id],
        }
    }

    /// The leftmost non-set-op query of a UNION tree
    pub fn leftmost_query(&self, id: RelId) -> RelId {
        match &self.rel(id).kind {
            RelKind::Select(SelectData {
                op: Some(_),
                larg: Some(larg),
                ..
            }) => self.leftmost_query(*larg),
            _ => id,
        }
    }

    /// Range vars currently present in the FROM clause of `rel`
    pub fn from_rvars(&self, rel: RelId) -> Vec<RVarId> {
        self.rel(rel)
            .from_clause()
            .iter()
            .flat_map(|item| item.rvars())
            .collect()
    }

    /// All relations in the arena, in allocation order
    pub fn iter_rels(&self) -> impl Iterator<Item = (RelId, &Rel)> {
        self.rels
            .iter()
            .enumerate()
            .map(|(i, rel)| (RelId(i as u32), rel))
    }

    /// All range vars in the arena, in allocation order
    pub fn iter_rvars(&self) -> impl Iterator<Item = (RVarId, &RangeVar)> {
        self.rvars
            .iter()
            .enumerate()
            .map(|(i, rvar)| (RVarId(i as u32), rvar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_select_defaults() {
        let mut tree = SqlTree::default();
        let rel = tree.new_select();
        assert!(tree.rel(rel).is_statement());
        assert!(tree.rel(rel).info.is_distinct);
        assert!(tree.rel(rel).info.path_scope.is_empty());
        assert!(!tree.is_set_op_query(rel));
    }

    #[test]
    fn test_set_op_queries() {
        let mut tree = SqlTree::default();
        let larg = tree.new_select();
        let rarg = tree.new_select();
        let union = tree.new_select();
        {
            let data = tree.rel_mut(union).as_select_mut().unwrap();
            data.op = Some(SetOperation::Union);
            data.all = true;
            data.larg = Some(larg);
            data.rarg = Some(rarg);
        }

        assert!(tree.is_set_op_query(union));
        assert_eq!(tree.queries_in_set(union), vec![larg, rarg]);
        assert_eq!(tree.leftmost_query(union), larg);
    }

    #[test]
    fn test_cte_unwrap() {
        let mut tree = SqlTree::default();
        let query = tree.new_select();
        let cte = tree.new_cte(query, false);
        assert_eq!(tree.unwrap_cte(cte), query);
        assert_eq!(tree.unwrap_cte(query), query);
    }

    #[test]
    fn test_from_item_rvars() {
        let mut tree = SqlTree::default();
        let rel = tree.new_select();
        let a = tree.add_rvar(RangeVar {
            kind: RVarKind::Subselect(rel),
            alias: Alias::new("a"),
            lateral: false,
            nullable: false,
        });
        let b = tree.add_rvar(RangeVar {
            kind: RVarKind::Subselect(rel),
            alias: Alias::new("b"),
            lateral: false,
            nullable: false,
        });

        let join = FromItem::Join(Box::new(JoinExpr {
            kind: JoinKind::Inner,
            larg: FromItem::RVar(a),
            rarg: FromItem::RVar(b),
            quals: None,
        }));
        assert_eq!(join.rvars(), vec![a, b]);
    }
}
