// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # SQL expressions
//!
//! Expression nodes of the relational tree.  The structure follows
//! Postgres' parse nodes, restricted to what code generation needs.
//!
//! ## Nullability
//!
//! Every expression can report whether its result may be NULL; the flag
//! is inferred bottom-up:
//!
//! - column refs carry the flag assigned at resolution time;
//! - function calls are nullable unless declared null-safe, in which
//!   case nullability follows the arguments;
//! - `COALESCE` is nullable only if all operands are;
//! - `EXISTS` sublinks are never nullable.
//!
//! Column refs additionally carry an `optional` flag: an optional path
//! bond accepts NULL as a valid join value (produced by heterogeneous
//! UNION arms).

use serde::{Deserialize, Serialize};
use setlang_ir::PathId;

use crate::query::{RelId, SqlTree};

/// Output flavor of a path within a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Aspect {
    /// Primary key of an object path
    Identity,
    /// The row's value
    Value,
    /// The value encoded for output
    Serialized,
    /// The full source row of an object relation
    Source,
}

/// Alias of a range variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub aliasname: String,
    pub colnames: Vec<String>,
}

impl Alias {
    pub fn new(aliasname: impl Into<String>) -> Self {
        Self {
            aliasname: aliasname.into(),
            colnames: Vec::new(),
        }
    }

    pub fn with_colnames(mut self, colnames: Vec<String>) -> Self {
        self.colnames = colnames;
        self
    }
}

/// Type in casts and column definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeName {
    pub name: Vec<String>,
}

impl TypeName {
    pub fn new(name: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into_iter().map(Into::into).collect(),
        }
    }
}

/// A reference to a column of a range variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Possibly-qualified name path
    pub name: Vec<String>,
    /// Whether the result may be NULL
    pub nullable: bool,
    /// Whether the column is an optional path bond (NULL accepted)
    pub optional: bool,
}

impl ColumnRef {
    pub fn new(name: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into_iter().map(Into::into).collect(),
            nullable: false,
            optional: false,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// The unqualified column name
    pub fn colname(&self) -> &str {
        self.name.last().map(String::as_str).unwrap_or("")
    }
}

/// One element of a tuple-valued output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleElement {
    pub path_id: PathId,
    /// Attribute name in named tuples and shapes
    pub name: Option<String>,
    /// The output var the element resolves to on its source relation
    pub var: Option<OutputVar>,
    /// The computed value, when materialized
    pub val: Option<Box<SqlExpr>>,
}

impl TupleElement {
    pub fn new(path_id: PathId) -> Self {
        Self {
            path_id,
            name: None,
            var: None,
            val: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_var(mut self, var: OutputVar) -> Self {
        self.var = Some(var);
        self
    }

    pub fn with_val(mut self, val: SqlExpr) -> Self {
        self.val = Some(Box::new(val));
        self
    }
}

/// A logical tuple-valued output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleVar {
    pub elements: Vec<TupleElement>,
    pub named: bool,
    pub nullable: bool,
}

impl TupleVar {
    pub fn new(elements: Vec<TupleElement>, named: bool) -> Self {
        Self {
            elements,
            named,
            nullable: false,
        }
    }
}

/// An expression output address: a column ref or a tuple of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputVar {
    Column(ColumnRef),
    Tuple(TupleVar),
}

impl OutputVar {
    pub fn nullable(&self) -> bool {
        match self {
            OutputVar::Column(c) => c.nullable,
            OutputVar::Tuple(t) => t.nullable,
        }
    }

    pub fn optional(&self) -> bool {
        match self {
            OutputVar::Column(c) => c.optional,
            OutputVar::Tuple(_) => false,
        }
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            OutputVar::Column(c) => Some(c),
            OutputVar::Tuple(_) => None,
        }
    }

    pub fn into_expr(self) -> SqlExpr {
        match self {
            OutputVar::Column(c) => SqlExpr::Column(c),
            OutputVar::Tuple(t) => SqlExpr::Tuple(t),
        }
    }
}

/// Positional or named parameter reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRef {
    pub number: i32,
}

/// A WHEN arm of a CASE expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseWhen {
    pub expr: SqlExpr,
    pub result: SqlExpr,
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDir {
    #[default]
    Default,
    Asc,
    Desc,
}

/// NULL ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortNulls {
    First,
    Last,
}

/// ORDER BY clause element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortBy {
    pub node: SqlExpr,
    pub dir: SortDir,
    pub nulls: Option<SortNulls>,
}

/// WINDOW / OVER clause; an empty definition means `OVER ()`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowDef {
    pub partition_clause: Vec<SqlExpr>,
    pub order_clause: Vec<SortBy>,
}

/// A function call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncCall {
    /// Possibly schema-qualified function name
    pub name: Vec<String>,
    pub args: Vec<SqlExpr>,
    /// ORDER BY inside an aggregate
    pub agg_order: Vec<SortBy>,
    /// FILTER clause
    pub agg_filter: Option<Box<SqlExpr>>,
    /// DISTINCT modifier
    pub agg_distinct: bool,
    /// OVER clause
    pub over: Option<WindowDef>,
    pub with_ordinality: bool,
    pub nullable: bool,
}

impl FuncCall {
    /// A call that may return NULL regardless of its inputs
    pub fn new(
        name: impl IntoIterator<Item = impl Into<String>>,
        args: Vec<SqlExpr>,
    ) -> Self {
        Self {
            name: name.into_iter().map(Into::into).collect(),
            args,
            agg_order: Vec::new(),
            agg_filter: None,
            agg_distinct: false,
            over: None,
            with_ordinality: false,
            nullable: true,
        }
    }

    /// A call guaranteed to never return NULL on non-NULL input;
    /// nullability follows the arguments.
    pub fn new_null_safe(
        name: impl IntoIterator<Item = impl Into<String>>,
        args: Vec<SqlExpr>,
        tree: &SqlTree,
    ) -> Self {
        let nullable = args.iter().any(|a| a.nullable(tree));
        Self {
            nullable,
            ..Self::new(name, args)
        }
    }

    pub fn with_over(mut self, over: WindowDef) -> Self {
        self.over = Some(over);
        self
    }
}

/// Array subscript or slice bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indices {
    pub is_slice: bool,
    pub lidx: Option<Box<SqlExpr>>,
    pub ridx: Option<Box<SqlExpr>>,
}

/// Kind of a sublink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubLinkKind {
    Exists,
    NotExists,
}

/// The expression sum type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SqlExpr {
    /// Column reference
    Column(ColumnRef),

    /// `$n` parameter reference
    Param(ParamRef),

    /// NULL literal
    Null,

    /// String literal
    String(String),

    /// Numeric literal kept as source text
    Numeric(String),

    /// Boolean literal
    Boolean(bool),

    /// Function call
    FuncCall(FuncCall),

    /// Infix/prefix operator; `lexpr` absent for prefix operators
    Op {
        name: String,
        lexpr: Option<Box<SqlExpr>>,
        rexpr: Option<Box<SqlExpr>>,
    },

    /// CASE expression
    Case {
        arg: Option<Box<SqlExpr>>,
        whens: Vec<CaseWhen>,
        defresult: Option<Box<SqlExpr>>,
    },

    /// COALESCE(...)
    Coalesce { args: Vec<SqlExpr> },

    /// `IS [NOT] NULL`
    NullTest { arg: Box<SqlExpr>, negated: bool },

    /// `[NOT] EXISTS (subquery)`
    SubLink { kind: SubLinkKind, rel: RelId },

    /// `ROW(...)`
    Row { args: Vec<SqlExpr> },

    /// `(a, b, c)`
    ImplicitRow { args: Vec<SqlExpr> },

    /// `ARRAY[...]`
    Array { elements: Vec<SqlExpr> },

    /// Subscript/slice indirection
    Indirection {
        arg: Box<SqlExpr>,
        indices: Indices,
    },

    /// `expr::type`
    TypeCast {
        arg: Box<SqlExpr>,
        type_name: TypeName,
    },

    /// A tuple-valued logical output
    Tuple(TupleVar),

    /// A query used in expression position (IN rhs, COALESCE arm)
    Subquery(RelId),
}

impl SqlExpr {
    /// Bottom-up nullability; subqueries consult the owning tree.
    pub fn nullable(&self, tree: &SqlTree) -> bool {
        match self {
            SqlExpr::Column(c) => c.nullable,
            SqlExpr::Param(_) => false,
            SqlExpr::Null => true,
            SqlExpr::String(_) | SqlExpr::Numeric(_) | SqlExpr::Boolean(_) => false,
            SqlExpr::FuncCall(f) => f.nullable,
            SqlExpr::Op { lexpr, rexpr, .. } => {
                lexpr.as_ref().is_some_and(|e| e.nullable(tree))
                    || rexpr.as_ref().is_some_and(|e| e.nullable(tree))
            }
            SqlExpr::Case { defresult, .. } => {
                defresult.as_ref().is_some_and(|e| e.nullable(tree))
            }
            SqlExpr::Coalesce { args } => args.iter().all(|a| a.nullable(tree)),
            SqlExpr::NullTest { arg, .. } => arg.nullable(tree),
            SqlExpr::SubLink { .. } => false,
            SqlExpr::Row { .. } | SqlExpr::ImplicitRow { .. } | SqlExpr::Array { .. } => false,
            SqlExpr::Indirection { arg, .. } => arg.nullable(tree),
            SqlExpr::TypeCast { arg, .. } => arg.nullable(tree),
            SqlExpr::Tuple(t) => t.nullable,
            SqlExpr::Subquery(rel) => tree.rel(*rel).query.nullable,
        }
    }

    /// Whether this is a NULL constant, looking through casts
    pub fn is_null_const(&self) -> bool {
        match self {
            SqlExpr::Null => true,
            SqlExpr::TypeCast { arg, .. } => arg.is_null_const(),
            _ => false,
        }
    }

    pub fn int(value: i64) -> SqlExpr {
        SqlExpr::Numeric(value.to_string())
    }
}

/// A projection entry of a target list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResTarget {
    pub name: Option<String>,
    pub val: SqlExpr,
}

impl ResTarget {
    pub fn new(val: SqlExpr) -> Self {
        Self { name: None, val }
    }

    pub fn named(name: impl Into<String>, val: SqlExpr) -> Self {
        Self {
            name: Some(name.into()),
            val,
        }
    }
}

/// An UPDATE SET entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTarget {
    pub name: String,
    pub val: SqlExpr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SqlTree;

    #[test]
    fn test_column_ref() {
        let col = ColumnRef::new(["u", "name"]).with_nullable(true);
        assert_eq!(col.colname(), "name");
        assert!(col.nullable);
        assert!(!col.optional);
    }

    #[test]
    fn test_func_call_nullability() {
        let tree = SqlTree::default();
        let plain = FuncCall::new(["lower"], vec![SqlExpr::String("A".into())]);
        assert!(plain.nullable);

        let safe = FuncCall::new_null_safe(
            ["lower"],
            vec![SqlExpr::String("A".into())],
            &tree,
        );
        assert!(!safe.nullable);

        let safe_with_null_arg =
            FuncCall::new_null_safe(["lower"], vec![SqlExpr::Null], &tree);
        assert!(safe_with_null_arg.nullable);
    }

    #[test]
    fn test_coalesce_nullability() {
        let tree = SqlTree::default();
        let some_null = SqlExpr::Coalesce {
            args: vec![SqlExpr::Null, SqlExpr::Boolean(true)],
        };
        assert!(!some_null.nullable(&tree));

        let all_null = SqlExpr::Coalesce {
            args: vec![
                SqlExpr::Null,
                SqlExpr::Column(ColumnRef::new(["x"]).with_nullable(true)),
            ],
        };
        assert!(all_null.nullable(&tree));
    }

    #[test]
    fn test_null_const_through_cast() {
        let cast = SqlExpr::TypeCast {
            arg: Box::new(SqlExpr::Null),
            type_name: TypeName::new(["int"]),
        };
        assert!(cast.is_null_const());
        assert!(!SqlExpr::Boolean(false).is_null_const());
    }

    #[test]
    fn test_exists_never_nullable() {
        let mut tree = SqlTree::default();
        let rel = tree.new_select();
        tree.rel_mut(rel).query.nullable = true;

        let exists = SqlExpr::SubLink {
            kind: SubLinkKind::Exists,
            rel,
        };
        assert!(!exists.nullable(&tree));
        // While a bare subquery reference follows the rel's flag.
        assert!(SqlExpr::Subquery(rel).nullable(&tree));
    }
}
