// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # Typed IR
//!
//! The input of the lowering pass: a tree of [`Set`] nodes.  A set is the
//! universal wrapper — it carries a [`PathId`], optionally an expression,
//! optionally a pointer edge back to the parent set (`rptr`), optionally
//! a shape, and optionally a link into the scope tree.
//!
//! ## Structure
//!
//! ```text
//! Set ── rptr ──> Pointer ── source ──> Set ── ... (path spine)
//!  │
//!  └── expr ──> Expr (statements, operators, collections, ...)
//! ```
//!
//! Expressions own their operand sets; a path expression is a chain of
//! sets linked through pointers, deepest step outermost.

use serde::{Deserialize, Serialize};
use setlang_catalog::{Cardinality, Direction, QualName, Schema, TypeId};

use crate::error::IrResult;
use crate::path_id::{PathId, PointerRef};
use crate::scope_tree::ScopeTree;

/// Unique id of a [`Set`] within one compilation; keys memo tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SetId(pub u32);

/// The universal IR wrapper
#[derive(Debug, Clone)]
pub struct Set {
    pub id: SetId,
    pub path_id: PathId,
    /// The set's element type
    pub typ: TypeId,
    /// Link into the scope tree (`unique_id` of the scope node)
    pub path_scope_id: Option<u32>,
    pub expr: Option<Expr>,
    pub rptr: Option<Pointer>,
    /// Shape projection attached to this set
    pub shape: Vec<Set>,
}

impl Set {
    /// Whether this set wraps a statement (explicit or implicit
    /// subquery).
    pub fn is_subquery_set(&self) -> bool {
        matches!(self.expr, Some(Expr::Stmt(_)))
    }

    /// Whether this set encapsulates a view: a SELECT whose result is
    /// itself a set.
    pub fn is_view_set(&self) -> bool {
        matches!(
            &self.expr,
            Some(Expr::Stmt(stmt)) if matches!(**stmt, Stmt::Select(_))
        )
    }

    /// Whether this is the empty set literal
    pub fn is_empty_set(&self) -> bool {
        match &self.expr {
            Some(Expr::EmptySet) => true,
            Some(Expr::Array { elements }) => elements.is_empty(),
            _ => false,
        }
    }

    /// A chain of plain pointer steps with no computed segments
    pub fn is_simple_path(&self) -> bool {
        self.expr.is_none()
            && match &self.rptr {
                None => true,
                Some(rptr) => rptr.source.is_simple_path(),
            }
    }

    /// Whether this is a single-element scalar path over a view type
    pub fn is_scalar_view_set(&self, schema: &Schema) -> bool {
        self.path_id.len() == 1
            && self.path_id.is_scalar_path(schema)
            && self
                .path_id
                .target()
                .is_some_and(|t| schema.is_view(t))
    }
}

/// A pointer navigation edge from a set back to its source
#[derive(Debug, Clone)]
pub struct Pointer {
    pub source: Box<Set>,
    pub ptr: PointerRef,
    pub direction: Direction,
}

impl Pointer {
    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }
}

/// Parameter passing modes of function parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeModifier {
    /// Exactly one value
    Singleton,
    /// Zero or one value
    Optional,
    /// A whole set; does not broaden call cardinality
    SetOf,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Like,
    ILike,
    In,
    NotIn,
}

impl BinOp {
    pub fn is_membership(self) -> bool {
        matches!(self, BinOp::In | BinOp::NotIn)
    }

    /// The SQL operator text for directly translatable operators
    pub fn sql_name(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "=",
            BinOp::NotEq => "<>",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Like => "~~",
            BinOp::ILike => "~~*",
            BinOp::In => "IN",
            BinOp::NotIn => "NOT IN",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn sql_name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "NOT",
        }
    }
}

/// `?=` / `?!=`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquivalenceOp {
    Equivalent,
    NotEquivalent,
}

/// `IS` / `IS NOT` type checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCheckOp {
    Is,
    IsNot,
}

/// Constant values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstantValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Sort direction for ORDER BY items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// NULL ordering for ORDER BY items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullsOrder {
    First,
    Last,
}

/// An ORDER BY item
#[derive(Debug, Clone)]
pub struct SortExpr {
    pub expr: Set,
    pub direction: SortDirection,
    pub nulls: Option<NullsOrder>,
}

/// One element of a tuple constructor
#[derive(Debug, Clone)]
pub struct TupleElement {
    pub name: String,
    pub val: Set,
}

/// Description of the called function; the IR carries the metadata the
/// compiler needs so that function resolution stays outside the core.
#[derive(Debug, Clone)]
pub struct FunctionRef {
    pub name: QualName,
    /// Backend function to call directly, overriding name mangling
    pub from_function: Option<String>,
    /// Parameter passing modes, one per parameter
    pub param_typemods: Vec<TypeModifier>,
    /// Parameter types; polymorphic parameters are `None`
    pub param_types: Vec<Option<TypeId>>,
    pub return_typemod: TypeModifier,
    pub return_type: TypeId,
    /// Whether the return type is polymorphic (`anytype`)
    pub return_polymorphic: bool,
    pub set_returning: bool,
    pub aggregate: bool,
    /// Never returns NULL on non-NULL input
    pub null_safe: bool,
}

impl FunctionRef {
    /// Whether any parameter is SET-OF, making this an aggregate-style
    /// call.
    pub fn has_set_of_param(&self) -> bool {
        self.param_typemods
            .iter()
            .any(|&m| m == TypeModifier::SetOf)
    }

    /// Whether a polymorphic argument flows to a polymorphic return,
    /// making serialized input safe to aggregate directly.
    pub fn serialization_safe(&self) -> bool {
        self.return_polymorphic && self.param_types.iter().any(|t| t.is_none())
    }
}

/// A function or operator call
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub func: FunctionRef,
    pub args: Vec<Set>,
    /// ORDER BY inside an aggregate call
    pub agg_sort: Vec<SortExpr>,
    /// FILTER clause of an aggregate call
    pub agg_filter: Option<Box<Set>>,
    /// DISTINCT modifier of an aggregate call
    pub agg_distinct: bool,
    /// Fold-with-default value wrapped as `COALESCE(agg, iv)`
    pub initial_value: Option<Box<Set>>,
}

/// The expression sum type
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Expr {
    /// `{}`
    EmptySet,

    /// Literal constant with its schema type
    Constant { value: ConstantValue, typ: TypeId },

    /// Query parameter
    Parameter { name: String, typ: TypeId },

    /// Reference to a schema type as a value
    TypeRef { typ: TypeId },

    /// `[a, b, c]`
    Array { elements: Vec<Set> },

    /// `(a := x, b := y)` or `(x, y)`
    Tuple {
        named: bool,
        elements: Vec<TupleElement>,
    },

    /// `tuple.name`
    TupleIndirection { expr: Box<Set>, name: String },

    /// `expr[index]`
    IndexIndirection { expr: Box<Set>, index: Box<Set> },

    /// `expr[start:stop]`; unspecified bounds are empty sets
    SliceIndirection {
        expr: Box<Set>,
        start: Box<Set>,
        stop: Box<Set>,
    },

    /// Binary operator application
    BinOp {
        op: BinOp,
        left: Box<Set>,
        right: Box<Set>,
    },

    /// Unary operator application
    UnaryOp { op: UnaryOp, expr: Box<Set> },

    /// `?=` / `?!=`
    EquivalenceOp {
        op: EquivalenceOp,
        left: Box<Set>,
        right: Box<Set>,
    },

    /// `expr IS type`
    TypeCheckOp {
        op: TypeCheckOp,
        left: Box<Set>,
        right: Box<Set>,
    },

    /// UNION; `exclusive` marks IF/ELSE-derived unions whose arms cannot
    /// both produce rows
    SetOp {
        left: Box<Set>,
        right: Box<Set>,
        exclusive: bool,
    },

    /// `DISTINCT expr`
    DistinctOp { expr: Box<Set> },

    /// `if_expr IF condition ELSE else_expr`
    IfElse {
        condition: Box<Set>,
        if_expr: Box<Set>,
        else_expr: Box<Set>,
    },

    /// `left ?? right`
    Coalesce { left: Box<Set>, right: Box<Set> },

    /// `EXISTS expr`
    Exists { expr: Box<Set>, negated: bool },

    /// `<type>expr`
    TypeCast { expr: Box<Set>, to: TypeId },

    /// Function or operator call with schema metadata
    FunctionCall(FunctionCall),

    /// A nested statement
    Stmt(Box<Stmt>),
}

/// Statement forms
#[derive(Debug, Clone)]
pub enum Stmt {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    Group(GroupStmt),
}

impl Stmt {
    pub fn result(&self) -> &Set {
        match self {
            Stmt::Select(s) => &s.result,
            Stmt::Insert(s) => &s.subject,
            Stmt::Update(s) => &s.subject,
            Stmt::Delete(s) => &s.subject,
            Stmt::Group(s) => &s.result,
        }
    }

    pub fn iterator(&self) -> Option<&Set> {
        match self {
            Stmt::Select(s) => s.iterator.as_deref(),
            Stmt::Insert(s) => s.iterator.as_deref(),
            Stmt::Update(s) => s.iterator.as_deref(),
            Stmt::Delete(s) => s.iterator.as_deref(),
            Stmt::Group(_) => None,
        }
    }
}

/// SELECT (and FOR) statement
#[derive(Debug, Clone)]
pub struct SelectStmt {
    pub result: Set,
    pub where_clause: Option<Set>,
    pub orderby: Vec<SortExpr>,
    pub offset: Option<Set>,
    pub limit: Option<Set>,
    pub iterator: Option<Box<Set>>,
    /// Declared cardinality override
    pub cardinality: Option<Cardinality>,
}

/// INSERT statement; the subject carries the shape being inserted
#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub subject: Set,
    pub iterator: Option<Box<Set>>,
    pub cardinality: Option<Cardinality>,
}

/// UPDATE statement; the subject carries the new shape
#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub subject: Set,
    pub where_clause: Option<Set>,
    pub iterator: Option<Box<Set>>,
    pub cardinality: Option<Cardinality>,
}

/// DELETE statement
#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub subject: Set,
    pub where_clause: Option<Set>,
    pub iterator: Option<Box<Set>>,
    pub cardinality: Option<Cardinality>,
}

/// GROUP statement
#[derive(Debug, Clone)]
pub struct GroupStmt {
    pub subject: Set,
    pub groupby: Vec<Set>,
    pub result: Set,
    pub group_path_id: PathId,
}

/// The compiled unit handed to the lowering pass: the root set plus the
/// scope tree produced by elaboration.
#[derive(Debug, Clone)]
pub struct Statement {
    pub expr: Set,
    pub scope_tree: ScopeTree,
    pub cardinality: Option<Cardinality>,
}

/// Extend an object path with its `id` pointer
pub fn get_id_path_id(schema: &Schema, path_id: &PathId) -> IrResult<PathId> {
    let target = path_id
        .target()
        .expect("id path of an empty PathId");
    let id_ptr = schema
        .id_pointer(target)
        .map_err(|e| crate::error::IrError::InvalidPathId(e.to_string()))?;
    path_id.extend(schema, id_ptr, Direction::Outbound, None)
}

/// Allocates set and scope ids while IR trees are being built; used by
/// elaboration and tests.
#[derive(Debug, Default)]
pub struct IrBuilder {
    next_set: u32,
}

impl IrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> SetId {
        let id = SetId(self.next_set);
        self.next_set += 1;
        id
    }

    /// A plain root set over an object type
    pub fn root_set(&mut self, schema: &Schema, typ: TypeId) -> Set {
        Set {
            id: self.next_id(),
            path_id: PathId::from_type(schema, typ),
            typ,
            path_scope_id: None,
            expr: None,
            rptr: None,
            shape: Vec::new(),
        }
    }

    /// A pointer step off `source`
    pub fn step(
        &mut self,
        schema: &Schema,
        source: Set,
        ptr: setlang_catalog::PtrId,
        direction: Direction,
    ) -> IrResult<Set> {
        let pointer = schema.ptr(ptr);
        let target = match direction {
            Direction::Outbound => pointer.target,
            Direction::Inbound => pointer.source,
        };
        let path_id = source.path_id.extend(schema, ptr, direction, None)?;
        Ok(Set {
            id: self.next_id(),
            path_id,
            typ: target,
            path_scope_id: None,
            expr: None,
            rptr: Some(Pointer {
                source: Box::new(source),
                ptr: PointerRef::Pointer(ptr),
                direction,
            }),
            shape: Vec::new(),
        })
    }

    /// A set wrapping an expression at the given path
    pub fn expr_set(&mut self, path_id: PathId, typ: TypeId, expr: Expr) -> Set {
        Set {
            id: self.next_id(),
            path_id,
            typ,
            path_scope_id: None,
            expr: Some(expr),
            rptr: None,
            shape: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use setlang_catalog::SchemaBuilder;

    fn sample_schema() -> Schema {
        let mut builder = SchemaBuilder::new();
        let str_t = builder.scalar("std::str");
        let user = builder.object_type("default::User");
        builder.pointer(user, "name", str_t).required();
        builder.finish()
    }

    #[test]
    fn test_simple_path_detection() {
        let schema = sample_schema();
        let mut b = IrBuilder::new();
        let user = schema.get("default::User").unwrap();
        let name = schema.getptr(user, "name").unwrap();

        let root = b.root_set(&schema, user);
        assert!(root.is_simple_path());

        let stepped = b
            .step(&schema, root, name, Direction::Outbound)
            .unwrap();
        assert!(stepped.is_simple_path());
        assert_eq!(stepped.path_id.rptr_name(), Some("name"));
    }

    #[test]
    fn test_subquery_set_detection() {
        let schema = sample_schema();
        let mut b = IrBuilder::new();
        let user = schema.get("default::User").unwrap();

        let inner = b.root_set(&schema, user);
        let path = inner.path_id.clone();
        let stmt = Stmt::Select(SelectStmt {
            result: inner,
            where_clause: None,
            orderby: Vec::new(),
            offset: None,
            limit: None,
            iterator: None,
            cardinality: None,
        });
        let wrapper = b.expr_set(path, user, Expr::Stmt(Box::new(stmt)));

        assert!(wrapper.is_subquery_set());
        assert!(wrapper.is_view_set());
        assert!(!wrapper.is_simple_path());
    }

    #[test]
    fn test_empty_set_detection() {
        let schema = sample_schema();
        let mut b = IrBuilder::new();
        let user = schema.get("default::User").unwrap();
        let path = PathId::from_type(&schema, user);

        let empty = b.expr_set(path.clone(), user, Expr::EmptySet);
        assert!(empty.is_empty_set());

        let empty_array = b.expr_set(path, user, Expr::Array { elements: vec![] });
        assert!(empty_array.is_empty_set());
    }

    #[test]
    fn test_id_path_extension() {
        let schema = sample_schema();
        let user = schema.get("default::User").unwrap();
        let path = PathId::from_type(&schema, user);
        let id_path = get_id_path_id(&schema, &path).unwrap();
        assert_eq!(id_path.rptr_name(), Some("id"));
        assert!(id_path.startswith(&path));
    }
}
