// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! End-to-end lowering scenarios: hand-built IR trees compiled against
//! a small issue-tracker schema.

use setlang_catalog::{Cardinality, Direction, PtrId, Schema, SchemaBuilder, TypeId};
use setlang_ir::{
    BinOp, CardinalityInference, ConstantValue, Expr, IrBuilder, PathId, ScopeTree, SelectStmt,
    Set, Statement, Stmt,
};
use setlang_lowering::{CompileOptions, OutputFormat, compile_ir_to_sql_tree};
use setlang_sqlast::{FuncCall, RelKind, SqlExpr};

struct Fixture {
    schema: Schema,
    user: TypeId,
    issue: TypeId,
    user_name: PtrId,
    issue_number: PtrId,
    issue_owner: PtrId,
}

fn fixture() -> Fixture {
    let mut builder = SchemaBuilder::new();
    let str_t = builder.scalar("std::str");
    let int_t = builder.scalar("std::int64");

    let user = builder.object_type("default::User");
    let user_name = builder
        .pointer(user, "name", str_t)
        .required()
        .exclusive()
        .finish();

    let issue = builder.object_type("default::Issue");
    let issue_number = builder.pointer(issue, "number", int_t).required().finish();
    let issue_owner = builder.pointer(issue, "owner", user).exclusive().finish();

    Fixture {
        schema: builder.finish(),
        user,
        issue,
        user_name,
        issue_number,
        issue_owner,
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

/// All expressions reachable in the tree, flattened for structural
/// assertions.
fn walk_exprs(tree: &setlang_sqlast::SqlTree) -> Vec<&SqlExpr> {
    fn walk<'a>(expr: &'a SqlExpr, out: &mut Vec<&'a SqlExpr>) {
        out.push(expr);
        match expr {
            SqlExpr::FuncCall(FuncCall { args, agg_filter, .. }) => {
                for arg in args {
                    walk(arg, out);
                }
                if let Some(filter) = agg_filter {
                    walk(filter, out);
                }
            }
            SqlExpr::Op { lexpr, rexpr, .. } => {
                if let Some(l) = lexpr {
                    walk(l, out);
                }
                if let Some(r) = rexpr {
                    walk(r, out);
                }
            }
            SqlExpr::Coalesce { args } | SqlExpr::Row { args } | SqlExpr::ImplicitRow { args } => {
                for arg in args {
                    walk(arg, out);
                }
            }
            SqlExpr::Case { whens, defresult, .. } => {
                for when in whens {
                    walk(&when.expr, out);
                    walk(&when.result, out);
                }
                if let Some(d) = defresult {
                    walk(d, out);
                }
            }
            SqlExpr::NullTest { arg, .. }
            | SqlExpr::TypeCast { arg, .. }
            | SqlExpr::Indirection { arg, .. } => walk(arg, out),
            SqlExpr::Array { elements } => {
                for el in elements {
                    walk(el, out);
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    for (_, rel) in tree.iter_rels() {
        for target in rel.target_list() {
            walk(&target.val, &mut out);
        }
        if let Some(w) = rel.where_clause() {
            walk(w, &mut out);
        }
        if let RelKind::Select(data) = &rel.kind {
            for value in &data.values {
                walk(value, &mut out);
            }
            for sort in &data.sort_clause {
                walk(&sort.node, &mut out);
            }
        }
    }
    out
}

fn has_func_call(tree: &setlang_sqlast::SqlTree, name: &str) -> bool {
    walk_exprs(tree).iter().any(|e| {
        matches!(e, SqlExpr::FuncCall(f) if f.name.last().is_some_and(|n| n == name))
    })
}

/// Scenario: a singleton filter over a unique pointer.
///
/// `SELECT User FILTER User.name = 'Elvis'` where `name` is exclusive:
/// the statement infers ONE and compiles without the optional-rel
/// scaffold.
#[test]
fn test_singleton_filter_on_unique_pointer() {
    let f = fixture();
    let mut b = IrBuilder::new();

    let result = b.root_set(&f.schema, f.user);
    let result_path = result.path_id.clone();

    let lhs_root = b.root_set(&f.schema, f.user);
    let lhs = b
        .step(&f.schema, lhs_root, f.user_name, Direction::Outbound)
        .unwrap();
    let rhs = const_str(&mut b, &f.schema, "Elvis");

    let bool_t = f.schema.get("std::bool").unwrap();
    let cond = b.expr_set(
        PathId::from_type(&f.schema, bool_t),
        bool_t,
        Expr::BinOp {
            op: BinOp::Eq,
            left: Box::new(lhs),
            right: Box::new(rhs),
        },
    );

    let select = b.expr_set(
        result_path.clone(),
        f.user,
        Expr::Stmt(Box::new(Stmt::Select(SelectStmt {
            result,
            where_clause: Some(cond),
            orderby: Vec::new(),
            offset: None,
            limit: None,
            iterator: None,
            cardinality: None,
        }))),
    );

    let mut scope_tree = ScopeTree::new();
    scope_tree
        .attach_path(scope_tree.root(), &result_path)
        .unwrap();

    // Cardinality: the exclusive filter collapses the statement to ONE.
    let mut inference = CardinalityInference::new(&f.schema, &scope_tree);
    assert_eq!(
        inference.infer_set(&select, scope_tree.root()).unwrap(),
        Cardinality::One
    );

    let ir = Statement {
        expr: select,
        scope_tree,
        cardinality: Some(Cardinality::One),
    };

    let compiled = compile_ir_to_sql_tree(
        &ir,
        &f.schema,
        &CompileOptions {
            ignore_shapes: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();

    // The result is the User identity, aliased {type}_{aspect}.
    let root = compiled.tree.rel(compiled.root);
    assert!(
        root.target_list()
            .iter()
            .any(|t| t.name.as_deref().is_some_and(|n| n.starts_with("User_value"))),
        "expected a User_value output in the top target list"
    );

    // No optional-rel scaffold for a plain singleton filter.
    assert!(!has_func_call(&compiled.tree, "first_value"));

    // The User table is ranged over exactly once.
    let user_rels = compiled
        .tree
        .iter_rels()
        .filter(|(_, rel)| {
            matches!(&rel.kind, RelKind::Relation { name, .. } if name == "User")
        })
        .count();
    assert_eq!(user_rels, 1);
}

/// Scenario: a multi-step inbound path with a visible source.
///
/// `User.<owner.number` ranges over the `Issue_owner` mapping table and
/// the `Issue` table, joined on identity.
#[test]
fn test_inbound_path_uses_mapping_table() {
    let f = fixture();
    let mut b = IrBuilder::new();

    let user_root = b.root_set(&f.schema, f.user);
    let owner_step = b
        .step(&f.schema, user_root, f.issue_owner, Direction::Inbound)
        .unwrap();
    assert_eq!(owner_step.typ, f.issue);
    let number_step = b
        .step(&f.schema, owner_step, f.issue_number, Direction::Outbound)
        .unwrap();
    let full_path = number_step.path_id.clone();

    let mut scope_tree = ScopeTree::new();
    scope_tree.attach_path(scope_tree.root(), &full_path).unwrap();

    let ir = Statement {
        expr: number_step,
        scope_tree,
        cardinality: None,
    };

    let compiled = compile_ir_to_sql_tree(
        &ir,
        &f.schema,
        &CompileOptions {
            ignore_shapes: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();

    // The pointer mapping table appears as a base relation.
    assert!(
        compiled
            .tree
            .iter_rels()
            .any(|(_, rel)| matches!(&rel.kind, RelKind::Relation { name, .. }
                if name == "Issue_owner")),
        "expected a range over the Issue_owner mapping table"
    );

    // The result column is Issue's number.
    let root = compiled.tree.rel(compiled.root);
    assert!(
        root.target_list()
            .iter()
            .any(|t| t.name.as_deref().is_some_and(|n| n.starts_with("number_value"))),
        "expected a number_value output"
    );

    // Alias uniqueness across the whole environment.
    let mut aliases = std::collections::HashSet::new();
    for (_, rvar) in compiled.tree.iter_rvars() {
        assert!(
            aliases.insert(rvar.alias.aliasname.clone()),
            "duplicate range var alias {}",
            rvar.alias.aliasname
        );
    }
}

/// Scenario: non-singleton coalesce.
///
/// `A ?? B` with a MANY right-hand side emits the marker-UNION scaffold
/// filtered by `marker = first_value(marker) OVER ()`.
#[test]
fn test_non_singleton_coalesce_emits_marker_union() {
    let f = fixture();
    let mut b = IrBuilder::new();
    let int_t = f.schema.get("std::int64").unwrap();

    let left = const_int(&mut b, &f.schema, 1);

    let union_left = const_int(&mut b, &f.schema, 2);
    let union_right = const_int(&mut b, &f.schema, 3);
    let right = b.expr_set(
        PathId::from_type(&f.schema, int_t),
        int_t,
        Expr::SetOp {
            left: Box::new(union_left),
            right: Box::new(union_right),
            exclusive: false,
        },
    );

    let coalesce = b.expr_set(
        PathId::from_type(&f.schema, int_t),
        int_t,
        Expr::Coalesce {
            left: Box::new(left),
            right: Box::new(right),
        },
    );

    let ir = Statement {
        expr: coalesce,
        scope_tree: ScopeTree::new(),
        cardinality: None,
    };

    let compiled = compile_ir_to_sql_tree(
        &ir,
        &f.schema,
        &CompileOptions {
            ignore_shapes: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();

    assert!(
        has_func_call(&compiled.tree, "first_value"),
        "expected the marker-UNION scaffold"
    );

    // The scaffold unions the two arms.
    assert!(compiled.tree.iter_rels().any(|(id, _)| {
        compiled.tree.is_set_op_query(id)
    }));
}

/// Scenario: set membership.
///
/// `A IN B` compiles to `bool_or(A = B)` over the membership subquery.
#[test]
fn test_membership_compiles_to_bool_or() {
    let f = fixture();
    let mut b = IrBuilder::new();
    let int_t = f.schema.get("std::int64").unwrap();
    let bool_t = f.schema.get("std::bool").unwrap();

    let left = const_int(&mut b, &f.schema, 1);
    let union_left = const_int(&mut b, &f.schema, 1);
    let union_right = const_int(&mut b, &f.schema, 2);
    let right = b.expr_set(
        PathId::from_type(&f.schema, int_t),
        int_t,
        Expr::SetOp {
            left: Box::new(union_left),
            right: Box::new(union_right),
            exclusive: false,
        },
    );

    let membership = b.expr_set(
        PathId::from_type(&f.schema, bool_t),
        bool_t,
        Expr::BinOp {
            op: BinOp::In,
            left: Box::new(left),
            right: Box::new(right),
        },
    );

    let ir = Statement {
        expr: membership,
        scope_tree: ScopeTree::new(),
        cardinality: None,
    };

    let compiled = compile_ir_to_sql_tree(
        &ir,
        &f.schema,
        &CompileOptions {
            ignore_shapes: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();

    assert!(has_func_call(&compiled.tree, "bool_or"));
}

/// A shaped select compiles its shape into a serialized tuple output.
#[test]
fn test_shape_produces_serialized_output() {
    let f = fixture();
    let mut b = IrBuilder::new();

    let mut result = b.root_set(&f.schema, f.user);
    let result_path = result.path_id.clone();

    let shape_root = b.root_set(&f.schema, f.user);
    let name_el = b
        .step(&f.schema, shape_root, f.user_name, Direction::Outbound)
        .unwrap();
    result.shape = vec![name_el];

    let select = b.expr_set(
        result_path.clone(),
        f.user,
        Expr::Stmt(Box::new(Stmt::Select(SelectStmt {
            result,
            where_clause: None,
            orderby: Vec::new(),
            offset: None,
            limit: None,
            iterator: None,
            cardinality: None,
        }))),
    );

    let mut scope_tree = ScopeTree::new();
    scope_tree
        .attach_path(scope_tree.root(), &result_path)
        .unwrap();

    let ir = Statement {
        expr: select,
        scope_tree,
        cardinality: None,
    };

    let compiled =
        compile_ir_to_sql_tree(&ir, &f.schema, &CompileOptions::default()).unwrap();

    let root = compiled.tree.rel(compiled.root);
    assert!(
        root.target_list().iter().any(|t| {
            t.name
                .as_deref()
                .is_some_and(|n| n.starts_with("User_serialized"))
        }),
        "expected a serialized shape output"
    );
}

/// JSON output mode wraps the top-level result in
/// `coalesce(json_agg(v), '[]')`.
#[test]
fn test_json_output_wraps_top_level() {
    let f = fixture();
    let mut b = IrBuilder::new();

    let value = const_int(&mut b, &f.schema, 7);
    let ir = Statement {
        expr: value,
        scope_tree: ScopeTree::new(),
        cardinality: None,
    };

    let compiled = compile_ir_to_sql_tree(
        &ir,
        &f.schema,
        &CompileOptions {
            output_format: OutputFormat::Json,
            ignore_shapes: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();

    let root = compiled.tree.rel(compiled.root);
    let top_target = &root.target_list()[0].val;
    match top_target {
        SqlExpr::Coalesce { args } => {
            assert!(matches!(
                &args[0],
                SqlExpr::FuncCall(f) if f.name == ["json_agg"]
            ));
            assert_eq!(args[1], SqlExpr::String("[]".to_string()));
        }
        other => panic!("expected coalesce(json_agg(...), '[]'), got {other:?}"),
    }
}

/// Singleton mode compiles a pointer set to a bare column reference.
#[test]
fn test_singleton_mode_compiles_to_column() {
    let f = fixture();
    let mut b = IrBuilder::new();

    let root = b.root_set(&f.schema, f.user);
    let name = b
        .step(&f.schema, root, f.user_name, Direction::Outbound)
        .unwrap();

    let ir = Statement {
        expr: name,
        scope_tree: ScopeTree::new(),
        cardinality: None,
    };

    let compiled = compile_ir_to_sql_tree(
        &ir,
        &f.schema,
        &CompileOptions {
            singleton_mode: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();

    let root_rel = compiled.tree.rel(compiled.root);
    match &root_rel.target_list()[0].val {
        SqlExpr::Column(col) => assert_eq!(col.name, vec!["name".to_string()]),
        other => panic!("expected a bare column ref, got {other:?}"),
    }
}

/// Named parameters are allocated monotonically in the argmap.
#[test]
fn test_named_parameters_fill_argmap() {
    let f = fixture();
    let mut b = IrBuilder::new();
    let str_t = f.schema.get("std::str").unwrap();
    let bool_t = f.schema.get("std::bool").unwrap();

    let param = b.expr_set(
        PathId::from_type(&f.schema, str_t),
        str_t,
        Expr::Parameter {
            name: "username".to_string(),
            typ: str_t,
        },
    );
    let rhs = const_str(&mut b, &f.schema, "Elvis");

    let cmp = b.expr_set(
        PathId::from_type(&f.schema, bool_t),
        bool_t,
        Expr::BinOp {
            op: BinOp::Eq,
            left: Box::new(param),
            right: Box::new(rhs),
        },
    );

    let ir = Statement {
        expr: cmp,
        scope_tree: ScopeTree::new(),
        cardinality: None,
    };

    let compiled = compile_ir_to_sql_tree(
        &ir,
        &f.schema,
        &CompileOptions {
            use_named_params: true,
            ignore_shapes: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();

    assert_eq!(compiled.argmap, vec![("username".to_string(), 1)]);
}

/// A visible-source path compiles the pointer range into the same
/// statement instead of nesting a subquery per step.
#[test]
fn test_visible_source_joins_in_place() {
    let f = fixture();
    let mut b = IrBuilder::new();

    let issue_root = b.root_set(&f.schema, f.issue);
    let owner = b
        .step(&f.schema, issue_root, f.issue_owner, Direction::Outbound)
        .unwrap();
    let owner_path = owner.path_id.clone();

    let mut scope_tree = ScopeTree::new();
    scope_tree.attach_path(scope_tree.root(), &owner_path).unwrap();

    let ir = Statement {
        expr: owner,
        scope_tree,
        cardinality: None,
    };

    let compiled = compile_ir_to_sql_tree(
        &ir,
        &f.schema,
        &CompileOptions {
            ignore_shapes: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();

    // Both the Issue root table and the owner mapping table are ranged.
    for expected in ["Issue", "Issue_owner", "User"] {
        assert!(
            compiled
                .tree
                .iter_rels()
                .any(|(_, rel)| matches!(&rel.kind, RelKind::Relation { name, .. }
                    if name == expected)),
            "expected a range over {expected}"
        );
    }

    // The top-level FROM clause is populated (no empty statements).
    let has_from = compiled
        .tree
        .iter_rels()
        .any(|(_, rel)| !rel.from_clause().is_empty());
    assert!(has_from);
}

/// Scenario: tuple construction and indirection.
///
/// `(x := 1, y := 2).x` resolves the element through the tuple's
/// sub-relation.
#[test]
fn test_tuple_indirection_in_scope() {
    let mut builder = SchemaBuilder::new();
    let int_t = builder.scalar("std::int64");
    let tuple_t = builder.tuple_type(
        "default::tuple_xy",
        true,
        vec![("x".to_string(), int_t), ("y".to_string(), int_t)],
    );
    let schema = builder.finish();

    let mut b = IrBuilder::new();
    let x_val = const_int(&mut b, &schema, 1);
    let y_val = const_int(&mut b, &schema, 2);

    let tuple_set = b.expr_set(
        PathId::from_type(&schema, tuple_t),
        tuple_t,
        Expr::Tuple {
            named: true,
            elements: vec![
                setlang_ir::TupleElement {
                    name: "x".to_string(),
                    val: x_val,
                },
                setlang_ir::TupleElement {
                    name: "y".to_string(),
                    val: y_val,
                },
            ],
        },
    );

    let el_path =
        setlang_ir::tuple_indirection_path_id(&schema, &tuple_set.path_id, "x", int_t)
            .unwrap();
    let indirection = b.expr_set(
        el_path,
        int_t,
        Expr::TupleIndirection {
            expr: Box::new(tuple_set),
            name: "x".to_string(),
        },
    );

    let ir = Statement {
        expr: indirection,
        scope_tree: ScopeTree::new(),
        cardinality: None,
    };

    let compiled = compile_ir_to_sql_tree(
        &ir,
        &schema,
        &CompileOptions {
            ignore_shapes: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();

    // The element value surfaces at the top level.
    let root = compiled.tree.rel(compiled.root);
    assert!(!root.target_list().is_empty());
}

/// Scenario: tuple indirection across a fence.
///
/// When the outer reference lies outside the tuple's path scope, the
/// tuple is re-wrapped in a subquery and the element path is remapped
/// through `view_path_id_map`.
#[test]
fn test_tuple_indirection_across_fence_remaps_paths() {
    let mut builder = SchemaBuilder::new();
    let int_t = builder.scalar("std::int64");
    let tuple_t = builder.tuple_type(
        "default::tuple_x",
        true,
        vec![("x".to_string(), int_t)],
    );
    let schema = builder.finish();

    let mut b = IrBuilder::new();
    let x_val = const_int(&mut b, &schema, 1);

    // The tuple is bound inside a namespaced scope...
    let inner_tuple_path = PathId::from_type_with_namespace(
        &schema,
        tuple_t,
        [setlang_ir::Namespace::hard("sub")],
    );
    let tuple_set = b.expr_set(
        inner_tuple_path,
        tuple_t,
        Expr::Tuple {
            named: true,
            elements: vec![setlang_ir::TupleElement {
                name: "x".to_string(),
                val: x_val,
            }],
        },
    );

    // ...while the element reference addresses it from outside.
    let outer_tuple_path = PathId::from_type(&schema, tuple_t);
    let el_path =
        setlang_ir::tuple_indirection_path_id(&schema, &outer_tuple_path, "x", int_t)
            .unwrap();
    let indirection = b.expr_set(
        el_path,
        int_t,
        Expr::TupleIndirection {
            expr: Box::new(tuple_set),
            name: "x".to_string(),
        },
    );

    let ir = Statement {
        expr: indirection,
        scope_tree: ScopeTree::new(),
        cardinality: None,
    };

    let compiled = compile_ir_to_sql_tree(
        &ir,
        &schema,
        &CompileOptions {
            ignore_shapes: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();

    // Some relation carries the outer-to-inner path rewrite.
    assert!(
        compiled
            .tree
            .iter_rels()
            .any(|(_, rel)| !rel.query.view_path_id_map.is_empty()),
        "expected a view_path_id_map rewrite"
    );
}
