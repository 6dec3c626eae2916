// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Small SQL-tree construction helpers

use setlang_sqlast::{ColumnRef, FuncCall, OutputVar, SqlExpr, SqlTree};

/// `lexpr <op> rexpr`
pub fn new_binop(lexpr: SqlExpr, rexpr: SqlExpr, op: &str) -> SqlExpr {
    SqlExpr::Op {
        name: op.to_string(),
        lexpr: Some(Box::new(lexpr)),
        rexpr: Some(Box::new(rexpr)),
    }
}

/// `<op> expr`
pub fn new_unop(op: &str, expr: SqlExpr) -> SqlExpr {
    SqlExpr::Op {
        name: op.to_string(),
        lexpr: None,
        rexpr: Some(Box::new(expr)),
    }
}

/// AND `expr` onto an optional conjunction
pub fn extend_binop(binop: Option<SqlExpr>, expr: SqlExpr) -> SqlExpr {
    extend_binop_with(binop, expr, "AND")
}

/// Combine `expr` onto an optional chain with the given operator
pub fn extend_binop_with(binop: Option<SqlExpr>, expr: SqlExpr, op: &str) -> SqlExpr {
    match binop {
        None => expr,
        Some(existing) => new_binop(existing, expr, op),
    }
}

fn expr_optional(expr: &SqlExpr) -> bool {
    match expr {
        SqlExpr::Column(col) => col.optional,
        _ => false,
    }
}

/// The join condition between two path refs: plain equality, promoted
/// to `IS NOT DISTINCT FROM` under nullability, OR-combined with NULL
/// tests for optional bonds.
pub fn join_condition(lref: &SqlExpr, rref: &SqlExpr, tree: &SqlTree) -> SqlExpr {
    let op = if lref.nullable(tree) || rref.nullable(tree) {
        "IS NOT DISTINCT FROM"
    } else {
        "="
    };

    let mut path_cond = new_binop(lref.clone(), rref.clone(), op);

    if expr_optional(lref) {
        let opt_cond = SqlExpr::NullTest {
            arg: Box::new(lref.clone()),
            negated: false,
        };
        path_cond = extend_binop_with(Some(path_cond), opt_cond, "OR");
    }

    if expr_optional(rref) {
        let opt_cond = SqlExpr::NullTest {
            arg: Box::new(rref.clone()),
            negated: false,
        };
        path_cond = extend_binop_with(Some(path_cond), opt_cond, "OR");
    }

    path_cond
}

/// `ARRAY[...]`, wrapped in the NULL-scrubbing helper when any element
/// is nullable.
pub fn safe_array_expr(elements: Vec<SqlExpr>, tree: &SqlTree) -> SqlExpr {
    let any_nullable = elements.iter().any(|e| e.nullable(tree));
    let array = SqlExpr::Array { elements };
    if any_nullable {
        SqlExpr::FuncCall(FuncCall::new(
            ["setlang", "_nullif_array_nulls"],
            vec![array],
        ))
    } else {
        array
    }
}

/// Whether two refs address the same output
pub fn same_expr(a: &SqlExpr, b: &SqlExpr) -> bool {
    match (a, b) {
        (SqlExpr::Column(ca), SqlExpr::Column(cb)) => ca.name == cb.name,
        _ => a == b,
    }
}

/// Strip a var to a bare single-segment column ref with explicit flags
pub fn strip_output_var(
    var: &OutputVar,
    optional: Option<bool>,
    nullable: Option<bool>,
) -> OutputVar {
    match var {
        OutputVar::Column(col) => OutputVar::Column(
            ColumnRef::new([col.colname().to_string()])
                .with_nullable(nullable.unwrap_or(col.nullable))
                .with_optional(optional.unwrap_or(col.optional)),
        ),
        OutputVar::Tuple(tuple) => OutputVar::Tuple(tuple.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, nullable: bool, optional: bool) -> SqlExpr {
        SqlExpr::Column(
            ColumnRef::new([name])
                .with_nullable(nullable)
                .with_optional(optional),
        )
    }

    #[test]
    fn test_extend_binop_starts_chain() {
        let cond = extend_binop(None, SqlExpr::Boolean(true));
        assert_eq!(cond, SqlExpr::Boolean(true));

        let chained = extend_binop(Some(cond), SqlExpr::Boolean(false));
        match chained {
            SqlExpr::Op { name, .. } => assert_eq!(name, "AND"),
            other => panic!("expected AND chain, got {other:?}"),
        }
    }

    #[test]
    fn test_join_condition_plain_equality() {
        let tree = SqlTree::default();
        let cond = join_condition(&col("a", false, false), &col("b", false, false), &tree);
        match cond {
            SqlExpr::Op { name, .. } => assert_eq!(name, "="),
            other => panic!("expected equality, got {other:?}"),
        }
    }

    #[test]
    fn test_join_condition_nullable_promotes() {
        let tree = SqlTree::default();
        let cond = join_condition(&col("a", true, false), &col("b", false, false), &tree);
        match cond {
            SqlExpr::Op { name, .. } => assert_eq!(name, "IS NOT DISTINCT FROM"),
            other => panic!("expected distinct-from, got {other:?}"),
        }
    }

    #[test]
    fn test_join_condition_optional_adds_null_test() {
        let tree = SqlTree::default();
        let cond = join_condition(&col("a", false, true), &col("b", false, false), &tree);
        // Outer OR combining the equality with a NULL test.
        match cond {
            SqlExpr::Op { name, rexpr, .. } => {
                assert_eq!(name, "OR");
                assert!(matches!(
                    rexpr.as_deref(),
                    Some(SqlExpr::NullTest { negated: false, .. })
                ));
            }
            other => panic!("expected OR with NULL test, got {other:?}"),
        }
    }

    #[test]
    fn test_safe_array_wraps_nullable_elements() {
        let tree = SqlTree::default();
        let plain = safe_array_expr(vec![SqlExpr::Boolean(true)], &tree);
        assert!(matches!(plain, SqlExpr::Array { .. }));

        let scrubbed = safe_array_expr(vec![SqlExpr::Null], &tree);
        match scrubbed {
            SqlExpr::FuncCall(f) => assert_eq!(f.name, ["setlang", "_nullif_array_nulls"]),
            other => panic!("expected scrub call, got {other:?}"),
        }
    }
}
