// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Scalar expression compilation
//!
//! Leaf compilation of constants, parameters, casts, operators and
//! indirections.  Three-valued boolean semantics are preserved by
//! translating `OR` in WHERE context to a NULL-as-false helper and by
//! lifting both `AND` and `OR` outside WHERE into a bitwise computation
//! on `int::bool` so a NULL operand yields a NULL result.

use setlang_catalog::TypeId;
use setlang_ir::{BinOp, ConstantValue, Expr, Set, TypeCheckOp};
use setlang_sqlast::{CaseWhen, FuncCall, Indices, SqlExpr, TypeName};

use crate::astutils::{new_binop, new_unop, safe_array_expr};
use crate::compiler::Compiler;
use crate::context::Clause;
use crate::error::{LoweringError, LoweringResult};

impl Compiler<'_> {
    /// Compile a non-statement expression to a SQL value.
    pub(crate) fn compile_expr(&mut self, expr: &Expr, ir_set: &Set) -> LoweringResult<SqlExpr> {
        match expr {
            Expr::Constant { value, typ } => self.compile_constant(value, *typ),

            Expr::Parameter { name, typ } => self.compile_parameter(name, *typ),

            Expr::TypeRef { typ } => Ok(SqlExpr::FuncCall(FuncCall::new(
                ["setlang", "_resolve_type_id"],
                vec![SqlExpr::String(self.schema.type_name(*typ).to_string())],
            ))),

            Expr::TypeCast { expr, to } => self.compile_type_cast(expr, *to),

            Expr::IndexIndirection { expr, index } => {
                self.compile_index_indirection(expr, index)
            }

            Expr::SliceIndirection { expr, start, stop } => {
                self.compile_slice_indirection(expr, start, stop)
            }

            Expr::BinOp { op, left, right } => self.compile_binop(*op, left, right),

            Expr::UnaryOp { op, expr } => {
                let operand = self.with_new(|c| {
                    c.ctx.expr_exposed = Some(false);
                    c.compile_set(expr)
                })?;
                Ok(new_unop(op.sql_name(), operand))
            }

            Expr::TypeCheckOp { op, left, right } => {
                let (left, right) = self.with_new(|c| -> LoweringResult<_> {
                    c.ctx.expr_exposed = Some(false);
                    Ok((c.compile_set(left)?, c.compile_set(right)?))
                })?;

                let result = SqlExpr::FuncCall(FuncCall::new(
                    ["setlang", "issubclass"],
                    vec![left, right],
                ));

                if *op == TypeCheckOp::IsNot {
                    Ok(new_unop("NOT", result))
                } else {
                    Ok(result)
                }
            }

            Expr::IfElse {
                condition,
                if_expr,
                else_expr,
            } => {
                let (cond, then, els) = self.with_new(|c| -> LoweringResult<_> {
                    Ok((
                        c.compile_set(condition)?,
                        c.compile_set(if_expr)?,
                        c.compile_set(else_expr)?,
                    ))
                })?;
                Ok(SqlExpr::Case {
                    arg: None,
                    whens: vec![CaseWhen {
                        expr: cond,
                        result: then,
                    }],
                    defresult: Some(Box::new(els)),
                })
            }

            Expr::Array { elements } => {
                let mut compiled = Vec::with_capacity(elements.len());
                for element in elements {
                    compiled.push(self.compile_set(element)?);
                }
                Ok(safe_array_expr(compiled, &self.tree))
            }

            Expr::Tuple { elements, .. } => {
                let mut vals = Vec::with_capacity(elements.len());
                for element in elements {
                    vals.push(self.compile_set(&element.val)?);
                }
                let row = if vals.len() > 1 {
                    SqlExpr::ImplicitRow { args: vals }
                } else {
                    SqlExpr::Row { args: vals }
                };
                Ok(row)
            }

            Expr::TupleIndirection { expr, name } => {
                // Reach into the tuple constructor and compile the
                // addressed element directly.
                let tuple_expr = expr
                    .expr
                    .as_ref()
                    .ok_or_else(|| {
                        LoweringError::Internal(
                            "tuple indirection over a non-constructor".to_string(),
                        )
                    })?;
                match tuple_expr {
                    Expr::Tuple { elements, .. } => {
                        for element in elements {
                            if &element.name == name {
                                return self.compile_set(&element.val);
                            }
                        }
                        Err(LoweringError::Internal(format!(
                            "no tuple element with name {name}"
                        )))
                    }
                    _ => Err(LoweringError::Internal(
                        "tuple indirection over a non-constructor".to_string(),
                    )),
                }
            }

            Expr::FunctionCall(call) => {
                if call.func.aggregate || call.func.has_set_of_param() {
                    return Err(LoweringError::Internal(
                        "aggregate functions are not supported in simple expressions"
                            .to_string(),
                    ));
                }
                if call.func.set_returning {
                    return Err(LoweringError::Internal(
                        "set-returning functions are not supported in simple expressions"
                            .to_string(),
                    ));
                }

                let mut args = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    args.push(self.compile_set(arg)?);
                }

                let name = self.sql_function_name(&call.func);
                Ok(SqlExpr::FuncCall(FuncCall::new(name, args)))
            }

            Expr::Coalesce { left, right } => {
                let (l, r) = self.with_new(|c| -> LoweringResult<_> {
                    Ok((c.compile_set(left)?, c.compile_set(right)?))
                })?;
                Ok(SqlExpr::Coalesce { args: vec![l, r] })
            }

            Expr::EmptySet => Ok(SqlExpr::Null),

            _ => Err(LoweringError::Internal(format!(
                "unexpected expression in scalar compilation at {}",
                ir_set.path_id.pformat()
            ))),
        }
    }

    /// The backend name of a function: its `from_function` override, or
    /// the module-qualified mangled name.
    pub(crate) fn sql_function_name(&self, func: &setlang_ir::FunctionRef) -> Vec<String> {
        match &func.from_function {
            Some(name) => vec![name.clone()],
            None => vec![func.name.module.clone(), func.name.name.clone()],
        }
    }

    pub(crate) fn compile_constant(
        &mut self,
        value: &ConstantValue,
        typ: TypeId,
    ) -> LoweringResult<SqlExpr> {
        let constant = match value {
            ConstantValue::String(s) => SqlExpr::String(s.clone()),
            ConstantValue::Int(i) => SqlExpr::Numeric(i.to_string()),
            ConstantValue::Float(f) => SqlExpr::Numeric(f.to_string()),
            ConstantValue::Bool(b) => SqlExpr::Boolean(*b),
        };
        // Always pin constants to their schema type.
        Ok(SqlExpr::TypeCast {
            arg: Box::new(constant),
            type_name: TypeName::new(self.schema.pg_type_of(typ)),
        })
    }

    pub(crate) fn compile_parameter(
        &mut self,
        name: &str,
        typ: TypeId,
    ) -> LoweringResult<SqlExpr> {
        let index = if let Ok(positional) = name.parse::<i32>() {
            positional + 1
        } else if let Some(&index) = self.env.argmap.get(name) {
            index
        } else {
            let index = self.env.argmap.len() as i32 + 1;
            self.env.argmap.insert(name.to_string(), index);
            index
        };

        Ok(SqlExpr::TypeCast {
            arg: Box::new(SqlExpr::Param(setlang_sqlast::ParamRef { number: index })),
            type_name: TypeName::new(self.schema.pg_type_of(typ)),
        })
    }

    fn compile_type_cast(&mut self, expr: &Set, to: TypeId) -> LoweringResult<SqlExpr> {
        let pg_expr = self.compile_set(expr)?;

        if expr.is_empty_set() {
            // Cast of an empty value: just pin the type.
            return Ok(SqlExpr::TypeCast {
                arg: Box::new(pg_expr),
                type_name: TypeName::new(self.schema.pg_type_of(to)),
            });
        }

        self.cast(pg_expr, expr.typ, to, false)
    }

    /// Emit a cast from `source` to `target` type.  Casting from json
    /// to a scalar goes through a runtime type assertion so failures
    /// carry source context.
    pub(crate) fn cast(
        &mut self,
        node: SqlExpr,
        source: TypeId,
        target: TypeId,
        force: bool,
    ) -> LoweringResult<SqlExpr> {
        if source == target && !force {
            return Ok(node);
        }

        let json_t = self.schema.get("std::json");
        let bool_t = self.schema.get("std::bool");
        let str_t = self.schema.get("std::str");

        let source_base = self.schema.topmost_concrete_base(source);
        let target_base = self.schema.topmost_concrete_base(target);

        if Some(source_base) == json_t && Some(target_base) != json_t {
            // From json we want the text of the *value*, not a JSON
            // literal, extracted through an intermediate array.
            let target_pg = self.schema.pg_type_of(target);

            let expected_json_type = if Some(target_base) == bool_t {
                Some("boolean")
            } else if Some(target_base) == str_t {
                Some("string")
            } else {
                Some("number")
            };

            let node = match expected_json_type {
                Some(expected) => SqlExpr::FuncCall(FuncCall::new(
                    ["setlang", "jsonb_assert_type"],
                    vec![
                        node,
                        SqlExpr::Array {
                            elements: vec![
                                SqlExpr::String(expected.to_string()),
                                SqlExpr::String("null".to_string()),
                            ],
                        },
                    ],
                )),
                None => node,
            };

            let extracted = new_binop(
                SqlExpr::FuncCall(FuncCall::new(
                    ["array_to_json"],
                    vec![SqlExpr::Array {
                        elements: vec![node],
                    }],
                )),
                SqlExpr::int(0),
                "->>",
            );

            return Ok(SqlExpr::TypeCast {
                arg: Box::new(extracted),
                type_name: TypeName::new(target_pg),
            });
        }

        if Some(target_base) == json_t {
            return Ok(SqlExpr::FuncCall(FuncCall::new(["to_jsonb"], vec![node])));
        }

        Ok(SqlExpr::TypeCast {
            arg: Box::new(node),
            type_name: TypeName::new(self.schema.pg_type_of(target)),
        })
    }

    fn compile_binop(&mut self, op: BinOp, left: &Set, right: &Set) -> LoweringResult<SqlExpr> {
        let (lexpr, rexpr) = self.with_new(|c| -> LoweringResult<_> {
            c.ctx.expr_exposed = Some(false);
            Ok((c.compile_set(left)?, c.compile_set(right)?))
        })?;

        let mut op_name = op.sql_name().to_string();

        // String concatenation via `+`.
        if op == BinOp::Add
            && !left.is_empty_set()
            && !right.is_empty_set()
            && self.schema.is_scalar(left.typ)
            && self.schema.is_string(left.typ)
            && self.schema.is_scalar(right.typ)
            && self.schema.is_string(right.typ)
        {
            op_name = "||".to_string();
        }

        // Tuples compare positionally; unequal arity is always false.
        let left_arity = self.schema.tuple_data(left.typ).map(|t| t.elements.len());
        let right_arity = self.schema.tuple_data(right.typ).map(|t| t.elements.len());
        if left_arity.unwrap_or(0) != right_arity.unwrap_or(0) {
            return Ok(SqlExpr::Boolean(false));
        }

        if op == BinOp::And || op == BinOp::Or {
            if self.ctx.clause == Clause::Where {
                if op == BinOp::Or {
                    // NULL must disqualify rather than poison the row.
                    return Ok(SqlExpr::FuncCall(FuncCall::new(
                        ["setlang", "_or"],
                        vec![lexpr, rexpr],
                    )));
                }
                // AND already disqualifies on NULL or FALSE.
                return Ok(new_binop(lexpr, rexpr, &op_name));
            }

            // Outside WHERE both operators are lifted through int
            // bit-ops so a NULL operand yields NULL.
            let bitop = if op == BinOp::And { "&" } else { "|" };
            let int_type = TypeName::new(["int"]);
            let bitcond = new_binop(
                SqlExpr::TypeCast {
                    arg: Box::new(lexpr),
                    type_name: int_type.clone(),
                },
                SqlExpr::TypeCast {
                    arg: Box::new(rexpr),
                    type_name: int_type,
                },
                bitop,
            );
            return Ok(SqlExpr::TypeCast {
                arg: Box::new(bitcond),
                type_name: TypeName::new(["bool"]),
            });
        }

        Ok(new_binop(lexpr, rexpr, &op_name))
    }

    fn compile_index_indirection(
        &mut self,
        subject: &Set,
        index: &Set,
    ) -> LoweringResult<SqlExpr> {
        let (subj, index_expr) = self.with_new(|c| -> LoweringResult<_> {
            c.ctx.expr_exposed = Some(false);
            Ok((c.compile_set(subject)?, c.compile_set(index)?))
        })?;

        let is_string = self.schema.is_scalar(subject.typ) && self.schema.is_string(subject.typ);

        let one = SqlExpr::int(1);
        let zero = SqlExpr::int(0);

        let when_cond = new_binop(index_expr.clone(), zero, "<");
        let index_plus_one = new_binop(index_expr, one.clone(), "+");

        let upper_bound = if is_string {
            SqlExpr::FuncCall(FuncCall::new(["char_length"], vec![subj.clone()]))
        } else {
            SqlExpr::FuncCall(FuncCall::new(
                ["array_upper"],
                vec![subj.clone(), one.clone()],
            ))
        };

        // Negative indexes count from the end.
        let neg_off = new_binop(upper_bound, index_plus_one.clone(), "+");

        let normalized = SqlExpr::Case {
            arg: None,
            whens: vec![CaseWhen {
                expr: when_cond,
                result: neg_off,
            }],
            defresult: Some(Box::new(index_plus_one)),
        };

        if is_string {
            let index = SqlExpr::TypeCast {
                arg: Box::new(normalized),
                type_name: TypeName::new(["int"]),
            };
            Ok(SqlExpr::FuncCall(FuncCall::new(
                ["substr"],
                vec![subj, index, one],
            )))
        } else {
            Ok(SqlExpr::Indirection {
                arg: Box::new(subj),
                indices: Indices {
                    is_slice: false,
                    lidx: None,
                    ridx: Some(Box::new(normalized)),
                },
            })
        }
    }

    fn compile_slice_indirection(
        &mut self,
        subject: &Set,
        start: &Set,
        stop: &Set,
    ) -> LoweringResult<SqlExpr> {
        let (subj, start_expr, stop_expr) = self.with_new(|c| -> LoweringResult<_> {
            c.ctx.expr_exposed = Some(false);
            Ok((
                c.compile_set(subject)?,
                c.compile_set(start)?,
                c.compile_set(stop)?,
            ))
        })?;

        let is_string = self.schema.is_scalar(subject.typ) && self.schema.is_string(subject.typ);

        let one = SqlExpr::int(1);
        let zero = SqlExpr::int(0);

        let upper_bound = if is_string {
            SqlExpr::FuncCall(FuncCall::new(["char_length"], vec![subj.clone()]))
        } else {
            SqlExpr::FuncCall(FuncCall::new(
                ["array_upper"],
                vec![subj.clone(), one.clone()],
            ))
        };

        // Half-open bounds with negative-index normalization; an
        // unspecified lower bound is 1, an unspecified upper bound is
        // the length of the operand.
        let lower = if start_expr.is_null_const() {
            one.clone()
        } else {
            let when_cond = new_binop(start_expr.clone(), zero.clone(), "<");
            let lower_plus_one = new_binop(start_expr, one.clone(), "+");
            let neg_off = new_binop(upper_bound.clone(), lower_plus_one.clone(), "+");
            SqlExpr::Case {
                arg: None,
                whens: vec![CaseWhen {
                    expr: when_cond,
                    result: neg_off,
                }],
                defresult: Some(Box::new(lower_plus_one)),
            }
        };

        let upper = if stop_expr.is_null_const() {
            upper_bound
        } else {
            let when_cond = new_binop(stop_expr.clone(), zero, "<");
            let neg_off = new_binop(upper_bound.clone(), stop_expr.clone(), "+");
            SqlExpr::Case {
                arg: None,
                whens: vec![CaseWhen {
                    expr: when_cond,
                    result: neg_off,
                }],
                defresult: Some(Box::new(stop_expr)),
            }
        };

        if is_string {
            let lower = SqlExpr::TypeCast {
                arg: Box::new(lower),
                type_name: TypeName::new(["int"]),
            };

            let mut args = vec![subj, lower.clone()];

            if !stop_expr_is_bound(&upper) {
                let for_length = new_binop(upper, lower, "-");
                let for_length = new_binop(for_length, one, "+");
                args.push(SqlExpr::TypeCast {
                    arg: Box::new(for_length),
                    type_name: TypeName::new(["int"]),
                });
            }

            Ok(SqlExpr::FuncCall(FuncCall::new(["substr"], args)))
        } else {
            Ok(SqlExpr::Indirection {
                arg: Box::new(subj),
                indices: Indices {
                    is_slice: true,
                    lidx: Some(Box::new(lower)),
                    ridx: Some(Box::new(upper)),
                },
            })
        }
    }

    /// Trivial singleton-mode compilation: a bare column ref by short
    /// name.
    pub(crate) fn compile_set_in_singleton_mode(
        &mut self,
        ir_set: &Set,
    ) -> LoweringResult<SqlExpr> {
        if ir_set.is_empty_set() {
            return Ok(SqlExpr::Null);
        }

        if let Some(expr) = &ir_set.expr {
            return self.compile_expr(expr, ir_set);
        }

        let colname = match &ir_set.rptr {
            Some(rptr) => match &rptr.ptr {
                setlang_ir::PointerRef::Pointer(p) => {
                    self.schema.ptr(*p).name.shortname().to_string()
                }
                setlang_ir::PointerRef::TupleElement(name) => name.clone(),
                setlang_ir::PointerRef::TypeIndirection { .. } => "__type__".to_string(),
            },
            None => self
                .schema
                .type_name(ir_set.typ)
                .shortname()
                .to_string(),
        };

        Ok(SqlExpr::Column(setlang_sqlast::ColumnRef::new([colname])))
    }
}

/// Whether the computed upper bound is the operand length itself
fn stop_expr_is_bound(upper: &SqlExpr) -> bool {
    matches!(upper, SqlExpr::FuncCall(f)
        if f.name.last().is_some_and(|n| n == "char_length" || n == "array_upper"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::context::CompileOptions;
    use setlang_catalog::{Schema, SchemaBuilder};
    use setlang_ir::{IrBuilder, PathId, ScopeTree};

    fn schema() -> Schema {
        SchemaBuilder::new().finish()
    }

    fn bool_const(b: &mut IrBuilder, schema: &Schema, val: bool) -> Set {
        let bool_t = schema.get("std::bool").unwrap();
        b.expr_set(
            PathId::from_type(schema, bool_t),
            bool_t,
            Expr::Constant {
                value: ConstantValue::Bool(val),
                typ: bool_t,
            },
        )
    }

    fn str_const(b: &mut IrBuilder, schema: &Schema, val: &str) -> Set {
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

    fn int_const(b: &mut IrBuilder, schema: &Schema, val: i64) -> Set {
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

    #[test]
    fn test_constants_are_pinned_to_their_type() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());

        let int_t = schema.get("std::int64").unwrap();
        let result = compiler
            .compile_constant(&ConstantValue::Int(42), int_t)
            .unwrap();

        match result {
            SqlExpr::TypeCast { type_name, .. } => {
                assert_eq!(type_name.name, vec!["int8".to_string()]);
            }
            other => panic!("expected a pinned cast, got {other:?}"),
        }
    }

    #[test]
    fn test_or_in_where_uses_null_safe_helper() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());
        compiler.ctx.clause = Clause::Where;

        let mut b = IrBuilder::new();
        let bool_t = schema.get("std::bool").unwrap();
        let left = bool_const(&mut b, &schema, true);
        let right = bool_const(&mut b, &schema, false);
        let or_set = b.expr_set(
            PathId::from_type(&schema, bool_t),
            bool_t,
            Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            },
        );

        let expr = or_set.expr.clone().unwrap();
        let result = compiler.compile_expr(&expr, &or_set).unwrap();
        match result {
            SqlExpr::FuncCall(f) => assert_eq!(f.name, ["setlang", "_or"]),
            other => panic!("expected the _or helper, got {other:?}"),
        }
    }

    #[test]
    fn test_boolean_ops_outside_where_lift_through_int() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());

        let mut b = IrBuilder::new();
        let bool_t = schema.get("std::bool").unwrap();
        let left = bool_const(&mut b, &schema, true);
        let right = bool_const(&mut b, &schema, false);
        let and_set = b.expr_set(
            PathId::from_type(&schema, bool_t),
            bool_t,
            Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            },
        );

        let expr = and_set.expr.clone().unwrap();
        let result = compiler.compile_expr(&expr, &and_set).unwrap();

        // bool::int & bool::int, cast back to bool: NULL in, NULL out.
        match result {
            SqlExpr::TypeCast { arg, type_name } => {
                assert_eq!(type_name.name, vec!["bool".to_string()]);
                assert!(matches!(*arg, SqlExpr::Op { ref name, .. } if name == "&"));
            }
            other => panic!("expected an int/bool lift, got {other:?}"),
        }
    }

    #[test]
    fn test_string_index_normalizes_and_substrs() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());

        let mut b = IrBuilder::new();
        let str_t = schema.get("std::str").unwrap();
        let subject = str_const(&mut b, &schema, "hello");
        let index = int_const(&mut b, &schema, -1);
        let indexed = b.expr_set(
            PathId::from_type(&schema, str_t),
            str_t,
            Expr::IndexIndirection {
                expr: Box::new(subject),
                index: Box::new(index),
            },
        );

        let expr = indexed.expr.clone().unwrap();
        let result = compiler.compile_expr(&expr, &indexed).unwrap();

        match result {
            SqlExpr::FuncCall(f) => {
                assert_eq!(f.name, ["substr"]);
                // The index argument carries the negative-offset CASE.
                assert!(matches!(
                    &f.args[1],
                    SqlExpr::TypeCast { arg, .. } if matches!(**arg, SqlExpr::Case { .. })
                ));
            }
            other => panic!("expected substr, got {other:?}"),
        }
    }

    #[test]
    fn test_json_cast_asserts_runtime_type() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());

        let json_t = schema.get("std::json").unwrap();
        let str_t = schema.get("std::str").unwrap();

        let node = SqlExpr::String("\"x\"".to_string());
        let result = compiler.cast(node, json_t, str_t, false).unwrap();

        fn contains_assert(expr: &SqlExpr) -> bool {
            match expr {
                SqlExpr::FuncCall(f) if f.name == ["setlang", "jsonb_assert_type"] => true,
                SqlExpr::FuncCall(f) => f.args.iter().any(contains_assert),
                SqlExpr::TypeCast { arg, .. } => contains_assert(arg),
                SqlExpr::Op { lexpr, rexpr, .. } => {
                    lexpr.as_deref().is_some_and(contains_assert)
                        || rexpr.as_deref().is_some_and(contains_assert)
                }
                SqlExpr::Array { elements } => elements.iter().any(contains_assert),
                _ => false,
            }
        }
        assert!(contains_assert(&result), "expected jsonb_assert_type");
    }

    #[test]
    fn test_singleton_mode_empty_set_is_null() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());

        let mut b = IrBuilder::new();
        let int_t = schema.get("std::int64").unwrap();
        let empty = b.expr_set(
            PathId::from_type(&schema, int_t),
            int_t,
            Expr::EmptySet,
        );

        assert_eq!(
            compiler.compile_set_in_singleton_mode(&empty).unwrap(),
            SqlExpr::Null
        );
    }
}
