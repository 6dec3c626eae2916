// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Output formatting and serialization
//!
//! The value aspect is computed first; the serialized aspect is derived
//! from it on demand as a pure function of the value, the environment's
//! output format and the path's target type.  In JSON mode composite
//! values become `jsonb_build_array` / `jsonb_build_object` calls and
//! the top-level target list is aggregated into a JSON array.

use setlang_ir::PathId;
use setlang_sqlast::{
    Alias, ColumnRef, FromItem, FuncCall, RVarKind, RangeVar, RelId, ResTarget, SqlExpr,
    TupleVar,
};

use crate::compiler::Compiler;
use crate::context::OutputFormat;
use crate::error::{LoweringError, LoweringResult};

impl Compiler<'_> {
    /// Whether values surface to the user in the current context
    pub(crate) fn in_serialization_ctx(&self) -> bool {
        self.ctx.expr_exposed.unwrap_or(true)
    }

    /// A tuple var as a plain SQL row value
    pub(crate) fn output_as_value(&self, expr: SqlExpr) -> SqlExpr {
        match expr {
            SqlExpr::Tuple(tuple) => {
                let args: Vec<SqlExpr> = tuple
                    .elements
                    .iter()
                    .map(|el| {
                        let val = el
                            .val
                            .as_deref()
                            .cloned()
                            .or_else(|| el.var.clone().map(|v| v.into_expr()))
                            .unwrap_or(SqlExpr::Null);
                        self.output_as_value(val)
                    })
                    .collect();

                if args.len() > 1 {
                    SqlExpr::ImplicitRow { args }
                } else {
                    SqlExpr::Row { args }
                }
            }
            other => other,
        }
    }

    /// Serialize an expression according to the output format
    pub(crate) fn serialize_expr(
        &mut self,
        expr: SqlExpr,
        path_id: &PathId,
    ) -> LoweringResult<SqlExpr> {
        match self.env.output_format {
            OutputFormat::Json => self.serialize_expr_to_json(expr, path_id, false),
            OutputFormat::Native => Ok(self.output_as_value(expr)),
        }
    }

    pub(crate) fn serialize_expr_if_needed(
        &mut self,
        expr: SqlExpr,
        path_id: &PathId,
    ) -> LoweringResult<SqlExpr> {
        if self.in_serialization_ctx() {
            self.serialize_expr(expr, path_id)
        } else {
            Ok(expr)
        }
    }

    fn serialize_expr_to_json(
        &mut self,
        expr: SqlExpr,
        path_id: &PathId,
        nested: bool,
    ) -> LoweringResult<SqlExpr> {
        match expr {
            SqlExpr::Tuple(tuple) => self.tuple_var_as_json_object(tuple, path_id),

            SqlExpr::Row { args } | SqlExpr::ImplicitRow { args } => {
                Ok(SqlExpr::FuncCall(FuncCall::new_null_safe(
                    ["jsonb_build_array"],
                    args,
                    &self.tree,
                )))
            }

            expr if path_id.target().is_some_and(|t| self.schema.is_tuple(t)) => {
                let target = path_id.target().expect("tuple path has a target");
                let tuple_data = self
                    .schema
                    .tuple_data(target)
                    .expect("tuple path targets a tuple type");
                if tuple_data.named {
                    self.named_tuple_as_json_object(expr, target)
                } else {
                    Ok(SqlExpr::FuncCall(FuncCall::new_null_safe(
                        ["setlang", "row_to_jsonb_array"],
                        vec![expr],
                        &self.tree,
                    )))
                }
            }

            expr if !nested => Ok(SqlExpr::FuncCall(FuncCall::new_null_safe(
                ["to_jsonb"],
                vec![expr],
                &self.tree,
            ))),

            expr => Ok(expr),
        }
    }

    /// A named tuple value rendered as a JSON object, attribute by
    /// attribute.
    fn named_tuple_as_json_object(
        &mut self,
        expr: SqlExpr,
        tuple_type: setlang_catalog::TypeId,
    ) -> LoweringResult<SqlExpr> {
        let tuple_data = self
            .schema
            .tuple_data(tuple_type)
            .ok_or_else(|| LoweringError::Internal("named tuple type expected".into()))?
            .clone();

        let mut keyvals = Vec::new();
        for (el_idx, (el_name, el_type)) in tuple_data.elements.iter().enumerate() {
            keyvals.push(SqlExpr::String(el_name.clone()));

            let type_sentinel = SqlExpr::TypeCast {
                arg: Box::new(SqlExpr::Null),
                type_name: setlang_sqlast::TypeName::new(self.schema.pg_type_of(*el_type)),
            };

            keyvals.push(SqlExpr::FuncCall(FuncCall::new(
                ["setlang", "row_getattr_by_num"],
                vec![
                    expr.clone(),
                    SqlExpr::int((el_idx + 1) as i64),
                    type_sentinel,
                ],
            )));
        }

        Ok(SqlExpr::FuncCall(FuncCall::new_null_safe(
            ["jsonb_build_object"],
            keyvals,
            &self.tree,
        )))
    }

    fn tuple_var_as_json_object(
        &mut self,
        tvar: TupleVar,
        path_id: &PathId,
    ) -> LoweringResult<SqlExpr> {
        if !tvar.named {
            let mut args = Vec::new();
            for element in tvar.elements {
                let val = element
                    .val
                    .as_deref()
                    .cloned()
                    .or_else(|| element.var.clone().map(|v| v.into_expr()))
                    .unwrap_or(SqlExpr::Null);
                args.push(self.serialize_expr_to_json(val, &element.path_id, true)?);
            }
            return Ok(SqlExpr::FuncCall(FuncCall::new_null_safe(
                ["jsonb_build_array"],
                args,
                &self.tree,
            )));
        }

        let _ = path_id;
        let mut keyvals = Vec::new();
        for element in tvar.elements {
            let name = match &element.name {
                Some(name) => name.clone(),
                None => match element.path_id.rptr() {
                    Some(step) => {
                        if step.is_linkprop {
                            format!("@{}", step.shortname())
                        } else {
                            step.shortname().to_string()
                        }
                    }
                    None => {
                        let target = element.path_id.target_name();
                        match target.rsplit_once("::") {
                            Some((_, n)) => n.to_string(),
                            None => target.to_string(),
                        }
                    }
                },
            };
            keyvals.push(SqlExpr::String(name));

            let val = element
                .val
                .as_deref()
                .cloned()
                .or_else(|| element.var.clone().map(|v| v.into_expr()))
                .unwrap_or(SqlExpr::Null);
            let val = match val {
                SqlExpr::Tuple(inner) => {
                    self.tuple_var_as_json_object(inner, &element.path_id)?
                }
                other => other,
            };
            keyvals.push(val);
        }

        Ok(SqlExpr::FuncCall(FuncCall::new_null_safe(
            ["jsonb_build_object"],
            keyvals,
            &self.tree,
        )))
    }

    /// Finalize output serialization on the top level.  In JSON mode
    /// the whole result is aggregated into one JSON array, with `[]`
    /// standing in for the empty set.
    pub(crate) fn top_output_as_value(&mut self, stmt: RelId) -> LoweringResult<RelId> {
        if self.env.output_format != OutputFormat::Json {
            return Ok(stmt);
        }

        let aggw = self.env.aliases.get("aggw");
        let subrvar = self.tree.add_rvar(RangeVar {
            kind: RVarKind::Subselect(stmt),
            alias: Alias::new(aggw),
            lateral: false,
            nullable: false,
        });

        if self
            .tree
            .rel(stmt)
            .target_list()
            .first()
            .ok_or_else(|| LoweringError::Internal("top-level query has no output".into()))?
            .name
            .is_none()
        {
            let alias = self.env.aliases.get("v");
            self.tree.rel_mut(stmt).target_list_mut()[0].name = Some(alias);
        }
        let out_name = self.tree.rel(stmt).target_list()[0]
            .name
            .clone()
            .expect("target alias set above");

        self.finish_top_json(subrvar, out_name, stmt)
    }

    fn finish_top_json(
        &mut self,
        subrvar: setlang_sqlast::RVarId,
        out_name: String,
        stmt: RelId,
    ) -> LoweringResult<RelId> {
        let agg = SqlExpr::FuncCall(FuncCall::new(
            ["json_agg"],
            vec![SqlExpr::Column(ColumnRef::new([out_name]))],
        ));

        let wrapped = SqlExpr::Coalesce {
            args: vec![agg, SqlExpr::String("[]".to_string())],
        };

        let result = self.tree.new_select();
        self.tree
            .rel_mut(result)
            .target_list_mut()
            .push(ResTarget::new(wrapped));
        self.tree
            .rel_mut(result)
            .from_clause_mut()
            .push(FromItem::RVar(subrvar));

        // Hoist the CTEs to the new top level.
        let ctes = std::mem::take(&mut self.tree.rel_mut(stmt).query.ctes);
        self.tree.rel_mut(result).query.ctes = ctes;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::context::CompileOptions;
    use setlang_catalog::{Schema, SchemaBuilder};
    use setlang_ir::{PathId, ScopeTree};
    use setlang_sqlast::TupleElement;

    fn schema() -> Schema {
        SchemaBuilder::new().finish()
    }

    #[test]
    fn test_tuple_output_as_value_builds_row() {
        let schema = schema();
        let compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());
        let int_t = schema.get("std::int64").unwrap();
        let path = PathId::from_type(&schema, int_t);

        let tuple = SqlExpr::Tuple(TupleVar::new(
            vec![
                TupleElement::new(path.clone()).with_val(SqlExpr::int(1)),
                TupleElement::new(path).with_val(SqlExpr::int(2)),
            ],
            false,
        ));

        match compiler.output_as_value(tuple) {
            SqlExpr::ImplicitRow { args } => assert_eq!(args.len(), 2),
            other => panic!("expected an implicit row, got {other:?}"),
        }
    }

    #[test]
    fn test_json_serialization_of_named_tuple_var() {
        let schema = schema();
        let mut compiler = Compiler::new(
            &schema,
            ScopeTree::new(),
            &CompileOptions {
                output_format: OutputFormat::Json,
                ..CompileOptions::default()
            },
        );
        let str_t = schema.get("std::str").unwrap();
        let path = PathId::from_type(&schema, str_t);

        let tuple = SqlExpr::Tuple(TupleVar::new(
            vec![
                TupleElement::new(path.clone())
                    .with_name("name")
                    .with_val(SqlExpr::String("Elvis".to_string())),
            ],
            true,
        ));

        let serialized = compiler.serialize_expr(tuple, &path).unwrap();
        match serialized {
            SqlExpr::FuncCall(f) => {
                assert_eq!(f.name, ["jsonb_build_object"]);
                assert_eq!(f.args[0], SqlExpr::String("name".to_string()));
            }
            other => panic!("expected jsonb_build_object, got {other:?}"),
        }
    }

    #[test]
    fn test_native_serialization_is_value_passthrough() {
        let schema = schema();
        let mut compiler =
            Compiler::new(&schema, ScopeTree::new(), &CompileOptions::default());
        let int_t = schema.get("std::int64").unwrap();
        let path = PathId::from_type(&schema, int_t);

        let value = SqlExpr::int(5);
        assert_eq!(
            compiler.serialize_expr(value.clone(), &path).unwrap(),
            value
        );
    }
}
