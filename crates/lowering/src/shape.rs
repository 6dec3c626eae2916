// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! Shape compilation
//!
//! A shape projection compiles to a named tuple with one element per
//! shape element.  Each element's value comes from its own
//! sub-relation; non-singleton elements collapse to arrays.  The whole
//! tuple is then serialized at the parent path and installed as the
//! enclosing set's serialized aspect.

use setlang_ir::{Expr, PointerRef, Set};
use setlang_sqlast::{Aspect, SqlExpr, TupleElement, TupleVar};

use crate::compiler::Compiler;
use crate::error::{LoweringError, LoweringResult};

impl Compiler<'_> {
    /// Compile the shape of `ir_set` and register the serialized tuple
    /// on the current relation.
    pub(crate) fn compile_shape_for_set(&mut self, ir_set: &Set) -> LoweringResult<()> {
        let result = self.compile_shape(ir_set, &ir_set.shape)?;

        for element in &result.elements {
            // The ref might have been added by nested shape
            // processing already.
            if let Some(val) = &element.val {
                self.put_path_var_if_not_exists(
                    self.ctx.rel,
                    &element.path_id,
                    (**val).clone(),
                    Aspect::Serialized,
                );
            }
        }

        let mut ser_elements = Vec::with_capacity(result.elements.len());
        for element in &result.elements {
            let ser_val = self
                .get_path_serialized_or_value_var(self.ctx.rel, &element.path_id)?;
            ser_elements.push(TupleElement {
                path_id: element.path_id.clone(),
                name: element.name.clone(),
                var: None,
                val: Some(Box::new(ser_val)),
            });
        }

        let ser_result = SqlExpr::Tuple(TupleVar::new(ser_elements, true));
        let sval = self.serialize_expr(ser_result, &ir_set.path_id)?;
        let rel = self.ctx.rel;
        self.put_path_serialized_var(rel, &ir_set.path_id, sval, true)?;

        Ok(())
    }

    /// Compile shape elements to a named tuple var.
    pub(crate) fn compile_shape(
        &mut self,
        ir_set: &Set,
        shape: &[Set],
    ) -> LoweringResult<TupleVar> {
        self.with_new(|c| -> LoweringResult<TupleVar> {
            let mut elements = Vec::with_capacity(shape.len());

            c.ctx.disable_semi_join.insert(ir_set.path_id.clone());
            c.ctx.unique_paths.insert(ir_set.path_id.clone());

            if let Some(Expr::Stmt(stmt)) = &ir_set.expr {
                // A FOR-statement source exposes its iterator path
                // alongside the set path, so iterator references inside
                // shape element expressions resolve.
                if let Some(iterator) = stmt.iterator() {
                    let rel = c.ctx.rel;
                    c.ctx.path_scope.insert(iterator.path_id.clone(), rel);
                }
            }

            for el in shape {
                let rptr = el.rptr.as_ref().ok_or_else(|| {
                    LoweringError::Internal("shape element without a pointer".into())
                })?;

                let (is_singleton, required, attr_name) = match &rptr.ptr {
                    PointerRef::Pointer(p) => {
                        let meta = c.schema.ptr(*p);
                        let name = if meta.is_link_property {
                            format!("@{}", meta.name.shortname())
                        } else {
                            meta.name.shortname().to_string()
                        };
                        (meta.singular(rptr.direction), meta.required, name)
                    }
                    PointerRef::TupleElement(name) => (true, true, name.clone()),
                    PointerRef::TypeIndirection { .. } => {
                        (true, true, "__type__".to_string())
                    }
                };

                let needs_subquery = el.is_subquery_set()
                    || c.schema.is_object(el.typ)
                    || !is_singleton
                    || !required;

                let value = if needs_subquery {
                    let wrapper = c.set_as_subquery(el, true)?;
                    let query = if !is_singleton {
                        c.set_to_array(el, wrapper)?
                    } else {
                        wrapper
                    };
                    SqlExpr::Subquery(query)
                } else {
                    c.compile_set(el)?
                };

                elements.push(
                    TupleElement::new(el.path_id.clone())
                        .with_name(attr_name)
                        .with_val(value),
                );
            }

            Ok(TupleVar::new(elements, true))
        })
    }
}
