// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # The schema catalog
//!
//! [`Schema`] is an immutable, in-memory catalog of types and pointers.
//! It is built once with [`SchemaBuilder`] and then shared read-only by a
//! compilation; all accessors are synchronous.
//!
//! ## Storage resolution
//!
//! [`Schema::pointer_storage_info`] decides where a pointer's value lives:
//!
//! - singular scalar pointers (and `__type__`) are columns of the source
//!   object table (`TableType::ObjectType`);
//! - everything else lives in a mapping table with `source` and `target`
//!   columns (`TableType::Link`);
//! - link properties are columns of the enclosing link's mapping table;
//! - `link_bias` forces the mapping-table view of a pointer that is also
//!   stored inline.

use crate::error::{CatalogError, CatalogResult};
use crate::metadata::{
    ArrayTypeData, Cardinality, ObjectTypeData, PointerMetadata, PointerStorageInfo, PtrId,
    QualName, ScalarTypeData, TableName, TableType, TupleTypeData, TypeId, TypeKind, TypeMetadata,
};
use std::collections::HashMap;
use tracing::trace;

/// Columns of a pointer mapping table
pub const MAP_SOURCE_COL: &str = "source";
pub const MAP_TARGET_COL: &str = "target";

/// An immutable schema catalog
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: Vec<TypeMetadata>,
    pointers: Vec<PointerMetadata>,
    by_name: HashMap<String, TypeId>,
}

impl Schema {
    /// Resolve a qualified name to a type
    pub fn get(&self, qualname: &str) -> Option<TypeId> {
        let key = if qualname.contains("::") {
            qualname.to_string()
        } else {
            format!("default::{qualname}")
        };
        self.by_name.get(&key).copied()
    }

    /// Like [`Schema::get`], but an error on a miss
    pub fn get_or_err(&self, qualname: &str) -> CatalogResult<TypeId> {
        self.get(qualname)
            .ok_or_else(|| CatalogError::ObjectNotFound(qualname.to_string()))
    }

    pub fn typ(&self, id: TypeId) -> &TypeMetadata {
        &self.types[id.0 as usize]
    }

    pub fn ptr(&self, id: PtrId) -> &PointerMetadata {
        &self.pointers[id.0 as usize]
    }

    pub fn type_name(&self, id: TypeId) -> &QualName {
        &self.typ(id).name
    }

    pub fn is_object(&self, id: TypeId) -> bool {
        matches!(self.typ(id).kind, TypeKind::Object(_))
    }

    pub fn is_scalar(&self, id: TypeId) -> bool {
        matches!(self.typ(id).kind, TypeKind::Scalar(_))
    }

    pub fn is_tuple(&self, id: TypeId) -> bool {
        matches!(self.typ(id).kind, TypeKind::Tuple(_))
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.typ(id).kind, TypeKind::Array(_))
    }

    pub fn object_data(&self, id: TypeId) -> CatalogResult<&ObjectTypeData> {
        match &self.typ(id).kind {
            TypeKind::Object(data) => Ok(data),
            _ => Err(CatalogError::NotAnObjectType(
                self.type_name(id).to_string(),
            )),
        }
    }

    pub fn scalar_data(&self, id: TypeId) -> CatalogResult<&ScalarTypeData> {
        match &self.typ(id).kind {
            TypeKind::Scalar(data) => Ok(data),
            _ => Err(CatalogError::NotAScalarType(self.type_name(id).to_string())),
        }
    }

    pub fn tuple_data(&self, id: TypeId) -> Option<&TupleTypeData> {
        match &self.typ(id).kind {
            TypeKind::Tuple(data) => Some(data),
            _ => None,
        }
    }

    pub fn array_data(&self, id: TypeId) -> Option<&ArrayTypeData> {
        match &self.typ(id).kind {
            TypeKind::Array(data) => Some(data),
            _ => None,
        }
    }

    /// Whether the type is a view over another object type
    pub fn is_view(&self, id: TypeId) -> bool {
        matches!(
            &self.typ(id).kind,
            TypeKind::Object(ObjectTypeData { view_of: Some(_), .. })
        )
    }

    /// Strip a single view layer
    pub fn peel_view(&self, id: TypeId) -> TypeId {
        match &self.typ(id).kind {
            TypeKind::Object(ObjectTypeData {
                view_of: Some(base),
                ..
            }) => *base,
            _ => id,
        }
    }

    /// The concrete, non-view type backing `id`
    pub fn material_type(&self, id: TypeId) -> TypeId {
        let mut current = id;
        while self.is_view(current) {
            current = self.peel_view(current);
        }
        current
    }

    /// Whether the object type is a virtual union type
    pub fn is_virtual(&self, id: TypeId) -> bool {
        matches!(
            &self.typ(id).kind,
            TypeKind::Object(ObjectTypeData { is_virtual: true, .. })
        )
    }

    /// Direct subtypes of an object type
    pub fn children(&self, id: TypeId) -> &[TypeId] {
        match &self.typ(id).kind {
            TypeKind::Object(data) => &data.children,
            _ => &[],
        }
    }

    /// All strict subtypes of an object type, depth-first
    pub fn descendants(&self, id: TypeId) -> Vec<TypeId> {
        let mut result = Vec::new();
        let mut stack: Vec<TypeId> = self.children(id).to_vec();
        while let Some(child) = stack.pop() {
            result.push(child);
            stack.extend_from_slice(self.children(child));
        }
        result
    }

    /// Find a pointer by short name on an object type, looking through
    /// view layers.
    pub fn getptr(&self, source: TypeId, name: &str) -> Option<PtrId> {
        let mut current = source;
        loop {
            if let TypeKind::Object(data) = &self.typ(current).kind {
                for &ptr in &data.pointers {
                    if self.ptr(ptr).name.shortname() == name {
                        return Some(ptr);
                    }
                }
            }
            let peeled = self.peel_view(current);
            if peeled == current {
                return None;
            }
            current = peeled;
        }
    }

    /// Like [`Schema::getptr`], but an error on a miss
    pub fn getptr_or_err(&self, source: TypeId, name: &str) -> CatalogResult<PtrId> {
        self.getptr(source, name)
            .ok_or_else(|| CatalogError::PointerNotFound {
                source_type: self.type_name(source).to_string(),
                pointer: name.to_string(),
            })
    }

    /// The identity pointer of an object type
    pub fn id_pointer(&self, source: TypeId) -> CatalogResult<PtrId> {
        self.getptr_or_err(self.material_type(source), "id")
    }

    /// The backend table of a material object type
    pub fn object_table(&self, id: TypeId) -> CatalogResult<TableName> {
        let material = self.material_type(id);
        let data = self.object_data(material)?;
        data.table
            .clone()
            .ok_or_else(|| CatalogError::NotAnObjectType(self.type_name(id).to_string()))
    }

    /// The backend type used for casts and column declarations
    pub fn pg_type_of(&self, id: TypeId) -> Vec<String> {
        match &self.typ(id).kind {
            TypeKind::Scalar(data) => data.pg_type.clone(),
            TypeKind::Object(_) => vec!["uuid".to_string()],
            TypeKind::Tuple(_) => vec!["record".to_string()],
            TypeKind::Array(data) => {
                let mut inner = self.pg_type_of(data.element);
                if let Some(last) = inner.last_mut() {
                    last.push_str("[]");
                }
                inner
            }
        }
    }

    /// Walk the scalar base chain to the topmost concrete base
    pub fn topmost_concrete_base(&self, id: TypeId) -> TypeId {
        let mut current = id;
        while let TypeKind::Scalar(ScalarTypeData { base: Some(b), .. }) = &self.typ(current).kind {
            current = *b;
        }
        current
    }

    /// Whether the scalar type is backed by a text column
    pub fn is_string(&self, id: TypeId) -> bool {
        let base = self.topmost_concrete_base(id);
        matches!(&self.typ(base).kind,
                 TypeKind::Scalar(data) if data.pg_type == ["text"])
    }

    /// Resolve the storage of a pointer value.
    ///
    /// With `link_bias` set, a pointer that also has a mapping table is
    /// reported as stored there even if its value is inline.
    pub fn pointer_storage_info(
        &self,
        ptr: PtrId,
        link_bias: bool,
    ) -> CatalogResult<PointerStorageInfo> {
        let pointer = self.ptr(ptr);

        if pointer.is_link_property {
            let link = pointer
                .source_link
                .ok_or_else(|| CatalogError::NoMappingTable(pointer.name.to_string()))?;
            let link_meta = self.ptr(link);
            let table = link_meta
                .table
                .clone()
                .ok_or_else(|| CatalogError::NoMappingTable(link_meta.name.to_string()))?;
            return Ok(PointerStorageInfo {
                table,
                table_type: TableType::Link,
                column_name: pointer.name.shortname().to_string(),
                column_type: self.pg_type_of(pointer.target),
            });
        }

        let inline = pointer.stored_inline();
        trace!(pointer = %pointer.name, inline, link_bias, "resolving pointer storage");

        if inline && !link_bias {
            let table = self.object_table(pointer.source)?;
            Ok(PointerStorageInfo {
                table,
                table_type: TableType::ObjectType,
                column_name: pointer.name.shortname().to_string(),
                column_type: self.pg_type_of(pointer.target),
            })
        } else {
            let table = match &pointer.table {
                Some(t) => t.clone(),
                // link_bias over an inline pointer synthesizes the
                // mapping-table address from the source table.
                None => {
                    let src = self.object_table(pointer.source)?;
                    TableName::new(
                        src.schema,
                        format!("{}_{}", src.name, pointer.name.shortname()),
                    )
                }
            };
            Ok(PointerStorageInfo {
                table,
                table_type: TableType::Link,
                column_name: MAP_TARGET_COL.to_string(),
                column_type: self.pg_type_of(pointer.target),
            })
        }
    }
}

/// Builder for [`Schema`] values
///
/// Seeds the `std` scalar types and gives every object type an implicit
/// exclusive `id` pointer.
///
/// # Examples
///
/// ```
/// use setlang_catalog::SchemaBuilder;
///
/// let mut builder = SchemaBuilder::new();
/// let user = builder.object_type("default::User");
/// let name = builder.scalar("std::str");
/// builder
///     .pointer(user, "name", name)
///     .required()
///     .exclusive();
/// let schema = builder.finish();
/// assert!(schema.get("default::User").is_some());
/// ```
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            schema: Schema::default(),
        };
        for (name, pg) in [
            ("std::uuid", "uuid"),
            ("std::str", "text"),
            ("std::int64", "int8"),
            ("std::int32", "int4"),
            ("std::int16", "int2"),
            ("std::float64", "float8"),
            ("std::float32", "float4"),
            ("std::bool", "bool"),
            ("std::json", "jsonb"),
            ("std::bytes", "bytea"),
            ("std::datetime", "timestamptz"),
        ] {
            builder.add_type(
                QualName::parse(name),
                TypeKind::Scalar(ScalarTypeData {
                    base: None,
                    pg_type: vec![pg.to_string()],
                }),
            );
        }
        builder
    }

    fn add_type(&mut self, name: QualName, kind: TypeKind) -> TypeId {
        let id = TypeId(self.schema.types.len() as u32);
        self.schema.by_name.insert(name.to_string(), id);
        self.schema.types.push(TypeMetadata { name, kind });
        id
    }

    /// Look up a previously registered scalar; panics on a miss, which
    /// keeps test schemas terse.
    pub fn scalar(&self, qualname: &str) -> TypeId {
        self.schema
            .get(qualname)
            .unwrap_or_else(|| panic!("scalar {qualname} is not registered"))
    }

    /// Register a scalar subtype (domain)
    pub fn scalar_subtype(&mut self, qualname: &str, base: TypeId) -> TypeId {
        let pg_type = self.schema.scalar_data(base).map_or_else(
            |_| vec!["text".to_string()],
            |data| data.pg_type.clone(),
        );
        self.add_type(
            QualName::parse(qualname),
            TypeKind::Scalar(ScalarTypeData {
                base: Some(base),
                pg_type,
            }),
        )
    }

    /// Register an object type with its backing table and implicit `id`
    pub fn object_type(&mut self, qualname: &str) -> TypeId {
        let name = QualName::parse(qualname);
        let table = TableName::new(name.module.clone(), name.name.clone());
        let id = self.add_type(
            name,
            TypeKind::Object(ObjectTypeData {
                table: Some(table),
                is_virtual: false,
                view_of: None,
                children: Vec::new(),
                pointers: Vec::new(),
            }),
        );
        let uuid = self.scalar("std::uuid");
        self.pointer(id, "id", uuid).required().exclusive().id();
        id
    }

    /// Register a virtual union type over the given children
    pub fn virtual_type(&mut self, qualname: &str, children: Vec<TypeId>) -> TypeId {
        self.add_type(
            QualName::parse(qualname),
            TypeKind::Object(ObjectTypeData {
                table: None,
                is_virtual: true,
                view_of: None,
                children,
                pointers: Vec::new(),
            }),
        )
    }

    /// Register a view aliasing `base`
    pub fn view_type(&mut self, qualname: &str, base: TypeId) -> TypeId {
        self.add_type(
            QualName::parse(qualname),
            TypeKind::Object(ObjectTypeData {
                table: None,
                is_virtual: false,
                view_of: Some(base),
                children: Vec::new(),
                pointers: Vec::new(),
            }),
        )
    }

    /// Register a subtype relationship
    pub fn extends(&mut self, child: TypeId, parent: TypeId) {
        if let TypeKind::Object(data) = &mut self.schema.types[parent.0 as usize].kind {
            data.children.push(child);
        }
    }

    /// Register a tuple type
    pub fn tuple_type(&mut self, qualname: &str, named: bool, elements: Vec<(String, TypeId)>) -> TypeId {
        self.add_type(
            QualName::parse(qualname),
            TypeKind::Tuple(TupleTypeData { named, elements }),
        )
    }

    /// Register an array type
    pub fn array_type(&mut self, qualname: &str, element: TypeId) -> TypeId {
        self.add_type(
            QualName::parse(qualname),
            TypeKind::Array(ArrayTypeData { element }),
        )
    }

    /// Start a pointer declaration on `source`
    pub fn pointer(&mut self, source: TypeId, name: &str, target: TypeId) -> PointerBuilder<'_> {
        let module = self.schema.type_name(source).module.clone();
        let singular_scalar = !self.schema.is_object(target);
        let ptr = PointerMetadata {
            name: QualName::new(module, name),
            source,
            target,
            cardinality: Cardinality::One,
            required: false,
            exclusive: false,
            is_link_property: false,
            is_id: false,
            computable: false,
            // Storage is finalized in PointerBuilder::finish once the
            // cardinality is known.
            table: None,
            source_link: None,
        };
        PointerBuilder {
            builder: self,
            ptr,
            inline_ok: singular_scalar,
        }
    }

    /// Start a link-property declaration on an existing link
    pub fn link_property(&mut self, link: PtrId, name: &str, target: TypeId) -> PtrId {
        let link_meta = self.schema.ptr(link).clone();
        let id = PtrId(self.schema.pointers.len() as u32);
        self.schema.pointers.push(PointerMetadata {
            name: QualName::new(link_meta.name.module.clone(), name),
            source: link_meta.source,
            target,
            cardinality: Cardinality::One,
            required: false,
            exclusive: false,
            is_link_property: true,
            is_id: false,
            computable: false,
            table: None,
            source_link: Some(link),
        });
        id
    }

    pub fn finish(self) -> Schema {
        self.schema
    }
}

/// In-progress pointer declaration; dropped or [`PointerBuilder::finish`]ed
/// to commit.
pub struct PointerBuilder<'a> {
    builder: &'a mut SchemaBuilder,
    ptr: PointerMetadata,
    inline_ok: bool,
}

impl PointerBuilder<'_> {
    pub fn required(mut self) -> Self {
        self.ptr.required = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.ptr.exclusive = true;
        self
    }

    pub fn many(mut self) -> Self {
        self.ptr.cardinality = Cardinality::Many;
        self
    }

    pub fn computable(mut self) -> Self {
        self.ptr.computable = true;
        self
    }

    fn id(mut self) -> Self {
        self.ptr.is_id = true;
        self
    }

    fn commit(&mut self) -> PtrId {
        let mut ptr = std::mem::replace(
            &mut self.ptr,
            PointerMetadata {
                name: QualName::new("", ""),
                source: TypeId(0),
                target: TypeId(0),
                cardinality: Cardinality::One,
                required: false,
                exclusive: false,
                is_link_property: false,
                is_id: false,
                computable: false,
                table: None,
                source_link: None,
            },
        );
        let stored_inline = self.inline_ok && ptr.cardinality.is_one();
        if !stored_inline {
            let source_name = self.builder.schema.type_name(ptr.source);
            ptr.table = Some(TableName::new(
                source_name.module.clone(),
                format!("{}_{}", source_name.name, ptr.name.shortname()),
            ));
        }
        let id = PtrId(self.builder.schema.pointers.len() as u32);
        if let TypeKind::Object(data) = &mut self.builder.schema.types[ptr.source.0 as usize].kind {
            data.pointers.push(id);
        }
        self.builder.schema.pointers.push(ptr);
        id
    }

    pub fn finish(mut self) -> PtrId {
        self.commit()
    }
}

impl Drop for PointerBuilder<'_> {
    fn drop(&mut self) {
        // Commit pointers declared without an explicit finish().  The
        // empty-name sentinel marks an already-committed declaration.
        if !self.ptr.name.name.is_empty() {
            self.commit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        let mut builder = SchemaBuilder::new();
        let str_t = builder.scalar("std::str");
        let int_t = builder.scalar("std::int64");

        let user = builder.object_type("default::User");
        builder.pointer(user, "name", str_t).required().exclusive();

        let issue = builder.object_type("default::Issue");
        builder.pointer(issue, "number", int_t).required();
        builder.pointer(issue, "owner", user).exclusive();
        builder.pointer(issue, "watchers", user).many();

        builder.finish()
    }

    #[test]
    fn test_lookup_by_name() {
        let schema = sample_schema();
        assert!(schema.get("default::User").is_some());
        assert!(schema.get("User").is_some());
        assert!(schema.get("default::Missing").is_none());
    }

    #[test]
    fn test_implicit_id_pointer() {
        let schema = sample_schema();
        let user = schema.get("default::User").unwrap();
        let id_ptr = schema.id_pointer(user).unwrap();
        assert!(schema.ptr(id_ptr).is_id);
        assert!(schema.ptr(id_ptr).exclusive);
    }

    #[test]
    fn test_inline_scalar_storage() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let number = schema.getptr(issue, "number").unwrap();
        let info = schema.pointer_storage_info(number, false).unwrap();
        assert_eq!(info.table_type, TableType::ObjectType);
        assert_eq!(info.column_name, "number");
        assert_eq!(info.table.name, "Issue");
    }

    #[test]
    fn test_object_link_storage() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let owner = schema.getptr(issue, "owner").unwrap();
        let info = schema.pointer_storage_info(owner, false).unwrap();
        assert_eq!(info.table_type, TableType::Link);
        assert_eq!(info.column_name, MAP_TARGET_COL);
        assert_eq!(info.table.name, "Issue_owner");
    }

    #[test]
    fn test_link_bias_forces_mapping_table() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let number = schema.getptr(issue, "number").unwrap();
        let info = schema.pointer_storage_info(number, true).unwrap();
        assert_eq!(info.table_type, TableType::Link);
        assert_eq!(info.table.name, "Issue_number");
    }

    #[test]
    fn test_view_peeling() {
        let mut builder = SchemaBuilder::new();
        let user = builder.object_type("default::User");
        let view = builder.view_type("default::RecentUsers", user);
        let schema = builder.finish();

        assert!(schema.is_view(view));
        assert_eq!(schema.material_type(view), user);
        assert!(!schema.is_view(user));
    }

    #[test]
    fn test_getptr_through_view() {
        let mut builder = SchemaBuilder::new();
        let str_t = builder.scalar("std::str");
        let user = builder.object_type("default::User");
        builder.pointer(user, "name", str_t);
        let view = builder.view_type("default::ActiveUsers", user);
        let schema = builder.finish();

        assert!(schema.getptr(view, "name").is_some());
    }

    #[test]
    fn test_descendants() {
        let mut builder = SchemaBuilder::new();
        let base = builder.object_type("default::Named");
        let user = builder.object_type("default::User");
        let bot = builder.object_type("default::Bot");
        builder.extends(user, base);
        builder.extends(bot, user);
        let schema = builder.finish();

        let descendants = schema.descendants(base);
        assert!(descendants.contains(&user));
        assert!(descendants.contains(&bot));
        assert_eq!(descendants.len(), 2);
    }

    #[test]
    fn test_exclusive_inbound_singular() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let owner = schema.getptr(issue, "owner").unwrap();
        let watchers = schema.getptr(issue, "watchers").unwrap();

        use crate::metadata::Direction;
        assert!(schema.ptr(owner).singular(Direction::Inbound));
        assert!(!schema.ptr(watchers).singular(Direction::Inbound));
    }
}
