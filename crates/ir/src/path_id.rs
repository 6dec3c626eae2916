// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # Path identifiers
//!
//! A [`PathId`] is the immutable identifier of a logical set traversal
//! through the object graph: a head type followed by alternating
//! pointer-step / target-type elements.
//!
//! ## Normalization
//!
//! Every path carries two projections: the display path (what the user
//! wrote, view types included) and the normalized path (type aliases
//! dereferenced, targets materialized).  Equality and hashing cover only
//! the normalized projection together with the namespace set, the stored
//! prefix and the pointer flag.
//!
//! ## Namespaces
//!
//! A namespace tag scopes a path inside a WITH binding or a polymorphic
//! subtree.  Weak tags are stripped when a path is pulled up out of its
//! introducing scope; hard tags must match for two paths to be equal.
//! Tag identity is the tag *name* — a weak and a hard tag with the same
//! name compare equal, the weakness only matters to the stripping
//! operations.
//!
//! ## Prefixes
//!
//! Extending a path across a hard-namespace boundary records the previous
//! path as the new path's `prefix`, so that later truncation can recover
//! the exact outer identity.

use serde::{Deserialize, Serialize};
use setlang_catalog::{Direction, PtrId, Schema, TypeId};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{IrError, IrResult};

/// A namespace tag; identity is the name, `weak` only affects stripping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    name: String,
    weak: bool,
}

impl Namespace {
    pub fn hard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weak: false,
        }
    }

    pub fn weak(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weak: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }
}

impl PartialEq for Namespace {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Namespace {}

impl PartialOrd for Namespace {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Namespace {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for Namespace {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weak {
            write!(f, "[{}]", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// What a path step points through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointerRef {
    /// A schema pointer
    Pointer(PtrId),
    /// A tuple element step (no schema entry)
    TupleElement(String),
    /// A `[is T]` type-indirection step
    TypeIndirection { optional: bool },
}

/// One pointer-step / target-type pair of a path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathStep {
    /// The pointer traversed
    pub ptr: PointerRef,
    /// Normalized qualified pointer name, e.g. `default::owner`
    pub norm_name: String,
    pub direction: Direction,
    pub is_linkprop: bool,
    /// Display target
    pub target: TypeId,
    /// Qualified display-target name, kept for schema-free formatting
    pub target_name: String,
    /// Materialized target used for normalization
    pub norm_target: TypeId,
}

impl PathStep {
    /// Unqualified pointer name
    pub fn shortname(&self) -> &str {
        match self.norm_name.rsplit_once("::") {
            Some((_, name)) => name,
            None => &self.norm_name,
        }
    }

    fn norm_key(&self) -> (&str, Direction, bool, TypeId) {
        (
            &self.norm_name,
            self.direction,
            self.is_linkprop,
            self.norm_target,
        )
    }
}

/// Unique identifier of a path in an expression
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathId {
    head: Option<TypeId>,
    norm_head: Option<TypeId>,
    head_name: String,
    steps: Vec<PathStep>,
    namespace: BTreeSet<Namespace>,
    prefix: Option<Arc<PathId>>,
    is_ptr: bool,
}

impl PartialEq for PathId {
    fn eq(&self, other: &Self) -> bool {
        self.norm_head == other.norm_head
            && self.steps.len() == other.steps.len()
            && self
                .steps
                .iter()
                .zip(&other.steps)
                .all(|(a, b)| a.norm_key() == b.norm_key())
            && self.namespace == other.namespace
            && self.prefix == other.prefix
            && self.is_ptr == other.is_ptr
    }
}

impl Eq for PathId {}

impl Hash for PathId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm_head.hash(state);
        for step in &self.steps {
            step.norm_key().hash(state);
        }
        self.namespace.hash(state);
        self.prefix.hash(state);
        self.is_ptr.hash(state);
    }
}

impl PathId {
    /// The empty path
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single-type path rooted at `head`
    pub fn from_type(schema: &Schema, head: TypeId) -> Self {
        let norm_head = schema.material_type(head);
        Self {
            head: Some(head),
            norm_head: Some(norm_head),
            head_name: schema.type_name(head).to_string(),
            steps: Vec::new(),
            namespace: BTreeSet::new(),
            prefix: None,
            is_ptr: false,
        }
    }

    /// A single-type path with an initial namespace
    pub fn from_type_with_namespace(
        schema: &Schema,
        head: TypeId,
        namespace: impl IntoIterator<Item = Namespace>,
    ) -> Self {
        let mut path = Self::from_type(schema, head);
        path.namespace = namespace.into_iter().collect();
        path
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// The element count: one for the head plus two per step
    pub fn len(&self) -> usize {
        if self.head.is_none() {
            0
        } else {
            1 + 2 * self.steps.len()
        }
    }

    /// The trailing type
    pub fn target(&self) -> Option<TypeId> {
        match self.steps.last() {
            Some(step) => Some(step.target),
            None => self.head,
        }
    }

    /// The trailing type of the normalized projection
    pub fn norm_target(&self) -> Option<TypeId> {
        match self.steps.last() {
            Some(step) => Some(step.norm_target),
            None => self.norm_head,
        }
    }

    /// The qualified name of the trailing type
    pub fn target_name(&self) -> &str {
        match self.steps.last() {
            Some(step) => &step.target_name,
            None => &self.head_name,
        }
    }

    pub fn namespace(&self) -> &BTreeSet<Namespace> {
        &self.namespace
    }

    /// The trailing pointer step, if any
    pub fn rptr(&self) -> Option<&PathStep> {
        self.steps.last()
    }

    pub fn rptr_dir(&self) -> Option<Direction> {
        self.steps.last().map(|s| s.direction)
    }

    pub fn rptr_name(&self) -> Option<&str> {
        self.steps.last().map(|s| s.shortname())
    }

    /// Extend the path with a schema pointer step.
    ///
    /// `target` overrides the pointer's natural far endpoint (used for
    /// `[is T]`-style narrowing at extension time).
    pub fn extend(
        &self,
        schema: &Schema,
        link: PtrId,
        direction: Direction,
        target: Option<TypeId>,
    ) -> IrResult<PathId> {
        self.extend_with_namespace(schema, link, direction, target, [])
    }

    /// [`PathId::extend`] with namespace tags added to the result
    pub fn extend_with_namespace(
        &self,
        schema: &Schema,
        link: PtrId,
        direction: Direction,
        target: Option<TypeId>,
        ns: impl IntoIterator<Item = Namespace>,
    ) -> IrResult<PathId> {
        let ptr = schema.ptr(link);
        let is_linkprop = ptr.is_link_property;
        let target = target.unwrap_or(match direction {
            Direction::Outbound => ptr.target,
            Direction::Inbound => ptr.source,
        });
        self.extend_step(
            PathStep {
                ptr: PointerRef::Pointer(link),
                norm_name: ptr.name.to_string(),
                direction,
                is_linkprop,
                target,
                target_name: schema.type_name(target).to_string(),
                norm_target: schema.material_type(target),
            },
            ns,
        )
    }

    /// Extend with a fully resolved step; the generic backend of the
    /// `extend*` helpers and the tuple/type indirection constructors.
    pub fn extend_step(
        &self,
        step: PathStep,
        ns: impl IntoIterator<Item = Namespace>,
    ) -> IrResult<PathId> {
        if self.is_empty() {
            return Err(IrError::InvalidPathId(
                "cannot extend empty PathId".to_string(),
            ));
        }
        if step.is_linkprop && !self.is_ptr {
            return Err(IrError::InvalidPathId(
                "link property path extension on a non-link path".to_string(),
            ));
        }

        let mut namespace = self.namespace.clone();
        namespace.extend(ns);

        let self_hard: BTreeSet<&str> = self
            .namespace
            .iter()
            .filter(|n| !n.is_weak())
            .map(|n| n.name())
            .collect();
        let result_hard: BTreeSet<&str> = namespace
            .iter()
            .filter(|n| !n.is_weak())
            .map(|n| n.name())
            .collect();

        let prefix = if self_hard != result_hard {
            Some(Arc::new(self.clone()))
        } else {
            self.prefix.clone()
        };

        let mut steps = self.steps.clone();
        steps.push(step);

        Ok(PathId {
            head: self.head,
            norm_head: self.norm_head,
            head_name: self.head_name.clone(),
            steps,
            namespace,
            prefix,
            is_ptr: false,
        })
    }

    /// Truncate to `size` elements; must land on a type boundary.
    pub fn get_prefix(&self, size: usize) -> IrResult<PathId> {
        if size == 0 || size > self.len() || size % 2 == 0 {
            return Err(IrError::InvalidPathSlice(size));
        }
        Ok(self.prefix_unchecked(size))
    }

    fn prefix_unchecked(&self, size: usize) -> PathId {
        if size == 0 {
            return PathId::empty();
        }
        if size == self.len() {
            return self.clone();
        }

        if let Some(prefix) = &self.prefix {
            let prefix_len = prefix.len();
            if prefix_len == size {
                return (**prefix).clone();
            } else if prefix_len > size {
                return prefix.prefix_unchecked(size);
            }
        }

        let keep = (size.saturating_sub(1)) / 2;
        let mut result = PathId {
            head: self.head,
            norm_head: self.norm_head,
            head_name: self.head_name.clone(),
            steps: self.steps[..keep].to_vec(),
            namespace: self.namespace.clone(),
            prefix: self.prefix.clone(),
            is_ptr: false,
        };

        // A chopped-off link property ref leaves a pointer path behind.
        if keep < self.steps.len() && self.steps[keep].is_linkprop {
            result.is_ptr = true;
        }

        result
    }

    /// The path with the trailing step removed
    pub fn src_path(&self) -> Option<PathId> {
        if self.steps.is_empty() {
            None
        } else {
            Some(self.prefix_unchecked(self.len() - 2))
        }
    }

    /// The target form of a pointer path (identity otherwise)
    pub fn tgt_path(&self) -> PathId {
        if !self.is_ptr {
            self.clone()
        } else {
            let mut result = self.clone();
            result.is_ptr = false;
            result
        }
    }

    /// The pointer form of this path (identity if already a pointer path)
    pub fn ptr_path(&self) -> PathId {
        if self.is_ptr {
            self.clone()
        } else {
            let mut result = self.clone();
            result.is_ptr = true;
            result
        }
    }

    /// Iterate type prefixes in path order, ending with the path itself.
    /// With `include_ptr`, pointer paths are yielded between type
    /// prefixes.
    pub fn iter_prefixes(&self, include_ptr: bool) -> Vec<PathId> {
        let mut result = Vec::new();
        if self.is_empty() {
            return result;
        }

        let start = if let Some(prefix) = &self.prefix {
            result.extend(prefix.iter_prefixes(include_ptr));
            prefix.len()
        } else {
            result.push(self.prefix_unchecked(1));
            1
        };

        let mut i = start;
        while i + 1 < self.len() {
            let path_id = self.prefix_unchecked(i + 2);
            if path_id.is_ptr_path() {
                result.push(path_id.tgt_path());
                if include_ptr {
                    result.push(path_id);
                }
            } else {
                result.push(path_id);
            }
            i += 2;
        }

        result
    }

    /// Whether `path_id` is a prefix of this path
    pub fn startswith(&self, path_id: &PathId) -> bool {
        path_id.len() <= self.len() && self.prefix_unchecked(path_id.len()) == *path_id
    }

    /// Substitute `prefix` with `replacement` if this path starts with it
    pub fn replace_prefix(&self, prefix: &PathId, replacement: &PathId) -> PathId {
        if !self.startswith(prefix) {
            return self.clone();
        }
        let prefix_len = prefix.len();
        if prefix_len >= self.len() {
            return replacement.clone();
        }

        let keep_from = (prefix_len.saturating_sub(1)) / 2;
        let mut steps = replacement.steps.clone();
        steps.extend_from_slice(&self.steps[keep_from..]);

        let stored = match &self.prefix {
            Some(p) if p.len() > prefix_len => {
                Some(Arc::new(p.replace_prefix(prefix, replacement)))
            }
            _ => replacement.prefix.clone(),
        };

        PathId {
            head: replacement.head,
            norm_head: replacement.norm_head,
            head_name: replacement.head_name.clone(),
            steps,
            namespace: replacement.namespace.clone(),
            prefix: stored,
            is_ptr: self.is_ptr,
        }
    }

    /// Replace the whole namespace set
    pub fn replace_namespace(
        &self,
        namespace: impl IntoIterator<Item = Namespace>,
    ) -> PathId {
        let mut result = self.clone();
        result.namespace = namespace.into_iter().collect();
        result
    }

    /// Add tags to the namespace set
    pub fn merge_namespace(&self, namespace: impl IntoIterator<Item = Namespace>) -> PathId {
        let mut merged = self.namespace.clone();
        merged.extend(namespace);
        if merged == self.namespace {
            self.clone()
        } else {
            self.replace_namespace(merged)
        }
    }

    /// Remove all tags with the given names
    pub fn strip_namespace<S: AsRef<str>>(
        &self,
        names: impl IntoIterator<Item = S>,
    ) -> PathId {
        if self.namespace.is_empty() {
            return self.clone();
        }
        let names: BTreeSet<String> = names
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        if names.is_empty() {
            return self.clone();
        }
        let stripped: BTreeSet<Namespace> = self
            .namespace
            .iter()
            .filter(|n| !names.contains(n.name()))
            .cloned()
            .collect();
        self.replace_namespace(stripped)
    }

    /// Remove weak tags, recursively through the stored prefix
    pub fn strip_weak_namespaces(&self) -> PathId {
        if self.namespace.is_empty() {
            return self.clone();
        }
        let stripped: BTreeSet<Namespace> = self
            .namespace
            .iter()
            .filter(|n| !n.is_weak())
            .cloned()
            .collect();
        let mut result = self.replace_namespace(stripped);
        if let Some(prefix) = &result.prefix {
            result.prefix = Some(Arc::new(prefix.strip_weak_namespaces()));
        }
        result
    }

    /// This path followed by variants with one weak tag removed each
    pub fn iter_weak_namespace_prefixes(&self) -> Vec<PathId> {
        let mut result = vec![self.clone()];
        for ns in self.namespace.iter().filter(|n| n.is_weak()) {
            let reduced: BTreeSet<Namespace> = self
                .namespace
                .iter()
                .filter(|n| n.name() != ns.name())
                .cloned()
                .collect();
            result.push(self.replace_namespace(reduced));
        }
        result
    }

    pub fn is_ptr_path(&self) -> bool {
        self.is_ptr
    }

    pub fn is_objtype_path(&self, schema: &Schema) -> bool {
        !self.is_ptr
            && self
                .target()
                .is_some_and(|t| schema.is_object(t))
    }

    pub fn is_scalar_path(&self, schema: &Schema) -> bool {
        !self.is_ptr
            && self
                .target()
                .is_some_and(|t| schema.is_scalar(t))
    }

    pub fn is_tuple_path(&self, schema: &Schema) -> bool {
        !self.is_ptr
            && self
                .target()
                .is_some_and(|t| schema.is_tuple(t))
    }

    pub fn is_linkprop_path(&self) -> bool {
        self.steps.last().is_some_and(|s| s.is_linkprop)
    }

    pub fn is_type_indirection_path(&self) -> bool {
        matches!(
            self.steps.last(),
            Some(PathStep {
                ptr: PointerRef::TypeIndirection { .. },
                ..
            })
        )
    }

    pub fn is_tuple_indirection_path(&self) -> bool {
        matches!(
            self.steps.last(),
            Some(PathStep {
                ptr: PointerRef::TupleElement(_),
                ..
            })
        )
    }

    /// User-facing path rendering, e.g. `Issue.<owner@note`
    pub fn pformat(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let head_short = match self.head_name.rsplit_once("::") {
            Some((_, name)) => name,
            None => &self.head_name,
        };
        let mut result = head_short.to_string();

        for step in &self.steps {
            if step.is_linkprop {
                result.push('@');
            } else {
                result.push('.');
                if step.direction == Direction::Inbound {
                    result.push('<');
                }
            }
            result.push_str(step.shortname());
        }

        if self.is_ptr {
            result.push('@');
        }

        result
    }
}

impl fmt::Display for PathId {
    /// Internal rendering with namespaces and target narrowing
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }

        if !self.namespace.is_empty() {
            let tags: Vec<String> = self.namespace.iter().map(|n| n.to_string()).collect();
            write!(f, "{}@@", tags.join("@"))?;
        }

        write!(f, "({})", self.head_name)?;

        for step in &self.steps {
            if step.is_linkprop {
                write!(f, "@")?;
            } else {
                write!(f, ".{}", step.direction)?;
            }
            write!(f, "({})[IS {}]", step.shortname(), step.target_name)?;
        }

        if self.is_ptr {
            write!(f, "@")?;
        }

        Ok(())
    }
}

/// Extend a tuple path to one of its elements
pub fn tuple_indirection_path_id(
    schema: &Schema,
    tuple_path_id: &PathId,
    element_name: &str,
    element_type: TypeId,
) -> IrResult<PathId> {
    tuple_path_id.extend_step(
        PathStep {
            ptr: PointerRef::TupleElement(element_name.to_string()),
            norm_name: format!("__tuple__::{element_name}"),
            direction: Direction::Outbound,
            is_linkprop: false,
            target: element_type,
            target_name: schema.type_name(element_type).to_string(),
            norm_target: schema.material_type(element_type),
        },
        [],
    )
}

/// Extend a path with a `[is T]` type-indirection step
pub fn type_indirection_path_id(
    schema: &Schema,
    path_id: &PathId,
    target_type: TypeId,
    optional: bool,
) -> IrResult<PathId> {
    let name = if optional {
        "optindirection"
    } else {
        "indirection"
    };
    path_id.extend_step(
        PathStep {
            ptr: PointerRef::TypeIndirection { optional },
            norm_name: format!("__type__::{name}"),
            direction: Direction::Outbound,
            is_linkprop: false,
            target: target_type,
            target_name: schema.type_name(target_type).to_string(),
            norm_target: schema.material_type(target_type),
        },
        [],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use setlang_catalog::SchemaBuilder;

    fn sample_schema() -> Schema {
        let mut builder = SchemaBuilder::new();
        let str_t = builder.scalar("std::str");
        let int_t = builder.scalar("std::int64");
        let user = builder.object_type("default::User");
        builder.pointer(user, "name", str_t).required();
        let issue = builder.object_type("default::Issue");
        builder.pointer(issue, "number", int_t).required();
        builder.pointer(issue, "owner", user).exclusive();
        builder.finish()
    }

    fn issue_owner_name(schema: &Schema) -> PathId {
        let issue = schema.get("default::Issue").unwrap();
        let user = schema.get("default::User").unwrap();
        let owner = schema.getptr(issue, "owner").unwrap();
        let name = schema.getptr(user, "name").unwrap();

        PathId::from_type(schema, issue)
            .extend(schema, owner, Direction::Outbound, None)
            .unwrap()
            .extend(schema, name, Direction::Outbound, None)
            .unwrap()
    }

    #[test]
    fn test_len_and_target() {
        let schema = sample_schema();
        let path = issue_owner_name(&schema);
        assert_eq!(path.len(), 5);
        assert_eq!(path.target(), schema.get("std::str"));
        assert_eq!(path.rptr_name(), Some("name"));
    }

    #[test]
    fn test_prefix_consistency() {
        let schema = sample_schema();
        let path = issue_owner_name(&schema);

        // get_prefix(len(p)) == p
        assert_eq!(path.get_prefix(path.len()).unwrap(), path);

        let owner = path.get_prefix(3).unwrap();
        assert_eq!(owner.len(), 3);
        assert_eq!(owner.rptr_name(), Some("owner"));

        // Every type prefix of the prefix is a prefix of the path.
        let outer: Vec<_> = path.iter_prefixes(false);
        let inner: Vec<_> = owner.iter_prefixes(false);
        assert_eq!(&outer[..inner.len()], &inner[..]);
    }

    #[test]
    fn test_prefix_on_pointer_step_is_error() {
        let schema = sample_schema();
        let path = issue_owner_name(&schema);
        assert!(matches!(
            path.get_prefix(2),
            Err(IrError::InvalidPathSlice(2))
        ));
        assert!(matches!(
            path.get_prefix(4),
            Err(IrError::InvalidPathSlice(4))
        ));
    }

    #[test]
    fn test_src_path() {
        let schema = sample_schema();
        let path = issue_owner_name(&schema);
        let src = path.src_path().unwrap();
        assert_eq!(src.len(), 3);
        assert_eq!(src, path.get_prefix(3).unwrap());
        assert!(src.src_path().unwrap().src_path().is_none());
    }

    #[test]
    fn test_startswith() {
        let schema = sample_schema();
        let path = issue_owner_name(&schema);
        let owner = path.get_prefix(3).unwrap();
        assert!(path.startswith(&owner));
        assert!(!owner.startswith(&path));
    }

    #[test]
    fn test_namespace_strip_idempotent() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let path = PathId::from_type_with_namespace(
            &schema,
            issue,
            [Namespace::hard("v1"), Namespace::weak("w1")],
        );

        let stripped = path.strip_namespace(["v1"]);
        assert_eq!(stripped.strip_namespace(["v1"]), stripped);
        // Stripping the empty set is the identity.
        assert_eq!(path.strip_namespace(Vec::<String>::new()), path);
    }

    #[test]
    fn test_strip_removes_weak_and_hard_alike() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let path =
            PathId::from_type_with_namespace(&schema, issue, [Namespace::weak("w1")]);
        let stripped = path.strip_namespace(["w1"]);
        assert!(stripped.namespace().is_empty());
    }

    #[test]
    fn test_weak_hard_tags_compare_by_name() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let weak =
            PathId::from_type_with_namespace(&schema, issue, [Namespace::weak("ns")]);
        let hard =
            PathId::from_type_with_namespace(&schema, issue, [Namespace::hard("ns")]);
        assert_eq!(weak, hard);
    }

    #[test]
    fn test_strip_weak_namespaces() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let path = PathId::from_type_with_namespace(
            &schema,
            issue,
            [Namespace::hard("h"), Namespace::weak("w")],
        );
        let stripped = path.strip_weak_namespaces();
        assert_eq!(stripped.namespace().len(), 1);
        assert!(!stripped.namespace().iter().next().unwrap().is_weak());
    }

    #[test]
    fn test_hard_namespace_extension_records_prefix() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let owner = schema.getptr(issue, "owner").unwrap();

        let base = PathId::from_type(&schema, issue);
        let extended = base
            .extend_with_namespace(
                &schema,
                owner,
                Direction::Outbound,
                None,
                [Namespace::hard("view1")],
            )
            .unwrap();

        // The hard-namespace boundary pins the old path as prefix, and
        // truncation recovers it exactly (namespace included).
        let recovered = extended.get_prefix(1).unwrap();
        assert_eq!(recovered, base);
        assert!(recovered.namespace().is_empty());
    }

    #[test]
    fn test_weak_namespace_extension_keeps_prefix() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let owner = schema.getptr(issue, "owner").unwrap();

        let base = PathId::from_type(&schema, issue);
        let extended = base
            .extend_with_namespace(
                &schema,
                owner,
                Direction::Outbound,
                None,
                [Namespace::weak("w")],
            )
            .unwrap();

        let recovered = extended.get_prefix(1).unwrap();
        // No hard boundary crossed: the truncation carries the namespace.
        assert_eq!(recovered.namespace().len(), 1);
    }

    #[test]
    fn test_replace_prefix_round_trip() {
        let schema = sample_schema();
        let path = issue_owner_name(&schema);
        let old = path.get_prefix(1).unwrap();
        let new = PathId::from_type_with_namespace(
            &schema,
            schema.get("default::Issue").unwrap(),
            [Namespace::hard("inner")],
        );

        let mapped = path.replace_prefix(&old, &new);
        assert_ne!(mapped, path);
        let back = mapped.replace_prefix(&new, &old);
        assert_eq!(back, path);
    }

    #[test]
    fn test_linkprop_extension_requires_ptr_path() {
        let mut builder = SchemaBuilder::new();
        let str_t = builder.scalar("std::str");
        let user = builder.object_type("default::User");
        let issue = builder.object_type("default::Issue");
        let owner = builder.pointer(issue, "owner", user).finish();
        let note = builder.link_property(owner, "note", str_t);
        let schema = builder.finish();

        let base = PathId::from_type(&schema, issue)
            .extend(&schema, owner, Direction::Outbound, None)
            .unwrap();

        // Extending the target path with a link property is invalid...
        assert!(base
            .extend(&schema, note, Direction::Outbound, None)
            .is_err());

        // ...but the pointer path accepts it.
        let lprop = base
            .ptr_path()
            .extend(&schema, note, Direction::Outbound, None)
            .unwrap();
        assert!(lprop.is_linkprop_path());

        // Chopping the link property off recovers the pointer path.
        let chopped = lprop.src_path().unwrap();
        assert!(chopped.is_ptr_path());
        assert_eq!(chopped.tgt_path(), base);
    }

    #[test]
    fn test_iter_prefixes_include_ptr() {
        let mut builder = SchemaBuilder::new();
        let str_t = builder.scalar("std::str");
        let user = builder.object_type("default::User");
        let issue = builder.object_type("default::Issue");
        let owner = builder.pointer(issue, "owner", user).finish();
        let note = builder.link_property(owner, "note", str_t);
        let schema = builder.finish();

        let lprop = PathId::from_type(&schema, issue)
            .extend(&schema, owner, Direction::Outbound, None)
            .unwrap()
            .ptr_path()
            .extend(&schema, note, Direction::Outbound, None)
            .unwrap();

        let without = lprop.iter_prefixes(false);
        let with = lprop.iter_prefixes(true);
        assert!(with.len() > without.len());
        assert!(with.iter().any(|p| p.is_ptr_path()));
    }

    #[test]
    fn test_pformat() {
        let schema = sample_schema();
        let path = issue_owner_name(&schema);
        assert_eq!(path.pformat(), "Issue.owner.name");

        let user = schema.get("default::User").unwrap();
        let owner = schema.getptr(schema.get("default::Issue").unwrap(), "owner").unwrap();
        let inbound = PathId::from_type(&schema, user)
            .extend(&schema, owner, Direction::Inbound, None)
            .unwrap();
        assert_eq!(inbound.pformat(), "User.<owner");
    }

    #[test]
    fn test_tuple_indirection_path() {
        let schema = sample_schema();
        let mut builder = SchemaBuilder::new();
        let int_t = builder.scalar("std::int64");
        let tup = builder.tuple_type(
            "default::tuple_xy",
            true,
            vec![("x".to_string(), int_t), ("y".to_string(), int_t)],
        );
        let tuple_schema = builder.finish();
        let _ = schema;

        let base = PathId::from_type(&tuple_schema, tup);
        let elem = tuple_indirection_path_id(&tuple_schema, &base, "x", int_t).unwrap();
        assert!(elem.is_tuple_indirection_path());
        assert!(elem.startswith(&base));
    }

    #[test]
    fn test_type_indirection_path() {
        let schema = sample_schema();
        let issue = schema.get("default::Issue").unwrap();
        let user = schema.get("default::User").unwrap();
        let base = PathId::from_type(&schema, user);
        let narrowed = type_indirection_path_id(&schema, &base, issue, false).unwrap();
        assert!(narrowed.is_type_indirection_path());
    }
}
