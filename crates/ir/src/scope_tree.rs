// Copyright (c) 2025 the SetLang authors
//
// Licensed under the MIT License or Apache License 2.0
// See LICENSE files for details

//! # Query scope tree
//!
//! The scope tree records which paths are bound at each lexical point of a
//! query and enforces the correlation semantics of the language: a path
//! bound at a fence is *visible* to everything below it, fences stop
//! unrestricted pull-up, and namespace tags declared by a branch are
//! stripped from paths pulled out of it.
//!
//! Nodes live in an arena and reference each other through [`NodeId`]
//! indices; parent links are ids rather than back-pointers, so subtrees
//! can be detached and reattached freely.
//!
//! Node kinds:
//!
//! - **fence** — a SET-OF argument or statement boundary,
//! - **branch** — groups paths without fencing,
//! - **path** — carries a [`PathId`].

use std::collections::BTreeSet;
use std::fmt::Write as _;

use tracing::trace;

use crate::error::{IrError, IrResult};
use crate::path_id::PathId;

/// Handle to a node in a [`ScopeTree`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// A single scope tree node
#[derive(Debug, Clone)]
pub struct ScopeNode {
    /// Node path id, or None for fence/branch nodes
    pub path_id: Option<PathId>,
    /// Whether the subtree represents a SET-OF argument
    pub fenced: bool,
    /// A unique identifier used to map scopes onto IR sets
    pub unique_id: Option<u32>,
    /// Whether the subtree must not affect parents
    pub protect_parent: bool,
    /// Prevent unnesting into parents
    pub unnest_fence: bool,
    /// Whether this node represents an optional path
    pub optional: bool,
    /// Namespaces declared by paths in this branch; stripped from paths
    /// pulled up out of it
    pub namespaces: BTreeSet<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl ScopeNode {
    fn new(path_id: Option<PathId>, fenced: bool) -> Self {
        Self {
            path_id,
            fenced,
            unique_id: None,
            protect_parent: false,
            unnest_fence: false,
            optional: false,
            namespaces: BTreeSet::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    fn name(&self) -> String {
        match &self.path_id {
            None => {
                if self.fenced {
                    "FENCE".to_string()
                } else {
                    "BRANCH".to_string()
                }
            }
            Some(path_id) => {
                let opt = if self.optional { " [OPT]" } else { "" };
                format!("{path_id}{opt}")
            }
        }
    }
}

/// An arena of scope nodes forming a forest; [`ScopeTree::root`] is the
/// root of the main tree.
#[derive(Debug, Clone)]
pub struct ScopeTree {
    nodes: Vec<ScopeNode>,
    root: NodeId,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTree {
    /// A tree with a single fenced root
    pub fn new() -> Self {
        let root = ScopeNode::new(None, true);
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &ScopeNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ScopeNode {
        &mut self.nodes[id.0]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Allocate a detached fence node
    pub fn new_fence(&mut self) -> NodeId {
        self.alloc(ScopeNode::new(None, true))
    }

    /// Allocate a detached branch node
    pub fn new_branch(&mut self) -> NodeId {
        self.alloc(ScopeNode::new(None, false))
    }

    /// Allocate a detached path node
    pub fn new_path_node(&mut self, path_id: PathId) -> NodeId {
        self.alloc(ScopeNode::new(Some(path_id), false))
    }

    fn alloc(&mut self, node: ScopeNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Reparent `child` under `parent` (low-level; no validation)
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) {
        self.set_parent(child, Some(parent));
    }

    fn set_parent(&mut self, child: NodeId, parent: Option<NodeId>) {
        if self.node(child).parent == parent {
            return;
        }
        if let Some(old) = self.node(child).parent {
            self.node_mut(old).children.retain(|&c| c != child);
        }
        self.node_mut(child).parent = parent;
        if let Some(new) = parent {
            self.node_mut(new).children.push(child);
        }
    }

    /// Create and attach an empty fenced node
    pub fn attach_fence(&mut self, at: NodeId) -> NodeId {
        let fence = self.new_fence();
        self.attach_child(at, fence);
        fence
    }

    /// Create and attach an empty branch node
    pub fn attach_branch(&mut self, at: NodeId) -> NodeId {
        let branch = self.new_branch();
        self.attach_child(at, branch);
        branch
    }

    /// Detach the node from its parent; the subtree stays alive.
    pub fn remove(&mut self, id: NodeId) {
        self.set_parent(id, None);
    }

    /// Remove the node, reattaching its children to the parent.
    pub fn collapse(&mut self, id: NodeId) -> IrResult<()> {
        let parent = self
            .parent(id)
            .ok_or(IrError::InvalidScopeNode(id.0))?;

        let subtree = if self.node(id).path_id.is_some() {
            let branch = self.new_branch();
            for child in self.children(id).to_vec() {
                self.attach_child(branch, child);
            }
            branch
        } else {
            id
        };

        self.remove(id);
        self.attach_subtree(parent, subtree)
    }

    /// Ancestors of `id`, including itself
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            result.push(node);
            current = self.parent(node);
        }
        result
    }

    /// Ancestors of `id`, not including itself
    pub fn strict_ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = self.ancestors(id);
        result.remove(0);
        result
    }

    /// Descendants of `id` including itself, top-first
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = vec![id];
        result.extend(self.strict_descendants(id));
        result
    }

    /// Descendants of `id` not including itself, top-first
    pub fn strict_descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        for &child in &self.node(id).children {
            result.push(child);
            result.extend(self.strict_descendants(child));
        }
        result
    }

    /// Descendants (including self) carrying path ids, top-first
    pub fn path_descendants(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&n| self.node(n).path_id.is_some())
            .collect()
    }

    /// Children of `id` carrying path ids
    pub fn path_children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|&n| self.node(n).path_id.is_some())
            .collect()
    }

    /// Namespaces declared anywhere in the subtree
    pub fn descendant_namespaces(&self, id: NodeId) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        for node in self.descendants(id) {
            result.extend(self.node(node).namespaces.iter().cloned());
        }
        result
    }

    /// Descendants reachable without crossing a fenced child, incl. self
    pub fn unfenced_descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = vec![id];
        for &child in &self.node(id).children {
            if !self.node(child).fenced {
                result.extend(self.unfenced_descendants(child));
            }
        }
        result
    }

    /// The nearest ancestor fence, or `id` itself if fenced
    pub fn fence(&self, id: NodeId) -> NodeId {
        if self.node(id).fenced {
            id
        } else {
            self.parent_fence(id).unwrap_or(id)
        }
    }

    /// The nearest strict ancestor fence
    pub fn parent_fence(&self, id: NodeId) -> Option<NodeId> {
        self.strict_ancestors(id)
            .into_iter()
            .find(|&a| self.node(a).fenced)
    }

    /// The root of the tree containing `id`
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    /// The paths bound directly at this node: its own path, or the paths
    /// of its path children.
    pub fn get_all_paths(&self, id: NodeId) -> Vec<PathId> {
        if let Some(path_id) = &self.node(id).path_id {
            vec![path_id.clone()]
        } else {
            self.path_children(id)
                .into_iter()
                .filter_map(|n| self.node(n).path_id.clone())
                .collect()
        }
    }

    /// Attach a scope subtree representing `path_id`.
    ///
    /// Builds a fenced spine mirroring each type prefix of the path;
    /// link-property steps annotate the previous step and do not nest.
    pub fn attach_path(&mut self, at: NodeId, path_id: &PathId) -> IrResult<()> {
        let subtree = self.new_fence();
        let mut parent = subtree;
        let mut is_lprop = false;

        let mut prefixes = path_id.iter_prefixes(true);
        prefixes.reverse();
        for prefix in prefixes {
            if prefix.is_ptr_path() {
                is_lprop = true;
                continue;
            }

            let is_linkprop_prefix = prefix.is_linkprop_path();
            let new_child = self.new_path_node(prefix);
            self.attach_child(parent, new_child);

            if !(is_lprop || is_linkprop_prefix) {
                parent = new_child;
            }

            is_lprop = false;
        }

        self.attach_subtree(at, subtree)
    }

    /// Attach a subtree to `at`, reconciling visible duplicates, pulling
    /// up unfenced paths and removing dominated descendants.
    ///
    /// The only operation that can raise
    /// [`IrError::InvalidScopeConfiguration`].
    pub fn attach_subtree(&mut self, at: NodeId, node: NodeId) -> IrResult<()> {
        let node = if self.node(node).path_id.is_some() {
            // Wrap the path node so traversal is uniform.
            let wrapper = self.new_fence();
            self.attach_child(wrapper, node);
            wrapper
        } else {
            node
        };

        let dns = self.descendant_namespaces(node);

        for descendant in self.path_descendants(node) {
            if descendant == node || !self.is_attached_under(descendant, node) {
                continue;
            }

            let raw_path = self
                .node(descendant)
                .path_id
                .clone()
                .expect("path descendant carries a path id");
            let path_id = raw_path.strip_namespace(dns.iter());

            if self.find_visible(at, &path_id).is_some() {
                // This path is already present in the tree, discard.
                trace!(path = %path_id.pformat(), "discarding dominated scope node");
                self.remove(descendant);
            } else if self.parent_fence(descendant) == Some(node) {
                // Unfenced path.  First, find any existing descendant
                // with the same path id.  If not found, find any
                // *unfenced* node that is a child of any of our
                // ancestors.  If found, attach the node directly to its
                // parent fence and remove all other occurrences.
                let mut unnest_fence = false;
                let mut existing = self.find_descendant(at, &path_id);
                let parent_fence;
                if existing.is_none() {
                    let (found, fence_seen) = self.find_unfenced(at, &path_id);
                    existing = found;
                    unnest_fence = fence_seen;
                    parent_fence = found.and_then(|e| self.parent_fence(e));
                } else {
                    parent_fence = Some(self.fence(at));
                }

                if let (Some(existing), Some(parent_fence)) = (existing, parent_fence) {
                    if self.find_child(parent_fence, &path_id).is_none() {
                        if unnest_fence {
                            let parent = self.parent(descendant);
                            let offending = match parent {
                                Some(p) if self.node(p).path_id.is_some() => p,
                                _ => descendant,
                            };
                            let offending_path = self
                                .node(offending)
                                .path_id
                                .as_ref()
                                .map(|p| p.pformat())
                                .unwrap_or_default();
                            let existing_path = self
                                .node(existing)
                                .path_id
                                .as_ref()
                                .map(|p| p.pformat())
                                .unwrap_or_default();
                            return Err(IrError::InvalidScopeConfiguration {
                                offending: offending_path,
                                existing: existing_path,
                                offending_node: offending.0,
                                existing_node: existing.0,
                            });
                        }

                        self.remove_descendants(parent_fence, &path_id);
                        self.attach_child(parent_fence, existing);
                        trace!(path = %path_id.pformat(), "promoted binding to parent fence");
                    }

                    // Discard the node from the subtree being attached.
                    self.remove(descendant);
                }
            }
        }

        // Attach whatever is remaining in the subtree.
        for child in self.node(node).children.clone() {
            for pd in self.path_descendants(child) {
                let path = self
                    .node(pd)
                    .path_id
                    .clone()
                    .expect("path descendant carries a path id");
                if !path.namespace().is_empty() {
                    let to_strip: Vec<String> = path
                        .namespace()
                        .iter()
                        .map(|n| n.name().to_string())
                        .filter(|n| dns.contains(n))
                        .collect();
                    if !to_strip.is_empty() {
                        self.node_mut(pd).path_id = Some(path.strip_namespace(to_strip));
                    }
                }
            }

            self.attach_child(at, child);
        }

        Ok(())
    }

    fn is_attached_under(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// Remove all descendants matching `path_id` under the
    /// namespace-subset equality rule.
    pub fn remove_descendants(&mut self, at: NodeId, path_id: &PathId) {
        let matching: Vec<NodeId> = self
            .descendants(at)
            .into_iter()
            .filter(|&n| {
                paths_equal_to_shortest_ns(self.node(n).path_id.as_ref(), Some(path_id))
            })
            .collect();

        for node in matching {
            self.remove(node);
        }
    }

    /// Indicate that `path_id` is used as an OPTIONAL argument.
    pub fn mark_as_optional(&mut self, at: NodeId, path_id: &PathId) {
        if let Some(node) = self.find_visible(at, path_id) {
            self.node_mut(node).optional = true;
        }
    }

    pub fn is_optional(&self, at: NodeId, path_id: &PathId) -> bool {
        match self.find_visible(at, path_id) {
            Some(node) => self.node(node).optional,
            None => false,
        }
    }

    /// Find the node binding `path_id` that is visible from `at`: the
    /// node itself, an ancestor, or a child of any ancestor, comparing
    /// paths after stripping namespaces declared between here and there.
    pub fn find_visible(&self, at: NodeId, path_id: &PathId) -> Option<NodeId> {
        let mut namespaces: BTreeSet<String> = BTreeSet::new();

        for node in self.ancestors(at) {
            if paths_equal(self.node(node).path_id.as_ref(), Some(path_id), &namespaces) {
                return Some(node);
            }

            for &child in &self.node(node).children {
                if paths_equal(
                    self.node(child).path_id.as_ref(),
                    Some(path_id),
                    &namespaces,
                ) {
                    return Some(child);
                }
            }

            namespaces.extend(self.node(node).namespaces.iter().cloned());
        }

        None
    }

    pub fn is_visible(&self, at: NodeId, path_id: &PathId) -> bool {
        self.find_visible(at, path_id).is_some()
    }

    /// Whether any type prefix of `path_id` is visible, longest first
    pub fn is_any_prefix_visible(&self, at: NodeId, path_id: &PathId) -> bool {
        let mut prefixes = path_id.iter_prefixes(false);
        prefixes.reverse();
        prefixes
            .into_iter()
            .any(|prefix| self.find_visible(at, &prefix).is_some())
    }

    /// All paths visible from `at`
    pub fn get_all_visible(&self, at: NodeId) -> Vec<PathId> {
        let mut paths: Vec<PathId> = Vec::new();
        let mut push = |paths: &mut Vec<PathId>, p: &PathId| {
            if !paths.contains(p) {
                paths.push(p.clone());
            }
        };
        for node in self.ancestors(at) {
            if let Some(path_id) = &self.node(node).path_id {
                push(&mut paths, path_id);
            } else {
                for &child in &self.node(node).children {
                    if let Some(path_id) = &self.node(child).path_id {
                        push(&mut paths, path_id);
                    }
                }
            }
        }
        paths
    }

    /// Find a direct child with exactly the given path id
    pub fn find_child(&self, at: NodeId, path_id: &PathId) -> Option<NodeId> {
        self.node(at)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).path_id.as_ref() == Some(path_id))
    }

    /// Find a strict descendant with exactly the given path id
    pub fn find_descendant(&self, at: NodeId, path_id: &PathId) -> Option<NodeId> {
        self.strict_descendants(at)
            .into_iter()
            .find(|&n| self.node(n).path_id.as_ref() == Some(path_id))
    }

    /// Find an unfenced node binding `path_id` under any ancestor, and
    /// report whether an unnest fence was crossed on the way.
    pub fn find_unfenced(&self, at: NodeId, path_id: &PathId) -> (Option<NodeId>, bool) {
        let mut namespaces: BTreeSet<String> = BTreeSet::new();
        let mut unnest_fence_seen = false;

        for node in self.ancestors(at) {
            for descendant in self.unfenced_descendants(node) {
                if paths_equal(
                    self.node(descendant).path_id.as_ref(),
                    Some(path_id),
                    &namespaces,
                ) {
                    return (Some(descendant), unnest_fence_seen);
                }
            }

            namespaces.extend(self.node(node).namespaces.iter().cloned());
            unnest_fence_seen = unnest_fence_seen || self.node(node).unnest_fence;
        }

        (None, unnest_fence_seen)
    }

    /// Find a node by its IR-set link id
    pub fn find_by_unique_id(&self, at: NodeId, unique_id: u32) -> Option<NodeId> {
        self.descendants(at)
            .into_iter()
            .find(|&n| self.node(n).unique_id == Some(unique_id))
    }

    /// Deep-copy the subtree rooted at `id`; the copy is detached.
    pub fn copy(&mut self, id: NodeId) -> NodeId {
        let source = self.node(id).clone();
        let copy = self.alloc(ScopeNode {
            parent: None,
            children: Vec::new(),
            ..source
        });
        for child in self.node(id).children.clone() {
            let child_copy = self.copy(child);
            self.attach_child(copy, child_copy);
        }
        copy
    }

    /// Whether the subtree binds no paths
    pub fn is_empty_subtree(&self, id: NodeId) -> bool {
        if self.node(id).path_id.is_some() {
            return false;
        }
        self.node(id)
            .children
            .iter()
            .all(|&c| self.is_empty_subtree(c))
    }

    /// Stable nested rendering used by tests and diagnostics
    pub fn pformat(&self, id: NodeId) -> String {
        let node = self.node(id);
        if !node.children.is_empty() {
            let mut child_formats: Vec<String> = node
                .children
                .iter()
                .map(|&c| self.pformat(c))
                .filter(|s| !s.is_empty())
                .collect();

            if !child_formats.is_empty() {
                child_formats.sort();
                let mut children = String::new();
                for (i, cf) in child_formats.iter().enumerate() {
                    if i > 0 {
                        children.push_str(",\n");
                    }
                    children.push_str(cf);
                }
                let indented: String = children
                    .lines()
                    .map(|line| format!("    {line}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                let mut out = String::new();
                let _ = write!(out, "\"{}\": {{\n{}\n}}", node.name(), indented);
                return out;
            }
        }

        if node.path_id.is_some() {
            format!("\"{}\"", node.name())
        } else {
            String::new()
        }
    }
}

fn paths_equal(
    path_id_1: Option<&PathId>,
    path_id_2: Option<&PathId>,
    namespaces: &BTreeSet<String>,
) -> bool {
    match (path_id_1, path_id_2) {
        (Some(p1), Some(p2)) => {
            if namespaces.is_empty() {
                p1 == p2
            } else {
                p1.strip_namespace(namespaces.iter()) == p2.strip_namespace(namespaces.iter())
            }
        }
        _ => false,
    }
}

/// Two paths refer to the same binding if one namespace is a subset of
/// the other and the namespace-free paths agree.
fn paths_equal_to_shortest_ns(path_id_1: Option<&PathId>, path_id_2: Option<&PathId>) -> bool {
    let (Some(p1), Some(p2)) = (path_id_1, path_id_2) else {
        return false;
    };

    let ns1 = p1.namespace();
    let ns2 = p2.namespace();

    if ns1.is_empty() && ns2.is_empty() {
        return p1 == p2;
    }

    let extra_in_1 = ns1.difference(ns2).count();
    let extra_in_2 = ns2.difference(ns1).count();

    if extra_in_1 > 0 && extra_in_2 > 0 {
        // Neither namespace is a proper subset of another.
        false
    } else {
        p1.replace_namespace([]) == p2.replace_namespace([])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_id::Namespace;
    use setlang_catalog::{Direction, Schema, SchemaBuilder};

    fn sample_schema() -> Schema {
        let mut builder = SchemaBuilder::new();
        let str_t = builder.scalar("std::str");
        let user = builder.object_type("default::User");
        builder.pointer(user, "name", str_t).required();
        let issue = builder.object_type("default::Issue");
        builder.pointer(issue, "owner", user);
        builder.finish()
    }

    fn issue_path(schema: &Schema) -> PathId {
        PathId::from_type(schema, schema.get("default::Issue").unwrap())
    }

    fn issue_owner(schema: &Schema) -> PathId {
        let issue = schema.get("default::Issue").unwrap();
        let owner = schema.getptr(issue, "owner").unwrap();
        issue_path(schema)
            .extend(schema, owner, Direction::Outbound, None)
            .unwrap()
    }

    #[test]
    fn test_attach_path_builds_spine() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();

        tree.attach_path(root, &issue_owner(&schema)).unwrap();

        // The spine nests the full path above its prefix.
        let rendered = tree.pformat(root);
        assert!(rendered.contains("Issue.owner"));
        assert!(rendered.contains("\"Issue\""));
    }

    #[test]
    fn test_visibility_from_nested_fence() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.attach_path(root, &issue_path(&schema)).unwrap();

        let fence = tree.attach_fence(root);
        assert!(tree.is_visible(fence, &issue_path(&schema)));
    }

    #[test]
    fn test_dominated_duplicate_is_discarded() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.attach_path(root, &issue_path(&schema)).unwrap();
        tree.attach_path(root, &issue_path(&schema)).unwrap();

        let bound: Vec<_> = tree
            .path_descendants(root)
            .into_iter()
            .filter(|&n| tree.node(n).path_id.as_ref() == Some(&issue_path(&schema)))
            .collect();
        assert_eq!(bound.len(), 1);
    }

    #[test]
    fn test_unfenced_path_is_promoted() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();

        // A path bound behind an unfenced branch...
        let branch = tree.attach_branch(root);
        let inner = tree.new_path_node(issue_path(&schema));
        let holder = tree.new_branch();
        tree.attach_child(holder, inner);
        tree.attach_subtree(branch, holder).unwrap();

        // ...gets unified when the same path arrives at the root fence.
        tree.attach_path(root, &issue_owner(&schema)).unwrap();

        let visible = tree.find_visible(root, &issue_path(&schema));
        assert!(visible.is_some());
    }

    #[test]
    fn test_unnest_fence_conflict() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();

        // Bind Issue behind a fence that forbids unnesting.
        let fence = tree.attach_fence(root);
        tree.node_mut(fence).unnest_fence = true;
        let bound = tree.new_path_node(issue_path(&schema));
        let holder = tree.new_branch();
        tree.attach_child(holder, bound);
        tree.attach_subtree(fence, holder).unwrap();

        // Attaching an unfenced reference to the same path below the
        // fence must fail and name both paths.
        let incoming = tree.new_path_node(issue_path(&schema));
        let wrapper = tree.new_branch();
        tree.attach_child(wrapper, incoming);

        let inner_fence = tree.attach_fence(fence);
        let err = tree.attach_subtree(inner_fence, wrapper);
        match err {
            Err(IrError::InvalidScopeConfiguration {
                offending,
                existing,
                ..
            }) => {
                assert_eq!(offending, "Issue");
                assert_eq!(existing, "Issue");
            }
            other => panic!("expected scope conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_namespace_stripping_on_pull_up() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();

        let ns_path = issue_path(&schema).merge_namespace([Namespace::hard("v1")]);
        let holder = tree.new_branch();
        tree.node_mut(holder).namespaces.insert("v1".to_string());
        let bound = tree.new_path_node(ns_path);
        tree.attach_child(holder, bound);
        tree.attach_subtree(root, holder).unwrap();

        // The declared namespace was stripped during attachment, so the
        // bare path is now visible.
        assert!(tree.is_visible(root, &issue_path(&schema)));
    }

    #[test]
    fn test_find_visible_strips_intermediate_namespaces() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.attach_path(root, &issue_path(&schema)).unwrap();

        let fence = tree.attach_fence(root);
        tree.node_mut(fence).namespaces.insert("v1".to_string());
        let inner = tree.attach_fence(fence);

        let decorated = issue_path(&schema).merge_namespace([Namespace::hard("v1")]);
        assert!(tree.is_visible(inner, &decorated));
    }

    #[test]
    fn test_mark_as_optional() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.attach_path(root, &issue_path(&schema)).unwrap();

        assert!(!tree.is_optional(root, &issue_path(&schema)));
        tree.mark_as_optional(root, &issue_path(&schema));
        assert!(tree.is_optional(root, &issue_path(&schema)));
    }

    #[test]
    fn test_remove_descendants_shortest_ns_rule() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();

        let decorated = issue_path(&schema).merge_namespace([Namespace::hard("v1")]);
        let node = tree.new_path_node(decorated);
        tree.attach_child(root, node);

        // The bare path matches the decorated binding: one namespace is a
        // subset of the other.
        tree.remove_descendants(root, &issue_path(&schema));
        assert!(tree.path_descendants(root).is_empty());
    }

    #[test]
    fn test_copy_is_detached_and_deep() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.attach_path(root, &issue_owner(&schema)).unwrap();

        let copy = tree.copy(root);
        assert!(tree.parent(copy).is_none());
        assert_eq!(
            tree.path_descendants(copy).len(),
            tree.path_descendants(root).len()
        );

        // Mutating the copy leaves the original alone.
        let first = tree.path_descendants(copy)[0];
        tree.remove(first);
        assert!(!tree.path_descendants(root).is_empty());
    }

    #[test]
    fn test_find_by_unique_id() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.attach_path(root, &issue_path(&schema)).unwrap();

        let node = tree.path_descendants(root)[0];
        tree.node_mut(node).unique_id = Some(42);

        assert_eq!(tree.find_by_unique_id(root, 42), Some(node));
        assert_eq!(tree.find_by_unique_id(root, 7), None);
    }

    #[test]
    fn test_pformat_is_sorted_and_stable() {
        let schema = sample_schema();
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.attach_path(root, &issue_path(&schema)).unwrap();
        let user = PathId::from_type(&schema, schema.get("default::User").unwrap());
        tree.attach_path(root, &user).unwrap();

        let a = tree.pformat(root);
        let b = tree.pformat(root);
        assert_eq!(a, b);
        assert!(a.find("\"Issue\"").unwrap() < a.find("\"User\"").unwrap());
    }
}
