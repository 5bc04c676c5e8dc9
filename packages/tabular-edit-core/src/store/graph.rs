//! Parent to children relation between pending changes.
//!
//! Children are prerequisites of their parent: a child must be applied
//! before the parent it is attached under.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::change::Identity;

/// Dependency edges between pending changes.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Parent to children, in attachment order
    children: HashMap<Identity, Vec<Identity>>,
    /// Child to parents
    parents: HashMap<Identity, Vec<Identity>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `child` under `parent`.
    ///
    /// # Returns
    /// `false` if the edge already existed.
    pub fn attach(&mut self, parent: Identity, child: Identity) -> bool {
        let children = self.children.entry(parent).or_default();
        if children.contains(&child) {
            return false;
        }
        children.push(child);
        self.parents.entry(child).or_default().push(parent);
        true
    }

    /// Returns the children of a change in attachment order.
    pub fn children(&self, identity: Identity) -> &[Identity] {
        self.children
            .get(&identity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_child(&self, identity: Identity) -> bool {
        !self.children(identity).is_empty()
    }

    pub fn parents(&self, identity: Identity) -> &[Identity] {
        self.parents
            .get(&identity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_parent(&self, identity: Identity) -> bool {
        !self.parents(identity).is_empty()
    }

    /// Returns whether `to` is `from` or one of its descendants.
    pub fn is_reachable(&self, from: Identity, to: Identity) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            for &child in self.children(node) {
                if child == to {
                    return true;
                }
                if visited.insert(child) {
                    stack.push(child);
                }
            }
        }
        false
    }

    /// Expands a removal set with descendants left without any surviving parent.
    ///
    /// A shared descendant stays as long as one of its parents is kept.
    pub fn cascade(&self, roots: &[Identity]) -> Vec<Identity> {
        let mut removed: HashSet<Identity> = roots.iter().copied().collect();
        let mut order: Vec<Identity> = Vec::with_capacity(roots.len());
        for root in roots {
            if !order.contains(root) {
                order.push(*root);
            }
        }
        let mut cursor = 0;
        while cursor < order.len() {
            let node = order[cursor];
            cursor += 1;
            for &child in self.children(node) {
                if removed.contains(&child) {
                    continue;
                }
                if self.parents(child).iter().all(|p| removed.contains(p)) {
                    removed.insert(child);
                    order.push(child);
                }
            }
        }
        order
    }

    /// Removes a node and every edge touching it.
    ///
    /// Children of the node stay in the graph as roots unless they have
    /// other parents.
    pub fn detach(&mut self, identity: Identity) {
        if let Some(children) = self.children.remove(&identity) {
            for child in children {
                if let Some(parents) = self.parents.get_mut(&child) {
                    parents.retain(|p| *p != identity);
                    if parents.is_empty() {
                        self.parents.remove(&child);
                    }
                }
            }
        }
        if let Some(parents) = self.parents.remove(&identity) {
            for parent in parents {
                if let Some(children) = self.children.get_mut(&parent) {
                    children.retain(|c| *c != identity);
                    if children.is_empty() {
                        self.children.remove(&parent);
                    }
                }
            }
        }
    }

    /// Collects changes so that every change follows all of its prerequisites.
    ///
    /// Depth-first post-order over an explicit stack; children are visited
    /// in attachment order and shared descendants are emitted once.
    /// Identities for which `is_pending` returns false are skipped.
    pub fn collect_post_order(
        &self,
        roots: &[Identity],
        is_pending: impl Fn(Identity) -> bool,
    ) -> Vec<Identity> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();

        for &root in roots {
            if !is_pending(root) || !visited.insert(root) {
                continue;
            }
            let mut stack: Vec<(Identity, usize)> = vec![(root, 0)];
            while let Some(top) = stack.last_mut() {
                let (node, cursor) = *top;
                top.1 += 1;
                match self.children(node).get(cursor) {
                    Some(&child) => {
                        if is_pending(child) && visited.insert(child) {
                            stack.push((child, 0));
                        }
                    }
                    None => {
                        order.push(node);
                        stack.pop();
                    }
                }
            }
        }
        order
    }

    /// Ordered copy of the edges for read-only consumers.
    pub fn edges(&self) -> BTreeMap<Identity, Vec<Identity>> {
        self.children
            .iter()
            .map(|(parent, children)| (*parent, children.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}
