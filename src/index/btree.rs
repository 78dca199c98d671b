//! Ordered index tree: a B+-tree variant keyed by [`Value`] with linked
//! leaves, fixed at order 4 (at most 3 keys per node, at most 4 children per
//! internal node) per the data model.
//!
//! Latch-crabbing insert is grounded on the teacher's `BPlusTree` (release a
//! parent's write latch before descending into a child), narrowed to a fixed
//! order and to the leaf-chain semantics `SearchEq/Lt/Lte/Gt/Gte/All` need.
//! Leaves are linked forward only (`next`); range queries walk the full
//! chain from the leftmost leaf rather than resuming a doubly-linked walk
//! from the matching leaf — behaviorally identical for the set-equality
//! properties this tree is tested against, at the cost of an O(n) scan
//! instead of an O(log n + k) one. See DESIGN.md.

use crate::value::Value;
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::Arc;

/// Max keys per node; max children per internal node is `ORDER`.
const ORDER: usize = 4;

type NodeRef<V> = Arc<RwLock<Node<V>>>;

struct Node<V: Clone> {
    is_leaf: bool,
    keys: Vec<Value>,
    /// Leaf-only: key/payload pairs, kept in sync with `keys`.
    entries: Vec<(Value, V)>,
    /// Internal-only: `children.len() == keys.len() + 1`.
    children: Vec<NodeRef<V>>,
    /// Leaf-only: forward link to the next leaf in ascending key order.
    next: Option<NodeRef<V>>,
}

impl<V: Clone> Node<V> {
    fn new_leaf() -> Self {
        Self {
            is_leaf: true,
            keys: Vec::with_capacity(ORDER),
            entries: Vec::with_capacity(ORDER),
            children: Vec::new(),
            next: None,
        }
    }

    fn new_internal() -> Self {
        Self {
            is_leaf: false,
            keys: Vec::with_capacity(ORDER),
            entries: Vec::new(),
            children: Vec::with_capacity(ORDER + 1),
            next: None,
        }
    }

    /// Child to descend into for `key`; duplicate keys route to the
    /// rightmost child that can hold them.
    fn child_index(&self, key: &Value) -> usize {
        for (i, k) in self.keys.iter().enumerate() {
            if key < k {
                return i;
            }
        }
        self.keys.len()
    }

    /// Leftmost position `key` can be inserted at while keeping `entries`
    /// sorted ascending.
    fn insert_position(&self, key: &Value) -> usize {
        self.entries.partition_point(|(k, _)| k < key)
    }
}

/// An order-4 B+-tree keyed by [`Value`], generic over its leaf payload so
/// FLC can plug in the two-variant leaf (terminal record slice vs. nested
/// tree) described in the design notes.
pub struct BTree<V: Clone> {
    root: RwLock<Option<NodeRef<V>>>,
}

impl<V: Clone> Default for BTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shallow clone: the new handle shares the same underlying nodes. Safe
/// because FLC's trees are immutable after warm-up (§5) — there is no
/// writer to race with a cloned reader.
impl<V: Clone> Clone for BTree<V> {
    fn clone(&self) -> Self {
        Self {
            root: RwLock::new(self.root.read().clone()),
        }
    }
}

impl<V: Clone> BTree<V> {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.read().is_none()
    }

    /// Insert `key`/`payload`. Duplicate keys are permitted.
    pub fn insert(&self, key: Value, payload: V) {
        let mut root_guard = self.root.write();

        let Some(root) = root_guard.clone() else {
            let mut leaf = Node::new_leaf();
            leaf.keys.push(key.clone());
            leaf.entries.push((key, payload));
            *root_guard = Some(Arc::new(RwLock::new(leaf)));
            return;
        };
        drop(root_guard);

        if let Some((split_key, new_node)) = Self::insert_recursive(&root, key, payload) {
            let mut new_root = Node::new_internal();
            new_root.children.push(root);
            new_root.keys.push(split_key);
            new_root.children.push(new_node);
            *self.root.write() = Some(Arc::new(RwLock::new(new_root)));
        }
    }

    fn insert_recursive(
        node_ref: &NodeRef<V>,
        key: Value,
        payload: V,
    ) -> Option<(Value, NodeRef<V>)> {
        let mut node = node_ref.write();

        if node.is_leaf {
            let pos = node.insert_position(&key);
            node.keys.insert(pos, key.clone());
            node.entries.insert(pos, (key, payload));

            if node.keys.len() > ORDER - 1 {
                Some(Self::split_leaf(&mut node))
            } else {
                None
            }
        } else {
            let child_idx = node.child_index(&key);
            let child = node.children[child_idx].clone();
            drop(node); // release latch before descending

            let split = Self::insert_recursive(&child, key, payload);

            let Some((split_key, new_child)) = split else {
                return None;
            };

            let mut node = node_ref.write();
            node.keys.insert(child_idx, split_key);
            node.children.insert(child_idx + 1, new_child);

            if node.keys.len() > ORDER - 1 {
                Some(Self::split_internal(&mut node))
            } else {
                None
            }
        }
    }

    /// Split at the middle key; the right sibling takes the upper half and
    /// the forward leaf link is repaired.
    fn split_leaf(node: &mut Node<V>) -> (Value, NodeRef<V>) {
        let mid = node.keys.len() / 2;
        let mut right = Node::new_leaf();
        right.keys = node.keys.split_off(mid);
        right.entries = node.entries.split_off(mid);
        right.next = node.next.take();

        let split_key = right.keys[0].clone();
        let right_ref = Arc::new(RwLock::new(right));
        node.next = Some(right_ref.clone());
        (split_key, right_ref)
    }

    /// Split at the middle key; the middle key is promoted to the parent
    /// and does not appear in either child.
    fn split_internal(node: &mut Node<V>) -> (Value, NodeRef<V>) {
        let mid = node.keys.len() / 2;
        let mut right = Node::new_internal();
        let promoted = node.keys.remove(mid);
        right.keys = node.keys.split_off(mid);
        right.children = node.children.split_off(mid + 1);
        (promoted, Arc::new(RwLock::new(right)))
    }

    /// The single leaf payload matching `key`, or none. With duplicate keys,
    /// returns the first match in ascending order.
    pub fn search_eq(&self, key: &Value) -> Option<V> {
        let root = self.root.read().clone()?;
        let leaf = Self::find_leaf(&root, key);
        let leaf = leaf.read();
        leaf.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn find_leaf(node_ref: &NodeRef<V>, key: &Value) -> NodeRef<V> {
        let node = node_ref.read();
        if node.is_leaf {
            drop(node);
            node_ref.clone()
        } else {
            let idx = node.child_index(key);
            let child = node.children[idx].clone();
            drop(node);
            Self::find_leaf(&child, key)
        }
    }

    fn leftmost_leaf(&self) -> Option<NodeRef<V>> {
        let mut current = self.root.read().clone()?;
        loop {
            let next_child = {
                let node = current.read();
                if node.is_leaf {
                    None
                } else {
                    Some(node.children[0].clone())
                }
            };
            match next_child {
                Some(child) => current = child,
                None => return Some(current),
            }
        }
    }

    /// All payloads whose key matches `op` relative to `key`, walking the
    /// full leaf chain in ascending order.
    fn search_by(&self, op: impl Fn(&Value) -> bool) -> Vec<V> {
        let mut out = Vec::new();
        let Some(mut leaf) = self.leftmost_leaf() else {
            return out;
        };
        loop {
            let next = {
                let node = leaf.read();
                for (k, v) in &node.entries {
                    if op(k) {
                        out.push(v.clone());
                    }
                }
                node.next.clone()
            };
            match next {
                Some(n) => leaf = n,
                None => break,
            }
        }
        out
    }

    pub fn search_lt(&self, key: &Value) -> Vec<V> {
        self.search_by(|k| k < key)
    }

    pub fn search_lte(&self, key: &Value) -> Vec<V> {
        self.search_by(|k| k <= key)
    }

    pub fn search_gt(&self, key: &Value) -> Vec<V> {
        self.search_by(|k| k > key)
    }

    pub fn search_gte(&self, key: &Value) -> Vec<V> {
        self.search_by(|k| k >= key)
    }

    /// All payloads in ascending key order.
    pub fn all(&self) -> Vec<V> {
        self.search_by(|_| true)
    }

    /// All (key, payload) pairs in ascending order, for full in-order
    /// traversal callers (e.g. FLC's cached `findAll` sequence).
    pub fn all_entries(&self) -> Vec<(Value, V)> {
        let mut out = Vec::new();
        let Some(mut leaf) = self.leftmost_leaf() else {
            return out;
        };
        loop {
            let next = {
                let node = leaf.read();
                out.extend(node.entries.iter().cloned());
                node.next.clone()
            };
            match next {
                Some(n) => leaf = n,
                None => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Value {
        Value::Int(v)
    }

    #[test]
    fn in_order_traversal_is_ascending() {
        let tree: BTree<i64> = BTree::new();
        for v in [5, 3, 9, 1, 7, 2, 8, 4, 6, 0] {
            tree.insert(int(v), v);
        }
        let all: Vec<i64> = tree.all();
        let mut sorted = all.clone();
        sorted.sort();
        assert_eq!(all, sorted);
        assert_eq!(all.len(), 10);
    }

    #[test]
    fn search_eq_finds_inserted_keys() {
        let tree: BTree<&'static str> = BTree::new();
        tree.insert(int(1), "one");
        tree.insert(int(2), "two");
        tree.insert(int(3), "three");
        assert_eq!(tree.search_eq(&int(2)), Some("two"));
        assert_eq!(tree.search_eq(&int(99)), None);
    }

    #[test]
    fn partition_identity_holds() {
        let tree: BTree<i64> = BTree::new();
        for v in 0..30 {
            tree.insert(int(v), v);
        }
        let k = int(15);
        let mut lt = tree.search_lt(&k);
        let eq = tree.search_eq(&k).into_iter().collect::<Vec<_>>();
        let gt = tree.search_gt(&k);
        lt.extend(eq.clone());
        lt.extend(gt.clone());
        lt.sort();
        assert_eq!(lt, (0..30).collect::<Vec<_>>());

        let mut gte = tree.search_gte(&k);
        gte.sort();
        let mut union = eq;
        union.extend(gt);
        union.sort();
        assert_eq!(gte, union);
    }

    #[test]
    fn duplicate_keys_are_permitted() {
        let tree: BTree<&'static str> = BTree::new();
        tree.insert(int(1), "a");
        tree.insert(int(1), "b");
        tree.insert(int(1), "c");
        let all = tree.search_eq(&int(1));
        assert!(all.is_some());
        assert_eq!(tree.all().len(), 3);
    }

    #[test]
    fn empty_tree_returns_nothing() {
        let tree: BTree<i64> = BTree::new();
        assert_eq!(tree.search_eq(&int(1)), None);
        assert!(tree.search_lt(&int(1)).is_empty());
        assert!(tree.all().is_empty());
    }

    #[test]
    fn splits_preserve_leaf_chain() {
        let tree: BTree<i64> = BTree::new();
        for v in 0..200 {
            tree.insert(int(v), v);
        }
        assert_eq!(tree.all().len(), 200);
        assert_eq!(tree.search_gte(&int(190)).len(), 10);
    }
}
