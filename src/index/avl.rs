//! Self-balancing AVL tree for index keys
//!
//! Each node holds one key and every value stored under it. Nodes live in
//! an arena and refer to each other by slot; the parent link is only a
//! lookup aid for rebalancing and never owns anything.
//!
//! # Invariants
//!
//! - In-order traversal yields strictly increasing keys
//! - Every node's height is 1 + max(child heights), leaves have height 1
//! - Sibling subtree heights differ by at most one
//! - A unique tree never holds more than one value per key

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use serde_json::Value;

use super::errors::{IndexError, IndexResult};
use crate::document::as_date_millis;
use crate::query::compare_numbers;

/// Key comparison injected into a tree
pub type KeyComparator<K> = Arc<dyn Fn(&K, &K) -> IndexResult<Ordering> + Send + Sync>;

/// Value equality injected into a tree, used by `delete`
pub type ValueEquality<V> = Arc<dyn Fn(&V, &V) -> bool + Send + Sync>;

/// Natural key order used when no comparator is injected
pub trait DefaultKeyOrder {
    /// Compare two keys, failing when they cannot be ordered
    fn default_compare(&self, other: &Self) -> IndexResult<Ordering>;
}

impl DefaultKeyOrder for Value {
    /// Numbers, strings and dates order among themselves
    fn default_compare(&self, other: &Self) -> IndexResult<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Ok(compare_numbers(a, b)),
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            (a, b) => match (as_date_millis(a), as_date_millis(b)) {
                (Some(x), Some(y)) => Ok(x.cmp(&y)),
                _ => Err(IndexError::comparison_failed(format!(
                    "Couldn't compare elements {} and {}",
                    a, b
                ))),
            },
        }
    }
}

impl DefaultKeyOrder for String {
    fn default_compare(&self, other: &Self) -> IndexResult<Ordering> {
        Ok(self.cmp(other))
    }
}

impl DefaultKeyOrder for i64 {
    fn default_compare(&self, other: &Self) -> IndexResult<Ordering> {
        Ok(self.cmp(other))
    }
}

type NodeId = usize;

struct Node<K, V> {
    key: K,
    values: Vec<V>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
    height: usize,
}

/// Ordered map from keys to value lists, balanced on every write
pub struct AvlTree<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    key_count: usize,
    unique: bool,
    compare: KeyComparator<K>,
    values_equal: ValueEquality<V>,
}

impl<K, V> AvlTree<K, V>
where
    K: DefaultKeyOrder + 'static,
    V: PartialEq + 'static,
{
    /// Tree using the natural key order and `PartialEq` on values
    pub fn new(unique: bool) -> Self {
        Self::with_comparators(
            unique,
            Arc::new(|a: &K, b: &K| a.default_compare(b)),
            Arc::new(|a: &V, b: &V| a == b),
        )
    }
}

impl<K, V> AvlTree<K, V> {
    /// Tree with injected key comparison and value equality
    pub fn with_comparators(
        unique: bool,
        compare: KeyComparator<K>,
        values_equal: ValueEquality<V>,
    ) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            key_count: 0,
            unique,
            compare,
            values_equal,
        }
    }

    /// Returns true if duplicate keys are rejected
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Returns true if the tree holds no keys
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Height of the whole tree, 0 when empty
    pub fn height(&self) -> usize {
        self.height_of(self.root)
    }

    /// Drop every key
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.key_count = 0;
    }

    fn node(&self, id: NodeId) -> &Node<K, V> {
        match self.nodes.get(id) {
            Some(Some(node)) => node,
            _ => unreachable!("dangling node id {}", id),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        match self.nodes.get_mut(id) {
            Some(Some(node)) => node,
            _ => unreachable!("dangling node id {}", id),
        }
    }

    fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        self.key_count += 1;
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Option<Node<K, V>> {
        let node = self.nodes.get_mut(id).and_then(Option::take);
        if node.is_some() {
            self.key_count -= 1;
            self.free.push(id);
        }
        node
    }

    fn height_of(&self, id: Option<NodeId>) -> usize {
        id.map_or(0, |id| self.node(id).height)
    }

    fn balance_factor(&self, id: NodeId) -> isize {
        let node = self.node(id);
        self.height_of(node.left) as isize - self.height_of(node.right) as isize
    }

    fn update_height(&mut self, id: NodeId) {
        let (left, right) = {
            let node = self.node(id);
            (node.left, node.right)
        };
        let height = 1 + self.height_of(left).max(self.height_of(right));
        self.node_mut(id).height = height;
    }

    /// Point `parent`'s link that referenced `old` at `new` instead
    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: Option<NodeId>) {
        match parent {
            None => self.root = new,
            Some(p) => {
                let node = self.node_mut(p);
                if node.left == Some(old) {
                    node.left = new;
                } else {
                    node.right = new;
                }
            }
        }
    }

    fn rotate_right(&mut self, id: NodeId) -> NodeId {
        let Some(pivot) = self.node(id).left else {
            return id;
        };
        let inner = self.node(pivot).right;
        let parent = self.node(id).parent;

        self.node_mut(id).left = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(id);
        }
        self.node_mut(pivot).right = Some(id);
        self.node_mut(id).parent = Some(pivot);
        self.node_mut(pivot).parent = parent;
        self.replace_child(parent, id, Some(pivot));

        self.update_height(id);
        self.update_height(pivot);
        pivot
    }

    fn rotate_left(&mut self, id: NodeId) -> NodeId {
        let Some(pivot) = self.node(id).right else {
            return id;
        };
        let inner = self.node(pivot).left;
        let parent = self.node(id).parent;

        self.node_mut(id).right = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(id);
        }
        self.node_mut(pivot).left = Some(id);
        self.node_mut(id).parent = Some(pivot);
        self.node_mut(pivot).parent = parent;
        self.replace_child(parent, id, Some(pivot));

        self.update_height(id);
        self.update_height(pivot);
        pivot
    }

    /// Restore heights and balance from `start` up to the root
    fn rebalance_from(&mut self, start: Option<NodeId>) {
        let mut current = start;
        while let Some(id) = current {
            self.update_height(id);
            let balance = self.balance_factor(id);
            let subtree_root = if balance > 1 {
                if let Some(left) = self.node(id).left {
                    if self.balance_factor(left) < 0 {
                        self.rotate_left(left);
                    }
                }
                self.rotate_right(id)
            } else if balance < -1 {
                if let Some(right) = self.node(id).right {
                    if self.balance_factor(right) > 0 {
                        self.rotate_right(right);
                    }
                }
                self.rotate_left(id)
            } else {
                id
            };
            current = self.node(subtree_root).parent;
        }
    }

    fn find(&self, key: &K) -> IndexResult<Option<NodeId>> {
        let mut current = self.root;
        while let Some(id) = current {
            let node = self.node(id);
            current = match (self.compare)(key, &node.key)? {
                Ordering::Equal => return Ok(Some(id)),
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
            };
        }
        Ok(None)
    }

    /// Values stored under `key`, empty when absent
    pub fn search(&self, key: &K) -> IndexResult<Vec<V>>
    where
        V: Clone,
    {
        Ok(self
            .find(key)?
            .map(|id| self.node(id).values.clone())
            .unwrap_or_default())
    }

    /// Insert `value` under `key`
    ///
    /// A unique tree rejects a second value for an existing key and is left
    /// unchanged.
    pub fn insert(&mut self, key: K, value: V) -> IndexResult<()>
    where
        K: fmt::Debug,
    {
        let Some(mut current) = self.root else {
            let id = self.alloc(Node {
                key,
                values: vec![value],
                left: None,
                right: None,
                parent: None,
                height: 1,
            });
            self.root = Some(id);
            return Ok(());
        };

        loop {
            let ordering = (self.compare)(&key, &self.node(current).key)?;
            let next = match ordering {
                Ordering::Equal => {
                    if self.unique {
                        return Err(IndexError::unique_violated(format!("{:?}", key)));
                    }
                    self.node_mut(current).values.push(value);
                    return Ok(());
                }
                Ordering::Less => self.node(current).left,
                Ordering::Greater => self.node(current).right,
            };
            match next {
                Some(child) => current = child,
                None => {
                    let id = self.alloc(Node {
                        key,
                        values: vec![value],
                        left: None,
                        right: None,
                        parent: Some(current),
                        height: 1,
                    });
                    if ordering == Ordering::Less {
                        self.node_mut(current).left = Some(id);
                    } else {
                        self.node_mut(current).right = Some(id);
                    }
                    self.rebalance_from(Some(current));
                    return Ok(());
                }
            }
        }
    }

    /// Remove `value` from `key`, or the whole key when `value` is `None`
    ///
    /// Deleting an absent key or a value not stored under the key is a no-op.
    pub fn delete(&mut self, key: &K, value: Option<&V>) -> IndexResult<()> {
        let Some(id) = self.find(key)? else {
            return Ok(());
        };

        if let Some(value) = value {
            let equal = Arc::clone(&self.values_equal);
            let node = self.node_mut(id);
            let before = node.values.len();
            node.values.retain(|v| !equal(v, value));
            if node.values.len() == before || !node.values.is_empty() {
                return Ok(());
            }
        }

        self.remove_node(id);
        Ok(())
    }

    fn remove_node(&mut self, id: NodeId) {
        let (left, right) = {
            let node = self.node(id);
            (node.left, node.right)
        };

        if let (Some(left), Some(_)) = (left, right) {
            // Replace with the in-order predecessor, then unlink it
            let mut predecessor = left;
            while let Some(next) = self.node(predecessor).right {
                predecessor = next;
            }
            let (moved, rebalance_start) = self.detach(predecessor);
            if let Some(moved) = moved {
                let node = self.node_mut(id);
                node.key = moved.key;
                node.values = moved.values;
            }
            self.rebalance_from(rebalance_start);
        } else {
            let (_, rebalance_start) = self.detach(id);
            self.rebalance_from(rebalance_start);
        }
    }

    /// Unlink a node with at most one child
    fn detach(&mut self, id: NodeId) -> (Option<Node<K, V>>, Option<NodeId>) {
        let (child, parent) = {
            let node = self.node(id);
            (node.left.or(node.right), node.parent)
        };
        if let Some(child) = child {
            self.node_mut(child).parent = parent;
        }
        self.replace_child(parent, id, child);
        (self.release(id), parent)
    }

    /// Values whose keys fall between two bounds, in key order
    pub fn between(&self, lower: Bound<&K>, upper: Bound<&K>) -> IndexResult<Vec<V>>
    where
        V: Clone,
    {
        let mut out = Vec::new();
        self.collect_range(self.root, lower, upper, &mut out)?;
        Ok(out)
    }

    fn collect_range(
        &self,
        id: Option<NodeId>,
        lower: Bound<&K>,
        upper: Bound<&K>,
        out: &mut Vec<V>,
    ) -> IndexResult<()>
    where
        V: Clone,
    {
        let Some(id) = id else {
            return Ok(());
        };
        let node = self.node(id);

        let above_lower = match lower {
            Bound::Unbounded => Ordering::Greater,
            Bound::Included(k) | Bound::Excluded(k) => (self.compare)(&node.key, k)?,
        };
        let below_upper = match upper {
            Bound::Unbounded => Ordering::Less,
            Bound::Included(k) | Bound::Excluded(k) => (self.compare)(&node.key, k)?,
        };

        if above_lower == Ordering::Greater {
            self.collect_range(node.left, lower, upper, out)?;
        }
        let lower_ok = match lower {
            Bound::Included(_) => above_lower != Ordering::Less,
            _ => above_lower == Ordering::Greater,
        };
        let upper_ok = match upper {
            Bound::Included(_) => below_upper != Ordering::Greater,
            _ => below_upper == Ordering::Less,
        };
        if lower_ok && upper_ok {
            out.extend(node.values.iter().cloned());
        }
        if below_upper == Ordering::Less {
            self.collect_range(node.right, lower, upper, out)?;
        }
        Ok(())
    }

    /// Every key with its values, in key order
    pub fn entries(&self) -> Vec<(&K, &[V])> {
        let mut out = Vec::with_capacity(self.key_count);
        let mut stack = Vec::new();
        let mut current = self.root;
        while current.is_some() || !stack.is_empty() {
            while let Some(id) = current {
                stack.push(id);
                current = self.node(id).left;
            }
            if let Some(id) = stack.pop() {
                let node = self.node(id);
                out.push((&node.key, node.values.as_slice()));
                current = node.right;
            }
        }
        out
    }

    /// Insert every pair, or none of them
    ///
    /// On failure the pairs inserted so far are removed again and the error
    /// is returned.
    pub fn build<I>(&mut self, pairs: I) -> IndexResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Clone + fmt::Debug,
        V: Clone,
    {
        let mut inserted: Vec<(K, V)> = Vec::new();
        for (key, value) in pairs {
            if let Err(err) = self.insert(key.clone(), value.clone()) {
                for (k, v) in inserted.iter().rev() {
                    self.delete(k, Some(v))?;
                }
                return Err(err);
            }
            inserted.push((key, value));
        }
        Ok(())
    }

    /// Verify ordering, heights, balance and parent links
    pub fn check_is_avl(&self) -> Result<(), String> {
        if let Some(root) = self.root {
            if self.node(root).parent.is_some() {
                return Err("root has a parent".to_string());
            }
            self.check_subtree(root)?;
        }

        let entries = self.entries();
        if entries.len() != self.key_count {
            return Err(format!(
                "key count {} but {} reachable keys",
                self.key_count,
                entries.len()
            ));
        }
        for pair in entries.windows(2) {
            match (self.compare)(pair[0].0, pair[1].0) {
                Ok(Ordering::Less) => {}
                Ok(_) => return Err("keys out of order".to_string()),
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }

    fn check_subtree(&self, id: NodeId) -> Result<usize, String> {
        let node = self.node(id);
        if node.values.is_empty() {
            return Err(format!("node {} holds no values", id));
        }
        if self.unique && node.values.len() > 1 {
            return Err(format!("unique node {} holds {} values", id, node.values.len()));
        }
        let mut heights = [0usize; 2];
        for (slot, child) in [node.left, node.right].into_iter().enumerate() {
            if let Some(child) = child {
                if self.node(child).parent != Some(id) {
                    return Err(format!("child {} does not point back to {}", child, id));
                }
                heights[slot] = self.check_subtree(child)?;
            }
        }
        if heights[0].abs_diff(heights[1]) > 1 {
            return Err(format!("node {} is unbalanced", id));
        }
        let expected = 1 + heights[0].max(heights[1]);
        if node.height != expected {
            return Err(format!(
                "node {} has height {} but should be {}",
                id, node.height, expected
            ));
        }
        Ok(expected)
    }
}

impl<K, V> fmt::Debug for AvlTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvlTree")
            .field("unique", &self.unique)
            .field("key_count", &self.key_count)
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexErrorCode;
    use serde_json::json;

    fn tree_of(keys: &[i64]) -> AvlTree<i64, String> {
        let mut tree = AvlTree::new(false);
        for k in keys {
            tree.insert(*k, format!("v{}", k)).unwrap();
        }
        tree
    }

    #[test]
    fn test_insert_and_search() {
        let mut tree = tree_of(&[5, 3, 8]);
        tree.insert(5, "other".to_string()).unwrap();
        assert_eq!(tree.search(&5).unwrap(), vec!["v5", "other"]);
        assert_eq!(tree.search(&8).unwrap(), vec!["v8"]);
        assert!(tree.search(&42).unwrap().is_empty());
        assert_eq!(tree.key_count(), 3);
    }

    #[test]
    fn test_sequential_inserts_stay_balanced() {
        let keys: Vec<i64> = (0..1000).collect();
        let tree = tree_of(&keys);
        tree.check_is_avl().unwrap();
        // 1.44 * log2(1000) is just under 15
        assert!(tree.height() <= 15, "height {}", tree.height());
    }

    #[test]
    fn test_unique_rejects_duplicate() {
        let mut tree: AvlTree<i64, String> = AvlTree::new(true);
        tree.insert(1, "a".to_string()).unwrap();
        let err = tree.insert(1, "b".to_string()).unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(tree.search(&1).unwrap(), vec!["a"]);
    }

    #[test]
    fn test_delete_single_value_keeps_others() {
        let mut tree = tree_of(&[1, 2]);
        tree.insert(1, "extra".to_string()).unwrap();
        tree.delete(&1, Some(&"v1".to_string())).unwrap();
        assert_eq!(tree.search(&1).unwrap(), vec!["extra"]);
        tree.delete(&1, Some(&"missing".to_string())).unwrap();
        assert_eq!(tree.search(&1).unwrap(), vec!["extra"]);
    }

    #[test]
    fn test_delete_whole_key_and_rebalance() {
        let keys: Vec<i64> = (0..200).collect();
        let mut tree = tree_of(&keys);
        for k in (0..200).filter(|k| k % 3 != 0) {
            tree.delete(&k, None).unwrap();
            tree.check_is_avl().unwrap();
        }
        assert_eq!(tree.key_count(), 67);
        assert!(tree.search(&1).unwrap().is_empty());
        assert_eq!(tree.search(&99).unwrap(), vec!["v99"]);
    }

    #[test]
    fn test_delete_absent_key_is_noop() {
        let mut tree = tree_of(&[1, 2, 3]);
        tree.delete(&10, None).unwrap();
        assert_eq!(tree.key_count(), 3);
    }

    #[test]
    fn test_between_bounds() {
        let tree = tree_of(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let ids = |lower, upper| tree.between(lower, upper).unwrap();
        assert_eq!(
            ids(Bound::Included(&3), Bound::Excluded(&6)),
            vec!["v3", "v4", "v5"]
        );
        assert_eq!(ids(Bound::Excluded(&7), Bound::Unbounded), vec!["v8", "v9"]);
        assert_eq!(ids(Bound::Unbounded, Bound::Included(&2)), vec!["v1", "v2"]);
        assert!(ids(Bound::Excluded(&5), Bound::Excluded(&6)).is_empty());
    }

    #[test]
    fn test_default_value_order_rejects_mixed_kinds() {
        let mut tree: AvlTree<Value, String> = AvlTree::new(false);
        tree.insert(json!(1), "a".to_string()).unwrap();
        let err = tree.insert(json!("x"), "b".to_string()).unwrap_err();
        assert_eq!(err.code(), IndexErrorCode::ComparisonFailed);
        tree.insert(json!(0.5), "c".to_string()).unwrap();
        assert_eq!(tree.entries().len(), 2);
    }

    #[test]
    fn test_build_is_all_or_nothing() {
        let mut tree: AvlTree<i64, String> = AvlTree::new(true);
        tree.insert(100, "existing".to_string()).unwrap();
        let pairs = vec![(1, "a".to_string()), (2, "b".to_string()), (100, "dup".to_string())];
        assert!(tree.build(pairs).is_err());
        assert_eq!(tree.key_count(), 1);
        tree.check_is_avl().unwrap();
    }

    #[test]
    fn test_injected_comparator() {
        let mut tree: AvlTree<String, i64> = AvlTree::with_comparators(
            false,
            Arc::new(|a: &String, b: &String| Ok(a.len().cmp(&b.len()))),
            Arc::new(|a: &i64, b: &i64| a == b),
        );
        tree.insert("aaa".to_string(), 1).unwrap();
        tree.insert("bbb".to_string(), 2).unwrap();
        assert_eq!(tree.search(&"zzz".to_string()).unwrap(), vec![1, 2]);
    }
}
