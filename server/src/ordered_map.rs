//! Height-balanced (AVL) ordered map keyed by `i32`.
//!
//! Nodes own their children through `Option<Box<_>>` and carry a balance
//! factor `height(right) - height(left)` that is kept in `-1..=1` between
//! operations. Insertion and removal recurse by value: each level takes its
//! subtree out, works on it and hands back the (possibly rotated) subtree
//! root together with whether its height changed, so rebalancing needs no
//! parent pointers.

use std::cmp::Ordering;
use std::fmt;

type Link<V> = Option<Box<Node<V>>>;

struct Node<V> {
    key: i32,
    value: V,
    balance: i8,
    left: Link<V>,
    right: Link<V>,
}

impl<V> Node<V> {
    fn leaf(key: i32, value: V) -> Box<Self> {
        Box::new(Node {
            key,
            value,
            balance: 0,
            left: None,
            right: None,
        })
    }
}

/// An ordered map from `i32` keys to owned values.
///
/// Lookups return `Option`, so any value (including `0` or `None`) can be
/// stored and told apart from a missing key.
pub struct OrderedMap<V> {
    root: Link<V>,
    len: usize,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self { root: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Associates `value` with `key`, returning the value it replaced.
    pub fn insert(&mut self, key: i32, value: V) -> Option<V> {
        let (root, previous, _) = insert_node(self.root.take(), key, value);
        self.root = Some(root);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    pub fn get(&self, key: i32) -> Option<&V> {
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            current = match key.cmp(&node.key) {
                Ordering::Equal => return Some(&node.value),
                Ordering::Less => node.left.as_deref(),
                Ordering::Greater => node.right.as_deref(),
            };
        }
        None
    }

    pub fn get_mut(&mut self, key: i32) -> Option<&mut V> {
        let mut current = self.root.as_deref_mut();
        while let Some(node) = current {
            current = match key.cmp(&node.key) {
                Ordering::Equal => return Some(&mut node.value),
                Ordering::Less => node.left.as_deref_mut(),
                Ordering::Greater => node.right.as_deref_mut(),
            };
        }
        None
    }

    pub fn contains_key(&self, key: i32) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key` and returns the value it held.
    pub fn remove(&mut self, key: i32) -> Option<V> {
        let (root, removed, _) = remove_node(self.root.take(), key);
        self.root = root;
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Visits every entry in ascending key order.
    pub fn for_each<F: FnMut(i32, &V)>(&self, mut f: F) {
        for (key, value) in self.iter() {
            f(key, value);
        }
    }

    /// Visits every entry in ascending key order with mutable access to the
    /// value. Keys cannot change, so the ordering is preserved.
    pub fn for_each_mut<F: FnMut(i32, &mut V)>(&mut self, mut f: F) {
        walk_mut(&mut self.root, &mut f);
    }

    pub fn iter(&self) -> Iter<'_, V> {
        let mut iter = Iter {
            stack: Vec::new(),
            remaining: self.len,
        };
        iter.push_left(self.root.as_deref());
        iter
    }

    pub fn keys(&self) -> impl Iterator<Item = i32> + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    /// Empties the map, handing every entry to `destructor` in ascending key
    /// order.
    pub fn clear_with<F: FnMut(i32, V)>(&mut self, mut destructor: F) {
        drain_in_order(self.root.take(), &mut destructor);
        self.len = 0;
    }
}

impl<V: fmt::Debug> fmt::Debug for OrderedMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, V> IntoIterator for &'a OrderedMap<V> {
    type Item = (i32, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// In-order iterator over an [`OrderedMap`].
pub struct Iter<'a, V> {
    stack: Vec<&'a Node<V>>,
    remaining: usize,
}

impl<'a, V> Iter<'a, V> {
    fn push_left(&mut self, mut node: Option<&'a Node<V>>) {
        while let Some(n) = node {
            self.stack.push(n);
            node = n.left.as_deref();
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (i32, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.right.as_deref());
        self.remaining -= 1;
        Some((node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

fn walk_mut<V, F: FnMut(i32, &mut V)>(link: &mut Link<V>, f: &mut F) {
    if let Some(node) = link {
        walk_mut(&mut node.left, f);
        f(node.key, &mut node.value);
        walk_mut(&mut node.right, f);
    }
}

fn drain_in_order<V, F: FnMut(i32, V)>(link: Link<V>, f: &mut F) {
    if let Some(node) = link {
        let Node {
            key,
            value,
            left,
            right,
            ..
        } = *node;
        drain_in_order(left, f);
        f(key, value);
        drain_in_order(right, f);
    }
}

/// Returns the new subtree root, the replaced value and whether the subtree
/// grew taller.
fn insert_node<V>(link: Link<V>, key: i32, value: V) -> (Box<Node<V>>, Option<V>, bool) {
    let mut node = match link {
        None => return (Node::leaf(key, value), None, true),
        Some(node) => node,
    };

    match key.cmp(&node.key) {
        Ordering::Equal => {
            let previous = std::mem::replace(&mut node.value, value);
            (node, Some(previous), false)
        }
        Ordering::Less => {
            let (child, previous, grew) = insert_node(node.left.take(), key, value);
            node.left = Some(child);
            if !grew {
                return (node, previous, false);
            }
            node.balance -= 1;
            let (node, grew) = settle_after_growth(node);
            (node, previous, grew)
        }
        Ordering::Greater => {
            let (child, previous, grew) = insert_node(node.right.take(), key, value);
            node.right = Some(child);
            if !grew {
                return (node, previous, false);
            }
            node.balance += 1;
            let (node, grew) = settle_after_growth(node);
            (node, previous, grew)
        }
    }
}

fn settle_after_growth<V>(node: Box<Node<V>>) -> (Box<Node<V>>, bool) {
    match node.balance {
        0 => (node, false),
        -1 | 1 => (node, true),
        // A rotation after insertion restores the height from before it.
        _ => (rebalance(node).0, false),
    }
}

/// Returns the new subtree root, the removed value and whether the subtree
/// got shorter.
fn remove_node<V>(link: Link<V>, key: i32) -> (Link<V>, Option<V>, bool) {
    let mut node = match link {
        None => return (None, None, false),
        Some(node) => node,
    };

    match key.cmp(&node.key) {
        Ordering::Less => {
            let (child, removed, shrank) = remove_node(node.left.take(), key);
            node.left = child;
            if !shrank {
                return (Some(node), removed, false);
            }
            node.balance += 1;
            let (node, shrank) = settle_after_shrink(node);
            (Some(node), removed, shrank)
        }
        Ordering::Greater => {
            let (child, removed, shrank) = remove_node(node.right.take(), key);
            node.right = child;
            if !shrank {
                return (Some(node), removed, false);
            }
            node.balance -= 1;
            let (node, shrank) = settle_after_shrink(node);
            (Some(node), removed, shrank)
        }
        Ordering::Equal => {
            let (replacement, value, shrank) = unlink(node);
            (replacement, Some(value), shrank)
        }
    }
}

/// Detaches `node` from the tree and returns what takes its place.
fn unlink<V>(node: Box<Node<V>>) -> (Link<V>, V, bool) {
    let Node {
        value,
        balance,
        left,
        right,
        ..
    } = *node;

    match (left, right) {
        (None, None) => (None, value, true),
        (Some(child), None) | (None, Some(child)) => (Some(child), value, true),
        (Some(left), Some(right)) => {
            // Take the heir from the taller side (left on a tie).
            let (heir, shrank) = if balance <= 0 {
                let (rest, mut heir, shrank) = take_max(left);
                heir.left = rest;
                heir.right = Some(right);
                heir.balance = if shrank { balance + 1 } else { balance };
                (heir, shrank)
            } else {
                let (rest, mut heir, shrank) = take_min(right);
                heir.left = Some(left);
                heir.right = rest;
                heir.balance = if shrank { balance - 1 } else { balance };
                (heir, shrank)
            };

            if !shrank {
                return (Some(heir), value, false);
            }
            let (heir, shrank) = settle_after_shrink(heir);
            (Some(heir), value, shrank)
        }
    }
}

fn take_max<V>(mut node: Box<Node<V>>) -> (Link<V>, Box<Node<V>>, bool) {
    match node.right.take() {
        None => {
            let rest = node.left.take();
            (rest, node, true)
        }
        Some(right) => {
            let (rest, max, shrank) = take_max(right);
            node.right = rest;
            if !shrank {
                return (Some(node), max, false);
            }
            node.balance -= 1;
            let (node, shrank) = settle_after_shrink(node);
            (Some(node), max, shrank)
        }
    }
}

fn take_min<V>(mut node: Box<Node<V>>) -> (Link<V>, Box<Node<V>>, bool) {
    match node.left.take() {
        None => {
            let rest = node.right.take();
            (rest, node, true)
        }
        Some(left) => {
            let (rest, min, shrank) = take_min(left);
            node.left = rest;
            if !shrank {
                return (Some(node), min, false);
            }
            node.balance += 1;
            let (node, shrank) = settle_after_shrink(node);
            (Some(node), min, shrank)
        }
    }
}

fn settle_after_shrink<V>(node: Box<Node<V>>) -> (Box<Node<V>>, bool) {
    match node.balance {
        0 => (node, true),
        -1 | 1 => (node, false),
        _ => rebalance(node),
    }
}

/// Fixes a node whose balance factor reached +-2. Returns the new subtree
/// root and whether the subtree height dropped by one.
fn rebalance<V>(node: Box<Node<V>>) -> (Box<Node<V>>, bool) {
    if node.balance > 0 {
        let pivot_balance = node.right.as_ref().map_or(0, |pivot| pivot.balance);
        if pivot_balance < 0 {
            rotate_right_left(node)
        } else {
            rotate_left(node)
        }
    } else {
        let pivot_balance = node.left.as_ref().map_or(0, |pivot| pivot.balance);
        if pivot_balance > 0 {
            rotate_left_right(node)
        } else {
            rotate_right(node)
        }
    }
}

fn rotate_left<V>(mut node: Box<Node<V>>) -> (Box<Node<V>>, bool) {
    let Some(mut pivot) = node.right.take() else {
        return (node, false);
    };
    node.right = pivot.left.take();

    let dropped = if pivot.balance == 0 {
        // Only reachable during removal.
        node.balance = 1;
        pivot.balance = -1;
        false
    } else {
        node.balance = 0;
        pivot.balance = 0;
        true
    };

    pivot.left = Some(node);
    (pivot, dropped)
}

fn rotate_right<V>(mut node: Box<Node<V>>) -> (Box<Node<V>>, bool) {
    let Some(mut pivot) = node.left.take() else {
        return (node, false);
    };
    node.left = pivot.right.take();

    let dropped = if pivot.balance == 0 {
        node.balance = -1;
        pivot.balance = 1;
        false
    } else {
        node.balance = 0;
        pivot.balance = 0;
        true
    };

    pivot.right = Some(node);
    (pivot, dropped)
}

fn rotate_right_left<V>(mut node: Box<Node<V>>) -> (Box<Node<V>>, bool) {
    let Some(mut pivot) = node.right.take() else {
        return (node, false);
    };
    let Some(mut inner) = pivot.left.take() else {
        node.right = Some(pivot);
        return rotate_left(node);
    };

    node.right = inner.left.take();
    pivot.left = inner.right.take();

    (node.balance, pivot.balance) = match inner.balance {
        1 => (-1, 0),
        -1 => (0, 1),
        _ => (0, 0),
    };
    inner.balance = 0;

    inner.left = Some(node);
    inner.right = Some(pivot);
    (inner, true)
}

fn rotate_left_right<V>(mut node: Box<Node<V>>) -> (Box<Node<V>>, bool) {
    let Some(mut pivot) = node.left.take() else {
        return (node, false);
    };
    let Some(mut inner) = pivot.right.take() else {
        node.left = Some(pivot);
        return rotate_right(node);
    };

    node.left = inner.right.take();
    pivot.right = inner.left.take();

    (node.balance, pivot.balance) = match inner.balance {
        -1 => (1, 0),
        1 => (0, -1),
        _ => (0, 0),
    };
    inner.balance = 0;

    inner.left = Some(pivot);
    inner.right = Some(node);
    (inner, true)
}
