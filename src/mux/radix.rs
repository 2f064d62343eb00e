use smallvec::SmallVec;

/// Node index in the tree
type NodeIndex = u32;

const ROOT: NodeIndex = 0;

/// A node in the compressed tree
#[derive(Debug, Clone)]
struct RadixNode<V> {
    /// Key bytes on the edge leading to this node
    segment: Vec<u8>,
    /// Child nodes indexed by first byte of their segment
    children: SmallVec<[(u8, NodeIndex); 4]>,
    value: Option<V>,
    parent: Option<NodeIndex>,
}

impl<V> RadixNode<V> {
    fn new(segment: Vec<u8>, parent: Option<NodeIndex>) -> Self {
        Self {
            segment,
            children: SmallVec::new(),
            value: None,
            parent,
        }
    }

    /// Add a child node, maintaining sorted order by first byte
    fn add_child(&mut self, first_byte: u8, index: NodeIndex) {
        match self.children.binary_search_by_key(&first_byte, |&(b, _)| b) {
            Ok(pos) => self.children[pos] = (first_byte, index),
            Err(pos) => self.children.insert(pos, (first_byte, index)),
        }
    }

    #[inline]
    fn find_child(&self, first_byte: u8) -> Option<NodeIndex> {
        self.children
            .binary_search_by_key(&first_byte, |&(b, _)| b)
            .ok()
            .map(|pos| self.children[pos].1)
    }

    fn remove_child(&mut self, first_byte: u8) {
        if let Ok(pos) = self.children.binary_search_by_key(&first_byte, |&(b, _)| b) {
            self.children.remove(pos);
        }
    }
}

/// Prefix-compressed tree over byte keys.
///
/// Lookups match whole segments of a key only: a stored key is an ancestor
/// of a query key when it equals the query or is followed in the query by
/// the `boundary` byte. With [`super::name_key`] keys this makes a lookup
/// return the closest registered enclosing zone.
///
/// Nodes live in an arena; freed slots are recycled. Apart from the root,
/// every node either holds a value or has at least two children.
#[derive(Debug, Clone)]
pub struct RadixTree<V> {
    nodes: Vec<RadixNode<V>>,
    free: Vec<NodeIndex>,
    boundary: u8,
    len: usize,
}

/// A node holding a value, as returned by [`RadixTree::find`].
#[derive(Debug)]
pub struct Entry<'a, V> {
    tree: &'a RadixTree<V>,
    index: NodeIndex,
    value: &'a V,
}

impl<'a, V> Entry<'a, V> {
    pub fn value(&self) -> &'a V {
        self.value
    }

    /// The full key stored at this node.
    pub fn key(&self) -> Vec<u8> {
        self.tree.key_of(self.index)
    }

    /// Nearest registered ancestor: the entry with the next-shorter key that
    /// encloses this one.
    pub fn up(&self) -> Option<Entry<'a, V>> {
        let tree = self.tree;
        let key = self.key();
        let mut depth = key.len();
        let mut current = self.index;

        loop {
            let node = &tree.nodes[current as usize];
            let parent = node.parent?;
            depth -= node.segment.len();
            current = parent;
            if tree.is_boundary(&key, depth) {
                if let Some(entry) = tree.entry(current) {
                    return Some(entry);
                }
            }
        }
    }
}

impl<V> RadixTree<V> {
    pub fn new(boundary: u8) -> Self {
        Self {
            nodes: vec![RadixNode::new(Vec::new(), None)],
            free: Vec::new(),
            boundary,
            len: 0,
        }
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of live nodes, root included
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Stores `value` under `key`, returning the value it replaced.
    pub fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        let mut current = ROOT;
        let mut rest = key;

        loop {
            if rest.is_empty() {
                let old = self.nodes[current as usize].value.replace(value);
                if old.is_none() {
                    self.len += 1;
                }
                return old;
            }

            let first = rest[0];
            let Some(child) = self.nodes[current as usize].find_child(first) else {
                let leaf = self.alloc(rest.to_vec(), Some(current));
                self.nodes[leaf as usize].value = Some(value);
                self.nodes[current as usize].add_child(first, leaf);
                self.len += 1;
                return None;
            };

            let segment_len = self.nodes[child as usize].segment.len();
            let common = common_prefix_len(&self.nodes[child as usize].segment, rest);
            current = if common < segment_len {
                self.split(current, child, common)
            } else {
                child
            };
            rest = &rest[common..];
        }
    }

    /// Detaches the value stored under exactly `key` and collapses the
    /// nodes that no longer carry anything.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let index = self.locate(key)?;
        let value = self.nodes[index as usize].value.take()?;
        self.len -= 1;
        self.compact(index);
        Some(value)
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let index = self.locate(key)?;
        self.nodes[index as usize].value.as_ref()
    }

    /// Deepest stored key that equals `key` or encloses it. The flag tells
    /// whether the match is exact.
    pub fn find(&self, key: &[u8]) -> Option<(Entry<'_, V>, bool)> {
        let mut current = ROOT;
        let mut depth = 0;
        let mut best = None;

        loop {
            let node = &self.nodes[current as usize];
            if node.value.is_some() && self.is_boundary(key, depth) {
                best = Some((current, depth == key.len()));
            }
            if depth == key.len() {
                break;
            }
            let Some(child) = node.find_child(key[depth]) else {
                break;
            };
            let segment = &self.nodes[child as usize].segment;
            if !key[depth..].starts_with(segment) {
                break;
            }
            depth += segment.len();
            current = child;
        }

        let (index, exact) = best?;
        self.entry(index).map(|entry| (entry, exact))
    }

    /// All stored keys and values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (Vec<u8>, &V)> {
        let mut out = Vec::with_capacity(self.len);
        let mut stack = vec![(ROOT, Vec::new())];
        while let Some((index, prefix)) = stack.pop() {
            let node = &self.nodes[index as usize];
            let mut key = prefix;
            key.extend_from_slice(&node.segment);
            if let Some(value) = &node.value {
                out.push((key.clone(), value));
            }
            for &(_, child) in node.children.iter().rev() {
                stack.push((child, key.clone()));
            }
        }
        out.into_iter()
    }

    fn entry(&self, index: NodeIndex) -> Option<Entry<'_, V>> {
        self.nodes[index as usize].value.as_ref().map(|value| Entry {
            tree: self,
            index,
            value,
        })
    }

    /// Whether the first `depth` bytes of `key` end on a segment boundary.
    fn is_boundary(&self, key: &[u8], depth: usize) -> bool {
        depth == 0
            || depth == key.len()
            || key[depth] == self.boundary
            || key[depth - 1] == self.boundary
    }

    /// Exact node for `key`, if the tree has one.
    fn locate(&self, key: &[u8]) -> Option<NodeIndex> {
        let mut current = ROOT;
        let mut rest = key;
        while !rest.is_empty() {
            let child = self.nodes[current as usize].find_child(rest[0])?;
            let segment = &self.nodes[child as usize].segment;
            rest = rest.strip_prefix(segment.as_slice())?;
            current = child;
        }
        Some(current)
    }

    fn key_of(&self, index: NodeIndex) -> Vec<u8> {
        let mut segments = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            let node = &self.nodes[i as usize];
            segments.push(node.segment.as_slice());
            current = node.parent;
        }
        segments.into_iter().rev().flatten().copied().collect()
    }

    fn alloc(&mut self, segment: Vec<u8>, parent: Option<NodeIndex>) -> NodeIndex {
        let node = RadixNode::new(segment, parent);
        match self.free.pop() {
            Some(index) => {
                self.nodes[index as usize] = node;
                index
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as NodeIndex
            }
        }
    }

    fn release(&mut self, index: NodeIndex) {
        self.nodes[index as usize] = RadixNode::new(Vec::new(), None);
        self.free.push(index);
    }

    /// Splits `child`'s segment after `at` bytes, inserting an intermediate
    /// node between it and `parent`. Returns the intermediate node.
    fn split(&mut self, parent: NodeIndex, child: NodeIndex, at: usize) -> NodeIndex {
        let tail = self.nodes[child as usize].segment.split_off(at);
        let head = std::mem::replace(&mut self.nodes[child as usize].segment, tail);
        let head_first = head[0];
        let tail_first = self.nodes[child as usize].segment[0];

        let mid = self.alloc(head, Some(parent));
        self.nodes[mid as usize].add_child(tail_first, child);
        self.nodes[child as usize].parent = Some(mid);
        self.nodes[parent as usize].add_child(head_first, mid);
        mid
    }

    /// Removes or merges valueless nodes upwards from `index`.
    fn compact(&mut self, mut index: NodeIndex) {
        while index != ROOT {
            let node = &self.nodes[index as usize];
            if node.value.is_some() {
                return;
            }
            let Some(parent) = node.parent else {
                return;
            };
            let first = node.segment[0];

            match node.children.len() {
                0 => {
                    self.nodes[parent as usize].remove_child(first);
                    self.release(index);
                    index = parent;
                }
                1 => {
                    let only = node.children[0].1;
                    let mut segment = std::mem::take(&mut self.nodes[index as usize].segment);
                    segment.extend_from_slice(&self.nodes[only as usize].segment);
                    let child = &mut self.nodes[only as usize];
                    child.segment = segment;
                    child.parent = Some(parent);
                    self.nodes[parent as usize].add_child(first, only);
                    self.release(index);
                    return;
                }
                _ => return,
            }
        }
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::name_key::{SEPARATOR, to_key};

    fn tree() -> RadixTree<&'static str> {
        RadixTree::new(SEPARATOR)
    }

    fn k(name: &str) -> Vec<u8> {
        to_key(name).into_bytes()
    }

    /// Every non-root node holds a value or branches.
    fn assert_compact<V>(tree: &RadixTree<V>) {
        let mut stack = vec![ROOT];
        while let Some(index) = stack.pop() {
            let node = &tree.nodes[index as usize];
            if index != ROOT {
                assert!(
                    node.value.is_some() || node.children.len() >= 2,
                    "orphan node {:?}",
                    node.segment
                );
                assert!(!node.segment.is_empty());
            }
            stack.extend(node.children.iter().map(|&(_, c)| c));
        }
    }

    #[test]
    fn test_radix_node_children_sorted() {
        let mut node: RadixNode<()> = RadixNode::new(Vec::new(), None);
        node.add_child(b'c', 3);
        node.add_child(b'a', 1);
        node.add_child(b'b', 2);
        assert_eq!(node.find_child(b'a'), Some(1));
        assert_eq!(node.find_child(b'b'), Some(2));
        assert_eq!(node.find_child(b'c'), Some(3));
        assert_eq!(node.find_child(b'd'), None);
        node.remove_child(b'b');
        assert_eq!(node.find_child(b'b'), None);
    }

    #[test]
    fn test_insert_find_exact() {
        let mut t = tree();
        assert_eq!(t.insert(&k("miek.nl."), "miek"), None);
        let (entry, exact) = t.find(&k("miek.nl.")).unwrap();
        assert!(exact);
        assert_eq!(*entry.value(), "miek");
        assert_eq!(entry.key(), k("miek.nl."));
    }

    #[test]
    fn test_insert_replaces() {
        let mut t = tree();
        t.insert(&k("miek.nl."), "first");
        assert_eq!(t.insert(&k("miek.nl."), "second"), Some("first"));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(&k("miek.nl.")), Some(&"second"));
    }

    #[test]
    fn test_find_returns_enclosing_zone() {
        let mut t = tree();
        t.insert(&k("miek.nl."), "miek");
        let (entry, exact) = t.find(&k("foo.miek.nl.")).unwrap();
        assert!(!exact);
        assert_eq!(*entry.value(), "miek");

        assert!(t.find(&k("nl.")).is_none());
        assert!(t.find(&k("example.org.")).is_none());
    }

    #[test]
    fn test_find_respects_label_boundaries() {
        let mut t = tree();
        t.insert(&k("miek.nl."), "miek");
        assert!(t.find(&k("miekx.nl.")).is_none());
        assert!(t.find(&k("xmiek.nl.")).is_none());

        t.insert(&k("mie.nl."), "mie");
        let (entry, exact) = t.find(&k("www.miek.nl.")).unwrap();
        assert!(!exact);
        assert_eq!(*entry.value(), "miek");
    }

    #[test]
    fn test_root_zone_catches_everything() {
        let mut t = tree();
        t.insert(&k("."), "root");
        let (entry, exact) = t.find(&k("anything.example.")).unwrap();
        assert!(!exact);
        assert_eq!(*entry.value(), "root");
        assert!(t.find(&k(".")).unwrap().1);
    }

    #[test]
    fn test_split_shares_prefix() {
        let mut t = tree();
        t.insert(&k("miek.nl."), "miek");
        t.insert(&k("mies.nl."), "mies");
        t.insert(&k("nl."), "nl");
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(&k("miek.nl.")), Some(&"miek"));
        assert_eq!(t.get(&k("mies.nl.")), Some(&"mies"));
        assert_eq!(t.get(&k("nl.")), Some(&"nl"));
        // "\0nl\0mie" exists only as a shared edge
        assert_eq!(t.get(&k("mie.nl.")), None);
        assert_compact(&t);
    }

    #[test]
    fn test_remove_compacts() {
        let mut t = tree();
        t.insert(&k("miek.nl."), "miek");
        t.insert(&k("mies.nl."), "mies");
        assert_eq!(t.remove(&k("miek.nl.")), Some("miek"));
        assert_compact(&t);
        assert_eq!(t.node_count(), 2);
        assert_eq!(t.get(&k("mies.nl.")), Some(&"mies"));

        assert_eq!(t.remove(&k("mies.nl.")), Some("mies"));
        assert_eq!(t.node_count(), 1);
        assert!(t.is_empty());
        assert!(t.find(&k("mies.nl.")).is_none());
    }

    #[test]
    fn test_remove_inner_value_keeps_children() {
        let mut t = tree();
        t.insert(&k("nl."), "nl");
        t.insert(&k("miek.nl."), "miek");
        assert_eq!(t.remove(&k("nl.")), Some("nl"));
        assert_compact(&t);
        assert_eq!(t.get(&k("miek.nl.")), Some(&"miek"));
        assert!(t.find(&k("nl.")).is_none());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut t = tree();
        t.insert(&k("miek.nl."), "miek");
        assert_eq!(t.remove(&k("foo.miek.nl.")), None);
        assert_eq!(t.remove(&k("nl.")), None);
        assert_eq!(t.len(), 1);
        assert_eq!(t.node_count(), 2);
    }

    #[test]
    fn test_slots_are_recycled() {
        let mut t = tree();
        for _ in 0..10 {
            t.insert(&k("a.example."), "a");
            t.insert(&k("b.example."), "b");
            t.remove(&k("a.example."));
            t.remove(&k("b.example."));
        }
        assert!(t.nodes.len() <= 4);
    }

    #[test]
    fn test_up_skips_unregistered_and_non_enclosing() {
        let mut t = tree();
        t.insert(&k("example."), "parent");
        t.insert(&k("exam."), "sibling");
        t.insert(&k("child.example."), "child");

        let (entry, _) = t.find(&k("child.example.")).unwrap();
        let up = entry.up().unwrap();
        assert_eq!(*up.value(), "parent");
        assert!(up.up().is_none());

        let (entry, _) = t.find(&k("deep.below.child.example.")).unwrap();
        assert_eq!(*entry.value(), "child");
        assert_eq!(*entry.up().unwrap().value(), "parent");
    }

    #[test]
    fn test_iter_in_key_order() {
        let mut t = tree();
        t.insert(&k("b.nl."), "b");
        t.insert(&k("a.nl."), "a");
        t.insert(&k("nl."), "nl");
        t.insert(&k("com."), "com");
        let values: Vec<&str> = t.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!["com", "nl", "a", "b"]);
    }

    #[test]
    fn test_zone_record_insert_remove() {
        // A per-zone record table keyed the same way as the mux.
        let mut zone: RadixTree<Vec<String>> = RadixTree::new(SEPARATOR);
        zone.insert(&k("miek.nl."), vec!["miek.nl. SOA".to_string()]);
        zone.insert(
            &k("foo.miek.nl."),
            vec!["foo.miek.nl. MX 10 mx.miek.nl.".to_string()],
        );

        let (entry, exact) = zone.find(&k("foo.miek.nl.")).unwrap();
        assert!(exact);
        assert_eq!(entry.value()[0], "foo.miek.nl. MX 10 mx.miek.nl.");

        zone.remove(&k("foo.miek.nl."));
        let (entry, exact) = zone.find(&k("foo.miek.nl.")).unwrap();
        assert!(!exact);
        assert_eq!(entry.key(), k("miek.nl."));
        assert_compact(&zone);
    }
}
