use std::collections::BTreeMap;

/// prefix tree keyed by path-segment sequences.
///
/// children are kept in sorted segment order so iteration is deterministic.
/// built per call (metadata, walk) and discarded; never shared across calls.
#[derive(Debug)]
pub struct PathTrie<V> {
    root: Node<V>,
    len: usize,
}

#[derive(Debug)]
struct Node<V> {
    value: Option<V>,
    children: BTreeMap<String, Node<V>>,
}

impl<V> Node<V> {
    fn new() -> Self {
        Self {
            value: None,
            children: BTreeMap::new(),
        }
    }
}

impl<V> PathTrie<V> {
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            len: 0,
        }
    }

    /// number of keys with a value
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// insert a value at the given key, returning any previous value
    pub fn insert(&mut self, key: &[String], value: V) -> Option<V> {
        let mut node = &mut self.root;
        for segment in key {
            node = node.children.entry(segment.clone()).or_insert_with(Node::new);
        }
        let old = node.value.replace(value);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    /// value stored exactly at this key
    pub fn get(&self, key: &[String]) -> Option<&V> {
        self.node(key).and_then(|n| n.value.as_ref())
    }

    /// does a node exist at this key, with or without a value
    /// (an intermediate node is a plain directory)
    pub fn contains_node(&self, key: &[String]) -> bool {
        self.node(key).is_some()
    }

    /// the longest key prefix of `key` holding a value, with that value
    pub fn longest_prefix(&self, key: &[String]) -> Option<(Vec<String>, &V)> {
        let mut node = &self.root;
        let mut best: Option<(usize, &V)> = node.value.as_ref().map(|v| (0, v));
        for (depth, segment) in key.iter().enumerate() {
            match node.children.get(segment) {
                Some(child) => {
                    node = child;
                    if let Some(v) = node.value.as_ref() {
                        best = Some((depth + 1, v));
                    }
                }
                None => break,
            }
        }
        best.map(|(depth, v)| (key[..depth].to_vec(), v))
    }

    /// every node at or below `prefix`, in sorted key order.
    /// yields `(key, value-if-any)`, including value-less intermediate nodes.
    pub fn iter_prefix<'a>(
        &'a self,
        prefix: &[String],
    ) -> Box<dyn Iterator<Item = (Vec<String>, Option<&'a V>)> + 'a> {
        match self.node(prefix) {
            Some(node) => {
                let mut out = Vec::new();
                collect(node, &mut prefix.to_vec(), &mut out);
                Box::new(out.into_iter())
            }
            None => Box::new(std::iter::empty()),
        }
    }

    fn node(&self, key: &[String]) -> Option<&Node<V>> {
        let mut node = &self.root;
        for segment in key {
            node = node.children.get(segment)?;
        }
        Some(node)
    }
}

impl<V> Default for PathTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn collect<'a, V>(
    node: &'a Node<V>,
    key: &mut Vec<String>,
    out: &mut Vec<(Vec<String>, Option<&'a V>)>,
) {
    out.push((key.clone(), node.value.as_ref()));
    for (segment, child) in &node.children {
        key.push(segment.clone());
        collect(child, key, out);
        key.pop();
    }
}
