//! Incremental resolution tree over build events.
//!
//! Every event declares the identifiers of its children. The tree attaches
//! each newly seen event to the node that announced it and can tell when the
//! root has been fully resolved, i.e. every announced descendant arrived.

use std::collections::HashMap;

use crate::error::TreeWarning;
use crate::event::BuildEvent;

#[derive(Debug)]
struct Node {
    /// Canonical key of the event, if it had an id.
    key: Option<String>,
    /// Declared child keys, in declaration order.
    children: Vec<String>,
    /// Declared child key -> index of the attached node.
    attached: HashMap<String, usize>,
}

impl Node {
    fn from_event(event: &BuildEvent) -> Self {
        Self {
            key: event.key().map(str::to_string),
            children: event.children_keys().to_vec(),
            attached: HashMap::new(),
        }
    }
}

/// Arena of resolved/unresolved event nodes, rooted at the first event.
#[derive(Debug)]
pub struct EventTree {
    nodes: Vec<Node>,
    /// Canonical child key -> index of the node that declared it.
    parent_index: HashMap<String, usize>,
    /// Canonical event key -> its own node index.
    by_key: HashMap<String, usize>,
}

impl EventTree {
    /// Start a tree with `root` as its root node.
    pub fn new(root: &BuildEvent) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            parent_index: HashMap::new(),
            by_key: HashMap::new(),
        };
        tree.push(root);
        tree
    }

    fn push(&mut self, event: &BuildEvent) -> usize {
        let index = self.nodes.len();
        let node = Node::from_event(event);
        for child in &node.children {
            self.parent_index.insert(child.clone(), index);
        }
        if let Some(key) = &node.key {
            self.by_key.insert(key.clone(), index);
        }
        self.nodes.push(node);
        index
    }

    /// Attach `event` under the node that declared it.
    ///
    /// Events without an id, or whose id was never announced as a child,
    /// are rejected with a warning and left out of the tree.
    pub fn insert(&mut self, event: &BuildEvent) -> Result<(), TreeWarning> {
        let Some(key) = event.key() else {
            return Err(TreeWarning::MissingId {
                event: event.raw().to_string(),
            });
        };
        let Some(&parent) = self.parent_index.get(key) else {
            return Err(TreeWarning::OrphanEvent { id: key.to_string() });
        };

        let index = self.push(event);
        self.nodes[parent].attached.insert(key.to_string(), index);
        Ok(())
    }

    /// Whether every descendant announced from the root has arrived.
    pub fn is_complete(&self) -> bool {
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            for child in &node.children {
                match node.attached.get(child) {
                    Some(&attached) => stack.push(attached),
                    None => return false,
                }
            }
        }
        true
    }

    /// Keys of the children already attached under `key`, in declaration order.
    pub fn resolved_children(&self, key: &str) -> Vec<&str> {
        let Some(&index) = self.by_key.get(key) else {
            return Vec::new();
        };
        let node = &self.nodes[index];
        node.children
            .iter()
            .filter(|child| node.attached.contains_key(*child))
            .map(String::as_str)
            .collect()
    }

    /// Key of the root event.
    pub fn root_key(&self) -> Option<&str> {
        self.nodes.first().and_then(|node| node.key.as_deref())
    }

    /// Number of events in the tree, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
