use rustc_hash::FxHashMap;
use treebus_error::TopicError;

use super::{name, Flags};
use crate::{callable::Callable, metadata::Metadata, value::Value};

const FLAG_COUNT: usize = 6;

/// A node of the topic tree.
#[derive(Debug, Clone)]
pub struct TopicNode {
    name: String,
    pub value: Value,
    /// `None` for intermediate nodes created implicitly.
    pub meta: Option<Metadata>,
    children: Vec<String>,
    subscribers: [Vec<Callable>; FLAG_COUNT],
}

impl TopicNode {
    fn new(
        name: String,
        meta: Option<Metadata>,
    ) -> Self {
        let value = meta.as_ref().map_or(Value::Null, Metadata::initial_value);
        Self {
            name,
            value,
            meta,
            children: Vec::new(),
            subscribers: Default::default(),
        }
    }

    /// Absolute name; the root is `""`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subtopic(&self) -> &str {
        name::subtopic(&self.name)
    }

    pub fn is_action(&self) -> bool {
        name::is_action(&self.name)
    }

    /// Child segments in insertion order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Subscribers of a single flag list.
    pub fn subscribers(
        &self,
        flag: Flags,
    ) -> &[Callable] {
        &self.subscribers[slot(flag)]
    }

    pub fn has_flag(
        &self,
        flag: crate::metadata::MetaFlags,
    ) -> bool {
        self.meta.as_ref().is_some_and(|m| m.has_flag(flag))
    }

    pub(crate) fn add_subscriber(
        &mut self,
        flag: Flags,
        callable: Callable,
    ) {
        self.subscribers[slot(flag)].push(callable);
    }

    /// Removes every occurrence of `callable` from the lists in `flags`.
    /// Returns the lists it was found in.
    pub(crate) fn remove_subscriber(
        &mut self,
        callable: &Callable,
        flags: Flags,
    ) -> Flags {
        let mut removed = Flags::empty();
        for flag in flags.iter() {
            let list = &mut self.subscribers[slot(flag)];
            let before = list.len();
            list.retain(|c| c != callable);
            if list.len() != before {
                removed |= flag;
            }
        }
        removed
    }
}

fn slot(flag: Flags) -> usize {
    (flag.bits().trailing_zeros() as usize).min(FLAG_COUNT - 1)
}

/// A removed subtree, kept by the undo history so the removal can be
/// reverted with values and subscriptions intact.
#[derive(Debug, Clone)]
pub struct DetachedTopic {
    node: TopicNode,
    children: Vec<DetachedTopic>,
}

impl DetachedTopic {
    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn node(&self) -> &TopicNode {
        &self.node
    }
}

/// Result of [`TopicTree::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    Created,
    /// An implicit intermediate node received its metadata.
    Upgraded,
}

/// Arena of topic nodes keyed by absolute name.
#[derive(Debug)]
pub struct TopicTree {
    nodes: FxHashMap<String, TopicNode>,
}

impl Default for TopicTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicTree {
    pub fn new() -> Self {
        let mut nodes = FxHashMap::default();
        nodes.insert(String::new(), TopicNode::new(String::new(), None));
        Self { nodes }
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<&TopicNode> {
        self.nodes.get(name)
    }

    pub fn get_mut(
        &mut self,
        name: &str,
    ) -> Option<&mut TopicNode> {
        self.nodes.get_mut(name)
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.nodes.contains_key(name)
    }

    /// Number of nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Adds a typed topic, creating missing intermediate nodes.
    pub fn insert(
        &mut self,
        topic: &str,
        meta: Metadata,
    ) -> Result<Inserted, TopicError> {
        name::validate(topic)?;
        if let Some(node) = self.nodes.get_mut(topic) {
            if node.meta.is_some() {
                return Err(TopicError::Duplicate {
                    topic: topic.to_string(),
                });
            }
            node.value = meta.initial_value();
            node.meta = Some(meta);
            return Ok(Inserted::Upgraded);
        }
        self.ensure_parents(topic);
        self.link(topic);
        self.nodes
            .insert(topic.to_string(), TopicNode::new(topic.to_string(), Some(meta)));
        Ok(Inserted::Created)
    }

    /// Unlinks the subtree rooted at `topic`.
    pub fn detach(
        &mut self,
        topic: &str,
    ) -> Option<DetachedTopic> {
        if topic.is_empty() || !self.nodes.contains_key(topic) {
            return None;
        }
        let parent = name::parent(topic);
        let segment = name::subtopic(topic);
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.retain(|c| c != segment);
        }
        self.take_subtree(topic)
    }

    fn take_subtree(
        &mut self,
        topic: &str,
    ) -> Option<DetachedTopic> {
        let node = self.nodes.remove(topic)?;
        let children = node
            .children
            .iter()
            .filter_map(|c| self.take_subtree(&name::join(topic, c)))
            .collect();
        Some(DetachedTopic { node, children })
    }

    /// Re-attaches a subtree previously returned by [`detach`](Self::detach).
    pub fn restore(
        &mut self,
        detached: DetachedTopic,
    ) -> Result<(), TopicError> {
        let topic = detached.node.name.clone();
        if self.nodes.contains_key(&topic) {
            return Err(TopicError::Duplicate { topic });
        }
        self.ensure_parents(&topic);
        self.link(&topic);
        self.put_subtree(detached);
        Ok(())
    }

    fn put_subtree(
        &mut self,
        detached: DetachedTopic,
    ) {
        let DetachedTopic { node, children } = detached;
        self.nodes.insert(node.name.clone(), node);
        for child in children {
            self.put_subtree(child);
        }
    }

    fn ensure_parents(
        &mut self,
        topic: &str,
    ) {
        let parent = name::parent(topic);
        if self.nodes.contains_key(parent) {
            return;
        }
        self.ensure_parents(parent);
        self.link(parent);
        self.nodes
            .insert(parent.to_string(), TopicNode::new(parent.to_string(), None));
    }

    fn link(
        &mut self,
        topic: &str,
    ) {
        let segment = name::subtopic(topic).to_string();
        if let Some(p) = self.nodes.get_mut(name::parent(topic)) {
            if !p.children.contains(&segment) {
                p.children.push(segment);
            }
        }
    }

    /// `topic` followed by its ancestors up to and including the root.
    pub fn chain(
        &self,
        topic: &str,
    ) -> Vec<&TopicNode> {
        let mut out = Vec::new();
        let mut current = Some(topic);
        while let Some(t) = current {
            if let Some(node) = self.nodes.get(t) {
                out.push(node);
            }
            current = (!t.is_empty()).then(|| name::parent(t));
        }
        out
    }

    /// Subscribers of `flag` on `topic` and every ancestor, nearest first.
    pub fn chain_subscribers(
        &self,
        topic: &str,
        flag: Flags,
    ) -> Vec<Callable> {
        self.chain(topic)
            .into_iter()
            .flat_map(|node| node.subscribers(flag).iter().cloned())
            .collect()
    }

    /// `topic` and all descendants, pre-order.
    pub fn preorder(
        &self,
        topic: &str,
    ) -> Vec<&TopicNode> {
        let mut out = Vec::new();
        self.walk(topic, &mut out);
        out
    }

    fn walk<'a>(
        &'a self,
        topic: &str,
        out: &mut Vec<&'a TopicNode>,
    ) {
        let Some(node) = self.nodes.get(topic) else {
            return;
        };
        out.push(node);
        for child in &node.children {
            self.walk(&name::join(topic, child), out);
        }
    }

    /// Child names of `topic`, optionally absolute and/or recursive.
    pub fn enumerate(
        &self,
        topic: &str,
        absolute: bool,
        traverse: bool,
    ) -> Option<Vec<String>> {
        let node = self.nodes.get(topic)?;
        if !traverse {
            return Some(
                node.children
                    .iter()
                    .map(|c| {
                        if absolute {
                            name::join(topic, c)
                        } else {
                            c.clone()
                        }
                    })
                    .collect(),
            );
        }
        let lead = if absolute || topic.is_empty() {
            0
        } else {
            topic.len() + 1
        };
        Some(
            self.preorder(topic)
                .into_iter()
                .skip(1)
                .map(|n| n.name[lead..].to_string())
                .collect(),
        )
    }

    /// Removes `callable` from every list of every node.
    ///
    /// Returns `(topic, flags)` for each node it was removed from, pre-order.
    pub fn remove_everywhere(
        &mut self,
        callable: &Callable,
    ) -> Vec<(String, Flags)> {
        let names: Vec<String> = self
            .preorder("")
            .into_iter()
            .map(|n| n.name.clone())
            .collect();
        names
            .into_iter()
            .filter_map(|topic| {
                let node = self.nodes.get_mut(&topic)?;
                let removed = node.remove_subscriber(callable, Flags::all());
                (!removed.is_empty()).then_some((topic, removed))
            })
            .collect()
    }
}
