//! Commands and the undo/redo history.
//!
//! Every mutation runs as an [`Op`]. While a top-level command executes, each
//! applied op records its inverse into an [`UndoEntry`]; nested publishes
//! aggregate into the same entry. Finished entries land in [`History`].

use std::collections::VecDeque;

use crate::{
    callable::Callable,
    metadata::Metadata,
    topic::{DetachedTopic, Flags},
    value::Value,
};

/// A single broker operation.
#[derive(Debug, Clone)]
pub enum Op {
    Publish {
        topic: String,
        value: Value,
    },
    TopicAdd {
        topic: String,
        meta: Metadata,
        exists_ok: bool,
    },
    /// Re-attaches a removed subtree; the inverse of `TopicRemove`.
    TopicRestore {
        detached: DetachedTopic,
    },
    TopicRemove {
        topic: String,
    },
    Subscribe {
        topic: String,
        callable: Callable,
        flags: Flags,
    },
    Unsubscribe {
        topic: String,
        callable: Callable,
        flags: Flags,
    },
    UnsubscribeAll {
        callable: Callable,
    },
}

impl Op {
    pub fn publish(
        topic: impl Into<String>,
        value: Value,
    ) -> Self {
        Op::Publish {
            topic: topic.into(),
            value,
        }
    }

    /// Topic the op addresses; empty for `UnsubscribeAll`.
    pub fn topic(&self) -> &str {
        match self {
            Op::Publish { topic, .. }
            | Op::TopicAdd { topic, .. }
            | Op::TopicRemove { topic }
            | Op::Subscribe { topic, .. }
            | Op::Unsubscribe { topic, .. } => topic,
            Op::TopicRestore { detached } => detached.name(),
            Op::UnsubscribeAll { .. } => "",
        }
    }
}

/// Inverse and forward ops captured for one top-level command.
///
/// `undos` are replayed last to first, `redos` first to last.
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub topic: String,
    /// Plain value publish; may merge with an adjacent entry for the same topic.
    pub coalescible: bool,
    pub undos: Vec<Op>,
    pub redos: Vec<Op>,
}

impl UndoEntry {
    pub fn new(op: &Op) -> Self {
        let coalescible = match op {
            Op::Publish { topic, .. } => {
                crate::topic::TopicName::parse(topic).suffix.is_none()
                    && !crate::topic::name::is_action(topic)
            }
            _ => false,
        };
        Self {
            topic: op.topic().to_string(),
            coalescible,
            undos: Vec::new(),
            redos: Vec::new(),
        }
    }

    pub fn push(
        &mut self,
        undo: Op,
        redo: Op,
    ) {
        self.undos.push(undo);
        self.redos.push(redo);
    }

    pub fn is_empty(&self) -> bool {
        self.undos.is_empty() && self.redos.is_empty()
    }

    /// Current lengths, used to discard captures made by an action handler
    /// that supplies its own revert.
    pub fn mark(&self) -> (usize, usize) {
        (self.undos.len(), self.redos.len())
    }

    pub fn truncate(
        &mut self,
        mark: (usize, usize),
    ) {
        self.undos.truncate(mark.0);
        self.redos.truncate(mark.1);
    }

    fn merges_with(
        &self,
        newer: &UndoEntry,
    ) -> bool {
        self.coalescible
            && newer.coalescible
            && self.topic == newer.topic
            && self.undos.len() == 1
            && newer.undos.len() == 1
    }
}

/// Undo stack plus redo deque.
///
/// Undone entries are inserted at the front of the redo deque and redone
/// from the back, so sequential redo starts with the oldest undone entry.
#[derive(Debug, Default)]
pub struct History {
    undo: Vec<UndoEntry>,
    redo: VecDeque<UndoEntry>,
    limit: usize,
}

impl History {
    /// `limit` of `0` keeps every entry.
    pub fn new(limit: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: VecDeque::new(),
            limit,
        }
    }

    /// Records a freshly executed command.
    ///
    /// Clears the redo deque. Two adjacent publishes to the same topic merge:
    /// the older entry keeps its undo ops and takes the newer redo ops.
    pub fn record(
        &mut self,
        entry: UndoEntry,
    ) {
        self.redo.clear();
        if let Some(top) = self.undo.last_mut() {
            if top.merges_with(&entry) {
                top.redos = entry.redos;
                return;
            }
        }
        self.push_undo(entry);
    }

    /// Pushes without coalescing or touching the redo deque.
    pub fn push_undo(
        &mut self,
        entry: UndoEntry,
    ) {
        self.undo.push(entry);
        if self.limit > 0 && self.undo.len() > self.limit {
            let excess = self.undo.len() - self.limit;
            self.undo.drain(..excess);
        }
    }

    pub fn pop_undo(&mut self) -> Option<UndoEntry> {
        self.undo.pop()
    }

    pub fn push_redo(
        &mut self,
        entry: UndoEntry,
    ) {
        self.redo.push_front(entry);
    }

    pub fn pop_redo(&mut self) -> Option<UndoEntry> {
        self.redo.pop_back()
    }

    pub fn clear_undo(&mut self) {
        self.undo.clear();
    }

    pub fn clear_redo(&mut self) {
        self.redo.clear();
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }
}
