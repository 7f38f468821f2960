use serde_json::json;
use tracing::{debug, error, trace, warn};
use treebus_error::{BusResult, StatusCode, TopicError, ValidationError};

use super::Broker;
use crate::{
    callable::{Callable, HandlerResult, Invocation, Reply},
    command::{Op, UndoEntry},
    metadata::{DType, MetaFlags},
    topic::{DetachedTopic, Flags, Inserted, TopicName},
    value::{self, Value},
};

/// What a plain publish resolved to, computed under a short tree borrow.
enum Target {
    Missing,
    Unchanged,
    Action {
        value: Value,
        handler: Option<Callable>,
    },
    Event {
        value: Value,
    },
    Retained {
        old: Value,
        new: Value,
        skip_undo: bool,
    },
}

impl Broker {
    /// Executes one op. The outermost call opens the undo capture and
    /// commits it to the history when done.
    pub(crate) fn execute(
        &self,
        op: Op,
    ) -> BusResult<()> {
        self.assert_home();
        let depth = self.depth.get() + 1;
        self.depth.set(depth);
        let top = depth == 1;
        if top && self.untracked.get() == 0 {
            *self.capture.borrow_mut() = Some(UndoEntry::new(&op));
        }

        let result = self.apply(op);

        self.depth.set(depth - 1);
        if top {
            let entry = self.capture.borrow_mut().take();
            if let Some(entry) = entry.filter(|e| !e.is_empty()) {
                trace!(topic = %entry.topic, ops = entry.undos.len(), "undo captured");
                self.history.borrow_mut().record(entry);
            }
        }
        result
    }

    fn apply(
        &self,
        op: Op,
    ) -> BusResult<()> {
        match op {
            Op::Publish { topic, value } => self.apply_publish(&topic, value),
            Op::TopicAdd {
                topic,
                meta,
                exists_ok,
            } => self.apply_topic_add(topic, meta, exists_ok),
            Op::TopicRestore { detached } => self.apply_topic_restore(detached),
            Op::TopicRemove { topic } => self.apply_topic_remove(topic),
            Op::Subscribe {
                topic,
                callable,
                flags,
            } => self.apply_subscribe(topic, callable, flags),
            Op::Unsubscribe {
                topic,
                callable,
                flags,
            } => self.apply_unsubscribe(topic, callable, flags),
            Op::UnsubscribeAll { callable } => self.apply_unsubscribe_all(callable),
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Capture
    ////////////////////////////////////////////////////////////////////////////

    fn capturing(&self) -> bool {
        self.untracked.get() == 0 && self.capture.borrow().is_some()
    }

    fn record(
        &self,
        undo: Op,
        redo: Op,
    ) {
        if !self.capturing() {
            return;
        }
        if let Some(entry) = self.capture.borrow_mut().as_mut() {
            entry.push(undo, redo);
        }
    }

    fn record_core(
        &self,
        undo: Op,
        redo: Op,
    ) {
        if !self.config().skip_core_undo {
            self.record(undo, redo);
        }
    }

    fn capture_mark(&self) -> Option<(usize, usize)> {
        self.capture.borrow().as_ref().map(UndoEntry::mark)
    }

    /// Replaces whatever the handler's nested publishes captured with the
    /// revert it returned.
    fn record_reply(
        &self,
        mark: Option<(usize, usize)>,
        topic: &str,
        value: &Value,
        reply: Reply,
    ) {
        let Reply::Revert { undo, redo } = reply else {
            return;
        };
        if !self.capturing() {
            return;
        }
        let mut capture = self.capture.borrow_mut();
        let Some(entry) = capture.as_mut() else {
            return;
        };
        if let Some(mark) = mark {
            entry.truncate(mark);
        }
        // Undos replay last to first, so the handler's block goes in reversed.
        entry
            .undos
            .extend(undo.into_iter().rev().map(|(t, v)| Op::publish(t, v)));
        if redo.is_empty() {
            entry.redos.push(Op::publish(topic, value.clone()));
        } else {
            entry
                .redos
                .extend(redo.into_iter().map(|(t, v)| Op::publish(t, v)));
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Delivery
    ////////////////////////////////////////////////////////////////////////////

    /// Invokes a callable; a dead one is purged and yields `None`.
    pub(crate) fn call(
        &self,
        callable: &Callable,
        topic: &str,
        value: &Value,
    ) -> Option<HandlerResult> {
        match callable.invoke(self, topic, value) {
            Invocation::Done(result) => Some(result),
            Invocation::Dead => {
                self.purge(callable);
                None
            }
        }
    }

    /// Drops every subscription of a callable whose instance is gone.
    pub(crate) fn purge(
        &self,
        callable: &Callable,
    ) {
        let removed = self.tree.borrow_mut().remove_everywhere(callable);
        if !removed.is_empty() {
            debug!(callable = callable.name(), topics = removed.len(), "purged dead subscriber");
        }
    }

    /// Calls the `flag` subscribers of `base` and its ancestors.
    fn deliver(
        &self,
        base: &str,
        flag: Flags,
        topic: &str,
        value: &Value,
    ) {
        let subscribers = self.tree.borrow().chain_subscribers(base, flag);
        trace!(topic, count = subscribers.len(), "dispatch");
        for callable in subscribers {
            if let Some(Err(e)) = self.call(&callable, topic, value) {
                error!(
                    topic,
                    callable = callable.name(),
                    code = %e.status_code(),
                    error = %e,
                    "subscriber failed"
                );
            }
        }
    }

    /// Replays the retained subtree of `topic` to one subscriber, pre-order.
    fn deliver_retained(
        &self,
        topic: &str,
        callable: &Callable,
    ) {
        let values: Vec<(String, Value)> = self
            .tree
            .borrow()
            .preorder(topic)
            .into_iter()
            .filter(|n| !n.is_action())
            .map(|n| (n.name().to_string(), n.value.clone()))
            .collect();
        for (name, value) in values {
            match self.call(callable, &name, &value) {
                Some(Ok(_)) => {}
                Some(Err(e)) => error!(topic = %name, error = %e, "retained delivery failed"),
                None => break,
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Publish
    ////////////////////////////////////////////////////////////////////////////

    fn resolve(
        &self,
        topic: &str,
        value: Value,
    ) -> BusResult<Target> {
        let tree = self.tree.borrow();
        let Some(node) = tree.get(topic) else {
            return Ok(Target::Missing);
        };
        let value = match &node.meta {
            Some(meta) => meta.validate_with_current(&value, Some(&node.value))?,
            None if value.is_null() => value,
            None => {
                return Err(ValidationError::new(
                    "node",
                    value::preview(&value),
                    "cannot assign a value to a node",
                )
                .into())
            }
        };
        if node.is_action() {
            return Ok(Target::Action {
                value,
                handler: node.subscribers(Flags::COMMAND).first().cloned(),
            });
        }
        if node.meta.as_ref().is_some_and(|m| m.dtype == DType::None) {
            return Ok(Target::Event { value });
        }
        if value == node.value {
            return Ok(Target::Unchanged);
        }
        Ok(Target::Retained {
            old: node.value.clone(),
            new: value,
            skip_undo: node.has_flag(MetaFlags::SKIP_UNDO),
        })
    }

    fn apply_publish(
        &self,
        topic: &str,
        value: Value,
    ) -> BusResult<()> {
        let parsed = TopicName::parse(topic);
        if let Some(flag) = parsed.suffix {
            if !self.contains(parsed.base) {
                warn!(topic, "publish to unknown topic");
                return Ok(());
            }
            self.deliver(parsed.base, flag, topic, &value);
            return Ok(());
        }

        match self.resolve(topic, value)? {
            Target::Missing => warn!(topic, "publish to unknown topic"),
            Target::Unchanged => trace!(topic, "value unchanged"),
            Target::Event { value } => self.deliver(topic, Flags::PUB, topic, &value),
            Target::Retained {
                old,
                new,
                skip_undo,
            } => {
                if let Some(node) = self.tree.borrow_mut().get_mut(topic) {
                    node.value = new.clone();
                }
                if !skip_undo {
                    self.record(Op::publish(topic, old), Op::publish(topic, new.clone()));
                }
                self.deliver(topic, Flags::PUB, topic, &new);
            }
            Target::Action { value, handler } => self.run_action(topic, value, handler),
        }
        Ok(())
    }

    fn run_action(
        &self,
        topic: &str,
        value: Value,
        handler: Option<Callable>,
    ) {
        let code = match handler {
            None => {
                debug!(topic, "action without handler");
                StatusCode::Success
            }
            Some(handler) => {
                let mark = self.capture_mark();
                match self.call(&handler, topic, &value) {
                    Some(Ok(reply)) => {
                        self.record_reply(mark, topic, &value, reply);
                        StatusCode::Success
                    }
                    Some(Err(e)) => {
                        error!(topic, code = %e.status_code(), error = %e, "action failed");
                        e.status_code()
                    }
                    None => {
                        warn!(topic, "action handler was dropped");
                        StatusCode::InstanceDropped
                    }
                }
            }
        };
        self.deliver(topic, Flags::PUB, topic, &value);
        let completion = format!("{topic}#");
        self.deliver(topic, Flags::COMPLETION, &completion, &json!(code.code()));
    }

    ////////////////////////////////////////////////////////////////////////////
    // Topic lifecycle
    ////////////////////////////////////////////////////////////////////////////

    fn apply_topic_add(
        &self,
        topic: String,
        meta: crate::metadata::Metadata,
        exists_ok: bool,
    ) -> BusResult<()> {
        let meta = meta.checked()?;
        let inserted = self.tree.borrow_mut().insert(&topic, meta.clone());
        let inserted = match inserted {
            Ok(inserted) => inserted,
            Err(TopicError::Duplicate { .. }) if exists_ok => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let upgraded = inserted == Inserted::Upgraded;
        debug!(topic = %topic, dtype = %meta.dtype, upgraded, "topic added");
        let announce = meta.to_map();
        if inserted == Inserted::Created {
            self.record_core(
                Op::TopicRemove {
                    topic: topic.clone(),
                },
                Op::TopicAdd {
                    topic: topic.clone(),
                    meta,
                    exists_ok,
                },
            );
        }
        let alias = format!("{topic}$");
        self.deliver(&topic, Flags::METADATA, &alias, &announce);
        Ok(())
    }

    fn apply_topic_remove(
        &self,
        topic: String,
    ) -> BusResult<()> {
        if topic.is_empty() || !self.contains(&topic) {
            debug!(topic = %topic, "remove of unknown topic");
            return Ok(());
        }
        let alias = format!("{topic}~");
        self.deliver(&topic, Flags::REMOVE, &alias, &Value::Null);
        let detached = self.tree.borrow_mut().detach(&topic);
        if let Some(detached) = detached {
            debug!(topic = %topic, "topic removed");
            self.record_core(Op::TopicRestore { detached }, Op::TopicRemove { topic });
        }
        Ok(())
    }

    fn apply_topic_restore(
        &self,
        detached: DetachedTopic,
    ) -> BusResult<()> {
        let topic = detached.name().to_string();
        self.tree.borrow_mut().restore(detached.clone())?;
        debug!(topic = %topic, "topic restored");
        self.record_core(Op::TopicRemove { topic }, Op::TopicRestore { detached });
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Subscriptions
    ////////////////////////////////////////////////////////////////////////////

    fn apply_subscribe(
        &self,
        topic: String,
        callable: Callable,
        flags: Flags,
    ) -> BusResult<()> {
        let flags = if flags.is_empty() { Flags::PUB } else { flags };
        {
            let mut tree = self.tree.borrow_mut();
            let Some(node) = tree.get_mut(&topic) else {
                warn!(topic = %topic, "subscribe to unknown topic");
                return Ok(());
            };
            for flag in flags.iter() {
                node.add_subscriber(flag, callable.clone());
            }
        }
        trace!(topic = %topic, callable = callable.name(), ?flags, "subscribed");
        self.record_core(
            Op::Unsubscribe {
                topic: topic.clone(),
                callable: callable.clone(),
                flags,
            },
            Op::Subscribe {
                topic: topic.clone(),
                callable: callable.clone(),
                flags,
            },
        );
        if flags.contains(Flags::RETAIN) {
            self.deliver_retained(&topic, &callable);
        }
        Ok(())
    }

    fn apply_unsubscribe(
        &self,
        topic: String,
        callable: Callable,
        flags: Flags,
    ) -> BusResult<()> {
        let flags = if flags.is_empty() { Flags::all() } else { flags };
        let removed = {
            let mut tree = self.tree.borrow_mut();
            let Some(node) = tree.get_mut(&topic) else {
                warn!(topic = %topic, "unsubscribe from unknown topic");
                return Ok(());
            };
            node.remove_subscriber(&callable, flags)
        };
        if removed.is_empty() {
            return Ok(());
        }
        self.record_core(
            Op::Subscribe {
                topic: topic.clone(),
                callable: callable.clone(),
                flags: removed,
            },
            Op::Unsubscribe {
                topic,
                callable,
                flags: removed,
            },
        );
        Ok(())
    }

    fn apply_unsubscribe_all(
        &self,
        callable: Callable,
    ) -> BusResult<()> {
        let removed = self.tree.borrow_mut().remove_everywhere(&callable);
        if removed.is_empty() || !self.capturing() || self.config().skip_core_undo {
            return Ok(());
        }
        let mut capture = self.capture.borrow_mut();
        if let Some(entry) = capture.as_mut() {
            for (topic, flags) in removed {
                entry.undos.push(Op::Subscribe {
                    topic,
                    callable: callable.clone(),
                    flags,
                });
            }
            entry.redos.push(Op::UnsubscribeAll { callable });
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Undo / redo
    ////////////////////////////////////////////////////////////////////////////

    fn replay(
        &self,
        ops: impl Iterator<Item = Op>,
    ) {
        self.untracked(|| {
            for op in ops {
                if let Err(e) = self.execute(op) {
                    warn!(error = %e, "history replay step failed");
                }
            }
        });
    }

    pub(crate) fn undo_now(
        &self,
        count: usize,
    ) {
        for _ in 0..count {
            let Some(entry) = self.history.borrow_mut().pop_undo() else {
                break;
            };
            debug!(topic = %entry.topic, "undo");
            self.replay(entry.undos.iter().rev().cloned());
            self.history.borrow_mut().push_redo(entry);
        }
    }

    pub(crate) fn redo_now(
        &self,
        count: usize,
    ) {
        for _ in 0..count {
            let Some(entry) = self.history.borrow_mut().pop_redo() else {
                break;
            };
            debug!(topic = %entry.topic, "redo");
            self.replay(entry.redos.iter().cloned());
            self.history.borrow_mut().push_undo(entry);
        }
    }
}
