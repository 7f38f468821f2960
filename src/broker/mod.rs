//! The home-thread broker.
//!
//! [`Broker`] owns the topic tree, the undo history and the registry. It is
//! `!Send`: every callback runs on the thread that created it, and other
//! threads reach it through a [`BrokerHandle`].
//!
//! - `exec`: op execution, dispatch and undo capture.

mod exec;

use std::{
    cell::{Cell, RefCell},
    sync::Arc,
    thread::{self, ThreadId},
};

use tracing::{debug, warn};
use treebus_error::{bail, BusResult, TopicError, ValidationError};

use crate::{
    callable::Callable,
    command::{History, Op, UndoEntry},
    config::BrokerConfig,
    dispatch::{BrokerHandle, Deferred, DeferredQueue, NotifyFn},
    metadata::{DType, MetaFlags, Metadata},
    registry::RegistryState,
    topic::{Flags, TopicTree},
    value::{self, Value},
};

/// Action topic that undoes the last command(s).
pub const UNDO_TOPIC: &str = "common/actions/!undo";
/// Action topic that redoes the last undone command(s).
pub const REDO_TOPIC: &str = "common/actions/!redo";

/// In-process hierarchical publish/subscribe broker with undo/redo.
pub struct Broker {
    pub(crate) tree: RefCell<TopicTree>,
    pub(crate) history: RefCell<History>,
    /// Open capture of the executing top-level command.
    pub(crate) capture: RefCell<Option<UndoEntry>>,
    pub(crate) depth: Cell<usize>,
    /// Non-zero while undo capture is suppressed.
    pub(crate) untracked: Cell<usize>,
    pub(crate) registry: RefCell<RegistryState>,
    queue: Arc<DeferredQueue>,
    home: ThreadId,
    config: BrokerConfig,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    pub fn with_config(config: BrokerConfig) -> Self {
        let broker = Self {
            tree: RefCell::new(TopicTree::new()),
            history: RefCell::new(History::new(config.undo_limit)),
            capture: RefCell::new(None),
            depth: Cell::new(0),
            untracked: Cell::new(0),
            registry: RefCell::new(RegistryState::default()),
            queue: Arc::new(DeferredQueue::new()),
            home: thread::current().id(),
            config,
        };
        broker.install_history_actions();
        broker
    }

    fn install_history_actions(&self) {
        let actions = [
            (
                UNDO_TOPIC,
                "Undo",
                Callable::from_fn(|b: &Broker, _: &str, v: &Value| b.on_history_action(v, true)),
            ),
            (
                REDO_TOPIC,
                "Redo",
                Callable::from_fn(|b: &Broker, _: &str, v: &Value| b.on_history_action(v, false)),
            ),
        ];
        self.untracked(|| {
            for (topic, brief, handler) in actions {
                let meta = Metadata::new(DType::Obj, brief).with_flags(MetaFlags::HIDE);
                if let Err(e) = self.topic_add(topic, meta) {
                    warn!(topic, error = %e, "history action unavailable");
                    continue;
                }
                if let Err(e) = self.subscribe(topic, handler, Flags::COMMAND) {
                    warn!(topic, error = %e, "history action unavailable");
                }
            }
        });
    }

    fn on_history_action(
        &self,
        value: &Value,
        undo: bool,
    ) -> BusResult<()> {
        if value.as_str() == Some("clear") {
            let mut history = self.history.borrow_mut();
            if undo {
                history.clear_undo();
            } else {
                history.clear_redo();
            }
            return Ok(());
        }
        let count = match value {
            Value::Null => 1,
            other => match other.as_u64() {
                Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
                None => bail!(ValidationError::new(
                    "count",
                    value::preview(other),
                    "expected a count, null or \"clear\"",
                )),
            },
        };
        if undo {
            self.undo_now(count);
        } else {
            self.redo_now(count);
        }
        Ok(())
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// A thread-safe handle feeding this broker's deferred queue.
    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle::new(self.queue.clone())
    }

    pub(crate) fn assert_home(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.home,
            "broker used off its home thread"
        );
    }

    /// Runs `f` with undo capture suppressed.
    pub fn untracked<R>(
        &self,
        f: impl FnOnce() -> R,
    ) -> R {
        let _guard = UntrackedGuard::enter(&self.untracked);
        f()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Topic lifecycle
    ////////////////////////////////////////////////////////////////////////////

    /// Adds a topic. Fails with `Duplicate` if it exists.
    pub fn topic_add(
        &self,
        topic: &str,
        meta: Metadata,
    ) -> BusResult<()> {
        self.topic_add_with(topic, meta, false)
    }

    pub fn topic_add_with(
        &self,
        topic: &str,
        meta: Metadata,
        exists_ok: bool,
    ) -> BusResult<()> {
        self.execute(Op::TopicAdd {
            topic: topic.to_string(),
            meta,
            exists_ok,
        })
    }

    /// Removes a topic and its subtree. Unknown topics are ignored.
    pub fn topic_remove(
        &self,
        topic: &str,
    ) -> BusResult<()> {
        self.execute(Op::TopicRemove {
            topic: topic.to_string(),
        })
    }

    ////////////////////////////////////////////////////////////////////////////
    // Publish / query
    ////////////////////////////////////////////////////////////////////////////

    /// Publishes synchronously; returns after every subscriber ran.
    pub fn publish(
        &self,
        topic: &str,
        value: impl Into<Value>,
    ) -> BusResult<()> {
        self.execute(Op::publish(topic, value.into()))
    }

    /// Queues a publish for the next [`process`](Self::process).
    pub fn publish_deferred(
        &self,
        topic: &str,
        value: impl Into<Value>,
    ) {
        self.queue.push_back(Deferred::Publish {
            topic: topic.to_string(),
            value: value.into(),
        });
    }

    /// Retained value of `topic`.
    pub fn query(
        &self,
        topic: &str,
    ) -> BusResult<Value> {
        self.tree
            .borrow()
            .get(topic)
            .map(|n| n.value.clone())
            .ok_or_else(|| {
                TopicError::NotFound {
                    topic: topic.to_string(),
                }
                .into()
            })
    }

    pub fn query_or(
        &self,
        topic: &str,
        default: impl Into<Value>,
    ) -> Value {
        self.query(topic).unwrap_or_else(|_| default.into())
    }

    pub fn metadata(
        &self,
        topic: &str,
    ) -> Option<Metadata> {
        self.tree.borrow().get(topic).and_then(|n| n.meta.clone())
    }

    pub fn contains(
        &self,
        topic: &str,
    ) -> bool {
        self.tree.borrow().contains(topic)
    }

    /// Child names of `topic` in insertion order.
    ///
    /// `absolute` returns full names; `traverse` descends into every level.
    pub fn enumerate(
        &self,
        topic: &str,
        absolute: bool,
        traverse: bool,
    ) -> BusResult<Vec<String>> {
        self.tree
            .borrow()
            .enumerate(topic, absolute, traverse)
            .ok_or_else(|| {
                TopicError::NotFound {
                    topic: topic.to_string(),
                }
                .into()
            })
    }

    ////////////////////////////////////////////////////////////////////////////
    // Subscriptions
    ////////////////////////////////////////////////////////////////////////////

    /// Attaches `callable` to the lists in `flags` (empty means `PUB`).
    ///
    /// With `RETAIN` the retained values of the topic and its descendants are
    /// delivered before this returns.
    pub fn subscribe(
        &self,
        topic: &str,
        callable: Callable,
        flags: Flags,
    ) -> BusResult<Callable> {
        self.execute(Op::Subscribe {
            topic: topic.to_string(),
            callable: callable.clone(),
            flags,
        })?;
        Ok(callable)
    }

    /// Detaches `callable` from the lists in `flags` (empty means all).
    pub fn unsubscribe(
        &self,
        topic: &str,
        callable: &Callable,
        flags: Flags,
    ) -> BusResult<()> {
        self.execute(Op::Unsubscribe {
            topic: topic.to_string(),
            callable: callable.clone(),
            flags,
        })
    }

    /// Detaches `callable` from every topic.
    pub fn unsubscribe_all(
        &self,
        callable: &Callable,
    ) -> BusResult<()> {
        self.execute(Op::UnsubscribeAll {
            callable: callable.clone(),
        })
    }

    ////////////////////////////////////////////////////////////////////////////
    // History
    ////////////////////////////////////////////////////////////////////////////

    /// Reverts the last `count` commands.
    pub fn undo(
        &self,
        count: usize,
    ) -> BusResult<()> {
        self.publish(UNDO_TOPIC, count)
    }

    /// Re-applies the last `count` undone commands.
    pub fn redo(
        &self,
        count: usize,
    ) -> BusResult<()> {
        self.publish(REDO_TOPIC, count)
    }

    pub fn undo_clear(&self) {
        self.history.borrow_mut().clear_undo();
    }

    pub fn redo_clear(&self) {
        self.history.borrow_mut().clear_redo();
    }

    pub fn undo_len(&self) -> usize {
        self.history.borrow().undo_len()
    }

    pub fn redo_len(&self) -> usize {
        self.history.borrow().redo_len()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Deferred queue
    ////////////////////////////////////////////////////////////////////////////

    /// Runs every queued command; returns how many ran.
    ///
    /// A failing command is logged and does not stop the rest.
    pub fn process(&self) -> usize {
        self.assert_home();
        let mut count = 0;
        while let Some(cmd) = self.queue.pop() {
            let result = match cmd {
                Deferred::Publish { topic, value } => self.publish(&topic, value),
                Deferred::TopicAdd {
                    topic,
                    meta,
                    exists_ok,
                } => self.topic_add_with(&topic, meta, exists_ok),
                Deferred::TopicRemove { topic } => self.topic_remove(&topic),
            };
            if let Err(e) = result {
                warn!(error = %e, "deferred command failed");
            }
            count += 1;
        }
        if count > 0 {
            debug!(count, "processed deferred commands");
        }
        count
    }

    /// Installs the callback run after each enqueue, replacing any previous one.
    pub fn set_notify<F>(
        &self,
        notify: F,
    ) where
        F: Fn() + Send + Sync + 'static,
    {
        let notify: NotifyFn = Arc::new(notify);
        self.queue.set_notify(Some(notify));
    }

    pub fn clear_notify(&self) {
        self.queue.set_notify(None);
    }

    /// Commands waiting for `process`.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Keeps undo capture suppressed until dropped, including on unwind.
struct UntrackedGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> UntrackedGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for UntrackedGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("topics", &self.tree.borrow().len())
            .field("undo", &self.undo_len())
            .field("redo", &self.redo_len())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use super::*;

    /// A panic inside `untracked` does not leave capture switched off.
    #[test]
    fn test_untracked_recovers_from_panic() {
        let broker = Broker::new();
        broker
            .topic_add("n", Metadata::new(DType::U8, "n").with_default(0))
            .unwrap();
        broker.undo_clear();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            broker.untracked(|| -> usize { panic!("handler bug") })
        }));
        assert!(outcome.is_err());
        assert_eq!(broker.untracked.get(), 0);

        broker.publish("n", 1).unwrap();
        assert_eq!(broker.undo_len(), 1);
    }

    /// Nested `untracked` calls unwind to zero.
    #[test]
    fn test_untracked_nests() {
        let broker = Broker::new();
        let inner = broker.untracked(|| broker.untracked(|| broker.untracked.get()));
        assert_eq!(inner, 2);
        assert_eq!(broker.untracked.get(), 0);
    }
}
