//! Cross-thread deferral.
//!
//! The broker itself never leaves its home thread. Other threads talk to it
//! through a [`BrokerHandle`], which appends to a shared FIFO and wakes the
//! home thread via the notify callback. The home thread drains the queue
//! with [`Broker::process`](crate::Broker::process).

use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};

use crate::{metadata::Metadata, value::Value};

/// Wake-up callback invoked after every enqueue.
pub type NotifyFn = Arc<dyn Fn() + Send + Sync>;

/// A command waiting for the home thread.
#[derive(Debug, Clone)]
pub enum Deferred {
    Publish {
        topic: String,
        value: Value,
    },
    TopicAdd {
        topic: String,
        meta: Metadata,
        exists_ok: bool,
    },
    TopicRemove {
        topic: String,
    },
}

/// FIFO shared between the broker and its handles.
#[derive(Default)]
pub struct DeferredQueue {
    queue: Mutex<VecDeque<Deferred>>,
    notify: RwLock<Option<NotifyFn>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(
        &self,
        cmd: Deferred,
    ) {
        self.queue.lock().push_back(cmd);
        self.wake();
    }

    /// Jumps the queue.
    pub fn push_front(
        &self,
        cmd: Deferred,
    ) {
        self.queue.lock().push_front(cmd);
        self.wake();
    }

    pub fn pop(&self) -> Option<Deferred> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn set_notify(
        &self,
        notify: Option<NotifyFn>,
    ) {
        *self.notify.write() = notify;
    }

    fn wake(&self) {
        // Cloned so the callback runs without the lock held.
        let notify = self.notify.read().clone();
        if let Some(notify) = notify {
            notify();
        }
    }
}

impl fmt::Debug for DeferredQueue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("pending", &self.len())
            .field("notify", &self.notify.read().is_some())
            .finish()
    }
}

/// Thread-safe entry point into a broker.
///
/// Every call only enqueues; the effect becomes visible after the home thread
/// runs `process()`.
#[derive(Clone, Debug)]
pub struct BrokerHandle {
    queue: Arc<DeferredQueue>,
}

impl BrokerHandle {
    pub(crate) fn new(queue: Arc<DeferredQueue>) -> Self {
        Self { queue }
    }

    pub fn publish(
        &self,
        topic: impl Into<String>,
        value: impl Into<Value>,
    ) {
        self.queue.push_back(Deferred::Publish {
            topic: topic.into(),
            value: value.into(),
        });
    }

    /// Publishes ahead of everything already queued.
    pub fn publish_priority(
        &self,
        topic: impl Into<String>,
        value: impl Into<Value>,
    ) {
        self.queue.push_front(Deferred::Publish {
            topic: topic.into(),
            value: value.into(),
        });
    }

    pub fn topic_add(
        &self,
        topic: impl Into<String>,
        meta: Metadata,
    ) {
        self.topic_add_with(topic, meta, false);
    }

    pub fn topic_add_with(
        &self,
        topic: impl Into<String>,
        meta: Metadata,
        exists_ok: bool,
    ) {
        self.queue.push_back(Deferred::TopicAdd {
            topic: topic.into(),
            meta,
            exists_ok,
        });
    }

    pub fn topic_remove(
        &self,
        topic: impl Into<String>,
    ) {
        self.queue.push_back(Deferred::TopicRemove {
            topic: topic.into(),
        });
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
