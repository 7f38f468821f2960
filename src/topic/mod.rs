//! Topic namespace.
//!
//! - `name`: topic name parsing (suffix aliases, actions, validation).
//! - `tree`: the node arena with parent/child links and subscriber lists.

use bitflags::bitflags;

pub mod name;
pub mod tree;

pub use name::TopicName;
pub use tree::{DetachedTopic, Inserted, TopicNode, TopicTree};

bitflags! {
    /// Subscriber lists of a topic.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u8 {
        /// Normal value updates.
        const PUB = 1 << 0;
        /// Deliver the retained subtree once on subscribe.
        const RETAIN = 1 << 1;
        /// Command handler; only the first one of an action runs.
        const COMMAND = 1 << 2;
        /// Metadata announcements (`topic$`).
        const METADATA = 1 << 3;
        /// Removal notices (`topic~`).
        const REMOVE = 1 << 4;
        /// Action completion codes (`topic#`).
        const COMPLETION = 1 << 5;
    }
}
