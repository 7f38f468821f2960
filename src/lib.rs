/// Capability aggregation into a single summary topic.
pub mod aggregator;
/// The home-thread broker: topics, dispatch, undo/redo.
pub mod broker;
/// Subscriber adapters for functions, closures and bound methods.
pub mod callable;
/// Undoable operations and the undo/redo history.
pub mod command;
/// Broker configuration loading.
pub mod config;
/// Deferred command queue and the cross-thread handle.
pub mod dispatch;
/// Topic metadata: type tags, flags and value validation.
pub mod metadata;
/// Object registry and capability lists.
pub mod registry;
/// Snapshot save/load of settings and registry topics.
pub mod snapshot;
/// Topic names, flag lists and the topic tree.
pub mod topic;
/// Retained value helpers.
pub mod value;
/// Files with numbered backup versions.
pub mod versioned_file;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Aggregator and its stock reducers.
pub use aggregator::{all_except_empty, any_true, Aggregator};
/// Broker and its history action topics.
pub use broker::{Broker, REDO_TOPIC, UNDO_TOPIC};
/// Subscriber adapters.
pub use callable::{Callable, HandlerResult, Reply};
/// config
pub use config::BrokerConfig;
/// Cross-thread access.
pub use dispatch::BrokerHandle;
/// Topic contracts.
pub use metadata::{DType, MetaFlags, Metadata};
/// Registry API.
pub use registry::{ClassDescriptor, Registrable};
/// Subscription flags.
pub use topic::Flags;
/// Error and result types.
pub use treebus_error::{BusResult, StackError, StatusCode};
pub use value::Value;
/// Versioned file.
pub use versioned_file::VersionedFile;
