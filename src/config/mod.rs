//! Broker configuration.
//!
//! Values come from built-in defaults, overridden by `TREEBUS_*` environment
//! variables (e.g. `TREEBUS_UNDO_LIMIT=200`).

pub mod settings;

pub use settings::BrokerConfig;
