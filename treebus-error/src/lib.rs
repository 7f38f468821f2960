pub mod ext;
pub mod macros;
pub mod stack;
pub mod status_code;
pub mod types;

// Re-export everything so callers can `use treebus_error::*`.
pub use ext::*;
pub use macros::*;
pub use stack::*;
pub use status_code::*;
pub use types::*;

/// Result type used across the broker.
pub type BusResult<T> = Result<T, StackError>;
