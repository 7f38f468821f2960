pub mod registry;
pub mod snapshot;
pub mod topic;
pub mod validation;

pub use registry::*;
pub use snapshot::*;
pub use topic::*;
pub use validation::*;

use crate::{ErrorExt, StatusCode};

/// Error carrying just a status code and a message.
#[derive(Debug, Clone)]
pub struct GenericError {
    code: StatusCode,
    message: String,
}

impl GenericError {
    pub fn new(
        code: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GenericError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GenericError {}

impl ErrorExt for GenericError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl From<std::io::Error> for crate::StackError {
    fn from(err: std::io::Error) -> Self {
        crate::StackError::new(SnapshotError::from(err))
    }
}

impl From<serde_json::Error> for crate::StackError {
    fn from(err: serde_json::Error) -> Self {
        crate::StackError::new(SnapshotError::from(err))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
