use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// A value rejected by topic metadata.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {dtype} value {value}: {reason}")]
pub struct ValidationError {
    pub dtype: String,
    pub value: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(
        dtype: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            dtype: dtype.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl ErrorExt for ValidationError {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidValue
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Metadata that cannot be constructed (bad dtype, range or default).
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid metadata: {reason}")]
pub struct MetadataError {
    pub reason: String,
}

impl MetadataError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ErrorExt for MetadataError {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidArgs
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<ValidationError> for MetadataError {
    fn from(err: ValidationError) -> Self {
        Self::new(format!("default rejected: {err}"))
    }
}
