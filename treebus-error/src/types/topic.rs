use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Failures addressing or mutating the topic tree.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TopicError {
    #[error("topic not found: {topic}")]
    NotFound { topic: String },

    #[error("topic already exists: {topic}")]
    Duplicate { topic: String },

    #[error("invalid topic name '{topic}': {reason}")]
    InvalidName { topic: String, reason: String },
}

impl ErrorExt for TopicError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NotFound,
            Self::Duplicate { .. } => StatusCode::AlreadyExists,
            Self::InvalidName { .. } => StatusCode::InvalidKey,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
