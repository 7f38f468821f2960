use std::{any::Any, io};

use crate::{ErrorExt, StatusCode};

/// Failures reading or writing a snapshot document.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot format: {0}")]
    Format(#[from] serde_json::Error),

    #[error("snapshot structure: {reason}")]
    Structure { reason: String },
}

impl ErrorExt for SnapshotError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => StatusCode::NotFound,
                io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
                _ => StatusCode::Io,
            },
            Self::Format(e) if e.is_io() => StatusCode::Io,
            Self::Format(_) => StatusCode::DeserializationFailed,
            Self::Structure { .. } => StatusCode::CorruptedData,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Structural problems are treated as corrupted data.
    #[test]
    fn test_structure_is_corrupted() {
        let e = SnapshotError::Structure {
            reason: "missing children".into(),
        };
        assert_eq!(e.status_code(), StatusCode::CorruptedData);
    }
}
