use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Failures of class/instance registration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// The post-registration hook failed; the registration was rolled back.
    #[error("registration of '{id}' failed: {reason}")]
    HookFailed { id: String, reason: String },

    /// Capability setup failed after the hook ran; the registration was
    /// rolled back.
    #[error("registration of '{id}' did not complete: {reason}")]
    Incomplete { id: String, reason: String },

    #[error("not registered: {id}")]
    NotRegistered { id: String },

    #[error("invalid unique id '{id}'")]
    InvalidId { id: String },

    /// `registry_initialize` was not called on this broker.
    #[error("registry is not initialized")]
    Uninitialized,
}

impl ErrorExt for RegistryError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::HookFailed { .. } | Self::Incomplete { .. } => StatusCode::RegistrationFailed,
            Self::NotRegistered { .. } => StatusCode::NotRegistered,
            Self::InvalidId { .. } => StatusCode::InvalidKey,
            Self::Uninitialized => StatusCode::InvalidOperation,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hook failures are reported as registration failures.
    #[test]
    fn test_hook_failed_code() {
        let e = RegistryError::HookFailed {
            id: "dev:0001".into(),
            reason: "open failed".into(),
        };
        assert_eq!(e.status_code(), StatusCode::RegistrationFailed);
        assert!(e.to_string().contains("dev:0001"));
    }
}
