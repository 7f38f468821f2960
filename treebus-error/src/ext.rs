use std::{any::Any, error::Error};

use crate::StatusCode;

/// Extension trait shared by every broker error (object-safe).
///
/// The status code is what completion (`#`) subscribers and log records
/// see; `as_any` lets a [`StackError`](crate::StackError) recover the
/// concrete error.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Category of the failure. Defaults to [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Returns the error as [`Any`] so it can be downcast.
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use std::{any::Any, fmt};

    use super::*;

    #[derive(Debug)]
    struct PlainError(&'static str);

    impl fmt::Display for PlainError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "plain: {}", self.0)
        }
    }

    impl Error for PlainError {}

    impl ErrorExt for PlainError {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct MissingTopic(&'static str);

    impl fmt::Display for MissingTopic {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "missing topic {}", self.0)
        }
    }

    impl Error for MissingTopic {}

    impl ErrorExt for MissingTopic {
        fn status_code(&self) -> StatusCode {
            StatusCode::NotFound
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// An error without an explicit code reports `Internal`.
    #[test]
    fn test_default_status_code_is_internal() {
        assert_eq!(PlainError("x").status_code(), StatusCode::Internal);
    }

    /// `as_any` allows downcasting to the concrete type.
    #[test]
    fn test_as_any_downcast() {
        let e = MissingTopic("a");
        let down = e.as_any().downcast_ref::<MissingTopic>();
        assert_eq!(down.map(|d| d.0), Some("a"));
    }
}
