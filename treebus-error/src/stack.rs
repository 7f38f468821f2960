use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, StatusCode};

/// Error with an attached context chain.
///
/// Context is pushed as the error travels outwards, e.g. from a validator
/// through `publish` into the handler that issued it.
#[derive(Clone)]
pub struct StackError {
    inner: Arc<dyn ErrorExt>,
    contexts: Arc<Vec<ErrorContext>>,
}

/// One context frame together with the caller location.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: Option<&'static Location<'static>>,
}

////////////////////////////////////////////////////////////////////////////////
// Inherent methods
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    #[track_caller]
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
            contexts: Arc::new(Vec::new()),
        }
    }

    /// Pushes a context frame.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        let mut frames = (*self.contexts).clone();
        frames.push(ErrorContext {
            message: msg.into(),
            location: Some(Location::caller()),
        });
        self.contexts = Arc::new(frames);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }

    /// Downcast the root error to a concrete type.
    pub fn downcast_ref<T: ErrorExt + 'static>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Returns `true` when the root error is of type `T`.
    pub fn is<T: ErrorExt + 'static>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    fn format_contexts(&self) -> Vec<String> {
        self.contexts
            .iter()
            .map(|ctx| match ctx.location {
                Some(loc) => format!("{} ({}:{})", ctx.message, loc.file(), loc.line()),
                None => ctx.message.clone(),
            })
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Trait impls
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut debug = f.debug_struct("StackError");
        debug.field("inner", &self.inner.to_string());
        debug.field("status_code", &self.status_code());

        if !self.contexts.is_empty() {
            debug.field("contexts", &self.format_contexts());
        }

        debug.finish()
    }
}

impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.contexts.is_empty() {
            return write!(f, "{}", self.inner);
        }
        let frames: Vec<&str> = self.contexts.iter().map(|c| c.message.as_str()).collect();
        write!(f, "{}: {}", frames.join(" → "), self.inner)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    #[track_caller]
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TopicError, ValidationError};

    /// Context frames accumulate in push order and record a location.
    #[test]
    fn test_context_chain() {
        let stack = StackError::new(TopicError::NotFound {
            topic: "a/b".into(),
        })
        .context("query")
        .context("aggregator refresh");

        assert_eq!(stack.contexts().len(), 2);
        assert_eq!(stack.contexts()[0].message, "query");
        assert!(stack.contexts()[0].location.is_some());
    }

    /// The root error can be recovered by type.
    #[test]
    fn test_downcast() {
        let stack = StackError::new(ValidationError::new("u8", "300", "out of range"));
        assert!(stack.is::<ValidationError>());
        assert!(!stack.is::<TopicError>());
        assert_eq!(stack.status_code(), StatusCode::InvalidValue);
    }

    /// `Display` joins the context frames before the root message.
    #[test]
    fn test_display() {
        let stack = StackError::new(TopicError::Duplicate {
            topic: "a".into(),
        })
        .context("restore");
        let display = stack.to_string();
        assert!(display.starts_with("restore: "), "got: {display}");
        assert!(display.contains("already exists"), "got: {display}");
    }
}
