/// Returns early with a `StackError`.
///
/// Forms:
/// - `bail!(err)`: any error convertible into `StackError`;
/// - `bail!(code, "msg")`: a `GenericError` with the given status code;
/// - `bail!(code, "fmt {}", arg)`: same, with a formatted message.
///
/// ```ignore
/// use treebus_error::{bail, StatusCode};
///
/// fn on_open(value: &Value) -> HandlerResult {
///     if value.is_null() {
///         bail!(StatusCode::InvalidArgs, "open requires a path");
///     }
///     Ok(Reply::None)
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::StackError::from($err))
    };
    ($code:expr, $msg:expr) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, $msg)
        ))
    };
    ($code:expr, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, format!($fmt, $($arg)*))
        ))
    };
}

/// Calls `bail!` when the condition is false. Same forms as `bail!`.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
    ($cond:expr, $code:expr, $msg:expr) => {
        if !($cond) {
            $crate::bail!($code, $msg);
        }
    };
    ($cond:expr, $code:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($code, $fmt, $($arg)*);
        }
    };
}

/// `.context(...)` / `.with_context(...)` on any `Result` whose error
/// converts into [`StackError`](crate::StackError).
pub trait ResultExt<T> {
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>;

    /// Lazily built context, only evaluated on error.
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<crate::StackError>,
{
    #[track_caller]
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
    {
        self.map_err(|e| e.into().context(ctx))
    }

    #[track_caller]
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
