use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Status codes used to categorize broker errors.
///
/// # Ranges
/// - 0xxx: success
/// - 1xxx: general failures
/// - 2xxx: topic and value errors
/// - 3xxx: registry and handler errors
/// - 5xxx: snapshot storage
/// - 6xxx: filesystem / IO
///
/// The numeric value is also what completion (`#`) subscribers receive after
/// an action runs, so it must stay stable.
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: success ===
    Success = 0,

    // === 1xxx: general ===
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: topics and values ===
    NotFound = 2000,
    AlreadyExists = 2001,
    InvalidKey = 2003,
    InvalidValue = 2004,
    InvalidOperation = 2005,

    // === 3xxx: registry and handlers ===
    RegistrationFailed = 3000,
    NotRegistered = 3001,
    InstanceDropped = 3003,

    // === 5xxx: snapshot storage ===
    DeserializationFailed = 5001,
    CorruptedData = 5002,

    // === 6xxx: filesystem ===
    Io = 6000,
    PermissionDenied = 6001,
}

////////////////////////////////////////////////////////////////////////////////
// Inherent methods
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Numeric representation of the code.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

////////////////////////////////////////////////////////////////////////////////
// Trait impls
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
