//! Error types for the job bridge.

use std::fmt;

use crate::association::AssociationToken;
use crate::codes;
use crate::types::{PropertyId, PropertyType};

/// An error code reported by the native job system, passed through verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeError(u16);

impl NativeError {
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// `None` when the status reports success.
    pub fn from_status(status: u64) -> Option<Self> {
        match codes::normalize(status) {
            codes::OK => None,
            code => Some(Self(code)),
        }
    }

    pub const fn code(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "native error {} ({})",
            self.0,
            codes::error_code_name(self.0)
        )
    }
}

impl std::error::Error for NativeError {}

/// Faults crossing the managed-runtime boundary.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeFault {
    #[error("attach current thread failed: {reason}")]
    Attach { reason: String },

    #[error("detach current thread failed: {reason}")]
    Detach { reason: String },
}

/// A failure raised by a user's event handler. Recorded, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerFault {
    #[error("handler raised: {message}")]
    Raised { message: String },

    #[error("handler panicked: {message}")]
    Panicked { message: String },
}

impl HandlerFault {
    pub fn raised(message: impl Into<String>) -> Self {
        HandlerFault::Raised {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Native(#[from] NativeError),

    #[error("too many properties requested: {requested} (max {max})")]
    TooManyProperties { requested: usize, max: usize },

    #[error("cannot marshal property #{index} ({id}) of type {kind}")]
    UnmarshallableProperty {
        index: usize,
        id: PropertyId,
        kind: PropertyType,
    },

    #[error("association limit reached: {live} live associations")]
    AssociationLimit { live: usize },

    #[error("stale association token {token}")]
    StaleToken { token: AssociationToken },

    #[error("runtime fault: {0}")]
    Runtime(#[from] RuntimeFault),
}

impl BridgeError {
    pub fn native(code: u16) -> Self {
        BridgeError::Native(NativeError::new(code))
    }

    /// The numeric code a caller sees for this error.
    pub fn code(&self) -> u16 {
        match self {
            BridgeError::Native(e) => e.code(),
            BridgeError::TooManyProperties { .. } => codes::BRIDGE_E_TOO_MANY_PROPERTIES,
            BridgeError::UnmarshallableProperty { .. } => {
                codes::BRIDGE_E_CANNOT_RETURN_UNKNOWN_PROPERTYTYPE
            }
            BridgeError::AssociationLimit { .. } => codes::BRIDGE_E_ASSOCIATION_LIMIT,
            BridgeError::StaleToken { .. } => codes::BRIDGE_E_STALE_ASSOCIATION,
            BridgeError::Runtime(_) => codes::BRIDGE_E_RUNTIME_FAULT,
        }
    }

    pub fn code_name(&self) -> &'static str {
        codes::error_code_name(self.code())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_status_zero_is_success() {
        assert_eq!(NativeError::from_status(0), None);
        assert_eq!(
            NativeError::from_status(0x7_0000_0000_0FA0),
            Some(NativeError::new(codes::E_VM_NOT_FOUND))
        );
    }

    #[test]
    fn bridge_codes_are_stable() {
        let e = BridgeError::TooManyProperties {
            requested: 7,
            max: 6,
        };
        assert_eq!(e.code(), 30001);
        let e = BridgeError::UnmarshallableProperty {
            index: 0,
            id: PropertyId::JOB_RESULT_HANDLE,
            kind: PropertyType::Any,
        };
        assert_eq!(e.code(), 30002);
        assert_eq!(BridgeError::native(codes::E_FAIL).code(), 1);
    }

    #[test]
    fn native_error_display_names_the_code() {
        let e = BridgeError::native(codes::E_INVALID_HANDLE);
        assert_eq!(e.to_string(), "native error 1000 (VIX_E_INVALID_HANDLE)");
    }
}
