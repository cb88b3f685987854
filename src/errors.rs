use std::fmt;

/// Category of an [`AvError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AvErrorKind {
    /// The selected device is no longer present.
    DeviceUnavailable,
    /// The negotiated format was rejected by the backend.
    FormatUnsupported,
    /// Reading or writing a control value or auto-mode failed.
    ControlAccessFailed,
    /// The operation is not valid for the current stream state.
    IllegalState,
    /// A looked-up item (default device, pixel format id, ...) does not exist.
    NotFound,
    /// Opaque native error at enumeration or transport level.
    BackendFailure,
    /// Configuration could not be read, parsed or validated.
    InvalidConfig,
}

impl AvErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvErrorKind::DeviceUnavailable => "device unavailable",
            AvErrorKind::FormatUnsupported => "format unsupported",
            AvErrorKind::ControlAccessFailed => "control access failed",
            AvErrorKind::IllegalState => "illegal state",
            AvErrorKind::NotFound => "not found",
            AvErrorKind::BackendFailure => "backend failure",
            AvErrorKind::InvalidConfig => "invalid configuration",
        }
    }
}

impl fmt::Display for AvErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every fallible operation of the crate.
///
/// Carries the taxonomy kind and a human-readable message, usually the
/// backend's own description of what went wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AvError {
    pub kind: AvErrorKind,
    pub message: String,
}

pub type AvResult<T> = Result<T, AvError>;

impl AvError {
    pub fn new(kind: AvErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn device_unavailable(message: impl Into<String>) -> Self {
        Self::new(AvErrorKind::DeviceUnavailable, message)
    }

    pub fn format_unsupported(message: impl Into<String>) -> Self {
        Self::new(AvErrorKind::FormatUnsupported, message)
    }

    pub fn control_access_failed(message: impl Into<String>) -> Self {
        Self::new(AvErrorKind::ControlAccessFailed, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(AvErrorKind::IllegalState, message)
    }

    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        Self::new(AvErrorKind::NotFound, format!("{entity} not found: {id}"))
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(AvErrorKind::BackendFailure, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(AvErrorKind::InvalidConfig, message)
    }

    /// Re-tag a backend error as a control access failure, keeping its message.
    pub fn into_control_error(self) -> Self {
        match self.kind {
            AvErrorKind::ControlAccessFailed => self,
            _ => Self::control_access_failed(self.message),
        }
    }

    pub fn is(&self, kind: AvErrorKind) -> bool {
        self.kind == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_kind_and_message() {
        let err = AvError::illegal_state("stream is disposed");
        assert_eq!(err.to_string(), "illegal state: stream is disposed");
    }

    #[test]
    fn test_not_found_message() {
        let err = AvError::not_found("pixel format", "0x12345678");
        assert!(err.is(AvErrorKind::NotFound));
        assert_eq!(err.message, "pixel format not found: 0x12345678");
    }

    #[test]
    fn test_control_error_retag() {
        let err = AvError::backend("ioctl failed").into_control_error();
        assert_eq!(err.kind, AvErrorKind::ControlAccessFailed);
        assert_eq!(err.message, "ioctl failed");
    }
}
