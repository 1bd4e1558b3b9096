use thiserror::Error;

/// Failure reported by a position source while a watch is active.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorError {
    #[error("user denied geolocation permission")]
    PermissionDenied,

    #[error("location information unavailable")]
    PositionUnavailable,

    #[error("location request timed out")]
    Timeout,

    #[error("unknown geolocation error")]
    Unknown,
}

impl SensorError {
    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::PositionUnavailable => "position_unavailable",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

/// Errors surfaced by the tracker components. None of them is fatal: callers
/// log them and carry on.
#[derive(Error, Debug)]
pub enum Error {
    #[error("code: malformed_record, description: {0}")]
    MalformedRecord(String),

    #[error("code: network_failure, description: {0}")]
    NetworkFailure(String),

    #[error("code: capability_unavailable, description: position source cannot watch")]
    CapabilityUnavailable,

    #[error("code: already_watching, description: reporter is already subscribed")]
    AlreadyWatching,

    #[error("code: sensor_error, description: {0}")]
    Sensor(#[from] SensorError),
}

impl Error {
    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::MalformedRecord(_) => "malformed_record",
            Self::NetworkFailure(_) => "network_failure",
            Self::CapabilityUnavailable => "capability_unavailable",
            Self::AlreadyWatching => "already_watching",
            Self::Sensor(_) => "sensor_error",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::NetworkFailure(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedRecord(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
