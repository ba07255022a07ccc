use thiserror::Error;

/// Obstacle avoidance error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AvoidanceError {
    #[error("No next waypoint available")]
    MissingWaypoint,

    #[error("No obstacle selected for state {0}")]
    NoSelectedObstacle(&'static str),

    #[error("Unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    #[error("Geometry out of domain: {0}")]
    OutOfDomain(String),

    #[error("Vehicle command failed: {0}")]
    Vehicle(String),

    #[error("Telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    #[error("Malformed feed message: {0}")]
    MalformedMessage(String),

    #[error("Obstacle index {index} out of range ({len} moving obstacles)")]
    ObstacleIndex { index: usize, len: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for avoidance operations
pub type Result<T> = std::result::Result<T, AvoidanceError>;

impl From<std::io::Error> for AvoidanceError {
    fn from(err: std::io::Error) -> Self {
        AvoidanceError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AvoidanceError {
    fn from(err: serde_json::Error) -> Self {
        AvoidanceError::InvalidConfig(err.to_string())
    }
}
