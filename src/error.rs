// Standardized error types for the aggregator core

use thiserror::Error;

/// Closed set of error kinds the orchestrator can surface.
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error("prefix conflict: {0}")]
    PrefixConflict(String),

    #[error("entry already active: {0}")]
    AlreadyActive(String),

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("initialize failed: {0}")]
    InitFailed(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    #[error("remote error (code {code}): {message}")]
    RemoteError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("invalid tool schema: {0}")]
    InvalidSchema(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),
}

/// Convenience alias for Results using [`AggregatorError`].
pub type Result<T> = std::result::Result<T, AggregatorError>;

impl AggregatorError {
    /// Stable machine-readable kind tag, used in structured logs and in the
    /// short user-facing rendering ("kind, entry id, one-line cause").
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntryNotFound(_) => "EntryNotFound",
            Self::PrefixConflict(_) => "PrefixConflict",
            Self::AlreadyActive(_) => "AlreadyActive",
            Self::LaunchFailed(_) => "LaunchFailed",
            Self::InitFailed(_) => "InitFailed",
            Self::Timeout(_) => "Timeout",
            Self::DiscoveryFailed(_) => "DiscoveryFailed",
            Self::RegistrationFailed(_) => "RegistrationFailed",
            Self::RemoteError { .. } => "RemoteError",
            Self::TransportClosed(_) => "TransportClosed",
            Self::InvalidSchema(_) => "InvalidSchema",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
            Self::Config(_) => "Config",
            Self::Other(_) => "Other",
        }
    }

    /// Short structured message for a user-visible failure: kind + entry id + cause.
    /// Backtraces and full context stay in the tracing logs.
    pub fn user_facing(&self, entry_id: &str) -> String {
        format!("[{}] {entry_id}: {self}", self.kind())
    }
}

impl From<String> for AggregatorError {
    fn from(s: String) -> Self {
        AggregatorError::Other(s)
    }
}
