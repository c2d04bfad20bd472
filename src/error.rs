//! Error types for Convoy

use thiserror::Error;

/// Result type for Convoy operations
pub type Result<T> = std::result::Result<T, ConvoyError>;

/// Convoy error types
#[derive(Error, Debug)]
pub enum ConvoyError {
    #[error("Invalid dependency graph: {0}")]
    InvalidGraph(String),

    #[error("Service {service} failed: {source}")]
    Operation {
        service: String,
        #[source]
        source: Box<ConvoyError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Container error: {0}")]
    Container(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container not running: {0}")]
    ContainerNotRunning(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Compose error: {0}")]
    Compose(String),

    #[error("Compose file parse error: {0}")]
    ComposeParse(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvoyError {
    /// Wrap an operation failure with the service it happened on.
    ///
    /// Cancellation errors pass through untouched so callers see the
    /// context's own error.
    pub fn operation(service: impl Into<String>, source: ConvoyError) -> Self {
        if source.is_cancellation() {
            return source;
        }
        Self::Operation {
            service: service.into(),
            source: Box::new(source),
        }
    }

    /// True for errors produced by a cancelled or expired context
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Service name for operation failures
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::Operation { service, .. } => Some(service),
            _ => None,
        }
    }

    /// The innermost error, unwrapping operation failures
    pub fn root_cause(&self) -> &ConvoyError {
        match self {
            Self::Operation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
