use crate::types::Tag;

pub type Result<T> = std::result::Result<T, CommError>;

#[derive(Debug, thiserror::Error)]
pub enum CommError {
    /// A rank, root or colour argument violates the communicator topology.
    #[error("{operation}: {reason}")]
    Protocol {
        operation: &'static str,
        reason: String,
    },

    /// Send/receive layouts disagree, or an input cannot be split into
    /// one equal chunk per participant.
    #[error("{operation}: shape mismatch: {reason}")]
    ShapeMismatch {
        operation: &'static str,
        reason: String,
    },

    #[error("invalid reduction operator {0:?} (expected sum, max or min)")]
    InvalidOperation(String),

    #[error("invalid staging buffer: {reason}")]
    InvalidStagingBuffer { reason: String },

    /// A device↔host copy failed inside the device runtime.
    #[error("device transfer failed: {message}")]
    Transfer {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("no pending message for tag {tag}")]
    EmptyQueue { tag: Tag },

    /// Raised by the transport library itself. Never retried.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("device runtime error: {message}")]
    Device {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CommError {
    pub fn protocol(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Protocol {
            operation,
            reason: reason.into(),
        }
    }

    pub fn shape_mismatch(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            operation,
            reason: reason.into(),
        }
    }

    pub fn invalid_staging(reason: impl Into<String>) -> Self {
        Self::InvalidStagingBuffer {
            reason: reason.into(),
        }
    }

    /// Create a `Transfer` error with just a message.
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transfer` error with a message and a source error.
    pub fn transfer_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transfer {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Device` error with a message and a source error.
    pub fn device_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Device {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }
}
