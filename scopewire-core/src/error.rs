use thiserror::Error;

/// All errors produced by scopewire-core.
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("relay closed: no further items can be sent")]
    RelayClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("sample sink error: {0}")]
    Sink(String),

    #[error("pipeline stage failed: {0}")]
    StageFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScopeError {
    /// `true` for errors that only mean "the other side of a relay is gone".
    pub fn is_relay_closed(&self) -> bool {
        matches!(self, ScopeError::RelayClosed)
    }
}

pub type Result<T> = std::result::Result<T, ScopeError>;
