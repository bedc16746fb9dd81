use thiserror::Error;

/// Errors produced by the bus layer.
#[derive(Error, Debug)]
pub enum BusError {
    /// Envelope (de)serialization failure.
    #[error("Envelope encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Spool directory I/O failure.
    #[error("Spool IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The delivery channel of this window is gone.
    #[error("Local delivery channel closed")]
    DeliveryClosed,
}

pub type Result<T> = std::result::Result<T, BusError>;
