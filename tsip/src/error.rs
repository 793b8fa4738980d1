//! Errors returned by the endpoint and the transaction layer.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
/// The error type for endpoint and transaction operations.
pub enum Error {
    /// A mandatory header is absent from the message.
    #[error("Missing required '{0}' header")]
    MissingRequiredHeader(&'static str),

    /// A header is present but carries a value the layer rejects,
    /// e.g. a `CSeq` method that differs from the request line.
    #[error("Invalid '{0}' header")]
    InvalidHeader(&'static str),

    /// The operation is not permitted in the current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// The transaction was destroyed before the operation could run.
    #[error("Transaction destroyed")]
    TransactionDestroyed,

    /// A transaction with the same key is already registered.
    #[error("Transaction key already registered")]
    KeyExists,

    /// The transaction layer still holds live transactions.
    #[error("Transaction layer is busy")]
    Busy,

    #[error(transparent)]
    /// I/O failure reported by a transport or by destination resolution.
    Io(#[from] io::Error),

    /// The transport event channel is closed.
    #[error("Channel closed")]
    ChannelClosed,
}

impl From<tokio::sync::mpsc::error::SendError<crate::transport::TransportEvent>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<crate::transport::TransportEvent>) -> Self {
        Self::ChannelClosed
    }
}
