//! Share flow error types.

/// Errors produced while uploading or downloading a share.
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("client error: {0}")]
    Client(#[from] cowshare_client::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] cowshare_transfer::TransferError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("unknown URL format: {0}")]
    UnknownUrl(String),

    #[error("link invalid")]
    LinkInvalid,

    #[error("link deleted")]
    LinkDeleted,

    #[error("link has not finished uploading yet")]
    LinkNotReady,

    #[error("invalid file name: {0}")]
    InvalidName(String),
}
