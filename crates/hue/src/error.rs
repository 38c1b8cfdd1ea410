use thiserror::Error;

#[derive(Error, Debug)]
pub enum HueError {
    /* mapped errors */
    #[error(transparent)]
    FromUtf8Error(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    TryFromIntError(#[from] std::num::TryFromIntError),

    #[error(transparent)]
    PackedStructError(#[from] packed_struct::PackingError),

    #[error(transparent)]
    UuidError(#[from] uuid::Error),

    /* huestream errors */
    #[error("Invalid HueStream header")]
    HueStreamBadHeader,

    #[error("Unknown HueStream protocol version {0}")]
    HueStreamBadVersion(u8),

    #[error("Truncated HueStream record block ({0} trailing bytes)")]
    HueStreamTruncated(usize),

    #[error("Client key must be 32 hex characters")]
    InvalidStreamKey,
}

pub type HueResult<T> = Result<T, HueError>;
