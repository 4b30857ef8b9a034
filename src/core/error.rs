use thiserror::Error;

/// Coarse error category, mirrored by every `MediaError` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParameter,
    MemoryAllocationFailed,
    SystemError,
    NotFound,
    OutOfRange,
    NonsupportInCurrentState,
    Unknown,
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("memory allocation failed: {0}")]
    MemoryAllocationFailed(String),

    #[error("system error: {0}")]
    SystemError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("not supported in current state: {0}")]
    NonsupportInCurrentState(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl MediaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            MediaError::MemoryAllocationFailed(_) => ErrorKind::MemoryAllocationFailed,
            MediaError::SystemError(_) => ErrorKind::SystemError,
            MediaError::NotFound(_) => ErrorKind::NotFound,
            MediaError::OutOfRange(_) => ErrorKind::OutOfRange,
            MediaError::NonsupportInCurrentState(_) => ErrorKind::NonsupportInCurrentState,
            MediaError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        MediaError::SystemError(format!("{} lock poisoned", what))
    }
}

impl From<std::io::Error> for MediaError {
    fn from(e: std::io::Error) -> Self {
        MediaError::SystemError(format!("io: {}", e))
    }
}

impl From<image::ImageError> for MediaError {
    fn from(e: image::ImageError) -> Self {
        MediaError::SystemError(format!("image: {}", e))
    }
}

impl From<serde_json::Error> for MediaError {
    fn from(e: serde_json::Error) -> Self {
        MediaError::NotFound(format!("malformed tool output: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
