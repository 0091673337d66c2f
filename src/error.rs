use thiserror::Error;

// POSIX error numbers used on the wire.
pub const EPERM: i32 = 1;
pub const EIO: i32 = 5;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const EINVAL: i32 = 22;
pub const ENODATA: i32 = 61;
pub const EPROTO: i32 = 71;
pub const ETIMEDOUT: i32 = 110;
pub const ECANCELED: i32 = 125;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Busy(String),

    #[error("{0}")]
    NoData(String),

    #[error("{0}")]
    Canceled(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    RemoteIo(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Protocol(String),

    #[error("eventlog replay failed: {0}")]
    Replay(String),

    #[error("topology reduction overflow: {0}")]
    TopoOverflow(String),
}

impl Error {
    /// Error number reported to remote callers.
    pub fn errnum(&self) -> i32 {
        match self {
            Error::IoError(_) | Error::RemoteIo(_) => EIO,
            Error::DeserializationError(_) | Error::Protocol(_) | Error::Replay(_) => EPROTO,
            Error::InvalidArgument(_) => EINVAL,
            Error::AlreadyExists(_) => EEXIST,
            Error::Busy(_) => EBUSY,
            Error::NoData(_) => ENODATA,
            Error::Canceled(_) => ECANCELED,
            Error::PermissionDenied(_) => EPERM,
            Error::Timeout(_) => ETIMEDOUT,
            Error::TopoOverflow(_) => EINVAL,
        }
    }

    /// Rebuilds an error received from a remote peer.
    pub fn from_errnum(errnum: i32, errstr: String) -> Self {
        match errnum {
            EINVAL => Error::InvalidArgument(errstr),
            EEXIST => Error::AlreadyExists(errstr),
            EBUSY => Error::Busy(errstr),
            ENODATA => Error::NoData(errstr),
            ECANCELED => Error::Canceled(errstr),
            EPERM => Error::PermissionDenied(errstr),
            ETIMEDOUT => Error::Timeout(errstr),
            EPROTO => Error::Protocol(errstr),
            _ => Error::RemoteIo(errstr),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
