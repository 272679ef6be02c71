use serde_derive::{Deserialize, Serialize};

/// A result type returned by most txkv operations.
pub type CResult<T> = Result<T, Error>;

/// All errors surfaced by the storage engines and the transaction layer.
///
/// Errors carry a plain message rather than a source chain, so they can be
/// compared in tests and serialized across process boundaries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The transaction or store is in a state that does not allow the
    /// operation, e.g. a write on a closed transaction, or a store opened
    /// over inconsistent persisted state.
    InvalidState(String),

    /// A write kept conflicting with another open transaction until the
    /// lock timeout budget ran out. The transaction stays open and the
    /// caller may retry.
    LockTimeout(String),

    /// The caller passed an argument the operation cannot accept.
    InvalidInput(String),

    /// The operation is not supported by this type.
    Unsupported(String),

    /// Stored bytes could not be decoded, or typed data could not be
    /// encoded for storage.
    InvalidData(String),

    /// An I/O failure in the backing engine.
    Io(String),

    /// An unexpected internal failure.
    Internal(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::LockTimeout(msg) => write!(f, "lock timeout: {}", msg),
            Error::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Error::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            Error::InvalidData(msg) => write!(f, "invalid data: {}", msg),
            Error::Io(msg) => write!(f, "io error: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            Error::LockTimeout("key [0x61] in map 7".to_string()).to_string(),
            "lock timeout: key [0x61] in map 7"
        );
        assert_eq!(
            Error::InvalidState("transaction 3 is closed".to_string()).to_string(),
            "invalid state: transaction 3 is closed"
        );
    }

    #[test]
    fn from_io() {
        let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(Error::from(err), Error::Io("eof".to_string()));
    }
}
