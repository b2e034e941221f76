//! Error types for StashDB.

use std::fmt;
use thiserror::Error;

/// Where a value that failed to decode was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOrigin {
    /// A pending put still sitting in the write buffer
    Buffered,
    /// A committed entry read from the storage engine
    Stored,
}

impl fmt::Display for ValueOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueOrigin::Buffered => f.write_str("buffered"),
            ValueOrigin::Stored => f.write_str("stored"),
        }
    }
}

/// Errors raised by a storage engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The write transaction does not fit in the current map size
    #[error("capacity exceeded: transaction needs {required} bytes, map size is {map_size}")]
    CapacityExceeded {
        /// Bytes the committed state would occupy
        required: u64,
        /// Current map size
        map_size: u64,
    },

    /// The environment was opened read-only
    #[error("environment is read-only")]
    ReadOnly,

    /// The environment has been closed
    #[error("environment is closed")]
    Closed,

    /// A resize was requested below what the data already occupies
    #[error("invalid map size {requested}: {used} bytes already in use")]
    InvalidMapSize {
        /// Requested map size
        requested: u64,
        /// Bytes currently occupied
        used: u64,
    },

    /// The data file failed validation
    #[error("corrupted data file: {0}")]
    Corrupted(String),

    /// Engine-internal (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Returns true for the condition the growth controller retries on.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, EngineError::CapacityExceeded { .. })
    }
}

/// Error raised by a value serializer.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(pub String);

/// The main error type for StashDB operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The key does not resolve to a value
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A raw key could not be canonicalized (or decanonicalized)
    #[error("Key encoding error: {0}")]
    KeyEncode(String),

    /// Stored bytes could not be deserialized
    #[error("Failed to decode {origin} value for key {key}: {message}")]
    Decode {
        /// Display form of the offending key
        key: String,
        /// Buffer or engine
        origin: ValueOrigin,
        /// Serializer message
        message: String,
    },

    /// A value could not be serialized
    #[error("Failed to encode value: {0}")]
    Encode(String),

    /// Growing the map would exceed the configured maximum
    #[error("map size {map_size} is at its configured maximum {max_map_size:?} and the write still does not fit")]
    CapacityExhausted {
        /// Map size when growth gave up
        map_size: u64,
        /// Configured cap
        max_map_size: Option<u64>,
    },

    /// The store is closed or closing
    #[error("Store is closed or in the process of closing")]
    StoreClosed,

    /// Write attempted on a read-only store
    #[error("Store is read-only; write operations are not allowed")]
    ReadOnly,

    /// Invalid configuration or option combination
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The final flush during a strict close failed
    #[error("Final flush failed during close: {0}")]
    FinalFlush(#[source] Box<Error>),

    /// Storage engine error
    #[error("Storage engine error: {0}")]
    Engine(#[source] EngineError),
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ReadOnly => Error::ReadOnly,
            EngineError::Closed => Error::StoreClosed,
            other => Error::Engine(other),
        }
    }
}

/// A specialized `Result` type for StashDB operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A specialized `Result` type for storage engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        assert!(matches!(Error::from(EngineError::ReadOnly), Error::ReadOnly));
        assert!(matches!(Error::from(EngineError::Closed), Error::StoreClosed));
        assert!(matches!(
            Error::from(EngineError::Corrupted("bad magic".into())),
            Error::Engine(EngineError::Corrupted(_))
        ));
    }

    #[test]
    fn test_decode_error_message_names_key() {
        let err = Error::Decode {
            key: "'user:1'".to_string(),
            origin: ValueOrigin::Buffered,
            message: "unexpected end of input".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("buffered"));
        assert!(msg.contains("'user:1'"));
    }

    #[test]
    fn test_capacity_exceeded_detection() {
        let err = EngineError::CapacityExceeded {
            required: 10,
            map_size: 5,
        };
        assert!(err.is_capacity_exceeded());
        assert!(!EngineError::ReadOnly.is_capacity_exceeded());
    }
}
