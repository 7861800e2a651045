//! Error types for the molecule archive

use thiserror::Error;

/// Result type alias using the archive Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the molecule archive
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from the container stream or the store file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LMDB/heed errors from the persisted store
    #[error("Database error: {0}")]
    Database(#[from] heed::Error),

    /// A record could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Malformed container framing
    #[error("Container error: {0}")]
    Container(String),

    /// The container stream does not start with an archive properties record
    #[error("No archive properties found - the stream is not a molecule archive")]
    MissingProperties,

    /// Molecule or metadata UID not present in the archive
    #[error("Not found: {0}")]
    NotFound(String),

    /// Positional lookup past the end of an index
    #[error("Index {index} out of range for {len} entries")]
    IndexOutOfRange {
        /// Requested position
        index: usize,
        /// Number of entries in the index
        len: usize,
    },

    /// Operation not allowed in the archive's current lifecycle state
    #[error("Invalid archive state: {0}")]
    InvalidState(String),

    /// The persisted store was already closed
    #[error("Store is closed")]
    StoreClosed,

    /// The store file is already open elsewhere in this process
    #[error("Store at {0} is already open in this process")]
    StoreInUse(String),

    /// The persisted store was not closed cleanly and must be recovered
    #[error("Store at {0} was not closed cleanly; open it in recovery mode")]
    UncleanShutdown(String),

    /// Recovery found data it could not classify
    #[error("Recovery error: {0}")]
    Recovery(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tabular data violates its shape invariants
    #[error("Table error: {0}")]
    Table(String),
}

impl Error {
    /// Create a codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create a container error
    pub fn container(msg: impl Into<String>) -> Self {
        Self::Container(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a recovery error
    pub fn recovery(msg: impl Into<String>) -> Self {
        Self::Recovery(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a table error
    pub fn table(msg: impl Into<String>) -> Self {
        Self::Table(msg.into())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::Io(err.into())
        } else {
            Self::Codec(err.to_string())
        }
    }
}
