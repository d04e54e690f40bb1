use std::path::PathBuf;

use crate::hash::HashKey;

/// error type for silo operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store not found at {0}")]
    NoStore(PathBuf),

    #[error("store already exists at {0}")]
    StoreExists(PathBuf),

    #[error("store is read-only: {0}")]
    ReadOnlyStore(PathBuf),

    #[error("object not found: {0}")]
    ObjectNotFound(HashKey),

    #[error("corrupt manifest: hash mismatch for {0}")]
    CorruptManifest(HashKey),

    #[error("no tracked output covers {0}")]
    OutputNotFound(PathBuf),

    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("is a directory: {0}")]
    IsADirectory(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("invalid hash key: {0}")]
    InvalidHashKey(String),

    #[error("invalid manifest entry path: {0}")]
    InvalidEntryPath(String),

    #[error("duplicate manifest entry path: {0}")]
    DuplicateEntryPath(String),

    #[error("remote error: {message}")]
    Remote { message: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// is this one of the not-found family of errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ObjectNotFound(_) | Error::OutputNotFound(_) | Error::PathNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
