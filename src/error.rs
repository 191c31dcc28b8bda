//! use ntun_certificate::error::Error;

use std::path::PathBuf;

use thiserror::Error;

/// Represents errors that can occur while provisioning a PKI.
///
/// Pre-flight conflicts are collected into a single [`Error::AlreadyExists`];
/// every other variant aborts the run as soon as it is raised.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested algorithm parameters are invalid or the RNG failed.
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    /// Signing a certificate failed, e.g. because the parent key is unusable.
    #[error("Issuance error: {0}")]
    Issuance(String),

    /// One or more planned output paths are already occupied.
    #[error("{} output file(s) already exist: {}", paths.len(), display_paths(paths))]
    AlreadyExists { paths: Vec<PathBuf> },

    /// Filesystem failure while checking or writing an output path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error due to invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    Encoding(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    Decoding(String),
}

/// A specialized Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<der::Error> for Error {
    /// Converts a `der::Error` into an `Error`.
    fn from(err: der::Error) -> Self {
        Error::Decoding(err.to_string())
    }
}

impl From<spki::Error> for Error {
    fn from(err: spki::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<pkcs8::Error> for Error {
    fn from(err: pkcs8::Error) -> Self {
        Error::Decoding(err.to_string())
    }
}

impl From<rsa::Error> for Error {
    fn from(err: rsa::Error) -> Self {
        Error::KeyGeneration(err.to_string())
    }
}
