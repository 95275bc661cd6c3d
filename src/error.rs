use std::io;

use derive_more::{Display, Error, From};

use crate::ParamKey;

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, From)]
pub enum Error {
    /// The network or an optimizer was configured inconsistently.
    #[display("configuration error: {reason}")]
    Configuration { reason: String },
    /// A matrix handed to the network does not have the declared width/height.
    #[display("shape mismatch: {what} is {got}, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// A gradient set refers to a parameter the network does not have.
    #[display("unknown parameter `{key}`")]
    UnknownParameter { key: ParamKey },
    #[display("invalid snapshot: {reason}")]
    Snapshot { reason: String },
    #[display("snapshot i/o failed: {source}")]
    #[from]
    Io { source: io::Error },
}

impl Error {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn snapshot(reason: impl Into<String>) -> Self {
        Self::Snapshot {
            reason: reason.into(),
        }
    }

    /// Returns an error if `got != expected`.
    pub(crate) fn check_shape(what: &'static str, got: usize, expected: usize) -> Result<()> {
        match got == expected {
            true => Ok(()),
            false => Err(Self::ShapeMismatch {
                what,
                got,
                expected,
            }),
        }
    }
}
