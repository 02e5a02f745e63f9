//! Error types returned by the individual pipeline stages.

use std::io;
use std::path::PathBuf;

/// Failures of the metadata prober.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("metadata tool '{0}' was not found on PATH")]
    ToolNotFound(String),

    #[error("metadata tool failed for '{path}': {stderr}")]
    ToolFailed { path: PathBuf, stderr: String },

    #[error("could not parse media metadata for '{path}': {reason}")]
    Unparseable { path: PathBuf, reason: String },

    #[error("I/O error while probing '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The command line could not be composed.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("path '{0}' contains a double quote and cannot be passed to the encoder")]
    QuoteInPath(String),
}

/// Failures starting or supervising the encoder process.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to start encoder `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for encoder: {0}")]
    Wait(#[source] io::Error),
}

/// Filesystem failures while swapping the encoded output into place.
#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("failed to delete '{path}': {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to move '{from}' to '{to}': {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}
