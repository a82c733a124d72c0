//! Error taxonomy for the knowledge base engine
//!
//! Load-time errors (structural, integrity) abort the whole load so queries
//! never observe a partially-validated graph. Scoring-time problems are not
//! errors at all: they become per-pattern outcomes (`too_rare`, `no_signal`)
//! and never abort a wave.

use std::path::PathBuf;
use thiserror::Error;

use crate::validate::Violation;

/// Errors that can occur while loading, validating, or committing a KB
#[derive(Error, Debug)]
pub enum KbError {
    #[error("i/o error at {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("knowledge base failed integrity validation ({} violations)", violations.len())]
    Integrity { violations: Vec<Violation> },

    #[error("fragments declare incompatible schema versions: {found:?}")]
    SchemaMismatch { found: Vec<String> },

    #[error("kb_version conflict: validated against '{expected}' but on-disk version is '{found}'")]
    VersionConflict { expected: String, found: String },

    #[error("invalid version string: '{0}'")]
    InvalidVersion(String),

    #[error("no KB fragments found in {path:?}")]
    NoFragments { path: PathBuf },
}

impl KbError {
    /// All integrity violations carried by this error, if any
    pub fn violations(&self) -> &[Violation] {
        match self {
            KbError::Integrity { violations } => violations,
            _ => &[],
        }
    }
}
