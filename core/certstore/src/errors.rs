// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by the certificate store.
#[derive(Error, Debug)]
pub enum StoreError {
    // Store lifecycle
    #[error("certificate store not initialized: {0} does not exist")]
    NotInitialized(PathBuf),
    #[error("certificate store already initialized: {0} exists")]
    AlreadyInitialized(PathBuf),

    // Input validation
    #[error("invalid certificate name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("invalid certificate format: {0}")]
    InvalidFormat(String),
    #[error("certificate expired at {not_after}")]
    Expired { not_after: DateTime<Utc> },

    // Lookup
    #[error("certificate not found: {0}")]
    NotFound(String),

    // Persisted state
    #[error("corrupt metadata {path}: {reason}")]
    CorruptMetadata { path: PathBuf, reason: String },

    // Coordination
    #[error("timed out after {waited:?} waiting for lock on {path}")]
    LockTimeout { path: PathBuf, waited: Duration },
    #[error("{op} cancelled")]
    Cancelled { op: &'static str },

    // Low-level I/O
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // The catalog change committed but the combined bundle could not be rebuilt
    #[error("certificate {name:?} cataloged but combined bundle is stale: {source}")]
    BundleStale {
        name: String,
        #[source]
        source: Box<StoreError>,
    },
}

/// Fieldless mirror of [`StoreError`] for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotInitialized,
    AlreadyInitialized,
    InvalidName,
    InvalidFormat,
    Expired,
    NotFound,
    CorruptMetadata,
    LockTimeout,
    Cancelled,
    Io,
    BundleStale,
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::CorruptMetadata {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotInitialized(_) => ErrorKind::NotInitialized,
            StoreError::AlreadyInitialized(_) => ErrorKind::AlreadyInitialized,
            StoreError::InvalidName { .. } => ErrorKind::InvalidName,
            StoreError::InvalidFormat(_) => ErrorKind::InvalidFormat,
            StoreError::Expired { .. } => ErrorKind::Expired,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::CorruptMetadata { .. } => ErrorKind::CorruptMetadata,
            StoreError::LockTimeout { .. } => ErrorKind::LockTimeout,
            StoreError::Cancelled { .. } => ErrorKind::Cancelled,
            StoreError::Io { .. } => ErrorKind::Io,
            StoreError::BundleStale { .. } => ErrorKind::BundleStale,
        }
    }

    /// Operation label, suitable as a structured log field.
    pub fn op(&self) -> &'static str {
        match self {
            StoreError::NotInitialized(_) => "open store",
            StoreError::AlreadyInitialized(_) => "initialize store",
            StoreError::InvalidName { .. } => "validate name",
            StoreError::InvalidFormat(_) | StoreError::Expired { .. } => "validate certificate",
            StoreError::NotFound(_) => "lookup certificate",
            StoreError::CorruptMetadata { .. } => "load metadata",
            StoreError::LockTimeout { .. } => "acquire lock",
            StoreError::Cancelled { op } | StoreError::Io { op, .. } => op,
            StoreError::BundleStale { .. } => "rebuild bundle",
        }
    }

    /// Filesystem path involved in the failure, when there is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            StoreError::NotInitialized(path)
            | StoreError::AlreadyInitialized(path)
            | StoreError::CorruptMetadata { path, .. }
            | StoreError::LockTimeout { path, .. }
            | StoreError::Io { path, .. } => Some(path),
            StoreError::BundleStale { source, .. } => source.path(),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
