//! Error types and converters.

use std::io;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::metadata::RoleName;

/// Error type for all synchronization and verification failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// A named resource was absent at the mirror. Recoverable: the root rotation walk treats
    /// this as "no further versions" rather than a fatal condition.
    #[error("{role} metadata not found at mirror path {path:?}")]
    NotFound { role: RoleName, path: String },

    /// The underlying transport failed while fetching bytes.
    #[error("transport error fetching {path:?}: {message}")]
    TransportError { path: String, message: String },

    /// A resource exceeded its declared or configured maximum length.
    #[error("{path:?} exceeded the maximum allowed size of {max_length} bytes")]
    OversizeError { path: String, max_length: u64 },

    /// A hash or length check against a trusted declaration failed.
    #[error("integrity check failed for {path:?}: {message}")]
    IntegrityError { path: String, message: String },

    /// A signed document did not meet its role's signature threshold.
    #[error("signature threshold not met for {role}: {message}")]
    SignatureError { role: RoleName, message: String },

    /// A manifest could not be parsed, or its spec version is incompatible.
    #[error("could not decode {role} metadata: {message}")]
    SchemaError { role: RoleName, message: String },

    /// A manifest was past its expiration instant at the moment it was evaluated.
    #[error("{role} metadata expired at {expires}")]
    ExpiredError { role: RoleName, expires: DateTime<Utc> },

    /// A rollback was detected, or a declared version did not match an expected value.
    #[error("version error for {role}: {message}")]
    VersionError { role: RoleName, message: String },

    /// Two trusted manifests disagree about a fact that must be consistent between them.
    #[error("inconsistent manifest state: {0}")]
    InconsistentManifest(String),

    /// A caller requested a component version that is not present in its manifest.
    #[error("component {component:?} has no version {version:?}")]
    UnknownVersion { component: String, version: String },

    /// A component has no versions available for the requested platform.
    #[error("component {component:?} has no versions available for platform {platform:?}")]
    NoVersions { component: String, platform: String },

    /// An illegal argument was passed into a function.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// An invariant the library itself is responsible for maintaining did not hold. These are
    /// always bugs and should be reported.
    #[error("programming error: {0}")]
    Programming(String),

    /// Opaque local I/O failure (store writes, temp file persistence, etc).
    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    pub(crate) fn not_found(role: RoleName, path: impl Into<String>) -> Self {
        Error::NotFound {
            role,
            path: path.into(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::SchemaError {
            role: RoleName::Root,
            message: format!("JSON: {err}"),
        }
    }
}

impl From<ring::error::Unspecified> for Error {
    fn from(_: ring::error::Unspecified) -> Error {
        Error::SignatureError {
            role: RoleName::Root,
            message: "signature operation failed".into(),
        }
    }
}

impl From<ring::error::KeyRejected> for Error {
    fn from(err: ring::error::KeyRejected) -> Error {
        Error::SchemaError {
            role: RoleName::Root,
            message: format!("key rejected: {err}"),
        }
    }
}

impl From<data_encoding::DecodeError> for Error {
    fn from(err: data_encoding::DecodeError) -> Error {
        Error::SchemaError {
            role: RoleName::Root,
            message: format!("encoding: {err}"),
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Error {
        Error::Io(format!("persisting temp file: {err}"))
    }
}
