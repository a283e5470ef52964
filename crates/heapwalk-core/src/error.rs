//! Enumeration error types

use std::fmt;

use thiserror::Error;

/// Boxed runtime error carried as the source of an [`EnumerationError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for bridge operations
pub type EnumerationResult<T> = Result<T, EnumerationError>;

/// Why an enumeration request failed.
///
/// Every variant keeps the runtime's own error as its source and a
/// human-readable rendering of the descriptor the caller asked about.
#[derive(Debug, Error)]
pub enum EnumerationError {
    /// The descriptor does not name a loaded class.
    #[error("unknown type {descriptor}: {source}")]
    UnknownType {
        /// The descriptor as the caller supplied it
        descriptor: String,
        /// Runtime error from class resolution
        source: BoxError,
    },

    /// The runtime aborted the heap iteration without being asked to.
    #[error("heap walk for {descriptor} failed: {source}")]
    WalkFailure {
        /// The descriptor as the caller supplied it
        descriptor: String,
        /// Runtime error from the iteration facility
        source: BoxError,
    },

    /// A matching instance could not be turned into a durable handle.
    #[error("could not create a durable reference to an instance of {descriptor}: {source}")]
    ReferenceUpgrade {
        /// The descriptor as the caller supplied it
        descriptor: String,
        /// Runtime error from handle creation
        source: BoxError,
    },
}

/// Discriminant of [`EnumerationError`], for callers that map failures onto
/// their own error model without looking at messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`EnumerationError::UnknownType`]
    UnknownType,
    /// See [`EnumerationError::WalkFailure`]
    WalkFailure,
    /// See [`EnumerationError::ReferenceUpgrade`]
    ReferenceUpgrade,
}

impl ErrorKind {
    /// Stable name of the kind
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnknownType => "UnknownType",
            ErrorKind::WalkFailure => "WalkFailure",
            ErrorKind::ReferenceUpgrade => "ReferenceUpgrade",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EnumerationError {
    /// Create an unknown type error
    pub fn unknown_type(descriptor: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::UnknownType {
            descriptor: descriptor.into(),
            source: source.into(),
        }
    }

    /// Create a walk failure error
    pub fn walk_failure(descriptor: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::WalkFailure {
            descriptor: descriptor.into(),
            source: source.into(),
        }
    }

    /// Create a reference upgrade error
    pub fn reference_upgrade(descriptor: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ReferenceUpgrade {
            descriptor: descriptor.into(),
            source: source.into(),
        }
    }

    /// Which of the three failure kinds this is
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownType { .. } => ErrorKind::UnknownType,
            Self::WalkFailure { .. } => ErrorKind::WalkFailure,
            Self::ReferenceUpgrade { .. } => ErrorKind::ReferenceUpgrade,
        }
    }

    /// The descriptor the failed request was about
    pub fn descriptor(&self) -> &str {
        match self {
            Self::UnknownType { descriptor, .. }
            | Self::WalkFailure { descriptor, .. }
            | Self::ReferenceUpgrade { descriptor, .. } => descriptor,
        }
    }

    /// The runtime error behind this failure
    pub fn runtime_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        match self {
            Self::UnknownType { source, .. }
            | Self::WalkFailure { source, .. }
            | Self::ReferenceUpgrade { source, .. } => source.as_ref(),
        }
    }
}
