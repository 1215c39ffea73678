//! Error types for the klusterlet works controller
//!
//! Errors carry enough context (bundle name, resource kind) to be useful in
//! logs. [`Error::is_retryable`] tells the controller whether to requeue or
//! wait for the object to change.

use thiserror::Error;

/// A single failed delete inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailure {
    /// Name of the bundle that could not be deleted
    pub name: String,
    /// Rendered error message
    pub message: String,
}

impl std::fmt::Display for DeletionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Main error type for klusterlet works operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A manifest document in the import payload could not be decoded
    #[error("payload decode error for {bundle}: {message}")]
    PayloadDecode {
        /// Bundle being built when decoding failed
        bundle: String,
        /// What went wrong
        message: String,
    },

    /// The backing store (Kubernetes API) could not serve the request
    #[error("store unavailable: {source}")]
    StoreUnavailable {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// One or more deletes in a batch failed; the rest took effect
    #[error("{} of the deletions failed: {}", failures.len(), render_failures(failures))]
    PartialDeletion {
        /// Every per-bundle failure
        failures: Vec<DeletionFailure>,
    },

    /// The requested object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// The import secret is missing data or otherwise unusable
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error: {message}")]
    Internal {
        /// Description of what failed
        message: String,
    },
}

fn render_failures(failures: &[DeletionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a payload decode error for the given bundle
    pub fn payload_decode(bundle: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PayloadDecode {
            bundle: bundle.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
        }
    }

    /// Fold per-bundle failures into one error, or `Ok` when there are none
    pub fn from_failures(failures: Vec<DeletionFailure>) -> Result<(), Self> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self::PartialDeletion { failures })
        }
    }

    /// Whether this error means "the object is already gone"
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::StoreUnavailable {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Decode and validation errors need a new import secret, so retrying the
    /// same input is pointless. Store errors are retried unless the API server
    /// rejected the request outright (4xx other than conflict).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::PayloadDecode { .. } => false,
            Error::Validation { .. } => false,
            Error::StoreUnavailable { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::PartialDeletion { .. } => true,
            Error::NotFound { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}
